// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Fixtures shared by the unit tests.

use marlu::{
    ndarray::{Array1, Array2},
    RADec,
};

use crate::{
    horizon::PhaseCentre,
    interferometer::InterferometerArray,
    simulate::{observe, BeamKind, NoiseModel, Observation, SkySource},
};

pub(crate) const TEST_LATITUDE_DEG: f64 = -26.7;

/// A short observation of two sources with an isotropic beam, no noise, phased
/// and pointed at zenith. Baselines get longer and rotate with their index.
pub(crate) fn get_test_observation(nbl: usize, nchan: usize, nsnap: usize) -> Observation {
    let baselines = Array2::from_shape_fn((nbl, 3), |(b, c)| match c {
        0 => 14.6 * (b + 1) as f64,
        1 => 5.0 * b as f64,
        _ => 0.0,
    });
    let lsts_deg = Array1::from_shape_fn(nsnap, |t| 30.0 + 0.25 * t as f64);
    Observation {
        labels: (0..nbl).map(|b| format!("{b}-{}", b + 1)).collect(),
        baselines,
        freqs_hz: Array1::from_shape_fn(nchan, |c| 150e6 + c as f64 * 40e3),
        latitude_rad: TEST_LATITUDE_DEG.to_radians(),
        lsts_deg,
        t_acc_s: 8.0,
        pointing_centre: PhaseCentre::zenith(nsnap),
        phase_centre: PhaseCentre::zenith(nsnap),
        sources: vec![
            SkySource {
                radec: RADec::from_degrees(30.0, TEST_LATITUDE_DEG),
                flux_jy: 10.0,
                spectral_index: -0.8,
                ref_freq_hz: 150e6,
            },
            SkySource {
                radec: RADec::from_degrees(40.0, TEST_LATITUDE_DEG - 5.0),
                flux_jy: 3.0,
                spectral_index: -0.5,
                ref_freq_hz: 150e6,
            },
        ],
        beam: BeamKind::Isotropic,
        noise: NoiseModel::Noiseless,
        seed: 0,
    }
}

pub(crate) fn get_test_array(nbl: usize, nchan: usize, nsnap: usize) -> InterferometerArray {
    observe(&get_test_observation(nbl, nchan, nsnap)).unwrap()
}
