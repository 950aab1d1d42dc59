// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Simple sky and noise simulation, enough to feed the delay spectrum
//! pipeline with realistic visibilities.
//!
//! Visibilities follow `V(b, f) = sum_k S_k(f) A(s_k, f) exp(-2 pi i f b.(s_k - s_0) / c)`
//! where `s_0` is the phase centre and `A` a primary beam normalised to one at
//! the pointing centre.

use std::{f64::consts::PI, str::FromStr};

use log::{debug, trace};
use marlu::{
    ndarray::{parallel::prelude::*, Array1, Array2, Array3, ArrayView1, ArrayView2, Axis},
    RADec,
};
use rand::{rngs::StdRng, SeedableRng};
use rand_distr::{Distribution, Normal};
use rustfft::num_complex::Complex64;
use thiserror::Error;

use crate::{
    constants::{BOLTZMANN_J_PER_K, JANSKY, VEL_C},
    horizon::{altaz_to_dircos, PhaseCentre},
    interferometer::InterferometerArray,
    DelaySpectrumError,
};

/// Conversion between the standard deviation and the FWHM of a Gaussian.
const FWHM_FACTOR: f64 = 2.35482004503;

#[derive(Error, Debug)]
pub enum SimulationError {
    #[error("The {beam} primary beam is not available in this build")]
    BeamUnavailable { beam: String },

    #[error("Invalid noise rms {rms}: {reason}")]
    InvalidNoise { rms: f64, reason: String },

    #[error("Invalid beam parameter {parameter}={value}")]
    InvalidBeam { parameter: String, value: f64 },

    #[error(transparent)]
    DelaySpectrum(#[from] DelaySpectrumError),
}

/// Which primary beam model to weight the sky with.
#[derive(Debug, Clone, PartialEq)]
pub enum BeamKind {
    /// Unit response everywhere above the horizon
    Isotropic,
    /// Circular Gaussian around the pointing centre whose width scales as
    /// `1 / f`
    Gaussian {
        /// Full width at half maximum \[degrees\] at `ref_freq_hz`
        fwhm_deg: f64,
        /// Frequency at which `fwhm_deg` applies
        ref_freq_hz: f64,
    },
    /// A tabulated or instrument-specific beam provided by another package
    External { name: String },
}

impl FromStr for BeamKind {
    type Err = SimulationError;

    /// `isotropic`, `gaussian` (20 degrees at 150 MHz) or
    /// `gaussian:<fwhm_deg>@<ref_freq_mhz>`. Any other name is an external beam.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let lower = s.to_lowercase();
        match lower.split_once(':') {
            None if lower == "isotropic" => Ok(Self::Isotropic),
            None if lower == "gaussian" => Ok(Self::Gaussian {
                fwhm_deg: 20.0,
                ref_freq_hz: 150e6,
            }),
            Some(("gaussian", params)) => {
                let (fwhm, freq) = params.split_once('@').unwrap_or((params, "150"));
                let parse = |parameter: &str, v: &str| {
                    v.parse::<f64>().map_err(|_| SimulationError::InvalidBeam {
                        parameter: parameter.to_string(),
                        value: f64::NAN,
                    })
                };
                Ok(Self::Gaussian {
                    fwhm_deg: parse("fwhm_deg", fwhm)?,
                    ref_freq_hz: parse("ref_freq_mhz", freq)? * 1e6,
                })
            }
            _ => Ok(Self::External {
                name: s.to_string(),
            }),
        }
    }
}

/// A primary beam power response.
pub trait BeamResponse: Sync + Send {
    /// The kind of beam this is.
    fn get_beam_kind(&self) -> BeamKind;

    /// Power response towards the unit vector `source` when pointed at
    /// `pointing`, both in the local (East, North, Up) frame.
    fn calc_response(&self, source: [f64; 3], pointing: [f64; 3], freq_hz: f64) -> f64;
}

struct IsotropicBeam;

impl BeamResponse for IsotropicBeam {
    fn get_beam_kind(&self) -> BeamKind {
        BeamKind::Isotropic
    }

    fn calc_response(&self, _source: [f64; 3], _pointing: [f64; 3], _freq_hz: f64) -> f64 {
        1.0
    }
}

struct GaussianBeam {
    fwhm_rad: f64,
    ref_freq_hz: f64,
}

impl BeamResponse for GaussianBeam {
    fn get_beam_kind(&self) -> BeamKind {
        BeamKind::Gaussian {
            fwhm_deg: self.fwhm_rad.to_degrees(),
            ref_freq_hz: self.ref_freq_hz,
        }
    }

    fn calc_response(&self, source: [f64; 3], pointing: [f64; 3], freq_hz: f64) -> f64 {
        let cos_sep = source
            .iter()
            .zip(pointing.iter())
            .map(|(s, p)| s * p)
            .sum::<f64>()
            .clamp(-1.0, 1.0);
        let sep = cos_sep.acos();
        let sigma = self.fwhm_rad * self.ref_freq_hz / freq_hz / FWHM_FACTOR;
        (-(sep * sep) / (2.0 * sigma * sigma)).exp()
    }
}

/// Instantiate the beam model for `kind`.
///
/// # Errors
///
/// - [`SimulationError::BeamUnavailable`] for external beams.
/// - [`SimulationError::InvalidBeam`] for a non-positive Gaussian width or
///   reference frequency.
pub fn create_beam_object(kind: &BeamKind) -> Result<Box<dyn BeamResponse>, SimulationError> {
    match kind {
        BeamKind::Isotropic => Ok(Box::new(IsotropicBeam)),
        BeamKind::Gaussian {
            fwhm_deg,
            ref_freq_hz,
        } => {
            for (parameter, value) in [("fwhm_deg", *fwhm_deg), ("ref_freq_hz", *ref_freq_hz)] {
                if !(value.is_finite() && value > 0.0) {
                    return Err(SimulationError::InvalidBeam {
                        parameter: parameter.to_string(),
                        value,
                    });
                }
            }
            Ok(Box::new(GaussianBeam {
                fwhm_rad: fwhm_deg.to_radians(),
                ref_freq_hz: *ref_freq_hz,
            }))
        }
        BeamKind::External { name } => Err(SimulationError::BeamUnavailable { beam: name.clone() }),
    }
}

/// A point source with a power-law spectrum.
#[derive(Debug, Clone, Copy)]
pub struct SkySource {
    pub radec: RADec,
    /// Flux density \[Jy\] at `ref_freq_hz`
    pub flux_jy: f64,
    pub spectral_index: f64,
    pub ref_freq_hz: f64,
}

impl SkySource {
    pub fn flux_at(&self, freq_hz: f64) -> f64 {
        self.flux_jy * (freq_hz / self.ref_freq_hz).powf(self.spectral_index)
    }
}

/// Noiseless visibilities `[nbl, nchan, nsnap]` of `sources`.
///
/// Sources below the horizon at a snapshot do not contribute to it. RA-Dec
/// centres are converted with `lsts_deg`.
///
/// # Errors
///
/// - [`SimulationError::DelaySpectrum`] if the centres do not match the number
///   of snapshots or can not be turned into directions.
#[allow(clippy::too_many_arguments)]
pub fn simulate_sky_vis(
    baselines: ArrayView2<f64>,
    freqs_hz: ArrayView1<f64>,
    lsts_deg: ArrayView1<f64>,
    latitude_rad: f64,
    sources: &[SkySource],
    beam: &dyn BeamResponse,
    pointing_centre: &PhaseCentre,
    phase_centre: &PhaseCentre,
) -> Result<Array3<Complex64>, SimulationError> {
    trace!("start simulate_sky_vis");
    let nsnap = lsts_deg.len();
    for (argument, centre) in [("pointing_centre", pointing_centre), ("phase_centre", phase_centre)]
    {
        if centre.num_snapshots() != nsnap {
            return Err(DelaySpectrumError::IncompatibleShape {
                argument: argument.into(),
                function: "simulate_sky_vis".into(),
                expected: format!("{nsnap} snapshots"),
                received: format!("{} snapshots", centre.num_snapshots()),
            }
            .into());
        }
    }
    let pointing = pointing_centre.to_hadec(lsts_deg)?.to_dircos(latitude_rad)?;
    let phase = phase_centre.to_hadec(lsts_deg)?.to_dircos(latitude_rad)?;

    // [nsnap, nsrc] direction cosines, or None below the horizon
    let mut directions = Array2::from_elem((nsnap, sources.len()), None);
    for (t, &lst) in lsts_deg.iter().enumerate() {
        for (k, source) in sources.iter().enumerate() {
            let azel = source
                .radec
                .to_hadec(lst.to_radians())
                .to_azel(latitude_rad);
            if azel.el > 0.0 {
                directions[[t, k]] = Some(altaz_to_dircos(azel.el.to_degrees(), azel.az.to_degrees()));
            }
        }
    }
    debug!(
        "simulating {} sources on {} baselines, {} channels, {} snapshots",
        sources.len(),
        baselines.nrows(),
        freqs_hz.len(),
        nsnap
    );

    let mut vis = Array3::zeros((baselines.nrows(), freqs_hz.len(), nsnap));
    vis.axis_iter_mut(Axis(0))
        .into_par_iter()
        .enumerate()
        .for_each(|(bl_idx, mut vis_bl)| {
            let b = baselines.row(bl_idx);
            for t in 0..nsnap {
                let p = [pointing[[t, 0]], pointing[[t, 1]], pointing[[t, 2]]];
                let s0 = phase.row(t);
                for (k, source) in sources.iter().enumerate() {
                    let Some(s) = directions[[t, k]] else {
                        continue;
                    };
                    let path = (0..3).map(|i| b[i] * (s[i] - s0[i])).sum::<f64>() / VEL_C;
                    for (c, &freq) in freqs_hz.iter().enumerate() {
                        let amplitude = source.flux_at(freq) * beam.calc_response(s, p, freq);
                        vis_bl[[c, t]] += Complex64::from_polar(amplitude, -2.0 * PI * freq * path);
                    }
                }
            }
        });
    trace!("end simulate_sky_vis");
    Ok(vis)
}

/// RMS \[Jy\] of the thermal noise on one visibility of a baseline between two
/// identical antennas.
pub fn thermal_noise_rms_jy(
    tsys_k: f64,
    a_eff_m2: f64,
    eff_q: f64,
    t_acc_s: f64,
    freq_res_hz: f64,
) -> f64 {
    2.0 * BOLTZMANN_J_PER_K * tsys_k / (a_eff_m2 * eff_q * (2.0 * t_acc_s * freq_res_hz).sqrt())
        / JANSKY
}

/// Complex Gaussian noise of the given `dims` whose magnitude has an rms of
/// `rms`, split equally between the real and imaginary parts. The same seed
/// always gives the same noise.
///
/// # Errors
///
/// - [`SimulationError::InvalidNoise`] if `rms` is negative or not finite.
pub fn generate_noise(
    dims: (usize, usize, usize),
    rms: f64,
    seed: u64,
) -> Result<Array3<Complex64>, SimulationError> {
    if !rms.is_finite() {
        return Err(SimulationError::InvalidNoise {
            rms,
            reason: "must be finite".into(),
        });
    }
    let normal = Normal::new(0.0, rms / 2.0_f64.sqrt()).map_err(|e| SimulationError::InvalidNoise {
        rms,
        reason: e.to_string(),
    })?;
    let mut rng = StdRng::seed_from_u64(seed);
    Ok(Array3::from_shape_simple_fn(dims, || {
        Complex64::new(normal.sample(&mut rng), normal.sample(&mut rng))
    }))
}

/// How much thermal noise to add to simulated visibilities.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum NoiseModel {
    /// No noise at all
    Noiseless,
    /// Radiometer noise of identical antennas, see [`thermal_noise_rms_jy`]
    Thermal {
        tsys_k: f64,
        a_eff_m2: f64,
        eff_q: f64,
    },
    /// A fixed rms \[Jy\] per visibility
    Rms(f64),
}

/// Everything needed to simulate an observation.
#[derive(Debug, Clone)]
pub struct Observation {
    pub labels: Vec<String>,
    /// `[nbl, 3]` baseline vectors in metres (East, North, Up)
    pub baselines: Array2<f64>,
    pub freqs_hz: Array1<f64>,
    pub latitude_rad: f64,
    /// Local sidereal time of each snapshot \[degrees\]
    pub lsts_deg: Array1<f64>,
    pub t_acc_s: f64,
    pub pointing_centre: PhaseCentre,
    pub phase_centre: PhaseCentre,
    pub sources: Vec<SkySource>,
    pub beam: BeamKind,
    pub noise: NoiseModel,
    pub seed: u64,
}

/// Simulate the sky and noise visibilities of `obs`.
///
/// # Errors
///
/// - [`SimulationError::BeamUnavailable`] if the beam can not be created here.
/// - [`SimulationError::InvalidNoise`] for an unusable noise level.
/// - [`SimulationError::DelaySpectrum`] if the observation is inconsistent.
pub fn observe(obs: &Observation) -> Result<InterferometerArray, SimulationError> {
    let beam = create_beam_object(&obs.beam)?;
    let skyvis = simulate_sky_vis(
        obs.baselines.view(),
        obs.freqs_hz.view(),
        obs.lsts_deg.view(),
        obs.latitude_rad,
        &obs.sources,
        beam.as_ref(),
        &obs.pointing_centre,
        &obs.phase_centre,
    )?;
    let dims = skyvis.dim();
    let mut array = InterferometerArray::new(
        obs.labels.clone(),
        obs.baselines.clone(),
        obs.freqs_hz.clone(),
        obs.latitude_rad,
        obs.lsts_deg.clone(),
        obs.t_acc_s,
        obs.pointing_centre.clone(),
        obs.phase_centre.clone(),
        skyvis,
    )?;
    let rms = match obs.noise {
        NoiseModel::Noiseless => None,
        NoiseModel::Thermal {
            tsys_k,
            a_eff_m2,
            eff_q,
        } => Some(thermal_noise_rms_jy(
            tsys_k,
            a_eff_m2,
            eff_q,
            obs.t_acc_s,
            array.freq_res_hz(),
        )),
        NoiseModel::Rms(rms) => Some(rms),
    };
    if let Some(rms) = rms {
        debug!("adding noise with rms {rms:.3} Jy per visibility");
        array.add_noise(generate_noise(dims, rms, obs.seed)?)?;
    }
    Ok(array)
}

#[cfg(test)]
mod tests {
    use approx::assert_abs_diff_eq;
    use marlu::ndarray::array;

    use super::*;
    use crate::horizon::PhaseCentreCoords;

    const LAT_DEG: f64 = -26.7;

    fn zenith_source(flux_jy: f64, spectral_index: f64) -> SkySource {
        SkySource {
            radec: RADec::from_degrees(30.0, LAT_DEG),
            flux_jy,
            spectral_index,
            ref_freq_hz: 150e6,
        }
    }

    #[test]
    fn test_zenith_source_at_zenith_phase_centre() {
        let baselines = array![[14.6, 0.0, 0.0], [0.0, 30.0, 0.0]];
        let freqs = Array1::linspace(140e6, 160e6, 16);
        let lsts = array![30.0];
        let beam = create_beam_object(&BeamKind::Isotropic).unwrap();
        let vis = simulate_sky_vis(
            baselines.view(),
            freqs.view(),
            lsts.view(),
            LAT_DEG.to_radians(),
            &[zenith_source(2.0, -0.8)],
            beam.as_ref(),
            &PhaseCentre::zenith(1),
            &PhaseCentre::zenith(1),
        )
        .unwrap();
        assert_eq!(vis.dim(), (2, 16, 1));
        for b in 0..2 {
            for (c, &f) in freqs.iter().enumerate() {
                let expected = 2.0 * (f / 150e6).powf(-0.8);
                assert_abs_diff_eq!(vis[[b, c, 0]].re, expected, epsilon = 1e-6);
                assert_abs_diff_eq!(vis[[b, c, 0]].im, 0.0, epsilon = 1e-6);
            }
        }
    }

    #[test]
    fn test_source_below_horizon_is_invisible() {
        let baselines = array![[14.6, 0.0, 0.0]];
        let freqs = array![150e6];
        // transits 12 hours away
        let lsts = array![210.0];
        let vis = simulate_sky_vis(
            baselines.view(),
            freqs.view(),
            lsts.view(),
            LAT_DEG.to_radians(),
            &[zenith_source(1.0, 0.0)],
            &IsotropicBeam,
            &PhaseCentre::zenith(1),
            &PhaseCentre::zenith(1),
        )
        .unwrap();
        assert_abs_diff_eq!(vis[[0, 0, 0]].norm(), 0.0);
    }

    #[test]
    fn test_radec_phase_centre_needs_matching_lsts() {
        let baselines = array![[14.6, 0.0, 0.0]];
        let freqs = array![150e6];
        let lsts = array![0.0, 1.0];
        let centre = PhaseCentre::fixed(PhaseCentreCoords::RaDec, &[0.0, LAT_DEG], 1).unwrap();
        assert!(matches!(
            simulate_sky_vis(
                baselines.view(),
                freqs.view(),
                lsts.view(),
                LAT_DEG.to_radians(),
                &[],
                &IsotropicBeam,
                &PhaseCentre::zenith(2),
                &centre,
            ),
            Err(SimulationError::DelaySpectrum(
                DelaySpectrumError::IncompatibleShape { .. }
            ))
        ));
    }

    #[test]
    fn test_gaussian_beam_half_power() {
        let beam = create_beam_object(&"gaussian:20@150".parse().unwrap()).unwrap();
        let zenith = [0.0, 0.0, 1.0];
        assert_abs_diff_eq!(beam.calc_response(zenith, zenith, 150e6), 1.0);
        let half = altaz_to_dircos(80.0, 0.0);
        assert_abs_diff_eq!(beam.calc_response(half, zenith, 150e6), 0.5, epsilon = 1e-6);
        // narrower at higher frequencies
        assert!(beam.calc_response(half, zenith, 300e6) < 0.5);
    }

    #[test]
    fn test_external_beam_unavailable() {
        let kind: BeamKind = "mwa_fee".parse().unwrap();
        assert!(matches!(
            create_beam_object(&kind),
            Err(SimulationError::BeamUnavailable { .. })
        ));
        assert!(matches!(
            create_beam_object(&BeamKind::Gaussian {
                fwhm_deg: -1.0,
                ref_freq_hz: 150e6
            }),
            Err(SimulationError::InvalidBeam { .. })
        ));
    }

    #[test]
    fn test_thermal_noise_rms() {
        // 2 k T / (A eta sqrt(2 t df)) = 2 * 1.380649e-23 * 200 / (20 * sqrt(2 * 8 * 40e3)) / 1e-26
        let rms = thermal_noise_rms_jy(200.0, 20.0, 1.0, 8.0, 40e3);
        assert_abs_diff_eq!(rms, 34.516225, epsilon = 1e-3);
    }

    #[test]
    fn test_generate_noise_is_seeded() {
        let dims = (2, 64, 50);
        let first = generate_noise(dims, 3.0, 5).unwrap();
        let again = generate_noise(dims, 3.0, 5).unwrap();
        let other = generate_noise(dims, 3.0, 6).unwrap();
        assert_eq!(first, again);
        assert_ne!(first, other);

        let n = first.len() as f64;
        let ms = first.iter().map(|v| v.norm_sqr()).sum::<f64>() / n;
        let ms_re = first.iter().map(|v| v.re * v.re).sum::<f64>() / n;
        assert!((ms.sqrt() - 3.0).abs() < 0.1);
        assert!((ms_re / ms - 0.5).abs() < 0.05);

        assert!(matches!(
            generate_noise(dims, f64::NAN, 0),
            Err(SimulationError::InvalidNoise { .. })
        ));
        assert!(generate_noise(dims, -1.0, 0).is_err());
    }

    #[test]
    fn test_observe_adds_noise() {
        let mut obs = Observation {
            labels: vec!["0-1".into()],
            baselines: array![[14.6, 0.0, 0.0]],
            freqs_hz: Array1::linspace(150e6, 150e6 + 31.0 * 40e3, 32),
            latitude_rad: LAT_DEG.to_radians(),
            lsts_deg: array![30.0, 30.5],
            t_acc_s: 8.0,
            pointing_centre: PhaseCentre::zenith(2),
            phase_centre: PhaseCentre::zenith(2),
            sources: vec![zenith_source(5.0, 0.0)],
            beam: BeamKind::Isotropic,
            noise: NoiseModel::Rms(0.5),
            seed: 11,
        };
        let array = observe(&obs).unwrap();
        assert_eq!(array.dims(), (1, 32, 2));
        let noise = generate_noise((1, 32, 2), 0.5, 11).unwrap();
        assert_abs_diff_eq!(array.vis_noise_freq().to_owned(), noise);
        assert_abs_diff_eq!(
            array.vis_freq().to_owned(),
            &array.skyvis_freq() + &noise,
            epsilon = 1e-12
        );

        obs.beam = BeamKind::External {
            name: "mwa_fee".into(),
        };
        assert!(matches!(
            observe(&obs),
            Err(SimulationError::BeamUnavailable { .. })
        ));
    }
}
