// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

#![warn(clippy::missing_safety_doc)]
#![warn(clippy::missing_errors_doc)]

//! Delay spectra of radio interferometer visibilities, deconvolved within the
//! horizon with a gentle CLEAN, and horizon-aware estimates of the thermal and
//! foreground noise of each baseline.
//!
//! # Examples
//!
//! Simulate a short observation, clean it and write the products out.
//!
//! ```rust
//! use delayspec::{
//!     io::write_delay_spectrum_fits,
//!     marlu::{ndarray::{array, Array1}, RADec},
//!     simulate::{observe, BeamKind, NoiseModel, Observation, SkySource},
//!     DelaySpectrum, DelaySpectrumConfig, PhaseCentre,
//! };
//! use tempfile::tempdir;
//!
//! let nsnap = 2;
//! let obs = Observation {
//!     labels: vec!["0-1".into()],
//!     baselines: array![[14.6, 0.0, 0.0]],
//!     freqs_hz: Array1::from_shape_fn(32, |c| 150e6 + c as f64 * 40e3),
//!     latitude_rad: (-26.7_f64).to_radians(),
//!     lsts_deg: array![30.0, 30.1],
//!     t_acc_s: 8.0,
//!     pointing_centre: PhaseCentre::zenith(nsnap),
//!     phase_centre: PhaseCentre::zenith(nsnap),
//!     sources: vec![SkySource {
//!         radec: RADec::from_degrees(30.0, -26.7),
//!         flux_jy: 1.0,
//!         spectral_index: 0.0,
//!         ref_freq_hz: 150e6,
//!     }],
//!     beam: BeamKind::Isotropic,
//!     noise: NoiseModel::Rms(0.01),
//!     seed: 42,
//! };
//!
//! let mut spectrum = DelaySpectrum::new(observe(&obs).unwrap());
//! let config = DelaySpectrumConfig::default();
//! spectrum.clean(&config).unwrap();
//! assert!(spectrum.failed_units().unwrap().is_empty());
//!
//! let noise = spectrum.noise_estimate(&config).unwrap();
//! assert_eq!(noise.thermal_noise.dim(), (1, nsnap));
//!
//! let tmp_dir = tempdir().unwrap();
//! write_delay_spectrum_fits(tmp_dir.path().join("delay.fits"), &spectrum).unwrap();
//! ```

pub mod clean_window;
pub mod config;
pub mod constants;
pub mod delay_spectrum;
pub mod delay_transform;
pub mod error;
pub mod gentle_clean;
pub mod horizon;
pub mod interferometer;
pub mod io;
pub mod noise;
pub mod simulate;
pub mod weights;

pub use config::{DelaySpectrumConfig, DelaySpectrumConfigBuilder};
pub use delay_spectrum::{CleanProducts, CleanStatus, DelaySpectrum, NoiseEstimates};
pub use error::{AppError, DelaySpectrumError};
pub use horizon::{PhaseCentre, PhaseCentreCoords};
pub use interferometer::{InterferometerArray, LagProducts, ProductState};
pub use weights::FreqWeights;

pub use marlu;
pub use marlu::{ndarray, Complex};
pub use rustfft::num_complex::Complex64;

cfg_if::cfg_if! {
    if #[cfg(feature = "cli")] {
        pub mod cli;
        pub use cli::CliContext;
    }
}

#[cfg(test)]
pub(crate) mod test_common;
