// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Useful constants.
//!
//! All constants *must* be double precision.

pub use marlu::constants::VEL_C;

/// Fraction of the channel count appended as zeros before the delay transform.
pub const DEFAULT_PAD: f64 = 1.0;

/// Extra width of the clean window on each side, in units of inverse bandwidth.
pub const DEFAULT_CLEAN_WINDOW_BUFFER: f64 = 1.0;

/// Relative score improvement below which a single CLEAN pass stops.
pub const DEFAULT_CLEAN_TOL: f64 = 0.1;

/// Iteration cap of a single CLEAN pass.
pub const DEFAULT_CLEAN_MAXITER: usize = 100;

/// Loop gain of the CLEAN minor cycle.
pub const DEFAULT_CLEAN_GAIN: f64 = 0.1;

/// Hard upper bound on the number of gentle CLEAN major cycles.
pub const MAX_GENTLE_CLEAN_CYCLES: usize = 1000;

/// Degree of the polynomials fitted outside the horizon by the noise estimator.
pub const DEFAULT_POLYDEGREE: usize = 4;

/// Boltzmann constant \[J/K\]
pub const BOLTZMANN_J_PER_K: f64 = 1.380_649e-23;

/// One Jansky \[W m^-2 Hz^-1\]
pub const JANSKY: f64 = 1e-26;

/// Default channel count of a simulated observation.
pub const DEFAULT_NCHAN: usize = 64;

/// Default fine channel resolution of a simulated observation \[Hz\]
pub const DEFAULT_FREQ_RES_HZ: f64 = 40e3;

/// Default first channel frequency of a simulated observation \[Hz\]
pub const DEFAULT_FREQ_START_HZ: f64 = 150e6;

/// Latitude of the default simulated array, the MWA \[degrees\]
pub const DEFAULT_LATITUDE_DEG: f64 = -26.703_319;

/// Default accumulation time of one snapshot \[s\]
pub const DEFAULT_T_ACC_S: f64 = 8.0;

/// Default interferometer efficiency used for radiometer noise.
pub const DEFAULT_EFF_Q: f64 = 0.89;

/// Default effective collecting area of one antenna, a 25 m dish \[m^2\]
pub const DEFAULT_A_EFF_M2: f64 = std::f64::consts::PI * 12.5 * 12.5;

/// Length of a sidereal day \[s\]
pub const SIDEREAL_DAY_S: f64 = 86_164.090_5;
