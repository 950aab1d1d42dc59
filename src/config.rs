// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Options for computing and cleaning delay spectra
use std::fmt::{Debug, Display};

use derive_builder::Builder;

use crate::{
    constants::{
        DEFAULT_CLEAN_GAIN, DEFAULT_CLEAN_MAXITER, DEFAULT_CLEAN_TOL, DEFAULT_CLEAN_WINDOW_BUFFER,
        DEFAULT_PAD, DEFAULT_POLYDEGREE,
    },
    delay_transform::DelayTransformConfig,
    gentle_clean::GentleCleanParams,
    noise::{FilterMethod, NoiseEstimateParams},
};

/// Options for delay transforming, cleaning and estimating noise
#[derive(Builder, Debug, Clone, PartialEq)]
#[builder(build_fn(validate = "Self::validate"))]
pub struct DelaySpectrumConfig {
    /// Zero-padding as a fraction of the number of channels
    #[builder(default = "DEFAULT_PAD")]
    pub pad: f64,
    /// Extra width of the clean window on each side, in units of the inverse
    /// bandwidth
    #[builder(default = "DEFAULT_CLEAN_WINDOW_BUFFER")]
    pub clean_window_buffer: f64,
    /// Fraction of the peak residual removed per CLEAN iteration
    #[builder(default = "DEFAULT_CLEAN_GAIN")]
    pub gain: f64,
    /// Relative change in residual rms below which a CLEAN pass stops
    #[builder(default = "DEFAULT_CLEAN_TOL")]
    pub tol: f64,
    /// Maximum iterations of each CLEAN pass
    #[builder(default = "DEFAULT_CLEAN_MAXITER")]
    pub maxiter: usize,
    /// Whether to decimate the padded delay axis of the plain delay transform
    #[builder(default = "true")]
    pub downsample: bool,
    /// Degree of the polynomials fitted outside the horizon by the noise estimator
    #[builder(default = "DEFAULT_POLYDEGREE")]
    pub polydegree: usize,
    /// How the noise estimator filters its residuals
    #[builder(default)]
    pub filter_method: FilterMethod,
    /// Upper bound on the bytes of padded cubes a clean holds: the products of
    /// every snapshot plus the working cubes of one chunk of snapshots
    #[builder(default)]
    pub max_bytes: Option<usize>,
    /// Whether to draw progress bars
    #[builder(default = "false")]
    pub draw_progress: bool,
}

impl DelaySpectrumConfigBuilder {
    fn validate(&self) -> Result<(), String> {
        if let Some(gain) = self.gain {
            if !(gain > 0.0 && gain <= 1.0) {
                return Err(format!("gain must be in (0, 1], got {gain}"));
            }
        }
        if let Some(tol) = self.tol {
            if !(tol.is_finite() && tol >= 0.0) {
                return Err(format!("tol must be a non-negative number, got {tol}"));
            }
        }
        if let Some(pad) = self.pad {
            if !pad.is_finite() {
                return Err(format!("pad must be finite, got {pad}"));
            }
        }
        if let Some(buffer) = self.clean_window_buffer {
            if !(buffer.is_finite() && buffer >= 0.0) {
                return Err(format!(
                    "clean_window_buffer must be a non-negative number, got {buffer}"
                ));
            }
        }
        if let Some(Some(0)) = self.max_bytes {
            return Err("max_bytes must be positive".into());
        }
        Ok(())
    }
}

impl Default for DelaySpectrumConfig {
    fn default() -> Self {
        Self {
            pad: DEFAULT_PAD,
            clean_window_buffer: DEFAULT_CLEAN_WINDOW_BUFFER,
            gain: DEFAULT_CLEAN_GAIN,
            tol: DEFAULT_CLEAN_TOL,
            maxiter: DEFAULT_CLEAN_MAXITER,
            downsample: true,
            polydegree: DEFAULT_POLYDEGREE,
            filter_method: FilterMethod::default(),
            max_bytes: None,
            draw_progress: false,
        }
    }
}

impl Display for DelaySpectrumConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.pad > 0.0 {
            writeln!(f, "Will zero-pad the band by {}% of its channels.", self.pad * 100.0)?;
        } else {
            writeln!(f, "Will not zero-pad the band.")?;
        }
        writeln!(
            f,
            "{} downsample the padded delay axis.",
            if self.downsample { "Will" } else { "Will not" }
        )?;
        writeln!(
            f,
            "Will clean within the horizon +/- {} / bandwidth with gain {}, tolerance {} and up to {} iterations per pass.",
            self.clean_window_buffer, self.gain, self.tol, self.maxiter
        )?;
        writeln!(
            f,
            "Will estimate noise with degree {} polynomials and the {} filter.",
            self.polydegree, self.filter_method
        )?;
        match self.max_bytes {
            Some(max_bytes) => writeln!(f, "Will limit padded cubes to {max_bytes} bytes at once.")?,
            None => writeln!(f, "Will not limit the memory used for padded cubes.")?,
        }
        writeln!(
            f,
            "{} draw progress bars.",
            if self.draw_progress { "Will" } else { "Will not" }
        )?;
        Ok(())
    }
}

impl DelaySpectrumConfig {
    /// A one line description of the settings, for file history.
    pub fn as_comment(&self) -> String {
        [
            Some(format!("pad={}", self.pad)),
            Some(format!("buffer={}", self.clean_window_buffer)),
            Some(format!("gain={}", self.gain)),
            Some(format!("tol={}", self.tol)),
            Some(format!("maxiter={}", self.maxiter)),
            if self.downsample {
                Some("downsample".to_string())
            } else {
                None
            },
            Some(format!("polydegree={}", self.polydegree)),
            Some(format!("filter={}", self.filter_method)),
            self.max_bytes.map(|max_bytes| format!("max_bytes={max_bytes}")),
        ]
        .into_iter()
        .flatten()
        .collect::<Vec<String>>()
        .join(", ")
    }

    /// Settings for the plain delay transform
    pub fn delay_transform_config(&self) -> DelayTransformConfig {
        DelayTransformConfig {
            pad: self.pad,
            downsample: self.downsample,
            shift: true,
        }
    }

    pub fn gentle_clean_params(&self) -> GentleCleanParams {
        GentleCleanParams {
            gain: self.gain,
            maxiter: self.maxiter,
            tol: self.tol,
        }
    }

    pub fn noise_estimate_params(&self) -> NoiseEstimateParams {
        NoiseEstimateParams {
            polydegree: self.polydegree,
            filter_method: self.filter_method,
        }
    }
}
