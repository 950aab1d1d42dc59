// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Band-averaged thermal and foreground noise estimates.
//!
//! Smooth-spectrum foregrounds live inside the horizon limits in delay space,
//! so the delay spectrum outside them is dominated by thermal noise. A low
//! order polynomial is fitted to each side outside the horizon and what
//! remains, after removing slowly varying structure, gives the thermal noise.
//! The excess power inside the horizon gives the foreground noise.

use std::{fmt::Display, str::FromStr};

use log::{trace, warn};
use marlu::ndarray::{Array1, ArrayView1, ArrayView2, Axis};
use nalgebra::{DMatrix, DVector};
use rustfft::{num_complex::Complex64, FftPlanner};

use crate::{
    constants::{DEFAULT_POLYDEGREE, VEL_C},
    delay_transform::{
        calculate_delay_channels, frequency_transform, lag_axis, DelayTransformConfig,
    },
    DelaySpectrumError,
};

/// How slowly varying structure is removed from the fit residuals
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FilterMethod {
    /// Rectangular high pass filter in the Fourier domain of the residuals
    #[default]
    HighPass,
    /// Subtract a centred moving average
    MovingAverage,
}

impl FromStr for FilterMethod {
    type Err = DelaySpectrumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "hpf" => Ok(Self::HighPass),
            "ma" => Ok(Self::MovingAverage),
            _ => Err(DelaySpectrumError::InvalidArgument {
                argument: "filter_method".into(),
                function: "FilterMethod::from_str".into(),
                reason: format!("expected hpf or ma, got {s}"),
            }),
        }
    }
}

impl Display for FilterMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}",
            match self {
                Self::HighPass => "hpf",
                Self::MovingAverage => "ma",
            }
        )
    }
}

/// Options for [`band_averaged_noise_estimate`]
#[derive(Debug, Clone, Copy)]
pub struct NoiseEstimateParams {
    /// Degree of the polynomials fitted outside the horizon
    pub polydegree: usize,
    /// How to remove slowly varying residual structure
    pub filter_method: FilterMethod,
}

impl Default for NoiseEstimateParams {
    fn default() -> Self {
        Self {
            polydegree: DEFAULT_POLYDEGREE,
            filter_method: FilterMethod::default(),
        }
    }
}

/// Whether all snapshots shared one inside/outside partition of delay space
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NoiseEstimateMode {
    /// The pointing centre delays are negligible, the zenith horizon is used
    Batched,
    /// Each snapshot uses horizon limits around its own pointing centre delay
    PerSnapshot,
}

/// Per-snapshot noise estimates for one baseline, in the units of the input
/// visibilities
#[derive(Debug, Clone)]
pub struct NoiseEstimate {
    /// Thermal noise rms of a single channel
    pub thermal_noise: Array1<f64>,
    /// Foreground noise rms of a single channel, NaN where the power inside
    /// the horizon does not exceed the thermal noise
    pub foreground_noise: Array1<f64>,
    /// How the horizon partition was chosen
    pub mode: NoiseEstimateMode,
}

/// Where a delay falls relative to the horizon of one snapshot
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DelayRegion {
    /// Fitted, below the horizon by more than the margin
    Below,
    /// Fitted, above the horizon by more than the margin
    Above,
    /// Counted as foreground power
    Inside,
    /// Neither fitted nor counted
    Margin,
}

/// Classify `lag` against the horizon `[lo, hi]` and a `margin` of one
/// resolution element. Batched estimates count the whole zenith horizon as
/// inside, per-snapshot ones only the delays strictly more than `margin`
/// within their limits.
fn delay_region(lag: f64, lo: f64, hi: f64, margin: f64, mode: NoiseEstimateMode) -> DelayRegion {
    if lag < lo - margin {
        return DelayRegion::Below;
    }
    if lag > hi + margin {
        return DelayRegion::Above;
    }
    let inside = match mode {
        NoiseEstimateMode::Batched => lo <= lag && lag <= hi,
        NoiseEstimateMode::PerSnapshot => lo + margin < lag && lag < hi - margin,
    };
    if inside {
        DelayRegion::Inside
    } else {
        DelayRegion::Margin
    }
}

/// Least squares polynomial coefficients (lowest order first) of `y(x)`.
///
/// `x` is mapped onto `[-1, 1]` before fitting, so the coefficients apply to
/// the mapped abscissa returned alongside them as `(offset, half_width)`.
fn fit_polynomial(x: &[f64], y: &[f64], degree: usize) -> Option<(Vec<f64>, f64, f64)> {
    let n = x.len();
    if n <= degree {
        return None;
    }
    let lo = x.iter().cloned().fold(f64::INFINITY, f64::min);
    let hi = x.iter().cloned().fold(f64::NEG_INFINITY, f64::max);
    let offset = 0.5 * (hi + lo);
    let half_width = if hi > lo { 0.5 * (hi - lo) } else { 1.0 };

    let mut a_data = Vec::with_capacity(n * (degree + 1));
    for &xi in x {
        let xi = (xi - offset) / half_width;
        for i in 0..=degree {
            a_data.push(xi.powi(i as i32));
        }
    }
    let a = DMatrix::from_row_slice(n, degree + 1, &a_data);
    let y = DVector::from_column_slice(y);

    // normal equations, A^T A c = A^T y
    let ata = a.transpose() * &a;
    let aty = a.transpose() * y;
    let coeffs = ata.lu().solve(&aty)?;
    Some((coeffs.iter().cloned().collect(), offset, half_width))
}

fn eval_polynomial(coeffs: &[f64], offset: f64, half_width: f64, x: f64) -> f64 {
    let x = (x - offset) / half_width;
    coeffs.iter().rev().fold(0.0, |acc, &c| acc * x + c)
}

/// Subtract a complex polynomial fit from the samples of one side of the
/// horizon. Returns the residuals and the number of fitted parameters.
fn detrend_segment(lags: &[f64], values: &[Complex64], polydegree: usize) -> (Vec<Complex64>, usize) {
    if lags.is_empty() {
        return (vec![], 0);
    }
    let degree = polydegree.min(lags.len() - 1);
    let re = values.iter().map(|v| v.re).collect::<Vec<_>>();
    let im = values.iter().map(|v| v.im).collect::<Vec<_>>();
    match (
        fit_polynomial(lags, &re, degree),
        fit_polynomial(lags, &im, degree),
    ) {
        (Some((re_c, off, hw)), Some((im_c, _, _))) => {
            let residuals = lags
                .iter()
                .zip(values.iter())
                .map(|(&lag, &v)| {
                    v - Complex64::new(
                        eval_polynomial(&re_c, off, hw, lag),
                        eval_polynomial(&im_c, off, hw, lag),
                    )
                })
                .collect();
            (residuals, degree + 1)
        }
        _ => {
            warn!(
                "polynomial fit of degree {} to {} delays failed, not detrending",
                degree,
                lags.len()
            );
            (values.to_vec(), 0)
        }
    }
}

/// Keep the Fourier modes of `series` above a fraction `1 - wfrac` of the
/// Nyquist frequency. Returns the filtered series and the fraction of modes kept.
fn high_pass(series: &[Complex64], wfrac: f64) -> (Vec<Complex64>, f64) {
    let n = series.len();
    let cut = 0.5 * (1.0 - wfrac);
    let mut buffer = series.to_vec();
    let mut planner = FftPlanner::new();
    planner.plan_fft_forward(n).process(&mut buffer);
    let freqs = lag_axis(n, 1.0, false);
    let mut kept = 0;
    for (b, f) in buffer.iter_mut().zip(freqs.iter()) {
        if f.abs() < cut {
            *b = Complex64::new(0.0, 0.0);
        } else {
            kept += 1;
        }
    }
    planner.plan_fft_inverse(n).process(&mut buffer);
    buffer.iter_mut().for_each(|b| *b /= n as f64);
    (buffer, kept as f64 / n as f64)
}

/// Subtract a centred moving average of width `wlen` (truncated at the ends).
fn moving_average_residual(series: &[Complex64], wlen: usize) -> Vec<Complex64> {
    let n = series.len();
    let half = wlen / 2;
    (0..n)
        .map(|i| {
            let start = i.saturating_sub(half);
            let end = (start + wlen).min(n);
            let window = &series[start..end];
            series[i] - window.iter().sum::<Complex64>() / window.len() as f64
        })
        .collect()
}

/// Estimate the thermal and foreground noise of one baseline's visibilities.
///
/// # Arguments
///
/// * `vis_freq` - `[nchan, nsnap]` visibilities of one baseline
/// * `freq_res_hz` - channel width
/// * `baseline` - baseline vector in metres (East, North, Up)
/// * `pointing_dircos` - `[nsnap, 3]` direction cosines of the pointing centre
/// * `params` - polynomial degree and filter method
///
/// # Errors
///
/// - [`DelaySpectrumError::IncompatibleShape`] if `pointing_dircos` does not
///   have one row per snapshot.
/// - [`DelaySpectrumError::InvalidArgument`] for an unusable channel width.
pub fn band_averaged_noise_estimate(
    vis_freq: ArrayView2<Complex64>,
    freq_res_hz: f64,
    baseline: [f64; 3],
    pointing_dircos: ArrayView2<f64>,
    params: &NoiseEstimateParams,
) -> Result<NoiseEstimate, DelaySpectrumError> {
    trace!("start band_averaged_noise_estimate");
    let (nchan, nsnap) = vis_freq.dim();
    if pointing_dircos.dim() != (nsnap, 3) {
        return Err(DelaySpectrumError::IncompatibleShape {
            argument: "pointing_dircos".into(),
            function: "band_averaged_noise_estimate".into(),
            expected: format!("({nsnap}, 3)"),
            received: format!("{:?}", pointing_dircos.dim()),
        });
    }
    // only checks the channel width, the estimate is never padded
    calculate_delay_channels(
        nchan,
        freq_res_hz,
        &DelayTransformConfig {
            pad: 0.0,
            downsample: false,
            shift: false,
        },
    )?;
    // forward transform, so emission from the pointing centre lands on its
    // geometric delay `-b.s/c`
    let vis_lag = frequency_transform(vis_freq.insert_axis(Axis(0)), freq_res_hz)
        .index_axis_move(Axis(0), 0);
    let lags = lag_axis(nchan, freq_res_hz, false);

    let bandwidth = nchan as f64 * freq_res_hz;
    let margin = 1.0 / bandwidth;
    let b = ArrayView1::from(&baseline);
    let horizon = b.dot(&b).sqrt() / VEL_C;
    let pointing_delays = pointing_dircos.dot(&b).mapv(|d| -d / VEL_C);
    let mode = if pointing_delays.iter().all(|d| d.abs() <= 0.5 * margin) {
        NoiseEstimateMode::Batched
    } else {
        NoiseEstimateMode::PerSnapshot
    };

    let mut thermal_noise = Array1::from_elem(nsnap, f64::NAN);
    let mut foreground_noise = Array1::from_elem(nsnap, f64::NAN);
    for snap in 0..nsnap {
        let centre = match mode {
            NoiseEstimateMode::Batched => 0.0,
            NoiseEstimateMode::PerSnapshot => pointing_delays[snap],
        };
        let (lo, hi) = (centre - horizon, centre + horizon);
        let spectrum = vis_lag.index_axis(Axis(1), snap);

        // outside samples of each side, in ascending delay order
        let mut sides = [(vec![], vec![]), (vec![], vec![])];
        let mut inside_power = (0.0, 0usize);
        let mut order = (0..nchan).collect::<Vec<_>>();
        order.sort_by(|&i, &j| lags[i].total_cmp(&lags[j]));
        for i in order {
            let (lag, v) = (lags[i], spectrum[i]);
            match delay_region(lag, lo, hi, margin, mode) {
                DelayRegion::Below => {
                    sides[0].0.push(lag);
                    sides[0].1.push(v);
                }
                DelayRegion::Above => {
                    sides[1].0.push(lag);
                    sides[1].1.push(v);
                }
                DelayRegion::Inside => {
                    inside_power.0 += v.norm_sqr();
                    inside_power.1 += 1;
                }
                DelayRegion::Margin => {}
            }
        }

        let mut residuals = vec![];
        let mut nparams = 0;
        for (side_lags, side_vals) in sides.iter() {
            let (res, np) = detrend_segment(side_lags, side_vals, params.polydegree);
            residuals.extend(res);
            nparams += np;
        }
        let n = residuals.len();
        if n == 0 {
            warn!("no delays outside the horizon in snapshot {snap}, can not estimate noise");
            continue;
        }

        let (filtered, correction) = match params.filter_method {
            FilterMethod::HighPass => {
                let wfrac = 1.0 - 1.0 / (horizon * bandwidth);
                if wfrac > 0.0 && n > 1 {
                    let (filtered, kept) = high_pass(&residuals, wfrac);
                    (filtered, if kept > 0.0 { 1.0 / kept } else { f64::NAN })
                } else {
                    warn!("horizon is within one delay bin, residuals are not high pass filtered");
                    (residuals, 1.0)
                }
            }
            FilterMethod::MovingAverage => {
                let wlen = (horizon * bandwidth).sqrt().round() as usize;
                if wlen > 1 && n > wlen {
                    let filtered = moving_average_residual(&residuals, wlen);
                    (filtered, 1.0 / (1.0 - 1.0 / wlen as f64))
                } else {
                    (residuals, 1.0)
                }
            }
        };
        let dof = if n > nparams {
            n as f64 / (n - nparams) as f64
        } else {
            1.0
        };
        let mean_sq =
            filtered.iter().map(|r| r.norm_sqr()).sum::<f64>() / n as f64 * correction * dof;

        thermal_noise[snap] = mean_sq.sqrt() / ((nchan as f64).sqrt() * freq_res_hz);
        if inside_power.1 > 0 {
            let inside_mean_sq = inside_power.0 / inside_power.1 as f64;
            // NaN when the inside power does not exceed the thermal level
            foreground_noise[snap] = (inside_mean_sq - mean_sq).sqrt() / bandwidth;
        }
    }

    trace!("end band_averaged_noise_estimate");
    Ok(NoiseEstimate {
        thermal_noise,
        foreground_noise,
        mode,
    })
}
