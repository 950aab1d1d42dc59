// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Delay transform utilities
//!
//! This module transforms `[baseline, channel, snapshot]` visibility cubes
//! along the channel axis into delay space, with optional zero-padding,
//! frequency weighting and downsampling of the padded delay axis.

use std::sync::Arc;

use log::{debug, trace, warn};
use marlu::ndarray::{
    parallel::prelude::*, Array, Array1, Array3, ArrayView, ArrayView3, Axis, Dimension, RemoveAxis, Zip,
};
use rustfft::{num_complex::Complex64, Fft, FftPlanner};

use crate::{constants::DEFAULT_PAD, weights::FreqWeights, DelaySpectrumError};

/// Configuration for the delay transform.
#[derive(Debug, Clone, Copy)]
pub struct DelayTransformConfig {
    /// Zero-padding, as a fraction of the number of channels. Negative values
    /// are treated as 0.
    pub pad: f64,
    /// Decimate the padded delay axis back down to `nchan` bins
    pub downsample: bool,
    /// Centre zero delay (fftshift) in the output
    pub shift: bool,
}

impl Default for DelayTransformConfig {
    fn default() -> Self {
        Self {
            pad: DEFAULT_PAD,
            downsample: true,
            shift: true,
        }
    }
}

/// Information about delay transform dimensions
#[derive(Debug, Clone, PartialEq)]
pub struct DelayChannelInfo {
    /// Number of frequency channels in the input
    pub nchan: usize,
    /// The padding fraction actually used
    pub pad: f64,
    /// Number of zero channels appended before the transform
    pub npad: usize,
    /// Number of delay bins straight out of the transform, `nchan + npad`
    pub nlags_padded: usize,
    /// Number of delay bins in the output
    pub nlags: usize,
    /// Channel width \[Hz\]
    pub freq_res_hz: f64,
    /// Spacing of the padded delay axis \[s\]
    pub lag_res_s: f64,
}

/// Result of the delay transform.
#[derive(Debug, Clone)]
pub struct DelayTransform {
    /// Weighted visibilities in delay space `[nbl, nlags, nsnap]` \[Jy Hz\]
    pub vis_lag: Array3<Complex64>,
    /// Delay axis \[s\]
    pub lags: Array1<f64>,
    /// Delay response of the weights alone `[nbl, nlags, nsnap]`
    pub lag_kernel: Array3<Complex64>,
    /// Dimensions of the transform
    pub info: DelayChannelInfo,
}

/// Calculate the number of delay channels that will be in the transform result
///
/// # Errors
///
/// - [`DelaySpectrumError::InvalidArgument`] if `nchan` is zero, `freq_res_hz`
///   is not a positive number or `pad` is not finite.
pub fn calculate_delay_channels(
    nchan: usize,
    freq_res_hz: f64,
    config: &DelayTransformConfig,
) -> Result<DelayChannelInfo, DelaySpectrumError> {
    if nchan == 0 {
        return Err(DelaySpectrumError::InvalidArgument {
            argument: "nchan".into(),
            function: "calculate_delay_channels".into(),
            reason: "there must be at least one channel".into(),
        });
    }
    if !(freq_res_hz.is_finite() && freq_res_hz > 0.0) {
        return Err(DelaySpectrumError::InvalidArgument {
            argument: "freq_res_hz".into(),
            function: "calculate_delay_channels".into(),
            reason: format!("channel width must be positive, got {freq_res_hz}"),
        });
    }
    if !config.pad.is_finite() {
        return Err(DelaySpectrumError::InvalidArgument {
            argument: "pad".into(),
            function: "calculate_delay_channels".into(),
            reason: format!("padding fraction must be finite, got {}", config.pad),
        });
    }
    let pad = if config.pad < 0.0 {
        warn!(
            "negative padding fraction {} requested, using no padding instead",
            config.pad
        );
        0.0
    } else {
        config.pad
    };

    let npad = (nchan as f64 * pad).round() as usize;
    let nlags_padded = nchan + npad;
    let nlags = if config.downsample && npad > 0 {
        nchan
    } else {
        nlags_padded
    };

    Ok(DelayChannelInfo {
        nchan,
        pad,
        npad,
        nlags_padded,
        nlags,
        freq_res_hz,
        lag_res_s: 1.0 / (nlags_padded as f64 * freq_res_hz),
    })
}

impl DelayChannelInfo {
    /// Indices of the padded delay axis that survive downsampling, one every
    /// `(1 + pad)` bins starting at the first.
    pub fn downsample_indices(&self) -> Vec<usize> {
        let stride = self.nlags_padded as f64 / self.nchan as f64;
        (0..self.nchan)
            .map(|k| ((k as f64 * stride).round() as usize).min(self.nlags_padded - 1))
            .collect()
    }
}

/// The sample frequencies of an `n` point DFT with sample spacing `d`
/// (numpy.fft.fftfreq), optionally shifted so that zero is in the centre.
pub fn lag_axis(n: usize, d: f64, shift: bool) -> Array1<f64> {
    let axis = Array1::from_shape_fn(n, |k| {
        let k = if k < (n + 1) / 2 {
            k as f64
        } else {
            k as f64 - n as f64
        };
        k / (n as f64 * d)
    });
    if shift {
        fftshift(axis.view(), Axis(0))
    } else {
        axis
    }
}

/// Move the zero-frequency bin of `axis` to the centre (numpy.fft.fftshift).
pub fn fftshift<A: Clone, D: Dimension + RemoveAxis>(arr: ArrayView<A, D>, axis: Axis) -> Array<A, D> {
    let n = arr.len_of(axis);
    let indices = (0..n).map(|k| (k + n - n / 2) % n).collect::<Vec<_>>();
    arr.select(axis, &indices)
}

/// The inverse of [`fftshift`] (numpy.fft.ifftshift).
pub fn ifftshift<A: Clone, D: Dimension + RemoveAxis>(arr: ArrayView<A, D>, axis: Axis) -> Array<A, D> {
    let n = arr.len_of(axis);
    let indices = (0..n).map(|k| (k + n / 2) % n).collect::<Vec<_>>();
    arr.select(axis, &indices)
}

/// Zero-pad every channel-axis lane of `cube` to `n_fft`, run `fft` over it
/// and multiply by `scale`. Baselines are processed in parallel.
fn transform_lanes(
    cube: ArrayView3<Complex64>,
    n_fft: usize,
    fft: &Arc<dyn Fft<f64>>,
    scale: f64,
) -> Array3<Complex64> {
    let (nbl, nchan, nsnap) = cube.dim();
    let mut out = Array3::zeros((nbl, n_fft, nsnap));
    out.axis_iter_mut(Axis(0))
        .into_par_iter()
        .enumerate()
        .for_each(|(bl_idx, mut out_bl)| {
            let cube_bl = cube.index_axis(Axis(0), bl_idx);
            let mut buffer = vec![Complex64::new(0.0, 0.0); n_fft];
            for (mut out_lane, in_lane) in out_bl
                .axis_iter_mut(Axis(1))
                .zip(cube_bl.axis_iter(Axis(1)))
            {
                buffer.iter_mut().for_each(|x| *x = Complex64::new(0.0, 0.0));
                buffer[..nchan]
                    .iter_mut()
                    .zip(in_lane.iter())
                    .for_each(|(b, &v)| *b = v);
                fft.process(&mut buffer);
                out_lane
                    .iter_mut()
                    .zip(buffer.iter())
                    .for_each(|(o, &b)| *o = b * scale);
            }
        });
    out
}

/// Transform already-weighted frequency-domain visibilities into delay space.
///
/// The result is the unnormalised inverse DFT of the zero-padded channel
/// axis, scaled by the channel width, so that Jy per channel becomes Jy Hz
/// per delay bin. With `shift`, zero delay is moved to the centre; with
/// `downsample` (and some padding), every `(1 + pad)`th bin is kept.
pub fn lag_transform(
    weighted: ArrayView3<Complex64>,
    info: &DelayChannelInfo,
    shift: bool,
    downsample: bool,
) -> Array3<Complex64> {
    trace!("start lag_transform");
    let mut planner = FftPlanner::new();
    let fft = planner.plan_fft_inverse(info.nlags_padded);
    let mut lag = transform_lanes(weighted, info.nlags_padded, &fft, info.freq_res_hz);
    if shift {
        lag = fftshift(lag.view(), Axis(1));
    }
    if downsample && info.npad > 0 {
        lag = lag.select(Axis(1), &info.downsample_indices());
    }
    trace!("end lag_transform");
    lag
}

/// Forward DFT of delay-space data in natural (unshifted) order back to the
/// frequency domain, scaled by the delay bin width `lag_res_s`.
///
/// For data from an un-downsampled [`lag_transform`] this is its exact
/// inverse, returning the (padded) weighted visibilities.
pub fn frequency_transform(lag_cube: ArrayView3<Complex64>, lag_res_s: f64) -> Array3<Complex64> {
    let n = lag_cube.len_of(Axis(1));
    let mut planner = FftPlanner::new();
    let fft = planner.plan_fft_forward(n);
    transform_lanes(lag_cube, n, &fft, lag_res_s)
}

/// Multiply a visibility cube by real weights of the same shape.
pub(crate) fn apply_weights(
    vis: ArrayView3<Complex64>,
    weights: ArrayView3<f64>,
) -> Array3<Complex64> {
    let mut weighted = vis.to_owned();
    Zip::from(&mut weighted)
        .and(&weights)
        .par_for_each(|v, &w| *v *= w);
    weighted
}

/// Perform a delay transform of a visibility cube along its channel axis.
///
/// Input: `vis_freq` `[nbl, nchan, nsnap]`, with bandpass and bandpass weights
/// that broadcast onto it. The visibilities are multiplied by
/// `bandpass * bandpass_wts`, zero-padded by `round(nchan * pad)` channels and
/// inverse transformed; the lag kernel is the transform of the weights alone.
///
/// # Errors
///
/// - [`DelaySpectrumError::IncompatibleShape`] if the weights do not broadcast.
/// - [`DelaySpectrumError::InvalidArgument`] for an unusable channel width or pad.
pub fn delay_transform(
    vis_freq: ArrayView3<Complex64>,
    bandpass: &FreqWeights,
    bandpass_wts: &FreqWeights,
    freq_res_hz: f64,
    config: &DelayTransformConfig,
) -> Result<DelayTransform, DelaySpectrumError> {
    trace!("start delay_transform");
    let dims = vis_freq.dim();
    let info = calculate_delay_channels(dims.1, freq_res_hz, config)?;
    let weights = bandpass.broadcast(dims)? * bandpass_wts.broadcast(dims)?;

    debug!(
        "delay transform of {:?}: {} -> {} channels (pad {}), {} lags out",
        dims, info.nchan, info.nlags_padded, info.pad, info.nlags
    );

    let weighted = apply_weights(vis_freq, weights.view());
    let vis_lag = lag_transform(weighted.view(), &info, config.shift, config.downsample);
    let kernel_freq = weights.mapv(|w| Complex64::new(w, 0.0));
    let lag_kernel = lag_transform(kernel_freq.view(), &info, config.shift, config.downsample);

    let mut lags = lag_axis(info.nlags_padded, freq_res_hz, config.shift);
    if config.downsample && info.npad > 0 {
        lags = lags.select(Axis(0), &info.downsample_indices());
    }

    trace!("end delay_transform");
    Ok(DelayTransform {
        vis_lag,
        lags,
        lag_kernel,
        info,
    })
}

#[cfg(test)]
mod tests {
    use approx::assert_abs_diff_eq;
    use marlu::ndarray::{array, s, Array2};

    use super::*;

    fn noisy_cube(dims: (usize, usize, usize)) -> Array3<Complex64> {
        Array3::from_shape_fn(dims, |(b, c, t)| {
            let x = (b * 31 + c * 7 + t * 3) as f64;
            Complex64::new((0.37 * x).sin(), (0.11 * x * x).cos())
        })
    }

    #[test]
    fn test_lag_axis_matches_fftfreq() {
        assert_abs_diff_eq!(lag_axis(4, 1.0, false), array![0.0, 0.25, -0.5, -0.25]);
        assert_abs_diff_eq!(lag_axis(4, 1.0, true), array![-0.5, -0.25, 0.0, 0.25]);
        assert_abs_diff_eq!(
            lag_axis(5, 0.5, false),
            array![0.0, 0.4, 0.8, -0.8, -0.4],
            epsilon = 1e-12
        );
        assert_abs_diff_eq!(
            lag_axis(5, 0.5, true),
            array![-0.8, -0.4, 0.0, 0.4, 0.8],
            epsilon = 1e-12
        );
    }

    #[test]
    fn test_fftshift_roundtrip_odd_and_even() {
        for n in [5, 6] {
            let a = Array2::from_shape_fn((2, n), |(r, c)| (r * 10 + c) as f64);
            let shifted = fftshift(a.view(), Axis(1));
            assert_abs_diff_eq!(ifftshift(shifted.view(), Axis(1)), a);
        }
        let a = array![0, 1, 2, 3, 4];
        assert_eq!(fftshift(a.view(), Axis(0)), array![3, 4, 0, 1, 2]);
    }

    #[test]
    fn test_calculate_delay_channels() {
        let config = DelayTransformConfig {
            pad: 1.0,
            downsample: false,
            shift: true,
        };
        let info = calculate_delay_channels(64, 40e3, &config).unwrap();
        assert_eq!(info.npad, 64);
        assert_eq!(info.nlags_padded, 128);
        assert_eq!(info.nlags, 128);
        assert_abs_diff_eq!(info.lag_res_s, 1.0 / (128.0 * 40e3));

        let config = DelayTransformConfig { pad: 0.3, ..config };
        let info = calculate_delay_channels(64, 40e3, &config).unwrap();
        assert_eq!(info.nlags_padded, (64.0 * 1.3_f64).round() as usize);

        assert!(matches!(
            calculate_delay_channels(64, 0.0, &config),
            Err(DelaySpectrumError::InvalidArgument { .. })
        ));
        assert!(matches!(
            calculate_delay_channels(
                64,
                40e3,
                &DelayTransformConfig {
                    pad: f64::NAN,
                    ..config
                }
            ),
            Err(DelaySpectrumError::InvalidArgument { .. })
        ));
    }

    #[test]
    fn test_lag_count_invariant() {
        let vis = noisy_cube((2, 20, 3));
        for pad in [0.0, 0.5, 1.0, 1.5] {
            for downsample in [false, true] {
                let config = DelayTransformConfig {
                    pad,
                    downsample,
                    shift: true,
                };
                let result = delay_transform(
                    vis.view(),
                    &FreqWeights::Unity,
                    &FreqWeights::Unity,
                    1e5,
                    &config,
                )
                .unwrap();
                let expected = if downsample {
                    20
                } else {
                    (20.0 * (1.0 + pad)).round() as usize
                };
                assert_eq!(result.lags.len(), expected);
                assert_eq!(result.vis_lag.dim(), (2, expected, 3));
                assert_eq!(result.lag_kernel.dim(), (2, expected, 3));
            }
        }
    }

    #[test]
    fn test_negative_pad_is_no_pad() {
        let vis = noisy_cube((1, 16, 2));
        let config = DelayTransformConfig {
            pad: -0.5,
            ..Default::default()
        };
        let clamped = delay_transform(
            vis.view(),
            &FreqWeights::Unity,
            &FreqWeights::Unity,
            1e5,
            &config,
        )
        .unwrap();
        let unpadded = delay_transform(
            vis.view(),
            &FreqWeights::Unity,
            &FreqWeights::Unity,
            1e5,
            &DelayTransformConfig {
                pad: 0.0,
                ..Default::default()
            },
        )
        .unwrap();
        assert_eq!(clamped.info.pad, 0.0);
        assert_eq!(clamped.lags.len(), 16);
        assert_abs_diff_eq!(clamped.vis_lag, unpadded.vis_lag);
    }

    #[test]
    fn test_roundtrip_without_padding() {
        let vis = noisy_cube((3, 24, 2));
        let config = DelayTransformConfig {
            pad: 0.0,
            downsample: true,
            shift: false,
        };
        let df = 23.4e3;
        let result = delay_transform(
            vis.view(),
            &FreqWeights::Unity,
            &FreqWeights::Unity,
            df,
            &config,
        )
        .unwrap();
        let back = frequency_transform(result.vis_lag.view(), result.info.lag_res_s);
        assert_abs_diff_eq!(back, vis, epsilon = 1e-9);
    }

    #[test]
    fn test_flat_spectrum_is_zero_delay_spike() {
        let nchan = 32;
        let df = 1e5;
        let vis = Array3::from_elem((1, nchan, 1), Complex64::new(2.0, 0.0));
        let result = delay_transform(
            vis.view(),
            &FreqWeights::Unity,
            &FreqWeights::Unity,
            df,
            &DelayTransformConfig {
                pad: 0.0,
                ..Default::default()
            },
        )
        .unwrap();
        let zero = nchan / 2;
        assert_abs_diff_eq!(result.lags[zero], 0.0);
        assert_abs_diff_eq!(result.vis_lag[[0, zero, 0]].re, 2.0 * nchan as f64 * df, epsilon = 1e-6);
        let off_peak = result
            .vis_lag
            .iter()
            .enumerate()
            .filter(|(i, _)| *i != zero)
            .map(|(_, v)| v.norm())
            .fold(0.0, f64::max);
        assert!(off_peak < 1e-6);
        assert_abs_diff_eq!(result.lag_kernel[[0, zero, 0]].re, nchan as f64 * df, epsilon = 1e-6);
    }

    #[test]
    fn test_downsample_keeps_every_other_bin() {
        let vis = noisy_cube((2, 16, 2));
        let weights = FreqWeights::blackman(16);
        let full = delay_transform(
            vis.view(),
            &FreqWeights::Unity,
            &weights,
            1e5,
            &DelayTransformConfig {
                pad: 1.0,
                downsample: false,
                shift: true,
            },
        )
        .unwrap();
        let decimated = delay_transform(
            vis.view(),
            &FreqWeights::Unity,
            &weights,
            1e5,
            &DelayTransformConfig {
                pad: 1.0,
                downsample: true,
                shift: true,
            },
        )
        .unwrap();
        assert_abs_diff_eq!(
            decimated.vis_lag,
            full.vis_lag.slice(s![.., ..;2, ..]).to_owned()
        );
        assert_abs_diff_eq!(decimated.lags, full.lags.slice(s![..;2]).to_owned());
        // with pad == 1 the decimated axis is the unpadded one
        assert_abs_diff_eq!(decimated.lags, lag_axis(16, 1e5, true), epsilon = 1e-15);
    }

    #[test]
    fn test_weights_are_applied() {
        let vis = noisy_cube((2, 8, 2));
        let taper = Array1::linspace(0.0, 1.0, 8);
        let weighted = delay_transform(
            vis.view(),
            &FreqWeights::Unity,
            &FreqWeights::Channel(taper.clone()),
            1e5,
            &DelayTransformConfig {
                pad: 0.0,
                downsample: false,
                shift: false,
            },
        )
        .unwrap();
        let back = frequency_transform(weighted.vis_lag.view(), weighted.info.lag_res_s);
        for c in 0..8 {
            assert_abs_diff_eq!(back[[1, c, 1]], vis[[1, c, 1]] * taper[c], epsilon = 1e-9);
        }
        assert!(matches!(
            delay_transform(
                vis.view(),
                &FreqWeights::Unity,
                &FreqWeights::Channel(Array1::ones(7)),
                1e5,
                &DelayTransformConfig::default(),
            ),
            Err(DelaySpectrumError::IncompatibleShape { .. })
        ));
    }
}
