// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Delay spectra of an interferometer array, cleaned within the horizon.
//!
//! [`DelaySpectrum::clean`] delay transforms the sky and observed visibilities
//! without downsampling, then deconvolves the delay response of the frequency
//! weights from every `(baseline, snapshot)` spectrum with
//! [`gentle_clean`](crate::gentle_clean::gentle_clean), placing components only
//! within the horizon limits widened by the clean window buffer.

use std::{mem::size_of, ops::Range};

use indicatif::{ProgressBar, ProgressDrawTarget, ProgressStyle};
use itertools::iproduct;
use log::{debug, info, trace, warn};
use marlu::ndarray::{
    parallel::prelude::*, s, Array1, Array2, Array3, ArrayD, ArrayView2, Axis,
};
use rustfft::num_complex::Complex64;

use crate::{
    clean_window::clean_mask,
    config::DelaySpectrumConfig,
    delay_transform::{
        apply_weights, calculate_delay_channels, fftshift, frequency_transform, lag_axis,
        lag_transform, DelayChannelInfo, DelayTransformConfig,
    },
    gentle_clean::{gentle_clean, GentleClean},
    horizon::PhaseCentre,
    interferometer::{InterferometerArray, LagProducts, ProductState},
    noise::{band_averaged_noise_estimate, NoiseEstimateMode},
    weights::FreqWeights,
    DelaySpectrumError,
};

/// Padded complex cubes held per snapshot while cleaning: the sky and observed
/// delay spectra and the lag kernel.
const WORKING_CUBES: usize = 3;

/// Padded complex cubes kept for every snapshot: the kernel, the two delay
/// spectra and the six clean products in delay, plus six in frequency.
const RETAINED_CUBES: usize = 15;

/// What happened to one `(baseline, snapshot)` unit of a clean.
#[derive(Debug, Clone)]
pub enum CleanStatus {
    /// Both the sky and observed spectra were cleaned
    Cleaned {
        /// Major cycles run on the sky spectrum
        ncycle_sky: usize,
        /// Major cycles run on the observed spectrum
        ncycle_vis: usize,
        /// Standard deviation of the observed residual inside the window
        final_residual: f64,
    },
    /// The unit could not be cleaned, its products are NaN
    Failed(DelaySpectrumError),
}

impl CleanStatus {
    pub fn is_failed(&self) -> bool {
        matches!(self, Self::Failed(_))
    }
}

/// Clean components, residuals and their sum for the sky and observed
/// visibilities, in delay (zero-centred) and frequency domains.
///
/// Delay cubes are `[nbl, nlags, nsnap]` over the padded delay axis, and
/// frequency cubes are their forward transforms, `[nbl, nchan + npad, nsnap]`.
#[derive(Debug, Clone)]
pub struct CleanProducts {
    /// Zero-centred delays of the padded transform \[s\]
    pub lags: Array1<f64>,
    /// `[nsnap, nbl, 2]` horizon delay limits the windows were built from
    pub horizon_limits: Array3<f64>,
    /// `[nbl, nchan, nsnap]` product of the bandpass and its weights
    pub bandpass_weights: Array3<f64>,
    /// Delay response of `bandpass_weights`
    pub lag_kernel: Array3<Complex64>,
    /// Delay spectrum of the weighted sky visibilities
    pub skyvis_lag: Array3<Complex64>,
    /// Delay spectrum of the weighted observed visibilities
    pub vis_lag: Array3<Complex64>,

    pub skyvis_cc_lag: Array3<Complex64>,
    pub skyvis_res_lag: Array3<Complex64>,
    pub skyvis_net_lag: Array3<Complex64>,
    pub vis_cc_lag: Array3<Complex64>,
    pub vis_res_lag: Array3<Complex64>,
    pub vis_net_lag: Array3<Complex64>,

    pub skyvis_cc_freq: Array3<Complex64>,
    pub skyvis_res_freq: Array3<Complex64>,
    pub skyvis_net_freq: Array3<Complex64>,
    pub vis_cc_freq: Array3<Complex64>,
    pub vis_res_freq: Array3<Complex64>,
    pub vis_net_freq: Array3<Complex64>,

    /// `[nbl, nsnap]` outcome of every unit
    pub status: Array2<CleanStatus>,
    pub info: DelayChannelInfo,
    /// The settings the products were made with
    pub config: DelaySpectrumConfig,
}

/// Per-baseline, per-snapshot noise estimates of the observed visibilities.
#[derive(Debug, Clone)]
pub struct NoiseEstimates {
    /// `[nbl, nsnap]` thermal noise rms of one channel
    pub thermal_noise: Array2<f64>,
    /// `[nbl, nsnap]` foreground noise rms of one channel, NaN where the
    /// foregrounds do not rise above the noise
    pub foreground_noise: Array2<f64>,
    /// How each baseline's snapshots were partitioned
    pub modes: Vec<NoiseEstimateMode>,
}

/// Delay spectra of an [`InterferometerArray`].
///
/// Changes to the frequency-domain visibilities made through this type mark
/// the derived delay products stale; they are not recomputed until
/// [`DelaySpectrum::delay_transform`] or [`DelaySpectrum::clean`] is called
/// again.
#[derive(Debug, Clone)]
pub struct DelaySpectrum {
    array: InterferometerArray,
    clean: Option<(CleanProducts, ProductState)>,
}

/// The outcome of cleaning one unit.
struct UnitResult {
    bl: usize,
    snap: usize,
    outcome: Result<(GentleClean, GentleClean), DelaySpectrumError>,
}

impl DelaySpectrum {
    pub fn new(array: InterferometerArray) -> Self {
        Self { array, clean: None }
    }

    pub fn array(&self) -> &InterferometerArray {
        &self.array
    }

    pub fn into_array(self) -> InterferometerArray {
        self.array
    }

    fn mark_stale(&mut self) {
        if let Some((_, state)) = self.clean.as_mut() {
            *state = ProductState::Stale;
        }
    }

    /// Freshness of the clean products, if any have been computed
    pub fn clean_state(&self) -> Option<ProductState> {
        self.clean.as_ref().map(|(_, state)| *state)
    }

    /// Rephase the visibilities, see [`InterferometerArray::phase_centering`].
    /// All delay products become stale.
    ///
    /// # Errors
    ///
    /// see [`InterferometerArray::phase_centering`]
    pub fn phase_centering(&mut self, new_centre: &PhaseCentre) -> Result<(), DelaySpectrumError> {
        self.array.phase_centering(new_centre)?;
        self.mark_stale();
        Ok(())
    }

    /// Replace the frequency weights. All delay products become stale.
    ///
    /// # Errors
    ///
    /// see [`InterferometerArray::set_bandpass_weights`]
    pub fn set_bandpass_weights(&mut self, weights: &FreqWeights) -> Result<(), DelaySpectrumError> {
        self.array.set_bandpass_weights(weights)?;
        self.mark_stale();
        Ok(())
    }

    /// Replace the noise. All delay products become stale.
    ///
    /// # Errors
    ///
    /// see [`InterferometerArray::add_noise`]
    pub fn add_noise(&mut self, noise: Array3<Complex64>) -> Result<(), DelaySpectrumError> {
        self.array.add_noise(noise)?;
        self.mark_stale();
        Ok(())
    }

    /// Compute the plain (un-cleaned) delay products with `config`'s padding
    /// and downsampling.
    ///
    /// # Errors
    ///
    /// see [`crate::delay_transform::delay_transform`]
    pub fn delay_transform(&mut self, config: &DelaySpectrumConfig) -> Result<(), DelaySpectrumError> {
        self.array.delay_transform(&config.delay_transform_config())
    }

    /// The plain delay products.
    ///
    /// # Errors
    ///
    /// see [`InterferometerArray::lag_products`]
    pub fn lag_products(&self) -> Result<&LagProducts, DelaySpectrumError> {
        self.array.lag_products()
    }

    /// The products of the last [`DelaySpectrum::clean`].
    ///
    /// # Errors
    ///
    /// - [`DelaySpectrumError::MissingDelayProducts`] before the first clean.
    /// - [`DelaySpectrumError::StaleDelayProducts`] if the visibilities changed
    ///   since.
    pub fn clean_products(&self) -> Result<&CleanProducts, DelaySpectrumError> {
        match &self.clean {
            None => Err(DelaySpectrumError::MissingDelayProducts {
                product: "clean products".into(),
                remedy: "DelaySpectrum::clean".into(),
            }),
            Some((_, ProductState::Stale)) => Err(DelaySpectrumError::StaleDelayProducts {
                product: "clean products".into(),
                remedy: "DelaySpectrum::clean".into(),
            }),
            Some((products, ProductState::Fresh)) => Ok(products),
        }
    }

    /// `[nbl, nsnap]` outcome of each unit of the last clean.
    ///
    /// # Errors
    ///
    /// see [`DelaySpectrum::clean_products`]
    pub fn clean_status(&self) -> Result<ArrayView2<CleanStatus>, DelaySpectrumError> {
        Ok(self.clean_products()?.status.view())
    }

    /// `(baseline, snapshot)` units of the last clean that failed.
    ///
    /// # Errors
    ///
    /// see [`DelaySpectrum::clean_products`]
    pub fn failed_units(&self) -> Result<Vec<(usize, usize)>, DelaySpectrumError> {
        Ok(self
            .clean_products()?
            .status
            .indexed_iter()
            .filter(|(_, status)| status.is_failed())
            .map(|(idx, _)| idx)
            .collect())
    }

    /// Bytes of padded complex cubes a clean keeps for all snapshots, and
    /// needs per snapshot of a chunk on top of that.
    fn clean_bytes(&self, nlags_padded: usize) -> (usize, usize) {
        let (nbl, _, nsnap) = self.array.dims();
        let cube = nbl * nlags_padded * size_of::<Complex64>();
        (RETAINED_CUBES * cube * nsnap, WORKING_CUBES * cube)
    }

    /// Snapshot ranges such that the retained products plus one chunk of
    /// working cubes fit within `max_bytes`.
    fn snapshot_chunks(
        &self,
        nlags_padded: usize,
        max_bytes: Option<usize>,
    ) -> Result<Vec<Range<usize>>, DelaySpectrumError> {
        let (_, _, nsnap) = self.array.dims();
        let (retained_bytes, bytes_per_snapshot) = self.clean_bytes(nlags_padded);
        let chunk_size = match max_bytes {
            None => nsnap,
            Some(max_bytes) => {
                let fits = max_bytes.saturating_sub(retained_bytes) / bytes_per_snapshot;
                if fits == 0 {
                    return Err(DelaySpectrumError::InvalidArgument {
                        argument: "max_bytes".into(),
                        function: "DelaySpectrum::clean".into(),
                        reason: format!(
                            "the products need {retained_bytes} bytes and each snapshot another \
                             {bytes_per_snapshot}, only {max_bytes} allowed"
                        ),
                    });
                }
                fits.min(nsnap)
            }
        };
        Ok((0..nsnap)
            .step_by(chunk_size.max(1))
            .map(|start| start..(start + chunk_size).min(nsnap))
            .collect())
    }

    /// Clean the delay spectra of the sky and observed visibilities inside the
    /// horizon of every baseline and snapshot.
    ///
    /// Units whose kernel is degenerate or whose clean window is empty do not
    /// stop the run, their products are filled with NaN and their [`CleanStatus`] records the error. The
    /// results do not depend on the number of threads or on `max_bytes`.
    ///
    /// # Errors
    ///
    /// - [`DelaySpectrumError::InvalidArgument`] for a bad channel width, pad or
    ///   buffer, or a `max_bytes` too small for the products plus the working
    ///   cubes of one snapshot.
    /// - [`DelaySpectrumError::IncompatibleShape`] if the weights do not
    ///   broadcast.
    /// - errors from computing the horizon limits of the phase centre.
    pub fn clean(&mut self, config: &DelaySpectrumConfig) -> Result<(), DelaySpectrumError> {
        trace!("start clean");
        let dims = self.array.dims();
        let (nbl, nchan, nsnap) = dims;
        let freq_res_hz = self.array.freq_res_hz();
        let bandwidth = self.array.bandwidth();
        let info = calculate_delay_channels(
            nchan,
            freq_res_hz,
            &DelayTransformConfig {
                pad: config.pad,
                downsample: false,
                shift: false,
            },
        )?;
        let nlags = info.nlags_padded;
        let lags = lag_axis(nlags, freq_res_hz, false);
        let horizon_limits = self.array.horizon_delay_limits()?;
        let weights =
            self.array.bandpass().broadcast(dims)? * self.array.bandpass_wts().broadcast(dims)?;
        let chunks = self.snapshot_chunks(nlags, config.max_bytes)?;
        let params = config.gentle_clean_params();
        info!(
            "cleaning {} baselines x {} snapshots over {} delays in {} chunk(s)",
            nbl,
            nsnap,
            nlags,
            chunks.len()
        );

        let padded = (nbl, nlags, nsnap);
        let mut lag_kernel = Array3::zeros(padded);
        let mut skyvis_lag = Array3::zeros(padded);
        let mut vis_lag = Array3::zeros(padded);
        let mut skyvis_cc_lag = Array3::zeros(padded);
        let mut skyvis_res_lag = Array3::zeros(padded);
        let mut vis_cc_lag = Array3::zeros(padded);
        let mut vis_res_lag = Array3::zeros(padded);
        let mut status = Array2::from_elem(
            (nbl, nsnap),
            CleanStatus::Failed(DelaySpectrumError::InvalidInput {
                function: "DelaySpectrum::clean".into(),
                reason: "unit was never processed".into(),
            }),
        );

        let draw_target = if config.draw_progress {
            ProgressDrawTarget::stderr()
        } else {
            ProgressDrawTarget::hidden()
        };
        let clean_progress = ProgressBar::with_draw_target(Some((nbl * nsnap) as u64), draw_target);
        clean_progress.set_style(
            ProgressStyle::default_bar()
                .template("{msg:16}: [{elapsed_precise}] [{wide_bar:.cyan/blue}] {percent:3}% ({eta:5})")
                .unwrap()
                .progress_chars("=> "),
        );
        clean_progress.set_message("gentle clean");

        for chunk in chunks {
            debug!("transforming snapshots {chunk:?}");
            let chunk_weights = weights.slice(s![.., .., chunk.clone()]);
            let sky_chunk = lag_transform(
                apply_weights(
                    self.array.skyvis_freq().slice(s![.., .., chunk.clone()]),
                    chunk_weights,
                )
                .view(),
                &info,
                false,
                false,
            );
            let vis_chunk = lag_transform(
                apply_weights(
                    self.array.vis_freq().slice(s![.., .., chunk.clone()]),
                    chunk_weights,
                )
                .view(),
                &info,
                false,
                false,
            );
            let kernel_chunk = lag_transform(
                chunk_weights.mapv(|w| Complex64::new(w, 0.0)).view(),
                &info,
                false,
                false,
            );

            let units = iproduct!(0..nbl, 0..chunk.len()).collect::<Vec<_>>();
            let results = units
                .into_par_iter()
                .map(|(bl, t)| {
                    let snap = chunk.start + t;
                    let outcome = clean_mask(
                        lags.view(),
                        horizon_limits[[snap, bl, 0]],
                        horizon_limits[[snap, bl, 1]],
                        config.clean_window_buffer,
                        bandwidth,
                    )
                    .and_then(|mask| {
                        let kernel = kernel_chunk.slice(s![bl, .., t]);
                        let sky = gentle_clean(
                            sky_chunk.slice(s![bl, .., t]),
                            kernel,
                            mask.view(),
                            &params,
                        )?;
                        let vis = gentle_clean(
                            vis_chunk.slice(s![bl, .., t]),
                            kernel,
                            mask.view(),
                            &params,
                        )?;
                        Ok((sky, vis))
                    });
                    clean_progress.inc(1);
                    UnitResult { bl, snap, outcome }
                })
                .collect::<Vec<_>>();

            for (dest, src) in [
                (&mut lag_kernel, &kernel_chunk),
                (&mut skyvis_lag, &sky_chunk),
                (&mut vis_lag, &vis_chunk),
            ] {
                dest.slice_mut(s![.., .., chunk.clone()]).assign(src);
            }

            for UnitResult { bl, snap, outcome } in results {
                let unit = s![bl, .., snap];
                match outcome {
                    Ok((sky, vis)) => {
                        skyvis_cc_lag.slice_mut(unit).assign(&sky.components);
                        skyvis_res_lag.slice_mut(unit).assign(&sky.residual);
                        vis_cc_lag.slice_mut(unit).assign(&vis.components);
                        vis_res_lag.slice_mut(unit).assign(&vis.residual);
                        status[[bl, snap]] = CleanStatus::Cleaned {
                            ncycle_sky: sky.ncycle,
                            ncycle_vis: vis.ncycle,
                            final_residual: vis.final_residual,
                        };
                    }
                    Err(e) => {
                        warn!("could not clean baseline {bl} snapshot {snap}: {e}");
                        let nan = Complex64::new(f64::NAN, f64::NAN);
                        for cube in [
                            &mut skyvis_cc_lag,
                            &mut skyvis_res_lag,
                            &mut vis_cc_lag,
                            &mut vis_res_lag,
                        ] {
                            cube.slice_mut(unit).fill(nan);
                        }
                        status[[bl, snap]] = CleanStatus::Failed(e);
                    }
                }
            }
        }
        clean_progress.finish();

        let skyvis_net_lag = &skyvis_cc_lag + &skyvis_res_lag;
        let vis_net_lag = &vis_cc_lag + &vis_res_lag;
        let to_freq = |lag| frequency_transform(lag, info.lag_res_s);
        let skyvis_cc_freq = to_freq(skyvis_cc_lag.view());
        let skyvis_res_freq = to_freq(skyvis_res_lag.view());
        let vis_cc_freq = to_freq(vis_cc_lag.view());
        let vis_res_freq = to_freq(vis_res_lag.view());
        let shift = |cube: Array3<Complex64>| fftshift(cube.view(), Axis(1));

        let products = CleanProducts {
            lags: fftshift(lags.view(), Axis(0)),
            horizon_limits,
            bandpass_weights: weights,
            lag_kernel: shift(lag_kernel),
            skyvis_lag: shift(skyvis_lag),
            vis_lag: shift(vis_lag),
            skyvis_cc_lag: shift(skyvis_cc_lag),
            skyvis_res_lag: shift(skyvis_res_lag),
            skyvis_net_lag: shift(skyvis_net_lag),
            vis_cc_lag: shift(vis_cc_lag),
            vis_res_lag: shift(vis_res_lag),
            vis_net_lag: shift(vis_net_lag),
            skyvis_net_freq: &skyvis_cc_freq + &skyvis_res_freq,
            vis_net_freq: &vis_cc_freq + &vis_res_freq,
            skyvis_cc_freq,
            skyvis_res_freq,
            vis_cc_freq,
            vis_res_freq,
            status,
            info,
            config: config.clone(),
        };
        let failed = products.status.iter().filter(|s| s.is_failed()).count();
        if failed > 0 {
            warn!("{failed} of {} units could not be cleaned", nbl * nsnap);
        }
        self.clean = Some((products, ProductState::Fresh));
        trace!("end clean");
        Ok(())
    }

    /// Named arrays describing the last clean, in a fixed order: frequencies,
    /// lags, horizon limits, bandpass weights, then the real and imaginary
    /// parts of the lag kernel and of every clean product.
    ///
    /// # Errors
    ///
    /// see [`DelaySpectrum::clean_products`]
    pub fn sections(&self) -> Result<Vec<(String, ArrayD<f64>)>, DelaySpectrumError> {
        let products = self.clean_products()?;
        let mut sections = vec![
            ("FREQUENCIES".to_string(), self.array.freqs_hz().to_owned().into_dyn()),
            ("LAGS".to_string(), products.lags.clone().into_dyn()),
            (
                "HORIZON_LIMITS".to_string(),
                products.horizon_limits.clone().into_dyn(),
            ),
            (
                "BANDPASS_WEIGHTS".to_string(),
                products.bandpass_weights.clone().into_dyn(),
            ),
        ];
        for (name, cube) in [
            ("LAG_KERNEL", &products.lag_kernel),
            ("SKYVIS_CC_LAG", &products.skyvis_cc_lag),
            ("SKYVIS_RES_LAG", &products.skyvis_res_lag),
            ("SKYVIS_NET_LAG", &products.skyvis_net_lag),
            ("VIS_CC_LAG", &products.vis_cc_lag),
            ("VIS_RES_LAG", &products.vis_res_lag),
            ("VIS_NET_LAG", &products.vis_net_lag),
            ("SKYVIS_CC_FREQ", &products.skyvis_cc_freq),
            ("SKYVIS_RES_FREQ", &products.skyvis_res_freq),
            ("SKYVIS_NET_FREQ", &products.skyvis_net_freq),
            ("VIS_CC_FREQ", &products.vis_cc_freq),
            ("VIS_RES_FREQ", &products.vis_res_freq),
            ("VIS_NET_FREQ", &products.vis_net_freq),
        ] {
            sections.push((format!("{name}_REAL"), cube.mapv(|c| c.re).into_dyn()));
            sections.push((format!("{name}_IMAG"), cube.mapv(|c| c.im).into_dyn()));
        }
        Ok(sections)
    }

    /// Estimate the thermal and foreground noise of the observed visibilities
    /// of every baseline, see
    /// [`band_averaged_noise_estimate`](crate::noise::band_averaged_noise_estimate).
    ///
    /// # Errors
    ///
    /// - errors converting the pointing centre to direction cosines.
    /// - [`DelaySpectrumError::InvalidArgument`] for an unusable channel width.
    pub fn noise_estimate(&self, config: &DelaySpectrumConfig) -> Result<NoiseEstimates, DelaySpectrumError> {
        trace!("start noise_estimate");
        let (nbl, _, nsnap) = self.array.dims();
        let pointing = self.array.pointing_dircos()?;
        let params = config.noise_estimate_params();
        let baselines = self.array.baselines();
        let vis_freq = self.array.vis_freq();
        let estimates = (0..nbl)
            .into_par_iter()
            .map(|bl| {
                let b = baselines.row(bl);
                band_averaged_noise_estimate(
                    vis_freq.index_axis(Axis(0), bl),
                    self.array.freq_res_hz(),
                    [b[0], b[1], b[2]],
                    pointing.view(),
                    &params,
                )
            })
            .collect::<Result<Vec<_>, _>>()?;

        let mut thermal_noise = Array2::zeros((nbl, nsnap));
        let mut foreground_noise = Array2::zeros((nbl, nsnap));
        let mut modes = Vec::with_capacity(nbl);
        for (bl, estimate) in estimates.into_iter().enumerate() {
            thermal_noise.row_mut(bl).assign(&estimate.thermal_noise);
            foreground_noise.row_mut(bl).assign(&estimate.foreground_noise);
            modes.push(estimate.mode);
        }
        trace!("end noise_estimate");
        Ok(NoiseEstimates {
            thermal_noise,
            foreground_noise,
            modes,
        })
    }
}
