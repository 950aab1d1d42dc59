// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Frequency-domain visibilities of an interferometer array, together with the
//! observation metadata needed to delay transform them.

use std::f64::consts::PI;

use log::{debug, info, trace};
use marlu::ndarray::{
    parallel::prelude::*, Array1, Array2, Array3, ArrayView1, ArrayView2, ArrayView3, Axis, Zip,
};
use rustfft::num_complex::Complex64;

use crate::{
    constants::VEL_C,
    delay_transform::{delay_transform, DelayChannelInfo, DelayTransformConfig},
    horizon::{horizon_delay_limits, PhaseCentre},
    weights::FreqWeights,
    DelaySpectrumError,
};

/// Whether derived delay products still describe the frequency-domain data.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProductState {
    /// Computed from the current visibilities and weights
    Fresh,
    /// The visibilities or weights changed since they were computed
    Stale,
}

/// Plain (un-cleaned) delay transforms of the three visibility cubes.
#[derive(Debug, Clone)]
pub struct LagProducts {
    /// Delay spectrum of the noiseless sky visibilities
    pub skyvis_lag: Array3<Complex64>,
    /// Delay spectrum of the noise
    pub vis_noise_lag: Array3<Complex64>,
    /// Delay spectrum of the observed (sky + noise) visibilities
    pub vis_lag: Array3<Complex64>,
    /// Delay response of the frequency weights
    pub lag_kernel: Array3<Complex64>,
    pub lags: Array1<f64>,
    pub info: DelayChannelInfo,
}

/// Visibilities `[baseline, channel, snapshot]` of an array, and what is known
/// about how they were observed.
///
/// The frequency-domain cubes can only be changed through methods, so that
/// delay products derived from them are marked [`ProductState::Stale`] when
/// they no longer apply.
#[derive(Debug, Clone)]
pub struct InterferometerArray {
    labels: Vec<String>,
    baselines: Array2<f64>,
    freqs_hz: Array1<f64>,
    freq_res_hz: f64,
    latitude_rad: f64,
    lsts_deg: Array1<f64>,
    t_acc_s: f64,
    pointing_centre: PhaseCentre,
    phase_centre: PhaseCentre,
    bandpass: FreqWeights,
    bandpass_wts: FreqWeights,
    skyvis_freq: Array3<Complex64>,
    vis_noise_freq: Array3<Complex64>,
    vis_freq: Array3<Complex64>,
    lag_products: Option<(LagProducts, ProductState)>,
}

fn shape_error(argument: &str, function: &str, expected: String, received: String) -> DelaySpectrumError {
    DelaySpectrumError::IncompatibleShape {
        argument: argument.into(),
        function: function.into(),
        expected,
        received,
    }
}

impl InterferometerArray {
    /// Create a new array from noiseless sky visibilities.
    ///
    /// The bandpass and its weights start as unity and the noise as zero.
    ///
    /// # Errors
    ///
    /// - [`DelaySpectrumError::IncompatibleShape`] if `labels`, `baselines`,
    ///   `lsts_deg`, the centres or `skyvis_freq` disagree on the number of
    ///   baselines, channels or snapshots.
    /// - [`DelaySpectrumError::InvalidInput`] if there are fewer than two
    ///   channels or the channels are not uniformly spaced.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        labels: Vec<String>,
        baselines: Array2<f64>,
        freqs_hz: Array1<f64>,
        latitude_rad: f64,
        lsts_deg: Array1<f64>,
        t_acc_s: f64,
        pointing_centre: PhaseCentre,
        phase_centre: PhaseCentre,
        skyvis_freq: Array3<Complex64>,
    ) -> Result<Self, DelaySpectrumError> {
        const FN: &str = "InterferometerArray::new";
        let nbl = baselines.nrows();
        let nchan = freqs_hz.len();
        let nsnap = lsts_deg.len();
        if baselines.ncols() != 3 || nbl == 0 {
            return Err(shape_error(
                "baselines",
                FN,
                "(nbl>0, 3)".into(),
                format!("{:?}", baselines.dim()),
            ));
        }
        if labels.len() != nbl {
            return Err(shape_error(
                "labels",
                FN,
                format!("{nbl} labels"),
                format!("{} labels", labels.len()),
            ));
        }
        if nsnap == 0 {
            return Err(shape_error("lsts_deg", FN, "(nsnap>0,)".into(), "(0,)".into()));
        }
        for (argument, centre) in [("pointing_centre", &pointing_centre), ("phase_centre", &phase_centre)] {
            if centre.num_snapshots() != nsnap {
                return Err(shape_error(
                    argument,
                    FN,
                    format!("{nsnap} rows"),
                    format!("{} rows", centre.num_snapshots()),
                ));
            }
        }
        if skyvis_freq.dim() != (nbl, nchan, nsnap) {
            return Err(shape_error(
                "skyvis_freq",
                FN,
                format!("{:?}", (nbl, nchan, nsnap)),
                format!("{:?}", skyvis_freq.dim()),
            ));
        }
        if nchan < 2 {
            return Err(DelaySpectrumError::InvalidInput {
                function: FN.into(),
                reason: "at least two channels are needed to determine the channel width".into(),
            });
        }
        let freq_res_hz = freqs_hz[1] - freqs_hz[0];
        let uniform = freqs_hz
            .windows(2)
            .into_iter()
            .all(|w| ((w[1] - w[0]) - freq_res_hz).abs() <= 1e-6 * freq_res_hz.abs());
        if !(uniform && freq_res_hz > 0.0) {
            return Err(DelaySpectrumError::InvalidInput {
                function: FN.into(),
                reason: "channel frequencies must be increasing and uniformly spaced".into(),
            });
        }

        let dims = skyvis_freq.dim();
        Ok(Self {
            labels,
            baselines,
            freqs_hz,
            freq_res_hz,
            latitude_rad,
            lsts_deg,
            t_acc_s,
            pointing_centre,
            phase_centre,
            bandpass: FreqWeights::Unity,
            bandpass_wts: FreqWeights::Unity,
            vis_freq: skyvis_freq.clone(),
            skyvis_freq,
            vis_noise_freq: Array3::zeros(dims),
            lag_products: None,
        })
    }

    pub fn labels(&self) -> &[String] {
        &self.labels
    }

    /// `[nbl, 3]` baseline vectors in metres (East, North, Up)
    pub fn baselines(&self) -> ArrayView2<f64> {
        self.baselines.view()
    }

    pub fn freqs_hz(&self) -> ArrayView1<f64> {
        self.freqs_hz.view()
    }

    pub fn freq_res_hz(&self) -> f64 {
        self.freq_res_hz
    }

    pub fn latitude_rad(&self) -> f64 {
        self.latitude_rad
    }

    pub fn lsts_deg(&self) -> ArrayView1<f64> {
        self.lsts_deg.view()
    }

    /// Accumulation time of each snapshot \[s\]
    pub fn t_acc_s(&self) -> f64 {
        self.t_acc_s
    }

    pub fn pointing_centre(&self) -> &PhaseCentre {
        &self.pointing_centre
    }

    pub fn phase_centre(&self) -> &PhaseCentre {
        &self.phase_centre
    }

    pub fn bandpass(&self) -> &FreqWeights {
        &self.bandpass
    }

    pub fn bandpass_wts(&self) -> &FreqWeights {
        &self.bandpass_wts
    }

    pub fn skyvis_freq(&self) -> ArrayView3<Complex64> {
        self.skyvis_freq.view()
    }

    pub fn vis_noise_freq(&self) -> ArrayView3<Complex64> {
        self.vis_noise_freq.view()
    }

    /// Observed visibilities, the sky plus the noise
    pub fn vis_freq(&self) -> ArrayView3<Complex64> {
        self.vis_freq.view()
    }

    /// `(nbl, nchan, nsnap)`
    pub fn dims(&self) -> (usize, usize, usize) {
        self.vis_freq.dim()
    }

    pub fn num_baselines(&self) -> usize {
        self.baselines.nrows()
    }

    pub fn num_chans(&self) -> usize {
        self.freqs_hz.len()
    }

    /// Number of accumulations (snapshots)
    pub fn n_acc(&self) -> usize {
        self.lsts_deg.len()
    }

    /// Length of every baseline in metres
    pub fn baseline_lengths(&self) -> Array1<f64> {
        self.baselines
            .map_axis(Axis(1), |b| b.dot(&b).sqrt())
    }

    /// Total bandwidth `nchan * df` \[Hz\]
    pub fn bandwidth(&self) -> f64 {
        self.num_chans() as f64 * self.freq_res_hz
    }

    fn mark_stale(&mut self) {
        if let Some((_, state)) = self.lag_products.as_mut() {
            *state = ProductState::Stale;
        }
    }

    /// Freshness of the plain delay products, if any have been computed
    pub fn lag_product_state(&self) -> Option<ProductState> {
        self.lag_products.as_ref().map(|(_, state)| *state)
    }

    /// Replace the instrumental bandpass.
    ///
    /// # Errors
    ///
    /// - [`DelaySpectrumError::IncompatibleShape`] if it does not broadcast onto
    ///   the visibilities.
    pub fn set_bandpass(&mut self, bandpass: &FreqWeights) -> Result<(), DelaySpectrumError> {
        bandpass.broadcast(self.dims())?;
        self.bandpass = bandpass.clone();
        self.mark_stale();
        Ok(())
    }

    /// Replace the frequency weights (e.g. a taper) applied before delay
    /// transforming.
    ///
    /// # Errors
    ///
    /// - [`DelaySpectrumError::IncompatibleShape`] if they do not broadcast onto
    ///   the visibilities.
    pub fn set_bandpass_weights(&mut self, weights: &FreqWeights) -> Result<(), DelaySpectrumError> {
        weights.broadcast(self.dims())?;
        self.bandpass_wts = weights.clone();
        self.mark_stale();
        Ok(())
    }

    /// Add noise to the sky visibilities, replacing any noise added before.
    ///
    /// # Errors
    ///
    /// - [`DelaySpectrumError::IncompatibleShape`] if `noise` is not the shape
    ///   of the visibilities.
    pub fn add_noise(&mut self, noise: Array3<Complex64>) -> Result<(), DelaySpectrumError> {
        if noise.dim() != self.dims() {
            return Err(shape_error(
                "noise",
                "InterferometerArray::add_noise",
                format!("{:?}", self.dims()),
                format!("{:?}", noise.dim()),
            ));
        }
        self.vis_freq = &self.skyvis_freq + &noise;
        self.vis_noise_freq = noise;
        self.mark_stale();
        Ok(())
    }

    /// Direction cosines `[nsnap, 3]` of a centre at each snapshot.
    fn centre_dircos(&self, centre: &PhaseCentre) -> Result<Array2<f64>, DelaySpectrumError> {
        centre
            .to_hadec(self.lsts_deg.view())?
            .to_dircos(self.latitude_rad)
    }

    /// `[nsnap, 3]` direction cosines of the pointing centre
    ///
    /// # Errors
    ///
    /// see [`PhaseCentre::to_dircos`]
    pub fn pointing_dircos(&self) -> Result<Array2<f64>, DelaySpectrumError> {
        self.centre_dircos(&self.pointing_centre)
    }

    /// Horizon delay limits `[nsnap, nbl, 2]` around the current phase centre.
    ///
    /// # Errors
    ///
    /// see [`horizon_delay_limits`]
    pub fn horizon_delay_limits(&self) -> Result<Array3<f64>, DelaySpectrumError> {
        let centre = self.phase_centre.to_hadec(self.lsts_deg.view())?;
        horizon_delay_limits(self.baselines.view(), &centre, self.latitude_rad)
    }

    /// Rotate the phases of the sky, noise and observed visibilities to a new
    /// phase centre. A single row applies to every snapshot.
    ///
    /// Delay products computed before are marked stale rather than being
    /// recomputed.
    ///
    /// # Errors
    ///
    /// - [`DelaySpectrumError::IncompatibleShape`] if `new_centre` has neither
    ///   one row nor one row per snapshot.
    /// - errors from converting either centre to direction cosines.
    pub fn phase_centering(&mut self, new_centre: &PhaseCentre) -> Result<(), DelaySpectrumError> {
        trace!("start phase_centering");
        let nsnap = self.n_acc();
        let new_centre = match new_centre.num_snapshots() {
            n if n == nsnap => new_centre.clone(),
            1 => PhaseCentre::new(
                new_centre.coords,
                new_centre
                    .values
                    .broadcast((nsnap, new_centre.values.ncols()))
                    .ok_or_else(|| {
                        shape_error(
                            "new_centre",
                            "InterferometerArray::phase_centering",
                            format!("1 or {nsnap} rows"),
                            format!("{:?}", new_centre.values.dim()),
                        )
                    })?
                    .to_owned(),
            )?,
            n => {
                return Err(shape_error(
                    "new_centre",
                    "InterferometerArray::phase_centering",
                    format!("1 or {nsnap} rows"),
                    format!("{n} rows"),
                ))
            }
        };

        let old_dircos = self.centre_dircos(&self.phase_centre)?;
        let new_dircos = self.centre_dircos(&new_centre)?;
        // [nbl, nsnap] path difference between the centres in metres
        let b_dot_l = self.baselines.dot(&(old_dircos - new_dircos).t());
        debug!(
            "rephasing {:?} visibilities from {} to {} centre",
            self.dims(),
            self.phase_centre.coords,
            new_centre.coords
        );

        let freqs_hz = &self.freqs_hz;
        for cube in [
            &mut self.skyvis_freq,
            &mut self.vis_noise_freq,
            &mut self.vis_freq,
        ] {
            Zip::indexed(cube).par_for_each(|(b, c, t), v| {
                *v *= Complex64::from_polar(1.0, -2.0 * PI * freqs_hz[c] * b_dot_l[[b, t]] / VEL_C);
            });
        }

        self.phase_centre = new_centre;
        self.mark_stale();
        info!("visibilities rephased, run delay_transform again to refresh the delay products");
        trace!("end phase_centering");
        Ok(())
    }

    /// Delay transform the sky, noise and observed visibilities with the
    /// current bandpass and weights. The results are fresh until the
    /// visibilities or weights change.
    ///
    /// # Errors
    ///
    /// see [`delay_transform`]
    pub fn delay_transform(&mut self, config: &DelayTransformConfig) -> Result<(), DelaySpectrumError> {
        let transform = |vis: ArrayView3<Complex64>| {
            delay_transform(
                vis,
                &self.bandpass,
                &self.bandpass_wts,
                self.freq_res_hz,
                config,
            )
        };
        let sky = transform(self.skyvis_freq.view())?;
        let noise = transform(self.vis_noise_freq.view())?;
        let observed = transform(self.vis_freq.view())?;
        self.lag_products = Some((
            LagProducts {
                skyvis_lag: sky.vis_lag,
                vis_noise_lag: noise.vis_lag,
                vis_lag: observed.vis_lag,
                lag_kernel: observed.lag_kernel,
                lags: observed.lags,
                info: observed.info,
            },
            ProductState::Fresh,
        ));
        Ok(())
    }

    /// The plain delay products.
    ///
    /// # Errors
    ///
    /// - [`DelaySpectrumError::MissingDelayProducts`] before the first
    ///   [`InterferometerArray::delay_transform`].
    /// - [`DelaySpectrumError::StaleDelayProducts`] if the visibilities or
    ///   weights changed since.
    pub fn lag_products(&self) -> Result<&LagProducts, DelaySpectrumError> {
        match &self.lag_products {
            None => Err(DelaySpectrumError::MissingDelayProducts {
                product: "plain delay products".into(),
                remedy: "InterferometerArray::delay_transform".into(),
            }),
            Some((_, ProductState::Stale)) => Err(DelaySpectrumError::StaleDelayProducts {
                product: "plain delay products".into(),
                remedy: "InterferometerArray::delay_transform".into(),
            }),
            Some((products, ProductState::Fresh)) => Ok(products),
        }
    }
}
