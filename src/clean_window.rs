// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Delay-space windows that CLEAN is allowed to place components in.

use marlu::ndarray::{Array1, ArrayView1};

use crate::DelaySpectrumError;

/// Mark the delays that lie within the horizon limits, widened on both sides
/// by `buffer / bandwidth`.
///
/// `mask[i]` is true when
/// `horizon_min - buffer / bandwidth <= lags[i] <= horizon_max + buffer / bandwidth`.
///
/// # Errors
///
/// - [`DelaySpectrumError::InvalidInput`] if any lag or limit is NaN.
/// - [`DelaySpectrumError::InvalidArgument`] if `bandwidth` is not positive or
///   `buffer` is not finite.
pub fn clean_mask(
    lags: ArrayView1<f64>,
    horizon_min: f64,
    horizon_max: f64,
    buffer: f64,
    bandwidth: f64,
) -> Result<Array1<bool>, DelaySpectrumError> {
    if !(bandwidth.is_finite() && bandwidth > 0.0) {
        return Err(DelaySpectrumError::InvalidArgument {
            argument: "bandwidth".into(),
            function: "clean_mask".into(),
            reason: format!("must be positive, got {bandwidth}"),
        });
    }
    if !buffer.is_finite() {
        return Err(DelaySpectrumError::InvalidArgument {
            argument: "buffer".into(),
            function: "clean_mask".into(),
            reason: format!("must be finite, got {buffer}"),
        });
    }
    if horizon_min.is_nan() || horizon_max.is_nan() || lags.iter().any(|l| l.is_nan()) {
        return Err(DelaySpectrumError::InvalidInput {
            function: "clean_mask".into(),
            reason: "NaN in delays or horizon limits".into(),
        });
    }
    let lo = horizon_min - buffer / bandwidth;
    let hi = horizon_max + buffer / bandwidth;
    Ok(lags.mapv(|lag| lo <= lag && lag <= hi))
}
