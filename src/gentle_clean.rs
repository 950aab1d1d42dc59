// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! One dimensional complex CLEAN, and the "gentle" major cycle around it that
//! keeps cleaning inside a delay window until the residual there is no worse
//! than the residual outside it.

use log::{debug, trace};
use marlu::ndarray::{Array1, ArrayView1, Zip};
use rustfft::num_complex::Complex64;

use crate::{
    constants::{
        DEFAULT_CLEAN_GAIN, DEFAULT_CLEAN_MAXITER, DEFAULT_CLEAN_TOL, MAX_GENTLE_CLEAN_CYCLES,
    },
    DelaySpectrumError,
};

/// Options for a single [`clean_1d`] pass
#[derive(Debug, Clone, Copy)]
pub struct CleanParams {
    /// Fraction of the peak removed each iteration
    pub gain: f64,
    /// Maximum number of iterations
    pub maxiter: usize,
    /// Stop once an iteration improves the score by less than this fraction
    /// of the first score
    pub tol: f64,
    /// Stop (undoing the last step) as soon as the score increases. Otherwise
    /// keep going and return the best state seen.
    pub stop_if_div: bool,
    /// Only place components where the residual, divided by the kernel's
    /// zero-delay response, has a positive real part
    pub pos_def: bool,
}

impl Default for CleanParams {
    fn default() -> Self {
        Self {
            gain: DEFAULT_CLEAN_GAIN,
            maxiter: DEFAULT_CLEAN_MAXITER,
            tol: DEFAULT_CLEAN_TOL,
            stop_if_div: true,
            pos_def: false,
        }
    }
}

/// The outcome of a single [`clean_1d`] pass
#[derive(Debug, Clone)]
pub struct CleanPass {
    /// Clean components
    pub model: Array1<Complex64>,
    /// What is left of the data once the model is convolved out
    pub residual: Array1<Complex64>,
    /// Number of iterations that were kept
    pub iterations: usize,
    /// RMS of the residual
    pub score: f64,
    /// Whether the pass stopped because the score increased
    pub diverged: bool,
}

/// Which sample the next step should be taken at, if any.
fn find_peak(
    res: &Array1<Complex64>,
    area: &ArrayView1<bool>,
    inv_ker0: Complex64,
    pos_def: bool,
) -> Option<usize> {
    let mut peak = None;
    let mut peak_val = 0.0;
    for (n, (r, &in_area)) in res.iter().zip(area.iter()).enumerate() {
        if !in_area {
            continue;
        }
        if pos_def && (r * inv_ker0).re <= 0.0 {
            continue;
        }
        let val = r.norm_sqr();
        if val > peak_val {
            peak_val = val;
            peak = Some(n);
        }
    }
    peak
}

fn rms(res: &Array1<Complex64>) -> f64 {
    (res.iter().map(|r| r.norm_sqr()).sum::<f64>() / res.len() as f64).sqrt()
}

/// Subtract `step` times the kernel, circularly shifted to `peak`, from `res`.
fn subtract_kernel(
    res: &mut Array1<Complex64>,
    kernel: &ArrayView1<Complex64>,
    peak: usize,
    step: Complex64,
) {
    let dim = res.len();
    for (n, &k) in kernel.iter().enumerate() {
        res[(n + peak) % dim] -= k * step;
    }
}

/// Complex CLEAN of `data` with `kernel`, placing components only where
/// `area` is true.
///
/// The kernel is indexed like the data with its zero-delay response at index
/// 0, and is applied circularly. Each iteration finds the largest residual
/// inside the area, adds `gain * res[peak] / kernel[0]` to the model there and
/// subtracts the correspondingly scaled and shifted kernel from the residual.
///
/// # Errors
///
/// - [`DelaySpectrumError::IncompatibleShape`] if the lengths differ.
/// - [`DelaySpectrumError::DegeneratePSF`] if `kernel[0]` is zero.
pub fn clean_1d(
    data: ArrayView1<Complex64>,
    kernel: ArrayView1<Complex64>,
    area: ArrayView1<bool>,
    params: &CleanParams,
) -> Result<CleanPass, DelaySpectrumError> {
    let dim = data.len();
    for (name, len) in [("kernel", kernel.len()), ("area", area.len())] {
        if len != dim {
            return Err(DelaySpectrumError::IncompatibleShape {
                argument: name.into(),
                function: "clean_1d".into(),
                expected: format!("({dim},)"),
                received: format!("({len},)"),
            });
        }
    }
    if dim == 0 || kernel[0].norm() == 0.0 {
        return Err(DelaySpectrumError::DegeneratePSF {
            reason: "kernel has no zero-delay response".into(),
        });
    }
    let inv_ker0 = kernel[0].inv();

    let mut model = Array1::<Complex64>::zeros(dim);
    let mut res = data.to_owned();
    let mut score = None;
    let mut first_score = None;
    let mut best: Option<(f64, Array1<Complex64>, Array1<Complex64>, usize)> = None;
    let mut iterations = 0;
    let mut diverged = false;

    let mut peak = find_peak(&res, &area, inv_ker0, params.pos_def);
    while let Some(p) = peak {
        if iterations >= params.maxiter {
            break;
        }
        let step = res[p] * inv_ker0 * params.gain;
        model[p] += step;
        subtract_kernel(&mut res, &kernel, p, step);
        let nscore = rms(&res);
        let first = *first_score.get_or_insert(nscore);

        match score {
            Some(prev) if nscore > prev => {
                if params.stop_if_div {
                    model[p] -= step;
                    subtract_kernel(&mut res, &kernel, p, -step);
                    diverged = true;
                    break;
                }
                diverged = true;
            }
            Some(prev) if first <= 0.0 || (prev - nscore) / first < params.tol => {
                iterations += 1;
                score = Some(nscore);
                break;
            }
            _ => {}
        }
        iterations += 1;
        score = Some(nscore);

        if !params.stop_if_div && best.as_ref().map_or(true, |(b, ..)| nscore < *b) {
            best = Some((nscore, model.clone(), res.clone(), iterations));
        }
        peak = find_peak(&res, &area, inv_ker0, params.pos_def);
    }

    if let Some((best_score, best_model, best_res, best_iterations)) = best {
        if score.map_or(false, |s| best_score < s) {
            model = best_model;
            res = best_res;
            iterations = best_iterations;
        }
    }

    Ok(CleanPass {
        score: rms(&res),
        model,
        residual: res,
        iterations,
        diverged,
    })
}

/// Options for [`gentle_clean`]
#[derive(Debug, Clone, Copy)]
pub struct GentleCleanParams {
    /// Loop gain of each CLEAN pass
    pub gain: f64,
    /// Iteration cap of each CLEAN pass
    pub maxiter: usize,
    /// Convergence tolerance of each CLEAN pass
    pub tol: f64,
}

impl Default for GentleCleanParams {
    fn default() -> Self {
        Self {
            gain: DEFAULT_CLEAN_GAIN,
            maxiter: DEFAULT_CLEAN_MAXITER,
            tol: DEFAULT_CLEAN_TOL,
        }
    }
}

/// The outcome of [`gentle_clean`]
#[derive(Debug, Clone)]
pub struct GentleClean {
    /// Accumulated clean components
    pub components: Array1<Complex64>,
    /// Final residual
    pub residual: Array1<Complex64>,
    /// Number of major cycles that ran, at most 1000
    pub ncycle: usize,
    /// Standard deviation of the data inside the window
    pub initial_residual: f64,
    /// Standard deviation of the final residual inside the window
    pub final_residual: f64,
}

/// Standard deviation of the complex samples selected by `select`,
/// `sqrt(mean |x - mean x|^2)`. NaN if nothing is selected.
pub fn masked_std(values: ArrayView1<Complex64>, mask: ArrayView1<bool>, select: bool) -> f64 {
    let picked = values
        .iter()
        .zip(mask.iter())
        .filter(|(_, &m)| m == select)
        .map(|(v, _)| *v)
        .collect::<Vec<_>>();
    if picked.is_empty() {
        return f64::NAN;
    }
    let n = picked.len() as f64;
    let mean = picked.iter().sum::<Complex64>() / n;
    (picked.iter().map(|v| (v - mean).norm_sqr()).sum::<f64>() / n).sqrt()
}

/// Iteratively CLEAN `data` inside `area` until the residual inside the
/// window is no larger than outside it.
///
/// Data and kernel are first normalised by the kernel's peak magnitude. A
/// permissive pass (no divergence stop, no sign constraint) is run for
/// diagnostics only and discarded. Then, starting from the original data,
/// strict positive-definite passes are repeated, each starting from the
/// previous residual, while `std(inside) > std(outside)`, at most 1000 times.
/// Outputs are scaled back to the input's units.
///
/// # Errors
///
/// - [`DelaySpectrumError::DegeneratePSF`] if the kernel is all zero, not
///   finite, or has no zero-delay response.
/// - [`DelaySpectrumError::InvalidInput`] if `area` selects no delays.
/// - [`DelaySpectrumError::IncompatibleShape`] if the lengths differ.
pub fn gentle_clean(
    data: ArrayView1<Complex64>,
    kernel: ArrayView1<Complex64>,
    area: ArrayView1<bool>,
    params: &GentleCleanParams,
) -> Result<GentleClean, DelaySpectrumError> {
    let scale = kernel.iter().map(|k| k.norm()).fold(0.0, f64::max);
    if !(scale.is_finite() && scale > 0.0) {
        return Err(DelaySpectrumError::DegeneratePSF {
            reason: format!("peak kernel magnitude is {scale}"),
        });
    }
    if !area.iter().any(|&in_area| in_area) {
        return Err(DelaySpectrumError::InvalidInput {
            function: "gentle_clean".into(),
            reason: "the clean window contains no delays".into(),
        });
    }
    let data = data.mapv(|d| d / scale);
    let kernel = kernel.mapv(|k| k / scale);

    let diagnostic = clean_1d(
        data.view(),
        kernel.view(),
        area,
        &CleanParams {
            gain: params.gain,
            maxiter: params.maxiter,
            tol: params.tol,
            stop_if_div: false,
            pos_def: false,
        },
    )?;
    trace!(
        "diagnostic clean: {} iterations, score {:e}",
        diagnostic.iterations,
        diagnostic.score * scale
    );

    let strict = CleanParams {
        gain: params.gain,
        maxiter: params.maxiter,
        tol: params.tol,
        stop_if_div: true,
        pos_def: true,
    };
    let mut components = Array1::<Complex64>::zeros(data.len());
    let mut residual = data;
    let initial_residual = masked_std(residual.view(), area, true);
    let mut outside_res = masked_std(residual.view(), area, false);
    // guarantees at least one cycle whenever there is an outside reference
    let mut inside_res = 2.0 * outside_res;
    let mut ncycle = 0;
    while inside_res > outside_res && ncycle < MAX_GENTLE_CLEAN_CYCLES {
        let pass = clean_1d(residual.view(), kernel.view(), area, &strict)?;
        Zip::from(&mut components)
            .and(&pass.model)
            .for_each(|c, &m| *c += m);
        residual = pass.residual;
        inside_res = masked_std(residual.view(), area, true);
        outside_res = masked_std(residual.view(), area, false);
        ncycle += 1;
    }
    debug!(
        "gentle clean: {} cycles, inside {:e} -> {:e}, outside {:e}",
        ncycle,
        initial_residual * scale,
        masked_std(residual.view(), area, true) * scale,
        outside_res * scale
    );

    let final_residual = masked_std(residual.view(), area, true) * scale;
    components.mapv_inplace(|c| c * scale);
    residual.mapv_inplace(|r| r * scale);
    Ok(GentleClean {
        components,
        residual,
        ncycle,
        initial_residual: initial_residual * scale,
        final_residual,
    })
}

#[cfg(test)]
mod tests {
    use approx::assert_abs_diff_eq;
    use marlu::ndarray::{array, Array1};

    use super::*;

    fn c(re: f64, im: f64) -> Complex64 {
        Complex64::new(re, im)
    }

    fn delta_kernel(n: usize) -> Array1<Complex64> {
        Array1::from_shape_fn(n, |i| if i == 0 { c(1.0, 0.0) } else { c(0.0, 0.0) })
    }

    /// sinc-like response of a flat band, zero-padded to twice its length
    fn flat_band_kernel(n: usize) -> Array1<Complex64> {
        let nchan = n / 2;
        Array1::from_shape_fn(n, |k| {
            (0..nchan)
                .map(|f| {
                    let phase = 2.0 * std::f64::consts::PI * (f * k) as f64 / n as f64;
                    Complex64::from_polar(1.0, phase)
                })
                .sum::<Complex64>()
                / nchan as f64
        })
    }

    fn circular_convolve(
        model: &Array1<Complex64>,
        kernel: &Array1<Complex64>,
    ) -> Array1<Complex64> {
        let n = model.len();
        Array1::from_shape_fn(n, |m| {
            (0..n)
                .map(|p| model[p] * kernel[(m + n - p) % n])
                .sum::<Complex64>()
        })
    }

    #[test]
    fn test_clean_1d_recovers_spike_with_delta_kernel() {
        let mut data = Array1::<Complex64>::zeros(16);
        data[3] = c(5.0, -2.0);
        let area = Array1::from_elem(16, true);
        let params = CleanParams {
            maxiter: 1000,
            tol: 1e-12,
            ..Default::default()
        };
        let pass = clean_1d(data.view(), delta_kernel(16).view(), area.view(), &params).unwrap();
        assert!(pass.iterations > 100);
        assert_abs_diff_eq!(pass.model[3], c(5.0, -2.0), epsilon = 1e-6);
        assert!(pass.residual.iter().all(|r| r.norm() < 1e-6));
        assert!(!pass.diverged);
    }

    #[test]
    fn test_clean_1d_respects_area() {
        let mut data = Array1::<Complex64>::zeros(8);
        data[6] = c(1.0, 0.0);
        let area = array![true, true, true, true, false, false, false, false];
        let pass = clean_1d(
            data.view(),
            delta_kernel(8).view(),
            area.view(),
            &CleanParams::default(),
        )
        .unwrap();
        assert_eq!(pass.iterations, 0);
        assert!(pass.model.iter().all(|m| m.norm() == 0.0));
        assert_abs_diff_eq!(pass.residual, data);
    }

    #[test]
    fn test_clean_1d_pos_def_skips_negative_peaks() {
        let mut data = Array1::<Complex64>::zeros(8);
        data[1] = c(-4.0, 0.0);
        data[2] = c(1.0, 0.0);
        let area = Array1::from_elem(8, true);
        let params = CleanParams {
            pos_def: true,
            maxiter: 5,
            ..Default::default()
        };
        let pass = clean_1d(data.view(), delta_kernel(8).view(), area.view(), &params).unwrap();
        assert_eq!(pass.model[1], c(0.0, 0.0));
        assert!(pass.model[2].re > 0.0);
    }

    #[test]
    fn test_clean_1d_conserves_flux() {
        let n = 32;
        let kernel = flat_band_kernel(n);
        let mut model = Array1::<Complex64>::zeros(n);
        model[2] = c(3.0, 1.0);
        model[n - 1] = c(-0.5, 0.25);
        let data = circular_convolve(&model, &kernel);
        let area = Array1::from_shape_fn(n, |i| i < 4 || i > n - 4);
        for stop_if_div in [true, false] {
            let params = CleanParams {
                stop_if_div,
                ..Default::default()
            };
            let pass = clean_1d(data.view(), kernel.view(), area.view(), &params).unwrap();
            let rebuilt = circular_convolve(&pass.model, &kernel) + &pass.residual;
            assert_abs_diff_eq!(rebuilt, data, epsilon = 1e-9);
            assert!(pass.score < rms(&data));
        }
    }

    #[test]
    fn test_zero_kernel_is_degenerate() {
        let data = Array1::from_elem(8, c(1.0, 0.0));
        let kernel = Array1::<Complex64>::zeros(8);
        let area = Array1::from_elem(8, true);
        assert!(matches!(
            gentle_clean(
                data.view(),
                kernel.view(),
                area.view(),
                &GentleCleanParams::default()
            ),
            Err(DelaySpectrumError::DegeneratePSF { .. })
        ));
        let mut offset_kernel = Array1::<Complex64>::zeros(8);
        offset_kernel[3] = c(1.0, 0.0);
        assert!(matches!(
            clean_1d(
                data.view(),
                offset_kernel.view(),
                area.view(),
                &CleanParams::default()
            ),
            Err(DelaySpectrumError::DegeneratePSF { .. })
        ));
    }

    #[test]
    fn test_empty_window_is_invalid() {
        let data = Array1::from_elem(8, c(1.0, 0.0));
        let area = Array1::from_elem(8, false);
        assert!(matches!(
            gentle_clean(
                data.view(),
                delta_kernel(8).view(),
                area.view(),
                &GentleCleanParams::default()
            ),
            Err(DelaySpectrumError::InvalidInput { .. })
        ));
    }

    #[test]
    fn test_masked_std() {
        let values = array![c(1.0, 0.0), c(3.0, 0.0), c(0.0, 2.0), c(0.0, -2.0)];
        let mask = array![true, true, false, false];
        assert_abs_diff_eq!(masked_std(values.view(), mask.view(), true), 1.0);
        assert_abs_diff_eq!(masked_std(values.view(), mask.view(), false), 2.0);
        let all = Array1::from_elem(4, true);
        assert!(masked_std(values.view(), all.view(), false).is_nan());
    }

    #[test]
    fn test_gentle_clean_reduces_inside_residual() {
        let n = 64;
        let unit_kernel = flat_band_kernel(n);
        let kernel = &unit_kernel * c(7.0, 0.0);
        let mut model = Array1::<Complex64>::zeros(n);
        model[0] = c(10.0, 0.0);
        model[1] = c(4.0, 0.0);
        model[n - 1] = c(4.0, 0.0);
        let mut data = circular_convolve(&model, &kernel);
        // low level, deterministic "noise" everywhere
        for (i, d) in data.iter_mut().enumerate() {
            *d += c(0.05 * ((i * 7) as f64).sin(), 0.05 * ((i * 13) as f64).cos());
        }
        let area = Array1::from_shape_fn(n, |i| i <= 3 || i >= n - 3);

        let result = gentle_clean(
            data.view(),
            kernel.view(),
            area.view(),
            &GentleCleanParams::default(),
        )
        .unwrap();
        assert!(result.ncycle >= 1);
        assert!(result.ncycle <= MAX_GENTLE_CLEAN_CYCLES);
        assert!(result.final_residual < result.initial_residual);
        // components are in units of the peak-normalised kernel
        let rebuilt = circular_convolve(&result.components, &unit_kernel) + &result.residual;
        assert_abs_diff_eq!(rebuilt, data, epsilon = 1e-8);
        // components only inside the window
        for (i, comp) in result.components.iter().enumerate() {
            if !area[i] {
                assert_eq!(*comp, c(0.0, 0.0));
            }
        }
    }

    #[test]
    fn test_gentle_clean_cycle_cap() {
        // nothing positive to clean inside, barely anything outside
        let mut data = Array1::<Complex64>::zeros(8);
        data[0] = c(-1.0, 0.0);
        data[1] = c(-2.0, 0.0);
        data[4] = c(0.01, 0.0);
        let area = array![true, true, false, false, false, false, false, false];
        let result = gentle_clean(
            data.view(),
            delta_kernel(8).view(),
            area.view(),
            &GentleCleanParams::default(),
        )
        .unwrap();
        assert_eq!(result.ncycle, MAX_GENTLE_CLEAN_CYCLES);
        assert_abs_diff_eq!(result.residual, data);
    }

    #[test]
    fn test_gentle_clean_without_outside_reference() {
        let data = Array1::from_elem(8, c(1.0, 0.0));
        let area = Array1::from_elem(8, true);
        let result = gentle_clean(
            data.view(),
            delta_kernel(8).view(),
            area.view(),
            &GentleCleanParams::default(),
        )
        .unwrap();
        assert_eq!(result.ncycle, 0);
        assert_abs_diff_eq!(result.residual, data);
        assert!(result.components.iter().all(|c| c.norm() == 0.0));
    }
}
