// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Frequency weights (bandpasses, tapers) and how they are broadcast onto a
//! `[baseline, channel, snapshot]` visibility cube.

use std::f64::consts::PI;

use marlu::ndarray::{Array1, Array2, Array3, Axis};

use crate::DelaySpectrumError;

/// Real-valued weights along the channel axis, and which other axes of the
/// visibility cube they vary along.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum FreqWeights {
    /// All ones
    #[default]
    Unity,
    /// `[nchan]`, shared by every baseline and snapshot
    Channel(Array1<f64>),
    /// `[nchan, nsnap]`, shared by every baseline
    ChannelSnapshot(Array2<f64>),
    /// `[nbl, nchan]`, shared by every snapshot
    BaselineChannel(Array2<f64>),
    /// `[nbl, nchan, nsnap]`
    Cube(Array3<f64>),
}

const BL_AXIS: u8 = 0b100;
const SNAP_AXIS: u8 = 0b001;

impl FreqWeights {
    /// Short description of this variant's shape
    pub fn shape_name(&self) -> &'static str {
        match self {
            Self::Unity => "unity",
            Self::Channel(_) => "(nchan,)",
            Self::ChannelSnapshot(_) => "(nchan, nsnap)",
            Self::BaselineChannel(_) => "(nbl, nchan)",
            Self::Cube(_) => "(nbl, nchan, nsnap)",
        }
    }

    /// A Blackman taper across `nchan` channels, shared by every baseline and
    /// snapshot. It falls to zero at both band edges, trading delay
    /// resolution for much lower delay sidelobes.
    pub fn blackman(nchan: usize) -> Self {
        if nchan == 1 {
            return Self::Channel(Array1::ones(1));
        }
        let span = (nchan - 1) as f64;
        Self::Channel(Array1::from_shape_fn(nchan, |c| {
            let a = 2.0 * PI * c as f64 / span;
            (0.42 - 0.5 * a.cos() + 0.08 * (2.0 * a).cos()).max(0.0)
        }))
    }

    /// Expand the weights to the full `(nbl, nchan, nsnap)` cube.
    ///
    /// # Errors
    ///
    /// - [`DelaySpectrumError::IncompatibleShape`] if the weights do not line
    ///   up with `dims`.
    pub fn broadcast(
        &self,
        dims: (usize, usize, usize),
    ) -> Result<Array3<f64>, DelaySpectrumError> {
        let (nbl, nchan, nsnap) = dims;
        let shape_err = |received: String| DelaySpectrumError::IncompatibleShape {
            argument: "weights".into(),
            function: "FreqWeights::broadcast".into(),
            expected: match self {
                Self::Unity => format!("{dims:?}"),
                Self::Channel(_) => format!("({nchan},)"),
                Self::ChannelSnapshot(_) => format!("({nchan}, {nsnap})"),
                Self::BaselineChannel(_) => format!("({nbl}, {nchan})"),
                Self::Cube(_) => format!("{dims:?}"),
            },
            received,
        };
        match self {
            Self::Unity => Ok(Array3::ones(dims)),
            Self::Channel(w) => {
                if w.len() != nchan {
                    return Err(shape_err(format!("({},)", w.len())));
                }
                Ok(Array3::from_shape_fn(dims, |(_, c, _)| w[c]))
            }
            Self::ChannelSnapshot(w) => {
                if w.dim() != (nchan, nsnap) {
                    return Err(shape_err(format!("{:?}", w.dim())));
                }
                Ok(w.view()
                    .insert_axis(Axis(0))
                    .broadcast(dims)
                    .ok_or_else(|| shape_err(format!("{:?}", w.dim())))?
                    .to_owned())
            }
            Self::BaselineChannel(w) => {
                if w.dim() != (nbl, nchan) {
                    return Err(shape_err(format!("{:?}", w.dim())));
                }
                Ok(Array3::from_shape_fn(dims, |(b, c, _)| w[[b, c]]))
            }
            Self::Cube(w) => {
                if w.dim() != dims {
                    return Err(shape_err(format!("{:?}", w.dim())));
                }
                Ok(w.clone())
            }
        }
    }

    /// Interpret a flat list of weights by its length alone.
    ///
    /// `nchan` values are per channel, `nchan * nsnap` per channel and
    /// snapshot, `nbl * nchan` per baseline and channel and
    /// `nbl * nchan * nsnap` the full cube, all in row-major order. Sizes that
    /// fit several shapes are accepted only when those shapes broadcast to the
    /// same cube (they differ by unit-length axes).
    ///
    /// # Errors
    ///
    /// - [`DelaySpectrumError::AmbiguousWeightShape`] if the length fits shapes
    ///   that would broadcast differently.
    /// - [`DelaySpectrumError::IncompatibleShape`] if it fits none.
    pub fn from_flat(
        values: &[f64],
        dims: (usize, usize, usize),
    ) -> Result<Self, DelaySpectrumError> {
        let (nbl, nchan, nsnap) = dims;
        // significant axes of each candidate, ignoring axes of length 1.
        let bl = if nbl > 1 { BL_AXIS } else { 0 };
        let snap = if nsnap > 1 { SNAP_AXIS } else { 0 };
        let candidates: [(usize, u8, &str); 4] = [
            (nbl * nchan * nsnap, bl | snap, "(nbl, nchan, nsnap)"),
            (nchan * nsnap, snap, "(nchan, nsnap)"),
            (nbl * nchan, bl, "(nbl, nchan)"),
            (nchan, 0, "(nchan,)"),
        ];
        let matches = candidates
            .iter()
            .filter(|(size, _, _)| *size == values.len())
            .collect::<Vec<_>>();

        let Some(&&(_, axes, _)) = matches.first() else {
            return Err(DelaySpectrumError::IncompatibleShape {
                argument: "weights".into(),
                function: "FreqWeights::from_flat".into(),
                expected: format!(
                    "one of {} values",
                    candidates
                        .iter()
                        .map(|(size, _, name)| format!("{name}={size}"))
                        .collect::<Vec<_>>()
                        .join(", ")
                ),
                received: format!("{}", values.len()),
            });
        };
        if matches.iter().any(|(_, other, _)| *other != axes) {
            return Err(DelaySpectrumError::AmbiguousWeightShape {
                argument: "weights".into(),
                size: values.len(),
                candidates: matches
                    .iter()
                    .map(|(_, _, name)| *name)
                    .collect::<Vec<_>>()
                    .join(", "),
            });
        }

        let values = values.to_vec();
        // shapes are known to hold exactly `values.len()` elements here.
        let shaped = match axes {
            a if a == BL_AXIS | SNAP_AXIS => Array3::from_shape_vec(dims, values).map(Self::Cube),
            a if a == SNAP_AXIS => {
                Array2::from_shape_vec((nchan, nsnap), values).map(Self::ChannelSnapshot)
            }
            a if a == BL_AXIS => {
                Array2::from_shape_vec((nbl, nchan), values).map(Self::BaselineChannel)
            }
            _ => {
                // every significant axis is absent, so the values only vary by channel
                Ok(Self::Channel(Array1::from_vec(values)))
            }
        };
        shaped.map_err(|e| DelaySpectrumError::IncompatibleShape {
            argument: "weights".into(),
            function: "FreqWeights::from_flat".into(),
            expected: format!("{dims:?}"),
            received: e.to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use approx::assert_abs_diff_eq;
    use marlu::ndarray::{array, s};

    use super::*;

    #[test]
    fn test_channel_weights_broadcast_over_cube() {
        let taper = Array1::linspace(0.1, 0.8, 8);
        let cube = FreqWeights::Channel(taper.clone())
            .broadcast((3, 8, 2))
            .unwrap();
        assert_eq!(cube.dim(), (3, 8, 2));
        for b in 0..3 {
            for t in 0..2 {
                assert_abs_diff_eq!(cube.slice(s![b, .., t]), taper.view());
            }
        }
    }

    #[test]
    fn test_blackman_taper() {
        let taper = match FreqWeights::blackman(33) {
            FreqWeights::Channel(taper) => taper,
            other => panic!("unexpected {}", other.shape_name()),
        };
        // zero at both band edges, unity at the band centre
        assert_abs_diff_eq!(taper[0], 0.0);
        assert_abs_diff_eq!(taper[32], 0.0, epsilon = 1e-15);
        assert_abs_diff_eq!(taper[16], 1.0, epsilon = 1e-15);
        for c in 0..16 {
            assert_abs_diff_eq!(taper[c], taper[32 - c], epsilon = 1e-12);
            assert!(taper[c] <= taper[c + 1]);
        }

        // an even band has no centre channel, both middle channels fall short
        let cube = FreqWeights::blackman(32).broadcast((2, 32, 3)).unwrap();
        assert_eq!(cube.dim(), (2, 32, 3));
        assert!(cube[[1, 15, 2]] > 0.9 && cube[[1, 15, 2]] < 1.0);
        assert_abs_diff_eq!(cube[[0, 15, 0]], cube[[1, 16, 2]], epsilon = 1e-12);

        assert_eq!(FreqWeights::blackman(1), FreqWeights::Channel(Array1::ones(1)));
    }

    #[test]
    fn test_channel_snapshot_weights() {
        let w = array![[1.0, 2.0], [3.0, 4.0], [5.0, 6.0]];
        let cube = FreqWeights::ChannelSnapshot(w.clone())
            .broadcast((2, 3, 2))
            .unwrap();
        assert_abs_diff_eq!(cube.slice(s![1, .., ..]), w.view());
        assert_abs_diff_eq!(cube[[0, 2, 1]], 6.0);
    }

    #[test]
    fn test_mismatched_weights() {
        assert!(matches!(
            FreqWeights::Channel(Array1::ones(7)).broadcast((3, 8, 2)),
            Err(DelaySpectrumError::IncompatibleShape { .. })
        ));
        assert!(matches!(
            FreqWeights::BaselineChannel(Array2::ones((2, 8))).broadcast((3, 8, 2)),
            Err(DelaySpectrumError::IncompatibleShape { .. })
        ));
    }

    #[test]
    fn test_flat_weights_are_inferred() {
        let dims = (3, 8, 2);
        assert!(matches!(
            FreqWeights::from_flat(&[1.0; 8], dims).unwrap(),
            FreqWeights::Channel(_)
        ));
        assert!(matches!(
            FreqWeights::from_flat(&[1.0; 16], dims).unwrap(),
            FreqWeights::ChannelSnapshot(_)
        ));
        assert!(matches!(
            FreqWeights::from_flat(&[1.0; 24], dims).unwrap(),
            FreqWeights::BaselineChannel(_)
        ));
        assert!(matches!(
            FreqWeights::from_flat(&[1.0; 48], dims).unwrap(),
            FreqWeights::Cube(_)
        ));
        assert!(matches!(
            FreqWeights::from_flat(&[1.0; 5], dims),
            Err(DelaySpectrumError::IncompatibleShape { .. })
        ));
    }

    #[test]
    fn test_flat_weights_ambiguous() {
        // nbl == nsnap, so nchan * nsnap == nbl * nchan
        assert!(matches!(
            FreqWeights::from_flat(&[1.0; 8], (2, 4, 2)),
            Err(DelaySpectrumError::AmbiguousWeightShape { size: 8, .. })
        ));
        // a single snapshot makes (nchan,) and (nchan, nsnap) equivalent
        let weights = FreqWeights::from_flat(&[0.5; 4], (2, 4, 1)).unwrap();
        let cube = weights.broadcast((2, 4, 1)).unwrap();
        assert_abs_diff_eq!(cube, Array3::from_elem((2, 4, 1), 0.5));
    }
}
