// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Horizon delay limits.
//!
//! A source on the horizon along a baseline `b` arrives with a geometric delay
//! of at most `|b| / c`. Once the visibilities are phased to a centre `s`, all
//! delays shift by `-(b . s) / c`. Together these bound the region of delay
//! space that smooth-spectrum sky emission can occupy.

use std::{fmt::Display, str::FromStr};

use log::trace;
use marlu::{
    ndarray::{Array2, Array3, ArrayView1, ArrayView2, Axis},
    HADec,
};

use crate::{constants::VEL_C, DelaySpectrumError};

/// The coordinate system that the rows of a [`PhaseCentre`] are expressed in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PhaseCentreCoords {
    /// Hour angle and declination \[degrees\]
    HaDec,
    /// Altitude and azimuth \[degrees\]
    AltAz,
    /// Direction cosines in the local (East, North, Up) frame
    DirCos,
    /// Right ascension and declination \[degrees\]. Needs local sidereal
    /// times before it can be turned into a direction.
    RaDec,
}

impl PhaseCentreCoords {
    const TAGS: &'static str = "hadec, altaz, dircos, radec";
}

impl FromStr for PhaseCentreCoords {
    type Err = DelaySpectrumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "hadec" => Ok(Self::HaDec),
            "altaz" => Ok(Self::AltAz),
            "dircos" => Ok(Self::DirCos),
            "radec" => Ok(Self::RaDec),
            _ => Err(DelaySpectrumError::InvalidCoordinateSystem {
                system: s.to_string(),
                expected: Self::TAGS.to_string(),
            }),
        }
    }
}

impl Display for PhaseCentreCoords {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}",
            match self {
                Self::HaDec => "hadec",
                Self::AltAz => "altaz",
                Self::DirCos => "dircos",
                Self::RaDec => "radec",
            }
        )
    }
}

/// One phase (or pointing) centre per snapshot.
#[derive(Debug, Clone, PartialEq)]
pub struct PhaseCentre {
    /// The coordinate system of `values`
    pub coords: PhaseCentreCoords,
    /// `[nsnap, 2]` angles in degrees, or `[nsnap, 2|3]` direction cosines
    pub values: Array2<f64>,
}

impl PhaseCentre {
    /// Create a new phase centre, checking that `values` has a sensible number
    /// of columns for `coords`.
    ///
    /// # Errors
    ///
    /// - [`DelaySpectrumError::IncompatibleShape`] if there are no rows, or the
    ///   column count does not suit the coordinate system.
    pub fn new(coords: PhaseCentreCoords, values: Array2<f64>) -> Result<Self, DelaySpectrumError> {
        let (nrows, ncols) = values.dim();
        let cols_ok = match coords {
            PhaseCentreCoords::DirCos => ncols == 2 || ncols == 3,
            _ => ncols == 2,
        };
        if nrows == 0 || !cols_ok {
            return Err(DelaySpectrumError::IncompatibleShape {
                argument: "values".into(),
                function: "PhaseCentre::new".into(),
                expected: match coords {
                    PhaseCentreCoords::DirCos => "(nsnap>0, 2|3)".into(),
                    _ => "(nsnap>0, 2)".into(),
                },
                received: format!("{:?}", values.dim()),
            });
        }
        Ok(Self { coords, values })
    }

    /// The same direction repeated for every one of `nsnap` snapshots.
    ///
    /// # Errors
    ///
    /// see [`PhaseCentre::new`]
    pub fn fixed(
        coords: PhaseCentreCoords,
        row: &[f64],
        nsnap: usize,
    ) -> Result<Self, DelaySpectrumError> {
        let values = Array2::from_shape_fn((nsnap, row.len()), |(_, c)| row[c]);
        Self::new(coords, values)
    }

    /// The direction straight up, for every one of `nsnap` snapshots.
    pub fn zenith(nsnap: usize) -> Self {
        Self {
            coords: PhaseCentreCoords::AltAz,
            values: Array2::from_shape_fn((nsnap, 2), |(_, c)| if c == 0 { 90.0 } else { 0.0 }),
        }
    }

    /// Number of snapshots this centre describes.
    pub fn num_snapshots(&self) -> usize {
        self.values.nrows()
    }

    /// Express an RA-Dec centre in HA-Dec using the local sidereal time of each
    /// snapshot. Other systems are returned unchanged.
    ///
    /// # Errors
    ///
    /// - [`DelaySpectrumError::IncompatibleShape`] if there is not one LST per row.
    pub fn to_hadec(&self, lsts_deg: ArrayView1<f64>) -> Result<Self, DelaySpectrumError> {
        if self.coords != PhaseCentreCoords::RaDec {
            return Ok(self.clone());
        }
        if lsts_deg.len() != self.num_snapshots() {
            return Err(DelaySpectrumError::IncompatibleShape {
                argument: "lsts_deg".into(),
                function: "PhaseCentre::to_hadec".into(),
                expected: format!("({},)", self.num_snapshots()),
                received: format!("({},)", lsts_deg.len()),
            });
        }
        let mut values = self.values.clone();
        for (mut row, &lst) in values.outer_iter_mut().zip(lsts_deg.iter()) {
            row[0] = lst - row[0];
        }
        Ok(Self {
            coords: PhaseCentreCoords::HaDec,
            values,
        })
    }

    /// Direction cosines `[nsnap, 3]` in the local (East, North, Up) frame.
    ///
    /// # Errors
    ///
    /// - [`DelaySpectrumError::InvalidCoordinateSystem`] for RA-Dec centres,
    ///   convert with [`PhaseCentre::to_hadec`] first.
    /// - [`DelaySpectrumError::InvalidArgument`] if given direction cosines do
    ///   not describe a unit vector.
    pub fn to_dircos(&self, latitude_rad: f64) -> Result<Array2<f64>, DelaySpectrumError> {
        let nsnap = self.num_snapshots();
        let mut dircos = Array2::zeros((nsnap, 3));
        for (mut out, row) in dircos.outer_iter_mut().zip(self.values.outer_iter()) {
            let [l, m, n] = match self.coords {
                PhaseCentreCoords::HaDec => {
                    let azel = HADec::from_radians(row[0].to_radians(), row[1].to_radians())
                        .to_azel(latitude_rad);
                    altaz_to_dircos(azel.el.to_degrees(), azel.az.to_degrees())
                }
                PhaseCentreCoords::AltAz => altaz_to_dircos(row[0], row[1]),
                PhaseCentreCoords::DirCos => {
                    let (l, m) = (row[0], row[1]);
                    let n = if row.len() == 3 {
                        row[2]
                    } else {
                        let n2 = 1.0 - l * l - m * m;
                        if n2 < -1e-12 {
                            return Err(DelaySpectrumError::InvalidArgument {
                                argument: "values".into(),
                                function: "PhaseCentre::to_dircos".into(),
                                reason: format!("l={l}, m={m} lies outside the unit circle"),
                            });
                        }
                        n2.max(0.0).sqrt()
                    };
                    let norm = (l * l + m * m + n * n).sqrt();
                    if (norm - 1.0).abs() > 1e-6 {
                        return Err(DelaySpectrumError::InvalidArgument {
                            argument: "values".into(),
                            function: "PhaseCentre::to_dircos".into(),
                            reason: format!("|({l}, {m}, {n})| = {norm} is not a unit vector"),
                        });
                    }
                    [l, m, n]
                }
                PhaseCentreCoords::RaDec => {
                    return Err(DelaySpectrumError::InvalidCoordinateSystem {
                        system: self.coords.to_string(),
                        expected: "hadec, altaz, dircos".into(),
                    })
                }
            };
            out[0] = l;
            out[1] = m;
            out[2] = n;
        }
        Ok(dircos)
    }
}

/// Unit vector in the local (East, North, Up) frame for an altitude and
/// azimuth in degrees. Azimuth is measured from North through East.
pub fn altaz_to_dircos(alt_deg: f64, az_deg: f64) -> [f64; 3] {
    let (sin_alt, cos_alt) = alt_deg.to_radians().sin_cos();
    let (sin_az, cos_az) = az_deg.to_radians().sin_cos();
    [cos_alt * sin_az, cos_alt * cos_az, sin_alt]
}

fn check_baselines(baselines: &ArrayView2<f64>, function: &str) -> Result<(), DelaySpectrumError> {
    if baselines.ncols() != 3 || baselines.nrows() == 0 {
        return Err(DelaySpectrumError::IncompatibleShape {
            argument: "baselines".into(),
            function: function.into(),
            expected: "(nbl>0, 3)".into(),
            received: format!("{:?}", baselines.dim()),
        });
    }
    Ok(())
}

/// Delay `-(b . s) / c` \[s\] picked up by a signal from direction `s` on each
/// baseline. Returns `[nsnap, nbl]`.
///
/// # Errors
///
/// - [`DelaySpectrumError::IncompatibleShape`] if `baselines` is not `[nbl, 3]`
///   or `dircos` is not `[nsnap, 3]`.
pub fn geometric_delays(
    baselines: ArrayView2<f64>,
    dircos: ArrayView2<f64>,
) -> Result<Array2<f64>, DelaySpectrumError> {
    check_baselines(&baselines, "geometric_delays")?;
    if dircos.ncols() != 3 {
        return Err(DelaySpectrumError::IncompatibleShape {
            argument: "dircos".into(),
            function: "geometric_delays".into(),
            expected: "(nsnap, 3)".into(),
            received: format!("{:?}", dircos.dim()),
        });
    }
    Ok(dircos.dot(&baselines.t()).mapv(|d| -d / VEL_C))
}

/// Compute the lower and upper delay limits \[s\] of the horizon for every
/// snapshot and baseline.
///
/// Returns `[nsnap, nbl, 2]`, where `[.., 0]` is the lower limit and
/// `[.., 1]` the upper limit. The limits are centred on the delay of the
/// phase centre and are `2 |b| / c` apart.
///
/// # Arguments
///
/// * `baselines` - `[nbl, 3]` baseline vectors in metres (East, North, Up)
/// * `phase_centre` - one direction per snapshot
/// * `latitude_rad` - array latitude, used for HA-Dec centres
///
/// # Errors
///
/// - [`DelaySpectrumError::InvalidCoordinateSystem`] for RA-Dec centres
/// - [`DelaySpectrumError::IncompatibleShape`] for malformed baselines
/// - [`DelaySpectrumError::InvalidArgument`] for non-unit direction cosines
pub fn horizon_delay_limits(
    baselines: ArrayView2<f64>,
    phase_centre: &PhaseCentre,
    latitude_rad: f64,
) -> Result<Array3<f64>, DelaySpectrumError> {
    trace!("start horizon_delay_limits");
    check_baselines(&baselines, "horizon_delay_limits")?;
    let dircos = phase_centre.to_dircos(latitude_rad)?;
    let centres = geometric_delays(baselines, dircos.view())?;
    let half_widths = baselines.map_axis(Axis(1), |b| b.dot(&b).sqrt() / VEL_C);

    let (nsnap, nbl) = centres.dim();
    let limits = Array3::from_shape_fn((nsnap, nbl, 2), |(s, b, side)| {
        if side == 0 {
            centres[[s, b]] - half_widths[b]
        } else {
            centres[[s, b]] + half_widths[b]
        }
    });
    trace!("end horizon_delay_limits");
    Ok(limits)
}

#[cfg(test)]
mod tests {
    use approx::assert_abs_diff_eq;
    use marlu::ndarray::array;

    use super::*;

    #[test]
    fn test_horizon_limits_symmetric_at_zenith() {
        let baselines = array![[14.6, 0.0, 0.0], [-3.0, 40.0, 0.0], [100.0, 100.0, 0.0]];
        let latitude_rad = -26.7_f64.to_radians();
        for centre in [
            PhaseCentre::zenith(2),
            PhaseCentre::fixed(PhaseCentreCoords::HaDec, &[0.0, -26.7], 2).unwrap(),
            PhaseCentre::fixed(PhaseCentreCoords::DirCos, &[0.0, 0.0], 2).unwrap(),
        ] {
            let limits = horizon_delay_limits(baselines.view(), &centre, latitude_rad).unwrap();
            assert_eq!(limits.dim(), (2, 3, 2));
            for s in 0..2 {
                for b in 0..3 {
                    let length = baselines.row(b).dot(&baselines.row(b)).sqrt();
                    assert_abs_diff_eq!(limits[[s, b, 0]], -length / VEL_C, epsilon = 1e-12);
                    assert_abs_diff_eq!(limits[[s, b, 1]], length / VEL_C, epsilon = 1e-12);
                }
            }
        }
    }

    #[test]
    fn test_horizon_limits_shift_with_phase_centre() {
        // phased to the eastern horizon, an east-west baseline sees every
        // delay on one side of zero.
        let baselines = array![[10.0, 0.0, 0.0]];
        let centre = PhaseCentre::fixed(PhaseCentreCoords::AltAz, &[0.0, 90.0], 1).unwrap();
        let limits = horizon_delay_limits(baselines.view(), &centre, 0.0).unwrap();
        assert_abs_diff_eq!(limits[[0, 0, 0]], -20.0 / VEL_C, epsilon = 1e-14);
        assert_abs_diff_eq!(limits[[0, 0, 1]], 0.0, epsilon = 1e-14);
        assert_abs_diff_eq!(
            limits[[0, 0, 1]] - limits[[0, 0, 0]],
            20.0 / VEL_C,
            epsilon = 1e-14
        );
    }

    #[test]
    fn test_radec_needs_lsts() {
        let baselines = array![[10.0, 0.0, 0.0]];
        let centre = PhaseCentre::fixed(PhaseCentreCoords::RaDec, &[30.0, -26.7], 3).unwrap();
        assert!(matches!(
            horizon_delay_limits(baselines.view(), &centre, -26.7_f64.to_radians()),
            Err(DelaySpectrumError::InvalidCoordinateSystem { .. })
        ));

        // source transiting at each lst is at zenith when dec == latitude
        let hadec = centre.to_hadec(array![30.0, 30.0, 30.0].view()).unwrap();
        assert_eq!(hadec.coords, PhaseCentreCoords::HaDec);
        let limits =
            horizon_delay_limits(baselines.view(), &hadec, -26.7_f64.to_radians()).unwrap();
        assert_abs_diff_eq!(limits[[2, 0, 0]], -10.0 / VEL_C, epsilon = 1e-12);
        assert_abs_diff_eq!(limits[[2, 0, 1]], 10.0 / VEL_C, epsilon = 1e-12);
    }

    #[test]
    fn test_unknown_coordinate_tag() {
        assert!(matches!(
            "galactic".parse::<PhaseCentreCoords>(),
            Err(DelaySpectrumError::InvalidCoordinateSystem { .. })
        ));
        assert_eq!(
            "HADEC".parse::<PhaseCentreCoords>().unwrap(),
            PhaseCentreCoords::HaDec
        );
    }

    #[test]
    fn test_bad_shapes() {
        let centre = PhaseCentre::zenith(1);
        let baselines = array![[10.0, 0.0]];
        assert!(matches!(
            horizon_delay_limits(baselines.view(), &centre, 0.0),
            Err(DelaySpectrumError::IncompatibleShape { .. })
        ));
        assert!(matches!(
            PhaseCentre::new(PhaseCentreCoords::HaDec, Array2::zeros((2, 3))),
            Err(DelaySpectrumError::IncompatibleShape { .. })
        ));
    }

    #[test]
    fn test_dircos_outside_unit_circle() {
        let centre = PhaseCentre::fixed(PhaseCentreCoords::DirCos, &[0.9, 0.9], 1).unwrap();
        assert!(matches!(
            centre.to_dircos(0.0),
            Err(DelaySpectrumError::InvalidArgument { .. })
        ));
    }
}
