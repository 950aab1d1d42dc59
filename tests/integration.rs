// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

use delayspec::{
    cli::main_with_args,
    constants::VEL_C,
    io::read_fits_section,
    marlu::{fitsio::FitsFile, ndarray::Axis},
};
use float_cmp::{approx_eq, F64Margin};
use tempfile::tempdir;

#[test]
fn test_zenith_source_is_cleaned_within_horizon() {
    let tmp_dir = tempdir().unwrap();
    let fits_path = tmp_dir.path().join("zenith.fits");

    #[rustfmt::skip]
    let args = vec![
        "delayspec",
        "--baseline", "14.6,0,0",
        "--num-chans", "64",
        "--chan-width", "23.4",
        "--num-snapshots", "2",
        "--noise-rms", "0.01",
        "--seed", "7",
        "--no-draw-progress",
        "-o", fits_path.to_str().unwrap(),
    ];
    assert_eq!(main_with_args(&args), 0);
    assert!(fits_path.exists());

    let mut fptr = FitsFile::open(&fits_path).unwrap();
    let primary = fptr.primary_hdu().unwrap();
    assert_eq!(primary.read_key::<i64>(&mut fptr, "NCHAN").unwrap(), 64);
    assert_eq!(primary.read_key::<i64>(&mut fptr, "NLAGS").unwrap(), 128);
    assert_eq!(primary.read_key::<i64>(&mut fptr, "N_ACC").unwrap(), 2);
    assert!(approx_eq!(
        f64,
        primary.read_key::<f64>(&mut fptr, "DBUFFER").unwrap(),
        1.0,
        F64Margin::default()
    ));
    drop(fptr);

    let lags = read_fits_section(&fits_path, "LAGS").unwrap();
    let limits = read_fits_section(&fits_path, "HORIZON_LIMITS").unwrap();
    assert_eq!(limits.shape(), &[2, 1, 2]);
    // horizon of a zenith phase centre is symmetric about zero delay
    let horizon = 14.6 / VEL_C;
    assert!(approx_eq!(f64, limits[[0, 0, 0]], -horizon, epsilon = 1e-15));
    assert!(approx_eq!(f64, limits[[0, 0, 1]], horizon, epsilon = 1e-15));

    let bandwidth = 64.0 * 23.4e3;
    let window = lags.mapv(|lag| lag.abs() <= horizon + 1.0 / bandwidth);
    let power = |name: &str| {
        let re = read_fits_section(&fits_path, &format!("{name}_REAL")).unwrap();
        let im = read_fits_section(&fits_path, &format!("{name}_IMAG")).unwrap();
        (0..2)
            .map(|snap| {
                let re = re.index_axis(Axis(2), snap);
                let im = im.index_axis(Axis(2), snap);
                re.iter()
                    .zip(im.iter())
                    .zip(window.iter())
                    .filter(|(_, inside)| **inside)
                    .map(|((r, i), _)| r * r + i * i)
                    .sum::<f64>()
            })
            .collect::<Vec<_>>()
    };
    let data = power("VIS_LAG");
    let residual = power("VIS_RES_LAG");
    for snap in 0..2 {
        assert!(1.0 - residual[snap] / data[snap] >= 0.9);
    }
}

#[test]
fn test_blackman_window_chunked() {
    let tmp_dir = tempdir().unwrap();
    let whole_path = tmp_dir.path().join("whole.fits");
    let chunked_path = tmp_dir.path().join("chunked.fits");

    #[rustfmt::skip]
    let base = vec![
        "delayspec",
        "--baseline", "14.6,0,0",
        "--baseline", "20,-20,0",
        "--num-chans", "32",
        "--num-snapshots", "3",
        "--source", "0,-26.7,5,-0.8",
        "--source", "10,-40,2",
        "--window", "blackman",
        "--tsys", "300",
        "--no-draw-progress",
    ];
    let mut whole = base.clone();
    whole.extend_from_slice(&["-o", whole_path.to_str().unwrap()]);
    assert_eq!(main_with_args(&whole), 0);

    // fifteen padded product cubes for all snapshots, plus three working
    // cubes for one snapshot at a time
    let cube = 2 * 64 * 16;
    let one_snapshot = (15 * cube * 3 + 3 * cube).to_string();
    let mut chunked = base.clone();
    chunked.extend_from_slice(&[
        "--max-memory",
        one_snapshot.as_str(),
        "-o",
        chunked_path.to_str().unwrap(),
    ]);
    assert_eq!(main_with_args(&chunked), 0);

    for name in ["VIS_CC_LAG_REAL", "VIS_RES_FREQ_IMAG", "SKYVIS_NET_FREQ_REAL"] {
        let a = read_fits_section(&whole_path, name).unwrap();
        let b = read_fits_section(&chunked_path, name).unwrap();
        assert_eq!(a.shape(), &[2, 64, 3]);
        assert_eq!(a, b, "{name}");
    }

    let weights = read_fits_section(&whole_path, "BANDPASS_WEIGHTS").unwrap();
    assert_eq!(weights.shape(), &[2, 32, 3]);
    assert!(approx_eq!(f64, weights[[0, 0, 0]], 0.0, epsilon = 1e-12));
    assert!(weights[[1, 16, 2]] > 0.9);
}

#[test]
fn test_too_little_memory_fails() {
    let tmp_dir = tempdir().unwrap();
    let fits_path = tmp_dir.path().join("nope.fits");
    #[rustfmt::skip]
    let args = vec![
        "delayspec",
        "--num-chans", "32",
        "--max-memory", "100",
        "--no-draw-progress",
        "-o", fits_path.to_str().unwrap(),
    ];
    assert_eq!(main_with_args(&args), 1);
    assert!(!fits_path.exists());
}
