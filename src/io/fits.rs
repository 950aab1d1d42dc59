// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Write cleaned delay spectra to FITS, one image HDU per named section.

use std::path::Path;

use log::{debug, trace};

use super::error::IOError::{self, FitsIO, FitsOpen};
use crate::{
    delay_spectrum::DelaySpectrum,
    marlu::{
        fitsio::{
            hdu::HduInfo,
            images::{ImageDescription, ImageType},
            FitsFile,
        },
        ndarray::{ArrayD, IxDyn},
    },
};

/// Write the products of the last [`DelaySpectrum::clean`] to `path`,
/// replacing any existing file.
///
/// The primary HDU carries `NCHAN`, `NLAGS`, `FREQRES`, `N_ACC`, `PAD` and
/// `DBUFFER` keys and a comment with the settings used. Every entry of
/// [`DelaySpectrum::sections`] follows as a double precision image whose
/// `EXTNAME` is the section name.
///
/// # Errors
///
/// - [`IOError::DelaySpectrum`] if the clean products are missing or stale.
/// - [`IOError::FitsOpen`] / [`IOError::FitsIO`] if cfitsio fails.
pub fn write_delay_spectrum_fits<P: AsRef<Path>>(
    path: P,
    spectrum: &DelaySpectrum,
) -> Result<(), IOError> {
    trace!("start write_delay_spectrum_fits");
    let products = spectrum.clean_products()?;
    let sections = spectrum.sections()?;
    let fits_filename = path.as_ref().display().to_string();

    let mut fptr = FitsFile::create(path.as_ref())
        .overwrite()
        .open()
        .map_err(|fits_error| FitsOpen {
            fits_error,
            fits_filename: fits_filename.clone(),
            source_file: file!(),
            source_line: line!(),
        })?;

    let wrap = |hdu_description: &str| {
        let fits_filename = fits_filename.clone();
        let hdu_description = hdu_description.to_string();
        move |fits_error| FitsIO {
            fits_error,
            fits_filename,
            hdu_description,
            source_file: file!(),
            source_line: line!(),
        }
    };

    let primary = fptr.primary_hdu().map_err(wrap("PRIMARY"))?;
    let info = &products.info;
    for (key, value) in [
        ("NCHAN", info.nchan as i64),
        ("NLAGS", info.nlags_padded as i64),
        ("N_ACC", spectrum.array().n_acc() as i64),
    ] {
        primary.write_key(&mut fptr, key, value).map_err(wrap("PRIMARY"))?;
    }
    for (key, value) in [
        ("FREQRES", info.freq_res_hz),
        ("PAD", info.pad),
        ("DBUFFER", products.config.clean_window_buffer),
    ] {
        primary.write_key(&mut fptr, key, value).map_err(wrap("PRIMARY"))?;
    }
    primary
        .write_key(&mut fptr, "ORIGIN", "delayspec")
        .map_err(wrap("PRIMARY"))?;
    primary
        .write_key(&mut fptr, "COMMENT", products.config.as_comment().as_str())
        .map_err(wrap("PRIMARY"))?;

    for (name, data) in &sections {
        debug!("writing {name} {:?}", data.shape());
        let description = ImageDescription {
            data_type: ImageType::Double,
            dimensions: data.shape(),
        };
        let hdu = fptr
            .create_image(name.as_str(), &description)
            .map_err(wrap(name))?;
        let pixels = data.iter().copied().collect::<Vec<f64>>();
        hdu.write_image(&mut fptr, &pixels).map_err(wrap(name))?;
    }
    trace!("end write_delay_spectrum_fits");
    Ok(())
}

/// Read the section called `name` back from a file written by
/// [`write_delay_spectrum_fits`].
///
/// # Errors
///
/// - [`IOError::FitsOpen`] if the file can't be opened.
/// - [`IOError::FitsIO`] if there is no such HDU or it can't be read.
/// - [`IOError::NotImage`] / [`IOError::ImageShape`] for a malformed HDU.
pub fn read_fits_section<P: AsRef<Path>>(path: P, name: &str) -> Result<ArrayD<f64>, IOError> {
    let fits_filename = path.as_ref().display().to_string();
    let mut fptr = FitsFile::open(path.as_ref()).map_err(|fits_error| FitsOpen {
        fits_error,
        fits_filename: fits_filename.clone(),
        source_file: file!(),
        source_line: line!(),
    })?;
    let wrap = |fits_error| FitsIO {
        fits_error,
        fits_filename: fits_filename.clone(),
        hdu_description: name.to_string(),
        source_file: file!(),
        source_line: line!(),
    };
    let hdu = fptr.hdu(name).map_err(wrap)?;
    let shape = match &hdu.info {
        HduInfo::ImageInfo { shape, .. } => shape.clone(),
        _ => {
            return Err(IOError::NotImage {
                fits_filename,
                hdu_description: name.to_string(),
            })
        }
    };
    let pixels: Vec<f64> = hdu.read_image(&mut fptr).map_err(wrap)?;
    let found = pixels.len();
    ArrayD::from_shape_vec(IxDyn(&shape), pixels).map_err(|_| IOError::ImageShape {
        fits_filename,
        hdu_description: name.to_string(),
        expected: shape.iter().product(),
        shape,
        found,
    })
}

#[cfg(test)]
mod tests {
    use approx::assert_abs_diff_eq;
    use tempfile::tempdir;

    use super::*;
    use crate::{config::DelaySpectrumConfig, test_common::get_test_array};

    #[test]
    fn test_write_read_sections() {
        let mut spectrum = DelaySpectrum::new(get_test_array(2, 16, 3));
        spectrum.clean(&DelaySpectrumConfig::default()).unwrap();

        let tmp_dir = tempdir().unwrap();
        let path = tmp_dir.path().join("delay_spectrum.fits");
        write_delay_spectrum_fits(&path, &spectrum).unwrap();

        let mut fptr = FitsFile::open(&path).unwrap();
        let primary = fptr.primary_hdu().unwrap();
        assert_eq!(primary.read_key::<i64>(&mut fptr, "NCHAN").unwrap(), 16);
        assert_eq!(primary.read_key::<i64>(&mut fptr, "NLAGS").unwrap(), 32);
        assert_eq!(primary.read_key::<i64>(&mut fptr, "N_ACC").unwrap(), 3);
        assert_abs_diff_eq!(
            primary.read_key::<f64>(&mut fptr, "FREQRES").unwrap(),
            40e3,
            epsilon = 1e-6
        );
        assert_abs_diff_eq!(primary.read_key::<f64>(&mut fptr, "PAD").unwrap(), 1.0);
        drop(fptr);

        for (name, expected) in spectrum.sections().unwrap() {
            let read = read_fits_section(&path, &name).unwrap();
            assert_eq!(read.shape(), expected.shape(), "{name}");
            for (a, b) in read.iter().zip(expected.iter()) {
                assert_abs_diff_eq!(a, b, epsilon = 1e-12);
            }
        }
        assert!(matches!(
            read_fits_section(&path, "NOT_A_SECTION"),
            Err(IOError::FitsIO { .. })
        ));
    }

    #[test]
    fn test_write_refuses_stale_products() {
        let mut spectrum = DelaySpectrum::new(get_test_array(1, 8, 1));
        let tmp_dir = tempdir().unwrap();
        let path = tmp_dir.path().join("missing.fits");
        assert!(matches!(
            write_delay_spectrum_fits(&path, &spectrum),
            Err(IOError::DelaySpectrum(_))
        ));
        assert!(!path.exists());

        spectrum.clean(&DelaySpectrumConfig::default()).unwrap();
        let (nbl, nchan, nsnap) = spectrum.array().dims();
        spectrum
            .add_noise(crate::simulate::generate_noise((nbl, nchan, nsnap), 0.1, 1).unwrap())
            .unwrap();
        assert!(matches!(
            write_delay_spectrum_fits(&path, &spectrum),
            Err(IOError::DelaySpectrum(_))
        ));
    }

    #[test]
    fn test_read_missing_file() {
        let tmp_dir = tempdir().unwrap();
        assert!(matches!(
            read_fits_section(tmp_dir.path().join("nope.fits"), "LAGS"),
            Err(IOError::FitsOpen { .. })
        ));
    }
}
