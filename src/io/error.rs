// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Errors that can occur in the io module

use thiserror::Error;

use crate::{marlu::fitsio, DelaySpectrumError};

#[derive(Error, Debug)]
#[allow(clippy::upper_case_acronyms)]
/// All the errors that can occur in file io operations
pub enum IOError {
    /// Error when opening or creating a fits file.
    #[error("{source_file}:{source_line}\nCouldn't open {fits_filename}: {fits_error}")]
    FitsOpen {
        /// The [`fitsio::errors::Error`]
        fits_error: fitsio::errors::Error,
        /// The filename of the fits file
        fits_filename: String,
        /// The file where the error originated (usually `file!()`)
        source_file: &'static str,
        /// The line number where the error originated (usually `line!()`)
        source_line: u32,
    },

    /// A generic error associated with the fitsio crate.
    #[error("{source_file}:{source_line}\n{fits_filename} HDU {hdu_description}: {fits_error}")]
    FitsIO {
        /// The [`fitsio::errors::Error`]
        fits_error: fitsio::errors::Error,
        /// The filename of the fits file where the error occurred
        fits_filename: String,
        /// The name or number of the HDU where the error occurred
        hdu_description: String,
        /// The file where the error originated (usually `file!()`)
        source_file: &'static str,
        /// The line number where the error originated (usually `line!()`)
        source_line: u32,
    },

    /// An HDU that should hold an image holds a table.
    #[error("{fits_filename} HDU {hdu_description} is not an image")]
    NotImage {
        /// The filename of the fits file
        fits_filename: String,
        /// The name of the HDU
        hdu_description: String,
    },

    /// The pixels of an image do not fill its declared shape.
    #[error("{fits_filename} HDU {hdu_description} has {found} values, its shape {shape:?} needs {expected}")]
    ImageShape {
        /// The filename of the fits file
        fits_filename: String,
        /// The name of the HDU
        hdu_description: String,
        /// The declared shape
        shape: Vec<usize>,
        /// The number of values the shape needs
        expected: usize,
        /// The number of values read
        found: usize,
    },

    #[error(transparent)]
    /// The products to write could not be assembled
    DelaySpectrum(#[from] DelaySpectrumError),
}
