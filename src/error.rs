// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Errors that can occur in delayspec

use thiserror::Error;

use crate::{io::error::IOError, simulate::SimulationError};

#[derive(Error, Debug, Clone)]
#[allow(clippy::upper_case_acronyms)]
/// All the errors that can occur while transforming and deconvolving delay spectra
pub enum DelaySpectrumError {
    /// An argument is outside of its valid domain
    #[error("bad argument {argument} to {function}: {reason}")]
    InvalidArgument {
        /// The argument name
        argument: String,
        /// The function name
        function: String,
        /// Why the value was rejected
        reason: String,
    },

    /// The data handed to a function can not be processed (e.g. NaN where
    /// numbers are required)
    #[error("invalid input to {function}: {reason}")]
    InvalidInput {
        /// The function name
        function: String,
        /// What was wrong with the data
        reason: String,
    },

    /// Error for bad array shape in provided argument
    #[error("bad array shape supplied to argument {argument} of function {function}. expected {expected}, received {received}")]
    IncompatibleShape {
        /// The argument name within the funciton
        argument: String,
        /// The function name
        function: String,
        /// The expected shape
        expected: String,
        /// The shape that was received instead
        received: String,
    },

    /// A flat list of weights matches more than one of the supported shapes
    #[error("{size} values for {argument} could be any of {candidates}, pass an explicit shape")]
    AmbiguousWeightShape {
        /// The argument name
        argument: String,
        /// How many values were supplied
        size: usize,
        /// The shapes that have this number of elements
        candidates: String,
    },

    /// Coordinate system tag that this crate does not know how to handle
    #[error("invalid coordinate system {system}, expected one of {expected}")]
    InvalidCoordinateSystem {
        /// The tag that was received
        system: String,
        /// The accepted tags
        expected: String,
    },

    /// The CLEAN kernel has no power to deconvolve with
    #[error("degenerate point spread function: {reason}")]
    DegeneratePSF {
        /// What made the kernel unusable
        reason: String,
    },

    /// Delay products were derived from frequency-domain data that has since changed
    #[error("{product} are stale, the frequency-domain visibilities changed after they were computed. Re-run {remedy}")]
    StaleDelayProducts {
        /// Which products were requested
        product: String,
        /// What to call to refresh them
        remedy: String,
    },

    /// Delay products were requested before they were computed
    #[error("{product} have not been computed yet. Run {remedy} first")]
    MissingDelayProducts {
        /// Which products were requested
        product: String,
        /// What to call to compute them
        remedy: String,
    },
}

/// An enum of all the errors possible when parsing command line arguments
#[derive(Error, Debug)]
pub enum CLIError {
    /// When a bad CLI argument is provided
    #[error("Invalid Command Line Argument <{option}> expected {expected}. received {received}")]
    InvalidCommandLineArgument {
        /// The argument name
        option: String,
        /// Description of the expected value
        expected: String,
        /// The value that was received
        received: String,
    },
    /// When a required CLI argument is not provided
    #[error("Missing Command Line Argument <{option}>")]
    MissingCommandLineArgument {
        /// The argument name
        option: String,
    },
}

/// Errors that can surface at the top level of a delayspec run
#[derive(Error, Debug)]
#[allow(clippy::upper_case_acronyms)]
pub enum AppError {
    /// Error derived from [`DelaySpectrumError`]
    #[error(transparent)]
    DelaySpectrum(#[from] DelaySpectrumError),

    /// Error derived from [`SimulationError`]
    #[error(transparent)]
    Simulation(#[from] SimulationError),

    /// Error derived from [`IOError`]
    #[error(transparent)]
    IO(#[from] IOError),

    /// Error derived from [`CLIError`]
    #[error(transparent)]
    CLIError(#[from] CLIError),

    /// Error derived from [`clap::Error`]
    #[cfg(feature = "cli")]
    #[error(transparent)]
    ClapError(#[from] clap::Error),

    /// The user asked for a summary only
    #[error("Dry run")]
    DryRun {},
}
