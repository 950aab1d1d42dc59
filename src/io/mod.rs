// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Persistence of delay spectrum products

pub mod error;
pub mod fits;

pub use fits::{read_fits_section, write_delay_spectrum_fits};
