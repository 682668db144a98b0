// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

use std::path::PathBuf;

use thiserror::Error;

/// Errors associated with reading molecular data catalogues.
#[derive(Error, Debug)]
pub enum MolDataError {
    #[error("Could not open molecular data file {0}")]
    BadFile(PathBuf),

    #[error("{file}: line {line_num}: could not parse '{string}' as a number")]
    ParseFloat {
        file: String,
        line_num: usize,
        string: String,
    },

    #[error("{file}: line {line_num}: could not parse '{string}' as an integer")]
    ParseInt {
        file: String,
        line_num: usize,
        string: String,
    },

    #[error("{file}: line {line_num}: expected {expected} fields, found {found}")]
    ShortLine {
        file: String,
        line_num: usize,
        expected: usize,
        found: usize,
    },

    #[error("{file}: file ended before the {section} section was complete")]
    Truncated { file: String, section: &'static str },

    #[error("{file}: transition {trans} references level {level}, but only {nlev} levels were declared")]
    BadLevelIndex {
        file: String,
        trans: usize,
        level: usize,
        nlev: usize,
    },

    #[error("{file}: collision partner {partner}: temperature grid is not strictly increasing")]
    BadTemperatureGrid { file: String, partner: usize },

    #[error("{file}: a species needs at least two levels and one radiative transition")]
    TooSmall { file: String },

    #[error(transparent)]
    Io(#[from] std::io::Error),
}
