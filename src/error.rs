// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Error type for all linerad-related errors. This should be the *only*
//! error enum that is publicly visible from the crate root.

use thiserror::Error;

use crate::continuum::ContinuumError;
use crate::grid::GridError;
use crate::moldata::MolDataError;
use crate::params::ConfigError;
use crate::raytrace::RaytraceError;
use crate::snapshot::SnapshotError;
use crate::solve::SolveError;

/// The *only* publicly visible error from linerad, grouped by what the user
/// can act on.
#[derive(Error, Debug)]
pub enum LineradError {
    /// Contradictory or missing configuration; fatal at startup.
    #[error("{0}")]
    Config(String),

    /// Molecular catalogue or dust table trouble.
    #[error("{0}")]
    Catalogue(String),

    /// Tessellation or grid-traversal trouble; never silently retried.
    #[error("{0}")]
    Geometry(String),

    /// NaN populations, singular rate matrices and friends.
    #[error("{0}")]
    Numeric(String),

    /// Grid snapshot reading/writing.
    #[error("{0}")]
    Snapshot(String),

    /// Image raytracing.
    #[error("{0}")]
    Image(String),

    /// A generic error that can't be clarified further, e.g. plain IO.
    #[error("{0}")]
    Generic(String),
}

// When changing the error propagation below, ensure `Self::from(e)` uses the
// correct `e`!

impl From<ConfigError> for LineradError {
    fn from(e: ConfigError) -> Self {
        let s = e.to_string();
        match e {
            ConfigError::Io(_) => Self::Generic(s),
            _ => Self::Config(s),
        }
    }
}

impl From<MolDataError> for LineradError {
    fn from(e: MolDataError) -> Self {
        let s = e.to_string();
        match e {
            MolDataError::Io(_) => Self::Generic(s),
            _ => Self::Catalogue(s),
        }
    }
}

impl From<ContinuumError> for LineradError {
    fn from(e: ContinuumError) -> Self {
        let s = e.to_string();
        match e {
            ContinuumError::Io(_) => Self::Generic(s),
            _ => Self::Catalogue(s),
        }
    }
}

impl From<GridError> for LineradError {
    fn from(e: GridError) -> Self {
        Self::Geometry(e.to_string())
    }
}

impl From<SnapshotError> for LineradError {
    fn from(e: SnapshotError) -> Self {
        let s = e.to_string();
        match e {
            SnapshotError::Grid(_) => Self::Geometry(s),
            SnapshotError::Io(_) => Self::Generic(s),
            _ => Self::Snapshot(s),
        }
    }
}

impl From<SolveError> for LineradError {
    fn from(e: SolveError) -> Self {
        let s = e.to_string();
        match e {
            SolveError::Grid(_) => Self::Geometry(s),
            _ => Self::Numeric(s),
        }
    }
}

impl From<RaytraceError> for LineradError {
    fn from(e: RaytraceError) -> Self {
        let s = e.to_string();
        match e {
            RaytraceError::Grid(_) => Self::Geometry(s),
            _ => Self::Image(s),
        }
    }
}
