// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

use thiserror::Error;

use crate::grid::GridError;

/// Errors associated with reading or writing grid snapshots.
#[derive(Error, Debug)]
pub enum SnapshotError {
    #[error("Not a grid snapshot (bad magic)")]
    BadMagic,

    #[error("Unsupported snapshot version {0}")]
    BadVersion(u16),

    #[error("The snapshot carries stage mask {got:#06x}, but {needed:#06x} is required")]
    MissingStage { got: u16, needed: u16 },

    #[error("The snapshot does not match the configuration: {0}")]
    Mismatch(String),

    #[error("Snapshot is corrupt: {0}")]
    Corrupt(String),

    #[error(transparent)]
    Grid(#[from] GridError),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}
