// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

use thiserror::Error;

use crate::grid::GridError;

/// Errors associated with raytracing an image.
#[derive(Error, Debug)]
pub enum RaytraceError {
    #[error("Image requests transition {trans} of {mol}, which has only {nline} lines")]
    BadTransition {
        mol: String,
        trans: usize,
        nline: usize,
    },

    #[error("A continuum image needs a dust opacity table")]
    NoDustOpacity,

    #[error(transparent)]
    Grid(#[from] GridError),
}
