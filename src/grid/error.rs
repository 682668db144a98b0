// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

use thiserror::Error;

/// Errors associated with building or traversing the grid. All of these are
/// fatal: a rejected or degenerate tessellation is never silently retried,
/// because a retry with different random points would bias the mesh.
#[derive(Error, Debug)]
pub enum GridError {
    #[error("Point sampling stalled: {accepted}/{wanted} interior points accepted after {attempts} draws; the acceptance function may be zero almost everywhere, or minScale too large for this many points")]
    SamplingStalled {
        accepted: usize,
        wanted: usize,
        attempts: usize,
    },

    #[error("Delaunay tessellation failed: {0}")]
    TessellationFailed(String),

    #[error("Tessellation produced a degenerate simplex (cell {cell}, volume {volume:e})")]
    DegenerateSimplex { cell: usize, volume: f64 },

    #[error("Vertex {0} has no neighbours; the tessellation is inconsistent")]
    IsolatedVertex(usize),

    #[error("Cell walk failed to terminate while locating a point")]
    WalkStuck,

    #[error("The grid is at data stage {got:#06x} but {needed:#06x} is required for this operation")]
    IncompleteStage { got: u16, needed: u16 },
}
