// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

use thiserror::Error;

use crate::grid::GridError;

/// Errors associated with the level-population solve. The numeric kinds are
/// fatal and carry the offending vertex id.
#[derive(Error, Debug)]
pub enum SolveError {
    #[error("The rate matrix for vertex {vertex}, species {species} is singular")]
    SingularRateMatrix { vertex: usize, species: usize },

    #[error("Non-finite populations at vertex {vertex}, species {species}")]
    NonFinitePopulations { vertex: usize, species: usize },

    #[error("A solver worker disappeared without reporting its vertices")]
    WorkerLost,

    #[error(transparent)]
    Grid(#[from] GridError),
}
