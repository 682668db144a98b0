// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! LTE initialisation: Boltzmann populations at the local kinetic
//! temperature, used as the iterative solver's starting guess or returned
//! directly in LTE-only mode.

use ndarray::Array2;

use super::Populations;
use crate::grid::Grid;
use crate::moldata::MolData;

impl Populations {
    /// Boltzmann populations at every vertex's kinetic temperature. Sink
    /// vertices carry populations too; their vanishing molecular density is
    /// what keeps them out of the transfer.
    pub fn lte(grid: &Grid, mols: &[MolData]) -> Populations {
        let nvert = grid.vertices.len();
        let species = mols
            .iter()
            .map(|mol| {
                let mut arr = Array2::zeros((nvert, mol.nlev));
                let mut row = vec![0.0; mol.nlev];
                for (iv, v) in grid.vertices.iter().enumerate() {
                    mol.boltzmann(v.t[0].max(f64::MIN_POSITIVE), &mut row);
                    for (il, &p) in row.iter().enumerate() {
                        arr[[iv, il]] = p;
                    }
                }
                arr
            })
            .collect();
        Populations { species }
    }
}
