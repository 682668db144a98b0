// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Line blends.
//!
//! Two lines of a species whose rest frequencies sit closer than `BLENDMASK`
//! (in velocity units) share photons: when blending is enabled, evaluating
//! either line's opacity and emissivity at some velocity also picks up the
//! partner line, shifted by the inter-line velocity offset. The table is
//! computed once per run, never per pass.

use log::info;

use crate::constants::{BLENDMASK, CLIGHT};
use crate::moldata::MolData;

/// `table[ispec][iline]` lists `(partner_line, deltav)` pairs: a photon at
/// velocity `v` relative to `iline` sits at `v + deltav` relative to the
/// partner.
pub type BlendTable = Vec<Vec<Vec<(usize, f64)>>>;

/// Scan every species for blended line pairs.
pub fn line_blends(mols: &[MolData]) -> BlendTable {
    let mut table = Vec::with_capacity(mols.len());
    let mut n_blends = 0usize;
    for mol in mols {
        let mut per_line = vec![Vec::new(); mol.nline];
        for i in 0..mol.nline {
            for j in 0..mol.nline {
                if i == j {
                    continue;
                }
                let deltav = (mol.freq[j] - mol.freq[i]) * CLIGHT / mol.freq[j];
                if deltav.abs() < BLENDMASK {
                    per_line[i].push((j, deltav));
                    n_blends += 1;
                }
            }
        }
        table.push(per_line);
    }
    if n_blends > 0 {
        // Pairs are counted once per direction.
        info!("Line blending: {} blended line pairs", n_blends / 2);
    }
    table
}
