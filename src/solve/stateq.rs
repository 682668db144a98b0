// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

/*!
Statistical equilibrium at one vertex.

Given the mean intensities from the photon engine, the rate matrix combines
radiative transitions (Einstein A, B times `jbar`) with density-weighted
collisional transitions (downward rates splined at the kinetic temperature,
upward rates from detailed balance). Column sums vanish by construction;
one row is replaced by the closure condition that populations sum to one,
and the system is solved by LU decomposition with partial pivoting. The
solution is clipped to `[MINPOP, 1]` and renormalised.
 */

use nalgebra::{DMatrix, DVector};

use super::error::SolveError;
use crate::constants::MINPOP;
use crate::grid::Vertex;
use crate::moldata::MolData;

/// Solve one vertex/species system. `jbar` is normalised (the photon
/// engine's units); `pops` holds the previous pass's populations on entry
/// and the new ones on exit. Returns the maximum fractional change.
pub fn stateq(
    vertex: &Vertex,
    ispec: usize,
    mol: &MolData,
    jbar: &[f64],
    pops: &mut [f64],
) -> Result<f64, SolveError> {
    let n = mol.nlev;
    debug_assert_eq!(pops.len(), n);
    let mut w: DMatrix<f64> = DMatrix::zeros(n, n);

    // Radiative rates. jbar is de-normalised here, once.
    for iline in 0..mol.nline {
        let u = mol.lau[iline];
        let l = mol.lal[iline];
        let j = jbar[iline] * mol.norm;
        let down = mol.aeinst[iline] + mol.beinstu[iline] * j;
        let up = mol.beinstl[iline] * j;
        w[(l, u)] += down;
        w[(u, u)] -= down;
        w[(u, l)] += up;
        w[(l, l)] -= up;
    }

    // Collisional rates, weighted by the partner densities. Partners beyond
    // the model's density components reuse its last component.
    let ndens = vertex.dens.len();
    for ipart in 0..mol.partners.len() {
        let dens = vertex.dens[ipart.min(ndens - 1)];
        if dens <= 0.0 {
            continue;
        }
        let partner = &mol.partners[ipart];
        for itrans in 0..partner.lcu.len() {
            let (down, up) = mol.coll_rates(ipart, itrans, vertex.t[0]);
            let u = partner.lcu[itrans];
            let l = partner.lcl[itrans];
            w[(l, u)] += dens * down;
            w[(u, u)] -= dens * down;
            w[(u, l)] += dens * up;
            w[(l, l)] -= dens * up;
        }
    }

    // Closure: populations sum to one.
    let mut rhs = DVector::zeros(n);
    for col in 0..n {
        w[(n - 1, col)] = 1.0;
    }
    rhs[n - 1] = 1.0;

    let solution = w.lu().solve(&rhs).ok_or(SolveError::SingularRateMatrix {
        vertex: vertex.id,
        species: ispec,
    })?;

    // Clip, renormalise, and measure the change.
    let mut clipped = Vec::with_capacity(n);
    let mut sum = 0.0;
    for &x in solution.iter() {
        if !x.is_finite() {
            return Err(SolveError::NonFinitePopulations {
                vertex: vertex.id,
                species: ispec,
            });
        }
        let x = x.clamp(MINPOP, 1.0);
        clipped.push(x);
        sum += x;
    }

    let mut max_frac = 0.0f64;
    for (old, &new) in pops.iter_mut().zip(&clipped) {
        let new = new / sum;
        let frac = (new - *old).abs() / old.max(MINPOP);
        max_frac = max_frac.max(frac);
        *old = new;
    }
    Ok(max_frac)
}
