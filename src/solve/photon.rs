// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

/*!
Stochastic photon transport.

For one vertex and one pass, `photon_pass` fires the vertex's photon budget
of trajectories. Each picks a direction by importance sampling over the
neighbour cones and a velocity offset uniform across the local line profile,
then marches outward through the tessellation edge by edge until it reaches
the boundary. Along the way it accumulates, per line, the attenuated source
contribution of every traversed segment (line plus dust continuum), with the
velocity along each segment taken from the edge's quartic polynomial at
`N_RAN_PER_SEGMENT` random arc lengths. The cosmic background enters at the
boundary, attenuated by the full accumulated opacity.

The profile-weighted average over trajectories becomes `jbar`. Everything is
written into a per-worker scratch block; the grid and the population
snapshot are only read. Intensities are in the species' normalised units.
 */

use rand::Rng;

use super::blend::BlendTable;
use super::Populations;
use crate::constants::{EPS, HPIP, N_RAN_PER_SEGMENT, VEL_SAMPLE_RANGE};
use crate::continuum::Continuum;
use crate::grid::{velocoeffs, Grid};
use crate::math::{calc_source_fn, fast_exp, gaussline};
use crate::moldata::MolData;

/// Per-worker scratch: mean intensities, per-trajectory accumulators and
/// profile weights. Allocated once per worker, reused for every vertex.
pub struct WorkerScratch {
    /// `jbar[ispec][iline]`, normalised.
    pub jbar: Vec<Vec<f64>>,
    /// `phot[ispec][iline * max_phot + iphot]`: intensity gathered by one
    /// trajectory for one line.
    phot: Vec<Vec<f64>>,
    /// `vfac[ispec][iphot]`: the trajectory's profile weight at the vertex.
    vfac: Vec<Vec<f64>>,
    /// Running optical depth per line along the current trajectory.
    tau: Vec<Vec<f64>>,
    max_phot: usize,
}

impl WorkerScratch {
    pub fn new(mols: &[MolData], max_phot: usize) -> WorkerScratch {
        WorkerScratch {
            jbar: mols.iter().map(|m| vec![0.0; m.nline]).collect(),
            phot: mols.iter().map(|m| vec![0.0; m.nline * max_phot]).collect(),
            vfac: mols.iter().map(|_| vec![0.0; max_phot]).collect(),
            tau: mols.iter().map(|m| vec![0.0; m.nline]).collect(),
            max_phot,
        }
    }
}

/// Line opacity and emissivity of vertex `here` for species `ispec`, line
/// `iline`, at profile factor `vfac` (dimensionless).
#[inline]
fn line_jnu_alpha(
    mol: &MolData,
    pops: &Populations,
    ispec: usize,
    here: usize,
    nmol: f64,
    binv: f64,
    vfac: f64,
    iline: usize,
) -> (f64, f64) {
    let u = mol.lau[iline];
    let l = mol.lal[iline];
    let pop_u = pops.species[ispec][[here, u]];
    let pop_l = pops.species[ispec][[here, l]];
    let common = HPIP * vfac * binv * nmol;
    let jnu = common * pop_u * mol.aeinst[iline];
    let alpha = common * (pop_l * mol.beinstl[iline] - pop_u * mol.beinstu[iline]);
    (jnu, alpha)
}

/// Run one vertex's photon batch and leave `jbar` in the scratch block.
#[allow(clippy::too_many_arguments)]
pub fn photon_pass<R: Rng>(
    grid: &Grid,
    pops: &Populations,
    mols: &[MolData],
    cont: &Continuum,
    blends: Option<&BlendTable>,
    taylor_cutoff: f64,
    vertex: usize,
    rng: &mut R,
    scratch: &mut WorkerScratch,
) {
    let nphot = grid.vertices[vertex].nphot.min(scratch.max_phot);
    let origin = &grid.vertices[vertex];
    // A trajectory that keeps finding forward-pointing neighbours must leave
    // the finite volume; this cap only guards against degenerate meshes.
    let max_steps = 4 * grid.vertices.len();

    for (ispec, mol) in mols.iter().enumerate() {
        scratch.jbar[ispec].iter_mut().for_each(|x| *x = 0.0);
        scratch.phot[ispec][..mol.nline * nphot]
            .iter_mut()
            .for_each(|x| *x = 0.0);
    }

    let mut seg_vels = [0.0; N_RAN_PER_SEGMENT];

    for iphot in 0..nphot {
        let (_, dir) = grid.sample_direction(vertex, rng);
        // Velocity offset of this photon relative to the local systemic
        // velocity, sampled uniformly across the line profile.
        let vel_offset = VEL_SAMPLE_RANGE * origin.dopb * (rng.gen::<f64>() - 0.5);
        let deltav = vel_offset + velocoeffs::veloproject(&dir, &origin.vel);

        for (ispec, _) in mols.iter().enumerate() {
            scratch.vfac[ispec][iphot] = gaussline(vel_offset, origin.binv[ispec]);
            scratch.tau[ispec].iter_mut().for_each(|x| *x = 0.0);
        }

        let mut here = vertex;
        let mut steps = 0;
        loop {
            let vh = &grid.vertices[here];
            if vh.sink || steps >= max_steps {
                // The boundary: only the cosmic background comes in.
                for (ispec, mol) in mols.iter().enumerate() {
                    for iline in 0..mol.nline {
                        scratch.phot[ispec][iline * nphot + iphot] +=
                            fast_exp(scratch.tau[ispec][iline]) * mol.cmb[iline];
                    }
                }
                break;
            }
            steps += 1;

            // March along the best-aligned edge.
            let mut k = 0;
            let mut best_dot = f64::NEG_INFINITY;
            for (i, d) in vh.dir.iter().enumerate() {
                let dot = d.dot(&dir);
                if dot > best_dot {
                    best_dot = dot;
                    k = i;
                }
            }
            let ds_eff = vh.ds[k] * best_dot.max(0.0);
            for vel in seg_vels.iter_mut() {
                *vel = velocoeffs::eval(&vh.acoeffs[k], rng.gen::<f64>());
            }

            for (ispec, mol) in mols.iter().enumerate() {
                let binv = vh.binv[ispec];
                let nmol = vh.nmol[ispec];
                let mut vfac = 0.0;
                for &vel in &seg_vels {
                    vfac += gaussline(deltav - vel, binv);
                }
                vfac /= N_RAN_PER_SEGMENT as f64;

                for iline in 0..mol.nline {
                    let (mut jnu, mut alpha) =
                        line_jnu_alpha(mol, pops, ispec, here, nmol, binv, vfac, iline);

                    // Blended partners contribute at their shifted velocity.
                    if let Some(blends) = blends {
                        for &(jline, dv) in &blends[ispec][iline] {
                            let mut vfac_b = 0.0;
                            for &vel in &seg_vels {
                                vfac_b += gaussline(deltav + dv - vel, binv);
                            }
                            vfac_b /= N_RAN_PER_SEGMENT as f64;
                            let (jb, ab) = line_jnu_alpha(
                                mol, pops, ispec, here, nmol, binv, vfac_b, jline,
                            );
                            jnu += jb;
                            alpha += ab;
                        }
                    }

                    let knu = cont.knu[ispec][[here, iline]];
                    let jnu_norm = jnu * mol.norminv + knu * cont.dust[ispec][[here, iline]];
                    let dtau = (alpha + knu) * ds_eff;
                    let (remnant, _) = calc_source_fn(dtau, taylor_cutoff);
                    let tau = &mut scratch.tau[ispec][iline];
                    scratch.phot[ispec][iline * nphot + iphot] +=
                        fast_exp(*tau) * remnant * jnu_norm * ds_eff;
                    *tau += dtau;
                }
            }

            here = vh.neigh[k];
        }
    }

    // Profile-weighted average over the batch.
    for (ispec, mol) in mols.iter().enumerate() {
        let weight_sum: f64 = scratch.vfac[ispec][..nphot].iter().sum();
        if weight_sum <= EPS {
            continue;
        }
        for iline in 0..mol.nline {
            let mut acc = 0.0;
            for iphot in 0..nphot {
                acc += scratch.vfac[ispec][iphot] * scratch.phot[ispec][iline * nphot + iphot];
            }
            scratch.jbar[ispec][iline] = acc / weight_sum;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::solve::Populations;
    use crate::tests::{basic_config, two_level_mols, UniformSphere};
    use approx::assert_relative_eq;
    use rand::SeedableRng;
    use rand_pcg::Pcg64;

    /// With zero density everywhere the medium is transparent, so the mean
    /// intensity at any vertex is exactly the cosmic background.
    #[test]
    fn empty_cloud_sees_only_the_background() {
        let cfg = basic_config(100, 60);
        let model = UniformSphere {
            density: 0.0,
            ..Default::default()
        };
        let mols = two_level_mols();
        let grid = Grid::build(&cfg, &model, &mols).unwrap();
        let pops = Populations::lte(&grid, &mols);
        let cont = Continuum::setup(&grid, &model, &mols, None);
        let mut scratch = WorkerScratch::new(&mols, cfg.max_phot);
        let mut rng = Pcg64::seed_from_u64(5);

        photon_pass(
            &grid, &pops, &mols, &cont, None, cfg.taylor_cutoff, 0, &mut rng, &mut scratch,
        );
        assert_relative_eq!(scratch.jbar[0][0], mols[0].cmb[0], max_relative = 1e-10);
    }

    /// The same batch with the same RNG stream must reproduce bit-identical
    /// jbar values.
    #[test]
    fn deterministic_given_the_stream() {
        let cfg = basic_config(100, 60);
        let model = UniformSphere::default();
        let mols = two_level_mols();
        let grid = Grid::build(&cfg, &model, &mols).unwrap();
        let pops = Populations::lte(&grid, &mols);
        let cont = Continuum::setup(&grid, &model, &mols, None);

        let run = || {
            let mut scratch = WorkerScratch::new(&mols, cfg.max_phot);
            let mut rng = Pcg64::seed_from_u64(17);
            photon_pass(
                &grid, &pops, &mols, &cont, None, cfg.taylor_cutoff, 3, &mut rng, &mut scratch,
            );
            scratch.jbar[0][0]
        };
        assert_eq!(run().to_bits(), run().to_bits());
    }
}
