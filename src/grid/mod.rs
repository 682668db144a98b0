// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

/*!
The unstructured grid.

Vertices are sampled inside the model sphere, relaxed, tessellated and then
enriched stage by stage: positions, neighbour topology, physical fields,
velocity coefficients, and finally (from the solver) level populations. A
bitmask on the grid records which attribute groups have been filled; nothing
downstream reads an attribute whose bit is not set.

Neighbour relations are stored as vertex ids plus parallel per-vertex arrays
(unit direction, edge length, quartic velocity coefficients, sampling
weight); tetrahedra with face adjacency serve the raytracer's cell walk.
 */

mod delaunay;
mod error;
mod sample;
mod smooth;
pub mod velocoeffs;

pub use delaunay::Cell;
pub use error::GridError;

use log::{debug, info};
use nalgebra::Vector3;
use rand::Rng;

use crate::constants::{AMU, EPS, KBOLTZ, NUM_GRID_STAGES, NUM_VEL_COEFFS};
use crate::model::Model;
use crate::moldata::MolData;
use crate::params::Configuration;
use crate::seeded_rng;

/// Random directions drawn per vertex when estimating the neighbour
/// solid-angle weights.
const N_WEIGHT_SAMPLES: usize = 256;

/// RNG stream ids for the grid build, disjoint from the solver's.
const STREAM_SAMPLING: u128 = 1;
const STREAM_WEIGHTS: u128 = 2;

/// Data-completeness bitmask: which attribute groups of the grid are filled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DataStage(u16);

impl DataStage {
    /// id, position, sink flag.
    pub const X: u16 = 1 << 0;
    /// Neighbour ids, directions, edge lengths.
    pub const NEIGHBOURS: u16 = 1 << 1;
    pub const VELOCITY: u16 = 1 << 2;
    pub const DENSITY: u16 = 1 << 3;
    /// Abundances and molecular number densities.
    pub const ABUNDANCE: u16 = 1 << 4;
    pub const TURB_DOPPLER: u16 = 1 << 5;
    pub const TEMPERATURES: u16 = 1 << 6;
    /// Per-edge velocity coefficients.
    pub const ACOEFF: u16 = 1 << 7;
    /// Level populations.
    pub const POPULATIONS: u16 = 1 << 8;

    /// Cumulative masks of the four snapshot stages.
    pub const STAGE_MASKS: [u16; NUM_GRID_STAGES] = [
        Self::X,
        Self::X | Self::NEIGHBOURS,
        Self::X
            | Self::NEIGHBOURS
            | Self::VELOCITY
            | Self::DENSITY
            | Self::ABUNDANCE
            | Self::TURB_DOPPLER
            | Self::TEMPERATURES
            | Self::ACOEFF,
        Self::X
            | Self::NEIGHBOURS
            | Self::VELOCITY
            | Self::DENSITY
            | Self::ABUNDANCE
            | Self::TURB_DOPPLER
            | Self::TEMPERATURES
            | Self::ACOEFF
            | Self::POPULATIONS,
    ];

    pub fn empty() -> DataStage {
        DataStage(0)
    }

    pub fn from_bits(bits: u16) -> DataStage {
        DataStage(bits)
    }

    pub fn bits(self) -> u16 {
        self.0
    }

    pub fn set(&mut self, bits: u16) {
        self.0 |= bits;
    }

    pub fn has_all(self, mask: u16) -> bool {
        self.0 & mask == mask
    }

    /// Error out unless every bit of `mask` is present.
    pub fn require(self, mask: u16) -> Result<(), GridError> {
        if self.has_all(mask) {
            Ok(())
        } else {
            Err(GridError::IncompleteStage {
                got: self.0,
                needed: mask,
            })
        }
    }
}

/// One grid point and everything sampled at it.
#[derive(Debug, Clone)]
pub struct Vertex {
    pub id: usize,
    /// Position \[m\].
    pub pos: Vector3<f64>,
    /// On the bounding sphere, emitting only the cosmic background.
    pub sink: bool,
    /// Bulk velocity \[m/s\].
    pub vel: Vector3<f64>,
    /// Number density per collision partner \[m^-3\].
    pub dens: Vec<f64>,
    /// Kinetic and dust temperature \[K\].
    pub t: [f64; 2],
    /// Fractional abundance per species.
    pub abun: Vec<f64>,
    /// Molecular number density per species \[m^-3\].
    pub nmol: Vec<f64>,
    /// Turbulent Doppler b-parameter \[m/s\].
    pub dopb: f64,
    /// Inverse total Doppler width per species \[s/m\], turbulent plus
    /// thermal.
    pub binv: Vec<f64>,
    /// Neighbour vertex ids.
    pub neigh: Vec<usize>,
    /// Unit direction towards each neighbour.
    pub dir: Vec<Vector3<f64>>,
    /// Edge length towards each neighbour \[m\].
    pub ds: Vec<f64>,
    /// Velocity polynomial towards each neighbour.
    pub acoeffs: Vec<[f64; NUM_VEL_COEFFS]>,
    /// Solid-angle weight of each neighbour, for importance sampling.
    pub weight: Vec<f64>,
    /// Current photon budget.
    pub nphot: usize,
    /// Consecutive quiet solver passes.
    pub conv: usize,
}

impl Vertex {
    fn bare(id: usize, pos: Vector3<f64>, sink: bool) -> Vertex {
        Vertex {
            id,
            pos,
            sink,
            vel: Vector3::zeros(),
            dens: Vec::new(),
            t: [0.0; 2],
            abun: Vec::new(),
            nmol: Vec::new(),
            dopb: 0.0,
            binv: Vec::new(),
            neigh: Vec::new(),
            dir: Vec::new(),
            ds: Vec::new(),
            acoeffs: Vec::new(),
            weight: Vec::new(),
            nphot: 0,
            conv: 0,
        }
    }
}

/// The tessellated model volume.
#[derive(Debug)]
pub struct Grid {
    pub vertices: Vec<Vertex>,
    pub cells: Vec<Cell>,
    pub stage: DataStage,
    /// Bounding sphere radius \[m\].
    pub radius: f64,
    pub n_interior: usize,
    pub n_sink: usize,
}

impl Grid {
    /// Build the grid from scratch: sample, relax, tessellate, enrich.
    pub fn build(
        cfg: &Configuration,
        model: &dyn Model,
        mols: &[MolData],
    ) -> Result<Grid, GridError> {
        let mut rng = seeded_rng(cfg.seed, STREAM_SAMPLING);
        let mut points = sample::sample_points(cfg, model, &mut rng)?;
        info!(
            "Sampled {} interior and {} sink points",
            cfg.p_intensity, cfg.sink_points
        );

        smooth::smooth(
            &mut points,
            cfg.p_intensity,
            cfg.radius,
            cfg.min_scale,
            cfg.n_smooth_passes,
        )?;

        let simplices = delaunay::tessellate(&points)?;
        let cells = delaunay::build_cells(&points, &simplices)?;
        let neigh = delaunay::neighbour_lists(points.len(), &simplices)?;
        info!("Tessellation: {} tetrahedra", cells.len());

        let mut vertices: Vec<Vertex> = points
            .iter()
            .enumerate()
            .map(|(id, &pos)| Vertex::bare(id, pos, id >= cfg.p_intensity))
            .collect();
        for (id, list) in neigh.into_iter().enumerate() {
            vertices[id].neigh = list;
        }

        let mut grid = Grid {
            vertices,
            cells,
            stage: DataStage::empty(),
            radius: cfg.radius,
            n_interior: cfg.p_intensity,
            n_sink: cfg.sink_points,
        };
        grid.stage.set(DataStage::X);

        grid.compute_edges();
        grid.compute_weights(cfg.seed);
        grid.stage.set(DataStage::NEIGHBOURS);

        grid.sample_fields(model, mols);
        grid.compute_velocity_coeffs(model);
        debug!("Grid enriched to stage mask {:#06x}", grid.stage.bits());

        for v in grid.vertices.iter_mut() {
            v.nphot = cfg.ininphot;
        }

        Ok(grid)
    }

    /// Unit directions and lengths of every directed edge.
    fn compute_edges(&mut self) {
        let positions: Vec<Vector3<f64>> = self.vertices.iter().map(|v| v.pos).collect();
        for v in self.vertices.iter_mut() {
            v.dir = Vec::with_capacity(v.neigh.len());
            v.ds = Vec::with_capacity(v.neigh.len());
            for &k in &v.neigh {
                let sep = positions[k] - v.pos;
                let ds = sep.norm();
                debug_assert!(ds > 0.0);
                v.dir.push(sep / ds);
                v.ds.push(ds);
            }
        }
    }

    /// Monte-Carlo estimate of the solid angle subtended by each neighbour's
    /// cone, used to importance-sample photon directions.
    fn compute_weights(&mut self, seed: u64) {
        for v in self.vertices.iter_mut() {
            let mut rng = seeded_rng(seed, STREAM_WEIGHTS << 64 | v.id as u128);
            let mut counts = vec![0usize; v.neigh.len()];
            for _ in 0..N_WEIGHT_SAMPLES {
                let d = sample::uniform_direction(&mut rng);
                let mut best = 0;
                let mut best_dot = f64::NEG_INFINITY;
                for (k, dir) in v.dir.iter().enumerate() {
                    let dot = d.dot(dir);
                    if dot > best_dot {
                        best_dot = dot;
                        best = k;
                    }
                }
                counts[best] += 1;
            }
            v.weight = counts
                .iter()
                .map(|&c| (c as f64 / N_WEIGHT_SAMPLES as f64).max(1e-3))
                .collect();
        }
    }

    /// Evaluate the model callbacks at every vertex.
    fn sample_fields(&mut self, model: &dyn Model, mols: &[MolData]) {
        let ndens = model.num_densities();
        let nspec = model.num_species();
        for v in self.vertices.iter_mut() {
            v.vel = model.velocity(&v.pos);
            v.dens = vec![0.0; ndens];
            model.density(&v.pos, &mut v.dens);
            let t = model.temperature(&v.pos);
            v.t = [t[0], if t[1] > 0.0 { t[1] } else { t[0] }];
            v.abun = vec![0.0; nspec];
            model.abundance(&v.pos, &mut v.abun);
            v.nmol = v.abun.iter().map(|a| a * v.dens[0]).collect();
            v.dopb = model.doppler(&v.pos);
        }
        self.compute_binv(mols);
        self.stage.set(
            DataStage::VELOCITY
                | DataStage::DENSITY
                | DataStage::ABUNDANCE
                | DataStage::TURB_DOPPLER
                | DataStage::TEMPERATURES,
        );
    }

    /// Total inverse Doppler widths (turbulent plus thermal) per species.
    pub(crate) fn compute_binv(&mut self, mols: &[MolData]) {
        for v in self.vertices.iter_mut() {
            v.binv = mols
                .iter()
                .map(|mol| {
                    let thermal = 2.0 * KBOLTZ * v.t[0] / (mol.amass * AMU);
                    1.0 / (v.dopb * v.dopb + thermal).sqrt()
                })
                .collect();
        }
    }

    /// Recompute everything a snapshot does not carry: edge geometry,
    /// sampling weights and the tetrahedra. The stored neighbour lists are
    /// kept; only the cells come from a fresh tessellation of the stored
    /// positions.
    pub(crate) fn finish_from_snapshot(&mut self, seed: u64) -> Result<(), GridError> {
        self.compute_edges();
        self.compute_weights(seed);
        let positions: Vec<Vector3<f64>> = self.vertices.iter().map(|v| v.pos).collect();
        let simplices = delaunay::tessellate(&positions)?;
        self.cells = delaunay::build_cells(&positions, &simplices)?;
        Ok(())
    }

    /// A vertex shell with only identity and position set, for the snapshot
    /// reader.
    pub(crate) fn from_positions(
        positions: Vec<(Vector3<f64>, bool)>,
        radius: f64,
    ) -> Grid {
        let n_sink = positions.iter().filter(|(_, sink)| *sink).count();
        let n_interior = positions.len() - n_sink;
        let vertices = positions
            .into_iter()
            .enumerate()
            .map(|(id, (pos, sink))| Vertex::bare(id, pos, sink))
            .collect();
        let mut grid = Grid {
            vertices,
            cells: Vec::new(),
            stage: DataStage::empty(),
            radius,
            n_interior,
            n_sink,
        };
        grid.stage.set(DataStage::X);
        grid
    }

    /// Fit the quartic velocity polynomial on every directed edge.
    fn compute_velocity_coeffs(&mut self, model: &dyn Model) {
        let positions: Vec<Vector3<f64>> = self.vertices.iter().map(|v| v.pos).collect();
        for v in self.vertices.iter_mut() {
            v.acoeffs = v
                .neigh
                .iter()
                .zip(&v.dir)
                .map(|(&k, dir)| velocoeffs::fit_edge(model, &v.pos, &positions[k], dir))
                .collect();
        }
        self.stage.set(DataStage::ACOEFF);
    }

    /// Barycentric coordinates of `x` in cell `icell`.
    #[inline]
    pub fn bary(&self, icell: usize, x: &Vector3<f64>) -> [f64; 4] {
        let cell = &self.cells[icell];
        let p0 = self.vertices[cell.verts[0]].pos;
        let b = cell.bary_inv * (x - p0);
        [1.0 - b.x - b.y - b.z, b.x, b.y, b.z]
    }

    /// Find the cell containing `x` by walking from `hint`. `Ok(None)` means
    /// `x` is outside the tessellated hull.
    pub fn locate(&self, x: &Vector3<f64>, hint: usize) -> Result<Option<usize>, GridError> {
        let mut icell = hint.min(self.cells.len() - 1);
        for _ in 0..self.cells.len() + 16 {
            let b = self.bary(icell, x);
            let mut imin = 0;
            let mut bmin = b[0];
            for (i, &bi) in b.iter().enumerate().skip(1) {
                if bi < bmin {
                    bmin = bi;
                    imin = i;
                }
            }
            if bmin >= -1e-12 {
                return Ok(Some(icell));
            }
            match self.cells[icell].neigh[imin] {
                Some(next) => icell = next,
                None => return Ok(None),
            }
        }
        Err(GridError::WalkStuck)
    }

    /// The neighbour-list index of vertex `to` within vertex `from`'s lists.
    pub fn neighbour_index(&self, from: usize, to: usize) -> Option<usize> {
        self.vertices[from].neigh.iter().position(|&k| k == to)
    }

    /// Importance-sample a photon direction at `vertex`: a neighbour cone
    /// chosen with probability proportional to its weight, uniform within
    /// the cone via rejection. Returns the chosen neighbour index and the
    /// direction.
    pub fn sample_direction<R: Rng>(&self, vertex: usize, rng: &mut R) -> (usize, Vector3<f64>) {
        let v = &self.vertices[vertex];
        let total: f64 = v.weight.iter().sum();
        let max_w = v.weight.iter().cloned().fold(f64::MIN, f64::max);
        loop {
            let z: f64 = 2.0 * rng.gen::<f64>() - 1.0;
            let phi = 2.0 * std::f64::consts::PI * rng.gen::<f64>();
            let s = (1.0 - z * z).max(0.0).sqrt();
            let d = Vector3::new(s * phi.cos(), s * phi.sin(), z);

            let mut best = 0;
            let mut best_dot = f64::NEG_INFINITY;
            for (k, dir) in v.dir.iter().enumerate() {
                let dot = d.dot(dir);
                if dot > best_dot {
                    best_dot = dot;
                    best = k;
                }
            }
            // Accept the cone with probability weight/max: directions end up
            // distributed over cones proportionally to the weights.
            if rng.gen::<f64>() * max_w <= v.weight[best] + EPS * total {
                return (best, d);
            }
        }
    }
}
