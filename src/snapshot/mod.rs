// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

/*!
Grid snapshots.

A snapshot is a tabular little-endian binary file with fixed blocks —
positions, links, neighbour indices, per-species populations — gated by the
grid's data-stage bitmask, which is stored in the header. Snapshots may be
written after any of the four build stages; reading verifies that every bit
the caller requires is present.

Physical fields round-trip bit-identically (they are written with
`f64::to_bits`). Derived quantities that a snapshot does not carry — edge
directions and lengths, sampling weights, tetrahedra, thermal line widths,
molecular number densities — are recomputed deterministically on read.
 */

mod error;
pub use error::SnapshotError;

use std::io::{BufReader, BufWriter, Read, Write};
use std::path::Path;

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use log::info;
use ndarray::Array2;

use crate::constants::NUM_VEL_COEFFS;
use crate::grid::{velocoeffs, DataStage, Grid};
use crate::moldata::MolData;
use crate::params::Configuration;
use crate::solve::Populations;

const MAGIC: &[u8; 4] = b"LRGD";
const VERSION: u16 = 1;

/// Write `grid` (and, for stage four, `pops`) to `path`, restricted to the
/// attribute groups in `mask`. Every bit of `mask` must be present on the
/// grid.
pub fn write_grid<P: AsRef<Path>>(
    path: P,
    grid: &Grid,
    pops: Option<&Populations>,
    mask: u16,
) -> Result<(), SnapshotError> {
    grid.stage.require(mask)?;
    if mask & DataStage::POPULATIONS != 0 && pops.is_none() {
        return Err(SnapshotError::Mismatch(
            "populations block requested but no populations supplied".to_string(),
        ));
    }

    let mut w = BufWriter::new(std::fs::File::create(&path)?);
    w.write_all(MAGIC)?;
    w.write_u16::<LittleEndian>(VERSION)?;
    w.write_u16::<LittleEndian>(mask)?;
    w.write_u64::<LittleEndian>(grid.n_interior as u64)?;
    w.write_u64::<LittleEndian>(grid.n_sink as u64)?;
    w.write_f64::<LittleEndian>(grid.radius)?;

    let ndens = grid.vertices[0].dens.len();
    let nspec = grid.vertices[0].abun.len();
    w.write_u16::<LittleEndian>(ndens as u16)?;
    w.write_u16::<LittleEndian>(nspec as u16)?;
    w.write_u16::<LittleEndian>(NUM_VEL_COEFFS as u16)?;

    // Positions block.
    for v in &grid.vertices {
        w.write_u8(u8::from(v.sink))?;
        for i in 0..3 {
            w.write_f64::<LittleEndian>(v.pos[i])?;
        }
    }

    // Links and neighbour-index blocks.
    let links = if mask & DataStage::NEIGHBOURS != 0 {
        let links = collect_links(grid);
        w.write_u64::<LittleEndian>(links.len() as u64)?;
        for &(a, b) in &links {
            w.write_u64::<LittleEndian>(a as u64)?;
            w.write_u64::<LittleEndian>(b as u64)?;
        }
        for v in &grid.vertices {
            w.write_u64::<LittleEndian>(v.neigh.len() as u64)?;
            for &k in &v.neigh {
                w.write_u64::<LittleEndian>(k as u64)?;
            }
        }
        links
    } else {
        Vec::new()
    };

    if mask & DataStage::VELOCITY != 0 {
        for v in &grid.vertices {
            for i in 0..3 {
                w.write_f64::<LittleEndian>(v.vel[i])?;
            }
        }
    }
    if mask & DataStage::DENSITY != 0 {
        for v in &grid.vertices {
            for &d in &v.dens {
                w.write_f64::<LittleEndian>(d)?;
            }
        }
    }
    if mask & DataStage::ABUNDANCE != 0 {
        for v in &grid.vertices {
            for &a in &v.abun {
                w.write_f64::<LittleEndian>(a)?;
            }
        }
    }
    if mask & DataStage::TURB_DOPPLER != 0 {
        for v in &grid.vertices {
            w.write_f64::<LittleEndian>(v.dopb)?;
        }
    }
    if mask & DataStage::TEMPERATURES != 0 {
        for v in &grid.vertices {
            w.write_f64::<LittleEndian>(v.t[0])?;
            w.write_f64::<LittleEndian>(v.t[1])?;
        }
    }

    // Velocity-coefficient block: the forward polynomial per undirected
    // link; the reversed direction is derived on read.
    if mask & DataStage::ACOEFF != 0 {
        for &(a, b) in &links {
            let k = grid.neighbour_index(a, b).ok_or_else(|| {
                SnapshotError::Corrupt("link without neighbour entry".to_string())
            })?;
            for c in &grid.vertices[a].acoeffs[k] {
                w.write_f64::<LittleEndian>(*c)?;
            }
        }
    }

    if mask & DataStage::POPULATIONS != 0 {
        let pops = pops.unwrap();
        w.write_u16::<LittleEndian>(pops.species.len() as u16)?;
        for arr in &pops.species {
            w.write_u16::<LittleEndian>(arr.ncols() as u16)?;
            for &p in arr.iter() {
                w.write_f64::<LittleEndian>(p)?;
            }
        }
    }

    w.flush()?;
    info!(
        "Wrote grid snapshot ({} vertices, stage mask {:#06x}) to {}",
        grid.vertices.len(),
        mask,
        path.as_ref().display()
    );
    Ok(())
}

/// Read a snapshot back. The caller states the stage bits it needs; missing
/// bits are an error, extra bits are carried along. Returns populations when
/// the file has them.
pub fn read_grid<P: AsRef<Path>>(
    path: P,
    cfg: &Configuration,
    mols: &[MolData],
    required_mask: u16,
) -> Result<(Grid, Option<Populations>), SnapshotError> {
    let mut r = BufReader::new(std::fs::File::open(&path)?);

    let mut magic = [0u8; 4];
    r.read_exact(&mut magic)?;
    if &magic != MAGIC {
        return Err(SnapshotError::BadMagic);
    }
    let version = r.read_u16::<LittleEndian>()?;
    if version != VERSION {
        return Err(SnapshotError::BadVersion(version));
    }
    let mask = r.read_u16::<LittleEndian>()?;
    if mask & required_mask != required_mask {
        return Err(SnapshotError::MissingStage {
            got: mask,
            needed: required_mask,
        });
    }

    let n_interior = r.read_u64::<LittleEndian>()? as usize;
    let n_sink = r.read_u64::<LittleEndian>()? as usize;
    let radius = r.read_f64::<LittleEndian>()?;
    let ndens = r.read_u16::<LittleEndian>()? as usize;
    let nspec = r.read_u16::<LittleEndian>()? as usize;
    let nacoeff = r.read_u16::<LittleEndian>()? as usize;
    if nacoeff != NUM_VEL_COEFFS {
        return Err(SnapshotError::Corrupt(format!(
            "unexpected velocity-coefficient count {nacoeff}"
        )));
    }
    let nvert = n_interior + n_sink;

    let mut positions = Vec::with_capacity(nvert);
    for _ in 0..nvert {
        let sink = r.read_u8()? != 0;
        let mut pos = nalgebra::Vector3::zeros();
        for i in 0..3 {
            pos[i] = r.read_f64::<LittleEndian>()?;
        }
        positions.push((pos, sink));
    }
    let mut grid = Grid::from_positions(positions, radius);
    if grid.n_interior != n_interior {
        return Err(SnapshotError::Corrupt(
            "sink flags disagree with the header counts".to_string(),
        ));
    }

    let mut links: Vec<(usize, usize)> = Vec::new();
    if mask & DataStage::NEIGHBOURS != 0 {
        let nlinks = r.read_u64::<LittleEndian>()? as usize;
        links.reserve(nlinks);
        for _ in 0..nlinks {
            let a = r.read_u64::<LittleEndian>()? as usize;
            let b = r.read_u64::<LittleEndian>()? as usize;
            if a >= nvert || b >= nvert {
                return Err(SnapshotError::Corrupt("link out of range".to_string()));
            }
            links.push((a, b));
        }
        for iv in 0..nvert {
            let count = r.read_u64::<LittleEndian>()? as usize;
            let mut neigh = Vec::with_capacity(count);
            for _ in 0..count {
                let k = r.read_u64::<LittleEndian>()? as usize;
                if k >= nvert {
                    return Err(SnapshotError::Corrupt("neighbour out of range".to_string()));
                }
                neigh.push(k);
            }
            grid.vertices[iv].neigh = neigh;
        }
        grid.stage.set(DataStage::NEIGHBOURS);
    }

    if mask & DataStage::VELOCITY != 0 {
        for v in grid.vertices.iter_mut() {
            for i in 0..3 {
                v.vel[i] = r.read_f64::<LittleEndian>()?;
            }
        }
        grid.stage.set(DataStage::VELOCITY);
    }
    if mask & DataStage::DENSITY != 0 {
        for v in grid.vertices.iter_mut() {
            v.dens = read_f64_vec(&mut r, ndens)?;
        }
        grid.stage.set(DataStage::DENSITY);
    }
    if mask & DataStage::ABUNDANCE != 0 {
        for v in grid.vertices.iter_mut() {
            v.abun = read_f64_vec(&mut r, nspec)?;
        }
        grid.stage.set(DataStage::ABUNDANCE);
    }
    if mask & DataStage::TURB_DOPPLER != 0 {
        for v in grid.vertices.iter_mut() {
            v.dopb = r.read_f64::<LittleEndian>()?;
        }
        grid.stage.set(DataStage::TURB_DOPPLER);
    }
    if mask & DataStage::TEMPERATURES != 0 {
        for v in grid.vertices.iter_mut() {
            v.t[0] = r.read_f64::<LittleEndian>()?;
            v.t[1] = r.read_f64::<LittleEndian>()?;
        }
        grid.stage.set(DataStage::TEMPERATURES);
    }

    if mask & DataStage::ACOEFF != 0 {
        // Edge geometry must exist before coefficients can be attached.
        grid.finish_from_snapshot(cfg.seed)?;
        for v in grid.vertices.iter_mut() {
            v.acoeffs = vec![[0.0; NUM_VEL_COEFFS]; v.neigh.len()];
        }
        for &(a, b) in &links {
            let mut fwd = [0.0; NUM_VEL_COEFFS];
            for c in fwd.iter_mut() {
                *c = r.read_f64::<LittleEndian>()?;
            }
            let ka = grid
                .neighbour_index(a, b)
                .ok_or_else(|| SnapshotError::Corrupt("link without neighbour entry".to_string()))?;
            let kb = grid
                .neighbour_index(b, a)
                .ok_or_else(|| SnapshotError::Corrupt("asymmetric link".to_string()))?;
            grid.vertices[a].acoeffs[ka] = fwd;
            grid.vertices[b].acoeffs[kb] = velocoeffs::reverse(&fwd);
        }
        grid.stage.set(DataStage::ACOEFF);
    } else if mask & DataStage::NEIGHBOURS != 0 {
        grid.finish_from_snapshot(cfg.seed)?;
    }

    let mut pops = None;
    if mask & DataStage::POPULATIONS != 0 {
        let nspecies = r.read_u16::<LittleEndian>()? as usize;
        if nspecies != mols.len() {
            return Err(SnapshotError::Mismatch(format!(
                "snapshot has {nspecies} species, configuration has {}",
                mols.len()
            )));
        }
        let mut species = Vec::with_capacity(nspecies);
        for mol in mols {
            let nlev = r.read_u16::<LittleEndian>()? as usize;
            if nlev != mol.nlev {
                return Err(SnapshotError::Mismatch(format!(
                    "snapshot has {nlev} levels for {}, catalogue has {}",
                    mol.name, mol.nlev
                )));
            }
            let mut arr = Array2::zeros((nvert, nlev));
            for iv in 0..nvert {
                for il in 0..nlev {
                    arr[[iv, il]] = r.read_f64::<LittleEndian>()?;
                }
            }
            species.push(arr);
        }
        pops = Some(Populations { species });
        grid.stage.set(DataStage::POPULATIONS);
    }

    // Derived fields.
    if grid
        .stage
        .has_all(DataStage::ABUNDANCE | DataStage::DENSITY)
    {
        for v in grid.vertices.iter_mut() {
            v.nmol = v.abun.iter().map(|a| a * v.dens[0]).collect();
        }
    }
    if grid
        .stage
        .has_all(DataStage::TURB_DOPPLER | DataStage::TEMPERATURES)
    {
        grid.compute_binv(mols);
    }
    for v in grid.vertices.iter_mut() {
        v.nphot = cfg.ininphot;
    }

    info!(
        "Read grid snapshot ({} vertices, stage mask {:#06x}) from {}",
        nvert,
        mask,
        path.as_ref().display()
    );
    Ok((grid, pops))
}

/// Undirected links (a < b), ordered, from the per-vertex neighbour lists.
fn collect_links(grid: &Grid) -> Vec<(usize, usize)> {
    let mut links = Vec::new();
    for v in &grid.vertices {
        for &k in &v.neigh {
            if v.id < k {
                links.push((v.id, k));
            }
        }
    }
    links.sort_unstable();
    links
}

fn read_f64_vec<R: Read>(r: &mut R, n: usize) -> Result<Vec<f64>, SnapshotError> {
    let mut out = Vec::with_capacity(n);
    for _ in 0..n {
        out.push(r.read_f64::<LittleEndian>()?);
    }
    Ok(out)
}
