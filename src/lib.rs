// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Non-LTE molecular-line radiative transfer for astrophysical gas models.
//!
//! Given analytic callbacks describing a cloud, disk or envelope
//! ([`Model`]) and a [`Configuration`], the crate samples an unstructured
//! grid inside the model sphere, tessellates it, iterates a Monte-Carlo
//! photon-transport / statistical-equilibrium solve to convergence, and
//! raytraces sky-plane channel maps through the solved medium. Drivers
//! handle the rest: argument parsing, logger setup and serialising the
//! returned [`ImageCube`]s to sky-image formats.

pub(crate) mod constants;
pub mod continuum;
pub(crate) mod error;
pub mod grid;
pub mod math;
pub mod model;
pub mod moldata;
pub mod params;
pub mod raytrace;
pub mod snapshot;
pub mod solve;

#[cfg(test)]
pub(crate) mod tests;

use log::info;
use rand_pcg::Pcg64;

// Re-exports.
pub use continuum::{Continuum, DustOpacity};
pub use error::LineradError;
pub use grid::{DataStage, Grid};
pub use model::Model;
pub use moldata::MolData;
pub use params::{Configuration, ImageParameters, ImageUnit, PhotonGrowth, Sampling};
pub use raytrace::ImageCube;
pub use solve::{Populations, SolveStats};

/// Every stochastic stage seeds its own `Pcg64` from the master seed and a
/// stream id, so no draw ever depends on scheduling.
pub(crate) fn seeded_rng(master_seed: u64, stream: u128) -> Pcg64 {
    Pcg64::new(master_seed as u128, stream)
}

/// Everything a run produces, handed to the output collaborators.
#[derive(Debug)]
pub struct RunOutput {
    pub grid: Grid,
    pub populations: Populations,
    pub stats: SolveStats,
    pub images: Vec<ImageCube>,
}

/// Drive a whole run: validate, build or load the grid, solve the level
/// populations, write any configured snapshots and raytrace the configured
/// images.
pub fn run(cfg: &Configuration, model: &dyn Model) -> Result<RunOutput, LineradError> {
    let has_magfield = model.magfield(&nalgebra::Vector3::zeros()).is_some();
    cfg.validate(has_magfield)?;

    let mut mols = Vec::with_capacity(cfg.moldat_files.len());
    for path in &cfg.moldat_files {
        let mol = MolData::from_path(path, cfg.tcmb)?;
        info!(
            "{}: {} levels, {} lines, {} collision partner(s)",
            mol.name,
            mol.nlev,
            mol.nline,
            mol.partners.len()
        );
        mols.push(mol);
    }
    let dust = match &cfg.dust_file {
        Some(path) => Some(DustOpacity::from_path(path)?),
        None => None,
    };

    // Build the grid, or resume it from a snapshot at stage three.
    let (mut grid, snapshot_pops) = match &cfg.grid_in_file {
        Some(path) => snapshot::read_grid(path, cfg, &mols, DataStage::STAGE_MASKS[2])?,
        None => (Grid::build(cfg, model, &mols)?, None),
    };

    // Stage snapshots one to three become available as soon as the build is
    // done; stage four needs populations and is written after the solve.
    for stage in 0..3 {
        write_stage_snapshot(cfg, &grid, None, stage)?;
    }

    let cont = Continuum::setup(&grid, model, &mols, dust.as_ref());

    let initial = if cfg.init_lte { None } else { snapshot_pops };
    let (populations, stats) = solve::solve(cfg, &mut grid, &mols, &cont, initial)?;
    write_stage_snapshot(cfg, &grid, Some(&populations), 3)?;

    let mut images = Vec::with_capacity(cfg.images.len());
    for img in &cfg.images {
        images.push(raytrace::raytrace(
            img,
            cfg,
            model,
            &grid,
            &mols,
            &cont,
            dust.as_ref(),
            &populations,
        )?);
    }

    Ok(RunOutput {
        grid,
        populations,
        stats,
        images,
    })
}

fn write_stage_snapshot(
    cfg: &Configuration,
    grid: &Grid,
    pops: Option<&Populations>,
    stage: usize,
) -> Result<(), LineradError> {
    if !cfg.write_grid_at_stage[stage] {
        return Ok(());
    }
    if let Some(path) = &cfg.grid_out_files[stage] {
        snapshot::write_grid(path, grid, pops, DataStage::STAGE_MASKS[stage])?;
    }
    Ok(())
}
