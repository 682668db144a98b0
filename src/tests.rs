// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Helpers shared by the unit tests: a configurable uniform-sphere model
//! and a small default configuration.

use nalgebra::Vector3;

use crate::constants::NUM_GRID_STAGES;
use crate::model::Model;
use crate::moldata::MolData;
use crate::params::{Configuration, PhotonGrowth, Sampling};

/// A homogeneous isothermal sphere; each field constant throughout the
/// volume.
#[derive(Clone, Debug)]
pub(crate) struct UniformSphere {
    /// H2 number density \[m^-3\].
    pub density: f64,
    /// Kinetic temperature \[K\].
    pub temperature: f64,
    /// Fractional abundance of the (single) species.
    pub abundance: f64,
    /// Turbulent Doppler b-parameter \[m/s\].
    pub doppler: f64,
    /// Constant bulk velocity \[m/s\].
    pub velocity: Vector3<f64>,
    /// Constant magnetic field \[T\].
    pub magfield: Option<Vector3<f64>>,
}

impl Default for UniformSphere {
    fn default() -> UniformSphere {
        UniformSphere {
            density: 1e13,
            temperature: 20.0,
            abundance: 1e-9,
            doppler: 100.0,
            velocity: Vector3::zeros(),
            magfield: None,
        }
    }
}

impl Model for UniformSphere {
    fn num_densities(&self) -> usize {
        1
    }
    fn num_species(&self) -> usize {
        1
    }
    fn density(&self, _pos: &Vector3<f64>, out: &mut [f64]) {
        out[0] = self.density;
    }
    fn temperature(&self, _pos: &Vector3<f64>) -> [f64; 2] {
        [self.temperature, -1.0]
    }
    fn abundance(&self, _pos: &Vector3<f64>, out: &mut [f64]) {
        out[0] = self.abundance;
    }
    fn doppler(&self, _pos: &Vector3<f64>) -> f64 {
        self.doppler
    }
    fn velocity(&self, _pos: &Vector3<f64>) -> Vector3<f64> {
        self.velocity
    }
    fn magfield(&self, _pos: &Vector3<f64>) -> Option<Vector3<f64>> {
        self.magfield
    }
}

/// A configuration small enough for unit tests: a 10^13 m sphere with the
/// two-level catalogue in mind.
pub(crate) fn basic_config(p_intensity: usize, sink_points: usize) -> Configuration {
    Configuration {
        radius: 1e13,
        min_scale: 1e11,
        tcmb: 2.725,
        p_intensity,
        sink_points,
        moldat_files: vec![],
        dust_file: None,
        blend: false,
        sampling: Sampling::Uniform,
        lte_only: false,
        init_lte: true,
        polarization: false,
        n_threads: 1,
        seed: 42,
        n_solve_iters: 5,
        ininphot: 9,
        max_phot: 1000,
        photon_growth: PhotonGrowth::OnRegression,
        taylor_cutoff: crate::constants::DEFAULT_TAYLOR_CUTOFF,
        n_smooth_passes: 2,
        write_grid_at_stage: [false; NUM_GRID_STAGES],
        grid_out_files: Default::default(),
        grid_in_file: None,
        images: vec![],
    }
}

/// The two-level pseudo-CO catalogue as a one-species list.
pub(crate) fn two_level_mols() -> Vec<MolData> {
    vec![crate::moldata::tests::two_level(2.725)]
}
