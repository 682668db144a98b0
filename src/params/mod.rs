// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

/*!
Run configuration.

A [`Configuration`] is a flat record of everything a run needs besides the
[`Model`] callbacks and the molecular catalogues: grid geometry, solver
switches and the list of images to raytrace. It can be built in code or
deserialised from TOML; either way [`Configuration::validate`] must pass
before the grid builder will accept it.

[`Model`]: crate::model::Model
 */

mod error;
pub use error::ConfigError;

use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::constants::{
    DEFAULT_SMOOTH_PASSES, DEFAULT_TAYLOR_CUTOFF, ININPHOT, MAX_PHOT, NUM_GRID_STAGES,
};

/// Acceptance-function selector for interior-point sampling.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Sampling {
    /// Radii drawn uniformly in log(r), weighted by a shallow power of the
    /// local density. The default, and the right choice for centrally
    /// condensed models.
    LogDensity,
    /// Uniform in volume, weighted by a shallow power of the local density.
    Density,
    /// Uniform in volume, no weighting.
    Uniform,
}

impl Default for Sampling {
    fn default() -> Sampling {
        Sampling::LogDensity
    }
}

/// When does a vertex's photon budget grow?
///
/// No single rule is physically mandated, so the choice is a configuration
/// option rather than a hard-coded policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PhotonGrowth {
    /// Grow when the vertex's consecutive-quiet-pass counter was reset this
    /// pass (it had been making progress and regressed).
    OnRegression,
    /// Grow on every pass in which the vertex failed the tolerance test.
    OnNonConvergence,
}

impl Default for PhotonGrowth {
    fn default() -> PhotonGrowth {
        PhotonGrowth::OnRegression
    }
}

/// Physical units of a raytraced image.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ImageUnit {
    /// Rayleigh-Jeans brightness temperature \[K\].
    Kelvin,
    /// Flux density per pixel \[Jy\].
    JanskyPerPixel,
    /// Optical depth; dimensionless.
    Tau,
}

impl Default for ImageUnit {
    fn default() -> ImageUnit {
        ImageUnit::JanskyPerPixel
    }
}

fn default_antialias() -> usize {
    1
}

fn default_nchan() -> usize {
    1
}

/// Description of one sky-plane image to synthesise.
#[derive(Debug, Clone, Deserialize)]
pub struct ImageParameters {
    /// Pixels along each image axis.
    pub pxls: usize,

    /// Angular size of a pixel \[arcsec\].
    pub imgres: f64,

    /// Number of velocity channels. 1 for continuum images.
    #[serde(default = "default_nchan")]
    pub nchan: usize,

    /// Channel width \[m/s\]. Ignored for continuum images.
    #[serde(default)]
    pub velres: f64,

    /// Index of the species the imaged transition belongs to.
    #[serde(default)]
    pub species: usize,

    /// Index of the imaged transition within the species. `None` together
    /// with `freq` selects a pure continuum image.
    #[serde(default)]
    pub trans: Option<usize>,

    /// Observing frequency for continuum images \[Hz\].
    #[serde(default)]
    pub freq: Option<f64>,

    /// Camera colatitude \[radians\].
    #[serde(default)]
    pub theta: f64,

    /// Camera azimuth \[radians\].
    #[serde(default)]
    pub phi: f64,

    /// Systemic velocity offset applied to the channel grid \[m/s\].
    #[serde(default)]
    pub source_vel: f64,

    /// Distance to the source \[m\].
    pub distance: f64,

    /// Sub-samples per pixel axis; each pixel averages `antialias^2` rays.
    #[serde(default = "default_antialias")]
    pub antialias: usize,

    /// Output unit.
    #[serde(default)]
    pub unit: ImageUnit,
}

fn default_threads() -> usize {
    1
}

fn default_max_phot() -> usize {
    MAX_PHOT
}

fn default_ininphot() -> usize {
    ININPHOT
}

fn default_taylor_cutoff() -> f64 {
    DEFAULT_TAYLOR_CUTOFF
}

fn default_smooth_passes() -> usize {
    DEFAULT_SMOOTH_PASSES
}

/// The flat record of recognised options.
#[derive(Debug, Clone, Deserialize)]
pub struct Configuration {
    /// Radius of the bounding sphere \[m\].
    pub radius: f64,

    /// Minimum separation between sampled grid points \[m\]; also the inner
    /// radial cutoff of log-radius sampling.
    pub min_scale: f64,

    /// Cosmic background temperature \[K\]. Zero disables the background
    /// field entirely.
    #[serde(default)]
    pub tcmb: f64,

    /// Number of interior (intensity-carrying) grid points.
    pub p_intensity: usize,

    /// Number of sink points distributed on the bounding sphere.
    pub sink_points: usize,

    /// Molecular data catalogues, one per species (LAMDA format).
    #[serde(default)]
    pub moldat_files: Vec<PathBuf>,

    /// Optional two-column dust opacity table.
    #[serde(default)]
    pub dust_file: Option<PathBuf>,

    /// Enable line blending.
    #[serde(default)]
    pub blend: bool,

    /// Interior-point acceptance selector.
    #[serde(default)]
    pub sampling: Sampling,

    /// Stop after LTE initialisation; no iterative solve.
    #[serde(default)]
    pub lte_only: bool,

    /// Initialise the iterative solve from LTE (as opposed to populations
    /// carried in from a snapshot).
    #[serde(default = "crate::params::default_true")]
    pub init_lte: bool,

    /// Accumulate Stokes Q and U during continuum raytracing.
    #[serde(default)]
    pub polarization: bool,

    /// Worker threads for the solve passes.
    #[serde(default = "default_threads")]
    pub n_threads: usize,

    /// Master seed for every stochastic stage.
    #[serde(default)]
    pub seed: u64,

    /// Solver iterations to run; capped by the crate-level `MAXITER`.
    #[serde(default = "crate::params::default_n_solve_iters")]
    pub n_solve_iters: usize,

    /// Initial photon budget per vertex.
    #[serde(default = "default_ininphot")]
    pub ininphot: usize,

    /// Photon budget ceiling per vertex.
    #[serde(default = "default_max_phot")]
    pub max_phot: usize,

    /// Photon budget growth rule.
    #[serde(default)]
    pub photon_growth: PhotonGrowth,

    /// Optical-depth increment below which the transfer integral switches to
    /// its Taylor form.
    #[serde(default = "default_taylor_cutoff")]
    pub taylor_cutoff: f64,

    /// Lloyd relaxation passes over the interior points.
    #[serde(default = "default_smooth_passes")]
    pub n_smooth_passes: usize,

    /// Write a snapshot when the grid build reaches each stage.
    #[serde(default)]
    pub write_grid_at_stage: [bool; NUM_GRID_STAGES],

    /// Snapshot file names per stage; consulted only where
    /// `write_grid_at_stage` is set.
    #[serde(default)]
    pub grid_out_files: [Option<PathBuf>; NUM_GRID_STAGES],

    /// Resume the grid from this snapshot instead of building it.
    #[serde(default)]
    pub grid_in_file: Option<PathBuf>,

    /// Images to raytrace after the solve.
    #[serde(default)]
    pub images: Vec<ImageParameters>,
}

pub(crate) fn default_true() -> bool {
    true
}

pub(crate) fn default_n_solve_iters() -> usize {
    crate::constants::MAXITER
}

impl Configuration {
    /// Total vertex count, interior plus sink.
    pub fn ncell(&self) -> usize {
        self.p_intensity + self.sink_points
    }

    /// Number of configured species.
    pub fn num_species(&self) -> usize {
        self.moldat_files.len()
    }

    /// Parse a configuration from a TOML document.
    pub fn from_toml_str(s: &str) -> Result<Configuration, ConfigError> {
        Ok(toml::from_str(s)?)
    }

    /// Read and parse a TOML configuration file.
    pub fn from_toml_file<P: AsRef<Path>>(path: P) -> Result<Configuration, ConfigError> {
        let s = std::fs::read_to_string(path)?;
        Configuration::from_toml_str(&s)
    }

    /// Check the record for contradictory or missing options. Fatal at
    /// startup; nothing downstream re-validates.
    pub fn validate(&self, model_has_magfield: bool) -> Result<(), ConfigError> {
        if !(self.radius > 0.0) {
            return Err(ConfigError::BadRadius(self.radius));
        }
        if !(self.min_scale > 0.0) || self.min_scale >= self.radius {
            return Err(ConfigError::BadMinScale {
                min_scale: self.min_scale,
                radius: self.radius,
            });
        }
        if self.p_intensity == 0 {
            return Err(ConfigError::NoInteriorPoints);
        }
        if self.sink_points < 4 {
            return Err(ConfigError::TooFewSinkPoints(self.sink_points));
        }
        if self.tcmb < 0.0 {
            return Err(ConfigError::NegativeTcmb(self.tcmb));
        }
        if self.moldat_files.is_empty() && !self.lte_only {
            return Err(ConfigError::NoMolecularData);
        }
        if self.n_threads == 0 {
            return Err(ConfigError::NoThreads);
        }
        if self.ininphot == 0 || self.ininphot > self.max_phot {
            return Err(ConfigError::BadPhotonBudget {
                got: self.ininphot,
                max: self.max_phot,
            });
        }
        if self.polarization && !model_has_magfield {
            return Err(ConfigError::PolarisationWithoutField);
        }

        for (i, img) in self.images.iter().enumerate() {
            if img.pxls == 0 {
                return Err(ConfigError::NoPixels { image: i });
            }
            if !(img.imgres > 0.0) {
                return Err(ConfigError::BadImageResolution {
                    image: i,
                    got: img.imgres,
                });
            }
            if img.antialias == 0 {
                return Err(ConfigError::BadAntialias { image: i });
            }
            if !(img.distance > 0.0) {
                return Err(ConfigError::BadDistance {
                    image: i,
                    got: img.distance,
                });
            }
            match img.trans {
                Some(trans) => {
                    if img.species >= self.num_species() {
                        return Err(ConfigError::BadSpeciesIndex {
                            image: i,
                            trans,
                            species: img.species,
                        });
                    }
                    if img.nchan == 0 || !(img.velres > 0.0) {
                        return Err(ConfigError::BadChannelisation { image: i });
                    }
                }
                None => {
                    if img.freq.is_none() {
                        return Err(ConfigError::NoFrequency { image: i });
                    }
                }
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn minimal() -> Configuration {
        Configuration {
            radius: 100.0,
            min_scale: 1.0,
            tcmb: 2.725,
            p_intensity: 100,
            sink_points: 50,
            moldat_files: vec![PathBuf::from("co.dat")],
            dust_file: None,
            blend: false,
            sampling: Sampling::Uniform,
            lte_only: false,
            init_lte: true,
            polarization: false,
            n_threads: 1,
            seed: 42,
            n_solve_iters: 10,
            ininphot: 9,
            max_phot: 1000,
            photon_growth: PhotonGrowth::OnRegression,
            taylor_cutoff: DEFAULT_TAYLOR_CUTOFF,
            n_smooth_passes: 0,
            write_grid_at_stage: [false; NUM_GRID_STAGES],
            grid_out_files: Default::default(),
            grid_in_file: None,
            images: vec![],
        }
    }

    #[test]
    fn minimal_config_validates() {
        minimal().validate(false).unwrap();
    }

    #[test]
    fn rejects_contradictions() {
        let mut c = minimal();
        c.min_scale = 200.0;
        assert!(matches!(
            c.validate(false),
            Err(ConfigError::BadMinScale { .. })
        ));

        let mut c = minimal();
        c.sink_points = 2;
        assert!(matches!(
            c.validate(false),
            Err(ConfigError::TooFewSinkPoints(2))
        ));

        let mut c = minimal();
        c.moldat_files.clear();
        assert!(matches!(c.validate(false), Err(ConfigError::NoMolecularData)));

        let mut c = minimal();
        c.polarization = true;
        assert!(matches!(
            c.validate(false),
            Err(ConfigError::PolarisationWithoutField)
        ));
    }

    #[test]
    fn image_without_frequency_is_rejected() {
        let mut c = minimal();
        c.images.push(ImageParameters {
            pxls: 16,
            imgres: 0.1,
            nchan: 1,
            velres: 0.0,
            species: 0,
            trans: None,
            freq: None,
            theta: 0.0,
            phi: 0.0,
            source_vel: 0.0,
            distance: crate::constants::PC,
            antialias: 1,
            unit: ImageUnit::JanskyPerPixel,
        });
        assert!(matches!(
            c.validate(false),
            Err(ConfigError::NoFrequency { image: 0 })
        ));
    }

    #[test]
    fn parses_from_toml() {
        let c = Configuration::from_toml_str(
            r#"
            radius = 3.0857e18
            min_scale = 1.0e13
            tcmb = 2.725
            p_intensity = 4000
            sink_points = 3000
            moldat_files = ["co.dat"]
            n_threads = 4
            sampling = "uniform"

            [[images]]
            pxls = 101
            imgres = 0.02
            nchan = 61
            velres = 500.0
            trans = 1
            theta = 0.7853981633974483
            distance = 4.32e18
            unit = "kelvin"
            "#,
        )
        .unwrap();
        assert_eq!(c.ncell(), 7000);
        assert_eq!(c.images.len(), 1);
        assert_eq!(c.images[0].trans, Some(1));
        assert_eq!(c.images[0].unit, ImageUnit::Kelvin);
        c.validate(false).unwrap();
    }
}
