// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

use thiserror::Error;

/// Errors associated with validating a [`Configuration`].
///
/// [`Configuration`]: super::Configuration
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("The model radius must be positive (got {0} m)")]
    BadRadius(f64),

    #[error("minScale must be positive and smaller than the radius (got {min_scale} m for radius {radius} m)")]
    BadMinScale { min_scale: f64, radius: f64 },

    #[error("At least one interior grid point is required")]
    NoInteriorPoints,

    #[error("At least four sink points are needed to close the boundary (got {0})")]
    TooFewSinkPoints(usize),

    #[error("The background temperature may not be negative (got {0} K)")]
    NegativeTcmb(f64),

    #[error("No molecular data files were supplied and lte_only was not requested either")]
    NoMolecularData,

    #[error("nThreads must be at least 1")]
    NoThreads,

    #[error("ininphot must be at least 1 and no greater than max_phot ({max}); got {got}")]
    BadPhotonBudget { got: usize, max: usize },

    #[error("Image {image}: pixel count must be positive")]
    NoPixels { image: usize },

    #[error("Image {image}: angular resolution must be positive (got {got} arcsec)")]
    BadImageResolution { image: usize, got: f64 },

    #[error("Image {image}: a line image needs nchan >= 1 and velres > 0")]
    BadChannelisation { image: usize },

    #[error("Image {image}: either a transition index or a continuum frequency must be set")]
    NoFrequency { image: usize },

    #[error("Image {image}: transition index {trans} requested, but species {species} was not configured")]
    BadSpeciesIndex { image: usize, trans: usize, species: usize },

    #[error("Image {image}: antialias must be at least 1")]
    BadAntialias { image: usize },

    #[error("Image {image}: the source distance must be positive (got {got} m)")]
    BadDistance { image: usize, got: f64 },

    #[error("Polarised images need a model that supplies a magnetic field")]
    PolarisationWithoutField,

    #[error("Could not parse the configuration: {0}")]
    Parse(#[from] toml::de::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}
