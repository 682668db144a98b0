// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! The user-supplied physical model.
//!
//! This trait is the one compile-time extension surface: a driver describes
//! its cloud/disk/envelope by implementing analytic functions of position.
//! Every method must be pure and cheap; the grid builder and the raytracer
//! call them from multiple threads (hence the `Sync + Send` bound), and the
//! sampler calls `density` millions of times.
//!
//! Per-partner and per-species quantities are written through out-parameter
//! slices so the inner loops never allocate.

use nalgebra::Vector3;

/// Analytic description of the physical conditions throughout the model
/// volume. Positions are in metres from the model centre.
pub trait Model: Sync + Send {
    /// Number of collision-partner density components this model supplies.
    fn num_densities(&self) -> usize;

    /// Number of molecular species this model supplies abundances for.
    fn num_species(&self) -> usize;

    /// Number density of each collision partner \[m^-3\]. `out` has
    /// `num_densities()` elements.
    fn density(&self, pos: &Vector3<f64>, out: &mut [f64]);

    /// Kinetic and dust temperature \[K\]. A non-positive dust temperature
    /// means "use the kinetic temperature".
    fn temperature(&self, pos: &Vector3<f64>) -> [f64; 2];

    /// Fractional abundance of each species relative to the first collision
    /// partner. `out` has `num_species()` elements.
    fn abundance(&self, pos: &Vector3<f64>, out: &mut [f64]);

    /// Turbulent Doppler b-parameter \[m/s\].
    fn doppler(&self, pos: &Vector3<f64>) -> f64;

    /// Bulk velocity \[m/s\].
    fn velocity(&self, pos: &Vector3<f64>) -> Vector3<f64>;

    /// Magnetic field \[T\]; only consulted when polarised images are
    /// requested.
    fn magfield(&self, _pos: &Vector3<f64>) -> Option<Vector3<f64>> {
        None
    }

    /// Gas-to-dust mass ratio.
    fn gas_to_dust(&self, _pos: &Vector3<f64>) -> f64 {
        100.0
    }

    /// Optional override of the grid-sampling weight at a position; when
    /// `None` the weight follows the configured [`Sampling`]
    /// selector.
    ///
    /// [`Sampling`]: crate::params::Sampling
    fn sample_weight(&self, _pos: &Vector3<f64>) -> Option<f64> {
        None
    }
}
