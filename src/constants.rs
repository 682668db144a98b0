// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

/*!
Useful constants.

All constants *must* be double precision. `linerad` does every calculation in
double precision; single precision is never good enough for level populations.
 */

pub use std::f64::consts::PI;

/// Speed of light \[m/s\].
pub const CLIGHT: f64 = 2.997924562e8;

/// Planck constant \[J s\].
pub const HPLANCK: f64 = 6.626196e-34;

/// Boltzmann constant \[J/K\].
pub const KBOLTZ: f64 = 1.380622e-23;

/// Atomic mass unit \[kg\].
pub const AMU: f64 = 1.6605402e-27;

/// sqrt(pi).
pub const SPI: f64 = 1.772453850905516;

/// h c / (4 pi sqrt(pi)); the prefactor shared by the line emission and
/// absorption coefficients.
pub const HPIP: f64 = HPLANCK * CLIGHT / 4.0 / PI / SPI;

/// 100 h c / k \[K per cm^-1\]; converts tabulated energy terms to Kelvin.
pub const HCKB: f64 = 100.0 * HPLANCK * CLIGHT / KBOLTZ;

/// Parsec \[m\].
pub const PC: f64 = 3.08568025e16;

/// Astronomical unit \[m\].
pub const AU: f64 = 1.49598e11;

/// Arcsecond \[radians\].
pub const ARCSEC: f64 = PI / 180.0 / 3600.0;

/// Temperature of the cosmic microwave background used for the intensity
/// normalisation when the configured `tcmb` is zero \[K\].
pub const TCMB_FALLBACK: f64 = 2.725;

/// Uniform floor mixed into the interior-point acceptance probability, and
/// the maximum grain-alignment polarisation fraction. An empirical constant
/// with no documented physical derivation; do not tune.
pub const MAXP: f64 = 0.15;

/// Hard ceiling on the per-vertex photon budget. Raising this costs memory:
/// every worker scratch block holds one f64 per photon per line.
pub const MAX_PHOT: usize = 10000;

/// Initial per-vertex photon budget.
pub const ININPHOT: usize = 9;

/// Smallest population any level is allowed to hold; everything below is
/// clamped here before renormalisation.
pub const MINPOP: f64 = 1.0e-6;

/// Generic guard against division by a vanishing denominator.
pub const EPS: f64 = 1.0e-30;

/// A vertex's pass is "quiet" when its maximum fractional population change
/// is below this tolerance.
pub const TOL: f64 = 1e-6;

/// Upper bound on solver iterations.
pub const MAXITER: usize = 50;

/// Number of consecutive quiet passes before a vertex counts as converged.
pub const GOAL: usize = 50;

/// Two lines of a species closer than this \[m/s\] share photons when
/// blending is enabled.
pub const BLENDMASK: f64 = 1.0e4;

/// Photon velocity offsets are drawn uniformly over this many Doppler widths
/// centred on the local line centre.
pub const VEL_SAMPLE_RANGE: f64 = 4.3;

/// Order of the per-edge velocity polynomial plus one.
pub const NUM_VEL_COEFFS: usize = 5;

/// Velocity samples per traversed segment when averaging the line profile.
pub const N_RAN_PER_SEGMENT: usize = 3;

/// Truncation order of the Taylor correction in the fast-exp table.
pub const FAST_EXP_MAX_TAYLOR: usize = 3;

/// The fast-exp table resolves arguments to 2^-FAST_EXP_NUM_BITS.
pub const FAST_EXP_NUM_BITS: u32 = 8;

/// Largest argument covered by the fast-exp table; beyond it e^-x is
/// indistinguishable from zero at double precision anyway.
pub const FAST_EXP_MAX_ARG: f64 = 64.0;

/// Number of grid build stages at which a snapshot may be written.
pub const NUM_GRID_STAGES: usize = 4;

/// Default number of Lloyd relaxation passes over the interior points.
pub const DEFAULT_SMOOTH_PASSES: usize = 10;

/// Below this optical-depth increment the transfer integral switches to its
/// Taylor form; the default for `Configuration::taylor_cutoff`.
pub const DEFAULT_TAYLOR_CUTOFF: f64 = 0.005;
