// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Random placement of grid points inside the model volume.
//!
//! Interior points are drawn by rejection against an acceptance weight
//! derived from the model (or supplied by it), with the radial distribution
//! set by the configured [`Sampling`] selector. A candidate closer than the
//! minimum scale to any already-accepted interior point is rejected, so the
//! finished set keeps a true minimum pairwise separation. Sink points are
//! uniform on the bounding sphere.

use std::collections::HashMap;

use nalgebra::Vector3;
use rand::Rng;
use rand_pcg::Pcg64;

use crate::constants::MAXP;
use crate::model::Model;
use crate::params::{Configuration, Sampling};

use super::error::GridError;

/// Exponent applied to the normalised density when it acts as the sampling
/// weight.
const DENSITY_EXPONENT: f64 = 0.2;

/// Give up after this many candidate draws per wanted point.
const MAX_DRAWS_PER_POINT: usize = 10_000;

/// A unit vector drawn uniformly from the sphere.
pub(crate) fn uniform_direction(rng: &mut Pcg64) -> Vector3<f64> {
    let z: f64 = 2.0 * rng.gen::<f64>() - 1.0;
    let phi = 2.0 * std::f64::consts::PI * rng.gen::<f64>();
    let s = (1.0 - z * z).max(0.0).sqrt();
    Vector3::new(s * phi.cos(), s * phi.sin(), z)
}

/// Accepted points bucketed at the separation scale. With buckets exactly
/// `min_scale` wide, any point within the separation of a candidate lives in
/// one of the 27 buckets around the candidate's own.
struct SeparationIndex {
    inv_scale: f64,
    min_scale_squ: f64,
    buckets: HashMap<[i64; 3], Vec<Vector3<f64>>>,
}

impl SeparationIndex {
    fn new(min_scale: f64) -> SeparationIndex {
        SeparationIndex {
            inv_scale: 1.0 / min_scale,
            min_scale_squ: min_scale * min_scale,
            buckets: HashMap::new(),
        }
    }

    fn key(&self, p: &Vector3<f64>) -> [i64; 3] {
        [
            (p.x * self.inv_scale).floor() as i64,
            (p.y * self.inv_scale).floor() as i64,
            (p.z * self.inv_scale).floor() as i64,
        ]
    }

    /// True when `p` keeps the minimum separation from every accepted point.
    fn is_clear(&self, p: &Vector3<f64>) -> bool {
        let [i, j, k] = self.key(p);
        for di in -1..=1 {
            for dj in -1..=1 {
                for dk in -1..=1 {
                    if let Some(bucket) = self.buckets.get(&[i + di, j + dj, k + dk]) {
                        if bucket
                            .iter()
                            .any(|q| (p - q).norm_squared() < self.min_scale_squ)
                        {
                            return false;
                        }
                    }
                }
            }
        }
        true
    }

    fn insert(&mut self, p: Vector3<f64>) {
        self.buckets.entry(self.key(&p)).or_default().push(p);
    }
}

/// Sample all grid positions: `p_intensity` interior points followed by
/// `sink_points` boundary points.
pub fn sample_points(
    cfg: &Configuration,
    model: &dyn Model,
    rng: &mut Pcg64,
) -> Result<Vec<Vector3<f64>>, GridError> {
    let mut points = Vec::with_capacity(cfg.ncell());
    let mut sep = SeparationIndex::new(cfg.min_scale);
    let mut dens = vec![0.0; model.num_densities()];

    // Reference density for weight normalisation: the densest of a handful
    // of probes at the inner sampling scale.
    let mut dens_ref = 0.0;
    for dir in [Vector3::x(), Vector3::y(), Vector3::z()] {
        let probe: Vector3<f64> = dir * cfg.min_scale;
        model.density(&probe, &mut dens);
        dens_ref = f64::max(dens_ref, dens[0]);
    }

    let mut attempts = 0usize;
    while points.len() < cfg.p_intensity {
        attempts += 1;
        if attempts > MAX_DRAWS_PER_POINT * cfg.p_intensity {
            return Err(GridError::SamplingStalled {
                accepted: points.len(),
                wanted: cfg.p_intensity,
                attempts,
            });
        }

        let dir = uniform_direction(rng);
        let r = match cfg.sampling {
            // Uniform in log(r); a log distribution needs a non-zero inner
            // bound, and the separation scale is the natural one.
            Sampling::LogDensity => {
                cfg.min_scale * (cfg.radius / cfg.min_scale).powf(rng.gen::<f64>())
            }
            // Uniform in volume.
            Sampling::Density | Sampling::Uniform => cfg.radius * rng.gen::<f64>().cbrt(),
        };
        let pos = dir * r;

        let weight = match model.sample_weight(&pos) {
            Some(w) => w.clamp(0.0, 1.0),
            None => match cfg.sampling {
                Sampling::Uniform => 1.0,
                Sampling::LogDensity | Sampling::Density => {
                    if dens_ref <= 0.0 {
                        1.0
                    } else {
                        model.density(&pos, &mut dens);
                        (dens[0] / dens_ref).clamp(0.0, 1.0).powf(DENSITY_EXPONENT)
                    }
                }
            },
        };

        // MAXP is the uniform floor mixed into the acceptance probability.
        // Candidates that crowd an accepted point inside the minimum scale
        // separation are rejected outright.
        if rng.gen::<f64>() < MAXP + (1.0 - MAXP) * weight && sep.is_clear(&pos) {
            sep.insert(pos);
            points.push(pos);
        }
    }

    for _ in 0..cfg.sink_points {
        points.push(uniform_direction(rng) * cfg.radius);
    }

    Ok(points)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tests::UniformSphere;
    use rand::SeedableRng;

    fn config() -> Configuration {
        crate::tests::basic_config(400, 100)
    }

    #[test]
    fn counts_and_placement() {
        let cfg = config();
        let model = UniformSphere::default();
        let mut rng = Pcg64::seed_from_u64(1);
        let points = sample_points(&cfg, &model, &mut rng).unwrap();
        assert_eq!(points.len(), cfg.ncell());
        for p in &points[..cfg.p_intensity] {
            assert!(p.norm() < cfg.radius, "interior point at r = {}", p.norm());
        }
        for p in &points[cfg.p_intensity..] {
            approx::assert_relative_eq!(p.norm(), cfg.radius, max_relative = 1e-12);
        }
    }

    #[test]
    fn interior_points_keep_the_minimum_separation() {
        let cfg = config();
        let model = UniformSphere::default();
        let mut rng = Pcg64::seed_from_u64(2);
        let points = sample_points(&cfg, &model, &mut rng).unwrap();
        let interior = &points[..cfg.p_intensity];
        for i in 0..interior.len() {
            for j in i + 1..interior.len() {
                let d = (interior[i] - interior[j]).norm();
                assert!(
                    d >= cfg.min_scale,
                    "points {i} and {j} are only {d} apart (min {})",
                    cfg.min_scale
                );
            }
        }
    }

    #[test]
    fn deterministic_for_a_given_seed() {
        let cfg = config();
        let model = UniformSphere::default();
        let a = sample_points(&cfg, &model, &mut Pcg64::seed_from_u64(7)).unwrap();
        let b = sample_points(&cfg, &model, &mut Pcg64::seed_from_u64(7)).unwrap();
        assert_eq!(a, b);
    }
}
