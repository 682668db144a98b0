// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Mesh relaxation.
//!
//! Rejection-sampled point sets give tetrahedra of wildly varying aspect
//! ratio. Each pass moves every interior point part-way towards the centroid
//! of its current neighbour set and re-tessellates; a few passes make the
//! mesh noticeably more isotropic without erasing the sampling density.

use log::debug;
use nalgebra::Vector3;

use super::delaunay;
use super::error::GridError;

/// Fraction of the point-to-centroid distance covered per pass.
const RELAX_FRACTION: f64 = 0.5;

/// Relax `points[..n_interior]` in place. Sink points (the tail of the
/// slice) are pinned to the sphere and never move. Moves that would leave
/// the model volume or crowd a current neighbour inside the `min_scale`
/// separation are dropped for that pass rather than clamped; clamping would
/// pile points up against the constraints. Checking the Delaunay neighbours
/// suffices because a point's nearest neighbour is always one of them, and
/// a half-way move towards their centroid stays inside the neighbourhood.
pub fn smooth(
    points: &mut [Vector3<f64>],
    n_interior: usize,
    radius: f64,
    min_scale: f64,
    passes: usize,
) -> Result<(), GridError> {
    let min_scale_squ = min_scale * min_scale;
    for pass in 0..passes {
        let simplices = delaunay::tessellate(points)?;
        let neigh = delaunay::neighbour_lists(points.len(), &simplices)?;

        let mut moved = 0usize;
        for id in 0..n_interior {
            let mut centroid = Vector3::zeros();
            for &k in &neigh[id] {
                centroid += points[k];
            }
            centroid /= neigh[id].len() as f64;

            let target = points[id] + (centroid - points[id]) * RELAX_FRACTION;
            let clear = neigh[id]
                .iter()
                .all(|&k| (target - points[k]).norm_squared() >= min_scale_squ);
            if target.norm() < radius && clear {
                points[id] = target;
                moved += 1;
            }
        }
        debug!("smoothing pass {}: moved {}/{} interior points", pass + 1, moved, n_interior);
    }
    Ok(())
}
