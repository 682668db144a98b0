// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Delaunay tessellation of the point set.
//!
//! The tessellation itself is delegated to Qhull through the `qhull` crate;
//! only the traversal of its output — tetrahedron extraction, neighbour
//! lists, face adjacency — lives here.

use std::collections::HashMap;

use nalgebra::{Matrix3, Vector3};
use qhull::Qh;

use super::error::GridError;

/// One tetrahedron of the tessellation.
#[derive(Debug, Clone)]
pub struct Cell {
    /// Vertex ids, in Qhull's output order.
    pub verts: [usize; 4],
    /// Adjacent cell across the face opposite `verts[i]`, `None` on the hull.
    pub neigh: [Option<usize>; 4],
    /// Inverse of the edge matrix, for barycentric coordinates.
    pub bary_inv: Matrix3<f64>,
    /// Shortest edge length; the raytracer's step size through this cell.
    pub size: f64,
}

/// Tessellate `points` and return the tetrahedra as vertex-id quadruples.
pub fn tessellate(points: &[Vector3<f64>]) -> Result<Vec<[usize; 4]>, GridError> {
    let qh = Qh::new_delaunay(points.iter().map(|p| [p.x, p.y, p.z]))
        .map_err(|e| GridError::TessellationFailed(format!("{e:?}")))?;

    let mut simplices = Vec::new();
    for simplex in qh.simplices() {
        // Facets on the upper side of the lifting paraboloid are not part of
        // the triangulation.
        if let Some(normal) = simplex.normal() {
            if normal.last().map_or(false, |&c| c > 0.0) {
                continue;
            }
        }
        let ids: Vec<usize> = simplex
            .vertices()
            .ok_or_else(|| {
                GridError::TessellationFailed("facet without vertex set".to_string())
            })?
            .iter()
            .filter_map(|v| v.index(&qh))
            .collect();
        if ids.len() != 4 {
            continue;
        }
        simplices.push([ids[0], ids[1], ids[2], ids[3]]);
    }

    if simplices.is_empty() {
        return Err(GridError::TessellationFailed(
            "no tetrahedra in the triangulation".to_string(),
        ));
    }
    Ok(simplices)
}

/// Build the cell array (with adjacency and barycentric matrices) from the
/// raw simplices.
pub fn build_cells(
    points: &[Vector3<f64>],
    simplices: &[[usize; 4]],
) -> Result<Vec<Cell>, GridError> {
    let mut cells = Vec::with_capacity(simplices.len());
    for (icell, s) in simplices.iter().enumerate() {
        let p0 = points[s[0]];
        let e = Matrix3::from_columns(&[
            points[s[1]] - p0,
            points[s[2]] - p0,
            points[s[3]] - p0,
        ]);
        let volume = e.determinant().abs() / 6.0;
        let bary_inv = e.try_inverse().ok_or(GridError::DegenerateSimplex {
            cell: icell,
            volume,
        })?;
        let mut size = f64::INFINITY;
        for i in 0..4 {
            for j in i + 1..4 {
                size = size.min((points[s[i]] - points[s[j]]).norm());
            }
        }
        cells.push(Cell {
            verts: *s,
            neigh: [None; 4],
            bary_inv,
            size,
        });
    }

    // Face adjacency: two cells sharing a sorted vertex triple are
    // neighbours across it.
    let mut face_map: HashMap<[usize; 3], (usize, usize)> = HashMap::new();
    for (icell, s) in simplices.iter().enumerate() {
        for iface in 0..4 {
            let mut face = [0usize; 3];
            let mut n = 0;
            for (k, &v) in s.iter().enumerate() {
                if k != iface {
                    face[n] = v;
                    n += 1;
                }
            }
            face.sort_unstable();
            match face_map.remove(&face) {
                Some((other_cell, other_face)) => {
                    cells[icell].neigh[iface] = Some(other_cell);
                    cells[other_cell].neigh[other_face] = Some(icell);
                }
                None => {
                    face_map.insert(face, (icell, iface));
                }
            }
        }
    }

    Ok(cells)
}

/// Per-vertex neighbour lists from the simplices: two vertices are
/// neighbours when they share a tetrahedron edge.
pub fn neighbour_lists(
    npoints: usize,
    simplices: &[[usize; 4]],
) -> Result<Vec<Vec<usize>>, GridError> {
    let mut neigh: Vec<Vec<usize>> = vec![Vec::new(); npoints];
    for s in simplices {
        for i in 0..4 {
            for j in 0..4 {
                if i != j && !neigh[s[i]].contains(&s[j]) {
                    neigh[s[i]].push(s[j]);
                }
            }
        }
    }
    for (id, list) in neigh.iter_mut().enumerate() {
        if list.is_empty() {
            return Err(GridError::IsolatedVertex(id));
        }
        // A deterministic ordering keeps snapshots and RNG streams stable.
        list.sort_unstable();
    }
    Ok(neigh)
}
