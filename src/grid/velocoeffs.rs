// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Per-edge velocity interpolation coefficients.
//!
//! For every directed edge the line-of-sight component of the model velocity
//! field is sampled at five equispaced points and fitted with a quartic in
//! the fractional arc length `s`. The fit interpolates, so `a0` is exactly
//! the projected velocity at the near endpoint and `a0+a1+a2+a3+a4` exactly
//! that at the far endpoint.

use nalgebra::Vector3;

use crate::constants::NUM_VEL_COEFFS;
use crate::model::Model;

/// Lagrange basis coefficients on the nodes {0, 1, 2, 3, 4}: `LAGRANGE[i][k]`
/// is the t^k coefficient of the basis polynomial through node i.
const LAGRANGE: [[f64; NUM_VEL_COEFFS]; NUM_VEL_COEFFS] = [
    [1.0, -25.0 / 12.0, 35.0 / 24.0, -5.0 / 12.0, 1.0 / 24.0],
    [0.0, 4.0, -13.0 / 3.0, 3.0 / 2.0, -1.0 / 6.0],
    [0.0, -3.0, 19.0 / 4.0, -2.0, 1.0 / 4.0],
    [0.0, 4.0 / 3.0, -7.0 / 3.0, 7.0 / 6.0, -1.0 / 6.0],
    [0.0, -1.0 / 4.0, 11.0 / 24.0, -1.0 / 4.0, 1.0 / 24.0],
];

/// Scalar projection of a velocity onto a unit direction.
#[inline]
pub fn veloproject(dir: &Vector3<f64>, vel: &Vector3<f64>) -> f64 {
    dir.dot(vel)
}

/// Fit the quartic for the edge from `from` towards `to` with unit direction
/// `dir` (pointing from `from` to `to`).
pub fn fit_edge(
    model: &dyn Model,
    from: &Vector3<f64>,
    to: &Vector3<f64>,
    dir: &Vector3<f64>,
) -> [f64; NUM_VEL_COEFFS] {
    let mut samples = [0.0; NUM_VEL_COEFFS];
    for (i, sample) in samples.iter_mut().enumerate() {
        let s = i as f64 / (NUM_VEL_COEFFS - 1) as f64;
        let pos = from + (to - from) * s;
        *sample = veloproject(dir, &model.velocity(&pos));
    }

    // a_k in s = (sum_i v_i L_i[k]) * 4^k, the node spacing being 1/4.
    let mut coeffs = [0.0; NUM_VEL_COEFFS];
    let mut scale = 1.0;
    for (k, coeff) in coeffs.iter_mut().enumerate() {
        let mut c = 0.0;
        for i in 0..NUM_VEL_COEFFS {
            c += samples[i] * LAGRANGE[i][k];
        }
        *coeff = c * scale;
        scale *= 4.0;
    }
    coeffs
}

/// Coefficients of the reversed edge. Both directions interpolate the same
/// five samples, so `p_rev(s) = -p_fwd(1-s)` exactly; this expands that
/// identity instead of re-sampling the model.
pub fn reverse(coeffs: &[f64; NUM_VEL_COEFFS]) -> [f64; NUM_VEL_COEFFS] {
    // Binomial expansion of -sum_j a_j (1-s)^j.
    let mut rev = [0.0; NUM_VEL_COEFFS];
    let binom: [[f64; NUM_VEL_COEFFS]; NUM_VEL_COEFFS] = [
        [1.0, 0.0, 0.0, 0.0, 0.0],
        [1.0, 1.0, 0.0, 0.0, 0.0],
        [1.0, 2.0, 1.0, 0.0, 0.0],
        [1.0, 3.0, 3.0, 1.0, 0.0],
        [1.0, 4.0, 6.0, 4.0, 1.0],
    ];
    for j in 0..NUM_VEL_COEFFS {
        for (k, rev_k) in rev.iter_mut().enumerate().take(j + 1) {
            let sign = if k % 2 == 0 { 1.0 } else { -1.0 };
            *rev_k -= coeffs[j] * binom[j][k] * sign;
        }
    }
    rev
}

/// Evaluate the fitted polynomial at fractional arc length `s` in `[0, 1]`.
#[inline]
pub fn eval(coeffs: &[f64; NUM_VEL_COEFFS], s: f64) -> f64 {
    // Horner.
    let mut v = coeffs[NUM_VEL_COEFFS - 1];
    for k in (0..NUM_VEL_COEFFS - 1).rev() {
        v = v * s + coeffs[k];
    }
    v
}
