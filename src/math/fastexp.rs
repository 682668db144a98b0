// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Table-driven approximation of `e^-x` for non-negative arguments.
//!
//! The line-profile evaluation calls `exp` once per line per segment per
//! photon; the library call dominates the photon engine's run time if used
//! directly. The argument is split into an integer multiple of
//! 2^-`FAST_EXP_NUM_BITS` (table lookup) and a residual smaller than the
//! table spacing, corrected by a Taylor series truncated at
//! `FAST_EXP_MAX_TAYLOR`. Arguments outside `[0, FAST_EXP_MAX_ARG)` fall back
//! to the library `exp`.

use lazy_static::lazy_static;

use crate::constants::{FAST_EXP_MAX_ARG, FAST_EXP_MAX_TAYLOR, FAST_EXP_NUM_BITS};

/// Table spacing.
const STEP: f64 = 1.0 / (1 << FAST_EXP_NUM_BITS) as f64;

lazy_static! {
    static ref TABLE: Vec<f64> = {
        let n = (FAST_EXP_MAX_ARG / STEP) as usize + 1;
        (0..n).map(|i| (-(i as f64) * STEP).exp()).collect()
    };
}

/// `e^-x`, accurate to ~1e-11 over the table range.
#[inline]
pub fn fast_exp(x: f64) -> f64 {
    if !(0.0..FAST_EXP_MAX_ARG).contains(&x) {
        return (-x).exp();
    }
    let i = (x * (1 << FAST_EXP_NUM_BITS) as f64) as usize;
    let r = x - i as f64 * STEP;
    // Truncated Taylor expansion of e^-r for r in [0, STEP).
    let mut corr = 1.0;
    let mut term = 1.0;
    for k in 1..=FAST_EXP_MAX_TAYLOR {
        term *= -r / k as f64;
        corr += term;
    }
    TABLE[i] * corr
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    #[test]
    fn matches_library_exp_inside_range() {
        for &x in &[0.0, 1e-8, 0.3, 1.0, 4.7, 21.9, 63.99] {
            assert_abs_diff_eq!(fast_exp(x), (-x as f64).exp(), epsilon = 1e-10);
        }
    }

    #[test]
    fn falls_back_outside_range() {
        assert_abs_diff_eq!(fast_exp(-2.0), (2.0f64).exp(), epsilon = 1e-9);
        assert_abs_diff_eq!(fast_exp(500.0), 0.0, epsilon = 1e-200);
    }
}
