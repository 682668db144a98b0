// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

/*!
Dust continuum.

The dust opacity comes in as a plain-text two-column table (wavelength
\[µm\], opacity \[cm^2 per gram of dust\]), splined against log-wavelength.
From it and the grid fields we precompute, per species, the dust opacity and
emissivity at every line frequency and vertex; the photon engine and the
raytracer add these to every step. Without a dust table the continuum is
identically zero and only the cosmic background remains.
 */

use std::io::BufRead;
use std::path::{Path, PathBuf};

use ndarray::Array2;
use thiserror::Error;

use crate::constants::{AMU, CLIGHT};
use crate::grid::Grid;
use crate::math::{planck, Spline};
use crate::model::Model;
use crate::moldata::MolData;

/// Mean molecular mass per hydrogen molecule, in AMU, used to turn the
/// first collision-partner number density into a gas mass density.
const GAS_MASS_PER_H2: f64 = 2.4;

/// Errors associated with reading a dust opacity table.
#[derive(Error, Debug)]
pub enum ContinuumError {
    #[error("Could not open dust opacity file {0}")]
    BadFile(PathBuf),

    #[error("{file}: line {line_num}: expected two columns, found {found}")]
    ShortLine {
        file: String,
        line_num: usize,
        found: usize,
    },

    #[error("{file}: line {line_num}: could not parse '{string}' as a number")]
    Parse {
        file: String,
        line_num: usize,
        string: String,
    },

    #[error("{file}: a dust opacity table needs at least two rows")]
    TooFewPoints { file: String },

    #[error("{file}: wavelengths must be strictly increasing")]
    NotIncreasing { file: String },

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Splined dust opacity curve.
#[derive(Debug, Clone)]
pub struct DustOpacity {
    /// κ vs. log10(wavelength \[m\]); κ in \[m^2/kg\].
    spline: Spline,
}

impl DustOpacity {
    pub fn from_path<P: AsRef<Path>>(path: P) -> Result<DustOpacity, ContinuumError> {
        let path = path.as_ref();
        let file = std::fs::File::open(path)
            .map_err(|_| ContinuumError::BadFile(path.to_path_buf()))?;
        Self::parse(std::io::BufReader::new(file), &path.display().to_string())
    }

    pub fn parse_str(s: &str, label: &str) -> Result<DustOpacity, ContinuumError> {
        Self::parse(s.as_bytes(), label)
    }

    fn parse<R: BufRead>(reader: R, file: &str) -> Result<DustOpacity, ContinuumError> {
        let mut lam = Vec::new();
        let mut kap = Vec::new();
        for (i, line) in reader.lines().enumerate() {
            let line = line?;
            let trimmed = line.trim();
            if trimmed.is_empty() || trimmed.starts_with('#') {
                continue;
            }
            let fields: Vec<&str> = trimmed.split_whitespace().collect();
            if fields.len() < 2 {
                return Err(ContinuumError::ShortLine {
                    file: file.to_string(),
                    line_num: i + 1,
                    found: fields.len(),
                });
            }
            let parse = |s: &str| -> Result<f64, ContinuumError> {
                s.parse().map_err(|_| ContinuumError::Parse {
                    file: file.to_string(),
                    line_num: i + 1,
                    string: s.to_string(),
                })
            };
            // µm -> m and cm^2/g -> m^2/kg.
            lam.push((parse(fields[0])? * 1e-6).log10());
            kap.push(parse(fields[1])? * 0.1);
        }
        if lam.len() < 2 {
            return Err(ContinuumError::TooFewPoints {
                file: file.to_string(),
            });
        }
        if lam.windows(2).any(|w| w[1] <= w[0]) {
            return Err(ContinuumError::NotIncreasing {
                file: file.to_string(),
            });
        }
        Ok(DustOpacity {
            spline: Spline::new(lam, kap),
        })
    }

    /// Dust opacity at `freq` \[m^2 per kg of dust\].
    pub fn kappa(&self, freq: f64) -> f64 {
        self.spline.sample((CLIGHT / freq).log10()).max(0.0)
    }
}

/// Precomputed continuum fields: per species, dust opacity \[m^-1\] and
/// normalised emissivity at each (vertex, line).
#[derive(Debug)]
pub struct Continuum {
    pub knu: Vec<Array2<f64>>,
    pub dust: Vec<Array2<f64>>,
    /// Effective dust mass density per vertex \[kg m^-3\], kept for
    /// continuum-only images at arbitrary frequency.
    pub rho_dust: Vec<f64>,
}

impl Continuum {
    /// Evaluate the continuum on the grid. `opacity` of `None` gives the
    /// zero continuum.
    pub fn setup(
        grid: &Grid,
        model: &dyn Model,
        mols: &[MolData],
        opacity: Option<&DustOpacity>,
    ) -> Continuum {
        let nvert = grid.vertices.len();
        let rho_dust: Vec<f64> = grid
            .vertices
            .iter()
            .map(|v| {
                let gtd = model.gas_to_dust(&v.pos);
                if gtd > 0.0 {
                    GAS_MASS_PER_H2 * AMU * v.dens[0] / gtd
                } else {
                    0.0
                }
            })
            .collect();

        let mut knu = Vec::with_capacity(mols.len());
        let mut dust = Vec::with_capacity(mols.len());
        for mol in mols {
            let mut k = Array2::zeros((nvert, mol.nline));
            let mut d = Array2::zeros((nvert, mol.nline));
            if let Some(op) = opacity {
                for (iv, v) in grid.vertices.iter().enumerate() {
                    for iline in 0..mol.nline {
                        let kappa = op.kappa(mol.freq[iline]);
                        k[[iv, iline]] = kappa * rho_dust[iv];
                        d[[iv, iline]] = planck(mol.freq[iline], v.t[1]) * mol.norminv;
                    }
                }
            }
            knu.push(k);
            dust.push(d);
        }

        Continuum {
            knu,
            dust,
            rho_dust,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::{assert_abs_diff_eq, assert_relative_eq};
    use indoc::indoc;

    const TABLE: &str = indoc! {"
        # lambda(um)  kappa(cm2/g)
        1.0     1.0e2
        10.0    1.0e1
        100.0   1.0e0
        1000.0  1.0e-1
        10000.0 1.0e-2
    "};

    #[test]
    fn kappa_interpolates_the_table() {
        let dust = DustOpacity::parse_str(TABLE, "table").unwrap();
        // Exactly at a knot: 100 µm, 1 cm^2/g = 0.1 m^2/kg.
        let freq = CLIGHT / 100e-6;
        assert_relative_eq!(dust.kappa(freq), 0.1, max_relative = 1e-9);
        // Between knots the spline stays bracketed by the knot values.
        let mid = dust.kappa(CLIGHT / 31.6e-6);
        assert!(mid > 0.1 && mid < 1.0, "kappa between knots: {mid}");
    }

    #[test]
    fn rejects_bad_tables() {
        assert!(matches!(
            DustOpacity::parse_str("100.0 1.0\n", "t"),
            Err(ContinuumError::TooFewPoints { .. })
        ));
        assert!(matches!(
            DustOpacity::parse_str("100.0 1.0\n50.0 2.0\n", "t"),
            Err(ContinuumError::NotIncreasing { .. })
        ));
        assert!(matches!(
            DustOpacity::parse_str("100.0\n200.0 1.0\n", "t"),
            Err(ContinuumError::ShortLine { .. })
        ));
    }

    #[test]
    fn no_dust_table_means_zero_continuum() {
        let cfg = crate::tests::basic_config(60, 40);
        let model = crate::tests::UniformSphere::default();
        let mols = crate::tests::two_level_mols();
        let grid = Grid::build(&cfg, &model, &mols).unwrap();
        let cont = Continuum::setup(&grid, &model, &mols, None);
        assert_abs_diff_eq!(cont.knu[0].sum(), 0.0);
        assert_abs_diff_eq!(cont.dust[0].sum(), 0.0);
    }
}
