// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

/*!
Molecular data.

Catalogues are plain-text LAMDA files: level energies \[cm^-1\] and
degeneracies, radiative transitions with Einstein-A coefficients and rest
frequencies \[GHz\], and one or more collision partners with downward rate
coefficients \[cm^3 s^-1\] tabulated against kinetic temperature.

Parsing converts everything to SI and derives what the solver needs: Einstein
B coefficients, the intensity normalisation constant, the normalised cosmic
background per line, and a cubic-spline tabulation of every collisional
transition. Upward collision rates come from detailed balance at the
evaluation temperature rather than from a second table.
 */

mod error;
pub use error::MolDataError;

use std::io::BufRead;
use std::path::Path;

use log::warn;

use crate::constants::{CLIGHT, HCKB, HPLANCK, TCMB_FALLBACK};
use crate::math::{planck, Spline};

/// One collision partner's tabulated downward rates.
#[derive(Debug, Clone)]
pub struct CollPartner {
    /// Free-form partner label from the catalogue.
    pub name: String,
    /// Tabulation temperatures \[K\], strictly increasing.
    pub temps: Vec<f64>,
    /// Upper level per collisional transition.
    pub lcu: Vec<usize>,
    /// Lower level per collisional transition.
    pub lcl: Vec<usize>,
    /// Downward rate coefficient vs. temperature, one spline per transition
    /// \[m^3 s^-1\].
    pub down: Vec<Spline>,
}

/// Everything the solver knows about one species.
#[derive(Debug, Clone)]
pub struct MolData {
    pub name: String,
    /// Molecular weight \[amu\].
    pub amass: f64,
    pub nlev: usize,
    pub nline: usize,
    /// Energy term per level \[cm^-1\].
    pub eterm: Vec<f64>,
    /// Statistical weight per level.
    pub gstat: Vec<f64>,
    /// Upper level per line.
    pub lau: Vec<usize>,
    /// Lower level per line.
    pub lal: Vec<usize>,
    /// Einstein A per line \[s^-1\].
    pub aeinst: Vec<f64>,
    /// Rest frequency per line \[Hz\].
    pub freq: Vec<f64>,
    /// Einstein B (stimulated emission) per line.
    pub beinstu: Vec<f64>,
    /// Einstein B (absorption) per line.
    pub beinstl: Vec<f64>,
    /// Intensity normalisation: the Planck function at the first line's
    /// frequency for the background temperature (or its fallback).
    pub norm: f64,
    /// 1/norm.
    pub norminv: f64,
    /// Normalised cosmic background intensity per line.
    pub cmb: Vec<f64>,
    pub partners: Vec<CollPartner>,
}

impl MolData {
    /// Read a LAMDA catalogue and derive the solver quantities for a
    /// background temperature `tcmb` \[K\].
    pub fn from_path<P: AsRef<Path>>(path: P, tcmb: f64) -> Result<MolData, MolDataError> {
        let path = path.as_ref();
        let file = std::fs::File::open(path)
            .map_err(|_| MolDataError::BadFile(path.to_path_buf()))?;
        let name = path.display().to_string();
        Self::parse(std::io::BufReader::new(file), &name, tcmb)
    }

    /// Parse a LAMDA catalogue from a string. `label` names the source in
    /// diagnostics.
    pub fn parse_str(s: &str, label: &str, tcmb: f64) -> Result<MolData, MolDataError> {
        Self::parse(s.as_bytes(), label, tcmb)
    }

    fn parse<R: BufRead>(reader: R, file: &str, tcmb: f64) -> Result<MolData, MolDataError> {
        let mut lines = DataLines::new(reader, file)?;

        let mol_name = lines.take("molecule name")?.1.trim().to_string();
        let amass = lines.one_float("molecular weight")?;
        let nlev = lines.one_int("level count")?;

        let mut eterm = Vec::with_capacity(nlev);
        let mut gstat = Vec::with_capacity(nlev);
        for _ in 0..nlev {
            let (line_num, line) = lines.take("energy levels")?;
            let fields: Vec<&str> = line.split_whitespace().collect();
            if fields.len() < 3 {
                return Err(MolDataError::ShortLine {
                    file: file.to_string(),
                    line_num,
                    expected: 3,
                    found: fields.len(),
                });
            }
            eterm.push(lines.parse_float(fields[1], line_num)?);
            gstat.push(lines.parse_float(fields[2], line_num)?);
        }

        let nline = lines.one_int("radiative transition count")?;
        if nlev < 2 || nline == 0 {
            return Err(MolDataError::TooSmall {
                file: file.to_string(),
            });
        }

        let mut lau = Vec::with_capacity(nline);
        let mut lal = Vec::with_capacity(nline);
        let mut aeinst = Vec::with_capacity(nline);
        let mut freq = Vec::with_capacity(nline);
        for itrans in 0..nline {
            let (line_num, line) = lines.take("radiative transitions")?;
            let fields: Vec<&str> = line.split_whitespace().collect();
            if fields.len() < 5 {
                return Err(MolDataError::ShortLine {
                    file: file.to_string(),
                    line_num,
                    expected: 5,
                    found: fields.len(),
                });
            }
            let up = lines.parse_int(fields[1], line_num)?;
            let low = lines.parse_int(fields[2], line_num)?;
            for &level in &[up, low] {
                if level == 0 || level > nlev {
                    return Err(MolDataError::BadLevelIndex {
                        file: file.to_string(),
                        trans: itrans + 1,
                        level,
                        nlev,
                    });
                }
            }
            lau.push(up - 1);
            lal.push(low - 1);
            aeinst.push(lines.parse_float(fields[3], line_num)?);
            // GHz in the catalogue.
            freq.push(lines.parse_float(fields[4], line_num)? * 1e9);
        }

        let npart = lines.one_int("collision partner count")?;
        let mut partners = Vec::with_capacity(npart);
        for ipart in 0..npart {
            let partner_name = lines.take("collision partner id")?.1.trim().to_string();
            let ntrans = lines.one_int("collisional transition count")?;
            let ntemp = lines.one_int("collision temperature count")?;

            let (line_num, line) = lines.take("collision temperatures")?;
            let temps = line
                .split_whitespace()
                .map(|s| lines.parse_float(s, line_num))
                .collect::<Result<Vec<f64>, _>>()?;
            if temps.len() != ntemp {
                return Err(MolDataError::ShortLine {
                    file: file.to_string(),
                    line_num,
                    expected: ntemp,
                    found: temps.len(),
                });
            }
            if ntemp < 2 || temps.windows(2).any(|w| w[1] <= w[0]) {
                return Err(MolDataError::BadTemperatureGrid {
                    file: file.to_string(),
                    partner: ipart + 1,
                });
            }

            let mut lcu = Vec::with_capacity(ntrans);
            let mut lcl = Vec::with_capacity(ntrans);
            let mut down = Vec::with_capacity(ntrans);
            for itrans in 0..ntrans {
                let (line_num, line) = lines.take("collision rates")?;
                let fields: Vec<&str> = line.split_whitespace().collect();
                if fields.len() < 3 + ntemp {
                    return Err(MolDataError::ShortLine {
                        file: file.to_string(),
                        line_num,
                        expected: 3 + ntemp,
                        found: fields.len(),
                    });
                }
                let up = lines.parse_int(fields[1], line_num)?;
                let low = lines.parse_int(fields[2], line_num)?;
                for &level in &[up, low] {
                    if level == 0 || level > nlev {
                        return Err(MolDataError::BadLevelIndex {
                            file: file.to_string(),
                            trans: itrans + 1,
                            level,
                            nlev,
                        });
                    }
                }
                lcu.push(up - 1);
                lcl.push(low - 1);
                let rates = fields[3..3 + ntemp]
                    .iter()
                    // cm^3 s^-1 in the catalogue.
                    .map(|s| lines.parse_float(s, line_num).map(|r| r * 1e-6))
                    .collect::<Result<Vec<f64>, _>>()?;
                down.push(Spline::new(temps.clone(), rates));
            }

            partners.push(CollPartner {
                name: partner_name,
                temps,
                lcu,
                lcl,
                down,
            });
        }

        if partners.is_empty() {
            warn!("{file}: no collision partners; the species can only be solved radiatively");
        }

        // Derived quantities. B_ul = A_ul c^2 / (2 h nu^3), B_lu by detailed
        // balance of the degeneracies.
        let mut beinstu = Vec::with_capacity(nline);
        let mut beinstl = Vec::with_capacity(nline);
        for i in 0..nline {
            let bu = aeinst[i] * (CLIGHT / freq[i]).powi(2) / (2.0 * HPLANCK * freq[i]);
            beinstu.push(bu);
            beinstl.push(bu * gstat[lau[i]] / gstat[lal[i]]);
        }

        let norm = planck(freq[0], if tcmb > 0.0 { tcmb } else { TCMB_FALLBACK });
        let norminv = 1.0 / norm;
        let cmb = freq
            .iter()
            .map(|&nu| if tcmb > 0.0 { planck(nu, tcmb) * norminv } else { 0.0 })
            .collect();

        Ok(MolData {
            name: mol_name,
            amass,
            nlev,
            nline,
            eterm,
            gstat,
            lau,
            lal,
            aeinst,
            freq,
            beinstu,
            beinstl,
            norm,
            norminv,
            cmb,
            partners,
        })
    }

    /// Boltzmann populations at kinetic temperature `t`, written into `out`
    /// (one element per level).
    pub fn boltzmann(&self, t: f64, out: &mut [f64]) {
        debug_assert_eq!(out.len(), self.nlev);
        let mut sum = 0.0;
        for l in 0..self.nlev {
            let p = self.gstat[l] * (-HCKB * self.eterm[l] / t).exp();
            out[l] = p;
            sum += p;
        }
        for p in out.iter_mut() {
            *p /= sum;
        }
    }

    /// Downward and upward collision rate coefficients for partner `ipart`,
    /// transition `itrans`, at kinetic temperature `t` \[m^3 s^-1\].
    pub fn coll_rates(&self, ipart: usize, itrans: usize, t: f64) -> (f64, f64) {
        let partner = &self.partners[ipart];
        let down = partner.down[itrans].sample(t);
        let u = partner.lcu[itrans];
        let l = partner.lcl[itrans];
        let up = down * self.gstat[u] / self.gstat[l]
            * (-HCKB * (self.eterm[u] - self.eterm[l]) / t).exp();
        (down, up)
    }
}

/// Line-number-tracking iterator over the data lines of a catalogue;
/// `!`-prefixed lines are comments.
struct DataLines {
    file: String,
    lines: std::vec::IntoIter<(usize, String)>,
}

impl DataLines {
    fn new<R: BufRead>(reader: R, file: &str) -> Result<DataLines, MolDataError> {
        let mut data = Vec::new();
        for (i, line) in reader.lines().enumerate() {
            let line = line?;
            let trimmed = line.trim();
            if trimmed.is_empty() || trimmed.starts_with('!') {
                continue;
            }
            data.push((i + 1, line));
        }
        Ok(DataLines {
            file: file.to_string(),
            lines: data.into_iter(),
        })
    }

    fn take(&mut self, section: &'static str) -> Result<(usize, String), MolDataError> {
        self.lines.next().ok_or(MolDataError::Truncated {
            file: self.file.clone(),
            section,
        })
    }

    fn one_float(&mut self, section: &'static str) -> Result<f64, MolDataError> {
        let (line_num, line) = self.take(section)?;
        let s = line.split_whitespace().next().unwrap_or("");
        self.parse_float(s, line_num)
    }

    fn one_int(&mut self, section: &'static str) -> Result<usize, MolDataError> {
        let (line_num, line) = self.take(section)?;
        let s = line.split_whitespace().next().unwrap_or("");
        self.parse_int(s, line_num)
    }

    fn parse_float(&self, s: &str, line_num: usize) -> Result<f64, MolDataError> {
        s.parse().map_err(|_| MolDataError::ParseFloat {
            file: self.file.clone(),
            line_num,
            string: s.to_string(),
        })
    }

    fn parse_int(&self, s: &str, line_num: usize) -> Result<usize, MolDataError> {
        s.parse().map_err(|_| MolDataError::ParseInt {
            file: self.file.clone(),
            line_num,
            string: s.to_string(),
        })
    }
}
