// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

/*!
The image raytracer.

One ray per pixel sub-sample is cast through the solved grid along the
camera direction. A ray enters the model at its first intersection with the
bounding sphere and advances in cell-sized steps through the tessellation;
at every step the line and continuum source function and opacity are
interpolated barycentrically over the containing tetrahedron's four
vertices, with velocity-adaptive sub-stepping where the projected velocity
sweeps quickly through the line profile. The transfer equation uses the
two-term expansion of `exp(-tau)` that stays stable for both tiny and large
optical-depth increments.

Polarised (continuum) images accumulate Stokes Q and U from the projected
magnetic-field angle; all three Stokes components share one optical-depth
accumulator. Pixel values come out in Jy/pixel, Kelvin or raw optical
depth; the cube also records the data-stage mask of the grid it was traced
from, so downstream tooling can spot partial solutions.
 */

mod error;
pub use error::RaytraceError;

use indicatif::{ParallelProgressIterator, ProgressBar, ProgressStyle};
use log::info;
use nalgebra::Vector3;
use ndarray::{Array3, Array4};
use rayon::prelude::*;

use crate::constants::{ARCSEC, CLIGHT, EPS, KBOLTZ, MAXP};
use crate::continuum::{Continuum, DustOpacity};
use crate::grid::{DataStage, Grid};
use crate::math::{calc_source_fn, fast_exp, gaussline, planck};
use crate::model::Model;
use crate::moldata::MolData;
use crate::params::{Configuration, ImageParameters, ImageUnit};
use crate::solve::{line_blends, Populations};

/// Velocity sweep per sub-step, in Doppler widths, above which a cell step
/// is subdivided.
const SUBSTEP_WIDTHS: f64 = 0.4;

/// Hard cap on sub-steps per cell step.
const MAX_SUBSTEPS: usize = 8;

/// Safety cap on steps per ray.
const MAX_RAY_STEPS: usize = 50_000;

/// A raytraced image cube.
#[derive(Debug)]
pub struct ImageCube {
    /// Intensity, indexed `(pixel_x, pixel_y, channel, stokes)`.
    pub intensity: Array4<f64>,
    /// Optical depth, indexed `(pixel_x, pixel_y, channel)`.
    pub tau: Array3<f64>,
    /// Data-stage mask of the grid this cube was traced from.
    pub stage: DataStage,
    pub unit: ImageUnit,
    /// Observing frequency \[Hz\].
    pub freq: f64,
}

/// Everything a worker needs per vertex, gathered once before the pixel
/// loop so the inner loop reads flat arrays. All values physical (SI).
struct TraceFields {
    /// Contributing-line velocity offsets relative to the image frequency.
    line_offsets: Vec<f64>,
    /// `jnu0[iv * nlines + il]`: line emissivity sans profile factor.
    jnu0: Vec<f64>,
    /// `alpha0[iv * nlines + il]`: line opacity sans profile factor.
    alpha0: Vec<f64>,
    /// Dust opacity per vertex at the image frequency \[m^-1\].
    knu: Vec<f64>,
    /// Dust emissivity per vertex \[W m^-3 Hz^-1 sr^-1\].
    jdust: Vec<f64>,
    /// Inverse Doppler width per vertex (zero for continuum images).
    binv: Vec<f64>,
    vel: Vec<Vector3<f64>>,
}

/// Raytrace one image through the solved grid.
#[allow(clippy::too_many_arguments)]
pub fn raytrace(
    img: &ImageParameters,
    cfg: &Configuration,
    model: &dyn Model,
    grid: &Grid,
    mols: &[MolData],
    cont: &Continuum,
    dust: Option<&DustOpacity>,
    pops: &Populations,
) -> Result<ImageCube, RaytraceError> {
    let doline = img.trans.is_some();
    if doline {
        grid.stage.require(DataStage::STAGE_MASKS[3])?;
    } else {
        grid.stage.require(DataStage::STAGE_MASKS[2])?;
    }

    let freq = match img.trans {
        Some(trans) => {
            let mol = &mols[img.species];
            if trans >= mol.nline {
                return Err(RaytraceError::BadTransition {
                    mol: mol.name.clone(),
                    trans,
                    nline: mol.nline,
                });
            }
            mol.freq[trans]
        }
        None => img.freq.expect("validated: continuum images carry freq"),
    };

    let fields = gather_fields(img, cfg, model, grid, mols, cont, dust, pops, freq, doline)?;

    let nchan = if doline { img.nchan } else { 1 };
    let polarised = cfg.polarization && !doline;
    let nstokes = if polarised { 3 } else { 1 };
    let pxls = img.pxls;

    // Camera basis: `obs` points from the model to the observer; rays run
    // along -obs. The sky axes complete a right-handed frame.
    let (st, ct) = img.theta.sin_cos();
    let (sp, cp) = img.phi.sin_cos();
    let obs = Vector3::new(st * cp, st * sp, ct);
    let ex = if st.abs() < 1e-12 {
        Vector3::x()
    } else {
        Vector3::new(-sp, cp, 0.0)
    };
    let ey = obs.cross(&ex);
    let ray_dir = -obs;

    // Physical pixel size at the source.
    let pix_size = img.imgres * ARCSEC * img.distance;
    let n_sub = img.antialias;
    let sub_norm = 1.0 / (n_sub * n_sub) as f64;

    let pb = ProgressBar::new((pxls * pxls) as u64)
        .with_style(
            ProgressStyle::with_template(
                "{msg:20}: [{wide_bar:.blue}] {pos:>7}/{len:7} pixels ({elapsed_precise}<{eta_precise})",
            )
            .unwrap()
            .progress_chars("=> "),
        )
        .with_message("Raytracing");

    let pixels: Result<Vec<PixelResult>, RaytraceError> = (0..pxls * pxls)
        .into_par_iter()
        .progress_with(pb)
        .map(|ipix| {
            let px = ipix / pxls;
            let py = ipix % pxls;
            let mut acc = PixelResult::new(nchan, nstokes);
            for a in 0..n_sub {
                for b in 0..n_sub {
                    let xi = (px as f64 - pxls as f64 / 2.0 + (a as f64 + 0.5) / n_sub as f64)
                        * pix_size;
                    let yi = (py as f64 - pxls as f64 / 2.0 + (b as f64 + 0.5) / n_sub as f64)
                        * pix_size;
                    let origin = ex * xi + ey * yi;
                    let ray = trace_ray(
                        img, cfg, model, grid, &fields, &origin, &ray_dir, &obs, &ex, &ey, nchan,
                        polarised, freq, doline,
                    )?;
                    acc.add(&ray, sub_norm);
                }
            }
            Ok(acc)
        })
        .collect();
    let pixels = pixels?;

    // Assemble and convert units.
    let mut intensity = Array4::zeros((pxls, pxls, nchan, nstokes));
    let mut tau = Array3::zeros((pxls, pxls, nchan));
    let pixel_sr = (img.imgres * ARCSEC).powi(2);
    for (ipix, pix) in pixels.iter().enumerate() {
        let px = ipix / pxls;
        let py = ipix % pxls;
        for ichan in 0..nchan {
            tau[[px, py, ichan]] = pix.tau[ichan];
            for istokes in 0..nstokes {
                let raw = pix.intensity[ichan * nstokes + istokes];
                intensity[[px, py, ichan, istokes]] = match img.unit {
                    ImageUnit::JanskyPerPixel => raw * 1e26 * pixel_sr,
                    ImageUnit::Kelvin => {
                        raw * CLIGHT * CLIGHT / (2.0 * KBOLTZ * freq * freq)
                    }
                    ImageUnit::Tau => pix.tau[ichan],
                };
            }
        }
    }

    info!(
        "Raytraced {}x{} pixels, {} channels{}",
        pxls,
        pxls,
        nchan,
        if polarised { ", Stokes I/Q/U" } else { "" }
    );
    Ok(ImageCube {
        intensity,
        tau,
        stage: grid.stage,
        unit: img.unit,
        freq,
    })
}

struct PixelResult {
    /// `intensity[ichan * nstokes + istokes]`.
    intensity: Vec<f64>,
    tau: Vec<f64>,
}

impl PixelResult {
    fn new(nchan: usize, nstokes: usize) -> PixelResult {
        PixelResult {
            intensity: vec![0.0; nchan * nstokes],
            tau: vec![0.0; nchan],
        }
    }

    fn add(&mut self, other: &PixelResult, weight: f64) {
        for (dst, src) in self.intensity.iter_mut().zip(&other.intensity) {
            *dst += src * weight;
        }
        for (dst, src) in self.tau.iter_mut().zip(&other.tau) {
            *dst += src * weight;
        }
    }
}

/// Precompute the per-vertex trace fields.
#[allow(clippy::too_many_arguments)]
fn gather_fields(
    img: &ImageParameters,
    cfg: &Configuration,
    _model: &dyn Model,
    grid: &Grid,
    mols: &[MolData],
    cont: &Continuum,
    dust: Option<&DustOpacity>,
    pops: &Populations,
    freq: f64,
    doline: bool,
) -> Result<TraceFields, RaytraceError> {
    use crate::constants::HPIP;

    let nvert = grid.vertices.len();
    let mut fields = TraceFields {
        line_offsets: Vec::new(),
        jnu0: Vec::new(),
        alpha0: Vec::new(),
        knu: vec![0.0; nvert],
        jdust: vec![0.0; nvert],
        binv: vec![0.0; nvert],
        vel: grid.vertices.iter().map(|v| v.vel).collect(),
    };

    if doline {
        let ispec = img.species;
        let trans = img.trans.unwrap();
        let mol = &mols[ispec];

        // The imaged line plus, when blending is on, its blend partners.
        let mut lines = vec![trans];
        if cfg.blend {
            let table = line_blends(mols);
            for &(jline, _) in &table[ispec][trans] {
                lines.push(jline);
            }
        }
        fields.line_offsets = lines
            .iter()
            .map(|&il| (mol.freq[il] - freq) * CLIGHT / mol.freq[il])
            .collect();

        let nlines = lines.len();
        fields.jnu0 = vec![0.0; nvert * nlines];
        fields.alpha0 = vec![0.0; nvert * nlines];
        for (iv, v) in grid.vertices.iter().enumerate() {
            fields.binv[iv] = v.binv[ispec];
            for (c, &il) in lines.iter().enumerate() {
                let u = mol.lau[il];
                let l = mol.lal[il];
                let pop_u = pops.species[ispec][[iv, u]];
                let pop_l = pops.species[ispec][[iv, l]];
                let common = HPIP * v.binv[ispec] * v.nmol[ispec];
                fields.jnu0[iv * nlines + c] = common * pop_u * mol.aeinst[il];
                fields.alpha0[iv * nlines + c] =
                    common * (pop_l * mol.beinstl[il] - pop_u * mol.beinstu[il]);
            }
            fields.knu[iv] = cont.knu[ispec][[iv, trans]];
            fields.jdust[iv] = fields.knu[iv] * cont.dust[ispec][[iv, trans]] * mol.norm;
        }
    } else {
        // Continuum image at an arbitrary frequency.
        let op = dust.ok_or(RaytraceError::NoDustOpacity)?;
        let kappa = op.kappa(freq);
        for (iv, v) in grid.vertices.iter().enumerate() {
            fields.knu[iv] = kappa * cont.rho_dust[iv];
            fields.jdust[iv] = fields.knu[iv] * planck(freq, v.t[1]);
        }
    }

    Ok(fields)
}

/// Integrate the transfer equation along one ray. Returns per-channel
/// intensity (all Stokes) and optical depth.
#[allow(clippy::too_many_arguments)]
fn trace_ray(
    img: &ImageParameters,
    cfg: &Configuration,
    model: &dyn Model,
    grid: &Grid,
    fields: &TraceFields,
    origin: &Vector3<f64>,
    dir: &Vector3<f64>,
    obs: &Vector3<f64>,
    ex: &Vector3<f64>,
    ey: &Vector3<f64>,
    nchan: usize,
    polarised: bool,
    freq: f64,
    doline: bool,
) -> Result<PixelResult, RaytraceError> {
    let nstokes = if polarised { 3 } else { 1 };
    let mut out = PixelResult::new(nchan, nstokes);

    let b2 = origin.norm_squared();
    let r2 = grid.radius * grid.radius;
    let cmb = planck(freq, cfg.tcmb);
    if b2 >= r2 {
        // The ray misses the model; the background comes through untouched.
        for ichan in 0..nchan {
            out.intensity[ichan * nstokes] = cmb;
        }
        return Ok(out);
    }

    let half_chord = (r2 - b2).sqrt();
    // A nudge keeps the entry point off the hull boundary.
    let eps = grid.radius * 1e-9;
    let mut t = -half_chord + eps;
    let t_end = half_chord - eps;
    let mut x = origin + dir * t;
    let mut hint = 0usize;
    let default_step = grid.radius * 1e-2;

    let nlines = fields.line_offsets.len();
    let mut steps = 0;
    while t < t_end {
        steps += 1;
        if steps > MAX_RAY_STEPS {
            return Err(RaytraceError::Grid(crate::grid::GridError::WalkStuck));
        }

        let located = grid.locate(&x, hint)?;
        let (icell, ds_cell) = match located {
            Some(icell) => {
                hint = icell;
                (Some(icell), grid.cells[icell].size.min(t_end - t).max(eps))
            }
            // Outside the hull but inside the sphere: skip across the gap.
            None => (None, default_step.min(t_end - t).max(eps)),
        };

        if let Some(icell) = icell {
            // Sub-step when the projected velocity crosses the profile
            // quickly within this cell step.
            let nsub = if doline {
                let v0 = interp_vel(grid, fields, icell, &x).dot(obs);
                let x1 = x + dir * ds_cell;
                let v1 = interp_vel(grid, fields, icell, &x1).dot(obs);
                let binv = fields.binv[grid.cells[icell].verts[0]].max(EPS);
                (((v1 - v0).abs() * binv / SUBSTEP_WIDTHS) as usize + 1).min(MAX_SUBSTEPS)
            } else {
                1
            };
            let ds = ds_cell / nsub as f64;

            for isub in 0..nsub {
                let mid = x + dir * (ds * (isub as f64 + 0.5));
                let mid_cell = grid.locate(&mid, hint)?.unwrap_or(icell);
                hint = mid_cell;
                let bary = grid.bary(mid_cell, &mid);
                let verts = grid.cells[mid_cell].verts;

                // Barycentric interpolation of the vertex quantities.
                let mut knu = 0.0;
                let mut jdust = 0.0;
                let mut binv = 0.0;
                let mut vel = Vector3::zeros();
                for (w, &iv) in bary.iter().zip(&verts) {
                    knu += w * fields.knu[iv];
                    jdust += w * fields.jdust[iv];
                    binv += w * fields.binv[iv];
                    vel += fields.vel[iv] * *w;
                }
                knu = knu.max(0.0);
                let v_recede = -vel.dot(obs);

                for ichan in 0..nchan {
                    let v_chan = (ichan as f64 - (nchan as f64 - 1.0) / 2.0) * img.velres
                        - img.source_vel;
                    let mut jnu = jdust;
                    let mut alpha = knu;
                    for il in 0..nlines {
                        let varg = v_chan + fields.line_offsets[il] - v_recede;
                        let vfac = gaussline(varg, binv);
                        let mut j0 = 0.0;
                        let mut a0 = 0.0;
                        for (w, &iv) in bary.iter().zip(&verts) {
                            j0 += w * fields.jnu0[iv * nlines + il];
                            a0 += w * fields.alpha0[iv * nlines + il];
                        }
                        jnu += j0 * vfac;
                        alpha += a0 * vfac;
                    }

                    let dtau = alpha * ds;
                    let (remnant, _) = calc_source_fn(dtau, cfg.taylor_cutoff);
                    let attenuation = fast_exp(out.tau[ichan]);
                    out.intensity[ichan * nstokes] += attenuation * remnant * jnu * ds;

                    if polarised {
                        if let Some(bfield) = model.magfield(&mid) {
                            let bx = bfield.dot(ex);
                            let by = bfield.dot(ey);
                            let b_perp2 = bx * bx + by * by;
                            let b_tot2 = b_perp2 + bfield.dot(obs).powi(2);
                            if b_tot2 > EPS {
                                // cos^2 of the field's angle to the sky
                                // plane, and twice its position angle.
                                let cos2gamma = b_perp2 / b_tot2;
                                let psi = by.atan2(bx);
                                let base = attenuation * remnant * jdust * ds * MAXP * cos2gamma;
                                out.intensity[ichan * nstokes] +=
                                    attenuation * remnant * jdust * ds
                                        * (-MAXP * (cos2gamma - 2.0 / 3.0));
                                out.intensity[ichan * nstokes + 1] += base * (2.0 * psi).cos();
                                out.intensity[ichan * nstokes + 2] += base * (2.0 * psi).sin();
                            }
                        }
                    }

                    out.tau[ichan] += dtau;
                }
            }
        }

        // Recompute from the parameter to keep x exactly on the ray.
        t += ds_cell;
        x = origin + dir * t;
    }

    // The far boundary: the cosmic background shines through.
    if cmb > 0.0 {
        for ichan in 0..nchan {
            out.intensity[ichan * nstokes] += fast_exp(out.tau[ichan]) * cmb;
        }
    }
    Ok(out)
}

/// Velocity at `x` interpolated over the cell's vertices.
#[inline]
fn interp_vel(grid: &Grid, fields: &TraceFields, icell: usize, x: &Vector3<f64>) -> Vector3<f64> {
    let bary = grid.bary(icell, x);
    let verts = grid.cells[icell].verts;
    let mut vel = Vector3::zeros();
    for (w, &iv) in bary.iter().zip(&verts) {
        vel += fields.vel[iv] * *w;
    }
    vel
}

/// Solid angle of one pixel \[sr\] — exposed for output collaborators that
/// need to convert units themselves.
pub fn pixel_solid_angle(img: &ImageParameters) -> f64 {
    (img.imgres * ARCSEC).powi(2)
}

/// Flux-conversion helper: Rayleigh-Jeans brightness temperature of an
/// intensity at `freq`.
pub fn brightness_temperature(intensity: f64, freq: f64) -> f64 {
    intensity * CLIGHT * CLIGHT / (2.0 * KBOLTZ * freq * freq)
}
