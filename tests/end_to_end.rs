// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! End-to-end scenarios driven through the public API.

use indoc::indoc;
use nalgebra::Vector3;

use linerad::{
    continuum::Continuum,
    moldata::MolData,
    raytrace::{brightness_temperature, raytrace},
    snapshot,
    solve::{self, Populations},
    Configuration, DataStage, DustOpacity, Grid, ImageUnit, Model,
};

const PC: f64 = 3.08568025e16;

const TWO_LEVEL: &str = indoc! {"
    !MOLECULE
    CO
    !MOLECULAR WEIGHT
    28.0
    !NUMBER OF ENERGY LEVELS
    2
    !LEVEL + ENERGIES(cm^-1) + WEIGHT + J
    1 0.000000000 1.0 0
    2 3.845033413 3.0 1
    !NUMBER OF RADIATIVE TRANSITIONS
    1
    !TRANS + UP + LOW + EINSTEINA(s^-1) + FREQ(GHz) + E_u(K)
    1 2 1 7.203e-8 115.2712018 5.53
    !NUMBER OF COLL PARTNERS
    1
    !COLLISIONS BETWEEN
    1 CO-H2
    !NUMBER OF COLL TRANS
    1
    !NUMBER OF COLL TEMPS
    4
    !COLL TEMPS
    10.0 20.0 50.0 100.0
    !COLL TRANS + UP + LOW + RATE COEFFS(cm^3 s^-1)
    1 2 1 3.2e-11 3.3e-11 3.5e-11 3.7e-11
"};

/// Four levels; the 3->1 and 4->1 lines sit 5 km/s apart, half the blend
/// mask, while 2->1 is far from both.
const BLEND_PAIR: &str = indoc! {"
    !MOLECULE
    blendy
    !MOLECULAR WEIGHT
    30.0
    !NUMBER OF ENERGY LEVELS
    4
    !LEVEL + ENERGY + WEIGHT
    1 0.0        1.0
    2 1.0        3.0
    3 3.3356409  5.0
    4 3.3356966  7.0
    !NUMBER OF RADIATIVE TRANSITIONS
    2
    !TRANS UP LOW A FREQ EU
    1 3 1 1.0e-7 100.0        4.8
    2 4 1 1.0e-7 100.00166818 4.8
    !NUMBER OF COLL PARTNERS
    0
"};

const DUST_TABLE: &str = indoc! {"
    # lambda(um) kappa(cm2/g)
    1.0     1.0e2
    10.0    1.0e1
    100.0   1.0e0
    1000.0  1.0e-1
    10000.0 1.0e-2
"};

fn base_toml(extra: &str) -> Configuration {
    let text = format!(
        r#"
        radius = 1.0e13
        min_scale = 1.0e11
        tcmb = 2.725
        p_intensity = 250
        sink_points = 120
        sampling = "uniform"
        n_threads = 2
        seed = 42
        n_solve_iters = 3
        n_smooth_passes = 2
        lte_only = true
        {extra}
        "#
    );
    Configuration::from_toml_str(&text).unwrap()
}

struct Sphere {
    density: f64,
    magfield: Option<Vector3<f64>>,
}

impl Default for Sphere {
    fn default() -> Sphere {
        Sphere {
            density: 1e13,
            magfield: None,
        }
    }
}

impl Model for Sphere {
    fn num_densities(&self) -> usize {
        1
    }
    fn num_species(&self) -> usize {
        1
    }
    fn density(&self, _pos: &Vector3<f64>, out: &mut [f64]) {
        out[0] = self.density;
    }
    fn temperature(&self, _pos: &Vector3<f64>) -> [f64; 2] {
        [20.0, -1.0]
    }
    fn abundance(&self, _pos: &Vector3<f64>, out: &mut [f64]) {
        out[0] = 1e-9;
    }
    fn doppler(&self, _pos: &Vector3<f64>) -> f64 {
        100.0
    }
    fn velocity(&self, _pos: &Vector3<f64>) -> Vector3<f64> {
        Vector3::zeros()
    }
    fn magfield(&self, _pos: &Vector3<f64>) -> Option<Vector3<f64>> {
        self.magfield
    }
}

/// A geometrically thin Keplerian disk in the xy-plane.
struct KeplerianDisk {
    /// GM of the central mass \[m^3 s^-2\].
    gm: f64,
    r_in: f64,
    r_out: f64,
    scale_height: f64,
}

impl Model for KeplerianDisk {
    fn num_densities(&self) -> usize {
        1
    }
    fn num_species(&self) -> usize {
        1
    }
    fn density(&self, pos: &Vector3<f64>, out: &mut [f64]) {
        let r = (pos.x * pos.x + pos.y * pos.y).sqrt();
        out[0] = if r > self.r_in && r < self.r_out {
            1e14 * (-0.5 * (pos.z / self.scale_height).powi(2)).exp()
        } else {
            0.0
        };
    }
    fn temperature(&self, _pos: &Vector3<f64>) -> [f64; 2] {
        [30.0, -1.0]
    }
    fn abundance(&self, _pos: &Vector3<f64>, out: &mut [f64]) {
        out[0] = 1e-9;
    }
    fn doppler(&self, _pos: &Vector3<f64>) -> f64 {
        150.0
    }
    fn velocity(&self, pos: &Vector3<f64>) -> Vector3<f64> {
        let r = (pos.x * pos.x + pos.y * pos.y).sqrt().max(self.r_in);
        let vk = (self.gm / r).sqrt();
        // Azimuthal, anticlockwise seen from +z.
        Vector3::new(-pos.y / r * vk, pos.x / r * vk, 0.0)
    }
}

fn lte_pipeline(
    cfg: &Configuration,
    model: &dyn Model,
    mols: &[MolData],
) -> (Grid, Populations, Continuum) {
    let mut grid = Grid::build(cfg, model, mols).unwrap();
    let cont = Continuum::setup(&grid, model, mols, None);
    let (pops, _) = solve::solve(cfg, &mut grid, mols, &cont, None).unwrap();
    (grid, pops, cont)
}

/// Scenario: the full driver path, with snapshots written at stages three
/// and four.
#[test]
fn full_run_with_snapshots_and_image() {
    let dir = tempfile::tempdir().unwrap();
    let moldat = dir.path().join("co.dat");
    std::fs::write(&moldat, TWO_LEVEL).unwrap();
    let s3 = dir.path().join("stage3.lrgd");
    let s4 = dir.path().join("stage4.lrgd");

    let text = format!(
        r#"
        radius = 1.0e13
        min_scale = 1.0e11
        tcmb = 2.725
        p_intensity = 200
        sink_points = 100
        sampling = "uniform"
        n_threads = 2
        seed = 7
        n_solve_iters = 2
        n_smooth_passes = 1
        moldat_files = ["{}"]
        write_grid_at_stage = [false, false, true, true]
        grid_out_files = ["unused1", "unused2", "{}", "{}"]

        [[images]]
        pxls = 7
        imgres = 2.0
        nchan = 5
        velres = 300.0
        trans = 0
        distance = {PC:e}
        unit = "kelvin"
        "#,
        moldat.display(),
        s3.display(),
        s4.display(),
    );
    let cfg = Configuration::from_toml_str(&text).unwrap();
    let model = Sphere::default();

    let out = linerad::run(&cfg, &model).unwrap();
    assert_eq!(out.stats.total, 200);
    assert!(out.grid.stage.has_all(DataStage::STAGE_MASKS[3]));
    assert_eq!(out.images.len(), 1);
    assert_eq!(out.images[0].intensity.dim(), (7, 7, 5, 1));
    assert!(out.images[0].stage.has_all(DataStage::POPULATIONS));
    assert!(s3.exists());
    assert!(s4.exists());

    // The central pixel must carry line optical depth.
    assert!(out.images[0].tau[[3, 3, 2]] > 0.1);
}

/// Scenario: stopping at stage three, snapshotting, and continuing gives
/// the same populations as the uninterrupted run.
#[test]
fn snapshot_resume_matches_uninterrupted_solve() {
    let mut cfg = base_toml("");
    cfg.lte_only = false;
    let model = Sphere::default();
    let mols = vec![MolData::parse_str(TWO_LEVEL, "co", cfg.tcmb).unwrap()];

    // Uninterrupted run.
    let mut grid_a = Grid::build(&cfg, &model, &mols).unwrap();
    let cont_a = Continuum::setup(&grid_a, &model, &mols, None);
    let (pops_a, _) = solve::solve(&cfg, &mut grid_a, &mols, &cont_a, None).unwrap();

    // Interrupted at stage three.
    let grid_b0 = Grid::build(&cfg, &model, &mols).unwrap();
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("stage3.lrgd");
    snapshot::write_grid(&path, &grid_b0, None, DataStage::STAGE_MASKS[2]).unwrap();
    let (mut grid_b, none_pops) =
        snapshot::read_grid(&path, &cfg, &mols, DataStage::STAGE_MASKS[2]).unwrap();
    assert!(none_pops.is_none());
    let cont_b = Continuum::setup(&grid_b, &model, &mols, None);
    let (pops_b, _) = solve::solve(&cfg, &mut grid_b, &mols, &cont_b, None).unwrap();

    for (a, b) in pops_a.species[0].iter().zip(pops_b.species[0].iter()) {
        approx::assert_abs_diff_eq!(a, b, epsilon = 1e-8);
    }
}

/// Scenario: an edge-on Keplerian disk shows the rotational red/blue
/// asymmetry, mirrored between the two sides of the disk.
#[test]
fn keplerian_disk_channel_asymmetry() {
    let cfg = base_toml("");
    let model = KeplerianDisk {
        gm: 2.0e19,
        r_in: 5.0e11,
        r_out: 9.0e12,
        scale_height: 1.0e12,
    };
    let mols = vec![MolData::parse_str(TWO_LEVEL, "co", cfg.tcmb).unwrap()];
    let (grid, pops, cont) = lte_pipeline(&cfg, &model, &mols);

    let img = linerad::ImageParameters {
        pxls: 15,
        imgres: 0.1,
        nchan: 13,
        velres: 500.0,
        species: 0,
        trans: Some(0),
        freq: None,
        // Edge-on: the camera sits in the disk plane.
        theta: std::f64::consts::FRAC_PI_2,
        phi: 0.0,
        source_vel: 0.0,
        distance: 100.0 * PC,
        antialias: 2,
        unit: ImageUnit::Kelvin,
    };
    let cube = raytrace(&img, &cfg, &model, &grid, &mols, &cont, None, &pops).unwrap();

    // Split pixels along the disk axis and channels around line centre.
    let mid_chan = img.nchan / 2;
    let mid_pix = img.pxls / 2;
    let mut asym_left = 0.0;
    let mut asym_right = 0.0;
    for px in 0..img.pxls {
        for py in 0..img.pxls {
            let mut blue = 0.0;
            let mut red = 0.0;
            for ichan in 0..img.nchan {
                let i = cube.intensity[[px, py, ichan, 0]];
                if ichan < mid_chan {
                    blue += i;
                } else if ichan > mid_chan {
                    red += i;
                }
            }
            if px < mid_pix {
                asym_left += red - blue;
            } else if px > mid_pix {
                asym_right += red - blue;
            }
        }
    }

    // Each side must prefer one wing, and the two sides must prefer
    // opposite wings.
    assert!(
        asym_left.abs() > 1e-6 && asym_right.abs() > 1e-6,
        "no rotational asymmetry: {asym_left} vs {asym_right}"
    );
    assert!(
        asym_left * asym_right < 0.0,
        "asymmetry not mirrored: {asym_left} vs {asym_right}"
    );
}

/// Scenario: two lines half a blend mask apart. Enabling blending adds the
/// partner's profile-shifted opacity to the central channel.
#[test]
fn blending_adds_the_partner_line() {
    let mut cfg = base_toml("");
    // A wide turbulent width so the 5 km/s partner overlaps measurably.
    struct WideSphere;
    impl Model for WideSphere {
        fn num_densities(&self) -> usize {
            1
        }
        fn num_species(&self) -> usize {
            1
        }
        fn density(&self, _pos: &Vector3<f64>, out: &mut [f64]) {
            out[0] = 1e13;
        }
        fn temperature(&self, _pos: &Vector3<f64>) -> [f64; 2] {
            [20.0, -1.0]
        }
        fn abundance(&self, _pos: &Vector3<f64>, out: &mut [f64]) {
            out[0] = 1e-8;
        }
        fn doppler(&self, _pos: &Vector3<f64>) -> f64 {
            3000.0
        }
        fn velocity(&self, _pos: &Vector3<f64>) -> Vector3<f64> {
            Vector3::zeros()
        }
    }
    let model = WideSphere;
    let mols = vec![MolData::parse_str(BLEND_PAIR, "blendy", cfg.tcmb).unwrap()];
    let (grid, pops, cont) = lte_pipeline(&cfg, &model, &mols);

    let mut img = linerad::ImageParameters {
        pxls: 3,
        imgres: 2.0,
        nchan: 3,
        velres: 400.0,
        species: 0,
        trans: Some(0),
        freq: None,
        theta: 0.0,
        phi: 0.0,
        source_vel: 0.0,
        distance: 10.0 * PC,
        antialias: 1,
        unit: ImageUnit::Kelvin,
    };

    cfg.blend = false;
    let off = raytrace(&img, &cfg, &model, &grid, &mols, &cont, None, &pops).unwrap();
    cfg.blend = true;
    let on = raytrace(&img, &cfg, &model, &grid, &mols, &cont, None, &pops).unwrap();

    // Partner tau at its own line centre, with blending off.
    img.trans = Some(1);
    cfg.blend = false;
    let partner = raytrace(&img, &cfg, &model, &grid, &mols, &cont, None, &pops).unwrap();

    let c = 1usize;
    let tau_off = off.tau[[c, c, 1]];
    let tau_on = on.tau[[c, c, 1]];
    let tau_partner = partner.tau[[c, c, 1]];
    assert!(tau_off > 0.0 && tau_partner > 0.0);
    assert!(tau_on > tau_off, "blending must add opacity");

    // The additive amount is the partner's central opacity scaled by its
    // profile at the 5 km/s offset; the Doppler width here is uniform, so
    // the scaling is exact per step.
    let binv = grid.vertices.iter().find(|v| !v.sink).unwrap().binv[0];
    let deltav =
        (mols[0].freq[1] - mols[0].freq[0]) * 2.997924562e8 / mols[0].freq[1];
    let expected = tau_off + tau_partner * (-(deltav * binv).powi(2)).exp();
    approx::assert_relative_eq!(tau_on, expected, max_relative = 1e-6);
}

/// Scenario: polarised continuum image with the field along the line of
/// sight; Stokes Q and U must vanish identically.
#[test]
fn los_field_gives_zero_q_and_u() {
    let mut cfg = base_toml("");
    cfg.polarization = true;
    let model = Sphere {
        magfield: Some(Vector3::new(0.0, 0.0, 1e-9)),
        ..Default::default()
    };
    let mols: Vec<MolData> = vec![];
    let grid = Grid::build(&cfg, &model, &mols).unwrap();
    let cont = Continuum::setup(
        &grid,
        &model,
        &mols,
        Some(&DustOpacity::parse_str(DUST_TABLE, "dust").unwrap()),
    );
    let dust = DustOpacity::parse_str(DUST_TABLE, "dust").unwrap();
    let pops = Populations { species: vec![] };

    let img = linerad::ImageParameters {
        pxls: 5,
        imgres: 2.0,
        nchan: 1,
        velres: 0.0,
        species: 0,
        trans: None,
        freq: Some(3.0e11),
        // Looking down +z, straight along the field.
        theta: 0.0,
        phi: 0.0,
        source_vel: 0.0,
        distance: 10.0 * PC,
        antialias: 1,
        unit: ImageUnit::JanskyPerPixel,
    };
    let cube = raytrace(&img, &cfg, &model, &grid, &mols, &cont, Some(&dust), &pops).unwrap();

    assert_eq!(cube.intensity.dim(), (5, 5, 1, 3));
    let mut saw_emission = false;
    for px in 0..5 {
        for py in 0..5 {
            let i = cube.intensity[[px, py, 0, 0]];
            let q = cube.intensity[[px, py, 0, 1]];
            let u = cube.intensity[[px, py, 0, 2]];
            assert!(q.abs() < 1e-12, "Stokes Q leaked: {q}");
            assert!(u.abs() < 1e-12, "Stokes U leaked: {u}");
            if i > 0.0 {
                saw_emission = true;
            }
        }
    }
    assert!(saw_emission, "continuum image came out empty");
}

/// The background-only law holds through the whole public pipeline too.
#[test]
fn empty_cloud_image_is_background_only() {
    let cfg = base_toml("");
    let model = Sphere {
        density: 0.0,
        ..Default::default()
    };
    let mols = vec![MolData::parse_str(TWO_LEVEL, "co", cfg.tcmb).unwrap()];
    let (grid, pops, cont) = lte_pipeline(&cfg, &model, &mols);

    let img = linerad::ImageParameters {
        pxls: 5,
        imgres: 2.0,
        nchan: 3,
        velres: 300.0,
        species: 0,
        trans: Some(0),
        freq: None,
        theta: 0.3,
        phi: 1.1,
        source_vel: 0.0,
        distance: 10.0 * PC,
        antialias: 1,
        unit: ImageUnit::Kelvin,
    };
    let cube = raytrace(&img, &cfg, &model, &grid, &mols, &cont, None, &pops).unwrap();

    let expected = brightness_temperature(
        {
            // Planck at the line frequency for the background temperature.
            let nu = mols[0].freq[0];
            let x = 6.626196e-34 * nu / (1.380622e-23 * cfg.tcmb);
            2.0 * 6.626196e-34 * nu.powi(3) / (2.997924562e8f64).powi(2) / (x.exp() - 1.0)
        },
        mols[0].freq[0],
    );
    for &t in cube.tau.iter() {
        approx::assert_abs_diff_eq!(t, 0.0, epsilon = 1e-12);
    }
    for &i in cube.intensity.iter() {
        approx::assert_relative_eq!(i, expected, max_relative = 1e-9);
    }
}
