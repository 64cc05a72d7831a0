//! Initial-condition generators for the standard test problems.
//!
//! Everything is in code units (G = 1 where gravity is involved).  Random
//! placements use a seeded ChaCha stream so runs are reproducible.

use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;

use kernel::particle::{ParticleArrays, StarArrays};
use kernel::SphError;

/// Uniform 1D lattice of `n` particles on `[x0, x1]` with total mass
/// `rho * (x1 - x0)`.
pub fn lattice_1d(
    n: usize,
    x0: f64,
    x1: f64,
    rho: f64,
    u: f64,
    capacity: usize,
) -> Result<ParticleArrays<1>, SphError> {
    let mut parts = ParticleArrays::with_capacity(capacity);
    let dx = (x1 - x0) / n as f64;
    for i in 0..n {
        parts.push_particle([x0 + (i as f64 + 0.5) * dx], [0.0], rho * dx, 1.2 * dx, u)?;
    }
    Ok(parts)
}

/// Two-state 1D shock tube on `[0, 1]`: density `rho_l` left of `x_split`,
/// `rho_r` right of it, realised by equal-mass particles with unequal
/// spacing.  Velocities are `v_l`/`v_r`.
#[allow(clippy::too_many_arguments)]
pub fn shock_tube_1d(
    n: usize,
    x_split: f64,
    rho_l: f64,
    rho_r: f64,
    v_l: f64,
    v_r: f64,
    u: f64,
    capacity: usize,
) -> Result<ParticleArrays<1>, SphError> {
    let mass_total = rho_l * x_split + rho_r * (1.0 - x_split);
    let m = mass_total / n as f64;
    let n_left = (rho_l * x_split / mass_total * n as f64).round() as usize;
    let n_right = n - n_left;

    let mut parts = ParticleArrays::with_capacity(capacity);
    let dx_l = x_split / n_left as f64;
    for i in 0..n_left {
        parts.push_particle([(i as f64 + 0.5) * dx_l], [v_l], m, 1.2 * dx_l, u)?;
    }
    let dx_r = (1.0 - x_split) / n_right as f64;
    for i in 0..n_right {
        parts.push_particle([x_split + (i as f64 + 0.5) * dx_r], [v_r], m, 1.2 * dx_r, u)?;
    }
    Ok(parts)
}

/// Uniform cubic lattice of `n_side^3` particles filling the unit cube
/// with total mass 1.
pub fn uniform_cube_3d(n_side: usize, u: f64, capacity: usize) -> Result<ParticleArrays<3>, SphError> {
    let mut parts = ParticleArrays::with_capacity(capacity);
    let dx = 1.0 / n_side as f64;
    let m = 1.0 / (n_side * n_side * n_side) as f64;
    for i in 0..n_side {
        for j in 0..n_side {
            for k in 0..n_side {
                parts.push_particle(
                    [(i as f64 + 0.5) * dx, (j as f64 + 0.5) * dx, (k as f64 + 0.5) * dx],
                    [0.0; 3],
                    m,
                    1.2 * dx,
                    u,
                )?;
            }
        }
    }
    Ok(parts)
}

/// Random uniform-density sphere of `n` particles, total mass `mass`,
/// radius `radius`, centred on `centre`.
pub fn uniform_sphere(
    n: usize,
    centre: [f64; 3],
    radius: f64,
    mass: f64,
    u: f64,
    seed: u64,
    capacity: usize,
) -> Result<ParticleArrays<3>, SphError> {
    let mut rng = ChaCha8Rng::seed_from_u64(seed);
    let mut parts = ParticleArrays::with_capacity(capacity);
    let m = mass / n as f64;
    // Mean spacing sets the initial h guess.
    let h = 1.2 * radius * (4.0 / (3.0 * n as f64)).cbrt();
    let mut placed = 0;
    while placed < n {
        let p = [
            rng.gen_range(-1.0..1.0),
            rng.gen_range(-1.0..1.0),
            rng.gen_range(-1.0..1.0),
        ];
        if p[0] * p[0] + p[1] * p[1] + p[2] * p[2] > 1.0 {
            continue;
        }
        parts.push_particle(
            [
                centre[0] + radius * p[0],
                centre[1] + radius * p[1],
                centre[2] + radius * p[2],
            ],
            [0.0; 3],
            m,
            h,
            u,
        )?;
        placed += 1;
    }
    Ok(parts)
}

/// Boss & Bodenheimer rotating cloud: a uniform sphere with an azimuthal
/// m=2 density perturbation of relative amplitude `amp` and solid-body
/// rotation `omega` about the z axis.
#[allow(clippy::too_many_arguments)]
pub fn boss_bodenheimer(
    n: usize,
    radius: f64,
    mass: f64,
    u: f64,
    omega: f64,
    amp: f64,
    seed: u64,
    capacity: usize,
) -> Result<ParticleArrays<3>, SphError> {
    let mut parts = uniform_sphere(n, [0.0; 3], radius, mass, u, seed, capacity)?;
    for i in 0..parts.n_real {
        let [x, y, z] = parts.r[i];
        let phi = y.atan2(x);
        let rcyl = (x * x + y * y).sqrt();
        // Compress azimuthally toward the two density maxima.
        let phi_new = phi - 0.5 * amp * (2.0 * phi).sin();
        parts.r[i] = [rcyl * phi_new.cos(), rcyl * phi_new.sin(), z];
        parts.v[i] = [-omega * parts.r[i][1], omega * parts.r[i][0], 0.0];
    }
    Ok(parts)
}

/// Two point masses on a circular orbit about their barycentre,
/// `separation` apart (G = 1).
pub fn binary_stars(separation: f64, m1: f64, m2: f64, softening: f64) -> StarArrays<3> {
    let mtot = m1 + m2;
    let v_rel = (mtot / separation).sqrt();
    let mut stars = StarArrays::new();
    // Barycentric positions and velocities.
    let r1 = -separation * m2 / mtot;
    let r2 = separation * m1 / mtot;
    stars.push_star([r1, 0.0, 0.0], [0.0, v_rel * r1 / separation, 0.0], m1, softening);
    stars.push_star([r2, 0.0, 0.0], [0.0, v_rel * r2 / separation, 0.0], m2, softening);
    stars
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn shock_tube_density_contrast() {
        let parts = shock_tube_1d(400, 0.5, 1.0, 0.25, 0.0, 0.0, 1.0, 1024).unwrap();
        assert_eq!(parts.n_real, 400);
        // Equal masses, 4:1 spacing contrast.
        let m0 = parts.m[0];
        assert!(parts.m.iter().take(400).all(|&m| (m - m0).abs() < 1.0e-12));
        let left_gap = parts.r[1][0] - parts.r[0][0];
        let right_gap = parts.r[399][0] - parts.r[398][0];
        assert!((right_gap / left_gap - 4.0).abs() < 0.05);
        // All particles inside the unit box, ordered.
        for w in parts.r.windows(2) {
            assert!(w[1][0] > w[0][0]);
        }
    }

    #[test]
    fn uniform_sphere_statistics() {
        let parts = uniform_sphere(2000, [0.0; 3], 1.0, 1.0, 1.0, 42, 4096).unwrap();
        assert_eq!(parts.n_real, 2000);
        let mtot: f64 = parts.m.iter().sum();
        assert!((mtot - 1.0).abs() < 1.0e-9);
        // Centre of mass near the origin, all particles inside the sphere.
        let mut com = [0.0; 3];
        for i in 0..parts.n_real {
            let rr = kernel::vec::dot(&parts.r[i], &parts.r[i]);
            assert!(rr <= 1.0 + 1.0e-12);
            for k in 0..3 {
                com[k] += parts.r[i][k] / 2000.0;
            }
        }
        assert!(kernel::vec::norm(&com) < 0.05);
    }

    #[test]
    fn boss_bodenheimer_rotates_about_z() {
        let parts = boss_bodenheimer(500, 1.0, 1.0, 0.05, 1.6, 0.1, 7, 1024).unwrap();
        for i in 0..parts.n_real {
            let [x, y, _] = parts.r[i];
            let [vx, vy, vz] = parts.v[i];
            assert_eq!(vz, 0.0);
            // Solid-body: v = omega x r.
            assert!((vx + 1.6 * y).abs() < 1.0e-12);
            assert!((vy - 1.6 * x).abs() < 1.0e-12);
        }
    }

    #[test]
    fn binary_orbit_is_barycentric_and_circular() {
        let stars = binary_stars(1.0, 1.0, 1.0, 0.01);
        // Barycentre at rest at the origin.
        let mut p = [0.0; 3];
        let mut x = [0.0; 3];
        for i in 0..2 {
            for k in 0..3 {
                p[k] += stars.m[i] * stars.v[i][k];
                x[k] += stars.m[i] * stars.r[i][k];
            }
        }
        assert!(kernel::vec::norm(&p) < 1.0e-12);
        assert!(kernel::vec::norm(&x) < 1.0e-12);
        // Circular speed for the relative orbit: v^2 = M / a.
        let dv = kernel::vec::sub(&stars.v[1], &stars.v[0]);
        assert!((kernel::vec::dot(&dv, &dv) - 2.0).abs() < 1.0e-12);
    }
}
