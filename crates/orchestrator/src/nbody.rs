//! Leapfrog drift-kick-drift integration for star and sink particles.
//!
//! Positions advance from the block-step checkpoint as
//! `r = r0 + v0 dt + 0.5 a0 dt^2`, velocities as `v = v0 + a0 dt`; at the
//! half step the star is marked active so a fresh force evaluation lands at
//! the midpoint, and the end-of-step corrections
//!
//! ```text
//! v += (a_mid - a0) dt          r += 0.5 (a_mid - a0) dt^2
//! ```
//!
//! replace the predicted update with the true midpoint kick,
//! `v1 = v0 + a_mid dt` and `r1 = r0 + v0 dt + 0.5 a_mid dt^2`.  All times
//! are integer multiples of the global block-step quantum.

use kernel::particle::StarArrays;
use kernel::timestep::{star_timestep, TimestepParams};

/// Star integrator (leapfrog DKD).
#[derive(Debug, Clone, Copy, Default)]
pub struct NbodyLeapfrogDkd;

impl NbodyLeapfrogDkd {
    /// Advance all stars to integer time `n`; quantum duration `timestep`.
    ///
    /// Stars reaching their half step become active for the midpoint force
    /// evaluation.
    pub fn advance<const D: usize>(&self, n: u64, timestep: f64, stars: &mut StarArrays<D>) {
        for i in 0..stars.len() {
            let dn = n - stars.nlast[i];
            let dt = timestep * dn as f64;
            for k in 0..D {
                stars.r[i][k] =
                    stars.r0[i][k] + stars.v0[i][k] * dt + 0.5 * stars.a0[i][k] * dt * dt;
                stars.v[i][k] = stars.v0[i][k] + stars.a0[i][k] * dt;
            }
            stars.active[i] = dn == stars.nstep[i] / 2;
        }
    }

    /// Apply the end-of-step corrections to stars finishing their block
    /// step at integer time `n`, completing the midpoint kick.
    pub fn correction_terms<const D: usize>(
        &self,
        n: u64,
        timestep: f64,
        stars: &mut StarArrays<D>,
    ) {
        for i in 0..stars.len() {
            let dn = n - stars.nlast[i];
            if dn == stars.nstep[i] {
                let dt = timestep * stars.nstep[i] as f64;
                for k in 0..D {
                    let da = stars.a[i][k] - stars.a0[i][k];
                    stars.v[i][k] += da * dt;
                    stars.r[i][k] += 0.5 * da * dt * dt;
                }
            }
        }
    }

    /// Checkpoint stars finishing their block step at integer time `n`.
    pub fn end_timestep<const D: usize>(&self, n: u64, stars: &mut StarArrays<D>) {
        for i in 0..stars.len() {
            let dn = n - stars.nlast[i];
            if dn == stars.nstep[i] {
                stars.r0[i] = stars.r[i];
                stars.v0[i] = stars.v[i];
                stars.a0[i] = stars.a[i];
                stars.active[i] = false;
                stars.nlast[i] = n;
            }
        }
    }

    /// Timestep bound for star `i`.
    pub fn timestep<const D: usize>(
        &self,
        i: usize,
        stars: &StarArrays<D>,
        params: &TimestepParams,
    ) -> f64 {
        star_timestep(i, stars, params)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kernel::forces::star_star_forces;

    /// One full DKD block step for a star set on a shared step of `nstep`
    /// quanta: advance to the half step, recompute forces, advance to the
    /// end, correct and checkpoint.
    fn dkd_block_step(stars: &mut StarArrays<3>, n0: u64, nstep: u64, quantum: f64) -> u64 {
        let integ = NbodyLeapfrogDkd;
        let half = n0 + nstep / 2;
        integ.advance(half, quantum, stars);
        star_star_forces(stars);
        let end = n0 + nstep;
        integ.advance(end, quantum, stars);
        integ.correction_terms(end, quantum, stars);
        integ.end_timestep(end, stars);
        end
    }

    #[test]
    fn activation_at_half_step_only() {
        let mut stars = StarArrays::<3>::new();
        stars.push_star([0.0; 3], [0.0; 3], 1.0, 0.01);
        stars.nstep[0] = 4;
        let integ = NbodyLeapfrogDkd;

        integ.advance(1, 0.1, &mut stars);
        assert!(!stars.active[0]);
        integ.advance(2, 0.1, &mut stars);
        assert!(stars.active[0]);
        integ.advance(3, 0.1, &mut stars);
        assert!(!stars.active[0]);
    }

    #[test]
    fn free_star_moves_ballistically() {
        let mut stars = StarArrays::<3>::new();
        stars.push_star([0.0; 3], [1.0, 0.5, 0.0], 1.0, 0.01);
        stars.nstep[0] = 2;
        let integ = NbodyLeapfrogDkd;

        integ.advance(2, 0.25, &mut stars);
        integ.correction_terms(2, 0.25, &mut stars);
        integ.end_timestep(2, &mut stars);
        assert!((stars.r[0][0] - 0.5).abs() < 1.0e-14);
        assert!((stars.r[0][1] - 0.25).abs() < 1.0e-14);
        assert_eq!(stars.nlast[0], 2);
        assert!(!stars.active[0]);
    }

    #[test]
    fn circular_binary_conserves_energy_over_many_orbits() {
        // Equal masses on a circular orbit, G = 1: separation 1, each mass
        // 0.5, orbital speed of each component 0.5 about the barycentre.
        let mut stars = StarArrays::<3>::new();
        stars.push_star([-0.5, 0.0, 0.0], [0.0, -0.5, 0.0], 0.5, 0.01);
        stars.push_star([0.5, 0.0, 0.0], [0.0, 0.5, 0.0], 0.5, 0.01);
        stars.nstep[0] = 2;
        stars.nstep[1] = 2;
        star_star_forces(&mut stars);
        stars.a0[0] = stars.a[0];
        stars.a0[1] = stars.a[1];

        let energy = |s: &StarArrays<3>| {
            let mut ke = 0.0;
            for i in 0..2 {
                ke += 0.5 * s.m[i] * kernel::vec::dot(&s.v[i], &s.v[i]);
            }
            let dr = kernel::vec::sub(&s.r[1], &s.r[0]);
            ke - s.m[0] * s.m[1] / kernel::vec::norm(&dr)
        };
        let e0 = energy(&stars);

        // Orbit period 2 pi; about 6300 steps per orbit, two orbits.
        let quantum = 0.001;
        let mut n = 0;
        for _ in 0..2 * 6300 {
            n = dkd_block_step(&mut stars, n, 2, quantum);
        }
        let drift = ((energy(&stars) - e0) / e0).abs();
        assert!(drift < 1.0e-5, "energy drift {drift} over two orbits");
        // The pair stays near unit separation.
        let sep = kernel::vec::norm(&kernel::vec::sub(&stars.r[1], &stars.r[0]));
        assert!((sep - 1.0).abs() < 1.0e-2, "separation drifted to {sep}");
    }
}
