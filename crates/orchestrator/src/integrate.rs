//! Fluid leapfrog DKD integration and the block-timestep hierarchy.
//!
//! Time is discretised into integer quanta.  A particle on level `l` steps
//! every `2^(level_max - l + 1)` quanta (the factor two leaves room for the
//! half-step force evaluation of the DKD scheme).  Level 0 is the global
//! step; deeper levels halve the step.  A full block spans
//! `2^(level_max + 1)` quanta, after which every particle is synchronised
//! and the level assignment is rebuilt from fresh timestep estimates.
//!
//! Between resyncs a particle may move to a finer level as soon as it
//! finishes a step; it may move one level coarser only when the coarser
//! step boundary lines up.  Interacting particles are kept within
//! `level_diff_max` levels through the recorded neighbour levels.

use kernel::particle::{ParticleArrays, StarArrays};
use kernel::timestep::{sph_timestep, star_timestep, TimestepParams};
use kernel::SMALL_NUMBER;

/// Floor for evolved internal energies.
const U_FLOOR: f64 = 1.0e-30;

/// Fluid-particle leapfrog DKD, sharing the star integrator's structure.
#[derive(Debug, Clone, Copy, Default)]
pub struct SphLeapfrogDkd;

impl SphLeapfrogDkd {
    /// Advance all real particles to integer time `n`.  Particles at their
    /// half step become active; the internal energy is predicted alongside
    /// when the EOS evolves it.
    pub fn advance<const D: usize>(
        &self,
        n: u64,
        quantum: f64,
        parts: &mut ParticleArrays<D>,
        energy_equation: bool,
    ) {
        for i in 0..parts.n_real {
            let dn = n - parts.nlast[i];
            let dt = quantum * dn as f64;
            for k in 0..D {
                parts.r[i][k] =
                    parts.r0[i][k] + parts.v0[i][k] * dt + 0.5 * parts.a0[i][k] * dt * dt;
                parts.v[i][k] = parts.v0[i][k] + parts.a0[i][k] * dt;
            }
            if energy_equation {
                parts.u[i] = (parts.u0[i] + parts.dudt0[i] * dt).max(U_FLOOR);
            }
            parts.active[i] = dn == parts.nstep[i] / 2;
        }
    }

    /// End-of-step corrections replacing the predicted update with the
    /// midpoint kick (see the star integrator for the scheme).
    pub fn correction_terms<const D: usize>(
        &self,
        n: u64,
        quantum: f64,
        parts: &mut ParticleArrays<D>,
        energy_equation: bool,
    ) {
        for i in 0..parts.n_real {
            let dn = n - parts.nlast[i];
            if dn != parts.nstep[i] {
                continue;
            }
            let dt = quantum * parts.nstep[i] as f64;
            for k in 0..D {
                let da = parts.a[i][k] + parts.a_grav[i][k] - parts.a0[i][k];
                parts.v[i][k] += da * dt;
                parts.r[i][k] += 0.5 * da * dt * dt;
            }
            if energy_equation {
                parts.u[i] =
                    (parts.u[i] + (parts.dudt[i] - parts.dudt0[i]) * dt).max(U_FLOOR);
            }
        }
    }

    /// Checkpoint particles finishing their step at integer time `n`.
    pub fn end_timestep<const D: usize>(&self, n: u64, parts: &mut ParticleArrays<D>) {
        for i in 0..parts.n_real {
            let dn = n - parts.nlast[i];
            if dn != parts.nstep[i] {
                continue;
            }
            parts.r0[i] = parts.r[i];
            parts.v0[i] = parts.v[i];
            for k in 0..D {
                parts.a0[i][k] = parts.a[i][k] + parts.a_grav[i][k];
            }
            parts.u0[i] = parts.u[i];
            parts.dudt0[i] = parts.dudt[i];
            parts.active[i] = false;
            parts.nlast[i] = n;
        }
    }

    /// Evolve the time-dependent viscosity coefficient (Morris & Monaghan
    /// 1997) for particles finishing their step: decay toward the floor on
    /// the kernel crossing time, sourced by compression.
    pub fn evolve_alpha<const D: usize>(
        &self,
        n: u64,
        quantum: f64,
        parts: &mut ParticleArrays<D>,
        alpha_min: f64,
        alpha_max: f64,
    ) {
        const DECAY: f64 = 0.1;
        for i in 0..parts.n_real {
            let dn = n - parts.nlast[i];
            if dn != parts.nstep[i] {
                continue;
            }
            let dt = quantum * parts.nstep[i] as f64;
            let tau = parts.h[i] / (DECAY * parts.sound[i] + SMALL_NUMBER);
            let source = (-parts.div_v[i]).max(0.0) * (alpha_max - parts.alpha[i]);
            parts.alpha[i] += dt * ((alpha_min - parts.alpha[i]) / tau + source);
            parts.alpha[i] = parts.alpha[i].clamp(alpha_min, alpha_max);
        }
    }
}

/// Global block-timestep state.
#[derive(Debug, Clone, Copy)]
pub struct BlockTimesteps {
    /// Deepest allowed level below the global step.
    pub level_max: u32,
    /// Maximum level difference between interacting particles.
    pub level_diff_max: u32,
    /// Integer time within the current block (quanta).
    pub n: u64,
    /// Quanta per block.
    pub nresync: u64,
    /// Physical duration of one quantum.
    pub quantum: f64,
    /// Accumulated physical time.
    pub t: f64,
}

impl BlockTimesteps {
    /// Fresh state; call [`BlockTimesteps::resync`] before stepping.
    pub fn new(level_max: u32, level_diff_max: u32) -> Self {
        Self {
            level_max,
            level_diff_max,
            n: 0,
            nresync: 1 << (level_max + 1),
            quantum: 0.0,
            t: 0.0,
        }
    }

    /// Level for a timestep `dt` under a global step `dt_max`.
    fn level_for(&self, dt: f64, dt_max: f64) -> u32 {
        if dt >= dt_max {
            return 0;
        }
        let l = (dt_max / dt).log2().ceil() as i64;
        (l.max(0) as u32).min(self.level_max)
    }

    /// Integer step (in quanta) of a level.
    pub fn nstep_of(&self, level: u32) -> u64 {
        1 << (self.level_max - level + 1)
    }

    /// Synchronise everything: set the quantum from the smallest particle
    /// timestep and rebuild all level assignments.  Returns the global step
    /// duration.
    pub fn resync<const D: usize>(
        &mut self,
        parts: &mut ParticleArrays<D>,
        stars: &mut StarArrays<D>,
        tp: &TimestepParams,
        energy_equation: bool,
    ) -> f64 {
        let mut dt_min = f64::INFINITY;
        for i in 0..parts.n_real {
            dt_min = dt_min.min(sph_timestep(i, parts, tp, energy_equation));
        }
        for i in 0..stars.len() {
            dt_min = dt_min.min(star_timestep(i, stars, tp));
        }
        if !dt_min.is_finite() {
            dt_min = 1.0;
        }

        let dt_max = dt_min * (1 << self.level_max) as f64;
        self.quantum = dt_max / self.nresync as f64;
        self.n = 0;

        for i in 0..parts.n_real {
            let dt = sph_timestep(i, parts, tp, energy_equation);
            let mut level = self.level_for(dt, dt_max);
            level = level
                .max(parts.level_neib[i].saturating_sub(self.level_diff_max))
                .min(self.level_max);
            parts.level[i] = level;
            parts.nstep[i] = self.nstep_of(level);
            parts.nlast[i] = 0;
            parts.level_neib[i] = level;
        }
        for i in 0..stars.len() {
            let dt = star_timestep(i, stars, tp);
            let level = self.level_for(dt, dt_max);
            stars.level[i] = level;
            stars.nstep[i] = self.nstep_of(level);
            stars.nlast[i] = 0;
        }
        tracing::debug!(
            dt_max,
            quantum = self.quantum,
            "block resync"
        );
        dt_max
    }

    /// Mid-block level adjustment for particles that just finished a step
    /// at integer time `n`.  Moving finer is immediate; moving coarser
    /// happens one level at a time and only on an aligned boundary.
    pub fn adjust_levels<const D: usize>(
        &self,
        n: u64,
        parts: &mut ParticleArrays<D>,
        tp: &TimestepParams,
        energy_equation: bool,
    ) {
        let dt_max = self.quantum * self.nresync as f64;
        for i in 0..parts.n_real {
            if n - parts.nlast[i] != 0 {
                continue; // only particles checkpointed at n
            }
            if n == 0 {
                continue;
            }
            let dt = sph_timestep(i, parts, tp, energy_equation);
            let mut wanted = self.level_for(dt, dt_max);
            wanted = wanted
                .max(parts.level_neib[i].saturating_sub(self.level_diff_max))
                .min(self.level_max);
            let current = parts.level[i];
            let new_level = if wanted > current {
                wanted
            } else if wanted < current {
                let coarser = current - 1;
                if n % self.nstep_of(coarser) == 0 {
                    coarser
                } else {
                    current
                }
            } else {
                current
            };
            parts.level[i] = new_level;
            parts.nstep[i] = self.nstep_of(new_level);
            parts.level_neib[i] = new_level;
        }
    }

    /// Advance the integer clock by one quantum.
    pub fn tick(&mut self) {
        self.n += 1;
        self.t += self.quantum;
    }

    /// True when the block is complete and a resync is due.
    pub fn block_complete(&self) -> bool {
        self.n >= self.nresync
    }
}
