//! Smoothing-length solver and post-convergence particle properties.
//!
//! For each particle the solver iterates the implicit relation
//!
//! ```text
//! h = h_fac * (m / rho(h))^(1/d),    rho(h) = sum_j m_j W(r_ij/h) h^-d
//! ```
//!
//! using fixed-point iteration with the previous h as the starting guess,
//! falling back to bisection when the fixed point fails to settle, and
//! giving up (fatally) only after the bisection budget is also exhausted.
//! If h outgrows the candidate neighbour list before converging, the solver
//! reports [`HSolveOutcome::ListTooSmall`] so the caller can widen the
//! gather radius and retry; this is the one non-fatal outcome.
//!
//! After convergence the grad-h correction Omega^-1, the gravitational
//! corrections zeta and chi, the pressure factor P/(rho^2 Omega), the
//! thermal state and the potential-minimum flag are evaluated once.

use rayon::prelude::*;

use crate::eos::EquationOfState;
use crate::kernels::KernelTable;
use crate::neighbor::GatherList;
use crate::particle::{ParticleArrays, StarArrays};
use crate::{vec, SphError, SMALL_NUMBER};

/// Fixed-point iteration budget before switching to bisection.
const ITERATION_MAX: usize = 30;

/// Non-fatal outcomes of a single h-solve.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HSolveOutcome {
    /// h and the derived quantities are valid.
    Converged,
    /// h outgrew the candidate list; gather a wider list and retry.
    ListTooSmall,
}

/// Converged per-particle quantities, applied by the caller.
#[derive(Debug, Clone, Copy)]
pub struct HSolveResult {
    /// Particle index.
    pub i: usize,
    /// Converged smoothing length.
    pub h: f64,
    /// Density at the converged h.
    pub rho: f64,
    /// Grad-h correction Omega^-1.
    pub inv_omega: f64,
    /// Grad-h gravity correction zeta.
    pub zeta: f64,
    /// Stellar softening correction chi.
    pub chi: f64,
    /// Pressure factor P/(rho^2 Omega).
    pub pfactor: f64,
    /// Specific internal energy after the EOS query.
    pub u: f64,
    /// Sound speed.
    pub sound: f64,
    /// Potential-minimum flag.
    pub potmin: bool,
}

/// Smoothing-length solver parameters.
#[derive(Debug, Clone, Copy)]
pub struct HSolver {
    /// Ratio of h to mean inter-particle spacing.
    pub h_fac: f64,
    /// Relative convergence tolerance on h.
    pub h_converge: f64,
    /// Lower bound on h for particles inside a sink.
    pub h_min_sink: f64,
    /// Whether potential minima are being tracked for sink creation.
    pub create_sinks: bool,
    /// Whether star softening uses the mean-h branch.
    pub star_softening: bool,
}

impl Default for HSolver {
    fn default() -> Self {
        Self {
            h_fac: 1.2,
            h_converge: 0.01,
            h_min_sink: 0.0,
            create_sinks: false,
            star_softening: true,
        }
    }
}

impl HSolver {
    /// Solve for particle `i` against a candidate list valid up to `h_max`.
    ///
    /// Reads the particle arrays only; the caller applies the result, which
    /// keeps the per-particle solves freely parallelisable.
    pub fn solve<const D: usize>(
        &self,
        i: usize,
        parts: &ParticleArrays<D>,
        stars: &StarArrays<D>,
        neighbors: &[usize],
        h_max: f64,
        kern: &KernelTable<D>,
        eos: &EquationOfState,
    ) -> Result<(HSolveOutcome, HSolveResult), SphError> {
        let inv_ndim = 1.0 / D as f64;
        let m_i = parts.m[i];

        // Gather squared separations once; positions are frozen while h
        // iterates.
        let pairs: Vec<(f64, f64, f64)> = neighbors
            .iter()
            .map(|&j| {
                let dr = vec::sub(&parts.r[j], &parts.r[i]);
                (vec::dot(&dr, &dr), parts.m[j], parts.gpot[j])
            })
            .collect();

        let mut h = parts.h[i];
        let mut h_lower = 0.0;
        let mut h_upper = h_max;
        if parts.sink_id[i] != -1 {
            h_lower = self.h_min_sink;
        }

        let mut rho;
        let mut inv_rho = 0.0;
        let mut omega_sum;
        let mut zeta_sum;
        let mut iteration = 0;

        loop {
            iteration += 1;
            let inv_h = 1.0 / h;
            let inv_h_sqd = inv_h * inv_h;
            let h_factor = inv_h.powi(D as i32);

            // Density, omega and zeta sums, including the self term.
            rho = m_i * kern.w0_s2(0.0);
            omega_sum = m_i * inv_h * kern.womega_s2(0.0);
            zeta_sum = m_i * kern.wzeta_s2(0.0);
            for &(drsqd, m_j, _) in &pairs {
                let ssqd = drsqd * inv_h_sqd;
                rho += m_j * kern.w0_s2(ssqd);
                omega_sum += m_j * inv_h * kern.womega_s2(ssqd);
                zeta_sum += m_j * kern.wzeta_s2(ssqd);
            }
            rho *= h_factor;
            omega_sum *= h_factor;
            zeta_sum *= inv_h_sqd;

            if rho > 0.0 {
                inv_rho = 1.0 / rho;
            }

            if rho > 0.0
                && h > h_lower
                && (h - self.h_fac * (m_i * inv_rho).powf(inv_ndim)).abs() < self.h_converge * h
            {
                break;
            }

            if iteration < ITERATION_MAX {
                // Fixed-point sweep.  The self term keeps rho strictly
                // positive, so inv_rho is always fresh here.
                h = self.h_fac * (m_i * inv_rho).powf(inv_ndim);
            } else if iteration == ITERATION_MAX {
                h = 0.5 * (h_lower + h_upper);
            } else if iteration < 5 * ITERATION_MAX {
                // Bisection: too little mass inside the kernel means h is
                // still too small.
                if rho < SMALL_NUMBER
                    || rho * h.powi(D as i32) > self.h_fac.powi(D as i32) * m_i
                {
                    h_upper = h;
                } else {
                    h_lower = h;
                }
                h = 0.5 * (h_lower + h_upper);
            } else {
                return Err(SphError::HIteration(format!(
                    "particle {i}: h={:.6e} rho={:.6e} bounds=[{:.6e},{:.6e}] r={:?}",
                    h, rho, h_lower, h_upper, parts.r[i]
                )));
            }

            // h outgrew the candidate list: the caller must widen it.
            if h > h_max {
                return Ok((
                    HSolveOutcome::ListTooSmall,
                    HSolveResult {
                        i,
                        h,
                        rho,
                        inv_omega: 1.0,
                        zeta: 0.0,
                        chi: 0.0,
                        pfactor: 0.0,
                        u: parts.u[i],
                        sound: parts.sound[i],
                        potmin: false,
                    },
                ));
            }

            if !(h > h_lower && h < h_upper) {
                break;
            }
        }

        // Normalise the sums at the accepted h, clamped to the sink floor.
        let h = (self.h_fac * (m_i * inv_rho).powf(inv_ndim)).max(h_lower);
        let inv_h = 1.0 / h;
        let inv_h_sqd = inv_h * inv_h;
        let mut inv_omega = 1.0 + inv_ndim * h * omega_sum * inv_rho;
        inv_omega = 1.0 / inv_omega;
        let zeta = -inv_ndim * h * zeta_sum * inv_rho * inv_omega;

        // Thermal state.
        let u = eos.specific_internal_energy(rho, parts.u[i]);
        let sound = eos.sound_speed(rho, u);
        let pfactor = eos.pressure(rho, u) * inv_rho * inv_rho * inv_omega;

        // Minimum-potential flag, used later to identify new sinks.
        let mut potmin = false;
        if self.create_sinks {
            potmin = true;
            for &(drsqd, _, gpot_j) in &pairs {
                if gpot_j > 1.000000001 * parts.gpot[i]
                    && drsqd * inv_h_sqd < kern.kern_range_sqd
                {
                    potmin = false;
                    break;
                }
            }
        }

        // Stellar softening correction chi.
        let mut chi = 0.0;
        if !stars.is_empty() {
            for j in 0..stars.len() {
                let inv_h_eff_sqd = if self.star_softening {
                    let inv_h_mean = 2.0 / (h + stars.h[j]);
                    inv_h_mean * inv_h_mean
                } else {
                    4.0 * inv_h * inv_h
                };
                let dr = vec::sub(&stars.r[j], &parts.r[i]);
                let ssqd = vec::dot(&dr, &dr) * inv_h_eff_sqd;
                chi += stars.m[j] * inv_h_eff_sqd * kern.wzeta_s2(ssqd);
            }
            chi = -inv_ndim * h * chi * inv_rho * inv_omega;
        }

        Ok((
            HSolveOutcome::Converged,
            HSolveResult { i, h, rho, inv_omega, zeta, chi, pfactor, u, sound, potmin },
        ))
    }

    /// Solve every active real particle in parallel, widening candidate
    /// lists on demand, and write the results back.
    ///
    /// `gather` returns the candidate list for a particle given a search
    /// radius; `h_max_global` caps the retry expansion.  A particle pinned
    /// at the global cap is accepted there with a warning rather than
    /// looping forever.
    pub fn update_all<const D: usize>(
        &self,
        parts: &mut ParticleArrays<D>,
        stars: &StarArrays<D>,
        kern: &KernelTable<D>,
        eos: &EquationOfState,
        gather: &(dyn Fn(usize, f64) -> GatherList + Sync),
        h_max_global: f64,
    ) -> Result<(), SphError> {
        let targets: Vec<usize> = (0..parts.n_real).filter(|&i| parts.active[i]).collect();

        let parts_ref: &ParticleArrays<D> = parts;
        let results: Vec<Result<HSolveResult, SphError>> = targets
            .par_iter()
            .map(|&i| {
                let mut radius = (kern.kern_range * parts_ref.h[i] * 1.2)
                    .min(kern.kern_range * h_max_global);
                loop {
                    let list = gather(i, radius);
                    let h_cap = list.h_max.min(h_max_global);
                    let (outcome, res) =
                        self.solve(i, parts_ref, stars, &list.neighbors, h_cap, kern, eos)?;
                    match outcome {
                        HSolveOutcome::Converged => return Ok(res),
                        HSolveOutcome::ListTooSmall => {
                            if radius >= kern.kern_range * h_max_global {
                                tracing::warn!(
                                    particle = i,
                                    h = res.h,
                                    "smoothing length pinned at the global maximum"
                                );
                                let (_, res) = self.solve(
                                    i,
                                    parts_ref,
                                    stars,
                                    &list.neighbors,
                                    crate::BIG_NUMBER,
                                    kern,
                                    eos,
                                )?;
                                return Ok(res);
                            }
                            radius = (radius * 2.0).min(kern.kern_range * h_max_global);
                        }
                    }
                }
            })
            .collect();

        for res in results {
            let r = res?;
            let i = r.i;
            parts.h[i] = r.h;
            parts.rho[i] = r.rho;
            parts.inv_omega[i] = r.inv_omega;
            parts.zeta[i] = r.zeta;
            parts.chi[i] = r.chi;
            parts.pfactor[i] = r.pfactor;
            parts.u[i] = r.u;
            parts.sound[i] = r.sound;
            parts.potmin[i] = r.potmin;
            parts.div_v[i] = 0.0;
        }
        Ok(())
    }
}
