//! Conservative grad-h SPH pair forces.
//!
//! Each interacting pair is visited exactly once under the owner protocol:
//! an active particle i sums the pair (i, j) when `j > i`, or when `j < i`
//! and j is inactive.  Both sides of the pair receive equal and opposite
//! contributions; contributions landing on inactive particles (including
//! ghosts, which are never active) are discarded when the accumulators are
//! applied -- each real particle collects its own sums on the worker that
//! owns it.
//!
//! Sign conventions follow the kernel gradient: `w1 <= 0`, so the pressure
//! term `pfactor_i w1_i + pfactor_j w1_j` is negative and pushes the pair
//! apart along `r_j - r_i`.
//!
//! The softened gravity pair combines the kernel-softened force inside the
//! compact support with the grad-h correction (zeta + chi) and reverts to
//! plain 1/r^2 outside, so one formula serves both the "neighbour" and
//! "direct" ranges.

use rayon::prelude::*;

use crate::eos::EquationOfState;
use crate::kernels::KernelTable;
use crate::particle::{ParticleArrays, StarArrays};
use crate::{vec, SphError, SMALL_NUMBER};

/// Artificial viscosity selector.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ViscosityKind {
    /// No artificial viscosity.
    None,
    /// Monaghan (1997) with a fixed alpha.
    Mon97,
    /// Monaghan (1997) with the time-dependent per-particle alpha.
    Mon97Td,
}

impl ViscosityKind {
    /// Parse a configuration tag.
    pub fn from_name(name: &str) -> Result<Self, SphError> {
        match name {
            "none" => Ok(ViscosityKind::None),
            "mon97" => Ok(ViscosityKind::Mon97),
            "mon97td" => Ok(ViscosityKind::Mon97Td),
            other => Err(SphError::Config(format!("unrecognised viscosity '{other}'"))),
        }
    }
}

/// Artificial conductivity selector.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConductivityKind {
    /// No artificial conductivity.
    None,
    /// Wadsley et al. (2008) form.
    Wadsley2008,
    /// Price (2008) form.
    Price2008,
}

impl ConductivityKind {
    /// Parse a configuration tag.
    pub fn from_name(name: &str) -> Result<Self, SphError> {
        match name {
            "none" => Ok(ConductivityKind::None),
            "wadsley2008" => Ok(ConductivityKind::Wadsley2008),
            "price2008" => Ok(ConductivityKind::Price2008),
            other => Err(SphError::Config(format!("unrecognised conductivity '{other}'"))),
        }
    }
}

/// Switches and constants for the pair-force evaluation.
#[derive(Debug, Clone, Copy)]
pub struct ForceParams {
    /// Evaluate pressure/dissipation terms.
    pub hydro_forces: bool,
    /// Evaluate fluid-fluid self-gravity.
    pub self_gravity: bool,
    /// Artificial viscosity form.
    pub avisc: ViscosityKind,
    /// Artificial conductivity form.
    pub acond: ConductivityKind,
    /// Fixed viscosity alpha.
    pub alpha_visc: f64,
    /// Viscosity beta (quadratic term multiplier).
    pub beta_visc: f64,
}

impl Default for ForceParams {
    fn default() -> Self {
        Self {
            hydro_forces: true,
            self_gravity: false,
            avisc: ViscosityKind::Mon97,
            acond: ConductivityKind::None,
            alpha_visc: 1.0,
            beta_visc: 2.0,
        }
    }
}

/// Per-thread force accumulators, reduced after the parallel pair loops.
#[derive(Debug, Clone)]
pub struct ForceAccum<const D: usize> {
    /// Hydrodynamic acceleration increments.
    pub a: Vec<[f64; D]>,
    /// Gravitational acceleration increments.
    pub a_grav: Vec<[f64; D]>,
    /// du/dt increments.
    pub dudt: Vec<f64>,
    /// Velocity-divergence increments.
    pub div_v: Vec<f64>,
    /// Potential increments.
    pub gpot: Vec<f64>,
    /// Max neighbour level seen.
    pub level_neib: Vec<u32>,
}

impl<const D: usize> ForceAccum<D> {
    /// Zeroed accumulators for `n` particles.
    pub fn zeros(n: usize) -> Self {
        Self {
            a: vec![[0.0; D]; n],
            a_grav: vec![[0.0; D]; n],
            dudt: vec![0.0; n],
            div_v: vec![0.0; n],
            gpot: vec![0.0; n],
            level_neib: vec![0; n],
        }
    }

    /// Element-wise merge of another accumulator.
    pub fn merge(mut self, other: Self) -> Self {
        for i in 0..self.dudt.len() {
            for k in 0..D {
                self.a[i][k] += other.a[i][k];
                self.a_grav[i][k] += other.a_grav[i][k];
            }
            self.dudt[i] += other.dudt[i];
            self.div_v[i] += other.div_v[i];
            self.gpot[i] += other.gpot[i];
            self.level_neib[i] = self.level_neib[i].max(other.level_neib[i]);
        }
        self
    }
}

fn pressure_of<const D: usize>(parts: &ParticleArrays<D>, i: usize, eos: &EquationOfState) -> f64 {
    eos.pressure(parts.rho[i], parts.u[i])
}

/// Hydro (and optionally gravity) pair sums for one active particle.
#[allow(clippy::too_many_arguments)]
fn pair_sums<const D: usize>(
    i: usize,
    partners: &[usize],
    parts: &ParticleArrays<D>,
    kern: &KernelTable<D>,
    eos: &EquationOfState,
    params: &ForceParams,
    accum: &mut ForceAccum<D>,
) {
    let inv_h_i = 1.0 / parts.h[i];
    let h_factor_i = inv_h_i.powi(D as i32 + 1);
    let inv_rho_i = 1.0 / parts.rho[i];

    for &j in partners {
        // Owner protocol: i takes the pair when j is later in the array, or
        // when j is inactive (ghosts always are).
        if j == i || (j < i && parts.active[j]) {
            continue;
        }

        let mut dr = vec::sub(&parts.r[j], &parts.r[i]);
        let dv = vec::sub(&parts.v[j], &parts.v[i]);
        let drmag = (vec::dot(&dr, &dr) + SMALL_NUMBER).sqrt();
        let inv_drmag = 1.0 / drmag;
        for k in 0..D {
            dr[k] *= inv_drmag;
        }
        let dvdr = vec::dot(&dv, &dr);

        let inv_h_j = 1.0 / parts.h[j];
        let h_factor_j = inv_h_j.powi(D as i32 + 1);
        let inv_rho_j = 1.0 / parts.rho[j];

        let wkern_i = h_factor_i * kern.w1(drmag * inv_h_i);
        let wkern_j = h_factor_j * kern.w1(drmag * inv_h_j);

        if params.hydro_forces {
            let mut paux = parts.pfactor[i] * wkern_i + parts.pfactor[j] * wkern_j;

            // Dissipation terms, active on approach only.
            if dvdr < 0.0 {
                let winvrho = 0.25 * (wkern_i + wkern_j) * (inv_rho_i + inv_rho_j);

                match params.avisc {
                    ViscosityKind::Mon97 => {
                        // The pure-hydro signal speed carries the alpha
                        // factor inside the beta term; the self-gravity
                        // variant does not (see ComputeSphHydroGravForces
                        // in the grad-h formulation).
                        let vsignal = if params.self_gravity {
                            parts.sound[i] + parts.sound[j] - params.beta_visc * dvdr
                        } else {
                            parts.sound[i] + parts.sound[j]
                                - params.beta_visc * params.alpha_visc * dvdr
                        };
                        paux -= params.alpha_visc * vsignal * dvdr * winvrho;
                        let uaux = 0.5 * params.alpha_visc * vsignal * dvdr * dvdr * winvrho;
                        accum.dudt[i] -= parts.m[j] * uaux;
                        accum.dudt[j] -= parts.m[i] * uaux;
                    }
                    ViscosityKind::Mon97Td => {
                        let alpha_mean = 0.5 * (parts.alpha[i] + parts.alpha[j]);
                        let vsignal = parts.sound[i] + parts.sound[j]
                            - params.beta_visc * alpha_mean * dvdr;
                        paux -= alpha_mean * vsignal * dvdr * winvrho;
                        let uaux = 0.5 * alpha_mean * vsignal * dvdr * dvdr * winvrho;
                        accum.dudt[i] -= parts.m[j] * uaux;
                        accum.dudt[j] -= parts.m[i] * uaux;
                    }
                    ViscosityKind::None => {}
                }

                match params.acond {
                    ConductivityKind::Wadsley2008 => {
                        let uaux = 0.5
                            * dvdr
                            * (parts.u[j] - parts.u[i])
                            * (inv_rho_i * wkern_i + inv_rho_j * wkern_j);
                        accum.dudt[i] += parts.m[j] * uaux;
                        accum.dudt[j] -= parts.m[i] * uaux;
                    }
                    ConductivityKind::Price2008 => {
                        let vsignal = ((pressure_of(parts, i, eos)
                            - pressure_of(parts, j, eos))
                        .abs()
                            * 0.5
                            * (inv_rho_i + inv_rho_j))
                            .sqrt();
                        let du = parts.u[i] - parts.u[j];
                        accum.dudt[i] += 0.5 * parts.m[j] * vsignal * du * winvrho;
                        accum.dudt[j] -= 0.5 * parts.m[i] * vsignal * du * winvrho;
                    }
                    ConductivityKind::None => {}
                }
            }

            for k in 0..D {
                accum.a[i][k] += parts.m[j] * dr[k] * paux;
                accum.a[j][k] -= parts.m[i] * dr[k] * paux;
            }
            accum.div_v[i] -= parts.m[j] * dvdr * wkern_i;
            accum.div_v[j] -= parts.m[i] * dvdr * wkern_j;
        }

        if params.self_gravity {
            // Softened pair gravity with the grad-h correction; exactly
            // Newtonian beyond both kernel supports.
            let paux = 0.5
                * (inv_h_i * inv_h_i * kern.wgrav(drmag * inv_h_i)
                    + (parts.zeta[i] + parts.chi[i]) * wkern_i
                    + inv_h_j * inv_h_j * kern.wgrav(drmag * inv_h_j)
                    + (parts.zeta[j] + parts.chi[j]) * wkern_j);
            let gaux = 0.5
                * (inv_h_i * kern.wpot(drmag * inv_h_i)
                    + inv_h_j * kern.wpot(drmag * inv_h_j));

            for k in 0..D {
                accum.a_grav[i][k] += parts.m[j] * dr[k] * paux;
                accum.a_grav[j][k] -= parts.m[i] * dr[k] * paux;
            }
            accum.gpot[i] += parts.m[j] * gaux;
            accum.gpot[j] += parts.m[i] * gaux;

            if !params.hydro_forces {
                accum.div_v[i] -= parts.m[j] * dvdr * wkern_i;
                accum.div_v[j] -= parts.m[i] * dvdr * wkern_j;
            }
        }

        accum.level_neib[i] = accum.level_neib[i].max(parts.level[j]);
        accum.level_neib[j] = accum.level_neib[j].max(parts.level[i]);
    }
}

/// Gravity from every star onto one SPH particle, with mean-h softening.
fn star_contributions<const D: usize>(
    i: usize,
    parts: &ParticleArrays<D>,
    stars: &StarArrays<D>,
    kern: &KernelTable<D>,
    accum: &mut ForceAccum<D>,
) {
    for j in 0..stars.len() {
        let mut dr = vec::sub(&stars.r[j], &parts.r[i]);
        let drmag = (vec::dot(&dr, &dr) + SMALL_NUMBER).sqrt();
        let inv_drmag = 1.0 / drmag;
        for k in 0..D {
            dr[k] *= inv_drmag;
        }
        let inv_h_mean = 2.0 / (parts.h[i] + stars.h[j]);

        let paux = stars.m[j] * inv_h_mean * inv_h_mean * kern.wgrav(drmag * inv_h_mean);
        for k in 0..D {
            accum.a_grav[i][k] += dr[k] * paux;
        }
        accum.gpot[i] += stars.m[j] * inv_h_mean * kern.wpot(drmag * inv_h_mean);
    }
}

/// Evaluate forces for every active particle.
///
/// `partners_of(i)` supplies the candidate pair partners for particle i:
/// the kernel-range neighbour list for hydro-only runs, or every particle
/// when self-gravity is on (the softened pair formula degrades to 1/r^2
/// outside the kernel, so no separate direct-sum list is needed).
///
/// Active particles have their accumulated fields zeroed and rebuilt;
/// contributions landing on inactive particles are dropped.
pub fn evaluate_forces<const D: usize>(
    parts: &mut ParticleArrays<D>,
    stars: &StarArrays<D>,
    kern: &KernelTable<D>,
    eos: &EquationOfState,
    params: &ForceParams,
    partners_of: &(dyn Fn(usize) -> Vec<usize> + Sync),
) {
    let total = parts.total();
    let actives: Vec<usize> = (0..parts.n_real).filter(|&i| parts.active[i]).collect();
    if actives.is_empty() {
        return;
    }

    let parts_ref: &ParticleArrays<D> = parts;
    let chunk = (actives.len() / (4 * rayon::current_num_threads().max(1))).max(16);
    let accum = actives
        .par_chunks(chunk)
        .map(|idxs| {
            let mut local = ForceAccum::<D>::zeros(total);
            for &i in idxs {
                let partners = partners_of(i);
                pair_sums(i, &partners, parts_ref, kern, eos, params, &mut local);
                if params.self_gravity && !stars.is_empty() {
                    star_contributions(i, parts_ref, stars, kern, &mut local);
                }
            }
            local
        })
        .reduce(|| ForceAccum::<D>::zeros(total), ForceAccum::merge);

    for &i in &actives {
        parts.a[i] = accum.a[i];
        parts.a_grav[i] = accum.a_grav[i];
        parts.dudt[i] = accum.dudt[i];
        parts.div_v[i] += accum.div_v[i];
        parts.gpot[i] = accum.gpot[i];
        parts.level_neib[i] = parts.level_neib[i].max(accum.level_neib[i]);
    }
}

/// Normalise the velocity divergence and add the PdV compression term.
pub fn post_hydro_quantities<const D: usize>(parts: &mut ParticleArrays<D>, eos: &EquationOfState) {
    for i in 0..parts.n_real {
        if !parts.active[i] {
            continue;
        }
        let inv_rho = 1.0 / parts.rho[i];
        parts.div_v[i] *= inv_rho;
        parts.dudt[i] -=
            eos.pressure(parts.rho[i], parts.u[i]) * parts.div_v[i] * inv_rho * parts.inv_omega[i];
    }
}

/// Direct star-star gravity by summation (unsoftened).
pub fn star_star_forces<const D: usize>(stars: &mut StarArrays<D>) {
    let n = stars.len();
    for i in 0..n {
        if !stars.active[i] {
            continue;
        }
        stars.a[i] = [0.0; D];
        stars.gpot[i] = 0.0;
    }
    for i in 0..n {
        if !stars.active[i] {
            continue;
        }
        for j in 0..n {
            if i == j {
                continue;
            }
            let dr = vec::sub(&stars.r[j], &stars.r[i]);
            let drsqd = vec::dot(&dr, &dr) + SMALL_NUMBER;
            let inv_drmag = 1.0 / drsqd.sqrt();
            let inv_dr3 = inv_drmag * inv_drmag * inv_drmag;
            for k in 0..D {
                stars.a[i][k] += stars.m[j] * dr[k] * inv_dr3;
            }
            stars.gpot[i] += stars.m[j] * inv_drmag;
        }
    }
}

/// Gravity of the gas field onto active stars, with mean-h softening.
pub fn star_gas_forces<const D: usize>(
    stars: &mut StarArrays<D>,
    parts: &ParticleArrays<D>,
    kern: &KernelTable<D>,
) {
    for i in 0..stars.len() {
        if !stars.active[i] {
            continue;
        }
        for j in 0..parts.n_real {
            let mut dr = vec::sub(&parts.r[j], &stars.r[i]);
            let drmag = (vec::dot(&dr, &dr) + SMALL_NUMBER).sqrt();
            let inv_drmag = 1.0 / drmag;
            for k in 0..D {
                dr[k] *= inv_drmag;
            }
            let inv_h_mean = 2.0 / (stars.h[i] + parts.h[j]);
            let paux = parts.m[j] * inv_h_mean * inv_h_mean * kern.wgrav(drmag * inv_h_mean);
            for k in 0..D {
                stars.a[i][k] += dr[k] * paux;
            }
            stars.gpot[i] += parts.m[j] * inv_h_mean * kern.wpot(drmag * inv_h_mean);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kernels::KernelKind;
    use crate::neighbor::BruteForceSearch;
    use crate::smoothing::HSolver;

    fn eos() -> EquationOfState {
        EquationOfState::Isothermal { temp0: 1.0, mu_bar: 1.0, gamma: 5.0 / 3.0 }
    }

    /// Converge h/rho/pfactor for every particle so forces see a
    /// self-consistent state.
    fn settle<const D: usize>(parts: &mut ParticleArrays<D>, kern: &KernelTable<D>) {
        let stars = StarArrays::<D>::new();
        let solver = HSolver { h_converge: 1.0e-8, ..Default::default() };
        let search = BruteForceSearch;
        let snapshot = parts.clone();
        let gather = move |i: usize, radius: f64| crate::neighbor::GatherList {
            neighbors: search.gather_within(&snapshot, &snapshot.r[i], radius, Some(i)),
            h_max: radius / 2.0,
        };
        solver
            .update_all(parts, &stars, kern, &eos(), &gather, 10.0)
            .unwrap();
    }

    fn all_partners<const D: usize>(parts: &ParticleArrays<D>) -> impl Fn(usize) -> Vec<usize> + Sync {
        let total = parts.total();
        move |i: usize| (0..total).filter(|&j| j != i).collect()
    }

    #[test]
    fn pressure_forces_obey_newtons_third_law() {
        // Random-ish clump of particles, all active: the net momentum input
        // from internal pressure forces must vanish to round-off.
        let kern = KernelTable::<3>::new(KernelKind::M4);
        let mut parts = ParticleArrays::<3>::with_capacity(64);
        for i in 0..4 {
            for j in 0..4 {
                for k in 0..3 {
                    let jitter = 0.013 * ((i * 7 + j * 3 + k) % 5) as f64 / 5.0;
                    parts
                        .push_particle(
                            [i as f64 * 0.1 + jitter, j as f64 * 0.1, k as f64 * 0.1],
                            [0.0; 3],
                            0.001,
                            0.12,
                            1.5,
                        )
                        .unwrap();
                }
            }
        }
        settle(&mut parts, &kern);

        let stars = StarArrays::<3>::new();
        let params = ForceParams { acond: ConductivityKind::None, ..Default::default() };
        let partners = all_partners(&parts);
        evaluate_forces(&mut parts, &stars, &kern, &eos(), &params, &partners);
        post_hydro_quantities(&mut parts, &eos());

        let mut net = [0.0; 3];
        for i in 0..parts.n_real {
            for k in 0..3 {
                net[k] += parts.m[i] * parts.a[i][k];
            }
        }
        for k in 0..3 {
            assert!(
                net[k].abs() < 1.0e-10,
                "net momentum input in axis {k}: {}",
                net[k]
            );
        }
    }

    #[test]
    fn two_particle_forces_are_equal_opposite_and_axial() {
        let kern = KernelTable::<3>::new(KernelKind::M4);
        let mut parts = ParticleArrays::<3>::with_capacity(4);
        parts.push_particle([0.0, 0.0, 0.0], [0.0; 3], 0.001, 0.06, 1.5).unwrap();
        parts.push_particle([0.05, 0.0, 0.0], [0.0; 3], 0.001, 0.06, 1.5).unwrap();
        settle(&mut parts, &kern);

        let stars = StarArrays::<3>::new();
        let params = ForceParams::default();
        let partners = all_partners(&parts);
        evaluate_forces(&mut parts, &stars, &kern, &eos(), &params, &partners);

        for k in 0..3 {
            assert!(
                (parts.a[0][k] + parts.a[1][k]).abs() < 1.0e-12,
                "axis {k} not antisymmetric"
            );
        }
        assert!(parts.a[0][1].abs() < 1.0e-12);
        assert!(parts.a[0][2].abs() < 1.0e-12);
        // Equal pressure on both sides: the pair repels.
        assert!(parts.a[0][0] < 0.0 && parts.a[1][0] > 0.0);
    }

    #[test]
    fn viscosity_heats_on_approach_only() {
        let kern = KernelTable::<3>::new(KernelKind::M4);
        let eos = EquationOfState::Adiabatic { mu_bar: 1.0, gamma: 5.0 / 3.0 };
        let mut approaching = ParticleArrays::<3>::with_capacity(4);
        approaching.push_particle([0.0; 3], [0.5, 0.0, 0.0], 0.001, 0.06, 1.5).unwrap();
        approaching.push_particle([0.05, 0.0, 0.0], [-0.5, 0.0, 0.0], 0.001, 0.06, 1.5).unwrap();
        let mut receding = approaching.clone();
        receding.v[0] = [-0.5, 0.0, 0.0];
        receding.v[1] = [0.5, 0.0, 0.0];

        let stars = StarArrays::<3>::new();
        let solver = HSolver { h_converge: 1.0e-8, ..Default::default() };
        for parts in [&mut approaching, &mut receding] {
            let snapshot = parts.clone();
            let gather = move |i: usize, radius: f64| crate::neighbor::GatherList {
                neighbors: BruteForceSearch.gather_within(&snapshot, &snapshot.r[i], radius, Some(i)),
                h_max: radius / 2.0,
            };
            solver.update_all(parts, &stars, &kern, &eos, &gather, 10.0).unwrap();
        }

        let params = ForceParams::default();
        let approaching_partners = all_partners(&approaching);
        evaluate_forces(&mut approaching, &stars, &kern, &eos, &params, &approaching_partners);
        let receding_partners = all_partners(&receding);
        evaluate_forces(&mut receding, &stars, &kern, &eos, &params, &receding_partners);

        assert!(
            approaching.dudt[0] > 0.0,
            "approaching pair must heat: dudt={}",
            approaching.dudt[0]
        );
        assert!(
            receding.dudt[0].abs() < 1.0e-14,
            "receding pair must not feel viscosity: dudt={}",
            receding.dudt[0]
        );
    }

    #[test]
    fn softened_gravity_reverts_to_newtonian_far_away() {
        let kern = KernelTable::<3>::new(KernelKind::M4);
        let mut parts = ParticleArrays::<3>::with_capacity(4);
        parts.push_particle([0.0; 3], [0.0; 3], 2.0, 0.05, 1.5).unwrap();
        parts.push_particle([3.0, 0.0, 0.0], [0.0; 3], 1.0, 0.05, 1.5).unwrap();
        // Leave rho/pfactor alone: pure gravity run.
        parts.rho[0] = 1.0;
        parts.rho[1] = 1.0;

        let stars = StarArrays::<3>::new();
        let params = ForceParams {
            hydro_forces: false,
            self_gravity: true,
            ..Default::default()
        };
        let partners = all_partners(&parts);
        evaluate_forces(&mut parts, &stars, &kern, &eos(), &params, &partners);

        // Separation 3.0 >> 2h: expect a = G m / r^2 toward the companion
        // (G = 1 code units).
        let expected = 1.0 / 9.0;
        assert!(
            (parts.a_grav[0][0] - expected).abs() < 1.0e-9,
            "a={} expected={}",
            parts.a_grav[0][0],
            expected
        );
        let expected_pot = 1.0 / 3.0;
        assert!((parts.gpot[0] - expected_pot).abs() < 1.0e-9);
        // Newton's third law in mass-weighted form.
        assert!(
            (2.0 * parts.a_grav[0][0] + 1.0 * parts.a_grav[1][0]).abs() < 1.0e-9
        );
    }

    #[test]
    fn star_gravity_pulls_gas_toward_star() {
        let kern = KernelTable::<3>::new(KernelKind::M4);
        let mut parts = ParticleArrays::<3>::with_capacity(2);
        parts.push_particle([0.0; 3], [0.0; 3], 1.0e-6, 0.05, 1.5).unwrap();
        parts.rho[0] = 1.0;
        let mut stars = StarArrays::<3>::new();
        stars.push_star([1.0, 0.0, 0.0], [0.0; 3], 5.0, 0.05);

        let params = ForceParams {
            hydro_forces: false,
            self_gravity: true,
            ..Default::default()
        };
        evaluate_forces(&mut parts, &stars, &kern, &eos(), &params, &|_| Vec::new());

        assert!(
            (parts.a_grav[0][0] - 5.0).abs() < 1.0e-9,
            "a={} expected=5.0",
            parts.a_grav[0][0]
        );
    }

    #[test]
    fn star_star_direct_summation() {
        let mut stars = StarArrays::<3>::new();
        stars.push_star([0.0; 3], [0.0; 3], 1.0, 0.01);
        stars.push_star([2.0, 0.0, 0.0], [0.0; 3], 1.0, 0.01);
        star_star_forces(&mut stars);

        assert!((stars.a[0][0] - 0.25).abs() < 1.0e-12);
        assert!((stars.a[1][0] + 0.25).abs() < 1.0e-12);
        assert!((stars.gpot[0] - 0.5).abs() < 1.0e-12);
    }

    #[test]
    fn pdv_term_cools_expanding_gas() {
        let kern = KernelTable::<1>::new(KernelKind::M4);
        let eos = EquationOfState::Adiabatic { mu_bar: 1.0, gamma: 5.0 / 3.0 };
        let mut parts = ParticleArrays::<1>::with_capacity(64);
        for i in 0..32 {
            // Uniform lattice with a linear expansion velocity field.
            let x = i as f64 * 0.01;
            parts.push_particle([x], [x], 0.01, 0.012, 1.5).unwrap();
        }
        let stars = StarArrays::<1>::new();
        let solver = HSolver { h_converge: 1.0e-8, ..Default::default() };
        let snapshot = parts.clone();
        let gather = move |i: usize, radius: f64| crate::neighbor::GatherList {
            neighbors: BruteForceSearch.gather_within(&snapshot, &snapshot.r[i], radius, Some(i)),
            h_max: radius / 2.0,
        };
        solver.update_all(&mut parts, &stars, &kern, &eos, &gather, 10.0).unwrap();

        let params = ForceParams { avisc: ViscosityKind::None, ..Default::default() };
        let partners = all_partners(&parts);
        evaluate_forces(&mut parts, &stars, &kern, &eos, &params, &partners);
        post_hydro_quantities(&mut parts, &eos);

        let mid = 16;
        assert!(
            parts.div_v[mid] > 0.0,
            "expanding flow must have positive div v, got {}",
            parts.div_v[mid]
        );
        assert!(parts.dudt[mid] < 0.0, "expansion must cool, dudt={}", parts.dudt[mid]);
    }
}
