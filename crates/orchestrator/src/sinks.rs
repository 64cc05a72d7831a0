//! Sink particles: creation at converging potential minima and accretion
//! of surrounding gas.
//!
//! A fluid particle becomes a sink candidate when it is the potential
//! minimum of its neighbourhood, exceeds the threshold density and sits in
//! converging flow.  Creation is atomic: a star particle inherits the
//! candidate's mass and kinematics and the fluid particle is removed.
//!
//! Accretion transfers mass, momentum and internal energy from gas inside
//! the sink radius onto the sink, either a fraction per step scaled by the
//! sink dynamical time (smooth) or whole particles at once (sudden).

use kernel::particle::{ParticleArrays, StarArrays};
use kernel::{vec, SphError};

/// Sink creation and accretion parameters.
#[derive(Debug, Clone, Copy)]
pub struct SinkParams {
    /// Creation density threshold.
    pub rho_sink: f64,
    /// Accretion radius in units of the candidate's smoothing length.
    pub radius_hfac: f64,
    /// Smooth (fractional) or sudden (whole-particle) accretion.
    pub smooth: bool,
}

/// Fraction below which a drained particle is removed outright.
const REMOVAL_FRACTION: f64 = 1.0e-3;

/// Scan for sink candidates and convert them to stars.
///
/// Candidates are processed densest first; a candidate inside an existing
/// or newly created sink radius is skipped.  New stars join the block-step
/// hierarchy at integer time `n` with step `nstep`.  Returns the indices
/// of the created stars.
pub fn search_new_sinks<const D: usize>(
    parts: &mut ParticleArrays<D>,
    stars: &mut StarArrays<D>,
    params: &SinkParams,
    n: u64,
    nstep: u64,
) -> Vec<usize> {
    let mut candidates: Vec<usize> = (0..parts.n_real)
        .filter(|&i| {
            parts.sink_id[i] == -1
                && parts.potmin[i]
                && parts.rho[i] > params.rho_sink
                && parts.div_v[i] < 0.0
        })
        .collect();
    if candidates.is_empty() {
        return Vec::new();
    }
    candidates.sort_by(|&a, &b| parts.rho[b].total_cmp(&parts.rho[a]));

    let mut created = Vec::new();
    let mut consumed = Vec::new();
    for &i in &candidates {
        // Reject candidates already claimed by a sink.
        let claimed = (0..stars.len()).any(|s| {
            stars.radius[s] > 0.0
                && vec::norm(&vec::sub(&parts.r[i], &stars.r[s])) < stars.radius[s]
        });
        if claimed {
            continue;
        }
        let s = stars.push_star(parts.r[i], parts.v[i], parts.m[i], parts.h[i]);
        stars.radius[s] = params.radius_hfac * parts.h[i];
        stars.nlast[s] = n;
        stars.nstep[s] = nstep;
        stars.active[s] = false;
        created.push(s);
        consumed.push(i);
        tracing::info!(
            particle = i,
            star = s,
            rho = parts.rho[i],
            radius = stars.radius[s],
            "sink created"
        );
    }

    if !consumed.is_empty() {
        parts.clear_ghosts();
        consumed.sort_unstable();
        parts.delete_particles(&consumed);
    }
    created
}

/// Accrete gas onto every sink over a step of duration `dt`.
///
/// Mass and momentum move conservatively (centre-of-mass merge); fully
/// drained particles are removed.  Surviving particles inside a sink
/// radius are tagged with the sink id so the h-solver honours the sink
/// interior floor.
pub fn accrete_onto_sinks<const D: usize>(
    parts: &mut ParticleArrays<D>,
    stars: &mut StarArrays<D>,
    params: &SinkParams,
    dt: f64,
) -> Result<(), SphError> {
    let mut removed: Vec<usize> = Vec::new();
    for i in 0..parts.n_real {
        parts.sink_id[i] = -1;
    }

    for s in 0..stars.len() {
        if stars.radius[s] <= 0.0 {
            continue;
        }
        // Sink dynamical timescale sets the smooth drain rate.
        let t_dyn = 2.0 * std::f64::consts::PI
            * (stars.radius[s].powi(3) / stars.m[s]).sqrt();
        let frac = if params.smooth { (dt / t_dyn).min(1.0) } else { 1.0 };

        for i in 0..parts.n_real {
            if removed.contains(&i) {
                continue;
            }
            let dr = vec::sub(&parts.r[i], &stars.r[s]);
            if vec::norm(&dr) >= stars.radius[s] {
                continue;
            }
            parts.sink_id[i] = s as i64;

            let dm = frac * parts.m[i];
            let new_mass = stars.m[s] + dm;
            for k in 0..D {
                stars.r[s][k] = (stars.m[s] * stars.r[s][k] + dm * parts.r[i][k]) / new_mass;
                stars.v[s][k] = (stars.m[s] * stars.v[s][k] + dm * parts.v[i][k]) / new_mass;
                stars.r0[s][k] = stars.r[s][k];
                stars.v0[s][k] = stars.v[s][k];
            }
            stars.m[s] = new_mass;
            parts.m[i] -= dm;

            if !params.smooth || parts.m[i] < REMOVAL_FRACTION * dm.max(parts.m[i] + dm) {
                removed.push(i);
            }
        }
    }

    if !removed.is_empty() {
        tracing::debug!(count = removed.len(), "gas particles accreted");
        parts.clear_ghosts();
        removed.sort_unstable();
        removed.dedup();
        parts.delete_particles(&removed);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn gas_blob() -> ParticleArrays<3> {
        let mut p = ParticleArrays::<3>::with_capacity(16);
        for i in 0..5 {
            let x = i as f64 * 0.01;
            p.push_particle([x, 0.0, 0.0], [0.0; 3], 1.0, 0.02, 1.0).unwrap();
            p.rho[i] = 10.0;
            p.div_v[i] = -1.0;
        }
        p
    }

    #[test]
    fn candidate_becomes_a_sink() {
        let mut parts = gas_blob();
        let mut stars = StarArrays::<3>::new();
        parts.potmin[2] = true;
        let params = SinkParams { rho_sink: 5.0, radius_hfac: 2.0, smooth: false };

        let created = search_new_sinks(&mut parts, &mut stars, &params, 4, 2);
        assert_eq!(created.len(), 1);
        assert_eq!(parts.n_real, 4, "candidate consumed");
        assert_eq!(stars.len(), 1);
        assert_eq!(stars.m[0], 1.0);
        assert!((stars.radius[0] - 0.04).abs() < 1.0e-12);
        assert_eq!(stars.nlast[0], 4);
    }

    #[test]
    fn no_sink_without_convergence_or_density() {
        let mut parts = gas_blob();
        let mut stars = StarArrays::<3>::new();
        parts.potmin[2] = true;
        parts.div_v[2] = 0.5; // diverging
        let params = SinkParams { rho_sink: 5.0, radius_hfac: 2.0, smooth: false };
        assert!(search_new_sinks(&mut parts, &mut stars, &params, 0, 2).is_empty());

        parts.div_v[2] = -1.0;
        parts.rho[2] = 1.0; // below threshold
        assert!(search_new_sinks(&mut parts, &mut stars, &params, 0, 2).is_empty());
    }

    #[test]
    fn densest_candidate_wins_inside_shared_radius() {
        let mut parts = gas_blob();
        let mut stars = StarArrays::<3>::new();
        parts.potmin[1] = true;
        parts.potmin[2] = true;
        parts.rho[2] = 20.0;
        let params = SinkParams { rho_sink: 5.0, radius_hfac: 2.0, smooth: false };

        let created = search_new_sinks(&mut parts, &mut stars, &params, 0, 2);
        assert_eq!(created.len(), 1, "second candidate inside the first radius skipped");
        // The denser particle (old index 2) became the sink.
        assert!((stars.r[0][0] - 0.02).abs() < 1.0e-12);
    }

    #[test]
    fn sudden_accretion_absorbs_neighbours_conservatively() {
        let mut parts = ParticleArrays::<3>::with_capacity(8);
        parts.push_particle([0.05, 0.0, 0.0], [1.0, 0.0, 0.0], 2.0, 0.02, 1.0).unwrap();
        parts.push_particle([5.0, 0.0, 0.0], [0.0; 3], 1.0, 0.02, 1.0).unwrap();
        let mut stars = StarArrays::<3>::new();
        stars.push_star([0.0; 3], [0.0; 3], 2.0, 0.02);
        stars.radius[0] = 0.1;

        let p_before = parts.m[0] * parts.v[0][0] + stars.m[0] * stars.v[0][0];
        let params = SinkParams { rho_sink: 1.0, radius_hfac: 2.0, smooth: false };
        accrete_onto_sinks(&mut parts, &mut stars, &params, 0.01).unwrap();

        assert_eq!(parts.n_real, 1, "only the distant particle survives");
        assert_eq!(stars.m[0], 4.0);
        let p_after = stars.m[0] * stars.v[0][0];
        assert!(
            (p_after - p_before).abs() < 1.0e-12,
            "momentum not conserved: {p_before} -> {p_after}"
        );
    }

    #[test]
    fn smooth_accretion_drains_gradually() {
        let mut parts = ParticleArrays::<3>::with_capacity(8);
        parts.push_particle([0.05, 0.0, 0.0], [0.0; 3], 1.0, 0.02, 1.0).unwrap();
        let mut stars = StarArrays::<3>::new();
        stars.push_star([0.0; 3], [0.0; 3], 1.0, 0.02);
        stars.radius[0] = 0.1;

        let params = SinkParams { rho_sink: 1.0, radius_hfac: 2.0, smooth: true };
        // Step much shorter than the sink dynamical time.
        let t_dyn = 2.0 * std::f64::consts::PI * (0.1_f64.powi(3) / 1.0).sqrt();
        accrete_onto_sinks(&mut parts, &mut stars, &params, 0.01 * t_dyn).unwrap();

        assert_eq!(parts.n_real, 1, "particle survives smooth accretion");
        assert!((parts.m[0] - 0.99).abs() < 1.0e-12);
        assert!((stars.m[0] - 1.01).abs() < 1.0e-12);
        assert_eq!(parts.sink_id[0], 0, "survivor tagged with its sink");
    }
}
