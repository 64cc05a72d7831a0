//! Simulation box, periodic wrapping and boundary ghost particles.
//!
//! Ghosts are created dimension by dimension so that a second axis sees the
//! ghosts of the first and produces corner images.  Every ghost records the
//! face that created it and its real origin; the per-step refresh copies
//! the full origin state and reapplies only the stored shift (periodic) or
//! reflection (mirror).

use kernel::particle::{GhostKind, ParticleArrays, Side};
use kernel::SphError;

use crate::config::{BoundaryKind, SimulationConfig};

/// The simulation bounding box with per-face boundary kinds.
#[derive(Debug, Clone, Copy)]
pub struct DomainBox<const D: usize> {
    /// Minimum corner.
    pub min: [f64; D],
    /// Maximum corner.
    pub max: [f64; D],
    /// Lower-face boundary kinds.
    pub lhs: [BoundaryKind; D],
    /// Upper-face boundary kinds.
    pub rhs: [BoundaryKind; D],
}

impl<const D: usize> DomainBox<D> {
    /// Build the box from a validated configuration.
    pub fn from_config(config: &SimulationConfig) -> Result<Self, SphError> {
        if config.ndim != D {
            return Err(SphError::Config(format!(
                "config ndim {} does not match compiled dimension {D}",
                config.ndim
            )));
        }
        let mut b = Self {
            min: [0.0; D],
            max: [0.0; D],
            lhs: [BoundaryKind::Open; D],
            rhs: [BoundaryKind::Open; D],
        };
        for k in 0..D {
            b.min[k] = config.box_min[k];
            b.max[k] = config.box_max[k];
            b.lhs[k] = config.boundaries.lhs[k];
            b.rhs[k] = config.boundaries.rhs[k];
        }
        Ok(b)
    }

    /// An all-open unit box (tests and defaults).
    pub fn open_unit() -> Self {
        Self {
            min: [0.0; D],
            max: [1.0; D],
            lhs: [BoundaryKind::Open; D],
            rhs: [BoundaryKind::Open; D],
        }
    }

    /// Edge lengths.
    pub fn size(&self) -> [f64; D] {
        let mut s = [0.0; D];
        for k in 0..D {
            s[k] = self.max[k] - self.min[k];
        }
        s
    }

    /// True when every face is open (no wrapping, no ghosts).
    pub fn all_open(&self) -> bool {
        (0..D).all(|k| self.lhs[k] == BoundaryKind::Open && self.rhs[k] == BoundaryKind::Open)
    }

    /// True if `pos` lies inside the box.
    pub fn contains(&self, pos: &[f64; D]) -> bool {
        (0..D).all(|k| pos[k] >= self.min[k] && pos[k] <= self.max[k])
    }
}

/// Move particles that left the box back in across periodic faces,
/// shifting the integration checkpoint along with the position so the
/// block-step integrator keeps a consistent state.
pub fn check_boundaries<const D: usize>(simbox: &DomainBox<D>, parts: &mut ParticleArrays<D>) {
    let size = simbox.size();
    for i in 0..parts.n_real {
        for k in 0..D {
            if parts.r[i][k] < simbox.min[k] && simbox.lhs[k] == BoundaryKind::Periodic {
                parts.r[i][k] += size[k];
                parts.r0[i][k] += size[k];
            }
            if parts.r[i][k] > simbox.max[k] && simbox.rhs[k] == BoundaryKind::Periodic {
                parts.r[i][k] -= size[k];
                parts.r0[i][k] -= size[k];
            }
        }
    }
}

/// Search for particles whose kernel reach (projected over one ghost
/// lifetime `t_ghost`) crosses a closed face, and emit ghost images.
///
/// Existing ghosts participate in later axes, which produces the corner
/// images.  Overflowing the preallocated ghost capacity is fatal.
pub fn search_ghost_particles<const D: usize>(
    t_ghost: f64,
    simbox: &DomainBox<D>,
    parts: &mut ParticleArrays<D>,
    kern_range: f64,
    ghost_range: f64,
) -> Result<(), SphError> {
    parts.clear_ghosts();
    if simbox.all_open() {
        return Ok(());
    }

    let size = simbox.size();
    for k in 0..D {
        if simbox.lhs[k] == BoundaryKind::Open && simbox.rhs[k] == BoundaryKind::Open {
            continue;
        }
        // The candidate set grows as earlier axes add ghosts.
        let candidates = parts.total();
        for i in 0..candidates {
            let reach = ghost_range * kern_range * parts.h[i];
            let drift_in = (parts.v[i][k] * t_ghost).min(0.0);
            if parts.r[i][k] + drift_in < simbox.min[k] + reach {
                match simbox.lhs[k] {
                    BoundaryKind::Periodic => {
                        let g = parts
                            .push_ghost_of(i, GhostKind::Periodic { axis: k, side: Side::Lower })?;
                        parts.r[g][k] += size[k];
                    }
                    BoundaryKind::Mirror => {
                        let g = parts
                            .push_ghost_of(i, GhostKind::Mirror { axis: k, side: Side::Lower })?;
                        parts.r[g][k] = 2.0 * simbox.min[k] - parts.r[g][k];
                        parts.v[g][k] = -parts.v[g][k];
                    }
                    BoundaryKind::Open => {}
                }
            }
            let drift_out = (parts.v[i][k] * t_ghost).max(0.0);
            if parts.r[i][k] + drift_out > simbox.max[k] - reach {
                match simbox.rhs[k] {
                    BoundaryKind::Periodic => {
                        let g = parts
                            .push_ghost_of(i, GhostKind::Periodic { axis: k, side: Side::Upper })?;
                        parts.r[g][k] -= size[k];
                    }
                    BoundaryKind::Mirror => {
                        let g = parts
                            .push_ghost_of(i, GhostKind::Mirror { axis: k, side: Side::Upper })?;
                        parts.r[g][k] = 2.0 * simbox.max[k] - parts.r[g][k];
                        parts.v[g][k] = -parts.v[g][k];
                    }
                    BoundaryKind::Open => {}
                }
            }
        }
    }
    tracing::debug!(
        n_ghost = parts.n_ghost,
        n_real = parts.n_real,
        "boundary ghosts rebuilt"
    );
    Ok(())
}

/// Refresh every boundary ghost from its origin, reapplying the stored
/// shift or reflection.  Peer-exchange ghosts are refreshed by the worker
/// exchange instead and are skipped here.
pub fn copy_data_to_ghosts<const D: usize>(simbox: &DomainBox<D>, parts: &mut ParticleArrays<D>) {
    let size = simbox.size();
    for g in parts.n_real..parts.total() {
        match parts.kind[g] {
            GhostKind::Periodic { axis, side } => {
                parts.refresh_ghost(g);
                match side {
                    Side::Lower => parts.r[g][axis] += size[axis],
                    Side::Upper => parts.r[g][axis] -= size[axis],
                }
            }
            GhostKind::Mirror { axis, side } => {
                parts.refresh_ghost(g);
                let face = match side {
                    Side::Lower => simbox.min[axis],
                    Side::Upper => simbox.max[axis],
                };
                parts.r[g][axis] = 2.0 * face - parts.r[g][axis];
                parts.v[g][axis] = -parts.v[g][axis];
            }
            GhostKind::Exchange | GhostKind::Real => {}
        }
    }
}
