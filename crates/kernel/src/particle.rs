//! Struct-of-arrays particle storage for fluid and star particles.
//!
//! All arrays are parallel: index `i` across every array refers to the same
//! particle.  Real particles occupy indices `0..n_real`; ghost copies
//! (periodic, mirror, or received from a peer worker) occupy
//! `n_real..n_real + n_ghost` and are rebuilt every step.  Capacity is fixed
//! at construction: running out of room is a fatal resource error, never a
//! silent reallocation.

use crate::SphError;

/// Which boundary (or peer) created a ghost.  `Real` marks an owned
/// particle.  The tag is set at creation and never changes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GhostKind {
    /// Owned, real particle.
    Real,
    /// Periodic image shifted across the box along `axis`.
    Periodic {
        /// Boundary axis (0 = x, 1 = y, 2 = z).
        axis: usize,
        /// Which face of the box produced the ghost.
        side: Side,
    },
    /// Mirror image reflected about a box face along `axis`.
    Mirror {
        /// Boundary axis.
        axis: usize,
        /// Which face of the box produced the ghost.
        side: Side,
    },
    /// Copy received from a peer worker during ghost exchange.
    Exchange,
}

/// Lower (box-minimum) or upper (box-maximum) face of the domain.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Side {
    /// The face at the box minimum.
    Lower,
    /// The face at the box maximum.
    Upper,
}

/// Flat copy of one particle, used as the wire format for worker migration
/// and ghost exchange.
#[derive(Debug, Clone, Copy)]
pub struct ParticleRecord<const D: usize> {
    /// Position.
    pub r: [f64; D],
    /// Velocity.
    pub v: [f64; D],
    /// Hydrodynamic acceleration.
    pub a: [f64; D],
    /// Gravitational acceleration.
    pub a_grav: [f64; D],
    /// Block-step position checkpoint.
    pub r0: [f64; D],
    /// Block-step velocity checkpoint.
    pub v0: [f64; D],
    /// Block-step acceleration checkpoint.
    pub a0: [f64; D],
    /// Mass.
    pub m: f64,
    /// Smoothing length.
    pub h: f64,
    /// Density.
    pub rho: f64,
    /// Specific internal energy.
    pub u: f64,
    /// Internal-energy checkpoint.
    pub u0: f64,
    /// du/dt.
    pub dudt: f64,
    /// du/dt checkpoint.
    pub dudt0: f64,
    /// Pressure factor P/(rho^2 Omega).
    pub pfactor: f64,
    /// Grad-h correction Omega^-1.
    pub inv_omega: f64,
    /// Grad-h gravity correction zeta.
    pub zeta: f64,
    /// Stellar softening correction chi.
    pub chi: f64,
    /// Gravitational potential (positive magnitude).
    pub gpot: f64,
    /// Sound speed.
    pub sound: f64,
    /// Velocity divergence.
    pub div_v: f64,
    /// Time-dependent viscosity coefficient.
    pub alpha: f64,
    /// Step level.
    pub level: u32,
    /// Level of the most finely stepped neighbour.
    pub level_neib: u32,
    /// Integer time of the last step start.
    pub nlast: u64,
    /// Integer step size.
    pub nstep: u64,
    /// Sink membership (-1 if none).
    pub sink_id: i64,
}

/// Struct-of-arrays fluid particle storage, monomorphised over dimension.
#[derive(Debug, Clone)]
pub struct ParticleArrays<const D: usize> {
    /// Positions.
    pub r: Vec<[f64; D]>,
    /// Velocities.
    pub v: Vec<[f64; D]>,
    /// Hydrodynamic accelerations.
    pub a: Vec<[f64; D]>,
    /// Gravitational accelerations.
    pub a_grav: Vec<[f64; D]>,
    /// Position checkpoints at block-step start.
    pub r0: Vec<[f64; D]>,
    /// Velocity checkpoints at block-step start.
    pub v0: Vec<[f64; D]>,
    /// Acceleration checkpoints at block-step start.
    pub a0: Vec<[f64; D]>,
    /// Masses.
    pub m: Vec<f64>,
    /// Smoothing lengths.
    pub h: Vec<f64>,
    /// Densities.
    pub rho: Vec<f64>,
    /// Specific internal energies.
    pub u: Vec<f64>,
    /// Internal-energy checkpoints.
    pub u0: Vec<f64>,
    /// Internal-energy rates.
    pub dudt: Vec<f64>,
    /// Internal-energy rate checkpoints.
    pub dudt0: Vec<f64>,
    /// Pressure factors P/(rho^2 Omega).
    pub pfactor: Vec<f64>,
    /// Grad-h corrections Omega^-1.
    pub inv_omega: Vec<f64>,
    /// Grad-h gravity corrections zeta.
    pub zeta: Vec<f64>,
    /// Stellar softening corrections chi.
    pub chi: Vec<f64>,
    /// Gravitational potentials (positive magnitude).
    pub gpot: Vec<f64>,
    /// Sound speeds.
    pub sound: Vec<f64>,
    /// Velocity divergences.
    pub div_v: Vec<f64>,
    /// Time-dependent viscosity coefficients.
    pub alpha: Vec<f64>,
    /// Ghost tags.
    pub kind: Vec<GhostKind>,
    /// Ghost origin indices (self-index for real particles).
    pub iorig: Vec<usize>,
    /// Active flags (due a force evaluation this step).
    pub active: Vec<bool>,
    /// Potential-minimum flags.
    pub potmin: Vec<bool>,
    /// Step levels.
    pub level: Vec<u32>,
    /// Level of the most finely stepped neighbour.
    pub level_neib: Vec<u32>,
    /// Integer time of the last step start.
    pub nlast: Vec<u64>,
    /// Integer step sizes.
    pub nstep: Vec<u64>,
    /// Sink membership (-1 if none).
    pub sink_id: Vec<i64>,
    /// Number of owned real particles.
    pub n_real: usize,
    /// Number of ghosts currently appended after the real particles.
    pub n_ghost: usize,
    /// Fixed capacity (reals + ghosts).
    pub n_max: usize,
}

macro_rules! for_each_array {
    ($self:ident, $op:ident $(, $arg:expr)*) => {
        $self.r.$op($($arg),*);
        $self.v.$op($($arg),*);
        $self.a.$op($($arg),*);
        $self.a_grav.$op($($arg),*);
        $self.r0.$op($($arg),*);
        $self.v0.$op($($arg),*);
        $self.a0.$op($($arg),*);
        $self.m.$op($($arg),*);
        $self.h.$op($($arg),*);
        $self.rho.$op($($arg),*);
        $self.u.$op($($arg),*);
        $self.u0.$op($($arg),*);
        $self.dudt.$op($($arg),*);
        $self.dudt0.$op($($arg),*);
        $self.pfactor.$op($($arg),*);
        $self.inv_omega.$op($($arg),*);
        $self.zeta.$op($($arg),*);
        $self.chi.$op($($arg),*);
        $self.gpot.$op($($arg),*);
        $self.sound.$op($($arg),*);
        $self.div_v.$op($($arg),*);
        $self.alpha.$op($($arg),*);
        $self.kind.$op($($arg),*);
        $self.iorig.$op($($arg),*);
        $self.active.$op($($arg),*);
        $self.potmin.$op($($arg),*);
        $self.level.$op($($arg),*);
        $self.level_neib.$op($($arg),*);
        $self.nlast.$op($($arg),*);
        $self.nstep.$op($($arg),*);
        $self.sink_id.$op($($arg),*);
    };
}

impl<const D: usize> ParticleArrays<D> {
    /// Create empty storage with a fixed capacity for reals plus ghosts.
    pub fn with_capacity(n_max: usize) -> Self {
        Self {
            r: Vec::new(),
            v: Vec::new(),
            a: Vec::new(),
            a_grav: Vec::new(),
            r0: Vec::new(),
            v0: Vec::new(),
            a0: Vec::new(),
            m: Vec::new(),
            h: Vec::new(),
            rho: Vec::new(),
            u: Vec::new(),
            u0: Vec::new(),
            dudt: Vec::new(),
            dudt0: Vec::new(),
            pfactor: Vec::new(),
            inv_omega: Vec::new(),
            zeta: Vec::new(),
            chi: Vec::new(),
            gpot: Vec::new(),
            sound: Vec::new(),
            div_v: Vec::new(),
            alpha: Vec::new(),
            kind: Vec::new(),
            iorig: Vec::new(),
            active: Vec::new(),
            potmin: Vec::new(),
            level: Vec::new(),
            level_neib: Vec::new(),
            nlast: Vec::new(),
            nstep: Vec::new(),
            sink_id: Vec::new(),
            n_real: 0,
            n_ghost: 0,
            n_max,
        }
    }

    /// Total stored particles (reals + ghosts).
    pub fn total(&self) -> usize {
        self.n_real + self.n_ghost
    }

    /// True if no particles are stored.
    pub fn is_empty(&self) -> bool {
        self.total() == 0
    }

    /// Append a real particle with the given initial state.
    ///
    /// Accelerations, rates and correction terms start at zero; the particle
    /// begins active on level 0 with unit step.  Fails when the configured
    /// capacity is exhausted.
    pub fn push_particle(
        &mut self,
        r: [f64; D],
        v: [f64; D],
        m: f64,
        h: f64,
        u: f64,
    ) -> Result<usize, SphError> {
        debug_assert_eq!(self.n_ghost, 0, "reals must be appended before ghosts");
        if self.total() >= self.n_max {
            return Err(SphError::Resource(format!(
                "particle array full ({}/{})",
                self.total(),
                self.n_max
            )));
        }
        let i = self.r.len();
        self.r.push(r);
        self.v.push(v);
        self.a.push([0.0; D]);
        self.a_grav.push([0.0; D]);
        self.r0.push(r);
        self.v0.push(v);
        self.a0.push([0.0; D]);
        self.m.push(m);
        self.h.push(h);
        self.rho.push(0.0);
        self.u.push(u);
        self.u0.push(u);
        self.dudt.push(0.0);
        self.dudt0.push(0.0);
        self.pfactor.push(0.0);
        self.inv_omega.push(1.0);
        self.zeta.push(0.0);
        self.chi.push(0.0);
        self.gpot.push(0.0);
        self.sound.push(0.0);
        self.div_v.push(0.0);
        self.alpha.push(0.0);
        self.kind.push(GhostKind::Real);
        self.iorig.push(i);
        self.active.push(true);
        self.potmin.push(false);
        self.level.push(0);
        self.level_neib.push(0);
        self.nlast.push(0);
        self.nstep.push(1);
        self.sink_id.push(-1);
        self.n_real += 1;
        Ok(i)
    }

    /// Append a ghost copy of particle `origin` carrying `kind`.
    ///
    /// The caller applies the positional shift or reflection afterwards.
    /// Ghosts are created inactive.
    pub fn push_ghost_of(&mut self, origin: usize, kind: GhostKind) -> Result<usize, SphError> {
        if self.total() >= self.n_max {
            return Err(SphError::Resource(format!(
                "ghost buffer full ({}/{})",
                self.total(),
                self.n_max
            )));
        }
        let i = self.copy_row_appending(origin);
        // Corner ghosts reference the edge ghost they were built from;
        // refreshing in ascending index order resolves the chain, each
        // link reapplying its own single shift.
        self.iorig[i] = origin;
        self.kind[i] = kind;
        self.active[i] = false;
        self.n_ghost += 1;
        Ok(i)
    }

    /// Append a particle from a wire record, tagged with `kind`.
    pub fn push_record(&mut self, rec: &ParticleRecord<D>, kind: GhostKind) -> Result<usize, SphError> {
        if self.total() >= self.n_max {
            return Err(SphError::Resource(format!(
                "particle array full ({}/{})",
                self.total(),
                self.n_max
            )));
        }
        let i = self.r.len();
        self.r.push(rec.r);
        self.v.push(rec.v);
        self.a.push(rec.a);
        self.a_grav.push(rec.a_grav);
        self.r0.push(rec.r0);
        self.v0.push(rec.v0);
        self.a0.push(rec.a0);
        self.m.push(rec.m);
        self.h.push(rec.h);
        self.rho.push(rec.rho);
        self.u.push(rec.u);
        self.u0.push(rec.u0);
        self.dudt.push(rec.dudt);
        self.dudt0.push(rec.dudt0);
        self.pfactor.push(rec.pfactor);
        self.inv_omega.push(rec.inv_omega);
        self.zeta.push(rec.zeta);
        self.chi.push(rec.chi);
        self.gpot.push(rec.gpot);
        self.sound.push(rec.sound);
        self.div_v.push(rec.div_v);
        self.alpha.push(rec.alpha);
        self.kind.push(kind);
        self.iorig.push(i);
        self.active.push(false);
        self.potmin.push(false);
        self.level.push(rec.level);
        self.level_neib.push(rec.level_neib);
        self.nlast.push(rec.nlast);
        self.nstep.push(rec.nstep);
        self.sink_id.push(rec.sink_id);
        match kind {
            GhostKind::Real => self.n_real += 1,
            _ => self.n_ghost += 1,
        }
        Ok(i)
    }

    /// Flatten particle `i` into a wire record.
    pub fn record(&self, i: usize) -> ParticleRecord<D> {
        ParticleRecord {
            r: self.r[i],
            v: self.v[i],
            a: self.a[i],
            a_grav: self.a_grav[i],
            r0: self.r0[i],
            v0: self.v0[i],
            a0: self.a0[i],
            m: self.m[i],
            h: self.h[i],
            rho: self.rho[i],
            u: self.u[i],
            u0: self.u0[i],
            dudt: self.dudt[i],
            dudt0: self.dudt0[i],
            pfactor: self.pfactor[i],
            inv_omega: self.inv_omega[i],
            zeta: self.zeta[i],
            chi: self.chi[i],
            gpot: self.gpot[i],
            sound: self.sound[i],
            div_v: self.div_v[i],
            alpha: self.alpha[i],
            level: self.level[i],
            level_neib: self.level_neib[i],
            nlast: self.nlast[i],
            nstep: self.nstep[i],
            sink_id: self.sink_id[i],
        }
    }

    /// Overwrite particle `dst` with a wire record, keeping its tag,
    /// origin index and active flag.  Used by the peer-ghost update pass.
    pub fn overwrite_record(&mut self, dst: usize, rec: &ParticleRecord<D>) {
        self.overwrite_row(dst, rec);
    }

    /// Copy full state from the ghost's origin, preserving the ghost's tag
    /// and origin index.  The boundary manager reapplies the shift.
    pub fn refresh_ghost(&mut self, ghost: usize) {
        let origin = self.iorig[ghost];
        let kind = self.kind[ghost];
        let rec = self.record(origin);
        self.overwrite_row(ghost, &rec);
        self.kind[ghost] = kind;
        self.iorig[ghost] = origin;
        self.active[ghost] = false;
    }

    /// Drop all ghosts, truncating the arrays back to the real particles.
    pub fn clear_ghosts(&mut self) {
        let n = self.n_real;
        for_each_array!(self, truncate, n);
        self.n_ghost = 0;
    }

    /// Remove the listed real particles, compacting the arrays in order.
    ///
    /// Ghosts must have been cleared first; indices into the kept particles
    /// remain ordered but shift downwards.
    pub fn delete_particles(&mut self, ids: &[usize]) {
        debug_assert_eq!(self.n_ghost, 0, "clear ghosts before deleting reals");
        if ids.is_empty() {
            return;
        }
        let mut keep = vec![true; self.n_real];
        for &i in ids {
            keep[i] = false;
        }
        self.compact(&keep);
        self.n_real = self.r.len();
        for i in 0..self.n_real {
            self.iorig[i] = i;
        }
    }

    fn compact(&mut self, keep: &[bool]) {
        fn compact_vec<T: Copy>(v: &mut Vec<T>, keep: &[bool]) {
            let mut w = 0;
            for i in 0..keep.len() {
                if keep[i] {
                    v[w] = v[i];
                    w += 1;
                }
            }
            v.truncate(w);
        }
        compact_vec(&mut self.r, keep);
        compact_vec(&mut self.v, keep);
        compact_vec(&mut self.a, keep);
        compact_vec(&mut self.a_grav, keep);
        compact_vec(&mut self.r0, keep);
        compact_vec(&mut self.v0, keep);
        compact_vec(&mut self.a0, keep);
        compact_vec(&mut self.m, keep);
        compact_vec(&mut self.h, keep);
        compact_vec(&mut self.rho, keep);
        compact_vec(&mut self.u, keep);
        compact_vec(&mut self.u0, keep);
        compact_vec(&mut self.dudt, keep);
        compact_vec(&mut self.dudt0, keep);
        compact_vec(&mut self.pfactor, keep);
        compact_vec(&mut self.inv_omega, keep);
        compact_vec(&mut self.zeta, keep);
        compact_vec(&mut self.chi, keep);
        compact_vec(&mut self.gpot, keep);
        compact_vec(&mut self.sound, keep);
        compact_vec(&mut self.div_v, keep);
        compact_vec(&mut self.alpha, keep);
        compact_vec(&mut self.kind, keep);
        compact_vec(&mut self.iorig, keep);
        compact_vec(&mut self.active, keep);
        compact_vec(&mut self.potmin, keep);
        compact_vec(&mut self.level, keep);
        compact_vec(&mut self.level_neib, keep);
        compact_vec(&mut self.nlast, keep);
        compact_vec(&mut self.nstep, keep);
        compact_vec(&mut self.sink_id, keep);
    }

    fn copy_row_appending(&mut self, src: usize) -> usize {
        let rec = self.record(src);
        let kind = self.kind[src];
        // push_record bumps the matching counter; undo it here, the caller
        // decides whether the copy counts as a real or a ghost.
        let idx = match self.push_record(&rec, kind) {
            Ok(idx) => idx,
            Err(_) => unreachable!("capacity checked by caller"),
        };
        match kind {
            GhostKind::Real => self.n_real -= 1,
            _ => self.n_ghost -= 1,
        }
        idx
    }

    fn overwrite_row(&mut self, dst: usize, rec: &ParticleRecord<D>) {
        self.r[dst] = rec.r;
        self.v[dst] = rec.v;
        self.a[dst] = rec.a;
        self.a_grav[dst] = rec.a_grav;
        self.r0[dst] = rec.r0;
        self.v0[dst] = rec.v0;
        self.a0[dst] = rec.a0;
        self.m[dst] = rec.m;
        self.h[dst] = rec.h;
        self.rho[dst] = rec.rho;
        self.u[dst] = rec.u;
        self.u0[dst] = rec.u0;
        self.dudt[dst] = rec.dudt;
        self.dudt0[dst] = rec.dudt0;
        self.pfactor[dst] = rec.pfactor;
        self.inv_omega[dst] = rec.inv_omega;
        self.zeta[dst] = rec.zeta;
        self.chi[dst] = rec.chi;
        self.gpot[dst] = rec.gpot;
        self.sound[dst] = rec.sound;
        self.div_v[dst] = rec.div_v;
        self.alpha[dst] = rec.alpha;
        self.level[dst] = rec.level;
        self.level_neib[dst] = rec.level_neib;
        self.nlast[dst] = rec.nlast;
        self.nstep[dst] = rec.nstep;
        self.sink_id[dst] = rec.sink_id;
    }
}

/// Star (and sink) particle storage.
///
/// Stars carry the same kinematic fields as fluid particles plus the
/// checkpoint state used by the block-step integrator and an optional
/// binary sub-system id.
#[derive(Debug, Clone, Default)]
pub struct StarArrays<const D: usize> {
    /// Positions.
    pub r: Vec<[f64; D]>,
    /// Velocities.
    pub v: Vec<[f64; D]>,
    /// Accelerations.
    pub a: Vec<[f64; D]>,
    /// Position checkpoints.
    pub r0: Vec<[f64; D]>,
    /// Velocity checkpoints.
    pub v0: Vec<[f64; D]>,
    /// Acceleration checkpoints.
    pub a0: Vec<[f64; D]>,
    /// Masses.
    pub m: Vec<f64>,
    /// Softening lengths.
    pub h: Vec<f64>,
    /// Gravitational potentials.
    pub gpot: Vec<f64>,
    /// Active flags.
    pub active: Vec<bool>,
    /// Integer time of last step start.
    pub nlast: Vec<u64>,
    /// Integer step sizes.
    pub nstep: Vec<u64>,
    /// Step levels.
    pub level: Vec<u32>,
    /// Internal timescale bound on the next step.
    pub dt_internal: Vec<f64>,
    /// Binary sub-system id (-1 if none).
    pub sub_system: Vec<i64>,
    /// Sink accretion radius (0 for plain stars).
    pub radius: Vec<f64>,
}

impl<const D: usize> StarArrays<D> {
    /// Create empty star storage.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stars.
    pub fn len(&self) -> usize {
        self.r.len()
    }

    /// True if there are no stars.
    pub fn is_empty(&self) -> bool {
        self.r.is_empty()
    }

    /// Append a star.  Returns its index.
    pub fn push_star(&mut self, r: [f64; D], v: [f64; D], m: f64, h: f64) -> usize {
        let i = self.len();
        self.r.push(r);
        self.v.push(v);
        self.a.push([0.0; D]);
        self.r0.push(r);
        self.v0.push(v);
        self.a0.push([0.0; D]);
        self.m.push(m);
        self.h.push(h);
        self.gpot.push(0.0);
        self.active.push(true);
        self.nlast.push(0);
        self.nstep.push(1);
        self.level.push(0);
        self.dt_internal.push(crate::BIG_NUMBER);
        self.sub_system.push(-1);
        self.radius.push(0.0);
        i
    }
}
