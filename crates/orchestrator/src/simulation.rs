//! The simulation driver.
//!
//! One quantum of the block-step clock proceeds as: wrap positions into
//! the box, rebuild boundary ghosts, predict all particles forward,
//! solve smoothing lengths and densities for the active set, refresh
//! ghosts, evaluate forces, apply end-of-step corrections, handle sinks
//! and checkpoint finished particles.  A full block ends with a resync
//! that rebuilds the level assignment.
//!
//! [`DistributedSimulation`] runs the same physics per worker under the
//! domain controller, with peer-ghost exchange before each force
//! evaluation and a shared global step, mirroring the thread-per-domain
//! coordinator design.

use kernel::forces::{self, ForceParams, ViscosityKind};
use kernel::neighbor::GatherList;
use kernel::particle::{ParticleArrays, StarArrays};
use kernel::timestep::TimestepParams;
use kernel::{EquationOfState, HSolver, KernelTable, SphError, UniformGrid};

use crate::boundary::{self, DomainBox};
use crate::config::SimulationConfig;
use crate::exchange::DomainController;
use crate::integrate::{BlockTimesteps, SphLeapfrogDkd};
use crate::nbody::NbodyLeapfrogDkd;
use crate::sinks::{self, SinkParams};

/// Global conservation diagnostics, collated over fluid and stars.
#[derive(Debug, Clone, Copy)]
pub struct Diagnostics<const D: usize> {
    /// Fluid particle count.
    pub n_sph: usize,
    /// Star count.
    pub n_star: usize,
    /// Total mass.
    pub mtot: f64,
    /// Kinetic energy.
    pub ketot: f64,
    /// Internal energy.
    pub utot: f64,
    /// Gravitational potential energy (negative).
    pub gpetot: f64,
    /// Total energy.
    pub etot: f64,
    /// Linear momentum.
    pub mom: [f64; D],
    /// Centre of mass.
    pub rcom: [f64; D],
    /// Centre-of-mass velocity.
    pub vcom: [f64; D],
}

impl<const D: usize> Default for Diagnostics<D> {
    fn default() -> Self {
        Diagnostics {
            n_sph: 0,
            n_star: 0,
            mtot: 0.0,
            ketot: 0.0,
            utot: 0.0,
            gpetot: 0.0,
            etot: 0.0,
            mom: [0.0; D],
            rcom: [0.0; D],
            vcom: [0.0; D],
        }
    }
}

/// Compute diagnostics for a particle population.
pub fn compute_diagnostics<const D: usize>(
    parts: &ParticleArrays<D>,
    stars: &StarArrays<D>,
) -> Diagnostics<D> {
    let mut d = Diagnostics::<D>::default();
    d.n_sph = parts.n_real;
    d.n_star = stars.len();

    for i in 0..parts.n_real {
        let m = parts.m[i];
        d.mtot += m;
        d.ketot += 0.5 * m * kernel::vec::dot(&parts.v[i], &parts.v[i]);
        d.utot += m * parts.u[i];
        // Pair potentials are counted from both sides.
        d.gpetot -= 0.5 * m * parts.gpot[i];
        for k in 0..D {
            d.mom[k] += m * parts.v[i][k];
            d.rcom[k] += m * parts.r[i][k];
            d.vcom[k] += m * parts.v[i][k];
        }
    }
    for i in 0..stars.len() {
        let m = stars.m[i];
        d.mtot += m;
        d.ketot += 0.5 * m * kernel::vec::dot(&stars.v[i], &stars.v[i]);
        d.gpetot -= 0.5 * m * stars.gpot[i];
        for k in 0..D {
            d.mom[k] += m * stars.v[i][k];
            d.rcom[k] += m * stars.r[i][k];
            d.vcom[k] += m * stars.v[i][k];
        }
    }
    if d.mtot > 0.0 {
        for k in 0..D {
            d.rcom[k] /= d.mtot;
            d.vcom[k] /= d.mtot;
        }
    }
    d.etot = d.ketot + d.utot + d.gpetot;
    d
}

/// Single-worker simulation state.
pub struct Simulation<const D: usize> {
    /// Run configuration.
    pub config: SimulationConfig,
    /// Fluid particles.
    pub parts: ParticleArrays<D>,
    /// Stars and sinks.
    pub stars: StarArrays<D>,
    /// Simulation box.
    pub simbox: DomainBox<D>,
    /// Kernel tables.
    pub kern: KernelTable<D>,
    /// Equation of state.
    pub eos: EquationOfState,
    /// h-solver parameters.
    pub h_solver: HSolver,
    /// Force switches.
    pub force_params: ForceParams,
    /// Timestep multipliers.
    pub tp: TimestepParams,
    /// Block-step clock.
    pub bt: BlockTimesteps,
    sph_integ: SphLeapfrogDkd,
    nbody_integ: NbodyLeapfrogDkd,
    sink_params: SinkParams,
    initialised: bool,
}

impl<const D: usize> Simulation<D> {
    /// Build a simulation from a validated configuration and initial
    /// particle state.
    pub fn new(
        config: SimulationConfig,
        parts: ParticleArrays<D>,
        stars: StarArrays<D>,
    ) -> Result<Self, SphError> {
        config.validate()?;
        let simbox = DomainBox::from_config(&config)?;
        let kern = KernelTable::new(config.make_kernel_kind()?);
        let eos = config.make_eos()?;
        let h_solver = config.make_h_solver();
        let force_params = config.make_force_params()?;
        let tp = config.make_timestep_params();
        let bt = BlockTimesteps::new(config.level_max, config.level_diff_max);
        let sink_params = SinkParams {
            rho_sink: config.rho_sink,
            radius_hfac: config.sink_radius_hfac,
            smooth: config.smooth_accretion,
        };
        Ok(Self {
            config,
            parts,
            stars,
            simbox,
            kern,
            eos,
            h_solver,
            force_params,
            tp,
            bt,
            sph_integ: SphLeapfrogDkd,
            nbody_integ: NbodyLeapfrogDkd,
            sink_params,
            initialised: false,
        })
    }

    /// Current simulation time.
    pub fn t(&self) -> f64 {
        self.bt.t
    }

    fn energy_equation(&self) -> bool {
        self.eos.evolves_energy()
    }

    /// Bootstrap: solve h/rho and forces for everything, checkpoint, and
    /// build the first level assignment.
    pub fn setup_initial_state(&mut self) -> Result<(), SphError> {
        for i in 0..self.parts.n_real {
            self.parts.active[i] = true;
        }
        for i in 0..self.stars.len() {
            self.stars.active[i] = true;
        }

        boundary::check_boundaries(&self.simbox, &mut self.parts);
        self.rebuild_ghosts()?;
        self.solve_smoothing()?;
        boundary::copy_data_to_ghosts(&self.simbox, &mut self.parts);
        self.evaluate_all_forces();

        // Checkpoint the bootstrap accelerations.
        for i in 0..self.parts.n_real {
            self.parts.r0[i] = self.parts.r[i];
            self.parts.v0[i] = self.parts.v[i];
            for k in 0..D {
                self.parts.a0[i][k] = self.parts.a[i][k] + self.parts.a_grav[i][k];
            }
            self.parts.u0[i] = self.parts.u[i];
            self.parts.dudt0[i] = self.parts.dudt[i];
            self.parts.active[i] = false;
            self.parts.alpha[i] = self.config.alpha_visc;
        }
        for i in 0..self.stars.len() {
            self.stars.r0[i] = self.stars.r[i];
            self.stars.v0[i] = self.stars.v[i];
            self.stars.a0[i] = self.stars.a[i];
            self.stars.active[i] = false;
        }

        let energy_eq = self.energy_equation();
        self.bt.resync(&mut self.parts, &mut self.stars, &self.tp, energy_eq);
        self.initialised = true;
        tracing::info!(
            n_sph = self.parts.n_real,
            n_star = self.stars.len(),
            quantum = self.bt.quantum,
            "initial state ready"
        );
        Ok(())
    }

    /// Advance the simulation by one integer quantum.
    pub fn step(&mut self) -> Result<(), SphError> {
        if !self.initialised {
            self.setup_initial_state()?;
        }
        let energy_eq = self.energy_equation();

        self.bt.tick();
        let n = self.bt.n;
        self.sph_integ.advance(n, self.bt.quantum, &mut self.parts, energy_eq);
        self.nbody_integ.advance(n, self.bt.quantum, &mut self.stars);
        boundary::check_boundaries(&self.simbox, &mut self.parts);

        let any_active = (0..self.parts.n_real).any(|i| self.parts.active[i])
            || self.stars.active.iter().any(|&a| a);
        if any_active {
            self.rebuild_ghosts()?;
            self.solve_smoothing()?;
            boundary::copy_data_to_ghosts(&self.simbox, &mut self.parts);
            self.evaluate_all_forces();
        }

        self.sph_integ.correction_terms(n, self.bt.quantum, &mut self.parts, energy_eq);
        self.nbody_integ.correction_terms(n, self.bt.quantum, &mut self.stars);
        if self.force_params.avisc == ViscosityKind::Mon97Td {
            self.sph_integ.evolve_alpha(
                n,
                self.bt.quantum,
                &mut self.parts,
                self.config.alpha_visc_min,
                self.config.alpha_visc,
            );
        }

        // Sinks are handled on the finest step boundaries so a newly
        // created star's checkpoint stays aligned with the block clock.
        let finest = self.bt.nstep_of(self.bt.level_max);
        if self.config.create_sinks && n % finest == 0 {
            sinks::search_new_sinks(
                &mut self.parts,
                &mut self.stars,
                &self.sink_params,
                n,
                finest,
            );
            sinks::accrete_onto_sinks(
                &mut self.parts,
                &mut self.stars,
                &self.sink_params,
                self.bt.quantum * finest as f64,
            )?;
        }

        self.sph_integ.end_timestep(n, &mut self.parts);
        self.nbody_integ.end_timestep(n, &mut self.stars);
        self.bt.adjust_levels(n, &mut self.parts, &self.tp, energy_eq);

        if self.bt.block_complete() {
            self.bt.resync(&mut self.parts, &mut self.stars, &self.tp, energy_eq);
        }
        Ok(())
    }

    /// Advance until the simulation time passes `t_end`.
    pub fn advance_to(&mut self, t_end: f64) -> Result<(), SphError> {
        if !self.initialised {
            self.setup_initial_state()?;
        }
        while self.bt.t < t_end {
            self.step()?;
        }
        Ok(())
    }

    /// Global conservation diagnostics.
    pub fn diagnostics(&self) -> Diagnostics<D> {
        compute_diagnostics(&self.parts, &self.stars)
    }

    fn rebuild_ghosts(&mut self) -> Result<(), SphError> {
        // Ghosts are rebuilt at every force evaluation, so their lifetime
        // is one step of the most finely stepped particles.
        let t_ghost = self.bt.quantum * self.bt.nstep_of(self.bt.level_max) as f64;
        boundary::search_ghost_particles(
            t_ghost,
            &self.simbox,
            &mut self.parts,
            self.kern.kern_range,
            self.config.ghost_range,
        )
    }

    fn build_grid(&self) -> (UniformGrid<D>, f64) {
        build_grid_for(&self.parts, self.kern.kern_range)
    }

    fn solve_smoothing(&mut self) -> Result<(), SphError> {
        let (grid, h_max_seen) = self.build_grid();
        let snapshot_r = self.parts.r.clone();
        let kern_range = self.kern.kern_range;
        let gather = move |i: usize, radius: f64| -> GatherList {
            let mut neighbors = Vec::new();
            grid.for_each_neighbor(&snapshot_r[i], radius, Some(i), &snapshot_r, |j| {
                neighbors.push(j)
            });
            GatherList { neighbors, h_max: radius / kern_range }
        };
        let h_cap = if self.config.h_max < kernel::BIG_NUMBER {
            self.config.h_max
        } else {
            // Without an explicit cap, allow generous growth past the
            // largest current smoothing length.
            16.0 * h_max_seen
        };
        self.h_solver.update_all(
            &mut self.parts,
            &self.stars,
            &self.kern,
            &self.eos,
            &gather,
            h_cap,
        )
    }

    fn evaluate_all_forces(&mut self) {
        evaluate_forces_on(
            &mut self.parts,
            &mut self.stars,
            &self.kern,
            &self.eos,
            &self.force_params,
        );
    }
}

/// Build a uniform grid over the current particle positions (reals and
/// ghosts), with cells sized to the largest kernel support present.
fn build_grid_for<const D: usize>(
    parts: &ParticleArrays<D>,
    kern_range: f64,
) -> (UniformGrid<D>, f64) {
    let mut lo = [f64::INFINITY; D];
    let mut hi = [f64::NEG_INFINITY; D];
    let mut h_max: f64 = 0.0;
    for i in 0..parts.total() {
        h_max = h_max.max(parts.h[i]);
        for k in 0..D {
            lo[k] = lo[k].min(parts.r[i][k]);
            hi[k] = hi[k].max(parts.r[i][k]);
        }
    }
    if parts.total() == 0 {
        lo = [0.0; D];
        hi = [1.0; D];
        h_max = 1.0;
    }
    for k in 0..D {
        // Avoid degenerate grids for planar configurations.
        if hi[k] - lo[k] < 1.0e-12 {
            hi[k] = lo[k] + 1.0;
        }
    }
    let cell = (kern_range * h_max).max(1.0e-12);
    let mut grid = UniformGrid::new(cell, lo, hi);
    grid.update(&parts.r);
    (grid, h_max)
}

/// Force evaluation shared by the single-worker and distributed paths.
fn evaluate_forces_on<const D: usize>(
    parts: &mut ParticleArrays<D>,
    stars: &mut StarArrays<D>,
    kern: &KernelTable<D>,
    eos: &EquationOfState,
    force_params: &ForceParams,
) {
    if force_params.self_gravity {
        // The softened pair formula is Newtonian outside the kernel, so
        // gravity sums run over every particle.
        let total = parts.total();
        let partners = move |i: usize| (0..total).filter(|&j| j != i).collect::<Vec<_>>();
        forces::evaluate_forces(parts, stars, kern, eos, force_params, &partners);
    } else {
        let (grid, h_max) = build_grid_for(parts, kern.kern_range);
        let radius = kern.kern_range * h_max;
        let snapshot_r = parts.r.clone();
        let partners = move |i: usize| {
            let mut out = Vec::new();
            grid.for_each_neighbor(&snapshot_r[i], radius, Some(i), &snapshot_r, |j| out.push(j));
            out
        };
        forces::evaluate_forces(parts, stars, kern, eos, force_params, &partners);
    }
    forces::post_hydro_quantities(parts, eos);

    if !stars.is_empty() {
        forces::star_star_forces(stars);
        forces::star_gas_forces(stars, parts, kern);
    }
}

// ---------------------------------------------------------------------------
// Distributed execution
// ---------------------------------------------------------------------------

/// Multi-worker simulation: the same pipeline per worker under the domain
/// controller, with a shared global step.
///
/// Each step exchanges peer ghosts, runs every worker's half/full DKD
/// cycle in its own thread, and periodically load-balances.  Stars are not
/// decomposed (each worker sees none); sink handling stays with the
/// single-worker path.
pub struct DistributedSimulation<const D: usize> {
    /// Worker coordinator (tree, worker states, tournament calendar).
    pub controller: DomainController<D>,
    /// Simulation box.
    pub simbox: DomainBox<D>,
    kern: KernelTable<D>,
    eos: EquationOfState,
    h_solver: HSolver,
    force_params: ForceParams,
    tp: TimestepParams,
    ghost_range: f64,
    h_max: f64,
    balance_interval: u64,
    steps_taken: u64,
    /// Accumulated simulation time.
    pub t: f64,
    initialised: bool,
}

impl<const D: usize> DistributedSimulation<D> {
    /// Decompose the initial particle state over the configured workers.
    pub fn new(config: &SimulationConfig, parts: ParticleArrays<D>) -> Result<Self, SphError> {
        config.validate()?;
        let simbox = DomainBox::from_config(config)?;
        let kern = KernelTable::new(config.make_kernel_kind()?);

        // Open axes use infinite sentinels for the partition root box.
        let mut root_min = [-kernel::BIG_NUMBER; D];
        let mut root_max = [kernel::BIG_NUMBER; D];
        for k in 0..D {
            if simbox.lhs[k] != crate::config::BoundaryKind::Open {
                root_min[k] = simbox.min[k];
            }
            if simbox.rhs[k] != crate::config::BoundaryKind::Open {
                root_max[k] = simbox.max[k];
            }
        }
        let controller = DomainController::decompose(
            config.n_workers,
            root_min,
            root_max,
            &parts,
            kern.kern_range,
        )?;

        Ok(Self {
            controller,
            simbox,
            kern,
            eos: config.make_eos()?,
            h_solver: config.make_h_solver(),
            force_params: config.make_force_params()?,
            tp: config.make_timestep_params(),
            ghost_range: config.ghost_range,
            h_max: config.h_max,
            balance_interval: config.balance_interval,
            steps_taken: 0,
            t: 0.0,
            initialised: false,
        })
    }

    fn bootstrap(&mut self) -> Result<(), SphError> {
        self.prepare_actives(true);
        self.exchange_and_solve()?;
        for w in self.controller.workers.iter_mut() {
            let parts = &mut w.parts;
            for i in 0..parts.n_real {
                parts.r0[i] = parts.r[i];
                parts.v0[i] = parts.v[i];
                for k in 0..D {
                    parts.a0[i][k] = parts.a[i][k] + parts.a_grav[i][k];
                }
                parts.u0[i] = parts.u[i];
                parts.dudt0[i] = parts.dudt[i];
                parts.active[i] = false;
                parts.nlast[i] = 0;
                parts.nstep[i] = 2;
            }
        }
        self.initialised = true;
        Ok(())
    }

    fn prepare_actives(&mut self, active: bool) {
        for w in self.controller.workers.iter_mut() {
            for i in 0..w.parts.n_real {
                w.parts.active[i] = active;
            }
        }
    }

    /// Peer-ghost exchange followed by the per-worker property and force
    /// passes, each worker in its own thread.
    fn exchange_and_solve(&mut self) -> Result<(), SphError> {
        self.controller.clear_ghosts();
        // Boundary images first: peers across a periodic wrap see each
        // other only through them.
        for w in self.controller.workers.iter_mut() {
            boundary::search_ghost_particles(
                0.0,
                &self.simbox,
                &mut w.parts,
                self.kern.kern_range,
                self.ghost_range,
            )?;
        }
        self.controller.update_all_bounding_boxes();
        self.controller.send_receive_ghosts()?;

        let kern = &self.kern;
        let eos = &self.eos;
        let h_solver = &self.h_solver;
        let force_params = &self.force_params;
        let h_cap = self.h_max;

        let results: Vec<Result<(), SphError>> = std::thread::scope(|scope| {
            let handles: Vec<_> = self
                .controller
                .workers
                .iter_mut()
                .map(|w| {
                    scope.spawn(move || -> Result<(), SphError> {
                        let parts = &mut w.parts;
                        let mut stars = StarArrays::<D>::new();
                        let (grid, h_seen) = build_grid_for(parts, kern.kern_range);
                        let snapshot_r = parts.r.clone();
                        let kern_range = kern.kern_range;
                        let gather = move |i: usize, radius: f64| -> GatherList {
                            let mut neighbors = Vec::new();
                            grid.for_each_neighbor(
                                &snapshot_r[i],
                                radius,
                                Some(i),
                                &snapshot_r,
                                |j| neighbors.push(j),
                            );
                            GatherList { neighbors, h_max: radius / kern_range }
                        };
                        let cap = if h_cap < kernel::BIG_NUMBER { h_cap } else { 16.0 * h_seen };
                        h_solver.update_all(parts, &stars, kern, eos, &gather, cap)?;
                        evaluate_forces_on(parts, &mut stars, kern, eos, force_params);
                        Ok(())
                    })
                })
                .collect();
            handles.into_iter().map(|h| h.join().expect("worker thread panicked")).collect()
        });
        for r in results {
            r?;
        }
        Ok(())
    }

    /// Smallest stable timestep across all workers (timestep collective).
    /// Bootstraps the first force evaluation if necessary, so the sound
    /// speeds and accelerations it reads are real.
    pub fn global_timestep(&mut self) -> f64 {
        if !self.initialised {
            if let Err(e) = self.bootstrap() {
                tracing::error!(error = %e, "bootstrap failed during timestep query");
                return 1.0e-6;
            }
        }
        let mut dt = f64::INFINITY;
        for w in &self.controller.workers {
            for i in 0..w.parts.n_real {
                dt = dt.min(kernel::timestep::sph_timestep(
                    i,
                    &w.parts,
                    &self.tp,
                    self.eos.evolves_energy(),
                ));
            }
        }
        if dt.is_finite() {
            dt
        } else {
            1.0
        }
    }

    /// One shared DKD step of duration `dt` across all workers, followed
    /// by wrap, migration bookkeeping and (periodically) a load balance.
    pub fn step(&mut self, dt: f64) -> Result<(), SphError> {
        if !self.initialised {
            self.bootstrap()?;
        }
        let integ = SphLeapfrogDkd;
        let quantum = 0.5 * dt;
        let energy_eq = self.eos.evolves_energy();

        // Half step: predict to the midpoint and refresh forces there.
        for w in self.controller.workers.iter_mut() {
            integ.advance(1, quantum, &mut w.parts, energy_eq);
            for i in 0..w.parts.n_real {
                w.parts.nlast[i] = 0;
                w.parts.nstep[i] = 2;
            }
            boundary::check_boundaries(&self.simbox, &mut w.parts);
        }
        self.exchange_and_solve()?;

        // Full step, corrections, checkpoint.
        for w in self.controller.workers.iter_mut() {
            integ.advance(2, quantum, &mut w.parts, energy_eq);
            integ.correction_terms(2, quantum, &mut w.parts, energy_eq);
            integ.end_timestep(2, &mut w.parts);
            for i in 0..w.parts.n_real {
                w.parts.nlast[i] = 0;
            }
            boundary::check_boundaries(&self.simbox, &mut w.parts);
        }

        self.steps_taken += 1;
        self.t += dt;
        if self.steps_taken % self.balance_interval == 0 {
            self.controller.load_balance()?;
        }
        Ok(())
    }

    /// Gather every worker's reals into one array (diagnostics, output).
    pub fn collect(&self) -> ParticleArrays<D> {
        let mut out = ParticleArrays::with_capacity(
            self.controller.workers.iter().map(|w| w.parts.n_max).sum(),
        );
        for w in &self.controller.workers {
            for i in 0..w.parts.n_real {
                out.push_record(&w.parts.record(i), kernel::GhostKind::Real)
                    .expect("collect capacity");
            }
        }
        out
    }
}
