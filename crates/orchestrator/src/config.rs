//! Configuration parsing and validation.
//!
//! A single JSON document configures a run.  Every field that has a sane
//! default carries one, so minimal configs stay minimal; `validate` rejects
//! inconsistent combinations (unknown tags, unpaired periodic faces, bad
//! ranges) before any memory is allocated.

use serde::{Deserialize, Serialize};
use std::fs;

use kernel::forces::{ConductivityKind, ForceParams, ViscosityKind};
use kernel::timestep::TimestepParams;
use kernel::{EquationOfState, HSolver, KernelKind, SphError};

/// Per-face boundary kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BoundaryKind {
    /// Nothing beyond the face; particles may leave.
    Open,
    /// The face wraps onto the opposite face.
    Periodic,
    /// The face reflects.
    Mirror,
}

/// Boundary tags for all faces, lower/upper per axis.  Only the first
/// `ndim` axes are consulted.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct BoundaryTags {
    /// Lower faces per axis.
    pub lhs: [BoundaryKind; 3],
    /// Upper faces per axis.
    pub rhs: [BoundaryKind; 3],
}

impl Default for BoundaryTags {
    fn default() -> Self {
        Self { lhs: [BoundaryKind::Open; 3], rhs: [BoundaryKind::Open; 3] }
    }
}

/// Simulation configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimulationConfig {
    /// Human-readable run name.
    pub name: String,
    /// Spatial dimension (1, 2 or 3).
    pub ndim: usize,
    /// Particle capacity (reals plus ghosts); overflow is fatal.
    pub n_max: usize,

    /// Kernel tag: "m4", "quintic" or "gaussian".
    #[serde(default = "default_kernel")]
    pub kernel: String,
    /// EOS tag: "isothermal", "barotropic" or "adiabatic".
    #[serde(default = "default_eos")]
    pub eos: String,
    /// Integrator tag; only "lfdkd" (leapfrog drift-kick-drift) is known.
    #[serde(default = "default_integrator")]
    pub integrator: String,

    /// EOS temperature parameter.
    #[serde(default = "one")]
    pub temp0: f64,
    /// Mean molecular weight.
    #[serde(default = "one")]
    pub mu_bar: f64,
    /// Ratio of specific heats.
    #[serde(default = "default_gamma")]
    pub gamma: f64,
    /// Barotropic transition density.
    #[serde(default = "default_rho_bary")]
    pub rho_bary: f64,

    /// Smoothing-length ratio h_fac.
    #[serde(default = "default_h_fac")]
    pub h_fac: f64,
    /// h-iteration relative tolerance.
    #[serde(default = "default_h_converge")]
    pub h_converge: f64,
    /// Global ceiling on smoothing lengths.
    #[serde(default = "big")]
    pub h_max: f64,

    /// Enable pressure/dissipation forces.
    #[serde(default = "yes")]
    pub hydro_forces: bool,
    /// Enable fluid self-gravity.
    #[serde(default)]
    pub self_gravity: bool,
    /// Artificial viscosity tag: "none", "mon97" or "mon97td".
    #[serde(default = "default_avisc")]
    pub avisc: String,
    /// Artificial conductivity tag: "none", "wadsley2008" or "price2008".
    #[serde(default = "default_acond")]
    pub acond: String,
    /// Viscosity alpha.
    #[serde(default = "one")]
    pub alpha_visc: f64,
    /// Viscosity beta.
    #[serde(default = "two")]
    pub beta_visc: f64,
    /// Floor for the time-dependent alpha.
    #[serde(default = "default_alpha_min")]
    pub alpha_visc_min: f64,

    /// Boundary tags.
    #[serde(default)]
    pub boundaries: BoundaryTags,
    /// Box minimum corner (first ndim entries used).
    #[serde(default = "default_box_min")]
    pub box_min: [f64; 3],
    /// Box maximum corner.
    #[serde(default = "default_box_max")]
    pub box_max: [f64; 3],
    /// Ghost trigger range in units of the kernel reach.
    #[serde(default = "default_ghost_range")]
    pub ghost_range: f64,

    /// Courant multiplier.
    #[serde(default = "default_courant")]
    pub courant_mult: f64,
    /// Acceleration multiplier.
    #[serde(default = "default_accel")]
    pub accel_mult: f64,
    /// Energy-rate multiplier.
    #[serde(default = "default_energy")]
    pub energy_mult: f64,
    /// N-body multiplier.
    #[serde(default = "default_nbody")]
    pub nbody_mult: f64,
    /// Number of block-step levels below the global step.
    #[serde(default = "default_level_max")]
    pub level_max: u32,
    /// Maximum level difference between interacting particles.
    #[serde(default = "default_level_diff_max")]
    pub level_diff_max: u32,

    /// Enable sink creation.
    #[serde(default)]
    pub create_sinks: bool,
    /// Sink creation density threshold.
    #[serde(default = "big")]
    pub rho_sink: f64,
    /// Sink accretion radius in units of h at creation.
    #[serde(default = "two")]
    pub sink_radius_hfac: f64,
    /// Smooth (true) or sudden (false) accretion.
    #[serde(default = "yes")]
    pub smooth_accretion: bool,
    /// Smoothing-length floor inside sinks.
    #[serde(default)]
    pub h_min_sink: f64,

    /// Worker count for domain decomposition (1 disables it).
    #[serde(default = "one_usize")]
    pub n_workers: usize,
    /// Steps between load-balance passes.
    #[serde(default = "default_balance_interval")]
    pub balance_interval: u64,
}

fn default_kernel() -> String {
    "m4".to_string()
}
fn default_eos() -> String {
    "isothermal".to_string()
}
fn default_integrator() -> String {
    "lfdkd".to_string()
}
fn one() -> f64 {
    1.0
}
fn two() -> f64 {
    2.0
}
fn yes() -> bool {
    true
}
fn big() -> f64 {
    kernel::BIG_NUMBER
}
fn one_usize() -> usize {
    1
}
fn default_gamma() -> f64 {
    5.0 / 3.0
}
fn default_rho_bary() -> f64 {
    1.0e-14
}
fn default_h_fac() -> f64 {
    1.2
}
fn default_h_converge() -> f64 {
    0.01
}
fn default_avisc() -> String {
    "mon97".to_string()
}
fn default_acond() -> String {
    "none".to_string()
}
fn default_alpha_min() -> f64 {
    0.1
}
fn default_box_min() -> [f64; 3] {
    [0.0; 3]
}
fn default_box_max() -> [f64; 3] {
    [1.0; 3]
}
fn default_ghost_range() -> f64 {
    1.1
}
fn default_courant() -> f64 {
    0.15
}
fn default_accel() -> f64 {
    0.3
}
fn default_energy() -> f64 {
    0.3
}
fn default_nbody() -> f64 {
    0.1
}
fn default_level_max() -> u32 {
    9
}
fn default_level_diff_max() -> u32 {
    1
}
fn default_balance_interval() -> u64 {
    8
}

impl SimulationConfig {
    /// A minimal valid configuration, handy for tests and as a template.
    pub fn basic(name: &str, ndim: usize, n_max: usize) -> Self {
        serde_json::from_value(serde_json::json!({
            "name": name,
            "ndim": ndim,
            "n_max": n_max,
        }))
        .expect("basic config must deserialise")
    }

    /// Load a configuration from a JSON file and validate it.
    pub fn load(path: &str) -> Result<Self, SphError> {
        let contents = fs::read_to_string(path)
            .map_err(|e| SphError::Config(format!("failed to read {path}: {e}")))?;
        let config: SimulationConfig = serde_json::from_str(&contents)
            .map_err(|e| SphError::Config(format!("failed to parse {path}: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    /// Check the configuration for inconsistencies.
    pub fn validate(&self) -> Result<(), SphError> {
        if !(1..=3).contains(&self.ndim) {
            return Err(SphError::Config(format!("ndim must be 1, 2 or 3, got {}", self.ndim)));
        }
        if self.n_max == 0 {
            return Err(SphError::Config("n_max must be positive".into()));
        }
        // Tag parsing doubles as validation.
        KernelKind::from_name(&self.kernel)?;
        EquationOfState::from_name(&self.eos, self.temp0, self.mu_bar, self.gamma, self.rho_bary)?;
        ViscosityKind::from_name(&self.avisc)?;
        ConductivityKind::from_name(&self.acond)?;
        if self.integrator != "lfdkd" {
            return Err(SphError::Config(format!(
                "unrecognised integrator '{}'",
                self.integrator
            )));
        }

        for k in 0..self.ndim {
            if self.box_min[k] >= self.box_max[k] {
                return Err(SphError::Config(format!(
                    "box_min[{k}] must be below box_max[{k}]"
                )));
            }
            // Periodic faces only make sense in pairs.
            let lhs = self.boundaries.lhs[k] == BoundaryKind::Periodic;
            let rhs = self.boundaries.rhs[k] == BoundaryKind::Periodic;
            if lhs != rhs {
                return Err(SphError::Config(format!(
                    "periodic boundaries must be paired on axis {k}"
                )));
            }
        }

        if self.h_fac <= 0.0 || self.h_converge <= 0.0 {
            return Err(SphError::Config("h_fac and h_converge must be positive".into()));
        }
        if self.gamma <= 1.0 {
            return Err(SphError::Config("gamma must exceed 1".into()));
        }
        if self.courant_mult <= 0.0 || self.accel_mult <= 0.0 {
            return Err(SphError::Config("timestep multipliers must be positive".into()));
        }
        if self.n_workers == 0 {
            return Err(SphError::Config("n_workers must be at least 1".into()));
        }
        if self.n_workers > 1 {
            if !self.n_workers.is_power_of_two() {
                return Err(SphError::Config(format!(
                    "n_workers must be a power of two, got {}",
                    self.n_workers
                )));
            }
            if self.n_workers % 2 != 0 {
                return Err(SphError::Config("n_workers must be even".into()));
            }
        }
        if self.create_sinks && self.rho_sink <= 0.0 {
            return Err(SphError::Config("rho_sink must be positive".into()));
        }
        Ok(())
    }

    /// Equation of state described by this configuration.
    pub fn make_eos(&self) -> Result<EquationOfState, SphError> {
        EquationOfState::from_name(&self.eos, self.temp0, self.mu_bar, self.gamma, self.rho_bary)
    }

    /// Kernel selector described by this configuration.
    pub fn make_kernel_kind(&self) -> Result<KernelKind, SphError> {
        KernelKind::from_name(&self.kernel)
    }

    /// Force-evaluation switches described by this configuration.
    pub fn make_force_params(&self) -> Result<ForceParams, SphError> {
        Ok(ForceParams {
            hydro_forces: self.hydro_forces,
            self_gravity: self.self_gravity,
            avisc: ViscosityKind::from_name(&self.avisc)?,
            acond: ConductivityKind::from_name(&self.acond)?,
            alpha_visc: self.alpha_visc,
            beta_visc: self.beta_visc,
        })
    }

    /// h-solver parameters described by this configuration.
    pub fn make_h_solver(&self) -> HSolver {
        HSolver {
            h_fac: self.h_fac,
            h_converge: self.h_converge,
            h_min_sink: self.h_min_sink,
            create_sinks: self.create_sinks,
            star_softening: true,
        }
    }

    /// Timestep multipliers described by this configuration.
    pub fn make_timestep_params(&self) -> TimestepParams {
        TimestepParams {
            courant_mult: self.courant_mult,
            accel_mult: self.accel_mult,
            energy_mult: self.energy_mult,
            nbody_mult: self.nbody_mult,
        }
    }
}
