//! Simulation driver for the grad-h SPH + N-body engine.
//!
//! The `kernel` crate does the per-particle physics; this crate supplies
//! everything around it: configuration, the simulation box with periodic
//! and mirror ghosts, the binary-tree domain decomposition with worker
//! ghost exchange and load balancing, sink particles, the block-timestep
//! leapfrog integration, lifecycle running and initial conditions.
//!
//! # Modules
//! - [`config`] -- JSON configuration with validation.
//! - [`boundary`] -- Simulation box, wrapping, boundary ghosts.
//! - [`domain`] -- Binary partition tree and the load balancer.
//! - [`exchange`] -- Worker states, peer-ghost exchange, migration.
//! - [`integrate`] -- Fluid leapfrog DKD and the block-step hierarchy.
//! - [`nbody`] -- Star/sink leapfrog DKD.
//! - [`sinks`] -- Sink creation and accretion.
//! - [`simulation`] -- The per-step driver and diagnostics.
//! - [`runner`] -- Background-thread lifecycle management.
//! - [`ic`] -- Initial-condition generators.
//! - [`snapshot`] -- Snapshot interface with an in-memory backend.

#![warn(missing_docs)]

pub mod boundary;
pub mod config;
pub mod domain;
pub mod exchange;
pub mod ic;
pub mod integrate;
pub mod nbody;
pub mod runner;
pub mod simulation;
pub mod sinks;
pub mod snapshot;

pub use boundary::DomainBox;
pub use config::{BoundaryKind, SimulationConfig};
pub use domain::PartitionTree;
pub use exchange::{league_calendar, DomainController};
pub use integrate::{BlockTimesteps, SphLeapfrogDkd};
pub use nbody::NbodyLeapfrogDkd;
pub use runner::{RunnerState, SimulationRunner};
pub use simulation::{compute_diagnostics, Diagnostics, DistributedSimulation, Simulation};
pub use snapshot::{MemorySnapshots, SnapshotData, SnapshotIo};

use kernel::SphError;

/// Process exit code for a fatal error, per the documented contract:
/// 0 is success; initialisation, resource and divergence failures are
/// distinguished for scripting.
pub fn exit_code(err: &SphError) -> i32 {
    match err {
        SphError::Config(_) => 1,
        SphError::Resource(_) => 2,
        SphError::HIteration(_) => 3,
        SphError::Communication(_) => 4,
    }
}
