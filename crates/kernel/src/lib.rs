//! Grad-h SPH compute core.
//!
//! This crate is the compute-focused half of the engine: particle storage,
//! smoothing-kernel tables, equations of state, neighbour search, the
//! smoothing-length solver and the conservative pair-force loops.  The
//! orchestrator crate drives it (boundaries, domain decomposition, time
//! integration, sinks).
//!
//! # Modules
//! - [`particle`] -- Struct-of-arrays fluid and star particle storage.
//! - [`kernels`] -- M4 / quintic / Gaussian smoothing kernels and the
//!   tabulated kernel used by the inner loops.
//! - [`eos`] -- Isothermal, barotropic and adiabatic equations of state.
//! - [`neighbor`] -- Uniform-grid and brute-force neighbour gathering.
//! - [`smoothing`] -- The h-rho iteration and post-convergence quantities.
//! - [`forces`] -- Grad-h pressure, dissipation and softened-gravity pairs.
//! - [`timestep`] -- Per-particle timestep criteria.

#![warn(missing_docs)]

pub mod eos;
pub mod forces;
pub mod kernels;
pub mod neighbor;
pub mod particle;
pub mod smoothing;
pub mod timestep;

pub use eos::EquationOfState;
pub use kernels::{GaussianKernel, KernelKind, KernelShape, KernelTable, M4Kernel, QuinticKernel};
pub use neighbor::{BruteForceSearch, GatherList, UniformGrid};
pub use particle::{GhostKind, ParticleArrays, StarArrays};
pub use smoothing::{HSolveOutcome, HSolver};

/// Guard against division by zero in pair separations and rate denominators.
pub const SMALL_NUMBER: f64 = 1.0e-20;

/// Sentinel for unbounded box extents on open boundaries.
pub const BIG_NUMBER: f64 = 9.9e30;

/// Errors raised by the engine.
///
/// Everything here is fatal: callers propagate upwards with `?` to the single
/// process-wide handler, which either aborts (standalone) or hands the error
/// to the embedding host.  The one *transient* condition -- a neighbour list
/// too small for the converged smoothing length -- is deliberately not an
/// error; it is reported through [`smoothing::HSolveOutcome`] and retried at
/// the calling loop.
#[derive(Debug, Clone, PartialEq)]
pub enum SphError {
    /// Invalid or inconsistent configuration (unknown kernel/EOS tag,
    /// unpaired periodic boundaries, bad parameter value).
    Config(String),
    /// A fixed-capacity array (ghost buffer, migration buffer) overflowed.
    /// There is no automatic regrowth; the configured capacity must be raised.
    Resource(String),
    /// The h-rho iteration failed after both fixed-point and bisection
    /// phases were exhausted.  Carries a dump of the offending particle.
    HIteration(String),
    /// A worker collective saw mismatched counts or a dead peer.
    Communication(String),
}

impl std::fmt::Display for SphError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SphError::Config(msg) => write!(f, "configuration error: {msg}"),
            SphError::Resource(msg) => write!(f, "out of preallocated memory: {msg}"),
            SphError::HIteration(msg) => write!(f, "h-rho iteration did not converge: {msg}"),
            SphError::Communication(msg) => write!(f, "worker communication error: {msg}"),
        }
    }
}

impl std::error::Error for SphError {}

/// Dimension-generic vector helpers.
///
/// Positions and velocities are `[f64; D]` with `D` monomorphised at compile
/// time, so these all reduce to straight-line code in the inner loops.
pub mod vec {
    /// Dot product of two D-vectors.
    #[inline]
    pub fn dot<const D: usize>(a: &[f64; D], b: &[f64; D]) -> f64 {
        let mut s = 0.0;
        for k in 0..D {
            s += a[k] * b[k];
        }
        s
    }

    /// Component-wise difference `a - b`.
    #[inline]
    pub fn sub<const D: usize>(a: &[f64; D], b: &[f64; D]) -> [f64; D] {
        let mut out = [0.0; D];
        for k in 0..D {
            out[k] = a[k] - b[k];
        }
        out
    }

    /// Euclidean norm.
    #[inline]
    pub fn norm<const D: usize>(a: &[f64; D]) -> f64 {
        dot(a, a).sqrt()
    }
}
