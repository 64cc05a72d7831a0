//! Scenario runner: drives a couple of representative validation runs
//! with logging enabled, for eyeballing behaviour outside the test
//! harness.

use kernel::particle::StarArrays;
use orchestrator::config::{BoundaryKind, SimulationConfig};
use orchestrator::{exit_code, ic, Simulation};
use reference_tests::analytical;

fn main() {
    tracing_subscriber::fmt().with_max_level(tracing::Level::INFO).init();

    if let Err(e) = run() {
        tracing::error!(error = %e, "reference run failed");
        std::process::exit(exit_code(&e));
    }
}

fn run() -> Result<(), kernel::SphError> {
    // Isothermal shock tube at modest resolution.
    let mut config = SimulationConfig::basic("sod-tube", 1, 2048);
    config.boundaries.lhs[0] = BoundaryKind::Periodic;
    config.boundaries.rhs[0] = BoundaryKind::Periodic;
    config.h_converge = 1.0e-4;

    let parts = ic::shock_tube_1d(400, 0.5, 0.5, 0.125, 0.0, 0.0, 1.5, 2048)?;
    let mut sim = Simulation::new(config, parts, StarArrays::new())?;
    sim.advance_to(0.2)?;

    let plateau: Vec<f64> = (0..sim.parts.n_real)
        .filter(|&i| (0.52..0.66).contains(&sim.parts.r[i][0]))
        .map(|i| sim.parts.rho[i])
        .collect();
    let mean = plateau.iter().sum::<f64>() / plateau.len().max(1) as f64;
    tracing::info!(
        measured = mean,
        analytical = analytical::isothermal_plateau_density(0.5, 0.125),
        "shock tube plateau density"
    );

    // Cold collapse energy budget.
    let mut config = SimulationConfig::basic("cold-collapse", 3, 2048);
    config.self_gravity = true;
    config.avisc = "none".into();
    config.temp0 = 1.0e-6;
    config.box_min = [-4.0; 3];
    config.box_max = [4.0; 3];
    let parts = ic::uniform_sphere(400, [0.0; 3], 1.0, 1.0, 1.5e-6, 77, 2048)?;
    let mut sim = Simulation::new(config, parts, StarArrays::new())?;
    sim.setup_initial_state()?;
    let d0 = sim.diagnostics();
    let rho_mean = 3.0 / (4.0 * std::f64::consts::PI);
    sim.advance_to(0.4 * analytical::free_fall_time(rho_mean))?;
    let d1 = sim.diagnostics();
    tracing::info!(
        e0 = d0.ketot + d0.gpetot,
        e1 = d1.ketot + d1.gpetot,
        ke = d1.ketot,
        "cold collapse energy budget"
    );

    Ok(())
}
