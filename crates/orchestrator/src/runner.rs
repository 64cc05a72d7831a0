//! Simulation runner with lifecycle management.
//!
//! Owns a simulation on a background thread and exposes start, pause,
//! resume and status queries.  A fatal engine error parks the runner in
//! the error state with the message preserved; the process-level exit
//! code comes from [`crate::exit_code`].

use std::sync::{Arc, Mutex};
use std::thread;

use kernel::SphError;

use crate::simulation::Simulation;

/// Runner lifecycle states.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunnerState {
    /// Created but not yet started.
    Created,
    /// Actively stepping.
    Running,
    /// Paused between steps.
    Paused,
    /// Reached a stopping condition.
    Finished,
    /// A fatal error occurred.
    Error,
}

struct SharedState {
    state: RunnerState,
    sim_time: f64,
    step_count: u64,
    error: Option<SphError>,
}

/// Handle for controlling and querying a running simulation.
pub struct SimulationRunner {
    shared: Arc<Mutex<SharedState>>,
    thread_handle: Option<thread::JoinHandle<()>>,
}

impl SimulationRunner {
    /// Spawn the background thread for a simulation, stopping after
    /// `max_time` simulated time and/or `max_steps` quanta.
    pub fn new<const D: usize>(
        mut sim: Simulation<D>,
        max_time: Option<f64>,
        max_steps: Option<u64>,
    ) -> Self {
        let shared = Arc::new(Mutex::new(SharedState {
            state: RunnerState::Created,
            sim_time: 0.0,
            step_count: 0,
            error: None,
        }));
        let shared_clone = Arc::clone(&shared);

        let thread_handle = thread::spawn(move || {
            run_loop(&mut sim, shared_clone, max_time, max_steps);
        });

        Self { shared, thread_handle: Some(thread_handle) }
    }

    /// Current lifecycle state.
    pub fn state(&self) -> RunnerState {
        self.shared.lock().unwrap().state.clone()
    }

    /// Current simulation time.
    pub fn sim_time(&self) -> f64 {
        self.shared.lock().unwrap().sim_time
    }

    /// Quanta stepped so far.
    pub fn step_count(&self) -> u64 {
        self.shared.lock().unwrap().step_count
    }

    /// The fatal error, if the runner died.
    pub fn error(&self) -> Option<SphError> {
        self.shared.lock().unwrap().error.clone()
    }

    /// Begin stepping.
    pub fn start(&self) {
        let mut s = self.shared.lock().unwrap();
        if s.state == RunnerState::Created {
            s.state = RunnerState::Running;
        }
    }

    /// Pause after the current step.
    pub fn pause(&self) {
        let mut s = self.shared.lock().unwrap();
        if s.state == RunnerState::Running {
            s.state = RunnerState::Paused;
        }
    }

    /// Resume a paused run.
    pub fn resume(&self) {
        let mut s = self.shared.lock().unwrap();
        if s.state == RunnerState::Paused {
            s.state = RunnerState::Running;
        }
    }

    /// Wait for the background thread to finish.
    pub fn join(mut self) -> Result<(), SphError> {
        if let Some(handle) = self.thread_handle.take() {
            handle
                .join()
                .map_err(|_| SphError::Communication("runner thread panicked".into()))?;
        }
        let s = self.shared.lock().unwrap();
        match &s.error {
            Some(e) => Err(e.clone()),
            None => Ok(()),
        }
    }
}

impl Drop for SimulationRunner {
    fn drop(&mut self) {
        if let Ok(mut s) = self.shared.lock() {
            if s.state == RunnerState::Running || s.state == RunnerState::Paused {
                s.state = RunnerState::Finished;
            }
        }
    }
}

fn run_loop<const D: usize>(
    sim: &mut Simulation<D>,
    shared: Arc<Mutex<SharedState>>,
    max_time: Option<f64>,
    max_steps: Option<u64>,
) {
    // Wait for the start signal.
    loop {
        let state = shared.lock().unwrap().state.clone();
        match state {
            RunnerState::Created => thread::sleep(std::time::Duration::from_millis(5)),
            RunnerState::Running => break,
            _ => return,
        }
    }

    let mut step_count = 0u64;
    loop {
        let state = shared.lock().unwrap().state.clone();
        match state {
            RunnerState::Running => {
                if let Err(e) = sim.step() {
                    tracing::error!(error = %e, "simulation step failed");
                    let mut s = shared.lock().unwrap();
                    s.error = Some(e);
                    s.state = RunnerState::Error;
                    break;
                }
                step_count += 1;
                {
                    let mut s = shared.lock().unwrap();
                    s.sim_time = sim.t();
                    s.step_count = step_count;
                }

                let time_done = max_time.is_some_and(|t| sim.t() >= t);
                let steps_done = max_steps.is_some_and(|n| step_count >= n);
                if time_done || steps_done {
                    tracing::info!(
                        steps = step_count,
                        t = sim.t(),
                        "simulation finished"
                    );
                    shared.lock().unwrap().state = RunnerState::Finished;
                    break;
                }
            }
            RunnerState::Paused => {
                thread::sleep(std::time::Duration::from_millis(20));
            }
            _ => break,
        }
    }
}
