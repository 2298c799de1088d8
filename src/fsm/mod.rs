//! Process sequencer.
//!
//! Drives the shared process state through one experiment while the flow
//! control loop runs on its own thread:
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────┐
//! │ NotStarted ─▶ Flush ─▶ Homogenize ─▶ Sample ─▶ FinalFlush ─▶ Idle │
//! │                dwell     dwell        sweep      dwell             │
//! └──────────────────────────────────────────────────────────────────┘
//!        │                                  │
//!        │ spawn                            │ scoped sibling thread
//!        ▼                                  ▼
//!  FlowControlLoop (owns hardware)     SweepRunner::run_sweep
//! ```
//!
//! Entering a phase writes target flow and valve mode in one lock
//! acquisition.  A sweep failure skips the remaining phases; shutdown runs
//! on every path: set `terminate`, wait (bounded) for the loop to exit and
//! zero the pump, reset the shared state.

pub mod context;
pub mod phases;

use std::sync::Arc;
use std::sync::mpsc::{self, Receiver, RecvTimeoutError};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use log::{error, info, warn};

use crate::app::events::{ExperimentLabel, ProcessEvent};
use crate::app::ports::{EventSink, ProcessHardware, ResultSink, SweepRunner};
use crate::config::{ControlParameters, ProcessConfig, StabilityGate, SystemConfig};
use crate::control::flow_loop::FlowControlLoop;
use crate::error::{Error, Result};
use crate::vna::{SweepRequest, SweepResult};

use context::{Setpoint, SharedProcessState};
use phases::{GateStatus, ProcessPhase, StabilityTracker, build_phase_sequence};

// ---------------------------------------------------------------------------
// State identity
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SequencerState {
    NotStarted,
    Flush,
    Homogenize,
    Sample,
    FinalFlush,
    Idle,
}

impl SequencerState {
    pub fn name(self) -> &'static str {
        match self {
            Self::NotStarted => "not_started",
            Self::Flush => "flush",
            Self::Homogenize => "homogenize",
            Self::Sample => "sample",
            Self::FinalFlush => "final_flush",
            Self::Idle => "idle",
        }
    }
}

// ---------------------------------------------------------------------------
// Outcome types
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
pub struct RunSummary {
    pub label: ExperimentLabel,
    pub elapsed: Duration,
    /// Frequency points in the sweep.
    pub points: usize,
    /// Traces handed to the result sink.
    pub parameters: usize,
}

/// Result of one run plus the hardware, if the loop thread returned it.
///
/// `hardware` is `None` only when the control loop failed to stop or
/// panicked; in that case the pump could not be zeroed by the sequencer.
pub struct RunOutcome<H> {
    pub hardware: Option<H>,
    pub result: Result<RunSummary>,
}

// ---------------------------------------------------------------------------
// ProcessSequencer
// ---------------------------------------------------------------------------

pub struct ProcessSequencer<R> {
    control: ControlParameters,
    process: ProcessConfig,
    phases: Vec<ProcessPhase>,
    state: Arc<SharedProcessState>,
    sink: Arc<dyn EventSink>,
    runner: R,
    current: SequencerState,
}

impl<R: SweepRunner> ProcessSequencer<R> {
    pub fn new(config: &SystemConfig, state: Arc<SharedProcessState>, sink: Arc<dyn EventSink>, runner: R) -> Self {
        Self {
            control: config.control,
            process: config.process,
            phases: build_phase_sequence(&config.process, config.instrument.sweep_request()),
            state,
            sink,
            runner,
            current: SequencerState::NotStarted,
        }
    }

    pub fn current_state(&self) -> SequencerState {
        self.current
    }

    pub fn phases(&self) -> &[ProcessPhase] {
        &self.phases
    }

    pub fn shared_state(&self) -> &Arc<SharedProcessState> {
        &self.state
    }

    pub fn runner(&self) -> &R {
        &self.runner
    }

    /// Run one experiment.  The control loop takes ownership of `hw` for the
    /// duration of the run and hands it back on a clean shutdown.
    pub fn run<H>(&mut self, hw: H, label: &ExperimentLabel, results: &mut dyn ResultSink) -> RunOutcome<H>
    where
        H: ProcessHardware + Send + 'static,
    {
        let shared = Arc::clone(&self.state);
        let _session = match shared.claim_session() {
            Ok(guard) => guard,
            Err(e) => {
                warn!("Experiment {} rejected: {}", label, e);
                return RunOutcome {
                    hardware: Some(hw),
                    result: Err(e),
                };
            }
        };
        shared.reset();

        let started = Instant::now();
        info!("Starting experiment {}", label);
        self.sink.emit(&ProcessEvent::RunStarted(label.clone()));

        let (done_tx, done_rx) = mpsc::channel();
        let control = FlowControlLoop::new(self.control, Arc::clone(&shared), Arc::clone(&self.sink));
        let spawned = thread::Builder::new()
            .name("flow-control".into())
            .spawn(move || {
                let mut hw = control.run(hw);
                // Zeroed here so a loop that outlives the shutdown wait
                // still leaves the pump off.
                match hw.stop() {
                    Ok(()) => info!("Pump stopped"),
                    Err(e) => error!("Failed to zero pump output: {}", e),
                }
                let _ = done_tx.send(());
                hw
            });
        let handle = match spawned {
            Ok(handle) => handle,
            Err(e) => {
                error!("Failed to start control loop: {}", e);
                shared.reset();
                return RunOutcome {
                    hardware: None,
                    result: Err(Error::ThreadSpawnFailed("flow-control")),
                };
            }
        };

        let phases = self.run_phases(label, results);
        if let Err(e) = &phases {
            error!("Experiment {} aborted: {}", label, e);
        }

        let hardware = match self.shutdown(handle, &done_rx) {
            Ok(hw) => hw,
            Err(e) => {
                // A loop that missed the deadline is still running; keep
                // `terminate` set so it stops on its next iteration.
                if e != Error::LoopShutdownTimeout {
                    shared.reset();
                }
                self.current = SequencerState::Idle;
                return RunOutcome {
                    hardware: None,
                    result: Err(e),
                };
            }
        };

        shared.reset();
        self.current = SequencerState::Idle;
        let elapsed = started.elapsed();
        self.sink.emit(&ProcessEvent::RunFinished { elapsed });
        info!("Experiment {} finished in {:.1?}", label, elapsed);

        RunOutcome {
            hardware: Some(hardware),
            result: phases.map(|(points, parameters)| RunSummary {
                label: label.clone(),
                elapsed,
                points,
                parameters,
            }),
        }
    }

    // -----------------------------------------------------------------------
    // Internal
    // -----------------------------------------------------------------------

    /// Returns `(points, parameters)` of the sweep.
    ///
    /// A result the sink rejects does not skip the final flush; the sink's
    /// error is returned once every phase has run.
    fn run_phases(&mut self, label: &ExperimentLabel, results: &mut dyn ResultSink) -> Result<(usize, usize)> {
        let phases = self.phases.clone();
        let mut sampled = false;
        let mut summary = (0, 0);
        let mut unsaved = None;

        for phase in &phases {
            let state = match phase {
                ProcessPhase::Flush { .. } if sampled => SequencerState::FinalFlush,
                ProcessPhase::Flush { .. } => SequencerState::Flush,
                ProcessPhase::Homogenize { .. } => SequencerState::Homogenize,
                ProcessPhase::Sample { .. } => SequencerState::Sample,
            };
            let entered = Instant::now();
            self.enter(state, phase.setpoint());

            match phase {
                ProcessPhase::Flush { dwell, .. } | ProcessPhase::Homogenize { dwell, .. } => {
                    info!("Holding {} for {:?}", phase.name(), dwell);
                    thread::sleep(*dwell);
                }
                ProcessPhase::Sample { rate, sweep } => {
                    if let Some(gate) = self.process.stability_gate {
                        self.wait_for_stable_flow(gate, *rate);
                    }
                    let result = self.sweep(sweep)?;
                    summary = (result.len(), result.traces.len());
                    if let Err(e) = results.accept(label, result) {
                        error!("Result of {} not stored: {}", label, e);
                        unsaved = Some(e);
                    }
                    sampled = true;
                }
            }

            self.sink.emit(&ProcessEvent::PhaseCompleted {
                state,
                elapsed: entered.elapsed(),
            });
        }
        unsaved.map_or(Ok(summary), Err)
    }

    fn enter(&mut self, state: SequencerState, setpoint: Setpoint) {
        info!(
            "Sequencer: {} -> {} (target {:.3} ml/min, {})",
            self.current.name(),
            state.name(),
            setpoint.target_flow,
            setpoint.valve_mode
        );
        self.state.set_setpoint(setpoint);
        self.current = state;
        self.sink.emit(&ProcessEvent::PhaseEntered {
            state,
            target_flow: setpoint.target_flow,
            valve_mode: setpoint.valve_mode,
        });
    }

    /// Block until the published flow satisfies `gate` or the gate times out.
    fn wait_for_stable_flow(&self, gate: StabilityGate, target: f64) {
        let mut tracker = StabilityTracker::new(gate, target, Instant::now());
        loop {
            match tracker.observe(self.state.snapshot().current_flow, Instant::now()) {
                GateStatus::Waiting => thread::sleep(self.control.sample_interval),
                GateStatus::Stable(waited) => {
                    info!("Flow stable at {:.3} ml/min after {:.1?}", target, waited);
                    self.sink.emit(&ProcessEvent::FlowStable { waited });
                    return;
                }
                GateStatus::TimedOut(waited) => {
                    warn!("Flow not stable after {:.1?}, sweeping anyway", waited);
                    self.sink.emit(&ProcessEvent::FlowUnstable { waited });
                    return;
                }
            }
        }
    }

    /// Run the sweep on a scoped sibling thread; the sequencer waits for it.
    fn sweep(&mut self, request: &SweepRequest) -> Result<SweepResult> {
        self.sink.emit(&ProcessEvent::SweepStarted);
        let runner = &mut self.runner;
        let result = thread::scope(|s| {
            match thread::Builder::new()
                .name("sweep".into())
                .spawn_scoped(s, move || runner.run_sweep(request))
            {
                Ok(handle) => handle.join().unwrap_or(Err(Error::ThreadPanicked("sweep"))),
                Err(_) => Err(Error::ThreadSpawnFailed("sweep")),
            }
        });

        match &result {
            Ok(r) => self.sink.emit(&ProcessEvent::SweepCompleted {
                points: r.len(),
                parameters: r.traces.len(),
            }),
            Err(e) => self.sink.emit(&ProcessEvent::SweepFailed(*e)),
        }
        result
    }

    /// Stop the loop and reclaim the hardware.  The loop thread zeroes the
    /// pump on its way out, whether or not this wait times out.
    fn shutdown<H>(&mut self, handle: JoinHandle<H>, done: &Receiver<()>) -> Result<H> {
        self.state.request_terminate();
        match done.recv_timeout(self.process.loop_shutdown_timeout) {
            // Disconnected: the loop thread ended without signalling (panic).
            Ok(()) | Err(RecvTimeoutError::Disconnected) => {}
            Err(RecvTimeoutError::Timeout) => {
                error!(
                    "Control loop still running {:?} after terminate",
                    self.process.loop_shutdown_timeout
                );
                return Err(Error::LoopShutdownTimeout);
            }
        }

        handle.join().map_err(|_| {
            error!("Control loop thread panicked");
            Error::ThreadPanicked("flow-control")
        })
    }
}
