//! Outbound process events.
//!
//! The control loop and the sequencer emit these through the
//! [`EventSink`](super::ports::EventSink) port.  Adapters on the other
//! side decide what to do with them.

use core::fmt;
use std::time::Duration;

use serde::Serialize;

use crate::drivers::valve::ValveMode;
use crate::error::Error;
use crate::fsm::SequencerState;

/// Identifies one experiment within a batch.  Travels with each sweep
/// result into the [`ResultSink`](super::ports::ResultSink).
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ExperimentLabel {
    /// Chemical under test.
    pub chemical: String,
    /// Concentration (units are the operator's choice, typically %).
    pub concentration: f64,
    /// 1-based index within the batch.
    pub experiment_number: u32,
}

impl ExperimentLabel {
    pub fn new(chemical: impl Into<String>, concentration: f64, experiment_number: u32) -> Self {
        Self {
            chemical: chemical.into(),
            concentration,
            experiment_number,
        }
    }

    /// Same chemical and concentration, different run number.
    pub fn with_number(&self, experiment_number: u32) -> Self {
        Self {
            experiment_number,
            ..self.clone()
        }
    }
}

impl fmt::Display for ExperimentLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}_{}_{}",
            self.chemical, self.concentration, self.experiment_number
        )
    }
}

/// Structured events emitted by the process core.
#[derive(Debug, Clone, PartialEq)]
pub enum ProcessEvent {
    /// A sequencer session claimed the shared state.
    RunStarted(ExperimentLabel),

    /// A phase was entered; target and valve mode were set together.
    PhaseEntered {
        state: SequencerState,
        target_flow: f64,
        valve_mode: ValveMode,
    },

    /// A phase finished (dwell elapsed or sweep returned).
    PhaseCompleted { state: SequencerState, elapsed: Duration },

    /// Flow stayed within tolerance for the configured hold time.
    FlowStable { waited: Duration },

    /// The stability gate timed out; the sweep proceeds anyway.
    FlowUnstable { waited: Duration },

    SweepStarted,

    SweepCompleted { points: usize, parameters: usize },

    SweepFailed(Error),

    /// Once per control-loop tick.
    Telemetry(TelemetryData),

    /// Shutdown finished: pump zeroed, state reset.
    RunFinished { elapsed: Duration },
}

/// One control-loop tick, suitable for logging or transmission.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TelemetryData {
    pub valve_mode: ValveMode,
    pub target_flow: f64,
    /// `None` when the sensor read failed this tick.
    pub flow: Option<f64>,
    /// Voltage in effect after this tick.
    pub voltage: f64,
    /// Correction computed this tick (applied only outside the deadband).
    pub adjustment: f64,
}
