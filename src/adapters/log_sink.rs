//! Log-based event and result sinks.
//!
//! Implements [`EventSink`] by writing structured process events through
//! the `log` facade as single tagged lines, and [`ResultSink`] by logging a
//! one-line summary of each sweep.

use log::{debug, error, info, warn};

use crate::app::events::{ExperimentLabel, ProcessEvent};
use crate::app::ports::{EventSink, ResultSink};
use crate::error::Result;
use crate::vna::SweepResult;

/// Adapter that logs every [`ProcessEvent`].
#[derive(Debug, Default, Clone, Copy)]
pub struct LogEventSink;

impl LogEventSink {
    pub fn new() -> Self {
        Self
    }
}

impl EventSink for LogEventSink {
    fn emit(&self, event: &ProcessEvent) {
        match event {
            ProcessEvent::Telemetry(t) => {
                // Once per tick; keep it out of the default info stream.
                debug!(
                    "TELEM | mode={} | target={:.3}ml/min | flow={} | V={:.2} | adj={:+.3}",
                    t.valve_mode,
                    t.target_flow,
                    t.flow.map_or_else(|| "n/a".to_owned(), |f| format!("{f:.3}ml/min")),
                    t.voltage,
                    t.adjustment,
                );
            }
            ProcessEvent::RunStarted(label) => info!("RUN   | start {}", label),
            ProcessEvent::PhaseEntered {
                state,
                target_flow,
                valve_mode,
            } => {
                info!(
                    "PHASE | enter {} | target={:.3}ml/min | valves={}",
                    state.name(),
                    target_flow,
                    valve_mode
                );
            }
            ProcessEvent::PhaseCompleted { state, elapsed } => {
                info!("PHASE | done {} | {:.1?}", state.name(), elapsed);
            }
            ProcessEvent::FlowStable { waited } => info!("FLOW  | stable after {:.1?}", waited),
            ProcessEvent::FlowUnstable { waited } => warn!("FLOW  | unstable after {:.1?}", waited),
            ProcessEvent::SweepStarted => info!("SWEEP | started"),
            ProcessEvent::SweepCompleted { points, parameters } => {
                info!("SWEEP | complete | {} points x {} traces", points, parameters);
            }
            ProcessEvent::SweepFailed(e) => error!("SWEEP | failed: {}", e),
            ProcessEvent::RunFinished { elapsed } => info!("RUN   | finished in {:.1?}", elapsed),
        }
    }
}

/// Result sink that only logs what it receives.
#[derive(Debug, Default)]
pub struct LogResultSink {
    received: usize,
}

impl LogResultSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of sweeps accepted so far.
    pub fn received(&self) -> usize {
        self.received
    }
}

impl ResultSink for LogResultSink {
    fn accept(&mut self, label: &ExperimentLabel, result: SweepResult) -> Result<()> {
        self.received += 1;
        let span = match (result.frequency.first(), result.frequency.last()) {
            (Some(lo), Some(hi)) => format!("{lo:.3e}..{hi:.3e} Hz"),
            _ => "empty".to_owned(),
        };
        let params: Vec<_> = result.traces.iter().map(|t| t.parameter.as_str()).collect();
        info!(
            "DATA  | {} | {} points ({}) | {}",
            label,
            result.len(),
            span,
            params.join(",")
        );
        Ok(())
    }
}
