//! Process phases and the flow-stability gate.
//!
//! An experiment is an ordered list of [`ProcessPhase`]s, built once from
//! configuration and immutable for the run:
//!
//! ```text
//!  Flush(rate, dwell) ─▶ Homogenize(rate, dwell) ─▶ Sample(rate, sweep) ─▶ Flush(rate, dwell)
//! ```

use std::time::{Duration, Instant};

use crate::config::{ProcessConfig, StabilityGate};
use crate::drivers::valve::ValveMode;
use crate::vna::SweepRequest;

use super::context::Setpoint;

/// One step of an experiment.
#[derive(Debug, Clone, PartialEq)]
pub enum ProcessPhase {
    /// Rinse the line; held for `dwell`.
    Flush { rate: f64, dwell: Duration },
    /// Mix the sample; held for `dwell`.
    Homogenize { rate: f64, dwell: Duration },
    /// Route flow past the sensor and hold until the sweep returns.
    Sample { rate: f64, sweep: SweepRequest },
}

impl ProcessPhase {
    /// Target flow and valve mode this phase imposes.
    pub fn setpoint(&self) -> Setpoint {
        let (target_flow, valve_mode) = match self {
            Self::Flush { rate, .. } => (*rate, ValveMode::Flush),
            Self::Homogenize { rate, .. } => (*rate, ValveMode::Homogenize),
            Self::Sample { rate, .. } => (*rate, ValveMode::Sample),
        };
        Setpoint {
            target_flow,
            valve_mode,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::Flush { .. } => "flush",
            Self::Homogenize { .. } => "homogenize",
            Self::Sample { .. } => "sample",
        }
    }
}

/// The standard experiment: flush, homogenize, sample, final flush.
pub fn build_phase_sequence(process: &ProcessConfig, sweep: SweepRequest) -> Vec<ProcessPhase> {
    let flush = ProcessPhase::Flush {
        rate: process.flush_rate,
        dwell: process.flush_time,
    };
    vec![
        flush.clone(),
        ProcessPhase::Homogenize {
            rate: process.homogenization_rate,
            dwell: process.homogenization_time,
        },
        ProcessPhase::Sample {
            rate: process.sample_rate,
            sweep,
        },
        flush,
    ]
}

// ---------------------------------------------------------------------------
// Stability gate
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GateStatus {
    Waiting,
    /// Flow held within tolerance; carries the total wait.
    Stable(Duration),
    /// Gave up; carries the total wait.
    TimedOut(Duration),
}

/// Tracks how long the published flow has stayed near target.
#[derive(Debug, Clone)]
pub struct StabilityTracker {
    gate: StabilityGate,
    target: f64,
    started: Instant,
    in_band_since: Option<Instant>,
}

impl StabilityTracker {
    pub fn new(gate: StabilityGate, target: f64, started: Instant) -> Self {
        Self {
            gate,
            target,
            started,
            in_band_since: None,
        }
    }

    /// Feed one observation.  A missing reading breaks the hold.
    pub fn observe(&mut self, flow: Option<f64>, now: Instant) -> GateStatus {
        let waited = now.saturating_duration_since(self.started);
        let in_band = flow.is_some_and(|f| (f - self.target).abs() <= self.gate.tolerance);

        if in_band {
            let since = *self.in_band_since.get_or_insert(now);
            if now.saturating_duration_since(since) >= self.gate.hold {
                return GateStatus::Stable(waited);
            }
        } else {
            self.in_band_since = None;
        }

        if waited >= self.gate.timeout {
            GateStatus::TimedOut(waited)
        } else {
            GateStatus::Waiting
        }
    }
}
