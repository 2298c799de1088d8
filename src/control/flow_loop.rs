//! Proportional flow controller with a gain-normalized deadband.
//!
//! One tick, every `sample_interval`:
//!
//! ```text
//!  snapshot setpoint ─▶ read sensor ─▶ compute step ─▶ pump (if outside
//!  (one lock)           (fail → 0.0)   err × kp        deadband) ─▶ valves
//!                                                      ─▶ publish (one lock)
//! ```
//!
//! Hardware failures are logged and absorbed; the loop only stops when the
//! sequencer sets `terminate`.

use std::sync::Arc;
use std::thread;
use std::time::Instant;

use log::{debug, info, warn};

use crate::app::events::{ProcessEvent, TelemetryData};
use crate::app::ports::{EventSink, ProcessHardware};
use crate::config::ControlParameters;
use crate::fsm::context::SharedProcessState;

/// Outcome of one control computation.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ControlStep {
    /// `target − reading` (ml/min).
    pub error: f64,
    /// Deadband in effect (ml/min).
    pub deadband: f64,
    /// `kp × error`, before clamping.
    pub adjustment: f64,
    /// Voltage after this step, always within the configured bounds.
    pub voltage: f64,
    /// Whether the pump must be commanded.
    pub apply: bool,
}

/// Gain-normalized deadband for `params`.
pub fn deadband(params: &ControlParameters) -> f64 {
    params.deadband()
}

/// Pure control law.  Inside the deadband the voltage is left exactly as is.
pub fn compute_step(params: &ControlParameters, target: f64, reading: f64, current_voltage: f64) -> ControlStep {
    let error = target - reading;
    let deadband = deadband(params);
    let adjustment = params.proportional_gain * error;

    if error.abs() > deadband {
        ControlStep {
            error,
            deadband,
            adjustment,
            voltage: (current_voltage + adjustment).clamp(params.voltage_min, params.voltage_max),
            apply: true,
        }
    } else {
        ControlStep {
            error,
            deadband,
            adjustment,
            voltage: current_voltage,
            apply: false,
        }
    }
}

// ───────────────────────────────────────────────────────────────
// FlowControlLoop
// ───────────────────────────────────────────────────────────────

pub struct FlowControlLoop {
    params: ControlParameters,
    state: Arc<SharedProcessState>,
    sink: Arc<dyn EventSink>,
}

impl FlowControlLoop {
    pub fn new(params: ControlParameters, state: Arc<SharedProcessState>, sink: Arc<dyn EventSink>) -> Self {
        Self { params, state, sink }
    }

    /// Run one control iteration against `hw`.
    pub fn tick<H: ProcessHardware>(&self, hw: &mut H) -> ControlStep {
        let snap = self.state.snapshot();

        let reading = match hw.read() {
            Ok(flow) => Some(flow),
            Err(e) => {
                warn!("Flow read failed ({}), assuming 0.0 ml/min", e);
                None
            }
        };

        let step = compute_step(
            &self.params,
            snap.target_flow,
            reading.unwrap_or(0.0),
            snap.current_voltage,
        );

        let voltage = if step.apply {
            match hw.set_voltage(step.voltage) {
                Ok(()) => step.voltage,
                Err(e) => {
                    // Keep the last applied value; next tick recomputes from it.
                    warn!("Pump write failed ({}), holding {:.2} V", e, snap.current_voltage);
                    snap.current_voltage
                }
            }
        } else {
            snap.current_voltage
        };

        if let Err(e) = hw.set_mode(snap.valve_mode) {
            warn!("Valve write failed ({}) for {}", e, snap.valve_mode);
        }

        self.state.publish(reading, voltage);
        self.sink.emit(&ProcessEvent::Telemetry(TelemetryData {
            valve_mode: snap.valve_mode,
            target_flow: snap.target_flow,
            flow: reading,
            voltage,
            adjustment: step.adjustment,
        }));
        step
    }

    /// Tick every `sample_interval` until `terminate` is set, then hand the
    /// hardware back.
    pub fn run<H: ProcessHardware>(self, mut hw: H) -> H {
        info!(
            "Control loop started (kp={}, deadband={:.4} ml/min, interval={:?})",
            self.params.proportional_gain,
            self.params.deadband(),
            self.params.sample_interval
        );
        let mut ticks = 0u64;
        while !self.state.should_terminate() {
            let started = Instant::now();
            self.tick(&mut hw);
            ticks += 1;
            thread::sleep(self.params.sample_interval.saturating_sub(started.elapsed()));
        }
        debug!("Control loop exiting after {} ticks", ticks);
        hw
    }
}
