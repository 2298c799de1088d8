//! Hardware adapter — bundles a sensor, a pump and a valve manifold.
//!
//! The control loop needs one value implementing all three hardware ports
//! so it can own it on its thread.  [`RigHardware`] composes independent
//! drivers into that value and delegates each port to its component.

use crate::app::ports::{FlowSensor, PumpActuator, ValveDriver};
use crate::drivers::valve::ValveMode;
use crate::error::IoError;

/// Sensor, pump and valves owned as one value by the control loop.
pub struct RigHardware<S, P, V> {
    pub sensor: S,
    pub pump: P,
    pub valves: V,
}

impl<S, P, V> RigHardware<S, P, V> {
    pub fn new(sensor: S, pump: P, valves: V) -> Self {
        Self { sensor, pump, valves }
    }

    pub fn into_parts(self) -> (S, P, V) {
        (self.sensor, self.pump, self.valves)
    }
}

// ── FlowSensor ────────────────────────────────────────────────

impl<S: FlowSensor, P, V> FlowSensor for RigHardware<S, P, V> {
    fn read(&mut self) -> Result<f64, IoError> {
        self.sensor.read()
    }
}

// ── PumpActuator ──────────────────────────────────────────────

impl<S, P: PumpActuator, V> PumpActuator for RigHardware<S, P, V> {
    fn set_voltage(&mut self, volts: f64) -> Result<(), IoError> {
        self.pump.set_voltage(volts)
    }

    fn stop(&mut self) -> Result<(), IoError> {
        self.pump.stop()
    }
}

// ── ValveDriver ───────────────────────────────────────────────

impl<S, P, V: ValveDriver> ValveDriver for RigHardware<S, P, V> {
    fn set_mode(&mut self, mode: ValveMode) -> Result<(), IoError> {
        self.valves.set_mode(mode)
    }
}
