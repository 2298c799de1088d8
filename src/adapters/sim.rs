//! Simulated rig for running without hardware.
//!
//! Flow follows a first-order response to pump voltage:
//!
//! ```text
//!   steady_flow = voltage × ml_per_volt
//!   flow(t + dt) = steady + (flow(t) − steady) · e^(−dt/τ)
//! ```
//!
//! The sensor and pump share one [`Plant`]; the valves are a real
//! [`ValvePair`] over in-memory pins whose levels stay observable through
//! a [`SimProbe`].

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use embedded_hal::digital::{ErrorType, OutputPin};
use log::info;

use crate::app::ports::{FlowSensor, PumpActuator};
use crate::drivers::valve::ValvePair;
use crate::error::IoError;

use super::hardware::RigHardware;

/// Plant constants.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SimParams {
    /// Steady-state flow per volt (ml/min/V).
    pub ml_per_volt: f64,
    /// Time constant of the flow response.
    pub time_constant: Duration,
}

impl Default for SimParams {
    fn default() -> Self {
        Self {
            ml_per_volt: 0.02,
            time_constant: Duration::from_secs(2),
        }
    }
}

// ───────────────────────────────────────────────────────────────
// Plant
// ───────────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct Plant {
    params: SimParams,
    flow: f64,
    voltage: f64,
    updated: Instant,
}

impl Plant {
    pub fn new(params: SimParams) -> Self {
        Self {
            params,
            flow: 0.0,
            voltage: 0.0,
            updated: Instant::now(),
        }
    }

    /// Integrate the response over `dt`.
    pub fn advance(&mut self, dt: Duration) {
        let steady = self.voltage * self.params.ml_per_volt;
        let tau = self.params.time_constant.as_secs_f64();
        let decay = if tau > 0.0 { (-dt.as_secs_f64() / tau).exp() } else { 0.0 };
        self.flow = steady + (self.flow - steady) * decay;
    }

    fn advance_to(&mut self, now: Instant) {
        self.advance(now.saturating_duration_since(self.updated));
        self.updated = now;
    }

    pub fn flow(&self) -> f64 {
        self.flow
    }

    pub fn voltage(&self) -> f64 {
        self.voltage
    }

    pub fn set_voltage(&mut self, volts: f64) {
        self.advance_to(Instant::now());
        self.voltage = volts;
    }
}

type SharedPlant = Arc<Mutex<Plant>>;

fn lock(plant: &SharedPlant) -> MutexGuard<'_, Plant> {
    plant.lock().unwrap_or_else(PoisonError::into_inner)
}

pub struct SimFlowSensor {
    plant: SharedPlant,
}

impl FlowSensor for SimFlowSensor {
    fn read(&mut self) -> Result<f64, IoError> {
        let mut plant = lock(&self.plant);
        plant.advance_to(Instant::now());
        Ok(plant.flow())
    }
}

pub struct SimPump {
    plant: SharedPlant,
}

impl PumpActuator for SimPump {
    fn set_voltage(&mut self, volts: f64) -> Result<(), IoError> {
        lock(&self.plant).set_voltage(volts);
        Ok(())
    }
}

// ───────────────────────────────────────────────────────────────
// Pins
// ───────────────────────────────────────────────────────────────

/// Output pin backed by a shared flag.
#[derive(Debug, Clone, Default)]
pub struct SimPin {
    level: Arc<AtomicBool>,
}

impl SimPin {
    pub fn is_high(&self) -> bool {
        self.level.load(Ordering::Acquire)
    }
}

impl ErrorType for SimPin {
    type Error = core::convert::Infallible;
}

impl OutputPin for SimPin {
    fn set_low(&mut self) -> Result<(), Self::Error> {
        self.level.store(false, Ordering::Release);
        Ok(())
    }

    fn set_high(&mut self) -> Result<(), Self::Error> {
        self.level.store(true, Ordering::Release);
        Ok(())
    }
}

// ───────────────────────────────────────────────────────────────
// Assembly
// ───────────────────────────────────────────────────────────────

pub type SimulatedRig = RigHardware<SimFlowSensor, SimPump, ValvePair<SimPin, SimPin>>;

/// Read-only view into a running simulation.
#[derive(Clone)]
pub struct SimProbe {
    plant: SharedPlant,
    valve_1: SimPin,
    valve_2: SimPin,
}

impl SimProbe {
    pub fn flow(&self) -> f64 {
        lock(&self.plant).flow()
    }

    pub fn voltage(&self) -> f64 {
        lock(&self.plant).voltage()
    }

    /// `(valve_1, valve_2)`, `true` = high.
    pub fn valves(&self) -> (bool, bool) {
        (self.valve_1.is_high(), self.valve_2.is_high())
    }
}

/// Build a simulated rig and a probe onto its internals.
pub fn simulated_rig(params: SimParams) -> (SimulatedRig, SimProbe) {
    info!(
        "Simulated rig: {} ml/min per V, tau {:?}",
        params.ml_per_volt, params.time_constant
    );
    let plant = Arc::new(Mutex::new(Plant::new(params)));
    let (valve_1, valve_2) = (SimPin::default(), SimPin::default());
    let probe = SimProbe {
        plant: Arc::clone(&plant),
        valve_1: valve_1.clone(),
        valve_2: valve_2.clone(),
    };
    let rig = RigHardware::new(
        SimFlowSensor {
            plant: Arc::clone(&plant),
        },
        SimPump { plant },
        ValvePair::new(valve_1, valve_2),
    );
    (rig, probe)
}
