//! Shared process state: the blackboard between the control loop and the
//! sequencer.
//!
//! One [`SharedProcessState`] is shared (`Arc`) by the control-loop thread
//! and the sequencer.  Every field sits behind a single mutex:
//!
//! - the sequencer writes the setpoint (`target_flow` + `valve_mode`, always
//!   together) and the `terminate` flag;
//! - the control loop reads the setpoint and publishes its latest reading
//!   and voltage.
//!
//! The lock is held only for a copy in or a copy out, never across I/O.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};

use log::debug;

use crate::config::{ControlParameters, ProcessConfig};
use crate::drivers::valve::ValveMode;
use crate::error::{Error, Result};

// ---------------------------------------------------------------------------
// Snapshot / setpoint
// ---------------------------------------------------------------------------

/// Controller target for the current phase.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Setpoint {
    pub target_flow: f64,
    pub valve_mode: ValveMode,
}

/// Point-in-time copy of the shared fields.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ProcessSnapshot {
    /// Latest valid sensor reading (ml/min).  `None` before the first tick
    /// and after a failed read.
    pub current_flow: Option<f64>,
    /// Voltage last commanded to the pump.
    pub current_voltage: f64,
    pub target_flow: f64,
    pub valve_mode: ValveMode,
    pub terminate: bool,
}

impl ProcessSnapshot {
    pub fn setpoint(&self) -> Setpoint {
        Setpoint {
            target_flow: self.target_flow,
            valve_mode: self.valve_mode,
        }
    }
}

// ---------------------------------------------------------------------------
// SharedProcessState
// ---------------------------------------------------------------------------

pub struct SharedProcessState {
    inner: Mutex<ProcessSnapshot>,
    /// Values restored by [`reset`](Self::reset).
    initial: ProcessSnapshot,
    session_active: AtomicBool,
}

impl SharedProcessState {
    /// Fresh state: pump at `initial_voltage`, flushing at `initial_target`.
    pub fn new(initial_voltage: f64, initial_target: f64) -> Self {
        let initial = ProcessSnapshot {
            current_flow: None,
            current_voltage: initial_voltage,
            target_flow: initial_target,
            valve_mode: ValveMode::Flush,
            terminate: false,
        };
        Self {
            inner: Mutex::new(initial),
            initial,
            session_active: AtomicBool::new(false),
        }
    }

    pub fn from_config(control: &ControlParameters, process: &ProcessConfig) -> Self {
        Self::new(control.initial_voltage, process.flush_rate)
    }

    pub fn snapshot(&self) -> ProcessSnapshot {
        *self.lock()
    }

    /// Set target flow and valve mode in one lock acquisition.
    pub fn set_setpoint(&self, setpoint: Setpoint) {
        let mut s = self.lock();
        s.target_flow = setpoint.target_flow;
        s.valve_mode = setpoint.valve_mode;
    }

    /// Control-loop publication of one tick's outcome.
    pub fn publish(&self, reading: Option<f64>, voltage: f64) {
        let mut s = self.lock();
        s.current_flow = reading;
        s.current_voltage = voltage;
    }

    pub fn request_terminate(&self) {
        self.lock().terminate = true;
    }

    pub fn should_terminate(&self) -> bool {
        self.lock().terminate
    }

    /// Restore initial values (clears `terminate`).
    pub fn reset(&self) {
        *self.lock() = self.initial;
        debug!("Process state reset");
    }

    /// Claim exclusive use of this state for one sequencer session.
    ///
    /// Fails with [`Error::SessionBusy`] while another guard is alive.
    pub fn claim_session(&self) -> Result<SessionGuard<'_>> {
        self.session_active
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .map(|_| SessionGuard { state: self })
            .map_err(|_| Error::SessionBusy)
    }

    pub fn session_active(&self) -> bool {
        self.session_active.load(Ordering::Acquire)
    }

    /// A panicked holder cannot leave the snapshot half-written (every
    /// update is a plain field copy), so a poisoned lock is still usable.
    fn lock(&self) -> MutexGuard<'_, ProcessSnapshot> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Releases the session claim on drop.
#[must_use = "the session is released as soon as the guard is dropped"]
pub struct SessionGuard<'a> {
    state: &'a SharedProcessState,
}

impl Drop for SessionGuard<'_> {
    fn drop(&mut self) {
        self.state.session_active.store(false, Ordering::Release);
    }
}
