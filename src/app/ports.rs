//! Port traits — the hexagonal boundary between domain logic and the outside world.
//!
//! ```text
//!   Adapter ──▶ Port trait ──▶ FlowControlLoop / ProcessSequencer (domain)
//! ```
//!
//! Driven adapters (sensor, pump, valves, instrument, event and result
//! sinks, config storage) implement these traits.  The domain consumes
//! them via generics, so the control loop and sequencer never touch
//! hardware or sockets directly.
//!
//! Hardware ports return [`IoError`]; the control loop logs and absorbs
//! those.  [`SweepRunner`] returns the crate [`Error`] because protocol
//! and timeout failures must escalate to the sequencer.

use log::error;

use crate::config::SystemConfig;
use crate::drivers::valve::ValveMode;
use crate::error::{ConfigError, Error, IoError, Result};
use crate::vna::{SweepRequest, SweepResult};

use super::events::{ExperimentLabel, ProcessEvent};

// ───────────────────────────────────────────────────────────────
// Hardware ports (driven adapters: hardware ↔ domain)
// ───────────────────────────────────────────────────────────────

/// Flow sensor.  One reading per call, in ml/min.
pub trait FlowSensor {
    fn read(&mut self) -> core::result::Result<f64, IoError>;
}

/// Pump driver.  Applies a voltage already clamped by the caller.
pub trait PumpActuator {
    fn set_voltage(&mut self, volts: f64) -> core::result::Result<(), IoError>;

    /// Command zero output.
    fn stop(&mut self) -> core::result::Result<(), IoError> {
        self.set_voltage(0.0)
    }
}

/// Two-valve manifold driven by a discrete mode.
pub trait ValveDriver {
    fn set_mode(&mut self, mode: ValveMode) -> core::result::Result<(), IoError>;

    /// Apply a mode by its rig name (`flush_flow`, ...).
    ///
    /// An unrecognized name is logged and leaves both outputs untouched.
    fn apply_named_mode(&mut self, name: &str) -> Result<()> {
        match name.parse::<ValveMode>() {
            Ok(mode) => self.set_mode(mode).map_err(Error::from),
            Err(e) => {
                error!("Unknown valve mode: {}", name);
                Err(e.into())
            }
        }
    }
}

/// Everything the control loop drives, in one bound.  Satisfied
/// automatically by any type implementing all three hardware ports; this
/// avoids a double mutable borrow while keeping each port explicit.
pub trait ProcessHardware: FlowSensor + PumpActuator + ValveDriver {}

impl<T: FlowSensor + PumpActuator + ValveDriver> ProcessHardware for T {}

// ───────────────────────────────────────────────────────────────
// Instrument port (driven adapter: domain → analyzer)
// ───────────────────────────────────────────────────────────────

/// Runs one complete sweep: configure, trigger, wait, fetch.
///
/// Implementations must release any connection they open before
/// returning, on success and failure alike.
pub trait SweepRunner: Send {
    fn run_sweep(&mut self, request: &SweepRequest) -> Result<SweepResult>;
}

// ───────────────────────────────────────────────────────────────
// Event and result sinks (driven adapters: domain → logging / storage)
// ───────────────────────────────────────────────────────────────

/// The domain emits structured [`ProcessEvent`]s through this port.
///
/// Shared by the control-loop thread and the sequencer, hence `&self`.
pub trait EventSink: Send + Sync {
    fn emit(&self, event: &ProcessEvent);
}

/// Receives every completed sweep together with its experiment label.
pub trait ResultSink {
    fn accept(&mut self, label: &ExperimentLabel, result: SweepResult) -> Result<()>;
}

// ───────────────────────────────────────────────────────────────
// Configuration port (driven adapter: domain ↔ persistent config)
// ───────────────────────────────────────────────────────────────

/// Loads and persists system configuration.
///
/// Implementations MUST validate before persisting.  Invalid ranges are
/// rejected with [`ConfigError::ValidationFailed`], not silently clamped.
pub trait ConfigPort {
    /// Load configuration.  Returns [`SystemConfig::default()`] if no
    /// stored config exists.
    fn load(&self) -> core::result::Result<SystemConfig, ConfigError>;

    /// Validate and persist configuration.
    fn save(&self, config: &SystemConfig) -> core::result::Result<(), ConfigError>;
}
