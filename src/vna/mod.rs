//! Network-analyzer sweep subsystem.
//!
//! Line-framed text protocol to the instrument-control process, layered
//! the same way regardless of what carries the bytes:
//!
//! ```text
//! ┌────────────────────────────────────────────────────────────┐
//! │                      Sweep Stack                           │
//! │                                                            │
//! │  ┌───────────┐   ┌────────────┐   ┌─────────────────────┐  │
//! │  │ Transport │──▶│ LineReader │──▶│ ScpiConnection      │  │
//! │  │ (trait)   │   │ (framing)  │   │ command / query     │  │
//! │  └───────────┘   └────────────┘   └──────────┬──────────┘  │
//! │                                              │             │
//! │                                   ┌──────────▼──────────┐  │
//! │                                   │ sweep orchestration │  │
//! │                                   │ → SweepResult       │  │
//! │                                   └─────────────────────┘  │
//! └────────────────────────────────────────────────────────────┘
//! ```

pub mod client;
pub mod codec;
pub mod sweep;
pub mod transport;

use core::fmt;
use core::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Maximum number of distinct S-parameters a two-port sweep can return.
pub const MAX_PARAMETERS: usize = 4;

/// Selection of S-parameters to fetch after a sweep, in fetch order.
pub type ParameterSet = heapless::Vec<SParameter, MAX_PARAMETERS>;

/// Two-port scattering parameter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum SParameter {
    S11,
    S21,
    S12,
    S22,
}

impl SParameter {
    pub const ALL: [Self; MAX_PARAMETERS] = [Self::S11, Self::S21, Self::S12, Self::S22];

    /// Name used on the wire (`VNA:TRACe:DATA? S21`).
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::S11 => "S11",
            Self::S21 => "S21",
            Self::S12 => "S12",
            Self::S22 => "S22",
        }
    }
}

impl fmt::Display for SParameter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SParameter {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|p| p.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or(ConfigError::ValidationFailed("unknown S-parameter"))
    }
}

/// Everything the instrument needs to run one sweep.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SweepRequest {
    /// IF bandwidth (Hz).
    pub ifbw: u32,
    /// Number of frequency points.
    pub points: u32,
    /// Start frequency (Hz).
    pub start_freq: f64,
    /// Stop frequency (Hz).
    pub stop_freq: f64,
    /// Traces to fetch once the sweep completes.
    pub parameters_to_fetch: ParameterSet,
}

/// Real/imaginary columns of one S-parameter trace.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Trace {
    pub parameter: SParameter,
    pub real: Vec<f64>,
    pub imag: Vec<f64>,
}

/// Result of one sweep.  Every trace has exactly `frequency.len()` points.
#[derive(Debug, Clone, PartialEq, Default, Serialize)]
pub struct SweepResult {
    pub frequency: Vec<f64>,
    pub traces: Vec<Trace>,
}

impl SweepResult {
    /// Number of frequency points.
    pub fn len(&self) -> usize {
        self.frequency.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frequency.is_empty()
    }

    /// Look up the trace for `parameter`, if it was fetched.
    pub fn trace(&self, parameter: SParameter) -> Option<&Trace> {
        self.traces.iter().find(|t| t.parameter == parameter)
    }
}
