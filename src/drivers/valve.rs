//! Two-valve flow manifold driver.
//!
//! Each valve is a single digital output.  The process only ever uses
//! three combinations:
//!
//! | mode        | valve_1 | valve_2 |
//! |-------------|---------|---------|
//! | Sample      | HIGH    | LOW     |
//! | Flush       | LOW     | HIGH    |
//! | Homogenize  | LOW     | LOW     |
//!
//! Generic over [`embedded_hal::digital::OutputPin`], so the same driver
//! runs against GPIO lines on a rig or simulated pins on a host.

use core::fmt;
use core::str::FromStr;

use embedded_hal::digital::{OutputPin, PinState};
use log::{debug, warn};
use serde::{Deserialize, Serialize};

use crate::app::ports::ValveDriver;
use crate::error::{ConfigError, IoError};

/// Valve configuration for a process phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ValveMode {
    #[serde(rename = "flush_flow")]
    Flush,
    #[serde(rename = "homogenization_flow")]
    Homogenize,
    #[serde(rename = "sample_flow")]
    Sample,
}

impl ValveMode {
    pub const ALL: [Self; 3] = [Self::Flush, Self::Homogenize, Self::Sample];

    /// Rig name for this mode.
    pub const fn name(self) -> &'static str {
        match self {
            Self::Flush => "flush_flow",
            Self::Homogenize => "homogenization_flow",
            Self::Sample => "sample_flow",
        }
    }

    /// Output levels as `(valve_1, valve_2)`.
    pub const fn levels(self) -> (PinState, PinState) {
        match self {
            Self::Sample => (PinState::High, PinState::Low),
            Self::Flush => (PinState::Low, PinState::High),
            Self::Homogenize => (PinState::Low, PinState::Low),
        }
    }
}

impl fmt::Display for ValveMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for ValveMode {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|m| m.name() == s)
            .ok_or(ConfigError::UnknownValveMode)
    }
}

/// Two output pins forming the manifold.
pub struct ValvePair<P1, P2> {
    valve_1: P1,
    valve_2: P2,
    last: Option<ValveMode>,
}

impl<P1: OutputPin, P2: OutputPin> ValvePair<P1, P2> {
    pub fn new(valve_1: P1, valve_2: P2) -> Self {
        Self {
            valve_1,
            valve_2,
            last: None,
        }
    }

    /// Last mode applied successfully.
    pub fn mode(&self) -> Option<ValveMode> {
        self.last
    }

    pub fn release(self) -> (P1, P2) {
        (self.valve_1, self.valve_2)
    }
}

impl<P1: OutputPin, P2: OutputPin> ValvePair<P1, P2> {
    fn write_valve_1(&mut self, level: PinState) -> Result<(), IoError> {
        self.valve_1.set_state(level).map_err(|e| {
            warn!("valve_1 write failed: {:?}", e);
            IoError::ValveWriteFailed
        })
    }

    fn write_valve_2(&mut self, level: PinState) -> Result<(), IoError> {
        self.valve_2.set_state(level).map_err(|e| {
            warn!("valve_2 write failed: {:?}", e);
            IoError::ValveWriteFailed
        })
    }
}

impl<P1: OutputPin, P2: OutputPin> ValveDriver for ValvePair<P1, P2> {
    /// Outputs going low are written before outputs going high, so a
    /// failure part way through never leaves both valves high.
    fn set_mode(&mut self, mode: ValveMode) -> Result<(), IoError> {
        let (l1, l2) = mode.levels();
        let written = if l1 == PinState::Low {
            self.write_valve_1(l1).and_then(|()| self.write_valve_2(l2))
        } else {
            self.write_valve_2(l2).and_then(|()| self.write_valve_1(l1))
        };
        if let Err(e) = written {
            // Levels may now match no mode.
            self.last = None;
            return Err(e);
        }
        if self.last != Some(mode) {
            debug!("Valves set to {}", mode);
        }
        self.last = Some(mode);
        Ok(())
    }
}
