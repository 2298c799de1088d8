//! System configuration parameters
//!
//! All tunable parameters for the flow rig: controller gains and voltage
//! bounds, process-phase rates and dwell times, and the instrument sweep.
//! Values come from a JSON file (see [`crate::adapters::config_file`]) or
//! the defaults below.  Durations are stored as milliseconds.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_with::{DurationMilliSeconds, serde_as};

use crate::error::ConfigError;
use crate::vna::client::{DEFAULT_HOST, DEFAULT_PORT};
use crate::vna::sweep::SweepPolicy;
use crate::vna::{ParameterSet, SParameter, SweepRequest};

/// Proportional flow-controller parameters.  Immutable for a run.
#[serde_as]
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ControlParameters {
    /// Volts applied per ml/min of flow error.
    pub proportional_gain: f64,
    /// Gain the base deadband was tuned for.
    pub base_gain: f64,
    /// Deadband (ml/min) at `base_gain`.
    pub base_deadband: f64,
    /// Lowest pump voltage the loop may command.
    pub voltage_min: f64,
    /// Highest pump voltage the loop may command.
    pub voltage_max: f64,
    /// Voltage assumed at the start of every run (pump off).
    pub initial_voltage: f64,
    /// Control loop period.
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    pub sample_interval: Duration,
}

impl ControlParameters {
    /// Gain-normalized deadband: noise tolerance shrinks as the loop gets
    /// more aggressive.
    pub fn deadband(&self) -> f64 {
        self.base_deadband * (self.base_gain / self.proportional_gain)
    }
}

impl Default for ControlParameters {
    fn default() -> Self {
        Self {
            proportional_gain: 20.0,
            base_gain: 20.0,
            base_deadband: 0.1,
            voltage_min: 0.0,
            voltage_max: 100.0,
            initial_voltage: 0.0,
            sample_interval: Duration::from_millis(500),
        }
    }
}

/// Wait for the measured flow to settle before sweeping.
#[serde_as]
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct StabilityGate {
    /// Allowed |flow − target| (ml/min).
    pub tolerance: f64,
    /// How long the flow must stay inside the tolerance.
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    pub hold: Duration,
    /// Give up waiting (and sweep anyway) after this long.
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    pub timeout: Duration,
}

/// Process-phase rates (ml/min) and dwell times.
#[serde_as]
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ProcessConfig {
    pub flush_rate: f64,
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    pub flush_time: Duration,
    pub homogenization_rate: f64,
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    pub homogenization_time: Duration,
    pub sample_rate: f64,
    /// Optional settle gate between entering Sample and starting the sweep.
    #[serde(default)]
    pub stability_gate: Option<StabilityGate>,
    /// How long shutdown waits for the control loop to notice termination.
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    pub loop_shutdown_timeout: Duration,
}

impl Default for ProcessConfig {
    fn default() -> Self {
        Self {
            flush_rate: 1.0,
            flush_time: Duration::from_secs(120),
            homogenization_rate: 1.0,
            homogenization_time: Duration::from_secs(120),
            sample_rate: 0.4,
            stability_gate: None,
            loop_shutdown_timeout: Duration::from_secs(5),
        }
    }
}

/// Instrument endpoint, sweep settings and protocol timing.
#[serde_as]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InstrumentConfig {
    pub host: String,
    pub port: u16,
    /// IF bandwidth (Hz).
    pub ifbw: u32,
    pub points: u32,
    /// Start frequency (Hz).
    pub start_frequency: f64,
    /// Stop frequency (Hz).
    pub stop_frequency: f64,
    /// Traces to fetch, in fetch order.
    pub parameters: ParameterSet,
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    pub connect_timeout: Duration,
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    pub fetch_timeout: Duration,
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    pub poll_timeout: Duration,
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    pub poll_interval: Duration,
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    pub settle_delay: Duration,
    /// Bound on incomplete `*OPC?` polls.  Absent = poll until complete.
    #[serde(default)]
    pub max_completion_polls: Option<u32>,
}

impl InstrumentConfig {
    pub fn sweep_request(&self) -> SweepRequest {
        SweepRequest {
            ifbw: self.ifbw,
            points: self.points,
            start_freq: self.start_frequency,
            stop_freq: self.stop_frequency,
            parameters_to_fetch: self.parameters.clone(),
        }
    }

    pub fn sweep_policy(&self) -> SweepPolicy {
        SweepPolicy {
            poll_interval: self.poll_interval,
            poll_timeout: self.poll_timeout,
            fetch_timeout: self.fetch_timeout,
            settle_delay: self.settle_delay,
            max_completion_polls: self.max_completion_polls,
        }
    }
}

impl Default for InstrumentConfig {
    fn default() -> Self {
        let policy = SweepPolicy::default();
        Self {
            host: DEFAULT_HOST.to_owned(),
            port: DEFAULT_PORT,
            ifbw: 100,
            points: 10_000,
            start_frequency: 0.0,
            stop_frequency: 6e9,
            parameters: ParameterSet::from_slice(&[
                SParameter::S21,
                SParameter::S11,
                SParameter::S12,
                SParameter::S22,
            ])
            .unwrap_or_default(),
            connect_timeout: Duration::from_secs(5),
            fetch_timeout: policy.fetch_timeout,
            poll_timeout: policy.poll_timeout,
            poll_interval: policy.poll_interval,
            settle_delay: policy.settle_delay,
            max_completion_polls: policy.max_completion_polls,
        }
    }
}

/// Core system configuration
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct SystemConfig {
    pub control: ControlParameters,
    pub process: ProcessConfig,
    pub instrument: InstrumentConfig,
}

impl SystemConfig {
    /// Range-check every field.  Invalid values are rejected, never clamped.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let c = &self.control;
        check(c.proportional_gain > 0.0, "proportional_gain must be positive")?;
        check(c.base_gain > 0.0, "base_gain must be positive")?;
        check(c.base_deadband >= 0.0, "base_deadband must not be negative")?;
        check(c.voltage_min < c.voltage_max, "voltage_min must be below voltage_max")?;
        check(
            (c.voltage_min..=c.voltage_max).contains(&c.initial_voltage),
            "initial_voltage must lie within the voltage bounds",
        )?;
        check(!c.sample_interval.is_zero(), "sample_interval must be non-zero")?;

        let p = &self.process;
        for rate in [p.flush_rate, p.homogenization_rate, p.sample_rate] {
            check(rate.is_finite() && rate >= 0.0, "flow rates must be finite and non-negative")?;
        }
        check(
            p.loop_shutdown_timeout > c.sample_interval,
            "loop_shutdown_timeout must exceed sample_interval",
        )?;
        if let Some(gate) = &p.stability_gate {
            check(gate.tolerance > 0.0, "stability_gate.tolerance must be positive")?;
            check(gate.hold <= gate.timeout, "stability_gate.hold must not exceed its timeout")?;
        }

        let i = &self.instrument;
        check(!i.host.is_empty(), "instrument host must be set")?;
        check(i.ifbw > 0, "ifbw must be positive")?;
        check(i.points > 0, "points must be positive")?;
        check(
            i.start_frequency >= 0.0 && i.start_frequency < i.stop_frequency,
            "start_frequency must be non-negative and below stop_frequency",
        )?;
        check(!i.parameters.is_empty(), "at least one S-parameter must be fetched")?;
        let mut seen = ParameterSet::new();
        for p in &i.parameters {
            check(!seen.contains(p), "S-parameters must not repeat")?;
            // Capacity equals the number of distinct parameters.
            let _ = seen.push(*p);
        }
        check(!i.poll_timeout.is_zero(), "poll_timeout must be non-zero")?;
        check(!i.fetch_timeout.is_zero(), "fetch_timeout must be non-zero")?;
        check(!i.connect_timeout.is_zero(), "connect_timeout must be non-zero")?;
        check(i.max_completion_polls != Some(0), "max_completion_polls must be positive")?;
        Ok(())
    }
}

fn check(condition: bool, what: &'static str) -> Result<(), ConfigError> {
    if condition {
        Ok(())
    } else {
        Err(ConfigError::ValidationFailed(what))
    }
}
