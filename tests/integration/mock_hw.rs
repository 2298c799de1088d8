//! Mock adapters for integration tests.
//!
//! Records every hardware call so tests can assert on the full command
//! history without touching real GPIO or a pump driver, and replays
//! scripted instrument conversations through the real sweep code.

use std::collections::VecDeque;
use std::sync::atomic::AtomicBool;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use flowsweep::app::events::{ExperimentLabel, ProcessEvent};
use flowsweep::app::ports::{EventSink, FlowSensor, PumpActuator, ResultSink, SweepRunner, ValveDriver};
use flowsweep::config::SystemConfig;
use flowsweep::drivers::valve::ValveMode;
use flowsweep::error::{IoError, Result};
use flowsweep::vna::client::ScpiConnection;
use flowsweep::vna::sweep::{self, SweepPolicy};
use flowsweep::vna::transport::ScriptedTransport;
use flowsweep::vna::{SweepRequest, SweepResult};

// ── Hardware call record ──────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum HwCall {
    Read,
    SetVoltage(f64),
    SetMode(ValveMode),
}

// ── MockHardware ──────────────────────────────────────────────

/// Sensor readings are served from a queue; once it runs dry the last
/// `steady` value is repeated.
pub struct MockHardware {
    pub calls: Vec<HwCall>,
    readings: VecDeque<core::result::Result<f64, IoError>>,
    steady: core::result::Result<f64, IoError>,
    pub pump_fails: bool,
}

#[allow(dead_code)]
impl MockHardware {
    pub fn steady(flow: f64) -> Self {
        Self {
            calls: Vec::new(),
            readings: VecDeque::new(),
            steady: Ok(flow),
            pump_fails: false,
        }
    }

    pub fn failing_sensor() -> Self {
        Self {
            steady: Err(IoError::SensorReadFailed),
            ..Self::steady(0.0)
        }
    }

    pub fn then_read(mut self, reading: core::result::Result<f64, IoError>) -> Self {
        self.readings.push_back(reading);
        self
    }

    pub fn voltages(&self) -> Vec<f64> {
        self.calls
            .iter()
            .filter_map(|c| match c {
                HwCall::SetVoltage(v) => Some(*v),
                _ => None,
            })
            .collect()
    }

    /// Valve modes in the order they were applied, consecutive repeats
    /// collapsed.
    pub fn mode_changes(&self) -> Vec<ValveMode> {
        let mut modes: Vec<ValveMode> = Vec::new();
        for call in &self.calls {
            if let HwCall::SetMode(m) = call {
                if modes.last() != Some(m) {
                    modes.push(*m);
                }
            }
        }
        modes
    }

    pub fn last_voltage(&self) -> Option<f64> {
        self.voltages().last().copied()
    }
}

impl FlowSensor for MockHardware {
    fn read(&mut self) -> core::result::Result<f64, IoError> {
        self.calls.push(HwCall::Read);
        self.readings.pop_front().unwrap_or(self.steady)
    }
}

impl PumpActuator for MockHardware {
    fn set_voltage(&mut self, volts: f64) -> core::result::Result<(), IoError> {
        if self.pump_fails {
            return Err(IoError::ActuatorWriteFailed);
        }
        self.calls.push(HwCall::SetVoltage(volts));
        Ok(())
    }
}

impl ValveDriver for MockHardware {
    fn set_mode(&mut self, mode: ValveMode) -> core::result::Result<(), IoError> {
        self.calls.push(HwCall::SetMode(mode));
        Ok(())
    }
}

// ── Event / result sinks ──────────────────────────────────────

#[derive(Default)]
pub struct RecordingSink {
    events: Mutex<Vec<ProcessEvent>>,
}

#[allow(dead_code)]
impl RecordingSink {
    pub fn events(&self) -> Vec<ProcessEvent> {
        self.events.lock().unwrap().clone()
    }

    pub fn count(&self, pred: impl Fn(&ProcessEvent) -> bool) -> usize {
        self.events.lock().unwrap().iter().filter(|e| pred(e)).count()
    }
}

impl EventSink for RecordingSink {
    fn emit(&self, event: &ProcessEvent) {
        self.events.lock().unwrap().push(event.clone());
    }
}

#[derive(Default)]
pub struct CollectResults {
    pub results: Vec<(ExperimentLabel, SweepResult)>,
}

impl ResultSink for CollectResults {
    fn accept(&mut self, label: &ExperimentLabel, result: SweepResult) -> Result<()> {
        self.results.push((label.clone(), result));
        Ok(())
    }
}

// ── ScriptedSweeper ───────────────────────────────────────────

/// [`SweepRunner`] that plays each sweep against the next scripted
/// transport, using the real orchestration code.
pub struct ScriptedSweeper {
    scripts: VecDeque<ScriptedTransport>,
    policy: SweepPolicy,
    /// Closed flag of every transport handed out.
    pub closed: Vec<Arc<AtomicBool>>,
    /// Lines written during each sweep.
    pub sent: Vec<Vec<String>>,
}

#[allow(dead_code)]
impl ScriptedSweeper {
    pub fn new(policy: SweepPolicy) -> Self {
        Self {
            scripts: VecDeque::new(),
            policy,
            closed: Vec::new(),
            sent: Vec::new(),
        }
    }

    pub fn push_script(&mut self, transport: ScriptedTransport) -> &mut Self {
        self.scripts.push_back(transport);
        self
    }
}

impl SweepRunner for ScriptedSweeper {
    fn run_sweep(&mut self, request: &SweepRequest) -> Result<SweepResult> {
        let transport = self.scripts.pop_front().unwrap_or_default();
        self.closed.push(transport.closed_flag());
        let mut conn = ScpiConnection::new(transport, self.policy.fetch_timeout);
        let result = sweep::run_sweep(&mut conn, request, &self.policy);
        self.sent.push(conn.transport().sent_lines());
        result
    }
}

// ── Fixtures ──────────────────────────────────────────────────

/// Millisecond timings.  The settle delay keeps Sample active for several
/// control ticks so the loop always observes it.
#[allow(dead_code)]
pub fn fast_policy() -> SweepPolicy {
    SweepPolicy {
        poll_interval: Duration::from_millis(1),
        poll_timeout: Duration::from_millis(20),
        fetch_timeout: Duration::from_millis(20),
        settle_delay: Duration::from_millis(30),
        max_completion_polls: None,
    }
}

/// Default rig configuration with every wait shrunk to milliseconds.
#[allow(dead_code)]
pub fn fast_config() -> SystemConfig {
    let mut config = SystemConfig::default();
    config.control.sample_interval = Duration::from_millis(5);
    config.process.flush_time = Duration::from_millis(30);
    config.process.homogenization_time = Duration::from_millis(30);
    config.process.loop_shutdown_timeout = Duration::from_secs(2);
    config.instrument.points = 2;
    config.instrument.poll_interval = Duration::from_millis(1);
    config.instrument.poll_timeout = Duration::from_millis(20);
    config.instrument.fetch_timeout = Duration::from_millis(20);
    config.instrument.settle_delay = Duration::ZERO;
    config
}

/// `*OPC?` pending `pending` times, then complete, then one two-point
/// trace per parameter.
#[allow(dead_code)]
pub fn sweep_script(pending: usize, parameters: usize) -> ScriptedTransport {
    let mut t = ScriptedTransport::new();
    for _ in 0..pending {
        t.push_line("0");
    }
    t.push_line("1");
    for i in 0..parameters {
        t.push_line(&format!("[1e6,{i}.1,-{i}.2],[2e6,{i}.3,-{i}.4]"));
    }
    t
}
