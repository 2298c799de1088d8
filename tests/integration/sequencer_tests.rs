//! Full experiment runs: sequencer + control loop + scripted instrument.

use std::io;
use std::sync::atomic::Ordering;
use std::sync::mpsc::{self, Receiver};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use flowsweep::app::events::{ExperimentLabel, ProcessEvent};
use flowsweep::app::ports::{FlowSensor, PumpActuator, ResultSink, ValveDriver};
use flowsweep::app::service::ExperimentRunner;
use flowsweep::config::StabilityGate;
use flowsweep::drivers::valve::ValveMode;
use flowsweep::error::{Error, IoError, ProtocolError, Result};
use flowsweep::fsm::context::SharedProcessState;
use flowsweep::fsm::{ProcessSequencer, SequencerState};
use flowsweep::vna::{SParameter, SweepResult};
use flowsweep::vna::transport::ScriptedTransport;

use crate::mock_hw::{CollectResults, MockHardware, RecordingSink, ScriptedSweeper, fast_config, fast_policy, sweep_script};

fn label() -> ExperimentLabel {
    ExperimentLabel::new("IPA", 10.0, 1)
}

fn sequencer(sweeper: ScriptedSweeper) -> (ProcessSequencer<ScriptedSweeper>, Arc<RecordingSink>) {
    let config = fast_config();
    let state = Arc::new(SharedProcessState::from_config(&config.control, &config.process));
    let sink = Arc::new(RecordingSink::default());
    (ProcessSequencer::new(&config, state, sink.clone(), sweeper), sink)
}

#[test]
fn full_run_sweeps_once_and_returns_to_idle() {
    let mut sweeper = ScriptedSweeper::new(fast_policy());
    sweeper.push_script(sweep_script(3, 4));
    let (mut seq, sink) = sequencer(sweeper);
    let mut results = CollectResults::default();

    let outcome = seq.run(MockHardware::steady(0.4), &label(), &mut results);

    let summary = outcome.result.unwrap();
    assert_eq!((summary.points, summary.parameters), (2, 4));
    assert_eq!(seq.current_state(), SequencerState::Idle);

    // Instrument conversation: configure, run, 4 polls, 4 fetches in order.
    let sent = &seq.runner().sent[0];
    assert_eq!(sent[4], "VNA:ACQuisition:RUN");
    assert_eq!(sent.iter().filter(|l| *l == "*OPC?").count(), 4);
    assert_eq!(
        &sent[9..],
        &[
            "VNA:TRACe:DATA? S21",
            "VNA:TRACe:DATA? S11",
            "VNA:TRACe:DATA? S12",
            "VNA:TRACe:DATA? S22"
        ]
    );
    assert!(seq.runner().closed[0].load(Ordering::Acquire));

    // Result carries the label and the first trace's frequency column.
    let (got_label, result) = &results.results[0];
    assert_eq!(got_label, &label());
    assert_eq!(result.frequency, vec![1e6, 2e6]);
    assert_eq!(result.trace(SParameter::S11).unwrap().real, vec![1.1, 1.3]);

    // Hardware: phases in order, pump zeroed at the end.
    let hw = outcome.hardware.unwrap();
    assert_eq!(
        hw.mode_changes(),
        vec![ValveMode::Flush, ValveMode::Homogenize, ValveMode::Sample, ValveMode::Flush]
    );
    assert_eq!(hw.last_voltage(), Some(0.0));

    // Shared state was reset.
    let snap = seq.shared_state().snapshot();
    assert!(!snap.terminate);
    assert_eq!(snap.current_voltage, 0.0);
    assert!(!seq.shared_state().session_active());

    assert_eq!(sink.count(|e| matches!(e, ProcessEvent::RunFinished { .. })), 1);
    assert_eq!(sink.count(|e| matches!(e, ProcessEvent::PhaseCompleted { .. })), 4);
}

#[test]
fn sweep_failure_closes_connection_zeroes_pump_and_surfaces_error() {
    let mut broken = ScriptedTransport::new();
    broken.push_line("1").push_line("not a trace");
    let mut sweeper = ScriptedSweeper::new(fast_policy());
    sweeper.push_script(broken);
    let (mut seq, sink) = sequencer(sweeper);
    let mut results = CollectResults::default();

    let outcome = seq.run(MockHardware::steady(0.0), &label(), &mut results);

    assert_eq!(outcome.result.unwrap_err(), Error::Protocol(ProtocolError::MalformedTrace));
    assert!(results.results.is_empty());
    assert!(seq.runner().closed[0].load(Ordering::Acquire));

    let hw = outcome.hardware.unwrap();
    assert_eq!(hw.last_voltage(), Some(0.0));
    // No final flush after a failed sweep.
    assert_eq!(
        hw.mode_changes(),
        vec![ValveMode::Flush, ValveMode::Homogenize, ValveMode::Sample]
    );
    assert_eq!(sink.count(|e| matches!(e, ProcessEvent::SweepFailed(_))), 1);
    assert_eq!(seq.current_state(), SequencerState::Idle);
}

#[test]
fn fetch_timeout_is_fatal() {
    let mut t = ScriptedTransport::new();
    t.push_line("1").push_timeout();
    let mut sweeper = ScriptedSweeper::new(fast_policy());
    sweeper.push_script(t);
    let (mut seq, _) = sequencer(sweeper);

    let outcome = seq.run(MockHardware::steady(0.0), &label(), &mut CollectResults::default());

    assert_eq!(outcome.result.unwrap_err(), Error::Timeout);
    assert_eq!(outcome.hardware.unwrap().last_voltage(), Some(0.0));
}

#[test]
fn concurrent_session_is_rejected() {
    let (mut seq, _) = sequencer(ScriptedSweeper::new(fast_policy()));
    let shared = Arc::clone(seq.shared_state());
    let _held = shared.claim_session().unwrap();

    let outcome = seq.run(MockHardware::steady(0.0), &label(), &mut CollectResults::default());

    assert_eq!(outcome.result.unwrap_err(), Error::SessionBusy);
    assert!(outcome.hardware.unwrap().calls.is_empty());
}

#[test]
fn stability_gate_waits_for_settled_flow() {
    let mut config = fast_config();
    config.process.stability_gate = Some(StabilityGate {
        tolerance: 0.05,
        hold: Duration::from_millis(20),
        timeout: Duration::from_secs(2),
    });
    let mut sweeper = ScriptedSweeper::new(fast_policy());
    sweeper.push_script(sweep_script(0, 4));
    let sink = Arc::new(RecordingSink::default());
    let mut runner = ExperimentRunner::new(config, sink.clone(), sweeper).unwrap();

    let outcome = runner.run_one(MockHardware::steady(0.4), &label(), &mut CollectResults::default());

    assert!(outcome.result.is_ok());
    assert_eq!(sink.count(|e| matches!(e, ProcessEvent::FlowStable { .. })), 1);
    assert_eq!(sink.count(|e| matches!(e, ProcessEvent::FlowUnstable { .. })), 0);
}

#[test]
fn stability_gate_times_out_and_sweeps_anyway() {
    let mut config = fast_config();
    config.process.stability_gate = Some(StabilityGate {
        tolerance: 0.01,
        hold: Duration::from_millis(10),
        timeout: Duration::from_millis(50),
    });
    let mut sweeper = ScriptedSweeper::new(fast_policy());
    sweeper.push_script(sweep_script(0, 4));
    let sink = Arc::new(RecordingSink::default());
    let mut runner = ExperimentRunner::new(config, sink.clone(), sweeper).unwrap();

    // Flow never reaches the 0.4 ml/min sample target.
    let outcome = runner.run_one(MockHardware::steady(2.0), &label(), &mut CollectResults::default());

    assert!(outcome.result.is_ok());
    assert_eq!(sink.count(|e| matches!(e, ProcessEvent::FlowUnstable { .. })), 1);
}

#[test]
fn batch_numbers_experiments_and_resets_between_runs() {
    let mut sweeper = ScriptedSweeper::new(fast_policy());
    sweeper.push_script(sweep_script(1, 4)).push_script(sweep_script(0, 4));
    let sink = Arc::new(RecordingSink::default());
    let mut runner = ExperimentRunner::new(fast_config(), sink.clone(), sweeper).unwrap();
    let mut results = CollectResults::default();

    let outcome = runner.run_batch(MockHardware::steady(0.4), &label(), 2, &mut results);

    assert!(outcome.is_success());
    let numbers: Vec<_> = results.results.iter().map(|(l, _)| l.experiment_number).collect();
    assert_eq!(numbers, vec![1, 2]);
    assert_eq!(sink.count(|e| matches!(e, ProcessEvent::RunStarted(_))), 2);
    assert!(runner.sequencer().runner().closed.iter().all(|c| c.load(Ordering::Acquire)));
}

struct RejectingResults;

impl ResultSink for RejectingResults {
    fn accept(&mut self, _label: &ExperimentLabel, _result: SweepResult) -> Result<()> {
        Err(Error::Storage(io::ErrorKind::PermissionDenied))
    }
}

#[test]
fn unstored_result_still_flushes_the_line() {
    let mut sweeper = ScriptedSweeper::new(fast_policy());
    sweeper.push_script(sweep_script(0, 4));
    let (mut seq, sink) = sequencer(sweeper);

    let outcome = seq.run(MockHardware::steady(0.4), &label(), &mut RejectingResults);

    assert_eq!(
        outcome.result.unwrap_err(),
        Error::Storage(io::ErrorKind::PermissionDenied)
    );
    let hw = outcome.hardware.unwrap();
    assert_eq!(
        hw.mode_changes(),
        vec![ValveMode::Flush, ValveMode::Homogenize, ValveMode::Sample, ValveMode::Flush]
    );
    assert_eq!(hw.last_voltage(), Some(0.0));
    assert_eq!(sink.count(|e| matches!(e, ProcessEvent::PhaseCompleted { .. })), 4);
}

/// Rig whose valve write blocks until the test lets go, so the loop
/// cannot notice `terminate` in time.  Pump commands outlive the rig.
struct StuckValves {
    volts: Arc<Mutex<Vec<f64>>>,
    release: Receiver<()>,
}

impl FlowSensor for StuckValves {
    fn read(&mut self) -> core::result::Result<f64, IoError> {
        Ok(0.0)
    }
}

impl PumpActuator for StuckValves {
    fn set_voltage(&mut self, volts: f64) -> core::result::Result<(), IoError> {
        self.volts.lock().unwrap().push(volts);
        Ok(())
    }
}

impl ValveDriver for StuckValves {
    fn set_mode(&mut self, _mode: ValveMode) -> core::result::Result<(), IoError> {
        // Returns immediately once the sender is dropped.
        let _ = self.release.recv();
        Ok(())
    }
}

#[test]
fn loop_that_misses_shutdown_deadline_still_zeroes_pump() {
    let mut config = fast_config();
    config.process.loop_shutdown_timeout = Duration::from_millis(20);
    let state = Arc::new(SharedProcessState::from_config(&config.control, &config.process));
    let mut sweeper = ScriptedSweeper::new(fast_policy());
    sweeper.push_script(sweep_script(0, 4));
    let mut seq = ProcessSequencer::new(&config, state, Arc::new(RecordingSink::default()), sweeper);

    let volts = Arc::new(Mutex::new(Vec::new()));
    let (release_tx, release_rx) = mpsc::channel();
    let hw = StuckValves {
        volts: Arc::clone(&volts),
        release: release_rx,
    };

    let outcome = seq.run(hw, &label(), &mut CollectResults::default());

    assert_eq!(outcome.result.unwrap_err(), Error::LoopShutdownTimeout);
    assert!(outcome.hardware.is_none());
    assert_ne!(volts.lock().unwrap().last(), Some(&0.0));

    drop(release_tx);
    let deadline = Instant::now() + Duration::from_secs(2);
    while volts.lock().unwrap().last() != Some(&0.0) {
        assert!(Instant::now() < deadline, "pump never zeroed: {:?}", volts.lock().unwrap());
        thread::sleep(Duration::from_millis(5));
    }
}
