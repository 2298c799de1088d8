//! Flow control loop against mock hardware.

use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use flowsweep::app::events::{ProcessEvent, TelemetryData};
use flowsweep::config::ControlParameters;
use flowsweep::control::flow_loop::FlowControlLoop;
use flowsweep::drivers::valve::ValveMode;
use flowsweep::error::IoError;
use flowsweep::fsm::context::{Setpoint, SharedProcessState};

use crate::mock_hw::{HwCall, MockHardware, RecordingSink};

fn setup(voltage: f64, target: f64, mode: ValveMode) -> (FlowControlLoop, Arc<SharedProcessState>, Arc<RecordingSink>) {
    let state = Arc::new(SharedProcessState::new(voltage, target));
    state.set_setpoint(Setpoint {
        target_flow: target,
        valve_mode: mode,
    });
    let sink = Arc::new(RecordingSink::default());
    let params = ControlParameters {
        sample_interval: Duration::from_millis(5),
        ..ControlParameters::default()
    };
    (FlowControlLoop::new(params, Arc::clone(&state), sink.clone()), state, sink)
}

#[test]
fn below_target_raises_voltage_by_gain_times_error() {
    let (cl, state, _) = setup(50.0, 0.4, ValveMode::Sample);
    let mut hw = MockHardware::steady(0.1);

    cl.tick(&mut hw);

    // Sensor, then pump, then valves.
    match hw.calls.as_slice() {
        [HwCall::Read, HwCall::SetVoltage(v), HwCall::SetMode(ValveMode::Sample)] => {
            assert!((v - 56.0).abs() < 1e-9);
        }
        other => panic!("unexpected call order: {other:?}"),
    }
    assert!((state.snapshot().current_voltage - 56.0).abs() < 1e-9);
}

#[test]
fn sensor_failure_is_treated_as_zero_flow() {
    let (cl, state, sink) = setup(10.0, 0.4, ValveMode::Sample);
    let mut hw = MockHardware::failing_sensor();

    let step = cl.tick(&mut hw);

    assert_eq!(step.error, 0.4);
    assert!((hw.voltages()[0] - 18.0).abs() < 1e-9);
    assert_eq!(state.snapshot().current_flow, None);
    assert_eq!(
        sink.count(|e| matches!(e, ProcessEvent::Telemetry(TelemetryData { flow: None, .. }))),
        1
    );
}

#[test]
fn reading_inside_deadband_leaves_pump_alone() {
    let (cl, state, _) = setup(42.0, 0.4, ValveMode::Sample);
    let mut hw = MockHardware::steady(0.45);

    for _ in 0..3 {
        cl.tick(&mut hw);
    }

    assert!(hw.voltages().is_empty());
    assert_eq!(state.snapshot().current_voltage, 42.0);
    // Valves are re-asserted every tick regardless.
    assert_eq!(
        hw.calls.iter().filter(|c| matches!(c, HwCall::SetMode(_))).count(),
        3
    );
}

#[test]
fn saturates_at_voltage_max() {
    let (cl, _, _) = setup(95.0, 1.0, ValveMode::Flush);
    let mut hw = MockHardware::steady(0.0);

    cl.tick(&mut hw);
    cl.tick(&mut hw);

    assert_eq!(hw.voltages(), vec![100.0, 100.0]);
}

#[test]
fn pump_failure_is_absorbed_and_retried_next_tick() {
    let (cl, state, _) = setup(10.0, 1.0, ValveMode::Flush);
    let mut hw = MockHardware::steady(0.0);
    hw.pump_fails = true;

    cl.tick(&mut hw);
    assert_eq!(state.snapshot().current_voltage, 10.0);

    hw.pump_fails = false;
    cl.tick(&mut hw);
    assert_eq!(hw.voltages(), vec![30.0]);
}

#[test]
fn setpoint_change_is_picked_up_on_next_tick() {
    let (cl, state, _) = setup(0.0, 1.0, ValveMode::Flush);
    let mut hw = MockHardware::steady(1.0);

    cl.tick(&mut hw);
    state.set_setpoint(Setpoint {
        target_flow: 1.0,
        valve_mode: ValveMode::Homogenize,
    });
    cl.tick(&mut hw);

    assert_eq!(hw.mode_changes(), vec![ValveMode::Flush, ValveMode::Homogenize]);
}

#[test]
fn recovers_after_transient_sensor_error() {
    let (cl, state, _) = setup(20.0, 0.4, ValveMode::Sample);
    let mut hw = MockHardware::steady(0.4).then_read(Err(IoError::SensorReadFailed));

    cl.tick(&mut hw);
    assert_eq!(state.snapshot().current_flow, None);
    cl.tick(&mut hw);
    assert_eq!(state.snapshot().current_flow, Some(0.4));
}

#[test]
fn run_stops_promptly_after_terminate() {
    let (cl, state, sink) = setup(0.0, 0.4, ValveMode::Sample);
    let handle = thread::spawn(move || cl.run(MockHardware::steady(0.4)));

    thread::sleep(Duration::from_millis(40));
    let asked = Instant::now();
    state.request_terminate();
    let hw = handle.join().unwrap();

    assert!(asked.elapsed() < Duration::from_secs(1));
    assert!(hw.calls.contains(&HwCall::Read));
    assert!(sink.count(|e| matches!(e, ProcessEvent::Telemetry(_))) >= 1);
}
