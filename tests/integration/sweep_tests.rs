//! Sweeps over real TCP against a loopback fake instrument.

use std::io::{BufRead, BufReader, Write};
use std::net::{TcpListener, TcpStream};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use flowsweep::app::ports::SweepRunner;
use flowsweep::config::InstrumentConfig;
use flowsweep::error::{Error, ProtocolError};
use flowsweep::vna::SParameter;
use flowsweep::vna::sweep::InstrumentSweeper;

/// Answers `*OPC?` with `pending` zeros before completing, and every trace
/// query with a three-point trace.  Returns the lines received on each
/// accepted connection.
fn fake_instrument(connections: usize, pending: usize) -> (u16, JoinHandle<Vec<Vec<String>>>) {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let port = listener.local_addr().unwrap().port();
    let handle = thread::spawn(move || {
        (0..connections)
            .map(|_| {
                let (stream, _) = listener.accept().unwrap();
                serve(stream, pending)
            })
            .collect()
    });
    (port, handle)
}

fn serve(stream: TcpStream, pending: usize) -> Vec<String> {
    let mut writer = stream.try_clone().unwrap();
    let mut received = Vec::new();
    let mut polls = 0;
    for line in BufReader::new(stream).lines() {
        let Ok(line) = line else { break };
        let reply = if line == "*OPC?" {
            polls += 1;
            Some(if polls > pending { "1".to_owned() } else { "0".to_owned() })
        } else if line.starts_with("VNA:TRACe:DATA?") {
            Some("[1e6,0.5,-0.5],[2e6,0.25,-0.25],[3e6,0.125,-0.125]".to_owned())
        } else {
            None
        };
        if let Some(reply) = reply {
            writer.write_all(format!("{reply}\n").as_bytes()).unwrap();
        }
        received.push(line);
    }
    received
}

fn config(port: u16) -> InstrumentConfig {
    InstrumentConfig {
        host: "127.0.0.1".to_owned(),
        port,
        points: 3,
        connect_timeout: Duration::from_secs(1),
        fetch_timeout: Duration::from_secs(1),
        poll_timeout: Duration::from_millis(200),
        poll_interval: Duration::from_millis(1),
        settle_delay: Duration::ZERO,
        ..InstrumentConfig::default()
    }
}

#[test]
fn probe_connects_and_disconnects() {
    let (port, server) = fake_instrument(1, 0);

    InstrumentSweeper::from_config(&config(port)).probe().unwrap();

    let received = server.join().unwrap();
    assert!(received[0].is_empty());
}

#[test]
fn full_sweep_over_tcp() {
    let (port, server) = fake_instrument(1, 2);
    let config = config(port);
    let mut sweeper = InstrumentSweeper::from_config(&config);

    let result = sweeper.run_sweep(&config.sweep_request()).unwrap();

    assert_eq!(result.frequency, vec![1e6, 2e6, 3e6]);
    assert_eq!(result.traces.len(), 4);
    assert_eq!(result.trace(SParameter::S22).unwrap().imag, vec![-0.5, -0.25, -0.125]);

    // The server only returns once the client has closed the socket.
    let received = server.join().unwrap().remove(0);
    assert_eq!(
        &received[..5],
        &[
            "VNA:ACQuisition:IFBW 100",
            "VNA:ACQuisition:POINTS 3",
            "VNA:FREQuency:START 0",
            "VNA:FREQuency:STOP 6000000000",
            "VNA:ACQuisition:RUN"
        ]
    );
    assert_eq!(received.iter().filter(|l| *l == "*OPC?").count(), 3);
    assert_eq!(received.last().map(String::as_str), Some("VNA:TRACe:DATA? S22"));
}

#[test]
fn each_sweep_uses_a_fresh_connection() {
    let (port, server) = fake_instrument(2, 0);
    let config = config(port);
    let mut sweeper = InstrumentSweeper::from_config(&config);

    sweeper.run_sweep(&config.sweep_request()).unwrap();
    sweeper.run_sweep(&config.sweep_request()).unwrap();

    let connections = server.join().unwrap();
    assert_eq!(connections.len(), 2);
    assert!(connections.iter().all(|c| c.contains(&"VNA:ACQuisition:RUN".to_owned())));
}

#[test]
fn unreachable_instrument_is_a_connect_failure() {
    // Bind then drop to get a port nothing is listening on.
    let port = TcpListener::bind("127.0.0.1:0").unwrap().local_addr().unwrap().port();

    let err = InstrumentSweeper::from_config(&config(port)).probe().unwrap_err();

    assert!(matches!(err, Error::Protocol(ProtocolError::ConnectFailed(_))));
}
