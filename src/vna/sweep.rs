//! Sweep orchestration.
//!
//! ```text
//!  configure ──▶ RUN ──▶ poll *OPC? ──▶ settle ──▶ fetch traces ──▶ SweepResult
//!  (IFBW, POINTS,         │  "0": sleep, poll again
//!   START, STOP)          │  timeout: sleep, wait for the late reply
//!                         └─ "1": done
//! ```
//!
//! Completion polling treats read timeouts as retryable; any other error
//! aborts the sweep.  During the trace fetch every error is fatal.

use std::thread;
use std::time::Duration;

use log::{error, info, warn};

use crate::app::ports::SweepRunner;
use crate::config::InstrumentConfig;
use crate::error::{Error, ProtocolError, Result};

use super::client::ScpiConnection;
use super::transport::{TcpTransport, Transport};
use super::{SweepRequest, SweepResult, Trace};

/// Timing knobs for one sweep.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SweepPolicy {
    /// Pause between `*OPC?` polls.
    pub poll_interval: Duration,
    /// Response timeout for each `*OPC?` poll.
    pub poll_timeout: Duration,
    /// Response timeout for each trace fetch.
    pub fetch_timeout: Duration,
    /// Wait after completion before fetching traces.
    pub settle_delay: Duration,
    /// Give up after this many incomplete polls.  `None` polls forever.
    pub max_completion_polls: Option<u32>,
}

impl Default for SweepPolicy {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(1),
            poll_timeout: Duration::from_secs(5),
            fetch_timeout: Duration::from_secs(30),
            settle_delay: Duration::from_secs(2),
            max_completion_polls: None,
        }
    }
}

// ───────────────────────────────────────────────────────────────
// Orchestration steps
// ───────────────────────────────────────────────────────────────

/// Push acquisition settings to the instrument.
pub fn configure<T: Transport>(conn: &mut ScpiConnection<T>, request: &SweepRequest) -> Result<()> {
    conn.command(&format!("VNA:ACQuisition:IFBW {}", request.ifbw))?;
    conn.command(&format!("VNA:ACQuisition:POINTS {}", request.points))?;
    conn.command(&format!("VNA:FREQuency:START {}", request.start_freq))?;
    conn.command(&format!("VNA:FREQuency:STOP {}", request.stop_freq))?;
    Ok(())
}

/// Poll `*OPC?` until the instrument reports `1`.
///
/// Returns how many polls came back incomplete (answered with something
/// other than `1`, or timed out) before completion.
pub fn wait_for_completion<T: Transport>(conn: &mut ScpiConnection<T>, policy: &SweepPolicy) -> Result<u32> {
    info!("Waiting for sweep to complete...");
    let mut pending = 0u32;
    loop {
        match conn.query("*OPC?", Some(policy.poll_timeout)) {
            Ok(reply) if reply == "1" => {
                info!("Sweep completed after {} pending poll(s)", pending);
                return Ok(pending);
            }
            Ok(_) => {}
            Err(Error::Timeout) => warn!("Timeout while polling sweep completion"),
            Err(e) => {
                error!("Unexpected error while polling sweep completion: {}", e);
                return Err(e);
            }
        }

        pending += 1;
        if policy.max_completion_polls.is_some_and(|max| pending >= max) {
            error!("Sweep still incomplete after {} polls, giving up", pending);
            return Err(ProtocolError::CompletionPollsExhausted.into());
        }
        thread::sleep(policy.poll_interval);
    }
}

/// Fetch and parse every requested trace.
///
/// The frequency column is taken from the first trace fetched; later traces
/// only contribute their real/imaginary columns and must match its length.
pub fn fetch_traces<T: Transport>(
    conn: &mut ScpiConnection<T>,
    request: &SweepRequest,
    policy: &SweepPolicy,
) -> Result<SweepResult> {
    info!("Fetching selected S-parameter data...");
    let mut result = SweepResult::default();

    for (idx, &parameter) in request.parameters_to_fetch.iter().enumerate() {
        info!("Collecting {} data...", parameter);
        let data = conn.query(
            &format!("VNA:TRACe:DATA? {}", parameter.as_str()),
            Some(policy.fetch_timeout),
        )?;
        let points = parse_trace(&data)?;

        if idx == 0 {
            result.frequency = points.iter().map(|p| p[0]).collect();
        } else if points.len() != result.frequency.len() {
            error!(
                "{} returned {} points, expected {}",
                parameter,
                points.len(),
                result.frequency.len()
            );
            return Err(ProtocolError::TraceLengthMismatch.into());
        }

        result.traces.push(Trace {
            parameter,
            real: points.iter().map(|p| p[1]).collect(),
            imag: points.iter().map(|p| p[2]).collect(),
        });
    }
    Ok(result)
}

/// Parse `[f0,re0,im0],[f1,re1,im1],...` into `[f, re, im]` triples.
pub fn parse_trace(data: &str) -> Result<Vec<[f64; 3]>> {
    let body = data.trim();
    let body = body.strip_prefix('[').unwrap_or(body);
    let body = body.strip_suffix(']').unwrap_or(body);
    if body.trim().is_empty() {
        return Err(ProtocolError::MalformedTrace.into());
    }

    body.split("],[")
        .map(|point| {
            let mut values = point.split(',').map(|v| v.trim().parse::<f64>());
            match (values.next(), values.next(), values.next(), values.next()) {
                (Some(Ok(f)), Some(Ok(re)), Some(Ok(im)), None) => Ok([f, re, im]),
                _ => Err(Error::from(ProtocolError::MalformedTrace)),
            }
        })
        .collect()
}

/// Run one full sweep over an open connection.
pub fn run_sweep<T: Transport>(
    conn: &mut ScpiConnection<T>,
    request: &SweepRequest,
    policy: &SweepPolicy,
) -> Result<SweepResult> {
    configure(conn, request)?;

    info!("Starting sweep...");
    conn.command("VNA:ACQuisition:RUN")?;
    wait_for_completion(conn, policy)?;

    info!("Waiting {:?} post-sweep to fetch data...", policy.settle_delay);
    thread::sleep(policy.settle_delay);
    fetch_traces(conn, request, policy)
}

// ───────────────────────────────────────────────────────────────
// InstrumentSweeper
// ───────────────────────────────────────────────────────────────

/// [`SweepRunner`] that opens a fresh TCP connection per sweep.
///
/// The connection lives only for the duration of [`SweepRunner::run_sweep`]
/// and is closed on every exit path.
#[derive(Debug, Clone)]
pub struct InstrumentSweeper {
    host: String,
    port: u16,
    connect_timeout: Duration,
    policy: SweepPolicy,
}

impl InstrumentSweeper {
    pub fn new(host: impl Into<String>, port: u16, connect_timeout: Duration, policy: SweepPolicy) -> Self {
        Self {
            host: host.into(),
            port,
            connect_timeout,
            policy,
        }
    }

    pub fn from_config(config: &InstrumentConfig) -> Self {
        Self::new(
            config.host.clone(),
            config.port,
            config.connect_timeout,
            config.sweep_policy(),
        )
    }

    /// Open and immediately close a connection, to fail fast at startup.
    pub fn probe(&self) -> Result<()> {
        let _conn = self.connect()?;
        info!("Instrument reachable at {}:{}", self.host, self.port);
        Ok(())
    }

    fn connect(&self) -> Result<ScpiConnection<TcpTransport>> {
        ScpiConnection::connect(
            &self.host,
            self.port,
            self.connect_timeout,
            self.policy.fetch_timeout,
        )
    }
}

impl SweepRunner for InstrumentSweeper {
    fn run_sweep(&mut self, request: &SweepRequest) -> Result<SweepResult> {
        info!("Attempting to connect to instrument...");
        let mut conn = self.connect()?;
        let result = run_sweep(&mut conn, request, &self.policy);
        if let Err(e) = &result {
            error!("Sweep failed: {}", e);
        }
        result
    }
}
