//! Unified error types for the flow-control rig.
//!
//! A single `Error` enum that every subsystem converts into, so the
//! sequencer and the binary can handle failures uniformly.  Variants are
//! `Copy` so they can be carried inside process events without allocation.
//!
//! Propagation policy:
//!
//! - [`IoError`] is absorbed inside the control loop (logged, loop continues).
//! - [`ProtocolError`] and [`Error::Timeout`] escalate out of a sweep to the
//!   sequencer, which still closes the connection and stops the pump.
//! - [`ConfigError`] is either a startup failure (invalid configuration) or,
//!   for an unknown valve mode, a logged no-op.

use core::fmt;
use std::io;

// ---------------------------------------------------------------------------
// Top-level error
// ---------------------------------------------------------------------------

/// Every fallible operation in the crate funnels into this type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Error {
    /// Sensor, pump or valve I/O failed.
    Io(IoError),
    /// The instrument sent an empty or malformed response, or the link broke.
    Protocol(ProtocolError),
    /// A protocol read exceeded its deadline.
    Timeout,
    /// Configuration is invalid or could not be loaded.
    Config(ConfigError),
    /// Another sequencer session already owns the shared process state.
    SessionBusy,
    /// The control loop did not exit within the shutdown timeout.
    LoopShutdownTimeout,
    /// Writing a result file failed.
    Storage(io::ErrorKind),
    /// A worker thread could not be started.
    ThreadSpawnFailed(&'static str),
    /// A worker thread panicked.
    ThreadPanicked(&'static str),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Io(e) => write!(f, "io: {e}"),
            Self::Protocol(e) => write!(f, "protocol: {e}"),
            Self::Timeout => write!(f, "timed out waiting for instrument response"),
            Self::Config(e) => write!(f, "config: {e}"),
            Self::SessionBusy => write!(f, "a process session is already running"),
            Self::LoopShutdownTimeout => write!(f, "control loop did not stop in time"),
            Self::Storage(kind) => write!(f, "result storage failed ({kind})"),
            Self::ThreadSpawnFailed(name) => write!(f, "could not start {name} thread"),
            Self::ThreadPanicked(name) => write!(f, "{name} thread panicked"),
        }
    }
}

impl std::error::Error for Error {}

// ---------------------------------------------------------------------------
// Hardware I/O errors
// ---------------------------------------------------------------------------

/// Transient hardware failures.  Never fatal to the control loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IoError {
    /// Flow sensor read failed (bus error, CRC, not measuring).
    SensorReadFailed,
    /// Pump driver rejected or failed a voltage command.
    ActuatorWriteFailed,
    /// A valve output could not be driven.
    ValveWriteFailed,
}

impl fmt::Display for IoError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::SensorReadFailed => write!(f, "flow sensor read failed"),
            Self::ActuatorWriteFailed => write!(f, "pump actuator write failed"),
            Self::ValveWriteFailed => write!(f, "valve output write failed"),
        }
    }
}

impl std::error::Error for IoError {}

impl From<IoError> for Error {
    fn from(e: IoError) -> Self {
        Self::Io(e)
    }
}

// ---------------------------------------------------------------------------
// Instrument protocol errors
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProtocolError {
    /// Could not open the connection to the instrument-control process.
    ConnectFailed(io::ErrorKind),
    /// The underlying stream failed mid-session.
    Transport(io::ErrorKind),
    /// The peer closed the connection while a response was pending.
    ConnectionClosed,
    /// A query returned an empty line.
    EmptyResponse,
    /// A response line was not valid UTF-8.
    NotUtf8,
    /// A response line grew past the reader's limit without a terminator.
    LineTooLong,
    /// Trace data did not parse as `[f,re,im],...` triples.
    MalformedTrace,
    /// A trace had a different point count than the first one fetched.
    TraceLengthMismatch,
    /// Sweep completion polling hit its configured bound.
    CompletionPollsExhausted,
}

impl fmt::Display for ProtocolError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ConnectFailed(kind) => write!(f, "connect failed ({kind})"),
            Self::Transport(kind) => write!(f, "transport error ({kind})"),
            Self::ConnectionClosed => write!(f, "connection closed by peer"),
            Self::EmptyResponse => write!(f, "empty response"),
            Self::NotUtf8 => write!(f, "response is not valid UTF-8"),
            Self::LineTooLong => write!(f, "response line too long"),
            Self::MalformedTrace => write!(f, "malformed trace data"),
            Self::TraceLengthMismatch => write!(f, "trace length mismatch"),
            Self::CompletionPollsExhausted => write!(f, "sweep did not complete"),
        }
    }
}

impl std::error::Error for ProtocolError {}

impl From<ProtocolError> for Error {
    fn from(e: ProtocolError) -> Self {
        Self::Protocol(e)
    }
}

// ---------------------------------------------------------------------------
// Configuration errors
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigError {
    /// Stored configuration failed to deserialize.
    Corrupted,
    /// A field failed range validation.  The message names the field.
    ValidationFailed(&'static str),
    /// The backing file could not be read or written.
    IoError,
    /// A valve mode name did not match any known mode.
    UnknownValveMode,
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Corrupted => write!(f, "config file is not valid JSON for this schema"),
            Self::ValidationFailed(msg) => write!(f, "validation failed: {msg}"),
            Self::IoError => write!(f, "config file could not be read or written"),
            Self::UnknownValveMode => write!(f, "unknown valve mode"),
        }
    }
}

impl std::error::Error for ConfigError {}

impl From<ConfigError> for Error {
    fn from(e: ConfigError) -> Self {
        Self::Config(e)
    }
}

// ---------------------------------------------------------------------------
// Convenience Result alias
// ---------------------------------------------------------------------------

/// Crate-wide `Result` alias.
pub type Result<T> = core::result::Result<T, Error>;
