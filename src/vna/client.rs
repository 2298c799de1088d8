//! Request/response connection to the instrument-control process.
//!
//! Two message kinds share one stream:
//!
//! - **command**: a line is sent, nothing comes back.
//! - **query**: a line is sent and exactly one response line is read.
//!
//! Every method takes `&mut self`, so a connection can never have more than
//! one query in flight.  A query whose response timed out stays owed: the
//! next query either takes that late response (same query) or drains it
//! before sending.  Dropping the connection shuts the stream down.

use std::time::Duration;

use log::{debug, warn};

use crate::error::{Error, ProtocolError, Result};

use super::codec::{LineReader, TERMINATOR};
use super::transport::{TcpTransport, Transport};

/// Default instrument-control endpoint.
pub const DEFAULT_HOST: &str = "localhost";
pub const DEFAULT_PORT: u16 = 19542;

pub struct ScpiConnection<T: Transport> {
    transport: T,
    reader: LineReader,
    /// Used when a query does not name its own timeout.
    default_timeout: Duration,
    /// Query whose response timed out and has not been read yet.
    owed: Option<String>,
}

impl ScpiConnection<TcpTransport> {
    /// Open a TCP connection.  Failure here is a hard startup error.
    pub fn connect(host: &str, port: u16, connect_timeout: Duration, default_timeout: Duration) -> Result<Self> {
        let transport = TcpTransport::connect(host, port, connect_timeout).map_err(|e| {
            warn!("Unable to reach instrument at {}:{} ({})", host, port, e);
            ProtocolError::ConnectFailed(e.kind())
        })?;
        Ok(Self::new(transport, default_timeout))
    }
}

impl<T: Transport> ScpiConnection<T> {
    pub fn new(transport: T, default_timeout: Duration) -> Self {
        Self {
            transport,
            reader: LineReader::new(),
            default_timeout,
            owed: None,
        }
    }

    /// Send a fire-and-forget command.
    pub fn command(&mut self, command: &str) -> Result<()> {
        debug!("Sending command: {}", command);
        self.send_line(command)
    }

    /// Send a query and return its response, trailing whitespace stripped.
    ///
    /// `timeout` bounds the wait for the response; `None` uses the
    /// connection's default.  On [`Error::Timeout`] the response stays owed.
    /// Repeating the same query then waits for that late response instead
    /// of sending again; a different query discards it first.
    pub fn query(&mut self, query: &str, timeout: Option<Duration>) -> Result<String> {
        let timeout = timeout.unwrap_or(self.default_timeout);
        match self.owed.take() {
            Some(pending) if pending == query => {
                debug!("Awaiting late response to: {}", query);
                return self.receive(query, timeout);
            }
            Some(pending) => {
                let stale = self.receive(&pending, timeout)?;
                debug!("Discarded late response to {}: {}", pending, preview(&stale));
            }
            None => {}
        }

        debug!("Sending query: {}", query);
        self.send_line(query)?;
        self.receive(query, timeout)
    }

    /// Whether a timed-out query's response is still expected.
    pub fn response_owed(&self) -> bool {
        self.owed.is_some()
    }

    /// Borrow the underlying transport (tests inspect scripted writes).
    pub fn transport(&self) -> &T {
        &self.transport
    }

    fn receive(&mut self, query: &str, timeout: Duration) -> Result<String> {
        let line = match self.reader.read_line(&mut self.transport, timeout) {
            Ok(line) => line,
            Err(Error::Timeout) => {
                self.owed = Some(query.to_owned());
                return Err(Error::Timeout);
            }
            Err(e) => return Err(e),
        };
        let text = String::from_utf8(line).map_err(|_| ProtocolError::NotUtf8)?;
        let response = text.trim_end();
        if response.is_empty() {
            warn!("Received empty response for query: {}", query);
            return Err(ProtocolError::EmptyResponse.into());
        }
        debug!("Received response: {}", preview(response));
        Ok(response.to_owned())
    }

    fn send_line(&mut self, line: &str) -> Result<()> {
        let mut bytes = Vec::with_capacity(line.len() + 1);
        bytes.extend_from_slice(line.as_bytes());
        bytes.push(TERMINATOR);
        self.transport
            .write_all(&bytes)
            .map_err(|e| Error::from(ProtocolError::Transport(e.kind())))
    }
}

impl<T: Transport> Drop for ScpiConnection<T> {
    fn drop(&mut self) {
        match self.transport.shutdown() {
            Ok(()) => debug!("Instrument connection closed"),
            Err(e) => warn!("Instrument connection close failed: {}", e),
        }
    }
}

/// Trace responses run to hundreds of kilobytes; log only the head.
fn preview(s: &str) -> &str {
    const MAX: usize = 80;
    match s.char_indices().nth(MAX) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}
