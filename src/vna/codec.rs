//! Newline line framing.
//!
//! Wire format: ASCII text, each message terminated by a single `\n`.
//!
//! The reader accumulates incoming bytes and yields complete lines.  This
//! handles partial reads gracefully: a single `Transport::read` may return
//! part of a line, exactly one line, or a line plus the start of the next.
//! Bytes past the terminator stay buffered for the following call.

use std::io;
use std::time::{Duration, Instant};

use crate::error::{Error, ProtocolError, Result};

use super::transport::Transport;

/// Line terminator.
pub const TERMINATOR: u8 = b'\n';

/// Size of each transport read.
const CHUNK_SIZE: usize = 4096;

/// Upper bound on a buffered line.  A 10 000-point trace is well under 1 MiB.
const MAX_LINE_LEN: usize = 16 * 1024 * 1024;

/// Buffering line reader over a [`Transport`].
#[derive(Debug, Default)]
pub struct LineReader {
    buf: Vec<u8>,
}

impl LineReader {
    pub fn new() -> Self {
        Self::default()
    }

    /// Read one line, terminator included.
    ///
    /// Blocks until a `\n` is buffered or `timeout` elapses across all the
    /// reads the line takes.  On timeout any partial line stays buffered.
    pub fn read_line<T: Transport>(&mut self, transport: &mut T, timeout: Duration) -> Result<Vec<u8>> {
        let deadline = Instant::now() + timeout;
        let mut scanned = 0;
        let mut chunk = [0u8; CHUNK_SIZE];

        loop {
            if let Some(pos) = self.buf[scanned..].iter().position(|&b| b == TERMINATOR) {
                let end = scanned + pos + 1;
                return Ok(self.buf.drain(..end).collect());
            }
            scanned = self.buf.len();
            if scanned > MAX_LINE_LEN {
                return Err(ProtocolError::LineTooLong.into());
            }

            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Err(Error::Timeout);
            }
            transport
                .set_read_timeout(Some(remaining))
                .map_err(|e| ProtocolError::Transport(e.kind()))?;

            match transport.read(&mut chunk) {
                Ok(0) => return Err(ProtocolError::ConnectionClosed.into()),
                Ok(n) => self.buf.extend_from_slice(&chunk[..n]),
                Err(e) if is_timeout(&e) => return Err(Error::Timeout),
                Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
                Err(e) => return Err(ProtocolError::Transport(e.kind()).into()),
            }
        }
    }

    /// Bytes received but not yet returned as part of a line.
    pub fn buffered(&self) -> &[u8] {
        &self.buf
    }

    /// Drop any buffered bytes (e.g. after a transport reconnect).
    pub fn reset(&mut self) {
        self.buf.clear();
    }
}

fn is_timeout(e: &io::Error) -> bool {
    matches!(e.kind(), io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut)
}
