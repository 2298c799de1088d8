//! Transport abstraction — any blocking byte stream with read timeouts.
//!
//! Concrete implementations:
//! - [`TcpTransport`]: TCP socket to the instrument-control process
//! - [`ScriptedTransport`]: in-memory replay of canned reads, for tests and
//!   dry runs
//!
//! The connection and line reader are generic over `Transport`, so the
//! framing and sweep logic never touch sockets directly.

use std::collections::VecDeque;
use std::io::{self, Read, Write};
use std::net::{Shutdown, TcpStream, ToSocketAddrs};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use log::debug;

/// Blocking byte-oriented channel.
pub trait Transport {
    /// Read up to `buf.len()` bytes.  Returns `Ok(0)` only when the peer
    /// closed the stream.  A read that exceeds the configured timeout fails
    /// with `WouldBlock` or `TimedOut`.
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize>;

    /// Write all of `data`.
    fn write_all(&mut self, data: &[u8]) -> io::Result<()>;

    /// Bound how long the next `read` may block.  `None` blocks forever.
    fn set_read_timeout(&mut self, timeout: Option<Duration>) -> io::Result<()>;

    /// Close both directions of the stream.
    fn shutdown(&mut self) -> io::Result<()>;
}

// ───────────────────────────────────────────────────────────────
// TCP
// ───────────────────────────────────────────────────────────────

pub struct TcpTransport {
    stream: TcpStream,
}

impl TcpTransport {
    /// Connect to `host:port`, trying each resolved address in turn.
    pub fn connect(host: &str, port: u16, timeout: Duration) -> io::Result<Self> {
        let mut last_err = io::Error::new(io::ErrorKind::NotFound, "no addresses resolved");
        for addr in (host, port).to_socket_addrs()? {
            match TcpStream::connect_timeout(&addr, timeout) {
                Ok(stream) => {
                    stream.set_nodelay(true)?;
                    debug!("Connected to instrument at {}", addr);
                    return Ok(Self { stream });
                }
                Err(e) => last_err = e,
            }
        }
        Err(last_err)
    }
}

impl Transport for TcpTransport {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.stream.read(buf)
    }

    fn write_all(&mut self, data: &[u8]) -> io::Result<()> {
        self.stream.write_all(data)
    }

    fn set_read_timeout(&mut self, timeout: Option<Duration>) -> io::Result<()> {
        // A zero timeout is rejected by the socket API; callers check for an
        // expired deadline before getting here.
        self.stream.set_read_timeout(timeout.filter(|t| !t.is_zero()))
    }

    fn shutdown(&mut self) -> io::Result<()> {
        match self.stream.shutdown(Shutdown::Both) {
            Err(e) if e.kind() == io::ErrorKind::NotConnected => Ok(()),
            other => other,
        }
    }
}

// ───────────────────────────────────────────────────────────────
// Scripted (in-memory)
// ───────────────────────────────────────────────────────────────

/// One scripted outcome of a `read` call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScriptedRead {
    /// Deliver these bytes (possibly a partial line, possibly several lines).
    Bytes(Vec<u8>),
    /// Fail the read as if the timeout elapsed.
    Timeout,
}

/// Transport that replays a fixed script of reads and records every write.
///
/// Once the script is exhausted, further reads time out.
#[derive(Debug, Default)]
pub struct ScriptedTransport {
    reads: VecDeque<ScriptedRead>,
    written: Vec<u8>,
    closed: Arc<AtomicBool>,
}

impl ScriptedTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a chunk of bytes for a future read.
    pub fn push_bytes(&mut self, bytes: impl Into<Vec<u8>>) -> &mut Self {
        self.reads.push_back(ScriptedRead::Bytes(bytes.into()));
        self
    }

    /// Queue a complete response line (a `\n` is appended).
    pub fn push_line(&mut self, line: &str) -> &mut Self {
        self.push_bytes(format!("{line}\n"))
    }

    /// Queue a read that times out.
    pub fn push_timeout(&mut self) -> &mut Self {
        self.reads.push_back(ScriptedRead::Timeout);
        self
    }

    /// Everything written so far.
    pub fn written(&self) -> &[u8] {
        &self.written
    }

    /// Written bytes split into lines, terminators removed.
    pub fn sent_lines(&self) -> Vec<String> {
        String::from_utf8_lossy(&self.written)
            .lines()
            .map(str::to_owned)
            .collect()
    }

    /// Flag that flips to `true` once the transport has been shut down.
    /// Survives the transport being dropped.
    pub fn closed_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.closed)
    }

    /// Scripted reads not yet consumed.
    pub fn pending_reads(&self) -> usize {
        self.reads.len()
    }
}

impl Transport for ScriptedTransport {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self.reads.pop_front() {
            Some(ScriptedRead::Bytes(mut bytes)) => {
                let n = bytes.len().min(buf.len());
                buf[..n].copy_from_slice(&bytes[..n]);
                if n < bytes.len() {
                    // Oversized chunk: hand back the tail on the next read.
                    self.reads.push_front(ScriptedRead::Bytes(bytes.split_off(n)));
                }
                Ok(n)
            }
            Some(ScriptedRead::Timeout) | None => {
                Err(io::Error::new(io::ErrorKind::TimedOut, "scripted timeout"))
            }
        }
    }

    fn write_all(&mut self, data: &[u8]) -> io::Result<()> {
        if self.closed.load(Ordering::Acquire) {
            return Err(io::Error::new(io::ErrorKind::NotConnected, "transport closed"));
        }
        self.written.extend_from_slice(data);
        Ok(())
    }

    fn set_read_timeout(&mut self, _timeout: Option<Duration>) -> io::Result<()> {
        Ok(())
    }

    fn shutdown(&mut self) -> io::Result<()> {
        self.closed.store(true, Ordering::Release);
        Ok(())
    }
}
