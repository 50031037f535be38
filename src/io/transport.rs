// src/io/transport.rs
//
// Request/reply layer over a byte link.
//
// The SP1060 answers every command with at least one CR+LF terminated line and
// sometimes with more (HARD?, SOFT?). There is no request id on the wire, so the
// only way to keep replies paired with requests is to discard everything unread
// before each command and then read exactly one line back.

use std::io;
use std::time::Duration;

use super::Link;
use crate::error::{DacError, Result};

/// Line terminator in both directions.
pub const TERMINATOR: &str = "\r\n";

/// Longest reply line accepted before the stream is considered garbage.
const MAX_LINE_LEN: usize = 4096;

pub const DEFAULT_MULTILINE_GRACE: Duration = Duration::from_millis(10);

pub struct Transport<L: Link> {
    link: L,
    /// Bytes read from the link but not yet consumed as a reply line
    pending: Vec<u8>,
    name: String,
    multiline_grace: Duration,
}

impl<L: Link> Transport<L> {
    pub fn new(link: L) -> Self {
        let name = link.describe();
        Self {
            link,
            pending: Vec::with_capacity(256),
            name,
            multiline_grace: DEFAULT_MULTILINE_GRACE,
        }
    }

    pub fn with_multiline_grace(mut self, grace: Duration) -> Self {
        self.multiline_grace = grace;
        self
    }

    pub fn describe(&self) -> &str {
        &self.name
    }

    pub fn link(&self) -> &L {
        &self.link
    }

    pub fn link_mut(&mut self) -> &mut L {
        &mut self.link
    }

    pub fn into_inner(self) -> L {
        self.link
    }

    /// Discard every unread byte, both locally buffered and queued in the link.
    /// Returns how many locally buffered bytes were thrown away.
    pub fn drain_input(&mut self) -> Result<usize> {
        let stale = self.pending.len();
        if stale > 0 {
            tlog!(
                "[transport] {} discarding {} unread bytes: {:?}",
                self.name,
                stale,
                String::from_utf8_lossy(&self.pending)
            );
            self.pending.clear();
        }
        self.link.clear_input().map_err(|e| self.map_io(e, "drain"))?;
        Ok(stale)
    }

    /// Drain, write `cmd` + CR+LF, and return the single reply line (terminator stripped).
    pub fn send_command(&mut self, cmd: &str) -> Result<String> {
        self.drain_input()?;
        self.write_line(cmd)?;
        self.read_line(cmd)
    }

    /// Issue a command whose reply spans several lines and return the line that
    /// follows the immediate reply. Whatever the instrument is still sending is
    /// drained after the grace period, even when the read fails.
    pub fn query_multiline(&mut self, cmd: &str) -> Result<String> {
        let cycle = DrainOnDrop { transport: self };
        cycle.transport.send_command(cmd)?;
        cycle.transport.read_line(cmd)
    }

    fn write_line(&mut self, cmd: &str) -> Result<()> {
        let mut line = String::with_capacity(cmd.len() + TERMINATOR.len());
        line.push_str(cmd);
        line.push_str(TERMINATOR);

        self.link
            .write_all(line.as_bytes())
            .and_then(|_| self.link.flush())
            .map_err(|e| self.map_io(e, cmd))
    }

    /// Read one CR+LF terminated line. `operation` names the command in errors.
    pub fn read_line(&mut self, operation: &str) -> Result<String> {
        let mut chunk = [0u8; 256];
        loop {
            if let Some(pos) = find_terminator(&self.pending) {
                let line: Vec<u8> = self.pending.drain(..pos + TERMINATOR.len()).take(pos).collect();
                return String::from_utf8(line).map_err(|_| {
                    DacError::protocol(&self.name, format!("non-ASCII reply to {}", operation))
                });
            }

            if self.pending.len() > MAX_LINE_LEN {
                self.pending.clear();
                return Err(DacError::protocol(
                    &self.name,
                    format!("reply to {} exceeds {} bytes without terminator", operation, MAX_LINE_LEN),
                ));
            }

            match self.link.read(&mut chunk) {
                Ok(0) => {
                    return Err(DacError::connection(
                        &self.name,
                        format!("connection closed while waiting for reply to {}", operation),
                    ))
                }
                Ok(n) => self.pending.extend_from_slice(&chunk[..n]),
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(self.map_io(e, operation)),
            }
        }
    }

    fn map_io(&self, e: io::Error, operation: &str) -> DacError {
        match e.kind() {
            io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock => {
                DacError::timeout(&self.name, operation)
            }
            io::ErrorKind::UnexpectedEof
            | io::ErrorKind::BrokenPipe
            | io::ErrorKind::ConnectionReset
            | io::ErrorKind::ConnectionAborted
            | io::ErrorKind::NotConnected => DacError::connection(&self.name, e.to_string()),
            _ => DacError::Io(e),
        }
    }
}

/// Scoped command cycle: waits out the grace period and drains on the way out.
struct DrainOnDrop<'a, L: Link> {
    transport: &'a mut Transport<L>,
}

impl<L: Link> Drop for DrainOnDrop<'_, L> {
    fn drop(&mut self) {
        std::thread::sleep(self.transport.multiline_grace);
        if let Err(e) = self.transport.drain_input() {
            tlog!("[transport] {} drain after multi-line reply failed: {}", self.transport.name, e);
        }
    }
}

fn find_terminator(buf: &[u8]) -> Option<usize> {
    buf.windows(TERMINATOR.len())
        .position(|w| w == TERMINATOR.as_bytes())
}

// ============================================================================
// Tests
// ============================================================================
