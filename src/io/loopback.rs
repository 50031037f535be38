// src/io/loopback.rs
//
// In-memory link driven by a responder closure. Lets code built on the driver
// run without hardware: every CR+LF terminated line written to the link is
// recorded and handed to the responder, whose reply lines become readable input.

use std::collections::VecDeque;
use std::io::{self, Read, Write};
use std::sync::{Arc, Mutex, MutexGuard};

use super::Link;

pub type Responder = Box<dyn FnMut(&str) -> Vec<String> + Send>;

#[derive(Default)]
struct Shared {
    commands: Vec<String>,
    input: VecDeque<u8>,
    clears: usize,
    closed: bool,
}

/// Inspection handle that stays valid after the link has been moved into a transport.
#[derive(Clone, Default)]
pub struct LoopbackHandle {
    shared: Arc<Mutex<Shared>>,
}

impl LoopbackHandle {
    fn lock(&self) -> MutexGuard<'_, Shared> {
        // A panicking responder poisons the lock; the log is still worth reading.
        self.shared.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Every command line written so far, without terminators.
    pub fn commands(&self) -> Vec<String> {
        self.lock().commands.clone()
    }

    pub fn command_count(&self) -> usize {
        self.lock().commands.len()
    }

    /// Forget the recorded commands (the input queue is left alone).
    pub fn clear_commands(&self) {
        self.lock().commands.clear();
    }

    /// Number of times the input buffer was cleared.
    pub fn clears(&self) -> usize {
        self.lock().clears
    }

    /// Queue unsolicited bytes, as if the instrument had sent them on its own.
    pub fn inject(&self, bytes: &[u8]) {
        self.lock().input.extend(bytes.iter().copied());
    }

    pub fn pending_input(&self) -> usize {
        self.lock().input.len()
    }

    /// Simulate the instrument hanging up: later commands get no reply, and once
    /// queued input is used up reads return EOF.
    pub fn close(&self) {
        self.lock().closed = true;
    }
}

pub struct LoopbackLink {
    responder: Responder,
    handle: LoopbackHandle,
    line_buf: Vec<u8>,
    max_chunk: usize,
}

impl LoopbackLink {
    pub fn new<F>(responder: F) -> (Self, LoopbackHandle)
    where
        F: FnMut(&str) -> Vec<String> + Send + 'static,
    {
        let handle = LoopbackHandle::default();
        let link = Self {
            responder: Box::new(responder),
            handle: handle.clone(),
            line_buf: Vec::new(),
            max_chunk: usize::MAX,
        };
        (link, handle)
    }

    /// Deliver at most `n` bytes per read, to exercise partial-read handling.
    pub fn with_max_chunk(mut self, n: usize) -> Self {
        self.max_chunk = n.max(1);
        self
    }
}

impl Read for LoopbackLink {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let mut shared = self.handle.lock();
        if shared.input.is_empty() {
            if shared.closed {
                return Ok(0);
            }
            return Err(io::Error::new(io::ErrorKind::TimedOut, "loopback: no data"));
        }
        let n = buf.len().min(shared.input.len()).min(self.max_chunk);
        for (slot, byte) in buf.iter_mut().zip(shared.input.drain(..n)) {
            *slot = byte;
        }
        Ok(n)
    }
}

impl Write for LoopbackLink {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.line_buf.extend_from_slice(buf);

        while let Some(pos) = self.line_buf.windows(2).position(|w| w == b"\r\n") {
            let line: Vec<u8> = self.line_buf.drain(..pos + 2).take(pos).collect();
            let line = String::from_utf8_lossy(&line).into_owned();
            let replies = (self.responder)(&line);

            let mut shared = self.handle.lock();
            shared.commands.push(line);
            if shared.closed {
                continue;
            }
            for reply in replies {
                shared.input.extend(reply.as_bytes());
                shared.input.extend(b"\r\n");
            }
        }
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl Link for LoopbackLink {
    fn clear_input(&mut self) -> io::Result<()> {
        let mut shared = self.handle.lock();
        shared.input.clear();
        shared.clears += 1;
        Ok(())
    }

    fn describe(&self) -> String {
        "sp1060(loopback)".to_string()
    }
}
