// src/server/lines.rs
//! Plaintext line handling before the upgrade to guarded mode.

use tracing::{debug, warn};

use crate::utils::sanitize_log;

/// What one chunk of plaintext input produced
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LineEvent {
    /// A complete line without its terminator
    Line(String),
    /// A line ending with the trigger suffix. `remainder` holds every byte
    /// that followed its terminator; line scanning stops here.
    Upgrade { trigger: String, remainder: Vec<u8> },
}

/// Bounded accumulator for newline-terminated input
#[derive(Debug)]
pub struct LineAccumulator {
    buf: Vec<u8>,
    trigger_suffix: String,
    max_bytes: usize,
}

impl LineAccumulator {
    pub fn new(trigger_suffix: impl Into<String>, max_bytes: usize) -> Self {
        Self {
            buf: Vec::new(),
            trigger_suffix: trigger_suffix.into(),
            max_bytes,
        }
    }

    /// Append bytes and split out every complete line.
    ///
    /// A trailing `\r` is stripped. When a line ends with the trigger
    /// suffix, an `Upgrade` event is returned last and the buffer is
    /// emptied into its remainder. Unterminated input beyond the size
    /// bound is dropped.
    pub fn push(&mut self, data: &[u8]) -> Vec<LineEvent> {
        self.buf.extend_from_slice(data);
        let mut events = Vec::new();

        while let Some(pos) = self.buf.iter().position(|&b| b == b'\n') {
            let mut line: Vec<u8> = self.buf.drain(..=pos).collect();
            line.pop();
            if line.last() == Some(&b'\r') {
                line.pop();
            }
            let text = String::from_utf8_lossy(&line).into_owned();

            if text.ends_with(self.trigger_suffix.as_str()) {
                debug!("Trigger line received: {}", sanitize_log(&text));
                events.push(LineEvent::Upgrade {
                    trigger: text,
                    remainder: std::mem::take(&mut self.buf),
                });
                return events;
            }
            events.push(LineEvent::Line(text));
        }

        if self.buf.len() > self.max_bytes {
            warn!("Dropping {} bytes of unterminated line", self.buf.len());
            self.buf.clear();
        }
        events
    }

    /// Bytes held without a terminator
    pub fn pending(&self) -> usize {
        self.buf.len()
    }

    /// Take every buffered byte, leaving the accumulator empty
    pub fn take_pending(&mut self) -> Vec<u8> {
        std::mem::take(&mut self.buf)
    }

    pub fn clear(&mut self) {
        self.buf.clear();
    }
}
