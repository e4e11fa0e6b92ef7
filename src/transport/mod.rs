//! Byte-stream channels to the device.
//!
//! Two bindings: a synchronous serial connection ([`serial::SerialTransport`])
//! and, behind the `ble` feature, a notification-driven Bluetooth LE link
//! ([`crate::ble::BleTransport`]). Both speak terminated lines of text; the
//! shared [`LineSplitter`] reassembles them from arbitrarily chunked reads.

pub mod serial;

use std::time::Duration;

use crate::error::TransportError;

pub use serial::{SerialConfig, SerialTransport};

/// Line terminator appended to outbound commands when absent.
pub const TERMINATOR: &str = "\r\n";

/// A line-oriented channel. One logical caller drives a transport at a time;
/// there is no internal locking for concurrent in-process callers.
pub trait LineTransport {
    /// Write one line, appending the terminator iff it is absent. Never
    /// duplicates a terminator already present.
    fn send_line(&mut self, line: &str) -> Result<(), TransportError>;

    /// Block until a complete line is available or `timeout` elapses.
    /// The returned line has its terminator stripped.
    fn recv_line(&mut self, timeout: Duration) -> Result<String, TransportError>;

    /// Release the channel, best-effort. Failures are logged, not raised.
    fn close(&mut self);
}

/// Frame the outbound text with exactly one terminator.
pub(crate) fn terminate(line: &str) -> String {
    if line.ends_with(TERMINATOR) {
        line.to_string()
    } else {
        format!("{line}{TERMINATOR}")
    }
}

/// Splits a byte stream into lines. Buffers partial data across calls, so it
/// can be fed read-sized or notification-sized chunks. Blank lines are
/// dropped — the device separates records with `\r\n` and an empty record
/// carries no information.
#[derive(Debug, Default)]
pub struct LineSplitter {
    buf: Vec<u8>,
}

impl LineSplitter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed new data and extract any complete lines, terminators stripped.
    pub fn feed(&mut self, data: &[u8]) -> Vec<String> {
        self.buf.extend_from_slice(data);
        let mut lines = Vec::new();

        while let Some(pos) = self.buf.iter().position(|&b| b == b'\n') {
            let raw: Vec<u8> = self.buf.drain(..=pos).collect();
            let text = String::from_utf8_lossy(&raw);
            let text = text.trim_end_matches(['\r', '\n']);
            if !text.is_empty() {
                lines.push(text.to_string());
            }
        }

        lines
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
