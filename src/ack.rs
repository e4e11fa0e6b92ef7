//! Acknowledgment collection: classify lines until an exchange closes out.
//!
//! [`AckCollector`] is a push-based state machine with no I/O of its own, so
//! the synchronous serial driver and the notification-driven BLE driver share
//! one implementation: each feeds it lines from its own receive loop.

use crate::error::{ClientError, Result};
use crate::line::{LineKind, WireLine};

/// How an exchange is allowed to terminate.
#[derive(Debug, Clone, Copy, Default)]
pub struct AckPolicy {
    /// The reset greeting is the expected terminal condition (used for the
    /// power-on banner right after connecting). An unexpected reset at any
    /// other time is a fault.
    pub reset_expected: bool,
    /// Require two terminal lines instead of one. Some serial backends echo
    /// a doubled `ok` per command; the BLE link always acks twice. Kept as a
    /// configuration flag rather than platform detection.
    pub double_ack: bool,
}

impl AckPolicy {
    fn threshold(&self) -> u32 {
        if self.double_ack && !self.reset_expected {
            2
        } else {
            1
        }
    }
}

/// Collects lines for one command exchange until the terminal threshold is
/// reached, failing fast on device errors, alarms, and unexpected resets.
#[derive(Debug)]
pub struct AckCollector {
    policy: AckPolicy,
    lines: Vec<WireLine>,
    terminal_count: u32,
}

impl AckCollector {
    pub fn new(policy: AckPolicy) -> Self {
        Self {
            policy,
            lines: Vec::new(),
            terminal_count: 0,
        }
    }

    /// Feed one received line.
    ///
    /// Returns `Ok(Some(lines))` once the exchange is complete — the full
    /// ordered collection including the terminal line(s), always non-empty.
    /// Returns `Ok(None)` while more lines are needed. Device faults abort
    /// the exchange immediately.
    pub fn push(&mut self, line: WireLine) -> Result<Option<Vec<WireLine>>> {
        match line.kind() {
            LineKind::Error => {
                let msg = line.error_message().unwrap_or(line.as_str()).to_string();
                return Err(ClientError::Device(msg));
            }
            LineKind::Alarm => {
                let msg = line.alarm_message().unwrap_or(line.as_str()).to_string();
                return Err(ClientError::Alarm(msg));
            }
            LineKind::ResetNotice if !self.policy.reset_expected => {
                return Err(ClientError::UnexpectedReset);
            }
            _ => {}
        }

        let terminal = line.is_terminal()
            || (self.policy.reset_expected && line.kind() == LineKind::ResetNotice);

        self.lines.push(line);
        if terminal {
            self.terminal_count += 1;
        }

        if self.terminal_count >= self.policy.threshold() {
            Ok(Some(std::mem::take(&mut self.lines)))
        } else {
            Ok(None)
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
