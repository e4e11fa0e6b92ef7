//! Classification of received lines.
//!
//! Every inbound line (terminator already stripped) falls into exactly one
//! [`LineKind`]. Faults take precedence over the terminal token: a line
//! carrying `error: ` or `ALARM: ` is classified as a fault even if it also
//! happens to end in `ok`.

use std::fmt;

/// The literal line suffix that closes out a command's acknowledgment.
pub const TERMINAL_TOKEN: &str = "ok";

/// Power-on greeting. Terminal on connect, a fault at any other time.
pub const RESET_NOTICE: &str = "Using reset pos!";

const ERROR_MARKER: &str = "error: ";
const ALARM_MARKER: &str = "ALARM: ";

/// Classification of a single received line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LineKind {
    /// Ends with the terminal token (`ok`).
    TerminalOk,
    /// Contains `error: ` — a transient command error.
    Error,
    /// Contains `ALARM: ` — a device fault condition.
    Alarm,
    /// The reset greeting (`Using reset pos!`).
    ResetNotice,
    /// A telemetry response (`<state,Angle(...)...>`).
    Status,
    /// Anything else (settings dumps, banners, echo).
    Plain,
}

/// One received line of text, stripped of line terminators.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WireLine(String);

impl WireLine {
    pub fn new(text: impl Into<String>) -> Self {
        let mut text = text.into();
        while text.ends_with(['\r', '\n']) {
            text.pop();
        }
        Self(text)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn kind(&self) -> LineKind {
        if self.0.contains(ERROR_MARKER) {
            LineKind::Error
        } else if self.0.contains(ALARM_MARKER) {
            LineKind::Alarm
        } else if self.0.ends_with(RESET_NOTICE) {
            LineKind::ResetNotice
        } else if self.0.ends_with(TERMINAL_TOKEN) {
            LineKind::TerminalOk
        } else if self.0.starts_with('<') && self.0.ends_with('>') {
            LineKind::Status
        } else {
            LineKind::Plain
        }
    }

    /// Whether this line counts toward the terminal counter.
    pub fn is_terminal(&self) -> bool {
        self.kind() == LineKind::TerminalOk
    }

    /// The device's message with the `error: ` marker stripped.
    pub fn error_message(&self) -> Option<&str> {
        self.0.split_once(ERROR_MARKER).map(|(_, rest)| rest)
    }

    /// The device's message with the `ALARM: ` marker stripped.
    pub fn alarm_message(&self) -> Option<&str> {
        self.0.split_once(ALARM_MARKER).map(|(_, rest)| rest)
    }
}

impl fmt::Display for WireLine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for WireLine {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_terminators() {
        assert_eq!(WireLine::new("ok\r\n").as_str(), "ok");
        assert_eq!(WireLine::new("ok\n").as_str(), "ok");
        assert_eq!(WireLine::new("ok").as_str(), "ok");
    }

    #[test]
    fn classify_terminal() {
        assert_eq!(WireLine::new("ok").kind(), LineKind::TerminalOk);
        // Suffix match, like the device's homing echo lines.
        assert_eq!(WireLine::new("Homing done ok").kind(), LineKind::TerminalOk);
    }

    #[test]
    fn classify_error_and_alarm() {
        let err = WireLine::new("error: Unknown command");
        assert_eq!(err.kind(), LineKind::Error);
        assert_eq!(err.error_message(), Some("Unknown command"));

        let alarm = WireLine::new("ALARM: Hard limit triggered");
        assert_eq!(alarm.kind(), LineKind::Alarm);
        assert_eq!(alarm.alarm_message(), Some("Hard limit triggered"));
    }

    #[test]
    fn classify_reset_and_status() {
        assert_eq!(WireLine::new("Using reset pos!").kind(), LineKind::ResetNotice);
        assert_eq!(WireLine::new("<Idle,Angle(ABCDXYZ):0>").kind(), LineKind::Status);
        assert_eq!(WireLine::new("$20=1").kind(), LineKind::Plain);
    }

    #[test]
    fn fault_wins_over_terminal() {
        // Pathological line carrying both markers.
        assert_eq!(WireLine::new("error: not ok").kind(), LineKind::Error);
    }
}
