use std::time::Duration;

use thiserror::Error;

/// Errors from the byte-level channel to the device.
///
/// Transport faults are fatal to the current operation and are never retried
/// automatically. An `Open`/`Lock` failure means there is no usable
/// connection; the remaining kinds leave the connection open for reuse.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("failed to open {port}: {source}")]
    Open {
        port: String,
        #[source]
        source: serialport::Error,
    },

    /// Exclusivity was requested and another holder already owns the port.
    /// The lock attempt is non-blocking; there is no waiting for it to free.
    #[error("port {port} is locked by another process")]
    Lock { port: String },

    #[error("read failed: {0}")]
    Read(#[source] std::io::Error),

    #[error("write failed: {0}")]
    Write(#[source] std::io::Error),

    #[error("serial port error: {0}")]
    Serial(#[from] serialport::Error),

    /// No complete line arrived before the deadline.
    #[error("no line received within {timeout:?}")]
    Timeout { timeout: Duration },

    #[error("connection closed by device")]
    Disconnected,

    #[cfg(feature = "ble")]
    #[error("BLE error: {0}")]
    Ble(#[from] btleplug::Error),

    #[cfg(feature = "ble")]
    #[error("no BLE device named {name:?} found")]
    DeviceNotFound { name: String },

    #[cfg(feature = "ble")]
    #[error("control characteristic {uuid} not found")]
    CharacteristicNotFound { uuid: uuid::Uuid },
}

/// Errors surfaced by the command/acknowledgment protocol layer.
#[derive(Debug, Error)]
pub enum ClientError {
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// The device reported `error: <message>` while an exchange was open.
    /// The command is considered sent but not confirmed successful.
    #[error("device error: {0}")]
    Device(String),

    /// The device reported `ALARM: <message>`.
    #[error("device alarm: {0}")]
    Alarm(String),

    /// The reset greeting arrived when no reset was expected.
    #[error("device was unexpectedly reset")]
    UnexpectedReset,

    /// A telemetry line did not match the status grammar. The previously
    /// cached status is left untouched.
    #[error("could not parse status line {0:?}")]
    StatusParse(String),

    /// A variable command failed grammar validation. Nothing was sent.
    #[error("not a variable command: {0:?}")]
    BadVariableCommand(String),

    /// Port auto-discovery found zero or several usable candidates, so no
    /// single port can be chosen.
    #[error("could not pick a serial port ({usable} usable of {scanned} scanned)")]
    AmbiguousPort { scanned: usize, usable: usize },

    #[error("client is not connected")]
    NotConnected,
}

pub type Result<T> = std::result::Result<T, ClientError>;
