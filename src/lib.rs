pub mod ack;
#[cfg(feature = "ble")]
pub mod ble;
pub mod client;
pub mod command;
pub mod error;
pub mod line;
pub mod ops;
pub mod status;
pub mod transport;

#[cfg(feature = "ble")]
pub use ble::{BleClientConfig, BleConfig, BleMirobot, BleTransport};
pub use client::{Client, ClientConfig, Mirobot, Reply, WaitPolicy};
pub use command::{Command, Param};
pub use error::{ClientError, Result, TransportError};
pub use line::{LineKind, WireLine};
pub use ops::{JointTarget, Pose, PwmRange, PwmSetting};
pub use status::{Cartesians, DeviceState, DeviceStatus, Joints};
pub use transport::{LineTransport, SerialConfig, SerialTransport};
