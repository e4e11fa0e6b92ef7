//! Device status snapshot and telemetry-line parser.
//!
//! A status query (`?`) returns one telemetry line:
//!
//! ```text
//! <Idle,Angle(ABCDXYZ):0.00,0.00,0.00,0.00,-64.90,-30.00,-40.00,Cartesian coordinate(XYZ RxRyRz):202.00,0.00,181.00,0.00,0.00,0.00,Pump PWM:0,Valve PWM:40,Motion_MODE:0>
//! ```
//!
//! [`DeviceStatus::parse`] either matches the full grammar and yields a
//! complete snapshot, or fails with [`ClientError::StatusParse`] — there is
//! no partial result, so a caller's cached status is never half-updated.

use std::fmt;

use crate::error::{ClientError, Result};

const ANGLE_HEADER: &str = ",Angle(ABCDXYZ):";
const CARTESIAN_HEADER: &str = ",Cartesian coordinate(XYZ RxRyRz):";
const PUMP_HEADER: &str = ",Pump PWM:";
const VALVE_HEADER: &str = ",Valve PWM:";
const MOTION_HEADER: &str = ",Motion_MODE:";

/// The device-reported state name. Device-defined strings outside the known
/// set are preserved in `Other`.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum DeviceState {
    Idle,
    Run,
    Alarm,
    Home,
    Busy,
    Other(String),
    /// No status has been received yet.
    #[default]
    Unknown,
}

impl DeviceState {
    fn from_wire(s: &str) -> Self {
        match s {
            "Idle" => Self::Idle,
            "Run" => Self::Run,
            "Alarm" => Self::Alarm,
            "Home" => Self::Home,
            "Busy" => Self::Busy,
            other => Self::Other(other.to_string()),
        }
    }

    /// All queued motion has completed.
    pub fn is_idle(&self) -> bool {
        matches!(self, Self::Idle)
    }
}

impl fmt::Display for DeviceState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Idle => f.write_str("Idle"),
            Self::Run => f.write_str("Run"),
            Self::Alarm => f.write_str("Alarm"),
            Self::Home => f.write_str("Home"),
            Self::Busy => f.write_str("Busy"),
            Self::Other(s) => f.write_str(s),
            Self::Unknown => f.write_str("Unknown"),
        }
    }
}

/// Joint angles for the six arm axes plus the external slide rail.
///
/// The wire order of the angle group is `a,b,c,d,x,y,z` as labelled by the
/// device header, but the firmware reports axis 1–3 in the `x,y,z` slots and
/// axis 4–6 in `a,b,c`; the accessor aliases below give the axis-numbered
/// view.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Joints {
    pub a: f64,
    pub b: f64,
    pub c: f64,
    /// Position of the external slide rail module.
    pub d: f64,
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

impl Joints {
    /// Angle of axis 1.
    pub fn a1(&self) -> f64 {
        self.a
    }

    /// Angle of axis 2.
    pub fn a2(&self) -> f64 {
        self.b
    }

    /// Angle of axis 3.
    pub fn a3(&self) -> f64 {
        self.c
    }

    /// Angle of axis 4.
    pub fn a4(&self) -> f64 {
        self.x
    }

    /// Angle of axis 5.
    pub fn a5(&self) -> f64 {
        self.y
    }

    /// Angle of axis 6.
    pub fn a6(&self) -> f64 {
        self.z
    }

    /// Position of the external slide rail module.
    pub fn rail(&self) -> f64 {
        self.d
    }
}

/// Cartesian pose: position in millimetres plus roll/pitch/yaw in degrees.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Cartesians {
    pub x: f64,
    pub y: f64,
    pub z: f64,
    /// Roll angle.
    pub rx: f64,
    /// Pitch angle.
    pub ry: f64,
    /// Yaw angle.
    pub rz: f64,
}

/// A full device-state snapshot parsed from one telemetry line.
#[derive(Debug, Clone, PartialEq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct DeviceStatus {
    pub state: DeviceState,
    pub joints: Joints,
    pub cartesian: Cartesians,
    pub pump_pwm: u32,
    pub valve_pwm: u32,
    /// `false` = coordinate mode, `true` = joint-motion mode.
    pub motion_mode: bool,
}

impl DeviceStatus {
    /// Parse one telemetry line. Any grammar or numeric failure yields
    /// `StatusParse` with the offending raw line and no partial status.
    pub fn parse(line: &str) -> Result<Self> {
        parse_inner(line).ok_or_else(|| ClientError::StatusParse(line.to_string()))
    }
}

fn parse_inner(line: &str) -> Option<DeviceStatus> {
    let inner = line.strip_prefix('<')?.strip_suffix('>')?;

    let (state, rest) = inner.split_once(ANGLE_HEADER)?;
    let (angles, rest) = rest.split_once(CARTESIAN_HEADER)?;
    let (cartesians, rest) = rest.split_once(PUMP_HEADER)?;
    let (pump, rest) = rest.split_once(VALVE_HEADER)?;
    let (valve, motion) = rest.split_once(MOTION_HEADER)?;

    let a = parse_floats::<7>(angles)?;
    let c = parse_floats::<6>(cartesians)?;

    Some(DeviceStatus {
        state: DeviceState::from_wire(state),
        // The firmware emits the angle group in x,y,z,rail,a,b,c value order
        // despite the ABCDXYZ header.
        joints: Joints {
            x: a[0],
            y: a[1],
            z: a[2],
            d: a[3],
            a: a[4],
            b: a[5],
            c: a[6],
        },
        cartesian: Cartesians {
            x: c[0],
            y: c[1],
            z: c[2],
            rx: c[3],
            ry: c[4],
            rz: c[5],
        },
        pump_pwm: parse_pwm(pump)?,
        valve_pwm: parse_pwm(valve)?,
        motion_mode: match motion {
            "0" => false,
            "1" => true,
            _ => return None,
        },
    })
}

/// Parse exactly `N` comma-separated floats; a wrong field count fails.
fn parse_floats<const N: usize>(s: &str) -> Option<[f64; N]> {
    let mut out = [0.0; N];
    let mut fields = s.split(',');
    for slot in out.iter_mut() {
        *slot = fields.next()?.parse().ok()?;
    }
    if fields.next().is_some() {
        return None;
    }
    Some(out)
}

fn parse_pwm(s: &str) -> Option<u32> {
    if s.is_empty() || !s.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    s.parse().ok()
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
