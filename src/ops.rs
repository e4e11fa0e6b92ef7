//! Wire forms for the device's motion and configuration commands.
//!
//! Free constructors only; dispatch and wait behavior live in the client.
//! Motion targets carry `Option<f64>` per axis so untouched axes are simply
//! omitted from the frame and hold their current position.

use crate::command::Command;

/// Target for a joint-space move. Axes 1–3 ride in the `x`/`y`/`z` keys and
/// axes 4–6 in `a`/`b`/`c`, matching the device's parameter letters; `d` is
/// the external slide rail.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct JointTarget {
    pub x: Option<f64>,
    pub y: Option<f64>,
    pub z: Option<f64>,
    pub a: Option<f64>,
    pub b: Option<f64>,
    pub c: Option<f64>,
    pub d: Option<f64>,
}

impl JointTarget {
    /// Every axis explicitly at zero.
    pub fn zeroed() -> Self {
        Self {
            x: Some(0.0),
            y: Some(0.0),
            z: Some(0.0),
            a: Some(0.0),
            b: Some(0.0),
            c: Some(0.0),
            d: Some(0.0),
        }
    }
}

/// Target for a cartesian move: position in millimetres, `a`/`b`/`c` the
/// roll/pitch/yaw angles in degrees.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Pose {
    pub x: Option<f64>,
    pub y: Option<f64>,
    pub z: Option<f64>,
    pub a: Option<f64>,
    pub b: Option<f64>,
    pub c: Option<f64>,
}

/// On/off duty cycles for a PWM-driven peripheral.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PwmRange {
    pub on: u32,
    pub off: u32,
}

/// A requested peripheral setting. `On`/`Off` resolve through the client's
/// configured [`PwmRange`]; `Raw` passes a duty cycle straight through.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PwmSetting {
    On,
    Off,
    Raw(u32),
}

impl PwmSetting {
    pub fn resolve(self, range: &PwmRange) -> u32 {
        match self {
            PwmSetting::On => range.on,
            PwmSetting::Off => range.off,
            PwmSetting::Raw(pwm) => pwm,
        }
    }
}

/// Status query.
pub fn status_query() -> Command {
    Command::new("?")
}

/// Home all axes at once.
pub fn home_simultaneous() -> Command {
    Command::new("$H")
}

/// Home the axes one at a time.
pub fn home_individual() -> Command {
    Command::new("$HH")
}

/// Release the shaft lock without homing.
pub fn unlock_shaft() -> Command {
    Command::new("M50")
}

/// Absolute joint-space move.
pub fn go_to_axis(target: &JointTarget, speed: u32) -> Command {
    axis_move("M21 G90", target, speed)
}

/// Relative joint-space move.
pub fn increment_axis(target: &JointTarget, speed: u32) -> Command {
    axis_move("M21 G91", target, speed)
}

/// Absolute point-to-point cartesian move.
pub fn go_to_cartesian_ptp(pose: &Pose, speed: u32) -> Command {
    cartesian_move("M20 G90 G0", pose, speed)
}

/// Absolute linear cartesian move.
pub fn go_to_cartesian_lin(pose: &Pose, speed: u32) -> Command {
    cartesian_move("M20 G90 G1", pose, speed)
}

/// Relative point-to-point cartesian move.
pub fn increment_cartesian_ptp(pose: &Pose, speed: u32) -> Command {
    cartesian_move("M20 G91 G0", pose, speed)
}

/// Relative linear cartesian move.
pub fn increment_cartesian_lin(pose: &Pose, speed: u32) -> Command {
    cartesian_move("M20 G91 G1", pose, speed)
}

/// Set the pneumatic pump duty cycle. The firmware takes the value glued to
/// the instruction, `M3S1000`, not as a spaced parameter.
pub fn set_air_pump(pwm: u32) -> Command {
    Command::new(format!("M3S{pwm}"))
}

/// Set the valve duty cycle, same glued form as the pump.
pub fn set_valve(pwm: u32) -> Command {
    Command::new(format!("M4E{pwm}"))
}

/// Enable or disable soft limits.
pub fn set_soft_limit(on: bool) -> Command {
    Command::assign(20, i64::from(on))
}

/// Enable or disable hard limits.
pub fn set_hard_limit(on: bool) -> Command {
    Command::assign(21, i64::from(on))
}

/// Enter the pose-calibration sequence.
pub fn start_calibration() -> Command {
    Command::new("M40")
}

/// Persist the calibrated pose and leave the sequence.
pub fn finish_calibration() -> Command {
    Command::new("M41")
}

fn axis_move(instruction: &str, target: &JointTarget, speed: u32) -> Command {
    Command::new(instruction)
        .param_opt('X', target.x)
        .param_opt('Y', target.y)
        .param_opt('Z', target.z)
        .param_opt('A', target.a)
        .param_opt('B', target.b)
        .param_opt('C', target.c)
        .param_opt('D', target.d)
        .param('F', speed)
}

fn cartesian_move(instruction: &str, pose: &Pose, speed: u32) -> Command {
    Command::new(instruction)
        .param_opt('X', pose.x)
        .param_opt('Y', pose.y)
        .param_opt('Z', pose.z)
        .param_opt('A', pose.a)
        .param_opt('B', pose.b)
        .param_opt('C', pose.c)
        .param('F', speed)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn joint_move_wire_forms() {
        let target = JointTarget {
            x: Some(10.0),
            b: Some(-30.5),
            ..Default::default()
        };
        assert_eq!(go_to_axis(&target, 2000).wire(), "M21 G90 X10 B-30.5 F2000");
        assert_eq!(
            increment_axis(&target, 1500).wire(),
            "M21 G91 X10 B-30.5 F1500"
        );
    }

    #[test]
    fn cartesian_move_wire_forms() {
        let pose = Pose {
            x: Some(202.0),
            y: Some(0.0),
            z: Some(181.0),
            ..Default::default()
        };
        assert_eq!(
            go_to_cartesian_ptp(&pose, 2000).wire(),
            "M20 G90 G0 X202 Y0 Z181 F2000"
        );
        assert_eq!(
            go_to_cartesian_lin(&pose, 2000).wire(),
            "M20 G90 G1 X202 Y0 Z181 F2000"
        );
        assert_eq!(
            increment_cartesian_ptp(&pose, 2000).wire(),
            "M20 G91 G0 X202 Y0 Z181 F2000"
        );
        assert_eq!(
            increment_cartesian_lin(&pose, 2000).wire(),
            "M20 G91 G1 X202 Y0 Z181 F2000"
        );
    }

    #[test]
    fn zeroed_target_names_every_axis() {
        let wire = go_to_axis(&JointTarget::zeroed(), 2000).wire();
        assert_eq!(wire, "M21 G90 X0 Y0 Z0 A0 B0 C0 D0 F2000");
    }

    #[test]
    fn peripheral_wire_forms() {
        assert_eq!(set_air_pump(1000).wire(), "M3S1000");
        assert_eq!(set_valve(65).wire(), "M4E65");
    }

    #[test]
    fn pwm_resolution() {
        let pump = PwmRange { on: 0, off: 1000 };
        assert_eq!(PwmSetting::On.resolve(&pump), 0);
        assert_eq!(PwmSetting::Off.resolve(&pump), 1000);
        assert_eq!(PwmSetting::Raw(512).resolve(&pump), 512);
    }

    #[test]
    fn limit_commands_are_variable() {
        let cmd = set_soft_limit(true);
        assert!(cmd.is_variable());
        assert_eq!(cmd.wire(), "$20=1");
        assert_eq!(set_hard_limit(false).wire(), "$21=0");
    }

    #[test]
    fn homing_and_calibration() {
        assert_eq!(home_simultaneous().wire(), "$H");
        assert_eq!(home_individual().wire(), "$HH");
        assert_eq!(unlock_shaft().wire(), "M50");
        assert_eq!(start_calibration().wire(), "M40");
        assert_eq!(finish_calibration().wire(), "M41");
    }
}
