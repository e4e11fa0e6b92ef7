//! Connect to a live arm over serial, home it, and jog through a few moves.
//!
//! Usage: cargo run --example jog [PORT]
//!
//! With no argument the serial ports are scanned for the first usable one.
//! Set RUST_LOG=mirolink=debug to see the wire traffic.

use std::env;
use std::process;

use mirolink::{ClientConfig, ClientError, JointTarget, Mirobot, Pose, PwmSetting};

fn main() {
    env_logger::init();
    if let Err(e) = run() {
        eprintln!("error: {e}");
        process::exit(1);
    }
}

fn run() -> Result<(), ClientError> {
    let config = ClientConfig::default();

    // 1. Connect
    let mut arm = match env::args().nth(1) {
        Some(port) => {
            println!("Connecting to {port}...");
            Mirobot::connect(&port, config)?
        }
        None => {
            println!("Scanning serial ports...");
            Mirobot::connect_auto(config)?
        }
    };
    println!("Connected.");

    // 2. Home
    println!("Homing (all axes)...");
    arm.home_simultaneous()?;
    print_status(&mut arm)?;

    // 3. A joint-space jog and back
    println!("Jogging joint 1 by +20 degrees...");
    arm.increment_axis(
        &JointTarget {
            x: Some(20.0),
            ..Default::default()
        },
        None,
    )?;
    println!("...and back.");
    arm.increment_axis(
        &JointTarget {
            x: Some(-20.0),
            ..Default::default()
        },
        None,
    )?;

    // 4. A cartesian move
    println!("Moving to (202, 0, 181)...");
    arm.go_to_cartesian_ptp(
        &Pose {
            x: Some(202.0),
            y: Some(0.0),
            z: Some(181.0),
            ..Default::default()
        },
        None,
    )?;
    print_status(&mut arm)?;

    // 5. Exercise the pump
    println!("Pump on...");
    arm.set_air_pump(PwmSetting::On)?;
    println!("Pump off.");
    arm.set_air_pump(PwmSetting::Off)?;

    arm.disconnect();
    println!("Done.");
    Ok(())
}

fn print_status(arm: &mut Mirobot) -> Result<(), ClientError> {
    let status = arm.update_status()?.clone();
    println!(
        "  [{}] joints: {:.2} {:.2} {:.2} {:.2} {:.2} {:.2}  rail: {:.2}",
        status.state,
        status.joints.a1(),
        status.joints.a2(),
        status.joints.a3(),
        status.joints.a4(),
        status.joints.a5(),
        status.joints.a6(),
        status.joints.rail(),
    );
    println!(
        "  cartesian: x={:.2} y={:.2} z={:.2} rx={:.2} ry={:.2} rz={:.2}",
        status.cartesian.x,
        status.cartesian.y,
        status.cartesian.z,
        status.cartesian.rx,
        status.cartesian.ry,
        status.cartesian.rz,
    );
    println!(
        "  pump={} valve={} motion_mode={}",
        status.pump_pwm, status.valve_pwm, status.motion_mode,
    );
    Ok(())
}
