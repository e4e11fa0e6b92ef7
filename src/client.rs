//! Synchronous client: command dispatch, acknowledgment waits, idle polling,
//! and connection lifecycle.
//!
//! One [`Client`] owns one transport. All waits block the calling thread;
//! within a connection, commands are strictly ordered because each command's
//! acknowledgment fully drains before the next one is framed.

use std::time::{Duration, Instant};

use log::debug;

use crate::ack::{AckCollector, AckPolicy};
use crate::command::Command;
use crate::error::{ClientError, Result, TransportError};
use crate::line::WireLine;
use crate::ops::{self, JointTarget, Pose, PwmRange, PwmSetting};
use crate::status::DeviceStatus;
use crate::transport::{LineTransport, SerialConfig, SerialTransport};

/// Per-call policy for how long `send` blocks: not at all, until the device
/// acknowledges receipt, or until it has physically finished executing.
#[derive(Debug, Clone, Copy, Default)]
pub struct WaitPolicy {
    /// Collect lines until the terminal token before returning.
    pub wait_for_ok: bool,
    /// After acknowledgment, poll status until the device reports Idle.
    /// Only meaningful together with `wait_for_ok`.
    pub wait_for_idle: bool,
    /// Suppress the `[SENT]`/`[RECV]` debug echo. Used by the idle poller so
    /// a 100 ms status loop does not flood the log.
    pub quiet: bool,
}

impl WaitPolicy {
    /// Wait for acknowledgment only.
    pub fn ack() -> Self {
        Self {
            wait_for_ok: true,
            ..Default::default()
        }
    }

    /// Wait for acknowledgment, then for the device to go Idle.
    pub fn idle() -> Self {
        Self {
            wait_for_ok: true,
            wait_for_idle: true,
            quiet: false,
        }
    }

    /// Return as soon as the bytes are written.
    pub fn fire_and_forget() -> Self {
        Self::default()
    }

    pub fn quiet(mut self) -> Self {
        self.quiet = true;
        self
    }
}

/// Result of a dispatched command.
#[derive(Debug, Clone)]
pub enum Reply {
    /// The collected acknowledgment lines (when waiting). Always non-empty.
    Ack(Vec<WireLine>),
    /// The command was written without waiting.
    Sent,
}

impl Reply {
    /// The acknowledgment lines, if this reply carries any.
    pub fn lines(&self) -> Option<&[WireLine]> {
        match self {
            Reply::Ack(lines) => Some(lines),
            Reply::Sent => None,
        }
    }
}

/// Client tuning knobs. The defaults mirror the device's stock firmware.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub serial: SerialConfig,
    /// Per-line receive deadline during acknowledgment collection. This is
    /// the timeout that governs waits on the wire; `SerialConfig`'s
    /// `read_timeout` only seeds the port handle at open.
    pub recv_timeout: Duration,
    /// Delay between status queries while waiting for Idle.
    pub poll_interval: Duration,
    /// Overall deadline for an idle wait. `None` polls until the device
    /// reports Idle or a lower-layer fault aborts it.
    pub idle_timeout: Option<Duration>,
    /// Require two terminal lines per exchange. A known quirk of some serial
    /// backends; see `AckPolicy::double_ack`.
    pub double_ack: bool,
    /// Feed rate applied to motion commands when the caller leaves speed
    /// unset. Avoids the firmware's "Unknown Feed Rate" errors.
    pub default_speed: u32,
    /// On/off duty cycles for the pneumatic pump.
    pub pump_pwm: PwmRange,
    /// On/off duty cycles for the valve (e.g. gripper).
    pub valve_pwm: PwmRange,
    /// Default for per-command wait behavior on the convenience methods.
    pub wait: bool,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            serial: SerialConfig::default(),
            recv_timeout: Duration::from_secs(5),
            poll_interval: Duration::from_millis(100),
            idle_timeout: None,
            double_ack: false,
            default_speed: 2000,
            pump_pwm: PwmRange { on: 0, off: 1000 },
            valve_pwm: PwmRange { on: 65, off: 40 },
            wait: true,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Open,
    Closed,
}

/// Control-channel client over a line transport.
///
/// A client is open from construction until [`Client::disconnect`], and
/// closed for good after that. Most users construct the serial alias
/// [`Mirobot`]; the generic form exists so the protocol logic can be driven
/// by any [`LineTransport`].
pub struct Client<T: LineTransport> {
    transport: Option<T>,
    phase: Phase,
    config: ClientConfig,
    status: DeviceStatus,
}

/// Serial-attached client.
pub type Mirobot = Client<SerialTransport>;

impl Mirobot {
    /// Connect to `port_name` and collect the power-on banner.
    pub fn connect(port_name: &str, config: ClientConfig) -> Result<Self> {
        let transport = SerialTransport::open(port_name, &config.serial)?;
        Self::from_transport(transport, config)
    }

    /// Auto-discover the port. Exactly one usable candidate is required;
    /// zero or several fails with [`ClientError::AmbiguousPort`].
    pub fn connect_auto(config: ClientConfig) -> Result<Self> {
        let port = SerialTransport::find_port(&config.serial)?;
        Self::connect(&port, config)
    }
}

impl<T: LineTransport> Client<T> {
    /// Wrap an already-open transport and collect the power-on banner, where
    /// the reset greeting is the expected terminal condition.
    pub fn from_transport(transport: T, config: ClientConfig) -> Result<Self> {
        let mut client = Self {
            transport: Some(transport),
            phase: Phase::Open,
            config,
            status: DeviceStatus::default(),
        };
        client.collect_ack(
            AckPolicy {
                reset_expected: true,
                double_ack: client.config.double_ack,
            },
            false,
        )?;
        Ok(client)
    }

    pub fn is_connected(&self) -> bool {
        self.phase == Phase::Open
    }

    /// Close the transport. Idempotent; a closed client stays closed.
    pub fn disconnect(&mut self) {
        if self.phase == Phase::Open {
            if let Some(mut t) = self.transport.take() {
                t.close();
            }
            self.phase = Phase::Closed;
        }
    }

    /// The last successfully parsed status snapshot.
    pub fn status(&self) -> &DeviceStatus {
        &self.status
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// Dispatch one command under `policy`.
    ///
    /// Variable commands are grammar-checked before any I/O. Device errors,
    /// alarms, and unexpected resets abort the call but leave the connection
    /// open for reuse.
    pub fn send(&mut self, cmd: &Command, policy: WaitPolicy) -> Result<Reply> {
        cmd.validate()?;
        let wire = cmd.wire();

        let transport = match self.transport.as_mut() {
            Some(t) if self.phase == Phase::Open => t,
            _ => return Err(ClientError::NotConnected),
        };
        transport.send_line(&wire)?;
        if !policy.quiet {
            debug!("[SENT] {wire}");
        }

        if !policy.wait_for_ok {
            return Ok(Reply::Sent);
        }

        let lines = self.collect_ack(
            AckPolicy {
                reset_expected: false,
                double_ack: self.config.double_ack,
            },
            policy.quiet,
        )?;

        if policy.wait_for_idle {
            self.wait_until_idle()?;
        }

        Ok(Reply::Ack(lines))
    }

    /// Issue a status query (`?`). Never idle-waits — the idle poller itself
    /// is built on this call and must not recurse.
    pub fn query_status(&mut self) -> Result<Vec<WireLine>> {
        self.query_status_inner(false)
    }

    /// Query, parse, and cache the status snapshot. On a parse failure the
    /// cached snapshot is left untouched and the error carries the raw line.
    pub fn update_status(&mut self) -> Result<&DeviceStatus> {
        self.update_status_inner(false)
    }

    /// Poll status every `poll_interval` until the device reports Idle.
    ///
    /// Bounded by `idle_timeout` when configured; otherwise this blocks until
    /// the device goes idle or a lower-layer error/alarm aborts it.
    pub fn wait_until_idle(&mut self) -> Result<()> {
        let deadline = self.config.idle_timeout.map(|t| (t, Instant::now() + t));

        loop {
            self.update_status_inner(true)?;
            if self.status.state.is_idle() {
                return Ok(());
            }
            if let Some((timeout, at)) = deadline {
                if Instant::now() >= at {
                    return Err(TransportError::Timeout { timeout }.into());
                }
            }
            std::thread::sleep(self.config.poll_interval);
        }
    }

    // -----------------------------------------------------------------------
    // Convenience operations (wire forms in `ops`)
    // -----------------------------------------------------------------------

    /// Home all axes simultaneously (`$H`).
    pub fn home_simultaneous(&mut self) -> Result<Reply> {
        self.send(&ops::home_simultaneous(), self.motion_policy())
    }

    /// Home each axis individually (`$HH`).
    pub fn home_individual(&mut self) -> Result<Reply> {
        self.send(&ops::home_individual(), self.motion_policy())
    }

    /// Unlock the axis shafts (`M50`). Homing also removes the lock.
    pub fn unlock_shaft(&mut self) -> Result<Reply> {
        self.send(&ops::unlock_shaft(), self.plain_policy())
    }

    /// Absolute move in joint space (`M21 G90`).
    pub fn go_to_axis(&mut self, target: &JointTarget, speed: Option<u32>) -> Result<Reply> {
        let cmd = ops::go_to_axis(target, self.speed(speed));
        self.send(&cmd, self.motion_policy())
    }

    /// Relative move in joint space (`M21 G91`).
    pub fn increment_axis(&mut self, target: &JointTarget, speed: Option<u32>) -> Result<Reply> {
        let cmd = ops::increment_axis(target, self.speed(speed));
        self.send(&cmd, self.motion_policy())
    }

    /// Absolute point-to-point cartesian move (`M20 G90 G0`).
    pub fn go_to_cartesian_ptp(&mut self, pose: &Pose, speed: Option<u32>) -> Result<Reply> {
        let cmd = ops::go_to_cartesian_ptp(pose, self.speed(speed));
        self.send(&cmd, self.motion_policy())
    }

    /// Absolute linear cartesian move (`M20 G90 G1`).
    pub fn go_to_cartesian_lin(&mut self, pose: &Pose, speed: Option<u32>) -> Result<Reply> {
        let cmd = ops::go_to_cartesian_lin(pose, self.speed(speed));
        self.send(&cmd, self.motion_policy())
    }

    /// Relative point-to-point cartesian move (`M20 G91 G0`).
    pub fn increment_cartesian_ptp(&mut self, pose: &Pose, speed: Option<u32>) -> Result<Reply> {
        let cmd = ops::increment_cartesian_ptp(pose, self.speed(speed));
        self.send(&cmd, self.motion_policy())
    }

    /// Relative linear cartesian move (`M20 G91 G1`).
    pub fn increment_cartesian_lin(&mut self, pose: &Pose, speed: Option<u32>) -> Result<Reply> {
        let cmd = ops::increment_cartesian_lin(pose, self.speed(speed));
        self.send(&cmd, self.motion_policy())
    }

    /// Send all axes to their zero positions.
    pub fn go_to_zero(&mut self, speed: Option<u32>) -> Result<Reply> {
        self.go_to_axis(&JointTarget::zeroed(), speed)
    }

    /// Set the pneumatic pump duty cycle (`M3S<pwm>`).
    pub fn set_air_pump(&mut self, setting: PwmSetting) -> Result<Reply> {
        let pwm = setting.resolve(&self.config.pump_pwm);
        self.send(&ops::set_air_pump(pwm), self.motion_policy())
    }

    /// Set the valve duty cycle (`M4E<pwm>`).
    pub fn set_valve(&mut self, setting: PwmSetting) -> Result<Reply> {
        let pwm = setting.resolve(&self.config.valve_pwm);
        self.send(&ops::set_valve(pwm), self.motion_policy())
    }

    /// Enable or disable the soft limits (`$20=`).
    pub fn set_soft_limit(&mut self, on: bool) -> Result<Reply> {
        self.send(&ops::set_soft_limit(on), self.plain_policy())
    }

    /// Enable or disable the hard limits (`$21=`).
    pub fn set_hard_limit(&mut self, on: bool) -> Result<Reply> {
        self.send(&ops::set_hard_limit(on), self.plain_policy())
    }

    /// Begin the calibration sequence (`M40`).
    pub fn start_calibration(&mut self) -> Result<Reply> {
        self.send(&ops::start_calibration(), self.plain_policy())
    }

    /// Finish calibration and persist the results (`M41`).
    pub fn finish_calibration(&mut self) -> Result<Reply> {
        self.send(&ops::finish_calibration(), self.plain_policy())
    }

    /// Replay a sequence of variable assignments, e.g. a factory reset dump.
    /// Each line is validated as a variable command before it is sent.
    pub fn reset_configuration<'a>(
        &mut self,
        lines: impl IntoIterator<Item = &'a str>,
    ) -> Result<Vec<Reply>> {
        let mut replies = Vec::new();
        for line in lines {
            let cmd = Command::raw_variable(line.trim());
            replies.push(self.send(&cmd, self.plain_policy())?);
        }
        Ok(replies)
    }

    // -----------------------------------------------------------------------
    // Internal
    // -----------------------------------------------------------------------

    fn speed(&self, speed: Option<u32>) -> u32 {
        speed.unwrap_or(self.config.default_speed)
    }

    fn motion_policy(&self) -> WaitPolicy {
        if self.config.wait {
            WaitPolicy::idle()
        } else {
            WaitPolicy::fire_and_forget()
        }
    }

    fn plain_policy(&self) -> WaitPolicy {
        if self.config.wait {
            WaitPolicy::ack()
        } else {
            WaitPolicy::fire_and_forget()
        }
    }

    fn query_status_inner(&mut self, quiet: bool) -> Result<Vec<WireLine>> {
        let reply = self.send(
            &ops::status_query(),
            WaitPolicy {
                wait_for_ok: true,
                wait_for_idle: false,
                quiet,
            },
        )?;
        match reply {
            Reply::Ack(lines) => Ok(lines),
            Reply::Sent => unreachable!("status query always waits"),
        }
    }

    fn update_status_inner(&mut self, quiet: bool) -> Result<&DeviceStatus> {
        let lines = self.query_status_inner(quiet)?;
        // The telemetry line precedes the closing `ok`.
        let first = lines.first().map(WireLine::as_str).unwrap_or_default();
        let status = DeviceStatus::parse(first)?;
        self.status = status;
        Ok(&self.status)
    }

    fn collect_ack(&mut self, policy: AckPolicy, quiet: bool) -> Result<Vec<WireLine>> {
        let transport = match self.transport.as_mut() {
            Some(t) if self.phase == Phase::Open => t,
            _ => return Err(ClientError::NotConnected),
        };
        let mut collector = AckCollector::new(policy);
        loop {
            let raw = transport.recv_line(self.config.recv_timeout)?;
            let line = WireLine::new(raw);
            if !quiet {
                debug!("[RECV] {line}");
            }
            if let Some(lines) = collector.push(line)? {
                return Ok(lines);
            }
        }
    }
}

impl<T: LineTransport> Drop for Client<T> {
    fn drop(&mut self) {
        self.disconnect();
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;

    /// A transport that replays a scripted set of responses. Each call to
    /// `send_line` records the wire text and queues the next response batch.
    struct ScriptedTransport {
        sent: Vec<String>,
        /// One batch of response lines per expected send, in order.
        script: VecDeque<Vec<String>>,
        inbox: VecDeque<String>,
    }

    impl ScriptedTransport {
        fn new(script: Vec<Vec<&str>>) -> Self {
            Self {
                sent: Vec::new(),
                script: script
                    .into_iter()
                    .map(|batch| batch.into_iter().map(String::from).collect())
                    .collect(),
                inbox: VecDeque::new(),
            }
        }
    }

    impl LineTransport for ScriptedTransport {
        fn send_line(&mut self, line: &str) -> std::result::Result<(), TransportError> {
            self.sent.push(line.to_string());
            if let Some(batch) = self.script.pop_front() {
                self.inbox.extend(batch);
            }
            Ok(())
        }

        fn recv_line(&mut self, timeout: Duration) -> std::result::Result<String, TransportError> {
            self.inbox
                .pop_front()
                .ok_or(TransportError::Timeout { timeout })
        }

        fn close(&mut self) {}
    }

    fn status_line(state: &str) -> String {
        format!(
            "<{state},Angle(ABCDXYZ):0,0,0,0,0,0,0,Cartesian coordinate(XYZ RxRyRz):202,0,181,0,0,0,Pump PWM:0,Valve PWM:40,Motion_MODE:0>"
        )
    }

    /// Build a connected client: the scripted transport's inbox is seeded
    /// with the power-on banner that `from_transport` drains.
    fn connected(script: Vec<Vec<&str>>) -> Client<ScriptedTransport> {
        let mut transport = ScriptedTransport::new(script);
        transport.inbox.push_back("Using reset pos!".into());
        Client::from_transport(transport, ClientConfig::default()).expect("connect")
    }

    #[test]
    fn connect_drains_power_on_banner() {
        let mut transport = ScriptedTransport::new(vec![]);
        transport.inbox.push_back("Mirobot ver 20200903".into());
        transport.inbox.push_back("Using reset pos!".into());
        let client = Client::from_transport(transport, ClientConfig::default()).unwrap();
        assert!(client.is_connected());
    }

    #[test]
    fn send_without_wait_returns_sent() {
        let mut client = connected(vec![vec!["ok"]]);
        let reply = client
            .send(&Command::new("M50"), WaitPolicy::fire_and_forget())
            .unwrap();
        assert!(matches!(reply, Reply::Sent));
        assert_eq!(client.transport.as_ref().unwrap().sent, ["M50"]);
    }

    #[test]
    fn send_with_ack_collects_lines() {
        let mut client = connected(vec![vec!["echo", "ok"]]);
        let reply = client.send(&Command::new("M50"), WaitPolicy::ack()).unwrap();
        let lines = reply.lines().unwrap();
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[1].as_str(), "ok");
    }

    #[test]
    fn device_error_aborts_but_connection_stays_open() {
        let mut client = connected(vec![vec!["error: Unknown command", "ok"], vec!["ok"]]);
        let err = client
            .send(&Command::new("M99"), WaitPolicy::ack())
            .unwrap_err();
        assert!(matches!(err, ClientError::Device(m) if m == "Unknown command"));
        assert!(client.is_connected());

        // Next command still goes through.
        client.send(&Command::new("M50"), WaitPolicy::ack()).unwrap();
    }

    #[test]
    fn malformed_variable_command_never_touches_transport() {
        let mut client = connected(vec![]);
        let err = client
            .send(&Command::raw_variable("$20=banana"), WaitPolicy::ack())
            .unwrap_err();
        assert!(matches!(err, ClientError::BadVariableCommand(_)));
        assert!(client.transport.as_ref().unwrap().sent.is_empty());
    }

    #[test]
    fn update_status_parses_and_caches() {
        let idle = status_line("Idle");
        let mut client = connected(vec![vec![idle.as_str(), "ok"]]);
        let status = client.update_status().unwrap().clone();
        assert!(status.state.is_idle());
        assert_eq!(status.cartesian.x, 202.0);
        assert_eq!(client.transport.as_ref().unwrap().sent, ["?"]);
    }

    #[test]
    fn bad_status_line_keeps_previous_snapshot() {
        let idle = status_line("Idle");
        let mut client = connected(vec![vec![idle.as_str(), "ok"], vec!["<garbage", "ok"]]);
        client.update_status().unwrap();
        let before = client.status().clone();

        let err = client.update_status().unwrap_err();
        assert!(matches!(err, ClientError::StatusParse(_)));
        assert_eq!(client.status(), &before);
    }

    #[test]
    fn idle_poll_issues_one_query_per_state() {
        let run = status_line("Run");
        let idle = status_line("Idle");
        let mut client = connected(vec![
            vec![run.as_str(), "ok"],
            vec![run.as_str(), "ok"],
            vec![idle.as_str(), "ok"],
        ]);
        client.config.poll_interval = Duration::from_millis(1);
        client.wait_until_idle().unwrap();
        // Run, Run, Idle: exactly three status queries.
        assert_eq!(client.transport.as_ref().unwrap().sent, ["?", "?", "?"]);
    }

    #[test]
    fn motion_command_waits_for_idle() {
        let idle = status_line("Idle");
        let mut client = connected(vec![
            vec!["ok"],                 // ack for the move
            vec![idle.as_str(), "ok"],  // idle poll
        ]);
        client.config.poll_interval = Duration::from_millis(1);
        let pose = Pose {
            x: Some(202.0),
            z: Some(181.0),
            ..Default::default()
        };
        client.go_to_cartesian_ptp(&pose, None).unwrap();
        let sent = &client.transport.as_ref().unwrap().sent;
        assert_eq!(sent[0], "M20 G90 G0 X202 Z181 F2000");
        assert_eq!(sent[1], "?");
    }

    #[test]
    fn disconnect_is_idempotent_and_final() {
        let mut client = connected(vec![]);
        client.disconnect();
        assert!(!client.is_connected());
        client.disconnect();
        assert!(matches!(
            client.send(&Command::new("M50"), WaitPolicy::ack()),
            Err(ClientError::NotConnected)
        ));
    }

    #[test]
    fn unexpected_reset_mid_exchange() {
        let mut client = connected(vec![vec!["Using reset pos!"]]);
        let err = client
            .send(&Command::new("M50"), WaitPolicy::ack())
            .unwrap_err();
        assert!(matches!(err, ClientError::UnexpectedReset));
    }

    #[test]
    fn double_ack_config_collects_two_terminals() {
        let mut transport = ScriptedTransport::new(vec![vec!["ok", "ok"]]);
        transport.inbox.push_back("Using reset pos!".into());
        let mut config = ClientConfig::default();
        config.double_ack = true;
        let mut client = Client::from_transport(transport, config).unwrap();

        let reply = client.send(&Command::new("M50"), WaitPolicy::ack()).unwrap();
        assert_eq!(reply.lines().unwrap().len(), 2);
    }
}
