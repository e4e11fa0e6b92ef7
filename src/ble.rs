//! Bluetooth LE transport and async client.
//!
//! The device exposes a UART-style GATT service: one characteristic carries
//! both directions, outbound writes chunked to the LE payload limit and
//! inbound lines arriving as notifications. A pump task reassembles the
//! notification chunks into lines and feeds a bounded channel; if the
//! consumer stalls, the pump blocks on the channel rather than buffering
//! without limit.

use std::time::Duration;

use btleplug::api::{
    Central, Characteristic, Manager as _, Peripheral as _, ScanFilter, WriteType,
};
use btleplug::platform::{Adapter, Manager, Peripheral};
use futures::{Stream, StreamExt};
use log::{debug, trace};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use uuid::Uuid;

use crate::ack::{AckCollector, AckPolicy};
use crate::client::{Reply, WaitPolicy};
use crate::command::Command;
use crate::error::{ClientError, Result, TransportError};
use crate::line::WireLine;
use crate::ops::{self, JointTarget, Pose, PwmRange, PwmSetting};
use crate::status::DeviceStatus;
use crate::transport::{terminate, LineSplitter};

/// UART-style service advertised by the device.
pub const SERVICE_UUID: Uuid = Uuid::from_u128(0x0000ffe0_0000_1000_8000_00805f9b34fb);
/// The single read/write/notify characteristic within it.
pub const CHARACTERISTIC_UUID: Uuid = Uuid::from_u128(0x0000ffe1_0000_1000_8000_00805f9b34fb);
/// Local name the device advertises under.
pub const ADVERTISED_NAME: &str = "QN-Mini6Axis";

/// Maximum bytes per write to the characteristic.
const CHUNK: usize = 20;
/// Capacity of the notification line queue.
const LINE_QUEUE: usize = 32;

/// BLE link parameters.
#[derive(Debug, Clone)]
pub struct BleConfig {
    /// Advertised local name to connect to, when no address is given.
    pub device_name: String,
    /// Connect to this exact address instead of matching by name.
    pub address: Option<String>,
    /// How long to scan before giving up on discovery.
    pub scan_timeout: Duration,
}

impl Default for BleConfig {
    fn default() -> Self {
        Self {
            device_name: ADVERTISED_NAME.to_string(),
            address: None,
            scan_timeout: Duration::from_secs(10),
        }
    }
}

impl BleConfig {
    async fn matches(&self, peripheral: &Peripheral) -> std::result::Result<bool, TransportError> {
        if let Some(addr) = &self.address {
            return Ok(peripheral
                .address()
                .to_string()
                .eq_ignore_ascii_case(addr));
        }
        let name = peripheral.properties().await?.and_then(|p| p.local_name);
        match name {
            Some(n) if n == self.device_name => Ok(true),
            Some(n) => {
                trace!("skipping {n}");
                Ok(false)
            }
            None => Ok(false),
        }
    }

    fn target(&self) -> &str {
        self.address.as_deref().unwrap_or(&self.device_name)
    }
}

/// An open BLE link to the device.
pub struct BleTransport {
    peripheral: Peripheral,
    characteristic: Characteristic,
    lines: mpsc::Receiver<String>,
    pump: JoinHandle<()>,
}

impl BleTransport {
    /// Scan for the device by advertised name, connect, and subscribe to the
    /// UART characteristic.
    pub async fn connect(config: &BleConfig) -> std::result::Result<Self, TransportError> {
        let manager = Manager::new().await?;
        let adapter = manager
            .adapters()
            .await?
            .into_iter()
            .next()
            .ok_or(btleplug::Error::DeviceNotFound)?;

        let peripheral = Self::discover(&adapter, config).await?;
        peripheral.connect().await?;
        peripheral.discover_services().await?;

        let characteristic = peripheral
            .characteristics()
            .into_iter()
            .find(|c| c.uuid == CHARACTERISTIC_UUID)
            .ok_or(TransportError::CharacteristicNotFound {
                uuid: CHARACTERISTIC_UUID,
            })?;

        peripheral.subscribe(&characteristic).await?;
        debug!("subscribed to {}", CHARACTERISTIC_UUID);

        let notifications = peripheral.notifications().await?;
        let chunks = notifications
            .filter(|n| futures::future::ready(n.uuid == CHARACTERISTIC_UUID))
            .map(|n| n.value);
        let (lines, pump) = spawn_line_pump(chunks);

        Ok(Self {
            peripheral,
            characteristic,
            lines,
            pump,
        })
    }

    async fn discover(
        adapter: &Adapter,
        config: &BleConfig,
    ) -> std::result::Result<Peripheral, TransportError> {
        adapter
            .start_scan(ScanFilter {
                services: vec![SERVICE_UUID],
            })
            .await?;

        let deadline = Instant::now() + config.scan_timeout;
        let found = loop {
            let mut matched = None;
            for peripheral in adapter.peripherals().await? {
                if config.matches(&peripheral).await? {
                    matched = Some(peripheral);
                    break;
                }
            }
            if matched.is_some() {
                break matched;
            }
            if Instant::now() >= deadline {
                break None;
            }
            tokio::time::sleep(Duration::from_millis(250)).await;
        };

        adapter.stop_scan().await?;
        match found {
            Some(p) => Ok(p),
            None => Err(TransportError::DeviceNotFound {
                name: config.target().to_string(),
            }),
        }
    }

    /// Write one line, terminator appended, chunked to the payload limit.
    pub async fn send_line(&mut self, line: &str) -> std::result::Result<(), TransportError> {
        let framed = terminate(line);
        for chunk in framed.as_bytes().chunks(CHUNK) {
            self.peripheral
                .write(&self.characteristic, chunk, WriteType::WithoutResponse)
                .await?;
        }
        Ok(())
    }

    /// Receive the next reassembled line, or time out.
    pub async fn recv_line(
        &mut self,
        timeout: Duration,
    ) -> std::result::Result<String, TransportError> {
        match tokio::time::timeout(timeout, self.lines.recv()).await {
            Ok(Some(line)) => Ok(line),
            Ok(None) => Err(TransportError::Disconnected),
            Err(_) => Err(TransportError::Timeout { timeout }),
        }
    }

    /// Unsubscribe and drop the link, best-effort.
    pub async fn close(&mut self) {
        self.pump.abort();
        if let Err(e) = self.peripheral.unsubscribe(&self.characteristic).await {
            trace!("unsubscribe failed: {e}");
        }
        if let Err(e) = self.peripheral.disconnect().await {
            trace!("disconnect failed: {e}");
        }
        debug!("closed BLE link");
    }
}

impl Drop for BleTransport {
    fn drop(&mut self) {
        self.pump.abort();
    }
}

/// Reassemble notification chunks into lines on a bounded queue. When the
/// queue is full the pump awaits capacity, so slow consumers exert
/// backpressure instead of growing an unbounded buffer.
fn spawn_line_pump<S>(chunks: S) -> (mpsc::Receiver<String>, JoinHandle<()>)
where
    S: Stream<Item = Vec<u8>> + Send + 'static,
{
    let (tx, rx) = mpsc::channel(LINE_QUEUE);
    let task = tokio::spawn(async move {
        futures::pin_mut!(chunks);
        let mut splitter = LineSplitter::new();
        while let Some(chunk) = chunks.next().await {
            for line in splitter.feed(&chunk) {
                if tx.send(line).await.is_err() {
                    return;
                }
            }
        }
    });
    (rx, task)
}

/// Client tuning knobs for the BLE link. Unlike the serial default, the
/// device acknowledges every command twice over BLE, so `double_ack` starts
/// on.
#[derive(Debug, Clone)]
pub struct BleClientConfig {
    pub ble: BleConfig,
    pub recv_timeout: Duration,
    pub poll_interval: Duration,
    pub idle_timeout: Option<Duration>,
    pub double_ack: bool,
    pub default_speed: u32,
    pub pump_pwm: PwmRange,
    pub valve_pwm: PwmRange,
    pub wait: bool,
}

impl Default for BleClientConfig {
    fn default() -> Self {
        Self {
            ble: BleConfig::default(),
            recv_timeout: Duration::from_secs(5),
            poll_interval: Duration::from_millis(100),
            idle_timeout: None,
            double_ack: true,
            default_speed: 2000,
            pump_pwm: PwmRange { on: 0, off: 1000 },
            valve_pwm: PwmRange { on: 65, off: 40 },
            wait: true,
        }
    }
}

/// Async twin of the serial client, one command in flight at a time.
///
/// There is no banner to drain here: subscribing attaches to a device that
/// is already running, so construction completes as soon as the GATT setup
/// does.
pub struct BleMirobot {
    transport: BleTransport,
    config: BleClientConfig,
    status: DeviceStatus,
    open: bool,
}

impl BleMirobot {
    /// Discover, connect, and subscribe.
    pub async fn connect(config: BleClientConfig) -> Result<Self> {
        let transport = BleTransport::connect(&config.ble).await?;
        Ok(Self {
            transport,
            config,
            status: DeviceStatus::default(),
            open: true,
        })
    }

    pub fn is_connected(&self) -> bool {
        self.open
    }

    /// Close the link. Idempotent; a closed client stays closed.
    pub async fn disconnect(&mut self) {
        if self.open {
            self.transport.close().await;
            self.open = false;
        }
    }

    /// The last successfully parsed status snapshot.
    pub fn status(&self) -> &DeviceStatus {
        &self.status
    }

    /// Dispatch one command under `policy`. Same fault semantics as the
    /// serial client.
    pub async fn send(&mut self, cmd: &Command, policy: WaitPolicy) -> Result<Reply> {
        cmd.validate()?;
        if !self.open {
            return Err(ClientError::NotConnected);
        }
        let wire = cmd.wire();
        self.transport.send_line(&wire).await?;
        if !policy.quiet {
            debug!("[SENT] {wire}");
        }

        if !policy.wait_for_ok {
            return Ok(Reply::Sent);
        }

        let lines = self.collect_ack(policy.quiet).await?;

        if policy.wait_for_idle {
            self.wait_until_idle().await?;
        }

        Ok(Reply::Ack(lines))
    }

    /// Issue a status query (`?`) and return the raw reply lines.
    pub async fn query_status(&mut self) -> Result<Vec<WireLine>> {
        let reply = self.send(&ops::status_query(), WaitPolicy::ack()).await?;
        match reply {
            Reply::Ack(lines) => Ok(lines),
            Reply::Sent => Ok(Vec::new()),
        }
    }

    /// Query, parse, and cache the status snapshot.
    pub async fn update_status(&mut self) -> Result<&DeviceStatus> {
        self.update_status_inner(false).await
    }

    /// Poll status until the device reports Idle, bounded by the configured
    /// idle timeout when set.
    pub async fn wait_until_idle(&mut self) -> Result<()> {
        let deadline = self.config.idle_timeout.map(|t| (t, Instant::now() + t));

        loop {
            self.update_status_inner(true).await?;
            if self.status.state.is_idle() {
                return Ok(());
            }
            if let Some((timeout, at)) = deadline {
                if Instant::now() >= at {
                    return Err(TransportError::Timeout { timeout }.into());
                }
            }
            tokio::time::sleep(self.config.poll_interval).await;
        }
    }

    /// Home all axes simultaneously.
    pub async fn home_simultaneous(&mut self) -> Result<Reply> {
        self.send(&ops::home_simultaneous(), self.motion_policy()).await
    }

    /// Home each axis individually.
    pub async fn home_individual(&mut self) -> Result<Reply> {
        self.send(&ops::home_individual(), self.motion_policy()).await
    }

    /// Unlock the axis shafts.
    pub async fn unlock_shaft(&mut self) -> Result<Reply> {
        self.send(&ops::unlock_shaft(), self.plain_policy()).await
    }

    /// Absolute move in joint space.
    pub async fn go_to_axis(&mut self, target: &JointTarget, speed: Option<u32>) -> Result<Reply> {
        let cmd = ops::go_to_axis(target, self.speed(speed));
        self.send(&cmd, self.motion_policy()).await
    }

    /// Relative move in joint space.
    pub async fn increment_axis(
        &mut self,
        target: &JointTarget,
        speed: Option<u32>,
    ) -> Result<Reply> {
        let cmd = ops::increment_axis(target, self.speed(speed));
        self.send(&cmd, self.motion_policy()).await
    }

    /// Absolute point-to-point cartesian move.
    pub async fn go_to_cartesian_ptp(&mut self, pose: &Pose, speed: Option<u32>) -> Result<Reply> {
        let cmd = ops::go_to_cartesian_ptp(pose, self.speed(speed));
        self.send(&cmd, self.motion_policy()).await
    }

    /// Absolute linear cartesian move.
    pub async fn go_to_cartesian_lin(&mut self, pose: &Pose, speed: Option<u32>) -> Result<Reply> {
        let cmd = ops::go_to_cartesian_lin(pose, self.speed(speed));
        self.send(&cmd, self.motion_policy()).await
    }

    /// Relative point-to-point cartesian move.
    pub async fn increment_cartesian_ptp(
        &mut self,
        pose: &Pose,
        speed: Option<u32>,
    ) -> Result<Reply> {
        let cmd = ops::increment_cartesian_ptp(pose, self.speed(speed));
        self.send(&cmd, self.motion_policy()).await
    }

    /// Relative linear cartesian move.
    pub async fn increment_cartesian_lin(
        &mut self,
        pose: &Pose,
        speed: Option<u32>,
    ) -> Result<Reply> {
        let cmd = ops::increment_cartesian_lin(pose, self.speed(speed));
        self.send(&cmd, self.motion_policy()).await
    }

    /// Set the pneumatic pump duty cycle.
    pub async fn set_air_pump(&mut self, setting: PwmSetting) -> Result<Reply> {
        let pwm = setting.resolve(&self.config.pump_pwm);
        self.send(&ops::set_air_pump(pwm), self.motion_policy()).await
    }

    /// Set the valve duty cycle.
    pub async fn set_valve(&mut self, setting: PwmSetting) -> Result<Reply> {
        let pwm = setting.resolve(&self.config.valve_pwm);
        self.send(&ops::set_valve(pwm), self.motion_policy()).await
    }

    /// Send all axes to their zero positions.
    pub async fn go_to_zero(&mut self, speed: Option<u32>) -> Result<Reply> {
        self.go_to_axis(&JointTarget::zeroed(), speed).await
    }

    /// Enable or disable the soft limits.
    pub async fn set_soft_limit(&mut self, on: bool) -> Result<Reply> {
        self.send(&ops::set_soft_limit(on), self.plain_policy()).await
    }

    /// Enable or disable the hard limits.
    pub async fn set_hard_limit(&mut self, on: bool) -> Result<Reply> {
        self.send(&ops::set_hard_limit(on), self.plain_policy()).await
    }

    /// Begin the calibration sequence.
    pub async fn start_calibration(&mut self) -> Result<Reply> {
        self.send(&ops::start_calibration(), self.plain_policy()).await
    }

    /// Finish calibration and persist the results.
    pub async fn finish_calibration(&mut self) -> Result<Reply> {
        self.send(&ops::finish_calibration(), self.plain_policy()).await
    }

    /// Replay a sequence of variable assignments. Each line is validated
    /// before it is sent.
    pub async fn reset_configuration<'a>(
        &mut self,
        lines: impl IntoIterator<Item = &'a str>,
    ) -> Result<Vec<Reply>> {
        let mut replies = Vec::new();
        for line in lines {
            let cmd = Command::raw_variable(line.trim());
            replies.push(self.send(&cmd, self.plain_policy()).await?);
        }
        Ok(replies)
    }

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

    async fn update_status_inner(&mut self, quiet: bool) -> Result<&DeviceStatus> {
        let reply = self
            .send(
                &ops::status_query(),
                WaitPolicy {
                    wait_for_ok: true,
                    wait_for_idle: false,
                    quiet,
                },
            )
            .await?;
        let lines = match reply {
            Reply::Ack(lines) => lines,
            Reply::Sent => Vec::new(),
        };
        let first = lines.first().map(WireLine::as_str).unwrap_or_default();
        self.status = DeviceStatus::parse(first)?;
        Ok(&self.status)
    }

    async fn collect_ack(&mut self, quiet: bool) -> Result<Vec<WireLine>> {
        let mut collector = AckCollector::new(AckPolicy {
            reset_expected: false,
            double_ack: self.config.double_ack,
        });
        loop {
            let raw = self.transport.recv_line(self.config.recv_timeout).await?;
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

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn gatt_uuids() {
        assert_eq!(
            SERVICE_UUID.to_string(),
            "0000ffe0-0000-1000-8000-00805f9b34fb"
        );
        assert_eq!(
            CHARACTERISTIC_UUID.to_string(),
            "0000ffe1-0000-1000-8000-00805f9b34fb"
        );
    }

    #[test]
    fn write_chunking_covers_whole_frame() {
        let framed = terminate("M20 G90 G0 X202.5 Y-14.25 Z181 A0 B0 C0 F2000");
        let chunks: Vec<&[u8]> = framed.as_bytes().chunks(CHUNK).collect();
        assert!(chunks.len() > 1);
        assert!(chunks.iter().all(|c| c.len() <= CHUNK));
        let total: usize = chunks.iter().map(|c| c.len()).sum();
        assert_eq!(total, framed.len());
    }

    #[tokio::test]
    async fn pump_reassembles_across_chunk_boundaries() {
        let chunks = futures::stream::iter(vec![
            b"<Idle,Angle(ABCD".to_vec(),
            b"XYZ):0>\r\nok".to_vec(),
            b"\r\n".to_vec(),
        ]);
        let (mut rx, task) = spawn_line_pump(chunks);
        assert_eq!(rx.recv().await.as_deref(), Some("<Idle,Angle(ABCDXYZ):0>"));
        assert_eq!(rx.recv().await.as_deref(), Some("ok"));
        assert_eq!(rx.recv().await, None);
        task.await.unwrap();
    }

    #[tokio::test]
    async fn pump_stops_when_receiver_drops() {
        let chunks = futures::stream::iter(vec![b"ok\r\nok\r\n".to_vec()]);
        let (rx, task) = spawn_line_pump(chunks);
        drop(rx);
        task.await.unwrap();
    }
}
