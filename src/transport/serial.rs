//! Synchronous serial transport.
//!
//! Fully blocking, one thread per connection: `send_line`, `recv_line`, and
//! the caller's idle-poll sleeps all run on the calling thread. Exclusive
//! access is enforced at the OS level so a second *process* cannot open the
//! same port while a connection holds it.

use std::io::{Read, Write};
use std::time::{Duration, Instant};

use log::{debug, trace};
#[cfg(unix)]
use log::warn;
use serialport::{SerialPort, StopBits};

use crate::error::{ClientError, TransportError};
use crate::transport::{terminate, LineSplitter, LineTransport};

#[cfg(unix)]
type NativePort = serialport::TTYPort;
#[cfg(windows)]
type NativePort = serialport::COMPort;

/// Serial line parameters.
#[derive(Debug, Clone)]
pub struct SerialConfig {
    pub baud_rate: u32,
    pub stop_bits: StopBits,
    /// Request an OS-level exclusivity lock on open. The attempt is
    /// non-blocking: a held lock fails immediately with
    /// [`TransportError::Lock`].
    pub exclusive: bool,
    /// Timeout applied to the port handle when it is opened. Every
    /// [`LineTransport::recv_line`] call replaces it with its own deadline,
    /// so acknowledgment waits are governed by the caller's timeout, not
    /// this field.
    pub read_timeout: Duration,
}

impl Default for SerialConfig {
    fn default() -> Self {
        Self {
            baud_rate: 115_200,
            stop_bits: StopBits::One,
            exclusive: true,
            read_timeout: Duration::from_secs(5),
        }
    }
}

/// An open serial connection to the device.
pub struct SerialTransport {
    port: NativePort,
    port_name: String,
    exclusive: bool,
    splitter: LineSplitter,
    /// Lines split from the stream but not yet consumed by `recv_line`.
    pending: Vec<String>,
    read_buf: [u8; 256],
}

impl SerialTransport {
    /// Open and configure `port_name`, acquiring the exclusivity lock first
    /// when requested.
    pub fn open(port_name: &str, config: &SerialConfig) -> Result<Self, TransportError> {
        debug!("opening serial port {port_name}");
        let builder = serialport::new(port_name, config.baud_rate)
            .stop_bits(config.stop_bits)
            .timeout(config.read_timeout);

        #[allow(unused_mut)]
        let mut port = builder.open_native().map_err(|source| TransportError::Open {
            port: port_name.to_string(),
            source,
        })?;

        // Windows serial handles are exclusive by construction; on unix the
        // lock is TIOCEXCL, taken without blocking.
        #[cfg(unix)]
        if config.exclusive && port.set_exclusive(true).is_err() {
            return Err(TransportError::Lock {
                port: port_name.to_string(),
            });
        }

        debug!("opened serial port {port_name}");
        Ok(Self {
            port,
            port_name: port_name.to_string(),
            exclusive: config.exclusive,
            splitter: LineSplitter::new(),
            pending: Vec::new(),
            read_buf: [0u8; 256],
        })
    }

    /// Scan the system's serial ports for candidates that can be opened and
    /// locked. Exactly one usable port is required; zero or several is an
    /// error rather than something to resolve silently.
    pub fn find_port(config: &SerialConfig) -> Result<String, ClientError> {
        let ports = serialport::available_ports().map_err(TransportError::from)?;
        let scanned = ports.len();

        let mut usable = Vec::new();
        for info in ports {
            match Self::open(&info.port_name, config) {
                Ok(mut probe) => {
                    probe.close();
                    usable.push(info.port_name);
                }
                Err(e) => {
                    trace!("skipping {}: {e}", info.port_name);
                }
            }
        }

        pick_single(scanned, usable)
    }

    pub fn port_name(&self) -> &str {
        &self.port_name
    }
}

/// Discovery decision rule: exactly one usable candidate, or nothing.
fn pick_single(scanned: usize, mut usable: Vec<String>) -> Result<String, ClientError> {
    if usable.len() == 1 {
        Ok(usable.remove(0))
    } else {
        Err(ClientError::AmbiguousPort {
            scanned,
            usable: usable.len(),
        })
    }
}

impl LineTransport for SerialTransport {
    fn send_line(&mut self, line: &str) -> Result<(), TransportError> {
        let framed = terminate(line);
        self.port
            .write_all(framed.as_bytes())
            .map_err(TransportError::Write)?;
        self.port.flush().map_err(TransportError::Write)?;
        Ok(())
    }

    fn recv_line(&mut self, timeout: Duration) -> Result<String, TransportError> {
        if !self.pending.is_empty() {
            return Ok(self.pending.remove(0));
        }

        let deadline = Instant::now() + timeout;
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Err(TransportError::Timeout { timeout });
            }
            self.port.set_timeout(remaining)?;

            match self.port.read(&mut self.read_buf) {
                Ok(0) => return Err(TransportError::Disconnected),
                Ok(n) => {
                    let mut lines = self.splitter.feed(&self.read_buf[..n]);
                    if !lines.is_empty() {
                        let first = lines.remove(0);
                        self.pending.extend(lines);
                        return Ok(first);
                    }
                    // Partial line — keep reading until the deadline.
                }
                Err(e)
                    if e.kind() == std::io::ErrorKind::TimedOut
                        || e.kind() == std::io::ErrorKind::WouldBlock =>
                {
                    return Err(TransportError::Timeout { timeout });
                }
                Err(e) => return Err(TransportError::Read(e)),
            }
        }
    }

    fn close(&mut self) {
        #[cfg(unix)]
        if self.exclusive {
            if let Err(e) = self.port.set_exclusive(false) {
                warn!("failed to unlock {}: {e}", self.port_name);
            }
        }
        debug!("closed serial port {}", self.port_name);
        // The OS handle itself is released on drop.
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config() {
        let cfg = SerialConfig::default();
        assert_eq!(cfg.baud_rate, 115_200);
        assert_eq!(cfg.stop_bits, StopBits::One);
        assert!(cfg.exclusive);
    }

    #[test]
    fn open_missing_port_fails() {
        let err = SerialTransport::open("/dev/nonexistent-mirolink", &SerialConfig::default())
            .err()
            .expect("open should fail");
        assert!(matches!(err, TransportError::Open { .. }));
    }

    #[test]
    fn discovery_requires_exactly_one_usable_port() {
        assert_eq!(
            pick_single(3, vec!["/dev/ttyUSB0".into()]).unwrap(),
            "/dev/ttyUSB0"
        );

        assert!(matches!(
            pick_single(3, vec![]),
            Err(ClientError::AmbiguousPort {
                scanned: 3,
                usable: 0
            })
        ));

        assert!(matches!(
            pick_single(4, vec!["/dev/ttyUSB0".into(), "/dev/ttyUSB1".into()]),
            Err(ClientError::AmbiguousPort {
                scanned: 4,
                usable: 2
            })
        ));
    }

    #[cfg(unix)]
    #[test]
    fn exclusive_lock_guards_second_open() {
        use std::io::{Read as _, Write as _};

        let (mut master, slave) = serialport::TTYPort::pair().expect("pty pair");
        let path = slave.name().expect("slave path");
        drop(slave);

        let config = SerialConfig {
            read_timeout: Duration::from_secs(2),
            ..Default::default()
        };
        let mut first = SerialTransport::open(&path, &config).expect("first open");

        // A second holder is refused either at open (EBUSY) or at the lock
        // attempt. TIOCEXCL does not bind privileged processes, so a
        // successful second open under such a runner is tolerated.
        match SerialTransport::open(&path, &config) {
            Err(TransportError::Open { .. }) | Err(TransportError::Lock { .. }) => {}
            Err(other) => panic!("unexpected error kind: {other}"),
            Ok(_) => {}
        }

        // The first connection keeps working regardless.
        first.send_line("M50").unwrap();
        master.set_timeout(Duration::from_secs(2)).unwrap();
        let mut received = Vec::new();
        let mut buf = [0u8; 16];
        while received.len() < 5 {
            let n = master.read(&mut buf).expect("read echoed command");
            received.extend_from_slice(&buf[..n]);
        }
        assert_eq!(received, b"M50\r\n");

        master.write_all(b"ok\r\n").unwrap();
        let line = first.recv_line(Duration::from_secs(2)).unwrap();
        assert_eq!(line, "ok");
    }

    #[cfg(unix)]
    #[test]
    fn recv_deadline_overrides_configured_read_timeout() {
        let (_master, slave) = serialport::TTYPort::pair().expect("pty pair");
        let path = slave.name().expect("slave path");
        drop(slave);

        let config = SerialConfig {
            read_timeout: Duration::from_secs(60),
            ..Default::default()
        };
        let mut transport = SerialTransport::open(&path, &config).expect("open");

        let start = Instant::now();
        let err = transport.recv_line(Duration::from_millis(50)).unwrap_err();
        assert!(matches!(err, TransportError::Timeout { .. }));
        // The per-call deadline governs, not the 60 s port setting.
        assert!(start.elapsed() < Duration::from_secs(5));
    }
}
