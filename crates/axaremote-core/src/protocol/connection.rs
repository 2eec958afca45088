//! Connection management
//!
//! [`AxaRemote`] is the top-level handle: it owns the transport choice, the
//! connect/disconnect lifecycle, and a [`Session`] once connected, and
//! delegates the device operations to it.

use std::fmt;
use std::io::Write;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use super::channel::{Channel, SerialChannel, TcpChannel};
use super::codec::MotionState;
use super::error::ProtocolError;
use super::serial::open_port;
use super::session::{CancelToken, Session, WaitTarget};
use super::{DEFAULT_POLL_INTERVAL_MS, DEFAULT_READ_TIMEOUT_MS, DEFAULT_WAIT_TIMEOUT_MS};
use crate::demo::{DemoTimings, DemoWindowOpener};

/// How to reach the window opener.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TransportConfig {
    /// Local serial port, e.g. `/dev/ttyUSB0`.
    Serial {
        /// Port name.
        port: String,
    },
    /// Transparent serial-to-network bridge (ser2net raw mode).
    Bridge {
        /// Bridge hostname or address.
        host: String,
        /// Bridge TCP port.
        port: u16,
    },
    /// Built-in simulated device.
    Demo,
}

impl fmt::Display for TransportConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransportConfig::Serial { port } => write!(f, "serial {port}"),
            TransportConfig::Bridge { host, port } => write!(f, "bridge {host}:{port}"),
            TransportConfig::Demo => write!(f, "demo"),
        }
    }
}

/// Connection settings: transport plus timing knobs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionConfig {
    /// Transport to use.
    pub transport: TransportConfig,

    /// Deadline for a single reply read, in milliseconds.
    pub read_timeout_ms: u64,

    /// Cadence of the `wait_until` status poll, in milliseconds.
    pub poll_interval_ms: u64,

    /// Overall `wait_until` deadline, in milliseconds.
    pub wait_timeout_ms: u64,
}

impl ConnectionConfig {
    fn with_transport(transport: TransportConfig) -> Self {
        Self {
            transport,
            read_timeout_ms: DEFAULT_READ_TIMEOUT_MS,
            poll_interval_ms: DEFAULT_POLL_INTERVAL_MS,
            wait_timeout_ms: DEFAULT_WAIT_TIMEOUT_MS,
        }
    }

    /// Config for a local serial port, with default timings.
    pub fn serial(port: impl Into<String>) -> Self {
        Self::with_transport(TransportConfig::Serial { port: port.into() })
    }

    /// Config for a serial-to-network bridge, with default timings.
    pub fn bridge(host: impl Into<String>, port: u16) -> Self {
        Self::with_transport(TransportConfig::Bridge {
            host: host.into(),
            port,
        })
    }

    /// Config for the simulated device, with default timings.
    pub fn demo() -> Self {
        Self::with_transport(TransportConfig::Demo)
    }

    fn read_timeout(&self) -> Duration {
        Duration::from_millis(self.read_timeout_ms)
    }
}

/// Lifecycle state of an [`AxaRemote`] handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConnectionState {
    /// No transport open.
    Disconnected,
    /// Transport being established and the device probed.
    Connecting,
    /// Session established, device identified.
    Connected,
    /// The last connect attempt failed.
    Error,
}

/// Handle to one window opener. Owns the session; operations other than
/// `connect` fail with [`ProtocolError::NotConnected`] until connected.
pub struct AxaRemote {
    config: ConnectionConfig,
    state: ConnectionState,
    session: Option<Session<Box<dyn Channel>>>,
    device: Option<String>,
    version: Option<String>,
}

impl AxaRemote {
    /// Handle with the given configuration, initially disconnected.
    pub fn new(config: ConnectionConfig) -> Self {
        Self {
            config,
            state: ConnectionState::Disconnected,
            session: None,
            device: None,
            version: None,
        }
    }

    /// Current lifecycle state.
    pub fn state(&self) -> ConnectionState {
        self.state
    }

    /// The configuration this handle was built with.
    pub fn config(&self) -> &ConnectionConfig {
        &self.config
    }

    /// Device type string, once connected.
    pub fn device(&self) -> Option<&str> {
        self.device.as_deref()
    }

    /// Firmware version string, once connected.
    pub fn version(&self) -> Option<&str> {
        self.version.as_deref()
    }

    /// Open the transport, wake the device, and probe its identity and
    /// status. Fails with [`ProtocolError::AlreadyConnected`] if a session
    /// is already up.
    pub fn connect(&mut self) -> Result<(), ProtocolError> {
        if self.session.is_some() {
            return Err(ProtocolError::AlreadyConnected);
        }
        self.state = ConnectionState::Connecting;
        info!(transport = %self.config.transport, "connecting");
        match self.try_connect() {
            Ok(()) => {
                self.state = ConnectionState::Connected;
                info!(
                    device = self.device.as_deref().unwrap_or("?"),
                    version = self.version.as_deref().unwrap_or("?"),
                    "connected"
                );
                Ok(())
            }
            Err(e) => {
                warn!(transport = %self.config.transport, error = %e, "connect failed");
                self.session = None;
                self.state = ConnectionState::Error;
                Err(e)
            }
        }
    }

    fn try_connect(&mut self) -> Result<(), ProtocolError> {
        let mut channel: Box<dyn Channel> = match &self.config.transport {
            TransportConfig::Serial { port } => Box::new(SerialChannel::new(open_port(port)?)),
            TransportConfig::Bridge { host, port } => {
                Box::new(TcpChannel::connect(host, *port, self.config.read_timeout())?)
            }
            TransportConfig::Demo => Box::new(DemoWindowOpener::new(DemoTimings::default())),
        };

        // Wake the line and drop whatever the device chattered while we
        // were away.
        channel
            .write_all(b"\r\n")
            .map_err(super::error::TransportError::Io)?;
        channel.flush().map_err(super::error::TransportError::Io)?;
        std::thread::sleep(Duration::from_millis(50));
        channel
            .clear_input()
            .map_err(super::error::TransportError::Io)?;

        let mut session = Session::new(channel, self.config.read_timeout());
        let (device, version) = session.identify()?;
        let state = session.status()?;
        debug!(device, version, %state, "device probed");

        self.device = Some(device);
        self.version = Some(version);
        self.session = Some(session);
        Ok(())
    }

    /// Drop the session and transport. Idempotent.
    pub fn disconnect(&mut self) {
        if self.session.take().is_some() {
            info!(transport = %self.config.transport, "disconnected");
        }
        self.state = ConnectionState::Disconnected;
    }

    fn session_mut(&mut self) -> Result<&mut Session<Box<dyn Channel>>, ProtocolError> {
        self.session.as_mut().ok_or(ProtocolError::NotConnected)
    }

    /// Query the current motion state.
    pub fn status(&mut self) -> Result<MotionState, ProtocolError> {
        self.session_mut()?.status()
    }

    /// Start opening the window.
    pub fn open(&mut self) -> Result<(), ProtocolError> {
        self.session_mut()?.open()
    }

    /// Start closing the window.
    pub fn close(&mut self) -> Result<(), ProtocolError> {
        self.session_mut()?.close()
    }

    /// Stop the motor.
    pub fn stop(&mut self) -> Result<(), ProtocolError> {
        self.session_mut()?.stop()
    }

    /// Last motion state reported by the device, without issuing a command.
    pub fn last_state(&self) -> MotionState {
        self.session
            .as_ref()
            .map(Session::last_state)
            .unwrap_or(MotionState::Unknown)
    }

    /// Estimated position, 0.0 closed to 100.0 open.
    pub fn position(&mut self) -> Result<f32, ProtocolError> {
        Ok(self.session_mut()?.position())
    }

    /// Seed the position estimate from externally persisted state.
    pub fn restore_position(&mut self, position: f32) -> Result<(), ProtocolError> {
        self.session_mut()?.restore_position(position);
        Ok(())
    }

    /// Move to an estimated position between fully closed (0.0) and fully
    /// open (100.0); intermediate targets block until the motor is stopped
    /// at the target.
    pub fn set_position(
        &mut self,
        target: f32,
        cancel: &CancelToken,
    ) -> Result<(), ProtocolError> {
        self.session_mut()?.set_position(target, cancel)
    }

    /// Poll until the window reaches `target`, using the configured poll
    /// interval and overall deadline.
    pub fn wait_until(
        &mut self,
        target: WaitTarget,
        cancel: &CancelToken,
    ) -> Result<MotionState, ProtocolError> {
        let poll = Duration::from_millis(self.config.poll_interval_ms);
        let timeout = Duration::from_millis(self.config.wait_timeout_ms);
        self.session_mut()?.wait_until(target, poll, timeout, cancel)
    }

    /// Like [`AxaRemote::wait_until`], reporting each observed state and
    /// estimated position to `observer`.
    pub fn wait_until_with(
        &mut self,
        target: WaitTarget,
        cancel: &CancelToken,
        observer: impl FnMut(MotionState, f32),
    ) -> Result<MotionState, ProtocolError> {
        let poll = Duration::from_millis(self.config.poll_interval_ms);
        let timeout = Duration::from_millis(self.config.wait_timeout_ms);
        self.session_mut()?
            .wait_until_observed(target, poll, timeout, cancel, observer)
    }
}

impl Drop for AxaRemote {
    fn drop(&mut self) {
        self.disconnect();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_starts_disconnected() {
        let axa = AxaRemote::new(ConnectionConfig::serial("/dev/ttyUSB0"));
        assert_eq!(axa.state(), ConnectionState::Disconnected);
        assert_eq!(axa.device(), None);
    }

    #[test]
    fn test_operations_require_connection() {
        let mut axa = AxaRemote::new(ConnectionConfig::demo());
        assert!(matches!(axa.status(), Err(ProtocolError::NotConnected)));
        assert!(matches!(axa.open(), Err(ProtocolError::NotConnected)));
        assert_eq!(axa.last_state(), MotionState::Unknown);
    }

    #[test]
    fn test_demo_connect_and_probe() {
        let mut axa = AxaRemote::new(ConnectionConfig::demo());
        axa.connect().expect("demo connect");
        assert_eq!(axa.state(), ConnectionState::Connected);
        assert_eq!(axa.device(), Some("AXA RV2900"));
        assert_eq!(axa.version(), Some("2.03"));
        // The simulated device boots locked.
        assert_eq!(axa.last_state(), MotionState::Locked);

        assert!(matches!(axa.connect(), Err(ProtocolError::AlreadyConnected)));

        axa.disconnect();
        assert_eq!(axa.state(), ConnectionState::Disconnected);
        assert!(matches!(axa.status(), Err(ProtocolError::NotConnected)));
    }

    #[test]
    fn test_demo_open_then_stop() {
        let mut axa = AxaRemote::new(ConnectionConfig::demo());
        axa.connect().expect("demo connect");
        axa.open().expect("open ack");
        assert_eq!(axa.status().expect("status"), MotionState::Opening);
        axa.stop().expect("stop ack");
        assert_eq!(axa.status().expect("status"), MotionState::Stopped);
    }

    #[test]
    fn test_config_constructors() {
        let cfg = ConnectionConfig::bridge("bridge.local", 3001);
        assert_eq!(
            cfg.transport,
            TransportConfig::Bridge {
                host: "bridge.local".to_string(),
                port: 3001,
            }
        );
        assert_eq!(cfg.read_timeout_ms, DEFAULT_READ_TIMEOUT_MS);
        assert_eq!(cfg.wait_timeout_ms, DEFAULT_WAIT_TIMEOUT_MS);
    }
}
