//! Device connections.
//!
//! A [`DeviceConnection`] owns the single session to one Modbus device and
//! serializes every request through an async mutex, so pollers sharing a
//! device queue instead of interleaving frames. Sessions are opened through
//! the [`Connector`] seam; [`TcpConnector`] is the production transport.

use std::fmt;
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::{Mutex, watch};
use tokio::time::timeout;
use tokio_modbus::client::Context;
use tokio_modbus::prelude::*;
use tracing::{debug, info};

/// Address of one device: host, port and the unit id it answers to.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct DeviceEndpoint {
    pub host: String,
    pub port: u16,
    pub unit_id: u8,
}

impl DeviceEndpoint {
    pub fn new(host: impl Into<String>, port: u16, unit_id: u8) -> Self {
        Self {
            host: host.into(),
            port,
            unit_id,
        }
    }
}

impl fmt::Display for DeviceEndpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)?;
        if self.unit_id != 1 {
            write!(f, "#{}", self.unit_id)?;
        }
        Ok(())
    }
}

/// Connection state of a device.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum ConnectionState {
    #[default]
    Disconnected,
    Connecting,
    Connected,
    /// The last connect or request failed; the next poll reconnects.
    Failed,
}

impl ConnectionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Connected => "connected",
            ConnectionState::Failed => "failed",
        }
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Failure to establish a session.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConnectionError {
    #[error("cannot resolve {host}: {message}")]
    Resolve { host: String, message: String },
    #[error("connection refused: {0}")]
    Refused(String),
    #[error("connect timed out after {0:?}")]
    Timeout(Duration),
}

/// Failure of a single register request.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ReadError {
    #[error("request timed out after {0:?}")]
    Timeout(Duration),
    /// Exception response, malformed reply or transport error.
    #[error("protocol error: {0}")]
    Protocol(String),
    #[error("no active session")]
    Disconnected,
}

/// An open session able to read holding registers.
#[async_trait]
pub trait RegisterSession: Send {
    /// Issue one Read Holding Registers request.
    async fn read_holding_registers(&mut self, address: u16, count: u16)
    -> Result<Vec<u16>, ReadError>;

    /// Close the session.
    async fn disconnect(&mut self) -> std::io::Result<()>;
}

/// Opens sessions to devices.
#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(
        &self,
        endpoint: &DeviceEndpoint,
    ) -> Result<Box<dyn RegisterSession>, ConnectionError>;
}

/// Modbus TCP transport backed by `tokio-modbus`.
#[derive(Debug, Clone, Copy, Default)]
pub struct TcpConnector;

#[async_trait]
impl Connector for TcpConnector {
    async fn connect(
        &self,
        endpoint: &DeviceEndpoint,
    ) -> Result<Box<dyn RegisterSession>, ConnectionError> {
        let addr = resolve(endpoint).await?;
        let ctx = tcp::connect_slave(addr, Slave(endpoint.unit_id))
            .await
            .map_err(|e| ConnectionError::Refused(e.to_string()))?;

        Ok(Box::new(ModbusTcpSession { ctx }))
    }
}

async fn resolve(endpoint: &DeviceEndpoint) -> Result<SocketAddr, ConnectionError> {
    let resolve_error = |message: String| ConnectionError::Resolve {
        host: endpoint.host.clone(),
        message,
    };

    tokio::net::lookup_host((endpoint.host.as_str(), endpoint.port))
        .await
        .map_err(|e| resolve_error(e.to_string()))?
        .next()
        .ok_or_else(|| resolve_error("no addresses found".to_string()))
}

struct ModbusTcpSession {
    ctx: Context,
}

#[async_trait]
impl RegisterSession for ModbusTcpSession {
    async fn read_holding_registers(
        &mut self,
        address: u16,
        count: u16,
    ) -> Result<Vec<u16>, ReadError> {
        self.ctx
            .read_holding_registers(address, count)
            .await
            .map_err(|e| ReadError::Protocol(e.to_string()))?
            .map_err(|e| ReadError::Protocol(format!("exception: {e:?}")))
    }

    async fn disconnect(&mut self) -> std::io::Result<()> {
        self.ctx.disconnect().await
    }
}

/// Session slot guarded by the connection mutex.
#[derive(Default)]
struct Slot {
    session: Option<Box<dyn RegisterSession>>,
    /// Error of the latest connect attempt, if it failed.
    last_failure: Option<ConnectionError>,
}

/// The single session to one device.
///
/// State is only changed here; pollers observe it through [`state`](Self::state).
/// A failed session is dropped and reopened in place on the next
/// [`connect`](Self::connect); the connection itself lives as long as the
/// source.
pub struct DeviceConnection {
    endpoint: DeviceEndpoint,
    timeout: Duration,
    connector: Arc<dyn Connector>,
    slot: Mutex<Slot>,
    /// Completed connect attempts. Only advanced while `slot` is held.
    attempts: AtomicU64,
    state: watch::Sender<ConnectionState>,
}

impl fmt::Debug for DeviceConnection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeviceConnection")
            .field("endpoint", &self.endpoint)
            .field("timeout", &self.timeout)
            .field("state", &self.state())
            .finish()
    }
}

impl DeviceConnection {
    /// Create a disconnected connection. `timeout` bounds connects and requests.
    pub fn new(endpoint: DeviceEndpoint, timeout: Duration, connector: Arc<dyn Connector>) -> Self {
        let (state, _) = watch::channel(ConnectionState::Disconnected);
        Self {
            endpoint,
            timeout,
            connector,
            slot: Mutex::new(Slot::default()),
            attempts: AtomicU64::new(0),
            state,
        }
    }

    pub fn endpoint(&self) -> &DeviceEndpoint {
        &self.endpoint
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub fn state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    /// Watch state transitions.
    pub fn subscribe_state(&self) -> watch::Receiver<ConnectionState> {
        self.state.subscribe()
    }

    fn set_state(&self, state: ConnectionState) {
        let previous = self.state.send_replace(state);
        if previous != state {
            debug!(device = %self.endpoint, from = %previous, to = %state, "Connection state changed");
        }
    }

    /// Open a session unless one is already active.
    ///
    /// Callers queued behind an attempt that failed get that attempt's error
    /// instead of dialing again, so a dead device costs one timeout per
    /// round no matter how many pollers share it.
    pub async fn connect(&self) -> Result<(), ConnectionError> {
        let seen = self.attempts.load(Ordering::Acquire);
        let mut slot = self.slot.lock().await;

        if slot.session.is_some() && self.state() == ConnectionState::Connected {
            return Ok(());
        }
        if self.attempts.load(Ordering::Acquire) != seen {
            if let Some(failure) = &slot.last_failure {
                return Err(failure.clone());
            }
        }

        if let Some(mut stale) = slot.session.take() {
            match timeout(self.timeout, stale.disconnect()).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => debug!(device = %self.endpoint, error = %e, "Error dropping stale session"),
                Err(_) => debug!(device = %self.endpoint, "Stale session disconnect timed out"),
            }
        }

        self.set_state(ConnectionState::Connecting);

        let result = match timeout(self.timeout, self.connector.connect(&self.endpoint)).await {
            Ok(result) => result,
            Err(_) => Err(ConnectionError::Timeout(self.timeout)),
        };
        self.attempts.fetch_add(1, Ordering::Release);

        match result {
            Ok(opened) => {
                slot.session = Some(opened);
                slot.last_failure = None;
                self.set_state(ConnectionState::Connected);
                info!(device = %self.endpoint, "Connected to Modbus device");
                Ok(())
            }
            Err(e) => {
                slot.last_failure = Some(e.clone());
                self.set_state(ConnectionState::Failed);
                Err(e)
            }
        }
    }

    /// Read `count` holding registers starting at `address`.
    ///
    /// Requests on one connection never overlap. Any failure, including a
    /// missing session, drops the session and marks the connection failed;
    /// nothing is retried here.
    pub async fn read_registers(&self, address: u16, count: u16) -> Result<Vec<u16>, ReadError> {
        let mut slot = self.slot.lock().await;
        let Some(session) = slot.session.as_mut() else {
            self.set_state(ConnectionState::Failed);
            return Err(ReadError::Disconnected);
        };

        let result = match timeout(self.timeout, session.read_holding_registers(address, count)).await {
            Ok(result) => result,
            Err(_) => Err(ReadError::Timeout(self.timeout)),
        };

        if result.is_err() {
            slot.session = None;
            self.set_state(ConnectionState::Failed);
        }

        result
    }

    /// Wait for any in-flight request, then close the session.
    pub async fn close(&self) {
        let mut slot = self.slot.lock().await;

        if let Some(mut session) = slot.session.take() {
            match timeout(self.timeout, session.disconnect()).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => debug!(device = %self.endpoint, error = %e, "Error disconnecting"),
                Err(_) => debug!(device = %self.endpoint, "Disconnect timed out"),
            }
        }

        self.set_state(ConnectionState::Disconnected);
    }
}
