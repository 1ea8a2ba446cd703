//! Shared fakes for the Modbus source integration tests.

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use busline_bridge_framework::{BridgeConfig, BridgeError};
use busline_source_modbus::connection::{ConnectionError, ReadError, RegisterSession};
use busline_source_modbus::sink::SinkError;
use busline_source_modbus::{
    Connector, DeviceEndpoint, FaultKind, MetricSink, ModbusSourceConfig, PollFault, Topology,
};
use chrono::{DateTime, Utc};

/// One result as seen by the sink.
#[derive(Debug, Clone, PartialEq)]
pub struct Record {
    pub metric: String,
    pub timestamp: DateTime<Utc>,
    pub value: Option<f64>,
    pub fault: Option<FaultKind>,
}

/// Sink that keeps everything it receives.
#[derive(Default)]
pub struct RecordingSink {
    records: Mutex<Vec<Record>>,
    reject: bool,
}

impl RecordingSink {
    /// A sink that records but reports every submission as failed.
    pub fn rejecting() -> Self {
        Self {
            records: Mutex::new(Vec::new()),
            reject: true,
        }
    }

    pub fn records(&self) -> Vec<Record> {
        self.records.lock().unwrap().clone()
    }

    pub fn for_metric(&self, metric: &str) -> Vec<Record> {
        self.records()
            .into_iter()
            .filter(|r| r.metric == metric)
            .collect()
    }

    pub fn values(&self, metric: &str) -> Vec<f64> {
        self.for_metric(metric).iter().filter_map(|r| r.value).collect()
    }

    pub fn gaps(&self, metric: &str) -> Vec<FaultKind> {
        self.for_metric(metric).iter().filter_map(|r| r.fault).collect()
    }

    fn push(&self, record: Record) -> Result<(), SinkError> {
        self.records.lock().unwrap().push(record);
        if self.reject {
            Err(SinkError::Bridge(BridgeError::Publish {
                key: "busline/modbus/test".into(),
                message: "no route".into(),
            }))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl MetricSink for RecordingSink {
    async fn submit_value(
        &self,
        metric: &str,
        timestamp: DateTime<Utc>,
        value: f64,
    ) -> Result<(), SinkError> {
        self.push(Record {
            metric: metric.to_string(),
            timestamp,
            value: Some(value),
            fault: None,
        })
    }

    async fn submit_gap(
        &self,
        metric: &str,
        timestamp: DateTime<Utc>,
        fault: &PollFault,
    ) -> Result<(), SinkError> {
        self.push(Record {
            metric: metric.to_string(),
            timestamp,
            value: None,
            fault: Some(fault.kind),
        })
    }
}

/// How a fake device behaves.
#[derive(Debug, Clone, Copy)]
pub enum Behavior {
    /// Refuses every connection.
    Unreachable,
    /// Never answers a connection attempt.
    Blackhole,
    /// Answers every register with its own address after `delay`.
    Echo { delay: Duration },
    /// Stalls the first `stalled_reads` requests, then echoes at once.
    Recovering { stalled_reads: usize },
}

/// Request bookkeeping shared by all sessions of a [`FakeConnector`].
#[derive(Debug, Default)]
pub struct Counters {
    pub connects: AtomicUsize,
    pub open_sessions: AtomicUsize,
    pub in_flight: AtomicUsize,
    pub max_in_flight: AtomicUsize,
    pub requests: AtomicUsize,
}

/// In-memory transport keyed by host name.
pub struct FakeConnector {
    behaviors: HashMap<String, Behavior>,
    pub counters: Arc<Counters>,
}

impl FakeConnector {
    pub fn new(behaviors: impl IntoIterator<Item = (&'static str, Behavior)>) -> Self {
        Self {
            behaviors: behaviors
                .into_iter()
                .map(|(host, behavior)| (host.to_string(), behavior))
                .collect(),
            counters: Arc::default(),
        }
    }
}

#[async_trait]
impl Connector for FakeConnector {
    async fn connect(
        &self,
        endpoint: &DeviceEndpoint,
    ) -> Result<Box<dyn RegisterSession>, ConnectionError> {
        self.counters.connects.fetch_add(1, Ordering::SeqCst);
        let (delay, stalled_reads) = match self.behaviors.get(&endpoint.host) {
            Some(Behavior::Echo { delay }) => (*delay, 0),
            Some(Behavior::Recovering { stalled_reads }) => (Duration::ZERO, *stalled_reads),
            Some(Behavior::Blackhole) => {
                tokio::time::sleep(Duration::from_secs(60)).await;
                return Err(ConnectionError::Timeout(Duration::from_secs(60)));
            }
            Some(Behavior::Unreachable) | None => {
                return Err(ConnectionError::Refused("connection refused".into()));
            }
        };

        self.counters.open_sessions.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(EchoSession {
            delay,
            stalled_reads,
            counters: self.counters.clone(),
        }))
    }
}

struct EchoSession {
    delay: Duration,
    /// Requests (counted across sessions) that never get an answer.
    stalled_reads: usize,
    counters: Arc<Counters>,
}

/// Counts a request as in flight until dropped, even when abandoned.
struct InFlight<'a>(&'a Counters);

impl<'a> InFlight<'a> {
    /// Returns the guard and the request's index among all requests.
    fn enter(counters: &'a Counters) -> (Self, usize) {
        let index = counters.requests.fetch_add(1, Ordering::SeqCst);
        let now = counters.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        counters.max_in_flight.fetch_max(now, Ordering::SeqCst);
        (Self(counters), index)
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.in_flight.fetch_sub(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl RegisterSession for EchoSession {
    async fn read_holding_registers(
        &mut self,
        address: u16,
        count: u16,
    ) -> Result<Vec<u16>, ReadError> {
        let (_in_flight, index) = InFlight::enter(&self.counters);
        if index < self.stalled_reads {
            std::future::pending::<()>().await;
        }
        tokio::time::sleep(self.delay).await;
        Ok((0..count).map(|i| address.wrapping_add(i)).collect())
    }

    async fn disconnect(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

impl Drop for EchoSession {
    fn drop(&mut self) {
        self.counters.open_sessions.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Value an echo device reports for the metric at `address`.
pub fn echo_value(address: u16) -> f64 {
    let bits = (u32::from(address) << 16) | u32::from(address.wrapping_add(1));
    f64::from(f32::from_bits(bits))
}

pub fn topology(json5: &str) -> Topology {
    let config = ModbusSourceConfig::from_json5(json5).unwrap();
    Topology::build(&config.modbus).unwrap()
}

/// Poll `check` until it holds or `limit` passes.
pub async fn wait_for(limit: Duration, mut check: impl FnMut() -> bool) -> bool {
    let deadline = tokio::time::Instant::now() + limit;
    while tokio::time::Instant::now() < deadline {
        if check() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    check()
}
