//! Scheduled polling of one group of metrics.
//!
//! Each [`Poller`] owns one [`PollGroup`] and a shared handle to the
//! group's [`DeviceConnection`]. On every tick it (re)connects if needed,
//! reads the group's register block and emits one [`PollResult`] per metric:
//! a value on success, a failure marker otherwise. A failed tick never ends
//! the loop; only shutdown does.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use thiserror::Error;
use tokio::sync::{mpsc, watch};
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use crate::connection::{ConnectionError, ConnectionState, DeviceConnection, ReadError};
use crate::decoder::{DecodeError, decode_at};
use crate::metric::PollGroup;

/// Outcome of polling one metric once.
#[derive(Debug, Clone, PartialEq)]
pub struct PollResult {
    pub metric: String,
    /// When the read completed (or failed).
    pub timestamp: DateTime<Utc>,
    pub outcome: PollOutcome,
}

#[derive(Debug, Clone, PartialEq)]
pub enum PollOutcome {
    Value(f64),
    Failure(PollFault),
}

impl PollResult {
    pub fn is_failure(&self) -> bool {
        matches!(self.outcome, PollOutcome::Failure(_))
    }

    pub fn value(&self) -> Option<f64> {
        match self.outcome {
            PollOutcome::Value(v) => Some(v),
            PollOutcome::Failure(_) => None,
        }
    }
}

/// Classification of a failed poll.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FaultKind {
    /// Rejected at startup; never reaches a poller.
    Configuration,
    Connection,
    Timeout,
    Protocol,
    Disconnected,
    /// The metric's registers could not be decoded. Persists until restart.
    Decode,
}

impl FaultKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            FaultKind::Configuration => "configuration",
            FaultKind::Connection => "connection",
            FaultKind::Timeout => "timeout",
            FaultKind::Protocol => "protocol",
            FaultKind::Disconnected => "disconnected",
            FaultKind::Decode => "decode",
        }
    }

    /// Whether the fault may clear by itself on a later tick.
    pub fn is_transient(&self) -> bool {
        !matches!(self, FaultKind::Configuration | FaultKind::Decode)
    }
}

impl fmt::Display for FaultKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Why a metric has no value for a tick.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{kind}: {message}")]
pub struct PollFault {
    pub kind: FaultKind,
    pub message: String,
}

impl PollFault {
    pub fn new(kind: FaultKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }
}

impl From<ConnectionError> for PollFault {
    fn from(err: ConnectionError) -> Self {
        let kind = match err {
            ConnectionError::Timeout(_) => FaultKind::Timeout,
            ConnectionError::Resolve { .. } | ConnectionError::Refused(_) => FaultKind::Connection,
        };
        Self::new(kind, err.to_string())
    }
}

impl From<ReadError> for PollFault {
    fn from(err: ReadError) -> Self {
        let kind = match err {
            ReadError::Timeout(_) => FaultKind::Timeout,
            ReadError::Protocol(_) => FaultKind::Protocol,
            ReadError::Disconnected => FaultKind::Disconnected,
        };
        Self::new(kind, err.to_string())
    }
}

impl From<DecodeError> for PollFault {
    fn from(err: DecodeError) -> Self {
        Self::new(FaultKind::Decode, err.to_string())
    }
}

/// The result channel is gone; nothing left to poll for.
struct ResultsClosed;

/// Polls one [`PollGroup`] until shutdown.
pub struct Poller {
    group: PollGroup,
    device: Arc<DeviceConnection>,
    results: mpsc::Sender<PollResult>,
    previous_block: Option<Vec<u16>>,
    decode_faults: Vec<Option<PollFault>>,
    consecutive_failures: u64,
}

impl Poller {
    pub fn new(
        group: PollGroup,
        device: Arc<DeviceConnection>,
        results: mpsc::Sender<PollResult>,
    ) -> Self {
        let decode_faults = vec![None; group.metrics().len()];
        Self {
            group,
            device,
            results,
            previous_block: None,
            decode_faults,
            consecutive_failures: 0,
        }
    }

    /// Poll immediately, then on every multiple of the sampling interval
    /// until `shutdown` turns true (or its sender is dropped).
    ///
    /// Shutdown cancels the wait between ticks at once; a read already in
    /// progress finishes or times out first.
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) {
        let period = self.group.sampling_interval();

        info!(
            device = %self.group.device(),
            base_address = self.group.base_address(),
            registers = self.group.register_count(),
            metrics = self.group.metrics().len(),
            interval_ms = period.as_millis() as u64,
            "Starting poller"
        );

        let stopping = *shutdown.borrow_and_update();
        if stopping || self.poll_once(&shutdown).await.is_err() {
            return;
        }

        let start = Instant::now() + until_next_deadline(Utc::now(), period);
        let mut ticker = tokio::time::interval_at(start, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                biased;

                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow_and_update() {
                        break;
                    }
                }
                deadline = ticker.tick() => {
                    if self.poll_once(&shutdown).await.is_err() {
                        debug!(device = %self.group.device(), "Result channel closed");
                        break;
                    }
                    warn_missed(&self.group, deadline, period);
                }
            }
        }

        debug!(device = %self.group.device(), "Poller stopped");
    }

    /// One tick. Does not dial a disconnected device once `shutdown` is set.
    async fn poll_once(&mut self, shutdown: &watch::Receiver<bool>) -> Result<(), ResultsClosed> {
        if self.device.state() != ConnectionState::Connected {
            if *shutdown.borrow() {
                return Ok(());
            }
            if let Err(e) = self.device.connect().await {
                return self.fail(e.into()).await;
            }
        }

        let started = Instant::now();
        let read = self
            .device
            .read_registers(self.group.base_address(), self.group.register_count())
            .await;
        let timestamp = Utc::now();

        match read {
            Ok(block) => {
                debug!(
                    device = %self.group.device(),
                    elapsed_us = started.elapsed().as_micros() as u64,
                    "Read completed"
                );
                self.recovered();
                self.publish_block(timestamp, block).await
            }
            Err(e) => self.fail(e.into()).await,
        }
    }

    async fn publish_block(
        &mut self,
        timestamp: DateTime<Utc>,
        block: Vec<u16>,
    ) -> Result<(), ResultsClosed> {
        if self.group.double_sample() {
            if self.previous_block.as_ref() == Some(&block) {
                debug!(device = %self.group.device(), "Skipping repeated double sample");
                // Only one skip in a row.
                self.previous_block = None;
                return Ok(());
            }
            self.previous_block = Some(block.clone());
        }

        for (metric, decode_fault) in self.group.metrics().iter().zip(&mut self.decode_faults) {
            let outcome = match decode_fault {
                Some(fault) => PollOutcome::Failure(fault.clone()),
                None => match decode_at(&block, self.group.offset_of(metric)) {
                    Ok(value) => PollOutcome::Value(f64::from(value)),
                    Err(e) => {
                        error!(
                            metric = %metric.name,
                            device = %metric.device,
                            error = %e,
                            "Cannot decode metric; it stays faulted until restart"
                        );
                        let fault = PollFault::from(e);
                        *decode_fault = Some(fault.clone());
                        PollOutcome::Failure(fault)
                    }
                },
            };

            let result = PollResult {
                metric: metric.name.clone(),
                timestamp,
                outcome,
            };
            self.results.send(result).await.map_err(|_| ResultsClosed)?;
        }

        Ok(())
    }

    /// Emit a failure marker for every metric of the group.
    async fn fail(&mut self, fault: PollFault) -> Result<(), ResultsClosed> {
        self.consecutive_failures += 1;
        if self.consecutive_failures == 1 {
            warn!(device = %self.group.device(), error = %fault, "Poll failed");
        } else {
            debug!(
                device = %self.group.device(),
                error = %fault,
                failures = self.consecutive_failures,
                "Poll still failing"
            );
        }

        let timestamp = Utc::now();
        for metric in self.group.metrics() {
            let result = PollResult {
                metric: metric.name.clone(),
                timestamp,
                outcome: PollOutcome::Failure(fault.clone()),
            };
            self.results.send(result).await.map_err(|_| ResultsClosed)?;
        }

        Ok(())
    }

    fn recovered(&mut self) {
        if self.consecutive_failures > 0 {
            info!(
                device = %self.group.device(),
                failures = self.consecutive_failures,
                "Device recovered"
            );
            self.consecutive_failures = 0;
        }
    }
}

/// Time from `now` until the next wall-clock multiple of `period`.
fn until_next_deadline(now: DateTime<Utc>, period: Duration) -> Duration {
    let period_ns = period.as_nanos();
    if period_ns == 0 {
        return Duration::ZERO;
    }
    let now_ns = now.timestamp_nanos_opt().unwrap_or_default().max(0) as u128;
    let remainder = now_ns % period_ns;
    if remainder == 0 {
        Duration::ZERO
    } else {
        Duration::from_nanos((period_ns - remainder) as u64)
    }
}

/// Number of whole periods between `deadline` and `now`.
fn missed_intervals(deadline: Instant, now: Instant, period: Duration) -> u32 {
    let late = now.saturating_duration_since(deadline);
    (late.as_nanos() / period.as_nanos().max(1)) as u32
}

fn warn_missed(group: &PollGroup, deadline: Instant, period: Duration) {
    let missed = missed_intervals(deadline, Instant::now(), period);
    if missed > 0 {
        warn!(
            device = %group.device(),
            missed,
            late_ms = Instant::now().saturating_duration_since(deadline).as_millis() as u64,
            "Missed polling deadline"
        );
    }
}
