//! Publishing sinks.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use busline_bridge_framework::{BridgeError, Publisher, TelemetryPoint, TelemetryValue};
use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::poller::PollFault;

/// Source name carried by every published point.
pub const SOURCE_NAME: &str = "modbus";

#[derive(Debug, Error)]
pub enum SinkError {
    #[error(transparent)]
    Bridge(#[from] BridgeError),
}

/// Destination of poll results.
///
/// Errors are reported per call; the caller logs them and keeps going.
#[async_trait]
pub trait MetricSink: Send + Sync + 'static {
    async fn submit_value(
        &self,
        metric: &str,
        timestamp: DateTime<Utc>,
        value: f64,
    ) -> Result<(), SinkError>;

    /// Record that `metric` has no value at `timestamp`.
    async fn submit_gap(
        &self,
        metric: &str,
        timestamp: DateTime<Utc>,
        fault: &PollFault,
    ) -> Result<(), SinkError>;
}

#[async_trait]
impl<S: MetricSink> MetricSink for Arc<S> {
    async fn submit_value(
        &self,
        metric: &str,
        timestamp: DateTime<Utc>,
        value: f64,
    ) -> Result<(), SinkError> {
        (**self).submit_value(metric, timestamp, value).await
    }

    async fn submit_gap(
        &self,
        metric: &str,
        timestamp: DateTime<Utc>,
        fault: &PollFault,
    ) -> Result<(), SinkError> {
        (**self).submit_gap(metric, timestamp, fault).await
    }
}

/// Publishes results as [`TelemetryPoint`]s on Zenoh.
///
/// Each metric goes to `<key_prefix>/<metric levels>`; gaps go to the same
/// key with a [`TelemetryValue::Gap`] payload.
pub struct ZenohSink {
    publisher: Publisher,
    units: HashMap<String, String>,
}

impl ZenohSink {
    pub fn new(publisher: Publisher) -> Self {
        Self {
            publisher,
            units: HashMap::new(),
        }
    }

    /// Attach a `unit` label to the points of these metrics.
    pub fn with_units(mut self, units: HashMap<String, String>) -> Self {
        self.units = units;
        self
    }

    fn point(&self, metric: &str, timestamp: DateTime<Utc>, value: TelemetryValue) -> TelemetryPoint {
        build_point(&self.units, metric, timestamp, value)
    }
}

fn build_point(
    units: &HashMap<String, String>,
    metric: &str,
    timestamp: DateTime<Utc>,
    value: TelemetryValue,
) -> TelemetryPoint {
    let point = TelemetryPoint::new(SOURCE_NAME, metric, value).with_timestamp(timestamp.timestamp_millis());
    match units.get(metric) {
        Some(unit) => point.with_label("unit", unit),
        None => point,
    }
}

#[async_trait]
impl MetricSink for ZenohSink {
    async fn submit_value(
        &self,
        metric: &str,
        timestamp: DateTime<Utc>,
        value: f64,
    ) -> Result<(), SinkError> {
        let point = self.point(metric, timestamp, TelemetryValue::Gauge(value));
        self.publisher.publish(&point).await?;
        Ok(())
    }

    async fn submit_gap(
        &self,
        metric: &str,
        timestamp: DateTime<Utc>,
        fault: &PollFault,
    ) -> Result<(), SinkError> {
        let value = TelemetryValue::gap(fault.kind.as_str(), fault.kind.is_transient());
        let point = self.point(metric, timestamp, value);
        self.publisher.publish(&point).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    use crate::poller::FaultKind;

    #[test]
    fn test_value_point() {
        let units = HashMap::from([("room.E4.power".to_string(), "W".to_string())]);
        let timestamp = Utc.timestamp_millis_opt(1_700_000_000_123).unwrap();

        let point = build_point(&units, "room.E4.power", timestamp, TelemetryValue::Gauge(50.125));
        assert_eq!(point.source, "modbus");
        assert_eq!(point.timestamp, 1_700_000_000_123);
        assert_eq!(point.value, TelemetryValue::Gauge(50.125));
        assert_eq!(point.labels.get("unit").map(String::as_str), Some("W"));
    }

    #[test]
    fn test_gap_point_has_no_unit_without_mapping() {
        let fault = PollFault::new(FaultKind::Timeout, "request timed out after 1s");
        let value = TelemetryValue::gap(fault.kind.as_str(), fault.kind.is_transient());

        let point = build_point(&HashMap::new(), "tank.level", Utc::now(), value);
        assert!(point.is_gap());
        assert!(point.labels.is_empty());
        assert_eq!(
            point.value,
            TelemetryValue::Gap {
                fault: "timeout".into(),
                retryable: true
            }
        );
    }
}
