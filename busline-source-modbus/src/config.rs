//! Configuration for the Modbus source.

use std::collections::BTreeMap;
use std::time::Duration;

use busline_bridge_framework::{BridgeConfig, BridgeError, Format, LoggingConfig, ZenohConfig};
use busline_common::KEY_PREFIX;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::hostlist::{self, HostListError};

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid interval '{0}'")]
    Interval(String),
    #[error("invalid hostlist '{expr}': {source}")]
    HostList {
        expr: String,
        #[source]
        source: HostListError,
    },
    #[error("{0}")]
    Validation(String),
}

impl From<ConfigError> for BridgeError {
    fn from(err: ConfigError) -> Self {
        BridgeError::validation(err.to_string())
    }
}

/// Complete source configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModbusSourceConfig {
    /// Zenoh connection settings
    #[serde(default)]
    pub zenoh: ZenohConfig,

    /// Payload encoding for published points
    #[serde(default)]
    pub serialization: Format,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,

    /// Modbus-specific settings
    pub modbus: ModbusConfig,
}

/// Modbus polling configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModbusConfig {
    /// Key expression prefix (default: "busline/modbus")
    #[serde(default = "default_key_prefix")]
    pub key_prefix: String,

    /// Default interval for groups that do not set their own
    #[serde(default)]
    pub interval: Option<IntervalSetting>,

    /// Host entries, each expanding to one or more devices
    pub hosts: Vec<HostConfig>,
}

fn default_key_prefix() -> String {
    format!("{KEY_PREFIX}/modbus")
}

/// One host entry. `hosts` and `names` are hostlist expressions that must
/// expand to the same number of items.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct HostConfig {
    /// Hosts to query, e.g. `meter[1-3].example.com`
    pub hosts: String,

    /// Metric name prefix per host, e.g. `room.E[1-3]`
    pub names: String,

    /// TCP port (default: 502)
    #[serde(default = "default_port")]
    pub port: u16,

    /// Modbus unit id (0-247, or 255 for TCP gateways)
    #[serde(default = "default_unit_id")]
    pub unit_id: u8,

    /// Prefixed to every metric description of this entry
    #[serde(default)]
    pub description: String,

    /// Connect and request timeout in milliseconds
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,

    /// Query groups
    pub groups: Vec<GroupConfig>,
}

fn default_port() -> u16 {
    502
}

fn default_unit_id() -> u8 {
    1
}

fn default_timeout_ms() -> u64 {
    1000
}

/// Metrics queried together with one request.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct GroupConfig {
    /// Query interval; falls back to `modbus.interval`
    #[serde(default)]
    pub interval: Option<IntervalSetting>,

    /// Sample twice per interval and drop one identical repeat
    #[serde(default)]
    pub double_sample: bool,

    /// Metric name (relative to the host name) to register mapping
    pub metrics: BTreeMap<String, MetricConfig>,
}

/// A single float metric spanning two holding registers.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MetricConfig {
    /// Address of the first register
    pub address: u16,

    #[serde(default)]
    pub description: String,

    #[serde(default)]
    pub unit: Option<String>,
}

/// An interval given either in seconds or as a string with unit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum IntervalSetting {
    Seconds(f64),
    Text(String),
}

impl IntervalSetting {
    /// Convert to a positive duration.
    pub fn to_duration(&self) -> Result<Duration, ConfigError> {
        match self {
            IntervalSetting::Seconds(secs) => seconds(*secs, &secs.to_string()),
            IntervalSetting::Text(text) => parse_interval(text),
        }
    }
}

/// Parse an interval such as `100ms`, `2min`, `1h 30min`, `1.5s` or a bare
/// number of seconds.
pub fn parse_interval(text: &str) -> Result<Duration, ConfigError> {
    let trimmed = text.trim();
    let duration = match humantime::parse_duration(trimmed) {
        Ok(duration) => duration,
        Err(_) => parse_decimal(trimmed).ok_or_else(|| ConfigError::Interval(text.to_string()))?,
    };

    if duration.is_zero() {
        return Err(ConfigError::Interval(text.to_string()));
    }
    Ok(duration)
}

/// Single decimal number with an optional unit, which humantime rejects.
fn parse_decimal(text: &str) -> Option<Duration> {
    let split = text
        .find(|c: char| !(c.is_ascii_digit() || c == '.'))
        .unwrap_or(text.len());
    let (number, unit) = text.split_at(split);
    let value: f64 = number.parse().ok()?;

    let scale = match unit.trim() {
        "" | "s" => 1.0,
        "ns" => 1e-9,
        "us" | "μs" => 1e-6,
        "ms" => 1e-3,
        "min" => 60.0,
        "h" => 3600.0,
        _ => return None,
    };

    Duration::try_from_secs_f64(value * scale).ok()
}

fn seconds(value: f64, text: &str) -> Result<Duration, ConfigError> {
    match Duration::try_from_secs_f64(value) {
        Ok(duration) if !duration.is_zero() => Ok(duration),
        _ => Err(ConfigError::Interval(text.to_string())),
    }
}

/// Render a duration the way intervals are written in configuration.
pub fn format_interval(interval: Duration) -> String {
    humantime::format_duration(interval).to_string()
}

impl HostConfig {
    /// Expand into `(host, metric prefix)` pairs.
    pub fn expand(&self) -> Result<Vec<(String, String)>, ConfigError> {
        let hosts = expand_list(&self.hosts)?;
        let names = expand_list(&self.names)?;

        if hosts.len() != names.len() {
            return Err(ConfigError::Validation(format!(
                "'{}' expands to {} hosts but '{}' to {} names",
                self.hosts,
                hosts.len(),
                self.names,
                names.len()
            )));
        }

        Ok(hosts.into_iter().zip(names).collect())
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

fn expand_list(expr: &str) -> Result<Vec<String>, ConfigError> {
    hostlist::expand(expr).map_err(|source| ConfigError::HostList {
        expr: expr.to_string(),
        source,
    })
}

impl ModbusConfig {
    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.key_prefix.trim_matches('/').is_empty() {
            return Err(ConfigError::Validation(
                "key_prefix cannot be empty".to_string(),
            ));
        }

        if let Some(interval) = &self.interval {
            interval.to_duration()?;
        }

        if self.hosts.is_empty() {
            return Err(ConfigError::Validation(
                "At least one host must be configured".to_string(),
            ));
        }

        for host in &self.hosts {
            let context = |msg: String| ConfigError::Validation(format!("Host '{}': {msg}", host.hosts));

            if host.port == 0 {
                return Err(context("port must be non-zero".to_string()));
            }
            if host.unit_id > 247 && host.unit_id != 255 {
                return Err(context(format!(
                    "unit_id {} out of range (0-247 or 255)",
                    host.unit_id
                )));
            }
            if host.timeout_ms == 0 {
                return Err(context("timeout_ms must be positive".to_string()));
            }
            if host.groups.is_empty() {
                return Err(context("at least one group required".to_string()));
            }

            host.expand()?;

            for group in &host.groups {
                if group.metrics.is_empty() {
                    return Err(context("group must have at least one metric".to_string()));
                }
                let interval = group
                    .interval
                    .as_ref()
                    .or(self.interval.as_ref())
                    .map(IntervalSetting::to_duration)
                    .transpose()?;
                if let Some(interval) = interval {
                    if group.double_sample && (interval / 2).is_zero() {
                        return Err(context(format!(
                            "interval {} is too short for double sampling",
                            format_interval(interval)
                        )));
                    }
                }
                for (name, metric) in &group.metrics {
                    if name.trim_matches('.').is_empty() {
                        return Err(context("metric name cannot be empty".to_string()));
                    }
                    if metric.address > u16::MAX - 1 {
                        return Err(context(format!(
                            "metric '{name}': address {} leaves no room for two registers",
                            metric.address
                        )));
                    }
                }
            }
        }

        Ok(())
    }
}

impl BridgeConfig for ModbusSourceConfig {
    fn zenoh(&self) -> &ZenohConfig {
        &self.zenoh
    }

    fn logging(&self) -> &LoggingConfig {
        &self.logging
    }

    fn key_prefix(&self) -> &str {
        &self.modbus.key_prefix
    }

    fn serialization(&self) -> Format {
        self.serialization
    }

    fn validate(&self) -> busline_bridge_framework::Result<()> {
        self.modbus.validate()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    const EXAMPLE: &str = r#"{
        zenoh: { mode: "peer" },
        serialization: "cbor",
        modbus: {
            interval: "1s",
            hosts: [
                {
                    hosts: "meter[1-3].example.com",
                    names: "room.E[1-3]",
                    unit_id: 1,
                    description: "Power meter",
                    groups: [
                        {
                            interval: "100ms",
                            metrics: {
                                power: { address: 100, description: "Active power", unit: "W" },
                                voltage: { address: 102, unit: "V" },
                            },
                        },
                        {
                            double_sample: true,
                            metrics: { energy: { address: 200 } },
                        },
                    ],
                },
            ],
        },
    }"#;

    #[test]
    fn test_parse_example() {
        let config = ModbusSourceConfig::from_json5(EXAMPLE).unwrap();
        assert_eq!(config.key_prefix(), "busline/modbus");
        assert_eq!(config.serialization(), Format::Cbor);

        let host = &config.modbus.hosts[0];
        assert_eq!(host.port, 502);
        assert_eq!(host.timeout(), Duration::from_secs(1));
        assert_eq!(host.groups.len(), 2);
        assert_eq!(host.groups[0].metrics["power"].unit.as_deref(), Some("W"));
        assert!(host.groups[1].double_sample);

        let expanded = host.expand().unwrap();
        assert_eq!(expanded.len(), 3);
        assert_eq!(
            expanded[2],
            ("meter3.example.com".to_string(), "room.E3".to_string())
        );
    }

    #[test]
    fn test_numeric_interval() {
        let config = ModbusSourceConfig::from_json5(
            r#"{ modbus: { interval: 0.5, hosts: [
                { hosts: "plc", names: "plc", groups: [{ interval: 2, metrics: { t: { address: 0 } } }] }
            ] } }"#,
        )
        .unwrap();

        assert_eq!(
            config.modbus.interval.unwrap().to_duration().unwrap(),
            Duration::from_millis(500)
        );
        assert_eq!(
            config.modbus.hosts[0].groups[0]
                .interval
                .as_ref()
                .unwrap()
                .to_duration()
                .unwrap(),
            Duration::from_secs(2)
        );
    }

    #[test]
    fn test_parse_interval_units() {
        assert_eq!(parse_interval("100ms").unwrap(), Duration::from_millis(100));
        assert_eq!(parse_interval("1.5s").unwrap(), Duration::from_millis(1500));
        assert_eq!(parse_interval("2min").unwrap(), Duration::from_secs(120));
        assert_eq!(parse_interval("1h").unwrap(), Duration::from_secs(3600));
        assert_eq!(parse_interval("250us").unwrap(), Duration::from_micros(250));
        assert_eq!(parse_interval(" 10 s ").unwrap(), Duration::from_secs(10));
        assert_eq!(parse_interval("3").unwrap(), Duration::from_secs(3));
        assert_eq!(parse_interval("0.5min").unwrap(), Duration::from_secs(30));
        assert_eq!(parse_interval("1h 30min").unwrap(), Duration::from_secs(5400));
    }

    #[test]
    fn test_parse_interval_rejects() {
        for text in ["", "ms", "0s", "-1s", "1 fortnight", "1..5s"] {
            assert!(parse_interval(text).is_err(), "{text:?} should be rejected");
        }
        assert!(IntervalSetting::Seconds(0.0).to_duration().is_err());
        assert!(IntervalSetting::Seconds(-2.0).to_duration().is_err());
    }

    #[test]
    fn test_format_interval() {
        assert_eq!(format_interval(Duration::from_secs(2)), "2s");
        assert_eq!(format_interval(Duration::from_millis(1500)), "1s 500ms");
        assert_eq!(format_interval(Duration::from_secs(90)), "1m 30s");
        assert_eq!(format_interval(Duration::from_micros(250)), "250us");
        assert_eq!(format_interval(Duration::from_nanos(7)), "7ns");
    }

    #[test]
    fn test_validate_mismatched_names() {
        let result = ModbusSourceConfig::from_json5(
            r#"{ modbus: { interval: 1, hosts: [
                { hosts: "m[1-3]", names: "m[1-2]", groups: [{ metrics: { t: { address: 0 } } }] }
            ] } }"#,
        );
        assert!(matches!(result, Err(BridgeError::ConfigValidation(_))));
    }

    #[test]
    fn test_validate_rejections() {
        let cases = [
            r#"{ modbus: { hosts: [] } }"#,
            r#"{ modbus: { hosts: [{ hosts: "a", names: "a", groups: [] }] } }"#,
            r#"{ modbus: { hosts: [{ hosts: "a", names: "a", groups: [{ metrics: {} }] }] } }"#,
            r#"{ modbus: { hosts: [{ hosts: "a", names: "a", port: 0, groups: [{ metrics: { t: { address: 0 } } }] }] } }"#,
            r#"{ modbus: { hosts: [{ hosts: "a", names: "a", unit_id: 248, groups: [{ metrics: { t: { address: 0 } } }] }] } }"#,
            r#"{ modbus: { hosts: [{ hosts: "a", names: "a", timeout_ms: 0, groups: [{ metrics: { t: { address: 0 } } }] }] } }"#,
            r#"{ modbus: { hosts: [{ hosts: "a[1-", names: "a", groups: [{ metrics: { t: { address: 0 } } }] }] } }"#,
            r#"{ modbus: { hosts: [{ hosts: "a", names: "a", groups: [{ interval: "fast", metrics: { t: { address: 0 } } }] }] } }"#,
            r#"{ modbus: { hosts: [{ hosts: "a", names: "a", groups: [{ metrics: { "..": { address: 0 } } }] }] } }"#,
            r#"{ modbus: { hosts: [{ hosts: "a", names: "a", groups: [{ metrics: { t: { address: 65535 } } }] }] } }"#,
            r#"{ modbus: { key_prefix: "", hosts: [{ hosts: "a", names: "a", groups: [{ metrics: { t: { address: 0 } } }] }] } }"#,
        ];

        for case in cases {
            let result = ModbusSourceConfig::from_json5(case);
            assert!(
                matches!(result, Err(BridgeError::ConfigValidation(_))),
                "expected validation error for {case}: {result:?}"
            );
        }
    }

    #[test]
    fn test_double_sampling_needs_room_for_two_reads() {
        for case in [
            r#"{ modbus: { hosts: [{ hosts: "a", names: "a", groups: [{ interval: "1ns", double_sample: true, metrics: { t: { address: 0 } } }] }] } }"#,
            r#"{ modbus: { interval: "1ns", hosts: [{ hosts: "a", names: "a", groups: [{ double_sample: true, metrics: { t: { address: 0 } } }] }] } }"#,
        ] {
            let result = ModbusSourceConfig::from_json5(case);
            assert!(
                matches!(result, Err(BridgeError::ConfigValidation(_))),
                "expected validation error for {case}: {result:?}"
            );
        }

        let config = ModbusSourceConfig::from_json5(
            r#"{ modbus: { hosts: [{ hosts: "a", names: "a", groups: [{ interval: "2ns", double_sample: true, metrics: { t: { address: 0 } } }] }] } }"#,
        );
        assert!(config.is_ok());
    }

    #[test]
    fn test_unknown_host_field_is_rejected() {
        let result = ModbusSourceConfig::from_json5(
            r#"{ modbus: { hosts: [{ hosts: "a", names: "a", slave: 3, groups: [{ metrics: { t: { address: 0 } } }] }] } }"#,
        );
        assert!(matches!(result, Err(BridgeError::ConfigParse(_))));
    }

    #[test]
    fn test_gateway_unit_id_allowed() {
        let config = ModbusSourceConfig::from_json5(
            r#"{ modbus: { interval: 1, hosts: [{ hosts: "gw", names: "gw", unit_id: 255, groups: [{ metrics: { t: { address: 0 } } }] }] } }"#,
        )
        .unwrap();
        assert_eq!(config.modbus.hosts[0].unit_id, 255);
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "{EXAMPLE}").unwrap();

        let config = ModbusSourceConfig::load(file.path()).unwrap();
        assert_eq!(config.modbus.hosts[0].description, "Power meter");
    }
}
