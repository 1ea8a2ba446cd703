//! Metric definitions and the polling topology.
//!
//! [`Topology::build`] turns validated configuration into immutable
//! [`PollGroup`]s: every host entry is expanded into devices, every config
//! group becomes one group per device whose metrics are read with a single
//! request. Entries that cannot be polled are rejected individually and
//! reported; the rest of the topology is unaffected.

use std::collections::{BTreeSet, HashMap, HashSet};
use std::fmt;
use std::time::Duration;

use serde_json::{Map, Value, json};
use thiserror::Error;
use tracing::warn;

use crate::config::{ConfigError, GroupConfig, HostConfig, ModbusConfig, format_interval};
use crate::connection::DeviceEndpoint;
use crate::decoder::REGISTERS_PER_VALUE;

/// Largest register count a single Read Holding Registers request may ask for.
pub const MAX_REGISTERS_PER_READ: u16 = 125;

/// A single output metric backed by two holding registers of one device.
#[derive(Debug, Clone, PartialEq)]
pub struct MetricDefinition {
    /// Dotted output name, e.g. `room.E4.power`.
    pub name: String,
    pub device: DeviceEndpoint,
    pub address: u16,
    pub register_count: u16,
    pub interval: Duration,
    pub description: String,
    pub unit: Option<String>,
}

impl MetricDefinition {
    /// Publishing rate in Hz.
    pub fn rate(&self) -> f64 {
        1.0 / self.interval.as_secs_f64()
    }

    pub fn metadata(&self) -> Value {
        let mut metadata = Map::new();
        metadata.insert("description".into(), json!(self.description));
        metadata.insert("rate".into(), json!(self.rate()));
        metadata.insert("interval".into(), json!(format_interval(self.interval)));
        if let Some(unit) = &self.unit {
            metadata.insert("unit".into(), json!(unit));
        }
        Value::Object(metadata)
    }
}

/// A host entry or group that was left out of the topology.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{context}: {reason}")]
pub struct ConfigurationFault {
    pub context: String,
    pub reason: String,
}

impl ConfigurationFault {
    fn new(context: impl Into<String>, reason: impl ToString) -> Self {
        Self {
            context: context.into(),
            reason: reason.to_string(),
        }
    }
}

/// Metrics of one device read together on one schedule.
#[derive(Debug, Clone)]
pub struct PollGroup {
    device: DeviceEndpoint,
    timeout: Duration,
    interval: Duration,
    double_sample: bool,
    base_address: u16,
    register_count: u16,
    metrics: Vec<MetricDefinition>,
}

impl PollGroup {
    /// Group `metrics`, which must all belong to `device` and share `interval`.
    ///
    /// The group reads the smallest register block covering every metric;
    /// that block must fit into one request.
    pub fn new(
        device: DeviceEndpoint,
        timeout: Duration,
        interval: Duration,
        double_sample: bool,
        metrics: Vec<MetricDefinition>,
    ) -> Result<Self, ConfigurationFault> {
        let context = device.to_string();

        if metrics.is_empty() {
            return Err(ConfigurationFault::new(context, "group has no metrics"));
        }
        let sampling = if double_sample { interval / 2 } else { interval };
        if sampling.is_zero() {
            return Err(ConfigurationFault::new(
                context,
                format!("interval {} leaves no time between reads", format_interval(interval)),
            ));
        }
        if let Some(stray) = metrics
            .iter()
            .find(|m| m.device != device || m.interval != interval)
        {
            return Err(ConfigurationFault::new(
                context,
                format!("metric '{}' does not belong to this group", stray.name),
            ));
        }

        let base = metrics.iter().map(|m| u32::from(m.address)).min().unwrap_or(0);
        let end = metrics
            .iter()
            .map(|m| u32::from(m.address) + u32::from(m.register_count))
            .max()
            .unwrap_or(base);

        if end > u32::from(u16::MAX) + 1 {
            return Err(ConfigurationFault::new(
                context,
                format!("register block ends past the address space ({end})"),
            ));
        }
        let span = end - base;
        if span > u32::from(MAX_REGISTERS_PER_READ) {
            return Err(ConfigurationFault::new(
                context,
                format!(
                    "registers {base}..{end} span {span} registers, more than {MAX_REGISTERS_PER_READ} per request"
                ),
            ));
        }

        Ok(Self {
            device,
            timeout,
            interval,
            double_sample,
            base_address: base as u16,
            register_count: span as u16,
            metrics,
        })
    }

    pub fn device(&self) -> &DeviceEndpoint {
        &self.device
    }

    /// Bound on connecting to and reading from the device.
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Configured interval between published samples.
    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Interval between reads; half the configured one when double sampling.
    pub fn sampling_interval(&self) -> Duration {
        if self.double_sample {
            self.interval / 2
        } else {
            self.interval
        }
    }

    pub fn double_sample(&self) -> bool {
        self.double_sample
    }

    pub fn base_address(&self) -> u16 {
        self.base_address
    }

    pub fn register_count(&self) -> u16 {
        self.register_count
    }

    pub fn metrics(&self) -> &[MetricDefinition] {
        &self.metrics
    }

    /// Register offset of `metric` within the group's block.
    pub fn offset_of(&self, metric: &MetricDefinition) -> usize {
        usize::from(metric.address - self.base_address)
    }
}

/// Errors that leave nothing to run.
#[derive(Debug, Error)]
pub enum TopologyError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("no pollable metric groups ({rejected} rejected)")]
    NothingToPoll { rejected: usize },
}

/// All poll groups of the source, plus whatever had to be rejected.
#[derive(Debug, Clone)]
pub struct Topology {
    groups: Vec<PollGroup>,
    rejected: Vec<ConfigurationFault>,
}

impl Topology {
    /// Build the topology from configuration.
    ///
    /// Host entries and groups that cannot be polled are skipped and logged.
    /// Fails only when nothing at all is left to poll.
    pub fn build(config: &ModbusConfig) -> Result<Self, TopologyError> {
        let default_interval = config
            .interval
            .as_ref()
            .map(|i| i.to_duration())
            .transpose()?;

        let mut topology = Topology {
            groups: Vec::new(),
            rejected: Vec::new(),
        };
        let mut seen = HashSet::new();

        for host_config in &config.hosts {
            let devices = match host_config.expand() {
                Ok(devices) => devices,
                Err(e) => {
                    topology.reject(ConfigurationFault::new(&host_config.hosts, e));
                    continue;
                }
            };

            for (host, prefix) in devices {
                let device = DeviceEndpoint::new(host, host_config.port, host_config.unit_id);

                for (index, group_config) in host_config.groups.iter().enumerate() {
                    let context = format!("{device} group {index}");
                    match build_group(
                        &device,
                        &prefix,
                        host_config,
                        group_config,
                        default_interval,
                        &mut seen,
                    ) {
                        Ok(group) => topology.groups.push(group),
                        Err(reason) => topology.reject(ConfigurationFault::new(context, reason)),
                    }
                }
            }
        }

        if topology.groups.is_empty() {
            return Err(TopologyError::NothingToPoll {
                rejected: topology.rejected.len(),
            });
        }

        Ok(topology)
    }

    fn reject(&mut self, fault: ConfigurationFault) {
        warn!(context = %fault.context, reason = %fault.reason, "Skipping unpollable configuration");
        self.rejected.push(fault);
    }

    pub fn groups(&self) -> &[PollGroup] {
        &self.groups
    }

    pub fn into_groups(self) -> Vec<PollGroup> {
        self.groups
    }

    pub fn rejected(&self) -> &[ConfigurationFault] {
        &self.rejected
    }

    pub fn metrics(&self) -> impl Iterator<Item = &MetricDefinition> {
        self.groups.iter().flat_map(|g| g.metrics())
    }

    /// Distinct devices in address order.
    pub fn devices(&self) -> BTreeSet<&DeviceEndpoint> {
        self.groups.iter().map(|g| g.device()).collect()
    }

    /// Unit of every metric that has one.
    pub fn units(&self) -> HashMap<String, String> {
        self.metrics()
            .filter_map(|m| m.unit.clone().map(|unit| (m.name.clone(), unit)))
            .collect()
    }

    /// Devices and per-metric metadata, for the running status document.
    pub fn status_metadata(&self) -> Value {
        let devices: Vec<String> = self.devices().into_iter().map(|d| d.to_string()).collect();
        let metrics: Map<String, Value> = self
            .metrics()
            .map(|m| (m.name.clone(), m.metadata()))
            .collect();

        json!({
            "devices": devices,
            "metrics": metrics,
        })
    }
}

fn build_group(
    device: &DeviceEndpoint,
    prefix: &str,
    host_config: &HostConfig,
    group_config: &GroupConfig,
    default_interval: Option<Duration>,
    seen: &mut HashSet<String>,
) -> Result<PollGroup, String> {
    let interval = match &group_config.interval {
        Some(configured) => configured.to_duration().map_err(|e| e.to_string())?,
        None => default_interval.ok_or("missing interval and no default interval set")?,
    };

    let metrics: Vec<MetricDefinition> = group_config
        .metrics
        .iter()
        .map(|(name, metric)| MetricDefinition {
            name: combine_name(prefix, name),
            device: device.clone(),
            address: metric.address,
            register_count: REGISTERS_PER_VALUE,
            interval,
            description: join_description(&host_config.description, &metric.description),
            unit: metric.unit.clone(),
        })
        .collect();

    if let Some(duplicate) = metrics.iter().find(|m| seen.contains(&m.name)) {
        return Err(format!("metric '{}' is already defined", duplicate.name));
    }

    let group = PollGroup::new(
        device.clone(),
        host_config.timeout(),
        interval,
        group_config.double_sample,
        metrics,
    )
    .map_err(|fault| fault.reason)?;

    seen.extend(group.metrics().iter().map(|m| m.name.clone()));
    Ok(group)
}

/// Join a host prefix and a metric name with a single dot.
pub fn combine_name(prefix: &str, name: &str) -> String {
    let prefix = prefix.trim_end_matches('.');
    let name = name.trim_start_matches('.');

    if prefix.is_empty() {
        name.to_string()
    } else {
        format!("{prefix}.{name}")
    }
}

fn join_description(host: &str, metric: &str) -> String {
    match (host.is_empty(), metric.is_empty()) {
        (true, _) => metric.to_string(),
        (false, true) => host.to_string(),
        (false, false) => format!("{host} {metric}"),
    }
}

impl fmt::Display for MetricDefinition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({}@{})", self.name, self.device, self.address)
    }
}
