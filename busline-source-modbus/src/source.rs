//! Source coordinator: owns device connections and poller tasks.

use std::collections::BTreeMap;
use std::sync::Arc;

use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use crate::connection::{ConnectionState, Connector, DeviceConnection, DeviceEndpoint};
use crate::metric::{PollGroup, Topology};
use crate::poller::{PollOutcome, PollResult, Poller};
use crate::sink::MetricSink;

/// Capacity of the channel between pollers and the forwarder.
const RESULT_CHANNEL_CAPACITY: usize = 1024;

/// Counts of what the forwarder handed to the sink.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ForwardStats {
    pub values: u64,
    pub gaps: u64,
    pub sink_errors: u64,
}

/// Builds one connection per distinct device and one poller per group.
pub struct SourceCoordinator {
    groups: Vec<PollGroup>,
    devices: BTreeMap<DeviceEndpoint, Arc<DeviceConnection>>,
}

impl SourceCoordinator {
    pub fn new(topology: Topology, connector: Arc<dyn Connector>) -> Self {
        let groups = topology.into_groups();
        let mut devices = BTreeMap::new();

        for group in &groups {
            devices.entry(group.device().clone()).or_insert_with(|| {
                Arc::new(DeviceConnection::new(
                    group.device().clone(),
                    group.timeout(),
                    connector.clone(),
                ))
            });
        }

        Self { groups, devices }
    }

    pub fn devices(&self) -> impl Iterator<Item = &Arc<DeviceConnection>> {
        self.devices.values()
    }

    pub fn groups(&self) -> &[PollGroup] {
        &self.groups
    }

    /// Spawn every poller plus the forwarder feeding `sink`.
    ///
    /// Must be called within a tokio runtime.
    pub fn start<S: MetricSink>(self, sink: S) -> RunningSource {
        let (shutdown, shutdown_rx) = watch::channel(false);
        let (results_tx, results_rx) = mpsc::channel(RESULT_CHANNEL_CAPACITY);

        info!(
            devices = self.devices.len(),
            groups = self.groups.len(),
            "Starting Modbus pollers"
        );

        let pollers = self
            .groups
            .into_iter()
            .filter_map(|group| {
                let device = self.devices.get(group.device())?.clone();
                let poller = Poller::new(group, device, results_tx.clone());
                Some(tokio::spawn(poller.run(shutdown_rx.clone())))
            })
            .collect();

        // Forwarder ends once every poller has dropped its sender.
        drop(results_tx);
        let forwarder = tokio::spawn(forward(results_rx, sink));

        RunningSource {
            shutdown,
            pollers,
            forwarder,
            devices: self.devices.into_values().collect(),
        }
    }
}

/// Handle to a started source.
pub struct RunningSource {
    shutdown: watch::Sender<bool>,
    pollers: Vec<JoinHandle<()>>,
    forwarder: JoinHandle<ForwardStats>,
    devices: Vec<Arc<DeviceConnection>>,
}

impl RunningSource {
    pub fn device_states(&self) -> Vec<(DeviceEndpoint, ConnectionState)> {
        self.devices
            .iter()
            .map(|d| (d.endpoint().clone(), d.state()))
            .collect()
    }

    pub fn poller_count(&self) -> usize {
        self.pollers.len()
    }

    /// Stop all pollers, close every connection and flush pending results.
    ///
    /// Returns once no task of this source is left running.
    pub async fn shutdown(self) -> ForwardStats {
        info!(pollers = self.pollers.len(), "Stopping Modbus pollers");
        self.shutdown.send_replace(true);

        for handle in self.pollers {
            if let Err(e) = handle.await {
                error!(error = %e, "Poller task failed");
            }
        }

        for device in &self.devices {
            device.close().await;
        }

        match self.forwarder.await {
            Ok(stats) => {
                info!(
                    values = stats.values,
                    gaps = stats.gaps,
                    sink_errors = stats.sink_errors,
                    "Modbus source stopped"
                );
                stats
            }
            Err(e) => {
                error!(error = %e, "Forwarder task failed");
                ForwardStats::default()
            }
        }
    }
}

async fn forward<S: MetricSink>(mut results: mpsc::Receiver<PollResult>, sink: S) -> ForwardStats {
    let mut stats = ForwardStats::default();

    while let Some(result) = results.recv().await {
        let submitted = match &result.outcome {
            PollOutcome::Value(value) => {
                stats.values += 1;
                sink.submit_value(&result.metric, result.timestamp, *value).await
            }
            PollOutcome::Failure(fault) => {
                stats.gaps += 1;
                sink.submit_gap(&result.metric, result.timestamp, fault).await
            }
        };

        if let Err(e) = submitted {
            stats.sink_errors += 1;
            warn!(metric = %result.metric, error = %e, "Failed to submit poll result");
        }
    }

    stats
}
