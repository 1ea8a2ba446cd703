//! Modbus TCP metric source.
//!
//! Polls Modbus devices and publishes their registers to Zenoh.

use std::sync::Arc;

use anyhow::{Context, Result};
use busline_bridge_framework::{BridgeArgs, BridgeConfig, BridgeRunner};
use busline_source_modbus::{ModbusSourceConfig, SourceCoordinator, TcpConnector, Topology, ZenohSink};
use tracing::info;

#[tokio::main]
async fn main() -> Result<()> {
    let args = BridgeArgs::parse_with_default("modbus.json5");

    let config = ModbusSourceConfig::load(&args.config)
        .with_context(|| format!("Failed to load config from {:?}", args.config))?;

    let runner = BridgeRunner::new("modbus", config, Some(&args))
        .await
        .context("Failed to start bridge")?
        .with_status_publishing();

    let topology = Topology::build(&runner.config().modbus).context("Invalid Modbus topology")?;
    let metadata = topology.status_metadata();

    info!(
        devices = topology.devices().len(),
        metrics = topology.metrics().count(),
        rejected = topology.rejected().len(),
        "Loaded Modbus topology"
    );

    let sink = ZenohSink::new(runner.publisher()).with_units(topology.units());
    let running = SourceCoordinator::new(topology, Arc::new(TcpConnector)).start(sink);

    runner
        .run(Some(metadata), async move {
            running.shutdown().await;
        })
        .await?;

    Ok(())
}
