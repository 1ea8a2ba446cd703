//! Modbus TCP metric source.
//!
//! Polls holding registers of Modbus TCP devices on fixed intervals and
//! publishes every two-register big-endian float as a timestamped metric.
//! Devices that stop answering produce gap markers instead of values; the
//! rest of the source keeps running.
//!
//! # Key Expressions
//!
//! ```text
//! busline/modbus/<metric levels>    e.g. busline/modbus/room/E4/power
//! busline/modbus/@/status           running/offline document with metadata
//! ```
//!
//! # Layout
//!
//! - [`config`]: JSON5 configuration and validation
//! - [`hostlist`]: `meter[1-3].example.com` style expansion
//! - [`decoder`]: register words to floats
//! - [`connection`]: one serialized session per device
//! - [`metric`]: immutable metric definitions grouped into poll groups
//! - [`poller`]: per-group scheduling loop
//! - [`source`]: coordinator owning devices and pollers
//! - [`sink`]: where results go; [`sink::ZenohSink`] publishes on the bus

pub mod config;
pub mod connection;
pub mod decoder;
pub mod hostlist;
pub mod metric;
pub mod poller;
pub mod sink;
pub mod source;

pub use config::ModbusSourceConfig;
pub use connection::{ConnectionState, Connector, DeviceConnection, DeviceEndpoint, TcpConnector};
pub use metric::{MetricDefinition, PollGroup, Topology};
pub use poller::{FaultKind, PollFault, PollOutcome, PollResult};
pub use sink::{MetricSink, SinkError, ZenohSink};
pub use source::{ForwardStats, RunningSource, SourceCoordinator};
