//! # `sensorgen`: Synthetic Sensor Fleet Load Generator
//!
//! `sensorgen` simulates a fleet of independent telemetry sensors, each
//! emitting timestamped readings at a precise rate, and delivers them to a
//! partitioned, append-only log (Kafka) for downstream consumer testing.
//!
//! It is built for workloads that demand:
//!
//! - Thousands of concurrent emitters with no shared mutable state
//! - Per-sensor ordering at the partition
//! - Predictable behavior under broker backpressure
//!
//! ## Highlights
//!
//! - **Private Random Walks**: Every simulator owns its RNG and base value;
//!   readings are bounded noise on a slowly drifting baseline.
//! - **Anchored Timers**: Ticks are scheduled from a fixed start so rates do
//!   not drift; missed ticks are skipped, never burst.
//! - **Non-blocking Submit**: A full outbound queue rejects the event
//!   immediately with [`Error::BufferFull`]; the event is dropped and counted.
//! - **Lock-free Accounting**: Accepted, succeeded, failed and dropped counts
//!   are cache-padded atomics drained from independent ack and failure
//!   streams.
//! - **Graceful Shutdown**: One cancellation token stops every simulator,
//!   then the dispatcher flushes in-flight events within a timeout.
//!
//! ## Example
//!
//! ```no_run
//! use sensorgen::{
//!     Dispatcher, FleetConfig, MemoryBroker, ProducerSettings, completion_channel, run_fleet,
//! };
//! use std::time::Duration;
//! use tokio_util::sync::CancellationToken;
//!
//! # async fn demo() -> sensorgen::Result<()> {
//! let broker = MemoryBroker::new(8)?;
//! let (sink, streams) = completion_channel();
//! let connection = broker.connect(&ProducerSettings::default(), sink)?;
//! let dispatcher = Dispatcher::new(connection, streams, "sensor_metrics");
//!
//! let config = FleetConfig {
//!     sensor_count: 3,
//!     events_per_sec: 30.0,
//!     run_for: Some(Duration::from_secs(1)),
//!     ..Default::default()
//! };
//! let stats = run_fleet(&config, dispatcher, CancellationToken::new(), |_| {}).await?;
//! assert!(stats.succeeded + stats.failed <= stats.accepted);
//! # Ok(())
//! # }
//! ```
//!
//! ## Module Overview
//!
//! - [`event`] - The [`Event`] reading and its JSON wire format.
//! - [`simulator`] - Per-sensor random walk and tick loop.
//! - [`dispatch`] - Non-blocking submit, completion drains and counters.
//! - [`connection`] - Broker seam with Kafka and in-memory implementations.
//! - [`fleet`] - Spawning, periodic stats and coordinated shutdown.

pub mod connection;
pub mod dispatch;
mod error;
pub mod event;
pub mod fleet;
pub mod simulator;

#[cfg(feature = "kafka")]
pub use crate::connection::kafka::KafkaConnection;
pub use crate::connection::{
    Connection, OutboundRecord, ProducerSettings,
    memory::{MemoryBroker, MemoryConnection, StoredRecord},
};
pub use crate::dispatch::{
    Ack, CompletionSink, CompletionStreams, DeliveryFailure, DeliveryStats, Dispatcher, EventSink,
    completion_channel,
};
pub use crate::error::*;
pub use crate::event::Event;
pub use crate::fleet::{FleetConfig, run_fleet, sensor_id};
pub use crate::simulator::{RandomWalk, SensorSimulator};
