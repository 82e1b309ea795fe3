//! Error types for the sensor fleet and its delivery path.
//!
//! This module defines the central `Error` enum shared by the simulators, the
//! dispatcher and the broker connections. Only pre-start failures
//! (`InvalidConfig`, `Connection`) are fatal to a run; every other variant is
//! a per-event outcome that callers handle locally.
//!
//! ## Error Cases
//! - `InvalidConfig`: A setting is missing or out of range.
//! - `Connection`: The broker could not be reached, or a flush failed.
//! - `Encode`: An event could not be serialized to its wire format.
//! - `BufferFull`: The outbound queue is at capacity (backpressure).
//! - `Disconnected`: The outbound queue has been torn down.
//! - `DispatcherInUse`: Close was requested while handles were still held.
//! - `ChannelError`: An internal task or channel failed.
//!
//! Broker-side delivery failures are not represented here. They surface
//! asynchronously as [`DeliveryFailure`] records on the dispatcher's error
//! stream.
//!
//! [`DeliveryFailure`]: crate::dispatch::DeliveryFailure

pub type Result<T> = core::result::Result<T, Error>;

/// Unified error type for event generation and delivery.
#[derive(Clone, thiserror::Error, Debug, PartialEq, Eq)]
pub enum Error {
    /// A configuration value was rejected before anything started.
    #[error("Invalid configuration: {reason}")]
    InvalidConfig { reason: String },

    /// The broker connection could not be established or flushed.
    #[error("Connection error: {context}")]
    Connection { context: String },

    /// The event could not be encoded. The event is dropped.
    #[error("Failed to encode event: {reason}")]
    Encode { reason: String },

    /// The outbound queue is full. The event is dropped without blocking.
    #[error("Producer buffer full, event dropped")]
    BufferFull,

    /// The outbound queue no longer accepts events.
    #[error("Producer queue is closed")]
    Disconnected,

    /// `close` requires exclusive ownership of the dispatcher.
    #[error("Dispatcher is still shared by running tasks")]
    DispatcherInUse,

    /// Internal task or channel failure.
    #[error("Channel error: {context}")]
    ChannelError { context: String },
}

impl Error {
    /// Whether this error is a per-event backpressure rejection.
    pub const fn is_backpressure(&self) -> bool {
        matches!(self, Self::BufferFull | Self::Disconnected)
    }
}

#[cfg(feature = "kafka")]
impl From<rdkafka::error::KafkaError> for Error {
    fn from(err: rdkafka::error::KafkaError) -> Self {
        Self::Connection {
            context: err.to_string(),
        }
    }
}
