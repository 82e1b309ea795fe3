//! Broker connections.
//!
//! A [`Connection`] owns the bounded outbound queue in front of a broker and
//! reports the fate of every accepted record on a [`CompletionSink`]. The
//! [`Dispatcher`] only ever talks to this trait, which keeps the accounting
//! and ordering rules independent of the broker client.
//!
//! ## Implementations
//!
//! - [`kafka::KafkaConnection`] - librdkafka producer (feature `kafka`).
//! - [`memory::MemoryConnection`] - in-process partitioned log used for tests
//!   and dry runs.
//!
//! [`CompletionSink`]: crate::dispatch::CompletionSink
//! [`Dispatcher`]: crate::dispatch::Dispatcher

#[cfg(feature = "kafka")]
pub mod kafka;
pub mod memory;

use crate::Result;
use bytes::Bytes;
use core::future::Future;
use core::time::Duration;
use std::sync::Arc;

/// Retries attempted after the first failed attempt before a record is
/// reported as a terminal delivery failure.
pub const DEFAULT_RETRY_MAX: u32 = 5;

/// Fixed pause between retries.
pub const DEFAULT_RETRY_BACKOFF: Duration = Duration::from_millis(100);

/// A batch is flushed once it holds this many records...
pub const DEFAULT_FLUSH_MESSAGES: usize = 100;

/// ...or once the oldest record has waited this long.
pub const DEFAULT_FLUSH_INTERVAL: Duration = Duration::from_millis(100);

/// Largest serialized record the broker accepts.
pub const DEFAULT_MAX_MESSAGE_BYTES: usize = 1_000_000;

/// Outbound queue capacity. Matches the default input buffer of most broker
/// clients.
pub const DEFAULT_QUEUE_CAPACITY: usize = 256;

/// Unacknowledged requests allowed per connection. Must stay at 1 so that a
/// retried request can never overtake a later one within a partition.
pub const MAX_IN_FLIGHT_REQUESTS: usize = 1;

/// A serialized event addressed to a topic and keyed for partition routing.
#[derive(Debug, Clone)]
pub struct OutboundRecord {
    pub topic: Arc<str>,
    pub key: String,
    pub payload: Bytes,
}

/// Delivery tuning shared by every connection type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProducerSettings {
    pub queue_capacity: usize,
    pub retry_max: u32,
    pub retry_backoff: Duration,
    pub flush_messages: usize,
    pub flush_interval: Duration,
    pub max_message_bytes: usize,
}

impl Default for ProducerSettings {
    fn default() -> Self {
        Self {
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            retry_max: DEFAULT_RETRY_MAX,
            retry_backoff: DEFAULT_RETRY_BACKOFF,
            flush_messages: DEFAULT_FLUSH_MESSAGES,
            flush_interval: DEFAULT_FLUSH_INTERVAL,
            max_message_bytes: DEFAULT_MAX_MESSAGE_BYTES,
        }
    }
}

impl ProducerSettings {
    /// Checks that every bound is usable.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidConfig`](crate::Error::InvalidConfig) for a
    /// zero queue capacity, batch size or message size limit.
    pub fn validate(&self) -> Result<()> {
        let invalid = |reason: &str| {
            Err(crate::Error::InvalidConfig {
                reason: reason.to_string(),
            })
        };

        if self.queue_capacity == 0 {
            return invalid("queue capacity must be greater than 0");
        }
        if self.flush_messages == 0 {
            return invalid("flush batch size must be greater than 0");
        }
        if self.flush_interval.is_zero() {
            return invalid("flush interval must be greater than 0");
        }
        if self.max_message_bytes == 0 {
            return invalid("max message size must be greater than 0");
        }
        Ok(())
    }
}

/// The broker side of a [`Dispatcher`](crate::dispatch::Dispatcher).
///
/// Implementations must uphold three rules:
///
/// - [`try_send`](Connection::try_send) never waits. A full queue is reported
///   as [`Error::BufferFull`](crate::Error::BufferFull) and the record is not
///   enqueued.
/// - Records sharing a key land on the same partition in the order they were
///   accepted.
/// - Every accepted record produces exactly one completion (an ack or a
///   failure) unless the connection is closed before it could be delivered.
pub trait Connection: Send + Sync + 'static {
    /// Attempts to enqueue a record without blocking.
    ///
    /// # Errors
    ///
    /// - [`Error::BufferFull`](crate::Error::BufferFull) if the queue is at
    ///   capacity.
    /// - [`Error::Disconnected`](crate::Error::Disconnected) if the queue has
    ///   been torn down.
    fn try_send(&self, record: OutboundRecord) -> Result<()>;

    /// Flushes queued and in-flight records, waiting at most `timeout`, then
    /// releases the connection.
    ///
    /// Once this resolves the connection has dropped its
    /// [`CompletionSink`](crate::dispatch::CompletionSink), which ends the
    /// dispatcher's drain tasks.
    fn close(self, timeout: Duration) -> impl Future<Output = Result<()>> + Send;
}
