//! The delivery front door shared by every simulator.
//!
//! [`Dispatcher`] turns events into keyed records, offers them to the
//! connection's bounded queue without ever waiting, and keeps count of what
//! happened to them. Two background tasks drain the connection's ack and
//! failure streams into the counters.
//!
//! ## Lifecycle
//!
//! `Created -> Running -> Closing -> Closed`, enforced by ownership:
//!
//! - [`Dispatcher::new`] spawns both drain tasks; the dispatcher is running
//!   as soon as it is returned.
//! - [`Dispatcher::close`] consumes the dispatcher, flushes the connection
//!   and waits for the drains to finish. It can therefore only run once, and
//!   only after every shared handle has been released.

use super::{
    completion::{CompletionStreams, drain_acks, drain_failures},
    counters::{DeliveryCounters, DeliveryStats},
};
use crate::{
    Result,
    connection::{Connection, OutboundRecord},
    event::Event,
};
use core::time::Duration;
use std::sync::Arc;
use tokio::{task::JoinHandle, time::timeout};

/// Anything a simulator can hand events to.
///
/// Implementations must return immediately: a simulator calls this from its
/// tick loop and never retries.
pub trait EventSink: Send + Sync {
    /// Offers one event for delivery.
    ///
    /// # Errors
    ///
    /// Any error means the event was dropped. Backpressure is reported as
    /// [`Error::BufferFull`](crate::Error::BufferFull).
    fn submit(&self, event: &Event) -> Result<()>;
}

/// Routes events to a broker topic, keyed by sensor ID.
pub struct Dispatcher<C> {
    connection: C,
    topic: Arc<str>,
    counters: Arc<DeliveryCounters>,
    ack_drain: JoinHandle<()>,
    failure_drain: JoinHandle<()>,
}

impl<C: Connection> Dispatcher<C> {
    /// Wraps a connection and starts draining its completion streams.
    ///
    /// `completions` must be the receiving half of the sink the connection
    /// was built with.
    ///
    /// # Panics
    ///
    /// Panics if called outside of a Tokio runtime.
    pub fn new(connection: C, completions: CompletionStreams, topic: impl Into<Arc<str>>) -> Self {
        let topic = topic.into();
        let counters = Arc::new(DeliveryCounters::default());

        let ack_drain = tokio::spawn(drain_acks(completions.acks, Arc::clone(&counters)));
        let failure_drain =
            tokio::spawn(drain_failures(completions.failures, Arc::clone(&counters)));

        tracing::debug!(topic = %topic, "Dispatcher running");

        Self {
            connection,
            topic,
            counters,
            ack_drain,
            failure_drain,
        }
    }

    /// Encodes `event` and offers it to the outbound queue, keyed by its
    /// sensor ID. Never waits.
    ///
    /// Events sharing a sensor ID reach the same partition in the order this
    /// method accepted them.
    ///
    /// # Errors
    ///
    /// - [`Error::Encode`](crate::Error::Encode) if the event cannot be
    ///   serialized. Not counted anywhere.
    /// - [`Error::BufferFull`](crate::Error::BufferFull) if the queue is at
    ///   capacity. Counted as dropped.
    /// - [`Error::Disconnected`](crate::Error::Disconnected) if the queue is
    ///   gone. Counted as dropped.
    pub fn submit(&self, event: &Event) -> Result<()> {
        let payload = event.encode()?;
        let record = OutboundRecord {
            topic: Arc::clone(&self.topic),
            key: event.sensor_id().to_owned(),
            payload,
        };

        self.counters.record_submitted();
        match self.connection.try_send(record) {
            Ok(()) => {
                self.counters.record_accepted();
                Ok(())
            }
            Err(e) => {
                self.counters.record_dropped();
                Err(e)
            }
        }
    }

    /// Snapshot of the delivery counters. Safe to call at any time from any
    /// task.
    pub fn stats(&self) -> DeliveryStats {
        self.counters.snapshot()
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }

    /// Flushes the connection (bounded by `flush_timeout`), releases it, and
    /// waits for both drain tasks. Returns the final counters.
    ///
    /// Flush problems are logged rather than returned: anything that could
    /// not be delivered in time simply never reaches `succeeded` or `failed`.
    pub async fn close(self, flush_timeout: Duration) -> DeliveryStats {
        let Self {
            connection,
            topic,
            counters,
            ack_drain,
            failure_drain,
        } = self;

        tracing::info!(
            topic = %topic,
            in_flight = counters.snapshot().in_flight(),
            "Closing dispatcher, flushing in-flight events"
        );

        if let Err(e) = connection.close(flush_timeout).await {
            tracing::warn!("Connection did not close cleanly: {e}");
        }

        // The drains stop once the connection has dropped its sink.
        for (name, drain) in [("ack", ack_drain), ("failure", failure_drain)] {
            match timeout(flush_timeout, drain).await {
                Ok(Ok(())) => tracing::trace!("{name} drain finished"),
                Ok(Err(e)) => tracing::error!("{name} drain task failed: {e}"),
                Err(_) => tracing::warn!("{name} drain did not stop within {flush_timeout:?}"),
            }
        }

        let stats = counters.snapshot();
        tracing::info!(
            accepted = stats.accepted,
            succeeded = stats.succeeded,
            failed = stats.failed,
            dropped = stats.dropped,
            "Dispatcher closed"
        );
        stats
    }
}

impl<C: Connection> EventSink for Dispatcher<C> {
    fn submit(&self, event: &Event) -> Result<()> {
        Dispatcher::submit(self, event)
    }
}
