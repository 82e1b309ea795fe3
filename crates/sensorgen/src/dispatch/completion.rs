//! Acknowledgement and failure streams.
//!
//! A connection reports each record it finishes with on one of two
//! independent channels: [`Ack`]s for confirmed deliveries and
//! [`DeliveryFailure`]s for records that exhausted their retries. The
//! dispatcher owns the receiving half and drains each stream from its own
//! background task.
//!
//! The channels are unbounded: a completion is only ever produced for a
//! record that was admitted into the bounded outbound queue, so the backlog
//! can never outgrow what the queue already let in.

use super::counters::DeliveryCounters;
use std::sync::Arc;
use tokio::sync::mpsc;

/// A record the broker confirmed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Ack {
    pub key: String,
    pub partition: i32,
    pub offset: i64,
}

/// A record the broker will never confirm.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeliveryFailure {
    pub key: String,
    pub reason: String,
}

/// Sending half, held by a connection.
#[derive(Debug, Clone)]
pub struct CompletionSink {
    acks: mpsc::UnboundedSender<Ack>,
    failures: mpsc::UnboundedSender<DeliveryFailure>,
}

impl CompletionSink {
    /// Reports a confirmed delivery. Silently discarded once the dispatcher
    /// has stopped draining.
    pub fn ack(&self, ack: Ack) {
        let _ = self.acks.send(ack);
    }

    /// Reports a terminal delivery failure.
    pub fn fail(&self, failure: DeliveryFailure) {
        let _ = self.failures.send(failure);
    }
}

/// Receiving half, consumed by [`Dispatcher::new`](super::Dispatcher::new).
#[derive(Debug)]
pub struct CompletionStreams {
    pub(crate) acks: mpsc::UnboundedReceiver<Ack>,
    pub(crate) failures: mpsc::UnboundedReceiver<DeliveryFailure>,
}

/// Creates a linked sink/streams pair.
pub fn completion_channel() -> (CompletionSink, CompletionStreams) {
    let (ack_tx, ack_rx) = mpsc::unbounded_channel();
    let (fail_tx, fail_rx) = mpsc::unbounded_channel();
    (
        CompletionSink {
            acks: ack_tx,
            failures: fail_tx,
        },
        CompletionStreams {
            acks: ack_rx,
            failures: fail_rx,
        },
    )
}

/// Counts every ack until all sinks are dropped.
pub(crate) async fn drain_acks(
    mut acks: mpsc::UnboundedReceiver<Ack>,
    counters: Arc<DeliveryCounters>,
) {
    tracing::debug!("Ack drain started");

    while let Some(ack) = acks.recv().await {
        counters.record_success();
        tracing::trace!(
            key = %ack.key,
            partition = ack.partition,
            offset = ack.offset,
            "Event delivered"
        );
    }

    tracing::debug!("Ack drain stopped");
}

/// Counts and logs every terminal failure until all sinks are dropped.
pub(crate) async fn drain_failures(
    mut failures: mpsc::UnboundedReceiver<DeliveryFailure>,
    counters: Arc<DeliveryCounters>,
) {
    tracing::debug!("Failure drain started");

    while let Some(failure) = failures.recv().await {
        counters.record_failure();
        tracing::warn!(
            key = %failure.key,
            reason = %failure.reason,
            "Failed to deliver event"
        );
    }

    tracing::debug!("Failure drain stopped");
}
