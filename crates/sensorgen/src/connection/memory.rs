//! In-process partitioned log.
//!
//! [`MemoryBroker`] keeps one append-only log per `(topic, partition)` and
//! routes records by hashing their key, just like a real broker. Connections
//! to it go through the same bounded queue, batching, size limit and retry
//! budget as the Kafka producer, which makes it a faithful stand-in for tests
//! and dry runs.
//!
//! Two knobs simulate trouble:
//!
//! - [`MemoryBroker::set_online`] - while offline, flushers stop reading
//!   their queues and any in-progress batch fails with a retriable error.
//! - [`MemoryBroker::inject_transient_faults`] - the next `n` append attempts
//!   fail with a retriable error.

use super::{Connection, OutboundRecord, ProducerSettings};
use crate::{
    Error, Result,
    dispatch::{Ack, CompletionSink, DeliveryFailure},
};
use bytes::Bytes;
use core::time::Duration;
use parking_lot::Mutex;
use portable_atomic::{AtomicU64, Ordering};
use std::{collections::HashMap, sync::Arc};
use tokio::{
    sync::{mpsc, watch},
    task::JoinHandle,
    time::{Instant, sleep, timeout, timeout_at},
};

/// Upper bound on partitions per topic. Partition indices are reported as
/// `i32`, matching Kafka, and every partition log is allocated up front.
pub const MAX_PARTITIONS: usize = 10_000;

/// A record as stored in a partition log.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredRecord {
    pub key: String,
    pub payload: Bytes,
    pub offset: i64,
}

struct BrokerState {
    partitions: usize,
    logs: Mutex<HashMap<Arc<str>, Vec<Vec<StoredRecord>>>>,
    online: watch::Sender<bool>,
    transient_faults: AtomicU64,
}

/// A shared, cloneable handle to an in-memory broker.
#[derive(Clone)]
pub struct MemoryBroker {
    state: Arc<BrokerState>,
}

impl MemoryBroker {
    /// Creates an online broker with `partitions` partitions per topic.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidConfig`] if `partitions` is zero or above
    /// [`MAX_PARTITIONS`].
    pub fn new(partitions: usize) -> Result<Self> {
        if !(1..=MAX_PARTITIONS).contains(&partitions) {
            return Err(Error::InvalidConfig {
                reason: format!(
                    "partition count must be between 1 and {MAX_PARTITIONS}, got {partitions}"
                ),
            });
        }

        let (online, _) = watch::channel(true);
        Ok(Self {
            state: Arc::new(BrokerState {
                partitions,
                logs: Mutex::new(HashMap::new()),
                online,
                transient_faults: AtomicU64::new(0),
            }),
        })
    }

    pub fn partitions(&self) -> usize {
        self.state.partitions
    }

    /// Takes the broker offline or brings it back.
    pub fn set_online(&self, online: bool) {
        self.state.online.send_replace(online);
    }

    /// Makes the next `count` append attempts fail with a retriable error.
    pub fn inject_transient_faults(&self, count: u64) {
        self.state.transient_faults.fetch_add(count, Ordering::AcqRel);
    }

    /// The partition every record with `key` is routed to.
    pub fn partition_for(&self, key: &str) -> usize {
        partition_for(key, self.state.partitions)
    }

    /// A copy of one partition log. Empty if nothing was written to it yet.
    pub fn records(&self, topic: &str, partition: usize) -> Vec<StoredRecord> {
        self.state
            .logs
            .lock()
            .get(topic)
            .and_then(|partitions| partitions.get(partition))
            .cloned()
            .unwrap_or_default()
    }

    /// Every record written for `key`, in log order.
    pub fn records_for_key(&self, topic: &str, key: &str) -> Vec<StoredRecord> {
        self.records(topic, self.partition_for(key))
            .into_iter()
            .filter(|record| record.key == key)
            .collect()
    }

    /// Total records across every partition of `topic`.
    pub fn len(&self, topic: &str) -> usize {
        self.state
            .logs
            .lock()
            .get(topic)
            .map_or(0, |partitions| partitions.iter().map(Vec::len).sum())
    }

    pub fn is_empty(&self, topic: &str) -> bool {
        self.len(topic) == 0
    }

    /// Opens a producer connection with its own bounded queue and flusher
    /// task. Completions are reported on `sink`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidConfig`] if `settings` fail validation.
    ///
    /// # Panics
    ///
    /// Panics if called outside of a Tokio runtime.
    pub fn connect(
        &self,
        settings: &ProducerSettings,
        sink: CompletionSink,
    ) -> Result<MemoryConnection> {
        settings.validate()?;

        let (queue, rx) = mpsc::channel(settings.queue_capacity);
        let flusher = tokio::spawn(flush_loop(
            Arc::clone(&self.state),
            rx,
            settings.clone(),
            sink,
        ));

        Ok(MemoryConnection { queue, flusher })
    }
}

/// Producer side of a [`MemoryBroker`].
pub struct MemoryConnection {
    queue: mpsc::Sender<OutboundRecord>,
    flusher: JoinHandle<()>,
}

impl Connection for MemoryConnection {
    fn try_send(&self, record: OutboundRecord) -> Result<()> {
        self.queue.try_send(record).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => Error::BufferFull,
            mpsc::error::TrySendError::Closed(_) => Error::Disconnected,
        })
    }

    async fn close(self, flush_timeout: Duration) -> Result<()> {
        let Self { queue, mut flusher } = self;
        let pending = queue.max_capacity() - queue.capacity();

        // Closing the queue lets the flusher finish its backlog and exit.
        drop(queue);

        match timeout(flush_timeout, &mut flusher).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => Err(Error::ChannelError {
                context: format!("Flusher task failed: {e}"),
            }),
            Err(_) => {
                flusher.abort();
                tracing::warn!(
                    "Flush timed out after {flush_timeout:?} with up to {pending} records undelivered"
                );
                Err(Error::Connection {
                    context: format!("flush timed out after {flush_timeout:?}"),
                })
            }
        }
    }
}

/// Single flusher per connection: one batch in flight at a time, so retries
/// can never reorder records within a partition.
async fn flush_loop(
    state: Arc<BrokerState>,
    mut rx: mpsc::Receiver<OutboundRecord>,
    settings: ProducerSettings,
    sink: CompletionSink,
) {
    let mut online = state.online.subscribe();
    let mut batch = Vec::with_capacity(settings.flush_messages);

    loop {
        // An offline broker leaves records in the queue, so it fills up.
        let reachable = online.wait_for(|up| *up).await.is_ok();
        if !reachable {
            break;
        }

        let Some(first) = rx.recv().await else {
            break;
        };
        batch.push(first);

        let deadline = Instant::now() + settings.flush_interval;
        while batch.len() < settings.flush_messages {
            match timeout_at(deadline, rx.recv()).await {
                Ok(Some(record)) => batch.push(record),
                Ok(None) | Err(_) => break,
            }
        }

        commit(&state, &mut batch, &settings, &sink).await;
    }

    tracing::trace!("Memory broker flusher stopped");
}

async fn commit(
    state: &BrokerState,
    batch: &mut Vec<OutboundRecord>,
    settings: &ProducerSettings,
    sink: &CompletionSink,
) {
    batch.retain(|record| {
        if record.payload.len() <= settings.max_message_bytes {
            return true;
        }
        sink.fail(DeliveryFailure {
            key: record.key.clone(),
            reason: format!(
                "message of {} bytes exceeds the {} byte limit",
                record.payload.len(),
                settings.max_message_bytes
            ),
        });
        false
    });

    if batch.is_empty() {
        return;
    }

    let mut retries = 0;
    loop {
        match state.append(batch) {
            Ok(acks) => {
                for ack in acks {
                    sink.ack(ack);
                }
                break;
            }
            Err(reason) if retries < settings.retry_max => {
                retries += 1;
                tracing::debug!(
                    "Batch of {} failed ({reason}), retry {retries}/{}",
                    batch.len(),
                    settings.retry_max
                );
                sleep(settings.retry_backoff).await;
            }
            Err(reason) => {
                for record in batch.iter() {
                    sink.fail(DeliveryFailure {
                        key: record.key.clone(),
                        reason: format!("{reason} (after {retries} retries)"),
                    });
                }
                break;
            }
        }
    }

    batch.clear();
}

impl BrokerState {
    /// Appends the whole batch or nothing.
    fn append(&self, batch: &[OutboundRecord]) -> core::result::Result<Vec<Ack>, &'static str> {
        if !*self.online.borrow() {
            return Err("broker unavailable");
        }

        let injected = self
            .transient_faults
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| n.checked_sub(1))
            .is_ok();
        if injected {
            return Err("transient broker fault");
        }

        let placements = batch
            .iter()
            .map(|record| {
                let partition = partition_for(&record.key, self.partitions);
                i32::try_from(partition)
                    .map(|id| (record, partition, id))
                    .map_err(|_| "partition index out of range")
            })
            .collect::<core::result::Result<Vec<_>, _>>()?;

        let mut logs = self.logs.lock();
        let mut acks = Vec::with_capacity(batch.len());

        for (record, partition, id) in placements {
            let partitions = logs
                .entry(Arc::clone(&record.topic))
                .or_insert_with(|| vec![Vec::new(); self.partitions]);
            let log = &mut partitions[partition];
            let offset = log.len() as i64;

            log.push(StoredRecord {
                key: record.key.clone(),
                payload: record.payload.clone(),
                offset,
            });
            acks.push(Ack {
                key: record.key.clone(),
                partition: id,
                offset,
            });
        }

        Ok(acks)
    }
}

/// FNV-1a over the key bytes, the default hash partitioner of most Kafka
/// clients.
fn partition_for(key: &str, partitions: usize) -> usize {
    const OFFSET_BASIS: u32 = 0x811c_9dc5;
    const PRIME: u32 = 0x0100_0193;

    let hash = key.bytes().fold(OFFSET_BASIS, |hash, byte| {
        (hash ^ u32::from(byte)).wrapping_mul(PRIME)
    });
    hash as usize % partitions
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dispatch::completion_channel;

    fn record(key: &str, payload: &'static [u8]) -> OutboundRecord {
        OutboundRecord {
            topic: Arc::from("readings"),
            key: key.to_string(),
            payload: Bytes::from_static(payload),
        }
    }

    #[test]
    fn partitioning_is_stable_and_in_range() {
        for partitions in [1, 3, 8, 64] {
            for i in 0..100 {
                let key = format!("sensor_{i}");
                let p = partition_for(&key, partitions);
                assert!(p < partitions);
                assert_eq!(p, partition_for(&key, partitions));
            }
        }
    }

    #[test]
    fn fnv1a_matches_reference_vectors() {
        // 32-bit FNV-1a of "" and "a".
        assert_eq!(partition_for("", usize::MAX), 0x811c_9dc5);
        assert_eq!(partition_for("a", usize::MAX), 0xe40c_292c);
    }

    #[test]
    fn zero_partitions_is_rejected() {
        assert!(matches!(
            MemoryBroker::new(0),
            Err(Error::InvalidConfig { .. })
        ));
    }

    #[test]
    fn partition_count_is_capped() {
        assert_eq!(
            MemoryBroker::new(MAX_PARTITIONS).unwrap().partitions(),
            MAX_PARTITIONS
        );
        for partitions in [MAX_PARTITIONS + 1, i32::MAX as usize + 1, usize::MAX] {
            assert!(
                matches!(
                    MemoryBroker::new(partitions),
                    Err(Error::InvalidConfig { .. })
                ),
                "{partitions}"
            );
        }
    }

    #[tokio::test]
    async fn acks_report_the_highest_partition() {
        let broker = MemoryBroker::new(MAX_PARTITIONS).unwrap();
        let (sink, mut streams) = completion_channel();
        let connection = broker.connect(&ProducerSettings::default(), sink).unwrap();

        let key = (0..)
            .map(|i| format!("sensor_{i}"))
            .find(|key| broker.partition_for(key) == MAX_PARTITIONS - 1)
            .unwrap();
        connection
            .try_send(OutboundRecord {
                topic: Arc::from("sensor_metrics"),
                key: key.clone(),
                payload: Bytes::from_static(b"{}"),
            })
            .unwrap();

        let ack = streams.acks.recv().await.unwrap();
        assert_eq!(ack.key, key);
        assert_eq!(ack.partition, MAX_PARTITIONS as i32 - 1);
        assert_eq!(ack.offset, 0);
        connection.close(Duration::from_secs(1)).await.unwrap();
    }

    #[tokio::test]
    async fn appends_in_order_with_offsets() {
        let broker = MemoryBroker::new(4).unwrap();
        let (sink, mut streams) = completion_channel();
        let connection = broker.connect(&ProducerSettings::default(), sink).unwrap();

        connection.try_send(record("sensor_1", b"a")).unwrap();
        connection.try_send(record("sensor_1", b"b")).unwrap();
        connection.try_send(record("sensor_1", b"c")).unwrap();
        connection.close(Duration::from_secs(1)).await.unwrap();

        let stored = broker.records_for_key("readings", "sensor_1");
        let payloads: Vec<&[u8]> = stored.iter().map(|r| r.payload.as_ref()).collect();
        assert_eq!(payloads, vec![&b"a"[..], &b"b"[..], &b"c"[..]]);
        assert_eq!(
            stored.iter().map(|r| r.offset).collect::<Vec<_>>(),
            [0, 1, 2]
        );

        let mut acked = 0;
        while let Ok(ack) = streams.acks.try_recv() {
            assert_eq!(ack.partition as usize, broker.partition_for("sensor_1"));
            acked += 1;
        }
        assert_eq!(acked, 3);
    }

    #[tokio::test]
    async fn offline_broker_leaves_queue_full() {
        let broker = MemoryBroker::new(1).unwrap();
        broker.set_online(false);
        let (sink, _streams) = completion_channel();
        let settings = ProducerSettings {
            queue_capacity: 2,
            ..Default::default()
        };
        let connection = broker.connect(&settings, sink).unwrap();

        tokio::task::yield_now().await;
        assert!(connection.try_send(record("k", b"1")).is_ok());
        assert!(connection.try_send(record("k", b"2")).is_ok());
        assert_eq!(
            connection.try_send(record("k", b"3")),
            Err(Error::BufferFull)
        );
    }

    #[tokio::test]
    async fn oversized_records_fail_without_blocking_the_batch() {
        let broker = MemoryBroker::new(2).unwrap();
        let (sink, mut streams) = completion_channel();
        let settings = ProducerSettings {
            max_message_bytes: 4,
            ..Default::default()
        };
        let connection = broker.connect(&settings, sink).unwrap();

        connection.try_send(record("small", b"ok")).unwrap();
        connection.try_send(record("big", b"too large")).unwrap();
        connection.close(Duration::from_secs(1)).await.unwrap();

        let failure = streams.failures.try_recv().unwrap();
        assert_eq!(failure.key, "big");
        assert!(streams.failures.try_recv().is_err());
        assert_eq!(streams.acks.try_recv().unwrap().key, "small");
        assert_eq!(broker.len("readings"), 1);
    }
}
