//! Kafka connection backed by librdkafka.
//!
//! The producer is configured for ordered, duplicate-free delivery:
//!
//! - `acks=all` and `enable.idempotence=true`
//! - one in-flight request per broker connection
//! - a fixed retry budget and a constant backoff (`retry.backoff.max.ms`
//!   is pinned to `retry.backoff.ms`, so librdkafka never grows it)
//! - batches flushed by size or linger time, whichever comes first
//!
//! librdkafka owns the bounded outbound queue
//! (`queue.buffering.max.messages`); `send` on a full queue fails
//! immediately with `QueueFull`, which maps straight onto
//! [`Error::BufferFull`]. Delivery reports are raised on the producer's
//! polling thread and forwarded to the dispatcher's completion streams.

use super::{Connection, MAX_IN_FLIGHT_REQUESTS, OutboundRecord, ProducerSettings};
use crate::{
    Error, Result,
    dispatch::{Ack, CompletionSink, DeliveryFailure},
};
use core::time::Duration;
use rdkafka::{
    ClientContext,
    config::ClientConfig,
    error::{KafkaError, RDKafkaErrorCode},
    message::Message,
    producer::{BaseRecord, DeliveryResult, Producer, ProducerContext, ThreadedProducer},
};

/// Routes librdkafka delivery reports onto the completion streams.
pub struct CompletionContext {
    sink: CompletionSink,
}

impl ClientContext for CompletionContext {}

impl ProducerContext for CompletionContext {
    type DeliveryOpaque = ();

    fn delivery(&self, result: &DeliveryResult<'_>, _opaque: Self::DeliveryOpaque) {
        match result {
            Ok(message) => self.sink.ack(Ack {
                key: key_of(message),
                partition: message.partition(),
                offset: message.offset(),
            }),
            Err((err, message)) => self.sink.fail(DeliveryFailure {
                key: key_of(message),
                reason: err.to_string(),
            }),
        }
    }
}

fn key_of<M: Message>(message: &M) -> String {
    message
        .key()
        .map(|key| String::from_utf8_lossy(key).into_owned())
        .unwrap_or_default()
}

/// Producer connection to a Kafka cluster.
pub struct KafkaConnection {
    producer: ThreadedProducer<CompletionContext>,
    sink: CompletionSink,
}

impl KafkaConnection {
    /// Builds the producer and verifies that `topic` is reachable.
    ///
    /// This blocks for up to `connect_timeout` while fetching topic metadata;
    /// call it from a blocking context.
    ///
    /// # Errors
    ///
    /// - [`Error::InvalidConfig`] if `brokers` is empty or `settings` fail
    ///   validation.
    /// - [`Error::Connection`] if the producer cannot be created or the
    ///   cluster does not answer in time.
    pub fn connect(
        brokers: &[String],
        topic: &str,
        settings: &ProducerSettings,
        connect_timeout: Duration,
        sink: CompletionSink,
    ) -> Result<Self> {
        settings.validate()?;
        if brokers.is_empty() {
            return Err(Error::InvalidConfig {
                reason: "at least one bootstrap broker is required".to_string(),
            });
        }

        let config = client_config(brokers, settings);
        let producer: ThreadedProducer<CompletionContext> =
            config.create_with_context(CompletionContext { sink: sink.clone() })?;

        let metadata = producer
            .client()
            .fetch_metadata(Some(topic), connect_timeout)
            .map_err(|e| Error::Connection {
                context: format!("unable to reach brokers {}: {e}", brokers.join(",")),
            })?;

        tracing::info!(
            brokers = metadata.brokers().len(),
            partitions = metadata
                .topics()
                .first()
                .map_or(0, |t| t.partitions().len()),
            topic,
            "Connected to Kafka"
        );

        Ok(Self { producer, sink })
    }
}

fn client_config(brokers: &[String], settings: &ProducerSettings) -> ClientConfig {
    let mut config = ClientConfig::new();
    config
        .set("bootstrap.servers", brokers.join(","))
        .set("client.id", "sensorgen")
        .set("acks", "all")
        .set("enable.idempotence", "true")
        .set(
            "max.in.flight.requests.per.connection",
            MAX_IN_FLIGHT_REQUESTS.to_string(),
        )
        .set("retries", settings.retry_max.to_string())
        .set(
            "retry.backoff.ms",
            settings.retry_backoff.as_millis().to_string(),
        )
        .set(
            "retry.backoff.max.ms",
            settings.retry_backoff.as_millis().to_string(),
        )
        .set("batch.num.messages", settings.flush_messages.to_string())
        .set("linger.ms", settings.flush_interval.as_millis().to_string())
        .set("message.max.bytes", settings.max_message_bytes.to_string())
        .set(
            "queue.buffering.max.messages",
            settings.queue_capacity.to_string(),
        )
        .set("compression.type", "none");
    config
}

impl Connection for KafkaConnection {
    fn try_send(&self, record: OutboundRecord) -> Result<()> {
        let base = BaseRecord::to(&record.topic)
            .key(record.key.as_str())
            .payload(&record.payload[..]);

        match self.producer.send(base) {
            Ok(()) => Ok(()),
            Err((KafkaError::MessageProduction(RDKafkaErrorCode::QueueFull), _)) => {
                Err(Error::BufferFull)
            }
            // Anything else (e.g. an oversized message) was rejected locally
            // and will never be retried, so it is a terminal delivery failure.
            Err((err, _)) => {
                self.sink.fail(DeliveryFailure {
                    key: record.key.clone(),
                    reason: err.to_string(),
                });
                Ok(())
            }
        }
    }

    async fn close(self, flush_timeout: Duration) -> Result<()> {
        tokio::task::spawn_blocking(move || {
            let in_flight = self.producer.in_flight_count();
            tracing::debug!("Flushing {in_flight} in-flight records");

            let flushed = self.producer.flush(flush_timeout);
            if flushed.is_err() {
                tracing::warn!(
                    "Flush timed out after {flush_timeout:?} with {} records undelivered",
                    self.producer.in_flight_count()
                );
            }
            // Dropping the producer stops its polling thread and releases the
            // context's sink.
            drop(self);
            flushed.map_err(Error::from)
        })
        .await
        .map_err(|e| Error::ChannelError {
            context: format!("Flush task failed: {e}"),
        })?
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dispatch::{CompletionStreams, completion_channel};
    use bytes::Bytes;
    use rdkafka::producer::PurgeConfig;
    use std::sync::Arc;

    /// Builds a producer without contacting any broker. Records stay queued
    /// locally, so the queue fills up and never drains.
    fn unconnected(settings: &ProducerSettings) -> (KafkaConnection, CompletionStreams) {
        let (sink, streams) = completion_channel();
        let producer = client_config(&["127.0.0.1:1".to_string()], settings)
            .create_with_context(CompletionContext { sink: sink.clone() })
            .unwrap();
        (KafkaConnection { producer, sink }, streams)
    }

    fn record(key: &str, payload: Vec<u8>) -> OutboundRecord {
        OutboundRecord {
            topic: Arc::from("sensor_metrics"),
            key: key.to_string(),
            payload: Bytes::from(payload),
        }
    }

    fn discard(connection: KafkaConnection) {
        connection
            .producer
            .purge(PurgeConfig::default().queue().inflight());
    }

    #[test]
    fn config_carries_delivery_contract() {
        let brokers = vec!["kafka-1:9092".to_string(), "kafka-2:9092".to_string()];
        let config = client_config(&brokers, &ProducerSettings::default());

        let expect = [
            ("bootstrap.servers", "kafka-1:9092,kafka-2:9092"),
            ("acks", "all"),
            ("enable.idempotence", "true"),
            ("max.in.flight.requests.per.connection", "1"),
            ("retries", "5"),
            ("retry.backoff.ms", "100"),
            ("retry.backoff.max.ms", "100"),
            ("batch.num.messages", "100"),
            ("linger.ms", "100"),
            ("message.max.bytes", "1000000"),
            ("queue.buffering.max.messages", "256"),
        ];
        for (key, value) in expect {
            assert_eq!(config.get(key), Some(value), "{key}");
        }
    }

    #[test]
    fn empty_broker_list_is_rejected() {
        let (sink, _streams) = crate::dispatch::completion_channel();
        let err = KafkaConnection::connect(
            &[],
            "sensor_metrics",
            &ProducerSettings::default(),
            Duration::from_millis(10),
            sink,
        )
        .err()
        .unwrap();
        assert!(matches!(err, Error::InvalidConfig { .. }));
    }

    #[test]
    fn full_local_queue_is_backpressure() {
        let settings = ProducerSettings {
            queue_capacity: 1,
            ..Default::default()
        };
        let (connection, mut streams) = unconnected(&settings);

        assert_eq!(connection.try_send(record("sensor_1", b"{}".to_vec())), Ok(()));
        assert_eq!(
            connection.try_send(record("sensor_1", b"{}".to_vec())),
            Err(Error::BufferFull)
        );
        assert!(streams.failures.try_recv().is_err());
        assert!(streams.acks.try_recv().is_err());

        discard(connection);
    }

    #[test]
    fn locally_rejected_record_fails_once_without_backpressure() {
        let settings = ProducerSettings::default();
        let (connection, mut streams) = unconnected(&settings);
        let oversized = vec![b'x'; settings.max_message_bytes * 2];

        assert_eq!(connection.try_send(record("sensor_7", oversized)), Ok(()));

        let failure = streams.failures.try_recv().unwrap();
        assert_eq!(failure.key, "sensor_7");
        assert!(!failure.reason.is_empty());
        assert!(streams.failures.try_recv().is_err());
        assert!(streams.acks.try_recv().is_err());

        // The queue was left untouched.
        assert_eq!(connection.try_send(record("sensor_7", b"{}".to_vec())), Ok(()));
        assert!(streams.failures.try_recv().is_err());

        discard(connection);
    }
}
