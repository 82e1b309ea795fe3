#![doc = include_str!("../README.md")]

mod producer;

#[cfg(feature = "kafka")]
use anyhow::Context;
use clap::Parser;
use producer::config::{CliArgs, ProducerConfig};
use producer::telemetry::{DeliveryMetrics, init_telemetry};
use sensorgen::{DeliveryStats, Dispatcher, MemoryBroker, completion_channel, run_fleet};
use tokio::signal;
use tokio_util::sync::CancellationToken;

// Using mimalloc for better performance under contention, especially in musl
// environments.
#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load from .env
    let _ = dotenvy::dotenv();
    let args = CliArgs::parse();
    let config = ProducerConfig::try_from(args)?;

    let providers = init_telemetry(config.log_json)?;
    log_startup_info(&config);

    let shutdown = CancellationToken::new();
    tokio::spawn(shutdown_signal(shutdown.clone()));

    let result = run(&config, shutdown).await;
    match &result {
        Ok(stats) => tracing::info!(
            submitted = stats.submitted,
            accepted = stats.accepted,
            succeeded = stats.succeeded,
            failed = stats.failed,
            dropped = stats.dropped,
            undelivered = stats.in_flight(),
            "Producer shut down successfully"
        ),
        Err(e) => tracing::error!("Producer failed: {e:#}"),
    }

    providers.shutdown();
    result.map(|_| ())
}

async fn run(config: &ProducerConfig, shutdown: CancellationToken) -> anyhow::Result<DeliveryStats> {
    let (sink, streams) = completion_channel();
    let mut metrics = DeliveryMetrics::default();
    let on_stats = move |stats: &DeliveryStats| {
        metrics.observe(stats);
    };

    if config.in_memory {
        let broker = MemoryBroker::new(config.partitions)?;
        let connection = broker.connect(&config.settings, sink)?;
        let dispatcher = Dispatcher::new(connection, streams, config.topic.as_str());
        let stats = run_fleet(&config.fleet, dispatcher, shutdown, on_stats).await?;

        tracing::info!(
            partitions = broker.partitions(),
            records = broker.len(&config.topic),
            "In-memory broker contents"
        );
        return Ok(stats);
    }

    #[cfg(feature = "kafka")]
    {
        let brokers = config.brokers.clone();
        let topic = config.topic.clone();
        let settings = config.settings.clone();
        let connect_timeout = config.connect_timeout;

        // Metadata probing blocks on librdkafka.
        let connection = tokio::task::spawn_blocking(move || {
            sensorgen::KafkaConnection::connect(&brokers, &topic, &settings, connect_timeout, sink)
        })
        .await
        .context("Kafka connect task failed")?
        .with_context(|| format!("failed to connect to {}", config.brokers.join(",")))?;

        let dispatcher = Dispatcher::new(connection, streams, config.topic.as_str());
        Ok(run_fleet(&config.fleet, dispatcher, shutdown, on_stats).await?)
    }

    #[cfg(not(feature = "kafka"))]
    {
        let _ = (sink, streams, on_stats, shutdown);
        anyhow::bail!("built without the `kafka` feature; pass --in-memory for a dry run");
    }
}

fn log_startup_info(config: &ProducerConfig) {
    let target = if config.in_memory {
        format!("in-memory broker ({} partitions)", config.partitions)
    } else {
        config.brokers.join(",")
    };

    if cfg!(debug_assertions) {
        tracing::info!(
            "Starting producer for topic {} on {} with full config: {:#?}",
            config.topic,
            target,
            config
        );
    } else {
        tracing::info!(
            "Starting {} sensors at {} events/sec for topic {} on {}",
            config.fleet.sensor_count,
            config.fleet.events_per_sec,
            config.topic,
            target
        );
    }
}

async fn shutdown_signal(shutdown: CancellationToken) {
    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    tokio::select! {
        () = ctrl_c => tracing::info!("Received Ctrl+C signal"),
        () = terminate => tracing::info!("Received SIGTERM signal"),
        () = shutdown.cancelled() => return,
    }

    tracing::info!("Shutdown signal received, stopping sensors and draining...");
    shutdown.cancel();
}
