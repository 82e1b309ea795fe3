use anyhow::bail;
use clap::Parser;
use core::time::Duration;
use sensorgen::{FleetConfig, ProducerSettings, connection::memory::MAX_PARTITIONS};

/// Runtime configuration for the `sensorgen-producer` binary.
///
/// Every value can be given as a CLI flag or an environment variable (a
/// `.env` file in the working directory is loaded first). Defaults describe a
/// fleet of 1000 sensors emitting 5000 events/sec in aggregate into a local
/// Kafka broker, running until interrupted.
#[derive(Parser, Debug, Clone)]
#[command(
    name = "sensorgen-producer",
    version,
    about = "Simulates a sensor fleet and produces its readings into Kafka"
)]
pub struct CliArgs {
    /// Comma-separated list of bootstrap brokers (`host:port`).
    ///
    /// Environment variable: `KAFKA_BROKERS`
    #[arg(long, env = "KAFKA_BROKERS", default_value_t = String::from("localhost:9092"))]
    pub kafka_brokers: String,

    /// Topic every reading is produced to.
    ///
    /// Environment variable: `KAFKA_TOPIC`
    #[arg(long, env = "KAFKA_TOPIC", default_value_t = String::from("sensor_metrics"))]
    pub kafka_topic: String,

    /// Number of simulated sensors, each running as its own task.
    ///
    /// Environment variable: `SENSOR_COUNT`
    #[arg(long, env = "SENSOR_COUNT", default_value_t = 1_000)]
    pub sensor_count: usize,

    /// Aggregate rate across the whole fleet. Each sensor emits
    /// `EVENTS_PER_SEC / SENSOR_COUNT` events per second.
    ///
    /// Environment variable: `EVENTS_PER_SEC`
    #[arg(long, env = "EVENTS_PER_SEC", default_value_t = 5_000.0)]
    pub events_per_sec: f64,

    /// Stop after this many seconds. `0` runs until SIGINT/SIGTERM.
    ///
    /// Environment variable: `RUN_DURATION_SEC`
    #[arg(long, env = "RUN_DURATION_SEC", default_value_t = 0)]
    pub run_duration_sec: u64,

    /// Capacity of the outbound queue in front of the broker.
    ///
    /// Once full, new readings are dropped (and counted) rather than waiting
    /// for space. Smaller values surface backpressure sooner.
    ///
    /// Environment variable: `QUEUE_CAPACITY`
    #[arg(long, env = "QUEUE_CAPACITY", default_value_t = 256)]
    pub queue_capacity: usize,

    /// Seconds between delivery stats reports.
    ///
    /// Environment variable: `STATS_INTERVAL_SEC`
    #[arg(long, env = "STATS_INTERVAL_SEC", default_value_t = 5)]
    pub stats_interval_sec: u64,

    /// Upper bound on flushing in-flight readings at shutdown.
    ///
    /// Environment variable: `CLOSE_TIMEOUT_SEC`
    #[arg(long, env = "CLOSE_TIMEOUT_SEC", default_value_t = 10)]
    pub close_timeout_sec: u64,

    /// How long to wait for the cluster to answer at start-up.
    ///
    /// Environment variable: `CONNECT_TIMEOUT_SEC`
    #[arg(long, env = "CONNECT_TIMEOUT_SEC", default_value_t = 10)]
    pub connect_timeout_sec: u64,

    /// Base seed for reproducible readings. Sensors are seeded from the OS
    /// when unset.
    ///
    /// Environment variable: `SEED`
    #[arg(long, env = "SEED")]
    pub seed: Option<u64>,

    /// Produce into an in-process broker instead of Kafka (dry run).
    ///
    /// Environment variable: `IN_MEMORY`
    #[arg(long, env = "IN_MEMORY", default_value_t = false)]
    pub in_memory: bool,

    /// Partitions per topic of the in-process broker, at most 10000.
    /// Ignored for Kafka.
    ///
    /// Environment variable: `PARTITIONS`
    #[arg(long, env = "PARTITIONS", default_value_t = 8)]
    pub partitions: usize,

    /// Emit JSON log lines instead of human-readable ones.
    ///
    /// Environment variable: `LOG_JSON`
    #[arg(long, env = "LOG_JSON", default_value_t = false)]
    pub log_json: bool,
}

#[derive(Debug, Clone)]
pub struct ProducerConfig {
    pub brokers: Vec<String>,
    pub topic: String,
    pub fleet: FleetConfig,
    pub settings: ProducerSettings,
    pub connect_timeout: Duration,
    pub in_memory: bool,
    pub partitions: usize,
    pub log_json: bool,
}

impl TryFrom<CliArgs> for ProducerConfig {
    type Error = anyhow::Error;

    fn try_from(args: CliArgs) -> Result<Self, Self::Error> {
        let brokers: Vec<String> = args
            .kafka_brokers
            .split(',')
            .map(str::trim)
            .filter(|broker| !broker.is_empty())
            .map(String::from)
            .collect();
        if brokers.is_empty() {
            bail!("KAFKA_BROKERS must name at least one broker");
        }

        let topic = args.kafka_topic.trim().to_string();
        if topic.is_empty() {
            bail!("KAFKA_TOPIC must not be empty");
        }

        if args.sensor_count == 0 {
            bail!("SENSOR_COUNT must be greater than 0");
        }

        if !args.events_per_sec.is_finite() || args.events_per_sec <= 0.0 {
            bail!(
                "EVENTS_PER_SEC must be greater than 0 (got {})",
                args.events_per_sec
            );
        }

        if args.queue_capacity == 0 {
            bail!("QUEUE_CAPACITY must be greater than 0");
        }

        if args.stats_interval_sec == 0 {
            bail!("STATS_INTERVAL_SEC must be greater than 0");
        }

        if args.close_timeout_sec == 0 {
            bail!("CLOSE_TIMEOUT_SEC must be greater than 0");
        }

        if args.connect_timeout_sec == 0 {
            bail!("CONNECT_TIMEOUT_SEC must be greater than 0");
        }

        if !(1..=MAX_PARTITIONS).contains(&args.partitions) {
            bail!(
                "PARTITIONS must be between 1 and {MAX_PARTITIONS} (got {})",
                args.partitions
            );
        }

        let fleet = FleetConfig {
            sensor_count: args.sensor_count,
            events_per_sec: args.events_per_sec,
            run_for: (args.run_duration_sec > 0)
                .then(|| Duration::from_secs(args.run_duration_sec)),
            stats_interval: Duration::from_secs(args.stats_interval_sec),
            close_timeout: Duration::from_secs(args.close_timeout_sec),
            seed: args.seed,
        };
        // Catches per-sensor rates too high to schedule.
        fleet.validate()?;

        let settings = ProducerSettings {
            queue_capacity: args.queue_capacity,
            ..Default::default()
        };
        settings.validate()?;

        Ok(Self {
            brokers,
            topic,
            fleet,
            settings,
            connect_timeout: Duration::from_secs(args.connect_timeout_sec),
            in_memory: args.in_memory,
            partitions: args.partitions,
            log_json: args.log_json,
        })
    }
}
