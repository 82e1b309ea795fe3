//! # Telemetry
//!
//! Logging is always on: `tracing` events are printed by a
//! `tracing_subscriber::fmt` layer, human-readable by default or one JSON
//! object per line with `--log-json`. `RUST_LOG` overrides the default `info`
//! filter.
//!
//! ## Feature matrix
//!
//! - `metrics`: Enables OpenTelemetry delivery counters.
//! - `stdout`: Enables the stdout metrics exporter.
//!
//! ## Metrics behavior
//!
//! Counters mirror the dispatcher's [`DeliveryStats`]. Every stats snapshot
//! is diffed against the previous one and the growth is added to:
//!
//! - `events_submitted`
//! - `events_accepted`
//! - `events_dropped`
//! - `deliveries_succeeded`
//! - `deliveries_failed`
//!
//! Without `metrics`, recording compiles to a no-op.
//!
//! ## Example usage
//!
//! ```bash
//! cargo run -p sensorgen-producer --features metrics,stdout -- --in-memory
//! ```

// Disallow using `stdout` without `metrics`
#[cfg(all(feature = "stdout", not(feature = "metrics")))]
compile_error!("The 'stdout' feature requires 'metrics' to be enabled.");

use sensorgen::DeliveryStats;
use tracing_subscriber::{
    EnvFilter, fmt::time::ChronoLocal, layer::SubscriberExt, util::SubscriberInitExt,
};

#[cfg(feature = "metrics")]
use opentelemetry::{
    InstrumentationScope, KeyValue,
    metrics::{Counter, Meter},
};
#[cfg(feature = "metrics")]
use opentelemetry_sdk::{Resource, metrics as sdkmetrics};
#[cfg(feature = "metrics")]
use opentelemetry_semantic_conventions as semvcns;
#[cfg(feature = "metrics")]
use std::sync::OnceLock;

pub struct TelemetryProviders {
    #[cfg(feature = "metrics")]
    pub meter_provider: sdkmetrics::SdkMeterProvider,
}

impl TelemetryProviders {
    /// Flushes and stops every exporter. Errors are printed, not returned:
    /// the subscriber may already be unusable at this point.
    pub fn shutdown(self) {
        #[cfg(feature = "metrics")]
        {
            if let Err(err) = self.meter_provider.force_flush() {
                eprintln!("Error flushing metrics: {err:#?}");
            }
            if let Err(err) = self.meter_provider.shutdown() {
                eprintln!("Error shutting down meter: {err:#?}");
            }
        }
    }
}

pub fn init_telemetry(log_json: bool) -> anyhow::Result<TelemetryProviders> {
    #[cfg(feature = "metrics")]
    let meter_provider = init_metrics()?;

    let pretty = (!log_json).then(|| {
        tracing_subscriber::fmt::layer()
            .with_thread_ids(true)
            .with_line_number(true)
            .with_target(false)
            .with_timer(ChronoLocal::rfc_3339())
            .with_file(true)
            .pretty()
    });
    let json = log_json.then(|| {
        tracing_subscriber::fmt::layer()
            .with_thread_ids(true)
            .with_line_number(true)
            .with_target(false)
            .with_timer(ChronoLocal::rfc_3339())
            .with_file(true)
            .json()
    });

    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .with(pretty)
        .with(json)
        .init();

    #[cfg(feature = "metrics")]
    {
        opentelemetry::global::set_meter_provider(meter_provider.clone());
        let scope = InstrumentationScope::builder("sensorgen")
            .with_version(env!("CARGO_PKG_VERSION"))
            .with_schema_url(semvcns::SCHEMA_URL)
            .build();
        init_metric_handles(opentelemetry::global::meter_with_scope(scope));
    }

    Ok(TelemetryProviders {
        #[cfg(feature = "metrics")]
        meter_provider,
    })
}

#[cfg(feature = "metrics")]
fn resource() -> Resource {
    Resource::builder()
        .with_service_name("sensorgen-producer")
        .with_schema_url(
            [KeyValue::new(
                semvcns::resource::SERVICE_VERSION,
                env!("CARGO_PKG_VERSION"),
            )],
            semvcns::SCHEMA_URL,
        )
        .build()
}

#[cfg(feature = "metrics")]
fn init_metrics() -> anyhow::Result<sdkmetrics::SdkMeterProvider> {
    let builder = sdkmetrics::SdkMeterProvider::builder().with_resource(resource());

    #[cfg(feature = "stdout")]
    let builder = {
        use opentelemetry_stdout::MetricExporter;
        let exporter = MetricExporter::default();
        let reader = sdkmetrics::PeriodicReader::builder(exporter)
            .with_interval(std::time::Duration::from_secs(5))
            .build();

        builder.with_reader(reader)
    };

    Ok(builder.build())
}

#[cfg(feature = "metrics")]
static EVENTS_SUBMITTED: OnceLock<Counter<u64>> = OnceLock::new();
#[cfg(feature = "metrics")]
static EVENTS_ACCEPTED: OnceLock<Counter<u64>> = OnceLock::new();
#[cfg(feature = "metrics")]
static EVENTS_DROPPED: OnceLock<Counter<u64>> = OnceLock::new();
#[cfg(feature = "metrics")]
static DELIVERIES_SUCCEEDED: OnceLock<Counter<u64>> = OnceLock::new();
#[cfg(feature = "metrics")]
static DELIVERIES_FAILED: OnceLock<Counter<u64>> = OnceLock::new();

#[cfg(feature = "metrics")]
fn init_metric_handles(meter: Meter) {
    let _ = EVENTS_SUBMITTED.set(
        meter
            .u64_counter("events_submitted")
            .with_description("Events offered to the outbound queue")
            .build(),
    );

    let _ = EVENTS_ACCEPTED.set(
        meter
            .u64_counter("events_accepted")
            .with_description("Events admitted into the outbound queue")
            .build(),
    );

    let _ = EVENTS_DROPPED.set(
        meter
            .u64_counter("events_dropped")
            .with_description("Events rejected because the outbound queue was full")
            .build(),
    );

    let _ = DELIVERIES_SUCCEEDED.set(
        meter
            .u64_counter("deliveries_succeeded")
            .with_description("Events acknowledged by the broker")
            .build(),
    );

    let _ = DELIVERIES_FAILED.set(
        meter
            .u64_counter("deliveries_failed")
            .with_description("Events that failed terminally after retries")
            .build(),
    );
}

#[cfg(feature = "metrics")]
fn add(counter: &OnceLock<Counter<u64>>, value: u64) {
    if value == 0 {
        return;
    }
    if let Some(counter) = counter.get() {
        counter.add(value, &[]);
    }
}

/// Feeds successive [`DeliveryStats`] snapshots into the delivery counters.
#[derive(Debug, Default)]
pub struct DeliveryMetrics {
    last: DeliveryStats,
}

impl DeliveryMetrics {
    /// Records the growth since the previous snapshot and returns it.
    pub fn observe(&mut self, stats: &DeliveryStats) -> DeliveryStats {
        let delta = stats.since(&self.last);
        self.last = *stats;
        record_delivery(&delta);
        delta
    }
}

#[cfg(feature = "metrics")]
fn record_delivery(delta: &DeliveryStats) {
    add(&EVENTS_SUBMITTED, delta.submitted);
    add(&EVENTS_ACCEPTED, delta.accepted);
    add(&EVENTS_DROPPED, delta.dropped);
    add(&DELIVERIES_SUCCEEDED, delta.succeeded);
    add(&DELIVERIES_FAILED, delta.failed);
}

#[cfg(not(feature = "metrics"))]
fn record_delivery(_delta: &DeliveryStats) {}
