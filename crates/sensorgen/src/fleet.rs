//! Fleet orchestration.
//!
//! [`run_fleet`] spawns one [`SensorSimulator`] task per sensor, all sharing
//! a single [`Dispatcher`], reports delivery stats on a fixed interval and
//! drives the shutdown sequence:
//!
//! 1. the shutdown token is cancelled (by the caller, or by the optional run
//!    duration expiring),
//! 2. every simulator task is joined,
//! 3. the dispatcher is closed, flushing whatever is still in flight.

use crate::{
    Error, Result,
    connection::Connection,
    dispatch::{DeliveryStats, Dispatcher},
    simulator::{SensorSimulator, sensor_rng, tick_period},
};
use core::{future, time::Duration};
use futures::future::join_all;
use std::sync::Arc;
use tokio::time::{Instant, interval_at, sleep_until};
use tokio_util::sync::CancellationToken;

pub const DEFAULT_SENSOR_COUNT: usize = 1_000;
pub const DEFAULT_EVENTS_PER_SEC: f64 = 5_000.0;
pub const DEFAULT_STATS_INTERVAL: Duration = Duration::from_secs(5);
pub const DEFAULT_CLOSE_TIMEOUT: Duration = Duration::from_secs(10);

/// How a fleet is shaped and how long it runs.
#[derive(Debug, Clone, PartialEq)]
pub struct FleetConfig {
    pub sensor_count: usize,
    /// Aggregate rate across the fleet, split evenly between sensors.
    pub events_per_sec: f64,
    /// Cancel automatically after this long. `None` runs until the shutdown
    /// token is cancelled externally.
    pub run_for: Option<Duration>,
    pub stats_interval: Duration,
    /// Upper bound on flushing in-flight events during shutdown.
    pub close_timeout: Duration,
    /// Base seed for reproducible walks.
    pub seed: Option<u64>,
}

impl Default for FleetConfig {
    fn default() -> Self {
        Self {
            sensor_count: DEFAULT_SENSOR_COUNT,
            events_per_sec: DEFAULT_EVENTS_PER_SEC,
            run_for: None,
            stats_interval: DEFAULT_STATS_INTERVAL,
            close_timeout: DEFAULT_CLOSE_TIMEOUT,
            seed: None,
        }
    }
}

impl FleetConfig {
    /// Rate each individual sensor emits at.
    pub fn per_sensor_rate(&self) -> f64 {
        self.events_per_sec / self.sensor_count as f64
    }

    /// # Errors
    ///
    /// Returns [`Error::InvalidConfig`] for an empty fleet, a per-sensor rate
    /// that cannot be scheduled, or a zero stats interval or close timeout.
    pub fn validate(&self) -> Result<()> {
        if self.sensor_count == 0 {
            return Err(Error::InvalidConfig {
                reason: "sensor count must be greater than 0".to_string(),
            });
        }
        tick_period(self.per_sensor_rate())?;
        if self.stats_interval.is_zero() {
            return Err(Error::InvalidConfig {
                reason: "stats interval must be greater than 0".to_string(),
            });
        }
        if self.close_timeout.is_zero() {
            return Err(Error::InvalidConfig {
                reason: "close timeout must be greater than 0".to_string(),
            });
        }
        Ok(())
    }
}

/// ID of the sensor at zero-based `index`: `sensor_1`, `sensor_2`, ...
pub fn sensor_id(index: usize) -> String {
    format!("sensor_{}", index + 1)
}

/// Runs a fleet against `dispatcher` until `shutdown` is cancelled or
/// `config.run_for` elapses, then closes the dispatcher.
///
/// `on_stats` receives every periodic snapshot and, last, the final
/// snapshot taken after the dispatcher closed.
///
/// # Errors
///
/// - [`Error::InvalidConfig`] if `config` fails validation. Nothing is
///   spawned in that case and the dispatcher is dropped unflushed.
/// - [`Error::DispatcherInUse`] if a simulator handle outlived its task.
pub async fn run_fleet<C, F>(
    config: &FleetConfig,
    dispatcher: Dispatcher<C>,
    shutdown: CancellationToken,
    mut on_stats: F,
) -> Result<DeliveryStats>
where
    C: Connection,
    F: FnMut(&DeliveryStats) + Send,
{
    config.validate()?;

    let rate = config.per_sensor_rate();
    let simulators = (0..config.sensor_count)
        .map(|i| SensorSimulator::new(sensor_id(i), rate, sensor_rng(config.seed, i)))
        .collect::<Result<Vec<_>>>()?;

    let dispatcher = Arc::new(dispatcher);
    let tasks: Vec<_> = simulators
        .into_iter()
        .map(|simulator| tokio::spawn(simulator.run(Arc::clone(&dispatcher), shutdown.clone())))
        .collect();

    tracing::info!(
        sensors = config.sensor_count,
        events_per_sec = config.events_per_sec,
        per_sensor_rate = rate,
        run_for = ?config.run_for,
        topic = dispatcher.topic(),
        "Fleet started"
    );

    let started = Instant::now();
    let run_timer = async {
        match config.run_for {
            Some(duration) => sleep_until(started + duration).await,
            None => future::pending::<()>().await,
        }
    };
    tokio::pin!(run_timer);

    let mut stats_ticker = interval_at(started + config.stats_interval, config.stats_interval);
    let mut last = dispatcher.stats();

    loop {
        tokio::select! {
            biased;
            () = shutdown.cancelled() => {
                tracing::info!("Shutdown requested");
                break;
            }
            () = &mut run_timer => {
                tracing::info!("Run duration of {:?} elapsed", config.run_for.unwrap_or_default());
                shutdown.cancel();
                break;
            }
            _ = stats_ticker.tick() => {
                let stats = dispatcher.stats();
                report(&stats, &last, config.stats_interval);
                on_stats(&stats);
                last = stats;
            }
        }
    }

    for (i, joined) in join_all(tasks).await.into_iter().enumerate() {
        if let Err(e) = joined {
            tracing::error!("Simulator {} failed: {e}", sensor_id(i));
        }
    }
    tracing::debug!("All simulators stopped");

    let dispatcher = Arc::try_unwrap(dispatcher).map_err(|_| Error::DispatcherInUse)?;
    let stats = dispatcher.close(config.close_timeout).await;
    on_stats(&stats);

    tracing::info!(
        elapsed = ?started.elapsed(),
        accepted = stats.accepted,
        succeeded = stats.succeeded,
        failed = stats.failed,
        dropped = stats.dropped,
        undelivered = stats.in_flight(),
        "Fleet stopped"
    );
    Ok(stats)
}

fn report(stats: &DeliveryStats, last: &DeliveryStats, interval: Duration) {
    let delta = stats.since(last);
    let secs = interval.as_secs_f64();
    tracing::info!(
        submitted = stats.submitted,
        accepted = stats.accepted,
        succeeded = stats.succeeded,
        failed = stats.failed,
        dropped = stats.dropped,
        in_flight = stats.in_flight(),
        accepted_per_sec = delta.accepted as f64 / secs,
        dropped_per_sec = delta.dropped as f64 / secs,
        delivered_per_sec = delta.succeeded as f64 / secs,
        "Delivery stats"
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ids_are_one_based() {
        assert_eq!(sensor_id(0), "sensor_1");
        assert_eq!(sensor_id(999), "sensor_1000");
    }

    #[test]
    fn rate_is_split_evenly() {
        let config = FleetConfig {
            sensor_count: 3,
            events_per_sec: 30.0,
            ..Default::default()
        };
        assert!((config.per_sensor_rate() - 10.0).abs() < f64::EPSILON);
        assert!(config.validate().is_ok());
        assert!(FleetConfig::default().validate().is_ok());
    }

    #[test]
    fn rejects_unrunnable_fleets() {
        let cases = [
            FleetConfig {
                sensor_count: 0,
                ..Default::default()
            },
            FleetConfig {
                events_per_sec: 0.0,
                ..Default::default()
            },
            FleetConfig {
                events_per_sec: f64::NAN,
                ..Default::default()
            },
            FleetConfig {
                stats_interval: Duration::ZERO,
                ..Default::default()
            },
            FleetConfig {
                close_timeout: Duration::ZERO,
                ..Default::default()
            },
        ];

        for config in cases {
            assert!(
                matches!(config.validate(), Err(Error::InvalidConfig { .. })),
                "{config:?}"
            );
        }
    }
}
