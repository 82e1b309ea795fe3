//! Sensor simulation.
//!
//! Each [`SensorSimulator`] models one sensor as an independent random walk:
//! a base value that drifts by a fixed amount every tick, plus uniform noise
//! on every reading. All state (including the RNG) is owned by the
//! simulator's task, so simulators never contend with each other.
//!
//! Readings are paced by a [`tokio::time::Interval`] anchored at start-up.
//! Each tick is scheduled from the anchor, not from when the previous
//! reading finished, so scheduling delays never accumulate into rate drift.

use crate::{Error, Result, dispatch::EventSink, event::Event};
use core::{ops::Range, time::Duration};
use rand::{Rng, SeedableRng, rngs::StdRng};
use std::sync::Arc;
use tokio::time::{Instant, MissedTickBehavior, interval_at};
use tokio_util::sync::CancellationToken;

/// Range the initial base value is drawn from.
pub const BASE_VALUE_RANGE: Range<f64> = 20.0..100.0;

/// Largest drift magnitude applied per tick.
pub const MAX_DRIFT: f64 = 0.05;

/// Readings deviate from the base value by at most this much.
pub const NOISE_AMPLITUDE: f64 = 1.0;

/// Bounded noise on top of a slowly drifting base value.
#[derive(Debug, Clone)]
pub struct RandomWalk {
    base: f64,
    drift: f64,
    rng: StdRng,
}

impl RandomWalk {
    /// Draws a base value in [`BASE_VALUE_RANGE`] and a drift in
    /// `[-MAX_DRIFT, MAX_DRIFT)` from `rng`, which the walk then keeps.
    pub fn new(mut rng: StdRng) -> Self {
        let base = rng.random_range(BASE_VALUE_RANGE);
        let drift = rng.random_range(-MAX_DRIFT..MAX_DRIFT);
        Self { base, drift, rng }
    }

    pub const fn from_parts(base: f64, drift: f64, rng: StdRng) -> Self {
        Self { base, drift, rng }
    }

    /// Produces the next reading, then advances the base value by the drift.
    pub fn step(&mut self) -> f64 {
        let value = self.base + self.rng.random_range(-NOISE_AMPLITUDE..NOISE_AMPLITUDE);
        self.base += self.drift;
        value
    }

    pub const fn base(&self) -> f64 {
        self.base
    }

    pub const fn drift(&self) -> f64 {
        self.drift
    }
}

/// Builds an RNG for the simulator at `index`.
///
/// With a base seed every simulator gets a distinct, reproducible stream;
/// without one each is seeded from the thread-local OS-backed generator.
pub fn sensor_rng(seed: Option<u64>, index: usize) -> StdRng {
    match seed {
        Some(seed) => StdRng::seed_from_u64(seed.wrapping_add(index as u64)),
        None => StdRng::from_rng(&mut rand::rng()),
    }
}

/// Converts a rate in events per second into a tick period.
///
/// # Errors
///
/// Returns [`Error::InvalidConfig`] if the rate is not finite and positive,
/// or so high that the period rounds down to zero.
pub fn tick_period(rate: f64) -> Result<Duration> {
    if !rate.is_finite() || rate <= 0.0 {
        return Err(Error::InvalidConfig {
            reason: format!("rate must be a positive number of events/sec, got {rate}"),
        });
    }

    match Duration::try_from_secs_f64(1.0 / rate) {
        Ok(period) if !period.is_zero() => Ok(period),
        _ => Err(Error::InvalidConfig {
            reason: format!("rate of {rate} events/sec is too high to schedule"),
        }),
    }
}

/// One simulated sensor.
#[derive(Debug)]
pub struct SensorSimulator {
    sensor_id: String,
    period: Duration,
    walk: RandomWalk,
}

impl SensorSimulator {
    /// Creates a simulator emitting `rate` events per second with a fresh
    /// random walk drawn from `rng`.
    ///
    /// # Errors
    ///
    /// See [`tick_period`].
    pub fn new(sensor_id: impl Into<String>, rate: f64, rng: StdRng) -> Result<Self> {
        Self::with_walk(sensor_id, rate, RandomWalk::new(rng))
    }

    /// Creates a simulator around an existing walk.
    ///
    /// # Errors
    ///
    /// See [`tick_period`].
    pub fn with_walk(sensor_id: impl Into<String>, rate: f64, walk: RandomWalk) -> Result<Self> {
        Ok(Self {
            sensor_id: sensor_id.into(),
            period: tick_period(rate)?,
            walk,
        })
    }

    pub fn sensor_id(&self) -> &str {
        &self.sensor_id
    }

    pub const fn period(&self) -> Duration {
        self.period
    }

    pub const fn walk(&self) -> &RandomWalk {
        &self.walk
    }

    /// Emits one reading per tick into `sink` until `cancel` fires.
    ///
    /// A rejected submit (backpressure or encoding) drops that reading; the
    /// simulator never blocks, retries or buffers. Cancellation is checked
    /// between ticks, so the task exits within one period of the signal and
    /// never in the middle of a submit.
    pub async fn run<S>(mut self, sink: Arc<S>, cancel: CancellationToken)
    where
        S: EventSink + ?Sized,
    {
        let mut ticker = interval_at(Instant::now() + self.period, self.period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        let mut emitted: u64 = 0;
        let mut dropped: u64 = 0;

        tracing::debug!(sensor_id = %self.sensor_id, period = ?self.period, "Simulator started");

        loop {
            tokio::select! {
                biased;
                () = cancel.cancelled() => break,
                _ = ticker.tick() => {
                    let event = Event::new(self.sensor_id.as_str(), self.walk.step());
                    match sink.submit(&event) {
                        Ok(()) => emitted += 1,
                        Err(e) if e.is_backpressure() => dropped += 1,
                        Err(e) => {
                            dropped += 1;
                            tracing::debug!(sensor_id = %self.sensor_id, "Dropped event: {e}");
                        }
                    }
                }
            }
        }

        tracing::debug!(
            sensor_id = %self.sensor_id,
            emitted,
            dropped,
            "Simulator stopped"
        );
    }
}
