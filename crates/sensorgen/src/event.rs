//! Sensor readings and their wire format.
//!
//! An [`Event`] is a single timestamped reading emitted by one sensor. It is
//! immutable once built and encodes to one compact JSON object per message:
//!
//! ```json
//! {"sensor_id":"sensor_1","event_id":"…","timestamp":"2025-01-01T00:00:00.000000000Z","value":42.5}
//! ```
//!
//! Keys are always written in the order shown above.

use crate::{Error, Result};
use bytes::Bytes;
use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// One reading produced by a sensor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    sensor_id: String,
    event_id: String,
    timestamp: String,
    value: f64,
}

impl Event {
    /// Builds a reading stamped with the current wall-clock time and a fresh
    /// random (v4) event ID.
    pub fn new(sensor_id: impl Into<String>, value: f64) -> Self {
        Self::at(sensor_id, value, Utc::now())
    }

    /// Builds a reading stamped with an explicit time.
    pub fn at(sensor_id: impl Into<String>, value: f64, timestamp: DateTime<Utc>) -> Self {
        Self {
            sensor_id: sensor_id.into(),
            event_id: Uuid::new_v4().to_string(),
            timestamp: timestamp.to_rfc3339_opts(SecondsFormat::Nanos, true),
            value,
        }
    }

    pub fn sensor_id(&self) -> &str {
        &self.sensor_id
    }

    pub fn event_id(&self) -> &str {
        &self.event_id
    }

    /// RFC3339 timestamp in UTC with nanosecond precision.
    pub fn timestamp(&self) -> &str {
        &self.timestamp
    }

    pub const fn value(&self) -> f64 {
        self.value
    }

    /// Encodes the event as a UTF-8 JSON object.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Encode`] if the value is NaN or infinite, since JSON
    /// numbers cannot represent either.
    pub fn encode(&self) -> Result<Bytes> {
        if !self.value.is_finite() {
            return Err(Error::Encode {
                reason: format!("value {} is not a finite number", self.value),
            });
        }

        serde_json::to_vec(self)
            .map(Bytes::from)
            .map_err(|e| Error::Encode {
                reason: e.to_string(),
            })
    }

    /// Decodes an event previously produced by [`Event::encode`].
    pub fn decode(payload: &[u8]) -> Result<Self> {
        serde_json::from_slice(payload).map_err(|e| Error::Encode {
            reason: e.to_string(),
        })
    }
}
