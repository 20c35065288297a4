use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{
    bus::BusValue,
    properties::{BusRecord, Field, FromBusValue, ValueError, decode_into},
};

/// Altitude reported when the provider doesn't know it
pub const UNKNOWN_ALTITUDE: f64 = f64::MIN;
/// Speed and heading reported when the provider doesn't know them
pub const UNKNOWN: f64 = -1.0;

/// When a location was determined, seconds and microseconds since the Epoch
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Timestamp {
    pub seconds: u64,
    pub microseconds: u64,
}

impl Timestamp {
    pub fn to_datetime(&self) -> Option<DateTime<Utc>> {
        let seconds = i64::try_from(self.seconds).ok()?;
        let nanos = u32::try_from(self.microseconds.checked_mul(1000)?).ok()?;
        DateTime::from_timestamp(seconds, nanos)
    }
}

impl FromBusValue for Timestamp {
    fn from_bus_value(value: BusValue) -> Result<Self, ValueError> {
        let parts = Vec::<u64>::from_bus_value(value)?;
        match parts.as_slice() {
            &[seconds, microseconds] => Ok(Self {
                seconds,
                microseconds,
            }),
            _ => Err(ValueError::WrongLength {
                expected: 2,
                found: parts.len(),
            }),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
/// A location fix as reported by the provider
pub struct Location {
    /// Degrees
    pub latitude: f64,
    /// Degrees
    pub longitude: f64,
    /// Accuracy of the fix, in meters
    pub accuracy: f64,
    /// Meters, [UNKNOWN_ALTITUDE] when unknown
    pub altitude: f64,
    /// Meters per second, [UNKNOWN] when unknown
    pub speed: f64,
    /// Degrees clockwise from North (East is 90), [UNKNOWN] when unknown
    pub heading: f64,
    /// Human-readable description, not all sources provide one so don't rely on it
    pub description: String,
    /// Time of measurement if the source gave one, otherwise when the provider got the fix.
    /// Not guaranteed to be monotonic and may be old if the fix was cached.
    pub timestamp: Timestamp,
}

impl Location {
    pub fn known_altitude(&self) -> Option<f64> {
        (self.altitude != UNKNOWN_ALTITUDE).then_some(self.altitude)
    }

    pub fn known_speed(&self) -> Option<f64> {
        (self.speed != UNKNOWN).then_some(self.speed)
    }

    pub fn known_heading(&self) -> Option<f64> {
        (self.heading != UNKNOWN).then_some(self.heading)
    }
}

impl BusRecord for Location {
    fn fields() -> Vec<Field<Self>> {
        vec![
            Field::new("latitude", "Latitude", |l, v| decode_into(&mut l.latitude, v)),
            Field::new("longitude", "Longitude", |l, v| {
                decode_into(&mut l.longitude, v)
            }),
            Field::new("accuracy", "Accuracy", |l, v| decode_into(&mut l.accuracy, v)),
            Field::new("altitude", "Altitude", |l, v| decode_into(&mut l.altitude, v)),
            Field::new("speed", "Speed", |l, v| decode_into(&mut l.speed, v)),
            Field::new("heading", "Heading", |l, v| decode_into(&mut l.heading, v)),
            Field::new("description", "Description", |l, v| {
                decode_into(&mut l.description, v)
            }),
            Field::new("timestamp", "Timestamp", |l, v| {
                decode_into(&mut l.timestamp, v)
            }),
        ]
    }
}
