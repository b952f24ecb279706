use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DriverIdentity {
    pub id: String,
    pub name: String,
    pub phone: String,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Vehicle {
    pub make: String,
    pub model: String,
    pub color: String,
    pub year: u16,
    pub plate: String,
}

/// The driver assigned to an active ride. Created on the matched transition,
/// destroyed on ride termination.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DriverMatch {
    pub driver: DriverIdentity,
    pub vehicle: Vehicle,
    pub pickup_address: String,
    pub dropoff_address: String,
    pub eta_minutes: u32,
}

/// A single position report from the assigned driver. Transient; only the
/// most recent value is retained.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct DriverLocationUpdate {
    #[serde(rename = "lat")]
    pub latitude: f64,
    #[serde(rename = "lon")]
    pub longitude: f64,
    #[serde(rename = "ts")]
    pub timestamp: DateTime<Utc>,
}
