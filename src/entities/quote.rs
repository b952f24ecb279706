use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::entities::RideOption;

/// A price quote for a resolved origin/destination pair: the enumerated set
/// of ride options plus distance and duration estimates. Fetched once per
/// journey entry; selection points into `options`.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Quote {
    pub token: Uuid,
    pub options: Vec<RideOption>,
    pub distance_meters: f64,
    pub duration_seconds: f64,
}

impl Quote {
    pub fn new(options: Vec<RideOption>, distance_meters: f64, duration_seconds: f64) -> Self {
        Self {
            token: Uuid::new_v4(),
            options,
            distance_meters,
            duration_seconds,
        }
    }
}
