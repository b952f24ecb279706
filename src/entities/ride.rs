use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::entities::Place;
use crate::error::{invalid_request_error, Error};

/// An immutable ride request. Created by the user action that starts a
/// search, destroyed when a terminal outcome is reached.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RideRequest {
    pub id: Uuid,
    pub pickup: Place,
    pub destination: Place,
    pub service_type_id: String,
    pub ride_option_id: String,
    pub estimated_price: f64,
    pub coupon_id: Option<String>,
}

impl RideRequest {
    pub fn new(
        pickup: Place,
        destination: Place,
        service_type_id: String,
        ride_option_id: String,
        estimated_price: f64,
        coupon_id: Option<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            pickup,
            destination,
            service_type_id,
            ride_option_id,
            estimated_price,
            coupon_id,
        }
    }

    /// Local validation, performed before the request goes over the wire.
    pub fn validate(&self) -> Result<(), Error> {
        if self.pickup.address.is_empty() {
            return Err(invalid_request_error("pickup address is unresolved"));
        }

        if self.destination.address.is_empty() {
            return Err(invalid_request_error("destination address is unresolved"));
        }

        if !self.pickup.coordinates.is_valid() {
            return Err(invalid_request_error("pickup coordinates are out of range"));
        }

        if !self.destination.coordinates.is_valid() {
            return Err(invalid_request_error(
                "destination coordinates are out of range",
            ));
        }

        if self.ride_option_id.is_empty() {
            return Err(invalid_request_error("no ride option selected"));
        }

        Ok(())
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct AppliedCoupon {
    pub code: String,
    pub discount: f64,
    pub new_price: f64,
    pub coupon_id: String,
}
