//! Wire vocabulary for the persistent ride session.
//!
//! Messages are JSON objects tagged by a `type` field carrying the `ride.*`
//! event names, with payload fields inline.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::entities::{
    DriverIdentity, DriverLocationUpdate, DriverMatch, Place, RideRequest, Vehicle,
};
use crate::error::{codec_error, Error};

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ClientMessage {
    #[serde(rename = "ride.request", rename_all = "camelCase")]
    RideRequest {
        request_id: Uuid,
        pickup: Place,
        destination: Place,
        service_type_id: String,
        ride_option_id: String,
        estimated_price: f64,
        #[serde(skip_serializing_if = "Option::is_none")]
        coupon_id: Option<String>,
    },
    #[serde(rename = "ride.cancel")]
    Cancel { reason: String },
    #[serde(rename = "ride.cancelSearch")]
    CancelSearch {},
}

impl From<&RideRequest> for ClientMessage {
    fn from(request: &RideRequest) -> Self {
        Self::RideRequest {
            request_id: request.id,
            pickup: request.pickup.clone(),
            destination: request.destination.clone(),
            service_type_id: request.service_type_id.clone(),
            ride_option_id: request.ride_option_id.clone(),
            estimated_price: request.estimated_price,
            coupon_id: request.coupon_id.clone(),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DriverFoundPayload {
    pub driver: DriverIdentity,
    pub vehicle: Vehicle,
    pub pickup_addr: String,
    pub dropoff_addr: String,
    pub eta_minutes: u32,
}

impl From<DriverFoundPayload> for DriverMatch {
    fn from(payload: DriverFoundPayload) -> Self {
        Self {
            driver: payload.driver,
            vehicle: payload.vehicle,
            pickup_address: payload.pickup_addr,
            dropoff_address: payload.dropoff_addr,
            eta_minutes: payload.eta_minutes,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ServerMessage {
    #[serde(rename = "ride.driverFound")]
    DriverFound(DriverFoundPayload),
    #[serde(rename = "ride.noDriverFound")]
    NoDriverFound {},
    #[serde(rename = "ride.driverLocation")]
    DriverLocation(DriverLocationUpdate),
    #[serde(rename = "ride.driverArrived")]
    DriverArrived {},
    #[serde(rename = "ride.started")]
    Started {},
    #[serde(rename = "ride.completed")]
    Completed {},
    #[serde(rename = "ride.cancelled")]
    Cancelled { reason: String },
    #[serde(rename = "ride.error")]
    Error { message: String },
}

pub fn encode_client_message(message: &ClientMessage) -> Result<String, Error> {
    serde_json::to_string(message).map_err(codec_error)
}

pub fn parse_server_message(text: &str) -> Result<ServerMessage, Error> {
    serde_json::from_str(text).map_err(codec_error)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entities::Coordinates;

    #[test]
    fn ride_request_serializes_with_wire_names() {
        let request = RideRequest::new(
            Place::new("A".into(), Coordinates::new(33.57, -7.58)),
            Place::new("B".into(), Coordinates::new(33.59, -7.60)),
            "standard".into(),
            "option-1".into(),
            45.0,
            None,
        );

        let json = encode_client_message(&ClientMessage::from(&request)).unwrap();
        let value: serde_json::Value = serde_json::from_str(&json).unwrap();

        assert_eq!(value["type"], "ride.request");
        assert_eq!(value["serviceTypeId"], "standard");
        assert_eq!(value["rideOptionId"], "option-1");
        assert!(value.get("couponId").is_none());
    }

    #[test]
    fn cancel_search_serializes_to_bare_tag() {
        let json = encode_client_message(&ClientMessage::CancelSearch {}).unwrap();
        let value: serde_json::Value = serde_json::from_str(&json).unwrap();

        assert_eq!(value["type"], "ride.cancelSearch");
    }

    #[test]
    fn driver_found_parses() {
        let text = r#"{
            "type": "ride.driverFound",
            "driver": {"id": "d-1", "name": "Hassan", "phone": "+212600000000"},
            "vehicle": {"make": "Dacia", "model": "Logan", "color": "white", "year": 2019, "plate": "12345-A-6"},
            "pickupAddr": "12 Boulevard d'Anfa",
            "dropoffAddr": "Ain Diab",
            "etaMinutes": 4
        }"#;

        let message = parse_server_message(text).unwrap();
        match message {
            ServerMessage::DriverFound(payload) => {
                assert_eq!(payload.driver.id, "d-1");
                assert_eq!(payload.vehicle.year, 2019);
                assert_eq!(payload.eta_minutes, 4);
            }
            other => panic!("unexpected message: {:?}", other),
        }
    }

    #[test]
    fn driver_location_parses_wire_field_names() {
        let text = r#"{"type": "ride.driverLocation", "lat": 33.58, "lon": -7.59, "ts": "2026-08-07T10:15:00Z"}"#;

        let message = parse_server_message(text).unwrap();
        match message {
            ServerMessage::DriverLocation(update) => {
                assert_eq!(update.latitude, 33.58);
                assert_eq!(update.longitude, -7.59);
            }
            other => panic!("unexpected message: {:?}", other),
        }
    }

    #[test]
    fn unknown_message_type_is_an_error() {
        assert!(parse_server_message(r#"{"type": "ride.unknown"}"#).is_err());
    }
}
