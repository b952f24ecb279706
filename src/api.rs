use async_trait::async_trait;
use std::sync::Arc;
use uuid::Uuid;

use crate::entities::{AppliedCoupon, Coordinates, Place, PlaceSuggestion, Quote};
use crate::error::Error;

/// Directions collaborator: turns an origin/destination pair into an ordered
/// path. Callers are expected to fall back to a straight two-point path when
/// this fails.
#[async_trait]
pub trait DirectionsApi {
    async fn find_path(
        &self,
        origin: Coordinates,
        destination: Coordinates,
    ) -> Result<Vec<Coordinates>, Error>;
}

#[async_trait]
pub trait PlacesApi {
    async fn find_place_suggestions(
        &self,
        input: String,
        location: Coordinates,
        radius: f64,
        session_token: String,
    ) -> Result<Vec<PlaceSuggestion>, Error>;

    async fn find_place(&self, id: String, session_token: String) -> Result<Place, Error>;
}

#[async_trait]
pub trait QuoteApi {
    async fn create_quote(
        &self,
        pickup: &Place,
        destination: &Place,
        service_type_id: &str,
    ) -> Result<Quote, Error>;

    async fn validate_coupon(&self, code: &str, quote_token: Uuid)
        -> Result<AppliedCoupon, Error>;

    async fn submit_review(
        &self,
        ride_request_id: Uuid,
        rating: u8,
        comment: Option<String>,
    ) -> Result<(), Error>;
}

pub type DynDirectionsApi = Arc<dyn DirectionsApi + Send + Sync>;
pub type DynPlacesApi = Arc<dyn PlacesApi + Send + Sync>;
pub type DynQuoteApi = Arc<dyn QuoteApi + Send + Sync>;
