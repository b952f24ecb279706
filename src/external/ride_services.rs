//! REST collaborators of the ride platform: price quotes, coupon
//! validation and post-ride reviews.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::env;
use uuid::Uuid;

use crate::{
    api::QuoteApi,
    entities::{AppliedCoupon, Coordinates, Place, Quote, RideOption},
    error::{invalid_input_error, upstream_error, Error},
};

#[derive(Clone, Debug, Serialize)]
struct QuoteRequest<'a> {
    pickup: Coordinates,
    destination: Coordinates,
    service_type_id: &'a str,
}

#[derive(Clone, Debug, Deserialize)]
struct QuoteResponse {
    options: Vec<RideOption>,
    distance_meters: f64,
    duration_seconds: f64,
}

#[derive(Clone, Debug, Serialize)]
struct CouponRequest<'a> {
    code: &'a str,
    quote_token: Uuid,
}

#[derive(Clone, Debug, Serialize)]
struct ReviewRequest<'a> {
    ride_request_id: Uuid,
    rating: u8,
    comment: Option<&'a str>,
}

pub struct RideServices {
    client: reqwest::Client,
}

impl RideServices {
    pub fn new() -> Self {
        Self {
            client: reqwest::Client::new(),
        }
    }

    async fn post<B, T>(&self, path: &str, body: &B) -> Result<T, Error>
    where
        B: Serialize + Sync,
        T: serde::de::DeserializeOwned,
    {
        let api_base = env::var("RIDE_API_BASE")?;
        let token = env::var("RIDE_API_TOKEN")?;
        let url = format!("https://{}{}", api_base, path);

        let res = self
            .client
            .post(url)
            .bearer_auth(token)
            .json(body)
            .send()
            .await?;

        let status_code = res.status().as_u16();

        if status_code >= 400 && status_code < 500 {
            return Err(invalid_input_error());
        } else if !(200..300).contains(&status_code) {
            return Err(upstream_error());
        }

        Ok(res.json().await?)
    }
}

impl Default for RideServices {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl QuoteApi for RideServices {
    #[tracing::instrument(skip(self))]
    async fn create_quote(
        &self,
        pickup: &Place,
        destination: &Place,
        service_type_id: &str,
    ) -> Result<Quote, Error> {
        let response: QuoteResponse = self
            .post(
                "/v1/quotes",
                &QuoteRequest {
                    pickup: pickup.coordinates,
                    destination: destination.coordinates,
                    service_type_id,
                },
            )
            .await?;

        Ok(Quote::new(
            response.options,
            response.distance_meters,
            response.duration_seconds,
        ))
    }

    #[tracing::instrument(skip(self))]
    async fn validate_coupon(
        &self,
        code: &str,
        quote_token: Uuid,
    ) -> Result<AppliedCoupon, Error> {
        self.post("/v1/coupons/validate", &CouponRequest { code, quote_token })
            .await
    }

    #[tracing::instrument(skip(self))]
    async fn submit_review(
        &self,
        ride_request_id: Uuid,
        rating: u8,
        comment: Option<String>,
    ) -> Result<(), Error> {
        let _: serde_json::Value = self
            .post(
                "/v1/reviews",
                &ReviewRequest {
                    ride_request_id,
                    rating,
                    comment: comment.as_deref(),
                },
            )
            .await?;

        Ok(())
    }
}
