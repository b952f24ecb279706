use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::env;

use crate::{
    api::{DirectionsApi, PlacesApi},
    entities::{Coordinates, Place, PlaceSuggestion},
    error::{invalid_input_error, route_computation_error, upstream_error, Error},
};

#[derive(Clone, Debug, Serialize, Deserialize)]
struct GoogleMapsPlace {
    pub place_id: String,
    pub formatted_address: String,
    pub geometry: Geometry,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
struct Geometry {
    pub location: LatLng,
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
struct LatLng {
    pub lat: f64,
    pub lng: f64,
}

impl From<LatLng> for Coordinates {
    fn from(value: LatLng) -> Self {
        Coordinates::new(value.lat, value.lng)
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
struct Response<T> {
    status: String,
    result: Option<T>,
    results: Option<T>,
    routes: Option<T>,
    predictions: Option<T>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
struct DirectionsRoute {
    legs: Vec<DirectionsLeg>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
struct DirectionsLeg {
    steps: Vec<DirectionsStep>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
struct DirectionsStep {
    start_location: LatLng,
    end_location: LatLng,
}

/// Google Maps client covering the places and directions surfaces consumed
/// by the coordinator.
pub struct GoogleMaps {
    client: reqwest::Client,
}

impl GoogleMaps {
    pub fn new() -> Self {
        Self {
            client: reqwest::Client::new(),
        }
    }

    async fn get<T>(&self, path: &str, query: &[(&str, String)]) -> Result<Response<T>, Error>
    where
        T: serde::de::DeserializeOwned,
    {
        let api_base = env::var("GOOGLE_MAPS_API_BASE")?;
        let url = format!("https://{}{}", api_base, path);
        let key = env::var("GOOGLE_MAPS_API_KEY")?;

        let res = self
            .client
            .get(url)
            .query(&[("key", key)])
            .query(query)
            .send()
            .await?;

        let status_code = res.status().as_u16();

        if status_code >= 400 && status_code < 500 {
            return Err(invalid_input_error());
        } else if status_code != 200 {
            return Err(upstream_error());
        }

        Ok(res.json().await?)
    }
}

impl Default for GoogleMaps {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl PlacesApi for GoogleMaps {
    #[tracing::instrument(skip(self))]
    async fn find_place_suggestions(
        &self,
        input: String,
        location: Coordinates,
        radius: f64,
        session_token: String,
    ) -> Result<Vec<PlaceSuggestion>, Error> {
        let location: String = location.into();

        let data: Response<Vec<PlaceSuggestion>> = self
            .get(
                "/maps/api/place/autocomplete/json",
                &[
                    ("input", input),
                    ("location", location),
                    ("radius", radius.to_string()),
                    ("sessiontoken", session_token),
                ],
            )
            .await?;

        if !(data.status == "OK" || data.status == "ZERO_RESULTS") {
            return Err(upstream_error());
        }

        data.predictions.ok_or_else(upstream_error)
    }

    #[tracing::instrument(skip(self))]
    async fn find_place(&self, id: String, session_token: String) -> Result<Place, Error> {
        let data: Response<GoogleMapsPlace> = self
            .get(
                "/maps/api/place/details/json",
                &[("place_id", id), ("sessiontoken", session_token)],
            )
            .await?;

        if data.status != "OK" {
            return Err(upstream_error());
        }

        let place = data.result.ok_or_else(upstream_error)?;

        Ok(Place::new(
            place.formatted_address,
            place.geometry.location.into(),
        ))
    }
}

#[async_trait]
impl DirectionsApi for GoogleMaps {
    #[tracing::instrument(skip(self))]
    async fn find_path(
        &self,
        origin: Coordinates,
        destination: Coordinates,
    ) -> Result<Vec<Coordinates>, Error> {
        let origin: String = origin.into();
        let destination: String = destination.into();

        let data: Response<Vec<DirectionsRoute>> = self
            .get(
                "/maps/api/directions/json",
                &[("origin", origin), ("destination", destination)],
            )
            .await?;

        if data.status != "OK" {
            return Err(upstream_error());
        }

        let route = data
            .routes
            .and_then(|routes| routes.into_iter().next())
            .ok_or_else(upstream_error)?;

        let mut path: Vec<Coordinates> = Vec::new();

        for leg in route.legs {
            for step in leg.steps {
                if path.is_empty() {
                    path.push(step.start_location.into());
                }
                path.push(step.end_location.into());
            }
        }

        if path.len() < 2 {
            return Err(route_computation_error());
        }

        Ok(path)
    }
}
