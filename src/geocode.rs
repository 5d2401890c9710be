//! Geocoding collaborator
//!
//! Forward lookups use the Open-Meteo geocoding API, reverse lookups use
//! Nominatim. Both go through a retrying HTTP client.

use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest_middleware::{ClientBuilder, ClientWithMiddleware};
use reqwest_retry::RetryTransientMiddleware;
use reqwest_retry::policies::ExponentialBackoff;
use serde::Deserialize;
use serde::de::DeserializeOwned;
use tracing::{debug, instrument};

use crate::config::GeocodingConfig;
use crate::error::AggregatorError;
use crate::models::NewLocation;

#[async_trait]
pub trait Geocoder: Send + Sync {
    /// Resolve a place name to its canonical name and coordinates
    async fn geocode(&self, name: &str) -> Result<NewLocation, AggregatorError>;

    /// Find the place name at the given coordinates
    async fn reverse_geocode(&self, lat: f64, lon: f64) -> Result<NewLocation, AggregatorError>;
}

pub struct HttpGeocoder {
    client: ClientWithMiddleware,
    search_base_url: String,
    reverse_base_url: String,
}

#[derive(Debug, Deserialize)]
struct SearchResponse {
    #[serde(default)]
    results: Vec<SearchResult>,
}

#[derive(Debug, Deserialize)]
struct SearchResult {
    name: String,
    latitude: f64,
    longitude: f64,
    country_code: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ReverseResponse {
    lat: Option<String>,
    lon: Option<String>,
    name: Option<String>,
    address: Option<ReverseAddress>,
    error: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ReverseAddress {
    city: Option<String>,
    town: Option<String>,
    village: Option<String>,
    municipality: Option<String>,
    country_code: Option<String>,
}

impl HttpGeocoder {
    pub fn new(config: &GeocodingConfig, user_agent: &str) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_seconds.into()))
            .user_agent(user_agent.to_string())
            .build()
            .with_context(|| "Failed to create geocoding HTTP client")?;

        let retry_policy = ExponentialBackoff::builder().build_with_max_retries(config.max_retries);
        let client = ClientBuilder::new(client)
            .with(RetryTransientMiddleware::new_with_policy(retry_policy))
            .build();

        Ok(Self {
            client,
            search_base_url: config.search_base_url.trim_end_matches('/').to_string(),
            reverse_base_url: config.reverse_base_url.trim_end_matches('/').to_string(),
        })
    }

    async fn get_json<T: DeserializeOwned>(&self, query: &str, url: &str) -> Result<T, AggregatorError> {
        debug!(url, "Geocoding request");
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| AggregatorError::geocode(query, e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(AggregatorError::geocode(query, format!("HTTP {status}")));
        }

        response
            .json::<T>()
            .await
            .map_err(|e| AggregatorError::geocode(query, e.to_string()))
    }
}

#[async_trait]
impl Geocoder for HttpGeocoder {
    #[instrument(skip(self))]
    async fn geocode(&self, name: &str) -> Result<NewLocation, AggregatorError> {
        let url = format!(
            "{}/search?name={}&count=1&language=en&format=json",
            self.search_base_url,
            urlencoding::encode(name)
        );
        let response: SearchResponse = self.get_json(name, &url).await?;

        let result = response
            .results
            .into_iter()
            .next()
            .ok_or_else(|| AggregatorError::geocode(name, "no results"))?;

        Ok(NewLocation {
            name: result.name,
            latitude: result.latitude,
            longitude: result.longitude,
            country_code: result.country_code.unwrap_or_default().to_uppercase(),
        })
    }

    #[instrument(skip(self))]
    async fn reverse_geocode(&self, lat: f64, lon: f64) -> Result<NewLocation, AggregatorError> {
        let query = format!("{lat:.4},{lon:.4}");
        let url = format!(
            "{}/reverse?format=jsonv2&lat={lat}&lon={lon}&zoom=10",
            self.reverse_base_url
        );
        let response: ReverseResponse = self.get_json(&query, &url).await?;

        if let Some(error) = response.error {
            return Err(AggregatorError::geocode(query, error));
        }

        let address = response.address;
        let name = address
            .as_ref()
            .and_then(|a| {
                a.city
                    .clone()
                    .or_else(|| a.town.clone())
                    .or_else(|| a.village.clone())
                    .or_else(|| a.municipality.clone())
            })
            .or(response.name)
            .filter(|n| !n.trim().is_empty())
            .ok_or_else(|| AggregatorError::geocode(&query, "no place name at coordinates"))?;

        Ok(NewLocation {
            name,
            latitude: response.lat.and_then(|v| v.parse().ok()).unwrap_or(lat),
            longitude: response.lon.and_then(|v| v.parse().ok()).unwrap_or(lon),
            country_code: address
                .and_then(|a| a.country_code)
                .unwrap_or_default()
                .to_uppercase(),
        })
    }
}
