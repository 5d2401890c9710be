//! Weather provider clients
//!
//! Every provider turns a location and a forecast kind into a request,
//! executes it and normalizes the provider-specific JSON into the shared
//! record shapes. Providers are held as an explicit ordered list.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde::de::DeserializeOwned;
use tracing::debug;

use crate::config::ProvidersConfig;
use crate::error::ProviderError;
use crate::models::{CurrentWeather, DailyForecast, HourlyForecast, Location, Parsed};

pub mod met_norway;
pub mod open_meteo;
pub mod weather_api;

pub use met_norway::MetNorwayProvider;
pub use open_meteo::OpenMeteoProvider;
pub use weather_api::WeatherApiProvider;

pub type ProviderResult<T> = std::result::Result<T, ProviderError>;

/// Request descriptor built by a provider for one location and kind
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProviderRequest {
    pub url: String,
}

/// Common parse contract implemented once per upstream provider
#[async_trait]
pub trait WeatherProvider: Send + Sync {
    /// Stable provider identifier stored with every record
    fn id(&self) -> &'static str;

    async fn fetch_current(&self, location: &Location) -> ProviderResult<Parsed<CurrentWeather>>;

    async fn fetch_hourly(&self, location: &Location) -> ProviderResult<Parsed<HourlyForecast>>;

    async fn fetch_daily(&self, location: &Location) -> ProviderResult<Parsed<DailyForecast>>;
}

/// Build the shared HTTP client. The timeout applies to each provider call.
pub fn build_http_client(config: &ProvidersConfig) -> Result<Client> {
    Client::builder()
        .timeout(Duration::from_secs(config.timeout_seconds.into()))
        .user_agent(config.user_agent.clone())
        .build()
        .with_context(|| "Failed to create HTTP client")
}

/// Instantiate the enabled providers in configuration order.
pub fn providers_from_config(
    config: &ProvidersConfig,
    client: Client,
) -> Vec<Arc<dyn WeatherProvider>> {
    let mut providers: Vec<Arc<dyn WeatherProvider>> = Vec::new();

    if config.open_meteo.enabled {
        providers.push(Arc::new(OpenMeteoProvider::new(
            client.clone(),
            config.open_meteo.base_url.clone(),
        )));
    }
    if config.met_norway.enabled {
        providers.push(Arc::new(MetNorwayProvider::new(
            client.clone(),
            config.met_norway.base_url.clone(),
        )));
    }
    if config.weather_api.enabled {
        if let Some(api_key) = &config.weather_api.api_key {
            providers.push(Arc::new(WeatherApiProvider::new(
                client,
                config.weather_api.base_url.clone(),
                api_key.clone(),
            )));
        } else {
            tracing::warn!("WeatherAPI provider enabled without an API key, skipping it");
        }
    }

    providers
}

/// Execute a GET request and decode the JSON body.
///
/// Connection failures and non-success statuses are transport errors,
/// undecodable bodies are parse errors.
pub(crate) async fn get_json<T: DeserializeOwned>(
    client: &Client,
    provider: &'static str,
    request: &ProviderRequest,
) -> ProviderResult<T> {
    debug!(provider, url = %request.url, "Provider request");

    let response = client
        .get(&request.url)
        .send()
        .await
        .map_err(|e| ProviderError::transport(provider, e.to_string()))?;

    let status = response.status();
    if !status.is_success() {
        return Err(ProviderError::transport(provider, format!("HTTP {status}")));
    }

    let body = response
        .bytes()
        .await
        .map_err(|e| ProviderError::transport(provider, e.to_string()))?;

    serde_json::from_slice(&body).map_err(|e| ProviderError::parse(provider, e.to_string()))
}

/// Convert a WMO weather code (used by Open-Meteo) to a description
#[must_use]
pub fn weather_code_to_description(code: u8) -> &'static str {
    match code {
        0 => "Clear sky",
        1 => "Mainly clear",
        2 => "Partly cloudy",
        3 => "Overcast",
        45 => "Fog",
        48 => "Depositing rime fog",
        51 => "Light drizzle",
        53 => "Moderate drizzle",
        55 => "Dense drizzle",
        56 => "Light freezing drizzle",
        57 => "Dense freezing drizzle",
        61 => "Slight rain",
        63 => "Moderate rain",
        65 => "Heavy rain",
        66 => "Light freezing rain",
        67 => "Heavy freezing rain",
        71 => "Slight snow fall",
        73 => "Moderate snow fall",
        75 => "Heavy snow fall",
        77 => "Snow grains",
        80 => "Slight rain showers",
        81 => "Moderate rain showers",
        82 => "Violent rain showers",
        85 => "Slight snow showers",
        86 => "Heavy snow showers",
        95 => "Thunderstorm",
        96 => "Thunderstorm with slight hail",
        99 => "Thunderstorm with heavy hail",
        _ => "Unknown",
    }
}

/// Convert km/h to m/s
#[must_use]
pub fn kph_to_ms(kph: f64) -> f64 {
    kph / 3.6
}
