//! Open-Meteo forecast client (no API key required)

use async_trait::async_trait;
use chrono::{DateTime, Duration, NaiveDate, NaiveDateTime, Utc};
use reqwest::Client;
use serde::Deserialize;
use tracing::instrument;

use super::{ProviderRequest, ProviderResult, WeatherProvider, get_json, weather_code_to_description};
use crate::error::ProviderError;
use crate::models::{
    CurrentWeather, DailyForecast, ForecastKind, HourlyForecast, Location, Measurements, Parsed,
};

pub const PROVIDER_ID: &str = "open-meteo";

const CURRENT_VARIABLES: &str =
    "temperature_2m,relative_humidity_2m,wind_speed_10m,precipitation,weather_code";
const HOURLY_VARIABLES: &str = "temperature_2m,relative_humidity_2m,wind_speed_10m,precipitation,precipitation_probability,weather_code";
const DAILY_VARIABLES: &str = "temperature_2m_max,temperature_2m_min,wind_speed_10m_max,precipitation_sum,precipitation_probability_max,weather_code";

pub struct OpenMeteoProvider {
    client: Client,
    base_url: String,
}

impl OpenMeteoProvider {
    #[must_use]
    pub fn new(client: Client, base_url: String) -> Self {
        Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    /// Build the forecast request for a location and kind
    #[must_use]
    pub fn request(&self, location: &Location, kind: ForecastKind) -> ProviderRequest {
        let (lat, lon) = location.request_coordinates();
        let selection = match kind {
            ForecastKind::Current => format!("current={CURRENT_VARIABLES}"),
            ForecastKind::Hourly => format!("hourly={HOURLY_VARIABLES}&forecast_days=2"),
            ForecastKind::Daily => format!("daily={DAILY_VARIABLES}&forecast_days=7"),
        };
        ProviderRequest {
            url: format!(
                "{}/forecast?latitude={lat}&longitude={lon}&{selection}&wind_speed_unit=ms&timezone=auto",
                self.base_url
            ),
        }
    }
}

#[async_trait]
impl WeatherProvider for OpenMeteoProvider {
    fn id(&self) -> &'static str {
        PROVIDER_ID
    }

    #[instrument(name = "open_meteo_current", skip_all, fields(location = %location.id))]
    async fn fetch_current(&self, location: &Location) -> ProviderResult<Parsed<CurrentWeather>> {
        let request = self.request(location, ForecastKind::Current);
        let response: ForecastResponse = get_json(&self.client, PROVIDER_ID, &request).await?;
        parse_current(response, location)
    }

    #[instrument(name = "open_meteo_hourly", skip_all, fields(location = %location.id))]
    async fn fetch_hourly(&self, location: &Location) -> ProviderResult<Parsed<HourlyForecast>> {
        let request = self.request(location, ForecastKind::Hourly);
        let response: ForecastResponse = get_json(&self.client, PROVIDER_ID, &request).await?;
        parse_hourly(response, location)
    }

    #[instrument(name = "open_meteo_daily", skip_all, fields(location = %location.id))]
    async fn fetch_daily(&self, location: &Location) -> ProviderResult<Parsed<DailyForecast>> {
        let request = self.request(location, ForecastKind::Daily);
        let response: ForecastResponse = get_json(&self.client, PROVIDER_ID, &request).await?;
        parse_daily(response, location)
    }
}

/// Forecast response from `OpenMeteo` API
#[derive(Debug, Deserialize)]
pub struct ForecastResponse {
    #[serde(default)]
    pub utc_offset_seconds: i64,
    pub timezone: Option<String>,
    pub current: Option<CurrentData>,
    pub hourly: Option<HourlyData>,
    pub daily: Option<DailyData>,
}

#[derive(Debug, Deserialize)]
pub struct CurrentData {
    pub time: String,
    pub temperature_2m: Option<f64>,
    pub relative_humidity_2m: Option<f64>,
    pub wind_speed_10m: Option<f64>,
    pub precipitation: Option<f64>,
    pub weather_code: Option<u8>,
}

#[derive(Debug, Deserialize)]
pub struct HourlyData {
    pub time: Vec<String>,
    pub temperature_2m: Option<Vec<Option<f64>>>,
    pub relative_humidity_2m: Option<Vec<Option<f64>>>,
    pub wind_speed_10m: Option<Vec<Option<f64>>>,
    pub precipitation: Option<Vec<Option<f64>>>,
    pub precipitation_probability: Option<Vec<Option<f64>>>,
    pub weather_code: Option<Vec<Option<u8>>>,
}

#[derive(Debug, Deserialize)]
pub struct DailyData {
    pub time: Vec<String>,
    pub temperature_2m_max: Option<Vec<Option<f64>>>,
    pub temperature_2m_min: Option<Vec<Option<f64>>>,
    pub wind_speed_10m_max: Option<Vec<Option<f64>>>,
    pub precipitation_sum: Option<Vec<Option<f64>>>,
    pub precipitation_probability_max: Option<Vec<Option<f64>>>,
    pub weather_code: Option<Vec<Option<u8>>>,
}

fn value_at<T: Copy>(values: &Option<Vec<Option<T>>>, i: usize) -> Option<T> {
    values.as_ref().and_then(|v| v.get(i).copied().flatten())
}

fn condition(code: Option<u8>) -> Option<String> {
    code.map(|c| weather_code_to_description(c).to_string())
}

/// Local wall-clock time ("2024-05-01T14:00") to UTC using the response offset
fn local_to_utc(time: &str, utc_offset_seconds: i64) -> ProviderResult<DateTime<Utc>> {
    let local = NaiveDateTime::parse_from_str(time, "%Y-%m-%dT%H:%M")
        .map_err(|e| ProviderError::parse(PROVIDER_ID, format!("invalid time '{time}': {e}")))?;
    Ok((local - Duration::seconds(utc_offset_seconds)).and_utc())
}

fn timezone_of(response: &ForecastResponse) -> Option<String> {
    response
        .timezone
        .clone()
        .filter(|tz| !tz.is_empty() && tz != "GMT")
}

pub fn parse_current(
    response: ForecastResponse,
    location: &Location,
) -> ProviderResult<Parsed<CurrentWeather>> {
    let timezone = timezone_of(&response);
    let current = response
        .current
        .ok_or_else(|| ProviderError::parse(PROVIDER_ID, "response has no current block"))?;

    let record = CurrentWeather {
        provider: PROVIDER_ID.to_string(),
        location_id: location.id,
        fetched_at: Utc::now(),
        observed_at: local_to_utc(&current.time, response.utc_offset_seconds)?,
        measurements: Measurements {
            temperature: current.temperature_2m,
            humidity: current.relative_humidity_2m,
            wind_speed: current.wind_speed_10m,
            precipitation: current.precipitation,
            precipitation_probability: None,
            condition: condition(current.weather_code),
        },
    };

    Ok(Parsed::new(vec![record], timezone))
}

pub fn parse_hourly(
    response: ForecastResponse,
    location: &Location,
) -> ProviderResult<Parsed<HourlyForecast>> {
    let timezone = timezone_of(&response);
    let offset = response.utc_offset_seconds;
    let hourly = response
        .hourly
        .ok_or_else(|| ProviderError::parse(PROVIDER_ID, "response has no hourly block"))?;
    let fetched_at = Utc::now();

    let records = hourly
        .time
        .iter()
        .enumerate()
        .map(|(i, time)| {
            Ok(HourlyForecast {
                provider: PROVIDER_ID.to_string(),
                location_id: location.id,
                fetched_at,
                slot_start: local_to_utc(time, offset)?,
                measurements: Measurements {
                    temperature: value_at(&hourly.temperature_2m, i),
                    humidity: value_at(&hourly.relative_humidity_2m, i),
                    wind_speed: value_at(&hourly.wind_speed_10m, i),
                    precipitation: value_at(&hourly.precipitation, i),
                    precipitation_probability: value_at(&hourly.precipitation_probability, i),
                    condition: condition(value_at(&hourly.weather_code, i)),
                },
            })
        })
        .collect::<ProviderResult<Vec<_>>>()?;

    Ok(Parsed::new(records, timezone))
}

pub fn parse_daily(
    response: ForecastResponse,
    location: &Location,
) -> ProviderResult<Parsed<DailyForecast>> {
    let timezone = timezone_of(&response);
    let daily = response
        .daily
        .ok_or_else(|| ProviderError::parse(PROVIDER_ID, "response has no daily block"))?;
    let fetched_at = Utc::now();

    let records = daily
        .time
        .iter()
        .enumerate()
        .map(|(i, day)| {
            let date = NaiveDate::parse_from_str(day, "%Y-%m-%d").map_err(|e| {
                ProviderError::parse(PROVIDER_ID, format!("invalid date '{day}': {e}"))
            })?;
            Ok(DailyForecast {
                provider: PROVIDER_ID.to_string(),
                location_id: location.id,
                fetched_at,
                date,
                temperature_min: value_at(&daily.temperature_2m_min, i),
                temperature_max: value_at(&daily.temperature_2m_max, i),
                wind_speed_max: value_at(&daily.wind_speed_10m_max, i),
                precipitation_sum: value_at(&daily.precipitation_sum, i),
                precipitation_probability: value_at(&daily.precipitation_probability_max, i),
                condition: condition(value_at(&daily.weather_code, i)),
            })
        })
        .collect::<ProviderResult<Vec<_>>>()?;

    Ok(Parsed::new(records, timezone))
}
