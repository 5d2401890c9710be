//! MET Norway Locationforecast 2.0 client
//!
//! The compact endpoint returns one timeseries for every kind: the first
//! entry is the current state, entries with a one-hour summary form the
//! hourly forecast, and daily values are aggregated per UTC date.

use std::collections::BTreeMap;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Timelike, Utc};
use reqwest::Client;
use serde::Deserialize;
use tracing::instrument;

use super::{ProviderRequest, ProviderResult, WeatherProvider, get_json};
use crate::error::ProviderError;
use crate::models::{
    CurrentWeather, DailyForecast, ForecastKind, HourlyForecast, Location, Measurements, Parsed,
};

pub const PROVIDER_ID: &str = "met-norway";

const MAX_HOURLY_SLOTS: usize = 48;

pub struct MetNorwayProvider {
    client: Client,
    base_url: String,
}

impl MetNorwayProvider {
    #[must_use]
    pub fn new(client: Client, base_url: String) -> Self {
        Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    /// Locationforecast takes the same request for every kind
    #[must_use]
    pub fn request(&self, location: &Location, _kind: ForecastKind) -> ProviderRequest {
        let (lat, lon) = location.request_coordinates();
        ProviderRequest {
            url: format!("{}/compact?lat={lat}&lon={lon}", self.base_url),
        }
    }

    async fn timeseries(&self, location: &Location, kind: ForecastKind) -> ProviderResult<Vec<TimeStep>> {
        let request = self.request(location, kind);
        let response: LocationforecastResponse =
            get_json(&self.client, PROVIDER_ID, &request).await?;
        Ok(response.properties.timeseries)
    }
}

#[async_trait]
impl WeatherProvider for MetNorwayProvider {
    fn id(&self) -> &'static str {
        PROVIDER_ID
    }

    #[instrument(name = "met_norway_current", skip_all, fields(location = %location.id))]
    async fn fetch_current(&self, location: &Location) -> ProviderResult<Parsed<CurrentWeather>> {
        let series = self.timeseries(location, ForecastKind::Current).await?;
        parse_current(&series, location)
    }

    #[instrument(name = "met_norway_hourly", skip_all, fields(location = %location.id))]
    async fn fetch_hourly(&self, location: &Location) -> ProviderResult<Parsed<HourlyForecast>> {
        let series = self.timeseries(location, ForecastKind::Hourly).await?;
        Ok(parse_hourly(&series, location))
    }

    #[instrument(name = "met_norway_daily", skip_all, fields(location = %location.id))]
    async fn fetch_daily(&self, location: &Location) -> ProviderResult<Parsed<DailyForecast>> {
        let series = self.timeseries(location, ForecastKind::Daily).await?;
        Ok(parse_daily(&series, location))
    }
}

#[derive(Debug, Deserialize)]
pub struct LocationforecastResponse {
    pub properties: Properties,
}

#[derive(Debug, Deserialize)]
pub struct Properties {
    pub timeseries: Vec<TimeStep>,
}

#[derive(Debug, Deserialize)]
pub struct TimeStep {
    pub time: DateTime<Utc>,
    pub data: TimeStepData,
}

#[derive(Debug, Deserialize)]
pub struct TimeStepData {
    pub instant: Instant,
    pub next_1_hours: Option<Period>,
    pub next_6_hours: Option<Period>,
}

#[derive(Debug, Deserialize)]
pub struct Instant {
    pub details: InstantDetails,
}

#[derive(Debug, Default, Deserialize)]
pub struct InstantDetails {
    pub air_temperature: Option<f64>,
    pub relative_humidity: Option<f64>,
    pub wind_speed: Option<f64>,
}

#[derive(Debug, Deserialize)]
pub struct Period {
    pub summary: Option<Summary>,
    pub details: Option<PeriodDetails>,
}

#[derive(Debug, Deserialize)]
pub struct Summary {
    pub symbol_code: String,
}

#[derive(Debug, Default, Deserialize)]
pub struct PeriodDetails {
    pub precipitation_amount: Option<f64>,
    pub probability_of_precipitation: Option<f64>,
}

impl Period {
    fn precipitation(&self) -> Option<f64> {
        self.details.as_ref().and_then(|d| d.precipitation_amount)
    }

    fn probability(&self) -> Option<f64> {
        self.details
            .as_ref()
            .and_then(|d| d.probability_of_precipitation)
    }

    fn condition(&self) -> Option<String> {
        self.summary
            .as_ref()
            .map(|s| symbol_to_condition(&s.symbol_code))
    }
}

impl TimeStep {
    fn short_period(&self) -> Option<&Period> {
        self.data
            .next_1_hours
            .as_ref()
            .or(self.data.next_6_hours.as_ref())
    }

    fn measurements(&self) -> Measurements {
        let details = &self.data.instant.details;
        let period = self.short_period();
        Measurements {
            temperature: details.air_temperature,
            humidity: details.relative_humidity,
            wind_speed: details.wind_speed,
            precipitation: period.and_then(Period::precipitation),
            precipitation_probability: period.and_then(Period::probability),
            condition: period.and_then(Period::condition),
        }
    }
}

/// "partlycloudy_day" -> "Partly cloudy"
#[must_use]
pub fn symbol_to_condition(symbol_code: &str) -> String {
    let base = symbol_code.split('_').next().unwrap_or(symbol_code);
    let text = match base {
        "clearsky" => "Clear sky",
        "fair" => "Fair",
        "partlycloudy" => "Partly cloudy",
        "cloudy" => "Cloudy",
        "fog" => "Fog",
        "lightrain" => "Light rain",
        "rain" => "Rain",
        "heavyrain" => "Heavy rain",
        "lightrainshowers" => "Light rain showers",
        "rainshowers" => "Rain showers",
        "heavyrainshowers" => "Heavy rain showers",
        "lightsleet" | "sleet" | "heavysleet" => "Sleet",
        "lightsnow" => "Light snow",
        "snow" => "Snow",
        "heavysnow" => "Heavy snow",
        "rainandthunder" | "heavyrainandthunder" | "lightrainandthunder" => "Thunderstorm",
        other => return other.to_string(),
    };
    text.to_string()
}

pub fn parse_current(
    series: &[TimeStep],
    location: &Location,
) -> ProviderResult<Parsed<CurrentWeather>> {
    let step = series
        .first()
        .ok_or_else(|| ProviderError::parse(PROVIDER_ID, "empty timeseries"))?;

    let record = CurrentWeather {
        provider: PROVIDER_ID.to_string(),
        location_id: location.id,
        fetched_at: Utc::now(),
        observed_at: step.time,
        measurements: step.measurements(),
    };
    Ok(Parsed::new(vec![record], None))
}

#[must_use]
pub fn parse_hourly(series: &[TimeStep], location: &Location) -> Parsed<HourlyForecast> {
    let fetched_at = Utc::now();
    let records = series
        .iter()
        .filter(|step| step.data.next_1_hours.is_some())
        .take(MAX_HOURLY_SLOTS)
        .map(|step| HourlyForecast {
            provider: PROVIDER_ID.to_string(),
            location_id: location.id,
            fetched_at,
            slot_start: step.time,
            measurements: step.measurements(),
        })
        .collect();
    Parsed::new(records, None)
}

#[derive(Default)]
struct DayAccumulator {
    temperature_min: Option<f64>,
    temperature_max: Option<f64>,
    wind_speed_max: Option<f64>,
    precipitation_sum: Option<f64>,
    precipitation_probability: Option<f64>,
    condition: Option<String>,
    midday_condition: Option<String>,
}

fn fold_min(acc: Option<f64>, value: Option<f64>) -> Option<f64> {
    match (acc, value) {
        (Some(a), Some(v)) => Some(a.min(v)),
        (a, v) => a.or(v),
    }
}

fn fold_max(acc: Option<f64>, value: Option<f64>) -> Option<f64> {
    match (acc, value) {
        (Some(a), Some(v)) => Some(a.max(v)),
        (a, v) => a.or(v),
    }
}

#[must_use]
pub fn parse_daily(series: &[TimeStep], location: &Location) -> Parsed<DailyForecast> {
    let mut days: BTreeMap<NaiveDate, DayAccumulator> = BTreeMap::new();

    for step in series {
        let day = days.entry(step.time.date_naive()).or_default();
        let details = &step.data.instant.details;
        day.temperature_min = fold_min(day.temperature_min, details.air_temperature);
        day.temperature_max = fold_max(day.temperature_max, details.air_temperature);
        day.wind_speed_max = fold_max(day.wind_speed_max, details.wind_speed);

        // Hourly steps carry next_1_hours, the 6-hourly tail only next_6_hours.
        if let Some(period) = step.short_period() {
            if let Some(amount) = period.precipitation() {
                day.precipitation_sum = Some(day.precipitation_sum.unwrap_or(0.0) + amount);
            }
            day.precipitation_probability =
                fold_max(day.precipitation_probability, period.probability());
            if day.condition.is_none() {
                day.condition = period.condition();
            }
            if step.time.hour() == 12 {
                day.midday_condition = period.condition();
            }
        }
    }

    let fetched_at = Utc::now();
    let records = days
        .into_iter()
        .map(|(date, day)| DailyForecast {
            provider: PROVIDER_ID.to_string(),
            location_id: location.id,
            fetched_at,
            date,
            temperature_min: day.temperature_min,
            temperature_max: day.temperature_max,
            wind_speed_max: day.wind_speed_max,
            precipitation_sum: day.precipitation_sum,
            precipitation_probability: day.precipitation_probability,
            condition: day.midday_condition.or(day.condition),
        })
        .collect();

    Parsed::new(records, None)
}
