//! WeatherAPI.com client (requires an API key)

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use chrono_tz::Tz;
use reqwest::Client;
use serde::Deserialize;
use tracing::instrument;

use super::{ProviderRequest, ProviderResult, WeatherProvider, get_json, kph_to_ms};
use crate::error::ProviderError;
use crate::models::{
    CurrentWeather, DailyForecast, ForecastKind, HourlyForecast, Location, Measurements, Parsed,
};

pub const PROVIDER_ID: &str = "weatherapi";

pub struct WeatherApiProvider {
    client: Client,
    base_url: String,
    api_key: String,
}

impl WeatherApiProvider {
    #[must_use]
    pub fn new(client: Client, base_url: String, api_key: String) -> Self {
        Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key,
        }
    }

    #[must_use]
    pub fn request(&self, location: &Location, kind: ForecastKind) -> ProviderRequest {
        let (lat, lon) = location.request_coordinates();
        let url = match kind {
            ForecastKind::Current => format!(
                "{}/current.json?key={}&q={lat},{lon}",
                self.base_url, self.api_key
            ),
            ForecastKind::Hourly => format!(
                "{}/forecast.json?key={}&q={lat},{lon}&days=2",
                self.base_url, self.api_key
            ),
            ForecastKind::Daily => format!(
                "{}/forecast.json?key={}&q={lat},{lon}&days=7",
                self.base_url, self.api_key
            ),
        };
        ProviderRequest { url }
    }

    async fn call(&self, location: &Location, kind: ForecastKind) -> ProviderResult<ApiResponse> {
        let request = self.request(location, kind);
        get_json(&self.client, PROVIDER_ID, &request).await
    }
}

#[async_trait]
impl WeatherProvider for WeatherApiProvider {
    fn id(&self) -> &'static str {
        PROVIDER_ID
    }

    #[instrument(name = "weather_api_current", skip_all, fields(location = %location.id))]
    async fn fetch_current(&self, location: &Location) -> ProviderResult<Parsed<CurrentWeather>> {
        let response = self.call(location, ForecastKind::Current).await?;
        parse_current(response, location)
    }

    #[instrument(name = "weather_api_hourly", skip_all, fields(location = %location.id))]
    async fn fetch_hourly(&self, location: &Location) -> ProviderResult<Parsed<HourlyForecast>> {
        let response = self.call(location, ForecastKind::Hourly).await?;
        parse_hourly(response, location)
    }

    #[instrument(name = "weather_api_daily", skip_all, fields(location = %location.id))]
    async fn fetch_daily(&self, location: &Location) -> ProviderResult<Parsed<DailyForecast>> {
        let response = self.call(location, ForecastKind::Daily).await?;
        parse_daily(response, location)
    }
}

#[derive(Debug, Deserialize)]
pub struct ApiResponse {
    pub location: Option<ApiLocation>,
    pub current: Option<ApiCurrent>,
    pub forecast: Option<ApiForecast>,
}

#[derive(Debug, Deserialize)]
pub struct ApiLocation {
    pub tz_id: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct ApiCondition {
    pub text: String,
}

#[derive(Debug, Deserialize)]
pub struct ApiCurrent {
    pub last_updated_epoch: i64,
    pub temp_c: Option<f64>,
    pub humidity: Option<f64>,
    pub wind_kph: Option<f64>,
    pub precip_mm: Option<f64>,
    pub condition: Option<ApiCondition>,
}

#[derive(Debug, Deserialize)]
pub struct ApiForecast {
    pub forecastday: Vec<ApiForecastDay>,
}

#[derive(Debug, Deserialize)]
pub struct ApiForecastDay {
    pub date: NaiveDate,
    pub day: ApiDay,
    #[serde(default)]
    pub hour: Vec<ApiHour>,
}

#[derive(Debug, Deserialize)]
pub struct ApiDay {
    pub maxtemp_c: Option<f64>,
    pub mintemp_c: Option<f64>,
    pub maxwind_kph: Option<f64>,
    pub totalprecip_mm: Option<f64>,
    pub daily_chance_of_rain: Option<f64>,
    pub condition: Option<ApiCondition>,
}

#[derive(Debug, Deserialize)]
pub struct ApiHour {
    pub time_epoch: i64,
    pub temp_c: Option<f64>,
    pub humidity: Option<f64>,
    pub wind_kph: Option<f64>,
    pub precip_mm: Option<f64>,
    pub chance_of_rain: Option<f64>,
    pub condition: Option<ApiCondition>,
}

fn timestamp(epoch: i64) -> ProviderResult<DateTime<Utc>> {
    DateTime::from_timestamp(epoch, 0)
        .ok_or_else(|| ProviderError::parse(PROVIDER_ID, format!("invalid epoch {epoch}")))
}

fn reported_timezone(response: &ApiResponse) -> Option<String> {
    response
        .location
        .as_ref()
        .and_then(|l| l.tz_id.clone())
        .filter(|tz| tz.parse::<Tz>().is_ok())
}

fn forecast_days(response: ApiResponse) -> ProviderResult<Vec<ApiForecastDay>> {
    response
        .forecast
        .map(|f| f.forecastday)
        .ok_or_else(|| ProviderError::parse(PROVIDER_ID, "missing forecast block"))
}

pub fn parse_current(
    response: ApiResponse,
    location: &Location,
) -> ProviderResult<Parsed<CurrentWeather>> {
    let timezone = reported_timezone(&response);
    let current = response
        .current
        .ok_or_else(|| ProviderError::parse(PROVIDER_ID, "missing current block"))?;

    let record = CurrentWeather {
        provider: PROVIDER_ID.to_string(),
        location_id: location.id,
        fetched_at: Utc::now(),
        observed_at: timestamp(current.last_updated_epoch)?,
        measurements: Measurements {
            temperature: current.temp_c,
            humidity: current.humidity,
            wind_speed: current.wind_kph.map(kph_to_ms),
            precipitation: current.precip_mm,
            precipitation_probability: None,
            condition: current.condition.map(|c| c.text),
        },
    };
    Ok(Parsed::new(vec![record], timezone))
}

pub fn parse_hourly(
    response: ApiResponse,
    location: &Location,
) -> ProviderResult<Parsed<HourlyForecast>> {
    let timezone = reported_timezone(&response);
    let fetched_at = Utc::now();

    let mut records = Vec::new();
    for day in forecast_days(response)? {
        for hour in day.hour {
            records.push(HourlyForecast {
                provider: PROVIDER_ID.to_string(),
                location_id: location.id,
                fetched_at,
                slot_start: timestamp(hour.time_epoch)?,
                measurements: Measurements {
                    temperature: hour.temp_c,
                    humidity: hour.humidity,
                    wind_speed: hour.wind_kph.map(kph_to_ms),
                    precipitation: hour.precip_mm,
                    precipitation_probability: hour.chance_of_rain,
                    condition: hour.condition.map(|c| c.text),
                },
            });
        }
    }
    Ok(Parsed::new(records, timezone))
}

pub fn parse_daily(
    response: ApiResponse,
    location: &Location,
) -> ProviderResult<Parsed<DailyForecast>> {
    let timezone = reported_timezone(&response);
    let fetched_at = Utc::now();

    let records = forecast_days(response)?
        .into_iter()
        .map(|forecast_day| {
            let day = forecast_day.day;
            DailyForecast {
                provider: PROVIDER_ID.to_string(),
                location_id: location.id,
                fetched_at,
                date: forecast_day.date,
                temperature_min: day.mintemp_c,
                temperature_max: day.maxtemp_c,
                wind_speed_max: day.maxwind_kph.map(kph_to_ms),
                precipitation_sum: day.totalprecip_mm,
                precipitation_probability: day.daily_chance_of_rain,
                condition: day.condition.map(|c| c.text),
            }
        })
        .collect();
    Ok(Parsed::new(records, timezone))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::LocationId;

    fn location() -> Location {
        Location {
            id: LocationId(3),
            name: "Madrid".to_string(),
            latitude: 40.4168,
            longitude: -3.7038,
            country_code: "ES".to_string(),
            timezone: None,
        }
    }

    fn provider() -> WeatherApiProvider {
        WeatherApiProvider::new(
            Client::new(),
            "https://api.weatherapi.com/v1/".to_string(),
            "secret".to_string(),
        )
    }

    fn forecast_response() -> ApiResponse {
        serde_json::from_str(
            r#"{
                "location": {"tz_id": "Europe/Madrid"},
                "forecast": {"forecastday": [{
                    "date": "2024-07-01",
                    "day": {"maxtemp_c": 34.0, "mintemp_c": 19.5, "maxwind_kph": 18.0,
                            "totalprecip_mm": 0.0, "daily_chance_of_rain": 0,
                            "condition": {"text": "Sunny"}},
                    "hour": [
                        {"time_epoch": 1719784800, "temp_c": 21.0, "humidity": 40,
                         "wind_kph": 7.2, "precip_mm": 0.0, "chance_of_rain": 0,
                         "condition": {"text": "Clear"}},
                        {"time_epoch": 1719788400, "temp_c": 20.5}
                    ]
                }]}
            }"#,
        )
        .unwrap()
    }

    #[test]
    fn test_request_urls() {
        let provider = provider();
        assert_eq!(
            provider.request(&location(), ForecastKind::Current).url,
            "https://api.weatherapi.com/v1/current.json?key=secret&q=40.42,-3.70"
        );
        assert!(
            provider
                .request(&location(), ForecastKind::Daily)
                .url
                .ends_with("forecast.json?key=secret&q=40.42,-3.70&days=7")
        );
    }

    #[test]
    fn test_parse_current_converts_wind() {
        let response: ApiResponse = serde_json::from_str(
            r#"{
                "location": {"tz_id": "Europe/Madrid"},
                "current": {"last_updated_epoch": 1719835200, "temp_c": 30.0,
                            "humidity": 25, "wind_kph": 36.0, "precip_mm": 0.0,
                            "condition": {"text": "Sunny"}}
            }"#,
        )
        .unwrap();

        let parsed = parse_current(response, &location()).unwrap();
        assert_eq!(parsed.timezone.as_deref(), Some("Europe/Madrid"));
        let record = &parsed.records[0];
        assert!((record.measurements.wind_speed.unwrap() - 10.0).abs() < 1e-9);
        assert_eq!(record.observed_at.timestamp(), 1_719_835_200);
    }

    #[test]
    fn test_parse_hourly_and_daily() {
        let hourly = parse_hourly(forecast_response(), &location()).unwrap();
        assert_eq!(hourly.records.len(), 2);
        assert_eq!(hourly.records[1].measurements.condition, None);

        let daily = parse_daily(forecast_response(), &location()).unwrap();
        assert_eq!(daily.records.len(), 1);
        assert_eq!(daily.records[0].temperature_max, Some(34.0));
        assert!((daily.records[0].wind_speed_max.unwrap() - 5.0).abs() < 1e-9);
    }

    #[test]
    fn test_unknown_timezone_is_dropped() {
        let response: ApiResponse = serde_json::from_str(
            r#"{"location": {"tz_id": "Mars/Olympus"}, "forecast": {"forecastday": []}}"#,
        )
        .unwrap();
        let parsed = parse_daily(response, &location()).unwrap();
        assert!(parsed.timezone.is_none());
        assert!(parsed.records.is_empty());
    }

    #[test]
    fn test_missing_current_block_is_parse_error() {
        let response: ApiResponse = serde_json::from_str(r#"{"location": null}"#).unwrap();
        assert!(matches!(
            parse_current(response, &location()),
            Err(ProviderError::Parse { .. })
        ));
    }
}
