//! Weather record models shared by providers, the store and the cache

use std::fmt::{self, Debug};

use chrono::{DateTime, NaiveDate, Utc};
use futures::future::BoxFuture;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use super::location::{Location, LocationId};
use crate::error::ProviderError;
use crate::weather::WeatherProvider;

/// One of the three record shapes, each with its own TTLs and refresh cadence
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ForecastKind {
    Current,
    Hourly,
    Daily,
}

impl ForecastKind {
    pub const ALL: [ForecastKind; 3] = [
        ForecastKind::Current,
        ForecastKind::Hourly,
        ForecastKind::Daily,
    ];

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            ForecastKind::Current => "current",
            ForecastKind::Hourly => "hourly",
            ForecastKind::Daily => "daily",
        }
    }
}

impl fmt::Display for ForecastKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for ForecastKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "current" => Ok(ForecastKind::Current),
            "hourly" => Ok(ForecastKind::Hourly),
            "daily" => Ok(ForecastKind::Daily),
            other => Err(format!(
                "Unknown forecast kind '{other}'. Must be one of: current, hourly, daily"
            )),
        }
    }
}

/// Slot part of a record's natural key
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum SlotKey {
    /// Current weather keeps one row per provider
    Latest,
    At(DateTime<Utc>),
}

impl fmt::Display for SlotKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SlotKey::Latest => f.write_str("latest"),
            SlotKey::At(ts) => write!(f, "{}", ts.timestamp()),
        }
    }
}

/// (location, provider, slot), unique per kind in the durable store
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct NaturalKey {
    pub location_id: LocationId,
    pub provider: String,
    pub slot: SlotKey,
}

impl fmt::Display for NaturalKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.location_id, self.provider, self.slot)
    }
}

/// Measurements common to current and hourly records
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Measurements {
    /// Temperature in Celsius
    pub temperature: Option<f64>,
    /// Relative humidity in percent
    pub humidity: Option<f64>,
    /// Wind speed in m/s
    pub wind_speed: Option<f64>,
    /// Precipitation amount in mm
    pub precipitation: Option<f64>,
    /// Precipitation probability in percent
    pub precipitation_probability: Option<f64>,
    /// Human-readable description of weather conditions
    pub condition: Option<String>,
}

/// Provider output before stamping: normalized records and an optional timezone
#[derive(Debug, Clone)]
pub struct Parsed<R> {
    pub records: Vec<R>,
    pub timezone: Option<String>,
}

impl<R> Parsed<R> {
    #[must_use]
    pub fn new(records: Vec<R>, timezone: Option<String>) -> Self {
        Self { records, timezone }
    }
}

/// Capability set the generic fetch/cache/persist pipeline needs from a record.
pub trait WeatherRecord:
    Serialize + DeserializeOwned + Clone + Debug + Send + Sync + 'static
{
    const KIND: ForecastKind;

    fn provider(&self) -> &str;

    fn location_id(&self) -> LocationId;

    /// Time the record was fetched from its provider; drives freshness.
    fn fetched_at(&self) -> DateTime<Utc>;

    fn slot(&self) -> SlotKey;

    /// Attach the owning location and the shared fetch timestamp.
    fn stamp(&mut self, location_id: LocationId, fetched_at: DateTime<Utc>);

    /// Ask a provider for this record shape.
    fn fetch_from<'a>(
        provider: &'a dyn WeatherProvider,
        location: &'a Location,
    ) -> BoxFuture<'a, Result<Parsed<Self>, ProviderError>>;

    fn natural_key(&self) -> NaturalKey {
        NaturalKey {
            location_id: self.location_id(),
            provider: self.provider().to_string(),
            slot: self.slot(),
        }
    }
}

/// Latest observation reported by one provider
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CurrentWeather {
    pub provider: String,
    pub location_id: LocationId,
    pub fetched_at: DateTime<Utc>,
    /// Observation time reported by the provider
    pub observed_at: DateTime<Utc>,
    pub measurements: Measurements,
}

/// One hourly forecast slot from one provider
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HourlyForecast {
    pub provider: String,
    pub location_id: LocationId,
    pub fetched_at: DateTime<Utc>,
    /// Start of the forecast hour
    pub slot_start: DateTime<Utc>,
    pub measurements: Measurements,
}

/// One daily forecast slot from one provider
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DailyForecast {
    pub provider: String,
    pub location_id: LocationId,
    pub fetched_at: DateTime<Utc>,
    pub date: NaiveDate,
    /// Minimum temperature in Celsius
    pub temperature_min: Option<f64>,
    /// Maximum temperature in Celsius
    pub temperature_max: Option<f64>,
    /// Maximum wind speed in m/s
    pub wind_speed_max: Option<f64>,
    /// Total precipitation in mm
    pub precipitation_sum: Option<f64>,
    /// Precipitation probability in percent
    pub precipitation_probability: Option<f64>,
    pub condition: Option<String>,
}

impl DailyForecast {
    /// Slot timestamp: midnight UTC of the forecast date
    #[must_use]
    pub fn slot_start(&self) -> DateTime<Utc> {
        self.date.and_time(chrono::NaiveTime::MIN).and_utc()
    }
}

impl WeatherRecord for CurrentWeather {
    const KIND: ForecastKind = ForecastKind::Current;

    fn provider(&self) -> &str {
        &self.provider
    }

    fn location_id(&self) -> LocationId {
        self.location_id
    }

    fn fetched_at(&self) -> DateTime<Utc> {
        self.fetched_at
    }

    fn slot(&self) -> SlotKey {
        SlotKey::Latest
    }

    fn stamp(&mut self, location_id: LocationId, fetched_at: DateTime<Utc>) {
        self.location_id = location_id;
        self.fetched_at = fetched_at;
    }

    fn fetch_from<'a>(
        provider: &'a dyn WeatherProvider,
        location: &'a Location,
    ) -> BoxFuture<'a, Result<Parsed<Self>, ProviderError>> {
        provider.fetch_current(location)
    }
}

impl WeatherRecord for HourlyForecast {
    const KIND: ForecastKind = ForecastKind::Hourly;

    fn provider(&self) -> &str {
        &self.provider
    }

    fn location_id(&self) -> LocationId {
        self.location_id
    }

    fn fetched_at(&self) -> DateTime<Utc> {
        self.fetched_at
    }

    fn slot(&self) -> SlotKey {
        SlotKey::At(self.slot_start)
    }

    fn stamp(&mut self, location_id: LocationId, fetched_at: DateTime<Utc>) {
        self.location_id = location_id;
        self.fetched_at = fetched_at;
    }

    fn fetch_from<'a>(
        provider: &'a dyn WeatherProvider,
        location: &'a Location,
    ) -> BoxFuture<'a, Result<Parsed<Self>, ProviderError>> {
        provider.fetch_hourly(location)
    }
}

impl WeatherRecord for DailyForecast {
    const KIND: ForecastKind = ForecastKind::Daily;

    fn provider(&self) -> &str {
        &self.provider
    }

    fn location_id(&self) -> LocationId {
        self.location_id
    }

    fn fetched_at(&self) -> DateTime<Utc> {
        self.fetched_at
    }

    fn slot(&self) -> SlotKey {
        SlotKey::At(self.slot_start())
    }

    fn stamp(&mut self, location_id: LocationId, fetched_at: DateTime<Utc>) {
        self.location_id = location_id;
        self.fetched_at = fetched_at;
    }

    fn fetch_from<'a>(
        provider: &'a dyn WeatherProvider,
        location: &'a Location,
    ) -> BoxFuture<'a, Result<Parsed<Self>, ProviderError>> {
        provider.fetch_daily(location)
    }
}

/// Records of a kind chosen at runtime
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", content = "records", rename_all = "lowercase")]
pub enum Forecast {
    Current(Vec<CurrentWeather>),
    Hourly(Vec<HourlyForecast>),
    Daily(Vec<DailyForecast>),
}

impl Forecast {
    #[must_use]
    pub fn kind(&self) -> ForecastKind {
        match self {
            Forecast::Current(_) => ForecastKind::Current,
            Forecast::Hourly(_) => ForecastKind::Hourly,
            Forecast::Daily(_) => ForecastKind::Daily,
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        match self {
            Forecast::Current(records) => records.len(),
            Forecast::Hourly(records) => records.len(),
            Forecast::Daily(records) => records.len(),
        }
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
