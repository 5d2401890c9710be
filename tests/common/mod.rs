//! Shared stubs for the integration tests

#![allow(dead_code)]

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use chrono::{Duration, Utc};
use weather_aggregator::error::ProviderError;
use weather_aggregator::models::{Measurements, Parsed, normalize_alias};
use weather_aggregator::weather::ProviderResult;
use weather_aggregator::{
    CacheOrchestrator, CurrentWeather, DailyForecast, FetchFanOut, FreshnessPolicy,
    Geocoder, HourlyForecast, Location, LocationId, LocationStore, MemoryCache, MemoryStore,
    NewLocation, WeatherProvider,
};
use weather_aggregator::AggregatorError;

/// Provider that answers from memory and counts its calls
pub struct StubProvider {
    pub id: &'static str,
    pub fail: bool,
    /// Location names this provider fails for
    pub fail_for: Vec<String>,
    pub timezone: Option<String>,
    /// Time each fetch takes before answering
    pub delay: std::time::Duration,
    pub calls: AtomicUsize,
    pub completed: AtomicUsize,
}

impl StubProvider {
    pub fn ok(id: &'static str) -> Arc<Self> {
        Arc::new(Self {
            id,
            fail: false,
            fail_for: Vec::new(),
            timezone: None,
            delay: std::time::Duration::ZERO,
            calls: AtomicUsize::new(0),
            completed: AtomicUsize::new(0),
        })
    }

    pub fn failing(id: &'static str) -> Arc<Self> {
        Arc::new(Self {
            id,
            fail: true,
            fail_for: Vec::new(),
            timezone: None,
            delay: std::time::Duration::ZERO,
            calls: AtomicUsize::new(0),
            completed: AtomicUsize::new(0),
        })
    }

    pub fn with_timezone(id: &'static str, timezone: &str) -> Arc<Self> {
        Arc::new(Self {
            id,
            fail: false,
            fail_for: Vec::new(),
            timezone: Some(timezone.to_string()),
            delay: std::time::Duration::ZERO,
            calls: AtomicUsize::new(0),
            completed: AtomicUsize::new(0),
        })
    }

    pub fn failing_for(id: &'static str, name: &str) -> Arc<Self> {
        Arc::new(Self {
            id,
            fail: false,
            fail_for: vec![name.to_string()],
            timezone: None,
            delay: std::time::Duration::ZERO,
            calls: AtomicUsize::new(0),
            completed: AtomicUsize::new(0),
        })
    }

    pub fn slow(id: &'static str, delay: std::time::Duration) -> Arc<Self> {
        Arc::new(Self {
            id,
            fail: false,
            fail_for: Vec::new(),
            timezone: None,
            delay,
            calls: AtomicUsize::new(0),
            completed: AtomicUsize::new(0),
        })
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Fetches that ran to the end, successful or not
    pub fn completed(&self) -> usize {
        self.completed.load(Ordering::SeqCst)
    }

    async fn check(&self, location: &Location) -> ProviderResult<()> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        self.completed.fetch_add(1, Ordering::SeqCst);
        if self.fail || self.fail_for.contains(&location.name) {
            return Err(ProviderError::transport(self.id, "connection refused"));
        }
        Ok(())
    }

    fn measurements(&self) -> Measurements {
        Measurements {
            temperature: Some(18.5),
            humidity: Some(60.0),
            wind_speed: Some(3.0),
            precipitation: Some(0.0),
            precipitation_probability: None,
            condition: Some(format!("Clear ({})", self.id)),
        }
    }
}

#[async_trait]
impl WeatherProvider for StubProvider {
    fn id(&self) -> &'static str {
        self.id
    }

    async fn fetch_current(&self, location: &Location) -> ProviderResult<Parsed<CurrentWeather>> {
        self.check(location).await?;
        let record = CurrentWeather {
            provider: self.id.to_string(),
            location_id: LocationId(0),
            fetched_at: Utc::now(),
            observed_at: Utc::now(),
            measurements: self.measurements(),
        };
        Ok(Parsed::new(vec![record], self.timezone.clone()))
    }

    async fn fetch_hourly(&self, location: &Location) -> ProviderResult<Parsed<HourlyForecast>> {
        self.check(location).await?;
        let start = Utc::now()
            .date_naive()
            .and_hms_opt(0, 0, 0)
            .map(|t| t.and_utc())
            .unwrap_or_else(Utc::now);
        let records = (0..2)
            .map(|h| HourlyForecast {
                provider: self.id.to_string(),
                location_id: LocationId(0),
                fetched_at: Utc::now(),
                slot_start: start + Duration::hours(h),
                measurements: self.measurements(),
            })
            .collect();
        Ok(Parsed::new(records, self.timezone.clone()))
    }

    async fn fetch_daily(&self, location: &Location) -> ProviderResult<Parsed<DailyForecast>> {
        self.check(location).await?;
        let record = DailyForecast {
            provider: self.id.to_string(),
            location_id: LocationId(0),
            fetched_at: Utc::now(),
            date: Utc::now().date_naive(),
            temperature_min: Some(10.0),
            temperature_max: Some(21.0),
            wind_speed_max: Some(5.0),
            precipitation_sum: Some(0.4),
            precipitation_probability: Some(20.0),
            condition: Some("Partly cloudy".to_string()),
        };
        Ok(Parsed::new(vec![record], self.timezone.clone()))
    }
}

/// Geocoder that knows a fixed set of places
#[derive(Default)]
pub struct StubGeocoder {
    pub calls: AtomicUsize,
}

impl StubGeocoder {
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Geocoder for StubGeocoder {
    async fn geocode(&self, name: &str) -> Result<NewLocation, AggregatorError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        match normalize_alias(name).as_str() {
            "new york" | "nyc" => Ok(NewLocation {
                name: "New York".to_string(),
                latitude: 40.71,
                longitude: -74.01,
                country_code: "US".to_string(),
            }),
            "testville" => Ok(testville()),
            _ => Err(AggregatorError::geocode(name, "no results")),
        }
    }

    async fn reverse_geocode(&self, _lat: f64, _lon: f64) -> Result<NewLocation, AggregatorError> {
        Ok(testville())
    }
}

pub fn testville() -> NewLocation {
    NewLocation {
        name: "Testville".to_string(),
        latitude: 51.11,
        longitude: 17.04,
        country_code: "PL".to_string(),
    }
}

pub struct Harness {
    pub store: Arc<MemoryStore>,
    pub cache: Arc<MemoryCache>,
    pub orchestrator: Arc<CacheOrchestrator<MemoryStore>>,
}

pub fn fan_out(providers: &[Arc<StubProvider>], store: &Arc<MemoryStore>) -> FetchFanOut {
    let providers: Vec<Arc<dyn WeatherProvider>> = providers
        .iter()
        .map(|p| Arc::clone(p) as Arc<dyn WeatherProvider>)
        .collect();
    let locations: Arc<dyn LocationStore> = store.clone();
    FetchFanOut::new(providers, locations)
}

pub fn harness(providers: &[Arc<StubProvider>]) -> Harness {
    let store = Arc::new(MemoryStore::new());
    let cache = Arc::new(MemoryCache::new());
    let orchestrator = Arc::new(CacheOrchestrator::new(
        store.clone(),
        cache.clone(),
        fan_out(providers, &store),
        FreshnessPolicy::default(),
    ));
    Harness {
        store,
        cache,
        orchestrator,
    }
}

pub async fn create_location(store: &MemoryStore, location: NewLocation) -> Location {
    store.create_location(location).await.unwrap()
}
