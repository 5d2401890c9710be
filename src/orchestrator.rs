//! Three-tier read path: volatile cache, durable store, providers

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tracing::{debug, info, instrument, warn};

use crate::cache::{VolatileCache, cache_key};
use crate::config::FreshnessConfig;
use crate::error::AggregatorError;
use crate::fetch::FetchFanOut;
use crate::models::{
    CurrentWeather, DailyForecast, Forecast, ForecastKind, HourlyForecast, Location,
    WeatherRecord,
};
use crate::persist::{PersistReport, persist};
use crate::store::{DurableStore, RecordStore};

/// Durable and volatile TTLs per kind. The volatile TTL is always the shorter one.
#[derive(Debug, Clone)]
pub struct FreshnessPolicy {
    windows: FreshnessConfig,
}

impl FreshnessPolicy {
    #[must_use]
    pub fn new(windows: FreshnessConfig) -> Self {
        Self { windows }
    }

    #[must_use]
    pub fn durable_ttl(&self, kind: ForecastKind) -> Duration {
        self.windows.for_kind(kind).durable_ttl()
    }

    #[must_use]
    pub fn volatile_ttl(&self, kind: ForecastKind) -> Duration {
        self.windows.for_kind(kind).volatile_ttl()
    }
}

impl Default for FreshnessPolicy {
    fn default() -> Self {
        Self::new(FreshnessConfig::default())
    }
}

pub struct CacheOrchestrator<S: ?Sized> {
    store: Arc<S>,
    cache: Arc<dyn VolatileCache>,
    fan_out: FetchFanOut,
    freshness: FreshnessPolicy,
}

impl<S: DurableStore + ?Sized + 'static> CacheOrchestrator<S> {
    pub fn new(
        store: Arc<S>,
        cache: Arc<dyn VolatileCache>,
        fan_out: FetchFanOut,
        freshness: FreshnessPolicy,
    ) -> Self {
        Self {
            store,
            cache,
            fan_out,
            freshness,
        }
    }

    #[must_use]
    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    #[must_use]
    pub fn freshness(&self) -> &FreshnessPolicy {
        &self.freshness
    }

    /// Return a fresh record set for the location.
    ///
    /// Volatile cache errors degrade to a miss. A durable store read error
    /// surfaces, as does a fetch where every provider failed.
    #[instrument(skip_all, fields(kind = %R::KIND, location = %location.id))]
    pub async fn get<R>(&self, location: &Location) -> Result<Vec<R>, AggregatorError>
    where
        R: WeatherRecord,
        S: RecordStore<R>,
    {
        let key = cache_key(R::KIND, location.id);

        if let Some(records) = self.read_cache::<R>(&key).await {
            debug!(count = records.len(), "Volatile cache hit");
            return Ok(records);
        }

        let stored = RecordStore::<R>::list_for_location(&*self.store, location.id).await?;
        let fresh = self.fresh_rows(stored);
        if !fresh.is_empty() {
            debug!(count = fresh.len(), "Durable store hit");
            if let Some(ttl) = self.remaining_ttl(&fresh) {
                self.write_cache(&key, &fresh, ttl).await;
            }
            return Ok(fresh);
        }

        let (records, _) = self.refresh::<R>(location).await?;
        self.write_cache(&key, &records, self.freshness.volatile_ttl(R::KIND))
            .await;
        Ok(records)
    }

    /// Same as [`get`](Self::get) with the kind chosen at runtime
    pub async fn get_kind(
        &self,
        location: &Location,
        kind: ForecastKind,
    ) -> Result<Forecast, AggregatorError> {
        Ok(match kind {
            ForecastKind::Current => Forecast::Current(self.get::<CurrentWeather>(location).await?),
            ForecastKind::Hourly => Forecast::Hourly(self.get::<HourlyForecast>(location).await?),
            ForecastKind::Daily => Forecast::Daily(self.get::<DailyForecast>(location).await?),
        })
    }

    /// Fetch from every provider and persist the result. Shared with the scheduler.
    pub async fn refresh<R>(
        &self,
        location: &Location,
    ) -> Result<(Vec<R>, PersistReport), AggregatorError>
    where
        R: WeatherRecord,
        S: RecordStore<R>,
    {
        let records = self.fan_out.fetch_all::<R>(location).await?;
        let report = persist::<R, S>(&*self.store, &records).await;
        info!(
            kind = %R::KIND,
            location = %location.id,
            records = records.len(),
            created = report.created,
            updated = report.updated,
            failed = report.failed,
            "Refreshed weather"
        );
        Ok((records, report))
    }

    pub async fn refresh_kind(
        &self,
        location: &Location,
        kind: ForecastKind,
    ) -> Result<PersistReport, AggregatorError> {
        Ok(match kind {
            ForecastKind::Current => self.refresh::<CurrentWeather>(location).await?.1,
            ForecastKind::Hourly => self.refresh::<HourlyForecast>(location).await?.1,
            ForecastKind::Daily => self.refresh::<DailyForecast>(location).await?.1,
        })
    }

    fn fresh_rows<R: WeatherRecord>(&self, rows: Vec<R>) -> Vec<R> {
        let ttl = self.freshness.durable_ttl(R::KIND);
        let Ok(ttl) = chrono::Duration::from_std(ttl) else {
            return rows;
        };
        let cutoff = Utc::now() - ttl;
        rows.into_iter()
            .filter(|row| row.fetched_at() >= cutoff)
            .collect()
    }

    /// Volatile TTL for rows that came from the durable store. The entry must
    /// not outlive the moment the oldest row goes stale there.
    fn remaining_ttl<R: WeatherRecord>(&self, rows: &[R]) -> Option<Duration> {
        let volatile = self.freshness.volatile_ttl(R::KIND);
        let oldest = rows.iter().map(R::fetched_at).min()?;
        let age = (Utc::now() - oldest).to_std().unwrap_or(Duration::ZERO);
        let remaining = self.freshness.durable_ttl(R::KIND).checked_sub(age)?;
        let ttl = volatile.min(remaining);
        (!ttl.is_zero()).then_some(ttl)
    }

    async fn read_cache<R: WeatherRecord>(&self, key: &str) -> Option<Vec<R>> {
        match self.cache.get(key).await {
            Ok(Some(bytes)) => match serde_json::from_slice(&bytes) {
                Ok(records) => Some(records),
                Err(e) => {
                    warn!(key, error = %e, "Discarding undecodable cache entry");
                    None
                }
            },
            Ok(None) => None,
            Err(e) => {
                warn!(key, error = %e, "Volatile cache read failed");
                None
            }
        }
    }

    async fn write_cache<R: WeatherRecord>(&self, key: &str, records: &[R], ttl: Duration) {
        let bytes = match serde_json::to_vec(records) {
            Ok(bytes) => bytes,
            Err(e) => {
                warn!(key, error = %e, "Failed to encode cache entry");
                return;
            }
        };
        if let Err(e) = self
            .cache
            .set(key, bytes, ttl)
            .await
        {
            warn!(key, error = %e, "Volatile cache write failed");
        }
    }
}
