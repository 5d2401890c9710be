//! Durable store tier
//!
//! Locations, aliases and weather rows live here. Backends enforce the
//! uniqueness rules themselves: one row per natural key, one canonical
//! location per name, and an alias is never re-pointed.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::StoreError;
use crate::models::{
    CurrentWeather, DailyForecast, ForecastKind, HourlyForecast, Location, LocationId,
    NaturalKey, NewLocation, WeatherRecord, normalize_alias,
};

pub mod fjall_store;
pub mod memory;

pub use fjall_store::FjallStore;
pub use memory::MemoryStore;

pub type StoreResult<T> = std::result::Result<T, StoreError>;

/// Opaque identity of a stored weather row
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RecordId(pub u64);

impl fmt::Display for RecordId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A weather row as read back from the store
#[derive(Debug, Clone)]
pub struct StoredRecord<R> {
    pub id: RecordId,
    pub record: R,
    pub updated_at: DateTime<Utc>,
}

/// Weather rows of one record shape
#[async_trait]
pub trait RecordStore<R: WeatherRecord>: Send + Sync {
    async fn list_for_location(&self, location_id: LocationId) -> StoreResult<Vec<R>>;

    async fn find_by_key(&self, key: &NaturalKey) -> StoreResult<Option<StoredRecord<R>>>;

    /// Fails with a conflict when the natural key already exists.
    async fn create(&self, record: &R) -> StoreResult<RecordId>;

    async fn update(&self, id: RecordId, record: &R) -> StoreResult<()>;
}

#[async_trait]
pub trait LocationStore: Send + Sync {
    async fn list_locations(&self) -> StoreResult<Vec<Location>>;

    async fn get_location(&self, id: LocationId) -> StoreResult<Option<Location>>;

    async fn find_location_by_name(&self, name: &str) -> StoreResult<Option<Location>>;

    /// Fails with a conflict when a location with the same name exists.
    async fn create_location(&self, location: NewLocation) -> StoreResult<Location>;

    async fn find_alias(&self, alias: &str) -> StoreResult<Option<Location>>;

    /// Succeeds if the alias already points at `location_id`,
    /// conflicts if it points elsewhere.
    async fn create_alias(&self, alias: &str, location_id: LocationId) -> StoreResult<()>;

    /// Set the timezone only if none is recorded yet. Returns whether it was set.
    async fn claim_timezone(&self, id: LocationId, timezone: &str) -> StoreResult<bool>;
}

/// Everything the orchestrator and scheduler need from one backend
pub trait DurableStore:
    LocationStore
    + RecordStore<CurrentWeather>
    + RecordStore<HourlyForecast>
    + RecordStore<DailyForecast>
{
}

impl<T> DurableStore for T where
    T: LocationStore
        + RecordStore<CurrentWeather>
        + RecordStore<HourlyForecast>
        + RecordStore<DailyForecast>
{
}

/// Backend-neutral row layout shared by both stores
#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct RecordRow {
    pub id: RecordId,
    pub kind: ForecastKind,
    pub key: String,
    pub location_id: LocationId,
    pub updated_at: DateTime<Utc>,
    pub value: serde_json::Value,
}

impl RecordRow {
    pub(crate) fn encode<R: WeatherRecord>(id: RecordId, record: &R) -> StoreResult<Self> {
        Ok(Self {
            id,
            kind: R::KIND,
            key: record.natural_key().to_string(),
            location_id: record.location_id(),
            updated_at: Utc::now(),
            value: serde_json::to_value(record)?,
        })
    }

    pub(crate) fn decode<R: WeatherRecord>(&self) -> StoreResult<StoredRecord<R>> {
        Ok(StoredRecord {
            id: self.id,
            record: serde_json::from_value(self.value.clone())?,
            updated_at: self.updated_at,
        })
    }
}

/// Index key for a natural key within one record shape
pub(crate) fn record_index_key(kind: ForecastKind, key: &str) -> String {
    format!("{kind}:{key}")
}

/// Canonical names are unique after alias-style normalization
pub(crate) fn name_index_key(name: &str) -> String {
    normalize_alias(name)
}
