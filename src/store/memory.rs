//! In-process durable store, used by tests and `store.backend = "memory"`

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use tokio::sync::RwLock;

use super::{
    LocationStore, RecordId, RecordRow, RecordStore, StoreResult, StoredRecord, name_index_key,
    record_index_key,
};
use crate::error::StoreError;
use crate::models::{Location, LocationId, NaturalKey, NewLocation, WeatherRecord};

#[derive(Default)]
struct Tables {
    locations: BTreeMap<LocationId, Location>,
    names: HashMap<String, LocationId>,
    aliases: HashMap<String, LocationId>,
    records: BTreeMap<RecordId, RecordRow>,
    record_keys: HashMap<String, RecordId>,
    next_location_id: u64,
    next_record_id: u64,
}

#[derive(Default)]
pub struct MemoryStore {
    tables: RwLock<Tables>,
    unavailable: AtomicBool,
}

impl MemoryStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Simulate an unreachable backend: every call fails until reset.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    fn check_available(&self) -> StoreResult<()> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(StoreError::backend("memory store is unavailable"));
        }
        Ok(())
    }

    /// Number of weather rows across all kinds
    pub async fn record_count(&self) -> usize {
        self.tables.read().await.records.len()
    }

    /// Number of alias rows across all locations
    pub async fn alias_count(&self) -> usize {
        self.tables.read().await.aliases.len()
    }
}

#[async_trait]
impl<R: WeatherRecord> RecordStore<R> for MemoryStore {
    async fn list_for_location(&self, location_id: LocationId) -> StoreResult<Vec<R>> {
        self.check_available()?;
        let tables = self.tables.read().await;
        tables
            .records
            .values()
            .filter(|row| row.kind == R::KIND && row.location_id == location_id)
            .map(|row| row.decode::<R>().map(|stored| stored.record))
            .collect()
    }

    async fn find_by_key(&self, key: &NaturalKey) -> StoreResult<Option<StoredRecord<R>>> {
        self.check_available()?;
        let tables = self.tables.read().await;
        let index_key = record_index_key(R::KIND, &key.to_string());
        tables
            .record_keys
            .get(&index_key)
            .and_then(|id| tables.records.get(id))
            .map(RecordRow::decode::<R>)
            .transpose()
    }

    async fn create(&self, record: &R) -> StoreResult<RecordId> {
        self.check_available()?;
        let mut tables = self.tables.write().await;
        let natural_key = record.natural_key().to_string();
        let index_key = record_index_key(R::KIND, &natural_key);
        if tables.record_keys.contains_key(&index_key) {
            return Err(StoreError::conflict(format!(
                "{} record {natural_key} already exists",
                R::KIND
            )));
        }

        tables.next_record_id += 1;
        let id = RecordId(tables.next_record_id);
        let row = RecordRow::encode(id, record)?;
        tables.record_keys.insert(index_key, id);
        tables.records.insert(id, row);
        Ok(id)
    }

    async fn update(&self, id: RecordId, record: &R) -> StoreResult<()> {
        self.check_available()?;
        let mut tables = self.tables.write().await;
        let Some(existing) = tables.records.get(&id) else {
            return Err(StoreError::backend(format!("record {id} not found")));
        };
        if existing.kind != R::KIND || existing.key != record.natural_key().to_string() {
            return Err(StoreError::conflict(format!(
                "record {id} belongs to a different natural key"
            )));
        }

        let row = RecordRow::encode(id, record)?;
        tables.records.insert(id, row);
        Ok(())
    }
}

#[async_trait]
impl LocationStore for MemoryStore {
    async fn list_locations(&self) -> StoreResult<Vec<Location>> {
        self.check_available()?;
        Ok(self.tables.read().await.locations.values().cloned().collect())
    }

    async fn get_location(&self, id: LocationId) -> StoreResult<Option<Location>> {
        self.check_available()?;
        Ok(self.tables.read().await.locations.get(&id).cloned())
    }

    async fn find_location_by_name(&self, name: &str) -> StoreResult<Option<Location>> {
        self.check_available()?;
        let tables = self.tables.read().await;
        Ok(tables
            .names
            .get(&name_index_key(name))
            .and_then(|id| tables.locations.get(id))
            .cloned())
    }

    async fn create_location(&self, location: NewLocation) -> StoreResult<Location> {
        self.check_available()?;
        let mut tables = self.tables.write().await;
        let name_key = name_index_key(&location.name);
        if tables.names.contains_key(&name_key) {
            return Err(StoreError::conflict(format!(
                "location '{}' already exists",
                location.name
            )));
        }

        tables.next_location_id += 1;
        let created = Location {
            id: LocationId(tables.next_location_id),
            name: location.name,
            latitude: location.latitude,
            longitude: location.longitude,
            country_code: location.country_code,
            timezone: None,
        };
        tables.names.insert(name_key, created.id);
        tables.locations.insert(created.id, created.clone());
        Ok(created)
    }

    async fn find_alias(&self, alias: &str) -> StoreResult<Option<Location>> {
        self.check_available()?;
        let tables = self.tables.read().await;
        Ok(tables
            .aliases
            .get(alias)
            .and_then(|id| tables.locations.get(id))
            .cloned())
    }

    async fn create_alias(&self, alias: &str, location_id: LocationId) -> StoreResult<()> {
        self.check_available()?;
        let mut tables = self.tables.write().await;
        match tables.aliases.get(alias) {
            Some(existing) if *existing == location_id => Ok(()),
            Some(existing) => Err(StoreError::conflict(format!(
                "alias '{alias}' already points at location {existing}"
            ))),
            None => {
                tables.aliases.insert(alias.to_string(), location_id);
                Ok(())
            }
        }
    }

    async fn claim_timezone(&self, id: LocationId, timezone: &str) -> StoreResult<bool> {
        self.check_available()?;
        let mut tables = self.tables.write().await;
        let location = tables
            .locations
            .get_mut(&id)
            .ok_or_else(|| StoreError::backend(format!("location {id} not found")))?;
        if location.timezone.is_some() {
            return Ok(false);
        }
        location.timezone = Some(timezone.to_string());
        Ok(true)
    }
}
