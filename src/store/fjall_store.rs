//! Durable store on an embedded fjall database
//!
//! Rows are JSON documents. Secondary lookups go through explicit index
//! keyspaces so reads never scan a whole table. Every logical insert is
//! committed as one write batch, and writers are serialized by one async
//! lock, which is what makes create-if-absent and the timezone claim atomic.

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use fjall::{Keyspace, OwnedWriteBatch};
use serde::Serialize;
use serde::de::DeserializeOwned;
use tokio::sync::Mutex;
use tokio::task;
use tracing::instrument;

use super::{
    LocationStore, RecordId, RecordRow, RecordStore, StoreResult, StoredRecord, name_index_key,
    record_index_key,
};
use crate::error::StoreError;
use crate::models::{
    ForecastKind, Location, LocationId, NaturalKey, NewLocation, WeatherRecord,
};

const NEXT_LOCATION_ID: &[u8] = b"next_location_id";
const NEXT_RECORD_ID: &[u8] = b"next_record_id";

struct Keyspaces {
    db: fjall::Database,
    meta: Keyspace,
    locations: Keyspace,
    location_names: Keyspace,
    aliases: Keyspace,
    records: Keyspace,
    record_keys: Keyspace,
    /// `{kind}:{location_id}:` followed by the big-endian record id, empty values
    location_rows: Keyspace,
}

fn read_json<T: DeserializeOwned>(keyspace: &Keyspace, key: &[u8]) -> StoreResult<Option<T>> {
    let bytes = keyspace
        .get(key.to_vec())
        .map_err(StoreError::backend)?
        .map(|v| v.to_vec());
    match bytes {
        Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
        None => Ok(None),
    }
}

fn stage_json<T: Serialize>(
    batch: &mut OwnedWriteBatch,
    keyspace: &Keyspace,
    key: &[u8],
    value: &T,
) -> StoreResult<()> {
    let bytes = serde_json::to_vec(value)?;
    batch.insert(keyspace, key.to_vec(), bytes);
    Ok(())
}

fn id_key(id: u64) -> Vec<u8> {
    id.to_be_bytes().to_vec()
}

fn id_from_key(key: &[u8]) -> StoreResult<u64> {
    let tail = key
        .len()
        .checked_sub(8)
        .and_then(|start| key.get(start..))
        .and_then(|bytes| <[u8; 8]>::try_from(bytes).ok())
        .ok_or_else(|| StoreError::backend("malformed row index key"))?;
    Ok(u64::from_be_bytes(tail))
}

fn rows_prefix(kind: ForecastKind, location_id: LocationId) -> Vec<u8> {
    format!("{kind}:{location_id}:").into_bytes()
}

fn rows_key(kind: ForecastKind, location_id: LocationId, id: RecordId) -> Vec<u8> {
    let mut key = rows_prefix(kind, location_id);
    key.extend_from_slice(&id.0.to_be_bytes());
    key
}

impl Keyspaces {
    fn open(path: &Path) -> StoreResult<Self> {
        let db = fjall::Database::builder(path)
            .open()
            .map_err(StoreError::backend)?;
        let open = |name: &str| {
            db.keyspace(name, fjall::KeyspaceCreateOptions::default)
                .map_err(StoreError::backend)
        };
        Ok(Self {
            meta: open("meta")?,
            locations: open("locations")?,
            location_names: open("location_names")?,
            aliases: open("aliases")?,
            records: open("records")?,
            record_keys: open("record_keys")?,
            location_rows: open("location_rows")?,
            db,
        })
    }

    /// Reserve the next id. The counter write lands with the rest of the batch.
    fn next_id(&self, batch: &mut OwnedWriteBatch, counter: &[u8]) -> StoreResult<u64> {
        let next = read_json::<u64>(&self.meta, counter)?.unwrap_or(0) + 1;
        stage_json(batch, &self.meta, counter, &next)?;
        Ok(next)
    }

    fn commit(batch: OwnedWriteBatch) -> StoreResult<()> {
        batch.commit().map_err(StoreError::backend)
    }

    fn location(&self, id: LocationId) -> StoreResult<Option<Location>> {
        read_json(&self.locations, &id_key(id.0))
    }

    fn location_via(&self, index: &Keyspace, key: &str) -> StoreResult<Option<Location>> {
        match read_json::<LocationId>(index, key.as_bytes())? {
            Some(id) => self.location(id),
            None => Ok(None),
        }
    }

    fn record_id(&self, kind: ForecastKind, natural_key: &str) -> StoreResult<Option<RecordId>> {
        read_json(
            &self.record_keys,
            record_index_key(kind, natural_key).as_bytes(),
        )
    }

    fn row(&self, id: RecordId) -> StoreResult<Option<RecordRow>> {
        read_json(&self.records, &id_key(id.0))
    }
}

pub struct FjallStore {
    keyspaces: Arc<Keyspaces>,
    write_lock: Mutex<()>,
}

impl FjallStore {
    pub fn open(path: impl AsRef<Path>) -> StoreResult<Self> {
        Ok(Self {
            keyspaces: Arc::new(Keyspaces::open(path.as_ref())?),
            write_lock: Mutex::new(()),
        })
    }

    async fn blocking<T, F>(&self, f: F) -> StoreResult<T>
    where
        T: Send + 'static,
        F: FnOnce(&Keyspaces) -> StoreResult<T> + Send + 'static,
    {
        let keyspaces = Arc::clone(&self.keyspaces);
        task::spawn_blocking(move || f(&keyspaces))
            .await
            .map_err(StoreError::backend)?
    }
}

#[async_trait]
impl<R: WeatherRecord> RecordStore<R> for FjallStore {
    async fn list_for_location(&self, location_id: LocationId) -> StoreResult<Vec<R>> {
        self.blocking(move |ks| {
            let mut records = Vec::new();
            for guard in ks.location_rows.prefix(rows_prefix(R::KIND, location_id)) {
                let key = guard.key().map_err(StoreError::backend)?;
                let id = RecordId(id_from_key(&key)?);
                if let Some(row) = ks.row(id)? {
                    records.push(row.decode::<R>()?.record);
                }
            }
            Ok(records)
        })
        .await
    }

    async fn find_by_key(&self, key: &NaturalKey) -> StoreResult<Option<StoredRecord<R>>> {
        let natural_key = key.to_string();
        self.blocking(move |ks| {
            let Some(id) = ks.record_id(R::KIND, &natural_key)? else {
                return Ok(None);
            };
            ks.row(id)?.map(|row| row.decode::<R>()).transpose()
        })
        .await
    }

    #[instrument(level = "debug", skip_all, fields(kind = %R::KIND))]
    async fn create(&self, record: &R) -> StoreResult<RecordId> {
        let record = record.clone();
        let _guard = self.write_lock.lock().await;
        self.blocking(move |ks| {
            let natural_key = record.natural_key().to_string();
            if ks.record_id(R::KIND, &natural_key)?.is_some() {
                return Err(StoreError::conflict(format!(
                    "{} record {natural_key} already exists",
                    R::KIND
                )));
            }

            let mut batch = ks.db.batch();
            let id = RecordId(ks.next_id(&mut batch, NEXT_RECORD_ID)?);
            let row = RecordRow::encode(id, &record)?;
            stage_json(&mut batch, &ks.records, &id_key(id.0), &row)?;
            stage_json(
                &mut batch,
                &ks.record_keys,
                record_index_key(R::KIND, &natural_key).as_bytes(),
                &id,
            )?;
            batch.insert(
                &ks.location_rows,
                rows_key(R::KIND, row.location_id, id),
                Vec::<u8>::new(),
            );
            Keyspaces::commit(batch)?;
            Ok(id)
        })
        .await
    }

    async fn update(&self, id: RecordId, record: &R) -> StoreResult<()> {
        let record = record.clone();
        let _guard = self.write_lock.lock().await;
        self.blocking(move |ks| {
            let existing = ks
                .row(id)?
                .ok_or_else(|| StoreError::backend(format!("record {id} not found")))?;
            if existing.kind != R::KIND || existing.key != record.natural_key().to_string() {
                return Err(StoreError::conflict(format!(
                    "record {id} belongs to a different natural key"
                )));
            }
            let mut batch = ks.db.batch();
            stage_json(&mut batch, &ks.records, &id_key(id.0), &RecordRow::encode(id, &record)?)?;
            Keyspaces::commit(batch)
        })
        .await
    }
}

#[async_trait]
impl LocationStore for FjallStore {
    async fn list_locations(&self) -> StoreResult<Vec<Location>> {
        self.blocking(|ks| {
            let mut locations = Vec::new();
            for guard in ks.locations.iter() {
                let value = guard.value().map_err(StoreError::backend)?;
                locations.push(serde_json::from_slice(&value)?);
            }
            Ok(locations)
        })
        .await
    }

    async fn get_location(&self, id: LocationId) -> StoreResult<Option<Location>> {
        self.blocking(move |ks| ks.location(id)).await
    }

    async fn find_location_by_name(&self, name: &str) -> StoreResult<Option<Location>> {
        let key = name_index_key(name);
        self.blocking(move |ks| ks.location_via(&ks.location_names, &key))
            .await
    }

    #[instrument(level = "debug", skip(self), fields(name = %location.name))]
    async fn create_location(&self, location: NewLocation) -> StoreResult<Location> {
        let _guard = self.write_lock.lock().await;
        self.blocking(move |ks| {
            let name_key = name_index_key(&location.name);
            if read_json::<LocationId>(&ks.location_names, name_key.as_bytes())?.is_some() {
                return Err(StoreError::conflict(format!(
                    "location '{}' already exists",
                    location.name
                )));
            }

            let mut batch = ks.db.batch();
            let created = Location {
                id: LocationId(ks.next_id(&mut batch, NEXT_LOCATION_ID)?),
                name: location.name,
                latitude: location.latitude,
                longitude: location.longitude,
                country_code: location.country_code,
                timezone: None,
            };
            stage_json(&mut batch, &ks.locations, &id_key(created.id.0), &created)?;
            stage_json(&mut batch, &ks.location_names, name_key.as_bytes(), &created.id)?;
            Keyspaces::commit(batch)?;
            Ok(created)
        })
        .await
    }

    async fn find_alias(&self, alias: &str) -> StoreResult<Option<Location>> {
        let alias = alias.to_string();
        self.blocking(move |ks| ks.location_via(&ks.aliases, &alias))
            .await
    }

    async fn create_alias(&self, alias: &str, location_id: LocationId) -> StoreResult<()> {
        let alias = alias.to_string();
        let _guard = self.write_lock.lock().await;
        self.blocking(move |ks| {
            match read_json::<LocationId>(&ks.aliases, alias.as_bytes())? {
                Some(existing) if existing == location_id => Ok(()),
                Some(existing) => Err(StoreError::conflict(format!(
                    "alias '{alias}' already points at location {existing}"
                ))),
                None => {
                    let mut batch = ks.db.batch();
                    stage_json(&mut batch, &ks.aliases, alias.as_bytes(), &location_id)?;
                    Keyspaces::commit(batch)
                }
            }
        })
        .await
    }

    async fn claim_timezone(&self, id: LocationId, timezone: &str) -> StoreResult<bool> {
        let timezone = timezone.to_string();
        let _guard = self.write_lock.lock().await;
        self.blocking(move |ks| {
            let mut location = ks
                .location(id)?
                .ok_or_else(|| StoreError::backend(format!("location {id} not found")))?;
            if location.timezone.is_some() {
                return Ok(false);
            }
            location.timezone = Some(timezone);
            let mut batch = ks.db.batch();
            stage_json(&mut batch, &ks.locations, &id_key(id.0), &location)?;
            Keyspaces::commit(batch)?;
            Ok(true)
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{DailyForecast, HourlyForecast};
    use chrono::{NaiveDate, Utc};

    fn new_location(name: &str) -> NewLocation {
        NewLocation {
            name: name.to_string(),
            latitude: 59.91,
            longitude: 10.75,
            country_code: "NO".to_string(),
        }
    }

    fn daily(location_id: LocationId, day: u32, max: f64) -> DailyForecast {
        DailyForecast {
            provider: "met-norway".to_string(),
            location_id,
            fetched_at: Utc::now(),
            date: NaiveDate::from_ymd_opt(2024, 5, day).unwrap(),
            temperature_min: Some(1.0),
            temperature_max: Some(max),
            wind_speed_max: None,
            precipitation_sum: None,
            precipitation_probability: None,
            condition: None,
        }
    }

    #[tokio::test]
    async fn test_locations_and_aliases() {
        let dir = tempfile::tempdir().unwrap();
        let store = FjallStore::open(dir.path()).unwrap();

        let oslo = store.create_location(new_location("Oslo")).await.unwrap();
        assert!(store.create_location(new_location("oslo")).await.unwrap_err().is_conflict());
        let bergen = store.create_location(new_location("Bergen")).await.unwrap();
        assert_ne!(oslo.id, bergen.id);

        store.create_alias("oslo", oslo.id).await.unwrap();
        assert!(store.create_alias("oslo", bergen.id).await.unwrap_err().is_conflict());
        assert_eq!(store.find_alias("oslo").await.unwrap().map(|l| l.id), Some(oslo.id));
        assert!(store.find_alias("trondheim").await.unwrap().is_none());

        let all = store.list_locations().await.unwrap();
        assert_eq!(all.len(), 2);
    }

    #[tokio::test]
    async fn test_claim_timezone_persists_first_value() {
        let dir = tempfile::tempdir().unwrap();
        let store = FjallStore::open(dir.path()).unwrap();
        let oslo = store.create_location(new_location("Oslo")).await.unwrap();

        assert!(store.claim_timezone(oslo.id, "Europe/Oslo").await.unwrap());
        assert!(!store.claim_timezone(oslo.id, "Europe/Berlin").await.unwrap());
        let stored = store.get_location(oslo.id).await.unwrap().unwrap();
        assert_eq!(stored.timezone.as_deref(), Some("Europe/Oslo"));
    }

    #[tokio::test]
    async fn test_records_are_indexed_per_location_and_kind() {
        let dir = tempfile::tempdir().unwrap();
        let store = FjallStore::open(dir.path()).unwrap();

        let first = daily(LocationId(1), 1, 15.0);
        let id = RecordStore::<DailyForecast>::create(&store, &first).await.unwrap();
        RecordStore::<DailyForecast>::create(&store, &daily(LocationId(1), 2, 16.0))
            .await
            .unwrap();
        RecordStore::<DailyForecast>::create(&store, &daily(LocationId(2), 1, 9.0))
            .await
            .unwrap();
        assert!(
            RecordStore::<DailyForecast>::create(&store, &first)
                .await
                .unwrap_err()
                .is_conflict()
        );

        RecordStore::<DailyForecast>::update(&store, id, &daily(LocationId(1), 1, 18.0))
            .await
            .unwrap();

        let rows = RecordStore::<DailyForecast>::list_for_location(&store, LocationId(1))
            .await
            .unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].temperature_max, Some(18.0));

        let hourly = RecordStore::<HourlyForecast>::list_for_location(&store, LocationId(1))
            .await
            .unwrap();
        assert!(hourly.is_empty());

        let found = RecordStore::<DailyForecast>::find_by_key(&store, &first.natural_key())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(found.id, id);
    }

    #[test]
    fn test_row_index_key_roundtrip() {
        let key = rows_key(ForecastKind::Hourly, LocationId(1), RecordId(258));
        assert!(key.starts_with(&rows_prefix(ForecastKind::Hourly, LocationId(1))));
        assert!(!key.starts_with(&rows_prefix(ForecastKind::Hourly, LocationId(10))));
        assert_eq!(id_from_key(&key).unwrap(), 258);
        assert!(id_from_key(b"short").is_err());
    }

    #[tokio::test]
    async fn test_row_index_does_not_mix_similar_location_ids() {
        let dir = tempfile::tempdir().unwrap();
        let store = FjallStore::open(dir.path()).unwrap();

        for day in 1..=3 {
            RecordStore::<DailyForecast>::create(&store, &daily(LocationId(1), day, 10.0))
                .await
                .unwrap();
        }
        RecordStore::<DailyForecast>::create(&store, &daily(LocationId(10), 1, 20.0))
            .await
            .unwrap();

        let one = RecordStore::<DailyForecast>::list_for_location(&store, LocationId(1))
            .await
            .unwrap();
        let ten = RecordStore::<DailyForecast>::list_for_location(&store, LocationId(10))
            .await
            .unwrap();
        assert_eq!(one.len(), 3);
        assert!(one.windows(2).all(|w| w[0].date < w[1].date));
        assert_eq!(ten.len(), 1);
        assert_eq!(ten[0].temperature_max, Some(20.0));
    }

    #[tokio::test]
    async fn test_location_create_is_visible_everywhere() {
        let dir = tempfile::tempdir().unwrap();
        let store = FjallStore::open(dir.path()).unwrap();

        let oslo = store.create_location(new_location("Oslo")).await.unwrap();

        assert_eq!(store.list_locations().await.unwrap(), vec![oslo.clone()]);
        assert_eq!(store.get_location(oslo.id).await.unwrap(), Some(oslo.clone()));
        assert_eq!(store.find_location_by_name("OSLO").await.unwrap(), Some(oslo));
    }
}
