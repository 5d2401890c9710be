//! Best-effort upsert of fetched records into the durable store

use tracing::{debug, instrument, warn};

use crate::models::{NaturalKey, WeatherRecord};
use crate::store::{RecordId, RecordStore, StoreResult};

/// One record write keyed by (location, provider, slot)
#[derive(Debug, Clone)]
pub struct Upsert<'a, R> {
    pub key: NaturalKey,
    pub record: &'a R,
}

impl<'a, R: WeatherRecord> Upsert<'a, R> {
    pub fn new(record: &'a R) -> Self {
        Self {
            key: record.natural_key(),
            record,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpsertOutcome {
    Created,
    Updated,
}

/// Counts from one persistence pass
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PersistReport {
    pub created: usize,
    pub updated: usize,
    pub failed: usize,
}

impl PersistReport {
    #[must_use]
    pub fn total(&self) -> usize {
        self.created + self.updated + self.failed
    }
}

/// Create the row if its natural key is unknown, otherwise update it in place.
///
/// A create that loses a race against a concurrent writer is retried as an update.
pub async fn upsert<R, S>(store: &S, op: &Upsert<'_, R>) -> StoreResult<UpsertOutcome>
where
    R: WeatherRecord,
    S: RecordStore<R> + ?Sized,
{
    if let Some(existing) = store.find_by_key(&op.key).await? {
        store.update(existing.id, op.record).await?;
        return Ok(UpsertOutcome::Updated);
    }

    match store.create(op.record).await {
        Ok(_) => Ok(UpsertOutcome::Created),
        Err(e) if e.is_conflict() => {
            debug!(key = %op.key, "Concurrent create, updating instead");
            let id: RecordId = store
                .find_by_key(&op.key)
                .await?
                .map(|existing| existing.id)
                .ok_or(e)?;
            store.update(id, op.record).await?;
            Ok(UpsertOutcome::Updated)
        }
        Err(e) => Err(e),
    }
}

/// Upsert every record. Failures are logged per record and never abort
/// the siblings or reach the caller.
#[instrument(skip_all, fields(kind = %R::KIND, count = records.len()))]
pub async fn persist<R, S>(store: &S, records: &[R]) -> PersistReport
where
    R: WeatherRecord,
    S: RecordStore<R> + ?Sized,
{
    let mut report = PersistReport::default();

    for record in records {
        match upsert(store, &Upsert::new(record)).await {
            Ok(UpsertOutcome::Created) => report.created += 1,
            Ok(UpsertOutcome::Updated) => report.updated += 1,
            Err(e) => {
                report.failed += 1;
                warn!(
                    kind = %R::KIND,
                    location = %record.location_id(),
                    provider = record.provider(),
                    slot = %record.slot(),
                    error = %e,
                    "Failed to persist weather record"
                );
            }
        }
    }

    debug!(
        created = report.created,
        updated = report.updated,
        failed = report.failed,
        "Persisted weather records"
    );
    report
}
