//! Background refresh of every known location
//!
//! One interval loop per forecast kind. Each tick lists the known locations
//! and refreshes them concurrently, one task per location with no upper
//! bound. That is fine for single or low double digit location counts; a
//! larger deployment needs a bounded worker pool here.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use futures::future::join_all;
use rand::RngExt;
use tokio::time::{MissedTickBehavior, interval_at, sleep};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info, instrument, warn};

use crate::config::SchedulerConfig;
use crate::error::AggregatorError;
use crate::models::{ForecastKind, Location};
use crate::orchestrator::CacheOrchestrator;
use crate::store::DurableStore;

/// Outcome of one refresh cycle for one kind
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CycleReport {
    pub kind: ForecastKind,
    pub locations: usize,
    pub refreshed: usize,
    pub failed: usize,
}

struct Shared<S: ?Sized> {
    orchestrator: Arc<CacheOrchestrator<S>>,
    config: SchedulerConfig,
    active_cycles: [AtomicUsize; 3],
    started: AtomicBool,
    cancel: CancellationToken,
    tracker: TaskTracker,
}

fn kind_slot(kind: ForecastKind) -> usize {
    match kind {
        ForecastKind::Current => 0,
        ForecastKind::Hourly => 1,
        ForecastKind::Daily => 2,
    }
}

/// Clears the running state when a cycle ends, including on early return.
struct CycleGuard<'a>(&'a AtomicUsize);

impl Drop for CycleGuard<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

pub struct Scheduler<S: ?Sized> {
    shared: Arc<Shared<S>>,
}

impl<S: DurableStore + ?Sized + 'static> Scheduler<S> {
    pub fn new(orchestrator: Arc<CacheOrchestrator<S>>, config: SchedulerConfig) -> Self {
        Self {
            shared: Arc::new(Shared {
                orchestrator,
                config,
                active_cycles: [AtomicUsize::new(0), AtomicUsize::new(0), AtomicUsize::new(0)],
                started: AtomicBool::new(false),
                cancel: CancellationToken::new(),
                tracker: TaskTracker::new(),
            }),
        }
    }

    /// Start one interval loop per kind. The first cycle runs one interval from now.
    ///
    /// A scheduler starts at most once. Later calls, including after
    /// [`stop`](Self::stop), are ignored; build a new scheduler to restart.
    pub fn start(&self) {
        if self.shared.started.swap(true, Ordering::SeqCst) {
            warn!("Scheduler already started, ignoring start");
            return;
        }

        for kind in ForecastKind::ALL {
            let shared = Arc::clone(&self.shared);
            let period = shared.config.interval(kind);
            info!(kind = %kind, interval_secs = period.as_secs(), "Starting refresh loop");

            self.shared.tracker.spawn(async move {
                let mut ticker = interval_at(tokio::time::Instant::now() + period, period);
                ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

                loop {
                    tokio::select! {
                        () = shared.cancel.cancelled() => break,
                        _ = ticker.tick() => {
                            if let Err(e) = Self::cycle(&shared, kind).await {
                                error!(kind = %kind, error = %e, "Refresh cycle skipped");
                            }
                        }
                    }
                }
                debug!(kind = %kind, "Refresh loop stopped");
            });
        }
    }

    /// Run one refresh cycle for `kind` now and wait for every location to finish.
    pub async fn run_cycle(&self, kind: ForecastKind) -> Result<CycleReport, AggregatorError> {
        Self::cycle(&self.shared, kind).await
    }

    #[must_use]
    pub fn is_running(&self, kind: ForecastKind) -> bool {
        self.shared.active_cycles[kind_slot(kind)].load(Ordering::SeqCst) > 0
    }

    /// Halt the timers and wait for in-flight refreshes to complete.
    pub async fn stop(&self) {
        self.stop_nowait();
        self.shared.tracker.wait().await;
        info!("Scheduler stopped");
    }

    /// Halt the timers without waiting for in-flight refreshes.
    pub fn stop_nowait(&self) {
        self.shared.cancel.cancel();
        self.shared.tracker.close();
    }

    #[instrument(skip(shared))]
    async fn cycle(shared: &Arc<Shared<S>>, kind: ForecastKind) -> Result<CycleReport, AggregatorError> {
        let counter = &shared.active_cycles[kind_slot(kind)];
        counter.fetch_add(1, Ordering::SeqCst);
        let _guard = CycleGuard(counter);

        let locations = shared.orchestrator.store().list_locations().await?;
        debug!(count = locations.len(), "Refreshing locations");

        let handles: Vec<_> = locations
            .into_iter()
            .map(|location| {
                let delay = start_jitter(shared.config.jitter_seconds);
                let shared = Arc::clone(shared);
                shared.tracker.clone().spawn(async move {
                    refresh_location(&shared, location, kind, delay).await
                })
            })
            .collect();

        let mut report = CycleReport {
            kind,
            locations: handles.len(),
            refreshed: 0,
            failed: 0,
        };
        for outcome in join_all(handles).await {
            match outcome {
                Ok(true) => report.refreshed += 1,
                Ok(false) => report.failed += 1,
                Err(e) => {
                    report.failed += 1;
                    error!(kind = %kind, error = %e, "Refresh task panicked");
                }
            }
        }

        info!(
            kind = %kind,
            locations = report.locations,
            refreshed = report.refreshed,
            failed = report.failed,
            "Refresh cycle complete"
        );
        Ok(report)
    }
}

/// Random start delay in `[0, max_seconds)`, zero when disabled
fn start_jitter(max_seconds: u32) -> Duration {
    if max_seconds == 0 {
        return Duration::ZERO;
    }
    let millis = rand::rng().random_range(0..u64::from(max_seconds) * 1000);
    Duration::from_millis(millis)
}

/// Refresh one location. Returns whether the refresh succeeded.
async fn refresh_location<S: DurableStore + ?Sized + 'static>(
    shared: &Shared<S>,
    location: Location,
    kind: ForecastKind,
    delay: Duration,
) -> bool {
    if !delay.is_zero() {
        tokio::select! {
            () = shared.cancel.cancelled() => {
                debug!(location = %location.id, "Shutdown before refresh started");
                return false;
            }
            () = sleep(delay) => {}
        }
    }

    match shared.orchestrator.refresh_kind(&location, kind).await {
        Ok(_) => true,
        Err(e) => {
            warn!(
                kind = %kind,
                location = %location.id,
                error = %e,
                "Location refresh failed"
            );
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_jitter_disabled() {
        assert_eq!(start_jitter(0), Duration::ZERO);
    }

    #[test]
    fn test_jitter_is_bounded() {
        for _ in 0..100 {
            assert!(start_jitter(2) < Duration::from_secs(2));
        }
    }
}
