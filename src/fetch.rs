//! Concurrent fetch across every configured provider

use std::sync::Arc;

use chrono::Utc;
use futures::future::join_all;
use tracing::{debug, info, instrument, warn};

use crate::error::AggregatorError;
use crate::models::{Location, WeatherRecord};
use crate::store::LocationStore;
use crate::weather::WeatherProvider;

pub struct FetchFanOut {
    providers: Vec<Arc<dyn WeatherProvider>>,
    locations: Arc<dyn LocationStore>,
}

impl FetchFanOut {
    pub fn new(providers: Vec<Arc<dyn WeatherProvider>>, locations: Arc<dyn LocationStore>) -> Self {
        Self {
            providers,
            locations,
        }
    }

    #[must_use]
    pub fn provider_ids(&self) -> Vec<&'static str> {
        self.providers.iter().map(|p| p.id()).collect()
    }

    /// Query every provider concurrently and return the union of their records.
    ///
    /// All records share one fetch timestamp. A failing provider contributes
    /// nothing; the call only fails when no provider succeeded. Each provider
    /// call is bounded by the HTTP client timeout, there is no overall deadline.
    #[instrument(skip_all, fields(kind = %R::KIND, location = %location.id))]
    pub async fn fetch_all<R: WeatherRecord>(
        &self,
        location: &Location,
    ) -> Result<Vec<R>, AggregatorError> {
        let fetched_at = Utc::now();

        let outcomes = join_all(
            self.providers
                .iter()
                .map(|provider| R::fetch_from(provider.as_ref(), location)),
        )
        .await;

        let mut records = Vec::new();
        let mut failures = Vec::new();
        let mut succeeded = 0usize;
        let mut discovered_timezone: Option<String> = None;

        for (provider, outcome) in self.providers.iter().zip(outcomes) {
            match outcome {
                Ok(parsed) => {
                    succeeded += 1;
                    debug!(
                        provider = provider.id(),
                        count = parsed.records.len(),
                        "Provider succeeded"
                    );
                    if discovered_timezone.is_none() {
                        discovered_timezone = parsed
                            .timezone
                            .filter(|tz| is_valid_timezone(tz, provider.id()));
                    }
                    records.extend(parsed.records.into_iter().map(|mut record| {
                        record.stamp(location.id, fetched_at);
                        record
                    }));
                }
                Err(e) => {
                    warn!(
                        kind = %R::KIND,
                        location = %location.id,
                        provider = provider.id(),
                        error = %e,
                        "Provider fetch failed"
                    );
                    failures.push(e.to_string());
                }
            }
        }

        if succeeded == 0 {
            if failures.is_empty() {
                failures.push("no providers configured".to_string());
            }
            return Err(AggregatorError::AllProvidersFailed {
                kind: R::KIND,
                location: location.name.clone(),
                failures,
            });
        }

        if location.timezone.is_none() {
            if let Some(timezone) = discovered_timezone {
                self.claim_timezone(location, &timezone).await;
            }
        }

        Ok(records)
    }

    /// First observed timezone wins; the store rejects later claims.
    async fn claim_timezone(&self, location: &Location, timezone: &str) {
        match self.locations.claim_timezone(location.id, timezone).await {
            Ok(true) => info!(location = %location.id, timezone, "Timezone recorded"),
            Ok(false) => debug!(location = %location.id, timezone, "Timezone already set"),
            Err(e) => warn!(location = %location.id, timezone, error = %e, "Failed to record timezone"),
        }
    }
}

fn is_valid_timezone(timezone: &str, provider: &str) -> bool {
    if timezone.parse::<chrono_tz::Tz>().is_ok() {
        true
    } else {
        warn!(provider, timezone, "Ignoring unknown timezone");
        false
    }
}
