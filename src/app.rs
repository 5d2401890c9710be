//! Wiring of the configured backends, providers and services

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use tracing::info;

use crate::cache::{MemoryCache, PersistentCache, VolatileCache};
use crate::config::{AggregatorConfig, CacheConfig, StoreConfig};
use crate::fetch::FetchFanOut;
use crate::geocode::HttpGeocoder;
use crate::location_resolver::LocationResolver;
use crate::orchestrator::{CacheOrchestrator, FreshnessPolicy};
use crate::scheduler::Scheduler;
use crate::store::{DurableStore, FjallStore, LocationStore, MemoryStore};
use crate::weather::{build_http_client, providers_from_config};

/// Fully assembled pipeline
pub struct Services {
    pub resolver: LocationResolver,
    pub orchestrator: Arc<CacheOrchestrator<dyn DurableStore>>,
    pub scheduler: Scheduler<dyn DurableStore>,
}

impl Services {
    pub fn from_config(config: &AggregatorConfig) -> Result<Self> {
        let (store, locations) = open_store(&config.store)?;
        let cache = open_cache(&config.cache)?;

        let client = build_http_client(&config.providers)?;
        let providers = providers_from_config(&config.providers, client);
        if providers.is_empty() {
            bail!("No weather providers are enabled");
        }
        let fan_out = FetchFanOut::new(providers, Arc::clone(&locations));
        info!(providers = ?fan_out.provider_ids(), "Weather providers configured");

        let geocoder = Arc::new(HttpGeocoder::new(
            &config.geocoding,
            &config.providers.user_agent,
        )?);

        let orchestrator = Arc::new(CacheOrchestrator::new(
            store,
            cache,
            fan_out,
            FreshnessPolicy::new(config.freshness.clone()),
        ));

        Ok(Self {
            resolver: LocationResolver::new(locations, geocoder),
            scheduler: Scheduler::new(Arc::clone(&orchestrator), config.scheduler.clone()),
            orchestrator,
        })
    }
}

fn open_store(config: &StoreConfig) -> Result<(Arc<dyn DurableStore>, Arc<dyn LocationStore>)> {
    match config.backend.as_str() {
        "memory" => {
            let store = Arc::new(MemoryStore::new());
            let durable: Arc<dyn DurableStore> = store.clone();
            let locations: Arc<dyn LocationStore> = store;
            Ok((durable, locations))
        }
        "fjall" => {
            let path = PathBuf::from(&config.path);
            std::fs::create_dir_all(&path)
                .with_context(|| format!("Failed to create store directory: {}", path.display()))?;
            let store = Arc::new(
                FjallStore::open(&path)
                    .with_context(|| format!("Failed to open store at {}", path.display()))?,
            );
            info!(path = %path.display(), "Opened durable store");
            let durable: Arc<dyn DurableStore> = store.clone();
            let locations: Arc<dyn LocationStore> = store;
            Ok((durable, locations))
        }
        other => bail!("Unknown store backend '{other}'"),
    }
}

fn open_cache(config: &CacheConfig) -> Result<Arc<dyn VolatileCache>> {
    match config.backend.as_str() {
        "memory" => Ok(Arc::new(MemoryCache::new())),
        "fjall" => {
            let path = PathBuf::from(&config.path);
            std::fs::create_dir_all(&path)
                .with_context(|| format!("Failed to create cache directory: {}", path.display()))?;
            let cache = PersistentCache::open(&path)
                .with_context(|| format!("Failed to open cache at {}", path.display()))?;
            Ok(Arc::new(cache))
        }
        other => bail!("Unknown cache backend '{other}'"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_services_from_memory_config() {
        let mut config = AggregatorConfig::default();
        config.store.backend = "memory".to_string();

        let services = Services::from_config(&config).unwrap();
        assert!(!services.scheduler.is_running(crate::models::ForecastKind::Current));
    }

    #[test]
    fn test_no_providers_is_an_error() {
        let mut config = AggregatorConfig::default();
        config.store.backend = "memory".to_string();
        config.providers.open_meteo.enabled = false;
        config.providers.met_norway.enabled = false;

        assert!(Services::from_config(&config).is_err());
    }
}
