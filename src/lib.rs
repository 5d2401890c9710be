//! Weather aggregation with tiered caching
//!
//! Resolves free-text places to canonical locations, fans requests out to
//! several weather providers, and serves record sets from a volatile cache
//! and a durable store before falling back to the providers. A background
//! scheduler keeps known locations fresh.

pub mod app;
pub mod cache;
pub mod config;
pub mod error;
pub mod fetch;
pub mod geocode;
pub mod location_resolver;
pub mod models;
pub mod orchestrator;
pub mod persist;
pub mod scheduler;
pub mod store;
pub mod telemetry;
pub mod weather;

// Re-export core types for public API
pub use app::Services;
pub use cache::{MemoryCache, PersistentCache, VolatileCache};
pub use config::AggregatorConfig;
pub use error::{AggregatorError, CacheError, ProviderError, StoreError};
pub use fetch::FetchFanOut;
pub use geocode::{Geocoder, HttpGeocoder};
pub use location_resolver::LocationResolver;
pub use models::{
    CurrentWeather, DailyForecast, Forecast, ForecastKind, HourlyForecast, Location, LocationId,
    LocationInput, NewLocation, WeatherRecord,
};
pub use orchestrator::{CacheOrchestrator, FreshnessPolicy};
pub use persist::{PersistReport, persist};
pub use scheduler::{CycleReport, Scheduler};
pub use store::{DurableStore, FjallStore, LocationStore, MemoryStore, RecordStore};
pub use weather::WeatherProvider;

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Core result type used throughout the library
pub type Result<T> = std::result::Result<T, AggregatorError>;
