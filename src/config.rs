//! Configuration management for the weather aggregator
//!
//! Handles loading configuration from files, environment variables,
//! and provides validation for all configuration settings.

use crate::AggregatorError;
use crate::models::ForecastKind;
use anyhow::{Context, Result};
use config::{Config, Environment, File};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

const APP_DIR: &str = "weather-aggregator";

/// Root configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AggregatorConfig {
    /// Upstream weather providers
    #[serde(default)]
    pub providers: ProvidersConfig,
    /// Durable and volatile freshness windows per kind
    #[serde(default)]
    pub freshness: FreshnessConfig,
    /// Volatile cache backend
    #[serde(default)]
    pub cache: CacheConfig,
    /// Durable store backend
    #[serde(default)]
    pub store: StoreConfig,
    /// Geocoding collaborator
    #[serde(default)]
    pub geocoding: GeocodingConfig,
    /// Background refresh
    #[serde(default)]
    pub scheduler: SchedulerConfig,
    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Provider client settings shared by every provider
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProvidersConfig {
    /// Request timeout in seconds, applied to each provider call
    pub timeout_seconds: u32,
    /// User agent sent upstream (MET Norway rejects anonymous clients)
    pub user_agent: String,
    pub open_meteo: EndpointConfig,
    pub met_norway: EndpointConfig,
    pub weather_api: WeatherApiConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EndpointConfig {
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    pub base_url: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WeatherApiConfig {
    pub enabled: bool,
    pub base_url: String,
    /// API key, the provider is skipped without one
    pub api_key: Option<String>,
}

/// Freshness windows for one kind, in minutes
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct KindFreshness {
    pub durable_ttl_minutes: u32,
    pub volatile_ttl_minutes: u32,
}

impl KindFreshness {
    #[must_use]
    pub fn durable_ttl(&self) -> Duration {
        Duration::from_secs(u64::from(self.durable_ttl_minutes) * 60)
    }

    #[must_use]
    pub fn volatile_ttl(&self) -> Duration {
        Duration::from_secs(u64::from(self.volatile_ttl_minutes) * 60)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FreshnessConfig {
    pub current: KindFreshness,
    pub hourly: KindFreshness,
    pub daily: KindFreshness,
}

impl FreshnessConfig {
    #[must_use]
    pub fn for_kind(&self, kind: ForecastKind) -> KindFreshness {
        match kind {
            ForecastKind::Current => self.current,
            ForecastKind::Hourly => self.hourly,
            ForecastKind::Daily => self.daily,
        }
    }
}

/// Volatile cache configuration settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// "memory" or "fjall"
    pub backend: String,
    /// Cache directory for the fjall backend
    pub path: String,
}

/// Durable store configuration settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// "memory" or "fjall"
    pub backend: String,
    /// Data directory for the fjall backend
    pub path: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GeocodingConfig {
    /// Forward geocoding (Open-Meteo geocoding API)
    pub search_base_url: String,
    /// Reverse geocoding (Nominatim)
    pub reverse_base_url: String,
    pub max_retries: u32,
    pub timeout_seconds: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    pub enabled: bool,
    pub current_interval_minutes: u32,
    pub hourly_interval_minutes: u32,
    pub daily_interval_minutes: u32,
    /// Upper bound of the random delay before each location refresh, 0 disables
    pub jitter_seconds: u32,
}

impl SchedulerConfig {
    #[must_use]
    pub fn interval(&self, kind: ForecastKind) -> Duration {
        let minutes = match kind {
            ForecastKind::Current => self.current_interval_minutes,
            ForecastKind::Hourly => self.hourly_interval_minutes,
            ForecastKind::Daily => self.daily_interval_minutes,
        };
        Duration::from_secs(u64::from(minutes) * 60)
    }
}

/// Logging configuration settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level (error, warn, info, debug, trace)
    pub level: String,
    /// Log format (pretty or json)
    pub format: String,
}

// Default value functions
fn default_enabled() -> bool {
    true
}

fn default_open_meteo_base_url() -> String {
    "https://api.open-meteo.com/v1".to_string()
}

fn default_met_norway_base_url() -> String {
    "https://api.met.no/weatherapi/locationforecast/2.0".to_string()
}

fn default_weather_api_base_url() -> String {
    "https://api.weatherapi.com/v1".to_string()
}

fn default_user_agent() -> String {
    format!("{APP_DIR}/{} github.com/weather-aggregator", env!("CARGO_PKG_VERSION"))
}

fn default_data_path(leaf: &str) -> String {
    dirs::data_dir()
        .map(|dir| dir.join(APP_DIR).join(leaf))
        .unwrap_or_else(|| PathBuf::from(format!(".{APP_DIR}")).join(leaf))
        .to_string_lossy()
        .into_owned()
}

fn default_cache_path() -> String {
    dirs::cache_dir()
        .map(|dir| dir.join(APP_DIR))
        .unwrap_or_else(|| PathBuf::from(format!(".{APP_DIR}-cache")))
        .to_string_lossy()
        .into_owned()
}

impl Default for ProvidersConfig {
    fn default() -> Self {
        Self {
            timeout_seconds: 10,
            user_agent: default_user_agent(),
            open_meteo: EndpointConfig {
                enabled: true,
                base_url: default_open_meteo_base_url(),
            },
            met_norway: EndpointConfig {
                enabled: true,
                base_url: default_met_norway_base_url(),
            },
            weather_api: WeatherApiConfig::default(),
        }
    }
}

impl Default for WeatherApiConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            base_url: default_weather_api_base_url(),
            api_key: None,
        }
    }
}

impl Default for FreshnessConfig {
    fn default() -> Self {
        Self {
            current: KindFreshness {
                durable_ttl_minutes: 10,
                volatile_ttl_minutes: 5,
            },
            hourly: KindFreshness {
                durable_ttl_minutes: 60,
                volatile_ttl_minutes: 55,
            },
            daily: KindFreshness {
                durable_ttl_minutes: 360,
                volatile_ttl_minutes: 355,
            },
        }
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            backend: "memory".to_string(),
            path: default_cache_path(),
        }
    }
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            backend: "fjall".to_string(),
            path: default_data_path("store"),
        }
    }
}

impl Default for GeocodingConfig {
    fn default() -> Self {
        Self {
            search_base_url: "https://geocoding-api.open-meteo.com/v1".to_string(),
            reverse_base_url: "https://nominatim.openstreetmap.org".to_string(),
            max_retries: 3,
            timeout_seconds: 10,
        }
    }
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            current_interval_minutes: 10,
            hourly_interval_minutes: 60,
            daily_interval_minutes: 360,
            jitter_seconds: 30,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "pretty".to_string(),
        }
    }
}

impl AggregatorConfig {
    /// Load configuration from file and environment variables
    pub fn load() -> Result<Self> {
        Self::load_from_path(None)
    }

    /// Load configuration from specified path
    pub fn load_from_path(config_path: Option<PathBuf>) -> Result<Self> {
        let mut builder = Config::builder();

        let config_file = config_path.unwrap_or_else(|| {
            Self::get_config_path().unwrap_or_else(|| PathBuf::from("config.toml"))
        });

        if config_file.exists() {
            builder = builder.add_source(
                File::from(config_file.clone())
                    .required(false)
                    .format(config::FileFormat::Toml),
            );
        }

        // WXAGG_PROVIDERS__WEATHER_API__API_KEY=... style overrides
        builder = builder.add_source(
            Environment::with_prefix("WXAGG")
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        );

        let settings = builder
            .build()
            .with_context(|| "Failed to build configuration")?;

        let config: AggregatorConfig = settings
            .try_deserialize()
            .with_context(|| "Failed to deserialize configuration")?;

        config.validate()?;

        Ok(config)
    }

    /// Get the default configuration file path
    #[must_use]
    pub fn get_config_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join(APP_DIR).join("config.toml"))
    }

    /// Validate all configuration settings
    pub fn validate(&self) -> Result<()> {
        self.validate_api_keys()?;
        self.validate_freshness()?;
        self.validate_numeric_ranges()?;
        self.validate_string_values()?;
        Ok(())
    }

    /// Validate API keys and credentials
    pub fn validate_api_keys(&self) -> Result<()> {
        if let Some(api_key) = &self.providers.weather_api.api_key {
            if api_key.is_empty() {
                return Err(AggregatorError::config(
                    "WeatherAPI key cannot be empty if provided. Either remove it or provide a valid key.",
                )
                .into());
            }

            if api_key.len() < 8 || api_key.len() > 100 {
                return Err(AggregatorError::config(
                    "WeatherAPI key appears to be invalid. Please check your API key.",
                )
                .into());
            }
        }

        Ok(())
    }

    /// The volatile tier must expire before the durable tier it mirrors
    fn validate_freshness(&self) -> Result<()> {
        for kind in ForecastKind::ALL {
            let window = self.freshness.for_kind(kind);
            if window.durable_ttl_minutes == 0 {
                return Err(AggregatorError::config(format!(
                    "Durable TTL for {kind} weather must be greater than zero"
                ))
                .into());
            }
            if window.volatile_ttl_minutes >= window.durable_ttl_minutes {
                return Err(AggregatorError::config(format!(
                    "Volatile TTL for {kind} weather ({} min) must be shorter than its durable TTL ({} min)",
                    window.volatile_ttl_minutes, window.durable_ttl_minutes
                ))
                .into());
            }
        }
        Ok(())
    }

    /// Validate numeric configuration ranges
    fn validate_numeric_ranges(&self) -> Result<()> {
        if self.providers.timeout_seconds == 0 || self.providers.timeout_seconds > 300 {
            return Err(AggregatorError::config(
                "Provider timeout must be between 1 and 300 seconds",
            )
            .into());
        }

        if self.geocoding.timeout_seconds == 0 || self.geocoding.timeout_seconds > 300 {
            return Err(AggregatorError::config(
                "Geocoding timeout must be between 1 and 300 seconds",
            )
            .into());
        }

        if self.geocoding.max_retries > 10 {
            return Err(AggregatorError::config("Geocoding max retries cannot exceed 10").into());
        }

        for kind in ForecastKind::ALL {
            if self.scheduler.interval(kind).is_zero() {
                return Err(AggregatorError::config(format!(
                    "Scheduler interval for {kind} weather must be greater than zero"
                ))
                .into());
            }
        }

        Ok(())
    }

    /// Validate string configuration values
    fn validate_string_values(&self) -> Result<()> {
        let valid_log_levels = ["error", "warn", "info", "debug", "trace"];
        if !valid_log_levels.contains(&self.logging.level.as_str()) {
            return Err(AggregatorError::config(format!(
                "Invalid log level '{}'. Must be one of: {}",
                self.logging.level,
                valid_log_levels.join(", ")
            ))
            .into());
        }

        let valid_log_formats = ["pretty", "json"];
        if !valid_log_formats.contains(&self.logging.format.as_str()) {
            return Err(AggregatorError::config(format!(
                "Invalid log format '{}'. Must be one of: {}",
                self.logging.format,
                valid_log_formats.join(", ")
            ))
            .into());
        }

        let valid_backends = ["memory", "fjall"];
        for (name, backend) in [
            ("cache", &self.cache.backend),
            ("store", &self.store.backend),
        ] {
            if !valid_backends.contains(&backend.as_str()) {
                return Err(AggregatorError::config(format!(
                    "Invalid {name} backend '{backend}'. Must be one of: {}",
                    valid_backends.join(", ")
                ))
                .into());
            }
        }

        let urls = [
            ("Open-Meteo", &self.providers.open_meteo.base_url),
            ("MET Norway", &self.providers.met_norway.base_url),
            ("WeatherAPI", &self.providers.weather_api.base_url),
            ("Geocoding search", &self.geocoding.search_base_url),
            ("Reverse geocoding", &self.geocoding.reverse_base_url),
        ];
        for (name, url) in urls {
            if !url.starts_with("http://") && !url.starts_with("https://") {
                return Err(AggregatorError::config(format!(
                    "{name} base URL must be a valid HTTP or HTTPS URL"
                ))
                .into());
            }
        }

        Ok(())
    }
}
