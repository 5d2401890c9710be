//! Error types and handling for the weather aggregation pipeline

use thiserror::Error;

use crate::models::ForecastKind;

/// Failure of a single weather provider call. Never fatal to sibling providers.
#[derive(Error, Debug)]
pub enum ProviderError {
    /// Network or HTTP-level failure (connect, timeout, non-success status)
    #[error("{provider}: transport error: {message}")]
    Transport {
        provider: &'static str,
        message: String,
    },

    /// The provider answered but the payload could not be decoded
    #[error("{provider}: parse error: {message}")]
    Parse {
        provider: &'static str,
        message: String,
    },
}

impl ProviderError {
    /// Create a new transport error
    pub fn transport<S: Into<String>>(provider: &'static str, message: S) -> Self {
        Self::Transport {
            provider,
            message: message.into(),
        }
    }

    /// Create a new parse error
    pub fn parse<S: Into<String>>(provider: &'static str, message: S) -> Self {
        Self::Parse {
            provider,
            message: message.into(),
        }
    }

    /// Identifier of the provider that failed
    #[must_use]
    pub fn provider(&self) -> &'static str {
        match self {
            ProviderError::Transport { provider, .. } | ProviderError::Parse { provider, .. } => {
                provider
            }
        }
    }
}

/// Durable store failures
#[derive(Error, Debug)]
pub enum StoreError {
    /// The backend is unreachable or failed the operation
    #[error("Store backend error: {message}")]
    Backend { message: String },

    /// A uniqueness rule was violated (natural key, canonical name, alias)
    #[error("Store conflict: {message}")]
    Conflict { message: String },

    /// A stored row could not be encoded or decoded
    #[error("Store serialization error: {source}")]
    Serialization {
        #[from]
        source: serde_json::Error,
    },
}

impl StoreError {
    pub fn backend<E: std::fmt::Display>(err: E) -> Self {
        Self::Backend {
            message: err.to_string(),
        }
    }

    pub fn conflict<S: Into<String>>(message: S) -> Self {
        Self::Conflict {
            message: message.into(),
        }
    }

    #[must_use]
    pub fn is_conflict(&self) -> bool {
        matches!(self, StoreError::Conflict { .. })
    }
}

/// Volatile cache failures. Always degraded to a miss by callers.
#[derive(Error, Debug)]
pub enum CacheError {
    #[error("Cache backend error: {message}")]
    Backend { message: String },

    #[error("Cache entry encoding error: {message}")]
    Encoding { message: String },
}

impl CacheError {
    pub fn backend<E: std::fmt::Display>(err: E) -> Self {
        Self::Backend {
            message: err.to_string(),
        }
    }

    pub fn encoding<E: std::fmt::Display>(err: E) -> Self {
        Self::Encoding {
            message: err.to_string(),
        }
    }
}

/// Main error type surfaced by the aggregation core
#[derive(Error, Debug)]
pub enum AggregatorError {
    /// Every configured provider failed for one fetch
    #[error("All providers failed for {kind} weather at location {location}: {}", failures.join("; "))]
    AllProvidersFailed {
        kind: ForecastKind,
        location: String,
        failures: Vec<String>,
    },

    /// Durable store failure on a read path
    #[error(transparent)]
    Store(#[from] StoreError),

    /// The geocoding collaborator could not resolve the input
    #[error("Geocoding failed for '{query}': {message}")]
    Geocode { query: String, message: String },

    /// Input could not be turned into a Location
    #[error("Invalid location: {message}")]
    Resolution { message: String },

    /// Configuration-related errors
    #[error("Configuration error: {message}")]
    Config { message: String },
}

impl AggregatorError {
    /// Create a new geocoding error
    pub fn geocode<Q: Into<String>, S: Into<String>>(query: Q, message: S) -> Self {
        Self::Geocode {
            query: query.into(),
            message: message.into(),
        }
    }

    /// Create a new resolution error
    pub fn resolution<S: Into<String>>(message: S) -> Self {
        Self::Resolution {
            message: message.into(),
        }
    }

    /// Create a new configuration error
    pub fn config<S: Into<String>>(message: S) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    /// Get a user-friendly error message
    #[must_use]
    pub fn user_message(&self) -> String {
        match self {
            AggregatorError::AllProvidersFailed { .. } => {
                "No weather data available right now. Please try again later.".to_string()
            }
            AggregatorError::Store(_) => {
                "No weather data available: the weather store is unreachable.".to_string()
            }
            AggregatorError::Geocode { query, .. } => {
                format!("Location not found: {query}")
            }
            AggregatorError::Resolution { message } => format!("Invalid location: {message}"),
            AggregatorError::Config { .. } => {
                "Configuration error. Please check your config file.".to_string()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_creation() {
        let err = AggregatorError::geocode("Atlantis", "no results");
        assert!(matches!(err, AggregatorError::Geocode { .. }));

        let err = AggregatorError::resolution("empty input");
        assert!(matches!(err, AggregatorError::Resolution { .. }));

        let err = ProviderError::transport("open-meteo", "HTTP 503");
        assert_eq!(err.provider(), "open-meteo");
        assert!(err.to_string().contains("transport error"));
    }

    #[test]
    fn test_user_messages() {
        let err = AggregatorError::AllProvidersFailed {
            kind: ForecastKind::Current,
            location: "1".to_string(),
            failures: vec!["a: down".to_string()],
        };
        assert!(err.user_message().contains("No weather data available"));
        assert!(err.to_string().contains("a: down"));

        let err = AggregatorError::geocode("Atlantis", "no results");
        assert!(err.user_message().contains("Atlantis"));
    }

    #[test]
    fn test_store_error_conversion() {
        let store_err = StoreError::backend("connection refused");
        let err: AggregatorError = store_err.into();
        assert!(matches!(err, AggregatorError::Store(StoreError::Backend { .. })));
        assert!(StoreError::conflict("dup").is_conflict());
    }
}
