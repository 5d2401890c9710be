//! Data models for the weather aggregator
//!
//! This module contains the core domain models organized by concern:
//! - Location: canonical places, aliases and raw location input
//! - Weather: the three record shapes and their shared capability trait

pub mod location;
pub mod weather;

// Re-export all public types for convenient access
pub use location::{
    Location, LocationAlias, LocationId, LocationInput, NewLocation, normalize_alias,
    valid_coordinates,
};
pub use weather::{
    CurrentWeather, DailyForecast, Forecast, ForecastKind, HourlyForecast, Measurements,
    NaturalKey, Parsed, SlotKey, WeatherRecord,
};
