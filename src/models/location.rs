//! Location model, aliases and raw location input

use std::fmt;

use serde::{Deserialize, Serialize};
use unicode_normalization::UnicodeNormalization;
use unicode_normalization::char::is_combining_mark;

use crate::error::AggregatorError;

/// Opaque identity of a canonical location
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct LocationId(pub u64);

impl fmt::Display for LocationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Canonical location. Exactly one exists per real-world place.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct Location {
    pub id: LocationId,
    /// Canonical city name as returned by the geocoder
    pub name: String,
    /// Latitude in decimal degrees
    pub latitude: f64,
    /// Longitude in decimal degrees
    pub longitude: f64,
    /// Country code (ISO 3166-1 alpha-2)
    pub country_code: String,
    /// IANA timezone, claimed by the first provider that reports one
    pub timezone: Option<String>,
}

impl Location {
    /// Coordinates formatted for provider requests (2 decimal places)
    #[must_use]
    pub fn request_coordinates(&self) -> (String, String) {
        (
            format!("{:.2}", self.latitude),
            format!("{:.2}", self.longitude),
        )
    }

    /// Round coordinates to the given precision
    #[must_use]
    pub fn rounded_coordinates(&self, precision: u32) -> (f64, f64) {
        let multiplier = 10_f64.powi(i32::try_from(precision).unwrap_or(2));
        let lat = (self.latitude * multiplier).round() / multiplier;
        let lon = (self.longitude * multiplier).round() / multiplier;
        (lat, lon)
    }
}

/// A geocoded place that does not have an identity yet
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct NewLocation {
    pub name: String,
    pub latitude: f64,
    pub longitude: f64,
    pub country_code: String,
}

/// Normalized alias key pointing at a canonical location
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct LocationAlias {
    pub alias: String,
    pub location_id: LocationId,
}

/// Normalize free-text place input into an alias key.
///
/// Decomposes to NFKD, strips combining marks, lowercases and collapses
/// whitespace, so "  Kraków ", "KRAKOW" and "krakow" share one key.
#[must_use]
pub fn normalize_alias(input: &str) -> String {
    let folded: String = input
        .nfkd()
        .filter(|c| !is_combining_mark(*c))
        .collect::<String>()
        .to_lowercase();

    folded.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Raw user input for location resolution
#[derive(Debug, Clone, PartialEq)]
pub enum LocationInput {
    /// Coordinates (latitude, longitude)
    Coordinates(f64, f64),
    /// Place name (city, region, etc.)
    Name(String),
}

impl LocationInput {
    /// Parse raw input: "lat,lon" or "lat lon" within valid ranges become
    /// coordinates, anything else is treated as a place name.
    pub fn parse(input: &str) -> Result<Self, AggregatorError> {
        let input = input.trim();
        if input.is_empty() {
            return Err(AggregatorError::resolution("Location cannot be empty"));
        }

        if let Some((lat, lon)) = Self::parse_coordinates(input) {
            return Ok(LocationInput::Coordinates(lat, lon));
        }

        Ok(LocationInput::Name(input.to_string()))
    }

    fn parse_coordinates(input: &str) -> Option<(f64, f64)> {
        let parts: Vec<&str> = input
            .split(|c: char| c == ',' || c.is_whitespace())
            .filter(|s| !s.is_empty())
            .collect();

        if parts.len() != 2 {
            return None;
        }

        let lat = parts[0].parse::<f64>().ok()?;
        let lon = parts[1].parse::<f64>().ok()?;

        valid_coordinates(lat, lon).then_some((lat, lon))
    }
}

/// Whether a coordinate pair lies within WGS84 ranges
#[must_use]
pub fn valid_coordinates(lat: f64, lon: f64) -> bool {
    (-90.0..=90.0).contains(&lat) && (-180.0..=180.0).contains(&lon)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    fn testville() -> Location {
        Location {
            id: LocationId(1),
            name: "Testville".to_string(),
            latitude: 51.1079,
            longitude: 17.0385,
            country_code: "PL".to_string(),
            timezone: None,
        }
    }

    #[rstest]
    #[case("New York", "new york")]
    #[case("new york ", "new york")]
    #[case("NEW YORK", "new york")]
    #[case("  New   York  ", "new york")]
    #[case("Kraków", "krakow")]
    #[case("Zürich", "zurich")]
    #[case("São\tPaulo", "sao paulo")]
    fn test_normalize_alias(#[case] input: &str, #[case] expected: &str) {
        assert_eq!(normalize_alias(input), expected);
    }

    #[test]
    fn test_normalize_alias_is_idempotent() {
        let once = normalize_alias(" Łódź  Fabryczna ");
        assert_eq!(normalize_alias(&once), once);
    }

    #[test]
    fn test_request_coordinates_two_decimals() {
        let (lat, lon) = testville().request_coordinates();
        assert_eq!(lat, "51.11");
        assert_eq!(lon, "17.04");
    }

    #[test]
    fn test_location_rounded_coordinates() {
        let (lat, lon) = testville().rounded_coordinates(2);
        assert_eq!(lat, 51.11);
        assert_eq!(lon, 17.04);
    }

    #[rstest]
    #[case("46.8182,8.2275", LocationInput::Coordinates(46.8182, 8.2275))]
    #[case("46.8182 8.2275", LocationInput::Coordinates(46.8182, 8.2275))]
    #[case("-46.8182, -8.2275", LocationInput::Coordinates(-46.8182, -8.2275))]
    #[case("91.0,8.0", LocationInput::Name("91.0,8.0".to_string()))]
    #[case("46.0,-181.0", LocationInput::Name("46.0,-181.0".to_string()))]
    #[case(" Wrocław ", LocationInput::Name("Wrocław".to_string()))]
    fn test_location_input_parse(#[case] input: &str, #[case] expected: LocationInput) {
        assert_eq!(LocationInput::parse(input).unwrap(), expected);
    }

    #[test]
    fn test_location_input_empty_is_rejected() {
        let err = LocationInput::parse("   ").unwrap_err();
        assert!(matches!(err, AggregatorError::Resolution { .. }));
    }
}
