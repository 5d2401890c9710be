//! Location Resolution Module
//!
//! Maps free-text place names and coordinate pairs to canonical locations.
//! Normalized aliases make repeated inputs a direct store hit, so the same
//! place is never geocoded twice.

use std::sync::Arc;

use tracing::{debug, info, instrument, warn};

use crate::error::AggregatorError;
use crate::geocode::Geocoder;
use crate::models::{Location, LocationId, LocationInput, normalize_alias, valid_coordinates};
use crate::store::LocationStore;

/// Service for resolving location inputs
pub struct LocationResolver {
    store: Arc<dyn LocationStore>,
    geocoder: Arc<dyn Geocoder>,
}

impl LocationResolver {
    pub fn new(store: Arc<dyn LocationStore>, geocoder: Arc<dyn Geocoder>) -> Self {
        Self { store, geocoder }
    }

    /// Parse raw text and resolve it
    pub async fn resolve_str(&self, input: &str) -> Result<Location, AggregatorError> {
        self.resolve(LocationInput::parse(input)?).await
    }

    /// Resolve a location input into its canonical Location
    pub async fn resolve(&self, input: LocationInput) -> Result<Location, AggregatorError> {
        let location = match input {
            LocationInput::Coordinates(lat, lon) => self.resolve_coordinates(lat, lon).await?,
            LocationInput::Name(name) => self.resolve_name(&name).await?,
        };

        debug!(
            "Resolved location: {} ({}) at ({}, {})",
            location.name, location.id, location.latitude, location.longitude
        );
        Ok(location)
    }

    /// Reverse geocode to a name, then take the name path
    #[instrument(skip(self))]
    async fn resolve_coordinates(&self, lat: f64, lon: f64) -> Result<Location, AggregatorError> {
        if !valid_coordinates(lat, lon) {
            return Err(AggregatorError::resolution(format!(
                "Coordinates out of range: ({lat}, {lon})"
            )));
        }

        let place = self.geocoder.reverse_geocode(lat, lon).await?;
        self.resolve_name(&place.name).await
    }

    #[instrument(skip(self))]
    async fn resolve_name(&self, name: &str) -> Result<Location, AggregatorError> {
        let alias = normalize_alias(name);
        if alias.is_empty() {
            return Err(AggregatorError::resolution("Location cannot be empty"));
        }

        if let Some(location) = self.store.find_alias(&alias).await? {
            debug!(alias, location = %location.id, "Alias hit");
            return Ok(location);
        }

        let geocoded = self.geocoder.geocode(name).await?;
        let canonical_alias = normalize_alias(&geocoded.name);

        if let Some(existing) = self.store.find_location_by_name(&geocoded.name).await? {
            self.attach_alias(&alias, existing.id).await;
            return Ok(existing);
        }

        let location = match self.store.create_location(geocoded.clone()).await {
            Ok(created) => {
                info!(location = %created.id, name = %created.name, "Created location");
                created
            }
            Err(e) if e.is_conflict() => {
                // Another resolver created it between our lookup and insert
                self.store
                    .find_location_by_name(&geocoded.name)
                    .await?
                    .ok_or(e)?
            }
            Err(e) => return Err(e.into()),
        };

        self.attach_alias(&alias, location.id).await;
        if canonical_alias != alias {
            self.attach_alias(&canonical_alias, location.id).await;
        }

        Ok(location)
    }

    /// Failures only cost a future duplicate geocode, so they are logged and dropped.
    async fn attach_alias(&self, alias: &str, location_id: LocationId) {
        if let Err(e) = self.store.create_alias(alias, location_id).await {
            warn!(alias, location = %location_id, error = %e, "Failed to create alias");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::NewLocation;
    use crate::store::MemoryStore;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct FixedGeocoder {
        forward_calls: AtomicUsize,
    }

    #[async_trait]
    impl Geocoder for FixedGeocoder {
        async fn geocode(&self, name: &str) -> Result<NewLocation, AggregatorError> {
            self.forward_calls.fetch_add(1, Ordering::SeqCst);
            match normalize_alias(name).as_str() {
                "krakow" | "cracow" => Ok(NewLocation {
                    name: "Kraków".to_string(),
                    latitude: 50.06,
                    longitude: 19.94,
                    country_code: "PL".to_string(),
                }),
                _ => Err(AggregatorError::geocode(name, "no results")),
            }
        }

        async fn reverse_geocode(&self, _lat: f64, _lon: f64) -> Result<NewLocation, AggregatorError> {
            Ok(NewLocation {
                name: "Cracow".to_string(),
                latitude: 50.06,
                longitude: 19.94,
                country_code: "PL".to_string(),
            })
        }
    }

    fn resolver() -> (LocationResolver, Arc<MemoryStore>, Arc<FixedGeocoder>) {
        let store = Arc::new(MemoryStore::new());
        let geocoder = Arc::new(FixedGeocoder::default());
        (
            LocationResolver::new(store.clone(), geocoder.clone()),
            store,
            geocoder,
        )
    }

    #[tokio::test]
    async fn test_second_lookup_is_alias_hit() {
        let (resolver, _store, geocoder) = resolver();

        let first = resolver.resolve_str("Cracow").await.unwrap();
        let second = resolver.resolve_str("  CRACOW ").await.unwrap();

        assert_eq!(first.id, second.id);
        assert_eq!(geocoder.forward_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_canonical_alias_is_attached() {
        let (resolver, store, geocoder) = resolver();

        let location = resolver.resolve_str("Cracow").await.unwrap();
        assert_eq!(location.name, "Kraków");

        // "krakow" is the normalized canonical name, so no geocode needed
        let again = resolver.resolve_str("Krakow").await.unwrap();
        assert_eq!(again.id, location.id);
        assert_eq!(geocoder.forward_calls.load(Ordering::SeqCst), 1);
        assert_eq!(store.list_locations().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_coordinates_funnel_through_name_path() {
        let (resolver, _store, _geocoder) = resolver();

        let by_name = resolver.resolve_str("Kraków").await.unwrap();
        let by_coords = resolver.resolve_str("50.06, 19.94").await.unwrap();
        assert_eq!(by_name.id, by_coords.id);
    }

    #[tokio::test]
    async fn test_unknown_place_is_geocode_error() {
        let (resolver, store, _geocoder) = resolver();

        let err = resolver.resolve_str("Atlantis").await.unwrap_err();
        assert!(matches!(err, AggregatorError::Geocode { .. }));
        assert!(store.list_locations().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_out_of_range_coordinates_rejected() {
        let (resolver, _store, _geocoder) = resolver();

        let err = resolver
            .resolve(LocationInput::Coordinates(123.0, 10.0))
            .await
            .unwrap_err();
        assert!(matches!(err, AggregatorError::Resolution { .. }));
    }
}
