//! Provider and geocoder clients against a mock HTTP server

use chrono::{TimeZone, Utc};
use reqwest::Client;
use serde_json::json;
use wiremock::matchers::{method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

use weather_aggregator::config::GeocodingConfig;
use weather_aggregator::error::ProviderError;
use weather_aggregator::weather::{MetNorwayProvider, OpenMeteoProvider, WeatherApiProvider};
use weather_aggregator::{
    AggregatorError, Geocoder, HttpGeocoder, Location, LocationId, WeatherProvider,
};

fn wroclaw() -> Location {
    Location {
        id: LocationId(7),
        name: "Wroclaw".to_string(),
        latitude: 51.1079,
        longitude: 17.0385,
        country_code: "PL".to_string(),
        timezone: None,
    }
}

#[tokio::test]
async fn test_open_meteo_current_over_http() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/v1/forecast"))
        .and(query_param("latitude", "51.11"))
        .and(query_param("longitude", "17.04"))
        .and(query_param("timezone", "auto"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "utc_offset_seconds": 7200,
            "timezone": "Europe/Warsaw",
            "current": {
                "time": "2024-05-01T14:00",
                "temperature_2m": 18.2,
                "relative_humidity_2m": 55.0,
                "wind_speed_10m": 3.4,
                "precipitation": 0.0,
                "weather_code": 2
            }
        })))
        .expect(1)
        .mount(&server)
        .await;

    let provider = OpenMeteoProvider::new(Client::new(), format!("{}/v1", server.uri()));
    let parsed = provider.fetch_current(&wroclaw()).await.unwrap();

    assert_eq!(parsed.timezone.as_deref(), Some("Europe/Warsaw"));
    assert_eq!(parsed.records.len(), 1);
    let record = &parsed.records[0];
    assert_eq!(record.provider, "open-meteo");
    assert_eq!(
        record.observed_at,
        Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap()
    );
    assert_eq!(record.measurements.temperature, Some(18.2));
    assert_eq!(record.measurements.condition.as_deref(), Some("Partly cloudy"));
}

#[tokio::test]
async fn test_open_meteo_server_error_is_transport() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/v1/forecast"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&server)
        .await;

    let provider = OpenMeteoProvider::new(Client::new(), format!("{}/v1", server.uri()));
    let err = provider.fetch_daily(&wroclaw()).await.unwrap_err();

    assert!(matches!(err, ProviderError::Transport { provider: "open-meteo", .. }));
    assert!(err.to_string().contains("500"));
}

#[tokio::test]
async fn test_open_meteo_malformed_body_is_parse_error() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/v1/forecast"))
        .respond_with(ResponseTemplate::new(200).set_body_string("<html>maintenance</html>"))
        .mount(&server)
        .await;

    let provider = OpenMeteoProvider::new(Client::new(), format!("{}/v1", server.uri()));
    let err = provider.fetch_hourly(&wroclaw()).await.unwrap_err();

    assert!(matches!(err, ProviderError::Parse { .. }));
}

#[tokio::test]
async fn test_met_norway_hourly_over_http() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/weatherapi/locationforecast/2.0/compact"))
        .and(query_param("lat", "51.11"))
        .and(query_param("lon", "17.04"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "properties": {
                "timeseries": [
                    {
                        "time": "2024-05-01T12:00:00Z",
                        "data": {
                            "instant": { "details": {
                                "air_temperature": 17.0,
                                "relative_humidity": 50.0,
                                "wind_speed": 4.1
                            }},
                            "next_1_hours": {
                                "summary": { "symbol_code": "rain" },
                                "details": { "precipitation_amount": 0.6 }
                            }
                        }
                    },
                    {
                        "time": "2024-05-01T13:00:00Z",
                        "data": {
                            "instant": { "details": { "air_temperature": 17.5 }},
                            "next_1_hours": {
                                "summary": { "symbol_code": "cloudy" },
                                "details": { "precipitation_amount": 0.0 }
                            }
                        }
                    }
                ]
            }
        })))
        .expect(1)
        .mount(&server)
        .await;

    let provider = MetNorwayProvider::new(
        Client::new(),
        format!("{}/weatherapi/locationforecast/2.0", server.uri()),
    );
    let parsed = provider.fetch_hourly(&wroclaw()).await.unwrap();

    assert!(parsed.timezone.is_none());
    assert_eq!(parsed.records.len(), 2);
    assert_eq!(
        parsed.records[1].slot_start,
        Utc.with_ymd_and_hms(2024, 5, 1, 13, 0, 0).unwrap()
    );
    assert_eq!(parsed.records[0].measurements.precipitation, Some(0.6));
    assert!(parsed.records.iter().all(|r| r.provider == "met-norway"));
}

#[tokio::test]
async fn test_weather_api_daily_over_http() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/v1/forecast.json"))
        .and(query_param("key", "test-key"))
        .and(query_param("q", "51.11,17.04"))
        .and(query_param("days", "7"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "location": { "tz_id": "Europe/Warsaw" },
            "forecast": { "forecastday": [
                {
                    "date": "2024-05-01",
                    "day": {
                        "maxtemp_c": 21.0,
                        "mintemp_c": 9.0,
                        "maxwind_kph": 36.0,
                        "totalprecip_mm": 1.2,
                        "daily_chance_of_rain": 40.0,
                        "condition": { "text": "Patchy rain possible" }
                    },
                    "hour": []
                }
            ]}
        })))
        .expect(1)
        .mount(&server)
        .await;

    let provider = WeatherApiProvider::new(
        Client::new(),
        format!("{}/v1", server.uri()),
        "test-key".to_string(),
    );
    let parsed = provider.fetch_daily(&wroclaw()).await.unwrap();

    assert_eq!(parsed.timezone.as_deref(), Some("Europe/Warsaw"));
    assert_eq!(parsed.records.len(), 1);
    let day = &parsed.records[0];
    assert_eq!(day.temperature_max, Some(21.0));
    assert!((day.wind_speed_max.unwrap() - 10.0).abs() < 1e-9);
    assert_eq!(day.condition.as_deref(), Some("Patchy rain possible"));
}

#[tokio::test]
async fn test_weather_api_unauthorized_is_transport() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/v1/current.json"))
        .respond_with(ResponseTemplate::new(401).set_body_json(json!({
            "error": { "code": 2006, "message": "API key is invalid." }
        })))
        .mount(&server)
        .await;

    let provider = WeatherApiProvider::new(
        Client::new(),
        format!("{}/v1", server.uri()),
        "bad-key".to_string(),
    );
    let err = provider.fetch_current(&wroclaw()).await.unwrap_err();
    assert!(matches!(err, ProviderError::Transport { provider: "weatherapi", .. }));
}

fn geocoding_config(server: &MockServer) -> GeocodingConfig {
    GeocodingConfig {
        search_base_url: format!("{}/v1", server.uri()),
        reverse_base_url: server.uri(),
        max_retries: 0,
        timeout_seconds: 5,
    }
}

#[tokio::test]
async fn test_geocode_search_over_http() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/v1/search"))
        .and(query_param("name", "São Paulo"))
        .and(query_param("count", "1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "results": [{
                "name": "São Paulo",
                "latitude": -23.5475,
                "longitude": -46.63611,
                "country_code": "br"
            }]
        })))
        .expect(1)
        .mount(&server)
        .await;

    let geocoder = HttpGeocoder::new(&geocoding_config(&server), "test-agent").unwrap();
    let place = geocoder.geocode("São Paulo").await.unwrap();

    assert_eq!(place.name, "São Paulo");
    assert_eq!(place.country_code, "BR");
    assert!((place.latitude + 23.5475).abs() < 1e-9);
}

#[tokio::test]
async fn test_geocode_without_results_is_error() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/v1/search"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "generationtime_ms": 0.5 })))
        .mount(&server)
        .await;

    let geocoder = HttpGeocoder::new(&geocoding_config(&server), "test-agent").unwrap();
    let err = geocoder.geocode("Atlantis").await.unwrap_err();

    assert!(matches!(err, AggregatorError::Geocode { ref query, .. } if query == "Atlantis"));
}

#[tokio::test]
async fn test_reverse_geocode_over_http() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/reverse"))
        .and(query_param("format", "jsonv2"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "lat": "51.1089776",
            "lon": "17.0326689",
            "name": "Wrocław",
            "address": {
                "city": "Wrocław",
                "country_code": "pl"
            }
        })))
        .expect(1)
        .mount(&server)
        .await;

    let geocoder = HttpGeocoder::new(&geocoding_config(&server), "test-agent").unwrap();
    let place = geocoder.reverse_geocode(51.1079, 17.0385).await.unwrap();

    assert_eq!(place.name, "Wrocław");
    assert_eq!(place.country_code, "PL");
    assert!((place.latitude - 51.1089776).abs() < 1e-9);
}

#[tokio::test]
async fn test_reverse_geocode_over_ocean_is_error() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/reverse"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(json!({ "error": "Unable to geocode" })),
        )
        .mount(&server)
        .await;

    let geocoder = HttpGeocoder::new(&geocoding_config(&server), "test-agent").unwrap();
    let err = geocoder.reverse_geocode(0.0, -30.0).await.unwrap_err();

    assert!(matches!(err, AggregatorError::Geocode { .. }));
}
