//! Remote forecast source: OpenWeatherMap 5 day / 3 hour forecast.
//!
//! The API key is appended to every request here, so callers never see it.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use reqwest::Client;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use tracing::instrument;
use url::Url;

use crate::types::{Coordinates, ForecastEntry, WeatherError};

pub const DEFAULT_BASE_URL: &str = "https://api.openweathermap.org";
pub const DEFAULT_TIMEOUT_SECS: u64 = 30;
const FORECAST_PATH: &str = "data/2.5/forecast";
const API_KEY_PARAM: &str = "appid";
const ICON_URL_BASE: &str = "https://openweathermap.org/img/wn";
const USER_AGENT: &str = concat!("Vindex/", env!("CARGO_PKG_VERSION"));

/// Anything that can produce a forecast batch for a coordinate.
pub trait ForecastSource: Send + Sync + 'static {
    fn fetch_forecast(
        &self,
        coordinates: Coordinates,
    ) -> impl Future<Output = Result<ForecastBatch, WeatherError>> + Send;
}

impl<T: ForecastSource> ForecastSource for Arc<T> {
    fn fetch_forecast(
        &self,
        coordinates: Coordinates,
    ) -> impl Future<Output = Result<ForecastBatch, WeatherError>> + Send {
        (**self).fetch_forecast(coordinates)
    }
}

/// One complete forecast response for a single city.
#[derive(Debug, Clone, Deserialize)]
pub struct ForecastBatch {
    pub list: Vec<ForecastSlot>,
    pub city: BatchCity,
    #[serde(default, rename = "cnt")]
    pub count: u32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct BatchCity {
    pub name: String,
    pub coord: Coord,
    #[serde(default)]
    pub country: String,
    #[serde(default)]
    pub timezone: i64,
    #[serde(default)]
    pub sunrise: i64,
    #[serde(default)]
    pub sunset: i64,
}

#[derive(Debug, Clone, Copy, Deserialize)]
pub struct Coord {
    pub lat: f64,
    pub lon: f64,
}

/// A single forecast time slot.
#[derive(Debug, Clone, Deserialize)]
pub struct ForecastSlot {
    pub dt: i64,
    pub main: SlotMain,
    #[serde(default)]
    pub weather: Vec<SlotCondition>,
    #[serde(default)]
    pub wind: SlotWind,
    /// Probability of precipitation, 0..=1
    #[serde(default)]
    pub pop: f64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SlotMain {
    pub temp: f64,
    #[serde(default)]
    pub feels_like: f64,
    pub temp_min: f64,
    pub temp_max: f64,
    pub humidity: i32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SlotCondition {
    pub main: String,
    #[serde(default)]
    pub description: String,
    pub icon: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct SlotWind {
    pub speed: f64,
    #[serde(default)]
    pub gust: Option<f64>,
}

impl ForecastBatch {
    /// Flatten into cache rows. Every slot inherits the batch's city and coordinates;
    /// order is preserved.
    pub fn into_entries(self) -> Vec<ForecastEntry> {
        let city = self.city;
        self.list
            .into_iter()
            .map(|slot| {
                let condition = slot.weather.first();
                ForecastEntry {
                    id: None,
                    city_name: city.name.clone(),
                    latitude: city.coord.lat,
                    longitude: city.coord.lon,
                    timestamp_seconds: slot.dt,
                    temp_current_celsius: slot.main.temp,
                    temp_min_celsius: slot.main.temp_min,
                    temp_max_celsius: slot.main.temp_max,
                    condition_text: condition
                        .map(|c| c.main.clone())
                        .unwrap_or_else(|| "Unknown".to_string()),
                    icon_ref: icon_url(condition.map(|c| c.icon.as_str()).unwrap_or_default()),
                    humidity_percent: slot.main.humidity,
                    wind_speed_mps: slot.wind.speed,
                }
            })
            .collect()
    }
}

fn icon_url(icon: &str) -> String {
    format!("{}/{}@2x.png", ICON_URL_BASE, icon)
}

/// HTTP client for the OpenWeatherMap API.
#[derive(Debug, Clone)]
pub struct WeatherProvider {
    client: Arc<Client>,
    base_url: Url,
    api_key: String,
}

impl WeatherProvider {
    pub fn new(base_url: &str, api_key: &str, timeout: Duration) -> Result<Self, WeatherError> {
        let client = Client::builder()
            .timeout(timeout)
            .user_agent(USER_AGENT)
            .build()?;

        // A trailing slash keeps `join` from replacing the last path segment
        let normalized = format!("{}/", base_url.trim_end_matches('/'));
        let base_url = Url::parse(&normalized)
            .map_err(|e| WeatherError::Parse(format!("invalid base URL {base_url}: {e}")))?;

        Ok(Self {
            client: Arc::new(client),
            base_url,
            api_key: api_key.to_string(),
        })
    }

    pub(crate) fn endpoint(&self, path: &str) -> Result<Url, WeatherError> {
        self.base_url
            .join(path)
            .map_err(|e| WeatherError::Parse(format!("invalid endpoint {path}: {e}")))
    }

    /// GET `url` with the API key attached and decode the JSON body.
    pub(crate) async fn get_json<T: DeserializeOwned>(
        &self,
        mut url: Url,
    ) -> Result<T, WeatherError> {
        tracing::debug!("GET {}", url);
        url.query_pairs_mut().append_pair(API_KEY_PARAM, &self.api_key);

        // reqwest errors embed the request URL, which carries the key
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| WeatherError::Network(e.without_url()))?;
        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| WeatherError::Network(e.without_url()))?;

        if !status.is_success() {
            tracing::warn!("Weather API returned status {}", status);
            return Err(WeatherError::Status {
                status: status.as_u16(),
                body,
            });
        }

        serde_json::from_str(&body).map_err(|e| WeatherError::Parse(e.to_string()))
    }

    /// Fetch the 5 day / 3 hour forecast in metric units.
    #[instrument(skip(self), level = "info")]
    pub async fn fetch(&self, coordinates: Coordinates) -> Result<ForecastBatch, WeatherError> {
        let mut url = self.endpoint(FORECAST_PATH)?;
        url.query_pairs_mut()
            .append_pair("lat", &coordinates.latitude.to_string())
            .append_pair("lon", &coordinates.longitude.to_string())
            .append_pair("units", "metric");

        let batch: ForecastBatch = self.get_json(url).await?;
        tracing::info!(
            "Fetched {} forecast slots for {}",
            batch.list.len(),
            batch.city.name
        );
        Ok(batch)
    }
}

impl ForecastSource for WeatherProvider {
    fn fetch_forecast(
        &self,
        coordinates: Coordinates,
    ) -> impl Future<Output = Result<ForecastBatch, WeatherError>> + Send {
        self.fetch(coordinates)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::FailureKind;
    use wiremock::matchers::{method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn forecast_body() -> serde_json::Value {
        serde_json::json!({
            "cod": "200",
            "cnt": 2,
            "list": [
                {
                    "dt": 1700000000,
                    "main": {"temp": 12.5, "feels_like": 11.0, "temp_min": 10.0, "temp_max": 14.0,
                             "pressure": 1012, "humidity": 80},
                    "weather": [{"id": 500, "main": "Rain", "description": "light rain", "icon": "10d"}],
                    "clouds": {"all": 90},
                    "wind": {"speed": 4.2, "deg": 180},
                    "visibility": 10000,
                    "pop": 0.6,
                    "sys": {"pod": "d"},
                    "dt_txt": "2023-11-14 22:13:20"
                },
                {
                    "dt": 1700010800,
                    "main": {"temp": 9.0, "temp_min": 8.0, "temp_max": 9.5, "humidity": 70},
                    "weather": [],
                    "wind": {"speed": 3.0}
                }
            ],
            "city": {
                "id": 1850147,
                "name": "Tokyo",
                "coord": {"lat": 35.6895, "lon": 139.6917},
                "country": "JP",
                "timezone": 32400,
                "sunrise": 1699908000,
                "sunset": 1699945000
            }
        })
    }

    fn provider(server: &MockServer) -> WeatherProvider {
        WeatherProvider::new(&server.uri(), "test_key", Duration::from_secs(5)).unwrap()
    }

    #[tokio::test]
    async fn test_fetch_forecast() {
        let mock_server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/data/2.5/forecast"))
            .and(query_param("lat", "35"))
            .and(query_param("lon", "139"))
            .and(query_param("units", "metric"))
            .and(query_param("appid", "test_key"))
            .respond_with(ResponseTemplate::new(200).set_body_json(forecast_body()))
            .mount(&mock_server)
            .await;

        let batch = provider(&mock_server)
            .fetch(Coordinates::new(35.0, 139.0))
            .await
            .unwrap();

        assert_eq!(batch.list.len(), 2);
        assert_eq!(batch.city.name, "Tokyo");
        assert_eq!(batch.count, 2);
    }

    #[tokio::test]
    async fn test_server_error_is_remote_failure() {
        let mock_server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/data/2.5/forecast"))
            .respond_with(ResponseTemplate::new(503).set_body_string("down"))
            .mount(&mock_server)
            .await;

        let err = provider(&mock_server)
            .fetch(Coordinates::new(1.0, 2.0))
            .await
            .unwrap_err();

        assert!(matches!(err, WeatherError::Status { status: 503, .. }));
        assert_eq!(err.kind(), FailureKind::Remote);
    }

    #[tokio::test]
    async fn test_malformed_body_is_parse_error() {
        let mock_server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/data/2.5/forecast"))
            .respond_with(ResponseTemplate::new(200).set_body_string("{\"list\": 5}"))
            .mount(&mock_server)
            .await;

        let err = provider(&mock_server)
            .fetch(Coordinates::new(1.0, 2.0))
            .await
            .unwrap_err();

        assert!(matches!(err, WeatherError::Parse(_)));
    }

    #[tokio::test]
    async fn test_timeout_is_transport_failure() {
        let mock_server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/data/2.5/forecast"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(forecast_body())
                    .set_delay(Duration::from_millis(500)),
            )
            .mount(&mock_server)
            .await;

        let provider =
            WeatherProvider::new(&mock_server.uri(), "secret_key_123", Duration::from_millis(50))
                .unwrap();
        let err = provider.fetch(Coordinates::new(1.0, 2.0)).await.unwrap_err();

        assert_eq!(err.kind(), FailureKind::Transport);
        assert!(!err.to_string().contains("secret_key_123"));
    }

    #[test]
    fn test_batch_flattening_inherits_city() {
        let batch: ForecastBatch = serde_json::from_value(forecast_body()).unwrap();
        let entries = batch.into_entries();

        assert_eq!(entries.len(), 2);
        for entry in &entries {
            assert_eq!(entry.id, None);
            assert_eq!(entry.city_name, "Tokyo");
            assert_eq!(entry.latitude, 35.6895);
            assert_eq!(entry.longitude, 139.6917);
        }

        assert_eq!(entries[0].timestamp_seconds, 1700000000);
        assert_eq!(entries[0].condition_text, "Rain");
        assert_eq!(entries[0].icon_ref, "https://openweathermap.org/img/wn/10d@2x.png");
        assert_eq!(entries[0].humidity_percent, 80);
        assert_eq!(entries[0].wind_speed_mps, 4.2);

        // No condition entry
        assert_eq!(entries[1].condition_text, "Unknown");
    }

    #[test]
    fn test_base_url_with_path_prefix() {
        let provider =
            WeatherProvider::new("http://localhost:9000/proxy", "k", Duration::from_secs(1))
                .unwrap();
        let url = provider.endpoint(FORECAST_PATH).unwrap();
        assert_eq!(url.as_str(), "http://localhost:9000/proxy/data/2.5/forecast");
    }
}
