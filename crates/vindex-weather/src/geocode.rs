//! Forward geocoding: city name to coordinates, via the OpenWeatherMap geo API.

use std::future::Future;

use serde::Deserialize;
use tracing::instrument;

use crate::provider::WeatherProvider;
use crate::types::{City, WeatherError};

const DIRECT_PATH: &str = "geo/1.0/direct";
pub const DEFAULT_RESULT_LIMIT: usize = 5;

/// Anything that can turn a free-text query into candidate cities.
pub trait CitySearch: Send + Sync + 'static {
    fn search_city(
        &self,
        query: &str,
        limit: usize,
    ) -> impl Future<Output = Result<Vec<City>, WeatherError>> + Send;
}

impl<T: CitySearch> CitySearch for std::sync::Arc<T> {
    fn search_city(
        &self,
        query: &str,
        limit: usize,
    ) -> impl Future<Output = Result<Vec<City>, WeatherError>> + Send {
        (**self).search_city(query, limit)
    }
}

#[derive(Debug, Deserialize)]
struct GeocodingDto {
    name: String,
    lat: f64,
    lon: f64,
    #[serde(default)]
    country: String,
    state: Option<String>,
}

impl From<GeocodingDto> for City {
    fn from(dto: GeocodingDto) -> Self {
        City {
            name: dto.name,
            latitude: dto.lat,
            longitude: dto.lon,
            country: dto.country,
            state: dto.state,
        }
    }
}

impl WeatherProvider {
    /// Search cities by name. A blank query returns nothing without a request.
    #[instrument(skip(self), level = "debug")]
    pub async fn search(&self, query: &str, limit: usize) -> Result<Vec<City>, WeatherError> {
        let query = query.trim();
        if query.is_empty() {
            return Ok(Vec::new());
        }

        let mut url = self.endpoint(DIRECT_PATH)?;
        url.query_pairs_mut()
            .append_pair("q", query)
            .append_pair("limit", &limit.to_string());

        let found: Vec<GeocodingDto> = self.get_json(url).await?;
        tracing::debug!("Geocoding matched {} cities", found.len());
        Ok(found.into_iter().map(City::from).collect())
    }
}

impl CitySearch for WeatherProvider {
    fn search_city(
        &self,
        query: &str,
        limit: usize,
    ) -> impl Future<Output = Result<Vec<City>, WeatherError>> + Send {
        let query = query.to_string();
        async move { self.search(&query, limit).await }
    }
}
