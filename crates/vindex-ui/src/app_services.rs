//! Application services built once from [`Config`].
//!
//! Holds the shared provider, cache, preference store and sync mediator, and
//! hands out view models wired to them. Everything is passed explicitly; there
//! is no global registry.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use vindex_core::{AppError, Config, ConfigError};
use vindex_weather::{
    Coordinates, ForecastStore, LocationTracker, RetryConfig, SettingsStore, SyncMediator,
    SyncScheduler, WeatherProvider,
};

use crate::dashboard::DashboardViewModel;
use crate::error_mapping::IntoAppError;
use crate::search::SearchViewModel;

/// Source type used by the running application.
pub type SharedProvider = Arc<WeatherProvider>;

pub struct AppServices {
    config: Config,
    provider: SharedProvider,
    settings: Arc<SettingsStore>,
    mediator: Arc<SyncMediator<SharedProvider>>,
    shutdown: CancellationToken,
}

impl AppServices {
    /// Open the on-disk cache and build the HTTP client.
    pub fn from_config(config: Config) -> Result<Self, AppError> {
        let path = &config.cache.database_path;
        let store = ForecastStore::open(path).map_err(IntoAppError::into_app_error)?;
        let settings = SettingsStore::open(path).map_err(IntoAppError::into_app_error)?;
        tracing::info!("Weather cache at {}", path.display());
        Self::with_stores(config, store, settings)
    }

    /// Same wiring over in-memory stores.
    pub fn in_memory(config: Config) -> Result<Self, AppError> {
        let store = ForecastStore::in_memory().map_err(IntoAppError::into_app_error)?;
        let settings = SettingsStore::in_memory().map_err(IntoAppError::into_app_error)?;
        Self::with_stores(config, store, settings)
    }

    fn with_stores(
        config: Config,
        store: ForecastStore,
        settings: SettingsStore,
    ) -> Result<Self, AppError> {
        let validation = config.validate();
        if !validation.is_valid() {
            return Err(ConfigError::Invalid(validation.error_summary()).into());
        }
        if !config.api.is_configured() {
            return Err(ConfigError::MissingSetting("api.api_key".to_string()).into());
        }

        let timeout = Duration::from_secs(config.api.timeout_secs);
        let provider = WeatherProvider::new(
            &config.api.base_url,
            &config.api.effective_api_key(),
            timeout,
        )
        .map_err(IntoAppError::into_app_error)?;
        let provider = Arc::new(provider);

        let mediator = Arc::new(SyncMediator::new(Arc::clone(&provider), Arc::new(store)));

        Ok(Self {
            config,
            provider,
            settings: Arc::new(settings),
            mediator,
            shutdown: CancellationToken::new(),
        })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn mediator(&self) -> &Arc<SyncMediator<SharedProvider>> {
        &self.mediator
    }

    pub fn settings(&self) -> &Arc<SettingsStore> {
        &self.settings
    }

    pub fn store(&self) -> &Arc<ForecastStore> {
        self.mediator.store()
    }

    pub fn default_coordinates(&self) -> Coordinates {
        Coordinates::new(
            self.config.location.default_latitude,
            self.config.location.default_longitude,
        )
    }

    pub fn dashboard<L: LocationTracker>(
        &self,
        tracker: L,
    ) -> DashboardViewModel<SharedProvider, L> {
        DashboardViewModel::new(
            Arc::clone(&self.mediator),
            Arc::clone(&self.settings),
            tracker,
            self.default_coordinates(),
            self.config.cache.page_size,
        )
    }

    pub fn search(&self) -> SearchViewModel {
        SearchViewModel::new(
            Arc::clone(&self.provider),
            Duration::from_millis(self.config.search.debounce_ms),
            self.config.search.result_limit as usize,
        )
    }

    /// Start the periodic background refresh. Stops on [`shutdown`](Self::shutdown).
    ///
    /// Without a device fix or a saved location it refreshes the configured default.
    ///
    /// Returns `None` when `sync.interval_hours` is 0.
    pub fn start_scheduler<L: LocationTracker>(&self, tracker: L) -> Option<JoinHandle<()>> {
        let sync = &self.config.sync;
        if sync.interval_hours == 0 {
            tracing::info!("Background sync disabled");
            return None;
        }
        let scheduler = SyncScheduler::new(
            Arc::clone(&self.mediator),
            tracker,
            Arc::clone(&self.settings),
        )
        .with_fallback(self.default_coordinates())
        .with_interval(Duration::from_secs(sync.interval_hours * 3600))
        .with_retry(RetryConfig::new(
            sync.max_retries,
            sync.initial_delay_ms,
            sync.max_delay_ms,
        ));
        Some(scheduler.spawn(self.shutdown.child_token()))
    }

    /// Signal background work to stop.
    pub fn shutdown(&self) {
        tracing::info!("Shutting down app services");
        self.shutdown.cancel();
    }
}

impl Drop for AppServices {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use vindex_weather::{LoadState, UnavailableLocationTracker};
    use wiremock::matchers::{method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn config(base_url: &str) -> Config {
        let mut config = Config::default();
        config.api.base_url = base_url.to_string();
        config.api.api_key = "services_key".to_string();
        config
    }

    #[test]
    fn test_placeholder_key_is_rejected() {
        let mut config = Config::default();
        config.api.api_key = vindex_core::config::API_KEY_PLACEHOLDER.to_string();
        if std::env::var(vindex_core::config::API_KEY_ENV).is_ok() {
            return;
        }

        let err = AppServices::in_memory(config).err();
        assert!(matches!(err, Some(AppError::Config(ConfigError::MissingSetting(_)))));
    }

    #[test]
    fn test_invalid_config_is_rejected() {
        let mut config = config("http://127.0.0.1:9");
        config.location.default_latitude = 91.0;

        let err = AppServices::in_memory(config).err();
        assert!(matches!(
            err,
            Some(AppError::Config(ConfigError::Invalid(ref m))) if m.contains("default_latitude")
        ));
    }

    #[tokio::test]
    async fn test_dashboard_syncs_default_location() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/data/2.5/forecast"))
            .and(query_param("lat", "35.6809843"))
            .and(query_param("appid", "services_key"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "list": [
                    {"dt": 200, "main": {"temp": 10.0, "temp_min": 9.0, "temp_max": 11.0, "humidity": 70},
                     "weather": [{"main": "Rain", "icon": "10n"}], "wind": {"speed": 5.0}},
                    {"dt": 100, "main": {"temp": 12.0, "temp_min": 11.0, "temp_max": 13.0, "humidity": 65},
                     "weather": [{"main": "Clouds", "icon": "04n"}], "wind": {"speed": 4.0}}
                ],
                "city": {"name": "Tokyo", "coord": {"lat": 35.6809843, "lon": 139.7621861}}
            })))
            .mount(&server)
            .await;

        let services = AppServices::in_memory(config(&server.uri())).unwrap();
        let dashboard = services.dashboard(UnavailableLocationTracker::new());

        let result = dashboard.trigger_sync().await;
        assert!(result.is_end_of_data());
        assert_eq!(dashboard.forecast().load_state(), LoadState::Loaded);

        let mut pages = dashboard.forecast().subscribe();
        let entries = pages.load_all().unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].timestamp_seconds, 100);
        assert_eq!(entries[0].condition_text, "Clouds");
        assert_eq!(services.store().count().unwrap(), 2);
    }

    #[tokio::test]
    async fn test_scheduler_on_fresh_install_syncs_default_location() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/data/2.5/forecast"))
            .and(query_param("lat", "35.6809843"))
            .and(query_param("lon", "139.7621861"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "list": [
                    {"dt": 100, "main": {"temp": 12.0, "temp_min": 11.0, "temp_max": 13.0, "humidity": 65},
                     "weather": [{"main": "Clouds", "icon": "04n"}], "wind": {"speed": 4.0}}
                ],
                "city": {"name": "Tokyo", "coord": {"lat": 35.6809843, "lon": 139.7621861}}
            })))
            .mount(&server)
            .await;

        let services = AppServices::in_memory(config(&server.uri())).unwrap();
        assert_eq!(services.settings().selected_location(), None);

        let mut generation = services.store().subscribe();
        let scheduler = services
            .start_scheduler(UnavailableLocationTracker::new())
            .unwrap();

        tokio::time::timeout(Duration::from_secs(5), generation.changed())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(services.store().count().unwrap(), 1);

        services.shutdown();
        scheduler.await.unwrap();
    }

    #[test]
    fn test_disabled_interval_starts_no_scheduler() {
        let mut config = config("http://127.0.0.1:9");
        config.sync.interval_hours = 0;
        let services = AppServices::in_memory(config).unwrap();
        assert!(services
            .start_scheduler(UnavailableLocationTracker::new())
            .is_none());
    }
}
