//! Dashboard orchestration: current coordinate, sync status, unit preference.
//!
//! The view model owns one [`PagedForecast`] per coordinate. Switching city
//! cancels the old façade's in-flight work before the new one starts.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

use vindex_weather::{
    Coordinates, ForecastSource, LoadType, LocationTracker, MediatorResult, PagedForecast,
    SettingsStore, SyncFailure, SyncMediator, TemperatureUnit, WeatherError,
};

use crate::error_mapping::IntoAppError;

/// Snapshot rendered by the dashboard.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct DashboardState {
    pub is_syncing: bool,
    /// Transient, dismissible error from the last refresh
    pub error: Option<String>,
    pub unit: TemperatureUnit,
}

pub struct DashboardViewModel<S, L> {
    mediator: Arc<SyncMediator<S>>,
    settings: Arc<SettingsStore>,
    tracker: L,
    default_coordinates: Coordinates,
    page_size: usize,
    coordinates: Mutex<Coordinates>,
    forecast: Mutex<Arc<PagedForecast<S>>>,
    ui_state: Arc<watch::Sender<DashboardState>>,
    sync_seq: AtomicU64,
    shutdown: CancellationToken,
}

impl<S: ForecastSource, L: LocationTracker> DashboardViewModel<S, L> {
    /// Restores the saved location (or falls back to `default_coordinates`) and
    /// starts following the unit preference.
    ///
    /// Must be called from within a tokio runtime.
    pub fn new(
        mediator: Arc<SyncMediator<S>>,
        settings: Arc<SettingsStore>,
        tracker: L,
        default_coordinates: Coordinates,
        page_size: usize,
    ) -> Self {
        let initial = settings.selected_location().unwrap_or(default_coordinates);
        tracing::debug!("Dashboard starting at {}", initial);

        let (ui_state, _) = watch::channel(DashboardState {
            unit: settings.temperature_unit(),
            ..Default::default()
        });
        let ui_state = Arc::new(ui_state);
        let shutdown = CancellationToken::new();
        Self::follow_unit(&settings, Arc::clone(&ui_state), shutdown.clone());

        let forecast = Arc::new(PagedForecast::new(Arc::clone(&mediator), initial, page_size));

        Self {
            mediator,
            settings,
            tracker,
            default_coordinates,
            page_size,
            coordinates: Mutex::new(initial),
            forecast: Mutex::new(forecast),
            ui_state,
            sync_seq: AtomicU64::new(0),
            shutdown,
        }
    }

    fn follow_unit(
        settings: &SettingsStore,
        ui_state: Arc<watch::Sender<DashboardState>>,
        shutdown: CancellationToken,
    ) {
        let mut rx = settings.subscribe();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    changed = rx.changed() => {
                        if changed.is_err() {
                            break;
                        }
                        let unit = rx.borrow_and_update().unit;
                        ui_state.send_if_modified(|s| {
                            let modified = s.unit != unit;
                            s.unit = unit;
                            modified
                        });
                    }
                }
            }
        });
    }

    pub fn ui_state(&self) -> watch::Receiver<DashboardState> {
        self.ui_state.subscribe()
    }

    pub fn state(&self) -> DashboardState {
        self.ui_state.borrow().clone()
    }

    pub fn current_coordinates(&self) -> Coordinates {
        *self.coordinates.lock()
    }

    /// The paged view for the current coordinate.
    pub fn forecast(&self) -> Arc<PagedForecast<S>> {
        Arc::clone(&*self.forecast.lock())
    }

    /// Refresh the current coordinate.
    ///
    /// On first run (nothing saved, still at the default) the device location is
    /// tried first and, if found, becomes the selected location.
    pub async fn trigger_sync(&self) -> MediatorResult {
        let seq = self.sync_seq.fetch_add(1, Ordering::SeqCst) + 1;
        self.ui_state.send_modify(|s| {
            s.is_syncing = true;
            s.error = None;
        });

        if self.settings.selected_location().is_none()
            && self.current_coordinates() == self.default_coordinates
        {
            let fix = self.tracker.current_location().await;

            // A location picked while the fix was pending wins; that call owns the sync
            if self.sync_seq.load(Ordering::SeqCst) != seq {
                tracing::debug!("Dropping device location, superseded by a newer request");
                return MediatorResult::Error(SyncFailure::from(&WeatherError::Cancelled));
            }
            if let Some(device) = fix {
                tracing::info!("Using device location {}", device);
                self.persist_location(device);
                self.switch_to(device);
            }
        }

        let result = self.forecast().load(LoadType::Refresh).await;

        // An older call finishing late must not clobber a newer one's status
        if self.sync_seq.load(Ordering::SeqCst) == seq {
            self.ui_state.send_modify(|s| {
                s.is_syncing = false;
                if let MediatorResult::Error(failure) = &result {
                    s.error = Some(failure.into_app_error().user_message().to_string());
                }
            });
        }
        result
    }

    /// Select a new coordinate: persist it, switch the view, then sync.
    ///
    /// Returns `None` when the coordinate is already current.
    pub async fn update_location(&self, coordinates: Coordinates) -> Option<MediatorResult> {
        if self.current_coordinates() == coordinates {
            return None;
        }
        self.switch_to(coordinates);
        self.persist_location(coordinates);
        Some(self.trigger_sync().await)
    }

    pub fn set_temperature_unit(&self, unit: TemperatureUnit) {
        if let Err(e) = self.settings.set_temperature_unit(unit) {
            tracing::error!("Failed to save temperature unit: {}", e);
            self.record_error(e.into_app_error().user_message());
            return;
        }
        self.ui_state.send_if_modified(|s| {
            let modified = s.unit != unit;
            s.unit = unit;
            modified
        });
    }

    pub fn clear_error(&self) {
        self.ui_state.send_if_modified(|s| s.error.take().is_some());
    }

    fn persist_location(&self, coordinates: Coordinates) {
        if let Err(e) = self.settings.save_location(coordinates) {
            tracing::error!("Failed to save location: {}", e);
            self.record_error(e.into_app_error().user_message());
        }
    }

    fn switch_to(&self, coordinates: Coordinates) {
        *self.coordinates.lock() = coordinates;
        let next = Arc::new(PagedForecast::new(
            Arc::clone(&self.mediator),
            coordinates,
            self.page_size,
        ));
        let previous = std::mem::replace(&mut *self.forecast.lock(), next);
        previous.cancel();
        tracing::debug!("Switched forecast view to {}", coordinates);
    }

    fn record_error(&self, message: &str) {
        self.ui_state.send_modify(|s| s.error = Some(message.to_string()));
    }
}

impl<S, L> Drop for DashboardViewModel<S, L> {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}
