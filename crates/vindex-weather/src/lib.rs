//! Weather data for Vindex
//!
//! Fetches the OpenWeatherMap 5 day / 3 hour forecast, keeps the latest series in a
//! local SQLite cache, and serves it back as a paged, observable view.
//! The cache is the single source of truth: the network only ever writes to it.

pub mod cache;
pub mod format;
pub mod geocode;
pub mod location;
pub mod paging;
pub mod provider;
pub mod scheduler;
pub mod settings;
pub mod sync;
pub mod types;

pub use cache::ForecastStore;
pub use format::{format_day_time, format_temperature};
pub use geocode::CitySearch;
pub use location::{FixedLocationTracker, LocationTracker, UnavailableLocationTracker};
pub use paging::{ForecastPage, ForecastPages, LoadState, LoadType, MediatorResult, PagedForecast};
pub use provider::{ForecastSource, WeatherProvider};
pub use scheduler::{JobResult, RetryConfig, SyncScheduler};
pub use settings::{Settings, SettingsStore};
pub use sync::SyncMediator;
pub use types::*;
