pub mod config;
pub mod error;

pub use config::{
    ApiConfig, CacheConfig, Config, LocationConfig, SearchConfig, SyncConfig, ValidationResult,
};
pub use error::{
    AppError, ConfigError, DatabaseError, NetworkError, ReqwestErrorExt, RusqliteErrorExt,
    WeatherError,
};

use anyhow::Result;

fn env_filter() -> tracing_subscriber::EnvFilter {
    tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"))
}

/// Initialize the core application
pub fn init() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(env_filter())
        .try_init()
        .map_err(|e| anyhow::anyhow!("Failed to initialize tracing: {}", e))?;

    tracing::info!("Vindex core initialized");
    Ok(())
}

/// Initialize tracing if no subscriber is installed yet.
///
/// Safe to call more than once (tests, embedding hosts).
pub fn try_init() {
    let _ = tracing_subscriber::fmt().with_env_filter(env_filter()).try_init();
}
