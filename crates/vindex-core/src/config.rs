use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use url::Url;

/// Placeholder written to fresh config files until a real key is supplied.
pub const API_KEY_PLACEHOLDER: &str = "YOUR_OPENWEATHERMAP_API_KEY";

/// Environment variable that overrides `api.api_key`.
pub const API_KEY_ENV: &str = "VINDEX_API_KEY";

/// Configuration validation errors
#[derive(Debug, Clone)]
pub struct ConfigValidationError {
    pub field: String,
    pub message: String,
}

impl std::fmt::Display for ConfigValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

/// Result of config validation
#[derive(Debug, Clone, Default)]
pub struct ValidationResult {
    pub errors: Vec<ConfigValidationError>,
    pub warnings: Vec<ConfigValidationError>,
}

impl ValidationResult {
    /// Returns true if there are no errors (warnings are OK)
    pub fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }

    /// Add an error
    pub fn add_error(&mut self, field: impl Into<String>, message: impl Into<String>) {
        self.errors.push(ConfigValidationError {
            field: field.into(),
            message: message.into(),
        });
    }

    /// Add a warning
    pub fn add_warning(&mut self, field: impl Into<String>, message: impl Into<String>) {
        self.warnings.push(ConfigValidationError {
            field: field.into(),
            message: message.into(),
        });
    }

    /// Get a user-friendly message summarizing all errors
    pub fn error_summary(&self) -> String {
        if self.errors.is_empty() {
            return String::new();
        }
        self.errors
            .iter()
            .map(|e| e.to_string())
            .collect::<Vec<_>>()
            .join("; ")
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Application configuration directory
    pub config_dir: PathBuf,

    /// Remote weather API settings
    pub api: ApiConfig,

    /// Local forecast cache settings
    #[serde(default)]
    pub cache: CacheConfig,

    /// Fallback location when nothing is saved and the device has no fix
    #[serde(default)]
    pub location: LocationConfig,

    /// Background sync settings
    #[serde(default)]
    pub sync: SyncConfig,

    /// City search settings
    #[serde(default)]
    pub search: SearchConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiConfig {
    /// Base URL of the OpenWeatherMap-compatible API
    pub base_url: String,

    /// API key appended to every request as `appid`
    pub api_key: String,

    /// Request timeout in seconds
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_timeout_secs() -> u64 {
    30
}

impl ApiConfig {
    /// The key to use for requests: environment first, then the config file.
    pub fn effective_api_key(&self) -> String {
        std::env::var(API_KEY_ENV)
            .ok()
            .filter(|k| !k.trim().is_empty())
            .unwrap_or_else(|| self.api_key.clone())
    }

    /// Check if a key is configured (not the placeholder)
    pub fn is_configured(&self) -> bool {
        let key = self.effective_api_key();
        !key.is_empty() && key != API_KEY_PLACEHOLDER
    }
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            base_url: "https://api.openweathermap.org".to_string(),
            api_key: API_KEY_PLACEHOLDER.to_string(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    /// SQLite database holding the forecast cache and preferences
    #[serde(default = "default_database_path")]
    pub database_path: PathBuf,

    /// Rows per page handed to readers
    #[serde(default = "default_page_size")]
    pub page_size: usize,
}

fn default_database_path() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("vindex")
        .join("weather.db")
}

fn default_page_size() -> usize {
    40
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            database_path: default_database_path(),
            page_size: default_page_size(),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct LocationConfig {
    pub default_latitude: f64,
    pub default_longitude: f64,
}

impl Default for LocationConfig {
    fn default() -> Self {
        // Tokyo Station
        Self {
            default_latitude: 35.6809843,
            default_longitude: 139.7621861,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncConfig {
    /// Background refresh interval in hours
    #[serde(default = "default_interval_hours")]
    pub interval_hours: u64,

    /// Retries after a failed background refresh
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// First retry delay (doubles each attempt)
    #[serde(default = "default_initial_delay_ms")]
    pub initial_delay_ms: u64,

    /// Upper bound on the retry delay
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
}

fn default_interval_hours() -> u64 {
    4
}

fn default_max_retries() -> u32 {
    3
}

fn default_initial_delay_ms() -> u64 {
    1_000
}

fn default_max_delay_ms() -> u64 {
    60_000
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            interval_hours: default_interval_hours(),
            max_retries: default_max_retries(),
            initial_delay_ms: default_initial_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchConfig {
    /// Quiet period before a typed query is sent
    #[serde(default = "default_debounce_ms")]
    pub debounce_ms: u64,

    /// Maximum number of cities returned per query
    #[serde(default = "default_result_limit")]
    pub result_limit: u32,
}

fn default_debounce_ms() -> u64 {
    300
}

fn default_result_limit() -> u32 {
    5
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            debounce_ms: default_debounce_ms(),
            result_limit: default_result_limit(),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        let config_dir = dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("vindex");

        Self {
            config_dir,
            api: ApiConfig::default(),
            cache: CacheConfig::default(),
            location: LocationConfig::default(),
            sync: SyncConfig::default(),
            search: SearchConfig::default(),
        }
    }
}

impl Config {
    /// Load configuration from file, creating default if it doesn't exist
    pub fn load() -> Result<Self> {
        Self::load_from(&Self::config_path()?)
    }

    /// Load configuration from an explicit path, creating default if it doesn't exist
    pub fn load_from(config_path: &Path) -> Result<Self> {
        if !config_path.exists() {
            let config = Self::default();
            config.save_to(config_path)?;
            tracing::info!("Wrote default config to {}", config_path.display());
            return Ok(config);
        }

        let contents =
            std::fs::read_to_string(config_path).context("Failed to read config file")?;

        let config: Config = toml::from_str(&contents).context("Failed to parse config file")?;

        Ok(config)
    }

    /// Load configuration and validate it
    ///
    /// Returns the config along with any validation warnings.
    /// Returns an error if validation fails with critical errors.
    pub fn load_validated() -> Result<(Self, ValidationResult)> {
        let config = Self::load()?;
        let validation = config.validate();

        if !validation.is_valid() {
            anyhow::bail!(
                "Configuration validation failed: {}",
                validation.error_summary()
            );
        }

        for warning in &validation.warnings {
            tracing::warn!("Config warning: {}", warning);
        }

        Ok((config, validation))
    }

    /// Validate the configuration
    pub fn validate(&self) -> ValidationResult {
        let mut result = ValidationResult::default();

        self.validate_url(&self.api.base_url, "api.base_url", &mut result);

        if !self.api.is_configured() {
            result.add_warning(
                "api.api_key",
                format!("API key not configured - set it in config.toml or {API_KEY_ENV}"),
            );
        }

        if self.api.timeout_secs == 0 {
            result.add_error("api.timeout_secs", "Timeout must be greater than 0");
        } else if self.api.timeout_secs > 120 {
            result.add_warning("api.timeout_secs", "Timeout is unusually long (>120s)");
        }

        if self.cache.page_size == 0 {
            result.add_error("cache.page_size", "Page size must be greater than 0");
        }

        if !(-90.0..=90.0).contains(&self.location.default_latitude) {
            result.add_error(
                "location.default_latitude",
                "Latitude must be within [-90, 90]",
            );
        }
        if !(-180.0..=180.0).contains(&self.location.default_longitude) {
            result.add_error(
                "location.default_longitude",
                "Longitude must be within [-180, 180]",
            );
        }

        if self.sync.interval_hours == 0 {
            result.add_warning("sync.interval_hours", "Background sync disabled (0 hours)");
        }
        if self.sync.initial_delay_ms > self.sync.max_delay_ms {
            result.add_warning(
                "sync.initial_delay_ms",
                "Initial retry delay exceeds the maximum delay",
            );
        }

        if self.search.result_limit == 0 {
            result.add_error("search.result_limit", "Result limit must be greater than 0");
        }

        result
    }

    /// Validate a URL field
    fn validate_url(&self, url_str: &str, field_name: &str, result: &mut ValidationResult) {
        match Url::parse(url_str) {
            Ok(url) => {
                if url.scheme() != "http" && url.scheme() != "https" {
                    result.add_error(
                        field_name,
                        format!("URL must use http or https scheme, got: {}", url.scheme()),
                    );
                }

                if url.host().is_none() {
                    result.add_error(field_name, "URL must have a host");
                }
            }
            Err(e) => {
                result.add_error(field_name, format!("Invalid URL: {}", e));
            }
        }
    }

    /// Save configuration to file
    pub fn save(&self) -> Result<()> {
        self.save_to(&Self::config_path()?)
    }

    /// Save configuration to an explicit path
    pub fn save_to(&self, config_path: &Path) -> Result<()> {
        if let Some(parent) = config_path.parent() {
            std::fs::create_dir_all(parent).context("Failed to create config directory")?;
        }

        let contents = toml::to_string_pretty(self).context("Failed to serialize config")?;

        std::fs::write(config_path, contents).context("Failed to write config file")?;

        Ok(())
    }

    /// Get the path to the configuration file
    fn config_path() -> Result<PathBuf> {
        let config_dir = dirs::config_dir()
            .context("Failed to get config directory")?
            .join("vindex");

        Ok(config_dir.join("config.toml"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_valid_default_config() {
        let config = Config::default();
        let result = config.validate();
        assert!(result.is_valid(), "Default config should be valid: {:?}", result.errors);
    }

    #[test]
    fn test_invalid_url() {
        let mut config = Config::default();
        config.api.base_url = "not-a-url".to_string();
        let result = config.validate();
        assert!(!result.is_valid());
        assert!(result.errors.iter().any(|e| e.field == "api.base_url"));
    }

    #[test]
    fn test_invalid_url_scheme() {
        let mut config = Config::default();
        config.api.base_url = "ftp://api.example.com".to_string();
        let result = config.validate();
        assert!(!result.is_valid());
        assert!(result.errors.iter().any(|e| e.message.contains("http or https")));
    }

    #[test]
    fn test_zero_timeout_is_error() {
        let mut config = Config::default();
        config.api.timeout_secs = 0;
        let result = config.validate();
        assert!(result.errors.iter().any(|e| e.field == "api.timeout_secs"));
    }

    #[test]
    fn test_zero_page_size_is_error() {
        let mut config = Config::default();
        config.cache.page_size = 0;
        assert!(!config.validate().is_valid());
    }

    #[test]
    fn test_out_of_range_default_location() {
        let mut config = Config::default();
        config.location.default_latitude = 91.0;
        config.location.default_longitude = -181.0;
        let result = config.validate();
        assert_eq!(result.errors.len(), 2);
    }

    #[test]
    fn test_placeholder_api_key_is_warning() {
        let mut config = Config::default();
        config.api.api_key = API_KEY_PLACEHOLDER.to_string();
        let result = config.validate();
        assert!(result.is_valid());
        if std::env::var(API_KEY_ENV).is_err() {
            assert!(result.warnings.iter().any(|w| w.field == "api.api_key"));
        }
    }

    #[test]
    fn test_save_and_load_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");

        let mut config = Config::default();
        config.cache.page_size = 20;
        config.search.debounce_ms = 150;
        config.save_to(&path).unwrap();

        let loaded = Config::load_from(&path).unwrap();
        assert_eq!(loaded.cache.page_size, 20);
        assert_eq!(loaded.search.debounce_ms, 150);
    }

    #[test]
    fn test_load_creates_default_when_missing() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.toml");

        let config = Config::load_from(&path).unwrap();
        assert!(path.exists());
        assert_eq!(config.sync.interval_hours, 4);
    }

    #[test]
    fn test_missing_sections_use_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(
            &path,
            r#"
config_dir = "/tmp/vindex"

[api]
base_url = "https://api.openweathermap.org"
api_key = "abc"
"#,
        )
        .unwrap();

        let config = Config::load_from(&path).unwrap();
        assert_eq!(config.api.timeout_secs, 30);
        assert_eq!(config.cache.page_size, 40);
        assert_eq!(config.search.result_limit, 5);
    }

    #[test]
    fn test_validation_result_error_summary() {
        let mut result = ValidationResult::default();
        result.add_error("field1", "error1");
        result.add_error("field2", "error2");
        let summary = result.error_summary();
        assert!(summary.contains("field1"));
        assert!(summary.contains("field2"));
    }
}
