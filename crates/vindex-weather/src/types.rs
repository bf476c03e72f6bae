use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Temperature unit preference.
///
/// Cached values are always Celsius; conversion happens only at display time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "UPPERCASE")]
pub enum TemperatureUnit {
    #[default]
    Metric,
    Imperial,
}

impl TemperatureUnit {
    /// Stable key used by the preference store.
    pub fn as_key(&self) -> &'static str {
        match self {
            Self::Metric => "METRIC",
            Self::Imperial => "IMPERIAL",
        }
    }

    /// Convert a canonical Celsius value into this unit.
    pub fn convert(&self, celsius: f64) -> f64 {
        match self {
            Self::Metric => celsius,
            Self::Imperial => celsius * 9.0 / 5.0 + 32.0,
        }
    }

    pub fn symbol(&self) -> &'static str {
        match self {
            Self::Metric => "°C",
            Self::Imperial => "°F",
        }
    }

    /// The other unit, for toggle controls.
    pub fn toggled(&self) -> Self {
        match self {
            Self::Metric => Self::Imperial,
            Self::Imperial => Self::Metric,
        }
    }
}

impl FromStr for TemperatureUnit {
    type Err = WeatherError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "METRIC" => Ok(Self::Metric),
            "IMPERIAL" => Ok(Self::Imperial),
            other => Err(WeatherError::Parse(format!(
                "unknown temperature unit: {other}"
            ))),
        }
    }
}

/// A geographic coordinate pair.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Coordinates {
    pub latitude: f64,
    pub longitude: f64,
}

impl Coordinates {
    pub fn new(latitude: f64, longitude: f64) -> Self {
        Self {
            latitude,
            longitude,
        }
    }

    /// Whether both components fall within the usual WGS84 ranges.
    pub fn is_valid(&self) -> bool {
        (-90.0..=90.0).contains(&self.latitude) && (-180.0..=180.0).contains(&self.longitude)
    }
}

impl fmt::Display for Coordinates {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:.4}, {:.4}", self.latitude, self.longitude)
    }
}

/// A city returned by the geocoding search.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct City {
    pub name: String,
    pub latitude: f64,
    pub longitude: f64,
    pub country: String,
    pub state: Option<String>,
}

impl City {
    pub fn coordinates(&self) -> Coordinates {
        Coordinates::new(self.latitude, self.longitude)
    }

    /// "Springfield, Illinois, US" or "Paris, FR".
    pub fn display_name(&self) -> String {
        match self.state.as_deref().filter(|s| !s.is_empty()) {
            Some(state) => format!("{}, {}, {}", self.name, state, self.country),
            None => format!("{}, {}", self.name, self.country),
        }
    }
}

/// One cached forecast slot.
///
/// `id` is assigned by the store; entries built from a remote batch carry `None`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ForecastEntry {
    pub id: Option<i64>,
    pub city_name: String,
    pub latitude: f64,
    pub longitude: f64,
    /// Forecast slot time (unix seconds), not insertion time
    pub timestamp_seconds: i64,
    pub temp_current_celsius: f64,
    pub temp_min_celsius: f64,
    pub temp_max_celsius: f64,
    pub condition_text: String,
    pub icon_ref: String,
    pub humidity_percent: i32,
    pub wind_speed_mps: f64,
}

impl ForecastEntry {
    pub fn coordinates(&self) -> Coordinates {
        Coordinates::new(self.latitude, self.longitude)
    }
}

/// Coarse classification of a failed sync.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FailureKind {
    /// No connectivity, DNS, timeout
    Transport,
    /// Non-2xx response or malformed body
    Remote,
    /// The cache transaction could not commit
    Storage,
    /// Superseded or torn down before the write started
    Cancelled,
}

/// Failure half of [`SyncOutcome`].
#[derive(Debug, Clone, PartialEq)]
pub struct SyncFailure {
    pub kind: FailureKind,
    pub message: String,
    /// HTTP status of a rejected request, if the server answered
    pub status: Option<u16>,
}

impl SyncFailure {
    pub fn new(kind: FailureKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            status: None,
        }
    }

    pub fn with_status(mut self, status: u16) -> Self {
        self.status = Some(status);
        self
    }
}

impl fmt::Display for SyncFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}: {}", self.kind, self.message)
    }
}

impl From<&WeatherError> for SyncFailure {
    fn from(e: &WeatherError) -> Self {
        let failure = Self::new(e.kind(), e.to_string());
        match e.status() {
            Some(status) => failure.with_status(status),
            None => failure,
        }
    }
}

/// Result of one reconciliation pass. Never persisted.
#[derive(Debug, Clone, PartialEq)]
pub enum SyncOutcome {
    Success,
    Failure(SyncFailure),
}

impl SyncOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success)
    }

    pub fn failure(&self) -> Option<&SyncFailure> {
        match self {
            Self::Success => None,
            Self::Failure(f) => Some(f),
        }
    }
}

/// Location service errors
#[derive(Debug, thiserror::Error)]
pub enum LocationError {
    #[error("Location permission denied")]
    PermissionDenied,
    #[error("Location service unavailable")]
    ServiceUnavailable,
}

/// Weather layer errors
#[derive(Debug, thiserror::Error)]
pub enum WeatherError {
    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),
    #[error("Unexpected status {status}: {body}")]
    Status { status: u16, body: String },
    #[error("Parse error: {0}")]
    Parse(String),
    #[error("Storage error: {0}")]
    Storage(#[from] rusqlite::Error),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Location error: {0}")]
    Location(#[from] LocationError),
    #[error("Request timed out after {0:?}")]
    Timeout(std::time::Duration),
    #[error("Operation cancelled")]
    Cancelled,
}

impl WeatherError {
    /// Classify for [`SyncOutcome`]. Remote and transport failures are handled alike.
    pub fn kind(&self) -> FailureKind {
        match self {
            Self::Network(e) if e.is_decode() || e.is_status() => FailureKind::Remote,
            Self::Network(_) | Self::Location(_) | Self::Timeout(_) => FailureKind::Transport,
            Self::Status { .. } | Self::Parse(_) => FailureKind::Remote,
            Self::Storage(_) | Self::Io(_) => FailureKind::Storage,
            Self::Cancelled => FailureKind::Cancelled,
        }
    }

    /// HTTP status, when the server answered with one.
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Status { status, .. } => Some(*status),
            Self::Network(e) => e.status().map(|s| s.as_u16()),
            _ => None,
        }
    }

    /// Short message for transient UI notifications.
    pub fn user_message(&self) -> String {
        match self.kind() {
            FailureKind::Transport => "Network error. Check your connection.".to_string(),
            FailureKind::Remote => "Failed to sync weather data.".to_string(),
            FailureKind::Storage => "Local cache error".to_string(),
            FailureKind::Cancelled => "Refresh cancelled".to_string(),
        }
    }
}
