use vindex_core::{
    AppError, NetworkError, ReqwestErrorExt, RusqliteErrorExt, WeatherError as CoreWeatherError,
};
use vindex_weather::{FailureKind, SyncFailure, WeatherError};

/// Conversion into the application-wide error type.
pub trait IntoAppError {
    fn into_app_error(self) -> AppError;
}

impl IntoAppError for WeatherError {
    fn into_app_error(self) -> AppError {
        match self {
            WeatherError::Network(e) => AppError::Network(e.into_network_error()),
            WeatherError::Status { status: 401, .. } => {
                AppError::Weather(CoreWeatherError::InvalidApiKey)
            }
            WeatherError::Status { status, .. } if status >= 500 => {
                AppError::Weather(CoreWeatherError::ServiceUnavailable)
            }
            WeatherError::Status { status, body } => AppError::Network(NetworkError::ServerError {
                status,
                message: body,
            }),
            WeatherError::Parse(s) => AppError::Network(NetworkError::InvalidResponse(s)),
            WeatherError::Storage(e) => AppError::Database(e.into_database_error()),
            WeatherError::Io(e) => AppError::Io(e),
            WeatherError::Location(e) => {
                AppError::Weather(CoreWeatherError::LocationNotFound(e.to_string()))
            }
            WeatherError::Timeout(_) => AppError::Network(NetworkError::Timeout),
            WeatherError::Cancelled => AppError::Other(anyhow::anyhow!("Operation cancelled")),
        }
    }
}

impl IntoAppError for &SyncFailure {
    fn into_app_error(self) -> AppError {
        let message = self.message.clone();
        match (self.kind, self.status) {
            (FailureKind::Remote, Some(401)) => AppError::Weather(CoreWeatherError::InvalidApiKey),
            (FailureKind::Remote, Some(status)) if status >= 500 => {
                AppError::Weather(CoreWeatherError::ServiceUnavailable)
            }
            (FailureKind::Transport, _) => {
                AppError::Network(NetworkError::ConnectionFailed(message))
            }
            (FailureKind::Remote | FailureKind::Cancelled, _) => {
                AppError::Weather(CoreWeatherError::SyncFailed(message))
            }
            (FailureKind::Storage, _) => AppError::Weather(CoreWeatherError::CacheError(message)),
        }
    }
}
