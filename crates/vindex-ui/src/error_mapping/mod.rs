//! Maps weather-layer failures to vindex_core::AppError for consistent user-facing messages.

mod weather;

pub use weather::IntoAppError;
