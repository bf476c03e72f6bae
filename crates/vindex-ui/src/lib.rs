//! Presentation-side orchestration for Vindex.
//!
//! View models expose `watch` channels a frontend can render from; all network
//! and database work happens on the tokio runtime.

pub mod app_services;
pub mod dashboard;
pub mod error_mapping;
pub mod search;

pub use app_services::{AppServices, SharedProvider};
pub use dashboard::{DashboardState, DashboardViewModel};
pub use error_mapping::IntoAppError;
pub use search::{SearchState, SearchViewModel};
