//! Device location seam.
//!
//! Platform location services live outside this crate; the core only needs
//! "a coordinate, or nothing".

use std::future::Future;

use crate::types::{Coordinates, LocationError};

/// Resolves the device's current position.
pub trait LocationTracker: Send + Sync + 'static {
    /// Raw lookup. Implementations report why no fix is available.
    fn locate(&self) -> impl Future<Output = Result<Coordinates, LocationError>> + Send;

    /// The current position, or `None` when permission is denied or no fix is available.
    fn current_location(&self) -> impl Future<Output = Option<Coordinates>> + Send {
        async move {
            match self.locate().await {
                Ok(coords) => Some(coords),
                Err(e) => {
                    tracing::debug!("No device location: {}", e);
                    None
                }
            }
        }
    }
}

/// Always reports the same position (desktop builds, tests, configured home).
#[derive(Debug, Clone, Copy)]
pub struct FixedLocationTracker {
    coordinates: Coordinates,
}

impl FixedLocationTracker {
    pub fn new(coordinates: Coordinates) -> Self {
        Self { coordinates }
    }
}

impl LocationTracker for FixedLocationTracker {
    async fn locate(&self) -> Result<Coordinates, LocationError> {
        Ok(self.coordinates)
    }
}

/// No location service on this platform, or the user declined access.
#[derive(Debug, Clone, Copy, Default)]
pub struct UnavailableLocationTracker {
    denied: bool,
}

impl UnavailableLocationTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn permission_denied() -> Self {
        Self { denied: true }
    }
}

impl LocationTracker for UnavailableLocationTracker {
    async fn locate(&self) -> Result<Coordinates, LocationError> {
        if self.denied {
            Err(LocationError::PermissionDenied)
        } else {
            Err(LocationError::ServiceUnavailable)
        }
    }
}
