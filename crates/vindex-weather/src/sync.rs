//! Reconciles the remote forecast with the local cache.
//!
//! One call to [`SyncMediator::sync`] is one pass: fetch, flatten, then clear and
//! insert inside a single transaction. Every failure is folded into a
//! [`SyncOutcome`]; nothing escapes as an error.

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::instrument;

use crate::cache::ForecastStore;
use crate::provider::ForecastSource;
use crate::types::{Coordinates, SyncFailure, SyncOutcome, WeatherError};

/// The only writer of the forecast cache.
pub struct SyncMediator<S> {
    source: S,
    store: Arc<ForecastStore>,
    fetch_timeout: Option<Duration>,
}

impl<S: ForecastSource> SyncMediator<S> {
    pub fn new(source: S, store: Arc<ForecastStore>) -> Self {
        Self {
            source,
            store,
            fetch_timeout: None,
        }
    }

    /// Bound every fetch, on top of whatever the source enforces itself.
    pub fn with_fetch_timeout(mut self, timeout: Duration) -> Self {
        self.fetch_timeout = Some(timeout);
        self
    }

    pub fn store(&self) -> &Arc<ForecastStore> {
        &self.store
    }

    /// Run one reconciliation pass for `coordinates`.
    ///
    /// Coordinates are forwarded to the source as given.
    pub async fn sync(&self, coordinates: Coordinates) -> SyncOutcome {
        self.sync_cancellable(coordinates, &CancellationToken::new())
            .await
    }

    /// Like [`sync`](Self::sync), but gives up when `cancel` fires.
    ///
    /// Cancellation during the fetch drops the request and leaves the cache alone.
    /// Once the write has been handed to the blocking pool it runs to completion,
    /// even if the caller stops waiting for it.
    #[instrument(skip(self, cancel), level = "info")]
    pub async fn sync_cancellable(
        &self,
        coordinates: Coordinates,
        cancel: &CancellationToken,
    ) -> SyncOutcome {
        match self.reconcile(coordinates, cancel).await {
            Ok(count) => {
                tracing::info!("Cached {} forecast slots", count);
                SyncOutcome::Success
            }
            Err(WeatherError::Cancelled) => {
                tracing::debug!("Sync superseded before writing");
                SyncOutcome::Failure(SyncFailure::from(&WeatherError::Cancelled))
            }
            Err(e) => {
                tracing::warn!("Sync failed: {}", e);
                SyncOutcome::Failure(SyncFailure::from(&e))
            }
        }
    }

    async fn reconcile(
        &self,
        coordinates: Coordinates,
        cancel: &CancellationToken,
    ) -> Result<usize, WeatherError> {
        let batch = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(WeatherError::Cancelled),
            fetched = self.fetch(coordinates) => fetched?,
        };

        let entries = batch.into_entries();

        // Last chance to back out; nothing has touched the store yet
        if cancel.is_cancelled() {
            return Err(WeatherError::Cancelled);
        }

        let store = Arc::clone(&self.store);
        tokio::task::spawn_blocking(move || store.replace_all(&entries))
            .await
            .map_err(|e| WeatherError::Io(std::io::Error::other(e)))?
    }

    async fn fetch(
        &self,
        coordinates: Coordinates,
    ) -> Result<crate::provider::ForecastBatch, WeatherError> {
        match self.fetch_timeout {
            Some(limit) => tokio::time::timeout(limit, self.source.fetch_forecast(coordinates))
                .await
                .map_err(|_| WeatherError::Timeout(limit))?,
            None => self.source.fetch_forecast(coordinates).await,
        }
    }
}
