//! Periodic background refresh.
//!
//! Goes through the same [`SyncMediator`] entry point as the UI, so the
//! background job gets the same atomic clear-then-insert behaviour.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use crate::location::LocationTracker;
use crate::provider::ForecastSource;
use crate::settings::SettingsStore;
use crate::sync::SyncMediator;
use crate::types::{Coordinates, FailureKind, SyncOutcome};

pub const DEFAULT_INTERVAL_HOURS: u64 = 4;
pub const DEFAULT_MAX_RETRIES: u32 = 3;
pub const DEFAULT_INITIAL_DELAY_MS: u64 = 1000;
pub const DEFAULT_MAX_DELAY_MS: u64 = 60_000;

/// Backoff policy for failed runs
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Retries after the first attempt
    pub max_retries: u32,
    /// Delay before the first retry (doubles each attempt)
    pub initial_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: DEFAULT_MAX_RETRIES,
            initial_delay: Duration::from_millis(DEFAULT_INITIAL_DELAY_MS),
            max_delay: Duration::from_millis(DEFAULT_MAX_DELAY_MS),
        }
    }
}

impl RetryConfig {
    pub fn new(max_retries: u32, initial_delay_ms: u64, max_delay_ms: u64) -> Self {
        Self {
            max_retries,
            initial_delay: Duration::from_millis(initial_delay_ms),
            max_delay: Duration::from_millis(max_delay_ms),
        }
    }

    /// initial_delay * 2^attempt, capped at max_delay
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let factor = 2u64.saturating_pow(attempt);
        let delay_ms = (self.initial_delay.as_millis() as u64).saturating_mul(factor);
        Duration::from_millis(delay_ms.min(self.max_delay.as_millis() as u64))
    }
}

/// Result of one scheduled run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobResult {
    Success,
    /// Transient failure; try again after backoff
    Retry,
    /// Nothing to do or no point retrying
    Failure,
}

pub struct SyncScheduler<S, L> {
    mediator: Arc<SyncMediator<S>>,
    tracker: L,
    settings: Arc<SettingsStore>,
    fallback: Option<Coordinates>,
    interval: Duration,
    retry: RetryConfig,
}

impl<S: ForecastSource, L: LocationTracker> SyncScheduler<S, L> {
    pub fn new(mediator: Arc<SyncMediator<S>>, tracker: L, settings: Arc<SettingsStore>) -> Self {
        Self {
            mediator,
            tracker,
            settings,
            fallback: None,
            interval: Duration::from_secs(DEFAULT_INTERVAL_HOURS * 3600),
            retry: RetryConfig::default(),
        }
    }

    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    /// Coordinate to refresh when there is neither a device fix nor a saved location.
    pub fn with_fallback(mut self, coordinates: Coordinates) -> Self {
        self.fallback = Some(coordinates);
        self
    }

    /// Device fix first, then the saved location, then the fallback.
    async fn target(&self) -> Option<Coordinates> {
        match self.tracker.current_location().await {
            Some(coords) => Some(coords),
            None => self.settings.selected_location().or(self.fallback),
        }
    }

    /// A single attempt.
    pub async fn run_once(&self, cancel: &CancellationToken) -> JobResult {
        let Some(coordinates) = self.target().await else {
            tracing::info!("No location available, skipping background sync");
            return JobResult::Failure;
        };

        match self.mediator.sync_cancellable(coordinates, cancel).await {
            SyncOutcome::Success => JobResult::Success,
            SyncOutcome::Failure(f) if f.kind == FailureKind::Cancelled => JobResult::Failure,
            // Every other failure is treated as transient
            SyncOutcome::Failure(f) => {
                tracing::warn!("Background sync failed: {}", f);
                JobResult::Retry
            }
        }
    }

    /// Attempt, then retry with backoff until success, a permanent failure, or
    /// `max_retries` is spent.
    pub async fn run_with_retry(&self, cancel: &CancellationToken) -> JobResult {
        let mut attempt = 0;
        loop {
            match self.run_once(cancel).await {
                JobResult::Retry if attempt < self.retry.max_retries => {
                    let delay = self.retry.delay_for_attempt(attempt);
                    tracing::debug!(
                        "Retrying background sync in {:?} (attempt {}/{})",
                        delay,
                        attempt + 1,
                        self.retry.max_retries
                    );
                    tokio::select! {
                        _ = cancel.cancelled() => return JobResult::Failure,
                        _ = tokio::time::sleep(delay) => {}
                    }
                    attempt += 1;
                }
                JobResult::Retry => {
                    tracing::warn!("Background sync gave up after {} retries", attempt);
                    return JobResult::Failure;
                }
                result => return result,
            }
        }
    }

    /// Run every interval until `cancel` fires. The first run starts immediately.
    pub async fn run(&self, cancel: CancellationToken) {
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        tracing::info!("Background sync every {:?}", self.interval);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {
                    let result = self.run_with_retry(&cancel).await;
                    tracing::debug!("Background sync finished: {:?}", result);
                }
            }
        }
        tracing::info!("Background sync stopped");
    }

    pub fn spawn(self, cancel: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(async move { self.run(cancel).await })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::ForecastStore;
    use crate::location::{FixedLocationTracker, UnavailableLocationTracker};
    use crate::sync::tests::{batch, offline, ScriptedSource};

    fn scheduler<L: LocationTracker>(
        source: Arc<ScriptedSource>,
        tracker: L,
        settings: Arc<SettingsStore>,
    ) -> SyncScheduler<Arc<ScriptedSource>, L> {
        let store = Arc::new(ForecastStore::in_memory().unwrap());
        SyncScheduler::new(Arc::new(SyncMediator::new(source, store)), tracker, settings)
    }

    #[test]
    fn test_delay_for_attempt() {
        let retry = RetryConfig::new(5, 1000, 5000);
        assert_eq!(retry.delay_for_attempt(0), Duration::from_millis(1000));
        assert_eq!(retry.delay_for_attempt(1), Duration::from_millis(2000));
        assert_eq!(retry.delay_for_attempt(2), Duration::from_millis(4000));
        assert_eq!(retry.delay_for_attempt(3), Duration::from_millis(5000));
        assert_eq!(retry.delay_for_attempt(60), Duration::from_millis(5000));
    }

    #[tokio::test]
    async fn test_no_location_skips_run() {
        let source = Arc::new(ScriptedSource::new());
        let settings = Arc::new(SettingsStore::in_memory().unwrap());
        let scheduler = scheduler(Arc::clone(&source), UnavailableLocationTracker::new(), settings);

        let result = scheduler.run_with_retry(&CancellationToken::new()).await;
        assert_eq!(result, JobResult::Failure);
        assert_eq!(source.calls(), 0);
    }

    #[tokio::test]
    async fn test_tracker_preferred_over_saved_location() {
        let source = Arc::new(ScriptedSource::new());
        source.push_ok(batch("Paris", &[1]));
        let settings = Arc::new(SettingsStore::in_memory().unwrap());
        settings.save_location(Coordinates::new(1.0, 1.0)).unwrap();

        let device = Coordinates::new(48.8566, 2.3522);
        let scheduler = scheduler(
            Arc::clone(&source),
            FixedLocationTracker::new(device),
            settings,
        );

        assert_eq!(scheduler.run_once(&CancellationToken::new()).await, JobResult::Success);
        assert_eq!(source.last_coordinates(), Some(device));
    }

    #[tokio::test]
    async fn test_falls_back_to_saved_location() {
        let source = Arc::new(ScriptedSource::new());
        source.push_ok(batch("Oslo", &[1]));
        let settings = Arc::new(SettingsStore::in_memory().unwrap());
        let saved = Coordinates::new(59.91, 10.75);
        settings.save_location(saved).unwrap();

        let scheduler = scheduler(
            Arc::clone(&source),
            UnavailableLocationTracker::permission_denied(),
            settings,
        );

        assert_eq!(scheduler.run_once(&CancellationToken::new()).await, JobResult::Success);
        assert_eq!(source.last_coordinates(), Some(saved));
    }

    #[tokio::test]
    async fn test_fallback_used_when_nothing_saved() {
        let source = Arc::new(ScriptedSource::new());
        source.push_ok(batch("Tokyo", &[1])).push_ok(batch("Oslo", &[1]));
        let settings = Arc::new(SettingsStore::in_memory().unwrap());
        let home = Coordinates::new(35.68, 139.76);
        let scheduler = scheduler(
            Arc::clone(&source),
            UnavailableLocationTracker::new(),
            Arc::clone(&settings),
        )
        .with_fallback(home);

        assert_eq!(scheduler.run_once(&CancellationToken::new()).await, JobResult::Success);
        assert_eq!(source.last_coordinates(), Some(home));

        // A saved location still takes precedence
        let saved = Coordinates::new(59.91, 10.75);
        settings.save_location(saved).unwrap();
        assert_eq!(scheduler.run_once(&CancellationToken::new()).await, JobResult::Success);
        assert_eq!(source.last_coordinates(), Some(saved));
    }

    #[tokio::test(start_paused = true)]
    async fn test_retries_with_backoff_until_success() {
        let source = Arc::new(ScriptedSource::new());
        source
            .push_err(offline())
            .push_err(offline())
            .push_ok(batch("Tokyo", &[1, 2]));
        let settings = Arc::new(SettingsStore::in_memory().unwrap());
        let scheduler = scheduler(
            Arc::clone(&source),
            FixedLocationTracker::new(Coordinates::new(35.0, 139.0)),
            settings,
        )
        .with_retry(RetryConfig::new(3, 1000, 60_000));

        let started = tokio::time::Instant::now();
        let result = scheduler.run_with_retry(&CancellationToken::new()).await;

        assert_eq!(result, JobResult::Success);
        assert_eq!(source.calls(), 3);
        // 1s + 2s of backoff
        assert!(started.elapsed() >= Duration::from_millis(3000));
    }

    #[tokio::test(start_paused = true)]
    async fn test_gives_up_after_max_retries() {
        let source = Arc::new(ScriptedSource::new());
        let settings = Arc::new(SettingsStore::in_memory().unwrap());
        let scheduler = scheduler(
            Arc::clone(&source),
            FixedLocationTracker::new(Coordinates::new(35.0, 139.0)),
            settings,
        )
        .with_retry(RetryConfig::new(2, 10, 100));

        let result = scheduler.run_with_retry(&CancellationToken::new()).await;
        assert_eq!(result, JobResult::Failure);
        assert_eq!(source.calls(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_runs_on_interval_until_cancelled() {
        let source = Arc::new(ScriptedSource::new());
        source
            .push_ok(batch("Tokyo", &[1]))
            .push_ok(batch("Tokyo", &[2]))
            .push_ok(batch("Tokyo", &[3]));
        let settings = Arc::new(SettingsStore::in_memory().unwrap());
        let scheduler = scheduler(
            Arc::clone(&source),
            FixedLocationTracker::new(Coordinates::new(35.0, 139.0)),
            settings,
        )
        .with_interval(Duration::from_secs(4 * 3600));

        let cancel = CancellationToken::new();
        let handle = scheduler.spawn(cancel.clone());

        tokio::time::sleep(Duration::from_secs(4 * 3600 + 60)).await;
        cancel.cancel();
        handle.await.unwrap();

        assert_eq!(source.calls(), 2);
    }
}
