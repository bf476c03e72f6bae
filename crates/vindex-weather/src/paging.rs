//! Paged, observable view over the forecast cache for one coordinate.
//!
//! The remote API answers with the whole series at once, so paging here is purely
//! local: the only network traffic is the single refresh scheduled on first
//! subscription (or an explicit [`PagedForecast::refresh`]). Older and newer
//! page requests resolve to end-of-data immediately.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::cache::ForecastStore;
use crate::provider::ForecastSource;
use crate::sync::SyncMediator;
use crate::types::{Coordinates, FailureKind, ForecastEntry, SyncFailure, SyncOutcome, WeatherError};

pub const DEFAULT_PAGE_SIZE: usize = 40;

/// Which edge of the list a load request is for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadType {
    /// Drop everything and fetch again
    Refresh,
    /// Older entries; there is no history, so always end-of-data
    Prepend,
    /// Later entries; the forecast arrives in one shot, so always end-of-data
    Append,
}

/// Per-subscription sync state.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum LoadState {
    #[default]
    Initial,
    Loading,
    Loaded,
    LoadedWithError(SyncFailure),
}

impl LoadState {
    pub fn is_loading(&self) -> bool {
        matches!(self, Self::Loading)
    }

    pub fn error(&self) -> Option<&SyncFailure> {
        match self {
            Self::LoadedWithError(f) => Some(f),
            _ => None,
        }
    }
}

/// Answer to a load request.
#[derive(Debug, Clone, PartialEq)]
pub enum MediatorResult {
    Success { end_of_pagination_reached: bool },
    Error(SyncFailure),
}

impl MediatorResult {
    const END_OF_DATA: Self = Self::Success {
        end_of_pagination_reached: true,
    };

    pub fn is_end_of_data(&self) -> bool {
        matches!(
            self,
            Self::Success {
                end_of_pagination_reached: true
            }
        )
    }
}

/// State shared between the façade and its readers.
struct Shared<S> {
    mediator: Arc<SyncMediator<S>>,
    coordinates: Coordinates,
    page_size: usize,
    state: watch::Sender<LoadState>,
}

impl<S: ForecastSource> Shared<S> {
    async fn refresh(&self, token: CancellationToken) -> MediatorResult {
        if token.is_cancelled() {
            return MediatorResult::Error(SyncFailure::new(
                FailureKind::Cancelled,
                WeatherError::Cancelled.to_string(),
            ));
        }
        self.state.send_replace(LoadState::Loading);

        let outcome = self
            .mediator
            .sync_cancellable(self.coordinates, &token)
            .await;

        // A superseded pass leaves the state to whoever replaced it
        if token.is_cancelled() {
            return match outcome {
                SyncOutcome::Success => MediatorResult::END_OF_DATA,
                SyncOutcome::Failure(f) => MediatorResult::Error(f),
            };
        }

        match outcome {
            SyncOutcome::Success => {
                self.state.send_replace(LoadState::Loaded);
                MediatorResult::END_OF_DATA
            }
            SyncOutcome::Failure(f) => {
                self.state.send_replace(LoadState::LoadedWithError(f.clone()));
                MediatorResult::Error(f)
            }
        }
    }
}

/// Façade for one coordinate. Dropping it cancels any in-flight refresh.
pub struct PagedForecast<S> {
    shared: Arc<Shared<S>>,
    started: AtomicBool,
    cancel: CancellationToken,
    in_flight: Mutex<Option<CancellationToken>>,
}

impl<S: ForecastSource> PagedForecast<S> {
    pub fn new(mediator: Arc<SyncMediator<S>>, coordinates: Coordinates, page_size: usize) -> Self {
        let (state, _) = watch::channel(LoadState::Initial);
        Self {
            shared: Arc::new(Shared {
                mediator,
                coordinates,
                page_size: page_size.max(1),
                state,
            }),
            started: AtomicBool::new(false),
            cancel: CancellationToken::new(),
            in_flight: Mutex::new(None),
        }
    }

    pub fn coordinates(&self) -> Coordinates {
        self.shared.coordinates
    }

    pub fn load_state(&self) -> LoadState {
        self.shared.state.borrow().clone()
    }

    pub fn watch_state(&self) -> watch::Receiver<LoadState> {
        self.shared.state.subscribe()
    }

    /// Open a reader. The first subscription schedules the initial refresh.
    ///
    /// Must be called from within a tokio runtime.
    pub fn subscribe(&self) -> ForecastPages {
        if !self.started.swap(true, Ordering::SeqCst) {
            tracing::debug!("First subscriber for {}, scheduling refresh", self.coordinates());
            drop(self.refresh());
        }
        ForecastPages::new(
            Arc::clone(self.shared.mediator.store()),
            self.shared.state.subscribe(),
            self.shared.page_size,
        )
    }

    /// Start a refresh in the background, superseding any refresh still running.
    pub fn refresh(&self) -> JoinHandle<MediatorResult> {
        let token = self.next_token();
        let shared = Arc::clone(&self.shared);
        tokio::spawn(async move { shared.refresh(token).await })
    }

    /// Answer a load request.
    ///
    /// Only [`LoadType::Refresh`] reaches the network.
    pub async fn load(&self, load_type: LoadType) -> MediatorResult {
        match load_type {
            LoadType::Prepend | LoadType::Append => MediatorResult::END_OF_DATA,
            LoadType::Refresh => {
                self.started.store(true, Ordering::SeqCst);
                let token = self.next_token();
                self.shared.refresh(token).await
            }
        }
    }

    /// Abandon all work for this coordinate.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    fn next_token(&self) -> CancellationToken {
        let token = self.cancel.child_token();
        if let Some(previous) = self.in_flight.lock().replace(token.clone()) {
            previous.cancel();
        }
        token
    }
}

impl<S> Drop for PagedForecast<S> {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

/// One chunk handed to the UI.
#[derive(Debug, Clone, PartialEq)]
pub struct ForecastPage {
    pub entries: Vec<ForecastEntry>,
    pub offset: usize,
    /// `None` once the end of the cached series has been reached
    pub next_offset: Option<usize>,
    /// Store generation the page was read at
    pub generation: u64,
    /// Earlier pages belong to an older generation and must be discarded
    pub invalidated: bool,
}

/// Resumable cursor over the cache, restarted whenever the cache is rewritten.
pub struct ForecastPages {
    store: Arc<ForecastStore>,
    generation: watch::Receiver<u64>,
    state: watch::Receiver<LoadState>,
    page_size: usize,
    read_generation: Option<u64>,
    next_offset: Option<usize>,
}

impl ForecastPages {
    fn new(store: Arc<ForecastStore>, state: watch::Receiver<LoadState>, page_size: usize) -> Self {
        let generation = store.subscribe();
        Self {
            store,
            generation,
            state,
            page_size,
            read_generation: None,
            next_offset: Some(0),
        }
    }

    pub fn load_state(&self) -> LoadState {
        self.state.borrow().clone()
    }

    /// Whether the cursor has reached the end of the current generation.
    pub fn is_exhausted(&self) -> bool {
        self.next_offset.is_none() && self.read_generation == Some(*self.generation.borrow())
    }

    /// Start over from the first entry.
    pub fn reset(&mut self) {
        self.read_generation = None;
        self.next_offset = Some(0);
    }

    /// Read the next chunk in timestamp order.
    ///
    /// If the cache was rewritten since the previous call the cursor restarts at
    /// offset 0 and the page is flagged `invalidated`. Past the end, an empty page
    /// with `next_offset: None` is returned.
    pub fn load_next(&mut self) -> Result<ForecastPage, WeatherError> {
        let current = *self.generation.borrow_and_update();
        let invalidated = match self.read_generation {
            Some(seen) if seen != current => {
                tracing::debug!("Cache rewritten (generation {} -> {}), restarting", seen, current);
                self.next_offset = Some(0);
                true
            }
            _ => false,
        };
        self.read_generation = Some(current);

        let Some(offset) = self.next_offset else {
            return Ok(ForecastPage {
                entries: Vec::new(),
                offset: 0,
                next_offset: None,
                generation: current,
                invalidated,
            });
        };

        let entries = self.store.page(offset, self.page_size)?;
        let next_offset = if entries.len() < self.page_size {
            None
        } else {
            Some(offset + entries.len())
        };
        self.next_offset = next_offset;

        Ok(ForecastPage {
            entries,
            offset,
            next_offset,
            generation: current,
            invalidated,
        })
    }

    /// Read every remaining entry of the current generation.
    pub fn load_all(&mut self) -> Result<Vec<ForecastEntry>, WeatherError> {
        self.reset();
        let mut all = Vec::new();
        loop {
            let page = self.load_next()?;
            if page.invalidated {
                all.clear();
            }
            all.extend(page.entries);
            if page.next_offset.is_none() {
                return Ok(all);
            }
        }
    }

    /// Wait until the cache is rewritten or the load state changes.
    pub async fn changed(&mut self) {
        tokio::select! {
            result = self.generation.changed() => {
                if result.is_err() {
                    std::future::pending::<()>().await;
                }
            }
            result = self.state.changed() => {
                if result.is_err() {
                    std::future::pending::<()>().await;
                }
            }
        }
    }

    /// Wait for the current sync cycle to settle and return its final state.
    pub async fn settled(&mut self) -> LoadState {
        let settled = self
            .state
            .wait_for(|s| matches!(s, LoadState::Loaded | LoadState::LoadedWithError(_)))
            .await
            .map(|state| state.clone());
        settled.unwrap_or_else(|_| self.state.borrow().clone())
    }
}
