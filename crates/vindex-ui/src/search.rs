//! City search with debounced input.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

use vindex_weather::{City, CitySearch};

use crate::error_mapping::IntoAppError;

pub const DEFAULT_DEBOUNCE: Duration = Duration::from_millis(300);

#[derive(Debug, Clone, PartialEq, Default)]
pub enum SearchState {
    #[default]
    Idle,
    Loading,
    Empty,
    Success(Vec<City>),
    Error(String),
}

/// Owns a background worker that turns query edits into searches.
///
/// Edits are debounced, repeated queries are ignored, and a new query abandons
/// any search still in flight.
pub struct SearchViewModel {
    query: watch::Sender<String>,
    state: Arc<watch::Sender<SearchState>>,
    shutdown: CancellationToken,
}

impl SearchViewModel {
    /// Must be called from within a tokio runtime.
    pub fn new<C: CitySearch>(search: C, debounce: Duration, limit: usize) -> Self {
        let (query, query_rx) = watch::channel(String::new());
        let (state, _) = watch::channel(SearchState::Idle);
        let state = Arc::new(state);
        let shutdown = CancellationToken::new();

        let worker = Worker {
            search,
            query: query_rx,
            state: Arc::clone(&state),
            debounce,
            limit,
            shutdown: shutdown.clone(),
        };
        tokio::spawn(worker.run());

        Self {
            query,
            state,
            shutdown,
        }
    }

    /// Called on every keystroke.
    pub fn on_query_changed(&self, query: impl Into<String>) {
        let query = query.into();
        if query.trim().is_empty() {
            self.state.send_replace(SearchState::Idle);
        }
        self.query.send_replace(query);
    }

    pub fn query(&self) -> String {
        self.query.borrow().clone()
    }

    pub fn state(&self) -> SearchState {
        self.state.borrow().clone()
    }

    pub fn ui_state(&self) -> watch::Receiver<SearchState> {
        self.state.subscribe()
    }
}

impl Drop for SearchViewModel {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

struct Worker<C> {
    search: C,
    query: watch::Receiver<String>,
    state: Arc<watch::Sender<SearchState>>,
    debounce: Duration,
    limit: usize,
    shutdown: CancellationToken,
}

impl<C: CitySearch> Worker<C> {
    async fn run(mut self) {
        let mut last: Option<String> = None;
        let mut pending = false;

        loop {
            if !pending {
                tokio::select! {
                    _ = self.shutdown.cancelled() => return,
                    changed = self.query.changed() => if changed.is_err() { return },
                }
            }
            pending = false;

            // Quiet period; every edit restarts it
            loop {
                tokio::select! {
                    _ = self.shutdown.cancelled() => return,
                    _ = tokio::time::sleep(self.debounce) => break,
                    changed = self.query.changed() => if changed.is_err() { return },
                }
            }

            let query = self.query.borrow_and_update().clone();
            if last.as_deref() == Some(query.as_str()) {
                continue;
            }
            last = Some(query.clone());
            if query.trim().is_empty() {
                continue;
            }

            self.state.send_replace(SearchState::Loading);
            tokio::select! {
                _ = self.shutdown.cancelled() => return,
                changed = self.query.changed() => {
                    if changed.is_err() {
                        return;
                    }
                    tracing::debug!("Search for {:?} superseded", query);
                    pending = true;
                }
                result = self.search.search_city(&query, self.limit) => {
                    let next = match result {
                        Ok(cities) if cities.is_empty() => SearchState::Empty,
                        Ok(cities) => SearchState::Success(cities),
                        Err(e) => {
                            tracing::warn!("City search failed: {}", e);
                            SearchState::Error(e.into_app_error().user_message().to_string())
                        }
                    };
                    self.state.send_replace(next);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use vindex_weather::WeatherError;

    #[derive(Default)]
    struct FakeSearch {
        queries: Mutex<Vec<String>>,
        delay: Option<Duration>,
        fail: bool,
    }

    impl FakeSearch {
        fn queries(&self) -> Vec<String> {
            self.queries.lock().clone()
        }
    }

    impl CitySearch for FakeSearch {
        async fn search_city(&self, query: &str, _limit: usize) -> Result<Vec<City>, WeatherError> {
            self.queries.lock().push(query.to_string());
            if let Some(delay) = self.delay {
                tokio::time::sleep(delay).await;
            }
            if self.fail {
                return Err(WeatherError::Status {
                    status: 500,
                    body: "boom".into(),
                });
            }
            if query == "Atlantis" {
                return Ok(Vec::new());
            }
            Ok(vec![City {
                name: query.to_string(),
                latitude: 1.0,
                longitude: 2.0,
                country: "GB".into(),
                state: None,
            }])
        }
    }

    async fn settle(vm: &SearchViewModel) -> SearchState {
        let mut rx = vm.ui_state();
        let settled = rx
            .wait_for(|s| !matches!(s, SearchState::Loading | SearchState::Idle))
            .await
            .map(|s| s.clone());
        settled.unwrap_or_default()
    }

    #[tokio::test(start_paused = true)]
    async fn test_typing_is_debounced() {
        let search = Arc::new(FakeSearch::default());
        let vm = SearchViewModel::new(Arc::clone(&search), DEFAULT_DEBOUNCE, 5);

        for partial in ["L", "Lo", "Lon", "London"] {
            vm.on_query_changed(partial);
            tokio::time::sleep(Duration::from_millis(100)).await;
        }

        let state = settle(&vm).await;
        assert!(matches!(state, SearchState::Success(ref cities) if cities[0].name == "London"));
        assert_eq!(search.queries(), vec!["London".to_string()]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_repeated_query_is_ignored() {
        let search = Arc::new(FakeSearch::default());
        let vm = SearchViewModel::new(Arc::clone(&search), DEFAULT_DEBOUNCE, 5);

        vm.on_query_changed("Paris");
        settle(&vm).await;
        vm.on_query_changed("Paris");
        tokio::time::sleep(Duration::from_secs(1)).await;

        assert_eq!(search.queries().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_blank_query_resets_to_idle() {
        let search = Arc::new(FakeSearch::default());
        let vm = SearchViewModel::new(Arc::clone(&search), DEFAULT_DEBOUNCE, 5);

        vm.on_query_changed("Rome");
        settle(&vm).await;

        vm.on_query_changed("   ");
        assert_eq!(vm.state(), SearchState::Idle);
        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(vm.state(), SearchState::Idle);
        assert_eq!(search.queries().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_no_matches_is_empty() {
        let search = Arc::new(FakeSearch::default());
        let vm = SearchViewModel::new(Arc::clone(&search), DEFAULT_DEBOUNCE, 5);

        vm.on_query_changed("Atlantis");
        assert_eq!(settle(&vm).await, SearchState::Empty);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failure_is_error_state() {
        let search = Arc::new(FakeSearch {
            fail: true,
            ..Default::default()
        });
        let vm = SearchViewModel::new(Arc::clone(&search), DEFAULT_DEBOUNCE, 5);

        vm.on_query_changed("Berlin");
        assert!(matches!(settle(&vm).await, SearchState::Error(_)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_newer_query_supersedes_slow_search() {
        let search = Arc::new(FakeSearch {
            delay: Some(Duration::from_secs(5)),
            ..Default::default()
        });
        let vm = SearchViewModel::new(Arc::clone(&search), DEFAULT_DEBOUNCE, 5);

        vm.on_query_changed("Madrid");
        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(vm.state(), SearchState::Loading);

        vm.on_query_changed("Lisbon");
        let state = settle(&vm).await;
        assert!(matches!(state, SearchState::Success(ref cities) if cities[0].name == "Lisbon"));
        assert_eq!(search.queries(), vec!["Madrid".to_string(), "Lisbon".to_string()]);
    }
}
