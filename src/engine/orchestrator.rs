//! Orchestration loop.
//!
//! Runs a [`PaginatedFetchEngine`] as a background task, watches the
//! session's [`ProgressTracker`] for cancellation, refreshes the progress
//! display and moves the session to its next phase once the task ends.

use crate::engine::browser::{BrowsePage, SessionBrowser};
use crate::engine::paginated::{Cancelled, ContentSource, PaginatedFetchEngine, ResultCollection};
use crate::engine::progress::ProgressTracker;
use crate::http::{FetchFailure, FetchResult};
use crate::session::{FlowPhase, FlowState, SessionId, SessionStore};
use anyhow::Result;
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::time::MissedTickBehavior;
use tracing::{info, warn};

/// Why a flow ended without a collection.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FlowError {
    /// Listing or follow-up request failed
    #[error("{0}")]
    Fetch(FetchFailure),
    /// The listing held no entries
    #[error("no matches")]
    NoMatches,
    /// The listing had entries but none of them produced an item
    #[error("nothing found")]
    Empty,
    /// The background task panicked or was aborted
    #[error("fetch task aborted: {0}")]
    Aborted(String),
}

/// How a flow ended.
#[derive(Debug, Clone)]
pub enum FlowOutcome<I> {
    /// Items are stored in the session for browsing
    Completed(ResultCollection<I>),
    /// The user cancelled; nothing was stored
    Cancelled,
    /// The session went back to its pre-flow state
    Failed(FlowError),
}

/// Display side of a flow.
#[async_trait]
pub trait FlowPresenter: Send + Sync {
    /// Shows the rounded completion percentage.
    async fn progress(&self, percent: u8) -> Result<()>;

    /// Shows the first page of a completed collection.
    async fn browse(&self, page: &BrowsePage) -> Result<()>;

    /// Confirms cancellation.
    async fn cancelled(&self) -> Result<()>;

    /// Reports a failed or empty run.
    async fn failed(&self, error: &FlowError) -> Result<()>;
}

/// Handle to one session's state in a [`SessionStore`].
pub struct FlowSlot<D> {
    store: Arc<dyn SessionStore<D>>,
    id: SessionId,
}

impl<D: Send + Sync + 'static> FlowSlot<D> {
    /// Binds `store` to session `id`.
    pub fn new(store: Arc<dyn SessionStore<D>>, id: SessionId) -> Self {
        Self { store, id }
    }

    /// Session id.
    #[must_use]
    pub const fn id(&self) -> SessionId {
        self.id
    }

    /// Stores `phase` as the session state.
    pub async fn enter<I>(&self, phase: FlowPhase<I>)
    where
        D: FlowState<I>,
    {
        self.store.set(self.id, D::lift(phase)).await;
    }

    /// Whether the session is still in the fetch tracked by `tracker`.
    pub async fn is_tracking<I>(&self, tracker: &ProgressTracker) -> bool
    where
        D: FlowState<I>,
    {
        self.store
            .get(self.id)
            .await
            .is_some_and(|state| state.phase().is_some_and(|p| p.is_fetching_with(tracker)))
    }
}

enum Ended<I> {
    Done(FetchResult<ResultCollection<I>>),
    Cancelled,
    Aborted(FlowError),
}

/// Loop tuning.
#[derive(Debug, Clone, Copy)]
pub struct OrchestratorConfig {
    /// Interval between progress refreshes
    pub poll_interval: Duration,
}

/// Runs flows of one content source.
pub struct FlowRunner<S: ContentSource> {
    engine: Arc<PaginatedFetchEngine<S>>,
    browser: SessionBrowser,
    config: OrchestratorConfig,
}

impl<S: ContentSource> FlowRunner<S> {
    /// Creates a runner around `engine`.
    pub fn new(engine: Arc<PaginatedFetchEngine<S>>, config: OrchestratorConfig) -> Self {
        Self {
            engine,
            browser: SessionBrowser::new(S::TAG),
            config,
        }
    }

    /// Browser for this runner's collections.
    #[must_use]
    pub const fn browser(&self) -> &SessionBrowser {
        &self.browser
    }

    /// Moves the session to `Fetching` with a fresh tracker and returns it.
    ///
    /// Called from the chat handler before the flow is spawned, so the next
    /// update of the chat already sees the fetching state.
    pub async fn begin<D>(&self, slot: &FlowSlot<D>) -> ProgressTracker
    where
        D: FlowState<S::Item> + Send + Sync + 'static,
    {
        let tracker = ProgressTracker::new();
        slot.enter(FlowPhase::<S::Item>::Fetching(tracker.clone()))
            .await;
        tracker
    }

    /// Runs the engine to completion or cancellation and applies the
    /// resulting transition to the session.
    ///
    /// If the session left this flow meanwhile (e.g. `/start`), the outcome
    /// is neither stored nor presented.
    pub async fn run<D, P>(
        &self,
        query: S::Query,
        page_budget: usize,
        tracker: ProgressTracker,
        slot: &FlowSlot<D>,
        presenter: &P,
    ) -> FlowOutcome<S::Item>
    where
        D: FlowState<S::Item> + Send + Sync + 'static,
        P: FlowPresenter + ?Sized,
    {
        let engine = Arc::clone(&self.engine);
        let task_tracker = tracker.clone();
        let mut handle =
            tokio::spawn(async move { engine.run(&query, page_budget, &task_tracker).await });

        let mut ticker = tokio::time::interval(self.config.poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut shown: Option<u8> = None;

        let joined = loop {
            tokio::select! {
                () = tracker.cancelled() => break None,
                joined = &mut handle => break Some(joined),
                _ = ticker.tick() => {
                    let percent = tracker.percent(page_budget);
                    if shown != Some(percent) {
                        shown = Some(percent);
                        // A slow display must not delay cancel or completion.
                        tokio::select! {
                            () = tracker.cancelled() => break None,
                            joined = &mut handle => break Some(joined),
                            sent = presenter.progress(percent) => {
                                if let Err(e) = sent {
                                    warn!(session = slot.id(), error = %e, "Progress update failed");
                                }
                            }
                        }
                    }
                }
            }
        };
        // On cancel the engine observes the same token; wait for it to stop.
        let joined = match joined {
            Some(joined) => joined,
            None => handle.await,
        };

        let ended = match joined {
            _ if tracker.is_cancelled() => Ended::Cancelled,
            Ok(Ok(result)) => Ended::Done(result),
            Ok(Err(Cancelled)) => Ended::Cancelled,
            Err(e) => Ended::Aborted(FlowError::Aborted(e.to_string())),
        };

        if !slot.is_tracking::<S::Item>(&tracker).await {
            info!(session = slot.id(), source = S::TAG, "Session left the flow, outcome dropped");
            return match ended {
                Ended::Aborted(error) => FlowOutcome::Failed(error),
                Ended::Done(_) | Ended::Cancelled => FlowOutcome::Cancelled,
            };
        }

        match ended {
            Ended::Cancelled => {
                slot.enter(FlowPhase::<S::Item>::Idle).await;
                info!(session = slot.id(), source = S::TAG, "Flow cancelled");
                if let Err(e) = presenter.cancelled().await {
                    warn!(session = slot.id(), error = %e, "Cancel notice failed");
                }
                FlowOutcome::Cancelled
            }
            Ended::Aborted(error) => self.fail(slot, presenter, error).await,
            Ended::Done(result) => self.finish(slot, presenter, result).await,
        }
    }

    async fn finish<D, P>(
        &self,
        slot: &FlowSlot<D>,
        presenter: &P,
        result: FetchResult<ResultCollection<S::Item>>,
    ) -> FlowOutcome<S::Item>
    where
        D: FlowState<S::Item> + Send + Sync + 'static,
        P: FlowPresenter + ?Sized,
    {
        let collection = match result.into_payload() {
            Ok(collection) => collection,
            Err(failure) => return self.fail(slot, presenter, FlowError::Fetch(failure)).await,
        };
        let page = match self.browser.render(&collection, 0) {
            Ok(page) => page,
            Err(_) if collection.listed() == 0 => {
                return self.fail(slot, presenter, FlowError::NoMatches).await;
            }
            Err(_) => return self.fail(slot, presenter, FlowError::Empty).await,
        };

        slot.enter(FlowPhase::Browsing(collection.clone())).await;
        info!(
            session = slot.id(),
            source = S::TAG,
            items = collection.len(),
            "Flow completed"
        );
        if let Err(e) = presenter.browse(&page).await {
            warn!(session = slot.id(), error = %e, "First page delivery failed");
        }
        FlowOutcome::Completed(collection)
    }

    async fn fail<D, P>(&self, slot: &FlowSlot<D>, presenter: &P, error: FlowError) -> FlowOutcome<S::Item>
    where
        D: FlowState<S::Item> + Send + Sync + 'static,
        P: FlowPresenter + ?Sized,
    {
        slot.enter(FlowPhase::<S::Item>::Idle).await;
        warn!(session = slot.id(), source = S::TAG, error = %error, "Flow failed");
        if let Err(e) = presenter.failed(&error).await {
            warn!(session = slot.id(), error = %e, "Failure notice failed");
        }
        FlowOutcome::Failed(error)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::paginated::testing::*;
    use crate::engine::paginated::ItemOrdering;
    use crate::http::FetchErrorKind;
    use crate::session::MemorySessionStore;
    use std::sync::Mutex;

    #[derive(Debug, Clone, Default)]
    enum TestState {
        #[default]
        Menu,
        Tracks(FlowPhase<Track>),
    }

    impl FlowState<Track> for TestState {
        fn lift(phase: FlowPhase<Track>) -> Self {
            Self::Tracks(phase)
        }

        fn phase(&self) -> Option<&FlowPhase<Track>> {
            match self {
                Self::Tracks(phase) => Some(phase),
                Self::Menu => None,
            }
        }
    }

    #[derive(Default)]
    struct RecordingPresenter {
        events: Mutex<Vec<String>>,
        progress_stall: Duration,
    }

    impl RecordingPresenter {
        fn push(&self, event: String) {
            if let Ok(mut events) = self.events.lock() {
                events.push(event);
            }
        }

        fn events(&self) -> Vec<String> {
            self.events.lock().map(|e| e.clone()).unwrap_or_default()
        }
    }

    #[async_trait]
    impl FlowPresenter for RecordingPresenter {
        async fn progress(&self, percent: u8) -> Result<()> {
            self.push(format!("progress {percent}"));
            if !self.progress_stall.is_zero() {
                tokio::time::sleep(self.progress_stall).await;
            }
            Ok(())
        }

        async fn browse(&self, page: &BrowsePage) -> Result<()> {
            self.push(format!("browse {}/{}", page.cursor, page.len));
            Ok(())
        }

        async fn cancelled(&self) -> Result<()> {
            self.push("cancelled".to_string());
            Ok(())
        }

        async fn failed(&self, error: &FlowError) -> Result<()> {
            self.push(format!("failed {error}"));
            Ok(())
        }
    }

    type Fixture = (
        FlowRunner<TrackSource>,
        Arc<MemorySessionStore<TestState>>,
        FlowSlot<TestState>,
    );

    fn setup(fetcher: ScriptedFetcher) -> Fixture {
        let runner = FlowRunner::new(
            Arc::new(engine(Arc::new(fetcher), ItemOrdering::Descending)),
            OrchestratorConfig {
                poll_interval: Duration::from_millis(10),
            },
        );
        let store = Arc::new(MemorySessionStore::new(100, Duration::from_secs(60)));
        let slot = FlowSlot::<TestState>::new(store.clone(), 42);
        (runner, store, slot)
    }

    #[tokio::test]
    async fn test_success_moves_session_to_browsing() {
        let fetcher = ScriptedFetcher::new()
            .ok(LISTING, listing(2))
            .ok(&item_url(0), track("a", "2024-01-01"))
            .ok(&item_url(1), track("b", "2024-02-01"));
        let (runner, store, slot) = setup(fetcher);
        let presenter = RecordingPresenter::default();

        let tracker = runner.begin(&slot).await;
        assert!(matches!(
            store.get(42).await,
            Some(TestState::Tracks(FlowPhase::Fetching(_)))
        ));

        let outcome = runner.run((), 50, tracker, &slot, &presenter).await;

        let FlowOutcome::Completed(collection) = outcome else {
            panic!("expected completion, got {outcome:?}");
        };
        assert_eq!(collection.len(), 2);
        let Some(TestState::Tracks(FlowPhase::Browsing(stored))) = store.get(42).await else {
            panic!("session is not browsing");
        };
        assert_eq!(stored.len(), 2);
        assert_eq!(presenter.events().last().map(String::as_str), Some("browse 0/2"));
    }

    #[tokio::test]
    async fn test_cancel_after_first_item_stores_nothing() {
        let tracker = ProgressTracker::new();
        let mut fetcher = ScriptedFetcher::new().ok(LISTING, listing(5));
        for n in 0..5 {
            fetcher = fetcher.ok(&item_url(n), track(&format!("t{n}"), "2024-01-01"));
        }
        // listing and first follow-up answered, then the user presses cancel
        let fetcher = Arc::new(fetcher.cancel_after(2, tracker.clone()));
        let runner = FlowRunner::new(
            Arc::new(engine(fetcher.clone(), ItemOrdering::Descending)),
            OrchestratorConfig {
                poll_interval: Duration::from_millis(10),
            },
        );
        let store = Arc::new(MemorySessionStore::new(100, Duration::from_secs(60)));
        let slot = FlowSlot::<TestState>::new(store.clone(), 42);
        slot.enter(FlowPhase::<Track>::Fetching(tracker.clone())).await;
        let presenter = RecordingPresenter::default();

        let outcome = runner.run((), 5, tracker.clone(), &slot, &presenter).await;

        assert!(matches!(outcome, FlowOutcome::Cancelled));
        assert_eq!(tracker.read().items_completed, 1);
        assert_eq!(fetcher.calls().len(), 2);
        assert!(matches!(
            store.get(42).await,
            Some(TestState::Tracks(FlowPhase::Idle))
        ));
        assert_eq!(presenter.events().last().map(String::as_str), Some("cancelled"));
    }

    #[tokio::test]
    async fn test_empty_listing_is_no_matches() {
        let (runner, store, slot) = setup(ScriptedFetcher::new().ok(LISTING, listing(0)));
        let presenter = RecordingPresenter::default();

        let tracker = runner.begin(&slot).await;
        let outcome = runner.run((), 50, tracker, &slot, &presenter).await;

        assert!(matches!(outcome, FlowOutcome::Failed(FlowError::NoMatches)));
        assert!(matches!(
            store.get(42).await,
            Some(TestState::Tracks(FlowPhase::Idle))
        ));
        assert_eq!(
            presenter.events().last().map(String::as_str),
            Some("failed no matches")
        );
    }

    #[tokio::test]
    async fn test_unresolved_entries_are_empty_result() {
        let fetcher = ScriptedFetcher::new()
            .ok(LISTING, listing(2))
            .status(&item_url(0), 404, FetchErrorKind::ClientError)
            .status(&item_url(1), 404, FetchErrorKind::ClientError);
        let (runner, store, slot) = setup(fetcher);
        let presenter = RecordingPresenter::default();

        let tracker = runner.begin(&slot).await;
        let outcome = runner.run((), 50, tracker, &slot, &presenter).await;

        assert!(matches!(outcome, FlowOutcome::Failed(FlowError::Empty)));
        assert!(matches!(
            store.get(42).await,
            Some(TestState::Tracks(FlowPhase::Idle))
        ));
        assert_eq!(
            presenter.events().last().map(String::as_str),
            Some("failed nothing found")
        );
    }

    #[tokio::test]
    async fn test_fetch_failure_resets_session() {
        let fetcher = ScriptedFetcher::new().status(LISTING, 502, FetchErrorKind::ServerError);
        let (runner, store, slot) = setup(fetcher);
        let presenter = RecordingPresenter::default();

        let tracker = runner.begin(&slot).await;
        let outcome = runner.run((), 50, tracker, &slot, &presenter).await;

        let FlowOutcome::Failed(FlowError::Fetch(failure)) = outcome else {
            panic!("expected a fetch failure, got {outcome:?}");
        };
        assert_eq!(failure.status, 502);
        assert_eq!(failure.kind(), FetchErrorKind::ServerError);
        assert!(matches!(
            store.get(42).await,
            Some(TestState::Tracks(FlowPhase::Idle))
        ));
    }

    #[tokio::test]
    async fn test_outcome_dropped_when_session_moved_on() {
        let fetcher = ScriptedFetcher::new()
            .ok(LISTING, listing(1))
            .ok(&item_url(0), track("a", "2024-01-01"));
        let (runner, store, slot) = setup(fetcher);
        let presenter = RecordingPresenter::default();

        let tracker = runner.begin(&slot).await;
        store.set(42, TestState::Menu).await;
        let outcome = runner.run((), 50, tracker, &slot, &presenter).await;

        assert!(matches!(outcome, FlowOutcome::Cancelled));
        assert!(matches!(store.get(42).await, Some(TestState::Menu)));
        assert!(!presenter.events().iter().any(|e| e.starts_with("browse")));
    }

    #[tokio::test(start_paused = true)]
    async fn test_progress_is_reported_once_per_value() {
        let fetcher = ScriptedFetcher::new()
            .ok(LISTING, listing(2))
            .ok(&item_url(0), track("a", "2024-01-01"))
            .ok(&item_url(1), track("b", "2024-02-01"));
        let runner = FlowRunner::new(
            Arc::new(PaginatedFetchEngine::new(
                TrackSource {
                    ordering: ItemOrdering::Descending,
                },
                Arc::new(fetcher),
                crate::engine::paginated::EngineConfig {
                    follow_up_delay: Duration::from_secs(10),
                },
            )),
            OrchestratorConfig {
                poll_interval: Duration::from_secs(1),
            },
        );
        let store: Arc<MemorySessionStore<TestState>> =
            Arc::new(MemorySessionStore::new(100, Duration::from_secs(3600)));
        let slot = FlowSlot::<TestState>::new(store, 7);
        let presenter = RecordingPresenter::default();

        let tracker = runner.begin(&slot).await;
        let outcome = runner.run((), 2, tracker, &slot, &presenter).await;

        assert!(matches!(outcome, FlowOutcome::Completed(_)));
        let progress: Vec<String> = presenter
            .events()
            .into_iter()
            .filter(|e| e.starts_with("progress"))
            .collect();
        assert_eq!(progress.first().map(String::as_str), Some("progress 0"));
        assert!(progress.contains(&"progress 50".to_string()));
        let mut distinct = progress.clone();
        distinct.dedup();
        assert_eq!(distinct, progress);
    }

    fn stalled_runner(
        fetcher: StallingFetcher,
        poll_interval: Duration,
        follow_up_delay: Duration,
    ) -> FlowRunner<TrackSource> {
        FlowRunner::new(
            Arc::new(PaginatedFetchEngine::new(
                TrackSource {
                    ordering: ItemOrdering::Descending,
                },
                Arc::new(fetcher),
                crate::engine::paginated::EngineConfig { follow_up_delay },
            )),
            OrchestratorConfig { poll_interval },
        )
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_during_slow_request_resolves_within_one_tick() {
        let poll = Duration::from_millis(500);
        let delay = Duration::from_millis(100);
        let runner = stalled_runner(
            StallingFetcher::follow_ups(3, Duration::from_secs(100)),
            poll,
            delay,
        );
        let store = Arc::new(MemorySessionStore::new(100, Duration::from_secs(3600)));
        let slot = FlowSlot::<TestState>::new(store.clone(), 42);
        let presenter = RecordingPresenter::default();

        let tracker = runner.begin(&slot).await;
        let cancel_at = Duration::from_secs(1);
        let canceller = tracker.clone();
        tokio::spawn(async move {
            tokio::time::sleep(cancel_at).await;
            canceller.request_cancel();
        });
        let started = tokio::time::Instant::now();

        let outcome = runner.run((), 3, tracker, &slot, &presenter).await;

        assert!(matches!(outcome, FlowOutcome::Cancelled));
        assert!(started.elapsed() <= cancel_at + poll + delay);
        assert!(matches!(
            store.get(42).await,
            Some(TestState::Tracks(FlowPhase::Idle))
        ));
        assert_eq!(presenter.events().last().map(String::as_str), Some("cancelled"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_slow_progress_display_does_not_delay_cancel() {
        let poll = Duration::from_millis(500);
        let delay = Duration::from_millis(100);
        let runner = stalled_runner(
            StallingFetcher::follow_ups(3, Duration::from_secs(100)),
            poll,
            delay,
        );
        let store = Arc::new(MemorySessionStore::new(100, Duration::from_secs(3600)));
        let slot = FlowSlot::<TestState>::new(store, 42);
        let presenter = RecordingPresenter {
            progress_stall: Duration::from_secs(60),
            ..RecordingPresenter::default()
        };

        let tracker = runner.begin(&slot).await;
        let cancel_at = Duration::from_secs(1);
        let canceller = tracker.clone();
        tokio::spawn(async move {
            tokio::time::sleep(cancel_at).await;
            canceller.request_cancel();
        });
        let started = tokio::time::Instant::now();

        let outcome = runner.run((), 3, tracker, &slot, &presenter).await;

        assert!(matches!(outcome, FlowOutcome::Cancelled));
        assert!(started.elapsed() <= cancel_at + poll + delay);
        assert_eq!(presenter.events().first().map(String::as_str), Some("progress 0"));
    }
}
