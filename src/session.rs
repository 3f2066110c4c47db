//! Per-chat session state.
//!
//! A session is keyed by chat id and holds the dialogue state of that chat.
//! [`MemorySessionStore`] keeps it in a `moka` cache with idle expiry, so
//! abandoned browse sessions release their collections.

use crate::engine::paginated::ResultCollection;
use crate::engine::progress::ProgressTracker;
use async_trait::async_trait;
use moka::future::Cache;
use std::time::Duration;

/// Session key (Telegram chat id).
pub type SessionId = i64;

/// Phase of one content flow.
#[derive(Debug, Clone)]
pub enum FlowPhase<I> {
    /// Before a fetch, or after it was cancelled or failed
    Idle,
    /// A fetch is running
    Fetching(ProgressTracker),
    /// The fetch succeeded and the collection is being browsed
    Browsing(ResultCollection<I>),
}

impl<I> FlowPhase<I> {
    /// Whether this phase is the fetch tracked by `tracker`.
    #[must_use]
    pub fn is_fetching_with(&self, tracker: &ProgressTracker) -> bool {
        matches!(self, Self::Fetching(current) if current.same_flow(tracker))
    }
}

/// Dialogue states that embed a [`FlowPhase`] of item type `I`.
pub trait FlowState<I>: Sized {
    /// Wraps a phase into the dialogue state.
    fn lift(phase: FlowPhase<I>) -> Self;

    /// The embedded phase, if this state belongs to the flow.
    fn phase(&self) -> Option<&FlowPhase<I>>;
}

/// Keyed storage of session state.
#[async_trait]
pub trait SessionStore<D>: Send + Sync {
    /// Current state, if any.
    async fn get(&self, id: SessionId) -> Option<D>;
    /// Replaces the state.
    async fn set(&self, id: SessionId, state: D);
    /// Removes the state.
    async fn clear(&self, id: SessionId);
}

/// In-memory [`SessionStore`] with idle expiry.
pub struct MemorySessionStore<D> {
    cache: Cache<SessionId, D>,
}

impl<D: Clone + Send + Sync + 'static> MemorySessionStore<D> {
    /// Creates a store holding at most `max_capacity` sessions, each evicted
    /// after `idle` without reads or writes.
    #[must_use]
    pub fn new(max_capacity: u64, idle: Duration) -> Self {
        let cache = Cache::builder()
            .max_capacity(max_capacity)
            .time_to_idle(idle)
            .build();
        Self { cache }
    }

    /// Number of live sessions (approximate until pending tasks run).
    #[must_use]
    pub fn len(&self) -> u64 {
        self.cache.entry_count()
    }

    /// Whether no session is stored.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    #[cfg(test)]
    pub(crate) async fn sync(&self) {
        self.cache.run_pending_tasks().await;
    }
}

#[async_trait]
impl<D: Clone + Send + Sync + 'static> SessionStore<D> for MemorySessionStore<D> {
    async fn get(&self, id: SessionId) -> Option<D> {
        self.cache.get(&id).await
    }

    async fn set(&self, id: SessionId, state: D) {
        self.cache.insert(id, state).await;
    }

    async fn clear(&self, id: SessionId) {
        self.cache.invalidate(&id).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_set_get_clear() {
        let store = MemorySessionStore::<u32>::new(10, Duration::from_secs(60));

        assert_eq!(store.get(1).await, None);
        store.set(1, 7).await;
        store.set(2, 9).await;
        assert_eq!(store.get(1).await, Some(7));

        store.clear(1).await;
        store.sync().await;

        assert_eq!(store.get(1).await, None);
        assert_eq!(store.get(2).await, Some(9));
        assert_eq!(store.len(), 1);
    }

    #[tokio::test]
    async fn test_idle_sessions_expire() {
        let store = MemorySessionStore::<u32>::new(10, Duration::from_millis(50));
        store.set(1, 7).await;

        tokio::time::sleep(Duration::from_millis(120)).await;
        store.sync().await;

        assert_eq!(store.get(1).await, None);
        assert!(store.is_empty());
    }

    #[test]
    fn test_fetching_phase_matches_own_tracker_only() {
        let tracker = ProgressTracker::new();
        let phase: FlowPhase<()> = FlowPhase::Fetching(tracker.clone());

        assert!(phase.is_fetching_with(&tracker));
        assert!(!phase.is_fetching_with(&ProgressTracker::new()));
        assert!(!FlowPhase::<()>::Idle.is_fetching_with(&tracker));
    }
}
