//! Per-session progress counter with a cancellation signal.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Snapshot of a running flow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ProgressState {
    /// Items accepted so far
    pub items_completed: usize,
    /// Whether the user asked to stop
    pub cancel_requested: bool,
}

/// Shared between the engine task, the orchestration loop and the chat
/// handlers of one session. Clones observe the same counter and token.
#[derive(Debug, Clone, Default)]
pub struct ProgressTracker {
    completed: Arc<AtomicUsize>,
    cancel: CancellationToken,
}

impl ProgressTracker {
    /// Creates a tracker at zero progress.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds `n` accepted items.
    pub fn bump(&self, n: usize) {
        self.completed.fetch_add(n, Ordering::Relaxed);
    }

    /// Current state.
    #[must_use]
    pub fn read(&self) -> ProgressState {
        ProgressState {
            items_completed: self.completed.load(Ordering::Relaxed),
            cancel_requested: self.cancel.is_cancelled(),
        }
    }

    /// Signals cancellation. Calling it again has no further effect.
    pub fn request_cancel(&self) {
        self.cancel.cancel();
    }

    /// Whether cancellation was requested.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Resolves once cancellation is requested.
    pub async fn cancelled(&self) {
        self.cancel.cancelled().await;
    }

    /// `round(items_completed / budget * 100)`, capped at 100.
    #[must_use]
    pub fn percent(&self, budget: usize) -> u8 {
        if budget == 0 {
            return 100;
        }
        let done = self.read().items_completed.min(budget);
        let rounded = (done * 200 + budget) / (budget * 2);
        u8::try_from(rounded).unwrap_or(100)
    }

    /// Whether both handles refer to the same flow.
    #[must_use]
    pub fn same_flow(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.completed, &other.completed)
    }
}
