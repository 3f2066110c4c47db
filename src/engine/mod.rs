/// Session browser over completed collections
pub mod browser;
/// Orchestration loop around a fetch run
pub mod orchestrator;
/// Generic paginated fetch engine
pub mod paginated;
/// Progress counter and cancellation
pub mod progress;

pub use browser::{step, BrowseError, BrowsePage, Direction, SessionBrowser};
pub use orchestrator::{
    FlowError, FlowOutcome, FlowPresenter, FlowRunner, FlowSlot, OrchestratorConfig,
};
pub use paginated::{
    Cancelled, ContentSource, EngineConfig, EntryError, FollowUps, ItemOrdering,
    PaginatedFetchEngine, ResultCollection, ResultItem, RunStats, SkipReason,
};
pub use progress::{ProgressState, ProgressTracker};
