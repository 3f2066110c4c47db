/// General command, menu and navigation handlers
pub mod handlers;
/// Telegram rendering of flow progress and results
pub mod presenter;
/// Resilient messaging with automatic retry for Telegram API operations
pub mod resilient;
/// Dispatcher setup and handler wiring
pub mod runner;
/// User state and dialogue management
pub mod state;
/// Dialogue storage over the session cache
pub mod storage;
/// View layer for UI components (keyboards, messages)
pub mod views;

pub use runner::run_bot;
