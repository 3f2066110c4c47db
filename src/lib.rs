#![warn(missing_docs)]
//! Mediascout
//!
//! A Telegram bot that looks up new music releases on Discogs and movie
//! recommendations on kinopoisk.dev. Long fetches run in the background with
//! progress reporting and cancellation; results are browsed page by page.

/// Telegram bot implementation
pub mod bot;
/// Configuration management
pub mod config;
/// Fetch engine, progress tracking, orchestration and browsing
pub mod engine;
/// Outbound HTTP with uniform result envelopes
pub mod http;
/// Per-chat session state
pub mod session;
/// Discogs and kinopoisk.dev content sources
pub mod sources;
pub mod utils;
