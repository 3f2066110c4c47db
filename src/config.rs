//! Configuration and settings management
//!
//! Loads settings from config files and environment variables and defines
//! the bot's constants.

use crate::engine::{EngineConfig, OrchestratorConfig};
use crate::http::FetcherConfig;
use crate::sources::{DiscogsConfig, KinopoiskConfig};
use config::{Config, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Application settings loaded from config files and the environment
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct Settings {
    /// Telegram Bot API token
    pub telegram_token: String,

    /// Discogs consumer key
    pub discogs_key: Option<String>,
    /// Discogs consumer secret
    pub discogs_secret: Option<String>,
    /// kinopoisk.dev API key
    pub kinopoisk_api_key: Option<String>,

    /// Discogs database search endpoint
    #[serde(default = "default_discogs_search_url")]
    pub discogs_search_url: String,
    /// kinopoisk.dev API root
    #[serde(default = "default_kinopoisk_base_url")]
    pub kinopoisk_base_url: String,

    /// Pause before every follow-up request, in milliseconds
    #[serde(default = "default_request_delay_ms")]
    pub request_delay_ms: u64,
    /// Progress refresh interval, in milliseconds
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    /// Default HTTP timeout, in seconds
    #[serde(default = "default_http_timeout_secs")]
    pub http_timeout_secs: u64,
    /// Timeout of Discogs master/release requests, in seconds
    #[serde(default = "default_follow_up_timeout_secs")]
    pub follow_up_timeout_secs: u64,
    /// Retries of transient HTTP failures
    #[serde(default = "default_http_max_retries")]
    pub http_max_retries: usize,

    /// Albums collected per Discogs search
    #[serde(default = "default_page_budget")]
    pub discogs_page_budget: usize,
    /// Titles collected per recommendation
    #[serde(default = "default_page_budget")]
    pub kinopoisk_page_budget: usize,

    /// Idle time after which a chat session is dropped, in seconds
    #[serde(default = "default_session_idle_secs")]
    pub session_idle_secs: u64,
    /// Maximum number of live chat sessions
    #[serde(default = "default_session_max_capacity")]
    pub session_max_capacity: u64,
}

fn default_discogs_search_url() -> String {
    DISCOGS_SEARCH_URL.to_string()
}

fn default_kinopoisk_base_url() -> String {
    KINOPOISK_BASE_URL.to_string()
}

const fn default_request_delay_ms() -> u64 {
    2500
}

const fn default_poll_interval_ms() -> u64 {
    2000
}

const fn default_http_timeout_secs() -> u64 {
    DEFAULT_HTTP_TIMEOUT_SECS
}

const fn default_follow_up_timeout_secs() -> u64 {
    100
}

const fn default_http_max_retries() -> usize {
    DEFAULT_HTTP_MAX_RETRIES
}

const fn default_page_budget() -> usize {
    50
}

const fn default_session_idle_secs() -> u64 {
    3600
}

const fn default_session_max_capacity() -> u64 {
    10_000
}

impl Settings {
    /// Create new settings by loading from environment and files
    ///
    /// # Examples
    ///
    /// ```no_run
    /// use mediascout::config::Settings;
    ///
    /// let settings = Settings::new().expect("Failed to load configuration");
    /// ```
    ///
    /// # Errors
    ///
    /// Returns a `ConfigError` if loading fails.
    pub fn new() -> Result<Self, ConfigError> {
        let run_mode = std::env::var("RUN_MODE").unwrap_or_else(|_| "development".into());

        let s = Config::builder()
            // Start off by merging in the "default" configuration file
            .add_source(File::with_name("config/default").required(false))
            // Add in the current environment file
            .add_source(File::with_name(&format!("config/{run_mode}")).required(false))
            // Add in a local configuration file
            // This file shouldn't be checked into git
            .add_source(File::with_name("config/local").required(false))
            // Add in settings from the environment (with a prefix of APP)
            // Eg.. `APP__POLL_INTERVAL_MS=500 ./target/app` would set the `poll_interval_ms` key
            .add_source(Environment::with_prefix("APP").separator("__"))
            // Also add settings from environment variables directly (without prefix)
            // ignore_empty treats empty env vars as unset
            .add_source(Environment::default().ignore_empty(true))
            .build()?;

        s.try_deserialize()
    }

    /// HTTP client policy
    #[must_use]
    pub fn fetcher(&self) -> FetcherConfig {
        FetcherConfig {
            timeout: Duration::from_secs(self.http_timeout_secs),
            max_retries: self.http_max_retries,
            ..FetcherConfig::default()
        }
    }

    /// Engine tuning shared by both sources
    #[must_use]
    pub const fn engine(&self) -> EngineConfig {
        EngineConfig {
            follow_up_delay: Duration::from_millis(self.request_delay_ms),
        }
    }

    /// Orchestration loop tuning
    #[must_use]
    pub const fn orchestrator(&self) -> OrchestratorConfig {
        OrchestratorConfig {
            poll_interval: Duration::from_millis(self.poll_interval_ms),
        }
    }

    /// Discogs source configuration
    #[must_use]
    pub fn discogs(&self) -> DiscogsConfig {
        DiscogsConfig {
            search_url: self.discogs_search_url.clone(),
            key: self.discogs_key.clone(),
            secret: self.discogs_secret.clone(),
            follow_up_timeout: Duration::from_secs(self.follow_up_timeout_secs),
        }
    }

    /// kinopoisk.dev source configuration
    #[must_use]
    pub fn kinopoisk(&self) -> KinopoiskConfig {
        KinopoiskConfig {
            base_url: self.kinopoisk_base_url.clone(),
            api_key: self.kinopoisk_api_key.clone(),
            timeout: Duration::from_secs(self.http_timeout_secs),
        }
    }

    /// Session expiry after inactivity
    #[must_use]
    pub const fn session_idle(&self) -> Duration {
        Duration::from_secs(self.session_idle_secs)
    }

    /// Names of the API credentials left unset
    #[must_use]
    pub fn missing_credentials(&self) -> Vec<&'static str> {
        let mut missing = Vec::new();
        if self.discogs_key.is_none() {
            missing.push("DISCOGS_KEY");
        }
        if self.discogs_secret.is_none() {
            missing.push("DISCOGS_SECRET");
        }
        if self.kinopoisk_api_key.is_none() {
            missing.push("KINOPOISK_API_KEY");
        }
        missing
    }
}

/// Discogs database search endpoint
pub const DISCOGS_SEARCH_URL: &str = "https://api.discogs.com/database/search";
/// kinopoisk.dev API root
pub const KINOPOISK_BASE_URL: &str = "https://api.kinopoisk.dev";

// HTTP client configuration
/// Default timeout for outbound API requests
pub const DEFAULT_HTTP_TIMEOUT_SECS: u64 = 30;
/// Retries for transient outbound failures
pub const DEFAULT_HTTP_MAX_RETRIES: usize = 2;
/// Base of the outbound retry backoff
pub const HTTP_INITIAL_BACKOFF_MS: u64 = 500;
/// Ceiling of the outbound retry backoff
pub const HTTP_MAX_BACKOFF_MS: u64 = 4000;

// Telegram API retry configuration
/// Base of the Telegram API retry backoff
pub const TELEGRAM_API_INITIAL_BACKOFF_MS: u64 = 500;
/// Ceiling of the Telegram API retry backoff
pub const TELEGRAM_API_MAX_BACKOFF_MS: u64 = 4000;
/// Retries of a failed Telegram API call
pub const TELEGRAM_API_MAX_RETRIES: usize = 3;

// Telegram limits
/// Maximum photo caption length
pub const TELEGRAM_CAPTION_LIMIT: usize = 1024;
