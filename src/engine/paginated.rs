//! Paginated fetch engine.
//!
//! Walks a listing endpoint, resolves every entry through dependent
//! follow-up requests, deduplicates the resulting items and reports progress
//! through a [`ProgressTracker`]. The engine is generic over a
//! [`ContentSource`], which knows the remote API's shape.

use crate::engine::progress::ProgressTracker;
use crate::http::{FetchError, FetchErrorKind, FetchFailure, FetchRequest, FetchResult, HttpFetcher};
use async_trait::async_trait;
use rand::seq::SliceRandom;
use serde_json::Value;
use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info, warn};

/// One normalized result unit.
pub trait ResultItem: Clone + Send + Sync + 'static {
    /// Stable key; no two items of a collection share it.
    fn dedup_key(&self) -> &str;
    /// Key used by [`ItemOrdering::Descending`].
    fn sort_key(&self) -> &str;
    /// Text shown next to the item.
    fn caption(&self) -> String;
    /// Image address, if any.
    fn image(&self) -> Option<&str>;
}

/// Ordered, immutable sequence of items. Cloning shares the storage.
#[derive(Debug)]
pub struct ResultCollection<I> {
    items: Arc<[I]>,
    listed: usize,
}

impl<I> Clone for ResultCollection<I> {
    fn clone(&self) -> Self {
        Self {
            items: Arc::clone(&self.items),
            listed: self.listed,
        }
    }
}

impl<I> ResultCollection<I> {
    /// Wraps already ordered items.
    #[must_use]
    pub fn new(items: Vec<I>) -> Self {
        let listed = items.len();
        Self {
            items: items.into(),
            listed,
        }
    }

    /// Wraps the items of a run whose listing held `listed` entries.
    #[must_use]
    pub fn from_listing(items: Vec<I>, listed: usize) -> Self {
        Self {
            items: items.into(),
            listed,
        }
    }

    /// Listing entries the items were resolved from.
    #[must_use]
    pub const fn listed(&self) -> usize {
        self.listed
    }

    /// Number of items.
    #[must_use]
    pub fn len(&self) -> usize {
        self.items.len()
    }

    /// Whether the collection holds nothing.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Item at `index`.
    #[must_use]
    pub fn get(&self, index: usize) -> Option<&I> {
        self.items.get(index)
    }

    /// Items in order.
    pub fn iter(&self) -> std::slice::Iter<'_, I> {
        self.items.iter()
    }
}

/// Final ordering of a collection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ItemOrdering {
    /// By [`ResultItem::sort_key`], largest first
    Descending,
    /// Random permutation
    Shuffle,
}

/// Why an entry produced no item.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SkipReason {
    /// A follow-up answered 404
    NotFound(String),
    /// A required field was missing or had the wrong type
    Malformed(String),
    /// A non-essential request failed
    Optional(FetchFailure),
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotFound(url) => write!(f, "not found: {url}"),
            Self::Malformed(detail) => write!(f, "malformed entry: {detail}"),
            Self::Optional(failure) => write!(f, "optional request failed: {failure}"),
        }
    }
}

/// Outcome of resolving one listing entry when it yields nothing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EntryError {
    /// Drop this entry and continue
    Skip(SkipReason),
    /// Abort the run with this failure
    Fatal(FetchFailure),
    /// Cancellation observed during resolution
    Cancelled,
}

/// The run stopped because cancellation was requested.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("fetch run cancelled")]
pub struct Cancelled;

/// Knowledge of one remote API.
#[async_trait]
pub trait ContentSource: Send + Sync + 'static {
    /// User input that starts a run
    type Query: Send + Sync + 'static;
    /// One element of the listing
    type Entry: Send + 'static;
    /// Normalized result item
    type Item: ResultItem;

    /// Domain tag used in navigation payloads and logs.
    const TAG: &'static str;

    /// Request for the listing.
    fn listing_request(&self, query: &Self::Query, page_budget: usize) -> FetchRequest;

    /// Extracts entries from the listing payload.
    ///
    /// # Errors
    ///
    /// Returns a description when the payload does not have the expected shape.
    fn entries(&self, listing: &Value) -> Result<Vec<Self::Entry>, String>;

    /// Resolves one entry into zero or more items via follow-up requests.
    async fn resolve(
        &self,
        entry: Self::Entry,
        follow_ups: &mut FollowUps<'_>,
    ) -> Result<Vec<Self::Item>, EntryError>;

    /// Final ordering of accepted items.
    fn ordering(&self) -> ItemOrdering;
}

/// Cancellable follow-up request helper handed to [`ContentSource::resolve`].
pub struct FollowUps<'a> {
    fetcher: &'a dyn HttpFetcher,
    tracker: &'a ProgressTracker,
    delay: Duration,
    calls: usize,
}

impl<'a> FollowUps<'a> {
    fn new(fetcher: &'a dyn HttpFetcher, tracker: &'a ProgressTracker, delay: Duration) -> Self {
        Self {
            fetcher,
            tracker,
            delay,
            calls: 0,
        }
    }

    /// Waits the inter-request delay, then performs the call.
    ///
    /// # Errors
    ///
    /// - [`EntryError::Cancelled`] if cancellation is observed before or
    ///   during the call; the in-flight request is dropped
    /// - [`EntryError::Skip`] with [`SkipReason::NotFound`] on 404
    /// - [`EntryError::Fatal`] for any other failure
    pub async fn fetch(&mut self, request: &FetchRequest) -> Result<Value, EntryError> {
        if self.tracker.is_cancelled() {
            return Err(EntryError::Cancelled);
        }
        if !self.delay.is_zero() {
            tokio::select! {
                () = self.tracker.cancelled() => return Err(EntryError::Cancelled),
                () = tokio::time::sleep(self.delay) => {}
            }
        }

        self.calls += 1;
        let result = tokio::select! {
            () = self.tracker.cancelled() => return Err(EntryError::Cancelled),
            result = self.fetcher.fetch(request) => result,
        };
        if result.is_not_found() {
            return Err(EntryError::Skip(SkipReason::NotFound(result.url)));
        }
        result.into_payload().map_err(EntryError::Fatal)
    }

    /// Follow-up calls made so far.
    #[must_use]
    pub const fn calls(&self) -> usize {
        self.calls
    }
}

/// Counters logged at the end of every run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunStats {
    /// Listing entries seen
    pub entries: usize,
    /// Items accepted into the collection
    pub accepted: usize,
    /// Entries dropped for a [`SkipReason`]
    pub skipped: usize,
    /// Items discarded as duplicates
    pub duplicates: usize,
}

/// Engine tuning.
#[derive(Debug, Clone, Copy)]
pub struct EngineConfig {
    /// Pause before every follow-up request
    pub follow_up_delay: Duration,
}

/// Generic fetch-and-paginate engine.
pub struct PaginatedFetchEngine<S: ContentSource> {
    source: S,
    fetcher: Arc<dyn HttpFetcher>,
    config: EngineConfig,
}

impl<S: ContentSource> PaginatedFetchEngine<S> {
    /// Creates an engine for `source`.
    pub fn new(source: S, fetcher: Arc<dyn HttpFetcher>, config: EngineConfig) -> Self {
        Self {
            source,
            fetcher,
            config,
        }
    }

    /// The content source.
    pub const fn source(&self) -> &S {
        &self.source
    }

    /// Runs the listing and follow-ups until `page_budget` distinct items are
    /// accepted or the listing is exhausted.
    ///
    /// Fetch failures are returned inside the [`FetchResult`]; a listing 404
    /// counts as a failure, follow-up 404s skip their entry.
    ///
    /// # Errors
    ///
    /// Returns [`Cancelled`] when the tracker is cancelled before or during a
    /// network call, or during a delay. No partial collection is returned.
    pub async fn run(
        &self,
        query: &S::Query,
        page_budget: usize,
        tracker: &ProgressTracker,
    ) -> Result<FetchResult<ResultCollection<S::Item>>, Cancelled> {
        if tracker.is_cancelled() {
            return Err(Cancelled);
        }

        let request = self.source.listing_request(query, page_budget);
        let listing = tokio::select! {
            () = tracker.cancelled() => return Err(Cancelled),
            listing = self.fetcher.fetch(&request) => listing,
        };
        let (url, method, status) = (listing.url.clone(), listing.method.clone(), listing.status);

        let failed = |error: FetchError| FetchResult {
            url: url.clone(),
            method: method.clone(),
            status,
            outcome: Err(error),
        };

        if listing.is_not_found() {
            return Ok(failed(FetchError::new(
                FetchErrorKind::ClientError,
                "listing not found",
            )));
        }
        let payload = match listing.outcome {
            Ok(payload) => payload,
            Err(error) => return Ok(failed(error)),
        };
        let entries = match self.source.entries(&payload) {
            Ok(entries) => entries,
            Err(detail) => return Ok(failed(FetchError::new(FetchErrorKind::Decode, detail))),
        };

        let mut stats = RunStats {
            entries: entries.len(),
            ..RunStats::default()
        };
        let mut seen = HashSet::new();
        let mut items = Vec::new();
        let mut follow_ups = FollowUps::new(self.fetcher.as_ref(), tracker, self.config.follow_up_delay);

        for entry in entries {
            if items.len() >= page_budget {
                break;
            }
            if tracker.is_cancelled() {
                return Err(Cancelled);
            }

            match self.source.resolve(entry, &mut follow_ups).await {
                Ok(resolved) => {
                    for item in resolved {
                        if items.len() >= page_budget {
                            break;
                        }
                        if !seen.insert(item.dedup_key().to_string()) {
                            stats.duplicates += 1;
                            debug!(source = S::TAG, key = item.dedup_key(), "Duplicate item discarded");
                            continue;
                        }
                        items.push(item);
                        tracker.bump(1);
                    }
                }
                Err(EntryError::Skip(reason)) => {
                    stats.skipped += 1;
                    warn!(source = S::TAG, %reason, "Entry skipped");
                }
                Err(EntryError::Fatal(failure)) => {
                    warn!(source = S::TAG, error = %failure, "Run aborted by follow-up failure");
                    return Ok(FetchResult::from_failure(failure));
                }
                Err(EntryError::Cancelled) => return Err(Cancelled),
            }
        }

        match self.source.ordering() {
            ItemOrdering::Descending => items.sort_by(|a, b| b.sort_key().cmp(a.sort_key())),
            ItemOrdering::Shuffle => items.shuffle(&mut rand::thread_rng()),
        }
        stats.accepted = items.len();
        info!(
            source = S::TAG,
            entries = stats.entries,
            accepted = stats.accepted,
            skipped = stats.skipped,
            duplicates = stats.duplicates,
            follow_ups = follow_ups.calls(),
            "Fetch run finished"
        );

        Ok(FetchResult {
            url,
            method,
            status,
            outcome: Ok(ResultCollection::from_listing(items, stats.entries)),
        })
    }
}
