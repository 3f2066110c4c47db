//! New album releases from the Discogs database API.
//!
//! The listing is a style/year search. Every result points either to a
//! master record, whose main release is fetched next, or directly to a
//! release.

use crate::engine::{ContentSource, EntryError, FollowUps, ItemOrdering, ResultItem, SkipReason};
use crate::http::FetchRequest;
use async_trait::async_trait;
use chrono::Datelike;
use serde_json::Value;
use std::time::Duration;
use tracing::debug;

/// Styles offered to the user, with their button labels.
pub const STYLES: [(&str, &str); 10] = [
    ("Punk", "1⃣ Punk"),
    ("Hardcore", "2⃣ Hardcore"),
    ("Crust", "3⃣ Crust"),
    ("Grindcore", "4⃣ Grindcore"),
    ("Post-Punk", "5⃣ Post-Punk"),
    ("Heavy Metal", "6⃣ Heavy Metal"),
    ("Thrash", "7⃣ Thrash"),
    ("Crossover thrash", "8⃣ Crossover thrash"),
    ("Black Metal", "9⃣ Black Metal"),
    ("Death Metal", "1⃣0⃣ Death Metal"),
];

/// Discogs rejects requests without a browser-like agent.
const USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 \
                          (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36";

/// Whether `style` is one of [`STYLES`].
#[must_use]
pub fn is_known_style(style: &str) -> bool {
    STYLES.iter().any(|(name, _)| *name == style)
}

/// Discogs endpoint and credentials.
#[derive(Debug, Clone)]
pub struct DiscogsConfig {
    /// Database search endpoint
    pub search_url: String,
    /// Consumer key
    pub key: Option<String>,
    /// Consumer secret
    pub secret: Option<String>,
    /// Timeout of master and release requests
    pub follow_up_timeout: Duration,
}

/// Search parameters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiscogsQuery {
    /// Music style, e.g. `Punk`
    pub style: String,
    /// Release year
    pub year: i32,
}

impl DiscogsQuery {
    /// Query for `style` in the current year.
    pub fn this_year(style: impl Into<String>) -> Self {
        Self {
            style: style.into(),
            year: chrono::Local::now().year(),
        }
    }
}

/// One search result.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DiscogsEntry {
    /// Master record; its main release holds the details
    Master(String),
    /// Release record
    Release(String),
}

/// A released album.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Album {
    /// Album title
    pub title: String,
    /// First credited artist
    pub artist: String,
    /// Public Discogs page
    pub uri: String,
    /// Format descriptions, comma separated
    pub formats: String,
    /// Release date as published (`YYYY-MM-DD` or shorter)
    pub released: String,
    /// Country of release
    pub country: String,
    /// Styles, comma separated
    pub styles: String,
    /// Number of tracks
    pub track_count: usize,
    /// 150px cover image
    pub cover: String,
}

fn joined_strings(value: &Value) -> String {
    value
        .as_array()
        .map(|items| {
            items
                .iter()
                .filter_map(Value::as_str)
                .collect::<Vec<_>>()
                .join(", ")
        })
        .unwrap_or_default()
}

fn text(value: &Value) -> String {
    value.as_str().unwrap_or_default().to_string()
}

impl Album {
    /// Extracts an album from a release payload.
    ///
    /// # Errors
    ///
    /// Returns the name of the first missing required field (title, artist
    /// or cover image).
    pub fn from_release(release: &Value) -> Result<Self, String> {
        let title = release["title"].as_str().ok_or("title")?;
        let artist = release["artists"][0]["name"].as_str().ok_or("artists[0].name")?;
        let cover = release["images"][0]["uri150"]
            .as_str()
            .filter(|uri| !uri.is_empty())
            .ok_or("images[0].uri150")?;

        Ok(Self {
            title: title.to_string(),
            artist: artist.to_string(),
            uri: text(&release["uri"]),
            formats: joined_strings(&release["formats"][0]["descriptions"]),
            released: text(&release["released"]),
            country: text(&release["country"]),
            styles: joined_strings(&release["styles"]),
            track_count: release["tracklist"].as_array().map_or(0, Vec::len),
            cover: cover.to_string(),
        })
    }
}

impl ResultItem for Album {
    fn dedup_key(&self) -> &str {
        &self.cover
    }

    fn sort_key(&self) -> &str {
        &self.released
    }

    fn caption(&self) -> String {
        format!(
            "{}\n\nСтрана: {}\nНазвание альбома: {}\nФормат: {}\nЖанры: {}\nДата выхода: {}\n\n\
             Количество песен в альбоме: {}\n\n{}",
            self.artist,
            self.country,
            self.title,
            self.formats,
            self.styles,
            self.released,
            self.track_count,
            self.uri
        )
    }

    fn image(&self) -> Option<&str> {
        Some(&self.cover)
    }
}

/// Discogs [`ContentSource`].
pub struct Discogs {
    config: DiscogsConfig,
}

impl Discogs {
    /// Creates the source.
    #[must_use]
    pub const fn new(config: DiscogsConfig) -> Self {
        Self { config }
    }

    fn follow_up(&self, url: &str) -> FetchRequest {
        FetchRequest::get(url)
            .header("User-Agent", USER_AGENT)
            .header("Accept", "application/json")
            .timeout(self.config.follow_up_timeout)
    }
}

#[async_trait]
impl ContentSource for Discogs {
    type Query = DiscogsQuery;
    type Entry = DiscogsEntry;
    type Item = Album;

    const TAG: &'static str = "discogs";

    fn listing_request(&self, query: &DiscogsQuery, page_budget: usize) -> FetchRequest {
        let mut request = FetchRequest::get(&self.config.search_url);
        if let Some(key) = &self.config.key {
            request = request.query("key", key.as_str());
        }
        if let Some(secret) = &self.config.secret {
            request = request.query("secret", secret.as_str());
        }
        request
            .query("style", query.style.as_str())
            .query("year", query.year.to_string())
            .query("format", "Album")
            .query("per_page", page_budget.to_string())
            .query("page", "1")
            .query("sort", "year")
            .query("sort_order", "desc")
            .header("User-Agent", USER_AGENT)
            .header("Accept", "application/json")
    }

    fn entries(&self, listing: &Value) -> Result<Vec<DiscogsEntry>, String> {
        let results = listing["results"]
            .as_array()
            .ok_or_else(|| "search response has no results array".to_string())?;

        Ok(results
            .iter()
            .filter_map(|result| {
                let master = result["master_url"].as_str().filter(|u| !u.is_empty());
                let resource = result["resource_url"].as_str().filter(|u| !u.is_empty());
                match (master, resource) {
                    (Some(url), _) => Some(DiscogsEntry::Master(url.to_string())),
                    (None, Some(url)) => Some(DiscogsEntry::Release(url.to_string())),
                    (None, None) => {
                        debug!(id = %result["id"], "Search result without links");
                        None
                    }
                }
            })
            .collect())
    }

    async fn resolve(
        &self,
        entry: DiscogsEntry,
        follow_ups: &mut FollowUps<'_>,
    ) -> Result<Vec<Album>, EntryError> {
        let release_url = match entry {
            DiscogsEntry::Master(url) => {
                let master = follow_ups.fetch(&self.follow_up(&url)).await?;
                master["main_release_url"]
                    .as_str()
                    .map(ToString::to_string)
                    .ok_or_else(|| {
                        EntryError::Skip(SkipReason::Malformed(format!(
                            "master {url} has no main_release_url"
                        )))
                    })?
            }
            DiscogsEntry::Release(url) => url,
        };

        let release = follow_ups.fetch(&self.follow_up(&release_url)).await?;
        Album::from_release(&release)
            .map(|album| vec![album])
            .map_err(|field| {
                EntryError::Skip(SkipReason::Malformed(format!("release {release_url}: {field}")))
            })
    }

    fn ordering(&self) -> ItemOrdering {
        ItemOrdering::Descending
    }
}
