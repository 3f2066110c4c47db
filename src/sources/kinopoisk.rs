//! Movie recommendations from the kinopoisk.dev API.
//!
//! The listing is a by-name search whose first match seeds the
//! recommendation. Each entry is a rating bucket: titles sharing up to two of
//! the seed's genres and its type, either well rated (`6-10`, primary) or
//! not (`1-5`, secondary).

use crate::engine::{ContentSource, EntryError, FollowUps, ItemOrdering, ResultItem, SkipReason};
use crate::http::{FetchErrorKind, FetchRequest};
use async_trait::async_trait;
use rand::seq::SliceRandom;
use serde_json::Value;
use std::time::Duration;
use tracing::{debug, warn};

/// Titles kept from each bucket.
pub const TITLES_PER_BUCKET: usize = 25;
/// Bucket size requested first.
const BUCKET_LIMIT: &str = "250";
/// Bucket size requested after a timeout.
const BUCKET_RETRY_LIMIT: &str = "10";
/// Characters of the full description shown in the caption.
const DESCRIPTION_PREVIEW_CHARS: usize = 200;

/// kinopoisk.dev endpoint and credentials.
#[derive(Debug, Clone)]
pub struct KinopoiskConfig {
    /// API root, e.g. `https://api.kinopoisk.dev`
    pub base_url: String,
    /// Value of the `X-API-KEY` header
    pub api_key: Option<String>,
    /// Per-request timeout
    pub timeout: Duration,
}

/// Title typed by the user.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KinopoiskQuery {
    /// Movie name to search for
    pub title: String,
}

/// One rating bucket of the recommendation.
#[derive(Debug, Clone)]
pub struct RatingBucket {
    /// Prepared request
    pub request: FetchRequest,
    /// Failures of the primary bucket abort the run
    pub primary: bool,
}

/// A recommended title.
#[derive(Debug, Clone, PartialEq)]
pub struct Movie {
    /// kinopoisk id
    pub id: String,
    /// Main name
    pub name: String,
    /// Original or alternative name
    pub alternative_name: Option<String>,
    /// `movie`, `tv-series`, `cartoon`...
    pub kind: Option<String>,
    /// Release year
    pub year: Option<i64>,
    /// Full description, already cut to the preview length
    pub description: Option<String>,
    /// One-line description
    pub short_description: Option<String>,
    /// Length in minutes
    pub length: Option<i64>,
    /// kinopoisk rating
    pub rating_kp: Option<f64>,
    /// IMDb rating
    pub rating_imdb: Option<f64>,
    /// Genre names
    pub genres: Vec<String>,
    /// Country names
    pub countries: Vec<String>,
    /// Poster address
    pub poster: Option<String>,
}

fn non_empty(value: &Value) -> Option<String> {
    value
        .as_str()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| html_escape::decode_html_entities(s).into_owned())
}

fn names(value: &Value) -> Vec<String> {
    value
        .as_array()
        .map(|items| items.iter().filter_map(|i| non_empty(&i["name"])).collect())
        .unwrap_or_default()
}

fn positive(value: &Value) -> Option<f64> {
    value.as_f64().filter(|v| *v > 0.0)
}

impl Movie {
    /// Extracts a movie from a search document.
    ///
    /// # Errors
    ///
    /// Returns the missing field when the document has no id or no name.
    pub fn from_doc(doc: &Value) -> Result<Self, String> {
        let id = doc["id"].as_i64().ok_or("id")?;
        let name = non_empty(&doc["name"])
            .or_else(|| non_empty(&doc["alternativeName"]))
            .ok_or("name")?;

        let description = non_empty(&doc["description"]).map(|text| {
            let preview: String = text.chars().take(DESCRIPTION_PREVIEW_CHARS).collect();
            format!("{preview}....")
        });

        Ok(Self {
            id: id.to_string(),
            name,
            alternative_name: non_empty(&doc["alternativeName"]),
            kind: non_empty(&doc["type"]),
            year: doc["year"].as_i64().filter(|y| *y > 0),
            description,
            short_description: non_empty(&doc["shortDescription"]),
            length: doc["movieLength"].as_i64().filter(|l| *l > 0),
            rating_kp: positive(&doc["rating"]["kp"]),
            rating_imdb: positive(&doc["rating"]["imdb"]),
            genres: names(&doc["genres"]),
            countries: names(&doc["countries"]),
            poster: non_empty(&doc["poster"]["url"]),
        })
    }
}

impl ResultItem for Movie {
    fn dedup_key(&self) -> &str {
        &self.id
    }

    fn sort_key(&self) -> &str {
        &self.id
    }

    fn caption(&self) -> String {
        let mut caption = format!("{}\n\n", self.name);
        let mut line = |label: &str, value: Option<String>| {
            if let Some(value) = value {
                caption.push_str(label);
                caption.push_str(&value);
                caption.push('\n');
            }
        };
        line("Другое название: ", self.alternative_name.clone());
        line("Тип видео: ", self.kind.clone());
        line("Год выхода: ", self.year.map(|y| y.to_string()));
        line("Описание: ", self.description.clone());
        line("Короткое описание: ", self.short_description.clone());
        line("Длина фильма: ", self.length.map(|l| format!("{l} м.")));
        line("Рейтинг на кинопоиске: ", self.rating_kp.map(|r| r.to_string()));
        line("Рейтинг на imdb: ", self.rating_imdb.map(|r| r.to_string()));
        line(
            "Список жанров: ",
            Some(self.genres.join(", ")).filter(|s| !s.is_empty()),
        );
        line(
            "Страны: ",
            Some(self.countries.join(", ")).filter(|s| !s.is_empty()),
        );
        caption.trim_end().to_string()
    }

    fn image(&self) -> Option<&str> {
        self.poster.as_deref()
    }
}

/// kinopoisk.dev [`ContentSource`].
pub struct Kinopoisk {
    config: KinopoiskConfig,
}

impl Kinopoisk {
    /// Creates the source.
    #[must_use]
    pub const fn new(config: KinopoiskConfig) -> Self {
        Self { config }
    }

    fn request(&self, path: &str) -> FetchRequest {
        let mut request = FetchRequest::get(format!(
            "{}{path}",
            self.config.base_url.trim_end_matches('/')
        ))
        .header("accept", "application/json")
        .timeout(self.config.timeout);
        if let Some(key) = &self.config.api_key {
            request = request.header("X-API-KEY", key.as_str());
        }
        request
    }

    fn bucket(&self, genres: &[String], kind: Option<&str>, rating: &str) -> FetchRequest {
        let mut request = self
            .request("/v1.4/movie")
            .query("page", "1")
            .query("limit", BUCKET_LIMIT);
        for genre in genres {
            request = request.query("genres.name", genre.as_str());
        }
        if let Some(kind) = kind {
            request = request.query("type", kind);
        }
        request.query("rating.kp", rating)
    }
}

#[async_trait]
impl ContentSource for Kinopoisk {
    type Query = KinopoiskQuery;
    type Entry = RatingBucket;
    type Item = Movie;

    const TAG: &'static str = "kinopoisk";

    fn listing_request(&self, query: &KinopoiskQuery, _page_budget: usize) -> FetchRequest {
        self.request("/v1.4/movie/search")
            .query("page", "1")
            .query("limit", "10")
            .query("query", query.title.as_str())
    }

    fn entries(&self, listing: &Value) -> Result<Vec<RatingBucket>, String> {
        let docs = listing["docs"]
            .as_array()
            .ok_or_else(|| "search response has no docs array".to_string())?;
        let Some(seed) = docs.first() else {
            return Ok(Vec::new());
        };

        let seed_genres = names(&seed["genres"]);
        let genres: Vec<String> = seed_genres
            .choose_multiple(&mut rand::thread_rng(), 2)
            .cloned()
            .collect();
        let kind = seed["type"].as_str();
        debug!(seed = %seed["id"], ?genres, ?kind, "Recommendation seed");

        Ok(vec![
            RatingBucket {
                request: self.bucket(&genres, kind, "6-10"),
                primary: true,
            },
            RatingBucket {
                request: self.bucket(&genres, kind, "1-5"),
                primary: false,
            },
        ])
    }

    async fn resolve(
        &self,
        bucket: RatingBucket,
        follow_ups: &mut FollowUps<'_>,
    ) -> Result<Vec<Movie>, EntryError> {
        let fetched = match follow_ups.fetch(&bucket.request).await {
            Err(EntryError::Fatal(failure)) if failure.kind() == FetchErrorKind::Timeout => {
                warn!(url = %failure.url, "Bucket timed out, retrying with a smaller limit");
                let smaller = bucket.request.clone().replace_query("limit", BUCKET_RETRY_LIMIT);
                follow_ups.fetch(&smaller).await
            }
            other => other,
        };
        let body = match fetched {
            Ok(body) => body,
            Err(EntryError::Fatal(failure)) if !bucket.primary => {
                return Err(EntryError::Skip(SkipReason::Optional(failure)));
            }
            Err(err) => return Err(err),
        };

        let docs = body["docs"].as_array().ok_or_else(|| {
            EntryError::Skip(SkipReason::Malformed("bucket has no docs array".to_string()))
        })?;
        let mut movies: Vec<Movie> = docs
            .iter()
            .filter_map(|doc| match Movie::from_doc(doc) {
                Ok(movie) => Some(movie),
                Err(field) => {
                    warn!(field = %field, "Recommendation without required field dropped");
                    None
                }
            })
            .collect();
        movies.shuffle(&mut rand::thread_rng());
        movies.truncate(TITLES_PER_BUCKET);
        Ok(movies)
    }

    fn ordering(&self) -> ItemOrdering {
        ItemOrdering::Shuffle
    }
}
