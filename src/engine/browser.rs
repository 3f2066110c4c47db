//! Page-by-page browsing over a completed [`ResultCollection`].
//!
//! Navigation payloads have the form `"<tag> <prev|next> <cursor>"`, where
//! `cursor` is the index of the item currently shown.

use crate::engine::paginated::{ResultCollection, ResultItem};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Invalid navigation request. Session state is never touched when this is
/// returned.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BrowseError {
    /// Malformed or out-of-range payload
    #[error("bad navigation request: {0}")]
    BadRequest(String),
}

/// Navigation direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// One item back
    Prev,
    /// One item forward
    Next,
}

impl Direction {
    /// Signed cursor delta.
    #[must_use]
    pub const fn delta(self) -> isize {
        match self {
            Self::Prev => -1,
            Self::Next => 1,
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Prev => "prev",
            Self::Next => "next",
        })
    }
}

impl FromStr for Direction {
    type Err = BrowseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "prev" => Ok(Self::Prev),
            "next" => Ok(Self::Next),
            other => Err(BrowseError::BadRequest(format!("unknown direction {other:?}"))),
        }
    }
}

/// Moves `cursor` by `delta`, clamped to `[0, len - 1]`.
#[must_use]
pub fn step(len: usize, cursor: usize, delta: isize) -> usize {
    if len == 0 {
        return 0;
    }
    let last = len - 1;
    let target = if delta.is_negative() {
        cursor.saturating_sub(delta.unsigned_abs())
    } else {
        cursor.saturating_add(delta.unsigned_abs())
    };
    target.min(last)
}

/// Everything needed to display one item.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BrowsePage {
    /// Item description
    pub caption: String,
    /// Item image address
    pub image: Option<String>,
    /// Index of the item shown
    pub cursor: usize,
    /// Collection length
    pub len: usize,
    /// Payload of the "back" control
    pub prev: String,
    /// Payload of the "forward" control
    pub next: String,
}

/// Renders and navigates collections of one domain.
#[derive(Debug, Clone, Copy)]
pub struct SessionBrowser {
    tag: &'static str,
}

impl SessionBrowser {
    /// Creates a browser whose payloads start with `tag`.
    #[must_use]
    pub const fn new(tag: &'static str) -> Self {
        Self { tag }
    }

    /// Domain tag.
    #[must_use]
    pub const fn tag(&self) -> &'static str {
        self.tag
    }

    /// Whether `payload` belongs to this browser.
    #[must_use]
    pub fn owns(&self, payload: &str) -> bool {
        payload
            .split_once(' ')
            .is_some_and(|(tag, _)| tag == self.tag)
    }

    /// Navigation payload for `direction` from `cursor`.
    #[must_use]
    pub fn payload(&self, direction: Direction, cursor: usize) -> String {
        format!("{} {direction} {cursor}", self.tag)
    }

    /// Renders the item at `cursor`.
    ///
    /// # Errors
    ///
    /// Returns [`BrowseError::BadRequest`] when `cursor` is out of range.
    pub fn render<I: ResultItem>(
        &self,
        collection: &ResultCollection<I>,
        cursor: usize,
    ) -> Result<BrowsePage, BrowseError> {
        let item = collection.get(cursor).ok_or_else(|| {
            BrowseError::BadRequest(format!(
                "cursor {cursor} outside collection of {}",
                collection.len()
            ))
        })?;
        Ok(BrowsePage {
            caption: item.caption(),
            image: item.image().map(ToString::to_string),
            cursor,
            len: collection.len(),
            prev: self.payload(Direction::Prev, cursor),
            next: self.payload(Direction::Next, cursor),
        })
    }

    /// Parses a payload into direction and cursor.
    ///
    /// # Errors
    ///
    /// Returns [`BrowseError::BadRequest`] for a foreign tag, unknown
    /// direction or non-numeric cursor.
    pub fn parse(&self, payload: &str) -> Result<(Direction, usize), BrowseError> {
        let mut parts = payload.split(' ');
        let (Some(tag), Some(direction), Some(cursor), None) =
            (parts.next(), parts.next(), parts.next(), parts.next())
        else {
            return Err(BrowseError::BadRequest(format!("malformed payload {payload:?}")));
        };
        if tag != self.tag {
            return Err(BrowseError::BadRequest(format!("foreign payload {payload:?}")));
        }
        let direction = direction.parse()?;
        let cursor = cursor
            .parse::<usize>()
            .map_err(|e| BrowseError::BadRequest(format!("cursor {cursor:?}: {e}")))?;
        Ok((direction, cursor))
    }

    /// Applies a navigation payload and renders the resulting page.
    ///
    /// # Errors
    ///
    /// Returns [`BrowseError::BadRequest`] when the payload is malformed or
    /// its cursor is outside the collection.
    pub fn navigate<I: ResultItem>(
        &self,
        collection: &ResultCollection<I>,
        payload: &str,
    ) -> Result<BrowsePage, BrowseError> {
        let (direction, cursor) = self.parse(payload)?;
        if cursor >= collection.len() {
            return Err(BrowseError::BadRequest(format!(
                "cursor {cursor} outside collection of {}",
                collection.len()
            )));
        }
        self.render(collection, step(collection.len(), cursor, direction.delta()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::paginated::testing::Track;
    use proptest::prelude::*;

    fn tracks(n: usize) -> ResultCollection<Track> {
        ResultCollection::new(
            (0..n)
                .map(|i| Track {
                    key: format!("t{i}"),
                    date: "2024-01-01".to_string(),
                })
                .collect(),
        )
    }

    #[test]
    fn test_four_item_walk_clamps_at_both_ends() {
        let browser = SessionBrowser::new("discogs");
        let collection = tracks(4);

        let mut page = match browser.render(&collection, 0) {
            Ok(page) => page,
            Err(err) => panic!("render failed: {err}"),
        };
        let mut seen = vec![page.cursor];
        for _ in 0..5 {
            page = match browser.navigate(&collection, &page.next) {
                Ok(page) => page,
                Err(err) => panic!("navigate failed: {err}"),
            };
            seen.push(page.cursor);
        }
        assert_eq!(seen, vec![0, 1, 2, 3, 3, 3]);

        let back = match browser.navigate(&collection, &browser.payload(Direction::Prev, 0)) {
            Ok(page) => page,
            Err(err) => panic!("navigate failed: {err}"),
        };
        assert_eq!(back.cursor, 0);
    }

    #[test]
    fn test_render_carries_caption_and_payloads() {
        let browser = SessionBrowser::new("kinopoisk");
        let Ok(page) = browser.render(&tracks(2), 1) else {
            panic!("render failed");
        };

        assert_eq!(page.caption, "t1 (2024-01-01)");
        assert_eq!(page.image, None);
        assert_eq!(page.len, 2);
        assert_eq!(page.prev, "kinopoisk prev 1");
        assert_eq!(page.next, "kinopoisk next 1");
    }

    #[test]
    fn test_bad_payloads_are_rejected() {
        let browser = SessionBrowser::new("discogs");
        let collection = tracks(3);

        for payload in [
            "discogs next",
            "discogs next 1 2",
            "discogs sideways 1",
            "discogs next -1",
            "discogs next x",
            "kinopoisk next 1",
            "discogs next 3",
            "",
        ] {
            assert!(
                matches!(
                    browser.navigate(&collection, payload),
                    Err(BrowseError::BadRequest(_))
                ),
                "payload {payload:?} was accepted"
            );
        }
    }

    #[test]
    fn test_owns_checks_tag() {
        let browser = SessionBrowser::new("discogs");
        assert!(browser.owns("discogs next 0"));
        assert!(!browser.owns("discogsx next 0"));
        assert!(!browser.owns("nm_discogs+Punk"));
    }

    #[test]
    fn test_step_on_empty_collection() {
        assert_eq!(step(0, 0, 1), 0);
        assert_eq!(step(0, 5, -1), 0);
    }

    proptest! {
        #[test]
        fn prop_step_stays_in_range(len in 1usize..100, cursor in 0usize..200, delta in -5isize..5) {
            let next = step(len, cursor, delta);
            prop_assert!(next < len);
        }

        #[test]
        fn prop_zero_delta_is_identity(len in 1usize..100, offset in 0usize..100) {
            let cursor = offset % len;
            prop_assert_eq!(step(len, cursor, 0), cursor);
        }
    }
}
