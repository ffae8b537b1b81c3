//! Candidate items returned by discovery (search or ranking queries).

use std::fmt;

use serde::{Deserialize, Serialize};

/// Kind of downloadable content.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ItemType {
    /// Single or multi-page illustration.
    Illustration,
    /// Text novel.
    Novel,
}

impl ItemType {
    /// Returns the database string representation.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Illustration => "illustration",
            Self::Novel => "novel",
        }
    }
}

impl fmt::Display for ItemType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for ItemType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "illustration" | "illust" => Ok(Self::Illustration),
            "novel" => Ok(Self::Novel),
            _ => Err(format!("invalid item type: {s}")),
        }
    }
}

/// Popularity counters reported by the remote source.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PopularityMetrics {
    /// Bookmark count.
    #[serde(default, alias = "total_bookmarks", alias = "bookmark_count")]
    pub bookmarks: u64,
    /// View count.
    #[serde(default, alias = "total_view", alias = "view_count")]
    pub views: u64,
}

/// A content record returned by discovery, before planning filters apply.
///
/// The timestamp is kept as the raw string the remote sent. Parsing happens
/// lazily in the planner so that an unparseable value only matters when a
/// date filter is active.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CandidateItem {
    /// Stable remote identifier.
    pub id: u64,
    /// Display title, when known.
    #[serde(default)]
    pub title: Option<String>,
    /// Creation timestamp (RFC 3339 or `YYYY-MM-DD`).
    #[serde(default, alias = "create_date", alias = "createdDate")]
    pub created_date: Option<String>,
    /// Popularity counters.
    #[serde(flatten)]
    pub popularity: PopularityMetrics,
    /// Ordered page URLs to fetch for this item.
    #[serde(default)]
    pub pages: Vec<String>,
}

impl CandidateItem {
    /// Creates an item with an id and popularity counters only.
    #[must_use]
    pub fn new(id: u64, bookmarks: u64) -> Self {
        Self {
            id,
            title: None,
            created_date: None,
            popularity: PopularityMetrics {
                bookmarks,
                views: 0,
            },
            pages: Vec::new(),
        }
    }

    /// Sets the creation timestamp.
    #[must_use]
    pub fn with_created_date(mut self, created_date: impl Into<String>) -> Self {
        self.created_date = Some(created_date.into());
        self
    }

    /// Sets the page URLs.
    #[must_use]
    pub fn with_pages(mut self, pages: Vec<String>) -> Self {
        self.pages = pages;
        self
    }

    /// Sets the title.
    #[must_use]
    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = Some(title.into());
        self
    }

    /// Returns the id as the string key used by the download history.
    #[must_use]
    pub fn key(&self) -> String {
        self.id.to_string()
    }
}
