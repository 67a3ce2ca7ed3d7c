use serde::{Deserialize, Serialize};
use chrono::{DateTime, Utc};

/// One raw item from a fetched feed document, before normalization
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RawEntry {
    pub title: Option<String>,
    pub link: Option<String>,
    pub published: Option<String>,
    pub description: Option<String>,
    pub content: Option<String>,
    pub enclosure_url: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MovieRecord {
    pub identity: String,
    pub title: String,
    pub year: Option<u16>,
    pub rating: Option<f32>,
    pub image_url: Option<String>,
    pub link: String,
    pub date_added: DateTime<Utc>,
    pub feed_id: String,
}

impl MovieRecord {
    /// Identifier namespaced by the owning feed, safe to expose externally
    pub fn entity_id(&self) -> String {
        format!("{}_{}", self.feed_id, self.identity)
    }
}

/// Deduplicated movie records for one feed, newest first
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FeedHistory {
    pub feed_id: String,
    pub movies: Vec<MovieRecord>,
}

impl FeedHistory {
    pub fn empty(feed_id: &str) -> Self {
        Self {
            feed_id: feed_id.to_string(),
            movies: Vec::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.movies.len()
    }

    pub fn is_empty(&self) -> bool {
        self.movies.is_empty()
    }
}

/// State published to display consumers after every cycle
#[derive(Debug, Clone, Default)]
pub struct FeedSnapshot {
    pub history: FeedHistory,
    pub last_update: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
    pub loaded: bool,
}
