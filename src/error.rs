use thiserror::Error;

/// Failure of a whole fetch cycle for one feed. Never crosses feed boundaries.
#[derive(Debug, Error)]
pub enum CycleError {
    #[error("failed to fetch feed: {0}")]
    Fetch(String),

    #[error("feed document could not be parsed: {0}")]
    Format(String),

    #[error("history persistence failed: {0}")]
    Persistence(#[from] StoreError),

    #[error("feed {0} was removed during the cycle")]
    Cancelled(String),
}

impl From<reqwest::Error> for CycleError {
    fn from(err: reqwest::Error) -> Self {
        CycleError::Fetch(err.to_string())
    }
}

/// Why a single entry was dropped from a batch
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Rejection {
    #[error("entry has no title")]
    MissingTitle,

    #[error("entry has no link")]
    MissingLink,

    #[error("entry link is not an http(s) URL: {0}")]
    MalformedLink(String),

    #[error("entry has no published date")]
    MissingDate,

    #[error("entry published date is unparsable: {0}")]
    UnparsableDate(String),
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("history I/O error for {feed_id}: {source}")]
    Io {
        feed_id: String,
        #[source]
        source: std::io::Error,
    },

    #[error("stored history for {feed_id} is corrupt: {source}")]
    Corrupt {
        feed_id: String,
        #[source]
        source: serde_json::Error,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("feed url is required")]
    MissingUrl,

    #[error("feed url is not an http(s) URL: {0}")]
    InvalidUrl(String),

    #[error("feed {0} is configured more than once")]
    DuplicateFeed(String),

    #[error("{field} for feed {feed} must be between {min} and {max}, got {value}")]
    OutOfRange {
        feed: String,
        field: &'static str,
        min: u32,
        max: u32,
        value: u32,
    },
}
