//! Polls Letterboxd activity feeds and keeps a durable, deduplicated movie
//! history per feed.
//!
//! Each configured feed runs on its own timer: raw entries are fetched,
//! normalized into [`models::MovieRecord`]s, merged into the feed's stored
//! history by [`reconcile::reconcile`] and published to display consumers.
//! History is keyed by the feed's configuration identity, not its URL, so a
//! feed that is removed and registered again starts with an empty history.

pub mod cache;
pub mod config;
pub mod error;
pub mod fetcher;
pub mod models;
pub mod normalizer;
pub mod reconcile;
pub mod scheduler;
pub mod view;

pub use cache::{HistoryCache, HistoryStore, MemoryHistoryStore};
pub use config::{Config, FeedConfig};
pub use error::{ConfigError, CycleError, Rejection, StoreError};
pub use fetcher::{EntrySource, HttpFetcher};
pub use models::{FeedHistory, FeedSnapshot, MovieRecord, RawEntry};
pub use scheduler::{CycleReport, FeedScheduler, FeedWorker};
