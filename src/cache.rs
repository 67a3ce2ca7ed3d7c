use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::path::PathBuf;
use std::sync::{Mutex, MutexGuard, PoisonError};
use tracing::debug;

use crate::error::StoreError;
use crate::models::{FeedHistory, MovieRecord};

const STORE_VERSION: u32 = 1;

/// Durable per-feed history, written as whole collections
#[async_trait]
pub trait HistoryStore: Send + Sync {
    /// A feed with nothing stored loads as an empty history
    async fn load(&self, feed_id: &str) -> Result<FeedHistory, StoreError>;

    async fn save(&self, feed_id: &str, history: &FeedHistory) -> Result<(), StoreError>;

    async fn remove(&self, feed_id: &str) -> Result<(), StoreError>;
}

#[derive(Debug, Serialize, Deserialize)]
struct StoredHistory {
    version: u32,
    feed_id: String,
    movies: Vec<MovieRecord>,
}

/// JSON-file history store, one file per feed
pub struct HistoryCache {
    base_dir: PathBuf,
    history_dir: PathBuf,
}

impl HistoryCache {
    /// Opens the store under `base_dir`, creating the directory layout
    pub fn with_base_dir(base_dir: impl Into<PathBuf>) -> std::io::Result<Self> {
        let base_dir = base_dir.into();
        let history_dir = base_dir.join("history");
        fs::create_dir_all(&history_dir)?;
        fs::create_dir_all(base_dir.join("views"))?;

        Ok(Self { base_dir, history_dir })
    }

    pub fn history_path(&self, feed_id: &str) -> PathBuf {
        self.history_dir.join(format!("{}.json", sanitize_filename(feed_id)))
    }

    /// Where the display projection for a feed is published
    pub fn view_path(&self, feed_id: &str) -> PathBuf {
        self.base_dir
            .join("views")
            .join(format!("{}.json", sanitize_filename(feed_id)))
    }
}

#[async_trait]
impl HistoryStore for HistoryCache {
    async fn load(&self, feed_id: &str) -> Result<FeedHistory, StoreError> {
        let path = self.history_path(feed_id);

        let content = match tokio::fs::read_to_string(&path).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!(feed = feed_id, "No stored history, starting empty");
                return Ok(FeedHistory::empty(feed_id));
            }
            Err(source) => {
                return Err(StoreError::Io {
                    feed_id: feed_id.to_string(),
                    source,
                })
            }
        };

        // Corrupt files are reported and left in place rather than reset
        let stored: StoredHistory =
            serde_json::from_str(&content).map_err(|source| StoreError::Corrupt {
                feed_id: feed_id.to_string(),
                source,
            })?;

        debug!(feed = feed_id, movies = stored.movies.len(), "Loaded stored history");
        Ok(FeedHistory {
            feed_id: feed_id.to_string(),
            movies: stored.movies,
        })
    }

    async fn save(&self, feed_id: &str, history: &FeedHistory) -> Result<(), StoreError> {
        let io_err = |source| StoreError::Io {
            feed_id: feed_id.to_string(),
            source,
        };

        let stored = StoredHistory {
            version: STORE_VERSION,
            feed_id: feed_id.to_string(),
            movies: history.movies.clone(),
        };
        let content = serde_json::to_string_pretty(&stored).map_err(|source| StoreError::Corrupt {
            feed_id: feed_id.to_string(),
            source,
        })?;

        let path = self.history_path(feed_id);
        let tmp_path = path.with_extension("json.tmp");
        tokio::fs::write(&tmp_path, content).await.map_err(io_err)?;
        tokio::fs::rename(&tmp_path, &path).await.map_err(io_err)?;

        Ok(())
    }

    async fn remove(&self, feed_id: &str) -> Result<(), StoreError> {
        for path in [self.history_path(feed_id), self.view_path(feed_id)] {
            match tokio::fs::remove_file(&path).await {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(source) => {
                    return Err(StoreError::Io {
                        feed_id: feed_id.to_string(),
                        source,
                    })
                }
            }
        }
        Ok(())
    }
}

/// Volatile store for embedding and tests; nothing survives the process
#[derive(Debug, Default)]
pub struct MemoryHistoryStore {
    histories: Mutex<HashMap<String, FeedHistory>>,
}

impl MemoryHistoryStore {
    fn histories(&self) -> MutexGuard<'_, HashMap<String, FeedHistory>> {
        self.histories.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[async_trait]
impl HistoryStore for MemoryHistoryStore {
    async fn load(&self, feed_id: &str) -> Result<FeedHistory, StoreError> {
        Ok(self
            .histories()
            .get(feed_id)
            .cloned()
            .unwrap_or_else(|| FeedHistory::empty(feed_id)))
    }

    async fn save(&self, feed_id: &str, history: &FeedHistory) -> Result<(), StoreError> {
        self.histories().insert(feed_id.to_string(), history.clone());
        Ok(())
    }

    async fn remove(&self, feed_id: &str) -> Result<(), StoreError> {
        self.histories().remove(feed_id);
        Ok(())
    }
}

/// Resolves the data directory from the environment
pub fn default_data_dir() -> PathBuf {
    if let Ok(dir) = std::env::var("LETTERFEED_DATA_DIR") {
        PathBuf::from(dir)
    } else if let Ok(xdg_data) = std::env::var("XDG_DATA_HOME") {
        PathBuf::from(xdg_data).join("letterfeed")
    } else {
        // Fallback to ~/.local/share/letterfeed (XDG default)
        let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
        PathBuf::from(home).join(".local/share/letterfeed")
    }
}

fn sanitize_filename(s: &str) -> String {
    s.chars()
        .map(|c| {
            if c.is_alphanumeric() || c == '-' || c == '_' {
                c
            } else {
                '_'
            }
        })
        .take(100)
        .collect()
}

#[cfg(test)]
#[path = "cache_tests.rs"]
mod tests;
