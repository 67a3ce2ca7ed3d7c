use chrono::Utc;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

use crate::cache::HistoryStore;
use crate::config::FeedConfig;
use crate::error::{ConfigError, CycleError, StoreError};
use crate::fetcher::EntrySource;
use crate::models::{FeedHistory, FeedSnapshot};
use crate::normalizer::normalize;
use crate::reconcile::{apply_retention, reconcile, skip_beyond_cap};

/// Counts from one successful cycle
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CycleReport {
    pub fetched: usize,
    pub rejected: usize,
    pub added: usize,
    pub duplicates: usize,
    pub pruned: usize,
    pub total: usize,
}

/// Drives fetch → normalize → reconcile → save for a single feed.
///
/// The `active` flag is held for the whole load/save section; removing a feed
/// flips it under the same lock, so a cycle that finishes after removal never
/// writes.
pub struct FeedWorker {
    feed: FeedConfig,
    feed_id: String,
    source: Arc<dyn EntrySource>,
    store: Arc<dyn HistoryStore>,
    retention: Option<usize>,
    active: Arc<Mutex<bool>>,
    updates: watch::Sender<FeedSnapshot>,
}

impl FeedWorker {
    pub fn new(
        feed: FeedConfig,
        source: Arc<dyn EntrySource>,
        store: Arc<dyn HistoryStore>,
        retention: Option<usize>,
    ) -> (Self, watch::Receiver<FeedSnapshot>) {
        let feed_id = feed.feed_id();
        let (updates, receiver) = watch::channel(FeedSnapshot {
            history: FeedHistory::empty(&feed_id),
            ..FeedSnapshot::default()
        });

        let worker = Self {
            feed,
            feed_id,
            source,
            store,
            retention,
            active: Arc::new(Mutex::new(true)),
            updates,
        };
        (worker, receiver)
    }

    pub fn feed_id(&self) -> &str {
        &self.feed_id
    }

    pub async fn run_cycle(&self) -> Result<CycleReport, CycleError> {
        let name = self.feed.display_name();
        debug!(operation = "feed_cycle_start", feed = name, "Fetching feed");

        let entries = self.source.fetch_entries(&self.feed.url).await?;

        let fetched = entries.len();
        let mut batch = Vec::with_capacity(fetched);
        for entry in &entries {
            match normalize(entry, &self.feed_id) {
                Ok(movie) => batch.push(movie),
                Err(reason) => {
                    debug!(
                        feed = name,
                        title = entry.title.as_deref().unwrap_or(""),
                        reason = %reason,
                        "Skipping entry"
                    );
                }
            }
        }
        let rejected = fetched - batch.len();

        let active = self.active.lock().await;
        if !*active {
            return Err(CycleError::Cancelled(self.feed_id.clone()));
        }

        let existing = self.store.load(&self.feed_id).await?;
        let batch = skip_beyond_cap(&existing, batch, self.retention);
        let merged = reconcile(existing, batch);
        let mut history = merged.history;
        let pruned = apply_retention(&mut history, self.retention);
        if merged.added > 0 || pruned > 0 {
            self.store.save(&self.feed_id, &history).await?;
        }
        drop(active);

        let report = CycleReport {
            fetched,
            rejected,
            added: merged.added,
            duplicates: merged.duplicates,
            pruned,
            total: history.len(),
        };

        self.updates.send_modify(|snapshot| {
            snapshot.history = history;
            snapshot.last_update = Some(Utc::now());
            snapshot.last_error = None;
            snapshot.loaded = true;
        });

        Ok(report)
    }

    /// Runs one cycle and logs the outcome; failures stay local to this feed
    pub async fn tick(&self) -> Result<CycleReport, CycleError> {
        let name = self.feed.display_name();
        let result = self.run_cycle().await;

        match &result {
            Ok(report) => {
                info!(
                    operation = "feed_cycle_complete",
                    feed = name,
                    fetched = report.fetched,
                    rejected = report.rejected,
                    added = report.added,
                    total = report.total,
                    "Feed refreshed"
                );
            }
            Err(CycleError::Cancelled(_)) => {
                debug!(operation = "feed_cycle_cancelled", feed = name, "Feed removed mid-cycle");
            }
            Err(e @ CycleError::Persistence(_)) => {
                error!(
                    operation = "feed_cycle_error",
                    feed = name,
                    error = %e,
                    "History persistence failed"
                );
                self.record_failure(e).await;
            }
            Err(e) => {
                warn!(
                    operation = "feed_cycle_error",
                    feed = name,
                    error = %e,
                    "Feed refresh failed"
                );
                self.record_failure(e).await;
            }
        }

        result
    }

    /// Keeps last-good data visible, loading it if this feed has never
    /// completed a cycle.
    async fn record_failure(&self, err: &CycleError) {
        let needs_history = !self.updates.borrow().loaded;
        let stale = if needs_history {
            match self.store.load(&self.feed_id).await {
                Ok(history) => Some(history),
                Err(e) => {
                    warn!(
                        feed = self.feed.display_name(),
                        error = %e,
                        "Could not load stored history"
                    );
                    None
                }
            }
        } else {
            None
        };

        let message = err.to_string();
        self.updates.send_modify(|snapshot| {
            if let Some(history) = stale {
                snapshot.history = history;
                snapshot.loaded = true;
            }
            snapshot.last_update = Some(Utc::now());
            snapshot.last_error = Some(message);
        });
    }

    /// First cycle fires immediately, then once per interval
    async fn run(self, interval: Duration) {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            ticker.tick().await;
            if let Err(CycleError::Cancelled(_)) = self.tick().await {
                break;
            }
        }
    }
}

struct FeedTask {
    feed: FeedConfig,
    active: Arc<Mutex<bool>>,
    handle: JoinHandle<()>,
    updates: watch::Receiver<FeedSnapshot>,
}

/// Owns one independent periodic task per registered feed
pub struct FeedScheduler {
    source: Arc<dyn EntrySource>,
    store: Arc<dyn HistoryStore>,
    retention: Option<usize>,
    tasks: HashMap<String, FeedTask>,
}

impl FeedScheduler {
    pub fn new(source: Arc<dyn EntrySource>, store: Arc<dyn HistoryStore>) -> Self {
        Self {
            source,
            store,
            retention: None,
            tasks: HashMap::new(),
        }
    }

    pub fn with_retention(mut self, limit: Option<usize>) -> Self {
        self.retention = limit;
        self
    }

    /// Registers a feed and starts its task. Must run inside a tokio runtime.
    pub fn add_feed(
        &mut self,
        feed: FeedConfig,
    ) -> Result<watch::Receiver<FeedSnapshot>, ConfigError> {
        feed.validate()?;
        let feed_id = feed.feed_id();
        if self.tasks.contains_key(&feed_id) {
            return Err(ConfigError::DuplicateFeed(feed_id));
        }

        let interval = feed.interval();
        let (worker, updates) = FeedWorker::new(
            feed.clone(),
            Arc::clone(&self.source),
            Arc::clone(&self.store),
            self.retention,
        );
        let active = Arc::clone(&worker.active);

        info!(
            operation = "feed_registered",
            feed = feed.display_name(),
            feed_id = %feed_id,
            interval_minutes = feed.scan_interval,
            "Scheduling feed"
        );
        let handle = tokio::spawn(worker.run(interval));

        self.tasks.insert(
            feed_id,
            FeedTask {
                feed,
                active,
                handle,
                updates: updates.clone(),
            },
        );
        Ok(updates)
    }

    /// Stops a feed's task and discards its stored history.
    /// Returns false if the feed was not registered.
    pub async fn remove_feed(&mut self, feed_id: &str) -> Result<bool, StoreError> {
        let Some(task) = self.tasks.remove(feed_id) else {
            return Ok(false);
        };

        // Waits for any in-flight save before flipping the flag
        *task.active.lock().await = false;
        task.handle.abort();
        let _ = task.handle.await;

        self.store.remove(feed_id).await?;
        info!(
            operation = "feed_removed",
            feed = task.feed.display_name(),
            feed_id,
            "Feed removed and history discarded"
        );
        Ok(true)
    }

    pub fn subscribe(&self, feed_id: &str) -> Option<watch::Receiver<FeedSnapshot>> {
        self.tasks.get(feed_id).map(|task| task.updates.clone())
    }

    pub fn snapshot(&self, feed_id: &str) -> Option<FeedSnapshot> {
        self.tasks.get(feed_id).map(|task| task.updates.borrow().clone())
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    /// Stops every task without touching stored history
    pub fn shutdown(&mut self) {
        for (_, task) in self.tasks.drain() {
            task.handle.abort();
        }
    }
}

impl Drop for FeedScheduler {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::MemoryHistoryStore;
    use crate::models::RawEntry;
    use async_trait::async_trait;

    struct StaticSource(Vec<RawEntry>);

    #[async_trait]
    impl EntrySource for StaticSource {
        async fn fetch_entries(&self, _url: &str) -> Result<Vec<RawEntry>, CycleError> {
            Ok(self.0.clone())
        }
    }

    struct BrokenSource;

    #[async_trait]
    impl EntrySource for BrokenSource {
        async fn fetch_entries(&self, _url: &str) -> Result<Vec<RawEntry>, CycleError> {
            Err(CycleError::Fetch("connection refused".to_string()))
        }
    }

    /// Loads work, saves always fail
    struct ReadOnlyStore(MemoryHistoryStore);

    #[async_trait]
    impl HistoryStore for ReadOnlyStore {
        async fn load(&self, feed_id: &str) -> Result<FeedHistory, StoreError> {
            self.0.load(feed_id).await
        }

        async fn save(&self, feed_id: &str, _history: &FeedHistory) -> Result<(), StoreError> {
            Err(StoreError::Io {
                feed_id: feed_id.to_string(),
                source: std::io::Error::new(std::io::ErrorKind::PermissionDenied, "read-only"),
            })
        }

        async fn remove(&self, feed_id: &str) -> Result<(), StoreError> {
            self.0.remove(feed_id).await
        }
    }

    fn entry(slug: &str, published: &str) -> RawEntry {
        RawEntry {
            title: Some(format!("{}, 2001 ★★★", slug)),
            link: Some(format!("https://letterboxd.com/alice/film/{}/", slug)),
            published: Some(published.to_string()),
            ..RawEntry::default()
        }
    }

    fn feed() -> FeedConfig {
        FeedConfig::new("https://letterboxd.com/alice/rss/")
    }

    #[tokio::test]
    async fn test_cycle_saves_and_publishes() {
        let store = Arc::new(MemoryHistoryStore::default());
        let source = Arc::new(StaticSource(vec![
            entry("memento", "2024-03-01T10:00:00Z"),
            RawEntry { title: Some("broken".to_string()), ..RawEntry::default() },
            entry("insomnia", "2024-03-02T10:00:00Z"),
        ]));
        let (worker, updates) = FeedWorker::new(feed(), source, store.clone(), None);

        let report = worker.run_cycle().await.unwrap();
        assert_eq!(report.fetched, 3);
        assert_eq!(report.rejected, 1);
        assert_eq!(report.added, 2);

        let stored = store.load(worker.feed_id()).await.unwrap();
        assert_eq!(stored.movies[0].title, "insomnia");

        let snapshot = updates.borrow().clone();
        assert!(snapshot.loaded);
        assert_eq!(snapshot.history, stored);
        assert!(snapshot.last_error.is_none());

        let again = worker.run_cycle().await.unwrap();
        assert_eq!(again.added, 0);
        assert_eq!(again.duplicates, 2);
        assert_eq!(store.load(worker.feed_id()).await.unwrap(), stored);
    }

    #[tokio::test]
    async fn test_fetch_failure_keeps_stored_history_visible() {
        let store = Arc::new(MemoryHistoryStore::default());
        let feed = feed();
        let seeded = {
            let (worker, _) = FeedWorker::new(
                feed.clone(),
                Arc::new(StaticSource(vec![entry("heat", "2024-01-01")])),
                store.clone(),
                None,
            );
            worker.run_cycle().await.unwrap();
            store.load(&feed.feed_id()).await.unwrap()
        };

        let (worker, updates) = FeedWorker::new(feed, Arc::new(BrokenSource), store.clone(), None);
        let result = worker.tick().await;
        assert!(matches!(result, Err(CycleError::Fetch(_))));

        let snapshot = updates.borrow().clone();
        assert_eq!(snapshot.history, seeded);
        assert!(snapshot.last_error.unwrap().contains("connection refused"));
        assert_eq!(store.load(worker.feed_id()).await.unwrap(), seeded);
    }

    #[tokio::test]
    async fn test_persistence_failure_discards_merge() {
        let store = Arc::new(ReadOnlyStore(MemoryHistoryStore::default()));
        let source = Arc::new(StaticSource(vec![entry("heat", "2024-01-01")]));
        let (worker, updates) = FeedWorker::new(feed(), source, store.clone(), None);

        let result = worker.tick().await;
        assert!(matches!(result, Err(CycleError::Persistence(_))));

        let snapshot = updates.borrow().clone();
        assert!(snapshot.history.is_empty());
        assert!(snapshot.last_error.is_some());
    }

    #[tokio::test]
    async fn test_inactive_worker_never_writes() {
        let store = Arc::new(MemoryHistoryStore::default());
        let source = Arc::new(StaticSource(vec![entry("heat", "2024-01-01")]));
        let (worker, _) = FeedWorker::new(feed(), source, store.clone(), None);

        *worker.active.lock().await = false;
        let result = worker.run_cycle().await;

        assert!(matches!(result, Err(CycleError::Cancelled(_))));
        assert!(store.load(worker.feed_id()).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_retention_cap_prunes_oldest() {
        let store = Arc::new(MemoryHistoryStore::default());
        let source = Arc::new(StaticSource(vec![
            entry("a", "2024-01-01"),
            entry("b", "2024-01-02"),
            entry("c", "2024-01-03"),
        ]));
        let (worker, _) = FeedWorker::new(feed(), source, store.clone(), Some(2));

        let report = worker.run_cycle().await.unwrap();
        assert_eq!(report.pruned, 1);
        assert_eq!(report.total, 2);

        let titles: Vec<_> = store
            .load(worker.feed_id())
            .await
            .unwrap()
            .movies
            .into_iter()
            .map(|m| m.title)
            .collect();
        assert_eq!(titles, vec!["c", "b"]);

        // Entries already pruned do not come back on the next cycle
        let again = worker.run_cycle().await.unwrap();
        assert_eq!(again.added, 0);
        assert_eq!(again.pruned, 0);
        assert_eq!(again.total, 2);
    }

    #[tokio::test]
    async fn test_duplicate_registration_rejected() {
        let store = Arc::new(MemoryHistoryStore::default());
        let mut scheduler = FeedScheduler::new(Arc::new(StaticSource(Vec::new())), store);
        let feed = feed();

        scheduler.add_feed(feed.clone()).unwrap();
        assert!(matches!(scheduler.add_feed(feed), Err(ConfigError::DuplicateFeed(_))));
        assert_eq!(scheduler.len(), 1);
    }
}
