use super::*;
use crate::models::{FeedHistory, MovieRecord};
use chrono::{TimeZone, Utc};
use tempfile::TempDir;

fn create_test_cache() -> (HistoryCache, TempDir) {
    let temp_dir = TempDir::new().unwrap();
    let cache = HistoryCache::with_base_dir(temp_dir.path()).unwrap();
    (cache, temp_dir)
}

fn create_test_history(feed_id: &str) -> FeedHistory {
    FeedHistory {
        feed_id: feed_id.to_string(),
        movies: vec![
            MovieRecord {
                identity: "0f3c2a".to_string(),
                title: "Oppenheimer".to_string(),
                year: Some(2023),
                rating: Some(4.5),
                image_url: Some("https://a.ltrbxd.com/oppenheimer.jpg".to_string()),
                link: "https://letterboxd.com/alice/film/oppenheimer-2023/".to_string(),
                date_added: Utc.with_ymd_and_hms(2023, 7, 22, 20, 0, 0).unwrap(),
                feed_id: feed_id.to_string(),
            },
            MovieRecord {
                identity: "9ab1e4".to_string(),
                title: "Barbie".to_string(),
                year: Some(2023),
                rating: None,
                image_url: None,
                link: "https://letterboxd.com/alice/film/barbie/".to_string(),
                date_added: Utc.with_ymd_and_hms(2023, 7, 21, 18, 30, 0).unwrap(),
                feed_id: feed_id.to_string(),
            },
        ],
    }
}

#[tokio::test]
async fn test_missing_history_loads_empty() {
    let (cache, _temp_dir) = create_test_cache();

    let history = cache.load("never-seen").await.unwrap();
    assert!(history.is_empty());
    assert_eq!(history.feed_id, "never-seen");
}

#[tokio::test]
async fn test_save_and_reload() {
    let (cache, _temp_dir) = create_test_cache();
    let history = create_test_history("entry-1_alice");

    cache.save("entry-1_alice", &history).await.unwrap();

    let loaded = cache.load("entry-1_alice").await.unwrap();
    assert_eq!(loaded, history);
    assert_eq!(loaded.movies[0].rating, Some(4.5));
    assert_eq!(loaded.movies[1].rating, None);
}

#[tokio::test]
async fn test_save_replaces_whole_collection() {
    let (cache, _temp_dir) = create_test_cache();
    let mut history = create_test_history("feed");
    cache.save("feed", &history).await.unwrap();

    history.movies.truncate(1);
    cache.save("feed", &history).await.unwrap();

    let loaded = cache.load("feed").await.unwrap();
    assert_eq!(loaded.len(), 1);
    assert!(!cache.history_path("feed").with_extension("json.tmp").exists());
}

#[tokio::test]
async fn test_feeds_are_stored_separately() {
    let (cache, _temp_dir) = create_test_cache();
    cache.save("feed-a", &create_test_history("feed-a")).await.unwrap();

    assert!(cache.load("feed-b").await.unwrap().is_empty());

    cache.remove("feed-a").await.unwrap();
    assert!(cache.load("feed-a").await.unwrap().is_empty());

    // Removing something that is not there is fine
    cache.remove("feed-a").await.unwrap();
}

#[tokio::test]
async fn test_corrupt_history_is_an_error() {
    let (cache, _temp_dir) = create_test_cache();
    std::fs::write(cache.history_path("feed"), "{ not json").unwrap();

    let result = cache.load("feed").await;
    assert!(matches!(result, Err(StoreError::Corrupt { .. })));
    // Left on disk for inspection
    assert!(cache.history_path("feed").exists());
}

#[test]
fn test_feed_ids_become_safe_filenames() {
    let (cache, _temp_dir) = create_test_cache();
    let path = cache.history_path("../etc/passwd");
    assert_eq!(path.file_name().unwrap(), "___etc_passwd.json");
}
