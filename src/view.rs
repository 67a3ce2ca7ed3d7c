use chrono::{DateTime, Utc};
use regex::Regex;
use serde::Serialize;
use std::sync::OnceLock;

use crate::config::FeedConfig;
use crate::models::{FeedHistory, FeedSnapshot, MovieRecord};

const PLACEHOLDER_POSTER: &str = "https://placehold.co/300x450/png?text=No+poster";
const MOVIE_SLUG_MAX: usize = 40;
const FEED_SLUG_MAX: usize = 32;

fn non_alnum_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"[^a-z0-9]+").expect("slug pattern is valid"))
}

/// Newest record, if any
pub fn latest(history: &FeedHistory) -> Option<&MovieRecord> {
    history.movies.first()
}

/// Up to `count` newest records. Fewer is not an error.
pub fn recent(history: &FeedHistory, count: usize) -> &[MovieRecord] {
    &history.movies[..count.min(history.movies.len())]
}

/// Records exposed as individual devices, sized independently of `recent`
pub fn device_slice(history: &FeedHistory, count: usize) -> &[MovieRecord] {
    recent(history, count)
}

pub fn device_name(movie: &MovieRecord) -> String {
    match movie.year {
        Some(year) => format!("{} ({})", movie.title, year),
        None => format!("Letterboxd - {}", movie.title),
    }
}

/// Short object id fragment, e.g. `hamnet_2025`
pub fn movie_slug(movie: &MovieRecord) -> String {
    let title = slugify(&movie.title);
    let title = if title.is_empty() { "movie".to_string() } else { title };
    let mut slug = match movie.year {
        Some(year) => format!("{}_{}", title, year),
        None => title,
    };
    slug.truncate(MOVIE_SLUG_MAX);
    slug
}

pub fn feed_slug(feed_name: &str) -> String {
    let mut slug = slugify(feed_name);
    if slug.is_empty() {
        slug = "feed".to_string();
    }
    slug.truncate(FEED_SLUG_MAX);
    slug
}

fn slugify(value: &str) -> String {
    let lowered = value.trim().to_lowercase();
    non_alnum_regex()
        .replace_all(&lowered, "_")
        .trim_matches('_')
        .to_string()
}

#[derive(Debug, Clone, Serialize)]
pub struct ProjectedMovie {
    pub entity_id: String,
    #[serde(flatten)]
    pub movie: MovieRecord,
}

#[derive(Debug, Clone, Serialize)]
pub struct ProjectedDevice {
    pub entity_id: String,
    pub device_name: String,
    pub object_id: String,
    pub poster_url: String,
    #[serde(flatten)]
    pub movie: MovieRecord,
}

/// Everything the display layer needs for one feed
#[derive(Debug, Clone, Serialize)]
pub struct FeedProjection {
    pub feed_id: String,
    pub feed_name: String,
    pub latest: Option<ProjectedMovie>,
    pub recent: Vec<ProjectedMovie>,
    pub devices: Vec<ProjectedDevice>,
    pub last_update: Option<DateTime<Utc>>,
    pub error: Option<String>,
}

impl ProjectedMovie {
    fn from_record(movie: &MovieRecord) -> Self {
        Self {
            entity_id: movie.entity_id(),
            movie: movie.clone(),
        }
    }
}

pub fn project(history: &FeedHistory, feed: &FeedConfig) -> FeedProjection {
    let feed_name = feed.display_name().to_string();
    let feed_part = feed_slug(&feed_name);

    let devices = if feed.expose_as_devices {
        device_slice(history, feed.device_count())
            .iter()
            .map(|movie| ProjectedDevice {
                entity_id: movie.entity_id(),
                device_name: device_name(movie),
                object_id: format!("letterboxd_{}_{}", feed_part, movie_slug(movie)),
                poster_url: movie
                    .image_url
                    .as_deref()
                    .map(str::trim)
                    .filter(|url| !url.is_empty())
                    .unwrap_or(PLACEHOLDER_POSTER)
                    .to_string(),
                movie: movie.clone(),
            })
            .collect()
    } else {
        Vec::new()
    };

    FeedProjection {
        feed_id: history.feed_id.clone(),
        feed_name,
        latest: latest(history).map(ProjectedMovie::from_record),
        recent: recent(history, feed.recent_count())
            .iter()
            .map(ProjectedMovie::from_record)
            .collect(),
        devices,
        last_update: None,
        error: None,
    }
}

/// Projection of a published snapshot, carrying its freshness and error
pub fn project_snapshot(snapshot: &FeedSnapshot, feed: &FeedConfig) -> FeedProjection {
    let mut projection = project(&snapshot.history, feed);
    projection.last_update = snapshot.last_update;
    projection.error = snapshot.last_error.clone();
    projection
}

/// Renders a rating the way the feed writes it, e.g. `★★★★½`
pub fn rating_stars(rating: Option<f32>) -> String {
    match rating {
        Some(rating) => {
            let full = rating.floor() as usize;
            let half = if rating - rating.floor() >= 0.5 { "½" } else { "" };
            format!("{}{}", "★".repeat(full), half)
        }
        None => String::new(),
    }
}
