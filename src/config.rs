use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::cache::default_data_dir;
use crate::error::ConfigError;
use crate::view::feed_slug;

pub const DEFAULT_SCAN_INTERVAL: u32 = 360;
pub const MIN_SCAN_INTERVAL: u32 = 60;
pub const MAX_SCAN_INTERVAL: u32 = 10080;
pub const DEFAULT_MAX_MOVIES: u32 = 5;
pub const MIN_COUNT: u32 = 1;
pub const MAX_COUNT: u32 = 50;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data_dir: Option<String>,
    /// Optional cap on stored records per feed; unbounded when unset
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_stored_movies: Option<usize>,
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub feeds: Vec<FeedConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
    #[serde(default)]
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}

/// Settings for one registered feed.
///
/// `id` is the configuration identity. History is keyed by it rather than by
/// the URL, so a feed removed and re-added gets a new id and an empty history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeedConfig {
    #[serde(default)]
    pub id: String,
    pub url: String,
    #[serde(default)]
    pub name: String,
    #[serde(default = "default_scan_interval")]
    pub scan_interval: u32,
    #[serde(default = "default_max_movies")]
    pub max_movies: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_devices: Option<u32>,
    #[serde(default)]
    pub expose_as_devices: bool,
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_scan_interval() -> u32 {
    DEFAULT_SCAN_INTERVAL
}

fn default_max_movies() -> u32 {
    DEFAULT_MAX_MOVIES
}

impl FeedConfig {
    /// New feed with defaults and a fresh configuration identity
    pub fn new(url: &str) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            url: url.trim().to_string(),
            name: default_feed_name(url),
            scan_interval: DEFAULT_SCAN_INTERVAL,
            max_movies: DEFAULT_MAX_MOVIES,
            max_devices: None,
            expose_as_devices: false,
        }
    }

    /// Key for history storage and external ids
    pub fn feed_id(&self) -> String {
        format!("{}_{}", self.id, feed_slug(self.display_name()))
    }

    pub fn display_name(&self) -> &str {
        if self.name.trim().is_empty() {
            &self.url
        } else {
            &self.name
        }
    }

    pub fn interval(&self) -> Duration {
        Duration::from_secs(u64::from(self.scan_interval) * 60)
    }

    pub fn recent_count(&self) -> usize {
        self.max_movies as usize
    }

    /// Falls back to the recent count when not set
    pub fn device_count(&self) -> usize {
        self.max_devices.unwrap_or(self.max_movies) as usize
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let url = self.url.trim();
        if url.is_empty() {
            return Err(ConfigError::MissingUrl);
        }
        match reqwest::Url::parse(url) {
            Ok(parsed) if matches!(parsed.scheme(), "http" | "https") => {}
            _ => return Err(ConfigError::InvalidUrl(url.to_string())),
        }

        let feed = self.display_name();
        check_range(
            feed,
            "scan_interval",
            self.scan_interval,
            MIN_SCAN_INTERVAL,
            MAX_SCAN_INTERVAL,
        )?;
        check_range(feed, "max_movies", self.max_movies, MIN_COUNT, MAX_COUNT)?;
        if let Some(max_devices) = self.max_devices {
            check_range(feed, "max_devices", max_devices, MIN_COUNT, MAX_COUNT)?;
        }
        Ok(())
    }
}

fn check_range(
    feed: &str,
    field: &'static str,
    value: u32,
    min: u32,
    max: u32,
) -> Result<(), ConfigError> {
    if (min..=max).contains(&value) {
        Ok(())
    } else {
        Err(ConfigError::OutOfRange {
            feed: feed.to_string(),
            field,
            min,
            max,
            value,
        })
    }
}

/// Account segment of a feed URL, e.g. `https://letterboxd.com/alice/rss/` → `alice`
pub fn default_feed_name(url: &str) -> String {
    let segments: Vec<&str> = url
        .trim()
        .trim_end_matches('/')
        .split('/')
        .filter(|s| !s.is_empty())
        .collect();

    match segments.as_slice() {
        [.., account, "rss"] if !account.contains(':') && !account.contains('.') => {
            account.to_string()
        }
        [.., last] if segments.len() > 2 => last.to_string(),
        _ => "Letterboxd Feed".to_string(),
    }
}

impl Config {
    pub fn load_from_file(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)?;
        Ok(config)
    }

    pub fn save_to_file(&self, path: &Path) -> anyhow::Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Gives every feed without an identity a fresh one and fills in
    /// missing names. Returns true when anything changed.
    pub fn assign_missing_ids(&mut self) -> bool {
        let mut changed = false;
        for feed in &mut self.feeds {
            if feed.id.trim().is_empty() {
                feed.id = uuid::Uuid::new_v4().to_string();
                changed = true;
            }
            if feed.name.trim().is_empty() {
                feed.name = default_feed_name(&feed.url);
                changed = true;
            }
        }
        changed
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let mut urls = HashSet::new();
        let mut ids = HashSet::new();

        for feed in &self.feeds {
            feed.validate()?;
            if !urls.insert(feed.url.trim().to_string()) {
                return Err(ConfigError::DuplicateFeed(feed.url.clone()));
            }
            if !feed.id.is_empty() && !ids.insert(feed.id.clone()) {
                return Err(ConfigError::DuplicateFeed(feed.id.clone()));
            }
        }
        Ok(())
    }

    /// Finds a feed by display name, id or URL
    pub fn find_feed(&self, key: &str) -> Option<&FeedConfig> {
        self.feeds
            .iter()
            .find(|f| f.name == key || f.id == key || f.url == key)
    }

    /// Removes a feed by display name, id or URL
    pub fn remove_feed(&mut self, key: &str) -> Option<FeedConfig> {
        let index = self
            .feeds
            .iter()
            .position(|f| f.name == key || f.id == key || f.url == key)?;
        Some(self.feeds.remove(index))
    }

    pub fn data_dir(&self) -> PathBuf {
        match &self.data_dir {
            Some(dir) => PathBuf::from(shellexpand::tilde(dir).to_string()),
            None => default_data_dir(),
        }
    }
}

/// Resolves the config file location from the environment
pub fn default_config_path() -> PathBuf {
    if let Ok(path) = std::env::var("LETTERFEED_CONFIG") {
        PathBuf::from(shellexpand::tilde(&path).to_string())
    } else if let Ok(xdg_config) = std::env::var("XDG_CONFIG_HOME") {
        PathBuf::from(xdg_config).join("letterfeed").join("config.toml")
    } else {
        PathBuf::from(shellexpand::tilde("~/.config/letterfeed/config.toml").to_string())
    }
}
