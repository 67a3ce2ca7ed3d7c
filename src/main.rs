use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use futures::future::join_all;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use letterfeed::cache::{HistoryCache, HistoryStore};
use letterfeed::config::{default_config_path, Config, FeedConfig, LoggingConfig};
use letterfeed::fetcher::{check_feed, HttpFetcher};
use letterfeed::models::FeedSnapshot;
use letterfeed::scheduler::{FeedScheduler, FeedWorker};
use letterfeed::view;

#[derive(Parser)]
#[command(name = "letterfeed")]
#[command(about = "Keeps a local history of Letterboxd activity feeds", long_about = None)]
struct Cli {
    /// Config file (defaults to $LETTERFEED_CONFIG or ~/.config/letterfeed/config.toml)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Poll every configured feed on its own schedule until interrupted
    Run,
    /// Refresh every feed once
    Fetch,
    /// Print recently watched movies from stored history
    Show {
        #[arg(short, long)]
        feed: Option<String>,
        #[arg(short = 'n', long)]
        count: Option<usize>,
    },
    /// Register a new feed
    Add {
        #[arg(short, long)]
        url: String,
        #[arg(short, long)]
        name: Option<String>,
        /// Minutes between refreshes (60-10080)
        #[arg(short, long)]
        interval: Option<u32>,
        #[arg(long)]
        max_movies: Option<u32>,
        #[arg(long)]
        max_devices: Option<u32>,
        /// Expose recent movies as individual devices
        #[arg(long)]
        devices: bool,
        /// Skip fetching the feed to check it
        #[arg(long)]
        no_check: bool,
    },
    /// Unregister a feed and discard its history
    Remove {
        #[arg(short, long)]
        feed: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config_path = cli.config.unwrap_or_else(default_config_path);
    let config = load_config(&config_path)?;

    init_logging(&config.logging);

    match cli.command {
        Commands::Run => run_daemon(config).await,
        Commands::Fetch => fetch_all(config).await,
        Commands::Show { feed, count } => show(&config, feed.as_deref(), count).await,
        Commands::Add {
            url,
            name,
            interval,
            max_movies,
            max_devices,
            devices,
            no_check,
        } => {
            let mut feed = FeedConfig::new(&url);
            if let Some(name) = name {
                feed.name = name;
            }
            if let Some(interval) = interval {
                feed.scan_interval = interval;
            }
            if let Some(max_movies) = max_movies {
                feed.max_movies = max_movies;
            }
            feed.max_devices = max_devices;
            feed.expose_as_devices = devices;
            add_feed(config, &config_path, feed, !no_check).await
        }
        Commands::Remove { feed } => remove_feed(config, &config_path, &feed).await,
    }
}

fn init_logging(logging: &LoggingConfig) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&logging.level));
    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    if logging.json {
        builder.json().init();
    } else {
        builder.init();
    }
}

/// Loads the config, persisting any identities assigned to new feeds
fn load_config(path: &Path) -> Result<Config> {
    if !path.exists() {
        return Ok(Config::default());
    }

    let mut config = Config::load_from_file(path)
        .with_context(|| format!("Failed to load config from {}", path.display()))?;
    if config.assign_missing_ids() {
        config
            .save_to_file(path)
            .with_context(|| format!("Failed to update config at {}", path.display()))?;
    }
    config.validate().context("Invalid configuration")?;
    Ok(config)
}

fn open_cache(config: &Config) -> Result<Arc<HistoryCache>> {
    let data_dir = config.data_dir();
    let cache = HistoryCache::with_base_dir(&data_dir)
        .with_context(|| format!("Failed to open data directory {}", data_dir.display()))?;
    Ok(Arc::new(cache))
}

async fn run_daemon(config: Config) -> Result<()> {
    if config.feeds.is_empty() {
        bail!("No feeds configured. Add one with 'letterfeed add --url <feed url>'.");
    }

    let cache = open_cache(&config)?;
    let fetcher = Arc::new(HttpFetcher::new().context("Failed to build HTTP client")?);
    let mut scheduler =
        FeedScheduler::new(fetcher, cache.clone()).with_retention(config.max_stored_movies);

    for feed in &config.feeds {
        let updates = scheduler.add_feed(feed.clone())?;
        tokio::spawn(publish_views(feed.clone(), updates, cache.clone()));
    }

    info!(operation = "scheduler_started", feeds = scheduler.len(), "Scheduler started");
    tokio::signal::ctrl_c().await?;

    info!(operation = "scheduler_stopping", "Shutting down");
    scheduler.shutdown();
    Ok(())
}

/// Writes a fresh projection for the display layer after every cycle
async fn publish_views(
    feed: FeedConfig,
    mut updates: watch::Receiver<FeedSnapshot>,
    cache: Arc<HistoryCache>,
) {
    while updates.changed().await.is_ok() {
        let snapshot = updates.borrow_and_update().clone();
        write_view(&cache, &feed, &snapshot).await;
    }
}

async fn write_view(cache: &HistoryCache, feed: &FeedConfig, snapshot: &FeedSnapshot) {
    let projection = view::project_snapshot(snapshot, feed);
    let path = cache.view_path(&feed.feed_id());

    let result = match serde_json::to_string_pretty(&projection) {
        Ok(json) => tokio::fs::write(&path, json).await.map_err(anyhow::Error::from),
        Err(e) => Err(e.into()),
    };
    if let Err(e) = result {
        warn!(
            feed = feed.display_name(),
            path = %path.display(),
            error = %e,
            "Failed to write view"
        );
    }
}

async fn fetch_all(config: Config) -> Result<()> {
    let cache = open_cache(&config)?;
    let fetcher = Arc::new(HttpFetcher::new().context("Failed to build HTTP client")?);

    let runs = config.feeds.iter().map(|feed| {
        let (worker, updates) =
            FeedWorker::new(feed.clone(), fetcher.clone(), cache.clone(), config.max_stored_movies);
        let cache = cache.clone();
        async move {
            let result = worker.tick().await;
            let snapshot = updates.borrow().clone();
            write_view(&cache, feed, &snapshot).await;
            (feed, result)
        }
    });

    for (feed, result) in join_all(runs).await {
        println!("Fetching: {}", feed.display_name());
        match result {
            Ok(report) => println!(
                "  ✓ {} new, {} stored ({} entries skipped)",
                report.added, report.total, report.rejected
            ),
            Err(e) => eprintln!("  ✗ Failed: {}", e),
        }
    }

    Ok(())
}

async fn show(config: &Config, feed_key: Option<&str>, count: Option<usize>) -> Result<()> {
    let cache = open_cache(config)?;
    let feeds: Vec<&FeedConfig> = match feed_key {
        Some(key) => vec![config
            .find_feed(key)
            .with_context(|| format!("No feed named {}", key))?],
        None => config.feeds.iter().collect(),
    };

    for feed in feeds {
        let history = cache.load(&feed.feed_id()).await?;
        let count = count.unwrap_or_else(|| feed.recent_count());

        println!("{} ({} stored)", feed.display_name(), history.len());
        let recent = view::recent(&history, count);
        if recent.is_empty() {
            println!("  No movies yet");
        }
        for (i, movie) in recent.iter().enumerate() {
            let year = movie.year.map(|y| format!(" ({})", y)).unwrap_or_default();
            println!(
                "  {:>2}. {}{} {}  {}",
                i + 1,
                movie.title,
                year,
                view::rating_stars(movie.rating),
                movie.date_added.format("%Y-%m-%d")
            );
        }
    }
    Ok(())
}

async fn add_feed(mut config: Config, path: &Path, feed: FeedConfig, check: bool) -> Result<()> {
    feed.validate()?;
    if check {
        let fetcher = HttpFetcher::new().context("Failed to build HTTP client")?;
        let title = check_feed(&fetcher, &feed.url)
            .await
            .with_context(|| format!("Could not use feed {}", feed.url))?;
        println!("Found feed: {}", title);
    }

    config.feeds.push(feed.clone());
    config.validate()?;
    config
        .save_to_file(path)
        .with_context(|| format!("Failed to write config to {}", path.display()))?;

    println!("Added {} (every {} minutes)", feed.display_name(), feed.scan_interval);
    Ok(())
}

async fn remove_feed(mut config: Config, path: &Path, key: &str) -> Result<()> {
    let feed = config
        .remove_feed(key)
        .with_context(|| format!("No feed named {}", key))?;

    let cache = open_cache(&config)?;
    cache.remove(&feed.feed_id()).await?;
    config
        .save_to_file(path)
        .with_context(|| format!("Failed to write config to {}", path.display()))?;

    println!("Removed {} and its history", feed.display_name());
    Ok(())
}
