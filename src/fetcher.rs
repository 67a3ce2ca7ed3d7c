use async_trait::async_trait;
use feed_rs::parser;
use std::time::Duration;
use tracing::debug;

use crate::error::CycleError;
use crate::models::RawEntry;

const USER_AGENT: &str = "letterfeed/0.1";
const FETCH_TIMEOUT: Duration = Duration::from_secs(30);

/// Network-fetch boundary: yields the raw entries of one feed document
#[async_trait]
pub trait EntrySource: Send + Sync {
    async fn fetch_entries(&self, url: &str) -> Result<Vec<RawEntry>, CycleError>;
}

/// A parsed feed document
#[derive(Debug, Clone)]
pub struct ParsedFeed {
    pub title: Option<String>,
    pub entries: Vec<RawEntry>,
}

pub struct HttpFetcher {
    client: reqwest::Client,
}

impl HttpFetcher {
    pub fn new() -> Result<Self, CycleError> {
        let client = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .timeout(FETCH_TIMEOUT)
            .build()?;
        Ok(Self { client })
    }

    /// Fetches an RSS/Atom feed and parses it.
    /// Transport and HTTP status problems are `Fetch` errors, an unparsable
    /// document is a `Format` error.
    pub async fn fetch_feed(&self, url: &str) -> Result<ParsedFeed, CycleError> {
        let response = self.client.get(url).send().await?;

        if !response.status().is_success() {
            return Err(CycleError::Fetch(format!("HTTP {}", response.status())));
        }

        let bytes = response.bytes().await?;
        let feed = parse_feed(&bytes[..])?;
        debug!(url, entries = feed.entries.len(), "Fetched feed document");
        Ok(feed)
    }
}

#[async_trait]
impl EntrySource for HttpFetcher {
    async fn fetch_entries(&self, url: &str) -> Result<Vec<RawEntry>, CycleError> {
        Ok(self.fetch_feed(url).await?.entries)
    }
}

/// Parses a feed document into raw entries
pub fn parse_feed(bytes: &[u8]) -> Result<ParsedFeed, CycleError> {
    let feed = parser::parse(bytes).map_err(|e| CycleError::Format(e.to_string()))?;

    let entries = feed
        .entries
        .into_iter()
        .map(|entry| {
            let enclosure_url = entry.media.iter().find_map(|media| {
                media
                    .thumbnails
                    .first()
                    .map(|t| t.image.uri.clone())
                    .or_else(|| {
                        media
                            .content
                            .iter()
                            .filter(|c| {
                                c.content_type
                                    .as_ref()
                                    .map_or(false, |m| m.to_string().starts_with("image/"))
                            })
                            .find_map(|c| c.url.as_ref().map(|u| u.to_string()))
                    })
            });

            RawEntry {
                title: entry.title.map(|t| t.content),
                link: entry.links.first().map(|l| l.href.clone()),
                published: entry.published.or(entry.updated).map(|d| d.to_rfc3339()),
                description: entry.summary.map(|s| s.content),
                content: entry.content.and_then(|c| c.body),
                enclosure_url,
            }
        })
        .collect();

    Ok(ParsedFeed {
        title: feed.title.map(|t| t.content),
        entries,
    })
}

/// Confirms a URL serves a non-empty Letterboxd activity feed.
/// Returns the feed's title.
pub async fn check_feed(fetcher: &HttpFetcher, url: &str) -> Result<String, CycleError> {
    let feed = fetcher.fetch_feed(url).await?;
    check_parsed(&feed)?;
    Ok(feed.title.unwrap_or_else(|| "Letterboxd Feed".to_string()))
}

fn check_parsed(feed: &ParsedFeed) -> Result<(), CycleError> {
    if feed.entries.is_empty() {
        return Err(CycleError::Format("feed appears to be empty".to_string()));
    }
    let looks_like_letterboxd = feed
        .entries
        .iter()
        .take(3)
        .any(|e| e.link.as_deref().map_or(false, |l| l.contains("letterboxd.com")));
    if !looks_like_letterboxd {
        return Err(CycleError::Format(
            "feed does not appear to be a Letterboxd feed".to_string(),
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::normalizer::normalize;

    const SAMPLE: &str = r#"<?xml version="1.0" encoding="utf-8"?>
<rss version="2.0">
  <channel>
    <title>Letterboxd - alice</title>
    <link>https://letterboxd.com/alice/</link>
    <description>Letterboxd - alice</description>
    <item>
      <title>Oppenheimer, 2023 - ★★★★½</title>
      <link>https://letterboxd.com/alice/film/oppenheimer-2023/</link>
      <guid isPermaLink="false">letterboxd-review-1</guid>
      <pubDate>Sat, 22 Jul 2023 20:15:00 +0000</pubDate>
      <description><![CDATA[ <p><img src="https://a.ltrbxd.com/oppenheimer.jpg"/></p> <p>Watched on Saturday July 22, 2023.</p> ]]></description>
    </item>
    <item>
      <title>Barbie, 2023</title>
      <link>https://letterboxd.com/alice/film/barbie/</link>
      <guid isPermaLink="false">letterboxd-watch-2</guid>
      <pubDate>Fri, 21 Jul 2023 18:30:00 +0000</pubDate>
      <description><![CDATA[ <p>Watched on Friday July 21, 2023.</p> ]]></description>
    </item>
    <item>
      <title>No link here, 2020</title>
      <guid isPermaLink="false">letterboxd-watch-3</guid>
      <pubDate>Thu, 20 Jul 2023 10:00:00 +0000</pubDate>
    </item>
  </channel>
</rss>"#;

    #[test]
    fn test_parse_feed_entries() {
        let feed = parse_feed(SAMPLE.as_bytes()).unwrap();

        assert_eq!(feed.title.as_deref(), Some("Letterboxd - alice"));
        assert_eq!(feed.entries.len(), 3);
        assert_eq!(
            feed.entries[0].link.as_deref(),
            Some("https://letterboxd.com/alice/film/oppenheimer-2023/")
        );
        assert!(feed.entries[0].published.is_some());
        assert!(feed.entries[2].link.is_none());
    }

    #[test]
    fn test_parsed_entries_normalize() {
        let feed = parse_feed(SAMPLE.as_bytes()).unwrap();
        let movies: Vec<_> = feed
            .entries
            .iter()
            .filter_map(|e| normalize(e, "feed").ok())
            .collect();

        assert_eq!(movies.len(), 2);
        assert_eq!(movies[0].title, "Oppenheimer");
        assert_eq!(movies[0].year, Some(2023));
        assert_eq!(movies[0].rating, Some(4.5));
        assert_eq!(
            movies[0].image_url.as_deref(),
            Some("https://a.ltrbxd.com/oppenheimer.jpg")
        );
        assert_eq!(movies[1].title, "Barbie");
        assert_eq!(movies[1].rating, None);
    }

    #[test]
    fn test_garbage_is_a_format_error() {
        let result = parse_feed(b"this is not xml at all");
        assert!(matches!(result, Err(CycleError::Format(_))));
    }

    #[test]
    fn test_check_parsed_requires_letterboxd_links() {
        let feed = parse_feed(SAMPLE.as_bytes()).unwrap();
        assert!(check_parsed(&feed).is_ok());

        let empty = ParsedFeed { title: None, entries: Vec::new() };
        assert!(check_parsed(&empty).is_err());

        let other = ParsedFeed {
            title: None,
            entries: vec![RawEntry {
                link: Some("https://example.com/post".to_string()),
                ..RawEntry::default()
            }],
        };
        assert!(check_parsed(&other).is_err());
    }
}
