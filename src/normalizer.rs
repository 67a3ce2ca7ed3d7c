use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use regex::Regex;
use sha2::{Digest, Sha256};
use std::sync::OnceLock;

use crate::error::Rejection;
use crate::models::{MovieRecord, RawEntry};

const FULL_STAR: char = '★';
const HALF_STAR: char = '½';
const MAX_RATING: f32 = 5.0;

fn rating_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    // A glyph run must start the title or follow whitespace, so "8½" survives
    RE.get_or_init(|| {
        Regex::new(r"(?:^|\s+)(?:-\s*)?(?P<stars>★+½?|½)(?:\s|$)")
            .expect("rating pattern is valid")
    })
}

fn comma_year_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^(?P<title>.+?),\s*(?P<year>[0-9]{4})\s*-?\s*$")
            .expect("year pattern is valid")
    })
}

fn paren_year_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^(?P<title>.+?)\s*\((?P<year>[0-9]{4})\)\s*$")
            .expect("year pattern is valid")
    })
}

fn image_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r#"(?i)<img[^>]+src=["']([^"']+)["']"#).expect("image pattern is valid")
    })
}

/// Maps one raw feed entry to a canonical movie record.
///
/// Pure: the same entry and feed id always produce the same record, including
/// its identity. Entries without a usable title, link or published date are
/// rejected so that no partial record ever reaches the history.
pub fn normalize(entry: &RawEntry, feed_id: &str) -> Result<MovieRecord, Rejection> {
    let raw_title = non_empty(entry.title.as_deref()).ok_or(Rejection::MissingTitle)?;
    let link = parse_link(entry.link.as_deref())?;
    let date_added = parse_date(entry.published.as_deref())?;

    let (rest, rating) = split_rating(raw_title);
    let (title, year) = split_year(rest);
    if title.is_empty() {
        return Err(Rejection::MissingTitle);
    }

    Ok(MovieRecord {
        identity: movie_identity(&link, &date_added),
        title: title.to_string(),
        year,
        rating,
        image_url: extract_image(entry),
        link,
        date_added,
        feed_id: feed_id.to_string(),
    })
}

/// Stable deduplication key: a rewatch on another date is a distinct record.
pub fn movie_identity(link: &str, date_added: &DateTime<Utc>) -> String {
    let digest = Sha256::digest(format!("{}|{}", link, date_added.to_rfc3339()).as_bytes());
    let mut hex = format!("{:x}", digest);
    hex.truncate(32);
    hex
}

/// Cuts the title at its first star-glyph run. Anything after the run, such
/// as " (contains spoilers)", is dropped along with it.
/// No glyphs means the movie is unrated, which is not the same as 0.
pub fn split_rating(raw: &str) -> (&str, Option<f32>) {
    let raw = raw.trim();
    let Some(caps) = rating_regex().captures(raw) else {
        return (raw, None);
    };
    let stars = &caps["stars"];
    let full = stars.chars().filter(|c| *c == FULL_STAR).count() as f32;
    let half = if stars.contains(HALF_STAR) { 0.5 } else { 0.0 };
    let rest = caps.get(0).map_or("", |m| &raw[..m.start()]).trim();

    (rest, Some((full + half).min(MAX_RATING)))
}

/// Separates `Title, YYYY` (or `Title (YYYY)`) into its parts.
pub fn split_year(raw: &str) -> (&str, Option<u16>) {
    let raw = raw.trim();
    for re in [comma_year_regex(), paren_year_regex()] {
        if let Some(caps) = re.captures(raw) {
            let year = caps["year"].parse().ok();
            let title = caps.name("title").map_or(raw, |m| m.as_str()).trim();
            return (title, year);
        }
    }
    (raw, None)
}

/// First poster reference: inline markup in content, then description, then
/// an image enclosure.
pub fn extract_image(entry: &RawEntry) -> Option<String> {
    [entry.content.as_deref(), entry.description.as_deref()]
        .into_iter()
        .flatten()
        .find_map(|markup| {
            image_regex()
                .captures(markup)
                .map(|caps| caps[1].trim().to_string())
        })
        .filter(|url| !url.is_empty())
        .or_else(|| non_empty(entry.enclosure_url.as_deref()).map(String::from))
}

fn parse_link(raw: Option<&str>) -> Result<String, Rejection> {
    let raw = non_empty(raw).ok_or(Rejection::MissingLink)?;
    match reqwest::Url::parse(raw) {
        Ok(url) if matches!(url.scheme(), "http" | "https") && url.has_host() => {
            Ok(raw.to_string())
        }
        _ => Err(Rejection::MalformedLink(raw.to_string())),
    }
}

/// Accepts RFC 3339, RFC 2822, naive ISO date-times (as UTC) and bare dates.
pub fn parse_date(raw: Option<&str>) -> Result<DateTime<Utc>, Rejection> {
    let raw = non_empty(raw).ok_or(Rejection::MissingDate)?;

    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Ok(dt.with_timezone(&Utc));
    }
    if let Ok(dt) = DateTime::parse_from_rfc2822(raw) {
        return Ok(dt.with_timezone(&Utc));
    }
    if let Ok(naive) = NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S") {
        return Ok(naive.and_utc());
    }
    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .ok()
        .and_then(|date| date.and_hms_opt(0, 0, 0))
        .map(|naive| naive.and_utc())
        .ok_or_else(|| Rejection::UnparsableDate(raw.to_string()))
}

fn non_empty(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|v| !v.is_empty())
}
