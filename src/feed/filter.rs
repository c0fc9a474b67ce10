//! Recency filtering and metadata normalisation for feed items.

use crate::feed::parser::RawItem;
use chrono::{DateTime, TimeDelta, Utc};

/// Display format for article and title dates, e.g. `2025 Jun 9`.
pub const DATE_FORMAT: &str = "%Y %b %-d";

/// The core's normalised unit of content.
#[derive(Debug, Clone, PartialEq)]
pub struct Article {
    pub title: String,
    pub link: String,
    /// Item author, else feed author, else empty.
    pub author: String,
    pub display_date: String,
    /// HTML body; the image rewriter replaces it during assembly.
    pub body: String,
}

/// How items are selected from a feed.
#[derive(Debug, Clone, Copy)]
pub struct FilterOptions {
    /// Items older than this (relative to "now") are excluded.
    pub window: TimeDelta,
    /// Whether items without any publish time are kept.
    pub include_missing_dates: bool,
}

impl FilterOptions {
    pub fn from_hours(hours: u32, include_missing_dates: bool) -> Self {
        Self {
            window: TimeDelta::hours(i64::from(hours)),
            include_missing_dates,
        }
    }
}

/// Selects the items of one feed published within the window and turns them
/// into [`Article`]s.
///
/// Items are expected newest-first. Scanning stops at the first dated item
/// that falls outside the window, so a feed listing an old item before newer
/// ones loses everything after it. Undated items never stop the scan; they
/// are kept or skipped according to `include_missing_dates`.
///
/// An item is inside the window iff `now - published < window`; an item
/// exactly `window` old is excluded.
pub fn filter_items(
    items: &[RawItem],
    feed_author: Option<&str>,
    options: &FilterOptions,
    now: DateTime<Utc>,
) -> Vec<Article> {
    let mut articles = Vec::new();

    for item in items {
        match item.published {
            Some(published) if now.signed_duration_since(published) >= options.window => break,
            Some(_) => {}
            None if !options.include_missing_dates => continue,
            None => {}
        }

        articles.push(Article {
            title: item.title.clone(),
            link: item.link.clone(),
            author: resolve_author(item.author.as_deref(), feed_author),
            display_date: display_date(item),
            body: item.body.clone(),
        });
    }

    articles
}

fn resolve_author(item_author: Option<&str>, feed_author: Option<&str>) -> String {
    item_author
        .filter(|a| !a.trim().is_empty())
        .or(feed_author)
        .map(|a| a.trim().to_string())
        .unwrap_or_default()
}

/// Dates feed-rs could not parse leave the item undated and blank here.
fn display_date(item: &RawItem) -> String {
    item.published
        .map(|published| published.format(DATE_FORMAT).to_string())
        .unwrap_or_default()
}
