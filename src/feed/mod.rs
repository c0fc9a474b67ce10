//! Feed retrieval, parsing and selection.
//!
//! - [`parser`] - feed documents into [`RawItem`]s using the `feed-rs` crate
//! - [`fetcher`] - the [`FeedFetcher`] seam and its HTTP implementation
//! - [`filter`] - recency window selection and author/date normalisation
//! - [`aggregator`] - concurrent fetch of every configured source and the merge
//!
//! # Example
//!
//! ```ignore
//! use anthology::feed::{Aggregator, FilterOptions, HttpFeedFetcher};
//!
//! let fetcher = Arc::new(HttpFeedFetcher::new(client, timeout));
//! let aggregator = Aggregator::new(fetcher, FilterOptions::from_hours(168, false), timeout);
//! let aggregate = aggregator.aggregate(&sources, Utc::now()).await;
//! ```

mod aggregator;
mod fetcher;
mod filter;
mod parser;

pub use aggregator::{Aggregate, Aggregator, FeedResult, SourceFailure};
pub use fetcher::{FeedFetcher, FetchError, HttpFeedFetcher};
pub use filter::{filter_items, Article, FilterOptions, DATE_FORMAT};
pub use parser::{parse_feed, ParsedFeed, RawItem};

pub(crate) use fetcher::read_limited_bytes;

use std::fmt;
use url::Url;

/// Locator of one syndication feed, as listed in the configuration.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct FeedSource {
    url: Url,
}

impl FeedSource {
    pub fn new(url: Url) -> Self {
        Self { url }
    }

    pub fn parse(url: &str) -> Result<Self, url::ParseError> {
        Url::parse(url).map(Self::new)
    }

    pub fn url(&self) -> &Url {
        &self.url
    }
}

impl fmt::Display for FeedSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.url.as_str())
    }
}
