use crate::feed::fetcher::{FeedFetcher, FetchError};
use crate::feed::filter::{filter_items, Article, FilterOptions};
use crate::feed::FeedSource;
use chrono::{DateTime, Utc};
use futures::stream::{self, StreamExt};
use std::sync::Arc;
use std::time::Duration;

/// Articles selected from one feed.
#[derive(Debug, Clone, PartialEq)]
pub struct FeedResult {
    pub title: String,
    pub articles: Vec<Article>,
}

/// A source that contributed nothing because fetching or parsing failed.
#[derive(Debug)]
pub struct SourceFailure {
    pub source: FeedSource,
    pub error: FetchError,
}

/// Merged outcome of one aggregation run.
///
/// `feeds` is ordered by the position of each feed's first source in the
/// configured list. Sources reporting the same feed title are merged into a
/// single entry.
#[derive(Debug, Default)]
pub struct Aggregate {
    pub feeds: Vec<FeedResult>,
    pub failures: Vec<SourceFailure>,
}

impl Aggregate {
    /// Sum of included articles across all feeds.
    pub fn total_articles(&self) -> usize {
        self.feeds.iter().map(|f| f.articles.len()).sum()
    }

    pub fn first_error(&self) -> Option<&FetchError> {
        self.failures.first().map(|f| &f.error)
    }

    fn merge(&mut self, title: String, articles: Vec<Article>) {
        match self.feeds.iter_mut().find(|f| f.title == title) {
            Some(existing) => existing.articles.extend(articles),
            None => self.feeds.push(FeedResult { title, articles }),
        }
    }
}

/// Fetches every source concurrently and filters each feed's items.
pub struct Aggregator {
    fetcher: Arc<dyn FeedFetcher>,
    options: FilterOptions,
    fetch_timeout: Duration,
    max_concurrent: usize,
}

impl Aggregator {
    pub fn new(fetcher: Arc<dyn FeedFetcher>, options: FilterOptions, fetch_timeout: Duration) -> Self {
        Self {
            fetcher,
            options,
            fetch_timeout,
            max_concurrent: 0,
        }
    }

    /// Caps in-flight fetches; `0` runs every source at once.
    pub fn with_max_concurrent(mut self, max_concurrent: usize) -> Self {
        self.max_concurrent = max_concurrent;
        self
    }

    pub fn options(&self) -> &FilterOptions {
        &self.options
    }

    /// Runs one spawned task per source and waits for all of them.
    ///
    /// A source that fails or times out is recorded in
    /// [`Aggregate::failures`] and contributes nothing; a feed whose filter
    /// output is empty is dropped. Task results are merged only after every
    /// task has finished, in configured source order, so the merge has a
    /// single writer and its result does not depend on completion order.
    pub async fn aggregate(&self, sources: &[FeedSource], now: DateTime<Utc>) -> Aggregate {
        if sources.is_empty() {
            return Aggregate::default();
        }

        let limit = if self.max_concurrent == 0 {
            sources.len()
        } else {
            self.max_concurrent
        };

        let mut outcomes: Vec<(usize, Result<FeedResult, FetchError>)> =
            stream::iter(sources.iter().cloned().enumerate())
                .map(|(index, source)| {
                    let task = tokio::spawn(fetch_one(
                        Arc::clone(&self.fetcher),
                        source,
                        self.options,
                        self.fetch_timeout,
                        now,
                    ));
                    async move {
                        let outcome = task
                            .await
                            .unwrap_or_else(|e| Err(FetchError::Task(e.to_string())));
                        (index, outcome)
                    }
                })
                .buffer_unordered(limit)
                .collect()
                .await;

        outcomes.sort_by_key(|(index, _)| *index);

        let mut aggregate = Aggregate::default();
        for (index, outcome) in outcomes {
            match outcome {
                Ok(feed) if feed.articles.is_empty() => {}
                Ok(feed) => aggregate.merge(feed.title, feed.articles),
                Err(error) => {
                    let source = sources[index].clone();
                    tracing::warn!(feed = %source, error = %error, "Skipping feed");
                    aggregate.failures.push(SourceFailure { source, error });
                }
            }
        }

        tracing::info!(
            sources = sources.len(),
            feeds = aggregate.feeds.len(),
            failed = aggregate.failures.len(),
            articles = aggregate.total_articles(),
            "Aggregated feeds"
        );
        aggregate
    }
}

async fn fetch_one(
    fetcher: Arc<dyn FeedFetcher>,
    source: FeedSource,
    options: FilterOptions,
    timeout: Duration,
    now: DateTime<Utc>,
) -> Result<FeedResult, FetchError> {
    let feed = tokio::time::timeout(timeout, fetcher.fetch(&source))
        .await
        .map_err(|_| FetchError::Timeout(timeout))??;

    let articles = filter_items(&feed.items, feed.author.as_deref(), &options, now);
    tracing::debug!(
        feed = %source,
        title = %feed.title,
        items = feed.items.len(),
        selected = articles.len(),
        "Filtered feed"
    );
    Ok(FeedResult {
        title: feed.title,
        articles,
    })
}
