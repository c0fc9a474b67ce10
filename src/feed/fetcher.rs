use crate::feed::parser::{parse_feed, ParsedFeed};
use crate::feed::FeedSource;
use async_trait::async_trait;
use futures::StreamExt;
use std::time::Duration;
use thiserror::Error;

const MAX_RETRIES: u32 = 3;
const MAX_FEED_SIZE: usize = 10 * 1024 * 1024; // 10MB

/// Errors that can occur while retrieving and parsing one feed source.
///
/// All of these are local to a single source: the aggregator logs them and
/// carries on with the remaining feeds.
#[derive(Debug, Error)]
pub enum FetchError {
    /// Network-level error (DNS, connection, TLS, etc.)
    #[error("Request failed: {0}")]
    Network(#[from] reqwest::Error),
    /// HTTP response with non-2xx status code
    #[error("HTTP error: status {0}")]
    HttpStatus(u16),
    /// Fetch exceeded the configured timeout
    #[error("Request timed out after {0:?}")]
    Timeout(Duration),
    /// Feed document could not be parsed as RSS, Atom or JSON Feed
    #[error("Parse error: {0}")]
    Parse(String),
    /// Server returned 429 Too Many Requests after max retries
    #[error("Rate limited after {0} retries")]
    RateLimited(u32),
    /// Response body exceeded the 10MB size limit
    #[error("Response too large")]
    ResponseTooLarge,
    /// Response was incomplete (received fewer bytes than Content-Length)
    #[error("Incomplete response: expected {expected} bytes, received {received}")]
    IncompleteResponse { expected: u64, received: usize },
    /// The task running the fetch panicked or was cancelled
    #[error("Fetch task failed: {0}")]
    Task(String),
}

/// Retrieves a feed source and parses it into items.
///
/// The aggregator only depends on this seam, so tests and alternative
/// transports can supply feeds without a network.
#[async_trait]
pub trait FeedFetcher: Send + Sync {
    async fn fetch(&self, source: &FeedSource) -> Result<ParsedFeed, FetchError>;
}

/// [`FeedFetcher`] over HTTP(S) using a caller-supplied [`reqwest::Client`].
///
/// # Behavior
///
/// - Each request is bounded by `request_timeout`
/// - HTTP 429 and 5xx responses are retried up to 3 times with exponential
///   backoff starting at `retry_base_delay` (1s, 2s, 4s by default)
/// - Other non-2xx statuses fail immediately
/// - Bodies are limited to 10MB; truncated bodies are retried
#[derive(Clone)]
pub struct HttpFeedFetcher {
    client: reqwest::Client,
    request_timeout: Duration,
    retry_base_delay: Duration,
}

impl HttpFeedFetcher {
    pub fn new(client: reqwest::Client, request_timeout: Duration) -> Self {
        Self {
            client,
            request_timeout,
            retry_base_delay: Duration::from_secs(1),
        }
    }

    /// Overrides the first backoff delay; later retries double it.
    pub fn with_retry_base_delay(mut self, delay: Duration) -> Self {
        self.retry_base_delay = delay;
        self
    }

    async fn fetch_bytes(&self, source: &FeedSource) -> Result<Vec<u8>, FetchError> {
        let mut retry_count = 0;

        loop {
            let response = tokio::time::timeout(
                self.request_timeout,
                self.client.get(source.url().as_str()).send(),
            )
            .await
            .map_err(|_| FetchError::Timeout(self.request_timeout))?
            .map_err(FetchError::Network)?;

            let status = response.status();
            let delay = self.retry_base_delay * 2u32.pow(retry_count);

            if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
                if retry_count >= MAX_RETRIES {
                    return Err(FetchError::RateLimited(MAX_RETRIES));
                }
                tracing::warn!(
                    feed = %source,
                    retry = retry_count,
                    delay_ms = delay.as_millis() as u64,
                    "Rate limited, backing off"
                );
                tokio::time::sleep(delay).await;
                retry_count += 1;
                continue;
            }

            if status.is_server_error() {
                if retry_count >= MAX_RETRIES {
                    return Err(FetchError::HttpStatus(status.as_u16()));
                }
                tracing::warn!(
                    feed = %source,
                    status = %status,
                    retry = retry_count,
                    delay_ms = delay.as_millis() as u64,
                    "Server error, retrying after delay"
                );
                tokio::time::sleep(delay).await;
                retry_count += 1;
                continue;
            }

            if !status.is_success() {
                return Err(FetchError::HttpStatus(status.as_u16()));
            }

            match read_limited_bytes(response, MAX_FEED_SIZE).await {
                Ok(bytes) => return Ok(bytes),
                Err(FetchError::IncompleteResponse { expected, received })
                    if retry_count < MAX_RETRIES =>
                {
                    tracing::debug!(
                        feed = %source,
                        expected = expected,
                        received = received,
                        attempt = retry_count + 1,
                        "Retrying incomplete download"
                    );
                    tokio::time::sleep(delay).await;
                    retry_count += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }
}

#[async_trait]
impl FeedFetcher for HttpFeedFetcher {
    async fn fetch(&self, source: &FeedSource) -> Result<ParsedFeed, FetchError> {
        let bytes = self.fetch_bytes(source).await?;
        let fallback_title = source.url().host_str().unwrap_or(source.url().as_str());
        let feed =
            parse_feed(&bytes, fallback_title).map_err(|e| FetchError::Parse(e.to_string()))?;

        tracing::debug!(
            feed = %source,
            title = %feed.title,
            items = feed.items.len(),
            "Fetched feed"
        );
        Ok(feed)
    }
}

/// Reads a response body, refusing anything over `limit` bytes and flagging
/// bodies shorter than their declared Content-Length.
pub(crate) async fn read_limited_bytes(
    response: reqwest::Response,
    limit: usize,
) -> Result<Vec<u8>, FetchError> {
    let expected_length = response.content_length();

    if let Some(len) = expected_length {
        if len > limit as u64 {
            return Err(FetchError::ResponseTooLarge);
        }
    }

    let mut bytes = Vec::new();
    let mut stream = response.bytes_stream();

    while let Some(chunk) = stream.next().await {
        let chunk = chunk.map_err(FetchError::Network)?;
        if bytes.len().saturating_add(chunk.len()) > limit {
            return Err(FetchError::ResponseTooLarge);
        }
        bytes.extend_from_slice(&chunk);
    }

    if let Some(expected) = expected_length {
        if (bytes.len() as u64) < expected {
            return Err(FetchError::IncompleteResponse {
                expected,
                received: bytes.len(),
            });
        }
    }

    Ok(bytes)
}
