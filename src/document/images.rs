use crate::feed::{read_limited_bytes, FetchError};
use crate::util::{check_remote_url, UrlValidationError};
use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::time::Duration;
use thiserror::Error;
use url::Url;

const MAX_IMAGE_SIZE: usize = 10 * 1024 * 1024; // 10MB

/// Directory inside the container's content folder holding embedded images.
pub const IMAGE_DIR: &str = "images";

#[derive(Debug, Error)]
pub enum ImageError {
    #[error("refusing image URL: {0}")]
    Blocked(#[from] UrlValidationError),
    #[error("image transfer failed: {0}")]
    Transfer(#[from] FetchError),
    #[error("not an image: {0}")]
    NotAnImage(String),
}

/// Bytes and media type of one downloaded image.
#[derive(Debug, Clone, PartialEq)]
pub struct FetchedImage {
    pub media_type: String,
    pub data: Vec<u8>,
}

/// Downloads images referenced from article markup.
#[async_trait]
pub trait ImageFetcher: Send + Sync {
    async fn fetch(&self, url: &Url) -> Result<FetchedImage, ImageError>;
}

/// One embedded image.
#[derive(Debug, Clone, PartialEq)]
pub struct ImageResource {
    /// The `src` value exactly as it appeared in the markup.
    pub source: String,
    /// Absolute URL the image was downloaded from.
    pub url: Url,
    /// Manifest id, e.g. `image0003`.
    pub id: String,
    /// Path relative to the content folder, e.g. `images/image0003.png`.
    pub href: String,
    pub media_type: String,
    pub data: Vec<u8>,
}

/// Run-scoped table of embedded images, keyed by the original `src` string.
///
/// Each distinct reference is registered at most once for the whole run, so
/// the same image used by several articles (from any feed) is downloaded and
/// embedded a single time. References that failed to download are remembered
/// and not retried.
#[derive(Debug, Default)]
pub struct ResourceTable {
    entries: Vec<ImageResource>,
    by_source: HashMap<String, usize>,
    failed: HashSet<String>,
}

impl ResourceTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, source: &str) -> Option<&ImageResource> {
        self.by_source.get(source).map(|&i| &self.entries[i])
    }

    /// Local path for a reference, if it has been embedded.
    pub fn local_href(&self, source: &str) -> Option<&str> {
        self.get(source).map(|r| r.href.as_str())
    }

    /// True once a reference has been either embedded or given up on.
    pub fn is_settled(&self, source: &str) -> bool {
        self.by_source.contains_key(source) || self.failed.contains(source)
    }

    /// Adds an image under the next free id and returns its href. A source
    /// that is already registered keeps its existing entry.
    pub fn register(&mut self, source: &str, url: Url, image: FetchedImage) -> &str {
        let index = match self.by_source.get(source) {
            Some(&index) => index,
            None => {
                let number = self.entries.len() + 1;
                let id = format!("image{number:04}");
                let href = format!("{IMAGE_DIR}/{id}.{}", extension_for(&image.media_type, &url));
                self.entries.push(ImageResource {
                    source: source.to_string(),
                    url,
                    id,
                    href,
                    media_type: image.media_type,
                    data: image.data,
                });
                self.by_source.insert(source.to_string(), number - 1);
                number - 1
            }
        };
        &self.entries[index].href
    }

    pub fn mark_failed(&mut self, source: &str) {
        self.failed.insert(source.to_string());
    }

    /// Embedded images in registration order.
    pub fn iter(&self) -> impl Iterator<Item = &ImageResource> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

fn extension_for(media_type: &str, url: &Url) -> String {
    let known = match media_type {
        "image/jpeg" | "image/jpg" | "image/pjpeg" => Some("jpg"),
        "image/png" => Some("png"),
        "image/gif" => Some("gif"),
        "image/webp" => Some("webp"),
        "image/svg+xml" => Some("svg"),
        "image/avif" => Some("avif"),
        _ => None,
    };
    if let Some(ext) = known {
        return ext.to_string();
    }
    url.path()
        .rsplit('/')
        .next()
        .and_then(|name| name.rsplit_once('.'))
        .map(|(_, ext)| ext.to_ascii_lowercase())
        .filter(|ext| !ext.is_empty() && ext.len() <= 5 && ext.chars().all(|c| c.is_ascii_alphanumeric()))
        .unwrap_or_else(|| "img".to_string())
}

/// [`ImageFetcher`] over HTTP(S).
///
/// Image URLs come from untrusted feed content and are checked against the
/// private-network guard unless `allow_private_hosts` is set. The media type
/// is taken from `Content-Type`, falling back to a guess from the URL path;
/// anything that is not `image/*` is rejected.
#[derive(Clone)]
pub struct HttpImageFetcher {
    client: reqwest::Client,
    timeout: Duration,
    allow_private_hosts: bool,
}

impl HttpImageFetcher {
    pub fn new(client: reqwest::Client, timeout: Duration) -> Self {
        Self {
            client,
            timeout,
            allow_private_hosts: false,
        }
    }

    pub fn allow_private_hosts(mut self, allow: bool) -> Self {
        self.allow_private_hosts = allow;
        self
    }
}

#[async_trait]
impl ImageFetcher for HttpImageFetcher {
    async fn fetch(&self, url: &Url) -> Result<FetchedImage, ImageError> {
        check_remote_url(url, self.allow_private_hosts)?;

        let response = tokio::time::timeout(self.timeout, self.client.get(url.as_str()).send())
            .await
            .map_err(|_| FetchError::Timeout(self.timeout))?
            .map_err(FetchError::Network)?;

        if !response.status().is_success() {
            return Err(FetchError::HttpStatus(response.status().as_u16()).into());
        }

        let declared = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(|v| v.split(';').next().unwrap_or(v).trim().to_ascii_lowercase())
            .filter(|v| !v.is_empty() && v != "application/octet-stream");
        let media_type = declared
            .or_else(|| mime_guess::from_path(url.path()).first().map(|m| m.essence_str().to_string()))
            .unwrap_or_default();
        if !media_type.starts_with("image/") {
            return Err(ImageError::NotAnImage(media_type));
        }

        let data = tokio::time::timeout(self.timeout, read_limited_bytes(response, MAX_IMAGE_SIZE))
            .await
            .map_err(|_| FetchError::Timeout(self.timeout))??;

        Ok(FetchedImage { media_type, data })
    }
}
