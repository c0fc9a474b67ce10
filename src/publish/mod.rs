//! Destinations for the finished container.
//!
//! The pipeline only needs "accept bytes under a path, return where they
//! went"; [`ObjectStore`] is that seam. Two stores are provided:
//!
//! - [`LocalStore`] writes into a directory on disk
//! - [`DropboxStore`] uploads through the Dropbox HTTP API

mod dropbox;
mod local;

pub use dropbox::{DropboxCredentials, DropboxStore};
pub use local::LocalStore;

use async_trait::async_trait;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("invalid destination path: {0}")]
    InvalidPath(String),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("request failed: {0}")]
    Network(#[from] reqwest::Error),
    #[error("{operation} failed with status {status}: {body}")]
    Status {
        operation: &'static str,
        status: u16,
        body: String,
    },
    #[error("unexpected response: {0}")]
    Decode(#[from] serde_json::Error),
    #[error("file too large for upload: {0} bytes")]
    TooLarge(usize),
}

/// Accepts finished bytes under a destination path.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Stores `bytes` at `path` and returns the path the store reports back.
    async fn put(&self, path: &str, bytes: Vec<u8>) -> Result<String, StoreError>;
}

/// Joins a configured folder and a file name with exactly one `/`.
///
/// ```
/// use anthology::publish::destination_path;
///
/// assert_eq!(destination_path("/Apps/Rakuten Kobo", "a.epub"), "/Apps/Rakuten Kobo/a.epub");
/// assert_eq!(destination_path("/", "a.epub"), "/a.epub");
/// ```
pub fn destination_path(folder: &str, filename: &str) -> String {
    format!("{}/{}", folder.trim_end_matches('/'), filename)
}
