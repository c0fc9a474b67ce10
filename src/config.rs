//! Configuration file parser for `config.toml`.
//!
//! Loaded once at startup. Unlike most keys, `feeds` is required, so a
//! missing file is an error rather than a default configuration. Unknown keys
//! are ignored by serde, though we log a warning for each one since they are
//! usually typos.
use crate::feed::{FeedSource, FilterOptions};
use crate::util::{validate_url, UrlValidationError};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

// ============================================================================
// Error Types
// ============================================================================

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Config file not found: {}", .0.display())]
    Missing(PathBuf),

    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid TOML in config file: {0}")]
    Parse(#[from] toml::de::Error),

    /// Config file exceeds maximum allowed size.
    #[error("Config file too large: {0}")]
    TooLarge(String),

    #[error("No feeds configured")]
    NoFeeds,

    #[error("Invalid feed URL '{url}': {source}")]
    InvalidFeedUrl {
        url: String,
        #[source]
        source: UrlValidationError,
    },

    #[error("window_hours must be greater than zero")]
    InvalidWindow,

    #[error("fetch_timeout_secs must be greater than zero")]
    InvalidTimeout,

    #[error("output_folder must be an absolute path starting with '/': {0}")]
    InvalidOutputFolder(String),

    #[error("convert.program must not be empty")]
    InvalidConverter,
}

// ============================================================================
// Configuration Structs
// ============================================================================

/// Top-level configuration.
///
/// Every key except `feeds` has a default. Dropbox secrets are masked in the
/// `Debug` output.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Feed URLs, in the order their articles appear in the book.
    pub feeds: Vec<String>,

    /// Recency window in hours.
    pub window_hours: u32,

    /// Destination folder passed to the object store.
    pub output_folder: String,

    /// Keep items that carry no publish time at all.
    pub include_missing_dates: bool,

    /// Bound on each feed fetch and each image download.
    pub fetch_timeout_secs: u64,

    /// Maximum feeds fetched at once (0 = all).
    pub max_concurrent_feeds: usize,

    /// Allow feed and image URLs on localhost or private networks.
    pub allow_private_hosts: bool,

    /// External converter run on the finished EPUB.
    pub convert: Option<ConvertConfig>,

    /// Dropbox credentials. Command line flags and environment variables
    /// take precedence.
    pub dropbox: DropboxConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            feeds: Vec::new(),
            window_hours: 168,
            output_folder: "/".to_string(),
            include_missing_dates: false,
            fetch_timeout_secs: 30,
            max_concurrent_feeds: 0,
            allow_private_hosts: false,
            convert: None,
            dropbox: DropboxConfig::default(),
        }
    }
}

/// `[convert]` table. `{input}` and `{output}` in `args` are replaced with
/// the paths of the generic and the converted file.
#[derive(Debug, Clone, Deserialize)]
pub struct ConvertConfig {
    pub program: String,
    #[serde(default = "default_convert_args")]
    pub args: Vec<String>,
}

fn default_convert_args() -> Vec<String> {
    vec!["-o".into(), "{output}".into(), "{input}".into()]
}

/// `[dropbox]` table.
#[derive(Clone, Default, Deserialize)]
#[serde(default)]
pub struct DropboxConfig {
    pub app_key: Option<String>,
    pub app_secret: Option<String>,
    pub refresh_token: Option<String>,
}

impl std::fmt::Debug for DropboxConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DropboxConfig")
            .field("app_key", &self.app_key)
            .field("app_secret", &self.app_secret.as_ref().map(|_| "[REDACTED]"))
            .field(
                "refresh_token",
                &self.refresh_token.as_ref().map(|_| "[REDACTED]"),
            )
            .finish()
    }
}

impl Config {
    /// Maximum config file size (1 MB).
    const MAX_FILE_SIZE: u64 = 1_048_576;

    const KNOWN_KEYS: [&'static str; 9] = [
        "feeds",
        "window_hours",
        "output_folder",
        "include_missing_dates",
        "fetch_timeout_secs",
        "max_concurrent_feeds",
        "allow_private_hosts",
        "convert",
        "dropbox",
    ];

    /// Load and validate configuration from a TOML file.
    ///
    /// - Missing file → `Err(ConfigError::Missing)`
    /// - Invalid TOML → `Err(ConfigError::Parse)` with line number info
    /// - Unknown keys → accepted, logged as warning
    /// - Invalid values → the matching validation error
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        // Check file size before reading to avoid loading a huge or corrupted file.
        match std::fs::metadata(path) {
            Ok(meta) if meta.len() > Self::MAX_FILE_SIZE => {
                return Err(ConfigError::TooLarge(format!(
                    "Config file is {} bytes (max {} bytes)",
                    meta.len(),
                    Self::MAX_FILE_SIZE
                )));
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(ConfigError::Missing(path.to_path_buf()));
            }
            Err(e) => return Err(ConfigError::Io(e)),
            Ok(_) => {}
        }

        let content = match std::fs::read_to_string(path) {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(ConfigError::Missing(path.to_path_buf()));
            }
            Err(e) => return Err(ConfigError::Io(e)),
        };

        let config = Self::parse(&content)?;
        tracing::info!(
            path = %path.display(),
            feeds = config.feeds.len(),
            window_hours = config.window_hours,
            "Loaded configuration"
        );
        Ok(config)
    }

    /// Parse and validate configuration from TOML text.
    pub fn parse(content: &str) -> Result<Self, ConfigError> {
        // Parse as a raw table first to detect unknown keys
        if let Ok(raw) = content.parse::<toml::Table>() {
            for key in raw.keys() {
                if !Self::KNOWN_KEYS.contains(&key.as_str()) {
                    tracing::warn!(key = %key, "Unknown key in config file, ignoring");
                }
            }
        }

        let config: Config = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.sources()?;
        if self.window_hours == 0 {
            return Err(ConfigError::InvalidWindow);
        }
        if self.fetch_timeout_secs == 0 {
            return Err(ConfigError::InvalidTimeout);
        }
        if !self.output_folder.starts_with('/') {
            return Err(ConfigError::InvalidOutputFolder(self.output_folder.clone()));
        }
        if let Some(convert) = &self.convert {
            if convert.program.trim().is_empty() {
                return Err(ConfigError::InvalidConverter);
            }
        }
        Ok(())
    }

    /// The configured feeds as validated sources, in configured order.
    pub fn sources(&self) -> Result<Vec<FeedSource>, ConfigError> {
        if self.feeds.is_empty() {
            return Err(ConfigError::NoFeeds);
        }
        self.feeds
            .iter()
            .map(|url| {
                validate_url(url.trim(), self.allow_private_hosts)
                    .map(FeedSource::new)
                    .map_err(|source| ConfigError::InvalidFeedUrl {
                        url: url.clone(),
                        source,
                    })
            })
            .collect()
    }

    pub fn filter_options(&self) -> FilterOptions {
        FilterOptions::from_hours(self.window_hours, self.include_missing_dates)
    }

    pub fn fetch_timeout(&self) -> Duration {
        Duration::from_secs(self.fetch_timeout_secs)
    }
}

// ============================================================================
// Tests
// ============================================================================
