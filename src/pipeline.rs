//! One generation run: aggregate the feeds, assemble the document, write the
//! container and optionally convert it.

use crate::config::Config;
use crate::document::{Assembler, HttpImageFetcher, ImageRewriter, PublicationDocument};
use crate::epub::{convert_container, CommandConverter, ContainerConverter, ContainerError, ConvertError, EpubWriter};
use crate::feed::{Aggregator, FeedSource, HttpFeedFetcher};
use chrono::{DateTime, Utc};
use std::sync::Arc;
use thiserror::Error;

/// A failure in the finalisation stages; aborts the run.
#[derive(Debug, Error)]
pub enum GenerateError {
    #[error("failed to write container: {0}")]
    Serialize(#[from] ContainerError),
    #[error("failed to convert container: {0}")]
    Convert(#[from] ConvertError),
}

impl GenerateError {
    /// Name of the stage that failed, for logging.
    pub fn stage(&self) -> &'static str {
        match self {
            GenerateError::Serialize(_) => "serialize",
            GenerateError::Convert(_) => "convert",
        }
    }
}

/// Output of a run that found something to publish.
#[derive(Debug, Clone)]
pub struct Generated {
    pub filename: String,
    pub bytes: Vec<u8>,
    /// Article sections in the container; always at least 1.
    pub article_count: usize,
}

pub struct Generator {
    aggregator: Aggregator,
    assembler: Assembler,
    writer: EpubWriter,
    converter: Option<Arc<dyn ContainerConverter>>,
}

impl Generator {
    pub fn new(aggregator: Aggregator, assembler: Assembler) -> Self {
        Self {
            aggregator,
            assembler,
            writer: EpubWriter::default(),
            converter: None,
        }
    }

    pub fn with_converter(mut self, converter: Arc<dyn ContainerConverter>) -> Self {
        self.converter = Some(converter);
        self
    }

    /// Wires the HTTP fetchers, the image rewriter and the configured
    /// converter around one shared client.
    pub fn from_config(config: &Config, client: reqwest::Client) -> Self {
        let timeout = config.fetch_timeout();

        let feeds = Arc::new(HttpFeedFetcher::new(client.clone(), timeout));
        let aggregator = Aggregator::new(feeds, config.filter_options(), timeout)
            .with_max_concurrent(config.max_concurrent_feeds);

        let images = HttpImageFetcher::new(client, timeout).allow_private_hosts(config.allow_private_hosts);
        let assembler = Assembler::new(Arc::new(ImageRewriter::new(Arc::new(images))));

        let generator = Self::new(aggregator, assembler);
        match &config.convert {
            Some(convert) => generator.with_converter(Arc::new(CommandConverter::new(
                convert.program.clone(),
                convert.args.clone(),
            ))),
            None => generator,
        }
    }

    /// Aggregates and assembles without serialising.
    pub async fn build_document(&self, sources: &[FeedSource], now: DateTime<Utc>) -> PublicationDocument {
        let aggregate = self.aggregator.aggregate(sources, now).await;
        self.assembler
            .assemble(aggregate.feeds, self.aggregator.options().window, now)
            .await
    }

    /// Runs the whole pipeline.
    ///
    /// `Ok(None)` means no feed had anything inside the window; nothing
    /// should be written or uploaded. Failed feeds and images are logged and
    /// skipped; only container writing and conversion abort the run.
    pub async fn generate(
        &self,
        sources: &[FeedSource],
        now: DateTime<Utc>,
    ) -> Result<Option<Generated>, GenerateError> {
        let doc = self.build_document(sources, now).await;
        if doc.is_empty() {
            return Ok(None);
        }

        let article_count = doc.article_count();
        let mut file = self.writer.write(&doc)?;
        if let Some(converter) = &self.converter {
            file = convert_container(converter.as_ref(), &file).await?;
        }

        Ok(Some(Generated {
            filename: file.filename,
            bytes: file.bytes,
            article_count,
        }))
    }
}
