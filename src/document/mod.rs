//! Assembly of selected articles into a publication document.
//!
//! - [`markup`] - HTML fragment parsing and XHTML serialisation
//! - [`images`] - the run-wide [`ResourceTable`] and image downloading
//! - [`rewriter`] - the [`ContentRewriter`] seam used on every article body
//! - [`assembler`] - ordering, section rendering and the bibliography

mod assembler;
pub mod images;
pub mod markup;
mod rewriter;

pub use assembler::Assembler;
pub use images::{FetchedImage, HttpImageFetcher, ImageError, ImageFetcher, ImageResource, ResourceTable};
pub use rewriter::{source_origin, ContentRewriter, ImageRewriter, PassthroughRewriter, RewriteError};

use crate::feed::DATE_FORMAT;
use chrono::{DateTime, TimeDelta, Utc};

/// Title of the trailing bibliography section.
pub const SOURCES_TITLE: &str = "Sources";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SectionKind {
    Article,
    Sources,
}

/// One titled XHTML fragment of the publication.
#[derive(Debug, Clone, PartialEq)]
pub struct Section {
    pub title: String,
    pub body: String,
    pub kind: SectionKind,
}

/// Everything the container writer needs for one run.
///
/// Sections are in reading order: article sections grouped by feed, then a
/// single Sources section. An empty document (no sections at all) means the
/// run found nothing to publish.
#[derive(Debug)]
pub struct PublicationDocument {
    pub title: String,
    pub sections: Vec<Section>,
    pub resources: ResourceTable,
    pub generated_at: DateTime<Utc>,
}

impl PublicationDocument {
    pub fn empty(title: String, generated_at: DateTime<Utc>) -> Self {
        Self {
            title,
            sections: Vec::new(),
            resources: ResourceTable::new(),
            generated_at,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.sections.is_empty()
    }

    /// Number of article sections (everything but the Sources section).
    pub fn article_count(&self) -> usize {
        self.sections.len().saturating_sub(1)
    }
}

/// `"<window start> - <now>"` in UTC, e.g. `2025 Jun 3 - 2025 Jun 10`.
pub fn publication_title(window: TimeDelta, now: DateTime<Utc>) -> String {
    format!(
        "{} - {}",
        (now - window).format(DATE_FORMAT),
        now.format(DATE_FORMAT)
    )
}
