use crate::document::images::{ImageFetcher, ResourceTable};
use crate::document::markup::{self, MarkupError};
use async_trait::async_trait;
use std::sync::Arc;
use thiserror::Error;
use url::Url;

#[derive(Debug, Error)]
pub enum RewriteError {
    #[error("malformed article markup: {0}")]
    Markup(#[from] MarkupError),
}

/// Rewrites an article body before it is placed in the document.
///
/// Rewriting is best effort: when it fails the assembler keeps the original
/// body, so implementations should only report errors that make their output
/// unusable.
#[async_trait]
pub trait ContentRewriter: Send + Sync {
    async fn rewrite(
        &self,
        body: &str,
        origin: Option<&Url>,
        resources: &mut ResourceTable,
    ) -> Result<String, RewriteError>;
}

/// Leaves bodies untouched and embeds nothing.
#[derive(Debug, Clone, Copy, Default)]
pub struct PassthroughRewriter;

#[async_trait]
impl ContentRewriter for PassthroughRewriter {
    async fn rewrite(
        &self,
        body: &str,
        _origin: Option<&Url>,
        _resources: &mut ResourceTable,
    ) -> Result<String, RewriteError> {
        Ok(body.to_string())
    }
}

/// Embeds remote images and points the markup at the local copies.
///
/// For every `<img src>` in the body:
///
/// - a `src` starting with `/` is resolved against `origin` (the article's
///   link), where `//host/x` keeps its own host; anything else must already
///   be an absolute URL
/// - the original `src` string is the dedup key: a reference already in the
///   [`ResourceTable`] is reused, a new one is downloaded once and registered
/// - a reference that cannot be resolved or downloaded is skipped and its
///   element keeps pointing at the remote image
///
/// Rewritten elements lose their `srcset` and `loading` attributes. The
/// returned body is XHTML.
pub struct ImageRewriter {
    fetcher: Arc<dyn ImageFetcher>,
}

impl ImageRewriter {
    pub fn new(fetcher: Arc<dyn ImageFetcher>) -> Self {
        Self { fetcher }
    }
}

#[async_trait]
impl ContentRewriter for ImageRewriter {
    async fn rewrite(
        &self,
        body: &str,
        origin: Option<&Url>,
        resources: &mut ResourceTable,
    ) -> Result<String, RewriteError> {
        for source in markup::image_sources(body) {
            if resources.is_settled(&source) {
                continue;
            }

            let Some(url) = resolve_image_url(&source, origin) else {
                tracing::debug!(src = %source, "Skipping image with unresolvable reference");
                resources.mark_failed(&source);
                continue;
            };

            match self.fetcher.fetch(&url).await {
                Ok(image) => {
                    let href = resources.register(&source, url, image);
                    tracing::debug!(src = %source, href = %href, "Embedded image");
                }
                Err(e) => {
                    tracing::warn!(src = %source, url = %url, error = %e, "Failed to embed image");
                    resources.mark_failed(&source);
                }
            }
        }

        let rewritten =
            markup::to_xhtml_with(body, |src| resources.local_href(src).map(str::to_string))?;
        Ok(rewritten)
    }
}

/// Scheme+host part of an article link, used to resolve `/path` images.
pub fn source_origin(link: &str) -> Option<Url> {
    let url = Url::parse(link).ok()?;
    if !url.has_host() {
        return None;
    }
    url.join("/").ok()
}

fn resolve_image_url(src: &str, origin: Option<&Url>) -> Option<Url> {
    let src = src.trim();
    if src.starts_with('/') {
        origin?.join(src).ok()
    } else {
        Url::parse(src).ok()
    }
}
