use crate::document::images::ResourceTable;
use crate::document::rewriter::{source_origin, ContentRewriter};
use crate::document::{publication_title, PublicationDocument, Section, SectionKind, SOURCES_TITLE};
use crate::feed::{Article, FeedResult, DATE_FORMAT};
use crate::util::{escape_attr, escape_text};
use chrono::{DateTime, TimeDelta, Utc};
use std::sync::Arc;

/// Turns aggregated feeds into an ordered [`PublicationDocument`].
pub struct Assembler {
    rewriter: Arc<dyn ContentRewriter>,
}

impl Assembler {
    pub fn new(rewriter: Arc<dyn ContentRewriter>) -> Self {
        Self { rewriter }
    }

    /// Builds one section per article, in the order `feeds` is given (the
    /// aggregator's configured source order) and filter order inside a feed,
    /// followed by a Sources section citing every article.
    ///
    /// Each body goes through the rewriter with a single resource table for
    /// the whole run. A rewrite error keeps the article's original body.
    /// Returns an empty document when there are no articles.
    pub async fn assemble(
        &self,
        feeds: Vec<FeedResult>,
        window: TimeDelta,
        now: DateTime<Utc>,
    ) -> PublicationDocument {
        let title = publication_title(window, now);
        let total: usize = feeds.iter().map(|f| f.articles.len()).sum();
        if total == 0 {
            return PublicationDocument::empty(title, now);
        }

        let mut resources = ResourceTable::new();
        let mut sections = Vec::with_capacity(total + 1);
        let mut citations = String::new();

        for feed in feeds {
            for mut article in feed.articles {
                let origin = source_origin(&article.link);
                match self
                    .rewriter
                    .rewrite(&article.body, origin.as_ref(), &mut resources)
                    .await
                {
                    Ok(body) => article.body = body,
                    Err(e) => {
                        tracing::warn!(
                            article = %article.link,
                            error = %e,
                            "Keeping original article body"
                        );
                    }
                }

                citations.push_str(&citation(&article, &feed.title, now));
                sections.push(Section {
                    title: article.title.clone(),
                    body: format!("{}{}", heading(&article, &feed.title), article.body),
                    kind: SectionKind::Article,
                });
            }
        }

        sections.push(Section {
            title: SOURCES_TITLE.to_string(),
            body: format!("<h1>{SOURCES_TITLE}</h1>{citations}"),
            kind: SectionKind::Sources,
        });

        tracing::info!(
            articles = total,
            images = resources.len(),
            "Assembled document"
        );

        PublicationDocument {
            title,
            sections,
            resources,
            generated_at: now,
        }
    }
}

fn heading(article: &Article, feed_title: &str) -> String {
    let mut byline = escape_text(feed_title).into_owned();
    if !article.display_date.is_empty() {
        byline.push_str(" | ");
        byline.push_str(&escape_text(&article.display_date));
    }
    format!(
        "<h1>{title}</h1><p class=\"byline\">{byline}</p><p class=\"source\"><a href=\"{href}\">{link}</a></p>",
        title = escape_text(&article.title),
        href = escape_attr(&article.link),
        link = escape_text(&article.link),
    )
}

/// `Author. "Title." Feed, Date. Accessed Date. Link.`
fn citation(article: &Article, feed_title: &str, accessed: DateTime<Utc>) -> String {
    let mut line = String::from("<p class=\"citation\">");
    if !article.author.is_empty() {
        line.push_str(&escape_text(&article.author));
        line.push_str(". ");
    }
    line.push_str(&format!(
        "\u{201c}{}.\u{201d} <i>{}</i>",
        escape_text(&article.title),
        escape_text(feed_title)
    ));
    if !article.display_date.is_empty() {
        line.push_str(", ");
        line.push_str(&escape_text(&article.display_date));
    }
    line.push_str(&format!(
        ". Accessed {}. <a href=\"{}\">{}</a>.</p>",
        accessed.format(DATE_FORMAT),
        escape_attr(&article.link),
        escape_text(&article.link)
    ));
    line
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::images::{FetchedImage, ImageError, ImageFetcher};
    use crate::document::markup::{MarkupError, MAX_DEPTH};
    use crate::document::rewriter::{ImageRewriter, PassthroughRewriter, RewriteError};
    use async_trait::async_trait;
    use chrono::TimeZone;
    use pretty_assertions::assert_eq;
    use url::Url;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 6, 10, 12, 0, 0).unwrap()
    }

    fn article(title: &str, body: &str) -> Article {
        Article {
            title: title.to_string(),
            link: format!("https://site.example.com/{title}"),
            author: "Writer".to_string(),
            display_date: "2025 Jun 9".to_string(),
            body: body.to_string(),
        }
    }

    fn feed(title: &str, articles: Vec<Article>) -> FeedResult {
        FeedResult {
            title: title.to_string(),
            articles,
        }
    }

    struct PngFetcher;

    #[async_trait]
    impl ImageFetcher for PngFetcher {
        async fn fetch(&self, _url: &Url) -> Result<FetchedImage, ImageError> {
            Ok(FetchedImage {
                media_type: "image/png".into(),
                data: vec![1],
            })
        }
    }

    struct FailingRewriter;

    #[async_trait]
    impl ContentRewriter for FailingRewriter {
        async fn rewrite(
            &self,
            _body: &str,
            _origin: Option<&Url>,
            _resources: &mut ResourceTable,
        ) -> Result<String, RewriteError> {
            Err(MarkupError::TooDeep(MAX_DEPTH).into())
        }
    }

    #[tokio::test]
    async fn test_sections_follow_feed_order_and_sources_last() {
        let assembler = Assembler::new(Arc::new(PassthroughRewriter));
        let doc = assembler
            .assemble(
                vec![
                    feed("Zeta", vec![article("z1", "<p>z1</p>"), article("z2", "<p>z2</p>")]),
                    feed("Alpha", vec![article("a1", "<p>a1</p>")]),
                ],
                TimeDelta::hours(24),
                now(),
            )
            .await;

        let titles: Vec<_> = doc.sections.iter().map(|s| s.title.as_str()).collect();
        assert_eq!(titles, vec!["z1", "z2", "a1", "Sources"]);
        assert_eq!(doc.sections.last().unwrap().kind, SectionKind::Sources);
        assert_eq!(doc.article_count(), 3);
        assert_eq!(doc.title, "2025 Jun 9 - 2025 Jun 10");
    }

    #[tokio::test]
    async fn test_article_section_has_heading_then_body() {
        let assembler = Assembler::new(Arc::new(PassthroughRewriter));
        let doc = assembler
            .assemble(
                vec![feed("Feed & Co", vec![article("t", "<p>body</p>")])],
                TimeDelta::hours(24),
                now(),
            )
            .await;

        assert_eq!(
            doc.sections[0].body,
            "<h1>t</h1><p class=\"byline\">Feed &amp; Co | 2025 Jun 9</p>\
             <p class=\"source\"><a href=\"https://site.example.com/t\">https://site.example.com/t</a></p>\
             <p>body</p>"
        );
    }

    #[tokio::test]
    async fn test_sources_cites_every_article() {
        let assembler = Assembler::new(Arc::new(PassthroughRewriter));
        let mut anonymous = article("b", "");
        anonymous.author = String::new();
        let doc = assembler
            .assemble(
                vec![feed("F", vec![article("a", ""), anonymous])],
                TimeDelta::hours(24),
                now(),
            )
            .await;

        let sources = &doc.sections.last().unwrap().body;
        assert!(sources.starts_with("<h1>Sources</h1>"));
        assert_eq!(sources.matches("<p class=\"citation\">").count(), 2);
        assert!(sources.contains(
            "<p class=\"citation\">Writer. \u{201c}a.\u{201d} <i>F</i>, 2025 Jun 9. Accessed 2025 Jun 10. \
             <a href=\"https://site.example.com/a\">https://site.example.com/a</a>.</p>"
        ));
        assert!(sources.contains("<p class=\"citation\">\u{201c}b.\u{201d}"));
    }

    #[tokio::test]
    async fn test_images_shared_across_feeds_embedded_once() {
        let assembler = Assembler::new(Arc::new(ImageRewriter::new(Arc::new(PngFetcher))));
        let body = r#"<img src="https://cdn.example.com/logo.png">"#;
        let doc = assembler
            .assemble(
                vec![
                    feed("A", vec![article("a", body)]),
                    feed("B", vec![article("b", body)]),
                ],
                TimeDelta::hours(24),
                now(),
            )
            .await;

        assert_eq!(doc.resources.len(), 1);
        assert!(doc.sections[0].body.contains("images/image0001.png"));
        assert!(doc.sections[1].body.contains("images/image0001.png"));
    }

    #[tokio::test]
    async fn test_rewrite_failure_keeps_original_body() {
        let assembler = Assembler::new(Arc::new(FailingRewriter));
        let doc = assembler
            .assemble(
                vec![feed("F", vec![article("a", "<p>raw<br>")])],
                TimeDelta::hours(24),
                now(),
            )
            .await;
        assert!(doc.sections[0].body.ends_with("<p>raw<br>"));
    }

    #[tokio::test]
    async fn test_no_articles_gives_empty_document() {
        let assembler = Assembler::new(Arc::new(PassthroughRewriter));
        let doc = assembler
            .assemble(vec![feed("Empty", vec![])], TimeDelta::hours(24), now())
            .await;
        assert!(doc.is_empty());
        assert_eq!(doc.article_count(), 0);
        assert!(doc.resources.is_empty());
    }
}
