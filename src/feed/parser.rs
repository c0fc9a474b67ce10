use chrono::{DateTime, Utc};
use feed_rs::parser;

/// A parsed syndication entry, before any filtering or normalisation.
#[derive(Debug, Clone, PartialEq)]
pub struct RawItem {
    pub title: String,
    pub link: String,
    pub author: Option<String>,
    /// Parsed publish time (falls back to the entry's update time).
    pub published: Option<DateTime<Utc>>,
    /// HTML body: full content when present, otherwise the summary.
    pub body: String,
}

/// A whole feed document reduced to what the aggregator needs.
#[derive(Debug, Clone)]
pub struct ParsedFeed {
    pub title: String,
    /// Feed-level author, used when an item names none.
    pub author: Option<String>,
    pub items: Vec<RawItem>,
}

/// Parses RSS, Atom or JSON Feed bytes.
///
/// `fallback_title` is used when the feed has no title of its own (usually
/// the source host). Items keep document order.
pub fn parse_feed(bytes: &[u8], fallback_title: &str) -> Result<ParsedFeed, parser::ParseFeedError> {
    let feed = parser::parse(bytes)?;

    let title = feed
        .title
        .map(|t| t.content.trim().to_string())
        .filter(|t| !t.is_empty())
        .unwrap_or_else(|| fallback_title.to_string());
    let author = first_author(&feed.authors);

    let items: Vec<RawItem> = feed
        .entries
        .into_iter()
        .map(|entry| {
            let link = entry
                .links
                .iter()
                .find(|l| l.rel.as_deref().map_or(true, |rel| rel == "alternate"))
                .or_else(|| entry.links.first())
                .map(|l| l.href.clone())
                .unwrap_or_default();
            let body = entry
                .content
                .and_then(|c| c.body)
                .or_else(|| entry.summary.map(|s| s.content))
                .unwrap_or_default();
            let title = entry
                .title
                .map(|t| t.content)
                .filter(|t| !t.trim().is_empty())
                .unwrap_or_else(|| "Untitled".to_string());

            RawItem {
                title,
                link,
                author: first_author(&entry.authors),
                published: entry.published.or(entry.updated),
                body,
            }
        })
        .collect();

    if !is_newest_first(&items) {
        tracing::warn!(
            feed = %title,
            "Feed items are not ordered newest-first; the recency cutoff may drop in-window items"
        );
    }

    Ok(ParsedFeed {
        title,
        author,
        items,
    })
}

fn first_author(people: &[feed_rs::model::Person]) -> Option<String> {
    people
        .iter()
        .map(|p| p.name.trim())
        .find(|name| !name.is_empty())
        .map(str::to_string)
}

/// Undated items are ignored for the ordering check.
fn is_newest_first(items: &[RawItem]) -> bool {
    let dates: Vec<_> = items.iter().filter_map(|i| i.published).collect();
    dates.windows(2).all(|pair| pair[0] >= pair[1])
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    const RSS: &str = r#"<?xml version="1.0"?>
<rss version="2.0" xmlns:dc="http://purl.org/dc/elements/1.1/"><channel>
    <title>Example Blog</title>
    <link>https://blog.example.com</link>
    <item>
        <title>Second post</title>
        <link>https://blog.example.com/2</link>
        <dc:creator>Ada</dc:creator>
        <pubDate>Tue, 10 Jun 2025 09:00:00 GMT</pubDate>
        <description>&lt;p&gt;Hello &lt;img src="/a.png"&gt;&lt;/p&gt;</description>
    </item>
    <item>
        <title>First post</title>
        <link>https://blog.example.com/1</link>
        <pubDate>Mon, 09 Jun 2025 09:00:00 GMT</pubDate>
        <description>Older</description>
    </item>
</channel></rss>"#;

    #[test]
    fn test_parse_rss_items_in_order() {
        let feed = parse_feed(RSS.as_bytes(), "fallback").unwrap();
        assert_eq!(feed.title, "Example Blog");
        assert_eq!(feed.items.len(), 2);

        let first = &feed.items[0];
        assert_eq!(first.title, "Second post");
        assert_eq!(first.link, "https://blog.example.com/2");
        assert_eq!(first.author.as_deref(), Some("Ada"));
        assert_eq!(
            first.published,
            Some(Utc.with_ymd_and_hms(2025, 6, 10, 9, 0, 0).unwrap())
        );
        assert!(first.body.contains(r#"<img src="/a.png">"#));
        assert_eq!(feed.items[1].author, None);
    }

    #[test]
    fn test_parse_atom_with_feed_author() {
        let atom = r#"<?xml version="1.0" encoding="utf-8"?>
<feed xmlns="http://www.w3.org/2005/Atom">
  <title>Atom Site</title>
  <id>urn:uuid:1</id>
  <updated>2025-06-10T12:00:00Z</updated>
  <author><name>Grace</name></author>
  <entry>
    <title>Entry</title>
    <id>urn:uuid:2</id>
    <link rel="alternate" href="https://atom.example.com/entry"/>
    <updated>2025-06-10T12:00:00Z</updated>
    <content type="html">&lt;p&gt;Body&lt;/p&gt;</content>
  </entry>
</feed>"#;
        let feed = parse_feed(atom.as_bytes(), "fallback").unwrap();
        assert_eq!(feed.title, "Atom Site");
        assert_eq!(feed.author.as_deref(), Some("Grace"));
        assert_eq!(feed.items[0].link, "https://atom.example.com/entry");
        assert_eq!(feed.items[0].body, "<p>Body</p>");
        // updated stands in for a missing published time
        assert!(feed.items[0].published.is_some());
    }

    #[test]
    fn test_missing_title_uses_fallback() {
        let rss = r#"<?xml version="1.0"?><rss version="2.0"><channel>
            <item><link>https://x.example.com/1</link></item>
        </channel></rss>"#;
        let feed = parse_feed(rss.as_bytes(), "x.example.com").unwrap();
        assert_eq!(feed.title, "x.example.com");
        assert_eq!(feed.items[0].title, "Untitled");
        assert_eq!(feed.items[0].published, None);
        assert_eq!(feed.items[0].body, "");
    }

    #[test]
    fn test_unparseable_date_leaves_item_undated() {
        let rss = r#"<?xml version="1.0"?><rss version="2.0"><channel><title>T</title>
            <item><title>Odd</title><link>https://x.example.com/1</link><pubDate>9th of June</pubDate></item>
        </channel></rss>"#;
        let feed = parse_feed(rss.as_bytes(), "x").unwrap();
        assert_eq!(feed.items[0].title, "Odd");
        assert_eq!(feed.items[0].published, None);
    }

    #[test]
    fn test_malformed_feed_is_error() {
        assert!(parse_feed(b"<not valid xml", "x").is_err());
    }

    #[test]
    fn test_newest_first_detection() {
        let at = |d| RawItem {
            title: String::new(),
            link: String::new(),
            author: None,
            published: Some(Utc.with_ymd_and_hms(2025, 6, d, 0, 0, 0).unwrap()),
            body: String::new(),
        };
        assert!(is_newest_first(&[at(3), at(2), at(1)]));
        assert!(!is_newest_first(&[at(1), at(3)]));
        assert!(is_newest_first(&[]));
    }
}
