//! EPUB container output.
//!
//! The writer lays out an EPUB 3 package (with an EPUB 2 NCX so older
//! e-readers still get a table of contents):
//!
//! ```text
//! mimetype                      stored, first entry
//! META-INF/container.xml
//! OEBPS/content.opf             metadata, manifest, spine
//! OEBPS/nav.xhtml               EPUB 3 navigation
//! OEBPS/toc.ncx                 EPUB 2 navigation
//! OEBPS/style.css
//! OEBPS/section0001.xhtml ...   one per section, in order
//! OEBPS/images/image0001.png ...
//! ```
//!
//! The archive is built in memory and only handed back once complete, so a
//! failed write never leaves a partial file behind.

mod convert;

pub use convert::{convert_container, CommandConverter, ContainerConverter, ConvertError};

use crate::document::{markup, PublicationDocument, Section};
use crate::util::{escape_attr, escape_text};
use sha2::{Digest, Sha256};
use std::io::{Cursor, Write};
use thiserror::Error;
use zip::write::FileOptions;
use zip::{CompressionMethod, ZipWriter};

pub const EPUB_EXTENSION: &str = "epub";
const CONTENT_DIR: &str = "OEBPS";

const CONTAINER_XML: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<container version="1.0" xmlns="urn:oasis:names:tc:opendocument:xmlns:container">
  <rootfiles>
    <rootfile full-path="OEBPS/content.opf" media-type="application/oebps-package+xml"/>
  </rootfiles>
</container>
"#;

const STYLESHEET: &str = "body { font-family: serif; line-height: 1.4; }
h1 { font-size: 1.4em; margin-bottom: 0.2em; }
p.byline, p.source { font-size: 0.85em; margin: 0.1em 0; color: #555; }
p.source { margin-bottom: 1.2em; word-break: break-all; }
p.citation { text-indent: -1.5em; margin-left: 1.5em; }
img { max-width: 100%; height: auto; }
";

#[derive(Debug, Error)]
pub enum ContainerError {
    #[error("document has no sections")]
    Empty,
    #[error("archive error: {0}")]
    Zip(#[from] zip::result::ZipError),
    #[error("write error: {0}")]
    Io(#[from] std::io::Error),
}

/// A finished container and the name it should be stored under.
#[derive(Debug, Clone)]
pub struct EpubFile {
    pub filename: String,
    pub bytes: Vec<u8>,
}

/// Serialises a [`PublicationDocument`] into an EPUB.
#[derive(Debug, Clone)]
pub struct EpubWriter {
    language: String,
    creator: String,
}

impl Default for EpubWriter {
    fn default() -> Self {
        Self {
            language: "en".to_string(),
            creator: "Anthology".to_string(),
        }
    }
}

impl EpubWriter {
    pub fn new(language: impl Into<String>, creator: impl Into<String>) -> Self {
        Self {
            language: language.into(),
            creator: creator.into(),
        }
    }

    /// Writes every section in order plus every embedded image. The file is
    /// named `<document title>.epub`.
    ///
    /// # Errors
    ///
    /// [`ContainerError::Empty`] for a document without sections; any archive
    /// failure aborts the whole write.
    pub fn write(&self, doc: &PublicationDocument) -> Result<EpubFile, ContainerError> {
        if doc.is_empty() {
            return Err(ContainerError::Empty);
        }

        let mut zip = ZipWriter::new(Cursor::new(Vec::new()));
        let stored = FileOptions::default().compression_method(CompressionMethod::Stored);
        let deflated = FileOptions::default().compression_method(CompressionMethod::Deflated);

        zip.start_file("mimetype", stored)?;
        zip.write_all(b"application/epub+zip")?;

        zip.start_file("META-INF/container.xml", deflated)?;
        zip.write_all(CONTAINER_XML.as_bytes())?;

        zip.start_file(format!("{CONTENT_DIR}/content.opf"), deflated)?;
        zip.write_all(self.package_document(doc).as_bytes())?;

        zip.start_file(format!("{CONTENT_DIR}/nav.xhtml"), deflated)?;
        zip.write_all(self.nav_document(doc).as_bytes())?;

        zip.start_file(format!("{CONTENT_DIR}/toc.ncx"), deflated)?;
        zip.write_all(ncx_document(doc).as_bytes())?;

        zip.start_file(format!("{CONTENT_DIR}/style.css"), deflated)?;
        zip.write_all(STYLESHEET.as_bytes())?;

        for (index, section) in doc.sections.iter().enumerate() {
            zip.start_file(format!("{CONTENT_DIR}/{}", section_href(index)), deflated)?;
            zip.write_all(self.section_document(section).as_bytes())?;
        }

        for image in doc.resources.iter() {
            zip.start_file(format!("{CONTENT_DIR}/{}", image.href), stored)?;
            zip.write_all(&image.data)?;
        }

        let bytes = zip.finish()?.into_inner();
        let filename = format!("{}.{EPUB_EXTENSION}", doc.title);

        tracing::debug!(
            filename = %filename,
            sections = doc.sections.len(),
            images = doc.resources.len(),
            bytes = bytes.len(),
            "Wrote container"
        );

        Ok(EpubFile { filename, bytes })
    }

    fn package_document(&self, doc: &PublicationDocument) -> String {
        let mut manifest = String::from(
            "    <item id=\"nav\" href=\"nav.xhtml\" media-type=\"application/xhtml+xml\" properties=\"nav\"/>\n\
             \x20   <item id=\"ncx\" href=\"toc.ncx\" media-type=\"application/x-dtbncx+xml\"/>\n\
             \x20   <item id=\"css\" href=\"style.css\" media-type=\"text/css\"/>\n",
        );
        let mut spine = String::new();

        for index in 0..doc.sections.len() {
            let id = section_id(index);
            manifest.push_str(&format!(
                "    <item id=\"{id}\" href=\"{}\" media-type=\"application/xhtml+xml\"/>\n",
                section_href(index)
            ));
            spine.push_str(&format!("    <itemref idref=\"{id}\"/>\n"));
        }
        for image in doc.resources.iter() {
            manifest.push_str(&format!(
                "    <item id=\"{}\" href=\"{}\" media-type=\"{}\"/>\n",
                image.id,
                escape_attr(&image.href),
                escape_attr(&image.media_type)
            ));
        }

        format!(
            r#"<?xml version="1.0" encoding="UTF-8"?>
<package xmlns="http://www.idpf.org/2007/opf" version="3.0" unique-identifier="uid" xml:lang="{lang}">
  <metadata xmlns:dc="http://purl.org/dc/elements/1.1/">
    <dc:identifier id="uid">{uid}</dc:identifier>
    <dc:title>{title}</dc:title>
    <dc:creator>{creator}</dc:creator>
    <dc:language>{lang}</dc:language>
    <meta property="dcterms:modified">{modified}</meta>
  </metadata>
  <manifest>
{manifest}  </manifest>
  <spine toc="ncx">
{spine}  </spine>
</package>
"#,
            lang = escape_attr(&self.language),
            uid = document_identifier(doc),
            title = escape_text(&doc.title),
            creator = escape_text(&self.creator),
            modified = doc.generated_at.format("%Y-%m-%dT%H:%M:%SZ"),
        )
    }

    fn nav_document(&self, doc: &PublicationDocument) -> String {
        let entries: String = doc
            .sections
            .iter()
            .enumerate()
            .map(|(index, section)| {
                format!(
                    "      <li><a href=\"{}\">{}</a></li>\n",
                    section_href(index),
                    escape_text(&section.title)
                )
            })
            .collect();

        format!(
            r#"<?xml version="1.0" encoding="UTF-8"?>
<!DOCTYPE html>
<html xmlns="http://www.w3.org/1999/xhtml" xmlns:epub="http://www.idpf.org/2007/ops" lang="{lang}" xml:lang="{lang}">
<head><title>{title}</title></head>
<body>
  <nav epub:type="toc" id="toc">
    <h1>{title}</h1>
    <ol>
{entries}    </ol>
  </nav>
</body>
</html>
"#,
            lang = escape_attr(&self.language),
            title = escape_text(&doc.title),
        )
    }

    fn section_document(&self, section: &Section) -> String {
        let body = match markup::to_xhtml(&section.body) {
            Ok(body) => body,
            Err(e) => {
                tracing::warn!(section = %section.title, error = %e, "Falling back to plain text");
                markup::plain_text_paragraph(&section.body)
            }
        };

        format!(
            r#"<?xml version="1.0" encoding="UTF-8"?>
<!DOCTYPE html>
<html xmlns="http://www.w3.org/1999/xhtml" lang="{lang}" xml:lang="{lang}">
<head>
  <meta charset="utf-8"/>
  <title>{title}</title>
  <link rel="stylesheet" type="text/css" href="style.css"/>
</head>
<body>
{body}
</body>
</html>
"#,
            lang = escape_attr(&self.language),
            title = escape_text(&section.title),
        )
    }
}

fn ncx_document(doc: &PublicationDocument) -> String {
    let points: String = doc
        .sections
        .iter()
        .enumerate()
        .map(|(index, section)| {
            format!(
                "    <navPoint id=\"nav-{n}\" playOrder=\"{n}\">\n      <navLabel><text>{}</text></navLabel>\n      <content src=\"{}\"/>\n    </navPoint>\n",
                escape_text(&section.title),
                section_href(index),
                n = index + 1,
            )
        })
        .collect();

    format!(
        r#"<?xml version="1.0" encoding="UTF-8"?>
<ncx xmlns="http://www.daisy.org/z3986/2005/ncx/" version="2005-1">
  <head>
    <meta name="dtb:uid" content="{uid}"/>
    <meta name="dtb:depth" content="1"/>
    <meta name="dtb:totalPageCount" content="0"/>
    <meta name="dtb:maxPageNumber" content="0"/>
  </head>
  <docTitle><text>{title}</text></docTitle>
  <navMap>
{points}  </navMap>
</ncx>
"#,
        uid = document_identifier(doc),
        title = escape_text(&doc.title),
    )
}

fn section_id(index: usize) -> String {
    format!("section{:04}", index + 1)
}

fn section_href(index: usize) -> String {
    format!("{}.xhtml", section_id(index))
}

/// Stable identifier derived from the title and section titles, so the same
/// content always gets the same id.
fn document_identifier(doc: &PublicationDocument) -> String {
    let mut hasher = Sha256::new();
    hasher.update(doc.title.as_bytes());
    for section in &doc.sections {
        hasher.update([0u8]);
        hasher.update(section.title.as_bytes());
    }
    format!("urn:anthology:{:x}", hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::{FetchedImage, ResourceTable, SectionKind};
    use chrono::{TimeZone, Utc};
    use std::io::Read;
    use url::Url;
    use zip::ZipArchive;

    fn document() -> PublicationDocument {
        let mut resources = ResourceTable::new();
        resources.register(
            "https://cdn.example.com/a.png",
            Url::parse("https://cdn.example.com/a.png").unwrap(),
            FetchedImage {
                media_type: "image/png".into(),
                data: vec![1, 2, 3],
            },
        );
        PublicationDocument {
            title: "2025 Jun 3 - 2025 Jun 10".into(),
            sections: vec![
                Section {
                    title: "First & best".into(),
                    body: r#"<h1>First</h1><p>Hi<br><img src="images/image0001.png"></p>"#.into(),
                    kind: SectionKind::Article,
                },
                Section {
                    title: "Sources".into(),
                    body: "<h1>Sources</h1><p class=\"citation\">x</p>".into(),
                    kind: SectionKind::Sources,
                },
            ],
            resources,
            generated_at: Utc.with_ymd_and_hms(2025, 6, 10, 12, 0, 0).unwrap(),
        }
    }

    fn read_entry(archive: &mut ZipArchive<Cursor<Vec<u8>>>, name: &str) -> String {
        let mut out = String::new();
        archive.by_name(name).unwrap().read_to_string(&mut out).unwrap();
        out
    }

    #[test]
    fn test_filename_from_title() {
        let file = EpubWriter::default().write(&document()).unwrap();
        assert_eq!(file.filename, "2025 Jun 3 - 2025 Jun 10.epub");
    }

    #[test]
    fn test_mimetype_first_and_stored() {
        let file = EpubWriter::default().write(&document()).unwrap();
        let mut archive = ZipArchive::new(Cursor::new(file.bytes)).unwrap();
        let first = archive.by_index(0).unwrap();
        assert_eq!(first.name(), "mimetype");
        assert_eq!(first.compression(), CompressionMethod::Stored);
        drop(first);
        assert_eq!(read_entry(&mut archive, "mimetype"), "application/epub+zip");
    }

    #[test]
    fn test_sections_and_images_in_package() {
        let file = EpubWriter::default().write(&document()).unwrap();
        let mut archive = ZipArchive::new(Cursor::new(file.bytes)).unwrap();

        let opf = read_entry(&mut archive, "OEBPS/content.opf");
        assert!(opf.contains("<dc:title>2025 Jun 3 - 2025 Jun 10</dc:title>"));
        assert!(opf.contains(r#"<item id="image0001" href="images/image0001.png" media-type="image/png"/>"#));
        let first = opf.find(r#"<itemref idref="section0001"/>"#).unwrap();
        let second = opf.find(r#"<itemref idref="section0002"/>"#).unwrap();
        assert!(first < second);

        let section = read_entry(&mut archive, "OEBPS/section0001.xhtml");
        assert!(section.contains("<title>First &amp; best</title>"));
        assert!(section.contains(r#"<p>Hi<br /><img src="images/image0001.png" /></p>"#));

        let nav = read_entry(&mut archive, "OEBPS/nav.xhtml");
        assert!(nav.contains(r#"<a href="section0002.xhtml">Sources</a>"#));

        let mut image = Vec::new();
        archive
            .by_name("OEBPS/images/image0001.png")
            .unwrap()
            .read_to_end(&mut image)
            .unwrap();
        assert_eq!(image, vec![1, 2, 3]);
    }

    #[test]
    fn test_language_and_creator_in_metadata() {
        let file = EpubWriter::new("de", "Feed & Co").write(&document()).unwrap();
        let mut archive = ZipArchive::new(Cursor::new(file.bytes)).unwrap();
        let opf = read_entry(&mut archive, "OEBPS/content.opf");
        assert!(opf.contains("<dc:language>de</dc:language>"));
        assert!(opf.contains("<dc:creator>Feed &amp; Co</dc:creator>"));
    }

    #[test]
    fn test_unserialisable_body_becomes_plain_text() {
        let mut doc = document();
        doc.sections[0].body = format!("{}deep text", "<div>".repeat(markup::MAX_DEPTH + 5));
        let file = EpubWriter::default().write(&doc).unwrap();
        let mut archive = ZipArchive::new(Cursor::new(file.bytes)).unwrap();
        let section = read_entry(&mut archive, "OEBPS/section0001.xhtml");
        assert!(section.contains("<p>deep text</p>"));
    }

    #[test]
    fn test_identifier_is_stable() {
        assert_eq!(document_identifier(&document()), document_identifier(&document()));
        let mut other = document();
        other.sections[0].title = "Changed".into();
        assert_ne!(document_identifier(&document()), document_identifier(&other));
    }

    #[test]
    fn test_empty_document_rejected() {
        let doc = PublicationDocument::empty("t".into(), Utc::now());
        assert!(matches!(EpubWriter::default().write(&doc), Err(ContainerError::Empty)));
    }
}
