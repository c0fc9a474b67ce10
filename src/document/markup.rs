//! HTML fragment handling for section bodies.
//!
//! Feed content is HTML of arbitrary quality while the container needs
//! well-formed XHTML. Fragments are parsed with `scraper` (html5ever, so the
//! parse itself never fails) and written back out as XHTML: void elements
//! self-closed, every attribute quoted and escaped, comments dropped.

use crate::util::{escape_attr, escape_text};
use scraper::{ElementRef, Html, Node};
use thiserror::Error;

/// Nesting limit for serialisation; deeper markup is treated as malformed.
pub const MAX_DEPTH: usize = 256;

const VOID_ELEMENTS: &[&str] = &[
    "area", "base", "br", "col", "embed", "hr", "img", "input", "link", "meta", "param",
    "source", "track", "wbr",
];

#[derive(Debug, Error)]
pub enum MarkupError {
    #[error("markup nested deeper than {0} elements")]
    TooDeep(usize),
}

/// Re-serialises an HTML fragment as XHTML without changing its content.
pub fn to_xhtml(fragment: &str) -> Result<String, MarkupError> {
    to_xhtml_with(fragment, |_| None)
}

/// Re-serialises an HTML fragment as XHTML, relinking images.
///
/// `relink` receives each `<img>` element's `src` exactly as written. When it
/// returns a replacement, `src` is rewritten and the element's `srcset` and
/// `loading` attributes are removed; otherwise the element is left alone.
pub fn to_xhtml_with<F>(fragment: &str, relink: F) -> Result<String, MarkupError>
where
    F: Fn(&str) -> Option<String>,
{
    let html = Html::parse_fragment(fragment);
    let mut out = String::with_capacity(fragment.len() + fragment.len() / 8);
    write_children(&mut out, html.root_element(), &relink, 0)?;
    Ok(out)
}

/// `src` values of every `<img>` in document order, without repeats.
pub fn image_sources(fragment: &str) -> Vec<String> {
    let html = Html::parse_fragment(fragment);
    let mut sources: Vec<String> = Vec::new();
    for element in html.root_element().descendants().filter_map(ElementRef::wrap) {
        if element.value().name() != "img" {
            continue;
        }
        // kept verbatim so it matches what `relink` is later handed
        if let Some(src) = element.value().attr("src") {
            if !src.trim().is_empty() && !sources.iter().any(|s| s == src) {
                sources.push(src.to_string());
            }
        }
    }
    sources
}

/// Text content of a fragment as a single escaped XHTML paragraph; the last
/// resort for bodies that cannot be serialised.
pub fn plain_text_paragraph(fragment: &str) -> String {
    let html = Html::parse_fragment(fragment);
    let text: String = html.root_element().text().collect();
    format!("<p>{}</p>", escape_text(text.trim()))
}

fn write_children<F>(
    out: &mut String,
    parent: ElementRef<'_>,
    relink: &F,
    depth: usize,
) -> Result<(), MarkupError>
where
    F: Fn(&str) -> Option<String>,
{
    for child in parent.children() {
        match child.value() {
            Node::Text(text) => {
                let text: &str = &text.text;
                out.push_str(&escape_text(text));
            }
            Node::Element(_) => {
                if let Some(element) = ElementRef::wrap(child) {
                    write_element(out, element, relink, depth + 1)?;
                }
            }
            // comments, doctypes and processing instructions
            _ => {}
        }
    }
    Ok(())
}

fn write_element<F>(
    out: &mut String,
    element: ElementRef<'_>,
    relink: &F,
    depth: usize,
) -> Result<(), MarkupError>
where
    F: Fn(&str) -> Option<String>,
{
    if depth > MAX_DEPTH {
        return Err(MarkupError::TooDeep(MAX_DEPTH));
    }

    let el = element.value();
    let name = el.name();
    // Prefixed tags such as Word's `<o:p>` have no namespace binding in
    // the output; keep their content and drop the tag.
    if !is_xml_name(name) || name.contains(':') {
        return write_children(out, element, relink, depth);
    }

    let local = if name == "img" {
        el.attr("src").and_then(relink)
    } else {
        None
    };

    out.push('<');
    out.push_str(name);
    let mut has_xmlns = false;
    for (attr, value) in el.attrs() {
        if !is_xml_name(attr) || !is_bound_prefix(attr) {
            continue;
        }
        if local.is_some() && matches!(attr, "srcset" | "loading") {
            continue;
        }
        has_xmlns |= attr == "xmlns";
        let value = match (&local, attr) {
            (Some(local), "src") => local.as_str(),
            _ => value,
        };
        out.push(' ');
        out.push_str(attr);
        out.push_str("=\"");
        out.push_str(&escape_attr(value));
        out.push('"');
    }
    if !has_xmlns {
        match name {
            "svg" => out.push_str(" xmlns=\"http://www.w3.org/2000/svg\""),
            "math" => out.push_str(" xmlns=\"http://www.w3.org/1998/Math/MathML\""),
            _ => {}
        }
    }

    if VOID_ELEMENTS.contains(&name) {
        out.push_str(" />");
        return Ok(());
    }

    out.push('>');
    write_children(out, element, relink, depth)?;
    out.push_str("</");
    out.push_str(name);
    out.push('>');
    Ok(())
}

/// Attribute names html5ever accepts but XML does not (`"foo"`, `1x`, ...)
/// are dropped.
fn is_xml_name(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' || c == ':' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | ':' | '-' | '.'))
}

/// Only the `xml` and `xmlns` prefixes are bound without a declaration.
fn is_bound_prefix(name: &str) -> bool {
    match name.split_once(':') {
        None => true,
        Some((prefix, _)) => prefix == "xml" || prefix == "xmlns",
    }
}
