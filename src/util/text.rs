use std::borrow::Cow;

/// Escapes character data for an XML/XHTML text node.
///
/// Characters that are not allowed in XML 1.0 documents are dropped, so the
/// output is always safe to place between tags.
///
/// ```
/// use anthology::util::escape_text;
///
/// assert_eq!(escape_text("Fish & Chips <today>"), "Fish &amp; Chips &lt;today&gt;");
/// ```
pub fn escape_text(s: &str) -> Cow<'_, str> {
    escape(s, false)
}

/// Escapes a value for use inside a double-quoted XML attribute.
///
/// ```
/// use anthology::util::escape_attr;
///
/// assert_eq!(escape_attr(r#"say "hi""#), "say &quot;hi&quot;");
/// ```
pub fn escape_attr(s: &str) -> Cow<'_, str> {
    escape(s, true)
}

fn escape(s: &str, quote: bool) -> Cow<'_, str> {
    let needs_work = s
        .chars()
        .any(|c| matches!(c, '&' | '<' | '>') || (quote && c == '"') || !is_xml_char(c));
    if !needs_work {
        return Cow::Borrowed(s);
    }

    let mut out = String::with_capacity(s.len() + 16);
    for c in s.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' if quote => out.push_str("&quot;"),
            c if !is_xml_char(c) => {}
            c => out.push(c),
        }
    }
    Cow::Owned(out)
}

fn is_xml_char(c: char) -> bool {
    matches!(c,
        '\u{9}' | '\u{A}' | '\u{D}'
        | '\u{20}'..='\u{D7FF}'
        | '\u{E000}'..='\u{FFFD}'
        | '\u{10000}'..='\u{10FFFF}')
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plain_text_is_borrowed() {
        assert!(matches!(escape_text("plain words"), Cow::Borrowed(_)));
        assert!(matches!(escape_attr("https://example.com/a.png"), Cow::Borrowed(_)));
    }

    #[test]
    fn test_text_keeps_quotes() {
        assert_eq!(escape_text(r#"he said "no""#), r#"he said "no""#);
    }

    #[test]
    fn test_attr_escapes_everything() {
        assert_eq!(escape_attr(r#"a&b<c>"d""#), "a&amp;b&lt;c&gt;&quot;d&quot;");
    }

    #[test]
    fn test_invalid_xml_chars_dropped() {
        assert_eq!(escape_text("bell\u{7}ring"), "bellring");
        assert_eq!(escape_attr("x\u{FFFE}y"), "xy");
        assert_eq!(escape_text("line\r\nnext"), "line\r\nnext");
    }

    #[test]
    fn test_non_ascii_preserved() {
        assert_eq!(escape_text("Grüße – 世界"), "Grüße – 世界");
    }
}
