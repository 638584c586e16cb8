//! XML bytes to a generic element tree, with positional diagnostics.

use cim_types::{Content, Element};
use quick_xml::events::Event;
use quick_xml::Reader;
use tracing::trace;

use crate::ParseError;

/// Characters of context shown on each side of an error position.
const SNIPPET_RADIUS: usize = 40;
/// Upper bound on the number of offending positions listed in one message.
const MAX_REPORTED: usize = 10;

/// Tokenize a CIM-XML document (or embedded-object fragment) into a tree.
///
/// The bytes must be UTF-8. Invalid UTF-8 (including encoded surrogates) and
/// characters that XML 1.0 forbids are reported with their positions before
/// the XML reader runs.
pub fn xml_to_tupletree(bytes: &[u8]) -> Result<Element, ParseError> {
    let text = check_utf8(bytes)?;
    check_xml_chars(text)?;
    let root = build_tree(text)?;
    trace!(bytes = bytes.len(), root = %root.name, "tokenized XML document");
    Ok(root)
}

fn hex_bytes(bytes: &[u8]) -> String {
    bytes
        .iter()
        .map(|b| format!("{b:02X}"))
        .collect::<Vec<_>>()
        .join(" ")
}

fn describe_offsets(found: &[(usize, &[u8])]) -> String {
    let mut parts: Vec<String> = found
        .iter()
        .take(MAX_REPORTED)
        .map(|(offset, seq)| format!("{offset} ({})", hex_bytes(seq)))
        .collect();
    if found.len() > MAX_REPORTED {
        parts.push(format!("and {} more", found.len() - MAX_REPORTED));
    }
    parts.join(", ")
}

fn check_utf8(bytes: &[u8]) -> Result<&str, ParseError> {
    // A 3-byte sequence ED A0..BF 80..BF encodes a surrogate code point.
    let surrogates: Vec<(usize, &[u8])> = bytes
        .windows(3)
        .enumerate()
        .filter(|(_, w)| w[0] == 0xED && (0xA0..=0xBF).contains(&w[1]) && (0x80..=0xBF).contains(&w[2]))
        .map(|(offset, w)| (offset, w))
        .collect();
    if !surrogates.is_empty() {
        return Err(ParseError::Xml(format!(
            "Incorrectly encoded UTF-8 surrogate sequence(s) at byte offset(s) {}",
            describe_offsets(&surrogates)
        )));
    }

    if let Ok(text) = std::str::from_utf8(bytes) {
        return Ok(text);
    }
    let mut invalid: Vec<(usize, &[u8])> = Vec::new();
    let mut pos = 0;
    while pos < bytes.len() {
        match std::str::from_utf8(&bytes[pos..]) {
            Ok(_) => break,
            Err(err) => {
                let start = pos + err.valid_up_to();
                let len = err.error_len().unwrap_or(bytes.len() - start);
                invalid.push((start, &bytes[start..start + len]));
                pos = start + len;
            }
        }
    }
    Err(ParseError::Xml(format!(
        "Invalid UTF-8 byte sequence(s) at byte offset(s) {}",
        describe_offsets(&invalid)
    )))
}

fn is_xml_char(c: char) -> bool {
    matches!(c, '\t' | '\n' | '\r') || (c >= ' ' && c != '\u{FFFE}' && c != '\u{FFFF}')
}

fn check_xml_chars(text: &str) -> Result<(), ParseError> {
    let bad: Vec<(usize, char)> = text.char_indices().filter(|(_, c)| !is_xml_char(*c)).collect();
    let Some(&(first_pos, _)) = bad.first() else {
        return Ok(());
    };
    let mut positions: Vec<String> = bad
        .iter()
        .take(MAX_REPORTED)
        .map(|(pos, c)| {
            let loc = Location::find(text, *pos);
            format!("U+{:04X} at line {}, column {}", *c as u32, loc.line, loc.column)
        })
        .collect();
    if bad.len() > MAX_REPORTED {
        positions.push(format!("and {} more", bad.len() - MAX_REPORTED));
    }
    Err(ParseError::Xml(format!(
        "Invalid XML character(s): {}\n{}",
        positions.join(", "),
        Location::find(text, first_pos).snippet()
    )))
}

/// Line/column of a byte offset plus the surrounding line.
struct Location<'a> {
    line: usize,
    column: usize,
    line_text: &'a str,
}

impl<'a> Location<'a> {
    fn find(text: &'a str, pos: usize) -> Self {
        let mut pos = pos.min(text.len());
        while !text.is_char_boundary(pos) {
            pos -= 1;
        }
        let line_start = text[..pos].rfind('\n').map_or(0, |i| i + 1);
        let line_end = text[pos..].find('\n').map_or(text.len(), |i| pos + i);
        Self {
            line: text[..pos].matches('\n').count() + 1,
            column: text[line_start..pos].chars().count() + 1,
            line_text: text[line_start..line_end].trim_end_matches('\r'),
        }
    }

    /// Two-line excerpt with a caret under the column; long lines are cut
    /// to the context window and marked with `...`.
    fn snippet(&self) -> String {
        let chars: Vec<char> = self.line_text.chars().collect();
        let col = self.column - 1;
        let start = col.saturating_sub(SNIPPET_RADIUS);
        let end = (col + SNIPPET_RADIUS).min(chars.len());
        let mut excerpt = String::new();
        if start > 0 {
            excerpt.push_str("...");
        }
        let caret_at = excerpt.chars().count() + (col - start);
        excerpt.extend(chars[start..end.max(start)].iter().map(|c| if is_xml_char(*c) { *c } else { '?' }));
        if end < chars.len() {
            excerpt.push_str("...");
        }
        let truncated = if start > 0 || end < chars.len() { " (line truncated)" } else { "" };
        format!(
            "line {}, column {}{truncated}:\n  {excerpt}\n  {}^",
            self.line,
            self.column,
            " ".repeat(caret_at)
        )
    }
}

fn xml_error(text: &str, pos: usize, err: impl std::fmt::Display) -> ParseError {
    ParseError::Xml(format!("{err}; {}", Location::find(text, pos).snippet()))
}

fn attach_text(
    stack: &mut [Element],
    text: String,
    source: &str,
    pos: usize,
) -> Result<(), ParseError> {
    match stack.last_mut() {
        Some(top) => top.push_text(text),
        None if text.trim().is_empty() => {}
        None => return Err(xml_error(source, pos, "text outside of the document element")),
    }
    Ok(())
}

fn build_tree(text: &str) -> Result<Element, ParseError> {
    let mut reader = Reader::from_str(text);
    reader.trim_text(false);
    reader.expand_empty_elements(true);
    reader.check_end_names(true);

    let mut stack: Vec<Element> = Vec::new();
    let mut root: Option<Element> = None;
    loop {
        let pos = reader.buffer_position();
        match reader.read_event() {
            Ok(Event::Start(e)) => {
                if root.is_some() && stack.is_empty() {
                    return Err(xml_error(text, pos, "junk after document element"));
                }
                let mut elem = Element::new(String::from_utf8_lossy(e.name().as_ref()));
                for attr in e.attributes() {
                    let attr = attr.map_err(|err| xml_error(text, pos, err))?;
                    let value = attr
                        .unescape_value()
                        .map_err(|err| xml_error(text, pos, err))?;
                    elem.attrs.push((
                        String::from_utf8_lossy(attr.key.as_ref()).into_owned(),
                        value.into_owned(),
                    ));
                }
                stack.push(elem);
            }
            Ok(Event::End(_)) => {
                let done = stack
                    .pop()
                    .ok_or_else(|| xml_error(text, pos, "unexpected end tag"))?;
                match stack.last_mut() {
                    Some(parent) => parent.children.push(Content::Element(done)),
                    None => root = Some(done),
                }
            }
            Ok(Event::Text(e)) => {
                let value = e.unescape().map_err(|err| xml_error(text, pos, err))?;
                attach_text(&mut stack, value.into_owned(), text, pos)?;
            }
            Ok(Event::CData(e)) => {
                let value = String::from_utf8_lossy(&e.into_inner()).into_owned();
                attach_text(&mut stack, value, text, pos)?;
            }
            Ok(Event::Eof) => break,
            Ok(_) => {}
            Err(err) => return Err(xml_error(text, reader.buffer_position(), err)),
        }
    }

    if let Some(open) = stack.last() {
        return Err(xml_error(
            text,
            text.len(),
            format!("unclosed element <{}>", open.name),
        ));
    }
    root.ok_or_else(|| ParseError::Xml("no element found".into()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builds_tree_and_coalesces_text() {
        let root = xml_to_tupletree(
            b"<?xml version=\"1.0\"?>\n<A x=\"1 &amp; 2\"><B/><VALUE>a<![CDATA[<b>]]>&lt;c</VALUE></A>",
        )
        .expect("tree");
        assert_eq!(root.name, "A");
        assert_eq!(root.get_attr("x"), Some("1 & 2"));
        let children: Vec<_> = root.element_children().collect();
        assert_eq!(children.len(), 2);
        assert!(children[0].children.is_empty());
        assert_eq!(children[1].children.len(), 1);
        assert_eq!(children[1].text_content(), "a<b><c");
    }

    #[test]
    fn surrogate_sequence_reports_offset_and_bytes() {
        let mut doc = b"<A>xy".to_vec();
        doc.extend_from_slice(&[0xED, 0xA0, 0x80]);
        doc.extend_from_slice(b"</A>");
        let err = xml_to_tupletree(&doc).unwrap_err();
        let ParseError::Xml(msg) = err else {
            panic!("expected XML error");
        };
        assert!(msg.contains("surrogate"), "{msg}");
        assert!(msg.contains("5 (ED A0 80)"), "{msg}");
    }

    #[test]
    fn invalid_utf8_reports_offset() {
        let err = xml_to_tupletree(b"<A>\xFF\xFE</A>").unwrap_err();
        assert!(
            matches!(&err, ParseError::Xml(msg) if msg.contains("Invalid UTF-8") && msg.contains("3 (FF)")),
            "{err:?}"
        );
    }

    #[test]
    fn illegal_xml_character_reports_position() {
        let err = xml_to_tupletree(b"<A>\n  bad\x01char</A>").unwrap_err();
        let ParseError::Xml(msg) = err else {
            panic!("expected XML error");
        };
        assert!(msg.contains("U+0001 at line 2, column 6"), "{msg}");
        assert!(msg.contains("  bad?char"), "{msg}");
    }

    #[test]
    fn noncharacters_are_rejected_with_location() {
        let err = xml_to_tupletree("<A>\nab\u{FFFE}c\u{FFFF}</A>".as_bytes()).unwrap_err();
        let ParseError::Xml(msg) = err else {
            panic!("expected XML error");
        };
        assert!(msg.contains("U+FFFE at line 2, column 3"), "{msg}");
        assert!(msg.contains("U+FFFF at line 2, column 5"), "{msg}");
    }

    #[test]
    fn malformed_xml_is_located() {
        let err = xml_to_tupletree(b"<A>\n<B></C></A>").unwrap_err();
        assert!(matches!(&err, ParseError::Xml(msg) if msg.contains("line 2")), "{err:?}");
        assert!(xml_to_tupletree(b"<A>").is_err());
        assert!(xml_to_tupletree(b"<A/><B/>").is_err());
        assert!(xml_to_tupletree(b"").is_err());
    }

    #[test]
    fn long_lines_are_truncated_in_snippets() {
        let line = "x".repeat(200);
        let loc = Location::find(&line, 100);
        let snippet = loc.snippet();
        assert!(snippet.contains("(line truncated)"));
        assert!(snippet.lines().nth(1).map_or(0, str::len) < 100);
    }
}
