//! Inline timing markers.
//!
//! Narration text may carry self-closing bookmark tags:
//!
//! ```text
//! Hi <bookmark mark='a'/>there
//! ```
//!
//! Parsing strips the tags and records, for each one, the number of
//! characters of clean text that precede it.

use std::collections::HashSet;

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::{NarrationError, Result};

/// Tag name recognised when no other is configured.
pub const DEFAULT_TAG: &str = "bookmark";

static DEFAULT_PARSER: Lazy<MarkerParser> = Lazy::new(|| MarkerParser::new(DEFAULT_TAG));

static ANY_TAG: Lazy<Regex> = Lazy::new(|| Regex::new(r"<[^<>]*>").expect("valid tag regex"));

/// A named position in the clean narration text.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Marker {
    pub name: String,
    /// Offset in characters (not bytes) into the clean text.
    pub char_offset: usize,
}

/// Narration text with its markers removed and recorded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedNarration {
    clean_text: String,
    char_len: usize,
    markers: Vec<Marker>,
}

impl ParsedNarration {
    pub fn clean_text(&self) -> &str {
        &self.clean_text
    }

    /// Length of the clean text in characters.
    pub fn char_len(&self) -> usize {
        self.char_len
    }

    /// Markers in the order they appear in the text.
    pub fn markers(&self) -> &[Marker] {
        &self.markers
    }

    pub fn has_markers(&self) -> bool {
        !self.markers.is_empty()
    }

    pub fn offset_of(&self, name: &str) -> Option<usize> {
        self.markers
            .iter()
            .find(|m| m.name == name)
            .map(|m| m.char_offset)
    }

    /// Marker offsets in declaration order.
    pub fn offsets(&self) -> Vec<usize> {
        self.markers.iter().map(|m| m.char_offset).collect()
    }
}

/// Parser for one bookmark tag name.
#[derive(Debug, Clone)]
pub struct MarkerParser {
    tag: String,
    opening: Regex,
    complete: Regex,
}

impl MarkerParser {
    /// Build a parser recognising `<TAG mark='NAME'/>`.
    pub fn new(tag: &str) -> Self {
        let escaped = regex::escape(tag);
        // Both patterns are built from an escaped literal and cannot fail to compile.
        let opening = Regex::new(&format!(r"<\s*/?\s*{escaped}\b")).expect("valid opening regex");
        let complete = Regex::new(&format!(
            r#"^<{escaped}\s+mark\s*=\s*(?:'([^'<>]*)'|"([^"<>]*)")\s*/>"#
        ))
        .expect("valid tag regex");
        Self {
            tag: tag.to_string(),
            opening,
            complete,
        }
    }

    pub fn tag(&self) -> &str {
        &self.tag
    }

    /// Strip every marker tag from `raw` and record where each one was.
    pub fn parse(&self, raw: &str) -> Result<ParsedNarration> {
        let mut clean_text = String::with_capacity(raw.len());
        let mut char_len = 0usize;
        let mut markers: Vec<Marker> = Vec::new();
        let mut seen: HashSet<String> = HashSet::new();
        let mut consumed = 0usize;

        for candidate in self.opening.find_iter(raw) {
            let start = candidate.start();
            let text = &raw[consumed..start];
            clean_text.push_str(text);
            char_len += text.chars().count();

            let caps = self
                .complete
                .captures(&raw[start..])
                .ok_or_else(|| self.diagnose(raw, start))?;
            let (name, tag_len) = match (caps.get(0), caps.get(1).or_else(|| caps.get(2))) {
                (Some(whole), Some(name)) => (name.as_str(), whole.end()),
                _ => return Err(self.diagnose(raw, start)),
            };
            if name.is_empty() {
                return Err(NarrationError::MalformedMarker {
                    position: start,
                    reason: "the mark attribute must not be empty".to_string(),
                });
            }
            if !seen.insert(name.to_string()) {
                return Err(NarrationError::DuplicateMarker(name.to_string()));
            }

            markers.push(Marker {
                name: name.to_string(),
                char_offset: char_len,
            });
            consumed = start + tag_len;
        }

        let tail = &raw[consumed..];
        clean_text.push_str(tail);
        char_len += tail.chars().count();

        Ok(ParsedNarration {
            clean_text,
            char_len,
            markers,
        })
    }

    fn diagnose(&self, raw: &str, start: usize) -> NarrationError {
        let rest = &raw[start..];
        let reason = match rest.find('>') {
            None => "unterminated tag".to_string(),
            Some(_) if rest[1..].trim_start().starts_with('/') => format!(
                "end tags are not allowed, use a self-closing tag (e.g. `<{} mark='A'/>`)",
                self.tag
            ),
            Some(end) if !rest[..end].ends_with('/') => format!(
                "bookmarks should be self-closing tags (e.g. `<{} mark='A'/>`)",
                self.tag
            ),
            Some(end) if !attributes(&rest[..end], &self.tag).contains("mark") => {
                "bookmarks must define a mark attribute".to_string()
            }
            Some(_) => "unparsable mark attribute".to_string(),
        };
        NarrationError::MalformedMarker {
            position: start,
            reason,
        }
    }
}

/// Attribute part of a tag, after `<TAG`.
fn attributes<'a>(tag_text: &'a str, tag: &str) -> &'a str {
    match tag_text.find(tag) {
        Some(i) => &tag_text[i + tag.len()..],
        None => tag_text,
    }
}

impl Default for MarkerParser {
    fn default() -> Self {
        DEFAULT_PARSER.clone()
    }
}

/// Parse `raw` with the default `bookmark` tag.
pub fn parse(raw: &str) -> Result<ParsedNarration> {
    DEFAULT_PARSER.parse(raw)
}

/// Remove every markup tag (bookmarks, SSML and the like), e.g. for
/// caption text.
pub fn strip_tags(text: &str) -> String {
    ANY_TAG.replace_all(text, "").into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_every_tag() {
        assert_eq!(
            strip_tags("Say <emphasis level='strong'>this</emphasis> <bookmark mark='a'/>now"),
            "Say this now"
        );
        assert_eq!(strip_tags("3 < 4 and 5 > 2"), "3 < 4 and 5 > 2");
    }

    fn names_and_offsets(parsed: &ParsedNarration) -> Vec<(&str, usize)> {
        parsed
            .markers()
            .iter()
            .map(|m| (m.name.as_str(), m.char_offset))
            .collect()
    }

    #[test]
    fn strips_marker_and_records_offset() {
        let parsed = parse("Hi <bookmark mark='a'/>there").unwrap();
        assert_eq!(parsed.clean_text(), "Hi there");
        assert_eq!(parsed.char_len(), 8);
        assert_eq!(names_and_offsets(&parsed), vec![("a", 3)]);
    }

    #[test]
    fn text_without_markers_is_unchanged() {
        let parsed = parse("This is just a test string.").unwrap();
        assert_eq!(parsed.clean_text(), "This is just a test string.");
        assert!(!parsed.has_markers());
    }

    #[test]
    fn markers_at_both_ends() {
        let parsed = parse("<bookmark mark='A'/>Test string.<bookmark mark='B'/>").unwrap();
        assert_eq!(parsed.clean_text(), "Test string.");
        assert_eq!(names_and_offsets(&parsed), vec![("A", 0), ("B", 12)]);
    }

    #[test]
    fn consecutive_markers_share_an_offset() {
        let parsed =
            parse("<bookmark mark='A'/><bookmark mark='B'/><bookmark mark='C'/>Test").unwrap();
        assert_eq!(names_and_offsets(&parsed), vec![("A", 0), ("B", 0), ("C", 0)]);
    }

    #[test]
    fn offsets_count_characters_not_bytes() {
        let parsed = parse("héllo <bookmark mark='x'/>wörld").unwrap();
        assert_eq!(parsed.offset_of("x"), Some(6));
        assert_eq!(parsed.char_len(), 11);
    }

    #[test]
    fn accepts_double_quotes_and_spacing() {
        let parsed = parse(r#"a <bookmark mark="A" />b"#).unwrap();
        assert_eq!(parsed.clean_text(), "a b");
        assert_eq!(parsed.offset_of("A"), Some(2));
    }

    #[test]
    fn names_are_case_sensitive() {
        let parsed = parse("<bookmark mark='a'/>x<bookmark mark='A'/>").unwrap();
        assert_eq!(names_and_offsets(&parsed), vec![("a", 0), ("A", 1)]);
    }

    #[test]
    fn other_tags_are_left_alone() {
        let parsed = parse("<emphasis>Hi</emphasis> <bookmark mark='a'/>you").unwrap();
        assert_eq!(parsed.clean_text(), "<emphasis>Hi</emphasis> you");
        assert_eq!(parsed.offset_of("a"), Some(24));
    }

    #[test]
    fn duplicate_names_fail() {
        let err = parse("<bookmark mark='A'/>First, second: <bookmark mark='A'/>").unwrap_err();
        assert_eq!(err, NarrationError::DuplicateMarker("A".into()));
    }

    #[test]
    fn non_self_closing_tag_fails() {
        let err = parse("<bookmark mark='A'/>good, not this: <bookmark mark='B'>").unwrap_err();
        match err {
            NarrationError::MalformedMarker { position, reason } => {
                assert_eq!(position, 36);
                assert!(reason.contains("self-closing"));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn end_tag_fails() {
        let err = parse("text </bookmark>").unwrap_err();
        assert!(err.is_parse_error());
    }

    #[test]
    fn missing_mark_attribute_fails() {
        for text in ["a <bookmark/>", "a <bookmark mar='B'/>"] {
            let err = parse(text).unwrap_err();
            assert!(err.is_parse_error(), "{text}");
        }
        match parse("a <bookmark/>").unwrap_err() {
            NarrationError::MalformedMarker { reason, .. } => {
                assert!(reason.contains("mark attribute"))
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn unterminated_tag_fails() {
        match parse("Hello <bookmark mark='a'").unwrap_err() {
            NarrationError::MalformedMarker { reason, .. } => assert_eq!(reason, "unterminated tag"),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn empty_name_fails() {
        assert!(parse("<bookmark mark=''/>").unwrap_err().is_parse_error());
    }

    #[test]
    fn similar_tag_names_are_not_markers() {
        let parsed = parse("<bookmarks mark='a'/>").unwrap();
        assert_eq!(parsed.clean_text(), "<bookmarks mark='a'/>");
    }

    #[test]
    fn custom_tag_name() {
        let parser = MarkerParser::new("mark");
        let parsed = parser.parse("one <mark mark='m'/>two <bookmark mark='b'/>").unwrap();
        assert_eq!(parsed.clean_text(), "one two <bookmark mark='b'/>");
        assert_eq!(parsed.offset_of("m"), Some(4));
    }
}
