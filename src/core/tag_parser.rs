//! # Tag Parser
//!
//! This module splits a template string into the alternating literal and tag pieces that the
//! [`TagEngine`](crate::core::tag_engine::TagEngine) evaluates. Scripts are static, so each
//! distinct source string is parsed exactly once and the resulting piece sequence is shared
//! through [`PieceCache`] for the life of the runtime.

use crate::constants::MAX_CACHED_TEMPLATES;
use crate::core::{
    attribute::{has_top_level_tag, split_fallback},
    commons::lock,
    escape::escape_char,
};
use std::{
    collections::HashMap,
    sync::{Arc, Mutex},
};

/// The parsed body of one `<...>` placeholder.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TagBody {
    /// Everything between the outer angle brackets, fallback included.
    pub raw: String,
    /// The lookup part, before any top-level `||`.
    pub lookup: String,
    /// Tag text evaluated only when the lookup fails.
    pub fallback: Option<String>,
    /// The lookup contains a tag outside any bracket and must be resolved before its chain is parsed.
    pub dynamic: bool,
}

impl TagBody {
    pub fn new(raw: &str) -> Self {
        let (lookup, fallback) = split_fallback(raw);
        Self {
            raw: raw.to_string(),
            lookup: lookup.to_string(),
            fallback: fallback.map(str::to_string),
            dynamic: has_top_level_tag(lookup),
        }
    }
}

/// A single component of a pre-parsed template.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TagPiece {
    /// Emitted verbatim.
    Literal(String),
    /// Re-evaluated on every call.
    Tag(TagBody),
}

/// Transforms a template string into a sequence of `TagPiece`s,
/// merging adjacent literal pieces.
///
/// A tag starts at an unescaped `<` and ends at its matching unescaped `>`, counting nested
/// pairs so a tag may contain tags. A `<` followed by whitespace, `=` or the end of the text,
/// or one that is never closed, is literal text. `\<` and `\>` produce literal brackets.
pub fn tokenize(text: &str) -> Vec<TagPiece> {
    let mut pieces = Vec::with_capacity(text.len() / 20 + 1);
    let mut literal = String::new();

    // Helper to flush the pending literal, merging into a previous literal if one exists.
    let flush = |pieces: &mut Vec<TagPiece>, literal: &mut String| {
        if literal.is_empty() {
            return;
        }
        if let Some(TagPiece::Literal(last)) = pieces.last_mut() {
            last.push_str(literal);
        } else {
            pieces.push(TagPiece::Literal(std::mem::take(literal)));
        }
        literal.clear();
    };

    let chars: Vec<(usize, char)> = text.char_indices().collect();
    let mut i = 0;
    while let Some(&(pos, c)) = chars.get(i) {
        match c {
            '\\' if matches!(chars.get(i + 1), Some((_, '<' | '>'))) => {
                if let Some(&(_, escaped)) = chars.get(i + 1) {
                    literal.push(escape_char(escaped));
                }
                i += 2;
            }
            '<' if opens_tag(chars.get(i + 1).map(|&(_, n)| n)) => {
                match find_closing(&chars, i) {
                    Some(close) => {
                        let end = chars.get(close).map_or(text.len(), |&(p, _)| p);
                        let body = text.get(pos + 1..end).unwrap_or_default();
                        flush(&mut pieces, &mut literal);
                        pieces.push(TagPiece::Tag(TagBody::new(body)));
                        i = close + 1;
                    }
                    None => {
                        literal.push('<');
                        i += 1;
                    }
                }
            }
            _ => {
                literal.push(c);
                i += 1;
            }
        }
    }
    flush(&mut pieces, &mut literal);
    pieces
}

fn opens_tag(next: Option<char>) -> bool {
    match next {
        None => false,
        Some(n) => !(n.is_whitespace() || n == '=' || n == '>'),
    }
}

/// Finds the index (into `chars`) of the `>` matching the `<` at `open`.
fn find_closing(chars: &[(usize, char)], open: usize) -> Option<usize> {
    let mut depth = 0usize;
    let mut i = open;
    while let Some(&(_, c)) = chars.get(i) {
        match c {
            '\\' => i += 1,
            '<' => depth += 1,
            '>' => {
                depth = depth.saturating_sub(1);
                if depth == 0 {
                    return Some(i);
                }
            }
            _ => {}
        }
        i += 1;
    }
    None
}

/// Returns `true` if the text could contain a tag at all.
pub fn may_contain_tags(text: &str) -> bool {
    text.contains('<')
}

/// Caches piece sequences by their exact source string.
#[derive(Debug, Default)]
pub struct PieceCache {
    pieces: Mutex<HashMap<String, Arc<[TagPiece]>>>,
}

impl PieceCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the cached piece sequence for `text`, parsing it on first use.
    pub fn get_or_parse(&self, text: &str) -> Arc<[TagPiece]> {
        if let Some(found) = lock(&self.pieces).get(text) {
            return Arc::clone(found);
        }
        let parsed: Arc<[TagPiece]> = tokenize(text).into();
        log::trace!("Parsed template '{}' into {} piece(s).", text, parsed.len());
        let mut pieces = lock(&self.pieces);
        if pieces.len() >= MAX_CACHED_TEMPLATES {
            return parsed;
        }
        pieces.entry(text.to_string()).or_insert(parsed).clone()
    }

    pub fn len(&self) -> usize {
        lock(&self.pieces).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::escape::unescape;

    fn tag(raw: &str) -> TagPiece {
        TagPiece::Tag(TagBody::new(raw))
    }

    #[test]
    fn test_tokenizer_splits_literals_and_tags() {
        let pieces = tokenize("hello <def[name]>, you are <queue.id>!");
        assert_eq!(
            pieces,
            vec![
                TagPiece::Literal("hello ".into()),
                tag("def[name]"),
                TagPiece::Literal(", you are ".into()),
                tag("queue.id"),
                TagPiece::Literal("!".into()),
            ]
        );
    }

    #[test]
    fn test_tokenizer_counts_nested_tags() {
        let pieces = tokenize("<def[<def[key]>]>");
        assert_eq!(pieces, vec![tag("def[<def[key]>]")]);
    }

    #[test]
    fn test_tokenizer_leaves_comparisons_literal() {
        let text = "if a < b and c <= d or e >";
        assert_eq!(tokenize(text), vec![TagPiece::Literal(text.into())]);
    }

    #[test]
    fn test_tokenizer_unclosed_tag_is_literal() {
        assert_eq!(
            tokenize("broken <def[x]"),
            vec![TagPiece::Literal("broken <def[x]".into())]
        );
    }

    #[test]
    fn test_tokenizer_handles_escaped_brackets_and_merges_literals() {
        let pieces = tokenize(r"echo \<hello\> world <name>");
        assert_eq!(pieces.len(), 2);
        match &pieces[0] {
            TagPiece::Literal(s) => assert_eq!(unescape(s), "echo <hello> world "),
            other => panic!("Expected literal, got {:?}", other),
        }
        assert_eq!(pieces[1], tag("name"));
    }

    #[test]
    fn test_tag_body_splits_fallback() {
        let body = TagBody::new("def[x]||nothing");
        assert_eq!(body.lookup, "def[x]");
        assert_eq!(body.fallback.as_deref(), Some("nothing"));
        assert!(!body.dynamic);
        assert!(TagBody::new("<def[n]>.length").dynamic);
    }

    #[test]
    fn test_cache_is_stable() {
        let cache = PieceCache::new();
        let a = cache.get_or_parse("x <queue.id> y");
        let b = cache.get_or_parse("x <queue.id> y");
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(cache.len(), 1);
    }
}
