// src/core/attribute.rs

//! Attribute chains: the dot-separated lookups inside one tag body.
//!
//! A chain is parsed once per distinct body and shared through [`AttributeCache`].
//! Resolvers never mutate a chain; they walk it with a [`Cursor`] value that only
//! ever moves forward.

use crate::constants::MAX_CACHED_TEMPLATES;
use crate::core::commons::lock;
use std::{
    collections::HashMap,
    sync::{Arc, Mutex},
};

/// One `key[context]` component of a chain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttributeComponent {
    pub key: String,
    /// Raw, still-unresolved tag text between the brackets.
    pub context: Option<String>,
}

impl AttributeComponent {
    fn parse(segment: &str) -> Self {
        let Some(open) = find_top_level(segment, '[') else {
            return Self {
                key: segment.to_string(),
                context: None,
            };
        };
        let parts = matching_bracket(segment, open)
            .filter(|&close| close + 1 == segment.len())
            .and_then(|close| Some((segment.get(..open)?, segment.get(open + 1..close)?)));
        match parts {
            Some((key, context)) => Self {
                key: key.to_string(),
                context: Some(context.to_string()),
            },
            // Unbalanced or trailing text: keep the whole segment as a plain key.
            _ => Self {
                key: segment.to_string(),
                context: None,
            },
        }
    }
}

/// An immutable, ordered list of components parsed from one tag body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttributeChain {
    raw: String,
    components: Vec<AttributeComponent>,
}

impl AttributeChain {
    /// Splits a tag body on top-level dots. Dots inside `[...]`, inside nested `<...>`
    /// and between two digits (`1.5`) are not separators.
    pub fn parse(body: &str) -> Self {
        let components = split_components(body)
            .into_iter()
            .map(AttributeComponent::parse)
            .collect();
        Self {
            raw: body.to_string(),
            components,
        }
    }

    pub fn raw(&self) -> &str {
        &self.raw
    }

    pub fn len(&self) -> usize {
        self.components.len()
    }

    pub fn is_empty(&self) -> bool {
        self.components.is_empty()
    }

    pub fn component(&self, index: usize) -> Option<&AttributeComponent> {
        self.components.get(index)
    }

    pub fn components(&self) -> &[AttributeComponent] {
        &self.components
    }
}

/// How many leading components of a chain have been consumed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default, Hash)]
pub struct Cursor(usize);

impl Cursor {
    pub const START: Self = Self(0);

    pub fn position(self) -> usize {
        self.0
    }

    /// Marks `n` more components as consumed.
    #[must_use]
    pub fn fulfill(self, n: usize) -> Self {
        Self(self.0 + n)
    }
}

/// Process-lifetime cache of parsed chains, keyed by the exact body text.
#[derive(Debug, Default)]
pub struct AttributeCache {
    chains: Mutex<HashMap<String, Arc<AttributeChain>>>,
}

impl AttributeCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get_or_parse(&self, body: &str) -> Arc<AttributeChain> {
        let mut chains = lock(&self.chains);
        if let Some(chain) = chains.get(body) {
            return Arc::clone(chain);
        }
        let chain = Arc::new(AttributeChain::parse(body));
        if chains.len() < MAX_CACHED_TEMPLATES {
            chains.insert(body.to_string(), Arc::clone(&chain));
        }
        chain
    }

    pub fn len(&self) -> usize {
        lock(&self.chains).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

// --- SCANNING HELPERS ---

/// Splits a body on its top-level `||`, returning the body and the optional fallback.
pub fn split_fallback(body: &str) -> (&str, Option<&str>) {
    let mut square = 0usize;
    let mut angle = 0usize;
    for (i, c) in body.char_indices() {
        match c {
            '[' => square += 1,
            ']' => square = square.saturating_sub(1),
            '<' => angle += 1,
            '>' => angle = angle.saturating_sub(1),
            '|' if square == 0 && angle == 0 => {
                if let (Some(head), Some(tail)) = (body.get(..i), body.get(i + 2..))
                    && body.get(i..i + 2) == Some("||")
                {
                    return (head, Some(tail));
                }
            }
            _ => {}
        }
    }
    (body, None)
}

/// Returns `true` if a `<` appears outside every `[...]` context.
pub fn has_top_level_tag(body: &str) -> bool {
    let mut square = 0usize;
    for c in body.chars() {
        match c {
            '[' => square += 1,
            ']' => square = square.saturating_sub(1),
            '<' if square == 0 => return true,
            _ => {}
        }
    }
    false
}

fn split_components(body: &str) -> Vec<&str> {
    let bytes = body.as_bytes();
    let mut parts = Vec::new();
    let mut square = 0usize;
    let mut angle = 0usize;
    let mut start = 0;
    for (i, &b) in bytes.iter().enumerate() {
        match b {
            b'[' => square += 1,
            b']' => square = square.saturating_sub(1),
            b'<' => angle += 1,
            b'>' => angle = angle.saturating_sub(1),
            b'.' if square == 0 && angle == 0 => {
                let prev_digit = i
                    .checked_sub(1)
                    .and_then(|p| bytes.get(p))
                    .is_some_and(u8::is_ascii_digit);
                let next_digit = bytes.get(i + 1).is_some_and(u8::is_ascii_digit);
                if prev_digit && next_digit {
                    continue;
                }
                parts.push(body.get(start..i).unwrap_or_default());
                start = i + 1;
            }
            _ => {}
        }
    }
    parts.push(body.get(start..).unwrap_or_default());
    parts
}

fn find_top_level(segment: &str, needle: char) -> Option<usize> {
    let mut angle = 0usize;
    for (i, c) in segment.char_indices() {
        match c {
            '<' => angle += 1,
            '>' => angle = angle.saturating_sub(1),
            c if c == needle && angle == 0 => return Some(i),
            _ => {}
        }
    }
    None
}

fn matching_bracket(segment: &str, open: usize) -> Option<usize> {
    let mut depth = 0usize;
    for (i, c) in segment.get(open..)?.char_indices() {
        match c {
            '[' => depth += 1,
            ']' => {
                depth = depth.saturating_sub(1);
                if depth == 0 {
                    return Some(open + i);
                }
            }
            _ => {}
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    fn keys(chain: &AttributeChain) -> Vec<&str> {
        chain.components().iter().map(|c| c.key.as_str()).collect()
    }

    #[test]
    fn test_parse_simple_chain() {
        let chain = AttributeChain::parse("queue.id");
        assert_eq!(keys(&chain), vec!["queue", "id"]);
        assert!(chain.component(0).unwrap().context.is_none());
    }

    #[test]
    fn test_dots_inside_brackets_and_numerals_are_kept() {
        let chain = AttributeChain::parse("element[a.b].add[1.5].round");
        assert_eq!(keys(&chain), vec!["element", "add", "round"]);
        assert_eq!(chain.component(0).unwrap().context.as_deref(), Some("a.b"));
        assert_eq!(chain.component(1).unwrap().context.as_deref(), Some("1.5"));
    }

    #[test]
    fn test_nested_tag_inside_context() {
        let chain = AttributeChain::parse("def[<def[name].to_lowercase>].length");
        assert_eq!(keys(&chain), vec!["def", "length"]);
        assert_eq!(
            chain.component(0).unwrap().context.as_deref(),
            Some("<def[name].to_lowercase>")
        );
    }

    #[test]
    fn test_definition_shorthand_has_empty_key() {
        let chain = AttributeChain::parse("[x]");
        assert_eq!(chain.len(), 1);
        assert_eq!(chain.component(0).unwrap().key, "");
        assert_eq!(chain.component(0).unwrap().context.as_deref(), Some("x"));
    }

    #[test]
    fn test_unbalanced_bracket_is_plain_key() {
        let chain = AttributeChain::parse("def[x");
        assert_eq!(keys(&chain), vec!["def[x"]);
    }

    #[test]
    fn test_split_fallback_only_at_top_level() {
        assert_eq!(split_fallback("def[x]||none"), ("def[x]", Some("none")));
        assert_eq!(split_fallback("def[a||b]"), ("def[a||b]", None));
        assert_eq!(split_fallback("def[x]||<def[y]||z>"), ("def[x]", Some("<def[y]||z>")));
    }

    #[test]
    fn test_cache_returns_same_chain() {
        let cache = AttributeCache::new();
        let a = cache.get_or_parse("queue.size");
        let b = cache.get_or_parse("queue.size");
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_cursor_only_moves_forward() {
        let cursor = Cursor::START.fulfill(1).fulfill(2);
        assert_eq!(cursor.position(), 3);
        assert!(cursor > Cursor::START);
    }
}
