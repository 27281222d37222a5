//! # Sentinel Escaping
//!
//! While a template is being resolved, text that came *out* of a tag must never be read
//! again as tag syntax. Every syntactic character in resolved output is therefore remapped
//! to a codepoint from the Unicode private use area, and only mapped back once the
//! top-level evaluation is complete.
//!
//! The contract is an exact round trip: for any text that contains none of the sentinel
//! codepoints, `unescape(&escape(s)) == s`.

use std::borrow::Cow;

/// Pairs of (syntax character, sentinel codepoint).
const SENTINELS: [(char, char); 6] = [
    ('<', '\u{E000}'),
    ('>', '\u{E001}'),
    ('[', '\u{E002}'),
    (']', '\u{E003}'),
    ('|', '\u{E004}'),
    (';', '\u{E005}'),
];

fn to_sentinel(c: char) -> Option<char> {
    SENTINELS.iter().find(|(raw, _)| *raw == c).map(|(_, s)| *s)
}

fn from_sentinel(c: char) -> Option<char> {
    SENTINELS.iter().find(|(_, s)| *s == c).map(|(raw, _)| *raw)
}

/// Returns `true` if the character is one of the private sentinel codepoints.
pub fn is_sentinel(c: char) -> bool {
    from_sentinel(c).is_some()
}

/// Remaps every syntactic character in `text` to its sentinel.
pub fn escape(text: &str) -> Cow<'_, str> {
    if !text.chars().any(|c| to_sentinel(c).is_some()) {
        return Cow::Borrowed(text);
    }
    Cow::Owned(text.chars().map(|c| to_sentinel(c).unwrap_or(c)).collect())
}

/// Restores every sentinel in `text` to the syntactic character it stands for.
pub fn unescape(text: &str) -> Cow<'_, str> {
    if !text.chars().any(is_sentinel) {
        return Cow::Borrowed(text);
    }
    Cow::Owned(text.chars().map(|c| from_sentinel(c).unwrap_or(c)).collect())
}

/// Escapes a single character, used by the parser for `\<` and `\>` in source text.
pub fn escape_char(c: char) -> char {
    to_sentinel(c).unwrap_or(c)
}
