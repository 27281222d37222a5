// src/core/blocks.rs

//! Builds the braced sub-blocks of commands such as `repeat 3 { - narrate hi }`.
//!
//! Inside a block, a top-level `-` token starts a new entry. Nested braces are kept as raw
//! tokens of the entry that owns them and are built only when that entry executes.

use crate::models::ScriptEntry;
use thiserror::Error;

#[derive(Error, Debug, PartialEq, Eq)]
pub enum BlockError {
    #[error("A '{{' was never closed.")]
    Unclosed,
    #[error("Found a '}}' with no matching '{{'.")]
    StrayClose,
    #[error("Block content must start with '-', found '{0}'.")]
    MissingSeparator(String),
    #[error("A '-' inside a block is not followed by a command.")]
    EmptyCommand,
    #[error("Block key '{0}' is used more than once.")]
    DuplicateKey(String),
}

/// One `{ ... }` block and the key written in front of it.
#[derive(Debug, Clone)]
pub struct BracedSection {
    /// The top-level tokens since the previous block, lowercased and space-joined.
    pub key: String,
    pub entries: Vec<ScriptEntry>,
}

/// Splits a token list into its braced sections.
pub fn build_sections(tokens: &[String]) -> Result<Vec<BracedSection>, BlockError> {
    let mut sections: Vec<BracedSection> = Vec::new();
    let mut key_tokens: Vec<&str> = Vec::new();
    let mut inner: Vec<String> = Vec::new();
    let mut depth = 0usize;

    for token in tokens {
        match (token.as_str(), depth) {
            ("{", 0) => depth = 1,
            ("}", 0) => return Err(BlockError::StrayClose),
            ("}", 1) => {
                depth = 0;
                let key = key_tokens.join(" ").to_lowercase();
                if sections.iter().any(|s| s.key == key) {
                    return Err(BlockError::DuplicateKey(key));
                }
                let entries = split_entries(std::mem::take(&mut inner))?;
                sections.push(BracedSection { key, entries });
                key_tokens.clear();
            }
            (_, 0) => key_tokens.push(token),
            (t, _) => {
                match t {
                    "{" => depth += 1,
                    "}" => depth -= 1,
                    _ => {}
                }
                inner.push(token.clone());
            }
        }
    }

    if depth > 0 {
        return Err(BlockError::Unclosed);
    }
    Ok(sections)
}

fn split_entries(tokens: Vec<String>) -> Result<Vec<ScriptEntry>, BlockError> {
    let mut entries = Vec::new();
    let mut current: Option<Vec<String>> = None;
    let mut depth = 0usize;

    for token in tokens {
        if depth == 0 && token == "-" {
            if let Some(previous) = current.take() {
                entries.push(finish_entry(previous)?);
            }
            current = Some(Vec::new());
            continue;
        }
        match token.as_str() {
            "{" => depth += 1,
            "}" => depth = depth.saturating_sub(1),
            _ => {}
        }
        match current.as_mut() {
            Some(parts) => parts.push(token),
            None => return Err(BlockError::MissingSeparator(token)),
        }
    }
    if let Some(last) = current {
        entries.push(finish_entry(last)?);
    }
    Ok(entries)
}

fn finish_entry(parts: Vec<String>) -> Result<ScriptEntry, BlockError> {
    ScriptEntry::from_tokens(parts).map_err(|_| BlockError::EmptyCommand)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tokens(text: &str) -> Vec<String> {
        shlex::split(text).unwrap()
    }

    #[test]
    fn test_builds_single_block() {
        let sections = build_sections(&tokens("3 { - narrate hi - define x 1 }")).unwrap();
        assert_eq!(sections.len(), 1);
        assert_eq!(sections[0].key, "3");
        let commands: Vec<&str> = sections[0].entries.iter().map(|e| e.command()).collect();
        assert_eq!(commands, vec!["narrate", "define"]);
        assert_eq!(sections[0].entries[1].arguments(), ["x", "1"]);
    }

    #[test]
    fn test_nested_block_stays_raw() {
        let sections =
            build_sections(&tokens("1 { - repeat 2 { - narrate inner } - narrate after }"))
                .unwrap();
        let entries = &sections[0].entries;
        assert_eq!(entries.len(), 2);
        assert_eq!(
            entries[0].arguments(),
            ["2", "{", "-", "narrate", "inner", "}"]
        );
        assert_eq!(entries[1].arguments(), ["after"]);
    }

    #[test]
    fn test_multiple_keyed_blocks() {
        let sections = build_sections(&tokens("a { - narrate 1 } Else { - narrate 2 }")).unwrap();
        let keys: Vec<&str> = sections.iter().map(|s| s.key.as_str()).collect();
        assert_eq!(keys, vec!["a", "else"]);
    }

    #[test]
    fn test_structural_errors() {
        assert_eq!(build_sections(&tokens("{ - narrate")).err(), Some(BlockError::Unclosed));
        assert_eq!(build_sections(&tokens("}")).err(), Some(BlockError::StrayClose));
        assert_eq!(
            build_sections(&tokens("{ narrate }")).err(),
            Some(BlockError::MissingSeparator("narrate".into()))
        );
        assert_eq!(build_sections(&tokens("{ - }")).err(), Some(BlockError::EmptyCommand));
        assert_eq!(
            build_sections(&tokens("k { - a } k { - b }")).err(),
            Some(BlockError::DuplicateKey("k".into()))
        );
    }
}
