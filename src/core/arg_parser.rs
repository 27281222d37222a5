// src/core/arg_parser.rs

use std::collections::HashMap;

#[derive(Debug, Clone)]
struct PositionalArg {
    value: String,
    consumed: bool,
}

#[derive(Debug, Clone)]
struct PrefixedArg {
    value: String,
    consumed: bool,
}

/// The filled, top-level arguments of one entry, split into positional and `prefix:value`
/// arguments, with consumption tracked per argument.
///
/// Braced sub-blocks are not arguments; everything between a top-level `{` and its `}` is
/// skipped here and built separately.
#[derive(Debug, Clone, Default)]
pub struct ParsedArgs {
    positional: Vec<PositionalArg>,
    prefixed: HashMap<String, PrefixedArg>,
}

impl ParsedArgs {
    /// Classifies the filled arguments of an entry.
    ///
    /// # Logic:
    /// - A `prefix:value` token whose prefix is in `known_prefixes` (case-insensitive) is a
    ///   prefixed argument. The prefix is stored lowercased.
    /// - Every other top-level token is positional, including undeclared `x:y` tokens.
    ///   Those can still be claimed later through [`Self::offer_undeclared`].
    pub fn new(arguments: &[String], known_prefixes: &[&str]) -> Self {
        let mut positional = Vec::new();
        let mut prefixed = HashMap::new();
        let mut depth = 0usize;

        for argument in arguments {
            match argument.as_str() {
                "{" => {
                    depth += 1;
                    continue;
                }
                "}" => {
                    depth = depth.saturating_sub(1);
                    continue;
                }
                _ if depth > 0 => continue,
                _ => {}
            }

            let declared = split_prefix(argument).filter(|(prefix, _)| {
                known_prefixes
                    .iter()
                    .any(|known| known.eq_ignore_ascii_case(prefix))
            });
            match declared {
                Some((prefix, value)) => {
                    prefixed.insert(
                        prefix.to_ascii_lowercase(),
                        PrefixedArg {
                            value: value.to_string(),
                            consumed: false,
                        },
                    );
                }
                None => positional.push(PositionalArg {
                    value: argument.clone(),
                    consumed: false,
                }),
            }
        }

        Self {
            positional,
            prefixed,
        }
    }

    /// Number of top-level arguments, positional and prefixed.
    pub fn len(&self) -> usize {
        self.positional.len() + self.prefixed.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn positional_len(&self) -> usize {
        self.positional.len()
    }

    /// Retrieves a positional argument by its index and marks it consumed.
    pub fn positional(&mut self, index: usize) -> Option<&str> {
        let arg = self.positional.get_mut(index)?;
        arg.consumed = true;
        Some(arg.value.as_str())
    }

    /// Retrieves a prefixed argument's value and marks it consumed.
    pub fn prefixed(&mut self, prefix: &str) -> Option<&str> {
        let arg = self.prefixed.get_mut(&prefix.to_ascii_lowercase())?;
        arg.consumed = true;
        Some(arg.value.as_str())
    }

    /// Removes a prefixed argument entirely, returning its value.
    pub fn take_prefixed(&mut self, prefix: &str) -> Option<String> {
        self.prefixed
            .remove(&prefix.to_ascii_lowercase())
            .map(|arg| arg.value)
    }

    /// Removes the first positional argument equal (case-insensitive) to `word`.
    /// Used for bare keywords such as `passively` or `instantly`.
    pub fn take_flag(&mut self, word: &str) -> bool {
        match self
            .positional
            .iter()
            .position(|arg| arg.value.eq_ignore_ascii_case(word))
        {
            Some(index) => {
                self.positional.remove(index);
                true
            }
            None => false,
        }
    }

    /// Offers every positional `prefix:value` token to `claim`; tokens it accepts are removed.
    pub fn offer_undeclared(&mut self, mut claim: impl FnMut(&str, &str) -> bool) {
        self.positional.retain(|arg| match split_prefix(&arg.value) {
            Some((prefix, value)) => !claim(prefix, value),
            None => true,
        });
    }

    /// Consumes all remaining positional arguments, joined by spaces.
    pub fn consume_remaining(&mut self) -> String {
        let mut remaining_parts: Vec<&str> = Vec::new();
        for arg in self.positional.iter_mut().filter(|arg| !arg.consumed) {
            arg.consumed = true;
            remaining_parts.push(arg.value.as_str());
        }
        remaining_parts.join(" ")
    }

    /// Values of arguments nothing has read, in a deterministic order.
    pub fn unconsumed(&self) -> Vec<String> {
        let mut leftover: Vec<String> = self
            .positional
            .iter()
            .filter(|arg| !arg.consumed)
            .map(|arg| arg.value.clone())
            .collect();
        let mut prefixes: Vec<_> = self
            .prefixed
            .iter()
            .filter(|(_, arg)| !arg.consumed)
            .map(|(prefix, arg)| format!("{}:{}", prefix, arg.value))
            .collect();
        prefixes.sort();
        leftover.extend(prefixes);
        leftover
    }

    pub fn all_consumed(&self) -> bool {
        self.positional.iter().all(|arg| arg.consumed)
            && self.prefixed.values().all(|arg| arg.consumed)
    }
}

/// Splits `prefix:value` when the prefix is a plain word.
fn split_prefix(argument: &str) -> Option<(&str, &str)> {
    let (prefix, value) = argument.split_once(':')?;
    let plain = !prefix.is_empty()
        && prefix
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-');
    plain.then_some((prefix, value))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_splits_declared_prefixes() {
        let raw = args(&["child", "ID:worker", "speed:5", "other:x"]);
        let mut parsed = ParsedArgs::new(&raw, &["id", "speed"]);
        assert_eq!(parsed.len(), 4);
        assert_eq!(parsed.positional_len(), 2);
        assert_eq!(parsed.prefixed("id"), Some("worker"));
        assert_eq!(parsed.prefixed("speed"), Some("5"));
        assert_eq!(parsed.positional(1), Some("other:x"));
    }

    #[test]
    fn test_braced_tokens_are_not_arguments() {
        let raw = args(&["3", "{", "-", "narrate", "id:x", "}"]);
        let mut parsed = ParsedArgs::new(&raw, &["id"]);
        assert_eq!(parsed.len(), 1);
        assert_eq!(parsed.positional(0), Some("3"));
        assert_eq!(parsed.prefixed("id"), None);
    }

    #[test]
    fn test_take_flag_and_remaining() {
        let raw = args(&["passively", "a", "b"]);
        let mut parsed = ParsedArgs::new(&raw, &[]);
        assert!(parsed.take_flag("PASSIVELY"));
        assert!(!parsed.take_flag("passively"));
        assert_eq!(parsed.consume_remaining(), "a b");
        assert!(parsed.all_consumed());
    }

    #[test]
    fn test_offer_undeclared_removes_claimed() {
        let raw = args(&["target:bob", "keep", "note:x"]);
        let mut parsed = ParsedArgs::new(&raw, &[]);
        parsed.offer_undeclared(|prefix, _| prefix == "target");
        assert_eq!(parsed.positional_len(), 2);
        assert_eq!(parsed.unconsumed(), vec!["keep", "note:x"]);
    }

    #[test]
    fn test_split_prefix_requires_plain_word() {
        assert_eq!(split_prefix("a b:c"), None);
        assert_eq!(split_prefix(":x"), None);
        assert_eq!(split_prefix("save:name"), Some(("save", "name")));
    }
}
