// src/core/definitions.rs

//! Legacy `%name%` definition substitution, run before tag filling.
//!
//! `%name%` inserts the value sentinel-escaped, so the tag pass that follows cannot read it
//! as syntax. `%|name|%` inserts it raw, letting a definition carry tag text on purpose.

use crate::{constants::NULL_MARKER, core::escape::escape};
use lazy_static::lazy_static;
use regex::{Captures, Regex};
use std::borrow::Cow;

lazy_static! {
    static ref DEFINITION_RE: Regex =
        Regex::new(r"%\|([^%|\s]+)\|%|%([^%|\s]+)%").expect("definition pattern is valid");
}

/// Replaces every `%name%` / `%|name|%` in `text`.
///
/// `lookup` returns the current value of a definition. Names it does not know are passed to
/// `on_missing` and replaced with `null`.
pub fn substitute<'a>(
    text: &'a str,
    lookup: impl Fn(&str) -> Option<String>,
    mut on_missing: impl FnMut(&str),
) -> Cow<'a, str> {
    if !text.contains('%') {
        return Cow::Borrowed(text);
    }
    DEFINITION_RE.replace_all(text, |caps: &Captures<'_>| {
        let (name, raw) = match (caps.get(1), caps.get(2)) {
            (Some(name), _) => (name.as_str(), true),
            (None, Some(name)) => (name.as_str(), false),
            (None, None) => return String::new(),
        };
        match lookup(name) {
            Some(value) if raw => value,
            Some(value) => escape(&value).into_owned(),
            None => {
                on_missing(name);
                NULL_MARKER.to_string()
            }
        }
    })
}
