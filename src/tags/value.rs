// src/tags/value.rs

//! Attributes that apply to any resolved value.

use crate::core::{
    attribute::Cursor,
    tag_engine::{AttributeHandler, Resolved, TagLookup},
};

#[derive(Debug, Clone, Copy, Default)]
pub struct ValueAttributes;

impl AttributeHandler for ValueAttributes {
    fn apply(&self, value: &str, lookup: &TagLookup<'_>, cursor: Cursor) -> Option<Resolved> {
        let key = lookup.key(cursor)?.to_ascii_lowercase();
        let next = cursor.fulfill(1);
        let result = match key.as_str() {
            "length" => value.chars().count().to_string(),
            "to_uppercase" => value.to_uppercase(),
            "to_lowercase" => value.to_lowercase(),
            "add" | "sub" | "mul" | "div" => {
                let lhs = parse_number(value)?;
                let rhs = parse_number(lookup.context(cursor)?)?;
                let result = match key.as_str() {
                    "add" => lhs + rhs,
                    "sub" => lhs - rhs,
                    "mul" => lhs * rhs,
                    _ if rhs == 0.0 => return None,
                    _ => lhs / rhs,
                };
                format_number(result)
            }
            "contains" => value.contains(lookup.context(cursor)?).to_string(),
            "starts_with" => value.starts_with(lookup.context(cursor)?).to_string(),
            "equals" => (value == lookup.context(cursor)?).to_string(),
            "replace" => {
                let from = lookup.context(cursor)?;
                if from.is_empty() {
                    return None;
                }
                if lookup.key_is(next, "with") {
                    let to = lookup.context(next).unwrap_or_default();
                    return Some(Resolved::new(value.replace(from, to), next.fulfill(1)));
                }
                value.replace(from, "")
            }
            "is_integer" => value.trim().parse::<i64>().is_ok().to_string(),
            "round" => format_number(parse_number(value)?.round()),
            _ => return None,
        };
        Some(Resolved::new(result, next))
    }
}

fn parse_number(text: &str) -> Option<f64> {
    text.trim().parse::<f64>().ok().filter(|n| n.is_finite())
}

/// Whole numbers print without a fractional part.
fn format_number(n: f64) -> String {
    if n == 0.0 {
        "0".to_string()
    } else if n.fract() == 0.0 && n.abs() < 1e15 {
        format!("{:.0}", n)
    } else {
        n.to_string()
    }
}
