// src/tags/context.rs

use crate::core::{
    attribute::Cursor,
    tag_engine::{Resolved, TagLookup, TagResolver},
};

/// `<context.name>`: a value from the queue's pluggable context source.
#[derive(Debug, Clone, Copy, Default)]
pub struct ContextTag;

impl TagResolver for ContextTag {
    fn name(&self) -> &'static str {
        "context"
    }

    fn resolve(&self, lookup: &TagLookup<'_>, cursor: Cursor) -> Option<Resolved> {
        if !lookup.key_is(cursor, "context") {
            return None;
        }
        let next = cursor.fulfill(1);
        let name = lookup.key(next)?;
        let queue = lookup.tag_context().queue.as_ref()?;
        let value = queue.context_value(name)?;
        Some(Resolved::new(value, next.fulfill(1)))
    }
}
