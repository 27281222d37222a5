// src/tags/element.rs

use crate::core::{
    attribute::Cursor,
    tag_engine::{Resolved, TagLookup, TagResolver},
};

/// `<element[text]>`: the bracket text itself, so value attributes can be applied to it.
#[derive(Debug, Clone, Copy, Default)]
pub struct ElementTag;

impl TagResolver for ElementTag {
    fn name(&self) -> &'static str {
        "element"
    }

    fn resolve(&self, lookup: &TagLookup<'_>, cursor: Cursor) -> Option<Resolved> {
        if !lookup.key_is(cursor, "element") {
            return None;
        }
        let text = lookup.context(cursor)?;
        Some(Resolved::new(text, cursor.fulfill(1)))
    }
}
