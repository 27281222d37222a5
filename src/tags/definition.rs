// src/tags/definition.rs

use crate::core::{
    attribute::Cursor,
    tag_engine::{Resolved, TagLookup, TagResolver},
};

/// `<def[name]>`, or the shorthand `<[name]>`: a definition of the evaluating queue.
#[derive(Debug, Clone, Copy, Default)]
pub struct DefinitionTag;

impl TagResolver for DefinitionTag {
    fn name(&self) -> &'static str {
        "definition"
    }

    fn resolve(&self, lookup: &TagLookup<'_>, cursor: Cursor) -> Option<Resolved> {
        if !lookup.key_is(cursor, "def") && !lookup.key_is(cursor, "") {
            return None;
        }
        let name = lookup.context(cursor)?;
        let queue = lookup.tag_context().queue.as_ref()?;
        let value = queue.definition(name)?;
        Some(Resolved::new(value, cursor.fulfill(1)))
    }
}

#[cfg(test)]
mod tests {
    use crate::test_support::TestRig;

    #[test]
    fn test_long_and_short_forms() {
        let rig = TestRig::new();
        rig.run_lines(&["define x 5", "narrate <def[x]> <[X]>"]);
        assert_eq!(rig.narrated(), vec!["5 5"]);
    }

    #[test]
    fn test_definition_name_can_be_a_tag() {
        let rig = TestRig::new();
        rig.run_lines(&["define which color", "define color blue", "narrate <def[<def[which]>]>"]);
        assert_eq!(rig.narrated(), vec!["blue"]);
    }

    #[test]
    fn test_missing_definition_is_null() {
        let rig = TestRig::new();
        rig.run_lines(&["narrate <def[nope]>", "narrate <def[nope]||unset>"]);
        assert_eq!(rig.narrated(), vec!["null", "unset"]);
        assert_eq!(rig.errors().len(), 1);
    }
}
