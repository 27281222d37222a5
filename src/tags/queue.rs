// src/tags/queue.rs

use crate::core::{
    attribute::Cursor,
    tag_engine::{Resolved, TagLookup, TagResolver},
};

/// `<queue>` and `<queue[id]>` with `.id`, `.size`, `.speed`, `.state` or `.definitions`,
/// plus `<queue.exists[id]>`.
#[derive(Debug, Clone, Copy, Default)]
pub struct QueueTag;

impl TagResolver for QueueTag {
    fn name(&self) -> &'static str {
        "queue"
    }

    fn resolve(&self, lookup: &TagLookup<'_>, cursor: Cursor) -> Option<Resolved> {
        if !lookup.key_is(cursor, "queue") {
            return None;
        }
        let context = lookup.tag_context();
        let next = cursor.fulfill(1);

        if !lookup.has_context(cursor) && lookup.key_is(next, "exists") {
            let id = lookup.context(next)?;
            let exists = context.runtime()?.queue(id).is_some();
            return Some(Resolved::new(exists.to_string(), next.fulfill(1)));
        }

        let queue = match lookup.context(cursor) {
            Some(id) => context.runtime()?.queue(id)?,
            None => context.queue.clone()?,
        };
        let now = context.runtime().map(|r| r.now()).unwrap_or_default();
        let property = lookup.key(next).map(str::to_ascii_lowercase);
        let value = match property.as_deref() {
            Some("id") => queue.id().to_string(),
            Some("size") => queue.len().to_string(),
            Some("speed") => queue.kind().ticks().to_string(),
            Some("state") => queue.state(now).to_string(),
            Some("definitions") => queue.definition_names().join("|"),
            _ => return Some(Resolved::new(queue.id(), next)),
        };
        Some(Resolved::new(value, next.fulfill(1)))
    }
}

/// `<entry[name]>` and `<entry[name].<object>>`: an entry stored with `save:<name>`.
#[derive(Debug, Clone, Copy, Default)]
pub struct SavedEntryTag;

impl TagResolver for SavedEntryTag {
    fn name(&self) -> &'static str {
        "entry"
    }

    fn resolve(&self, lookup: &TagLookup<'_>, cursor: Cursor) -> Option<Resolved> {
        if !lookup.key_is(cursor, "entry") {
            return None;
        }
        let name = lookup.context(cursor)?;
        let entry = lookup.tag_context().queue.as_ref()?.saved_entry(name)?;
        let next = cursor.fulfill(1);
        match lookup.key(next) {
            Some(object) => {
                let value = entry.object(object)?;
                Some(Resolved::new(value, next.fulfill(1)))
            }
            None => Some(Resolved::new(entry.to_string(), next)),
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::runtime::FireOptions;
    use crate::test_support::TestRig;

    #[test]
    fn test_current_queue_properties() {
        let rig = TestRig::new();
        rig.register("info", &[
            "define b 1",
            "define a 2",
            "narrate <queue.id>/<queue.speed>/<queue.state>/<queue.definitions>/<queue.size>",
            "narrate last",
        ]);
        rig.runtime
            .fire_script("info", FireOptions::default().with_id("Info"))
            .unwrap();
        assert_eq!(rig.narrated(), vec!["Info/0/running/a|b/1", "last"]);
    }

    #[test]
    fn test_other_queue_and_exists() {
        let rig = TestRig::new();
        rig.register("idle", &["wait 10s"]);
        rig.runtime
            .fire_script("idle", FireOptions::default().with_id("idle").with_speed(3))
            .unwrap();
        rig.run_lines(&[
            "narrate <queue[idle].state> <queue[idle].speed> <queue.exists[idle]> <queue.exists[ghost]>",
        ]);
        assert_eq!(rig.narrated(), vec!["delayed 3 true false"]);

        rig.run_lines(&["narrate <queue[ghost]||gone>"]);
        assert_eq!(rig.narrated().last().map(String::as_str), Some("gone"));
    }

    #[test]
    fn test_saved_entry_objects() {
        let rig = TestRig::new();
        rig.run_lines(&[
            "wait 0t save:pause",
            "narrate <entry[pause].duration> <entry[pause]>",
            "narrate <entry[nothing]||none>",
        ]);
        assert_eq!(rig.narrated(), vec!["0t wait 0t save:pause", "none"]);
    }
}
