// src/tags/proc.rs

use crate::{
    constants::MAX_PROC_DEPTH,
    core::{
        attribute::Cursor,
        tag_engine::{Resolved, TagLookup, TagResolver},
    },
    runtime::FireOptions,
};
use std::sync::atomic::{AtomicU32, Ordering};

/// `<proc[script]>` and `<proc[script].context[a|b|...]>`.
///
/// Runs the script on a fresh instant queue with the context values bound as definitions
/// `1..n`, and resolves to its first determination. A script that has not determined by the
/// end of its first revolution fails the tag.
#[derive(Debug, Default)]
pub struct ProcTag {
    active: AtomicU32,
}

impl TagResolver for ProcTag {
    fn name(&self) -> &'static str {
        "proc"
    }

    fn resolve(&self, lookup: &TagLookup<'_>, cursor: Cursor) -> Option<Resolved> {
        if !lookup.key_is(cursor, "proc") {
            return None;
        }
        let script = lookup.context(cursor)?.to_string();
        let runtime = lookup.tag_context().runtime()?;

        let mut next = cursor.fulfill(1);
        let mut options = FireOptions::default().with_speed(0);
        if lookup.key_is(next, "context") {
            let values = lookup.context(next)?;
            for (i, value) in values.split('|').enumerate() {
                options = options.define(&(i + 1).to_string(), value);
            }
            next = next.fulfill(1);
        }

        if self.active.fetch_add(1, Ordering::SeqCst) >= MAX_PROC_DEPTH {
            self.active.fetch_sub(1, Ordering::SeqCst);
            log::warn!("proc[{}] exceeded {} nested calls.", script, MAX_PROC_DEPTH);
            return None;
        }
        let fired = runtime.fire_script(script.as_str(), options);
        self.active.fetch_sub(1, Ordering::SeqCst);

        let result = match fired {
            Ok(result) => result,
            Err(e) => {
                log::debug!("proc[{}] failed: {}", script, e);
                return None;
            }
        };
        let value = result.outcome?.into_iter().next()?;
        Some(Resolved::new(value, next))
    }
}

#[cfg(test)]
mod tests {
    use crate::test_support::TestRig;
    use std::time::Duration;

    #[test]
    fn test_proc_returns_first_determination() {
        let rig = TestRig::new();
        rig.register("double", &["determine <def[1].mul[2]>"]);
        rig.run_lines(&["narrate <proc[double].context[21]>"]);
        assert_eq!(rig.narrated(), vec!["42"]);
        assert!(rig.errors().is_empty());
    }

    #[test]
    fn test_proc_binds_multiple_values() {
        let rig = TestRig::new();
        rig.register("join", &["determine <def[1]>-<def[2]>"]);
        rig.run_lines(&["narrate <proc[join].context[a|b].to_uppercase>"]);
        assert_eq!(rig.narrated(), vec!["A-B"]);
    }

    #[test]
    fn test_proc_without_determination_fails() {
        let rig = TestRig::new();
        rig.register("silent", &["define x 1"]);
        rig.run_lines(&["narrate <proc[silent]||nothing>", "narrate <proc[missing]||missing>"]);
        assert_eq!(rig.narrated(), vec!["nothing", "missing"]);
    }

    #[test]
    fn test_proc_under_tag_timeout_on_a_single_worker() {
        let rig = TestRig::with_tag_timeout(Duration::from_millis(300));
        rig.register("inner", &["determine <element[x]>"]);
        let pool = rayon::ThreadPoolBuilder::new().num_threads(1).build().unwrap();
        pool.install(|| {
            rig.run_lines(&["narrate <proc[inner]>"]);
        });
        assert_eq!(rig.narrated(), vec!["x"]);
        assert!(rig.errors().is_empty());
    }

    #[test]
    fn test_proc_under_tag_timeout_from_the_main_path() {
        let rig = TestRig::with_tag_timeout(Duration::from_secs(5));
        rig.register("inner", &["determine <element[y].to_uppercase>"]);
        rig.run_lines(&["narrate <proc[inner]>"]);
        assert_eq!(rig.narrated(), vec!["Y"]);
        assert!(rig.errors().is_empty());
    }

    #[test]
    fn test_unbounded_recursion_is_cut_off() {
        let rig = TestRig::new();
        rig.register("forever", &["determine <proc[forever]||bottom>"]);
        rig.run_lines(&["narrate <proc[forever]>"]);
        assert_eq!(rig.narrated(), vec!["bottom"]);
    }
}
