// src/commands/repeat.rs

use super::{CommandContext, CommandError, ScriptCommand};
use crate::{core::arg_parser::ParsedArgs, models::ScriptEntry};
use std::sync::Arc;

/// `repeat <n> (as:<name>) { - cmd ... }`: runs the block `n` times, defining the
/// 1-based iteration number as `value` (or `<name>`) before each pass.
#[derive(Debug, Clone, Copy, Default)]
pub struct RepeatCommand;

impl ScriptCommand for RepeatCommand {
    fn name(&self) -> &'static str {
        "repeat"
    }

    fn min_args(&self) -> usize {
        1
    }

    fn usage(&self) -> &'static str {
        "repeat <times> (as:<name>) { - <command> ... }"
    }

    fn prefixes(&self) -> &'static [&'static str] {
        &["as"]
    }

    fn parse_args(&self, entry: &mut ScriptEntry, args: &mut ParsedArgs) -> Result<(), CommandError> {
        let raw = args.positional(0).unwrap_or_default();
        let times: usize = raw
            .parse()
            .map_err(|_| CommandError::InvalidArguments(format!("'{}' is not a count", raw)))?;
        if entry.blocks().is_empty() {
            return Err(CommandError::InvalidArguments("a braced block is required".into()));
        }
        let name = args.prefixed("as").unwrap_or("value").to_string();
        entry.set_object("times", times.to_string());
        entry.set_object("as", name);
        Ok(())
    }

    fn execute(&self, entry: &mut ScriptEntry, ctx: &mut CommandContext<'_>) -> Result<(), CommandError> {
        let times: usize = entry
            .object("times")
            .and_then(|t| t.parse().ok())
            .unwrap_or_default();
        let name = entry.object("as").unwrap_or("value").to_string();
        let Some(section) = entry.blocks().first() else {
            return Err(CommandError::Execution("block was not built".into()));
        };
        let script: Option<Arc<str>> = entry.script().map(Arc::from);
        let correlation_id = entry.correlation_id();

        let mut expanded = Vec::new();
        for i in 1..=times {
            expanded.push(ScriptEntry::new("define", vec![name.clone(), i.to_string()]));
            expanded.extend(section.entries.iter().cloned());
        }
        for e in &mut expanded {
            e.set_correlation_id(correlation_id);
        }
        if let Some(script) = script {
            for e in &mut expanded {
                e.set_script(Arc::clone(&script));
            }
        }
        ctx.queue().inject_entries(0, expanded);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use crate::test_support::TestRig;

    #[test]
    fn test_repeat_runs_block_with_counter() {
        let rig = TestRig::new();
        rig.run_lines(&["repeat 3 { - narrate pass <def[value]> }", "narrate done"]);
        assert_eq!(rig.narrated(), vec!["pass 1", "pass 2", "pass 3", "done"]);
    }

    #[test]
    fn test_repeated_determinations_reach_the_caller() {
        let rig = TestRig::new();
        rig.register("counts", &["repeat 2 { - determine passively <def[value]> }"]);
        let result = rig.fire("counts");
        assert_eq!(result.outcome, Some(vec!["1".to_string(), "2".to_string()]));
    }

    #[test]
    fn test_nested_repeat_with_names() {
        let rig = TestRig::new();
        rig.run_lines(&[
            "repeat 2 as:i { - repeat 2 as:j { - narrate <def[i]>.<def[j]> } }",
        ]);
        assert_eq!(rig.narrated(), vec!["1.1", "1.2", "2.1", "2.2"]);
    }

    #[test]
    fn test_repeat_without_block_is_invalid() {
        let rig = TestRig::new();
        rig.run_lines(&["repeat 2", "narrate next"]);
        assert_eq!(rig.narrated(), vec!["next"]);
        assert!(rig.errors()[0].contains("a braced block is required"));
    }
}
