// src/commands/determine.rs

use super::{CommandContext, CommandError, ScriptCommand};
use crate::{core::arg_parser::ParsedArgs, models::ScriptEntry};

/// `determine (passively) <value>`: records an outcome for whoever fired the script.
#[derive(Debug, Clone, Copy, Default)]
pub struct DetermineCommand;

impl ScriptCommand for DetermineCommand {
    fn name(&self) -> &'static str {
        "determine"
    }

    fn min_args(&self) -> usize {
        1
    }

    fn usage(&self) -> &'static str {
        "determine (passively) <value>"
    }

    fn parse_args(&self, entry: &mut ScriptEntry, args: &mut ParsedArgs) -> Result<(), CommandError> {
        let passive = args.positional_len() > 1 && args.take_flag("passively");
        if passive {
            entry.set_object("passively", "true");
        }
        entry.set_object("value", args.consume_remaining());
        Ok(())
    }

    fn execute(&self, entry: &mut ScriptEntry, ctx: &mut CommandContext<'_>) -> Result<(), CommandError> {
        let value = entry.object("value").unwrap_or_default();
        let queue = ctx.queue();
        let correlation_id = entry
            .correlation_id()
            .unwrap_or_else(|| queue.correlation_id());
        ctx.runtime().outcomes().record(correlation_id, value);
        ctx.debug(&format!("Determined '{}'.", value));
        if entry.object("passively").is_none() {
            queue.stop(ctx.runtime());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use crate::runtime::FireOptions;
    use crate::test_support::TestRig;

    #[test]
    fn test_determine_stops_queue_and_is_visible_to_caller() {
        let rig = TestRig::new();
        rig.register("answer", &["determine 42", "narrate unreachable"]);
        let result = rig.runtime.fire_script("answer", FireOptions::default()).unwrap();
        assert_eq!(result.outcome, Some(vec!["42".to_string()]));
        assert!(rig.narrated().is_empty());
    }

    #[test]
    fn test_passive_determine_continues() {
        let rig = TestRig::new();
        rig.register("many", &["determine passively a", "determine passively b", "narrate done"]);
        let result = rig.runtime.fire_script("many", FireOptions::default()).unwrap();
        assert_eq!(result.outcome, Some(vec!["a".to_string(), "b".to_string()]));
        assert_eq!(rig.narrated(), vec!["done"]);
    }

    #[test]
    fn test_lone_passively_is_a_value() {
        let rig = TestRig::new();
        rig.register("word", &["determine passively"]);
        let result = rig.runtime.fire_script("word", FireOptions::default()).unwrap();
        assert_eq!(result.outcome, Some(vec!["passively".to_string()]));
    }
}
