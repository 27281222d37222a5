// src/commands/inject.rs

use super::{CommandContext, CommandError, ScriptCommand};
use crate::{core::arg_parser::ParsedArgs, models::ScriptEntry};

/// `inject <script>`: runs another script's entries next, on the current queue.
#[derive(Debug, Clone, Copy, Default)]
pub struct InjectCommand;

impl ScriptCommand for InjectCommand {
    fn name(&self) -> &'static str {
        "inject"
    }

    fn min_args(&self) -> usize {
        1
    }

    fn usage(&self) -> &'static str {
        "inject <script>"
    }

    fn parse_args(&self, entry: &mut ScriptEntry, args: &mut ParsedArgs) -> Result<(), CommandError> {
        let script = args.positional(0).unwrap_or_default().to_string();
        entry.set_object("script", script);
        Ok(())
    }

    fn execute(&self, entry: &mut ScriptEntry, ctx: &mut CommandContext<'_>) -> Result<(), CommandError> {
        let name = entry.object("script").unwrap_or_default();
        let script = ctx
            .runtime()
            .script(name)
            .ok_or_else(|| CommandError::Execution(format!("no script named '{}'", name)))?;
        ctx.queue()
            .inject_entries(0, script.instantiate(entry.correlation_id()));
        ctx.debug(&format!("Injected {} entries from '{}'.", script.len(), name));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use crate::test_support::TestRig;

    #[test]
    fn test_inject_runs_before_remaining_entries_and_shares_definitions() {
        let rig = TestRig::new();
        rig.register("helper", &["narrate helper sees <def[x]>"]);
        rig.run_lines(&["define x 7", "inject helper", "narrate after"]);
        assert_eq!(rig.narrated(), vec!["helper sees 7", "after"]);
    }
}
