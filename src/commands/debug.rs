// src/commands/debug.rs

use super::{CommandContext, CommandError, ScriptCommand};
use crate::{core::arg_parser::ParsedArgs, models::ScriptEntry};

/// `debug (log|error) <message>`: writes to the host's debug sinks.
#[derive(Debug, Clone, Copy, Default)]
pub struct DebugCommand;

impl ScriptCommand for DebugCommand {
    fn name(&self) -> &'static str {
        "debug"
    }

    fn min_args(&self) -> usize {
        1
    }

    fn usage(&self) -> &'static str {
        "debug (log|error) <message>"
    }

    fn parse_args(&self, entry: &mut ScriptEntry, args: &mut ParsedArgs) -> Result<(), CommandError> {
        if args.positional_len() > 1 {
            if args.take_flag("error") {
                entry.set_object("level", "error");
            } else {
                args.take_flag("log");
            }
        }
        entry.set_object("message", args.consume_remaining());
        Ok(())
    }

    fn execute(&self, entry: &mut ScriptEntry, ctx: &mut CommandContext<'_>) -> Result<(), CommandError> {
        let message = entry.object("message").unwrap_or_default();
        match entry.object("level") {
            Some("error") => ctx.error(message),
            _ => ctx
                .runtime()
                .implementation()
                .debug_message(Some(ctx.queue().id()), message),
        }
        Ok(())
    }
}
