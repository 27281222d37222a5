// src/commands/define.rs

use super::{CommandContext, CommandError, ScriptCommand};
use crate::{core::arg_parser::ParsedArgs, models::ScriptEntry};

/// `define <name> [<value>]` or `define <name>:<value>`. A missing value defines `true`.
#[derive(Debug, Clone, Copy, Default)]
pub struct DefineCommand;

impl ScriptCommand for DefineCommand {
    fn name(&self) -> &'static str {
        "define"
    }

    fn min_args(&self) -> usize {
        1
    }

    fn usage(&self) -> &'static str {
        "define <name> [<value>]"
    }

    fn parse_args(&self, entry: &mut ScriptEntry, args: &mut ParsedArgs) -> Result<(), CommandError> {
        let first = args.positional(0).unwrap_or_default().to_string();
        let (name, value) = match args.positional(1) {
            Some(value) => (first, value.to_string()),
            None => match first.split_once(':') {
                Some((name, value)) => (name.to_string(), value.to_string()),
                None => (first, "true".to_string()),
            },
        };
        if name.trim().is_empty() {
            return Err(CommandError::InvalidArguments("definition name is empty".into()));
        }
        // Anything past the value belongs to it: `define msg hello there`.
        let rest = args.consume_remaining();
        let value = if rest.is_empty() {
            value
        } else {
            format!("{} {}", value, rest)
        };
        entry.set_object("name", name);
        entry.set_object("value", value);
        Ok(())
    }

    fn execute(&self, entry: &mut ScriptEntry, ctx: &mut CommandContext<'_>) -> Result<(), CommandError> {
        let (Some(name), Some(value)) = (entry.object("name"), entry.object("value")) else {
            return Err(CommandError::Execution("arguments were not bound".into()));
        };
        ctx.queue().define(name, value);
        ctx.debug(&format!("Defined '{}' as '{}'.", name, value));
        Ok(())
    }
}
