// src/commands/stop.rs

use super::{CommandContext, CommandError, ScriptCommand};
use crate::models::ScriptEntry;

/// `stop`: stops the current queue; remaining entries are discarded.
#[derive(Debug, Clone, Copy, Default)]
pub struct StopCommand;

impl ScriptCommand for StopCommand {
    fn name(&self) -> &'static str {
        "stop"
    }

    fn usage(&self) -> &'static str {
        "stop"
    }

    fn execute(&self, _entry: &mut ScriptEntry, ctx: &mut CommandContext<'_>) -> Result<(), CommandError> {
        ctx.queue().stop(ctx.runtime());
        Ok(())
    }
}
