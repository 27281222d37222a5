// src/commands/queue.rs

use super::{CommandContext, CommandError, ScriptCommand};
use crate::{
    core::{arg_parser::ParsedArgs, commons::parse_duration},
    models::ScriptEntry,
};

const ACTIONS: [&str; 4] = ["pause", "resume", "stop", "clear"];

/// `queue (<id>) pause|resume|stop|clear` and `queue (<id>) delay:<duration>`.
/// Without an id the current queue is the target.
#[derive(Debug, Clone, Copy, Default)]
pub struct QueueCommand;

impl ScriptCommand for QueueCommand {
    fn name(&self) -> &'static str {
        "queue"
    }

    fn min_args(&self) -> usize {
        1
    }

    fn usage(&self) -> &'static str {
        "queue (<id>) pause|resume|stop|clear|delay:<duration>"
    }

    fn prefixes(&self) -> &'static [&'static str] {
        &["delay"]
    }

    fn parse_args(&self, entry: &mut ScriptEntry, args: &mut ParsedArgs) -> Result<(), CommandError> {
        if let Some(delay) = args.prefixed("delay") {
            if parse_duration(delay).is_none() {
                return Err(CommandError::InvalidArguments(format!(
                    "'{}' is not a duration",
                    delay
                )));
            }
            let delay = delay.to_string();
            entry.set_object("action", "delay");
            entry.set_object("delay", delay);
            if let Some(id) = args.positional(0) {
                let id = id.to_string();
                entry.set_object("target", id);
            }
            return Ok(());
        }

        let (target, action) = match args.positional_len() {
            1 => (None, args.positional(0).unwrap_or_default().to_string()),
            _ => {
                let target = args.positional(0).unwrap_or_default().to_string();
                let action = args.positional(1).unwrap_or_default().to_string();
                (Some(target), action)
            }
        };
        let action = action.to_lowercase();
        if !ACTIONS.contains(&action.as_str()) {
            return Err(CommandError::InvalidArguments(format!(
                "unknown queue action '{}'",
                action
            )));
        }
        entry.set_object("action", action);
        if let Some(target) = target {
            entry.set_object("target", target);
        }
        Ok(())
    }

    fn execute(&self, entry: &mut ScriptEntry, ctx: &mut CommandContext<'_>) -> Result<(), CommandError> {
        let runtime = ctx.runtime();
        let queue = match entry.object("target") {
            Some(id) => runtime
                .queue(id)
                .ok_or_else(|| CommandError::Execution(format!("no live queue named '{}'", id)))?,
            None => ctx.queue().clone(),
        };

        match entry.object("action").unwrap_or_default() {
            "pause" => queue.set_paused(true),
            "resume" => queue.set_paused(false),
            "stop" => queue.stop(runtime),
            "clear" => queue.clear_entries(),
            "delay" => {
                let duration = entry
                    .object("delay")
                    .and_then(parse_duration)
                    .ok_or_else(|| CommandError::Execution("delay was not bound".into()))?;
                queue.delay_for(duration, ctx.now());
            }
            other => {
                return Err(CommandError::Execution(format!("unknown queue action '{}'", other)));
            }
        }
        ctx.debug(&format!(
            "Queue '{}': {}.",
            queue.id(),
            entry.object("action").unwrap_or_default()
        ));
        Ok(())
    }
}
