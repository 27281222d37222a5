// src/commands/run.rs

use super::{CommandContext, CommandError, ScriptCommand};
use crate::{core::arg_parser::ParsedArgs, models::ScriptEntry, runtime::FireOptions};

/// `run <script> (id:<id>) (speed:<ticks>) (def:<name>=<value>|...) (instantly)`.
///
/// Fires the script on its own queue. With `~run`, the calling queue waits until the new
/// queue stops. The new queue's id is bound as `created_queue` (see `save:`).
#[derive(Debug, Clone, Copy, Default)]
pub struct RunCommand;

impl ScriptCommand for RunCommand {
    fn name(&self) -> &'static str {
        "run"
    }

    fn min_args(&self) -> usize {
        1
    }

    fn usage(&self) -> &'static str {
        "run <script> (id:<id>) (speed:<ticks>) (def:<name>=<value>|...) (instantly)"
    }

    fn prefixes(&self) -> &'static [&'static str] {
        &["id", "speed", "def"]
    }

    fn holdable(&self) -> bool {
        true
    }

    fn parse_args(&self, entry: &mut ScriptEntry, args: &mut ParsedArgs) -> Result<(), CommandError> {
        if args.positional_len() > 1 && args.take_flag("instantly") {
            entry.set_object("speed", "0");
        }
        let script = args.positional(0).unwrap_or_default().to_string();
        entry.set_object("script", script);

        if let Some(speed) = args.prefixed("speed") {
            let ticks: i64 = speed
                .parse()
                .map_err(|_| CommandError::InvalidArguments(format!("'{}' is not a tick count", speed)))?;
            entry.set_object("speed", ticks.to_string());
        }
        if let Some(id) = args.prefixed("id") {
            let id = id.to_string();
            entry.set_object("id", id);
        }
        if let Some(defs) = args.prefixed("def") {
            for pair in defs.split('|').filter(|p| !p.is_empty()) {
                if pair.split_once('=').is_none() {
                    return Err(CommandError::InvalidArguments(format!(
                        "definition '{}' must look like name=value",
                        pair
                    )));
                }
            }
            let defs = defs.to_string();
            entry.set_object("defs", defs);
        }
        Ok(())
    }

    fn execute(&self, entry: &mut ScriptEntry, ctx: &mut CommandContext<'_>) -> Result<(), CommandError> {
        let runtime = ctx.runtime();
        let name = entry.object("script").unwrap_or_default().to_string();

        let mut options = FireOptions::default();
        if let Some(id) = entry.object("id") {
            options = options.with_id(id);
        }
        if let Some(speed) = entry.object("speed").and_then(|s| s.parse().ok()) {
            options = options.with_speed(speed);
        }
        for pair in entry.object("defs").unwrap_or_default().split('|') {
            if let Some((key, value)) = pair.split_once('=') {
                options = options.define(key, value);
            }
        }

        let caller = ctx.queue().clone();
        if entry.wait_for {
            caller.hold();
        }
        let result = match runtime.fire_script(name.as_str(), options) {
            Ok(result) => result,
            Err(e) => {
                if entry.wait_for {
                    caller.release();
                }
                return Err(CommandError::Execution(e.to_string()));
            }
        };
        entry.set_object("created_queue", result.queue_id.clone());

        if entry.wait_for {
            let waiting = caller.clone();
            result.queue.on_stop(move || {
                waiting.release();
            });
        }
        ctx.debug(&format!("Started '{}' on queue '{}'.", name, result.queue_id));
        Ok(())
    }
}
