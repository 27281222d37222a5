// src/commands/wait.rs

use super::{CommandContext, CommandError, ScriptCommand};
use crate::{
    core::{arg_parser::ParsedArgs, commons::parse_duration},
    models::ScriptEntry,
};

/// `wait <duration>`: delays the queue. Units are `t`, `ms`, `s`, `m`, `h`, `d`; bare numbers are seconds.
#[derive(Debug, Clone, Copy, Default)]
pub struct WaitCommand;

impl ScriptCommand for WaitCommand {
    fn name(&self) -> &'static str {
        "wait"
    }

    fn min_args(&self) -> usize {
        1
    }

    fn usage(&self) -> &'static str {
        "wait <duration>"
    }

    fn parse_args(&self, entry: &mut ScriptEntry, args: &mut ParsedArgs) -> Result<(), CommandError> {
        let raw = args.positional(0).unwrap_or_default();
        if parse_duration(raw).is_none() {
            return Err(CommandError::InvalidArguments(format!("'{}' is not a duration", raw)));
        }
        entry.set_object("duration", raw);
        Ok(())
    }

    fn execute(&self, entry: &mut ScriptEntry, ctx: &mut CommandContext<'_>) -> Result<(), CommandError> {
        let duration = entry
            .object("duration")
            .and_then(parse_duration)
            .ok_or_else(|| CommandError::Execution("duration was not bound".into()))?;
        ctx.queue().delay_for(duration, ctx.now());
        ctx.debug(&format!("Waiting {:?}.", duration));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use crate::constants::TICK_DURATION;
    use crate::test_support::TestRig;

    #[test]
    fn test_wait_delays_following_entries() {
        let rig = TestRig::new();
        rig.register("slow", &["narrate a", "wait 1s", "narrate b"]);
        rig.fire("slow");
        assert_eq!(rig.narrated(), vec!["a"]);
        for _ in 0..19 {
            rig.runtime.tick(TICK_DURATION);
        }
        assert_eq!(rig.narrated(), vec!["a"]);
        rig.runtime.tick(TICK_DURATION);
        assert_eq!(rig.narrated(), vec!["a", "b"]);
    }

    #[test]
    fn test_invalid_duration_is_reported() {
        let rig = TestRig::new();
        rig.run_lines(&["wait soon", "narrate next"]);
        assert_eq!(rig.narrated(), vec!["next"]);
        assert!(rig.errors()[0].contains("'soon' is not a duration"));
    }
}
