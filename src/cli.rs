// src/cli.rs

//! The `tessera` runner: loads one script file, fires it and ticks the runtime until every
//! queue has finished.

use crate::{
    commands::{CommandContext, CommandError, ScriptCommand},
    core::arg_parser::ParsedArgs,
    models::{EntryError, Script, ScriptEntry},
    runtime::{FireOptions, Runtime},
};
use clap::Parser;
use colored::*;
use std::{
    fs,
    path::{Path, PathBuf},
    time::Duration,
};
use thiserror::Error;
use tokio::time::{Instant, MissedTickBehavior};

/// tessera: runs a tag-templated script file.
///
/// Every non-blank, non-`#` line of the file is one command entry. The script is named after
/// the file stem and fired on a fresh queue; the runner exits once no queue is left.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// The script file to run.
    pub script: PathBuf,

    /// Engine config file. Defaults to `<config dir>/tessera/tessera.toml`.
    #[arg(long, short)]
    pub config: Option<PathBuf>,

    /// Queue speed in ticks for the fired script. `0` runs it instantly.
    #[arg(long, short)]
    pub speed: Option<i64>,

    /// Definitions for the fired queue (e.g., "name=value").
    #[arg(long = "def", short = 'd', value_name = "NAME=VALUE")]
    pub definitions: Vec<String>,
}

#[derive(Error, Debug)]
pub enum RunnerError {
    #[error("Could not read script '{path}': {source}")]
    ScriptRead {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("Could not parse script '{path}': {source}")]
    ScriptParse {
        path: String,
        #[source]
        source: EntryError,
    },
    #[error("Invalid definition '{0}'. Expected NAME=VALUE.")]
    InvalidDefinition(String),
}

/// How the tick loop ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunEnd {
    /// No live queue was left.
    Idle,
    /// Ctrl+C was received; every queue was stopped.
    Interrupted,
}

/// Reads a script file. The script takes the file stem as its name.
pub fn load_script(path: &Path) -> Result<Script, RunnerError> {
    let content = fs::read_to_string(path).map_err(|source| RunnerError::ScriptRead {
        path: path.display().to_string(),
        source,
    })?;
    let name = path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "script".to_string());
    Script::from_lines(name, content.lines()).map_err(|source| RunnerError::ScriptParse {
        path: path.display().to_string(),
        source,
    })
}

/// Splits `--def` values into `(name, value)` pairs.
pub fn parse_definitions(raw: &[String]) -> Result<Vec<(String, String)>, RunnerError> {
    raw.iter()
        .map(|pair| match pair.split_once('=') {
            Some((name, value)) if !name.trim().is_empty() => {
                Ok((name.trim().to_string(), value.to_string()))
            }
            _ => Err(RunnerError::InvalidDefinition(pair.clone())),
        })
        .collect()
}

/// Builds the fire options for the script from the parsed command line.
pub fn fire_options(cli: &Cli) -> Result<FireOptions, RunnerError> {
    let mut options = FireOptions::default();
    if let Some(speed) = cli.speed {
        options = options.with_speed(speed);
    }
    for (name, value) in parse_definitions(&cli.definitions)? {
        options = options.define(&name, value);
    }
    Ok(options)
}

/// Ticks `runtime` every `tick_rate` until no live queue remains or Ctrl+C is pressed.
pub async fn drive(runtime: &Runtime, tick_rate: Duration) -> RunEnd {
    let mut ticker = tokio::time::interval(tick_rate);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);
    let mut last = Instant::now();

    loop {
        if runtime.queues().is_empty() {
            return RunEnd::Idle;
        }
        tokio::select! {
            now = ticker.tick() => {
                let elapsed = now.saturating_duration_since(last);
                last = now;
                runtime.tick(elapsed);
            }
            _ = &mut ctrl_c => {
                log::info!("Interrupted; stopping {} queue(s).", runtime.queues().len());
                runtime.shutdown();
                return RunEnd::Interrupted;
            }
        }
    }
}

/// `narrate <text>`: prints a line to stdout, tagged with the queue id.
#[derive(Debug, Clone, Copy, Default)]
pub struct NarrateCommand;

impl ScriptCommand for NarrateCommand {
    fn name(&self) -> &'static str {
        "narrate"
    }

    fn aliases(&self) -> &'static [&'static str] {
        &["echo"]
    }

    fn usage(&self) -> &'static str {
        "narrate <text>"
    }

    fn parse_args(&self, entry: &mut ScriptEntry, args: &mut ParsedArgs) -> Result<(), CommandError> {
        entry.set_object("text", args.consume_remaining());
        Ok(())
    }

    fn execute(&self, entry: &mut ScriptEntry, ctx: &mut CommandContext<'_>) -> Result<(), CommandError> {
        println!(
            "{} {}",
            format!("[{}]", ctx.queue().id()).dimmed(),
            entry.object("text").unwrap_or_default().bright_white()
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{runtime::RuntimeBuilder, test_support::RecordingImplementation};
    use std::sync::Arc;
    use tempfile::tempdir;

    #[test]
    fn test_parse_definitions() {
        let raw = vec!["a=1".to_string(), "b = x=y".to_string()];
        assert_eq!(
            parse_definitions(&raw).unwrap(),
            vec![("a".into(), "1".into()), ("b".into(), " x=y".into())]
        );
        assert!(matches!(
            parse_definitions(&["novalue".to_string()]),
            Err(RunnerError::InvalidDefinition(_))
        ));
        assert!(parse_definitions(&["=1".to_string()]).is_err());
    }

    #[test]
    fn test_load_script_uses_file_stem() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("greeting.tsc");
        fs::write(&path, "# comment\n\nnarrate hello\nrepeat 2 {\n  - narrate again\n}\n").unwrap();

        let script = load_script(&path).unwrap();
        assert_eq!(script.name, "greeting");
        assert_eq!(script.len(), 2);
        assert!(matches!(
            load_script(&dir.path().join("missing.tsc")),
            Err(RunnerError::ScriptRead { .. })
        ));
    }

    #[test]
    fn test_fire_options_from_cli() {
        let cli = Cli::parse_from(["tessera", "run.tsc", "--speed", "2", "--def", "who=me"]);
        let options = fire_options(&cli).unwrap();
        assert_eq!(options.speed, Some(2));
        assert_eq!(options.definitions, vec![("who".to_string(), "me".to_string())]);
    }

    #[tokio::test]
    async fn test_drive_runs_until_idle() {
        let implementation: Arc<dyn crate::system::implementation::Implementation> =
            Arc::new(RecordingImplementation::default());
        let runtime = RuntimeBuilder::new(implementation)
            .with_builtins()
            .build()
            .unwrap();
        let script = Script::from_lines("timed", ["define a 1", "wait 2t", "define b 2"]).unwrap();
        let result = runtime
            .fire_script(script, FireOptions::default().with_speed(1))
            .unwrap();
        assert!(!result.queue.is_stopped());

        let end = drive(&runtime, Duration::from_millis(5)).await;
        assert_eq!(end, RunEnd::Idle);
        assert!(result.queue.is_stopped());
        assert_eq!(result.queue.definition("b").as_deref(), Some("2"));
    }
}
