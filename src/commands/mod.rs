// src/commands/mod.rs

//! # Commands
//!
//! The command contract and the registry the pipeline looks commands up in.
//!
//! A command declares its name, aliases, minimum argument count, usage text and the
//! `prefix:` arguments it understands. The pipeline fills tags, extracts prefixes and checks
//! the minimum before calling [`ScriptCommand::parse_args`] and then
//! [`ScriptCommand::execute`]. Commands receive one entry per call and must not keep it.

pub mod debug;
pub mod define;
pub mod determine;
pub mod inject;
pub mod queue;
pub mod repeat;
pub mod run;
pub mod stop;
pub mod wait;

use crate::{
    core::{arg_parser::ParsedArgs, queue::QueueHandle},
    models::ScriptEntry,
    runtime::Runtime,
};
use std::{
    collections::HashMap,
    fmt,
    panic::{AssertUnwindSafe, catch_unwind},
    sync::Arc,
    time::Duration,
};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum CommandError {
    /// Reported together with the command's usage text.
    #[error("{0}")]
    InvalidArguments(String),
    #[error("{0}")]
    Execution(String),
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

#[derive(Error, Debug, PartialEq, Eq)]
pub enum RegistryError {
    #[error("A command named '{0}' is already registered.")]
    DuplicateCommand(String),
    #[error("No script named '{0}' is registered.")]
    UnknownScript(String),
}

/// An externally implemented script command.
pub trait ScriptCommand: Send + Sync {
    fn name(&self) -> &'static str;

    fn aliases(&self) -> &'static [&'static str] {
        &[]
    }

    /// Fewest top-level arguments (positional plus prefixed, `save:` excluded) the entry needs.
    fn min_args(&self) -> usize {
        0
    }

    fn usage(&self) -> &'static str;

    /// The `prefix:` names this command reads. Matched case-insensitively.
    fn prefixes(&self) -> &'static [&'static str] {
        &[]
    }

    /// Whether a `~` on the entry makes its queue wait for this command's work.
    fn holdable(&self) -> bool {
        false
    }

    /// The argument-binding hook. Store bound values on the entry with `set_object`.
    fn parse_args(
        &self,
        _entry: &mut ScriptEntry,
        _args: &mut ParsedArgs,
    ) -> Result<(), CommandError> {
        Ok(())
    }

    fn execute(
        &self,
        entry: &mut ScriptEntry,
        ctx: &mut CommandContext<'_>,
    ) -> Result<(), CommandError>;
}

// --- REGISTRY ---

/// Commands by lowercased name and alias.
#[derive(Default)]
pub struct CommandRegistry {
    commands: HashMap<String, Arc<dyn ScriptCommand>>,
}

impl fmt::Debug for CommandRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut names: Vec<&String> = self.commands.keys().collect();
        names.sort();
        f.debug_struct("CommandRegistry")
            .field("commands", &names)
            .finish()
    }
}

impl CommandRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, command: Arc<dyn ScriptCommand>) -> Result<(), RegistryError> {
        let mut names = vec![command.name().to_lowercase()];
        names.extend(command.aliases().iter().map(|a| a.to_lowercase()));
        if let Some(taken) = names.iter().find(|n| self.commands.contains_key(*n)) {
            return Err(RegistryError::DuplicateCommand(taken.clone()));
        }
        for name in names {
            self.commands.insert(name, Arc::clone(&command));
        }
        Ok(())
    }

    /// Finds a command by its name or alias, case-insensitively.
    pub fn find(&self, name: &str) -> Option<Arc<dyn ScriptCommand>> {
        self.commands.get(&name.to_lowercase()).cloned()
    }

    pub fn len(&self) -> usize {
        self.commands.len()
    }

    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }
}

/// The built-in commands, registered by `RuntimeBuilder::with_builtins`.
pub fn builtin_commands() -> Vec<Arc<dyn ScriptCommand>> {
    vec![
        Arc::new(debug::DebugCommand),
        Arc::new(define::DefineCommand),
        Arc::new(determine::DetermineCommand),
        Arc::new(inject::InjectCommand),
        Arc::new(queue::QueueCommand),
        Arc::new(repeat::RepeatCommand),
        Arc::new(run::RunCommand),
        Arc::new(stop::StopCommand),
        Arc::new(wait::WaitCommand),
    ]
}

// --- EXECUTION CONTEXT ---

/// What a command sees of the engine while it executes.
#[derive(Debug)]
pub struct CommandContext<'a> {
    runtime: &'a Runtime,
    queue: &'a QueueHandle,
}

impl<'a> CommandContext<'a> {
    pub fn new(runtime: &'a Runtime, queue: &'a QueueHandle) -> Self {
        Self { runtime, queue }
    }

    pub fn runtime(&self) -> &'a Runtime {
        self.runtime
    }

    /// The queue the entry is running on.
    pub fn queue(&self) -> &'a QueueHandle {
        self.queue
    }

    /// Current scheduler time.
    pub fn now(&self) -> Duration {
        self.runtime.now()
    }

    pub fn debug(&self, message: &str) {
        let implementation = self.runtime.implementation();
        if implementation.debug_enabled() {
            implementation.debug_message(Some(self.queue.id()), message);
        }
    }

    pub fn error(&self, message: &str) {
        self.runtime
            .implementation()
            .debug_error(Some(self.queue.id()), message);
    }

    /// Runs `work` on a pool worker. `completion` is delivered to the scheduler inbox and
    /// runs on the ticking thread at the start of the next tick.
    ///
    /// If the entry was prefixed with `~`, the queue is held until the completion has run.
    pub fn run_async<T, W, C>(&self, entry: &ScriptEntry, work: W, completion: C)
    where
        T: Send + 'static,
        W: FnOnce() -> T + Send + 'static,
        C: FnOnce(&Runtime, &QueueHandle, T) + Send + 'static,
    {
        let hold = entry.wait_for;
        if hold {
            self.queue.hold();
        }
        let weak = self.runtime.weak();
        let inbox = self.runtime.scheduler().inbox();
        let queue = self.queue.clone();
        let description = entry.to_string();

        rayon::spawn(move || {
            let result = catch_unwind(AssertUnwindSafe(work));
            inbox.post(move || {
                let Some(runtime) = weak.upgrade() else {
                    return;
                };
                match result {
                    Ok(value) => completion(&runtime, &queue, value),
                    Err(_) => runtime.implementation().debug_error(
                        Some(queue.id()),
                        &format!("Async work for '{}' panicked.", description),
                    ),
                }
                if hold {
                    queue.release();
                }
            });
        });
    }
}
