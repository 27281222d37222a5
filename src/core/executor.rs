// src/core/executor.rs

//! The command execution pipeline: one popped entry in, one finished (or broken) entry out.
//!
//! Nothing in here returns an error to the queue. Every failure is reported through the
//! host [`Implementation`](crate::system::implementation::Implementation) and only the
//! offending entry is affected.

use crate::{
    commands::{CommandContext, CommandError, ScriptCommand},
    constants::SAVE_PREFIX,
    core::{arg_parser::ParsedArgs, blocks::build_sections, definitions, queue::QueueHandle},
    models::ScriptEntry,
    runtime::Runtime,
};
use std::{
    any::Any,
    panic::{AssertUnwindSafe, catch_unwind},
};

/// What happened to one entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryOutcome {
    /// The command ran to completion.
    Executed,
    /// The entry never reached the command's execution hook.
    Broken,
    /// Binding or execution failed (error or panic).
    Failed,
}

// --- Main Public Function ---

/// Runs one entry on `queue`.
pub fn execute_entry(runtime: &Runtime, queue: &QueueHandle, mut entry: ScriptEntry) -> EntryOutcome {
    let implementation = runtime.implementation();
    entry.set_queue_id(queue.id_arc());
    if implementation.debug_enabled() {
        implementation.debug_entry(queue.id(), &entry.to_string());
    }

    let report = |message: String| implementation.debug_error(Some(queue.id()), &message);

    // 1. Legacy `%name%` definitions, top level only.
    if entry.has_definitions() {
        let substituted = substitute_definitions(queue, &entry, &report);
        entry.set_arguments(substituted);
    }

    // 2. Tags. Braced tokens are left for their own entries.
    let context = runtime.tag_context(Some(queue), Some(&entry));
    let filled = runtime.tags().fill_arguments(entry.arguments(), &context);

    // 3. Lookup.
    let Some(command) = runtime.commands().find(entry.command()) else {
        report(format!("Unknown command '{}' in '{}'.", entry.command(), entry));
        entry.mark_broken();
        return EntryOutcome::Broken;
    };

    // 4. Sub-blocks.
    if filled.iter().any(|a| a == "{") {
        match build_sections(&filled) {
            Ok(sections) => entry.set_blocks(sections),
            Err(e) => {
                report(format!("Malformed block in '{}': {}", entry, e));
                entry.mark_broken();
                return EntryOutcome::Broken;
            }
        }
    }

    // 5. Prefixed arguments.
    let mut known: Vec<&str> = command.prefixes().to_vec();
    known.push(SAVE_PREFIX);
    let mut args = ParsedArgs::new(&filled, &known);
    let save_name = args.take_prefixed(SAVE_PREFIX);
    entry.set_arguments(filled);
    args.offer_undeclared(|prefix, value| {
        implementation.handle_custom_argument(&entry, prefix, value)
    });

    // 6. Validation.
    if args.len() < command.min_args() {
        report(format!(
            "'{}' needs at least {} argument(s) but got {}. Usage: {}",
            entry,
            command.min_args(),
            args.len(),
            command.usage()
        ));
        entry.mark_broken();
        return EntryOutcome::Broken;
    }
    if entry.wait_for && !command.holdable() {
        log::warn!(
            "[{}] '~' has no effect on '{}'; it does not hold its queue.",
            queue.id(),
            command.name()
        );
    }

    // 7. Binding.
    if let Some(outcome) = bind(command.as_ref(), &mut entry, &mut args, &report) {
        return outcome;
    }
    let leftover = args.unconsumed();
    if !leftover.is_empty() {
        log::debug!(
            "[{}] '{}' ignored argument(s): {}",
            queue.id(),
            command.name(),
            leftover.join(" ")
        );
    }

    // 8. Execution.
    let mut command_context = CommandContext::new(runtime, queue);
    let result = catch_unwind(AssertUnwindSafe(|| {
        command.execute(&mut entry, &mut command_context)
    }));
    entry.mark_finished();
    match result {
        Ok(Ok(())) => {
            if let Some(name) = save_name {
                queue.save_entry(&name, entry);
            }
            EntryOutcome::Executed
        }
        Ok(Err(CommandError::InvalidArguments(message))) => {
            report(format!(
                "Invalid arguments in '{}': {}. Usage: {}",
                entry,
                message,
                command.usage()
            ));
            EntryOutcome::Failed
        }
        Ok(Err(e)) => {
            report(format!("Error while executing '{}': {}", entry, e));
            EntryOutcome::Failed
        }
        Err(panic) => {
            report(format!(
                "Command panicked while executing '{}': {}",
                entry,
                panic_message(panic.as_ref())
            ));
            EntryOutcome::Failed
        }
    }
}

// --- Pipeline Steps ---

fn substitute_definitions(
    queue: &QueueHandle,
    entry: &ScriptEntry,
    report: &impl Fn(String),
) -> Vec<String> {
    entry
        .arguments()
        .iter()
        .zip(entry.templates())
        .map(|(argument, template)| {
            if template.depth > 0 || !template.has_definitions {
                return argument.clone();
            }
            definitions::substitute(
                argument,
                |name| queue.definition(name),
                |name| report(format!("Unknown definition '%{}%' in '{}'.", name, entry)),
            )
            .into_owned()
        })
        .collect()
}

/// Runs the binding hook. Returns `Some` if the entry must not execute.
fn bind(
    command: &dyn ScriptCommand,
    entry: &mut ScriptEntry,
    args: &mut ParsedArgs,
    report: &impl Fn(String),
) -> Option<EntryOutcome> {
    let result = catch_unwind(AssertUnwindSafe(|| command.parse_args(entry, args)));
    match result {
        Ok(Ok(())) => None,
        Ok(Err(CommandError::InvalidArguments(message))) => {
            report(format!(
                "Invalid arguments in '{}': {}. Usage: {}",
                entry,
                message,
                command.usage()
            ));
            entry.mark_broken();
            Some(EntryOutcome::Broken)
        }
        Ok(Err(e)) => {
            report(format!("Error while binding '{}': {}", entry, e));
            entry.mark_finished();
            Some(EntryOutcome::Failed)
        }
        Err(panic) => {
            report(format!(
                "Command panicked while binding '{}': {}",
                entry,
                panic_message(panic.as_ref())
            ));
            entry.mark_finished();
            Some(EntryOutcome::Failed)
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}
