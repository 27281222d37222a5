//! An embeddable runtime for a tag-templated scripting language.
//!
//! Scripts are lists of command entries. Entries run on queues (instantly or one per
//! scheduler period), have their `<tags>` filled just before execution, and are dispatched to
//! registered commands. Start with [`runtime::RuntimeBuilder`].

use std::sync::Arc;
use std::sync::atomic::AtomicBool;
pub type CancellationToken = Arc<AtomicBool>;

pub mod cli;
pub mod commands;
pub mod constants;
pub mod core;
pub mod models;
pub mod runtime;
pub mod system;
pub mod tags;
