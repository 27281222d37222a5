// src/tags/mod.rs

//! # Built-in Tags
//!
//! Base resolvers are consulted in the order [`builtin_resolvers`] returns them; value
//! attributes apply to whatever a base resolver produced.

pub mod context;
pub mod definition;
pub mod element;
pub mod proc;
pub mod queue;
pub mod value;

use crate::core::tag_engine::{AttributeHandler, TagResolver};
use std::sync::Arc;

pub fn builtin_resolvers() -> Vec<Arc<dyn TagResolver>> {
    vec![
        Arc::new(definition::DefinitionTag),
        Arc::new(queue::QueueTag),
        Arc::new(queue::SavedEntryTag),
        Arc::new(context::ContextTag),
        Arc::new(element::ElementTag),
        Arc::new(proc::ProcTag::default()),
    ]
}

pub fn builtin_attributes() -> Vec<Arc<dyn AttributeHandler>> {
    vec![Arc::new(value::ValueAttributes)]
}
