// src/system/implementation.rs

//! The host contract. Everything the engine needs from the application embedding it
//! goes through [`Implementation`]; the core never touches a display or host API directly.

use crate::{
    constants::DEFAULT_QUEUE_SPEED_TICKS, core::tag_engine::TagContext, models::EngineConfig,
    models::ScriptEntry,
};
use std::time::Duration;

/// Pluggable host behaviour. Every method has a default so a host only overrides what it needs.
pub trait Implementation: Send + Sync {
    /// Reports an informational debug line.
    fn debug_message(&self, queue: Option<&str>, message: &str) {
        log::debug!("[{}] {}", queue.unwrap_or("-"), message);
    }

    /// Reports a script error. Never fatal.
    fn debug_error(&self, queue: Option<&str>, message: &str) {
        log::error!("[{}] {}", queue.unwrap_or("-"), message);
    }

    /// Reports that an entry is about to execute.
    fn debug_entry(&self, queue: &str, entry: &str) {
        log::debug!("[{}] Executing: {}", queue, entry);
    }

    /// Queue speed (in ticks) used when a script is fired without an explicit speed.
    fn default_queue_speed(&self) -> i64 {
        DEFAULT_QUEUE_SPEED_TICKS
    }

    /// Adds host-specific data to a tag context before an entry (or container) is filled.
    fn prepare_tag_context(&self, _context: &mut TagContext, _entry: Option<&ScriptEntry>) {}

    /// Offers a prefixed argument the command did not declare. Return `true` to consume it.
    fn handle_custom_argument(&self, _entry: &ScriptEntry, _prefix: &str, _value: &str) -> bool {
        false
    }

    /// Deadline for filling one argument's tags. `None` fills inline with no deadline.
    fn tag_timeout(&self) -> Option<Duration> {
        None
    }

    /// Whether per-entry debug lines should be emitted at all.
    fn debug_enabled(&self) -> bool {
        true
    }
}

/// The implementation used by the runner binary: configuration-driven, logs through `log`.
#[derive(Debug, Clone, Default)]
pub struct DefaultImplementation {
    config: EngineConfig,
}

impl DefaultImplementation {
    pub fn new(config: EngineConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }
}

impl Implementation for DefaultImplementation {
    fn default_queue_speed(&self) -> i64 {
        self.config.default_queue_speed
    }

    fn tag_timeout(&self) -> Option<Duration> {
        self.config.tag_timeout_ms.map(Duration::from_millis)
    }

    fn debug_enabled(&self) -> bool {
        self.config.debug
    }
}
