// src/constants.rs

use std::time::Duration;

/// The fixed length of one scheduler tick. Queue speeds are expressed in ticks.
pub const TICK_DURATION: Duration = Duration::from_millis(50);

/// The inert placeholder substituted for anything that failed to resolve.
pub const NULL_MARKER: &str = "null";

/// Default queue speed in ticks. Zero (or less) means instant.
pub const DEFAULT_QUEUE_SPEED_TICKS: i64 = 0;

/// Speed (in ticks) an instant queue is forced to when it has to yield mid-drain.
pub const FORCED_TIMED_SPEED_TICKS: i64 = 1;

/// Maximum nesting of tags inside tags before resolution gives up.
pub const MAX_TAG_DEPTH: u32 = 32;

/// Maximum number of `proc[...]` scripts running inside one another.
pub const MAX_PROC_DEPTH: u32 = 8;

/// Upper bound on cached templates and attribute chains. Text past this bound is parsed per call.
pub const MAX_CACHED_TEMPLATES: usize = 16_384;

/// Determinations kept for polling. Past this bound the oldest fire's values are dropped.
pub const MAX_RETAINED_OUTCOMES: usize = 1_024;

/// The name of the engine configuration file.
pub const CONFIG_FILENAME: &str = "tessera.toml";

/// The name of the directory (inside the platform config dir) holding the config file.
pub const CONFIG_DIR_NAME: &str = "tessera";

/// The reserved argument prefix that saves a finished entry on its queue.
pub const SAVE_PREFIX: &str = "save";
