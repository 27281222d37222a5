// src/models.rs

use crate::{
    constants::{DEFAULT_QUEUE_SPEED_TICKS, FORCED_TIMED_SPEED_TICKS},
    core::{blocks::BracedSection, commons::ticks_to_duration},
};
use serde::{Deserialize, Serialize};
use std::{collections::HashMap, fmt, sync::Arc, time::Duration};
use thiserror::Error;
use uuid::Uuid;

// --- CONFIGURATION ---

/// Engine settings read from `tessera.toml`.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(default)]
pub struct EngineConfig {
    /// Queue speed in ticks when a script is fired without one. `0` or less is instant.
    pub default_queue_speed: i64,
    /// Deadline for filling the tags of one argument. Absent means no deadline.
    pub tag_timeout_ms: Option<u64>,
    pub debug: bool,
    /// Length of one runner-loop tick.
    pub tick_rate_ms: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            default_queue_speed: DEFAULT_QUEUE_SPEED_TICKS,
            tag_timeout_ms: None,
            debug: true,
            tick_rate_ms: 50,
        }
    }
}

// --- ENTRIES ---

#[derive(Error, Debug, PartialEq, Eq)]
pub enum EntryError {
    #[error("Line could not be tokenised (unbalanced quotes?): {0}")]
    Unparseable(String),
    #[error("Line contains no command.")]
    Empty,
}

/// Per-argument metadata computed once, when the template entry is built.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArgumentTemplate {
    pub raw: String,
    /// Number of open braces enclosing this token. Braces themselves report the outer depth.
    pub depth: usize,
    pub has_tags: bool,
    pub has_definitions: bool,
}

impl ArgumentTemplate {
    fn analyse(arguments: &[String]) -> Vec<Self> {
        let mut depth = 0usize;
        arguments
            .iter()
            .map(|raw| {
                if raw == "}" {
                    depth = depth.saturating_sub(1);
                }
                let template = Self {
                    raw: raw.clone(),
                    depth,
                    has_tags: raw.contains('<'),
                    has_definitions: raw.matches('%').count() >= 2,
                };
                if raw == "{" {
                    depth += 1;
                }
                template
            })
            .collect()
    }
}

/// One parsed command invocation.
///
/// Templates are stored inside a [`Script`] and never mutated; every fire works on a clone
/// whose arguments are replaced as tags are filled.
#[derive(Debug, Clone)]
pub struct ScriptEntry {
    command: String,
    arguments: Vec<String>,
    templates: Arc<[ArgumentTemplate]>,
    /// Set by the `~` prefix: the queue waits for this entry's work to complete.
    pub wait_for: bool,
    broken: bool,
    finished: bool,
    queue_id: Option<Arc<str>>,
    script: Option<Arc<str>>,
    /// The fire this entry belongs to. Determinations are recorded under it.
    correlation_id: Option<Uuid>,
    objects: HashMap<String, String>,
    blocks: Vec<BracedSection>,
}

impl ScriptEntry {
    /// Builds an entry from an already split command and argument list.
    /// A leading `~` on the command marks the entry as waited-for.
    pub fn new(command: impl Into<String>, arguments: Vec<String>) -> Self {
        let command = command.into();
        let (command, wait_for) = match command.strip_prefix('~') {
            Some(stripped) => (stripped.to_string(), true),
            None => (command, false),
        };
        let templates = ArgumentTemplate::analyse(&arguments).into();
        Self {
            command,
            arguments,
            templates,
            wait_for,
            broken: false,
            finished: false,
            queue_id: None,
            script: None,
            correlation_id: None,
            objects: HashMap::new(),
            blocks: Vec::new(),
        }
    }

    /// Tokenises one script line (`- narrate "hello <def[name]>"`).
    pub fn from_line(line: &str) -> Result<Self, EntryError> {
        let tokens = shlex::split(line.trim())
            .ok_or_else(|| EntryError::Unparseable(line.to_string()))?;
        Self::from_tokens(tokens)
    }

    pub fn from_tokens(tokens: Vec<String>) -> Result<Self, EntryError> {
        let mut tokens = tokens.into_iter().peekable();
        if tokens.peek().is_some_and(|t| t == "-") {
            tokens.next();
        }
        let mut command = tokens.next().ok_or(EntryError::Empty)?;
        if let Some(stripped) = command.strip_prefix('-')
            && !stripped.is_empty()
        {
            command = stripped.to_string();
        }
        // `~ run x` is accepted as well as `~run x`.
        if command == "~" {
            let next = tokens.next().ok_or(EntryError::Empty)?;
            command = format!("~{}", next);
        }
        Ok(Self::new(command, tokens.collect()))
    }

    pub fn command(&self) -> &str {
        &self.command
    }

    pub fn arguments(&self) -> &[String] {
        &self.arguments
    }

    pub fn templates(&self) -> &[ArgumentTemplate] {
        &self.templates
    }

    pub fn set_arguments(&mut self, arguments: Vec<String>) {
        self.arguments = arguments;
    }

    /// `true` if any top-level argument may carry a `%name%` definition.
    pub fn has_definitions(&self) -> bool {
        self.templates
            .iter()
            .any(|t| t.depth == 0 && t.has_definitions)
    }

    pub fn has_tags(&self) -> bool {
        self.templates.iter().any(|t| t.has_tags)
    }

    pub fn has_braces(&self) -> bool {
        self.arguments.iter().any(|a| a == "{")
    }

    pub fn is_broken(&self) -> bool {
        self.broken
    }

    pub fn mark_broken(&mut self) {
        self.broken = true;
        self.finished = true;
    }

    pub fn is_finished(&self) -> bool {
        self.finished
    }

    pub fn mark_finished(&mut self) {
        self.finished = true;
    }

    pub fn queue_id(&self) -> Option<&str> {
        self.queue_id.as_deref()
    }

    pub fn set_queue_id(&mut self, id: Arc<str>) {
        self.queue_id = Some(id);
    }

    pub fn script(&self) -> Option<&str> {
        self.script.as_deref()
    }

    pub fn set_script(&mut self, script: Arc<str>) {
        self.script = Some(script);
    }

    pub fn correlation_id(&self) -> Option<Uuid> {
        self.correlation_id
    }

    pub fn set_correlation_id(&mut self, id: Option<Uuid>) {
        self.correlation_id = id;
    }

    /// Stores a value bound by the command's argument hook for its execution hook.
    pub fn set_object(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.objects.insert(key.into(), value.into());
    }

    pub fn object(&self, key: &str) -> Option<&str> {
        self.objects.get(key).map(String::as_str)
    }

    pub fn blocks(&self) -> &[BracedSection] {
        &self.blocks
    }

    pub fn set_blocks(&mut self, blocks: Vec<BracedSection>) {
        self.blocks = blocks;
    }
}

impl fmt::Display for ScriptEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.wait_for {
            f.write_str("~")?;
        }
        f.write_str(&self.command)?;
        for argument in &self.arguments {
            if argument.is_empty() || argument.contains(char::is_whitespace) {
                write!(f, " \"{}\"", argument.replace('"', "\\\""))?;
            } else {
                write!(f, " {}", argument)?;
            }
        }
        Ok(())
    }
}

// --- SCRIPTS ---

/// A named, immutable list of template entries.
#[derive(Debug, Clone)]
pub struct Script {
    pub name: String,
    pub entries: Arc<[ScriptEntry]>,
}

impl Script {
    pub fn new(name: impl Into<String>, entries: Vec<ScriptEntry>) -> Self {
        Self {
            name: name.into(),
            entries: entries.into(),
        }
    }

    /// Builds a script from source lines. Blank lines and `#` comments are skipped, and a
    /// line that opens a brace continues until its braces are balanced again.
    pub fn from_lines<'a>(
        name: impl Into<String>,
        lines: impl IntoIterator<Item = &'a str>,
    ) -> Result<Self, EntryError> {
        let mut entries = Vec::new();
        let mut pending: Vec<String> = Vec::new();
        let mut depth = 0usize;

        for line in lines {
            let trimmed = line.trim();
            if trimmed.is_empty() || trimmed.starts_with('#') {
                continue;
            }
            let tokens = shlex::split(trimmed)
                .ok_or_else(|| EntryError::Unparseable(trimmed.to_string()))?;
            for token in &tokens {
                match token.as_str() {
                    "{" => depth += 1,
                    "}" => depth = depth.saturating_sub(1),
                    _ => {}
                }
            }
            pending.extend(tokens);
            if depth == 0 {
                entries.push(ScriptEntry::from_tokens(std::mem::take(&mut pending))?);
            }
        }
        if !pending.is_empty() {
            // An unclosed brace is reported when the block is built.
            entries.push(ScriptEntry::from_tokens(pending)?);
        }
        Ok(Self::new(name, entries))
    }

    /// Clones the templates into fresh entries for one run, tagged with the fire's
    /// correlation id.
    pub fn instantiate(&self, correlation_id: Option<Uuid>) -> Vec<ScriptEntry> {
        let name: Arc<str> = Arc::from(self.name.as_str());
        self.entries
            .iter()
            .map(|template| {
                let mut entry = template.clone();
                entry.set_script(Arc::clone(&name));
                entry.set_correlation_id(correlation_id);
                entry
            })
            .collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

// --- QUEUES ---

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum QueueState {
    Constructing,
    Running,
    Paused,
    Delayed,
    Stopped,
}

impl fmt::Display for QueueState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Constructing => "constructing",
            Self::Running => "running",
            Self::Paused => "paused",
            Self::Delayed => "delayed",
            Self::Stopped => "stopped",
        };
        f.write_str(name)
    }
}

/// How a queue advances: drained synchronously, or one entry per period.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueueKind {
    Instant,
    Timed { ticks: i64 },
}

impl QueueKind {
    pub fn from_speed(ticks: i64) -> Self {
        if ticks <= 0 {
            Self::Instant
        } else {
            Self::Timed { ticks }
        }
    }

    /// The speed an instant queue takes when it has to yield mid-drain.
    pub fn forced_timed() -> Self {
        Self::Timed {
            ticks: FORCED_TIMED_SPEED_TICKS,
        }
    }

    pub fn ticks(self) -> i64 {
        match self {
            Self::Instant => 0,
            Self::Timed { ticks } => ticks,
        }
    }

    /// True iff the configured period is zero or negative.
    pub fn is_instant_speed(self) -> bool {
        self.ticks() <= 0
    }

    pub fn period(self) -> Duration {
        ticks_to_duration(self.ticks())
    }
}
