// src/core/queue.rs

//! # Script Queues
//!
//! A queue owns an ordered list of pending entries and runs them through the executor.
//!
//! - **Instant** queues drain synchronously inside [`QueueHandle::start`]. If a drain has to
//!   yield (the queue paused, delayed or held itself), the queue is switched to a timed speed
//!   of one tick and finishes on the scheduler.
//! - **Timed** queues run one entry immediately, then one entry per period from a repeating
//!   scheduler unit.
//!
//! The queue lock is only held to read or change queue data. It is never held while an
//! entry executes, while the scheduler is called, or while stop callbacks run.

use crate::{
    core::{
        commons::lock,
        executor,
        scheduler::{Schedulable, UnitHandle},
    },
    models::{QueueKind, QueueState, ScriptEntry},
    runtime::Runtime,
};
use std::{
    collections::{HashMap, VecDeque},
    fmt,
    sync::{
        Arc, Mutex,
        atomic::{AtomicU64, Ordering},
    },
    time::Duration,
};
use uuid::Uuid;

type StopCallback = Box<dyn FnOnce() + Send>;

/// A pluggable source for `<context.name>` values.
pub trait ContextSource: Send + Sync {
    fn value(&self, name: &str) -> Option<String>;
}

impl ContextSource for HashMap<String, String> {
    fn value(&self, name: &str) -> Option<String> {
        self.get(name).cloned()
    }
}

struct ScriptQueue {
    kind: QueueKind,
    state: QueueState,
    paused: bool,
    delay_until: Option<Duration>,
    holds: u32,
    entries: VecDeque<ScriptEntry>,
    definitions: HashMap<String, String>,
    saved: HashMap<String, ScriptEntry>,
    context: Option<Arc<dyn ContextSource>>,
    correlation_id: Uuid,
    off_main: bool,
    unit: Option<UnitHandle>,
    on_stop: Vec<StopCallback>,
}

enum Step {
    Execute(Box<ScriptEntry>),
    /// Nothing may run right now (paused, delayed or held).
    Wait,
    /// No entries are left and nothing holds the queue.
    Finish,
    Halted,
}

impl ScriptQueue {
    fn is_delayed(&self, now: Duration) -> bool {
        self.delay_until.is_some_and(|until| now < until)
    }

    fn next_step(&mut self, now: Duration) -> Step {
        if self.state == QueueState::Stopped {
            return Step::Halted;
        }
        if self.paused || self.is_delayed(now) || self.holds > 0 {
            return Step::Wait;
        }
        match self.entries.pop_front() {
            Some(entry) => Step::Execute(Box::new(entry)),
            None => Step::Finish,
        }
    }

    fn is_finished(&self, now: Duration) -> bool {
        self.state != QueueState::Stopped
            && self.entries.is_empty()
            && self.holds == 0
            && !self.paused
            && !self.is_delayed(now)
    }
}

/// A shared handle to one live queue. Cloning the handle does not clone the queue.
#[derive(Clone)]
pub struct QueueHandle {
    id: Arc<str>,
    inner: Arc<Mutex<ScriptQueue>>,
}

impl fmt::Debug for QueueHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let queue = lock(&self.inner);
        f.debug_struct("QueueHandle")
            .field("id", &self.id)
            .field("kind", &queue.kind)
            .field("state", &queue.state)
            .field("pending", &queue.entries.len())
            .finish()
    }
}

impl QueueHandle {
    pub fn new(id: impl Into<Arc<str>>, kind: QueueKind) -> Self {
        let queue = ScriptQueue {
            kind,
            state: QueueState::Constructing,
            paused: false,
            delay_until: None,
            holds: 0,
            entries: VecDeque::new(),
            definitions: HashMap::new(),
            saved: HashMap::new(),
            context: None,
            correlation_id: Uuid::new_v4(),
            off_main: false,
            unit: None,
            on_stop: Vec::new(),
        };
        Self {
            id: id.into(),
            inner: Arc::new(Mutex::new(queue)),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn id_arc(&self) -> Arc<str> {
        Arc::clone(&self.id)
    }

    /// True if both handles point at the same queue.
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    // --- Speed & State ---

    pub fn kind(&self) -> QueueKind {
        lock(&self.inner).kind
    }

    pub fn set_kind(&self, kind: QueueKind) {
        lock(&self.inner).kind = kind;
    }

    pub fn is_instant_speed(&self) -> bool {
        self.kind().is_instant_speed()
    }

    pub fn state(&self, now: Duration) -> QueueState {
        let queue = lock(&self.inner);
        match queue.state {
            QueueState::Running if queue.paused => QueueState::Paused,
            QueueState::Running if queue.is_delayed(now) => QueueState::Delayed,
            state => state,
        }
    }

    pub fn is_stopped(&self) -> bool {
        lock(&self.inner).state == QueueState::Stopped
    }

    /// Run timed revolutions on a pool worker instead of the ticking thread.
    pub fn set_off_main(&self, off_main: bool) {
        lock(&self.inner).off_main = off_main;
    }

    pub fn set_paused(&self, paused: bool) {
        lock(&self.inner).paused = paused;
    }

    pub fn is_paused(&self) -> bool {
        lock(&self.inner).paused
    }

    /// Delays the queue until `now + duration` (scheduler time).
    pub fn delay_for(&self, duration: Duration, now: Duration) {
        self.delay_until(now.saturating_add(duration));
    }

    pub fn delay_until(&self, deadline: Duration) {
        lock(&self.inner).delay_until = Some(deadline);
    }

    pub fn is_delayed(&self, now: Duration) -> bool {
        lock(&self.inner).is_delayed(now)
    }

    /// Holds the queue until a matching [`Self::release`]. Holds nest.
    pub fn hold(&self) {
        lock(&self.inner).holds += 1;
    }

    /// Returns the number of holds still in place.
    pub fn release(&self) -> u32 {
        let mut queue = lock(&self.inner);
        queue.holds = queue.holds.saturating_sub(1);
        queue.holds
    }

    pub fn holds(&self) -> u32 {
        lock(&self.inner).holds
    }

    // --- Entries ---

    pub fn add_entries(&self, entries: Vec<ScriptEntry>) {
        lock(&self.inner).entries.extend(entries);
    }

    /// Splices entries in at `index` (clamped to the list length). Index `0` runs them next.
    pub fn inject_entries(&self, index: usize, entries: Vec<ScriptEntry>) {
        let mut queue = lock(&self.inner);
        let at = index.min(queue.entries.len());
        for (offset, entry) in entries.into_iter().enumerate() {
            queue.entries.insert(at + offset, entry);
        }
    }

    pub fn len(&self) -> usize {
        lock(&self.inner).entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear_entries(&self) {
        lock(&self.inner).entries.clear();
    }

    pub fn pending_commands(&self) -> Vec<String> {
        lock(&self.inner)
            .entries
            .iter()
            .map(|e| e.command().to_string())
            .collect()
    }

    // --- Definitions, saved entries & context ---

    pub fn define(&self, name: &str, value: impl Into<String>) {
        lock(&self.inner)
            .definitions
            .insert(name.to_lowercase(), value.into());
    }

    pub fn definition(&self, name: &str) -> Option<String> {
        lock(&self.inner)
            .definitions
            .get(&name.to_lowercase())
            .cloned()
    }

    pub fn remove_definition(&self, name: &str) -> Option<String> {
        lock(&self.inner).definitions.remove(&name.to_lowercase())
    }

    /// All definition names, sorted.
    pub fn definition_names(&self) -> Vec<String> {
        let mut names: Vec<String> = lock(&self.inner).definitions.keys().cloned().collect();
        names.sort();
        names
    }

    pub fn save_entry(&self, name: &str, entry: ScriptEntry) {
        lock(&self.inner).saved.insert(name.to_lowercase(), entry);
    }

    pub fn saved_entry(&self, name: &str) -> Option<ScriptEntry> {
        lock(&self.inner).saved.get(&name.to_lowercase()).cloned()
    }

    pub fn set_context_source(&self, source: Arc<dyn ContextSource>) {
        lock(&self.inner).context = Some(source);
    }

    pub fn context_value(&self, name: &str) -> Option<String> {
        // The source is cloned out so host code never runs under the queue lock.
        let source = lock(&self.inner).context.clone()?;
        source.value(name)
    }

    pub fn correlation_id(&self) -> Uuid {
        lock(&self.inner).correlation_id
    }

    pub fn set_correlation_id(&self, id: Uuid) {
        lock(&self.inner).correlation_id = id;
    }

    /// Runs `callback` once the queue stops; immediately if it already has.
    pub fn on_stop(&self, callback: impl FnOnce() + Send + 'static) {
        let mut queue = lock(&self.inner);
        if queue.state == QueueState::Stopped {
            drop(queue);
            callback();
        } else {
            queue.on_stop.push(Box::new(callback));
        }
    }

    // --- Lifecycle ---

    /// Moves the queue from constructing to running and begins executing.
    pub fn start(&self, runtime: &Runtime) {
        {
            let mut queue = lock(&self.inner);
            if queue.state != QueueState::Constructing {
                return;
            }
            queue.state = QueueState::Running;
        }
        log::debug!("Starting queue '{}' ({:?}).", self.id, self.kind());

        if self.is_instant_speed() {
            self.drain(runtime);
        } else {
            self.step(runtime);
            self.ensure_scheduled(runtime);
        }
    }

    /// One revolution: a full drain for instant queues, a single entry for timed ones.
    /// Does nothing while paused, delayed or held.
    pub fn revolve(&self, runtime: &Runtime) {
        if lock(&self.inner).state != QueueState::Running {
            return;
        }
        if self.is_instant_speed() {
            self.drain(runtime);
        } else {
            self.step(runtime);
        }
    }

    fn drain(&self, runtime: &Runtime) {
        loop {
            let step = lock(&self.inner).next_step(runtime.now());
            match step {
                Step::Execute(entry) => {
                    executor::execute_entry(runtime, self, *entry);
                }
                Step::Wait => {
                    log::debug!(
                        "Instant queue '{}' has to wait; continuing on the scheduler.",
                        self.id
                    );
                    self.set_kind(QueueKind::forced_timed());
                    self.ensure_scheduled(runtime);
                    return;
                }
                Step::Finish => {
                    self.stop(runtime);
                    return;
                }
                Step::Halted => return,
            }
        }
    }

    fn step(&self, runtime: &Runtime) {
        let step = lock(&self.inner).next_step(runtime.now());
        match step {
            Step::Execute(entry) => {
                executor::execute_entry(runtime, self, *entry);
                let finished = lock(&self.inner).is_finished(runtime.now());
                if finished {
                    self.stop(runtime);
                }
            }
            Step::Finish => self.stop(runtime),
            Step::Wait | Step::Halted => {}
        }
    }

    fn ensure_scheduled(&self, runtime: &Runtime) {
        let (period, off_main) = {
            let queue = lock(&self.inner);
            if queue.unit.is_some() || queue.state == QueueState::Stopped {
                return;
            }
            (queue.kind.period(), queue.off_main)
        };

        let weak = runtime.weak();
        let queue = self.clone();
        let mut unit = Schedulable::repeating(period, move || {
            if let Some(runtime) = weak.upgrade() {
                queue.revolve(&runtime);
            }
        });
        if off_main {
            unit = unit.asynchronous();
        }
        let handle = runtime.scheduler().schedule(unit);

        let mut queue = lock(&self.inner);
        if queue.unit.is_some() || queue.state == QueueState::Stopped {
            handle.cancel();
        } else {
            queue.unit = Some(handle);
        }
    }

    /// Stops the queue for good: cancels its unit, removes it from the live registry and
    /// runs its stop callbacks. Stopping twice is a no-op.
    pub fn stop(&self, runtime: &Runtime) {
        let (unit, callbacks) = {
            let mut queue = lock(&self.inner);
            if queue.state == QueueState::Stopped {
                return;
            }
            queue.state = QueueState::Stopped;
            queue.entries.clear();
            (queue.unit.take(), std::mem::take(&mut queue.on_stop))
        };
        if let Some(unit) = unit {
            unit.cancel();
        }
        runtime.queues().remove(self);
        if runtime.implementation().debug_enabled() {
            runtime
                .implementation()
                .debug_message(Some(&self.id), "Queue completed.");
        }
        for callback in callbacks {
            callback();
        }
    }
}

// --- REGISTRY ---

/// Live queues by case-insensitive id. A stopped queue is removed; an id maps to at most one
/// live queue.
#[derive(Debug, Default)]
pub struct QueueRegistry {
    queues: Mutex<HashMap<String, QueueHandle>>,
    counter: AtomicU64,
}

impl QueueRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, id: &str) -> Option<QueueHandle> {
        lock(&self.queues).get(&id.to_lowercase()).cloned()
    }

    /// Returns the live queue for `id`, creating it with `kind` if there is none.
    /// The flag is `true` when the queue was created by this call.
    pub fn get_or_create(&self, id: &str, kind: QueueKind) -> (QueueHandle, bool) {
        let mut queues = lock(&self.queues);
        if let Some(existing) = queues.get(&id.to_lowercase()) {
            return (existing.clone(), false);
        }
        let queue = QueueHandle::new(id, kind);
        queues.insert(id.to_lowercase(), queue.clone());
        (queue, true)
    }

    /// Removes `queue` if it is still the live queue for its id.
    pub fn remove(&self, queue: &QueueHandle) -> bool {
        let mut queues = lock(&self.queues);
        let key = queue.id().to_lowercase();
        if queues.get(&key).is_some_and(|live| live.ptr_eq(queue)) {
            queues.remove(&key);
            true
        } else {
            false
        }
    }

    /// A fresh id of the form `prefix_n` that no live queue uses.
    pub fn generate_id(&self, prefix: &str) -> String {
        let queues = lock(&self.queues);
        loop {
            let n = self.counter.fetch_add(1, Ordering::Relaxed) + 1;
            let candidate = format!("{}_{}", prefix, n);
            if !queues.contains_key(&candidate.to_lowercase()) {
                return candidate;
            }
        }
    }

    pub fn ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = lock(&self.queues)
            .values()
            .map(|q| q.id().to_string())
            .collect();
        ids.sort();
        ids
    }

    pub fn all(&self) -> Vec<QueueHandle> {
        lock(&self.queues).values().cloned().collect()
    }

    pub fn len(&self) -> usize {
        lock(&self.queues).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
