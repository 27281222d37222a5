// src/runtime.rs

//! # Runtime
//!
//! The one value that owns every piece of engine state: the scheduler, the tag engine, the
//! command registry, the live queues, the registered scripts and the outcome store. Build one
//! with [`RuntimeBuilder`]; separate runtimes share nothing.

use crate::{
    commands::{CommandRegistry, RegistryError, ScriptCommand, builtin_commands},
    core::{
        commons::lock,
        outcome::OutcomeStore,
        queue::{ContextSource, QueueHandle, QueueRegistry},
        scheduler::Scheduler,
        tag_engine::{AttributeHandler, TagContext, TagEngine, TagResolver},
    },
    models::{QueueKind, Script, ScriptEntry},
    system::implementation::Implementation,
    tags,
};
use std::{
    collections::HashMap,
    fmt,
    sync::{Arc, Mutex, Weak},
    time::Duration,
};
use uuid::Uuid;

// --- FIRING ---

/// What to fire: a registered script by name, or a script value.
#[derive(Debug, Clone)]
pub enum ScriptSource {
    Named(String),
    Script(Script),
}

impl From<&str> for ScriptSource {
    fn from(name: &str) -> Self {
        Self::Named(name.to_string())
    }
}

impl From<String> for ScriptSource {
    fn from(name: String) -> Self {
        Self::Named(name)
    }
}

impl From<Script> for ScriptSource {
    fn from(script: Script) -> Self {
        Self::Script(script)
    }
}

/// How a script is fired. Everything is optional.
#[derive(Clone, Default)]
pub struct FireOptions {
    /// Queue id. A live queue with this id receives the entries instead of a new one.
    pub id: Option<String>,
    /// Queue speed in ticks. Defaults to the implementation's default speed.
    pub speed: Option<i64>,
    pub definitions: Vec<(String, String)>,
    pub context: Option<Arc<dyn ContextSource>>,
    pub off_main: bool,
}

impl fmt::Debug for FireOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FireOptions")
            .field("id", &self.id)
            .field("speed", &self.speed)
            .field("definitions", &self.definitions)
            .field("context", &self.context.is_some())
            .field("off_main", &self.off_main)
            .finish()
    }
}

impl FireOptions {
    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    pub fn with_speed(mut self, ticks: i64) -> Self {
        self.speed = Some(ticks);
        self
    }

    pub fn define(mut self, name: &str, value: impl Into<String>) -> Self {
        self.definitions.push((name.to_string(), value.into()));
        self
    }

    pub fn with_context(mut self, source: Arc<dyn ContextSource>) -> Self {
        self.context = Some(source);
        self
    }

    pub fn off_main(mut self) -> Self {
        self.off_main = true;
        self
    }
}

#[derive(Debug, Clone)]
pub struct FireResult {
    pub queue: QueueHandle,
    pub queue_id: String,
    pub correlation_id: Uuid,
    /// Determinations made during the queue's first revolution.
    pub outcome: Option<Vec<String>>,
}

// --- BUILDER ---

pub struct RuntimeBuilder {
    implementation: Arc<dyn Implementation>,
    commands: Vec<Arc<dyn ScriptCommand>>,
    resolvers: Vec<Arc<dyn TagResolver>>,
    attributes: Vec<Arc<dyn AttributeHandler>>,
}

impl fmt::Debug for RuntimeBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RuntimeBuilder")
            .field(
                "commands",
                &self.commands.iter().map(|c| c.name()).collect::<Vec<_>>(),
            )
            .field(
                "resolvers",
                &self.resolvers.iter().map(|r| r.name()).collect::<Vec<_>>(),
            )
            .field("attributes", &self.attributes.len())
            .finish()
    }
}

impl RuntimeBuilder {
    pub fn new(implementation: Arc<dyn Implementation>) -> Self {
        Self {
            implementation,
            commands: Vec::new(),
            resolvers: Vec::new(),
            attributes: Vec::new(),
        }
    }

    /// Adds the built-in commands, tag resolvers and value attributes.
    pub fn with_builtins(mut self) -> Self {
        self.commands.extend(builtin_commands());
        self.resolvers.extend(tags::builtin_resolvers());
        self.attributes.extend(tags::builtin_attributes());
        self
    }

    pub fn command(mut self, command: Arc<dyn ScriptCommand>) -> Self {
        self.commands.push(command);
        self
    }

    pub fn resolver(mut self, resolver: Arc<dyn TagResolver>) -> Self {
        self.resolvers.push(resolver);
        self
    }

    pub fn attribute(mut self, handler: Arc<dyn AttributeHandler>) -> Self {
        self.attributes.push(handler);
        self
    }

    /// Fails if two commands claim the same name or alias.
    pub fn build(self) -> Result<Arc<Runtime>, RegistryError> {
        let mut commands = CommandRegistry::new();
        for command in self.commands {
            commands.register(command)?;
        }

        let mut engine = TagEngine::new(Arc::clone(&self.implementation));
        for resolver in self.resolvers {
            engine.register_resolver(resolver);
        }
        for handler in self.attributes {
            engine.register_attribute(handler);
        }
        log::debug!(
            "Built runtime with {} command name(s) and {:?}.",
            commands.len(),
            engine
        );

        Ok(Arc::new_cyclic(|this| Runtime {
            this: this.clone(),
            implementation: self.implementation,
            scheduler: Scheduler::new(),
            tags: Arc::new(engine),
            commands,
            queues: QueueRegistry::new(),
            scripts: Mutex::new(HashMap::new()),
            outcomes: OutcomeStore::new(),
        }))
    }
}

// --- RUNTIME ---

pub struct Runtime {
    this: Weak<Runtime>,
    implementation: Arc<dyn Implementation>,
    scheduler: Scheduler,
    tags: Arc<TagEngine>,
    commands: CommandRegistry,
    queues: QueueRegistry,
    scripts: Mutex<HashMap<String, Script>>,
    outcomes: OutcomeStore,
}

impl fmt::Debug for Runtime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Runtime")
            .field("now", &self.now())
            .field("scheduler", &self.scheduler)
            .field("commands", &self.commands)
            .field("queues", &self.queues.ids())
            .field("scripts", &lock(&self.scripts).len())
            .finish()
    }
}

impl Runtime {
    /// A non-owning handle for callbacks that outlive the current call.
    pub fn weak(&self) -> Weak<Runtime> {
        self.this.clone()
    }

    pub fn implementation(&self) -> &dyn Implementation {
        self.implementation.as_ref()
    }

    pub fn scheduler(&self) -> &Scheduler {
        &self.scheduler
    }

    pub fn tags(&self) -> &Arc<TagEngine> {
        &self.tags
    }

    pub fn commands(&self) -> &CommandRegistry {
        &self.commands
    }

    pub fn queues(&self) -> &QueueRegistry {
        &self.queues
    }

    pub fn outcomes(&self) -> &OutcomeStore {
        &self.outcomes
    }

    // --- Time ---

    pub fn now(&self) -> Duration {
        self.scheduler.now()
    }

    /// Advances the scheduler. Call once per host tick from a single thread.
    pub fn tick(&self, elapsed: Duration) {
        self.scheduler.tick(elapsed);
    }

    // --- Queues ---

    pub fn queue(&self, id: &str) -> Option<QueueHandle> {
        self.queues.get(id)
    }

    /// The lookup-or-create factory. The flag is `true` if the queue is new (and not yet started).
    pub fn queue_or_create(&self, id: &str, kind: QueueKind) -> (QueueHandle, bool) {
        self.queues.get_or_create(id, kind)
    }

    pub fn generate_queue_id(&self, prefix: &str) -> String {
        self.queues.generate_id(prefix)
    }

    pub fn live_queue_ids(&self) -> Vec<String> {
        self.queues.ids()
    }

    /// Releases one hold on a live queue. Returns `false` if no such queue is live.
    pub fn release_hold(&self, queue_id: &str) -> bool {
        match self.queue(queue_id) {
            Some(queue) => {
                let remaining = queue.release();
                log::trace!("Released hold on '{}' ({} left).", queue_id, remaining);
                true
            }
            None => false,
        }
    }

    // --- Scripts ---

    /// Registers (or replaces) a script under its case-insensitive name.
    pub fn register_script(&self, script: Script) {
        log::debug!("Registered script '{}' ({} entries).", script.name, script.len());
        lock(&self.scripts).insert(script.name.to_lowercase(), script);
    }

    pub fn script(&self, name: &str) -> Option<Script> {
        lock(&self.scripts).get(&name.to_lowercase()).cloned()
    }

    /// Instantiates a script onto a queue and starts it.
    ///
    /// Every fire gets its own correlation id, carried by the instantiated entries. If
    /// `options.id` names a live queue, the entries are appended to it without restarting it.
    pub fn fire_script(
        &self,
        source: impl Into<ScriptSource>,
        options: FireOptions,
    ) -> Result<FireResult, RegistryError> {
        let script = match source.into() {
            ScriptSource::Named(name) => self
                .script(&name)
                .ok_or(RegistryError::UnknownScript(name))?,
            ScriptSource::Script(script) => script,
        };

        let speed = options
            .speed
            .unwrap_or_else(|| self.implementation.default_queue_speed());
        let id = match options.id {
            Some(id) => id,
            None => self.generate_queue_id(&script.name.to_lowercase()),
        };
        let (queue, created) = self.queue_or_create(&id, QueueKind::from_speed(speed));
        let correlation_id = Uuid::new_v4();
        if created {
            queue.set_correlation_id(correlation_id);
        }
        for (name, value) in options.definitions {
            queue.define(&name, value);
        }
        if let Some(source) = options.context {
            queue.set_context_source(source);
        }
        if options.off_main {
            queue.set_off_main(true);
        }
        queue.add_entries(script.instantiate(Some(correlation_id)));
        log::debug!(
            "Fired '{}' on {} queue '{}'.",
            script.name,
            if created { "new" } else { "existing" },
            queue.id()
        );

        if created {
            queue.start(self);
        }
        let outcome = if queue.is_stopped() {
            self.outcomes.take(correlation_id)
        } else {
            self.outcomes.get(correlation_id)
        };

        Ok(FireResult {
            queue_id: queue.id().to_string(),
            queue,
            correlation_id,
            outcome,
        })
    }

    /// Peeks at the determinations of a fire.
    pub fn outcome(&self, correlation_id: Uuid) -> Option<Vec<String>> {
        self.outcomes.get(correlation_id)
    }

    /// Removes and returns the determinations of a fire. Hosts polling a finished script
    /// should use this so the store does not grow.
    pub fn take_outcome(&self, correlation_id: Uuid) -> Option<Vec<String>> {
        self.outcomes.take(correlation_id)
    }

    // --- Tags ---

    /// The tag context for filling `entry` on `queue`, after the host has had its say.
    pub fn tag_context(&self, queue: Option<&QueueHandle>, entry: Option<&ScriptEntry>) -> TagContext {
        let mut context = TagContext::new().with_runtime(self.weak());
        if let Some(queue) = queue {
            context = context.with_queue(queue.clone());
        }
        if let Some(entry) = entry {
            context = context.with_entry(entry.to_string());
            context.script = entry.script().map(str::to_string);
        }
        self.implementation.prepare_tag_context(&mut context, entry);
        context
    }

    /// Fills the tags of free text, outside any entry.
    pub fn fill_tags(&self, text: &str, queue: Option<&QueueHandle>) -> String {
        let context = self.tag_context(queue, None);
        self.tags.evaluate_bounded(text, &context)
    }

    // --- Teardown ---

    /// Stops every live queue and drops every scheduled unit.
    pub fn shutdown(&self) {
        let queues = self.queues.all();
        log::debug!("Shutting down {} live queue(s).", queues.len());
        for queue in queues {
            queue.stop(self);
        }
        self.scheduler.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::constants::TICK_DURATION;
    use crate::test_support::TestRig;

    #[test]
    fn test_definition_tag_scenario() {
        let rig = TestRig::new();
        rig.run_lines(&["define x 5", "narrate <def[x]>"]);
        assert_eq!(rig.narrated(), vec!["5"]);
    }

    #[test]
    fn test_bogus_tag_scenario() {
        let rig = TestRig::new();
        rig.run_lines(&["narrate value=<bogus.tag>", "narrate next"]);
        assert_eq!(rig.narrated(), vec!["value=null", "next"]);
        let errors = rig.errors();
        assert_eq!(errors.len(), 1);
        assert!(errors[0].contains("bogus.tag"));
    }

    #[test]
    fn test_unknown_script_is_an_error() {
        let rig = TestRig::new();
        assert_eq!(
            rig.runtime
                .fire_script("nothing", FireOptions::default())
                .err(),
            Some(RegistryError::UnknownScript("nothing".into()))
        );
    }

    #[test]
    fn test_fire_script_value_with_definitions() {
        let rig = TestRig::new();
        let script = Script::from_lines("inline", ["narrate <def[who]>"]).unwrap();
        let result = rig
            .runtime
            .fire_script(script, FireOptions::default().define("Who", "me"))
            .unwrap();
        assert!(result.queue_id.starts_with("inline_"));
        assert!(result.queue.is_stopped());
        assert_eq!(rig.narrated(), vec!["me"]);
    }

    #[test]
    fn test_each_fire_gets_its_own_correlation_id() {
        let rig = TestRig::new();
        rig.register("answer", &["determine yes"]);
        let a = rig.runtime.fire_script("answer", FireOptions::default()).unwrap();
        let b = rig.runtime.fire_script("answer", FireOptions::default()).unwrap();
        assert_ne!(a.correlation_id, b.correlation_id);
        assert_ne!(a.queue_id, b.queue_id);
        assert_eq!(a.outcome, Some(vec!["yes".to_string()]));
        assert_eq!(b.outcome, Some(vec!["yes".to_string()]));
    }

    #[test]
    fn test_late_determination_is_polled_by_correlation_id() {
        let rig = TestRig::new();
        rig.register("later", &["wait 1t", "determine done"]);
        let result = rig.runtime.fire_script("later", FireOptions::default()).unwrap();
        assert_eq!(result.outcome, None);
        rig.runtime.tick(TICK_DURATION);
        assert_eq!(
            rig.runtime.outcome(result.correlation_id),
            Some(vec!["done".to_string()])
        );
    }

    #[test]
    fn test_polled_outcomes_do_not_accumulate() {
        let rig = TestRig::new();
        rig.register("later", &["wait 1t", "determine done"]);
        for _ in 0..20 {
            let result = rig.runtime.fire_script("later", FireOptions::default()).unwrap();
            rig.runtime.tick(TICK_DURATION);
            assert!(result.queue.is_stopped());
            assert_eq!(
                rig.runtime.take_outcome(result.correlation_id),
                Some(vec!["done".to_string()])
            );
        }
        assert!(rig.runtime.live_queue_ids().is_empty());
        assert!(rig.runtime.outcomes().is_empty());
    }

    #[test]
    fn test_fires_sharing_a_queue_keep_their_own_outcomes() {
        let rig = TestRig::new();
        rig.register("first", &["wait 1t", "determine passively mine"]);
        rig.register("second", &["determine theirs"]);
        let a = rig
            .runtime
            .fire_script("first", FireOptions::default().with_id("shared"))
            .unwrap();
        let b = rig
            .runtime
            .fire_script("second", FireOptions::default().with_id("shared"))
            .unwrap();
        assert!(a.queue.ptr_eq(&b.queue));
        assert_ne!(a.correlation_id, b.correlation_id);

        for _ in 0..3 {
            rig.runtime.tick(TICK_DURATION);
        }
        assert!(a.queue.is_stopped());
        assert_eq!(rig.runtime.take_outcome(a.correlation_id), Some(vec!["mine".to_string()]));
        assert_eq!(rig.runtime.take_outcome(b.correlation_id), Some(vec!["theirs".to_string()]));
    }

    #[test]
    fn test_firing_onto_live_queue_appends() {
        let rig = TestRig::new();
        rig.register("first", &["narrate one", "wait 1t", "narrate two"]);
        rig.register("second", &["narrate three"]);
        let a = rig
            .runtime
            .fire_script("first", FireOptions::default().with_id("shared"))
            .unwrap();
        let b = rig
            .runtime
            .fire_script("second", FireOptions::default().with_id("SHARED"))
            .unwrap();
        assert!(a.queue.ptr_eq(&b.queue));
        assert_ne!(a.correlation_id, b.correlation_id);
        assert_eq!(rig.narrated(), vec!["one"]);

        for _ in 0..3 {
            rig.runtime.tick(TICK_DURATION);
        }
        assert_eq!(rig.narrated(), vec!["one", "two", "three"]);
    }

    #[test]
    fn test_release_hold_resumes_queue() {
        let rig = TestRig::new();
        rig.register("held", &["narrate a", "narrate b"]);
        let (queue, _) = rig
            .runtime
            .queue_or_create("held", QueueKind::Timed { ticks: 1 });
        queue.hold();
        queue.add_entries(rig.runtime.script("held").unwrap().instantiate(None));
        queue.start(&rig.runtime);
        rig.runtime.tick(TICK_DURATION);
        assert!(rig.narrated().is_empty());

        assert!(rig.runtime.release_hold("HELD"));
        assert!(!rig.runtime.release_hold("missing"));
        rig.runtime.tick(TICK_DURATION);
        rig.runtime.tick(TICK_DURATION);
        assert_eq!(rig.narrated(), vec!["a", "b"]);
    }

    #[test]
    fn test_off_main_queue_revolves_on_a_worker() {
        let rig = TestRig::new();
        rig.register("bg", &["narrate first", "narrate second"]);
        let result = rig
            .runtime
            .fire_script("bg", FireOptions::default().with_speed(1).off_main())
            .unwrap();
        assert_eq!(rig.narrated(), vec!["first"]);

        for _ in 0..200 {
            rig.runtime.tick(TICK_DURATION);
            if result.queue.is_stopped() {
                break;
            }
            std::thread::sleep(Duration::from_millis(5));
        }
        assert!(result.queue.is_stopped());
        assert_eq!(rig.narrated(), vec!["first", "second"]);
    }

    #[test]
    fn test_shutdown_stops_everything() {
        let rig = TestRig::new();
        rig.register("slow", &["wait 10s", "narrate never"]);
        rig.fire("slow");
        rig.fire("slow");
        assert_eq!(rig.runtime.live_queue_ids().len(), 2);

        rig.runtime.shutdown();
        assert!(rig.runtime.live_queue_ids().is_empty());
        assert!(rig.runtime.scheduler().is_empty());
        rig.runtime.tick(Duration::from_secs(20));
        assert!(rig.narrated().is_empty());
    }

    #[test]
    fn test_duplicate_command_fails_build() {
        let implementation: Arc<dyn Implementation> =
            Arc::new(crate::test_support::RecordingImplementation::default());
        let result = RuntimeBuilder::new(implementation)
            .with_builtins()
            .command(Arc::new(crate::commands::wait::WaitCommand))
            .build();
        assert_eq!(
            result.err(),
            Some(RegistryError::DuplicateCommand("wait".into()))
        );
    }

    #[test]
    fn test_fill_tags_outside_entries() {
        let rig = TestRig::new();
        assert_eq!(
            rig.runtime.fill_tags("<element[x].to_uppercase>!", None),
            "X!"
        );
    }
}
