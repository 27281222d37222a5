// src/core/tag_engine.rs

//! # Tag Engine
//!
//! Turns literal text containing `<...>` placeholders into fully substituted text.
//!
//! Every tag body is resolved by firing an ordered lookup over the registered
//! [`TagResolver`]s; the first one to produce a value wins and reports how many leading
//! attribute components it consumed. Any remaining components are then handed to the
//! registered [`AttributeHandler`]s, one step at a time, until the chain is exhausted.
//!
//! Resolution failures never abort the caller: the fallback clause (`<tag||fallback>`) is used
//! when present, otherwise an error is reported and the inert `null` marker is substituted.
//!
//! While resolution is in flight, resolved values are kept sentinel-escaped (see
//! [`escape`](crate::core::escape)) so they are never re-read as syntax; the top-level entry
//! points unescape once at the very end.

use crate::{
    CancellationToken,
    constants::{MAX_TAG_DEPTH, NULL_MARKER},
    core::{
        attribute::{AttributeCache, AttributeChain, Cursor},
        escape::{escape, unescape},
        queue::QueueHandle,
        tag_parser::{PieceCache, TagBody, TagPiece},
    },
    runtime::Runtime,
    system::implementation::Implementation,
};
use std::{
    cell::{OnceCell, RefCell},
    fmt,
    sync::{
        Arc, Weak,
        atomic::{AtomicBool, Ordering},
        mpsc,
    },
    time::{Duration, Instant},
};

// --- CONTRACTS ---

/// The outcome of one resolver or attribute step: the produced value and the advanced cursor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resolved {
    pub value: String,
    pub cursor: Cursor,
}

impl Resolved {
    pub fn new(value: impl Into<String>, cursor: Cursor) -> Self {
        Self {
            value: value.into(),
            cursor,
        }
    }
}

/// Resolves the base of a tag (`def[x]`, `queue`, `context.name`, ...).
///
/// Return `None` to defer to the next resolver.
pub trait TagResolver: Send + Sync {
    /// A short name, used only in diagnostics.
    fn name(&self) -> &'static str;

    fn resolve(&self, lookup: &TagLookup<'_>, cursor: Cursor) -> Option<Resolved>;
}

/// Applies one (or more) further attribute components to an already resolved value.
pub trait AttributeHandler: Send + Sync {
    fn apply(&self, value: &str, lookup: &TagLookup<'_>, cursor: Cursor) -> Option<Resolved>;
}

/// Everything a resolver may need to know about where a tag is being evaluated.
#[derive(Clone, Default)]
pub struct TagContext {
    pub queue: Option<QueueHandle>,
    /// Literal text of the originating entry, for diagnostics.
    pub entry: Option<String>,
    pub script: Option<String>,
    pub runtime: Option<Weak<Runtime>>,
    pub cancel: CancellationToken,
    /// Past this instant the evaluation counts as cancelled.
    pub deadline: Option<Instant>,
}

impl fmt::Debug for TagContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TagContext")
            .field("queue", &self.queue_id())
            .field("entry", &self.entry)
            .field("script", &self.script)
            .field("cancelled", &self.is_cancelled())
            .finish()
    }
}

impl TagContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_queue(mut self, queue: QueueHandle) -> Self {
        self.queue = Some(queue);
        self
    }

    pub fn with_entry(mut self, entry: impl Into<String>) -> Self {
        self.entry = Some(entry.into());
        self
    }

    pub fn with_runtime(mut self, runtime: Weak<Runtime>) -> Self {
        self.runtime = Some(runtime);
        self
    }

    pub fn queue_id(&self) -> Option<&str> {
        self.queue.as_ref().map(QueueHandle::id)
    }

    pub fn runtime(&self) -> Option<Arc<Runtime>> {
        self.runtime.as_ref().and_then(Weak::upgrade)
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.load(Ordering::Relaxed)
            || self.deadline.is_some_and(|deadline| Instant::now() >= deadline)
    }

    fn bounded_by(&self, bound: &Bound) -> Self {
        let mut context = self.clone();
        context.cancel = Arc::clone(&bound.cancel);
        context.deadline = bound.deadline;
        context
    }
}

// --- BOUNDED EVALUATION ---

/// The cancellation token and deadline of the bounded evaluation running on this thread.
#[derive(Clone)]
struct Bound {
    cancel: CancellationToken,
    /// `None` if the timeout is too large to represent.
    deadline: Option<Instant>,
}

impl Bound {
    fn starting_now(timeout: Duration) -> Self {
        Self {
            cancel: Arc::new(AtomicBool::new(false)),
            deadline: Instant::now().checked_add(timeout),
        }
    }
}

thread_local! {
    static ACTIVE_BOUND: RefCell<Option<Bound>> = const { RefCell::new(None) };
}

/// Restores the previous thread bound when dropped.
struct BoundGuard(Option<Bound>);

impl BoundGuard {
    fn enter(bound: &Bound) -> Self {
        Self(ACTIVE_BOUND.with(|active| active.replace(Some(bound.clone()))))
    }
}

impl Drop for BoundGuard {
    fn drop(&mut self) {
        let previous = self.0.take();
        ACTIVE_BOUND.with(|active| *active.borrow_mut() = previous);
    }
}

fn active_bound() -> Option<Bound> {
    ACTIVE_BOUND.with(|active| active.borrow().clone())
}

// --- LOOKUP ---

/// A single in-flight tag lookup: the shared, immutable chain plus lazily evaluated contexts.
///
/// Bracket contexts are tag text themselves; each one is evaluated the first time a
/// resolver reads it and memoized by component index.
pub struct TagLookup<'a> {
    engine: &'a TagEngine,
    chain: Arc<AttributeChain>,
    contexts: Vec<OnceCell<String>>,
    context: &'a TagContext,
    depth: u32,
}

impl fmt::Debug for TagLookup<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TagLookup")
            .field("chain", &self.chain.raw())
            .field("depth", &self.depth)
            .finish()
    }
}

impl<'a> TagLookup<'a> {
    fn new(
        engine: &'a TagEngine,
        chain: Arc<AttributeChain>,
        context: &'a TagContext,
        depth: u32,
    ) -> Self {
        let contexts = (0..chain.len()).map(|_| OnceCell::new()).collect();
        Self {
            engine,
            chain,
            contexts,
            context,
            depth,
        }
    }

    pub fn chain(&self) -> &AttributeChain {
        &self.chain
    }

    pub fn len(&self) -> usize {
        self.chain.len()
    }

    pub fn is_empty(&self) -> bool {
        self.chain.is_empty()
    }

    /// True once every component has been consumed.
    pub fn is_complete(&self, cursor: Cursor) -> bool {
        cursor.position() >= self.chain.len()
    }

    /// The key of the component at the cursor.
    pub fn key(&self, cursor: Cursor) -> Option<&str> {
        self.chain
            .component(cursor.position())
            .map(|c| c.key.as_str())
    }

    /// Case-insensitive key comparison at the cursor.
    pub fn key_is(&self, cursor: Cursor, name: &str) -> bool {
        self.key(cursor).is_some_and(|k| k.eq_ignore_ascii_case(name))
    }

    pub fn has_context(&self, cursor: Cursor) -> bool {
        self.chain
            .component(cursor.position())
            .is_some_and(|c| c.context.is_some())
    }

    /// The evaluated, unescaped bracket context of the component at the cursor.
    pub fn context(&self, cursor: Cursor) -> Option<&str> {
        let index = cursor.position();
        let raw = self.chain.component(index)?.context.as_deref()?;
        let cell = self.contexts.get(index)?;
        let value = cell.get_or_init(|| {
            let rendered = self.engine.render_text(raw, self.context, self.depth);
            unescape(&rendered).into_owned()
        });
        Some(value.as_str())
    }

    pub fn tag_context(&self) -> &TagContext {
        self.context
    }

    pub fn engine(&self) -> &TagEngine {
        self.engine
    }
}

// --- ENGINE ---

/// The tag resolution engine. Owned by the [`Runtime`]; holds the resolver registry and caches.
pub struct TagEngine {
    resolvers: Vec<Arc<dyn TagResolver>>,
    attributes: Vec<Arc<dyn AttributeHandler>>,
    pieces: PieceCache,
    chains: AttributeCache,
    implementation: Arc<dyn Implementation>,
    timeout: Option<Duration>,
}

impl fmt::Debug for TagEngine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TagEngine")
            .field(
                "resolvers",
                &self.resolvers.iter().map(|r| r.name()).collect::<Vec<_>>(),
            )
            .field("attributes", &self.attributes.len())
            .field("cached_templates", &self.pieces.len())
            .field("timeout", &self.timeout)
            .finish()
    }
}

impl TagEngine {
    pub fn new(implementation: Arc<dyn Implementation>) -> Self {
        let timeout = implementation.tag_timeout();
        Self {
            resolvers: Vec::new(),
            attributes: Vec::new(),
            pieces: PieceCache::new(),
            chains: AttributeCache::new(),
            implementation,
            timeout,
        }
    }

    /// Appends a resolver. Resolvers are consulted in registration order.
    pub fn register_resolver(&mut self, resolver: Arc<dyn TagResolver>) {
        self.resolvers.push(resolver);
    }

    /// Appends an attribute handler. Handlers are consulted in registration order.
    pub fn register_attribute(&mut self, handler: Arc<dyn AttributeHandler>) {
        self.attributes.push(handler);
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.timeout
    }

    /// Returns the cached piece sequence for `text`.
    pub fn parse(&self, text: &str) -> Arc<[TagPiece]> {
        self.pieces.get_or_parse(text)
    }

    /// Fully resolves `text` and restores every escaped character.
    pub fn evaluate(&self, text: &str, context: &TagContext) -> String {
        if !text.contains('<') {
            return unescape(text).into_owned();
        }
        let rendered = self.render_text(text, context, 0);
        unescape(&rendered).into_owned()
    }

    /// Evaluates an already parsed piece sequence.
    pub fn evaluate_pieces(&self, pieces: &[TagPiece], context: &TagContext) -> String {
        let rendered = self.render(pieces, context, 0);
        unescape(&rendered).into_owned()
    }

    /// Resolves a single tag body (the text between the angle brackets).
    pub fn resolve_tag(&self, body: &str, context: &TagContext) -> String {
        let rendered = self.resolve_body(&TagBody::new(body), context, 1);
        unescape(&rendered).into_owned()
    }

    /// Like [`Self::evaluate`], but bounded by the configured timeout.
    ///
    /// From an ordinary thread the work runs on a pool worker. On timeout the worker's
    /// cancellation token is set, the partial result is discarded and `null` is returned.
    /// Cancellation is cooperative: the evaluator stops at its next tag or attribute
    /// checkpoint, but a resolver blocked inside host code is not interrupted.
    ///
    /// A pool worker never blocks waiting on another pool task. Evaluations that start on a
    /// worker (including ones nested in a bounded evaluation, such as the entries of a
    /// `proc` script) run inline, under the enclosing token and deadline if there is one.
    pub fn evaluate_bounded(self: &Arc<Self>, text: &str, context: &TagContext) -> String {
        let Some(timeout) = self.timeout else {
            return self.evaluate(text, context);
        };
        if !text.contains('<') {
            return self.evaluate(text, context);
        }

        if let Some(bound) = active_bound() {
            let inner = context.bounded_by(&bound);
            let value = self.evaluate(text, &inner);
            if inner.is_cancelled() {
                log::debug!("Nested tag fill of '{}' ran past its deadline.", text);
                return NULL_MARKER.to_string();
            }
            return value;
        }

        let bound = Bound::starting_now(timeout);
        if rayon::current_thread_index().is_some() {
            let _guard = BoundGuard::enter(&bound);
            let inner = context.bounded_by(&bound);
            let value = self.evaluate(text, &inner);
            if inner.is_cancelled() {
                self.report_abandoned(context, text, timeout);
                return NULL_MARKER.to_string();
            }
            return value;
        }

        let worker_context = context.bounded_by(&bound);
        let cancel = Arc::clone(&bound.cancel);
        let (sender, receiver) = mpsc::channel();
        let engine = Arc::clone(self);
        let owned_text = text.to_string();
        rayon::spawn(move || {
            let _guard = BoundGuard::enter(&bound);
            let result = engine.evaluate(&owned_text, &worker_context);
            let result = (!worker_context.is_cancelled()).then_some(result);
            // The receiver is gone if the caller already timed out.
            let _ = sender.send(result);
        });

        match receiver.recv_timeout(timeout) {
            Ok(Some(value)) => value,
            Ok(None) | Err(_) => {
                cancel.store(true, Ordering::Relaxed);
                self.report_abandoned(context, text, timeout);
                NULL_MARKER.to_string()
            }
        }
    }

    fn report_abandoned(&self, context: &TagContext, text: &str, timeout: Duration) {
        self.report_error(
            context,
            &format!(
                "Filling tags in '{}' took longer than {}ms and was abandoned.",
                text,
                timeout.as_millis()
            ),
        );
    }

    /// Fills the tags of a flat token list, tracking `{`/`}` depth.
    ///
    /// Tokens inside braces (and the braces themselves) are returned untouched; they belong to
    /// sub-blocks that are filled later, when their own entries execute.
    pub fn fill_arguments(self: &Arc<Self>, tokens: &[String], context: &TagContext) -> Vec<String> {
        let mut depth = 0usize;
        tokens
            .iter()
            .map(|token| match token.as_str() {
                "{" => {
                    depth += 1;
                    token.clone()
                }
                "}" => {
                    depth = depth.saturating_sub(1);
                    token.clone()
                }
                _ if depth > 0 => token.clone(),
                _ => self.evaluate_bounded(token, context),
            })
            .collect()
    }

    // --- INTERNAL RENDERING (escaped output) ---

    pub(crate) fn render_text(&self, text: &str, context: &TagContext, depth: u32) -> String {
        if !text.contains('<') {
            return text.to_string();
        }
        let pieces = self.pieces.get_or_parse(text);
        self.render(&pieces, context, depth)
    }

    fn render(&self, pieces: &[TagPiece], context: &TagContext, depth: u32) -> String {
        let mut output = String::new();
        for piece in pieces {
            match piece {
                TagPiece::Literal(text) => output.push_str(text),
                TagPiece::Tag(body) => {
                    if context.is_cancelled() {
                        return output;
                    }
                    output.push_str(&self.resolve_body(body, context, depth + 1));
                }
            }
        }
        output
    }

    fn resolve_body(&self, body: &TagBody, context: &TagContext, depth: u32) -> String {
        if depth > MAX_TAG_DEPTH {
            self.report_error(
                context,
                &format!(
                    "Tag <{}> is nested deeper than {} levels.",
                    unescape(&body.raw),
                    MAX_TAG_DEPTH
                ),
            );
            return NULL_MARKER.to_string();
        }

        // Inner tags outside any bracket are resolved first; the chain is parsed from the result.
        let lookup_text = if body.dynamic {
            self.render_text(&body.lookup, context, depth)
        } else {
            body.lookup.clone()
        };
        let chain = self.chains.get_or_parse(&lookup_text);

        match self.resolve_chain(&chain, context, depth) {
            Ok(value) => escape(&value).into_owned(),
            Err(reason) => match &body.fallback {
                Some(fallback) => {
                    log::trace!("Tag <{}> failed ({}); using fallback.", body.lookup, reason);
                    self.render_text(fallback, context, depth)
                }
                None => {
                    self.report_error(
                        context,
                        &format!("Tag <{}> is invalid: {}", unescape(&body.raw), reason),
                    );
                    NULL_MARKER.to_string()
                }
            },
        }
    }

    fn resolve_chain(
        &self,
        chain: &Arc<AttributeChain>,
        context: &TagContext,
        depth: u32,
    ) -> Result<String, String> {
        if chain.is_empty() || chain.raw().trim().is_empty() {
            return Err("empty tag".to_string());
        }
        let lookup = TagLookup::new(self, Arc::clone(chain), context, depth);

        let mut resolved = self
            .resolvers
            .iter()
            .find_map(|resolver| {
                resolver
                    .resolve(&lookup, Cursor::START)
                    .filter(|r| r.cursor > Cursor::START)
            })
            .ok_or_else(|| {
                format!(
                    "no resolver recognised '{}'",
                    lookup.key(Cursor::START).unwrap_or_default()
                )
            })?;

        while !lookup.is_complete(resolved.cursor) {
            if context.is_cancelled() {
                return Err("cancelled".to_string());
            }
            let cursor = resolved.cursor;
            let next = self
                .attributes
                .iter()
                .find_map(|handler| handler.apply(&resolved.value, &lookup, cursor))
                .filter(|r| r.cursor > cursor);
            match next {
                Some(step) => resolved = step,
                None => {
                    return Err(format!(
                        "unknown attribute '{}'",
                        lookup.key(cursor).unwrap_or_default()
                    ));
                }
            }
        }
        Ok(resolved.value)
    }

    fn report_error(&self, context: &TagContext, message: &str) {
        let message = match &context.entry {
            Some(entry) => format!("{} (while filling '{}')", message, entry),
            None => message.to_string(),
        };
        self.implementation
            .debug_error(context.queue_id(), &message);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::RecordingImplementation;
    use std::sync::{
        Mutex,
        atomic::{AtomicUsize, Ordering as AtomicOrdering},
    };

    /// `<name>` -> "World"; `<raw>` -> literal tag syntax; `<echo[x]>` -> x.
    struct Fixed;

    impl TagResolver for Fixed {
        fn name(&self) -> &'static str {
            "fixed"
        }

        fn resolve(&self, lookup: &TagLookup<'_>, cursor: Cursor) -> Option<Resolved> {
            if lookup.key_is(cursor, "name") {
                return Some(Resolved::new("World", cursor.fulfill(1)));
            }
            if lookup.key_is(cursor, "raw") {
                return Some(Resolved::new("<name>", cursor.fulfill(1)));
            }
            if lookup.key_is(cursor, "echo") {
                let value = lookup.context(cursor)?.to_string();
                return Some(Resolved::new(value, cursor.fulfill(1)));
            }
            if lookup.key_is(cursor, "script") {
                let script = lookup.tag_context().script.clone()?;
                return Some(Resolved::new(script, cursor.fulfill(1)));
            }
            None
        }
    }

    struct Upper;

    impl AttributeHandler for Upper {
        fn apply(&self, value: &str, lookup: &TagLookup<'_>, cursor: Cursor) -> Option<Resolved> {
            lookup
                .key_is(cursor, "upper")
                .then(|| Resolved::new(value.to_uppercase(), cursor.fulfill(1)))
        }
    }

    /// Records the order in which tags are resolved.
    struct Recorder(Arc<Mutex<Vec<String>>>);

    impl TagResolver for Recorder {
        fn name(&self) -> &'static str {
            "recorder"
        }

        fn resolve(&self, lookup: &TagLookup<'_>, cursor: Cursor) -> Option<Resolved> {
            if !lookup.key_is(cursor, "rec") {
                return None;
            }
            let label = lookup.context(cursor).unwrap_or("").to_string();
            self.0.lock().unwrap().push(label.clone());
            Some(Resolved::new(format!("[{}]", label), cursor.fulfill(1)))
        }
    }

    struct Slow;

    impl TagResolver for Slow {
        fn name(&self) -> &'static str {
            "slow"
        }

        fn resolve(&self, lookup: &TagLookup<'_>, cursor: Cursor) -> Option<Resolved> {
            if !lookup.key_is(cursor, "slow") {
                return None;
            }
            std::thread::sleep(Duration::from_millis(500));
            Some(Resolved::new("done", cursor.fulfill(1)))
        }
    }

    /// `<count>` counts how often it is resolved; `<twice[x]>` reads its context two times;
    /// `<ignore[x]>` never reads its context.
    struct Counting(Arc<AtomicUsize>);

    impl TagResolver for Counting {
        fn name(&self) -> &'static str {
            "counting"
        }

        fn resolve(&self, lookup: &TagLookup<'_>, cursor: Cursor) -> Option<Resolved> {
            if lookup.key_is(cursor, "count") {
                let n = self.0.fetch_add(1, AtomicOrdering::SeqCst) + 1;
                return Some(Resolved::new(n.to_string(), cursor.fulfill(1)));
            }
            if lookup.key_is(cursor, "twice") {
                let first = lookup.context(cursor)?.to_string();
                let second = lookup.context(cursor)?;
                return Some(Resolved::new(format!("{}/{}", first, second), cursor.fulfill(1)));
            }
            if lookup.key_is(cursor, "ignore") {
                return Some(Resolved::new("ignored", cursor.fulfill(1)));
            }
            None
        }
    }

    fn counting_engine() -> (TagEngine, Arc<AtomicUsize>) {
        let count = Arc::new(AtomicUsize::new(0));
        let mut engine = TagEngine::new(Arc::new(RecordingImplementation::default()));
        engine.register_resolver(Arc::new(Counting(Arc::clone(&count))));
        (engine, count)
    }

    fn single_worker_pool() -> rayon::ThreadPool {
        rayon::ThreadPoolBuilder::new().num_threads(1).build().unwrap()
    }

    fn engine_with(implementation: Arc<RecordingImplementation>) -> Arc<TagEngine> {
        let mut engine = TagEngine::new(implementation);
        engine.register_resolver(Arc::new(Fixed));
        engine.register_resolver(Arc::new(Slow));
        engine.register_attribute(Arc::new(Upper));
        Arc::new(engine)
    }

    fn engine() -> (Arc<TagEngine>, Arc<RecordingImplementation>) {
        let implementation = Arc::new(RecordingImplementation::default());
        (engine_with(Arc::clone(&implementation)), implementation)
    }

    #[test]
    fn test_text_without_tags_is_unchanged() {
        let (engine, _) = engine();
        let ctx = TagContext::new();
        for text in ["", "plain", "a > b", "5 < 6", "brackets [x] | y; z"] {
            assert_eq!(engine.evaluate(text, &ctx), text);
        }
    }

    #[test]
    fn test_resolves_simple_and_chained_tags() {
        let (engine, implementation) = engine();
        let ctx = TagContext::new();
        assert_eq!(engine.evaluate("Hello <name>!", &ctx), "Hello World!");
        assert_eq!(engine.evaluate("<name.upper>", &ctx), "WORLD");
        assert!(implementation.errors().is_empty());
    }

    #[test]
    fn test_nested_tag_in_context() {
        let (engine, _) = engine();
        let ctx = TagContext::new();
        assert_eq!(engine.evaluate("<echo[<name>]>", &ctx), "World");
        assert_eq!(engine.evaluate("<echo[<echo[deep]>].upper>", &ctx), "DEEP");
    }

    #[test]
    fn test_inner_tags_resolve_before_outer() {
        let order = Arc::new(Mutex::new(Vec::new()));
        let implementation = Arc::new(RecordingImplementation::default());
        let mut engine = TagEngine::new(implementation);
        engine.register_resolver(Arc::new(Recorder(Arc::clone(&order))));
        let ctx = TagContext::new();

        assert_eq!(engine.evaluate("<rec[outer<rec[inner]>]>", &ctx), "[outer[inner]]");
        assert_eq!(*order.lock().unwrap(), vec!["inner", "outer[inner]"]);
    }

    #[test]
    fn test_unknown_tag_is_null_and_logs_one_error() {
        let (engine, implementation) = engine();
        let ctx = TagContext::new();
        assert_eq!(engine.evaluate("value: <bogus.tag>", &ctx), "value: null");
        let errors = implementation.errors();
        assert_eq!(errors.len(), 1);
        assert!(errors[0].contains("bogus.tag"));
    }

    #[test]
    fn test_unknown_attribute_is_null() {
        let (engine, implementation) = engine();
        let ctx = TagContext::new();
        assert_eq!(engine.evaluate("<name.nonsense>", &ctx), "null");
        assert_eq!(implementation.errors().len(), 1);
        assert!(implementation.errors()[0].contains("nonsense"));
    }

    #[test]
    fn test_fallback_is_used_without_error() {
        let (engine, implementation) = engine();
        let ctx = TagContext::new();
        assert_eq!(engine.evaluate("<bogus||fine>", &ctx), "fine");
        assert_eq!(engine.evaluate("<bogus||<name>>", &ctx), "World");
        assert_eq!(engine.evaluate("<name||unused>", &ctx), "World");
        assert!(implementation.errors().is_empty());
    }

    #[test]
    fn test_resolved_content_is_not_reinterpreted() {
        let (engine, _) = engine();
        let ctx = TagContext::new();
        // `raw` resolves to the text "<name>", which must come out verbatim.
        assert_eq!(engine.evaluate("<raw>", &ctx), "<name>");
        assert_eq!(engine.evaluate("<echo[<raw>]>", &ctx), "<name>");
    }

    #[test]
    fn test_escaped_brackets_in_source() {
        let (engine, _) = engine();
        let ctx = TagContext::new();
        assert_eq!(engine.evaluate(r"\<name\> is <name>", &ctx), "<name> is World");
    }

    #[test]
    fn test_dynamic_tag_body_resolves_inner_first() {
        let (engine, _) = engine();
        let ctx = TagContext::new();
        assert_eq!(engine.evaluate("<<echo[name]>.upper>", &ctx), "WORLD");
    }

    #[test]
    fn test_cached_pieces_are_reused_with_different_contexts() {
        let (engine, _) = engine();
        let first = engine.parse("script=<script>");
        let second = engine.parse("script=<script>");
        assert!(Arc::ptr_eq(&first, &second));

        let a = TagContext {
            script: Some("alpha".into()),
            ..Default::default()
        };
        let b = TagContext {
            script: Some("beta".into()),
            ..Default::default()
        };
        assert_eq!(engine.evaluate_pieces(&first, &a), "script=alpha");
        assert_eq!(engine.evaluate_pieces(&second, &b), "script=beta");
    }

    #[test]
    fn test_resolve_tag_directly() {
        let (engine, _) = engine();
        assert_eq!(engine.resolve_tag("name.upper", &TagContext::new()), "WORLD");
    }

    #[test]
    fn test_fill_arguments_skips_braced_tokens() {
        let (engine, _) = engine();
        let tokens: Vec<String> = ["<name>", "{", "-", "say", "<name>", "}", "<name.upper>"]
            .iter()
            .map(|s| s.to_string())
            .collect();
        let filled = engine.fill_arguments(&tokens, &TagContext::new());
        assert_eq!(
            filled,
            vec!["World", "{", "-", "say", "<name>", "}", "WORLD"]
        );
    }

    #[test]
    fn test_timeout_returns_placeholder() {
        let implementation = Arc::new(RecordingImplementation {
            timeout: Some(Duration::from_millis(50)),
            ..Default::default()
        });
        let engine = engine_with(Arc::clone(&implementation));
        let value = engine.evaluate_bounded("<slow>", &TagContext::new());
        assert_eq!(value, NULL_MARKER);
        assert_eq!(implementation.errors().len(), 1);
        assert!(implementation.errors()[0].contains("abandoned"));
    }

    #[test]
    fn test_bracket_context_is_evaluated_once_when_read_twice() {
        let (engine, count) = counting_engine();
        let ctx = TagContext::new();
        assert_eq!(engine.evaluate("<twice[<count>]>", &ctx), "1/1");
        assert_eq!(count.load(AtomicOrdering::SeqCst), 1);
    }

    #[test]
    fn test_unread_bracket_context_is_never_evaluated() {
        let (engine, count) = counting_engine();
        let ctx = TagContext::new();
        assert_eq!(engine.evaluate("<ignore[<count>]>", &ctx), "ignored");
        assert_eq!(count.load(AtomicOrdering::SeqCst), 0);
    }

    #[test]
    fn test_bounded_evaluation_on_a_worker_runs_inline() {
        let implementation = Arc::new(RecordingImplementation {
            timeout: Some(Duration::from_secs(5)),
            ..Default::default()
        });
        let engine = engine_with(Arc::clone(&implementation));
        // With one worker, waiting on a second pool task could never succeed.
        let value = single_worker_pool()
            .install(|| engine.evaluate_bounded("<echo[<name>].upper>", &TagContext::new()));
        assert_eq!(value, "WORLD");
        assert!(implementation.errors().is_empty());
    }

    #[test]
    fn test_inline_bounded_evaluation_keeps_its_deadline() {
        let implementation = Arc::new(RecordingImplementation {
            timeout: Some(Duration::from_millis(50)),
            ..Default::default()
        });
        let engine = engine_with(Arc::clone(&implementation));
        let value = single_worker_pool()
            .install(|| engine.evaluate_bounded("<slow> <name>", &TagContext::new()));
        assert_eq!(value, NULL_MARKER);
        assert_eq!(implementation.errors().len(), 1);
        assert!(implementation.errors()[0].contains("abandoned"));
    }

    #[test]
    fn test_bounded_evaluation_within_deadline() {
        let implementation = Arc::new(RecordingImplementation {
            timeout: Some(Duration::from_secs(5)),
            ..Default::default()
        });
        let engine = engine_with(implementation);
        assert_eq!(engine.evaluate_bounded("hi <name>", &TagContext::new()), "hi World");
    }
}
