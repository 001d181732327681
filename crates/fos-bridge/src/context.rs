//! Execution Contexts
//!
//! One [`ExecutionContext`] per script runtime instance. It owns the
//! per-context atom table, command queue and performance timeline, and holds
//! a reference to the process-wide host gate. Contexts are created and torn
//! down explicitly through a [`ContextRegistry`].

use crate::atom::{Atom, AtomTable};
use crate::command::{CommandQueue, CommandSink, HostBatchUpdate};
use crate::config::BridgeConfig;
use crate::error::{BridgeError, Result};
use crate::host::{HostCallGate, ServiceSet};
use crate::performance::{
    NoExternalEntries, PerformanceTimeline, SystemClock, TimingSource, PERF_JS_CONTEXT_INIT_END,
    PERF_JS_CONTEXT_INIT_START,
};
use crate::style::PropertyNameCache;
use crate::ContextId;
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, OnceLock, PoisonError};

/// HTML-to-tree parser collaborator
pub trait MarkupParser {
    type Tree;

    fn parse_markup(&self, text: &str) -> Self::Tree;
}

/// A single script execution context
pub struct ExecutionContext {
    id: ContextId,
    config: BridgeConfig,
    atoms: AtomTable,
    style_names: PropertyNameCache,
    queue: CommandQueue,
    timeline: Mutex<PerformanceTimeline>,
    gate: Arc<HostCallGate>,
    valid: AtomicBool,
}

impl ExecutionContext {
    /// Create a context wired to explicit collaborators
    ///
    /// The timing source is only consulted when `config.profile` is set.
    pub fn new(
        id: ContextId,
        config: BridgeConfig,
        gate: Arc<HostCallGate>,
        sink: Arc<dyn CommandSink>,
        timing: Arc<dyn TimingSource>,
    ) -> Self {
        let external: Arc<dyn TimingSource> = if config.profile { timing } else { Arc::new(NoExternalEntries) };
        let mut timeline = PerformanceTimeline::new(id, Arc::new(SystemClock::new()), external);
        if config.profile {
            timeline.mark(PERF_JS_CONTEXT_INIT_START, None);
        }

        let queue = CommandQueue::new(id, sink);
        queue.set_batching(config.batch_updates);
        let atoms = AtomTable::with_pinned(&config.preintern);

        if config.profile {
            timeline.mark(PERF_JS_CONTEXT_INIT_END, None);
        }

        tracing::debug!(context = id, "execution context created");
        Self {
            id,
            config,
            atoms,
            style_names: PropertyNameCache::new(),
            queue,
            timeline: Mutex::new(timeline),
            gate,
            valid: AtomicBool::new(true),
        }
    }

    /// Create a context that signals the renderer through the gate's
    /// batch-update service and has no external timing source
    pub fn with_gate(id: ContextId, config: BridgeConfig, gate: Arc<HostCallGate>) -> Self {
        let sink = Arc::new(HostBatchUpdate::new(gate.clone()));
        Self::new(id, config, gate, sink, Arc::new(NoExternalEntries))
    }

    pub fn id(&self) -> ContextId {
        self.id
    }

    pub fn config(&self) -> &BridgeConfig {
        &self.config
    }

    pub fn atoms(&self) -> &AtomTable {
        &self.atoms
    }

    /// Interned camelCase form of a style property name
    pub fn property_name(&self, name: &str) -> Atom {
        self.style_names.resolve(&self.atoms, name)
    }

    pub fn queue(&self) -> &CommandQueue {
        &self.queue
    }

    pub fn gate(&self) -> &Arc<HostCallGate> {
        &self.gate
    }

    /// Host services as seen from the calling thread
    pub fn services(&self) -> ServiceSet {
        self.gate.services()
    }

    /// Lock the performance timeline
    pub fn timeline(&self) -> MutexGuard<'_, PerformanceTimeline> {
        self.timeline.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Run `f` against the performance timeline
    pub fn with_timeline<R>(&self, f: impl FnOnce(&mut PerformanceTimeline) -> R) -> R {
        f(&mut self.timeline())
    }

    pub fn is_valid(&self) -> bool {
        self.valid.load(Ordering::Acquire)
    }

    /// Error channel for script exceptions
    pub fn report_error(&self, message: &str) {
        tracing::error!(context = self.id, "script error: {}", message);
        self.gate.services().on_js_error(self.id, message);
    }

    /// Invalidate the context and close its command queue
    pub fn dispose(&self) {
        if self.valid.swap(false, Ordering::AcqRel) {
            self.queue.close();
            tracing::debug!(context = self.id, "execution context disposed");
        }
    }

    /// Parse markup into a tree through the parser collaborator
    pub fn parse_html<P: MarkupParser>(&self, parser: &P, markup: &str) -> Result<P::Tree> {
        if !self.is_valid() {
            return Err(BridgeError::ContextDisposed(self.id));
        }
        Ok(parser.parse_markup(markup))
    }
}

impl fmt::Debug for ExecutionContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExecutionContext")
            .field("id", &self.id)
            .field("valid", &self.is_valid())
            .field("queue", &self.queue)
            .finish()
    }
}

/// Process-wide table of live execution contexts
pub struct ContextRegistry {
    gate: Arc<HostCallGate>,
    timing: Arc<dyn TimingSource>,
    max_contexts: usize,
    state: Mutex<RegistryState>,
}

#[derive(Default)]
struct RegistryState {
    contexts: HashMap<ContextId, Arc<ExecutionContext>>,
    next_id: ContextId,
}

impl ContextRegistry {
    pub fn new(gate: Arc<HostCallGate>, max_contexts: usize) -> Self {
        Self {
            gate,
            timing: Arc::new(NoExternalEntries),
            max_contexts,
            state: Mutex::new(RegistryState::default()),
        }
    }

    /// Use `timing` as the external timing source of new contexts
    pub fn with_timing_source(mut self, timing: Arc<dyn TimingSource>) -> Self {
        self.timing = timing;
        self
    }

    /// Process-wide registry bound to [`HostCallGate::global`]
    pub fn global() -> &'static ContextRegistry {
        static REGISTRY: OnceLock<ContextRegistry> = OnceLock::new();
        REGISTRY.get_or_init(|| {
            ContextRegistry::new(HostCallGate::global(), BridgeConfig::default().max_contexts)
        })
    }

    /// Create and register a new context
    pub fn create_for_context(&self, config: BridgeConfig) -> Result<Arc<ExecutionContext>> {
        let mut state = self.lock();
        if state.contexts.len() >= self.max_contexts {
            tracing::warn!(max = self.max_contexts, "execution context limit reached");
            return Err(BridgeError::ContextLimit(self.max_contexts));
        }

        let id = state.next_id;
        state.next_id += 1;
        let sink = Arc::new(HostBatchUpdate::new(self.gate.clone()));
        let context = Arc::new(ExecutionContext::new(id, config, self.gate.clone(), sink, self.timing.clone()));
        state.contexts.insert(id, context.clone());
        Ok(context)
    }

    pub fn get(&self, id: ContextId) -> Option<Arc<ExecutionContext>> {
        self.lock().contexts.get(&id).cloned()
    }

    /// Dispose and unregister a context; returns whether it existed
    pub fn dispose_for_context(&self, id: ContextId) -> bool {
        let removed = self.lock().contexts.remove(&id);
        match removed {
            Some(context) => {
                context.dispose();
                true
            }
            None => false,
        }
    }

    pub fn len(&self) -> usize {
        self.lock().contexts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().contexts.is_empty()
    }

    fn lock(&self) -> MutexGuard<'_, RegistryState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl fmt::Debug for ContextRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ContextRegistry")
            .field("live", &self.len())
            .field("max_contexts", &self.max_contexts)
            .finish()
    }
}
