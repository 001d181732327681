//! Module Event Dispatcher
//!
//! Script registers persistent module listeners; when the host raises a
//! module event every listener is invoked with the module name, an optional
//! event object and an optional JSON payload.
//!
//! Listeners are invoked in registration order. The dispatcher never holds a
//! borrow across a listener call, so listeners may register or unregister
//! other listeners (or themselves) while a dispatch is running.

use crate::context::ExecutionContext;
use crate::error::{BridgeError, Result, ScriptException};
use std::cell::{Cell, RefCell};
use std::fmt;
use std::sync::Arc;

/// Identifies one registered listener
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ListenerHandle(u64);

impl ListenerHandle {
    pub fn id(self) -> u64 {
        self.0
    }

    pub fn from_id(id: u64) -> Self {
        Self(id)
    }
}

/// Arguments delivered to each listener
#[derive(Debug)]
pub struct ModuleEvent<'a, E: ?Sized> {
    pub module_name: &'a str,
    pub event: Option<&'a E>,
    /// Parsed `extra` payload; `None` when absent or malformed
    pub extra: Option<&'a serde_json::Value>,
}

/// Outcome of one fan-out
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatchReport {
    /// Listeners invoked
    pub delivered: usize,
    /// Listeners that raised an exception
    pub failed: usize,
}

/// Parse a host-supplied JSON payload, degrading to null on malformed input
pub fn parse_extra(extra_json: Option<&str>) -> Option<serde_json::Value> {
    let text = extra_json?;
    match serde_json::from_str(text) {
        Ok(value) => Some(value),
        Err(err) => {
            tracing::warn!("malformed module event payload, passing null: {}", err);
            None
        }
    }
}

/// Registry of module listeners for one execution context
///
/// `L` is the engine's callable type. The dispatcher lives on the script
/// thread.
pub struct ModuleEventDispatcher<L> {
    context: Arc<ExecutionContext>,
    listeners: RefCell<Vec<(ListenerHandle, L)>>,
    next_id: Cell<u64>,
}

impl<L: Clone> ModuleEventDispatcher<L> {
    pub fn new(context: Arc<ExecutionContext>) -> Self {
        Self {
            context,
            listeners: RefCell::new(Vec::new()),
            next_id: Cell::new(1),
        }
    }

    pub fn context(&self) -> &Arc<ExecutionContext> {
        &self.context
    }

    /// Add a listener at the end of the invocation order
    pub fn register_listener(&self, listener: L) -> ListenerHandle {
        let handle = ListenerHandle(self.next_id.get());
        self.next_id.set(handle.0 + 1);
        self.listeners.borrow_mut().push((handle, listener));
        tracing::debug!(context = self.context.id(), listener = handle.0, "module listener registered");
        handle
    }

    /// Remove a listener; returns whether it was registered
    pub fn unregister_listener(&self, handle: ListenerHandle) -> bool {
        let mut listeners = self.listeners.borrow_mut();
        match listeners.iter().position(|(h, _)| *h == handle) {
            Some(index) => {
                listeners.remove(index);
                true
            }
            None => false,
        }
    }

    pub fn len(&self) -> usize {
        self.listeners.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.listeners.borrow().is_empty()
    }

    /// Unlink every listener
    pub fn clear(&self) {
        // Listener values may run destructors that touch the engine; drop
        // them after the borrow is released.
        let listeners = std::mem::take(&mut *self.listeners.borrow_mut());
        drop(listeners);
    }

    /// Fan a host event out to every registered listener
    ///
    /// `invoke` performs the engine-level call. A listener failure is
    /// reported to the context's error channel and delivery continues.
    pub fn dispatch<E: ?Sized, F>(
        &self,
        module_name: &str,
        event: Option<&E>,
        extra_json: Option<&str>,
        mut invoke: F,
    ) -> Result<DispatchReport>
    where
        F: FnMut(&L, &ModuleEvent<'_, E>) -> std::result::Result<(), ScriptException>,
    {
        if !self.context.is_valid() {
            self.clear();
            return Err(BridgeError::ContextDisposed(self.context.id()));
        }

        let extra = parse_extra(extra_json);
        let payload = ModuleEvent { module_name, event, extra: extra.as_ref() };

        let snapshot: Vec<ListenerHandle> = self.listeners.borrow().iter().map(|(h, _)| *h).collect();
        let mut report = DispatchReport::default();

        for handle in snapshot {
            let listener = {
                let listeners = self.listeners.borrow();
                match listeners.iter().find(|(h, _)| *h == handle) {
                    Some((_, listener)) => listener.clone(),
                    // Unregistered by an earlier listener in this fan-out.
                    None => continue,
                }
            };

            report.delivered += 1;
            if let Err(exception) = invoke(&listener, &payload) {
                report.failed += 1;
                self.context.report_error(&exception.message);
            }

            if !self.context.is_valid() {
                self.clear();
                break;
            }
        }

        tracing::debug!(
            context = self.context.id(),
            module = module_name,
            delivered = report.delivered,
            failed = report.failed,
            "module event dispatched"
        );
        Ok(report)
    }
}

impl<L> fmt::Debug for ModuleEventDispatcher<L> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ModuleEventDispatcher")
            .field("context", &self.context.id())
            .field("listeners", &self.listeners.borrow().len())
            .finish()
    }
}
