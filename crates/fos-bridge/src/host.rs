//! Host Call Gate
//!
//! Host services (batch-update requests, module invocation, error reporting,
//! ...) are registered once at startup by the host and may only be invoked
//! from the thread that owns the host's event loop. Script can occasionally
//! run on another thread, e.g. when an attached debugger drives it. Reads
//! from any thread other than the captured one get [`ServiceSet::Empty`],
//! whose entries are all silent no-ops.

use crate::error::{BridgeError, Result};
use crate::ContextId;
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex, OnceLock, PoisonError};
use std::thread::{self, ThreadId};

/// Names of the host entry points the bridge knows about
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ServiceName {
    InvokeModule,
    RequestBatchUpdate,
    ReloadApp,
    DevicePixelRatio,
    PlatformBrightness,
    OnJsError,
    FlushUiCommand,
}

impl ServiceName {
    pub const ALL: [ServiceName; 7] = [
        ServiceName::InvokeModule,
        ServiceName::RequestBatchUpdate,
        ServiceName::ReloadApp,
        ServiceName::DevicePixelRatio,
        ServiceName::PlatformBrightness,
        ServiceName::OnJsError,
        ServiceName::FlushUiCommand,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ServiceName::InvokeModule => "invokeModule",
            ServiceName::RequestBatchUpdate => "requestBatchUpdate",
            ServiceName::ReloadApp => "reloadApp",
            ServiceName::DevicePixelRatio => "devicePixelRatio",
            ServiceName::PlatformBrightness => "platformBrightness",
            ServiceName::OnJsError => "onJsError",
            ServiceName::FlushUiCommand => "flushUICommand",
        }
    }
}

impl fmt::Display for ServiceName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Argument passed to a host service
#[derive(Debug, Clone, PartialEq)]
pub enum HostArg {
    Int(i64),
    Float(f64),
    Str(String),
}

/// Value returned by a host service
#[derive(Debug, Clone, PartialEq, Default)]
pub enum HostReply {
    #[default]
    Void,
    Int(i64),
    Float(f64),
    Str(String),
}

/// Host entry point
pub type HostFn = Arc<dyn Fn(ContextId, &[HostArg]) -> HostReply + Send + Sync>;

/// Frozen name -> entry point table
#[derive(Default, Clone)]
pub struct ServiceTable {
    services: HashMap<ServiceName, HostFn>,
}

impl ServiceTable {
    pub fn get(&self, name: ServiceName) -> Option<&HostFn> {
        self.services.get(&name)
    }

    pub fn len(&self) -> usize {
        self.services.len()
    }

    pub fn is_empty(&self) -> bool {
        self.services.is_empty()
    }
}

impl fmt::Debug for ServiceTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_set().entries(self.services.keys()).finish()
    }
}

/// Capability set handed to callers of [`HostCallGate::services`]
#[derive(Debug, Clone)]
pub enum ServiceSet {
    /// Real host entry points; caller is on the host thread
    Live(Arc<ServiceTable>),
    /// Every entry is a no-op
    Empty,
}

impl ServiceSet {
    pub fn is_live(&self) -> bool {
        matches!(self, ServiceSet::Live(_))
    }

    /// Whether `name` would reach the host
    pub fn has(&self, name: ServiceName) -> bool {
        match self {
            ServiceSet::Live(table) => table.get(name).is_some(),
            ServiceSet::Empty => false,
        }
    }

    /// Call a service by name; unregistered or neutered entries return `Void`
    pub fn call(&self, name: ServiceName, context_id: ContextId, args: &[HostArg]) -> HostReply {
        match self {
            ServiceSet::Live(table) => match table.get(name) {
                Some(service) => service(context_id, args),
                None => {
                    tracing::debug!(service = %name, "host service not registered");
                    HostReply::Void
                }
            },
            ServiceSet::Empty => HostReply::Void,
        }
    }

    pub fn request_batch_update(&self, context_id: ContextId) {
        self.call(ServiceName::RequestBatchUpdate, context_id, &[]);
    }

    pub fn flush_ui_command(&self, context_id: ContextId) {
        self.call(ServiceName::FlushUiCommand, context_id, &[]);
    }

    pub fn on_js_error(&self, context_id: ContextId, message: &str) {
        self.call(ServiceName::OnJsError, context_id, &[HostArg::Str(message.to_string())]);
    }

    pub fn reload_app(&self, context_id: ContextId) {
        self.call(ServiceName::ReloadApp, context_id, &[]);
    }

    /// Invoke a host module method; `None` when the host returned nothing
    pub fn invoke_module(
        &self,
        context_id: ContextId,
        module: &str,
        method: &str,
        params: Option<&str>,
    ) -> Option<String> {
        let mut args = vec![HostArg::Str(module.to_string()), HostArg::Str(method.to_string())];
        if let Some(params) = params {
            args.push(HostArg::Str(params.to_string()));
        }
        match self.call(ServiceName::InvokeModule, context_id, &args) {
            HostReply::Str(result) => Some(result),
            _ => None,
        }
    }

    pub fn device_pixel_ratio(&self, context_id: ContextId) -> Option<f64> {
        match self.call(ServiceName::DevicePixelRatio, context_id, &[]) {
            HostReply::Float(ratio) => Some(ratio),
            HostReply::Int(ratio) => Some(ratio as f64),
            _ => None,
        }
    }

    pub fn platform_brightness(&self, context_id: ContextId) -> Option<String> {
        match self.call(ServiceName::PlatformBrightness, context_id, &[]) {
            HostReply::Str(brightness) => Some(brightness),
            _ => None,
        }
    }
}

/// Thread-gated registry of host entry points
pub struct HostCallGate {
    /// Registrations collected before capture
    pending: Mutex<ServiceTable>,
    /// Owning thread and the frozen table, set exactly once
    captured: OnceLock<(ThreadId, Arc<ServiceTable>)>,
}

impl HostCallGate {
    pub fn new() -> Self {
        Self {
            pending: Mutex::new(ServiceTable::default()),
            captured: OnceLock::new(),
        }
    }

    /// Process-wide gate used by hosts that embed a single bridge
    pub fn global() -> Arc<HostCallGate> {
        static GATE: OnceLock<Arc<HostCallGate>> = OnceLock::new();
        Arc::clone(GATE.get_or_init(|| Arc::new(HostCallGate::new())))
    }

    /// Register (or replace) a host service; only valid before capture
    pub fn register_service(&self, name: ServiceName, service: HostFn) -> Result<()> {
        let mut pending = self.pending.lock().unwrap_or_else(PoisonError::into_inner);
        if self.captured.get().is_some() {
            tracing::error!(service = %name, "host service registered after capture");
            return Err(BridgeError::RegistrationClosed(name));
        }
        if pending.services.insert(name, service).is_some() {
            tracing::debug!(service = %name, "host service replaced");
        }
        Ok(())
    }

    /// Fix the owning thread and freeze the table
    pub fn capture(&self, thread_id: ThreadId) -> Result<()> {
        let mut pending = self.pending.lock().unwrap_or_else(PoisonError::into_inner);
        if self.captured.get().is_some() {
            return Err(BridgeError::AlreadyCaptured);
        }
        let table = Arc::new(std::mem::take(&mut *pending));
        tracing::info!(services = table.len(), ?thread_id, "host thread captured");
        self.captured
            .set((thread_id, table))
            .map_err(|_| BridgeError::AlreadyCaptured)
    }

    /// Capture the calling thread
    pub fn capture_current(&self) -> Result<()> {
        self.capture(thread::current().id())
    }

    pub fn captured_thread(&self) -> Option<ThreadId> {
        self.captured.get().map(|(thread_id, _)| *thread_id)
    }

    /// Services as seen from the calling thread
    pub fn services(&self) -> ServiceSet {
        self.services_for(thread::current().id())
    }

    /// Services as seen from `thread_id`
    pub fn services_for(&self, thread_id: ThreadId) -> ServiceSet {
        match self.captured.get() {
            Some((owner, table)) if *owner == thread_id => ServiceSet::Live(Arc::clone(table)),
            _ => ServiceSet::Empty,
        }
    }
}

impl Default for HostCallGate {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for HostCallGate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HostCallGate")
            .field("captured", &self.captured_thread())
            .finish()
    }
}
