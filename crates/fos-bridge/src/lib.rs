//! fOS Bridge
//!
//! Control plane between an embedded script context and the host that
//! renders for it.
//!
//! # Components
//! - [`CommandQueue`]: batched renderer commands, drained atomically
//! - [`HostCallGate`]: host entry points, only callable from the host thread
//! - [`AtomTable`]: interned strings compared by identity
//! - [`PerformanceTimeline`]: marks and measures merged with host timings
//! - [`ModuleEventDispatcher`]: host module events fanned out to listeners
//!
//! # Example
//! ```rust,ignore
//! use fos_bridge::{BridgeConfig, CommandKind, ContextRegistry};
//!
//! let context = ContextRegistry::global().create_for_context(BridgeConfig::default())?;
//! context.queue().append(1, CommandKind::CreateElement, Some("div"), None, None)?;
//! let batch = context.queue().drain_and_clear();
//! ```

pub mod atom;
pub mod command;
mod config;
pub mod context;
mod error;
pub mod host;
pub mod module;
pub mod performance;
pub mod style;

/// Execution context identifier
pub type ContextId = i32;

pub use atom::{Atom, AtomTable};
pub use command::{
    Command, CommandBatch, CommandKind, CommandQueue, CommandSink, HostBatchUpdate, NativePtr, NativeString,
};
pub use config::BridgeConfig;
pub use context::{ContextRegistry, ExecutionContext, MarkupParser};
pub use error::{BridgeError, ErrorKind, Result, ScriptException};
pub use host::{HostArg, HostCallGate, HostFn, HostReply, ServiceName, ServiceSet};
pub use module::{DispatchReport, ListenerHandle, ModuleEvent, ModuleEventDispatcher};
pub use performance::{
    Clock, EntryType, ManualClock, NoExternalEntries, PerformanceEntry, PerformanceTimeline, SystemClock,
    TimelineSnapshot, TimingSource,
};
pub use style::{PropertyNameCache, StyleDeclaration};

/// Bridge version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
