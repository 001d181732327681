//! UI Command Queue
//!
//! Mutations that affect rendering are not applied on the script thread.
//! They are recorded as [`Command`]s and handed to the external renderer,
//! which drains the queue when it is told commands are available.
//!
//! Payload strings are copied into move-only [`NativeString`] buffers at
//! append time, so callers may reuse their source immediately and every
//! buffer has exactly one owner: first the queue, then whoever drained it.

use crate::error::{BridgeError, Result};
use crate::host::HostCallGate;
use crate::ContextId;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// Renderer command set
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum CommandKind {
    CreateElement,
    CreateTextNode,
    CreateComment,
    DisposeEventTarget,
    AddEvent,
    RemoveNode,
    InsertAdjacentNode,
    SetStyle,
    SetAttribute,
    RemoveAttribute,
    CloneNode,
    RemoveEvent,
    CreateDocumentFragment,
}

/// Owned UTF-16 buffer crossing to the renderer
///
/// Deliberately not `Clone`: a buffer is moved from the queue to exactly one
/// receiver.
#[derive(PartialEq, Eq)]
pub struct NativeString {
    units: Box<[u16]>,
}

impl NativeString {
    /// Deep-copy `text` into a new buffer
    pub fn new(text: &str) -> Self {
        Self { units: text.encode_utf16().collect() }
    }

    pub fn as_units(&self) -> &[u16] {
        &self.units
    }

    /// Length in UTF-16 code units
    pub fn len(&self) -> usize {
        self.units.len()
    }

    pub fn is_empty(&self) -> bool {
        self.units.is_empty()
    }

    pub fn to_string_lossy(&self) -> String {
        String::from_utf16_lossy(&self.units)
    }

    /// Hand the raw buffer to its final receiver
    pub fn into_units(self) -> Box<[u16]> {
        self.units
    }
}

impl fmt::Debug for NativeString {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "NativeString({:?})", self.to_string_lossy())
    }
}

/// Opaque address of a host-side binding object
///
/// The bridge never dereferences it; only the renderer knows what it names.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NativePtr(u64);

impl NativePtr {
    pub const fn new(address: u64) -> Self {
        Self(address)
    }

    pub const fn address(self) -> u64 {
        self.0
    }
}

/// One queued mutation
#[derive(Debug)]
pub struct Command {
    target_id: i64,
    kind: CommandKind,
    payload0: Option<NativeString>,
    payload1: Option<NativeString>,
    native: Option<NativePtr>,
}

impl Command {
    pub fn target_id(&self) -> i64 {
        self.target_id
    }

    pub fn kind(&self) -> CommandKind {
        self.kind
    }

    pub fn payload0(&self) -> Option<&NativeString> {
        self.payload0.as_ref()
    }

    pub fn payload1(&self) -> Option<&NativeString> {
        self.payload1.as_ref()
    }

    pub fn native(&self) -> Option<NativePtr> {
        self.native
    }

    /// Split into owned parts for the receiver
    pub fn into_parts(self) -> (i64, CommandKind, Option<NativeString>, Option<NativeString>, Option<NativePtr>) {
        (self.target_id, self.kind, self.payload0, self.payload1, self.native)
    }
}

/// Detached, drained sequence of commands in append order
#[derive(Debug, Default)]
pub struct CommandBatch {
    commands: Vec<Command>,
}

impl CommandBatch {
    pub fn len(&self) -> usize {
        self.commands.len()
    }

    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Command> {
        self.commands.iter()
    }
}

impl IntoIterator for CommandBatch {
    type Item = Command;
    type IntoIter = std::vec::IntoIter<Command>;

    fn into_iter(self) -> Self::IntoIter {
        self.commands.into_iter()
    }
}

impl<'a> IntoIterator for &'a CommandBatch {
    type Item = &'a Command;
    type IntoIter = std::slice::Iter<'a, Command>;

    fn into_iter(self) -> Self::IntoIter {
        self.commands.iter()
    }
}

/// Renderer-side hint receiver
pub trait CommandSink: Send + Sync {
    /// Commands are waiting; the renderer decides when to drain
    fn notify_commands_available(&self, context_id: ContextId);
}

/// Sink that forwards the hint to the host's `requestBatchUpdate` service
pub struct HostBatchUpdate {
    gate: Arc<HostCallGate>,
}

impl HostBatchUpdate {
    pub fn new(gate: Arc<HostCallGate>) -> Self {
        Self { gate }
    }
}

impl CommandSink for HostBatchUpdate {
    fn notify_commands_available(&self, context_id: ContextId) {
        self.gate.services().request_batch_update(context_id);
    }
}

#[derive(Debug, Default)]
struct QueueState {
    commands: Vec<Command>,
    batching: bool,
    closed: bool,
}

/// Ordered per-context command buffer
///
/// All access is serialised behind one mutex, so a drain is a single swap
/// and no command is ever delivered twice.
pub struct CommandQueue {
    context_id: ContextId,
    state: Mutex<QueueState>,
    sink: Arc<dyn CommandSink>,
}

impl CommandQueue {
    pub fn new(context_id: ContextId, sink: Arc<dyn CommandSink>) -> Self {
        Self {
            context_id,
            state: Mutex::new(QueueState::default()),
            sink,
        }
    }

    pub fn context_id(&self) -> ContextId {
        self.context_id
    }

    /// Append a command, copying any payload text
    ///
    /// Unless batching is on, the sink is told commands are available.
    pub fn append(
        &self,
        target_id: i64,
        kind: CommandKind,
        payload0: Option<&str>,
        payload1: Option<&str>,
        native: Option<NativePtr>,
    ) -> Result<()> {
        let command = Command {
            target_id,
            kind,
            payload0: payload0.map(NativeString::new),
            payload1: payload1.map(NativeString::new),
            native,
        };

        let notify = {
            let mut state = self.lock();
            if state.closed {
                tracing::error!(
                    context = self.context_id,
                    ?kind,
                    target_id,
                    "command appended after context teardown"
                );
                return Err(BridgeError::ContextDisposed(self.context_id));
            }
            state.commands.push(command);
            !state.batching
        };

        tracing::trace!(context = self.context_id, ?kind, target_id, "command appended");
        if notify {
            self.sink.notify_commands_available(self.context_id);
        }
        Ok(())
    }

    /// Take every pending command, leaving the queue empty
    pub fn drain_and_clear(&self) -> CommandBatch {
        let commands = std::mem::take(&mut self.lock().commands);
        if !commands.is_empty() {
            tracing::debug!(context = self.context_id, count = commands.len(), "command queue drained");
        }
        CommandBatch { commands }
    }

    /// When on, appends stop signalling the sink until [`flush`](Self::flush)
    pub fn set_batching(&self, batching: bool) {
        self.lock().batching = batching;
    }

    pub fn is_batching(&self) -> bool {
        self.lock().batching
    }

    /// Signal the sink if anything is pending; returns whether it did
    pub fn flush(&self) -> bool {
        let pending = !self.lock().commands.is_empty();
        if pending {
            self.sink.notify_commands_available(self.context_id);
        }
        pending
    }

    /// Mark the queue torn down; later appends fail
    pub fn close(&self) {
        self.lock().closed = true;
    }

    pub fn is_closed(&self) -> bool {
        self.lock().closed
    }

    pub fn len(&self) -> usize {
        self.lock().commands.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().commands.is_empty()
    }

    fn lock(&self) -> MutexGuard<'_, QueueState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl fmt::Debug for CommandQueue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.lock();
        f.debug_struct("CommandQueue")
            .field("context_id", &self.context_id)
            .field("pending", &state.commands.len())
            .field("batching", &state.batching)
            .field("closed", &state.closed)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct CountingSink(AtomicUsize);

    impl CommandSink for CountingSink {
        fn notify_commands_available(&self, _context_id: ContextId) {
            self.0.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn queue() -> (CommandQueue, Arc<CountingSink>) {
        let sink = Arc::new(CountingSink::default());
        (CommandQueue::new(1, sink.clone()), sink)
    }

    #[test]
    fn test_drain_preserves_order() {
        let (queue, _) = queue();
        queue.append(1, CommandKind::CreateElement, Some("div"), None, None).unwrap();
        queue.append(2, CommandKind::CreateTextNode, Some("hi"), None, None).unwrap();
        queue.append(1, CommandKind::SetStyle, Some("color"), Some("red"), None).unwrap();

        let batch = queue.drain_and_clear();
        let kinds: Vec<_> = batch.iter().map(Command::kind).collect();
        assert_eq!(
            kinds,
            vec![CommandKind::CreateElement, CommandKind::CreateTextNode, CommandKind::SetStyle]
        );
        assert!(queue.drain_and_clear().is_empty());
    }

    #[test]
    fn test_payload_copied() {
        let (queue, _) = queue();
        let mut source = String::from("width");
        queue.append(3, CommandKind::SetAttribute, Some(&source), Some("10"), None).unwrap();
        source.clear();
        source.push_str("mutated");

        let command = queue.drain_and_clear().into_iter().next().unwrap();
        assert_eq!(command.payload0().unwrap().to_string_lossy(), "width");
        assert_eq!(command.payload1().unwrap().to_string_lossy(), "10");
    }

    #[test]
    fn test_unbatched_signals_every_append() {
        let (queue, sink) = queue();
        queue.append(1, CommandKind::RemoveNode, None, None, None).unwrap();
        queue.append(2, CommandKind::RemoveNode, None, None, None).unwrap();
        assert_eq!(sink.0.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_batched_waits_for_flush() {
        let (queue, sink) = queue();
        queue.set_batching(true);
        queue.append(1, CommandKind::AddEvent, Some("click"), None, None).unwrap();
        queue.append(1, CommandKind::AddEvent, Some("touchstart"), None, None).unwrap();
        assert_eq!(sink.0.load(Ordering::SeqCst), 0);

        assert!(queue.flush());
        assert_eq!(sink.0.load(Ordering::SeqCst), 1);

        queue.drain_and_clear();
        assert!(!queue.flush());
        assert_eq!(sink.0.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_append_after_close_fails() {
        let (queue, sink) = queue();
        queue.append(1, CommandKind::CreateComment, Some("x"), None, None).unwrap();
        queue.close();

        let err = queue
            .append(1, CommandKind::CreateComment, Some("lost"), None, None)
            .unwrap_err();
        assert!(matches!(err, BridgeError::ContextDisposed(1)));
        assert_eq!(sink.0.load(Ordering::SeqCst), 1);

        // The final batch is still collectable.
        assert_eq!(queue.drain_and_clear().len(), 1);
    }

    #[test]
    fn test_native_pointer_passthrough() {
        let (queue, _) = queue();
        let native = NativePtr::new(0xdead_beef);
        queue.append(9, CommandKind::CloneNode, None, None, Some(native)).unwrap();
        let (target, kind, p0, p1, ptr) = queue.drain_and_clear().into_iter().next().unwrap().into_parts();
        assert_eq!(target, 9);
        assert_eq!(kind, CommandKind::CloneNode);
        assert!(p0.is_none() && p1.is_none());
        assert_eq!(ptr.map(NativePtr::address), Some(0xdead_beef));
    }

    #[test]
    fn test_utf16_payload() {
        let text = NativeString::new("🌍");
        assert_eq!(text.len(), 2);
        assert_eq!(text.into_units().len(), 2);
    }

    #[test]
    fn test_concurrent_drain_delivers_once() {
        let (queue, _) = queue();
        let queue = Arc::new(queue);
        let producer = {
            let queue = queue.clone();
            std::thread::spawn(move || {
                for i in 0..500 {
                    queue.append(i, CommandKind::SetAttribute, Some("k"), None, None).unwrap();
                }
            })
        };

        let mut seen = Vec::new();
        while seen.len() < 500 {
            seen.extend(queue.drain_and_clear().into_iter().map(|c| c.target_id()));
        }
        producer.join().unwrap();

        assert_eq!(seen, (0..500).collect::<Vec<_>>());
        assert!(queue.drain_and_clear().is_empty());
    }
}
