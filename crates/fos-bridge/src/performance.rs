//! Performance Timeline
//!
//! Per-context log of marks and measures, merged on query with entries the
//! host records on its side (controller init, viewport creation, ...).
//!
//! Timestamps are milliseconds relative to the context's time origin.

use crate::error::{BridgeError, Result};
use crate::ContextId;
use serde::Serialize;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

pub const PERF_BRIDGE_INIT_START: &str = "bridge_init_start";
pub const PERF_BRIDGE_INIT_END: &str = "bridge_init_end";
pub const PERF_BRIDGE_REGISTER_HOST_METHOD_START: &str = "bridge_register_host_method_start";
pub const PERF_BRIDGE_REGISTER_HOST_METHOD_END: &str = "bridge_register_host_method_end";
pub const PERF_CONTROLLER_INIT_START: &str = "controller_init_start";
pub const PERF_CONTROLLER_INIT_END: &str = "controller_init_end";
pub const PERF_CONTROLLER_PROPERTY_INIT: &str = "controller_properties_init";
pub const PERF_CREATE_VIEWPORT_START: &str = "create_viewport_start";
pub const PERF_CREATE_VIEWPORT_END: &str = "create_viewport_end";
pub const PERF_JS_CONTEXT_INIT_START: &str = "js_context_start";
pub const PERF_JS_CONTEXT_INIT_END: &str = "js_context_end";
pub const PERF_JS_NATIVE_METHOD_INIT_START: &str = "init_native_method_start";
pub const PERF_JS_NATIVE_METHOD_INIT_END: &str = "init_native_method_end";
pub const PERF_JS_POLYFILL_INIT_START: &str = "init_js_polyfill_start";
pub const PERF_JS_POLYFILL_INIT_END: &str = "init_js_polyfill_end";

/// (measure name, start mark, end mark) pairs recorded by [`PerformanceTimeline::summary`]
const SUMMARY_MEASURES: &[(&str, &str, &str)] = &[
    ("bridge_init_cost", PERF_BRIDGE_INIT_START, PERF_BRIDGE_INIT_END),
    (
        "bridge_register_host_method_cost",
        PERF_BRIDGE_REGISTER_HOST_METHOD_START,
        PERF_BRIDGE_REGISTER_HOST_METHOD_END,
    ),
    ("widget_creation_cost", PERF_CONTROLLER_INIT_START, PERF_CONTROLLER_INIT_END),
    ("controller_properties_init_cost", PERF_CONTROLLER_INIT_START, PERF_CONTROLLER_PROPERTY_INIT),
    ("create_viewport_cost", PERF_CREATE_VIEWPORT_START, PERF_CREATE_VIEWPORT_END),
    ("js_context_init_cost", PERF_JS_CONTEXT_INIT_START, PERF_JS_CONTEXT_INIT_END),
    ("native_method_init_cost", PERF_JS_NATIVE_METHOD_INIT_START, PERF_JS_NATIVE_METHOD_INIT_END),
    ("polyfill_init_cost", PERF_JS_POLYFILL_INIT_START, PERF_JS_POLYFILL_INIT_END),
];

/// Entry type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum EntryType {
    Mark,
    Measure,
}

impl EntryType {
    pub fn as_str(&self) -> &'static str {
        match self {
            EntryType::Mark => "mark",
            EntryType::Measure => "measure",
        }
    }

    /// Parse a script-supplied type name
    pub fn parse(name: &str) -> Option<Self> {
        match name {
            "mark" => Some(EntryType::Mark),
            "measure" => Some(EntryType::Measure),
            _ => None,
        }
    }
}

impl fmt::Display for EntryType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Performance entry
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PerformanceEntry {
    pub name: String,
    pub entry_type: EntryType,
    pub start_time: f64,
    pub duration: f64,
}

impl PerformanceEntry {
    pub fn mark(name: impl Into<String>, start_time: f64) -> Self {
        Self { name: name.into(), entry_type: EntryType::Mark, start_time, duration: 0.0 }
    }

    fn measure(name: impl Into<String>, start_time: f64, duration: f64) -> Self {
        Self { name: name.into(), entry_type: EntryType::Measure, start_time, duration }
    }
}

/// Serialised form of `performance.toJSON()`
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TimelineSnapshot {
    pub now: f64,
    pub time_origin: f64,
}

/// Elapsed time since a context's time origin
pub trait Clock: Send + Sync {
    fn elapsed(&self) -> Duration;
}

/// Monotonic clock started at context construction
pub struct SystemClock {
    origin: Instant,
}

impl SystemClock {
    pub fn new() -> Self {
        Self { origin: Instant::now() }
    }
}

impl Default for SystemClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for SystemClock {
    fn elapsed(&self) -> Duration {
        self.origin.elapsed()
    }
}

/// Hand-driven clock for tests and replay
#[derive(Debug, Default)]
pub struct ManualClock {
    micros: AtomicU64,
}

impl ManualClock {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self, elapsed: Duration) {
        self.micros.store(elapsed.as_micros() as u64, Ordering::SeqCst);
    }

    pub fn advance(&self, by: Duration) {
        self.micros.fetch_add(by.as_micros() as u64, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn elapsed(&self) -> Duration {
        Duration::from_micros(self.micros.load(Ordering::SeqCst))
    }
}

/// Host-side producer of additional timeline entries
pub trait TimingSource: Send + Sync {
    fn fetch_entries(&self, context_id: ContextId) -> Vec<PerformanceEntry>;
}

/// Source used when the host records nothing
pub struct NoExternalEntries;

impl TimingSource for NoExternalEntries {
    fn fetch_entries(&self, _context_id: ContextId) -> Vec<PerformanceEntry> {
        Vec::new()
    }
}

/// Append-only per-context timeline
pub struct PerformanceTimeline {
    context_id: ContextId,
    entries: Vec<PerformanceEntry>,
    clock: Arc<dyn Clock>,
    external: Arc<dyn TimingSource>,
    /// Wall-clock origin, ms since the Unix epoch
    time_origin: f64,
}

impl PerformanceTimeline {
    pub fn new(context_id: ContextId, clock: Arc<dyn Clock>, external: Arc<dyn TimingSource>) -> Self {
        let time_origin = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_millis() as f64;
        Self {
            context_id,
            entries: Vec::new(),
            clock,
            external,
            time_origin,
        }
    }

    /// Timeline on the system clock with no host entries
    pub fn standalone(context_id: ContextId) -> Self {
        Self::new(context_id, Arc::new(SystemClock::new()), Arc::new(NoExternalEntries))
    }

    /// Milliseconds since the time origin, sub-millisecond part discarded
    pub fn now(&self) -> f64 {
        let micros = self.clock.elapsed().as_micros();
        (micros / 1000) as f64
    }

    pub fn time_origin(&self) -> f64 {
        self.time_origin
    }

    pub fn to_json(&self) -> TimelineSnapshot {
        TimelineSnapshot { now: self.now(), time_origin: self.time_origin }
    }

    /// Record a mark at `start_time`, or now
    pub fn mark(&mut self, name: &str, start_time: Option<f64>) -> &PerformanceEntry {
        let start_time = start_time.unwrap_or_else(|| self.now());
        self.push(PerformanceEntry::mark(name, start_time))
    }

    /// Record a measure between two marks
    ///
    /// Missing arguments fall back to "now" for the end and the time origin
    /// for the start. A named mark that does not exist is a reference error.
    pub fn measure(
        &mut self,
        name: &str,
        start_mark: Option<&str>,
        end_mark: Option<&str>,
    ) -> Result<&PerformanceEntry> {
        let start_mark = start_mark.filter(|mark| !mark.is_empty());
        let end_mark = end_mark.filter(|mark| !mark.is_empty());
        let now = self.now();

        let duration = if start_mark.is_none() && end_mark.is_none() {
            now
        } else {
            let merged = self.merged_entries();
            let lookup = |mark: &str| {
                merged
                    .iter()
                    .find(|entry| entry.name == mark)
                    .map(|entry| entry.start_time)
                    .ok_or_else(|| BridgeError::MarkNotFound { operation: "measure", mark: mark.to_string() })
            };
            let start = start_mark.map(&lookup).transpose()?;
            let end = end_mark.map(&lookup).transpose()?;

            match (start, end) {
                (Some(start), Some(end)) => end - start,
                (Some(start), None) => now - start,
                // The origin is zero on the relative scale.
                (None, Some(end)) => end,
                (None, None) => now,
            }
        };

        Ok(self.push(PerformanceEntry::measure(name, now, duration)))
    }

    /// Remove marks, all or those named `name`
    pub fn clear_marks(&mut self, name: Option<&str>) {
        self.clear(EntryType::Mark, name);
    }

    /// Remove measures, all or those named `name`
    pub fn clear_measures(&mut self, name: Option<&str>) {
        self.clear(EntryType::Measure, name);
    }

    pub fn entries(&self) -> Vec<PerformanceEntry> {
        self.merged_entries()
    }

    pub fn entries_by_name(&self, name: &str) -> Vec<PerformanceEntry> {
        let mut entries = self.merged_entries();
        entries.retain(|entry| entry.name == name);
        entries
    }

    pub fn entries_by_type(&self, entry_type: EntryType) -> Vec<PerformanceEntry> {
        let mut entries = self.merged_entries();
        entries.retain(|entry| entry.entry_type == entry_type);
        entries
    }

    /// Entries recorded by this context alone, in append order
    pub fn own_entries(&self) -> &[PerformanceEntry] {
        &self.entries
    }

    /// Measure every startup phase whose marks are both present
    ///
    /// Returns the number of measures recorded.
    pub fn summary(&mut self) -> usize {
        let mut recorded = 0;
        for &(name, start, end) in SUMMARY_MEASURES {
            match self.measure(name, Some(start), Some(end)) {
                Ok(_) => recorded += 1,
                Err(err) => tracing::debug!(measure = name, "summary skipped: {}", err),
            }
        }
        recorded
    }

    fn push(&mut self, entry: PerformanceEntry) -> &PerformanceEntry {
        self.entries.push(entry);
        &self.entries[self.entries.len() - 1]
    }

    fn clear(&mut self, entry_type: EntryType, name: Option<&str>) {
        self.entries.retain(|entry| {
            entry.entry_type != entry_type || name.is_some_and(|name| entry.name != name)
        });
    }

    /// Own entries plus host entries, fetched once per call
    ///
    /// Host entries force a sort by start time; own entries alone keep
    /// append order.
    fn merged_entries(&self) -> Vec<PerformanceEntry> {
        let external = self.external.fetch_entries(self.context_id);
        if external.is_empty() {
            return self.entries.clone();
        }

        let mut merged = external;
        merged.extend(self.entries.iter().cloned());
        merged.sort_by(|a, b| a.start_time.total_cmp(&b.start_time));
        merged
    }
}

impl fmt::Debug for PerformanceTimeline {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PerformanceTimeline")
            .field("context_id", &self.context_id)
            .field("entries", &self.entries.len())
            .field("time_origin", &self.time_origin)
            .finish()
    }
}
