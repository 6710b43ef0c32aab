//! Per unit-of-work query aggregation and threshold checks.
//!
//! A [`Watchdog`] owns exactly one aggregation window. The window moves
//! through three states and never goes back:
//!
//! ```text
//! idle --init()--> active --flush()--> flushed
//! ```
//!
//! While active, every observed statement is folded into a [`QueryLogItem`]
//! keyed by its whitespace-insensitive fingerprint. At flush the window's
//! duration, distinct query count and memory growth are compared against
//! the configured [`Thresholds`]; if any is reached the summary and/or
//! detailed report is appended to `bench.<type>.<YYYYMMDD>.log`.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Local;
use indexmap::IndexMap;
use tracing::{debug, info};

use crate::config::{Thresholds, WatchdogConfig};
use crate::error::Result;
use crate::format::fingerprint;
use crate::host::HostContext;
use crate::probe::{BacktraceSampler, MemoryProbe, ProcessMemory, TraceSampler};
use crate::report::{MemoryUsage, WindowReport};
use crate::writer::{append, ensure_directory};

/// Recorded in place of a stack when tracing is switched off.
pub const NO_TRACE: &str = "no trace";

/// One distinct statement seen during the window.
#[derive(Debug, Clone)]
pub struct QueryLogItem {
    fingerprint: String,
    sql: String,
    count: u64,
    traces: IndexMap<String, String>,
}

impl QueryLogItem {
    pub fn new(sql: &str) -> Self {
        Self {
            fingerprint: fingerprint(sql),
            sql: sql.to_owned(),
            count: 0,
            traces: IndexMap::new(),
        }
    }

    pub fn fingerprint(&self) -> &str {
        &self.fingerprint
    }

    /// SQL as it was first seen.
    pub fn sql(&self) -> &str {
        &self.sql
    }

    pub fn count(&self) -> u64 {
        self.count
    }

    pub fn increment(&mut self) -> &mut Self {
        self.count += 1;
        self
    }

    /// Record a stack sample; identical samples are kept once.
    pub fn add_trace(&mut self, trace: &str) -> &mut Self {
        if !trace.is_empty() {
            self.traces
                .entry(fingerprint(trace))
                .or_insert_with(|| trace.to_owned());
        }
        self
    }

    pub fn trace_count(&self) -> usize {
        self.traces.len()
    }

    pub fn traces(&self) -> impl Iterator<Item = &str> {
        self.traces.values().map(String::as_str)
    }
}

/// Measurements of a window at the moment it's checked.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WindowMetrics {
    pub duration: Duration,
    pub query_count: usize,
    pub memory: MemoryUsage,
}

impl Thresholds {
    /// Any single limit being reached is enough.
    pub fn is_exceeded(&self, metrics: &WindowMetrics) -> bool {
        metrics.query_count >= self.queries
            || metrics.duration >= self.time_limit()
            || metrics.memory.usage >= self.memory.bytes()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum WindowState {
    Idle,
    Active { started: Instant, memory_start: u64 },
    Flushed,
}

/// What a call to [`Watchdog::flush`] did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FlushOutcome {
    /// The window had already been flushed; nothing happened.
    AlreadyFlushed,
    /// The window never started.
    Inactive,
    /// No queries were observed.
    Empty,
    /// Nothing reached its threshold.
    BelowThreshold,
    /// Reports were appended to these files.
    Written {
        summary: Option<PathBuf>,
        detailed: Option<PathBuf>,
    },
}

/// The aggregation window for one request or command.
pub struct Watchdog {
    config: WatchdogConfig,
    host: Arc<dyn HostContext>,
    memory: Box<dyn MemoryProbe>,
    sampler: Box<dyn TraceSampler>,
    state: WindowState,
    queries: IndexMap<String, QueryLogItem>,
}

impl std::fmt::Debug for Watchdog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Watchdog")
            .field("mode", &self.config.mode)
            .field("state", &self.state)
            .field("queries", &self.queries.len())
            .finish()
    }
}

impl Watchdog {
    pub fn new(config: WatchdogConfig, host: Arc<dyn HostContext>) -> Self {
        Self {
            config,
            host,
            memory: Box::new(ProcessMemory),
            sampler: Box::new(BacktraceSampler),
            state: WindowState::Idle,
            queries: IndexMap::new(),
        }
    }

    pub fn with_memory_probe(mut self, probe: impl MemoryProbe + 'static) -> Self {
        self.memory = Box::new(probe);
        self
    }

    pub fn with_trace_sampler(mut self, sampler: impl TraceSampler + 'static) -> Self {
        self.sampler = Box::new(sampler);
        self
    }

    pub fn config(&self) -> &WatchdogConfig {
        &self.config
    }

    /// Start the window: the clock starts and a memory baseline is taken.
    ///
    /// Does nothing when the watchdog is disabled or the window has already
    /// been started. Returns whether the window is active.
    pub fn init(&mut self) -> bool {
        if self.state == WindowState::Idle && self.config.mode.is_active() {
            self.state = WindowState::Active {
                started: Instant::now(),
                memory_start: self.memory.current(),
            };
            debug!(mode = ?self.config.mode, "performance watchdog started");
        }
        self.is_active()
    }

    pub fn is_active(&self) -> bool {
        matches!(self.state, WindowState::Active { .. })
    }

    pub fn is_flushed(&self) -> bool {
        self.state == WindowState::Flushed
    }

    /// Count one execution of `sql`. Ignored unless the window is active.
    pub fn observe(&mut self, sql: &str) {
        if !self.is_active() {
            return;
        }

        let trace = if self.config.mode.traces() {
            Some(match self.config.trace {
                Some(depth) => self.sampler.sample(depth),
                None => NO_TRACE.to_owned(),
            })
        } else {
            None
        };

        let item = self
            .queries
            .entry(fingerprint(sql))
            .or_insert_with(|| QueryLogItem::new(sql));
        item.increment();

        if let Some(trace) = trace {
            item.add_trace(&trace);
        }
    }

    /// Number of distinct statements seen.
    pub fn query_count(&self) -> usize {
        self.queries.len()
    }

    /// Distinct statements in the order they were first seen.
    pub fn items(&self) -> impl Iterator<Item = &QueryLogItem> {
        self.queries.values()
    }

    /// The item `sql` was folded into, if it has been seen.
    pub fn item(&self, sql: &str) -> Option<&QueryLogItem> {
        self.queries.get(&fingerprint(sql))
    }

    /// Current measurements, while the window is active.
    pub fn metrics(&self) -> Option<WindowMetrics> {
        match self.state {
            WindowState::Active {
                started,
                memory_start,
            } => Some(self.measure(started, memory_start)),
            _ => None,
        }
    }

    fn measure(&self, started: Instant, memory_start: u64) -> WindowMetrics {
        WindowMetrics {
            duration: started.elapsed(),
            query_count: self.queries.len(),
            memory: MemoryUsage::new(memory_start, self.memory.current(), self.memory.peak()),
        }
    }

    /// Whether `metrics` warrant a report.
    pub fn should_log(&self, metrics: &WindowMetrics) -> bool {
        self.config.mode.is_active()
            && metrics.query_count > 0
            && self.config.threshold.is_exceeded(metrics)
    }

    /// End the window and write reports if a threshold was reached.
    ///
    /// Only the first call does anything; later calls return
    /// [`FlushOutcome::AlreadyFlushed`].
    pub fn flush(&mut self) -> Result<FlushOutcome> {
        let (started, memory_start) = match std::mem::replace(&mut self.state, WindowState::Flushed) {
            WindowState::Flushed => return Ok(FlushOutcome::AlreadyFlushed),
            WindowState::Idle => return Ok(FlushOutcome::Inactive),
            WindowState::Active {
                started,
                memory_start,
            } => (started, memory_start),
        };

        if self.queries.is_empty() {
            return Ok(FlushOutcome::Empty);
        }

        let metrics = self.measure(started, memory_start);
        if !self.should_log(&metrics) {
            debug!(
                queries = metrics.query_count,
                duration_ms = metrics.duration.as_millis() as u64,
                "performance watchdog below thresholds"
            );
            return Ok(FlushOutcome::BelowThreshold);
        }

        let report = WindowReport {
            date: Local::now().format("%Y%m%d %H:%M:%S").to_string(),
            duration: metrics.duration,
            label: self.label(),
            memory: metrics.memory,
            items: self.queries.values().collect(),
            min_queries: self.config.min_queries,
        };

        let mode = self.config.mode;
        let summary = if mode.writes_summary() {
            Some(self.append_report("summary", &report.summary())?)
        } else {
            None
        };
        let detailed = if mode.writes_detailed() {
            Some(self.append_report("detailed", &report.detailed())?)
        } else {
            None
        };

        info!(
            queries = metrics.query_count,
            duration_ms = metrics.duration.as_millis() as u64,
            label = %report.label,
            "performance watchdog report written"
        );

        Ok(FlushOutcome::Written { summary, detailed })
    }

    fn label(&self) -> String {
        let label = self.host.unit_label();
        if label.is_empty() {
            "Unknown Environment".to_owned()
        } else if self.host.is_console() {
            format!("CLI: {label}")
        } else {
            label
        }
    }

    fn append_report(&self, kind: &str, content: &str) -> Result<PathBuf> {
        let dir = &self.config.log_path;
        ensure_directory(dir)?;

        let path = dir.join(format!(
            "bench.{}.{}.log",
            kind,
            Local::now().format("%Y%m%d")
        ));
        append(&path, &format!("{content}\n"))?;
        Ok(path)
    }
}
