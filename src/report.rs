//! Text reports written by the performance watchdog.

use std::time::Duration;

use crate::watchdog::QueryLogItem;

const RULE: &str = "--------------------------------------------------------------------------------";
const START: &str = "START===========================================================================";
const END: &str = "END=============================================================================";

/// Memory figures for one window, in bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct MemoryUsage {
    /// Reading taken when the window started.
    pub start: u64,
    /// Reading taken at flush.
    pub current: u64,
    /// Process peak at flush.
    pub peak: u64,
    /// `peak - start`.
    pub usage: u64,
}

impl MemoryUsage {
    pub fn new(start: u64, current: u64, peak: u64) -> Self {
        Self {
            start,
            current,
            peak,
            usage: peak.saturating_sub(start),
        }
    }
}

/// Everything a report needs about a finished window.
#[derive(Debug)]
pub struct WindowReport<'a> {
    pub date: String,
    pub duration: Duration,
    pub label: String,
    pub memory: MemoryUsage,
    pub items: Vec<&'a QueryLogItem>,
    pub min_queries: u64,
}

impl WindowReport<'_> {
    fn time_line(&self) -> String {
        format!("Time: \t\t\t{}ms", self.duration.as_millis())
    }

    fn version_line(&self) -> String {
        format!("Version: \t\t{}", version())
    }

    fn queries_line(&self) -> String {
        format!("DB Queries: \t\t{}", self.items.len())
    }

    fn memory_line(&self) -> String {
        format!("Memory: \t\t{}", format_bytes(self.memory.usage))
    }

    fn request_line(&self) -> String {
        format!("Request: \t\t\"{}\"", self.label)
    }

    /// One line: date, duration, version, query count, memory and label.
    pub fn summary(&self) -> String {
        let common = [
            self.time_line(),
            self.version_line(),
            self.queries_line(),
            self.memory_line(),
            self.request_line(),
        ];

        format!("{}: {}", self.date, common.join(", ").replace('\t', ""))
    }

    /// Header block followed by one block per query seen at least
    /// `min_queries` times, most frequent first.
    pub fn detailed(&self) -> String {
        let mut content = [
            START.to_owned(),
            format!("Date:\t\t\t{}", self.date),
            self.time_line(),
            self.version_line(),
            self.request_line(),
            format!("Memory Start:\t\t{}", format_bytes(self.memory.start)),
            format!("Memory Current:\t\t{}", format_bytes(self.memory.current)),
            format!("Memory Usage:\t\t{}", format_bytes(self.memory.usage)),
            format!("Memory Max Peak:\t{}", format_bytes(self.memory.peak)),
            self.queries_line(),
        ]
        .join("\n");

        // Stable, so ties keep first-seen order.
        let mut items = self.items.clone();
        items.sort_by(|a, b| b.count().cmp(&a.count()));

        for item in items.iter().filter(|item| item.count() >= self.min_queries) {
            content.push('\n');
            content.push_str(RULE);
            content.push('\n');
            content.push_str(&format!("Usage Count:\t\t{}\n", item.count()));
            content.push_str(&format!("Trace Count:\t\t{}\n", item.trace_count()));
            content.push_str(RULE);
            content.push('\n');
            content.push_str(item.sql());
            content.push('\n');
            content.push_str(RULE);
            content.push_str("\n\n");
            content.push_str(&item.traces().collect::<Vec<_>>().join("\n\n"));
            content.push('\n');
        }

        content.push('\n');
        content.push_str(END);
        content.push('\n');
        content
    }
}

/// Crate and platform the report was written by.
pub fn version() -> String {
    format!(
        "{} {} ({} {})",
        env!("CARGO_PKG_NAME"),
        env!("CARGO_PKG_VERSION"),
        std::env::consts::OS,
        std::env::consts::ARCH
    )
}

/// Human readable byte count: `B`, `KiB`, `MiB`, `GiB`, `TiB`, `PiB`.
pub fn format_bytes(bytes: u64) -> String {
    const UNITS: [&str; 6] = ["B", "KiB", "MiB", "GiB", "TiB", "PiB"];

    let mut value = bytes as f64;
    let mut unit = 0;
    while value > 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }

    let rounded = format!("{value:.2}");
    let rounded = rounded.trim_end_matches('0').trim_end_matches('.');
    format!("{} {}", rounded, UNITS[unit])
}
