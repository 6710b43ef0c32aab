//! Process memory readings and call stack samples for the watchdog.

use std::backtrace::Backtrace;

use once_cell::sync::Lazy;
use regex::Regex;

// "  12: some::function::name"
static FRAME_REGEX: Lazy<Regex> = Lazy::new(|| Regex::new(r"^\s*\d+:\s+(.+)$").unwrap());

/// Source of memory usage figures, in bytes.
pub trait MemoryProbe: Send + Sync {
    /// Memory in use right now.
    fn current(&self) -> u64;

    /// Highest memory use seen by the process so far.
    fn peak(&self) -> u64;
}

/// Reads resident set sizes from `/proc/self/status`.
///
/// Reports zero where procfs isn't available.
#[derive(Debug, Clone, Copy, Default)]
pub struct ProcessMemory;

impl ProcessMemory {
    fn status_kib(field: &str) -> Option<u64> {
        let status = std::fs::read_to_string("/proc/self/status").ok()?;
        status
            .lines()
            .find_map(|line| line.strip_prefix(field))
            .and_then(|rest| rest.trim_start_matches(':').split_whitespace().next())
            .and_then(|kib| kib.parse().ok())
    }
}

impl MemoryProbe for ProcessMemory {
    fn current(&self) -> u64 {
        Self::status_kib("VmRSS").unwrap_or(0) * 1024
    }

    fn peak(&self) -> u64 {
        Self::status_kib("VmHWM").unwrap_or(0) * 1024
    }
}

/// Produces a short, printable call stack.
pub trait TraceSampler: Send + Sync {
    /// At most `depth` frames, innermost first.
    fn sample(&self, depth: usize) -> String;
}

/// Samples the current thread's stack with [`std::backtrace`].
///
/// Frames belonging to the backtrace machinery and to this crate are left
/// out, so the first frame is the code that ran the query.
#[derive(Debug, Clone, Copy, Default)]
pub struct BacktraceSampler;

impl TraceSampler for BacktraceSampler {
    fn sample(&self, depth: usize) -> String {
        let backtrace = Backtrace::force_capture().to_string();
        format_frames(&backtrace, depth)
    }
}

fn is_internal(symbol: &str) -> bool {
    symbol.contains("std::backtrace")
        || (symbol.contains("sea_orm_query_log::") && !symbol.contains("::tests::"))
}

/// Turn rendered backtrace text into `1) symbol at file:line` lines.
pub(crate) fn format_frames(backtrace: &str, depth: usize) -> String {
    let mut frames: Vec<(String, Option<String>)> = vec![];

    for line in backtrace.lines() {
        if let Some(caps) = FRAME_REGEX.captures(line) {
            frames.push((caps[1].trim().to_owned(), None));
        } else if let Some(location) = line.trim().strip_prefix("at ") {
            if let Some((_, at)) = frames.last_mut() {
                at.get_or_insert_with(|| location.to_owned());
            }
        }
    }

    frames
        .into_iter()
        .filter(|(symbol, _)| !is_internal(symbol))
        .take(depth)
        .enumerate()
        .map(|(i, (symbol, at))| match at {
            Some(at) => format!("{}) {} at {}", i + 1, symbol, at),
            None => format!("{}) {}", i + 1, symbol),
        })
        .collect::<Vec<_>>()
        .join("\n\t")
}
