//! Configuration for query logging and the performance watchdog.
//!
//! The configuration is a static snapshot: it's read once, validated, and
//! handed to the components that need it. Nothing reloads it at runtime.

use std::fs::read_to_string;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{de, Deserialize, Deserializer};
use tracing::{info, warn};

use crate::error::{Error, Result};

/// Complete configuration snapshot.
///
/// # Example
///
/// ```rust
/// use sea_orm_query_log::Config;
///
/// let config = Config::from_toml(r#"
///     [query_log]
///     enabled = true
///     handler = "middleware"
///     connection = "primary,replica"
///
///     [performance_watchdog]
///     mode = "both"
///     threshold = { time = 250, queries = 20, memory = "16MB" }
/// "#).unwrap();
///
/// assert!(config.query_log.enabled);
/// assert_eq!(config.performance_watchdog.threshold.memory.bytes(), 16 * 1024 * 1024);
/// ```
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Rotating SQL query log.
    pub query_log: QueryLogConfig,
    /// Per-request performance watchdog.
    pub performance_watchdog: WatchdogConfig,
}

impl Config {
    /// Parse and validate configuration from TOML text.
    pub fn from_toml(source: &str) -> Result<Self> {
        let config: Config = toml::from_str(source)?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from disk, falling back to defaults if the file
    /// doesn't exist.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        match read_to_string(path) {
            Ok(source) => {
                let config = Self::from_toml(&source)?;
                info!("loaded \"{}\"", path.display());
                Ok(config)
            }
            Err(err) if err.kind() == ErrorKind::NotFound => {
                warn!(
                    "\"{}\" doesn't exist, loading defaults instead",
                    path.display()
                );
                Ok(Self::default())
            }
            Err(err) => Err(Error::io(path, err)),
        }
    }

    /// Check values that parse fine but can't be used.
    pub fn validate(&self) -> Result<()> {
        let log = &self.query_log;
        if log.enabled && (log.log_format_single.is_empty() || log.log_format_multi.is_empty()) {
            return Err(Error::Config(
                "query_log.log_format_single and query_log.log_format_multi must not be empty"
                    .into(),
            ));
        }
        Ok(())
    }

    /// Everything on, thresholds at zero, logs under `root`.
    ///
    /// **Warning**: Do not use in production as it logs all SQL and parameters.
    pub fn development(root: impl AsRef<Path>) -> Self {
        let root = root.as_ref();
        Self {
            query_log: QueryLogConfig::default()
                .with_enabled(true)
                .with_log_path(root.join("db")),
            performance_watchdog: WatchdogConfig::default()
                .with_mode(WatchdogMode::Both)
                .with_log_path(root.join("bench"))
                .with_thresholds(Thresholds {
                    time: 0,
                    queries: 0,
                    memory: MemorySize(0),
                }),
        }
    }
}

/// How queries reach the query log.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CaptureMode {
    /// Every executed statement is written as soon as it's observed.
    #[default]
    Listener,
    /// Statements are buffered for the unit of work and written at the end.
    Middleware,
}

impl CaptureMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            CaptureMode::Listener => "listener",
            CaptureMode::Middleware => "middleware",
        }
    }
}

impl std::fmt::Display for CaptureMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Which connections get logged.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum ConnectionFilter {
    #[default]
    All,
    Named(Vec<String>),
}

impl ConnectionFilter {
    /// Parse `"all"` or a comma separated list of connection names.
    pub fn parse(value: &str) -> Self {
        if value.trim() == "all" {
            return ConnectionFilter::All;
        }

        ConnectionFilter::Named(
            value
                .split(',')
                .map(str::trim)
                .filter(|name| !name.is_empty())
                .map(String::from)
                .collect(),
        )
    }

    pub fn allows(&self, connection: &str) -> bool {
        match self {
            ConnectionFilter::All => true,
            ConnectionFilter::Named(names) => names.iter().any(|name| name == connection),
        }
    }
}

impl<'de> Deserialize<'de> for ConnectionFilter {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let value = String::deserialize(deserializer)?;
        Ok(Self::parse(&value))
    }
}

/// Query log settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct QueryLogConfig {
    /// Master switch.
    /// Default: `false`
    pub enabled: bool,

    /// Capture mode for web requests.
    /// Default: `listener`
    pub handler: CaptureMode,

    /// Console invocations always use the listener handler.
    /// Default: `true`
    pub console_logging: bool,

    /// Number of dated files to keep per context. `0` keeps everything.
    /// Default: `10`
    pub max_files: usize,

    /// Directory holding `db_query.<context>.<date>.log` files.
    /// Default: `logs/db`
    pub log_path: PathBuf,

    /// Connections to log.
    /// Default: `all`
    pub connection: ConnectionFilter,

    /// Line template used when a batch holds a single query.
    pub log_format_single: String,

    /// Line template used for each query of a larger batch.
    pub log_format_multi: String,

    /// Boundary written before a batch of several queries. Empty disables it.
    pub log_before_boundary: String,

    /// Boundary written after a batch of several queries. Empty disables it.
    pub log_after_boundary: String,

    /// Environments in which bindings are never substituted into the SQL.
    /// Default: `["production", "staging"]`
    pub production_environments: Vec<String>,
}

impl Default for QueryLogConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            handler: CaptureMode::Listener,
            console_logging: true,
            max_files: 10,
            log_path: PathBuf::from("logs/db"),
            connection: ConnectionFilter::All,
            log_format_single: "[:date] [:connection] (:time ms) :query".into(),
            log_format_multi: "  [:date] (:time ms) :query".into(),
            log_before_boundary: "---------BOUNDARY :boundary-:handler [:env] (:label)---------"
                .into(),
            log_after_boundary: "---------BOUNDARY :boundary-:handler [:env] (:label)---------"
                .into(),
            production_environments: vec!["production".into(), "staging".into()],
        }
    }
}

impl QueryLogConfig {
    pub fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    pub fn with_handler(mut self, handler: CaptureMode) -> Self {
        self.handler = handler;
        self
    }

    pub fn with_console_logging(mut self, enabled: bool) -> Self {
        self.console_logging = enabled;
        self
    }

    pub fn with_max_files(mut self, max_files: usize) -> Self {
        self.max_files = max_files;
        self
    }

    pub fn with_log_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.log_path = path.into();
        self
    }

    pub fn with_connections(mut self, filter: ConnectionFilter) -> Self {
        self.connection = filter;
        self
    }

    pub fn with_formats(mut self, single: impl Into<String>, multi: impl Into<String>) -> Self {
        self.log_format_single = single.into();
        self.log_format_multi = multi.into();
        self
    }

    /// Set both boundary templates. Pass empty strings to disable them.
    pub fn with_boundaries(mut self, before: impl Into<String>, after: impl Into<String>) -> Self {
        self.log_before_boundary = before.into();
        self.log_after_boundary = after.into();
        self
    }

    /// Bindings are left out of the SQL in these environments.
    pub fn is_production(&self, environment: &str) -> bool {
        self.production_environments
            .iter()
            .any(|name| name == environment)
    }
}

/// What the watchdog writes, if anything.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum WatchdogMode {
    #[default]
    Disabled,
    Summary,
    Detailed,
    Both,
}

impl WatchdogMode {
    pub fn is_active(&self) -> bool {
        *self != WatchdogMode::Disabled
    }

    pub fn writes_summary(&self) -> bool {
        matches!(self, WatchdogMode::Summary | WatchdogMode::Both)
    }

    pub fn writes_detailed(&self) -> bool {
        matches!(self, WatchdogMode::Detailed | WatchdogMode::Both)
    }

    /// Stack traces are only worth sampling for the detailed report.
    pub fn traces(&self) -> bool {
        self.writes_detailed()
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum FlagOr<T> {
    Flag(bool),
    Value(T),
}

impl<'de> Deserialize<'de> for WatchdogMode {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        match FlagOr::<String>::deserialize(deserializer)? {
            FlagOr::Flag(false) => Ok(WatchdogMode::Disabled),
            FlagOr::Flag(true) => Err(de::Error::custom(
                "mode = true is ambiguous, use \"summary\", \"detailed\" or \"both\"",
            )),
            FlagOr::Value(name) => match name.to_lowercase().as_str() {
                "" | "false" => Ok(WatchdogMode::Disabled),
                "summary" => Ok(WatchdogMode::Summary),
                "detailed" => Ok(WatchdogMode::Detailed),
                "both" => Ok(WatchdogMode::Both),
                other => Err(de::Error::unknown_variant(
                    other,
                    &["false", "summary", "detailed", "both"],
                )),
            },
        }
    }
}

fn deserialize_trace<'de, D: Deserializer<'de>>(
    deserializer: D,
) -> std::result::Result<Option<usize>, D::Error> {
    match FlagOr::<usize>::deserialize(deserializer)? {
        FlagOr::Flag(false) | FlagOr::Value(0) => Ok(None),
        FlagOr::Flag(true) => Err(de::Error::custom("trace expects a depth or false")),
        FlagOr::Value(depth) => Ok(Some(depth)),
    }
}

/// A byte count, written in configuration as `"35MB"` or a plain integer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct MemorySize(pub u64);

impl MemorySize {
    pub fn bytes(&self) -> u64 {
        self.0
    }
}

impl std::str::FromStr for MemorySize {
    type Err = Error;

    fn from_str(value: &str) -> Result<Self> {
        parse_memory_size(value).map(MemorySize)
    }
}

impl<'de> Deserialize<'de> for MemorySize {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Raw {
            Bytes(u64),
            Text(String),
        }

        match Raw::deserialize(deserializer)? {
            Raw::Bytes(bytes) => Ok(MemorySize(bytes)),
            Raw::Text(text) => text.parse().map_err(de::Error::custom),
        }
    }
}

/// Convert a human memory size into bytes using binary multiples.
///
/// `KB`, `MB`, `GB`, `TB` and `PB` are recognized case-insensitively.
/// Without one of those suffixes the value must already be a byte count.
///
/// ```rust
/// use sea_orm_query_log::config::parse_memory_size;
///
/// assert_eq!(parse_memory_size("10MB").unwrap(), 10 * 1024 * 1024);
/// assert_eq!(parse_memory_size("2048").unwrap(), 2048);
/// assert!(parse_memory_size("lots").is_err());
/// ```
pub fn parse_memory_size(value: &str) -> Result<u64> {
    let value = value.trim();
    let invalid = || Error::Config(format!("unrecognized memory size \"{value}\""));

    let split = value.len().saturating_sub(2);
    let (number, unit) = if value.is_char_boundary(split) {
        value.split_at(split)
    } else {
        (value, "")
    };

    let exponent = match unit.to_ascii_uppercase().as_str() {
        "KB" => 1,
        "MB" => 2,
        "GB" => 3,
        "TB" => 4,
        "PB" => 5,
        _ => return value.parse::<u64>().map_err(|_| invalid()),
    };

    let number: f64 = number.trim().parse().map_err(|_| invalid())?;
    if !number.is_finite() || number < 0.0 {
        return Err(invalid());
    }

    Ok((number * 1024f64.powi(exponent)) as u64)
}

/// Limits that, once reached, make the watchdog write its reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct Thresholds {
    /// Wall-clock milliseconds.
    pub time: u64,
    /// Distinct queries.
    pub queries: usize,
    /// Memory used since the window started.
    pub memory: MemorySize,
}

impl Default for Thresholds {
    fn default() -> Self {
        Self {
            time: 1000,
            queries: 50,
            memory: MemorySize(35 * 1024 * 1024),
        }
    }
}

impl Thresholds {
    pub fn time_limit(&self) -> Duration {
        Duration::from_millis(self.time)
    }
}

/// Performance watchdog settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct WatchdogConfig {
    /// Default: `false` (disabled)
    pub mode: WatchdogMode,

    /// Stack depth sampled per distinct call site. `None` records `no trace`.
    /// Default: `10`
    #[serde(deserialize_with = "deserialize_trace")]
    pub trace: Option<usize>,

    /// Queries seen fewer times than this are left out of the detailed report.
    /// Default: `1`
    pub min_queries: u64,

    /// Directory holding `bench.<type>.<date>.log` files.
    /// Default: `logs/bench`
    pub log_path: PathBuf,

    pub threshold: Thresholds,
}

impl Default for WatchdogConfig {
    fn default() -> Self {
        Self {
            mode: WatchdogMode::Disabled,
            trace: Some(10),
            min_queries: 1,
            log_path: PathBuf::from("logs/bench"),
            threshold: Thresholds::default(),
        }
    }
}

impl WatchdogConfig {
    pub fn with_mode(mut self, mode: WatchdogMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn with_trace(mut self, depth: Option<usize>) -> Self {
        self.trace = depth.filter(|depth| *depth > 0);
        self
    }

    pub fn with_min_queries(mut self, min_queries: u64) -> Self {
        self.min_queries = min_queries;
        self
    }

    pub fn with_log_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.log_path = path.into();
        self
    }

    pub fn with_thresholds(mut self, threshold: Thresholds) -> Self {
        self.threshold = threshold;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert!(!config.query_log.enabled);
        assert_eq!(config.query_log.handler, CaptureMode::Listener);
        assert_eq!(config.query_log.max_files, 10);
        assert_eq!(config.performance_watchdog.mode, WatchdogMode::Disabled);
        assert_eq!(
            config.performance_watchdog.threshold.memory.bytes(),
            35 * 1024 * 1024
        );
    }

    #[test]
    fn test_memory_sizes() {
        assert_eq!(parse_memory_size("10MB").unwrap(), 10 * 1024u64.pow(2));
        assert_eq!(parse_memory_size("1GB").unwrap(), 1024u64.pow(3));
        assert_eq!(parse_memory_size("3kb").unwrap(), 3 * 1024);
        assert_eq!(parse_memory_size("1TB").unwrap(), 1024u64.pow(4));
        assert_eq!(parse_memory_size("2PB").unwrap(), 2 * 1024u64.pow(5));
        assert_eq!(parse_memory_size("1.5KB").unwrap(), 1536);
    }

    #[test]
    fn test_memory_size_without_unit_is_bytes() {
        assert_eq!(parse_memory_size("512").unwrap(), 512);
        assert_eq!(parse_memory_size("7").unwrap(), 7);
        assert!(parse_memory_size("12XB").is_err());
        assert!(parse_memory_size("MB").is_err());
        assert!(parse_memory_size("").is_err());
    }

    #[test]
    fn test_connection_filter() {
        assert!(ConnectionFilter::parse("all").allows("anything"));

        let filter = ConnectionFilter::parse("primary, replica");
        assert!(filter.allows("primary"));
        assert!(filter.allows("replica"));
        assert!(!filter.allows("analytics"));
    }

    #[test]
    fn test_from_toml() {
        let config = Config::from_toml(
            r#"
            [query_log]
            enabled = true
            handler = "middleware"
            max_files = 0
            log_path = "/tmp/db"
            connection = "test"

            [performance_watchdog]
            mode = "detailed"
            trace = false
            min_queries = 3

            [performance_watchdog.threshold]
            time = 200
            queries = 2
            memory = "10MB"
            "#,
        )
        .unwrap();

        assert_eq!(config.query_log.handler, CaptureMode::Middleware);
        assert_eq!(config.query_log.max_files, 0);
        assert_eq!(
            config.query_log.connection,
            ConnectionFilter::Named(vec!["test".into()])
        );
        // Untouched keys keep their defaults.
        assert!(config.query_log.console_logging);

        let watchdog = &config.performance_watchdog;
        assert_eq!(watchdog.mode, WatchdogMode::Detailed);
        assert_eq!(watchdog.trace, None);
        assert_eq!(watchdog.min_queries, 3);
        assert_eq!(watchdog.threshold.time_limit(), Duration::from_millis(200));
        assert_eq!(watchdog.threshold.memory.bytes(), 10 * 1024 * 1024);
    }

    #[test]
    fn test_mode_values() {
        let parse = |mode: &str| {
            Config::from_toml(&format!("[performance_watchdog]\nmode = {mode}"))
                .map(|c| c.performance_watchdog.mode)
        };

        assert_eq!(parse("false").unwrap(), WatchdogMode::Disabled);
        assert_eq!(parse("\"summary\"").unwrap(), WatchdogMode::Summary);
        assert_eq!(parse("\"both\"").unwrap(), WatchdogMode::Both);
        assert!(parse("true").is_err());
        assert!(parse("\"verbose\"").is_err());
    }

    #[test]
    fn test_bad_memory_threshold_fails_loudly() {
        let result = Config::from_toml(
            "[performance_watchdog.threshold]\nmemory = \"plenty\"",
        );
        assert!(result.is_err());
    }

    #[test]
    fn test_validate_rejects_empty_formats() {
        let mut config = Config::default();
        config.query_log.enabled = true;
        config.query_log.log_format_single.clear();
        assert!(matches!(config.validate(), Err(Error::Config(_))));
    }

    #[test]
    fn test_production_environments() {
        let config = QueryLogConfig::default();
        assert!(config.is_production("production"));
        assert!(config.is_production("staging"));
        assert!(!config.is_production("local"));
    }

    #[test]
    fn test_load_missing_file_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config::load(dir.path().join("missing.toml")).unwrap();
        assert!(!config.query_log.enabled);
    }
}
