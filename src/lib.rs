//! # sea-orm-query-log
//!
//! Rotating SQL query logs and a per-request performance watchdog for SeaORM.
//!
//! Statements run through a [`LoggedConnection`] are rendered with their
//! bindings substituted and appended to daily log files, one per execution
//! context (`web` or `console`). Alongside, a [`Watchdog`] counts distinct
//! statements per unit of work and writes a summary or detailed report when
//! the unit of work goes over its query, time or memory thresholds.
//!
//! ## Features
//!
//! - **Two capture modes**: write each statement as it runs (`listener`) or
//!   buffer a whole request and write it as one bracketed batch (`middleware`)
//! - **Templated lines**: `:date`, `:connection`, `:time`, `:query` and friends
//! - **Rotation**: keeps the newest `max_files` daily files per context
//! - **Production safe**: bindings are left out in production environments
//! - **N+1 detection**: statements differing only in whitespace are counted
//!   together, with a sample call site per distinct trace
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use sea_orm::Database;
//! use sea_orm_query_log::prelude::*;
//!
//! let config = Config::load("query-log.toml")?;
//! let logger = Arc::new(QueryLogger::new(
//!     config.query_log,
//!     Arc::new(StaticHost::current_process("local")),
//! ));
//!
//! let db = Database::connect("postgres://localhost/mydb").await?;
//! let db = db.with_query_log("primary", logger);
//!
//! let users = Users::find().all(&db).await?;
//! ```
//!
//! ## Configuration
//!
//! ```toml
//! [query_log]
//! enabled = true
//! handler = "middleware"
//! max_files = 10
//! log_path = "storage/logs/db"
//! connection = "primary,analytics"
//!
//! [performance_watchdog]
//! mode = "both"
//! trace = 10
//! log_path = "storage/logs/bench"
//!
//! [performance_watchdog.threshold]
//! time = 1000
//! queries = 50
//! memory = "35MB"
//! ```
//!
//! ## Span Attributes
//!
//! | Attribute | Description |
//! |-----------|-------------|
//! | `db.system` | "postgresql", "mysql" or "sqlite" |
//! | `db.connection` | Name the connection was wrapped with |
//! | `db.duration_ms` | Execution time |
//! | `otel.status_code` | "OK" or "ERROR" |
//! | `error.message` | Error details (on failure) |

pub mod config;
mod batch;
mod connection;
mod error;
mod format;
mod hooks;
mod host;
mod logger;
mod probe;
mod report;
mod template;
mod watchdog;
mod writer;

pub use batch::{CapturedQuery, ExecutionContext, LineFormat, QueryBatch};
pub use config::{
    CaptureMode, Config, ConnectionFilter, MemorySize, QueryLogConfig, Thresholds,
    WatchdogConfig, WatchdogMode,
};
pub use connection::{LoggedConnection, QueryLogExt};
pub use error::{Error, Result};
pub use format::{
    fingerprint, format_sql, format_sql_with, format_statement, normalize_whitespace, BindValue,
    Placeholder,
};
pub use hooks::{FlushGuard, SharedWatchdog};
pub use host::{HostContext, StaticHost};
pub use logger::QueryLogger;
pub use probe::{BacktraceSampler, MemoryProbe, ProcessMemory, TraceSampler};
pub use report::{format_bytes, MemoryUsage};
pub use template::{escape_html, render, Tokens};
pub use watchdog::{FlushOutcome, QueryLogItem, Watchdog, WindowMetrics};
pub use writer::RotatingFileWriter;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::{
        CaptureMode, Config, LoggedConnection, QueryLogExt, QueryLogger, SharedWatchdog,
        StaticHost, Watchdog,
    };
}
