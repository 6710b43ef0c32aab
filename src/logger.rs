//! The query logging service the host talks to.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use parking_lot::Mutex;
use sea_orm::Statement;
use tracing::debug;

use crate::batch::{CapturedQuery, ExecutionContext, LineFormat, QueryBatch};
use crate::config::{CaptureMode, QueryLogConfig};
use crate::error::Result;
use crate::hooks::SharedWatchdog;
use crate::host::HostContext;
use crate::writer::RotatingFileWriter;

/// Receives executed statements and writes them to the rotating query log.
///
/// With the `listener` handler every statement is written as soon as it's
/// reported. With `middleware` statements are buffered between
/// [`begin_capture`](Self::begin_capture) and
/// [`end_capture_and_flush`](Self::end_capture_and_flush) and written as one
/// batch.
///
/// An attached [`SharedWatchdog`] sees every reported statement, whether or
/// not the query log itself is enabled.
///
/// # Example
///
/// ```rust,no_run
/// use std::sync::Arc;
/// use sea_orm_query_log::{CapturedQuery, Config, QueryLogger, StaticHost};
///
/// let config = Config::load("query-log.toml")?;
/// let host = Arc::new(StaticHost::current_process("local"));
/// let logger = QueryLogger::new(config.query_log, host);
///
/// logger.notify_query_executed(CapturedQuery::new("SELECT 1", "primary").with_time(0.4))?;
/// # Ok::<(), sea_orm_query_log::Error>(())
/// ```
pub struct QueryLogger {
    config: Arc<QueryLogConfig>,
    host: Arc<dyn HostContext>,
    writer: RotatingFileWriter,
    watchdog: Option<SharedWatchdog>,
    captures: Mutex<HashMap<String, Vec<CapturedQuery>>>,
}

impl std::fmt::Debug for QueryLogger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QueryLogger")
            .field("config", &self.config)
            .field("writer", &self.writer)
            .field("watchdog", &self.watchdog.is_some())
            .finish()
    }
}

impl QueryLogger {
    pub fn new(config: QueryLogConfig, host: Arc<dyn HostContext>) -> Self {
        let writer = RotatingFileWriter::new(config.log_path.clone(), config.max_files);
        Self {
            config: Arc::new(config),
            host,
            writer,
            watchdog: None,
            captures: Mutex::new(HashMap::new()),
        }
    }

    pub fn with_writer(mut self, writer: RotatingFileWriter) -> Self {
        self.writer = writer;
        self
    }

    pub fn with_watchdog(mut self, watchdog: SharedWatchdog) -> Self {
        self.watchdog = Some(watchdog);
        self
    }

    pub fn config(&self) -> &QueryLogConfig {
        &self.config
    }

    pub fn watchdog(&self) -> Option<&SharedWatchdog> {
        self.watchdog.as_ref()
    }

    pub fn is_enabled(&self) -> bool {
        self.config.enabled
    }

    /// The capture mode in effect for the current unit of work.
    ///
    /// Console invocations use the listener when `console_logging` is on,
    /// since there's no request to wrap.
    pub fn handler(&self) -> CaptureMode {
        if self.host.is_console() && self.config.console_logging {
            return CaptureMode::Listener;
        }
        self.config.handler
    }

    /// Logging is enabled and, if `handler` is given, it's the active one.
    pub fn is_logging(&self, handler: Option<CaptureMode>) -> bool {
        match handler {
            Some(handler) => self.is_enabled() && self.handler() == handler,
            None => self.is_enabled(),
        }
    }

    /// Whether statements on `connection` are logged at all.
    pub fn should_log(&self, connection: &str) -> bool {
        self.config.connection.allows(connection)
    }

    pub fn context(&self) -> ExecutionContext {
        ExecutionContext::from_console(self.host.is_console())
    }

    /// Templates and surroundings for lines written right now.
    pub fn line_format(&self) -> LineFormat {
        let environment = self.host.environment();
        LineFormat {
            single: self.config.log_format_single.clone(),
            multi: self.config.log_format_multi.clone(),
            before_boundary: self.config.log_before_boundary.clone(),
            after_boundary: self.config.log_after_boundary.clone(),
            production: self.config.is_production(&environment),
            environment,
            label: self.host.unit_label(),
            handler: self.handler(),
        }
    }

    /// Report one executed statement.
    pub fn notify_query_executed(&self, query: CapturedQuery) -> Result<()> {
        if let Some(watchdog) = &self.watchdog {
            watchdog.observe(query.sql());
        }

        if !self.should_log(query.connection()) {
            return Ok(());
        }

        if self.is_logging(Some(CaptureMode::Listener)) {
            let connection = query.connection().to_owned();
            self.log_queries(vec![query], &connection)?;
        } else if self.is_logging(Some(CaptureMode::Middleware)) {
            if let Some(buffer) = self.captures.lock().get_mut(query.connection()) {
                buffer.push(query);
            }
        }

        Ok(())
    }

    /// Start buffering statements for `connection`.
    ///
    /// Only has an effect while the middleware handler is active. Starting
    /// again discards anything buffered so far.
    pub fn begin_capture(&self, connection: &str) {
        if self.is_logging(Some(CaptureMode::Middleware)) {
            self.captures.lock().insert(connection.to_owned(), vec![]);
        }
    }

    /// Whether statements on `connection` are currently being buffered.
    pub fn is_capturing(&self, connection: &str) -> bool {
        self.captures.lock().contains_key(connection)
    }

    /// Stop buffering for `connection`, write what was buffered as one batch
    /// and hand the statements back.
    pub fn end_capture_and_flush(&self, connection: &str) -> Result<Vec<CapturedQuery>> {
        let Some(queries) = self.captures.lock().remove(connection) else {
            return Ok(vec![]);
        };

        let batch = self.batch(queries, connection);
        self.write_batch(&batch)?;
        Ok(batch.into_queries())
    }

    /// Write `queries` as one batch, regardless of the handler.
    ///
    /// Returns the file written to, or `None` for an empty batch.
    pub fn log_queries(
        &self,
        queries: Vec<CapturedQuery>,
        connection: &str,
    ) -> Result<Option<PathBuf>> {
        let batch = self.batch(queries, connection);
        self.write_batch(&batch)
    }

    /// Log a single sea-orm statement.
    pub fn log_statement(&self, stmt: &Statement, connection: &str) -> Result<Option<PathBuf>> {
        let query = CapturedQuery::from_statement(stmt, connection);
        self.log_queries(vec![query], connection)
    }

    /// Write an already assembled batch.
    pub fn write_batch(&self, batch: &QueryBatch) -> Result<Option<PathBuf>> {
        debug!(
            "query count #{} for {}",
            batch.len(),
            self.host.unit_label()
        );

        if batch.is_empty() {
            return Ok(None);
        }

        let lines = batch.lines(&self.line_format());
        self.writer.write(lines, batch.context())
    }

    fn batch(&self, queries: Vec<CapturedQuery>, connection: &str) -> QueryBatch {
        QueryBatch::new(queries, connection, self.context())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ConnectionFilter, MemorySize, Thresholds, WatchdogConfig, WatchdogMode};
    use crate::format::BindValue;
    use crate::host::StaticHost;
    use crate::watchdog::tests::FixedMemory;
    use crate::watchdog::{FlushOutcome, Watchdog};
    use chrono::Local;
    use std::path::Path;

    fn config(dir: &Path, handler: CaptureMode) -> QueryLogConfig {
        QueryLogConfig::default()
            .with_enabled(true)
            .with_handler(handler)
            .with_log_path(dir)
            .with_formats("(:time) :query", "  (:time) :query")
            .with_boundaries(
                "BEFORE :handler :connection (:label)",
                "AFTER :handler :connection",
            )
    }

    fn web_logger(dir: &Path, handler: CaptureMode) -> QueryLogger {
        QueryLogger::new(
            config(dir, handler),
            Arc::new(StaticHost::web("http://localhost/users", "local")),
        )
    }

    fn today_file(dir: &Path, context: &str) -> PathBuf {
        dir.join(format!(
            "db_query.{}.{}.log",
            context,
            Local::now().format("%Y-%m-%d")
        ))
    }

    #[test]
    fn test_middleware_batch_end_to_end() {
        let dir = tempfile::tempdir().unwrap();
        let logger = web_logger(dir.path(), CaptureMode::Middleware);

        logger.begin_capture("test");
        logger
            .notify_query_executed(CapturedQuery::new("SELECT 1", "test"))
            .unwrap();
        logger
            .notify_query_executed(CapturedQuery::new("SELECT 2", "test"))
            .unwrap();

        // Nothing is written until the unit of work ends.
        assert!(!today_file(dir.path(), "web").exists());

        let queries = logger.end_capture_and_flush("test").unwrap();
        assert_eq!(queries.len(), 2);

        let content = std::fs::read_to_string(today_file(dir.path(), "web")).unwrap();
        assert_eq!(
            content,
            "BEFORE middleware test (http://localhost/users)\n\
             \x20\x20() SELECT 1\n\
             \x20\x20() SELECT 2\n\
             AFTER middleware test\n"
        );
        assert!(!logger.is_capturing("test"));
    }

    #[test]
    fn test_listener_writes_each_query() {
        let dir = tempfile::tempdir().unwrap();
        let logger = web_logger(dir.path(), CaptureMode::Listener);

        logger
            .notify_query_executed(
                CapturedQuery::new("SELECT * FROM users WHERE id = ?", "primary")
                    .with_bindings(vec![BindValue::Int(5)])
                    .with_time(1.25),
            )
            .unwrap();
        logger
            .notify_query_executed(CapturedQuery::new("SELECT 2", "primary"))
            .unwrap();

        let content = std::fs::read_to_string(today_file(dir.path(), "web")).unwrap();
        assert_eq!(
            content,
            "(1.25) SELECT * FROM users WHERE id = 5\n() SELECT 2\n"
        );
    }

    #[test]
    fn test_listener_ignores_capture_buffers() {
        let dir = tempfile::tempdir().unwrap();
        let logger = web_logger(dir.path(), CaptureMode::Listener);

        logger.begin_capture("primary");
        assert!(!logger.is_capturing("primary"));
        assert!(logger.end_capture_and_flush("primary").unwrap().is_empty());
    }

    #[test]
    fn test_middleware_without_capture_drops_queries() {
        let dir = tempfile::tempdir().unwrap();
        let logger = web_logger(dir.path(), CaptureMode::Middleware);

        logger
            .notify_query_executed(CapturedQuery::new("SELECT 1", "test"))
            .unwrap();
        assert!(logger.end_capture_and_flush("test").unwrap().is_empty());
        assert!(!dir.path().join("web").exists());
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[test]
    fn test_empty_capture_writes_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let logger = web_logger(dir.path().join("db").as_path(), CaptureMode::Middleware);

        logger.begin_capture("test");
        assert!(logger.end_capture_and_flush("test").unwrap().is_empty());
        assert!(!dir.path().join("db").exists());
    }

    #[test]
    fn test_connection_filter() {
        let dir = tempfile::tempdir().unwrap();
        let logger = QueryLogger::new(
            config(dir.path(), CaptureMode::Listener)
                .with_connections(ConnectionFilter::parse("primary")),
            Arc::new(StaticHost::web("/", "local")),
        );

        assert!(logger.should_log("primary"));
        assert!(!logger.should_log("analytics"));

        logger
            .notify_query_executed(CapturedQuery::new("SELECT 1", "analytics"))
            .unwrap();
        assert!(!today_file(dir.path(), "web").exists());
    }

    #[test]
    fn test_disabled_logger_writes_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let logger = QueryLogger::new(
            config(dir.path(), CaptureMode::Listener).with_enabled(false),
            Arc::new(StaticHost::web("/", "local")),
        );

        assert!(!logger.is_logging(None));
        logger
            .notify_query_executed(CapturedQuery::new("SELECT 1", "primary"))
            .unwrap();
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[test]
    fn test_console_uses_listener() {
        let dir = tempfile::tempdir().unwrap();
        let host = Arc::new(StaticHost::console(["app", "migrate"], "local"));
        let logger = QueryLogger::new(config(dir.path(), CaptureMode::Middleware), host.clone());

        assert_eq!(logger.handler(), CaptureMode::Listener);
        assert!(logger.is_logging(Some(CaptureMode::Listener)));
        assert!(!logger.is_logging(Some(CaptureMode::Middleware)));

        logger
            .notify_query_executed(CapturedQuery::new("CREATE TABLE t (id INT)", "primary"))
            .unwrap();
        let content = std::fs::read_to_string(today_file(dir.path(), "console")).unwrap();
        assert_eq!(content, "() CREATE TABLE t (id INT)\n");

        let logger = QueryLogger::new(
            config(dir.path(), CaptureMode::Middleware).with_console_logging(false),
            host,
        );
        assert_eq!(logger.handler(), CaptureMode::Middleware);
    }

    #[test]
    fn test_production_hides_bindings() {
        let dir = tempfile::tempdir().unwrap();
        let logger = QueryLogger::new(
            config(dir.path(), CaptureMode::Listener),
            Arc::new(StaticHost::web("/", "production")),
        );

        logger
            .notify_query_executed(
                CapturedQuery::new("SELECT * FROM users WHERE email = ?", "primary")
                    .with_bindings(vec![BindValue::from("a@example.com")]),
            )
            .unwrap();

        let content = std::fs::read_to_string(today_file(dir.path(), "web")).unwrap();
        assert_eq!(content, "() SELECT * FROM users WHERE email = ?\n");
    }

    #[test]
    fn test_batch_lines_written_once_per_call() {
        let dir = tempfile::tempdir().unwrap();
        let logger = web_logger(dir.path(), CaptureMode::Listener);

        let batch = QueryBatch::new(
            vec![CapturedQuery::new("SELECT 1", "test")],
            "test",
            ExecutionContext::Web,
        );
        logger.write_batch(&batch).unwrap();
        logger.write_batch(&batch).unwrap();

        let content = std::fs::read_to_string(today_file(dir.path(), "web")).unwrap();
        assert_eq!(content, "() SELECT 1\n() SELECT 1\n");
    }

    #[test]
    fn test_log_statement() {
        use sea_orm::{DbBackend, Value};

        let dir = tempfile::tempdir().unwrap();
        let logger = web_logger(dir.path(), CaptureMode::Middleware);
        let stmt = Statement::from_sql_and_values(
            DbBackend::Sqlite,
            "DELETE FROM sessions WHERE id = ?",
            [Value::String(Some(Box::new("abc".to_owned())))],
        );

        logger.log_statement(&stmt, "sqlite").unwrap();
        let content = std::fs::read_to_string(today_file(dir.path(), "web")).unwrap();
        assert_eq!(content, "() DELETE FROM sessions WHERE id = 'abc'\n");
    }

    #[test]
    fn test_watchdog_sees_every_query() {
        let dir = tempfile::tempdir().unwrap();
        let watchdog = SharedWatchdog::new(
            Watchdog::new(
                WatchdogConfig::default()
                    .with_mode(WatchdogMode::Summary)
                    .with_log_path(dir.path().join("bench"))
                    .with_thresholds(Thresholds {
                        time: 0,
                        queries: 1,
                        memory: MemorySize(0),
                    }),
                Arc::new(StaticHost::web("/", "local")),
            )
            .with_memory_probe(FixedMemory {
                current: 0,
                peak: 0,
            }),
        );
        watchdog.init();

        // The query log itself is off; the watchdog still counts.
        let logger = QueryLogger::new(
            config(dir.path(), CaptureMode::Listener).with_enabled(false),
            Arc::new(StaticHost::web("/", "local")),
        )
        .with_watchdog(watchdog.clone());

        for sql in ["SELECT 1", "SELECT  1", "SELECT 2"] {
            logger
                .notify_query_executed(CapturedQuery::new(sql, "primary"))
                .unwrap();
        }

        assert_eq!(watchdog.query_count(), 2);
        assert!(matches!(
            watchdog.flush().unwrap(),
            FlushOutcome::Written { .. }
        ));
    }
}
