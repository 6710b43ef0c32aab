//! Query-logging database connection wrapper.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use sea_orm::{
    AccessMode, ConnectionTrait, DatabaseConnection, DatabaseTransaction, DbBackend, DbErr,
    ExecResult, IsolationLevel, QueryResult, Statement, StreamTrait, TransactionError,
    TransactionTrait,
};
use tracing::{field, warn, Instrument, Span};

use crate::batch::CapturedQuery;
use crate::error::Result as LogResult;
use crate::logger::QueryLogger;

/// A named `DatabaseConnection` that reports every statement it runs to a
/// [`QueryLogger`].
///
/// Implements `ConnectionTrait`, `StreamTrait` and `TransactionTrait`, so it
/// can be passed anywhere sea-orm takes a connection. Each statement also
/// gets a `db.query` span, nested under whatever span is current.
///
/// Statements that run on a `DatabaseTransaction` obtained from this
/// connection go straight to the driver and aren't reported.
///
/// # Example
///
/// ```rust,ignore
/// use std::sync::Arc;
/// use sea_orm::Database;
/// use sea_orm_query_log::{QueryLogExt, QueryLogger};
///
/// let db = Database::connect("postgres://localhost/mydb").await?;
/// let db = db.with_query_log("primary", Arc::new(logger));
///
/// db.begin_capture();
/// let users = Users::find().all(&db).await?;
/// db.end_capture_and_flush()?;
/// ```
#[derive(Debug)]
pub struct LoggedConnection {
    inner: DatabaseConnection,
    name: String,
    logger: Arc<QueryLogger>,
}

impl LoggedConnection {
    pub fn new(
        connection: DatabaseConnection,
        name: impl Into<String>,
        logger: Arc<QueryLogger>,
    ) -> Self {
        Self {
            inner: connection,
            name: name.into(),
            logger,
        }
    }

    pub fn inner(&self) -> &DatabaseConnection {
        &self.inner
    }

    /// Connection name used in log lines and the connection filter.
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn logger(&self) -> &QueryLogger {
        &self.logger
    }

    pub fn into_inner(self) -> DatabaseConnection {
        self.inner
    }

    /// Start buffering this connection's statements.
    pub fn begin_capture(&self) {
        self.logger.begin_capture(&self.name);
    }

    /// Write the buffered statements as one batch.
    pub fn end_capture_and_flush(&self) -> LogResult<Vec<CapturedQuery>> {
        self.logger.end_capture_and_flush(&self.name)
    }

    fn db_system(&self) -> &'static str {
        match self.inner.get_database_backend() {
            DbBackend::Postgres => "postgresql",
            DbBackend::MySql => "mysql",
            DbBackend::Sqlite => "sqlite",
        }
    }

    fn create_span(&self) -> Span {
        tracing::info_span!(
            "db.query",
            db.system = %self.db_system(),
            db.connection = %self.name,
            db.duration_ms = field::Empty,
            otel.status_code = field::Empty,
            error.message = field::Empty,
        )
    }

    /// Record the outcome in the span and report successful statements.
    fn finish<T>(&self, span: &Span, stmt: &Statement, result: &Result<T, DbErr>, start: Instant) {
        let millis = elapsed_millis(start);
        span.record("db.duration_ms", millis);

        match result {
            Ok(_) => {
                span.record("otel.status_code", "OK");
                self.report(stmt, millis);
            }
            Err(e) => {
                span.record("otel.status_code", "ERROR");
                span.record("error.message", e.to_string().as_str());
            }
        }
    }

    fn report(&self, stmt: &Statement, millis: f64) {
        let query = CapturedQuery::from_statement(stmt, self.name.as_str()).with_time(millis);
        if let Err(err) = self.logger.notify_query_executed(query) {
            warn!(connection = %self.name, error = %err, "query log write failed");
        }
    }
}

/// Milliseconds since `start`, to two decimals.
fn elapsed_millis(start: Instant) -> f64 {
    (start.elapsed().as_secs_f64() * 100_000.0).round() / 100.0
}

impl AsRef<DatabaseConnection> for LoggedConnection {
    fn as_ref(&self) -> &DatabaseConnection {
        &self.inner
    }
}

#[async_trait]
impl ConnectionTrait for LoggedConnection {
    fn get_database_backend(&self) -> DbBackend {
        self.inner.get_database_backend()
    }

    async fn execute(&self, stmt: Statement) -> Result<ExecResult, DbErr> {
        let span = self.create_span();
        let start = Instant::now();

        let result = self
            .inner
            .execute(stmt.clone())
            .instrument(span.clone())
            .await;

        self.finish(&span, &stmt, &result, start);
        result
    }

    async fn execute_unprepared(&self, sql: &str) -> Result<ExecResult, DbErr> {
        let stmt = Statement::from_string(self.get_database_backend(), sql);
        let span = self.create_span();
        let start = Instant::now();

        let result = self
            .inner
            .execute_unprepared(sql)
            .instrument(span.clone())
            .await;

        self.finish(&span, &stmt, &result, start);
        result
    }

    async fn query_one(&self, stmt: Statement) -> Result<Option<QueryResult>, DbErr> {
        let span = self.create_span();
        let start = Instant::now();

        let result = self
            .inner
            .query_one(stmt.clone())
            .instrument(span.clone())
            .await;

        self.finish(&span, &stmt, &result, start);
        result
    }

    async fn query_all(&self, stmt: Statement) -> Result<Vec<QueryResult>, DbErr> {
        let span = self.create_span();
        let start = Instant::now();

        let result = self
            .inner
            .query_all(stmt.clone())
            .instrument(span.clone())
            .await;

        self.finish(&span, &stmt, &result, start);
        result
    }

    fn support_returning(&self) -> bool {
        self.inner.support_returning()
    }

    fn is_mock_connection(&self) -> bool {
        self.inner.is_mock_connection()
    }
}

#[async_trait]
impl StreamTrait for LoggedConnection {
    type Stream<'a> = <DatabaseConnection as StreamTrait>::Stream<'a>;

    fn stream<'a>(
        &'a self,
        stmt: Statement,
    ) -> Pin<Box<dyn Future<Output = Result<Self::Stream<'a>, DbErr>> + 'a + Send>> {
        let span = self.create_span();
        let start = Instant::now();

        Box::pin(async move {
            // Timed until the stream opens; rows are read after we hand it back.
            let result = self
                .inner
                .stream(stmt.clone())
                .instrument(span.clone())
                .await;

            self.finish(&span, &stmt, &result, start);
            result
        })
    }
}

#[async_trait]
impl TransactionTrait for LoggedConnection {
    async fn begin(&self) -> Result<DatabaseTransaction, DbErr> {
        let span = transaction_span(self.db_system(), &self.name, "BEGIN");
        let result = self.inner.begin().instrument(span.clone()).await;
        record_status(&span, &result);
        result
    }

    async fn begin_with_config(
        &self,
        isolation_level: Option<IsolationLevel>,
        access_mode: Option<AccessMode>,
    ) -> Result<DatabaseTransaction, DbErr> {
        let span = transaction_span(self.db_system(), &self.name, "BEGIN");
        let result = self
            .inner
            .begin_with_config(isolation_level, access_mode)
            .instrument(span.clone())
            .await;
        record_status(&span, &result);
        result
    }

    async fn transaction<F, T, E>(&self, callback: F) -> Result<T, TransactionError<E>>
    where
        F: for<'c> FnOnce(
                &'c DatabaseTransaction,
            ) -> Pin<Box<dyn Future<Output = Result<T, E>> + Send + 'c>>
            + Send,
        T: Send,
        E: std::fmt::Display + std::fmt::Debug + Send,
    {
        let span = transaction_span(self.db_system(), &self.name, "TRANSACTION");
        let result = self
            .inner
            .transaction(callback)
            .instrument(span.clone())
            .await;
        record_status(&span, &result);
        result
    }

    async fn transaction_with_config<F, T, E>(
        &self,
        callback: F,
        isolation_level: Option<IsolationLevel>,
        access_mode: Option<AccessMode>,
    ) -> Result<T, TransactionError<E>>
    where
        F: for<'c> FnOnce(
                &'c DatabaseTransaction,
            ) -> Pin<Box<dyn Future<Output = Result<T, E>> + Send + 'c>>
            + Send,
        T: Send,
        E: std::fmt::Display + std::fmt::Debug + Send,
    {
        let span = transaction_span(self.db_system(), &self.name, "TRANSACTION");
        let result = self
            .inner
            .transaction_with_config(callback, isolation_level, access_mode)
            .instrument(span.clone())
            .await;
        record_status(&span, &result);
        result
    }
}

fn transaction_span(db_system: &str, connection: &str, operation: &'static str) -> Span {
    tracing::info_span!(
        "db.transaction",
        otel.name = operation,
        db.system = %db_system,
        db.connection = %connection,
        otel.status_code = field::Empty,
        error.message = field::Empty,
    )
}

fn record_status<T, E: std::fmt::Debug>(span: &Span, result: &Result<T, E>) {
    match result {
        Ok(_) => {
            span.record("otel.status_code", "OK");
        }
        Err(e) => {
            span.record("otel.status_code", "ERROR");
            span.record("error.message", format!("{:?}", e).as_str());
        }
    }
}

/// Extension trait for wrapping a connection with query logging.
pub trait QueryLogExt {
    /// Report this connection's statements to `logger` under `name`.
    fn with_query_log(self, name: impl Into<String>, logger: Arc<QueryLogger>) -> LoggedConnection;
}

impl QueryLogExt for DatabaseConnection {
    fn with_query_log(self, name: impl Into<String>, logger: Arc<QueryLogger>) -> LoggedConnection {
        LoggedConnection::new(self, name, logger)
    }
}
