//! Basic example showing how to use sea-orm-query-log.
//!
//! Runs a few statements against a mock database and writes the query log
//! and watchdog reports under the system temp directory.
//!
//! Run with: cargo run --example basic

use std::sync::Arc;

use sea_orm::{ConnectionTrait, DbBackend, MockDatabase, MockExecResult, Statement, Value};
use sea_orm_query_log::prelude::*;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info,sea_orm_query_log=debug".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let root = std::env::temp_dir().join("sea-orm-query-log-demo");
    let mut config = Config::development(&root);
    config.query_log = config.query_log.with_handler(CaptureMode::Middleware);

    let host = Arc::new(StaticHost::web("http://localhost/students/42", "local"));

    // One window per unit of work; flushed however it ends.
    let watchdog = SharedWatchdog::new(Watchdog::new(config.performance_watchdog, host.clone()));
    watchdog.init();
    watchdog.install_exit_hooks();
    tokio::spawn(watchdog.clone().flush_on_shutdown());
    let _guard = watchdog.guard();

    let logger = Arc::new(QueryLogger::new(config.query_log, host).with_watchdog(watchdog));

    let db = MockDatabase::new(DbBackend::Postgres)
        .append_exec_results((0..3).map(|_| MockExecResult {
            last_insert_id: 0,
            rows_affected: 1,
        }))
        .into_connection()
        .with_query_log("primary", logger);

    db.begin_capture();

    // The same statement run per row is what the watchdog reports on.
    for id in [1, 2, 3] {
        db.execute(Statement::from_sql_and_values(
            DbBackend::Postgres,
            "UPDATE grades SET reviewed = $1 WHERE student_id = $2",
            [Value::Bool(Some(true)), Value::Int(Some(id))],
        ))
        .await?;
    }

    let queries = db.end_capture_and_flush()?;
    tracing::info!(
        queries = queries.len(),
        path = %root.display(),
        "query log written"
    );

    Ok(())
}
