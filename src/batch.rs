//! Captured queries and turning a batch of them into log lines.

use chrono::Local;
use once_cell::sync::OnceCell;
use sea_orm::Statement;

use crate::config::CaptureMode;
use crate::format::{format_sql_with, statement_bindings, BindValue, Placeholder};
use crate::template::{render, Tokens};

/// One executed statement as the host observed it.
#[derive(Debug, Clone, PartialEq)]
pub struct CapturedQuery {
    sql: String,
    bindings: Vec<BindValue>,
    time: Option<f64>,
    connection: String,
    placeholder: Placeholder,
}

impl CapturedQuery {
    pub fn new(sql: impl Into<String>, connection: impl Into<String>) -> Self {
        Self {
            sql: sql.into(),
            bindings: vec![],
            time: None,
            connection: connection.into(),
            placeholder: Placeholder::Question,
        }
    }

    /// Capture a sea-orm statement run on `connection`.
    pub fn from_statement(stmt: &Statement, connection: impl Into<String>) -> Self {
        Self::new(stmt.sql.clone(), connection)
            .with_bindings(statement_bindings(stmt))
            .with_placeholder(Placeholder::for_backend(stmt.db_backend))
    }

    pub fn with_bindings(mut self, bindings: Vec<BindValue>) -> Self {
        self.bindings = bindings;
        self
    }

    /// Elapsed time in milliseconds.
    pub fn with_time(mut self, millis: f64) -> Self {
        self.time = Some(millis);
        self
    }

    pub fn with_placeholder(mut self, placeholder: Placeholder) -> Self {
        self.placeholder = placeholder;
        self
    }

    pub fn sql(&self) -> &str {
        &self.sql
    }

    pub fn bindings(&self) -> &[BindValue] {
        &self.bindings
    }

    /// Elapsed time in milliseconds, if the host measured it.
    pub fn time(&self) -> Option<f64> {
        self.time
    }

    pub fn connection(&self) -> &str {
        &self.connection
    }

    pub fn placeholder(&self) -> Placeholder {
        self.placeholder
    }

    /// The SQL with bindings substituted in.
    pub fn formatted_sql(&self) -> String {
        format_sql_with(&self.sql, &self.bindings, self.placeholder)
    }
}

/// Where the unit of work came from. Selects the log file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutionContext {
    Console,
    Web,
}

impl ExecutionContext {
    pub fn from_console(console: bool) -> Self {
        if console {
            ExecutionContext::Console
        } else {
            ExecutionContext::Web
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ExecutionContext::Console => "console",
            ExecutionContext::Web => "web",
        }
    }
}

impl std::fmt::Display for ExecutionContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Everything about the surroundings that ends up in a log line.
#[derive(Debug, Clone)]
pub struct LineFormat {
    pub single: String,
    pub multi: String,
    pub before_boundary: String,
    pub after_boundary: String,
    pub environment: String,
    pub label: String,
    pub handler: CaptureMode,
    /// Leave bindings out of the SQL.
    pub production: bool,
}

impl LineFormat {
    fn tokens(&self, connection: &str) -> Tokens {
        Tokens::new()
            .with(":date", Local::now().format("%Y-%m-%d %H:%M:%S"))
            .with(":env", &self.environment)
            .with(":label", &self.label)
            .with("@label", &self.label)
            .with(":handler", self.handler)
            .with(":connection", connection)
    }
}

/// Queries from one unit of work, formatted at most once.
#[derive(Debug)]
pub struct QueryBatch {
    queries: Vec<CapturedQuery>,
    connection: String,
    context: ExecutionContext,
    lines: OnceCell<Vec<String>>,
}

impl QueryBatch {
    pub fn new(
        queries: Vec<CapturedQuery>,
        connection: impl Into<String>,
        context: ExecutionContext,
    ) -> Self {
        Self {
            queries,
            connection: connection.into(),
            context,
            lines: OnceCell::new(),
        }
    }

    pub fn queries(&self) -> &[CapturedQuery] {
        &self.queries
    }

    pub fn connection(&self) -> &str {
        &self.connection
    }

    pub fn context(&self) -> ExecutionContext {
        self.context
    }

    pub fn len(&self) -> usize {
        self.queries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queries.is_empty()
    }

    pub fn into_queries(self) -> Vec<CapturedQuery> {
        self.queries
    }

    /// Log lines for the batch, in order:
    /// `[before boundary], query lines..., [after boundary]`.
    ///
    /// Boundaries only bracket batches of more than one query. The first
    /// call decides the lines; later calls return them unchanged.
    pub fn lines(&self, format: &LineFormat) -> &[String] {
        self.lines.get_or_init(|| self.build(format))
    }

    fn build(&self, format: &LineFormat) -> Vec<String> {
        if self.queries.is_empty() {
            return vec![];
        }

        let multi = self.queries.len() > 1;
        let template = if multi { &format.multi } else { &format.single };
        let mut lines = Vec::with_capacity(self.queries.len() + 2);

        if multi {
            lines.extend(self.boundary(format, &format.before_boundary, "before"));
        }

        for query in &self.queries {
            let sql = if format.production {
                query.sql().to_owned()
            } else {
                query.formatted_sql()
            };
            let time = query.time().map(|t| t.to_string()).unwrap_or_default();

            let tokens = format
                .tokens(&self.connection)
                .with(":time", time)
                .with(":query", sql);

            lines.push(render(template, &tokens));
        }

        if multi {
            lines.extend(self.boundary(format, &format.after_boundary, "after"));
        }

        lines
    }

    fn boundary(&self, format: &LineFormat, template: &str, kind: &str) -> Option<String> {
        if template.is_empty() {
            return None;
        }

        let tokens = format.tokens(&self.connection).with(":boundary", kind);
        Some(render(template, &tokens))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn line_format() -> LineFormat {
        LineFormat {
            single: "single (:time) :query".into(),
            multi: "multi (:time) :query @ :connection".into(),
            before_boundary: "BEGIN :boundary :handler [:env] (:label)".into(),
            after_boundary: "END :boundary".into(),
            environment: "testing".into(),
            label: "/users".into(),
            handler: CaptureMode::Middleware,
            production: false,
        }
    }

    fn query(sql: &str) -> CapturedQuery {
        CapturedQuery::new(sql, "test")
    }

    #[test]
    fn test_single_query_has_no_boundaries() {
        let batch = QueryBatch::new(
            vec![query("SELECT ?").with_bindings(vec![BindValue::Int(1)]).with_time(2.5)],
            "test",
            ExecutionContext::Web,
        );

        assert_eq!(batch.lines(&line_format()), ["single (2.5) SELECT 1"]);
    }

    #[test]
    fn test_multi_query_batch_is_bracketed() {
        let batch = QueryBatch::new(
            vec![query("SELECT 1"), query("SELECT 2"), query("SELECT 3")],
            "test",
            ExecutionContext::Web,
        );

        let lines = batch.lines(&line_format());
        assert_eq!(lines.len(), 5);
        assert_eq!(lines[0], "BEGIN before middleware [testing] (/users)");
        assert_eq!(lines[1], "multi () SELECT 1 @ test");
        assert_eq!(lines[2], "multi () SELECT 2 @ test");
        assert_eq!(lines[3], "multi () SELECT 3 @ test");
        assert_eq!(lines[4], "END after");
    }

    #[test]
    fn test_empty_boundaries_are_skipped() {
        let mut format = line_format();
        format.before_boundary.clear();
        format.after_boundary.clear();

        let batch = QueryBatch::new(
            vec![query("SELECT 1"), query("SELECT 2")],
            "test",
            ExecutionContext::Console,
        );

        assert_eq!(
            batch.lines(&format),
            ["multi () SELECT 1 @ test", "multi () SELECT 2 @ test"]
        );
    }

    #[test]
    fn test_empty_batch_has_no_lines() {
        let batch = QueryBatch::new(vec![], "test", ExecutionContext::Web);
        assert!(batch.is_empty());
        assert!(batch.lines(&line_format()).is_empty());
    }

    #[test]
    fn test_production_keeps_placeholders() {
        let mut format = line_format();
        format.production = true;

        let batch = QueryBatch::new(
            vec![query("SELECT * FROM users WHERE id = ?")
                .with_bindings(vec![BindValue::Int(9)])],
            "test",
            ExecutionContext::Web,
        );

        assert_eq!(
            batch.lines(&format),
            ["single () SELECT * FROM users WHERE id = ?"]
        );
    }

    #[test]
    fn test_lines_are_memoized() {
        let batch = QueryBatch::new(
            vec![query("SELECT 1"), query("SELECT 2")],
            "test",
            ExecutionContext::Web,
        );

        let first = batch.lines(&line_format()).to_vec();

        let mut other = line_format();
        other.multi = "changed :query".into();
        assert_eq!(batch.lines(&other), first.as_slice());
    }

    #[test]
    fn test_from_statement() {
        use sea_orm::{DbBackend, Value};

        let stmt = Statement::from_sql_and_values(
            DbBackend::Postgres,
            "SELECT * FROM grades WHERE student_id = $1",
            [Value::Int(Some(12))],
        );
        let query = CapturedQuery::from_statement(&stmt, "primary");

        assert_eq!(query.connection(), "primary");
        assert_eq!(query.placeholder(), Placeholder::Numbered);
        assert_eq!(query.bindings(), [BindValue::Int(12)]);
        assert_eq!(
            query.formatted_sql(),
            "SELECT * FROM grades WHERE student_id = 12"
        );
    }

    #[test]
    fn test_numbered_placeholders_in_lines() {
        let batch = QueryBatch::new(
            vec![query("SELECT * FROM t WHERE a = $1")
                .with_bindings(vec![BindValue::from("x")])
                .with_placeholder(Placeholder::Numbered)],
            "test",
            ExecutionContext::Web,
        );

        assert_eq!(
            batch.lines(&line_format()),
            ["single () SELECT * FROM t WHERE a = 'x'"]
        );
    }
}
