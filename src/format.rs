//! Rendering SQL with its bindings, and fingerprinting SQL text.

use std::borrow::Cow;

use once_cell::sync::Lazy;
use regex::{Captures, Regex};
use sea_orm::sea_query::QueryBuilder;
use sea_orm::{DbBackend, Statement, Value};

// Postgres style positional parameters: $1, $2, ...
static NUMBERED_PLACEHOLDER_REGEX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\$(\d+)").unwrap());

static WHITESPACE_REGEX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\s+").unwrap());

/// A value bound to a statement placeholder.
#[derive(Debug, Clone, PartialEq)]
pub enum BindValue {
    Null,
    Bool(bool),
    Int(i64),
    UInt(u64),
    Float(f64),
    String(String),
    /// Already a SQL literal, written out as-is.
    Literal(String),
}

impl BindValue {
    /// The value as it would appear in a hand-written statement.
    ///
    /// Strings are wrapped in single quotes without escaping; this is a debug
    /// rendering, not something to run.
    pub fn to_sql_literal(&self) -> Cow<'_, str> {
        match self {
            BindValue::Null => Cow::Borrowed("NULL"),
            BindValue::Bool(true) => Cow::Borrowed("true"),
            BindValue::Bool(false) => Cow::Borrowed("false"),
            BindValue::Int(value) => Cow::Owned(value.to_string()),
            BindValue::UInt(value) => Cow::Owned(value.to_string()),
            BindValue::Float(value) => Cow::Owned(value.to_string()),
            BindValue::String(value) if value.eq_ignore_ascii_case("null") => {
                Cow::Borrowed("NULL")
            }
            BindValue::String(value) => Cow::Owned(format!("'{value}'")),
            BindValue::Literal(value) => Cow::Borrowed(value),
        }
    }
}

impl From<bool> for BindValue {
    fn from(value: bool) -> Self {
        BindValue::Bool(value)
    }
}

impl From<i32> for BindValue {
    fn from(value: i32) -> Self {
        BindValue::Int(value.into())
    }
}

impl From<i64> for BindValue {
    fn from(value: i64) -> Self {
        BindValue::Int(value)
    }
}

impl From<u64> for BindValue {
    fn from(value: u64) -> Self {
        BindValue::UInt(value)
    }
}

impl From<f64> for BindValue {
    fn from(value: f64) -> Self {
        BindValue::Float(value)
    }
}

impl From<&str> for BindValue {
    fn from(value: &str) -> Self {
        BindValue::String(value.to_owned())
    }
}

impl From<String> for BindValue {
    fn from(value: String) -> Self {
        BindValue::String(value)
    }
}

impl<T: Into<BindValue>> From<Option<T>> for BindValue {
    fn from(value: Option<T>) -> Self {
        value.map(Into::into).unwrap_or(BindValue::Null)
    }
}

impl BindValue {
    /// Convert a sea-orm value bound for `backend`.
    ///
    /// Types without a variant of their own (dates, bytes, JSON, uuids, ...)
    /// become a [`BindValue::Literal`] rendered the way sea-query inlines them.
    pub fn from_value(value: &Value, backend: DbBackend) -> Self {
        let bound = match value {
            Value::Bool(v) => v.map(BindValue::Bool),
            Value::TinyInt(v) => v.map(|v| BindValue::Int(v.into())),
            Value::SmallInt(v) => v.map(|v| BindValue::Int(v.into())),
            Value::Int(v) => v.map(|v| BindValue::Int(v.into())),
            Value::BigInt(v) => v.map(BindValue::Int),
            Value::TinyUnsigned(v) => v.map(|v| BindValue::UInt(v.into())),
            Value::SmallUnsigned(v) => v.map(|v| BindValue::UInt(v.into())),
            Value::Unsigned(v) => v.map(|v| BindValue::UInt(v.into())),
            Value::BigUnsigned(v) => v.map(BindValue::UInt),
            // Widening would print 1.1f32 as 1.100000023841858.
            Value::Float(v) => {
                v.map(|v| BindValue::Float(v.to_string().parse().unwrap_or(v.into())))
            }
            Value::Double(v) => v.map(BindValue::Float),
            Value::String(v) => v.as_ref().map(|v| BindValue::String(v.as_str().to_owned())),
            Value::Char(v) => v.map(|v| BindValue::String(v.to_string())),
            Value::Bytes(None) => None,
            other => {
                let builder = backend.get_query_builder();
                return BindValue::Literal(QueryBuilder::value_to_string(builder.as_ref(), other));
            }
        };

        bound.unwrap_or(BindValue::Null)
    }
}

/// How a statement marks its parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Placeholder {
    /// `?`, bound in order of appearance.
    #[default]
    Question,
    /// `$1`, `$2`, ... bound by position.
    Numbered,
}

impl Placeholder {
    pub fn for_backend(backend: DbBackend) -> Self {
        match backend {
            DbBackend::Postgres => Placeholder::Numbered,
            _ => Placeholder::Question,
        }
    }
}

/// Substitute `?` placeholders left to right with `bindings`.
///
/// Extra placeholders are left alone and extra bindings are ignored.
///
/// ```rust
/// use sea_orm_query_log::{format_sql, BindValue};
///
/// let sql = format_sql(
///     "SELECT * FROM users WHERE id = ? AND active = ?",
///     &[BindValue::Int(7), BindValue::Bool(true)],
/// );
/// assert_eq!(sql, "SELECT * FROM users WHERE id = 7 AND active = true");
/// ```
pub fn format_sql(sql: &str, bindings: &[BindValue]) -> String {
    let mut bindings = bindings.iter();
    let mut formatted = String::with_capacity(sql.len());

    for c in sql.chars() {
        if c != '?' {
            formatted.push(c);
            continue;
        }

        match bindings.next() {
            Some(value) => formatted.push_str(&value.to_sql_literal()),
            None => formatted.push('?'),
        }
    }

    formatted
}

/// Substitute placeholders in whichever style the statement uses.
pub fn format_sql_with(sql: &str, bindings: &[BindValue], placeholder: Placeholder) -> String {
    match placeholder {
        Placeholder::Question => format_sql(sql, bindings),
        Placeholder::Numbered => NUMBERED_PLACEHOLDER_REGEX
            .replace_all(sql, |caps: &Captures| {
                caps[1]
                    .parse::<usize>()
                    .ok()
                    .and_then(|n| n.checked_sub(1))
                    .and_then(|index| bindings.get(index))
                    .map(|value| value.to_sql_literal().into_owned())
                    .unwrap_or_else(|| caps[0].to_owned())
            })
            .into_owned(),
    }
}

/// Extract the bindings of a sea-orm statement.
pub fn statement_bindings(stmt: &Statement) -> Vec<BindValue> {
    match &stmt.values {
        Some(values) => values
            .0
            .iter()
            .map(|value| BindValue::from_value(value, stmt.db_backend))
            .collect(),
        None => vec![],
    }
}

/// Render a sea-orm statement with its bindings substituted.
pub fn format_statement(stmt: &Statement) -> String {
    format_sql_with(
        &stmt.sql,
        &statement_bindings(stmt),
        Placeholder::for_backend(stmt.db_backend),
    )
}

/// Collapse every run of whitespace, newlines included, into one space.
pub fn normalize_whitespace(sql: &str) -> String {
    WHITESPACE_REGEX.replace_all(sql.trim(), " ").into_owned()
}

/// Stable key for text that only differs in whitespace.
pub fn fingerprint(sql: &str) -> String {
    format!("{:x}", md5::compute(normalize_whitespace(sql)))
}
