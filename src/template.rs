//! Named token substitution for log lines.
//!
//! Each token key starts with a sigil that decides how its value is inserted:
//!
//! | Sigil | Transform |
//! |-------|-----------|
//! | `:`   | inserted as-is |
//! | `@` (or anything else) | HTML escaped first |
//!
//! Tokens the template mentions but the map doesn't define stay as literal
//! text.

use std::fmt::Display;

use indexmap::IndexMap;

/// Token values keyed by their sigil-prefixed name.
#[derive(Debug, Clone, Default)]
pub struct Tokens {
    values: IndexMap<String, String>,
}

impl Tokens {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set `key` to `value`, replacing any previous value.
    pub fn insert(&mut self, key: impl Into<String>, value: impl Display) -> &mut Self {
        self.values.insert(key.into(), value.to_string());
        self
    }

    pub fn with(mut self, key: impl Into<String>, value: impl Display) -> Self {
        self.insert(key, value);
        self
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.values.get(key).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    fn transformed(&self) -> Vec<(&str, String)> {
        let mut pairs: Vec<_> = self
            .values
            .iter()
            .filter(|(key, _)| !key.is_empty())
            .map(|(key, value)| {
                let value = if key.starts_with(':') {
                    value.clone()
                } else {
                    escape_html(value)
                };
                (key.as_str(), value)
            })
            .collect();

        // Longest key wins when several start at the same position.
        pairs.sort_by(|a, b| b.0.len().cmp(&a.0.len()));
        pairs
    }
}

/// Substitute `tokens` into `template`.
///
/// Substituted values are never scanned again, so a value that happens to
/// contain a token name is inserted verbatim.
///
/// ```rust
/// use sea_orm_query_log::{render, Tokens};
///
/// let tokens = Tokens::new()
///     .with(":query", "SELECT 1")
///     .with("@label", "/search?q=<b>");
///
/// assert_eq!(
///     render(":query for @label (:unknown)", &tokens),
///     "SELECT 1 for /search?q=&lt;b&gt; (:unknown)",
/// );
/// ```
pub fn render(template: &str, tokens: &Tokens) -> String {
    let pairs = tokens.transformed();
    if pairs.is_empty() {
        return template.to_owned();
    }

    let mut output = String::with_capacity(template.len());
    let mut rest = template;

    'scan: while let Some(c) = rest.chars().next() {
        for (key, value) in &pairs {
            if rest.starts_with(key) {
                output.push_str(value);
                rest = &rest[key.len()..];
                continue 'scan;
            }
        }

        output.push(c);
        rest = &rest[c.len_utf8()..];
    }

    output
}

/// Escape the characters that are significant in HTML.
pub fn escape_html(value: &str) -> String {
    let mut escaped = String::with_capacity(value.len());
    for c in value.chars() {
        match c {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            '\'' => escaped.push_str("&#039;"),
            c => escaped.push(c),
        }
    }
    escaped
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_tokens_leave_template_alone() {
        let template = "[:date] :query @label";
        assert_eq!(render(template, &Tokens::new()), template);
    }

    #[test]
    fn test_raw_and_escaped_tokens() {
        let tokens = Tokens::new()
            .with(":raw", "<a href='x'>")
            .with("@safe", "<a href='x'>");

        assert_eq!(render(":raw", &tokens), "<a href='x'>");
        assert_eq!(
            render("@safe", &tokens),
            "&lt;a href=&#039;x&#039;&gt;"
        );
    }

    #[test]
    fn test_unsigiled_tokens_are_escaped() {
        let tokens = Tokens::new().with("%name", "a & b");
        assert_eq!(render("hi %name", &tokens), "hi a &amp; b");
    }

    #[test]
    fn test_unknown_tokens_stay_literal() {
        let tokens = Tokens::new().with(":time", 12);
        assert_eq!(render(":time :nope", &tokens), "12 :nope");
    }

    #[test]
    fn test_longest_key_wins() {
        let tokens = Tokens::new()
            .with(":date", "2024-01-01")
            .with(":datetime", "2024-01-01 10:00:00");

        assert_eq!(render(":datetime / :date", &tokens), "2024-01-01 10:00:00 / 2024-01-01");
    }

    #[test]
    fn test_values_are_not_rescanned() {
        let tokens = Tokens::new()
            .with(":query", "SELECT ':env'")
            .with(":env", "local");

        assert_eq!(render(":query [:env]", &tokens), "SELECT ':env' [local]");
    }

    #[test]
    fn test_insert_replaces() {
        let mut tokens = Tokens::new();
        tokens.insert(":a", 1).insert(":a", 2);
        assert_eq!(tokens.len(), 1);
        assert_eq!(tokens.get(":a"), Some("2"));
    }

    #[test]
    fn test_multibyte_template() {
        let tokens = Tokens::new().with(":who", "wörld");
        assert_eq!(render("héllo :who ✓", &tokens), "héllo wörld ✓");
    }
}
