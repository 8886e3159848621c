//! Entry filtering. Criteria combine three independent gates that must all
//! pass: a level allowlist, a substring or regex query (optionally scoped
//! to a single field), and a compiled boolean expression over field values.

pub mod expr;

use std::collections::HashSet;

use grep_matcher::Matcher;
use grep_regex::{RegexMatcher, RegexMatcherBuilder};
use serde_json::Value;
use thiserror::Error;

use crate::model::LogEntry;

pub use expr::Program;

#[derive(Debug, Error)]
pub enum FilterError {
    #[error("invalid filter regex: {0}")]
    InvalidRegex(#[from] grep_regex::Error),

    #[error("invalid filter expression: {0}")]
    InvalidExpr(#[from] expr::ExprError),
}

/// What the user asked to see. An all-default criteria matches everything.
#[derive(Debug, Clone, Default)]
pub struct Criteria {
    pub query: String,
    pub use_regex: bool,
    /// Canonical (uppercase) level names; empty means no level gate.
    pub levels: HashSet<String>,
    pub expr: String,
    /// Scope the query to one field instead of the whole entry.
    pub field: Option<String>,
}

/// Compiled form of a `Criteria`. Compile once per criteria change, match
/// per entry; criteria that compile cleanly never fail at match time.
#[derive(Default)]
pub struct Evaluator {
    re: Option<RegexMatcher>,
    program: Option<Program>,
}

impl Evaluator {
    pub fn compile(criteria: &Criteria) -> Result<Self, FilterError> {
        let re = if criteria.use_regex && !criteria.query.is_empty() {
            Some(
                RegexMatcherBuilder::new()
                    .case_insensitive(false)
                    .multi_line(false)
                    .build(&criteria.query)?,
            )
        } else {
            None
        };
        let program = if criteria.expr.trim().is_empty() {
            None
        } else {
            Some(Program::compile(&criteria.expr)?)
        };
        Ok(Self { re, program })
    }

    pub fn matches(&self, entry: &LogEntry, criteria: &Criteria) -> bool {
        if !criteria.levels.is_empty() {
            let level = match entry.level.as_deref() {
                Some(l) => l.to_uppercase(),
                None => return false,
            };
            if !criteria.levels.contains(&level) {
                return false;
            }
        }

        if !criteria.query.is_empty() && !self.query_matches(entry, criteria) {
            return false;
        }

        if let Some(program) = &self.program {
            let mut params = entry.fields.clone();
            // Always present, empty for level-less entries, so expressions
            // like `level != 'DEBUG'` still see those entries.
            params.insert(
                "level".to_string(),
                Value::from(entry.level.clone().unwrap_or_default()),
            );
            if let Some(ts) = entry.timestamp {
                params.insert("ts".to_string(), Value::from(ts.to_rfc3339()));
            }
            // Evaluation errors (unknown field, type mismatch) exclude the
            // entry rather than passing it through.
            if !program.matches(&params) {
                return false;
            }
        }

        true
    }

    fn query_matches(&self, entry: &LogEntry, criteria: &Criteria) -> bool {
        let haystack = match &criteria.field {
            Some(field) => match entry.fields.get(field) {
                Some(Value::String(s)) => s.clone(),
                Some(other) => other.to_string(),
                None => String::new(),
            },
            None => entry.raw.clone(),
        };
        match &self.re {
            Some(re) => re.is_match(haystack.as_bytes()).unwrap_or(false),
            None => haystack
                .to_lowercase()
                .contains(&criteria.query.to_lowercase()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detect::json_schema;
    use crate::parse::build_parser;

    fn entry(line: &str) -> LogEntry {
        build_parser(&json_schema(), None).parse(line, "test")
    }

    fn compile(criteria: &Criteria) -> Evaluator {
        Evaluator::compile(criteria).unwrap()
    }

    #[test]
    fn test_default_criteria_matches_everything() {
        let criteria = Criteria::default();
        let ev = compile(&criteria);
        assert!(ev.matches(&entry(r#"{"level":"info","msg":"hello"}"#), &criteria));
        assert!(ev.matches(&entry("not even json"), &criteria));
    }

    #[test]
    fn test_level_gate() {
        let criteria = Criteria {
            levels: ["ERROR".to_string(), "WARN".to_string()].into(),
            ..Default::default()
        };
        let ev = compile(&criteria);
        assert!(ev.matches(&entry(r#"{"level":"error","msg":"boom"}"#), &criteria));
        assert!(!ev.matches(&entry(r#"{"level":"info","msg":"fine"}"#), &criteria));
        // Entries without a level fail a non-empty level gate.
        assert!(!ev.matches(&entry(r#"{"msg":"no level here"}"#), &criteria));
    }

    #[test]
    fn test_substring_query_is_case_insensitive() {
        let criteria = Criteria {
            query: "TIMEOUT".to_string(),
            ..Default::default()
        };
        let ev = compile(&criteria);
        assert!(ev.matches(&entry(r#"{"msg":"request timeout on /v1"}"#), &criteria));
        assert!(!ev.matches(&entry(r#"{"msg":"all good"}"#), &criteria));
    }

    #[test]
    fn test_regex_query() {
        let criteria = Criteria {
            query: r"5\d\d".to_string(),
            use_regex: true,
            ..Default::default()
        };
        let ev = compile(&criteria);
        assert!(ev.matches(&entry(r#"{"msg":"status 503 from upstream"}"#), &criteria));
        assert!(!ev.matches(&entry(r#"{"msg":"status 200"}"#), &criteria));
    }

    #[test]
    fn test_field_scoped_query() {
        let criteria = Criteria {
            query: "checkout".to_string(),
            field: Some("path".to_string()),
            ..Default::default()
        };
        let ev = compile(&criteria);
        assert!(ev.matches(&entry(r#"{"path":"/v1/checkout","msg":"x"}"#), &criteria));
        // The query word elsewhere in the entry does not count.
        assert!(!ev.matches(&entry(r#"{"path":"/v1/items","msg":"checkout"}"#), &criteria));
        // Missing field scopes to an empty haystack.
        assert!(!ev.matches(&entry(r#"{"msg":"checkout"}"#), &criteria));
    }

    #[test]
    fn test_expression_gate() {
        let criteria = Criteria {
            expr: "status >= 500".to_string(),
            ..Default::default()
        };
        let ev = compile(&criteria);
        assert!(ev.matches(&entry(r#"{"status":503,"msg":"boom"}"#), &criteria));
        assert!(!ev.matches(&entry(r#"{"status":200,"msg":"ok"}"#), &criteria));
        // Entries missing the referenced field are excluded, not passed.
        assert!(!ev.matches(&entry(r#"{"msg":"no status"}"#), &criteria));
    }

    #[test]
    fn test_expression_sees_level_and_ts() {
        let criteria = Criteria {
            expr: "level == 'WARN'".to_string(),
            ..Default::default()
        };
        let ev = compile(&criteria);
        assert!(ev.matches(
            &entry(r#"{"level":"warn","ts":"2025-01-01T12:00:00Z","msg":"x"}"#),
            &criteria
        ));
    }

    #[test]
    fn test_expression_level_is_empty_for_levelless_entries() {
        let criteria = Criteria {
            expr: "level != 'DEBUG'".to_string(),
            ..Default::default()
        };
        let ev = compile(&criteria);
        // A level-less entry still has a (blank) level in expression scope.
        assert!(ev.matches(&entry(r#"{"msg":"no level here"}"#), &criteria));
        assert!(!ev.matches(&entry(r#"{"level":"debug","msg":"x"}"#), &criteria));
        assert!(ev.matches(&entry(r#"{"level":"info","msg":"x"}"#), &criteria));
    }

    #[test]
    fn test_gates_compose() {
        let criteria = Criteria {
            query: "upstream".to_string(),
            levels: ["ERROR".to_string()].into(),
            expr: "status >= 500".to_string(),
            ..Default::default()
        };
        let ev = compile(&criteria);
        assert!(ev.matches(
            &entry(r#"{"level":"error","status":502,"msg":"upstream died"}"#),
            &criteria
        ));
        // Any failing gate excludes.
        assert!(!ev.matches(
            &entry(r#"{"level":"error","status":502,"msg":"disk full"}"#),
            &criteria
        ));
        assert!(!ev.matches(
            &entry(r#"{"level":"warn","status":502,"msg":"upstream died"}"#),
            &criteria
        ));
    }

    #[test]
    fn test_invalid_regex_is_a_compile_error() {
        let criteria = Criteria {
            query: "(unclosed".to_string(),
            use_regex: true,
            ..Default::default()
        };
        assert!(matches!(
            Evaluator::compile(&criteria),
            Err(FilterError::InvalidRegex(_))
        ));
    }

    #[test]
    fn test_invalid_expression_is_a_compile_error() {
        let criteria = Criteria {
            expr: "status >=".to_string(),
            ..Default::default()
        };
        assert!(matches!(
            Evaluator::compile(&criteria),
            Err(FilterError::InvalidExpr(_))
        ));
    }
}
