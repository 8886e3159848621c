use serde_json::{Map, Value};

use crate::model::{LogEntry, ParseStrategy, Schema};

use super::{normalize_level, parse_timestamp, string_path, LineParser, LEVEL_KEYS, TIME_KEYS};

pub struct LogfmtParser {
    format_name: String,
    time_layout: String,
    schema: Schema,
}

impl LogfmtParser {
    pub fn new(schema: &Schema, time_layout: String) -> Self {
        Self {
            format_name: schema.format_name.clone(),
            time_layout,
            schema: schema.clone(),
        }
    }
}

impl LineParser for LogfmtParser {
    fn parse(&self, line: &str, source: &str) -> LogEntry {
        let mut entry = LogEntry::new(line, source, self.format_name.clone());

        let pairs = split_logfmt(line);
        if pairs.is_empty() {
            entry
                .fields
                .insert("msg".to_string(), Value::from(line));
            return entry;
        }

        let mut fields = Map::new();
        for (k, v) in pairs {
            fields.insert(k, Value::from(v));
        }

        if let Some(ts) = string_path(&fields, &TIME_KEYS) {
            entry.timestamp = parse_timestamp(ts, &self.time_layout);
        }
        if let Some(lvl) = string_path(&fields, &LEVEL_KEYS) {
            entry.level = Some(normalize_level(lvl, &self.schema));
        }

        entry.fields = fields;
        entry
    }

    fn strategy(&self) -> ParseStrategy {
        ParseStrategy::Logfmt
    }
}

/// Split a logfmt line into key/value pairs. Values may be double-quoted
/// to carry spaces; quotes toggle rather than nest. A trailing key with no
/// `=` or an empty value is kept with an empty string value.
fn split_logfmt(line: &str) -> Vec<(String, String)> {
    let mut pairs = Vec::new();
    let mut key = String::new();
    let mut val = String::new();
    let mut in_key = true;
    let mut in_quotes = false;

    for c in line.chars() {
        match c {
            '"' => in_quotes = !in_quotes,
            '=' if in_key && !in_quotes => in_key = false,
            c if c.is_whitespace() && !in_quotes => {
                if !key.is_empty() && !in_key {
                    pairs.push((key.clone(), val.clone()));
                }
                key.clear();
                val.clear();
                in_key = true;
            }
            c => {
                if in_key {
                    key.push(c);
                } else {
                    val.push(c);
                }
            }
        }
    }
    if !key.is_empty() && !in_key {
        pairs.push((key, val));
    }
    pairs
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detect::logfmt_schema;
    use chrono::Timelike;

    fn parser() -> LogfmtParser {
        LogfmtParser::new(&logfmt_schema(), String::new())
    }

    #[test]
    fn test_parse_basic_pairs() {
        let entry = parser().parse(
            r#"time=2025-01-01T12:00:00Z level=warn msg="ok""#,
            "test",
        );
        assert_eq!(entry.level.as_deref(), Some("WARN"));
        assert_eq!(entry.timestamp.unwrap().hour(), 12);
        assert_eq!(entry.fields.get("msg").unwrap(), "ok");
    }

    #[test]
    fn test_quoted_value_keeps_spaces() {
        let entry = parser().parse(r#"msg="slow request here" path=/v1/items"#, "test");
        assert_eq!(entry.fields.get("msg").unwrap(), "slow request here");
        assert_eq!(entry.fields.get("path").unwrap(), "/v1/items");
    }

    #[test]
    fn test_empty_value_kept() {
        let entry = parser().parse("level=info detail=", "test");
        assert_eq!(entry.fields.get("detail").unwrap(), "");
    }

    #[test]
    fn test_no_pairs_becomes_msg() {
        let entry = parser().parse("plain words without pairs", "test");
        assert_eq!(
            entry.fields.get("msg").unwrap(),
            "plain words without pairs"
        );
        assert!(entry.level.is_none());
    }

    #[test]
    fn test_bare_token_without_equals_is_skipped() {
        let entry = parser().parse("INFO level=debug", "test");
        assert!(entry.fields.get("INFO").is_none());
        assert_eq!(entry.level.as_deref(), Some("DEBUG"));
    }

    #[test]
    fn test_split_handles_equals_inside_quotes() {
        let pairs = split_logfmt(r#"query="a=b" next=c"#);
        assert_eq!(
            pairs,
            vec![
                ("query".to_string(), "a=b".to_string()),
                ("next".to_string(), "c".to_string())
            ]
        );
    }
}
