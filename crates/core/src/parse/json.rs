use serde_json::{Map, Value};

use crate::model::{LogEntry, ParseStrategy, Schema};

use super::{normalize_level, parse_timestamp, string_path, LineParser, LEVEL_KEYS, TIME_KEYS};

/// Keys commonly carrying a stringified JSON payload inside a wrapper
/// object (container runtimes, shippers).
const WRAPPED_PAYLOAD_KEYS: [&str; 3] = ["log", "msg", "message"];

pub struct JsonParser {
    format_name: String,
    time_layout: String,
    schema: Schema,
}

impl JsonParser {
    pub fn new(schema: &Schema, time_layout: String) -> Self {
        Self {
            format_name: schema.format_name.clone(),
            time_layout,
            schema: schema.clone(),
        }
    }
}

impl LineParser for JsonParser {
    fn parse(&self, line: &str, source: &str) -> LogEntry {
        let mut entry = LogEntry::new(line, source, self.format_name.clone());

        let mut fields = match serde_json::from_str::<Value>(line) {
            Ok(Value::Object(map)) => map,
            _ => {
                let mut map = Map::new();
                map.insert("msg".to_string(), Value::from(line));
                entry.fields = map;
                return entry;
            }
        };

        // Wrapper objects often hold the real record as an escaped JSON
        // string under log/msg/message. Merge that payload in, keeping the
        // wrapper's own keys on conflict, and stop at the first match.
        let mut inner_fields: Option<Map<String, Value>> = None;
        for key in WRAPPED_PAYLOAD_KEYS {
            let candidate = match fields.get(key) {
                Some(Value::String(s)) => s.trim().to_string(),
                _ => continue,
            };
            if !(candidate.starts_with('{') && candidate.ends_with('}')) {
                continue;
            }
            if let Ok(Value::Object(inner)) = serde_json::from_str::<Value>(&candidate) {
                for (k, v) in inner.iter() {
                    fields.entry(k.clone()).or_insert_with(|| v.clone());
                }
                inner_fields = Some(inner);
                break;
            }
        }

        // Timestamp and level prefer the unwrapped payload over the wrapper.
        let ts_raw = inner_fields
            .as_ref()
            .and_then(|m| string_path(m, &TIME_KEYS))
            .or_else(|| string_path(&fields, &TIME_KEYS))
            .map(str::to_string);
        if let Some(ts) = ts_raw {
            entry.timestamp = parse_timestamp(&ts, &self.time_layout);
        }

        let level_raw = inner_fields
            .as_ref()
            .and_then(|m| string_path(m, &LEVEL_KEYS))
            .or_else(|| string_path(&fields, &LEVEL_KEYS))
            .map(str::to_string);
        if let Some(lvl) = level_raw {
            entry.level = Some(normalize_level(&lvl, &self.schema));
        }

        entry.fields = fields;
        entry
    }

    fn strategy(&self) -> ParseStrategy {
        ParseStrategy::Json
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detect::json_schema;
    use chrono::Timelike;

    fn parser() -> JsonParser {
        JsonParser::new(&json_schema(), String::new())
    }

    #[test]
    fn test_parse_object_line() {
        let entry = parser().parse(
            r#"{"ts":"2025-01-01T12:00:00Z","level":"info","msg":"ok"}"#,
            "test",
        );
        assert_eq!(entry.level.as_deref(), Some("INFO"));
        assert_eq!(entry.timestamp.unwrap().hour(), 12);
        assert_eq!(entry.fields.get("msg").unwrap(), "ok");
    }

    #[test]
    fn test_non_object_becomes_msg() {
        let entry = parser().parse("[1,2,3]", "test");
        assert_eq!(entry.fields.get("msg").unwrap(), "[1,2,3]");
        assert!(entry.level.is_none());

        let entry = parser().parse("not json", "test");
        assert_eq!(entry.fields.get("msg").unwrap(), "not json");
        assert_eq!(entry.raw, "not json");
    }

    #[test]
    fn test_wrapped_payload_merged_outer_wins() {
        let line = r#"{"log":"{\"level\":\"error\",\"msg\":\"boom\",\"stream\":\"inner\"}","stream":"stdout"}"#;
        let entry = parser().parse(line, "test");
        // Payload keys become visible.
        assert_eq!(entry.fields.get("msg").unwrap(), "boom");
        // On conflict the wrapper's value stays.
        assert_eq!(entry.fields.get("stream").unwrap(), "stdout");
        // The wrapper key itself is retained.
        assert!(entry.fields.get("log").is_some());
        // Level comes from the unwrapped payload.
        assert_eq!(entry.level.as_deref(), Some("ERROR"));
    }

    #[test]
    fn test_wrapped_payload_only_first_match_unwrapped() {
        let line = r#"{"log":"{\"a\":1}","msg":"{\"b\":2}"}"#;
        let entry = parser().parse(line, "test");
        assert_eq!(entry.fields.get("a").unwrap(), 1);
        assert!(entry.fields.get("b").is_none());
    }

    #[test]
    fn test_plain_string_msg_not_unwrapped() {
        let entry = parser().parse(r#"{"msg":"hello {world}"}"#, "test");
        assert_eq!(entry.fields.get("msg").unwrap(), "hello {world}");
    }

    #[test]
    fn test_level_keys_in_order() {
        let entry = parser().parse(r#"{"severity":"warning","msg":"x"}"#, "test");
        assert_eq!(entry.level.as_deref(), Some("WARN"));
    }
}
