use regex::Regex;
use serde_json::{Map, Value};

use crate::model::{LogEntry, ParseStrategy, Schema};

use super::{normalize_level, parse_timestamp, LineParser, LEVEL_KEYS, TIME_KEYS};

/// Named-capture parser. Each named group becomes a field; groups named
/// like timestamps or levels also populate the entry's typed slots. With no
/// usable pattern the parser passes lines through as `msg`.
pub struct RegexParser {
    format_name: String,
    time_layout: String,
    schema: Schema,
    re: Option<Regex>,
}

impl RegexParser {
    pub fn new(schema: &Schema, time_layout: String, re: Option<Regex>) -> Self {
        Self {
            format_name: schema.format_name.clone(),
            time_layout,
            schema: schema.clone(),
            re,
        }
    }
}

impl LineParser for RegexParser {
    fn parse(&self, line: &str, source: &str) -> LogEntry {
        let mut entry = LogEntry::new(line, source, self.format_name.clone());

        let (re, caps) = match self.re.as_ref().map(|re| (re, re.captures(line))) {
            Some((re, Some(caps))) => (re, caps),
            _ => {
                entry.fields.insert("msg".to_string(), Value::from(line));
                return entry;
            }
        };

        let mut fields = Map::new();
        for name in re.capture_names().flatten() {
            let text = match caps.name(name) {
                Some(m) => m.as_str(),
                None => continue,
            };
            // HTTP statuses read better as numbers in filters and export.
            let value = if name == "status" {
                text.parse::<i64>()
                    .map(Value::from)
                    .unwrap_or_else(|_| Value::from(text))
            } else {
                Value::from(text)
            };
            fields.insert(name.to_string(), value);

            if TIME_KEYS.contains(&name) && entry.timestamp.is_none() {
                entry.timestamp = parse_timestamp(text, &self.time_layout);
            }
            if LEVEL_KEYS.contains(&name) && entry.level.is_none() {
                entry.level = Some(normalize_level(text, &self.schema));
            }
        }

        entry.fields = fields;
        entry
    }

    fn strategy(&self) -> ParseStrategy {
        ParseStrategy::Regex
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detect::{apache_schema, syslog_schema, unknown_schema};
    use crate::parse::build_parser;
    use chrono::Timelike;

    #[test]
    fn test_named_groups_become_fields() {
        let mut schema = unknown_schema();
        schema.regex_pattern = Some(r"^(?P<status>\d{3}) (?P<msg>.*)$".to_string());
        let parser = build_parser(&schema, None);

        let entry = parser.parse("200 all good", "test");
        assert_eq!(entry.fields.get("status").unwrap(), 200);
        assert_eq!(entry.fields.get("msg").unwrap(), "all good");
    }

    #[test]
    fn test_no_match_becomes_msg() {
        let mut schema = unknown_schema();
        schema.regex_pattern = Some(r"^(?P<status>\d{3})$".to_string());
        let parser = build_parser(&schema, None);

        let entry = parser.parse("does not match", "test");
        assert_eq!(entry.fields.get("msg").unwrap(), "does not match");
        assert!(entry.fields.get("status").is_none());
    }

    #[test]
    fn test_apache_template_end_to_end() {
        let parser = build_parser(&apache_schema(), None);
        let entry = parser.parse(
            r#"127.0.0.1 - - [01/Jan/2025:12:00:02 +0000] "GET /index.html HTTP/1.1" 200 1234 "-" "curl/8.0""#,
            "test",
        );
        assert_eq!(entry.fields.get("status").unwrap(), 200);
        assert_eq!(entry.fields.get("method").unwrap(), "GET");
        assert_eq!(entry.timestamp.unwrap().second(), 2);
    }

    #[test]
    fn test_syslog_template_end_to_end() {
        let parser = build_parser(&syslog_schema(), None);
        let entry = parser.parse("<34>1 2025-01-01T12:00:03Z myhost app - - - User login ok", "test");
        assert_eq!(entry.fields.get("app").unwrap(), "app");
        assert_eq!(entry.fields.get("msg").unwrap(), "User login ok");
        assert_eq!(entry.timestamp.unwrap().second(), 3);
    }

    #[test]
    fn test_unknown_template_captures_whole_line() {
        let parser = build_parser(&unknown_schema(), None);
        let entry = parser.parse("anything at all", "test");
        assert_eq!(entry.fields.get("msg").unwrap(), "anything at all");
    }
}
