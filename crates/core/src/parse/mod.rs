//! Line parsers. One parser per strategy behind a common trait; parsers are
//! infallible by contract. A line that defeats its parser still becomes an
//! entry, with the whole line preserved under `msg`.

mod json;
mod logfmt;
mod regex;

use chrono::{DateTime, NaiveDateTime, TimeZone, Utc};
use serde_json::{Map, Value};
use tracing::warn;

use crate::model::{LogEntry, ParseStrategy, Schema};

pub use self::json::JsonParser;
pub use self::logfmt::LogfmtParser;
pub use self::regex::RegexParser;

/// Converts one raw line into a structured entry. Implementations never
/// fail: worst case is a single `msg` field carrying the whole line.
pub trait LineParser: Send + Sync {
    fn parse(&self, line: &str, source: &str) -> LogEntry;
    fn strategy(&self) -> ParseStrategy;
}

/// Construct the parser for a schema. Infallible: a regex schema with a
/// missing or invalid pattern degrades to a parser that passes lines
/// through as `msg`.
pub fn build_parser(schema: &Schema, forced_layout: Option<&str>) -> Box<dyn LineParser> {
    let layout = effective_layout(schema, forced_layout);
    match schema.parse_strategy {
        ParseStrategy::Json => Box::new(JsonParser::new(schema, layout)),
        ParseStrategy::Logfmt | ParseStrategy::Kv => Box::new(LogfmtParser::new(schema, layout)),
        ParseStrategy::Regex => {
            let re = match schema.regex_pattern.as_deref() {
                Some(pat) => match ::regex::Regex::new(pat) {
                    Ok(re) => Some(re),
                    Err(e) => {
                        warn!(format = %schema.format_name, error = %e, "invalid schema regex; passing lines through");
                        None
                    }
                },
                None => {
                    warn!(format = %schema.format_name, "regex strategy without a pattern; passing lines through");
                    None
                }
            };
            Box::new(RegexParser::new(schema, layout, re))
        }
    }
}

/// A user-supplied layout beats the schema's own.
fn effective_layout(schema: &Schema, forced: Option<&str>) -> String {
    match forced {
        Some(l) if !l.is_empty() => l.to_string(),
        _ => schema.time_layout.clone(),
    }
}

/// Canonicalize a raw level token. The schema mapping wins when it knows
/// the token; otherwise common spellings collapse to the canonical set and
/// anything else passes through uppercased.
pub(crate) fn normalize_level(raw: &str, schema: &Schema) -> String {
    let trimmed = raw.trim();
    let lowered = trimmed.to_lowercase();
    if let Some(mapped) = schema.level_mapping.get(&lowered) {
        return mapped.clone();
    }
    match lowered.as_str() {
        "trace" => "TRACE".to_string(),
        "debug" => "DEBUG".to_string(),
        "info" => "INFO".to_string(),
        "warn" | "warning" => "WARN".to_string(),
        "error" | "err" => "ERROR".to_string(),
        "fatal" | "critical" => "FATAL".to_string(),
        _ => trimmed.to_uppercase(),
    }
}

/// Parse a timestamp string against the schema layout. Empty layout means
/// RFC3339. Unparseable values yield `None`; the raw string stays visible
/// in the entry's fields either way.
pub(crate) fn parse_timestamp(s: &str, layout: &str) -> Option<DateTime<Utc>> {
    let s = s.trim();
    if s.is_empty() {
        return None;
    }
    if layout.is_empty() {
        return DateTime::parse_from_rfc3339(s)
            .ok()
            .map(|dt| dt.with_timezone(&Utc));
    }
    if let Ok(dt) = DateTime::parse_from_str(s, layout) {
        return Some(dt.with_timezone(&Utc));
    }
    // Layouts without a zone produce naive datetimes; take them as UTC.
    NaiveDateTime::parse_from_str(s, layout)
        .ok()
        .map(|naive| Utc.from_utc_datetime(&naive))
}

/// First string value found under any of `keys`, in order.
pub(crate) fn string_path<'a>(map: &'a Map<String, Value>, keys: &[&str]) -> Option<&'a str> {
    for k in keys {
        if let Some(Value::String(s)) = map.get(*k) {
            return Some(s.as_str());
        }
    }
    None
}

pub(crate) const TIME_KEYS: [&str; 3] = ["ts", "time", "timestamp"];
pub(crate) const LEVEL_KEYS: [&str; 3] = ["level", "lvl", "severity"];

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detect::{json_schema, unknown_schema};
    use chrono::Timelike;

    #[test]
    fn test_normalize_level_mapping_wins() {
        let mut schema = json_schema();
        schema
            .level_mapping
            .insert("wrn".to_string(), "WARN".to_string());
        assert_eq!(normalize_level("WRN", &schema), "WARN");
    }

    #[test]
    fn test_normalize_level_common_spellings() {
        let schema = unknown_schema();
        assert_eq!(normalize_level("warning", &schema), "WARN");
        assert_eq!(normalize_level("Err", &schema), "ERROR");
        assert_eq!(normalize_level("critical", &schema), "FATAL");
        assert_eq!(normalize_level("notice", &schema), "NOTICE");
    }

    #[test]
    fn test_parse_timestamp_rfc3339_default() {
        let ts = parse_timestamp("2025-01-01T12:00:00Z", "").unwrap();
        assert_eq!(ts.hour(), 12);
        assert!(parse_timestamp("yesterday", "").is_none());
    }

    #[test]
    fn test_parse_timestamp_custom_layout() {
        let ts = parse_timestamp("01/Jan/2025:12:00:02 +0000", "%d/%b/%Y:%H:%M:%S %z").unwrap();
        assert_eq!(ts.minute(), 0);
        assert_eq!(ts.second(), 2);
    }

    #[test]
    fn test_parse_timestamp_naive_layout_taken_as_utc() {
        let ts = parse_timestamp("2025-01-01 12:00:00", "%Y-%m-%d %H:%M:%S").unwrap();
        assert_eq!(ts.hour(), 12);
    }

    #[test]
    fn test_build_parser_degrades_on_bad_regex() {
        let mut schema = unknown_schema();
        schema.regex_pattern = Some("(unclosed".to_string());
        let parser = build_parser(&schema, None);
        let entry = parser.parse("anything", "test");
        assert_eq!(entry.fields.get("msg").unwrap(), "anything");
    }

    #[test]
    fn test_forced_layout_overrides_schema() {
        let mut schema = unknown_schema();
        schema.time_layout = "%Y".to_string();
        assert_eq!(
            effective_layout(&schema, Some("%d/%b/%Y")),
            "%d/%b/%Y".to_string()
        );
        assert_eq!(effective_layout(&schema, None), "%Y".to_string());
    }
}
