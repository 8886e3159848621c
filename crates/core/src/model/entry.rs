use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::{Map, Value};

/// One raw line as emitted by a source reader. Ephemeral: consumed by a
/// parser, not retained afterwards.
#[derive(Debug, Clone)]
pub struct RawLine {
    pub text: String,
    pub source: String,
    pub observed_at: DateTime<Utc>,
}

impl RawLine {
    pub fn now(text: impl Into<String>, source: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            source: source.into(),
            observed_at: Utc::now(),
        }
    }
}

/// A parsed log entry. Created once per line; never mutated after creation.
/// A schema change re-parses the raw text into a fresh entry instead.
///
/// `fields` values keep their JSON types so export and expression
/// evaluation see numbers as numbers.
#[derive(Debug, Clone, Serialize)]
pub struct LogEntry {
    pub raw: String,
    pub fields: Map<String, Value>,
    #[serde(rename = "ts", skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub level: Option<String>,
    pub source: String,
    #[serde(rename = "formatName")]
    pub format_name: String,
}

impl LogEntry {
    pub fn new(raw: impl Into<String>, source: impl Into<String>, format_name: impl Into<String>) -> Self {
        Self {
            raw: raw.into(),
            fields: Map::new(),
            timestamp: None,
            level: None,
            source: source.into(),
            format_name: format_name.into(),
        }
    }

    /// Pretty-printed field map, for detail views and export previews.
    pub fn pretty_fields(&self) -> String {
        serde_json::to_string_pretty(&self.fields).unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pretty_fields_round_trips() {
        let mut e = LogEntry::new("raw", "test", "json_lines");
        e.fields.insert("status".into(), Value::from(200));
        e.fields.insert("msg".into(), Value::from("ok"));

        let pretty = e.pretty_fields();
        let back: Map<String, Value> = serde_json::from_str(&pretty).unwrap();
        assert_eq!(back.get("status"), Some(&Value::from(200)));
        assert_eq!(back.get("msg"), Some(&Value::from("ok")));
    }
}
