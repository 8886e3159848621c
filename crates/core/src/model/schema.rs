use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// How lines of a given format are converted into entries. A closed set:
/// one variant per parser strategy, chosen once at schema construction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ParseStrategy {
    Json,
    Logfmt,
    /// Key=value synonym used by external inference responses.
    #[serde(rename = "kv")]
    Kv,
    #[default]
    Regex,
}

/// One named field a schema expects to produce.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase", default)]
pub struct FieldDef {
    pub name: String,
    #[serde(rename = "type")]
    pub field_type: String,
    pub description: String,
    pub path_or_group: String,
}

impl FieldDef {
    pub fn new(name: &str, field_type: &str, description: &str, path_or_group: &str) -> Self {
        Self {
            name: name.to_string(),
            field_type: field_type.to_string(),
            description: description.to_string(),
            path_or_group: path_or_group.to_string(),
        }
    }
}

/// Inferred or supplied description of a log format.
///
/// Owned by the session for its lifetime and superseded wholesale on
/// re-detection; the serde names match the on-disk cache and the external
/// inference JSON contract.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase", default)]
pub struct Schema {
    pub format_name: String,
    pub probable_sources: Vec<String>,
    pub parse_strategy: ParseStrategy,
    /// chrono strftime layout; empty means RFC3339.
    pub time_layout: String,
    pub level_mapping: HashMap<String, String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub regex_pattern: Option<String>,
    pub fields: Vec<FieldDef>,
    pub confidence: f64,
    pub sample_parsed_row: Map<String, Value>,
}

/// Column preference for rendering collaborators: timestamps, then level,
/// then source/message, then everything else alphabetically.
const PREFERRED_COLUMNS: [&str; 10] = [
    "ts", "time", "timestamp", "level", "lvl", "severity", "source", "component", "msg", "message",
];

impl Schema {
    /// Field names ordered for display: preferred names first (in the
    /// preference order), remaining names alphabetically.
    pub fn column_order(&self) -> Vec<String> {
        let mut cols: Vec<String> = self.fields.iter().map(|f| f.name.clone()).collect();
        cols.sort_by(|a, b| {
            let pa = preference_index(a);
            let pb = preference_index(b);
            pa.cmp(&pb).then_with(|| a.cmp(b))
        });
        cols
    }
}

fn preference_index(name: &str) -> usize {
    PREFERRED_COLUMNS
        .iter()
        .position(|p| *p == name)
        .unwrap_or(PREFERRED_COLUMNS.len() + 1)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_column_order_prefers_known_names() {
        let schema = Schema {
            fields: vec![
                FieldDef::new("zeta", "string", "", "zeta"),
                FieldDef::new("msg", "string", "", "msg"),
                FieldDef::new("level", "string", "", "level"),
                FieldDef::new("alpha", "string", "", "alpha"),
                FieldDef::new("ts", "string", "", "ts"),
            ],
            ..Default::default()
        };
        assert_eq!(schema.column_order(), vec!["ts", "level", "msg", "alpha", "zeta"]);
    }

    #[test]
    fn test_serde_names_match_cache_contract() {
        let json = r#"{
            "formatName": "json_lines",
            "parseStrategy": "json",
            "timeLayout": "",
            "levelMapping": {"warn": "WARN"},
            "fields": [{"name": "msg", "type": "string", "description": "message", "pathOrGroup": ".msg"}],
            "confidence": 0.8,
            "sampleParsedRow": {}
        }"#;
        let schema: Schema = serde_json::from_str(json).unwrap();
        assert_eq!(schema.format_name, "json_lines");
        assert_eq!(schema.parse_strategy, ParseStrategy::Json);
        assert_eq!(schema.fields[0].path_or_group, ".msg");
    }

    #[test]
    fn test_kv_strategy_alias() {
        let s: ParseStrategy = serde_json::from_str("\"kv\"").unwrap();
        assert_eq!(s, ParseStrategy::Kv);
    }
}
