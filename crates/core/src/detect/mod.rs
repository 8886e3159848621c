//! Offline format heuristics: score a small sample of raw lines against
//! the known format recognizers and hand back a canned schema template with
//! a confidence value. Unknown is a valid terminal classification, not an
//! error.

pub mod cache;
pub mod infer;

use std::collections::HashMap;

use regex::Regex;

use crate::model::{FieldDef, ParseStrategy, Schema};

/// Classifier output: the chosen schema template plus `hits / sample size`.
#[derive(Debug, Clone)]
pub struct Guess {
    pub schema: Schema,
    pub confidence: f64,
}

pub struct FormatClassifier {
    re_apache_combined: Regex,
    re_syslog_rfc5424: Regex,
    re_logfmt_kv: Regex,
}

impl FormatClassifier {
    pub fn new() -> Self {
        Self {
            re_apache_combined: Regex::new(
                r#"^\S+ \S+ \S+ \[[^\]]+\] "[A-Z]+ [^\s]+ [^"]+" \d{3} \d+ "[^"]*" "[^"]*""#,
            )
            .expect("apache recognizer pattern"),
            re_syslog_rfc5424: Regex::new(r"^<\d+>1 \d{4}-\d{2}-\d{2}T\d{2}:\d{2}:\d{2}")
                .expect("syslog recognizer pattern"),
            re_logfmt_kv: Regex::new(r"[a-zA-Z_][a-zA-Z0-9_]*=").expect("logfmt recognizer pattern"),
        }
    }

    /// Score each non-blank line against the four recognizers and pick the
    /// winner. A format needs the strictly highest hit count and at least
    /// half the sample to win outright; otherwise the comparison chain
    /// falls through in priority order json, logfmt, apache, syslog,
    /// unknown. Deterministic for a given sample.
    pub fn classify(&self, sample: &[String]) -> Guess {
        let mut lines = 0usize;
        let mut json_count = 0usize;
        let mut logfmt_count = 0usize;
        let mut apache_count = 0usize;
        let mut syslog_count = 0usize;

        for l in sample {
            let s = l.trim();
            if s.is_empty() {
                continue;
            }
            lines += 1;
            if s.starts_with('{') && s.ends_with('}') {
                json_count += 1;
            }
            if self.re_logfmt_kv.is_match(s) && s.contains('=') {
                logfmt_count += 1;
            }
            if self.re_apache_combined.is_match(s) {
                apache_count += 1;
            }
            if self.re_syslog_rfc5424.is_match(s) {
                syslog_count += 1;
            }
        }

        if json_count > logfmt_count
            && json_count > apache_count
            && json_count > syslog_count
            && json_count >= lines / 2
        {
            return Guess {
                schema: json_schema(),
                confidence: conf(lines, json_count),
            };
        }
        if logfmt_count >= apache_count && logfmt_count >= syslog_count && logfmt_count >= lines / 2
        {
            return Guess {
                schema: logfmt_schema(),
                confidence: conf(lines, logfmt_count),
            };
        }
        if apache_count >= syslog_count && apache_count > 0 {
            return Guess {
                schema: apache_schema(),
                confidence: conf(lines, apache_count),
            };
        }
        if syslog_count > 0 {
            return Guess {
                schema: syslog_schema(),
                confidence: conf(lines, syslog_count),
            };
        }
        Guess {
            schema: unknown_schema(),
            confidence: 0.0,
        }
    }
}

impl Default for FormatClassifier {
    fn default() -> Self {
        Self::new()
    }
}

fn conf(lines: usize, hits: usize) -> f64 {
    if lines == 0 {
        return 0.0;
    }
    hits as f64 / lines as f64
}

fn canonical_level_mapping() -> HashMap<String, String> {
    [
        ("warn", "WARN"),
        ("warning", "WARN"),
        ("info", "INFO"),
        ("error", "ERROR"),
        ("debug", "DEBUG"),
        ("fatal", "FATAL"),
        ("trace", "TRACE"),
    ]
    .into_iter()
    .map(|(k, v)| (k.to_string(), v.to_string()))
    .collect()
}

pub(crate) fn json_schema() -> Schema {
    Schema {
        format_name: "json_lines".into(),
        parse_strategy: ParseStrategy::Json,
        time_layout: String::new(), // RFC3339
        level_mapping: canonical_level_mapping(),
        fields: vec![
            FieldDef::new("ts", "string", "timestamp", ".ts"),
            FieldDef::new("time", "string", "timestamp", ".time"),
            FieldDef::new("level", "string", "level", ".level"),
            FieldDef::new("msg", "string", "message", ".msg"),
            FieldDef::new("message", "string", "message", ".message"),
        ],
        confidence: 0.8,
        ..Default::default()
    }
}

pub(crate) fn logfmt_schema() -> Schema {
    Schema {
        format_name: "logfmt".into(),
        parse_strategy: ParseStrategy::Logfmt,
        time_layout: String::new(),
        level_mapping: canonical_level_mapping(),
        fields: vec![
            FieldDef::new("time", "string", "time", "time"),
            FieldDef::new("level", "string", "level", "level"),
            FieldDef::new("msg", "string", "message", "msg"),
        ],
        confidence: 0.6,
        ..Default::default()
    }
}

pub(crate) fn apache_schema() -> Schema {
    Schema {
        format_name: "apache_combined".into(),
        parse_strategy: ParseStrategy::Regex,
        regex_pattern: Some(
            r#"^(?P<ip>\S+) \S+ \S+ \[(?P<ts>[^\]]+)\] "(?P<method>[A-Z]+) (?P<path>[^\s]+) [^"]+" (?P<status>\d{3}) (?P<size>\d+) "(?P<ref>[^"]*)" "(?P<ua>[^"]*)""#
                .into(),
        ),
        time_layout: "%d/%b/%Y:%H:%M:%S %z".into(),
        fields: vec![
            FieldDef::new("ts", "string", "timestamp", "ts"),
            FieldDef::new("status", "int", "status", "status"),
            FieldDef::new("method", "string", "method", "method"),
            FieldDef::new("path", "string", "path", "path"),
            FieldDef::new("ip", "string", "client ip", "ip"),
        ],
        confidence: 0.6,
        ..Default::default()
    }
}

pub(crate) fn syslog_schema() -> Schema {
    Schema {
        format_name: "syslog_rfc5424".into(),
        parse_strategy: ParseStrategy::Regex,
        regex_pattern: Some(
            r"^<(?P<pri>\d+)>1 (?P<ts>\d{4}-\d{2}-\d{2}T\d{2}:\d{2}:\d{2}(?:\.\d+)?(?:Z|[+-]\d{2}:?\d{2})) (?P<host>\S+) (?P<app>\S+) \S+ \S+ - (?P<msg>.*)$"
                .into(),
        ),
        time_layout: String::new(),
        fields: vec![
            FieldDef::new("ts", "string", "timestamp", "ts"),
            FieldDef::new("app", "string", "app", "app"),
            FieldDef::new("msg", "string", "message", "msg"),
        ],
        confidence: 0.6,
        ..Default::default()
    }
}

pub(crate) fn unknown_schema() -> Schema {
    Schema {
        format_name: "unknown".into(),
        parse_strategy: ParseStrategy::Regex,
        regex_pattern: Some(r"^(?P<msg>.*)$".into()),
        fields: vec![FieldDef::new("msg", "string", "message", "msg")],
        confidence: 0.0,
        ..Default::default()
    }
}
