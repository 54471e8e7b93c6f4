use std::collections::BTreeSet;
use std::sync::LazyLock;

use regex::Regex;
use serde_derive::*;

use crate::validation::{compile_catalog, PatternCatalog};

const SQL_PATTERNS: &[(&str, &str)] = &[
    ("union-select", r"(?i)\bunion\s+(?:all\s+)?select\b"),
    ("select-star", r"(?i)\bselect\s+\*\s+from\b"),
    ("drop-table", r"(?i)\bdrop\s+table\b"),
    ("insert-into", r"(?i)\binsert\s+into\s+\w+\s*\("),
    ("tautology", r"(?i)'\s*or\s+'?1'?\s*=\s*'?1"),
    ("comment-terminator", r"';\s*--"),
];

struct Patterns {
    markup: Regex,
    dangerous_tag: Regex,
    sql: PatternCatalog,
}

static PATTERNS: LazyLock<Result<Patterns, regex::Error>> = LazyLock::new(|| {
    Ok(Patterns {
        markup: Regex::new(r"<[A-Za-z][A-Za-z0-9]*(?:\s[^<>]*)?/?>")?,
        dangerous_tag: Regex::new(r"(?i)<\s*(script|iframe|object|embed|form|input|link|meta|style)\b")?,
        sql: compile_catalog(SQL_PATTERNS)?,
    })
});

#[derive(Serialize, Debug, Clone, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SanitizationReport {
    pub has_markup: bool,
    pub dangerous_tags: BTreeSet<String>,
    pub sql_patterns: Vec<&'static str>,
    pub path_traversal: usize,
}

impl SanitizationReport {
    pub fn needs_sanitization(&self) -> bool {
        return !self.dangerous_tags.is_empty() || !self.sql_patterns.is_empty() || self.path_traversal > 0;
    }
}

pub fn assess(text: &str) -> Result<SanitizationReport, regex::Error> {
    let patterns = PATTERNS.as_ref().map_err(|e| e.clone())?;
    let mut report = SanitizationReport::default();

    report.has_markup = patterns.markup.is_match(text);
    if report.has_markup {
        report.dangerous_tags = patterns.dangerous_tag.captures_iter(text)
            .filter_map(|c| c.get(1))
            .map(|m| m.as_str().to_lowercase())
            .collect();
    }
    report.sql_patterns = patterns.sql.iter()
        .filter(|(_, pattern)| pattern.is_match(text))
        .map(|(label, _)| *label)
        .collect();
    report.path_traversal = text.matches("../").count() + text.matches("..\\").count();
    return Ok(report);
}
