//! Pattern based detection of sensitive data.
//!
//! Each category is one row of [`DLP_CATALOG`]. A category's severity depends on
//! how often it matched, see [`SeverityRule`]. Raw matches never leave this
//! module, only counts, masked samples and a redacted copy of the text.

use std::sync::LazyLock;

use regex::{NoExpand, Regex};
use serde_derive::*;

use crate::result::Severity;

pub const REDACTION_PLACEHOLDER: &str = "[REDACTED]";
const MAX_SAMPLES: usize = 3;
const MASK: char = '*';

#[derive(Debug, Clone, Copy)]
pub enum SeverityRule {
    Fixed(Severity),
    /// `above` once the match count exceeds `limit`, `otherwise` before.
    Threshold { limit: usize, above: Severity, otherwise: Severity },
}

impl SeverityRule {
    pub fn classify(&self, count: usize) -> Severity {
        match *self {
            SeverityRule::Fixed(severity) => severity,
            SeverityRule::Threshold { limit, above, otherwise } => {
                if count > limit { above } else { otherwise }
            }
        }
    }
}

pub struct DlpCategory {
    pub label: &'static str,
    pub pattern: &'static str,
    pub rule: SeverityRule,
}

const ADVISORY: SeverityRule = SeverityRule::Threshold { limit: 10, above: Severity::Medium, otherwise: Severity::Low };

pub const DLP_CATALOG: &[DlpCategory] = &[
    DlpCategory {
        label: "ssn",
        pattern: r"\b\d{3}-\d{2}-\d{4}\b",
        rule: SeverityRule::Fixed(Severity::High),
    },
    DlpCategory {
        label: "credit_card",
        pattern: r"\b(?:\d{4}[- ]?){3}\d{4}\b",
        rule: SeverityRule::Fixed(Severity::High),
    },
    DlpCategory {
        label: "bank_account",
        pattern: r"\b\d{8,17}\b",
        rule: SeverityRule::Threshold { limit: 3, above: Severity::High, otherwise: Severity::Medium },
    },
    DlpCategory {
        label: "api_key",
        pattern: r#"\b(?:AKIA[0-9A-Z]{16}|(?:sk|pk|rk)_(?:live|test)_[0-9A-Za-z]{16,}|gh[pousr]_[0-9A-Za-z]{36}|xox[baprs]-[0-9A-Za-z-]{10,}|(?i:api[_-]?key|secret[_-]?key|access[_-]?token)\s*[:=]\s*["']?[0-9A-Za-z_\-]{16,})"#,
        rule: SeverityRule::Fixed(Severity::High),
    },
    DlpCategory {
        label: "private_key",
        pattern: r"-----BEGIN (?:RSA |EC |DSA |OPENSSH |ENCRYPTED )?PRIVATE KEY-----",
        rule: SeverityRule::Fixed(Severity::High),
    },
    DlpCategory {
        label: "password",
        pattern: r"(?i)\b(?:password|passwd|pwd)\s*[:=]\s*\S+",
        rule: SeverityRule::Threshold { limit: 2, above: Severity::High, otherwise: Severity::Medium },
    },
    DlpCategory {
        label: "email",
        pattern: r"\b[A-Za-z0-9._%+-]+@[A-Za-z0-9.-]+\.[A-Za-z]{2,}\b",
        rule: ADVISORY,
    },
    DlpCategory {
        label: "phone",
        pattern: r"(?:\+\d{1,3}[-. ]?)?\(?\b\d{3}\)?[-. ]\d{3}[-. ]\d{4}\b",
        rule: ADVISORY,
    },
    DlpCategory {
        label: "ipv4",
        pattern: r"\b(?:(?:25[0-5]|2[0-4]\d|1?\d?\d)\.){3}(?:25[0-5]|2[0-4]\d|1?\d?\d)\b",
        rule: ADVISORY,
    },
];

static COMPILED: LazyLock<Result<Vec<(&'static DlpCategory, Regex)>, regex::Error>> = LazyLock::new(|| {
    DLP_CATALOG.iter()
        .map(|category| Regex::new(category.pattern).map(|re| (category, re)))
        .collect()
});

#[derive(Serialize, Debug, Clone, PartialEq)]
pub struct DlpFinding {
    pub category: String,
    pub count: usize,
    pub severity: Severity,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub samples: Vec<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct DlpReport {
    pub findings: Vec<DlpFinding>,
    /// Present only when at least one category is `High`.
    pub redacted: Option<String>,
}

impl DlpReport {
    pub fn has_blocking(&self) -> bool {
        return self.findings.iter().any(|f| f.severity.is_blocking());
    }
}

pub fn scan(text: &str) -> Result<DlpReport, regex::Error> {
    let catalog = COMPILED.as_ref().map_err(|e| e.clone())?;

    let mut findings = Vec::new();
    let mut blocking: Vec<&Regex> = Vec::new();
    for (category, pattern) in catalog {
        let matches: Vec<&str> = pattern.find_iter(text).map(|m| m.as_str()).collect();
        if matches.is_empty() {
            continue;
        }
        let severity = category.rule.classify(matches.len());
        let samples = if severity.is_blocking() {
            blocking.push(pattern);
            matches.iter().take(MAX_SAMPLES).map(|m| mask(m)).collect()
        } else {
            Vec::new()
        };
        findings.push(DlpFinding {
            category: String::from(category.label),
            count: matches.len(),
            severity,
            samples,
        });
    }

    let redacted = if blocking.is_empty() {
        None
    } else {
        let mut copy = String::from(text);
        for pattern in blocking {
            copy = pattern.replace_all(&copy, NoExpand(REDACTION_PLACEHOLDER)).into_owned();
        }
        Some(copy)
    };

    return Ok(DlpReport { findings, redacted });
}

/// Keeps the first and last two characters, masks everything in between.
pub fn mask(value: &str) -> String {
    let chars: Vec<char> = value.chars().collect();
    if chars.len() <= 4 {
        return MASK.to_string().repeat(chars.len());
    }
    let mut masked = String::with_capacity(chars.len());
    masked.extend(&chars[..2]);
    masked.extend(std::iter::repeat(MASK).take(chars.len() - 4));
    masked.extend(&chars[chars.len() - 2..]);
    return masked;
}
