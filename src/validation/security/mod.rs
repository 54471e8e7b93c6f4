pub mod dlp;
pub mod sanitize;
pub mod structure;
pub mod threats;

use std::borrow::Cow;

use async_trait::async_trait;
use log::*;
use serde_derive::*;
use serde_json::json;

use crate::artifact::Artifact;
use crate::context::ValidationContext;
use crate::errors::*;
use crate::result::{ResultBuilder, Severity, ValidationError, ValidationResult, ValidationWarning};
use super::{expects_pdf, prefix, text_window, Validator};

const SCAN_WINDOW: usize = 1024 * 1024;
const ENTROPY_WINDOW: usize = 64 * 1024;

#[derive(Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase", default)]
pub struct SecurityConfig {
    pub enable_dlp: bool,
    pub enable_threat_detection: bool,
    pub enable_sanitization: bool,
    pub enable_advanced_checks: bool,
    pub entropy_threshold: f64,
}

impl Default for SecurityConfig {
    fn default() -> Self {
        return SecurityConfig {
            enable_dlp: true,
            enable_threat_detection: true,
            enable_sanitization: true,
            enable_advanced_checks: true,
            entropy_threshold: 7.5,
        };
    }
}

pub struct SecurityValidator {
    config: SecurityConfig,
}

impl SecurityValidator {
    pub fn new(config: SecurityConfig) -> SecurityValidator {
        return SecurityValidator { config };
    }

    fn check_dlp(&self, text: &str, result: &mut ResultBuilder) -> Result<()> {
        let report = dlp::scan(text)?;
        for finding in &report.findings {
            debug!("DLP category {} matched {} times ({})", finding.category, finding.count, finding.severity.as_str());
            if finding.severity.is_blocking() {
                result.push_error(ValidationError::new("DLP_VIOLATION",
                        format!("Sensitive data detected: {} ({} matches)", finding.category, finding.count),
                        finding.severity)
                    .with_field(&format!("content.{}", finding.category)));
            } else {
                result.push_warning(ValidationWarning::new("DLP_WARNING",
                        format!("Possible sensitive data: {} ({} matches)", finding.category, finding.count))
                    .with_field(&format!("content.{}", finding.category))
                    .with_severity(finding.severity));
            }
        }
        let mut summary = json!({ "findings": report.findings });
        if let Some(redacted) = report.redacted {
            summary["redactedContent"] = json!(redacted);
        }
        result.meta("dlp", summary);
        return Ok(());
    }

    fn check_threats(&self, text: &str, bytes: &[u8], result: &mut ResultBuilder) -> Result<()> {
        let found = threats::detect(text, prefix(bytes, SCAN_WINDOW))?;
        if !found.is_empty() {
            warn!("Threat signatures matched: {:?}", found);
            result.error("THREAT_DETECTED",
                         format!("Known exploit patterns detected: {}", found.join(", ")),
                         Severity::Critical);
            result.meta("threats", found);
        }
        return Ok(());
    }

    fn check_sanitization(&self, text: &str, result: &mut ResultBuilder) -> Result<()> {
        let report = sanitize::assess(text)?;
        if !report.dangerous_tags.is_empty() {
            result.push_warning(ValidationWarning::new("DANGEROUS_MARKUP",
                    format!("Markup contains dangerous tags: {}", report.dangerous_tags.iter().cloned().collect::<Vec<_>>().join(", ")))
                .with_severity(Severity::Medium));
        }
        if !report.sql_patterns.is_empty() {
            result.push_warning(ValidationWarning::new("SQL_INJECTION_PATTERN",
                    format!("Content contains SQL injection patterns: {}", report.sql_patterns.join(", ")))
                .with_severity(Severity::Medium));
        }
        if report.path_traversal > 0 {
            result.push_warning(ValidationWarning::new("PATH_TRAVERSAL_PATTERN",
                    format!("Content contains {} path traversal sequences", report.path_traversal))
                .with_severity(Severity::Medium));
        }
        result.meta("sanitization", json!({
            "needsSanitization": report.needs_sanitization(),
            "report": report,
        }));
        return Ok(());
    }

    fn check_structure(&self, artifact: &Artifact, context: &ValidationContext, result: &mut ResultBuilder) {
        let bytes = artifact.bytes();
        if expects_pdf(artifact, context) {
            let window = prefix(bytes, SCAN_WINDOW);
            let actions = structure::pdf_auto_actions(window);
            if !actions.is_empty() {
                result.error("PDF_AUTO_ACTION",
                             format!("PDF triggers actions automatically: {}", actions.join(", ")),
                             Severity::Medium);
            }
            let reasons = structure::suspicious_encryption(window);
            if !reasons.is_empty() {
                result.error("SUSPICIOUS_PDF_ENCRYPTION",
                             format!("PDF encryption looks suspicious: {}", reasons.join(", ")),
                             Severity::Medium);
            }
        }

        let entropy = structure::entropy(prefix(bytes, ENTROPY_WINDOW));
        result.meta("entropy", (entropy * 1000.0).round() / 1000.0);
        if entropy > self.config.entropy_threshold {
            result.error("HIGH_ENTROPY",
                         format!("Content entropy {:.2} bits/byte suggests compressed or encrypted payloads", entropy),
                         Severity::Low);
        }

        let formats = structure::polyglot_formats(bytes);
        if formats.len() > 1 {
            warn!("Upload matches signatures of several formats: {:?}", formats);
            result.error("POLYGLOT_FILE",
                         format!("File is valid as several formats at once: {}", formats.join(", ")),
                         Severity::High);
            result.meta("polyglotFormats", formats);
        }
    }

    fn inspect(&self, artifact: &Artifact, context: &ValidationContext, result: &mut ResultBuilder) -> Result<()> {
        let text = text_window(artifact.bytes(), SCAN_WINDOW);
        if self.config.enable_dlp {
            let content = if expects_pdf(artifact, context) {
                structure::strip_xref_entries(&text)?
            } else {
                Cow::Borrowed(&*text)
            };
            self.check_dlp(&content, result)?;
        }
        if self.config.enable_threat_detection {
            self.check_threats(&text, artifact.bytes(), result)?;
        }
        if self.config.enable_sanitization {
            self.check_sanitization(&text, result)?;
        }
        if self.config.enable_advanced_checks {
            self.check_structure(artifact, context, result);
        }
        return Ok(());
    }
}

#[async_trait]
impl Validator for SecurityValidator {
    fn name(&self) -> &str {
        return "security";
    }

    async fn validate(&self, artifact: &Artifact, context: &ValidationContext) -> Result<ValidationResult> {
        let mut result = ResultBuilder::new();
        if let Err(e) = self.inspect(artifact, context, &mut result) {
            error!("Security inspection failed: {}", e);
            result.error("SECURITY_VALIDATION_ERROR", format!("Security inspection failed: {}", e), Severity::Critical);
        }
        return Ok(result.build());
    }
}
