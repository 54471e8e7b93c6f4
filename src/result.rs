use serde_derive::*;
use serde_json::Value;

pub type Metadata = serde_json::Map<String, Value>;

/// Risk level of a single finding. Ordering is `Low < Medium < High < Critical`.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

impl Severity {
    /// Findings at this level make a verdict invalid.
    pub fn is_blocking(&self) -> bool {
        return *self >= Severity::High;
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Low => "low",
            Severity::Medium => "medium",
            Severity::High => "high",
            Severity::Critical => "critical",
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct ValidationError {
    pub code: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub field: Option<String>,
    pub severity: Severity,
}

impl ValidationError {
    pub fn new(code: &str, message: String, severity: Severity) -> ValidationError {
        return ValidationError {
            code: String::from(code),
            message,
            field: None,
            severity,
        };
    }

    pub fn with_field(mut self, field: &str) -> ValidationError {
        self.field = Some(String::from(field));
        return self;
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct ValidationWarning {
    pub code: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub field: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub severity: Option<Severity>,
}

impl ValidationWarning {
    pub fn new(code: &str, message: String) -> ValidationWarning {
        return ValidationWarning {
            code: String::from(code),
            message,
            field: None,
            severity: None,
        };
    }

    pub fn with_severity(mut self, severity: Severity) -> ValidationWarning {
        self.severity = Some(severity);
        return self;
    }

    pub fn with_field(mut self, field: &str) -> ValidationWarning {
        self.field = Some(String::from(field));
        return self;
    }
}

/// Verdict of a single validator or of a whole pipeline run.
///
/// `valid` is derived from `errors` and is never set independently: a result is
/// valid iff none of its errors is `High` or `Critical`.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct ValidationResult {
    pub valid: bool,
    pub errors: Vec<ValidationError>,
    pub warnings: Vec<ValidationWarning>,
    pub metadata: Metadata,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub severity: Option<Severity>,
}

impl ValidationResult {
    pub fn new(errors: Vec<ValidationError>, warnings: Vec<ValidationWarning>, metadata: Metadata) -> ValidationResult {
        let severity = highest_severity(&errors);
        return ValidationResult {
            valid: !severity.map(|s| s.is_blocking()).unwrap_or(false),
            errors,
            warnings,
            metadata,
            severity,
        };
    }

    pub fn is_critical_failure(&self) -> bool {
        return !self.valid && self.severity == Some(Severity::Critical);
    }

    pub fn has_error(&self, code: &str) -> bool {
        return self.errors.iter().any(|e| e.code == code);
    }

    pub fn has_warning(&self, code: &str) -> bool {
        return self.warnings.iter().any(|w| w.code == code);
    }

    pub fn error(&self, code: &str) -> Option<&ValidationError> {
        return self.errors.iter().find(|e| e.code == code);
    }
}

pub fn highest_severity(errors: &[ValidationError]) -> Option<Severity> {
    return errors.iter().map(|e| e.severity).max();
}

/// Collects findings during one `validate` call.
#[derive(Default)]
pub struct ResultBuilder {
    errors: Vec<ValidationError>,
    warnings: Vec<ValidationWarning>,
    metadata: Metadata,
}

impl ResultBuilder {
    pub fn new() -> ResultBuilder {
        return ResultBuilder::default();
    }

    pub fn error(&mut self, code: &str, message: String, severity: Severity) -> &mut ResultBuilder {
        self.errors.push(ValidationError::new(code, message, severity));
        return self;
    }

    pub fn push_error(&mut self, error: ValidationError) -> &mut ResultBuilder {
        self.errors.push(error);
        return self;
    }

    pub fn warning(&mut self, code: &str, message: String) -> &mut ResultBuilder {
        self.warnings.push(ValidationWarning::new(code, message));
        return self;
    }

    pub fn push_warning(&mut self, warning: ValidationWarning) -> &mut ResultBuilder {
        self.warnings.push(warning);
        return self;
    }

    pub fn meta<V: Into<Value>>(&mut self, key: &str, value: V) -> &mut ResultBuilder {
        self.metadata.insert(String::from(key), value.into());
        return self;
    }

    pub fn build(self) -> ValidationResult {
        return ValidationResult::new(self.errors, self.warnings, self.metadata);
    }
}
