use std::collections::{BTreeMap, BTreeSet};

use async_trait::async_trait;
use log::*;
use serde_json::json;

use crate::artifact::Artifact;
use crate::context::ValidationContext;
use crate::errors::*;
use crate::result::{ResultBuilder, Severity, ValidationError, ValidationResult, ValidationWarning};
use super::{contains, is_pdf, tail, Validator, PDF_SIGNATURE};

const PDF_HEADER: &[u8] = b"%PDF-";
const PDF_EOF_MARKER: &[u8] = b"%%EOF";
const PDF_TRAILER_WINDOW: usize = 1024;

#[derive(Debug, Clone)]
pub struct FileTypeConfig {
    /// Lower-case, without leading dot. Empty means unrestricted.
    pub allowed_extensions: BTreeSet<String>,
    /// Lower-case. Empty means unrestricted.
    pub allowed_media_types: BTreeSet<String>,
    pub magic_numbers: BTreeMap<String, Vec<u8>>,
    pub max_pdf_version: (u32, u32),
}

impl FileTypeConfig {
    pub fn new<E, M>(extensions: E, media_types: M) -> FileTypeConfig
        where E: IntoIterator, E::Item: AsRef<str>, M: IntoIterator, M::Item: AsRef<str> {
        return FileTypeConfig {
            allowed_extensions: extensions.into_iter().map(|e| normalize_extension(e.as_ref())).collect(),
            allowed_media_types: media_types.into_iter().map(|m| m.as_ref().trim().to_lowercase()).collect(),
            magic_numbers: BTreeMap::new(),
            max_pdf_version: (2, 0),
        };
    }

    pub fn with_magic_number(mut self, label: &str, signature: &[u8]) -> FileTypeConfig {
        self.magic_numbers.insert(String::from(label), signature.to_vec());
        return self;
    }
}

impl Default for FileTypeConfig {
    fn default() -> Self {
        return FileTypeConfig::new(vec!["pdf"], vec![super::PDF_MEDIA_TYPE])
            .with_magic_number("pdf", PDF_SIGNATURE);
    }
}

pub fn normalize_extension(extension: &str) -> String {
    return extension.trim().trim_start_matches('.').to_lowercase();
}

pub struct FileTypeValidator {
    config: FileTypeConfig,
}

impl FileTypeValidator {
    pub fn new(config: FileTypeConfig) -> FileTypeValidator {
        return FileTypeValidator { config };
    }

    fn check_extension(&self, artifact: &Artifact, result: &mut ResultBuilder) {
        let name = match artifact.name() {
            Some(name) => name,
            None => return,
        };
        let extension = artifact.extension();
        result.meta("extension", extension.clone());
        if self.config.allowed_extensions.is_empty() {
            return;
        }
        let allowed = extension.as_ref().map(|e| self.config.allowed_extensions.contains(e)).unwrap_or(false);
        if !allowed {
            debug!("Extension of {} is not allowed", name);
            result.push_error(ValidationError::new("INVALID_FILE_EXTENSION",
                    format!("File extension {} is not allowed (allowed: {})",
                            extension.map(|e| format!(".{}", e)).unwrap_or_else(|| String::from("<none>")),
                            join(&self.config.allowed_extensions, ".")),
                    Severity::High)
                .with_field("file.name"));
        }
    }

    fn check_media_type(&self, artifact: &Artifact, result: &mut ResultBuilder) {
        let media_type = match artifact.media_type() {
            Some(media_type) => media_type,
            None => return,
        };
        result.meta("declaredMediaType", media_type.clone());
        if !self.config.allowed_media_types.is_empty() && !self.config.allowed_media_types.contains(&media_type) {
            debug!("Declared media type {} is not allowed", media_type);
            result.push_error(ValidationError::new("INVALID_MIME_TYPE",
                    format!("Media type {} is not allowed (allowed: {})", media_type, join(&self.config.allowed_media_types, "")),
                    Severity::High)
                .with_field("file.mediaType"));
        }
    }

    fn check_magic_number(&self, artifact: &Artifact, result: &mut ResultBuilder) {
        let shortest = match self.config.magic_numbers.values().map(|s| s.len()).min() {
            Some(shortest) => shortest,
            None => return,
        };
        let bytes = artifact.bytes();
        if bytes.len() < shortest {
            result.push_warning(ValidationWarning::new("MAGIC_NUMBER_UNCHECKED",
                    format!("File is too short ({} bytes) to carry a known signature", bytes.len()))
                .with_severity(Severity::Medium));
            return;
        }

        let detected = self.config.magic_numbers.iter()
            .find(|(_, signature)| !signature.is_empty() && bytes.starts_with(signature))
            .map(|(label, _)| label.clone());
        match detected {
            Some(label) => {
                result.meta("detectedFormat", label);
            }
            None => {
                let leading: Vec<u8> = bytes.iter().take(8).cloned().collect();
                warn!("Leading bytes {} match no allowed signature", hex::encode(&leading));
                result.error("INVALID_MAGIC_NUMBER",
                             String::from("File content does not match any allowed file signature"),
                             Severity::Critical);
            }
        }
    }

    fn check_pdf_structure(&self, bytes: &[u8], result: &mut ResultBuilder) {
        if !bytes.starts_with(PDF_HEADER) {
            result.error("INVALID_PDF_HEADER", String::from("File does not start with a PDF header"), Severity::Critical);
        } else {
            match parse_pdf_version(bytes) {
                Some(version) => {
                    result.meta("pdfVersion", format!("{}.{}", version.0, version.1));
                    if version > self.config.max_pdf_version {
                        result.push_warning(ValidationWarning::new("UNUSUAL_PDF_VERSION",
                                format!("PDF version {}.{} is newer than expected", version.0, version.1))
                            .with_severity(Severity::Low));
                    }
                }
                None => {
                    result.push_warning(ValidationWarning::new("UNKNOWN_PDF_VERSION",
                            String::from("PDF header does not declare a readable version"))
                        .with_severity(Severity::Low));
                }
            }
        }

        if !contains(tail(bytes, PDF_TRAILER_WINDOW), PDF_EOF_MARKER) {
            result.error("MISSING_PDF_EOF", String::from("PDF end-of-file marker is missing, the file may be truncated"), Severity::Medium);
        }
    }
}

#[async_trait]
impl Validator for FileTypeValidator {
    fn name(&self) -> &str {
        return "fileType";
    }

    async fn validate(&self, artifact: &Artifact, _context: &ValidationContext) -> Result<ValidationResult> {
        let mut result = ResultBuilder::new();
        self.check_extension(artifact, &mut result);
        self.check_media_type(artifact, &mut result);
        self.check_magic_number(artifact, &mut result);

        let pdf = is_pdf(artifact);
        result.meta("isPdf", pdf);
        if pdf {
            self.check_pdf_structure(artifact.bytes(), &mut result);
        }
        result.meta("allowedExtensions", json!(self.config.allowed_extensions));
        return Ok(result.build());
    }
}

/// `(major, minor)` from a `%PDF-M.m` header.
pub fn parse_pdf_version(bytes: &[u8]) -> Option<(u32, u32)> {
    let rest = bytes.strip_prefix(PDF_HEADER)?;
    let digits: Vec<u8> = rest.iter().take(8).take_while(|b| b.is_ascii_digit() || **b == b'.').cloned().collect();
    let text = String::from_utf8(digits).ok()?;
    return parse_version_label(&text);
}

/// `(major, minor)` from a `M.m` label such as `"1.7"`.
pub fn parse_version_label(label: &str) -> Option<(u32, u32)> {
    let mut parts = label.trim().splitn(2, '.');
    let major = parts.next()?.parse().ok()?;
    let minor = parts.next()?.parse().ok()?;
    return Some((major, minor));
}

fn join(values: &BTreeSet<String>, prefix: &str) -> String {
    return values.iter().map(|v| format!("{}{}", prefix, v)).collect::<Vec<_>>().join(", ");
}
