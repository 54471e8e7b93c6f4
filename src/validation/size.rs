use async_trait::async_trait;
use log::*;
use serde_derive::*;

use crate::artifact::Artifact;
use crate::context::ValidationContext;
use crate::errors::*;
use crate::result::{ResultBuilder, Severity, ValidationResult, ValidationWarning};
use super::{is_pdf, Validator};

const PDF_COMPRESSION_RATIO: f64 = 0.7;
const DEFAULT_COMPRESSION_RATIO: f64 = 0.9;
const BYTES_PER_PROCESSING_MS: u64 = 10 * 1024;

#[derive(Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase", default)]
pub struct SizeConfig {
    pub max_size: u64,
    pub min_size: Option<u64>,
    pub warn_size: Option<u64>,
}

impl Default for SizeConfig {
    fn default() -> Self {
        return SizeConfig {
            max_size: 10 * 1024 * 1024,
            min_size: Some(100),
            warn_size: Some(5 * 1024 * 1024),
        };
    }
}

pub struct SizeValidator {
    config: SizeConfig,
}

impl SizeValidator {
    pub fn new(config: SizeConfig) -> SizeValidator {
        return SizeValidator { config };
    }
}

#[async_trait]
impl Validator for SizeValidator {
    fn name(&self) -> &str {
        return "size";
    }

    async fn validate(&self, artifact: &Artifact, _context: &ValidationContext) -> Result<ValidationResult> {
        let len = artifact.len() as u64;
        let mut result = ResultBuilder::new();

        let ratio = if is_pdf(artifact) { PDF_COMPRESSION_RATIO } else { DEFAULT_COMPRESSION_RATIO };
        result.meta("size", len)
            .meta("sizeHuman", human_size(len))
            .meta("compressionRatio", ratio)
            .meta("estimatedCompressedSize", (len as f64 * ratio).round() as u64)
            .meta("estimatedProcessingMs", (len + BYTES_PER_PROCESSING_MS - 1) / BYTES_PER_PROCESSING_MS);

        if let Some(min_size) = self.config.min_size {
            if min_size > self.config.max_size {
                result.error("SIZE_VALIDATION_ERROR",
                             format!("Size bounds are inconsistent: minimum {} exceeds maximum {}", min_size, self.config.max_size),
                             Severity::Critical);
                return Ok(result.build());
            }
            if len < min_size {
                debug!("Artifact has size of {} (minimum: {})", len, min_size);
                result.error("FILE_TOO_SMALL",
                             format!("File size {} is below the minimum of {}", human_size(len), human_size(min_size)),
                             Severity::Medium);
            }
        }

        if len > self.config.max_size {
            debug!("Artifact has size of {} (maximum: {})", len, self.config.max_size);
            result.error("FILE_TOO_LARGE",
                         format!("File size {} exceeds the maximum of {}", human_size(len), human_size(self.config.max_size)),
                         Severity::High);
        } else if let Some(warn_size) = self.config.warn_size {
            if len > warn_size {
                result.push_warning(ValidationWarning::new("LARGE_FILE_WARNING",
                        format!("File size {} is above {}, processing may be slow", human_size(len), human_size(warn_size)))
                    .with_severity(Severity::Low));
            }
        }

        return Ok(result.build());
    }
}

pub fn human_size(bytes: u64) -> String {
    const UNITS: [&str; 4] = ["KB", "MB", "GB", "TB"];
    if bytes < 1024 {
        return format!("{} B", bytes);
    }
    let mut value = bytes as f64 / 1024.0;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    return format!("{:.2} {}", value, UNITS[unit]);
}
