use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use std::time::Duration;

use log::*;
use serde_derive::*;

use crate::errors::*;
use crate::pipeline::{MetadataMode, ValidationPipeline};
use crate::validation::*;
use crate::validation::file_type::parse_version_label;

/// Pipeline configuration as read from a JSON document. Every section is optional.
#[derive(Deserialize, Debug, Clone, Default)]
#[serde(rename_all = "camelCase", default)]
pub struct PipelineConfig {
    pub size: SizeConfig,
    pub file_type: FileTypeSection,
    pub content: ContentConfig,
    pub security: SecurityConfig,
    pub checksum: Option<ChecksumSection>,
    pub scanner: Option<ScannerSection>,
    pub pipeline: PipelineSection,
}

#[derive(Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase", default)]
pub struct FileTypeSection {
    pub allowed_extensions: Vec<String>,
    pub allowed_media_types: Vec<String>,
    /// Label to hex encoded signature.
    pub magic_numbers: BTreeMap<String, String>,
    pub max_pdf_version: String,
}

impl Default for FileTypeSection {
    fn default() -> Self {
        return FileTypeSection {
            allowed_extensions: vec![String::from("pdf")],
            allowed_media_types: vec![String::from(PDF_MEDIA_TYPE)],
            magic_numbers: vec![(String::from("pdf"), hex::encode(PDF_SIGNATURE))].into_iter().collect(),
            max_pdf_version: String::from("2.0"),
        };
    }
}

impl FileTypeSection {
    fn to_config(&self) -> Result<FileTypeConfig> {
        let mut config = FileTypeConfig::new(&self.allowed_extensions, &self.allowed_media_types);
        for (label, signature) in &self.magic_numbers {
            let bytes = hex::decode(signature.trim())
                .chain_err(|| ErrorKind::InvalidConfiguration(format!("Magic number '{}' is not valid hex: {}", label, signature)))?;
            if bytes.is_empty() {
                bail!(ErrorKind::InvalidConfiguration(format!("Magic number '{}' is empty", label)));
            }
            config = config.with_magic_number(label, &bytes);
        }
        config.max_pdf_version = parse_version_label(&self.max_pdf_version)
            .ok_or_else(|| ErrorKind::InvalidConfiguration(format!("Invalid maxPdfVersion '{}'", self.max_pdf_version)))?;
        return Ok(config);
    }
}

#[derive(Deserialize, Debug, Clone, Default)]
#[serde(rename_all = "camelCase")]
pub struct ChecksumSection {
    #[serde(default)]
    pub expected: Option<String>,
}

#[derive(Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct ScannerSection {
    pub url: String,
    #[serde(default = "default_scanner_timeout")]
    pub timeout_ms: u64,
}

fn default_scanner_timeout() -> u64 {
    return 30_000;
}

#[derive(Deserialize, Debug, Clone, Default)]
#[serde(rename_all = "camelCase", default)]
pub struct PipelineSection {
    pub validator_timeout_ms: Option<u64>,
    pub metadata_mode: MetadataMode,
}

impl PipelineConfig {
    pub fn parse(json: &str) -> Result<PipelineConfig> {
        let config: PipelineConfig = serde_json::from_str(json)
            .chain_err(|| ErrorKind::InvalidConfiguration(String::from("Could not parse pipeline configuration")))?;
        config.check()?;
        return Ok(config);
    }

    pub fn from_file(path: &Path) -> Result<PipelineConfig> {
        debug!("Reading pipeline configuration from {}", path.display());
        let json = fs::read_to_string(path)
            .chain_err(|| ErrorKind::InvalidConfiguration(format!("Could not read {}", path.display())))?;
        return PipelineConfig::parse(&json);
    }

    fn check(&self) -> Result<()> {
        if let Some(min) = self.size.min_size {
            if min > self.size.max_size {
                bail!(ErrorKind::InvalidConfiguration(format!("minSize {} exceeds maxSize {}", min, self.size.max_size)));
            }
        }
        if let Some(scanner) = &self.scanner {
            if scanner.url.trim().is_empty() {
                bail!(ErrorKind::InvalidConfiguration(String::from("Scanner url must not be empty")));
            }
        }
        if self.pipeline.validator_timeout_ms == Some(0) {
            bail!(ErrorKind::InvalidConfiguration(String::from("validatorTimeoutMs must be positive")));
        }
        self.file_type.to_config()?;
        return Ok(());
    }

    /// Cheap structural checks first, external scanning last.
    pub fn build_pipeline(&self) -> Result<ValidationPipeline> {
        let mut pipeline = ValidationPipeline::new()
            .with_metadata_mode(self.pipeline.metadata_mode)
            .with_validator(SizeValidator::new(self.size.clone()))
            .with_validator(FileTypeValidator::new(self.file_type.to_config()?));
        if let Some(checksum) = &self.checksum {
            pipeline.register(Box::new(ChecksumValidator::new(checksum.expected.clone())));
        }
        pipeline.register(Box::new(ContentValidator::new(self.content.clone())));
        pipeline.register(Box::new(SecurityValidator::new(self.security.clone())));
        if let Some(scanner) = &self.scanner {
            let engine = HttpScanEngine::new(&scanner.url, Duration::from_millis(scanner.timeout_ms));
            pipeline.register(Box::new(MalwareScanner::new(Box::new(engine))));
        }
        if let Some(millis) = self.pipeline.validator_timeout_ms {
            pipeline = pipeline.with_validator_timeout(Duration::from_millis(millis));
        }
        debug!("Configured validators: {:?}", pipeline.validator_names());
        return Ok(pipeline);
    }
}
