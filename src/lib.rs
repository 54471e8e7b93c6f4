#[macro_use]
extern crate error_chain;

use std::fs::File;
use std::path::Path;

use log::*;
use simplelog::{ColorChoice, CombinedLogger, Config, SharedLogger, TermLogger, TerminalMode, WriteLogger};

pub mod artifact;
pub mod cancellation;
pub mod config;
pub mod context;
pub mod errors;
pub mod pipeline;
pub mod result;
pub mod validation;

pub use artifact::Artifact;
pub use cancellation::{cancellation, CancelHandle, CancelSignal};
pub use config::PipelineConfig;
pub use context::ValidationContext;
pub use errors::*;
pub use pipeline::{MetadataMode, PipelineRun, PipelineState, ValidationPipeline};
pub use result::{Metadata, Severity, ValidationError, ValidationResult, ValidationWarning};
pub use validation::Validator;

/// Logs to stderr and, if given, additionally to `log_file`.
pub fn init_logging(level: LevelFilter, log_file: Option<File>) -> Result<()> {
    let mut loggers: Vec<Box<dyn SharedLogger>> = vec![
        TermLogger::new(level, Config::default(), TerminalMode::Stderr, ColorChoice::Auto)
    ];
    if let Some(file) = log_file {
        loggers.push(WriteLogger::new(LevelFilter::Debug, Config::default(), file));
    }
    CombinedLogger::init(loggers)
        .chain_err(|| ErrorKind::InvalidConfiguration(String::from("Could not create logger")))?;
    return Ok(());
}

/// Reads `path` and runs the pipeline described by `config` over it.
pub async fn validate_file(path: &Path, media_type: Option<&str>, config: &PipelineConfig, context: &ValidationContext) -> Result<ValidationResult> {
    let pipeline = config.build_pipeline()?;
    let mut artifact = Artifact::from_path(path)?;
    if let Some(media_type) = media_type {
        artifact = artifact.with_media_type(media_type);
    }
    info!("Validating {} ({} bytes)", path.display(), artifact.len());
    return Ok(pipeline.validate(&artifact, context).await);
}
