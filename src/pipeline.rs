use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::time::Duration;

use error_chain::ChainedError;
use futures::FutureExt;
use log::*;
use serde_derive::*;
use serde_json::{json, Value};

use crate::artifact::Artifact;
use crate::cancellation::CancelSignal;
use crate::context::ValidationContext;
use crate::errors::*;
use crate::result::{Metadata, Severity, ValidationError, ValidationResult, ValidationWarning};
use crate::validation::Validator;

/// How validator metadata is combined into the aggregate.
#[derive(Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum MetadataMode {
    /// Each validator's map lands under its own name.
    Namespaced,
    /// Shallow merge into one map, later validators overwrite earlier keys.
    Merged,
}

impl Default for MetadataMode {
    fn default() -> Self {
        return MetadataMode::Namespaced;
    }
}

#[derive(Serialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum PipelineState {
    Idle,
    Running,
    Completed,
    Aborted,
}

impl PipelineState {
    pub fn as_str(&self) -> &'static str {
        match self {
            PipelineState::Idle => "idle",
            PipelineState::Running => "running",
            PipelineState::Completed => "completed",
            PipelineState::Aborted => "aborted",
        }
    }
}

/// Outcome of one pipeline run.
#[derive(Debug, Clone)]
pub struct PipelineRun {
    pub state: PipelineState,
    pub aborted_by: Option<String>,
    pub result: ValidationResult,
}

/// Ordered list of validators run strictly one after another over a shared artifact.
///
/// A run stops early (and is `Aborted`) when a validator reports an invalid
/// critical result, or when invoking it fails: an `Err`, a panic, the
/// per-validator timeout or cancellation all become a critical
/// `VALIDATOR_ERROR`. Everything aggregated up to that point is returned.
pub struct ValidationPipeline {
    validators: Vec<Box<dyn Validator>>,
    validator_timeout: Option<Duration>,
    metadata_mode: MetadataMode,
}

impl ValidationPipeline {
    pub fn new() -> ValidationPipeline {
        return ValidationPipeline {
            validators: Vec::new(),
            validator_timeout: None,
            metadata_mode: MetadataMode::default(),
        };
    }

    pub fn with_validator<V: Validator + 'static>(mut self, validator: V) -> ValidationPipeline {
        self.register(Box::new(validator));
        return self;
    }

    pub fn register(&mut self, validator: Box<dyn Validator>) {
        self.validators.push(validator);
    }

    pub fn with_validator_timeout(mut self, timeout: Duration) -> ValidationPipeline {
        self.validator_timeout = Some(timeout);
        return self;
    }

    pub fn with_metadata_mode(mut self, mode: MetadataMode) -> ValidationPipeline {
        self.metadata_mode = mode;
        return self;
    }

    pub fn validator_names(&self) -> Vec<&str> {
        return self.validators.iter().map(|v| v.name()).collect();
    }

    pub async fn validate(&self, artifact: &Artifact, context: &ValidationContext) -> ValidationResult {
        return self.run(artifact, context, None).await.result;
    }

    pub async fn validate_with_cancel(&self, artifact: &Artifact, context: &ValidationContext, cancel: &CancelSignal) -> ValidationResult {
        return self.run(artifact, context, Some(cancel)).await.result;
    }

    pub async fn run(&self, artifact: &Artifact, context: &ValidationContext, cancel: Option<&CancelSignal>) -> PipelineRun {
        let mut aggregate = Aggregate::new(self.metadata_mode);
        debug!("Starting validation pipeline with {} validators over {} bytes", self.validators.len(), artifact.len());
        let mut state = PipelineState::Running;

        for validator in &self.validators {
            let name = validator.name();
            debug!("Running validator {}", name);
            match self.invoke(validator.as_ref(), artifact, context, cancel).await {
                Ok(result) => {
                    debug!("Validator {} finished: valid={}, {} errors, {} warnings",
                           name, result.valid, result.errors.len(), result.warnings.len());
                    let abort = result.is_critical_failure();
                    aggregate.absorb(name, result);
                    if abort {
                        warn!("Validator {} reported a critical failure, skipping remaining validators", name);
                        aggregate.aborted_by = Some(String::from(name));
                        state = PipelineState::Aborted;
                        break;
                    }
                }
                Err(e) => {
                    error!("Validator {} failed: {}", name, e.display_chain());
                    aggregate.fault(name, &e);
                    aggregate.aborted_by = Some(String::from(name));
                    state = PipelineState::Aborted;
                    break;
                }
            }
        }

        if state == PipelineState::Running {
            state = PipelineState::Completed;
        }
        let aborted_by = aggregate.aborted_by.clone();
        let result = aggregate.finish(state);
        info!("Validation {}: valid={}, severity={}, {} errors, {} warnings",
              state.as_str(), result.valid, result.severity.unwrap_or(Severity::Low).as_str(),
              result.errors.len(), result.warnings.len());
        return PipelineRun { state, aborted_by, result };
    }

    async fn invoke(&self, validator: &dyn Validator, artifact: &Artifact, context: &ValidationContext, cancel: Option<&CancelSignal>) -> Result<ValidationResult> {
        let signal = match cancel {
            Some(signal) => signal,
            None => return self.guarded(validator, artifact, context).await,
        };
        if signal.is_cancelled() {
            bail!(ErrorKind::Cancelled(String::from(validator.name())));
        }
        tokio::select! {
            biased;
            _ = signal.cancelled() => Err(Error::from(ErrorKind::Cancelled(String::from(validator.name())))),
            outcome = self.guarded(validator, artifact, context) => outcome,
        }
    }

    async fn guarded(&self, validator: &dyn Validator, artifact: &Artifact, context: &ValidationContext) -> Result<ValidationResult> {
        let call = AssertUnwindSafe(validator.validate(artifact, context)).catch_unwind();
        let outcome = match self.validator_timeout {
            Some(limit) => match tokio::time::timeout(limit, call).await {
                Ok(outcome) => outcome,
                Err(_) => bail!(ErrorKind::ValidatorTimeout(String::from(validator.name()), limit.as_millis() as u64)),
            },
            None => call.await,
        };
        return match outcome {
            Ok(result) => result,
            Err(payload) => Err(ErrorKind::ValidatorPanicked(String::from(validator.name()), panic_message(&*payload)).into()),
        };
    }
}

impl Default for ValidationPipeline {
    fn default() -> Self {
        return ValidationPipeline::new();
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        return String::from(*message);
    }
    if let Some(message) = payload.downcast_ref::<String>() {
        return message.clone();
    }
    return String::from("unknown panic");
}

/// Owned by a single run.
struct Aggregate {
    mode: MetadataMode,
    errors: Vec<ValidationError>,
    warnings: Vec<ValidationWarning>,
    metadata: Metadata,
    validators_run: Vec<String>,
    aborted_by: Option<String>,
}

impl Aggregate {
    fn new(mode: MetadataMode) -> Aggregate {
        return Aggregate {
            mode,
            errors: Vec::new(),
            warnings: Vec::new(),
            metadata: Metadata::new(),
            validators_run: Vec::new(),
            aborted_by: None,
        };
    }

    fn absorb(&mut self, name: &str, result: ValidationResult) {
        self.validators_run.push(String::from(name));
        self.errors.extend(result.errors);
        self.warnings.extend(result.warnings);
        match self.mode {
            MetadataMode::Namespaced => {
                self.metadata.insert(String::from(name), Value::Object(result.metadata));
            }
            MetadataMode::Merged => {
                self.metadata.extend(result.metadata);
            }
        }
    }

    fn fault(&mut self, name: &str, e: &Error) {
        self.validators_run.push(String::from(name));
        let cause = match e.kind() {
            ErrorKind::Cancelled(_) => String::from("validation was cancelled"),
            ErrorKind::ValidatorTimeout(_, millis) => format!("timed out after {} ms", millis),
            _ => e.to_string(),
        };
        self.errors.push(ValidationError::new("VALIDATOR_ERROR",
                format!("Validator {} failed: {}", name, cause),
                Severity::Critical)
            .with_field(name));
    }

    fn finish(mut self, state: PipelineState) -> ValidationResult {
        self.metadata.insert(String::from("validatorsRun"), json!(self.validators_run));
        self.metadata.insert(String::from("pipelineState"), json!(state.as_str()));
        if let Some(name) = &self.aborted_by {
            self.metadata.insert(String::from("abortedBy"), json!(name));
        }
        let mut result = ValidationResult::new(self.errors, self.warnings, self.metadata);
        result.severity = Some(result.severity.unwrap_or(Severity::Low));
        return result;
    }
}


#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use async_trait::async_trait;

    use crate::artifact::Artifact;
    use crate::cancellation::cancellation;
    use crate::context::ValidationContext;
    use crate::result::{ResultBuilder, Severity, ValidationResult};
    use crate::validation::*;
    use super::*;

    struct Scripted {
        name: &'static str,
        severity: Option<Severity>,
        calls: Arc<AtomicUsize>,
    }

    impl Scripted {
        fn new(name: &'static str, severity: Option<Severity>, calls: &Arc<AtomicUsize>) -> Scripted {
            return Scripted { name, severity, calls: calls.clone() };
        }
    }

    #[async_trait]
    impl Validator for Scripted {
        fn name(&self) -> &str {
            return self.name;
        }

        async fn validate(&self, _artifact: &Artifact, _context: &ValidationContext) -> Result<ValidationResult> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let mut result = ResultBuilder::new();
            result.warning("NOTE", format!("{} ran", self.name))
                .meta("shared", self.name)
                .meta(self.name, true);
            if let Some(severity) = self.severity {
                result.error("SCRIPTED", format!("{} failed", self.name), severity);
            }
            return Ok(result.build());
        }
    }

    enum Fault {
        Error,
        Panic,
        Hang,
    }

    struct Faulty(Fault);

    #[async_trait]
    impl Validator for Faulty {
        fn name(&self) -> &str {
            return "faulty";
        }

        async fn validate(&self, _artifact: &Artifact, _context: &ValidationContext) -> Result<ValidationResult> {
            match self.0 {
                Fault::Error => bail!(ErrorKind::ArtifactError(String::from("unreadable"))),
                Fault::Panic => panic!("index out of bounds"),
                Fault::Hang => {
                    tokio::time::sleep(Duration::from_secs(3600)).await;
                    return Ok(ResultBuilder::new().build());
                }
            }
        }
    }

    fn artifact() -> Artifact {
        return Artifact::from_bytes(b"%PDF-1.4\n%%EOF".to_vec());
    }

    fn plain_pdf() -> Artifact {
        let body = "%PDF-1.4\n\
            1 0 obj << /Type /Catalog /Pages 2 0 R >> endobj\n\
            2 0 obj << /Type /Pages /Kids [3 0 R] /Count 1 >> endobj\n\
            3 0 obj << /Type /Page /Parent 2 0 R /Contents 4 0 R >> endobj\n\
            4 0 obj << /Length 44 >> stream\nBT /F1 12 Tf 72 712 Td (Curriculum vitae) Tj ET\nendstream endobj\n\
            xref\n0 5\n\
            0000000000 65535 f \n\
            0000000009 00000 n \n\
            0000000058 00000 n \n\
            0000000115 00000 n \n\
            0000000182 00000 n \n\
            trailer << /Size 5 /Root 1 0 R >>\nstartxref\n291\n%%EOF\n";
        return Artifact::from_bytes(body.as_bytes().to_vec())
            .with_name("resume.pdf")
            .with_media_type("application/pdf");
    }

    fn standard_pipeline() -> ValidationPipeline {
        return ValidationPipeline::new()
            .with_validator(SizeValidator::new(SizeConfig::default()))
            .with_validator(FileTypeValidator::new(FileTypeConfig::default()))
            .with_validator(ContentValidator::new(ContentConfig::default()))
            .with_validator(SecurityValidator::new(SecurityConfig::default()));
    }

    fn assert_single_validator_error(result: &ValidationResult) {
        assert_eq!(false, result.valid);
        assert_eq!(Some(Severity::Critical), result.severity);
        assert_eq!(1, result.errors.iter().filter(|e| e.code == "VALIDATOR_ERROR").count());
        assert_eq!(Some(String::from("faulty")), result.error("VALIDATOR_ERROR").unwrap().field);
    }

    #[tokio::test]
    async fn test_completed_run_aggregates_everything() {
        let calls = Arc::new(AtomicUsize::new(0));
        let pipeline = ValidationPipeline::new()
            .with_validator(Scripted::new("first", Some(Severity::Medium), &calls))
            .with_validator(Scripted::new("second", None, &calls));
        let run = pipeline.run(&artifact(), &ValidationContext::new(), None).await;

        assert_eq!(PipelineState::Completed, run.state);
        assert_eq!(None, run.aborted_by);
        assert_eq!(2, calls.load(Ordering::SeqCst));
        assert_eq!(true, run.result.valid);
        assert_eq!(Some(Severity::Medium), run.result.severity);
        assert_eq!(1, run.result.errors.len());
        assert_eq!(2, run.result.warnings.len());
        assert_eq!(json!(["first", "second"]), run.result.metadata["validatorsRun"]);
        assert_eq!("completed", run.result.metadata["pipelineState"]);
    }

    #[tokio::test]
    async fn test_critical_failure_stops_later_validators() {
        let calls = Arc::new(AtomicUsize::new(0));
        let later = Arc::new(AtomicUsize::new(0));
        let pipeline = ValidationPipeline::new()
            .with_validator(Scripted::new("first", None, &calls))
            .with_validator(Scripted::new("second", Some(Severity::Critical), &calls))
            .with_validator(Scripted::new("third", None, &later));
        let run = pipeline.run(&artifact(), &ValidationContext::new(), None).await;

        assert_eq!(PipelineState::Aborted, run.state);
        assert_eq!(Some(String::from("second")), run.aborted_by);
        assert_eq!(2, calls.load(Ordering::SeqCst));
        assert_eq!(0, later.load(Ordering::SeqCst));
        assert_eq!(1, run.result.errors.len());
        assert_eq!(2, run.result.warnings.len());
        assert_eq!("second", run.result.metadata["abortedBy"]);
        assert_eq!(false, run.result.metadata.contains_key("third"));
    }

    #[tokio::test]
    async fn test_high_failure_does_not_abort() {
        let calls = Arc::new(AtomicUsize::new(0));
        let pipeline = ValidationPipeline::new()
            .with_validator(Scripted::new("first", Some(Severity::High), &calls))
            .with_validator(Scripted::new("second", None, &calls));
        let run = pipeline.run(&artifact(), &ValidationContext::new(), None).await;
        assert_eq!(PipelineState::Completed, run.state);
        assert_eq!(2, calls.load(Ordering::SeqCst));
        assert_eq!(false, run.result.valid);
    }

    #[tokio::test]
    async fn test_empty_pipeline_defaults_to_low() {
        let result = ValidationPipeline::new().validate(&artifact(), &ValidationContext::new()).await;
        assert_eq!(true, result.valid);
        assert_eq!(Some(Severity::Low), result.severity);
    }

    #[tokio::test]
    async fn test_metadata_modes() {
        let calls = Arc::new(AtomicUsize::new(0));
        let namespaced = ValidationPipeline::new()
            .with_validator(Scripted::new("first", None, &calls))
            .with_validator(Scripted::new("second", None, &calls))
            .validate(&artifact(), &ValidationContext::new()).await;
        assert_eq!("first", namespaced.metadata["first"]["shared"]);
        assert_eq!("second", namespaced.metadata["second"]["shared"]);

        let merged = ValidationPipeline::new()
            .with_metadata_mode(MetadataMode::Merged)
            .with_validator(Scripted::new("first", None, &calls))
            .with_validator(Scripted::new("second", None, &calls))
            .validate(&artifact(), &ValidationContext::new()).await;
        assert_eq!("second", merged.metadata["shared"]);
        assert_eq!(true, merged.metadata["first"].as_bool().unwrap());
    }

    #[tokio::test]
    async fn test_validator_error_fails_closed() {
        let calls = Arc::new(AtomicUsize::new(0));
        let later = Arc::new(AtomicUsize::new(0));
        let pipeline = ValidationPipeline::new()
            .with_validator(Scripted::new("first", None, &calls))
            .with_validator(Faulty(Fault::Error))
            .with_validator(Scripted::new("third", None, &later));
        let run = pipeline.run(&artifact(), &ValidationContext::new(), None).await;

        assert_eq!(PipelineState::Aborted, run.state);
        assert_eq!(0, later.load(Ordering::SeqCst));
        assert_single_validator_error(&run.result);
        assert_eq!(1, run.result.warnings.len());
    }

    #[tokio::test]
    async fn test_panic_fails_closed() {
        let pipeline = ValidationPipeline::new().with_validator(Faulty(Fault::Panic));
        let result = pipeline.validate(&artifact(), &ValidationContext::new()).await;
        assert_single_validator_error(&result);
        assert_eq!(true, result.errors[0].message.contains("index out of bounds"));
    }

    #[tokio::test]
    async fn test_timeout_fails_closed() {
        let pipeline = ValidationPipeline::new()
            .with_validator_timeout(Duration::from_millis(20))
            .with_validator(Faulty(Fault::Hang));
        let result = pipeline.validate(&artifact(), &ValidationContext::new()).await;
        assert_single_validator_error(&result);
        assert_eq!(true, result.errors[0].message.contains("timed out after 20 ms"));
    }

    #[tokio::test]
    async fn test_cancellation_aborts_running_validator() {
        let (handle, signal) = cancellation();
        let pipeline = ValidationPipeline::new().with_validator(Faulty(Fault::Hang));
        let canceller = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            handle.cancel();
        });
        let result = tokio::time::timeout(Duration::from_secs(5),
                                          pipeline.validate_with_cancel(&artifact(), &ValidationContext::new(), &signal))
            .await.unwrap();
        canceller.await.unwrap();
        assert_single_validator_error(&result);
        assert_eq!(true, result.errors[0].message.contains("cancelled"));
    }

    #[tokio::test]
    async fn test_cancelled_before_start() {
        let (handle, signal) = cancellation();
        handle.cancel();
        let calls = Arc::new(AtomicUsize::new(0));
        let pipeline = ValidationPipeline::new().with_validator(Scripted::new("first", None, &calls));
        let run = pipeline.run(&artifact(), &ValidationContext::new(), Some(&signal)).await;
        assert_eq!(PipelineState::Aborted, run.state);
        assert_eq!(0, calls.load(Ordering::SeqCst));
        assert_eq!(true, run.result.has_error("VALIDATOR_ERROR"));
    }

    #[tokio::test]
    async fn test_spoofed_extension_is_rejected() {
        let bytes: Vec<u8> = (0..50u32).map(|i| (i.wrapping_mul(97) % 251) as u8 | 1).collect();
        let artifact = Artifact::from_bytes(bytes).with_name("invoice.exe");
        let pipeline = ValidationPipeline::new()
            .with_validator(SizeValidator::new(SizeConfig::default()))
            .with_validator(FileTypeValidator::new(FileTypeConfig::new(vec![".pdf"], Vec::<String>::new())
                .with_magic_number("pdf", PDF_SIGNATURE)));
        let result = pipeline.validate(&artifact, &ValidationContext::new()).await;

        assert_eq!(false, result.valid);
        assert_eq!(Severity::High, result.error("INVALID_FILE_EXTENSION").unwrap().severity);
    }

    #[tokio::test]
    async fn test_launch_action_is_rejected() {
        let body = "%PDF-1.4\n\
            1 0 obj << /Type /Catalog /Pages 2 0 R >> endobj\n\
            2 0 obj << /Type /Annot /A << /S /Launch /F (calc) >> >> endobj\n\
            xref\n0 5\n\
            0000000000 65535 f \n\
            0000000009 00000 n \n\
            0000000058 00000 n \n\
            0000000115 00000 n \n\
            0000000182 00000 n \n\
            trailer << /Size 5 /Root 1 0 R >>\nstartxref\n291\n%%EOF\n";
        let artifact = Artifact::from_bytes(body.as_bytes().to_vec()).with_name("resume.pdf");
        let run = standard_pipeline().run(&artifact, &ValidationContext::new(), None).await;

        assert_eq!(PipelineState::Completed, run.state);
        assert_eq!(false, run.result.valid);
        assert_eq!(false, run.result.has_error("INVALID_PDF_HEADER"));
        assert_eq!(false, run.result.has_error("MISSING_PDF_EOF"));
        assert_eq!(Severity::High, run.result.error("DANGEROUS_PDF_ACTIONS").unwrap().severity);
    }

    #[tokio::test]
    async fn test_plain_pdf_is_accepted() {
        let run = standard_pipeline().run(&plain_pdf(), &ValidationContext::new(), None).await;
        assert_eq!(PipelineState::Completed, run.state);
        assert_eq!(true, run.result.valid);
        assert_eq!(true, run.result.errors.is_empty());
        assert_eq!(Some(Severity::Low), run.result.severity);
        assert_eq!(json!(["size", "fileType", "content", "security"]), run.result.metadata["validatorsRun"]);
        assert_eq!(1, run.result.metadata["content"]["pdf"]["estimatedPages"]);
        assert_eq!(false, run.result.warnings.iter().any(|w| w.code == "DLP_WARNING"));
    }

    #[tokio::test]
    async fn test_concurrent_runs_are_independent() {
        let pipeline = Arc::new(standard_pipeline());
        let clean = {
            let pipeline = pipeline.clone();
            tokio::spawn(async move { pipeline.validate(&plain_pdf(), &ValidationContext::new()).await })
        };
        let spoofed = {
            let pipeline = pipeline.clone();
            tokio::spawn(async move {
                pipeline.validate(&Artifact::from_bytes(vec![0x4D; 200]).with_name("a.pdf"), &ValidationContext::new()).await
            })
        };
        assert_eq!(true, clean.await.unwrap().valid);
        assert_eq!(false, spoofed.await.unwrap().valid);
    }
}
