use std::time::Duration;

use async_trait::async_trait;
use log::*;
use serde_derive::*;

use crate::artifact::Artifact;
use crate::context::ValidationContext;
use crate::errors::*;
use crate::result::{ResultBuilder, Severity, ValidationResult};
use super::Validator;

#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
pub struct ScanVerdict {
    pub infected: bool,
    #[serde(default)]
    pub signatures: Vec<String>,
    #[serde(default)]
    pub engine: Option<String>,
}

/// Detection backend. Implementations own the actual malware analysis.
#[async_trait]
pub trait ScanEngine: Send + Sync {
    async fn scan(&self, bytes: &[u8]) -> Result<ScanVerdict>;
}

pub struct MalwareScanner {
    engine: Box<dyn ScanEngine>,
}

impl MalwareScanner {
    pub fn new(engine: Box<dyn ScanEngine>) -> MalwareScanner {
        return MalwareScanner { engine };
    }
}

#[async_trait]
impl Validator for MalwareScanner {
    fn name(&self) -> &str {
        return "malwareScanner";
    }

    async fn validate(&self, artifact: &Artifact, _context: &ValidationContext) -> Result<ValidationResult> {
        let verdict = self.engine.scan(artifact.bytes()).await?;
        let mut result = ResultBuilder::new();
        result.meta("infected", verdict.infected)
            .meta("engine", verdict.engine.clone());
        if verdict.infected {
            warn!("Malware scanner reported {:?}", verdict.signatures);
            let names = if verdict.signatures.is_empty() {
                String::from("unknown signature")
            } else {
                verdict.signatures.join(", ")
            };
            result.error("MALWARE_DETECTED", format!("Malware detected: {}", names), Severity::Critical)
                .meta("signatures", verdict.signatures);
        }
        return Ok(result.build());
    }
}

/// Posts the raw bytes to a scanning service and expects a JSON [`ScanVerdict`].
pub struct HttpScanEngine {
    url: String,
    timeout: Duration,
}

impl HttpScanEngine {
    pub fn new(url: &str, timeout: Duration) -> HttpScanEngine {
        return HttpScanEngine {
            url: String::from(url),
            timeout,
        };
    }
}

#[async_trait]
impl ScanEngine for HttpScanEngine {
    async fn scan(&self, bytes: &[u8]) -> Result<ScanVerdict> {
        let url = self.url.clone();
        let timeout = self.timeout;
        let body = bytes.to_vec();
        debug!("Submitting {} bytes to malware scanner at {}", body.len(), url);

        let response = tokio::task::spawn_blocking(move || -> Result<String> {
            let answer = attohttpc::post(&url)
                .header("Content-Type", "application/octet-stream")
                .timeout(timeout)
                .bytes(body)
                .send()
                .chain_err(|| ErrorKind::ScannerError(format!("Could not reach {}", url)))?;
            if !answer.is_success() {
                bail!(ErrorKind::ScannerError(format!("Scanner at {} answered with status {}", url, answer.status())));
            }
            return answer.text()
                .chain_err(|| ErrorKind::ScannerError(String::from("Could not read scanner response")));
        })
            .await
            .chain_err(|| ErrorKind::ScannerError(String::from("Scanner task did not complete")))??;

        let verdict: ScanVerdict = serde_json::from_str(&response)
            .chain_err(|| ErrorKind::ScannerError(String::from("Scanner response is not a valid verdict")))?;
        return Ok(verdict);
    }
}
