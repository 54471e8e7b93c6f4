use async_trait::async_trait;
use log::*;

#[cfg(not(feature = "checksum-blake3"))]
use sha2::{Sha256, Digest};

#[cfg(feature = "checksum-blake3")]
use blake3::Hasher;

use crate::artifact::Artifact;
use crate::context::{ValidationContext, EXPECTED_CHECKSUM};
use crate::errors::*;
use crate::result::{ResultBuilder, Severity, ValidationError, ValidationResult};
use super::Validator;

#[cfg(not(feature = "checksum-blake3"))]
type ChecksumHasher = Sha256;

#[cfg(feature = "checksum-blake3")]
type ChecksumHasher = Hasher;

#[cfg(not(feature = "checksum-blake3"))]
pub const ALGORITHM: &str = "sha256";

#[cfg(feature = "checksum-blake3")]
pub const ALGORITHM: &str = "blake3";

/// Verifies content integrity against a digest known to the uploader. The
/// `expectedChecksum` context hint wins over the configured digest.
pub struct ChecksumValidator {
    expected: Option<String>,
}

impl ChecksumValidator {
    pub fn new(expected: Option<String>) -> ChecksumValidator {
        return ChecksumValidator { expected };
    }
}

#[async_trait]
impl Validator for ChecksumValidator {
    fn name(&self) -> &str {
        return "checksum";
    }

    async fn validate(&self, artifact: &Artifact, context: &ValidationContext) -> Result<ValidationResult> {
        let hash = checksum(artifact.bytes());
        let mut result = ResultBuilder::new();
        result.meta("checksum", hash.clone())
            .meta("checksumAlgorithm", ALGORITHM);

        let expected = context.get_str(EXPECTED_CHECKSUM).or_else(|| self.expected.as_deref());
        if let Some(expected) = expected {
            let hash_match = hash.eq_ignore_ascii_case(expected.trim());
            if !hash_match {
                debug!("The {} hash of the upload is {}, but should be {}", ALGORITHM, hash, expected);
                result.push_error(ValidationError::new("CHECKSUM_MISMATCH",
                        format!("File {} checksum does not match the expected value", ALGORITHM),
                        Severity::Critical)
                    .with_field("file.checksum"));
            }
        }
        return Ok(result.build());
    }
}

pub fn checksum(bytes: &[u8]) -> String {
    let mut hasher = create_hasher();
    hasher.update(bytes);
    return finalize(hasher);
}

#[cfg(not(feature = "checksum-blake3"))]
fn create_hasher() -> ChecksumHasher {
    return Sha256::new();
}

#[cfg(feature = "checksum-blake3")]
fn create_hasher() -> ChecksumHasher {
    return blake3::Hasher::new();
}

#[cfg(not(feature = "checksum-blake3"))]
fn finalize(hasher: ChecksumHasher) -> String {
    return hex::encode(hasher.finalize());
}

#[cfg(feature = "checksum-blake3")]
fn finalize(hasher: ChecksumHasher) -> String {
    return String::from(hasher.finalize().to_hex().as_str());
}
