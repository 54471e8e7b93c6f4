pub mod checksum;
pub mod content;
pub mod file_type;
pub mod malware;
pub mod security;
pub mod size;

use std::borrow::Cow;

use async_trait::async_trait;
use regex::Regex;

use crate::artifact::Artifact;
use crate::context::{ValidationContext, EXPECTED_STRUCTURE};
use crate::errors::*;
use crate::result::ValidationResult;

pub use checksum::ChecksumValidator;
pub use content::{ContentConfig, ContentValidator};
pub use file_type::{FileTypeConfig, FileTypeValidator};
pub use malware::{HttpScanEngine, MalwareScanner, ScanEngine, ScanVerdict};
pub use security::{SecurityConfig, SecurityValidator};
pub use size::{SizeConfig, SizeValidator};

pub const PDF_SIGNATURE: &[u8] = b"%PDF";
pub const PDF_MEDIA_TYPE: &str = "application/pdf";

/// A single, independent check over an uploaded artifact.
///
/// Findings the validator understands are reported inside the returned result.
/// `Err` (and panics) are reserved for genuine faults; the pipeline turns those
/// into a critical `VALIDATOR_ERROR` and stops.
#[async_trait]
pub trait Validator: Send + Sync {
    fn name(&self) -> &str;

    async fn validate(&self, artifact: &Artifact, context: &ValidationContext) -> Result<ValidationResult>;
}

/// PDF by declared extension, declared media type or leading signature.
pub fn is_pdf(artifact: &Artifact) -> bool {
    return artifact.extension().map(|e| e == "pdf").unwrap_or(false)
        || artifact.media_type().map(|m| m == PDF_MEDIA_TYPE).unwrap_or(false)
        || artifact.bytes().starts_with(PDF_SIGNATURE);
}

/// Same as [`is_pdf`], additionally honouring the `expectedStructure` hint.
pub fn expects_pdf(artifact: &Artifact, context: &ValidationContext) -> bool {
    return is_pdf(artifact)
        || context.get_str(EXPECTED_STRUCTURE).map(|s| s.eq_ignore_ascii_case("pdf")).unwrap_or(false);
}

pub fn prefix(bytes: &[u8], limit: usize) -> &[u8] {
    return &bytes[..bytes.len().min(limit)];
}

pub fn tail(bytes: &[u8], limit: usize) -> &[u8] {
    return &bytes[bytes.len().saturating_sub(limit)..];
}

/// Lossy text view of at most `limit` leading bytes.
pub fn text_window(bytes: &[u8], limit: usize) -> Cow<str> {
    return String::from_utf8_lossy(prefix(bytes, limit));
}

pub fn contains(haystack: &[u8], needle: &[u8]) -> bool {
    return find(haystack, needle).is_some();
}

pub fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    if needle.is_empty() || haystack.len() < needle.len() {
        return None;
    }
    return haystack.windows(needle.len()).position(|w| w == needle);
}

/// `name` as a whole PDF name token, not as the prefix of a longer name.
pub fn contains_name(haystack: &[u8], name: &[u8]) -> bool {
    let mut offset = 0;
    while let Some(position) = find(&haystack[offset..], name) {
        let end = offset + position + name.len();
        match haystack.get(end) {
            Some(next) if next.is_ascii_alphanumeric() => offset = end,
            _ => return true,
        }
    }
    return false;
}

/// Non-overlapping occurrences of `needle`.
pub fn count_occurrences(haystack: &[u8], needle: &[u8]) -> usize {
    if needle.is_empty() {
        return 0;
    }
    let mut count = 0;
    let mut offset = 0;
    while let Some(position) = find(&haystack[offset..], needle) {
        count += 1;
        offset += position + needle.len();
    }
    return count;
}

pub type PatternCatalog = Vec<(&'static str, Regex)>;

pub fn compile_catalog(table: &[(&'static str, &'static str)]) -> std::result::Result<PatternCatalog, regex::Error> {
    return table.iter()
        .map(|(label, pattern)| Regex::new(pattern).map(|re| (*label, re)))
        .collect();
}
