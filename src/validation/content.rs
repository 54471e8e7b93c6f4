use std::collections::BTreeMap;
use std::sync::LazyLock;

use async_trait::async_trait;
use log::*;
use regex::Regex;
use serde_derive::*;
use serde_json::json;

use crate::artifact::Artifact;
use crate::context::ValidationContext;
use crate::errors::*;
use crate::result::{ResultBuilder, Severity, ValidationResult, ValidationWarning};
use super::{compile_catalog, contains, contains_name, count_occurrences, expects_pdf, prefix, text_window, PatternCatalog, Validator};

const SCRIPT_WINDOW: usize = 64 * 1024;
const EMBEDDED_WINDOW: usize = 1024 * 1024;
const PATTERN_WINDOW: usize = 64 * 1024;
const STRUCTURE_WINDOW: usize = 1024 * 1024;

const EXECUTABLE_SIGNATURES: &[(&str, &[u8])] = &[
    ("pe", b"MZ"),
    ("elf", b"\x7FELF"),
    ("mach-o", &[0xFE, 0xED, 0xFA, 0xCE]),
    ("mach-o", &[0xFE, 0xED, 0xFA, 0xCF]),
    ("mach-o", &[0xCE, 0xFA, 0xED, 0xFE]),
    ("mach-o", &[0xCF, 0xFA, 0xED, 0xFE]),
    ("mach-o-fat", &[0xCA, 0xFE, 0xBA, 0xBE]),
    ("shebang", b"#!"),
];

const MACRO_MARKERS: &[&[u8]] = &[
    b"vbaProject.bin",
    b"_VBA_PROJECT",
    b"Attribute VB_Name",
    b"VBA/ThisDocument",
    b"Sub AutoOpen",
    b"Sub Document_Open",
];

const EMBEDDED_OBJECT_MARKERS: &[(&str, &[u8])] = &[
    ("pdf-embedded-file", b"/EmbeddedFile"),
    ("pdf-filespec", b"/Filespec"),
    ("flash", b"application/x-shockwave-flash"),
    ("flash", b"/RichMedia"),
    ("html-object", b"<object"),
    ("html-embed", b"<embed"),
];

const DANGEROUS_PDF_ACTIONS: &[&str] = &["/Launch", "/GoToR", "/ImportData", "/SubmitForm"];

const SUSPICIOUS_PATTERNS: &[(&str, &str)] = &[
    ("code-evaluation", r"(?i)\b(?:eval|execScript|Function)\s*\("),
    ("timer-string-evaluation", r#"(?i)\bset(?:Timeout|Interval)\s*\(\s*["']"#),
    ("long-hex-run", r"[0-9A-Fa-f]{128,}"),
    ("long-base64-run", r"[A-Za-z0-9+/]{120,}={0,2}"),
    ("suspicious-tld-url", r"(?i)\bhttps?://[a-z0-9.-]+\.(?:tk|ml|ga|cf|gq|xyz|top|click|zip|pw)\b"),
    ("ip-literal-url", r"(?i)\bhttps?://\d{1,3}(?:\.\d{1,3}){3}\b"),
];

static SUSPICIOUS_CATALOG: LazyLock<std::result::Result<PatternCatalog, regex::Error>> =
    LazyLock::new(|| compile_catalog(SUSPICIOUS_PATTERNS));

static PDF_SCRIPT: LazyLock<std::result::Result<Regex, regex::Error>> =
    LazyLock::new(|| Regex::new(r"/JavaScript|/JS\b"));

static PDF_PAGE: LazyLock<std::result::Result<Regex, regex::Error>> =
    LazyLock::new(|| Regex::new(r"/Type\s*/Page\b"));

#[derive(Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase", default)]
pub struct ContentConfig {
    pub max_pages: Option<usize>,
    pub min_text_length: Option<usize>,
    pub max_text_length: Option<usize>,
    pub block_executable: bool,
    pub block_macros: bool,
    pub max_embedded_objects: usize,
}

impl Default for ContentConfig {
    fn default() -> Self {
        return ContentConfig {
            max_pages: Some(10),
            min_text_length: None,
            max_text_length: None,
            block_executable: true,
            block_macros: true,
            max_embedded_objects: 10,
        };
    }
}

pub struct ContentValidator {
    config: ContentConfig,
}

impl ContentValidator {
    pub fn new(config: ContentConfig) -> ContentValidator {
        return ContentValidator { config };
    }

    fn check_executable(&self, bytes: &[u8], pdf: bool, result: &mut ResultBuilder) -> Result<()> {
        let mut found: Option<&str> = EXECUTABLE_SIGNATURES.iter()
            .find(|(_, signature)| bytes.starts_with(signature))
            .map(|(label, _)| *label);

        if found.is_none() && pdf {
            let script = PDF_SCRIPT.as_ref().map_err(|e| e.clone())?;
            if script.is_match(&text_window(bytes, SCRIPT_WINDOW)) {
                found = Some("pdf-javascript");
            }
        }

        if let Some(kind) = found {
            result.meta("executableContent", kind);
            if self.config.block_executable {
                warn!("Executable content ({}) found in upload", kind);
                result.error("EXECUTABLE_CONTENT_FOUND",
                             format!("File contains executable content ({})", kind),
                             Severity::Critical);
            }
        }
        return Ok(());
    }

    fn check_macros(&self, bytes: &[u8], result: &mut ResultBuilder) {
        if !self.config.block_macros {
            return;
        }
        let window = prefix(bytes, SCRIPT_WINDOW);
        if MACRO_MARKERS.iter().any(|marker| contains(window, marker)) {
            result.error("MACRO_CONTENT_FOUND", String::from("File contains macro code"), Severity::High);
        }
    }

    fn check_embedded_objects(&self, bytes: &[u8], result: &mut ResultBuilder) {
        let window = prefix(bytes, EMBEDDED_WINDOW);
        let mut types: BTreeMap<&str, usize> = BTreeMap::new();
        for (label, marker) in EMBEDDED_OBJECT_MARKERS {
            let count = count_occurrences(window, marker);
            if count > 0 {
                *types.entry(*label).or_insert(0) += count;
            }
        }
        let total: usize = types.values().sum();
        result.meta("embeddedObjects", json!({ "count": total, "types": types.keys().collect::<Vec<_>>() }));
        if total > self.config.max_embedded_objects {
            result.push_warning(ValidationWarning::new("EXCESSIVE_EMBEDDED_OBJECTS",
                    format!("File contains {} embedded objects (threshold {})", total, self.config.max_embedded_objects))
                .with_severity(Severity::Medium));
        }
    }

    fn check_suspicious_patterns(&self, bytes: &[u8], result: &mut ResultBuilder) -> Result<()> {
        let catalog = SUSPICIOUS_CATALOG.as_ref().map_err(|e| e.clone())?;
        let text = text_window(bytes, PATTERN_WINDOW);
        let mut matches = serde_json::Map::new();
        for (label, pattern) in catalog {
            let count = pattern.find_iter(&text).count();
            if count > 0 {
                matches.insert(String::from(*label), json!(count));
            }
        }
        if !matches.is_empty() {
            let labels: Vec<String> = matches.keys().cloned().collect();
            result.push_warning(ValidationWarning::new("SUSPICIOUS_PATTERNS",
                    format!("Suspicious content patterns found: {}", labels.join(", ")))
                .with_severity(Severity::Medium));
            result.meta("suspiciousPatterns", matches);
        }
        return Ok(());
    }

    fn check_text_length(&self, bytes: &[u8], result: &mut ResultBuilder) {
        if self.config.min_text_length.is_none() && self.config.max_text_length.is_none() {
            return;
        }
        let length = printable_length(&text_window(bytes, STRUCTURE_WINDOW));
        result.meta("textLength", length);
        if let Some(min) = self.config.min_text_length {
            if length < min {
                result.push_warning(ValidationWarning::new("INSUFFICIENT_TEXT",
                        format!("File contains {} readable characters, expected at least {}", length, min))
                    .with_severity(Severity::Low));
            }
        }
        if let Some(max) = self.config.max_text_length {
            if length > max {
                result.error("TEXT_TOO_LONG",
                             format!("File contains {} readable characters, allowed at most {}", length, max),
                             Severity::Medium);
            }
        }
    }

    fn check_pdf(&self, bytes: &[u8], result: &mut ResultBuilder) -> Result<()> {
        let window = prefix(bytes, STRUCTURE_WINDOW);

        let has_forms = contains(window, b"/AcroForm");
        let encrypted = contains(window, b"/Encrypt");
        if has_forms {
            result.push_warning(ValidationWarning::new("PDF_HAS_FORMS", String::from("PDF contains interactive forms"))
                .with_severity(Severity::Low));
        }
        if encrypted {
            result.push_warning(ValidationWarning::new("PDF_ENCRYPTED", String::from("PDF is encrypted, content checks may be incomplete"))
                .with_severity(Severity::Medium));
        }

        let page_pattern = PDF_PAGE.as_ref().map_err(|e| e.clone())?;
        let pages = page_pattern.find_iter(&String::from_utf8_lossy(window)).count();
        if let Some(max_pages) = self.config.max_pages {
            if pages > max_pages {
                result.error("TOO_MANY_PAGES",
                             format!("PDF has about {} pages, allowed at most {}", pages, max_pages),
                             Severity::Medium);
            }
        }

        let actions: Vec<&str> = DANGEROUS_PDF_ACTIONS.iter()
            .filter(|action| contains_name(window, action.as_bytes()))
            .cloned()
            .collect();
        if !actions.is_empty() {
            warn!("PDF declares dangerous actions: {:?}", actions);
            result.error("DANGEROUS_PDF_ACTIONS",
                         format!("PDF contains dangerous actions: {}", actions.join(", ")),
                         Severity::High);
        }

        result.meta("pdf", json!({
            "estimatedPages": pages,
            "hasForms": has_forms,
            "encrypted": encrypted,
            "dangerousActions": actions,
        }));
        return Ok(());
    }

    fn inspect(&self, artifact: &Artifact, context: &ValidationContext, result: &mut ResultBuilder) -> Result<()> {
        let bytes = artifact.bytes();
        let pdf = expects_pdf(artifact, context);
        self.check_executable(bytes, pdf, result)?;
        self.check_macros(bytes, result);
        self.check_embedded_objects(bytes, result);
        self.check_suspicious_patterns(bytes, result)?;
        self.check_text_length(bytes, result);
        if pdf {
            self.check_pdf(bytes, result)?;
        }
        return Ok(());
    }
}

#[async_trait]
impl Validator for ContentValidator {
    fn name(&self) -> &str {
        return "content";
    }

    async fn validate(&self, artifact: &Artifact, context: &ValidationContext) -> Result<ValidationResult> {
        let mut result = ResultBuilder::new();
        if let Err(e) = self.inspect(artifact, context, &mut result) {
            error!("Content inspection failed: {}", e);
            result.error("CONTENT_VALIDATION_ERROR", format!("Content inspection failed: {}", e), Severity::Critical);
        }
        return Ok(result.build());
    }
}

fn printable_length(text: &str) -> usize {
    return text.chars()
        .filter(|c| c.is_alphanumeric() || c.is_ascii_punctuation() || *c == ' ')
        .count();
}


#[cfg(test)]
mod tests {
    use crate::artifact::Artifact;
    use crate::context::{ValidationContext, EXPECTED_STRUCTURE};
    use crate::result::Severity;
    use super::*;

    async fn run(config: ContentConfig, artifact: Artifact) -> ValidationResult {
        return ContentValidator::new(config).validate(&artifact, &ValidationContext::new()).await.unwrap();
    }

    fn pdf(body: &str) -> Artifact {
        return Artifact::from_bytes(format!("%PDF-1.4\n{}\n%%EOF\n", body).into_bytes()).with_name("cv.pdf");
    }

    #[tokio::test]
    async fn test_plain_pdf_is_clean() {
        let result = run(ContentConfig::default(), pdf("1 0 obj << /Type /Catalog /Pages 2 0 R >> endobj\n2 0 obj << /Type /Pages /Count 1 >> endobj\n3 0 obj << /Type /Page >> endobj")).await;
        assert_eq!(true, result.valid);
        assert_eq!(true, result.errors.is_empty());
        assert_eq!(true, result.warnings.is_empty());
        assert_eq!(1, result.metadata["pdf"]["estimatedPages"]);
    }

    #[tokio::test]
    async fn test_blocks_native_executable() {
        let result = run(ContentConfig::default(), Artifact::from_bytes(b"\x7FELF\x02\x01\x01".to_vec())).await;
        assert_eq!(false, result.valid);
        assert_eq!(Severity::Critical, result.error("EXECUTABLE_CONTENT_FOUND").unwrap().severity);
    }

    #[tokio::test]
    async fn test_executable_allowed_when_not_blocking() {
        let config = ContentConfig { block_executable: false, ..ContentConfig::default() };
        let result = run(config, Artifact::from_bytes(b"MZ\x90\x00".to_vec())).await;
        assert_eq!(true, result.valid);
        assert_eq!("pe", result.metadata["executableContent"]);
    }

    #[tokio::test]
    async fn test_pdf_javascript_is_executable() {
        let result = run(ContentConfig::default(), pdf("<< /S /JavaScript /JS (app.alert(1)) >>")).await;
        assert_eq!(true, result.has_error("EXECUTABLE_CONTENT_FOUND"));
        assert_eq!("pdf-javascript", result.metadata["executableContent"]);
    }

    #[tokio::test]
    async fn test_json_key_is_not_javascript() {
        let result = run(ContentConfig::default(), pdf("<< /JSON 1 >>")).await;
        assert_eq!(false, result.has_error("EXECUTABLE_CONTENT_FOUND"));
    }

    #[tokio::test]
    async fn test_macro_detection() {
        let artifact = Artifact::from_bytes(b"PK\x03\x04....word/vbaProject.bin....".to_vec());
        let result = run(ContentConfig::default(), artifact.clone()).await;
        assert_eq!(Severity::High, result.error("MACRO_CONTENT_FOUND").unwrap().severity);

        let relaxed = ContentConfig { block_macros: false, ..ContentConfig::default() };
        assert_eq!(false, run(relaxed, artifact).await.has_error("MACRO_CONTENT_FOUND"));
    }

    #[tokio::test]
    async fn test_counts_embedded_objects() {
        let body = "<< /Type /EmbeddedFile >>\n".repeat(11);
        let result = run(ContentConfig::default(), pdf(&body)).await;
        assert_eq!(11, result.metadata["embeddedObjects"]["count"]);
        assert_eq!(true, result.has_warning("EXCESSIVE_EMBEDDED_OBJECTS"));
        assert_eq!(true, result.valid);
    }

    #[tokio::test]
    async fn test_suspicious_patterns_single_warning() {
        let body = format!("eval(payload) {} http://192.168.1.20/x http://cheap.tk/a", "ab".repeat(80));
        let result = run(ContentConfig::default(), Artifact::from_bytes(body.into_bytes())).await;
        let warnings: Vec<_> = result.warnings.iter().filter(|w| w.code == "SUSPICIOUS_PATTERNS").collect();
        assert_eq!(1, warnings.len());
        let patterns = result.metadata["suspiciousPatterns"].as_object().unwrap();
        assert_eq!(true, patterns.contains_key("code-evaluation"));
        assert_eq!(true, patterns.contains_key("long-hex-run"));
        assert_eq!(true, patterns.contains_key("ip-literal-url"));
        assert_eq!(true, patterns.contains_key("suspicious-tld-url"));
        assert_eq!(true, result.valid);
    }

    #[tokio::test]
    async fn test_forms_and_encryption_are_warnings() {
        let result = run(ContentConfig::default(), pdf("<< /AcroForm 5 0 R >> trailer << /Encrypt 9 0 R >>")).await;
        assert_eq!(true, result.valid);
        assert_eq!(true, result.has_warning("PDF_HAS_FORMS"));
        assert_eq!(true, result.has_warning("PDF_ENCRYPTED"));
    }

    #[tokio::test]
    async fn test_too_many_pages() {
        let config = ContentConfig { max_pages: Some(2), ..ContentConfig::default() };
        let result = run(config, pdf(&"<< /Type /Page >>\n".repeat(3))).await;
        assert_eq!(Severity::Medium, result.error("TOO_MANY_PAGES").unwrap().severity);
        assert_eq!(true, result.valid);
    }

    #[tokio::test]
    async fn test_dangerous_actions() {
        let result = run(ContentConfig::default(), pdf("<< /S /Launch /F (cmd.exe) >>")).await;
        assert_eq!(false, result.valid);
        assert_eq!(Severity::High, result.error("DANGEROUS_PDF_ACTIONS").unwrap().severity);
    }

    #[tokio::test]
    async fn test_action_names_must_match_whole_token() {
        let result = run(ContentConfig::default(), pdf("<< /LaunchFoo 1 /GoToRemote 2 >>")).await;
        assert_eq!(false, result.has_error("DANGEROUS_PDF_ACTIONS"));
        assert_eq!(true, result.valid);
    }

    #[tokio::test]
    async fn test_expected_structure_forces_pdf_checks() {
        let artifact = Artifact::from_bytes(b"junk << /S /SubmitForm >>".to_vec());
        let context = ValidationContext::new().with(EXPECTED_STRUCTURE, "pdf");
        let result = ContentValidator::new(ContentConfig::default()).validate(&artifact, &context).await.unwrap();
        assert_eq!(true, result.has_error("DANGEROUS_PDF_ACTIONS"));
    }

    #[tokio::test]
    async fn test_text_length_bounds() {
        let config = ContentConfig { min_text_length: Some(100), max_text_length: Some(5), ..ContentConfig::default() };
        let result = run(config, Artifact::from_bytes(b"short text".to_vec())).await;
        assert_eq!(true, result.has_warning("INSUFFICIENT_TEXT"));
        assert_eq!(true, result.has_error("TEXT_TOO_LONG"));
        assert_eq!(10, result.metadata["textLength"]);
    }

    #[tokio::test]
    async fn test_scans_are_bounded() {
        let mut bytes = b"%PDF-1.4\n".to_vec();
        bytes.extend(vec![b' '; STRUCTURE_WINDOW]);
        bytes.extend(b"<< /S /Launch >>\n%%EOF");
        let result = run(ContentConfig::default(), Artifact::from_bytes(bytes)).await;
        assert_eq!(false, result.has_error("DANGEROUS_PDF_ACTIONS"));
    }
}
