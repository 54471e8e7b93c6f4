use std::sync::LazyLock;

use crate::validation::{compile_catalog, PatternCatalog};

const TEXT_SIGNATURES: &[(&str, &str)] = &[
    ("obfuscated-eval", r"(?i)\beval\s*\(\s*(?:unescape|atob|escape|String\.fromCharCode)\s*\("),
    ("remote-script-injection", r#"(?i)<script[^>]*\bsrc\s*=\s*["']?(?:https?:)?//"#),
    ("obfuscated-document-write", r"(?i)document\.write\s*\(\s*(?:unescape|atob|String\.fromCharCode)\s*\("),
    ("javascript-protocol", r"(?i)\bjavascript\s*:"),
    ("inline-event-handler", r#"(?i)<[a-z][^>]*\son(?:load|error|click|mouseover|focus|submit)\s*=\s*["']?"#),
];

/// Single repeated byte, minimum run length.
const BYTE_SIGNATURES: &[(&str, u8, usize)] = &[
    ("x86-nop-sled", 0x90, 10),
    ("int3-filler", 0xCC, 10),
    ("heap-spray-0c", 0x0C, 10),
];

static TEXT_CATALOG: LazyLock<Result<PatternCatalog, regex::Error>> =
    LazyLock::new(|| compile_catalog(TEXT_SIGNATURES));

/// Labels of every known exploit idiom present in `text` or `bytes`.
pub fn detect(text: &str, bytes: &[u8]) -> Result<Vec<&'static str>, regex::Error> {
    let catalog = TEXT_CATALOG.as_ref().map_err(|e| e.clone())?;
    let mut threats: Vec<&'static str> = catalog.iter()
        .filter(|(_, pattern)| pattern.is_match(text))
        .map(|(label, _)| *label)
        .collect();

    for (label, byte, min_run) in BYTE_SIGNATURES {
        if has_run(bytes, *byte, *min_run) {
            threats.push(*label);
        }
    }
    return Ok(threats);
}

fn has_run(bytes: &[u8], byte: u8, min_run: usize) -> bool {
    let mut run = 0;
    for b in bytes {
        if *b == byte {
            run += 1;
            if run >= min_run {
                return true;
            }
        } else {
            run = 0;
        }
    }
    return false;
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_detects_text_idioms() {
        assert_eq!(vec!["obfuscated-eval"], detect("x = eval(unescape('%61'))", b"").unwrap());
        assert_eq!(vec!["remote-script-injection"], detect("<script src=\"https://evil.example/x.js\"></script>", b"").unwrap());
        assert_eq!(vec!["javascript-protocol"], detect("/URI (javascript:alert(1))", b"").unwrap());
        assert_eq!(vec!["inline-event-handler"], detect("<img src=x onerror=\"steal()\">", b"").unwrap());
    }

    #[test]
    fn test_plain_eval_is_not_a_threat() {
        assert_eq!(true, detect("we evaluate (carefully) every candidate", b"").unwrap().is_empty());
    }

    #[test]
    fn test_nop_sled_needs_minimum_run() {
        let mut bytes = vec![0x41; 16];
        bytes.extend(vec![0x90; 9]);
        assert_eq!(true, detect("", &bytes).unwrap().is_empty());

        bytes.extend(vec![0x41, 0x90]);
        bytes.extend(vec![0x90; 10]);
        assert_eq!(vec!["x86-nop-sled"], detect("", &bytes).unwrap());
    }
}
