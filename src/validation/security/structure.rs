use std::borrow::Cow;
use std::sync::LazyLock;

use regex::Regex;

use crate::validation::{contains, contains_name, find, prefix};

pub const POLYGLOT_WINDOW: usize = 1024;

static XREF_ENTRY: LazyLock<Result<Regex, regex::Error>> =
    LazyLock::new(|| Regex::new(r"\b\d{10} \d{5} [fn]\b"));

const FORMAT_SIGNATURES: &[(&str, &[u8])] = &[
    ("pdf", b"%PDF-"),
    ("jpeg", &[0xFF, 0xD8, 0xFF]),
    ("png", &[0x89, 0x50, 0x4E, 0x47, 0x0D, 0x0A, 0x1A, 0x0A]),
    ("zip", b"PK\x03\x04"),
];

const AUTO_ACTIONS: &[&[u8]] = &[b"/OpenAction", b"/AA"];

/// Shannon entropy in bits per byte, `0.0` for empty input.
pub fn entropy(bytes: &[u8]) -> f64 {
    if bytes.is_empty() {
        return 0.0;
    }
    let mut counts = [0usize; 256];
    for b in bytes {
        counts[*b as usize] += 1;
    }
    let len = bytes.len() as f64;
    return counts.iter()
        .filter(|c| **c > 0)
        .map(|c| {
            let p = *c as f64 / len;
            -p * p.log2()
        })
        .sum();
}

/// Formats whose signature sits at offset zero or, for a file that starts with
/// one known format, anywhere within the leading window. Inside a PDF, signatures
/// found in a stream body belong to embedded images and are not counted.
pub fn polyglot_formats(bytes: &[u8]) -> Vec<&'static str> {
    let leading = FORMAT_SIGNATURES.iter().find(|(_, signature)| bytes.starts_with(signature));
    let leading = match leading {
        Some((label, _)) => *label,
        None => return Vec::new(),
    };
    let window = prefix(bytes, POLYGLOT_WINDOW);
    let streams = if leading == "pdf" { stream_bodies(window) } else { Vec::new() };
    return FORMAT_SIGNATURES.iter()
        .filter(|(_, signature)| {
            positions(window, signature).iter()
                .any(|at| !streams.iter().any(|(start, end)| at >= start && at < end))
        })
        .map(|(label, _)| *label)
        .collect();
}

/// Byte ranges between each `stream` keyword and its `endstream`, or the end of
/// `window` when the stream is cut off.
fn stream_bodies(window: &[u8]) -> Vec<(usize, usize)> {
    let mut bodies = Vec::new();
    let mut offset = 0;
    while let Some(position) = find(&window[offset..], b"stream") {
        let keyword = offset + position;
        let start = keyword + b"stream".len();
        if keyword >= 3 && &window[keyword - 3..keyword] == b"end" {
            offset = start;
            continue;
        }
        let end = match find(&window[start..], b"endstream") {
            Some(length) => start + length,
            None => window.len(),
        };
        bodies.push((start, end));
        offset = end;
    }
    return bodies;
}

fn positions(haystack: &[u8], needle: &[u8]) -> Vec<usize> {
    let mut found = Vec::new();
    let mut offset = 0;
    while let Some(position) = find(&haystack[offset..], needle) {
        found.push(offset + position);
        offset += position + needle.len();
    }
    return found;
}

/// Removes cross-reference entries (`0000012345 00000 n`) so their fixed-width
/// offsets are not mistaken for account numbers.
pub fn strip_xref_entries(text: &str) -> std::result::Result<Cow<str>, regex::Error> {
    let pattern = XREF_ENTRY.as_ref().map_err(|e| e.clone())?;
    return Ok(pattern.replace_all(text, ""));
}

/// Automatic-action names, matched as whole PDF name tokens.
pub fn pdf_auto_actions(window: &[u8]) -> Vec<String> {
    return AUTO_ACTIONS.iter()
        .filter(|name| contains_name(window, name))
        .map(|name| String::from_utf8_lossy(name).into_owned())
        .collect();
}

/// Encryption combined with active content, or a weak legacy cipher.
pub fn suspicious_encryption(window: &[u8]) -> Vec<&'static str> {
    if !contains(window, b"/Encrypt") {
        return Vec::new();
    }
    let mut reasons = Vec::new();
    if contains_name(window, b"/JavaScript") || contains_name(window, b"/OpenAction") {
        reasons.push("encrypted-active-content");
    }
    if contains(window, b"/V 1") || contains(window, b"/R 2") || contains(window, b"/Length 40") {
        reasons.push("weak-cipher");
    }
    return reasons;
}
