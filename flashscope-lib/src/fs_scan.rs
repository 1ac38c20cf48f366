//! Heuristic filename recovery for SPIFFS/LittleFS-like regions.
//!
//! No filesystem index is consulted. Every byte offset is tried as the start
//! of a 32-byte NUL-terminated path followed by a little-endian `u32` size;
//! offsets that look plausible become [`FileCandidate`]s with a confidence
//! score. The result is a display ordering, not an on-flash one.

use crate::{Error, Result};
use std::collections::HashSet;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};

/// Filename field width in an object header.
pub const NAME_FIELD_LEN: usize = 32;
/// Filename field plus the trailer holding the size.
pub const LOOKAHEAD: usize = NAME_FIELD_LEN + 8;
/// How much of a filesystem partition a device scan reads.
pub const FS_SCAN_WINDOW: u32 = 64 * 1024;

const MIN_NAME_LEN: usize = 3;
const MAX_FILE_SIZE: u32 = 10 * 1024 * 1024;
const PLAUSIBLE_SIZE: std::ops::RangeInclusive<u32> = 10..=1024 * 1024;
const COMMON_EXTENSIONS: [&str; 10] = [
    ".html", ".css", ".js", ".json", ".txt", ".ico", ".png", ".jpg", ".gif", ".svg",
];
const FORBIDDEN_CHARS: [char; 7] = ['<', '>', ':', '"', '|', '?', '*'];
const CANCEL_CHECK_INTERVAL: usize = 4096;

/// Ordered so that sorting puts `High` first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Confidence {
    High,
    Medium,
    Low,
}

impl Confidence {
    fn from_score(score: u32) -> Self {
        match score {
            5.. => Confidence::High,
            3.. => Confidence::Medium,
            _ => Confidence::Low,
        }
    }
}

impl fmt::Display for Confidence {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Confidence::High => "HIGH",
            Confidence::Medium => "MEDIUM",
            Confidence::Low => "LOW",
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FileType {
    Html,
    Css,
    JavaScript,
    Json,
    Text,
    Icon,
    Image,
    Svg,
    Xml,
    Pdf,
    Archive,
    Unknown,
}

impl FileType {
    /// Infer the type from the text after the last `.` of `name`.
    pub fn from_name(name: &str) -> Self {
        let ext = name.rsplit('.').next().unwrap_or_default().to_ascii_lowercase();
        match ext.as_str() {
            "html" | "htm" => FileType::Html,
            "css" => FileType::Css,
            "js" => FileType::JavaScript,
            "json" => FileType::Json,
            "txt" => FileType::Text,
            "ico" => FileType::Icon,
            "png" | "jpg" | "jpeg" | "gif" => FileType::Image,
            "svg" => FileType::Svg,
            "xml" => FileType::Xml,
            "pdf" => FileType::Pdf,
            "zip" => FileType::Archive,
            _ => FileType::Unknown,
        }
    }
}

impl fmt::Display for FileType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            FileType::Html => "HTML",
            FileType::Css => "CSS",
            FileType::JavaScript => "JavaScript",
            FileType::Json => "JSON",
            FileType::Text => "Text",
            FileType::Icon => "Icon",
            FileType::Image => "Image",
            FileType::Svg => "SVG",
            FileType::Xml => "XML",
            FileType::Pdf => "PDF",
            FileType::Archive => "Archive",
            FileType::Unknown => "Unknown",
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileCandidate {
    pub name: String,
    pub size: u32,
    pub confidence: Confidence,
    pub file_type: FileType,
}

/// Scan the whole buffer.
pub fn scan(bytes: &[u8]) -> Vec<FileCandidate> {
    let mut found = Vec::new();
    let mut seen = HashSet::new();
    for offset in 0..bytes.len().saturating_sub(LOOKAHEAD) {
        collect(bytes, offset, &mut seen, &mut found);
    }
    finish(found)
}

/// Scan the buffer, giving up with [`Error::Cancelled`] once `cancel` is set.
///
/// A cancelled scan returns no candidates at all.
pub fn scan_cancellable(bytes: &[u8], cancel: &AtomicBool) -> Result<Vec<FileCandidate>> {
    let mut found = Vec::new();
    let mut seen = HashSet::new();
    for offset in 0..bytes.len().saturating_sub(LOOKAHEAD) {
        if offset % CANCEL_CHECK_INTERVAL == 0 && cancel.load(Ordering::Relaxed) {
            tracing::info!("filesystem scan cancelled at offset 0x{:X}", offset);
            return Err(Error::Cancelled);
        }
        collect(bytes, offset, &mut seen, &mut found);
    }
    Ok(finish(found))
}

// First occurrence of a name wins.
fn collect(
    bytes: &[u8],
    offset: usize,
    seen: &mut HashSet<String>,
    found: &mut Vec<FileCandidate>,
) {
    let Some(candidate) = try_extract_candidate(bytes, offset) else {
        return;
    };
    if seen.insert(candidate.name.clone()) {
        tracing::debug!(
            "candidate {} ({} bytes, {}) at 0x{:X}",
            candidate.name,
            candidate.size,
            candidate.confidence,
            offset
        );
        found.push(candidate);
    }
}

fn finish(mut found: Vec<FileCandidate>) -> Vec<FileCandidate> {
    found.sort_by(|a, b| {
        a.confidence
            .cmp(&b.confidence)
            .then_with(|| a.name.cmp(&b.name))
    });
    tracing::info!("filesystem scan found {} candidates", found.len());
    found
}

/// Try to read a candidate whose name field starts at `offset`.
///
/// Offsets whose lookahead would run past the buffer simply yield `None`.
pub fn try_extract_candidate(bytes: &[u8], offset: usize) -> Option<FileCandidate> {
    let window = bytes.get(offset..offset.checked_add(LOOKAHEAD)?)?;
    let name = extract_name(&window[..NAME_FIELD_LEN])?;
    if !is_plausible_path(&name) {
        return None;
    }

    let size = u32::from_le_bytes(window[NAME_FIELD_LEN..NAME_FIELD_LEN + 4].try_into().ok()?);
    if size == 0 || size >= MAX_FILE_SIZE {
        return None;
    }

    Some(FileCandidate {
        confidence: score(&name, size),
        file_type: FileType::from_name(&name),
        name,
        size,
    })
}

// Printable ASCII up to the first NUL; any other byte disqualifies the field.
fn extract_name(field: &[u8]) -> Option<String> {
    let mut name = String::new();
    for &byte in field {
        match byte {
            0 => break,
            0x20..=0x7E => name.push(byte as char),
            _ => return None,
        }
    }
    (name.len() >= MIN_NAME_LEN).then_some(name)
}

fn is_plausible_path(name: &str) -> bool {
    if !name.starts_with('/') {
        return false;
    }
    if !has_extension(name) && !is_nested(name) {
        return false;
    }
    !name
        .chars()
        .any(|c| FORBIDDEN_CHARS.contains(&c) || c.is_ascii_control())
}

// A trailing `.ext` of one to five ASCII alphanumerics.
fn has_extension(name: &str) -> bool {
    match name.rsplit_once('.') {
        Some((_, ext)) => {
            (1..=5).contains(&ext.len()) && ext.bytes().all(|b| b.is_ascii_alphanumeric())
        }
        None => false,
    }
}

// At least two `/` separators, e.g. `/www/index`.
fn is_nested(name: &str) -> bool {
    name.matches('/').count() >= 2
}

fn score(name: &str, size: u32) -> Confidence {
    let mut score = 0;
    if COMMON_EXTENSIONS.iter().any(|ext| name.ends_with(ext)) {
        score += 3;
    }
    if PLAUSIBLE_SIZE.contains(&size) {
        score += 2;
    }
    if is_nested(name) {
        score += 1;
    }
    Confidence::from_score(score)
}
