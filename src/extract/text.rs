use std::sync::LazyLock;

use regex::Regex;
use tracing::warn;

use super::filename::UNKNOWN;

// Report bodies are layout-noisy; only these two anchored phrases are trusted.
static NAME_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"Reports for .*?- (.*?)\(").unwrap());
static RATE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"Overall Rating:\s*(\d+\.\d+)").unwrap());

/// Extract the rendered text of a PDF. Unreadable bytes are a recoverable
/// document-level failure: the caller gets empty text, not an error.
pub fn pdf_text(bytes: &[u8], filename: &str) -> String {
    match pdf_extract::extract_text_from_mem(bytes) {
        Ok(text) => text,
        Err(e) => {
            warn!("Could not extract text from {}: {}", filename, e);
            String::new()
        }
    }
}

/// Pull (course_name, overall_rating) out of the document body text.
pub fn parse_body(text: &str) -> (String, Option<f64>) {
    let course_name = NAME_RE
        .captures(text)
        .map(|c| c[1].trim().to_string())
        .filter(|s| !s.is_empty())
        .unwrap_or_else(|| UNKNOWN.to_string());

    let overall_rating = RATE_RE
        .captures(text)
        .and_then(|c| c[1].parse::<f64>().ok());

    (course_name, overall_rating)
}

// ── Tests ──
