use std::sync::LazyLock;

use regex::Regex;

// Professor name sits between a pair of $$ markers, e.g. "$$Jane Doe$$".
static PROF_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\$\$(.*?)\$\$").unwrap());
// Semester is a season code + 4-digit year anchored at the filename start.
static SEM_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^(SP|FL)(\d{4})").unwrap());
// Course code and section follow one of the campus anchor tokens.
static COURSE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(L24|E81)[._\s]+(\w+)[._\s]+(\d+)").unwrap());
static RMP_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?i)RMP[-_]?(\d+)").unwrap());

pub const UNKNOWN: &str = "Unknown";

/// Fields recoverable from the filename alone. Any field the naming
/// convention doesn't yield falls back to "Unknown"/None; parsing never fails.
#[derive(Debug, Clone)]
pub struct FilenameFields {
    pub professor: String,
    pub semester: String,
    pub course_code: String,
    pub section: String,
    pub rmp_id: Option<i64>,
}

pub fn parse_filename(filename: &str) -> FilenameFields {
    let filename = filename.trim();

    let professor = PROF_RE
        .captures(filename)
        .map(|c| c[1].to_string())
        .unwrap_or_else(|| UNKNOWN.to_string());

    let semester = SEM_RE
        .captures(filename)
        .map(|c| format!("{} {}", &c[1], &c[2]))
        .unwrap_or_else(|| UNKNOWN.to_string());

    let (course_code, section) = match COURSE_RE.captures(filename) {
        Some(c) => (c[2].to_string(), c[3].to_string()),
        None => (UNKNOWN.to_string(), UNKNOWN.to_string()),
    };

    let rmp_id = RMP_RE
        .captures(filename)
        .and_then(|c| c[1].parse::<i64>().ok());

    FilenameFields {
        professor,
        semester,
        course_code,
        section,
        rmp_id,
    }
}

// ── Tests ──
