use std::collections::BTreeMap;

use crate::db::{CanonicalRecord, EnrichedRow};
use crate::normalize::{normalize_would_take_again, parse_decimal, scale_to_internal};

/// Normalize units, resolve duplicates, and project the scraped rating onto
/// the internal 1-7 scale. One CanonicalRecord survives per identity group.
pub fn standardize(rows: &[EnrichedRow]) -> Vec<CanonicalRecord> {
    let records: Vec<CanonicalRecord> = rows.iter().map(to_canonical).collect();
    resolve_duplicates(records)
}

/// Last whitespace-separated token of the full professor string, so
/// "Jane A Doe" and "Doe" land in the same identity group.
pub fn surname(full: &str) -> &str {
    full.split_whitespace().last().unwrap_or("").trim()
}

fn to_canonical(r: &EnrichedRow) -> CanonicalRecord {
    let scraped = parse_decimal(r.scraped_overall_rating.as_deref());
    CanonicalRecord {
        filename: r.filename.clone(),
        professor_name: surname(&r.professor).to_string(),
        full_professor_name: r.professor.trim().to_string(),
        course_code: r.course_code.trim().to_string(),
        course_name: r.course_name.trim().to_string(),
        semester: r.semester.trim().to_string(),
        section: r.section.trim().to_string(),
        rmp_id: r.rmp_id,
        overall_rating: r.overall_rating,
        scraped_overall_rating: scraped,
        would_take_again: normalize_would_take_again(r.would_take_again.as_deref()),
        difficulty: parse_decimal(r.difficulty.as_deref()),
        tags: r.tags.clone().unwrap_or_default(),
        normalized_rmp_rating: scale_to_internal(scraped),
    }
}

type IdentityKey = (String, String, String, String);

fn identity_key(r: &CanonicalRecord) -> IdentityKey {
    (
        surname(&r.professor_name).to_string(),
        r.course_code.trim().to_string(),
        r.semester.trim().to_string(),
        r.section.trim().to_string(),
    )
}

/// Rank within an identity group, rank 1 wins: prefer the record with the
/// most complete evidentiary trail. Compared lexicographically.
fn rank(r: &CanonicalRecord) -> (bool, bool, bool) {
    (
        r.overall_rating.is_none(),
        r.scraped_overall_rating.is_none(),
        !has_known_course_name(r),
    )
}

fn has_known_course_name(r: &CanonicalRecord) -> bool {
    !r.course_name.is_empty() && r.course_name != "Unknown"
}

/// Group records under the identity key and keep exactly one per group.
/// Stable sort inside each group plus ordered group iteration makes the
/// choice deterministic for a given input ordering; losing records are
/// discarded whole, with no field merging.
pub fn resolve_duplicates(records: Vec<CanonicalRecord>) -> Vec<CanonicalRecord> {
    let mut groups: BTreeMap<IdentityKey, Vec<CanonicalRecord>> = BTreeMap::new();
    for r in records {
        groups.entry(identity_key(&r)).or_default().push(r);
    }

    groups
        .into_values()
        .map(|mut group| {
            group.sort_by_key(rank);
            group.into_iter().next().expect("groups are never empty")
        })
        .collect()
}

// ── Tests ──
