use std::collections::HashMap;
use std::io::Read;
use std::path::Path;

use anyhow::{Context, Result};
use tracing::{info, warn};

use crate::db::CourseFragment;

/// Auxiliary course_code -> rmp_id rows, used only as a fallback when a
/// fragment carries no id of its own. A course code may map to several ids;
/// the fan-out is upstream ambiguity and is not resolved here.
#[derive(Debug, Default)]
pub struct AuxTable {
    map: HashMap<String, Vec<i64>>,
}

impl AuxTable {
    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    pub fn lookup(&self, course_code: &str) -> &[i64] {
        self.map
            .get(course_code.trim())
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }
}

/// Load the auxiliary id table from a CSV with (at least) course_code and
/// rmp_id columns, matched case-insensitively. A missing or unreadable file
/// degrades to an empty table: the merge then passes fragments through.
pub fn load_aux_table(path: &Path) -> AuxTable {
    match std::fs::File::open(path) {
        Ok(file) => match parse_aux_csv(file) {
            Ok(table) => {
                info!("Loaded {} auxiliary id rows from {}", table.map.len(), path.display());
                table
            }
            Err(e) => {
                warn!("Could not parse auxiliary table {}: {}", path.display(), e);
                AuxTable::default()
            }
        },
        Err(e) => {
            warn!("Auxiliary table {} unavailable ({}); ids will not be backfilled", path.display(), e);
            AuxTable::default()
        }
    }
}

pub fn parse_aux_csv<R: Read>(reader: R) -> Result<AuxTable> {
    let mut rdr = csv::Reader::from_reader(reader);

    let headers = rdr
        .headers()
        .context("auxiliary table has no header row")?
        .clone();
    let find = |name: &str| {
        headers
            .iter()
            .position(|h| h.trim().eq_ignore_ascii_case(name))
    };
    let code_idx = find("course_code").context("auxiliary table missing course_code column")?;
    let id_idx = find("rmp_id").context("auxiliary table missing rmp_id column")?;

    let mut map: HashMap<String, Vec<i64>> = HashMap::new();
    for record in rdr.records() {
        let record = record?;
        let code = record.get(code_idx).unwrap_or("").trim();
        // Ids sometimes arrive float-formatted ("7777.0") from spreadsheets
        let id = record
            .get(id_idx)
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .and_then(|s| {
                s.parse::<i64>()
                    .ok()
                    .or_else(|| s.parse::<f64>().ok().map(|v| v as i64))
            });
        if let (false, Some(id)) = (code.is_empty(), id) {
            map.entry(code.to_string()).or_default().push(id);
        }
    }
    Ok(AuxTable { map })
}

/// Backfill external ids onto fragments from the auxiliary table, matching
/// on exact trimmed course-code equality. An id already extracted on the
/// fragment always wins; the auxiliary id is a fallback only. When one code
/// matches several auxiliary rows the fragment fans out, one copy per id.
pub fn backfill_ids(fragments: Vec<CourseFragment>, aux: &AuxTable) -> Vec<CourseFragment> {
    if aux.is_empty() {
        return fragments;
    }

    let mut out = Vec::with_capacity(fragments.len());
    for fragment in fragments {
        if fragment.rmp_id.is_some() {
            out.push(fragment);
            continue;
        }
        let matches = aux.lookup(&fragment.course_code);
        if matches.is_empty() {
            out.push(fragment);
        } else {
            for &id in matches {
                let mut copy = fragment.clone();
                copy.rmp_id = Some(id);
                out.push(copy);
            }
        }
    }
    out
}

// ── Tests ──

#[cfg(test)]
mod tests {
    use super::*;

    fn fragment(course_code: &str, rmp_id: Option<i64>) -> CourseFragment {
        CourseFragment {
            filename: "f.pdf".to_string(),
            professor: "Doe".to_string(),
            semester: "SP 2025".to_string(),
            course_code: course_code.to_string(),
            section: "1".to_string(),
            course_name: "Intro".to_string(),
            overall_rating: None,
            rmp_id,
        }
    }

    fn aux(csv: &str) -> AuxTable {
        parse_aux_csv(csv.as_bytes()).unwrap()
    }

    #[test]
    fn extracted_id_is_never_overridden() {
        let table = aux("course_code,rmp_id\nCS101,1111\n");
        let out = backfill_ids(vec![fragment("CS101", Some(9999))], &table);
        assert_eq!(out[0].rmp_id, Some(9999));
    }

    #[test]
    fn missing_id_is_backfilled() {
        let table = aux("course_code,rmp_id\nCS101,1111\n");
        let out = backfill_ids(vec![fragment("CS101", None)], &table);
        assert_eq!(out[0].rmp_id, Some(1111));
    }

    #[test]
    fn multiple_aux_rows_fan_out() {
        let table = aux("course_code,rmp_id\nCS101,1111\nCS101,2222\n");
        let out = backfill_ids(vec![fragment("CS101", None)], &table);
        assert_eq!(out.len(), 2);
        let ids: Vec<_> = out.iter().map(|f| f.rmp_id).collect();
        assert_eq!(ids, vec![Some(1111), Some(2222)]);
    }

    #[test]
    fn empty_table_is_pass_through() {
        let out = backfill_ids(vec![fragment("CS101", None)], &AuxTable::default());
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].rmp_id, None);
    }

    #[test]
    fn course_code_match_is_trimmed_and_case_sensitive() {
        let table = aux("course_code,rmp_id\n  CS101 ,1111\n");
        assert_eq!(table.lookup("CS101"), &[1111]);
        assert!(table.lookup("cs101").is_empty());
    }

    #[test]
    fn headers_matched_case_insensitively() {
        let table = aux("Course_Code,RMP_ID\nCS101,1111\n");
        assert_eq!(table.lookup("CS101"), &[1111]);
    }

    #[test]
    fn float_formatted_ids_accepted() {
        let table = aux("course_code,rmp_id\nCS101,7777.0\n");
        assert_eq!(table.lookup("CS101"), &[7777]);
    }

    #[test]
    fn rows_without_usable_id_are_skipped() {
        let table = aux("course_code,rmp_id\nCS101,\nCS102,abc\nCS103,5\n");
        assert!(table.lookup("CS101").is_empty());
        assert!(table.lookup("CS102").is_empty());
        assert_eq!(table.lookup("CS103"), &[5]);
    }

    #[test]
    fn missing_columns_error() {
        assert!(parse_aux_csv("a,b\n1,2\n".as_bytes()).is_err());
    }
}
