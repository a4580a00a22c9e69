pub mod filename;
pub mod rating_page;
pub mod text;

use crate::db::CourseFragment;

/// Two-source extraction: filename convention first, then the document body.
/// Never fails; every unparseable field takes its default so one bad
/// document can't abort a batch.
pub fn extract_course_info(bytes: &[u8], name: &str) -> CourseFragment {
    let fields = filename::parse_filename(name);
    let body = text::pdf_text(bytes, name);
    let (course_name, overall_rating) = text::parse_body(&body);

    CourseFragment {
        filename: name.trim().to_string(),
        professor: fields.professor,
        semester: fields.semester,
        course_code: fields.course_code,
        section: fields.section,
        course_name,
        overall_rating,
        rmp_id: fields.rmp_id,
    }
}

// ── Tests ──

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unreadable_bytes_still_return_a_complete_fragment() {
        let f = extract_course_info(b"not a pdf", "SP2025.$$Doe$$.L24.CS101.1.RMP99.pdf");
        assert_eq!(f.professor, "Doe");
        assert_eq!(f.semester, "SP 2025");
        assert_eq!(f.course_code, "CS101");
        assert_eq!(f.section, "1");
        assert_eq!(f.rmp_id, Some(99));
        // Body-derived fields default when the text is unreadable
        assert_eq!(f.course_name, "Unknown");
        assert_eq!(f.overall_rating, None);
    }

    #[test]
    fn filename_is_trimmed() {
        let f = extract_course_info(b"", "  junk.pdf  ");
        assert_eq!(f.filename, "junk.pdf");
    }
}
