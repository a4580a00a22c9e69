use std::collections::BTreeSet;
use std::sync::LazyLock;

use regex::Regex;
use scraper::{ElementRef, Html, Selector};

use crate::db::RatingFragment;

// The rating site ships hashed styled-component class names; only the
// component prefix is stable across deploys.
static RATING_CLASS_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"RatingValue__Numerator-").unwrap());
static FEEDBACK_CLASS_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"FeedbackItem__FeedbackNumber-").unwrap());
static TAG_CLASS_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?:^|\s)Tag-").unwrap());

static DIV_SEL: LazyLock<Selector> = LazyLock::new(|| Selector::parse("div").unwrap());
static SPAN_SEL: LazyLock<Selector> = LazyLock::new(|| Selector::parse("span").unwrap());

/// Parse one fetched rating-page payload into a RatingFragment. Missing
/// nodes become None/empty; this never fails on malformed markup.
pub fn parse_rating_page(html: &str) -> RatingFragment {
    let doc = Html::parse_document(html);

    let overall_rating = doc
        .select(&DIV_SEL)
        .find(|el| class_matches(el, &RATING_CLASS_RE))
        .map(node_text)
        .filter(|t| !t.is_empty());

    // Feedback numbers are positional: would-take-again first, difficulty
    // second. The % suffix is stripped here, not converted.
    let feedback: Vec<String> = doc
        .select(&DIV_SEL)
        .filter(|el| class_matches(el, &FEEDBACK_CLASS_RE))
        .map(node_text)
        .take(2)
        .collect();
    let (would_take_again, difficulty) = if feedback.len() >= 2 {
        (
            Some(feedback[0].replace('%', "")),
            Some(feedback[1].clone()),
        )
    } else {
        (None, None)
    };

    let tags: BTreeSet<String> = doc
        .select(&SPAN_SEL)
        .filter(|el| class_matches(el, &TAG_CLASS_RE))
        .map(|el| node_text(el).to_lowercase())
        .filter(|t| !t.is_empty())
        .collect();

    RatingFragment {
        overall_rating,
        would_take_again,
        difficulty,
        tags,
    }
}

fn class_matches(el: &ElementRef, re: &Regex) -> bool {
    el.value().attr("class").is_some_and(|c| re.is_match(c))
}

fn node_text(el: ElementRef) -> String {
    el.text().collect::<String>().trim().to_string()
}

// ── Tests ──

#[cfg(test)]
mod tests {
    use super::*;

    const PAGE: &str = r#"
        <html><body>
          <div class="RatingValue__Numerator-qw8sqy-2 duhvlP">3.9</div>
          <div class="FeedbackItem__FeedbackNumber-uof32n-1 kkESWs">75%</div>
          <div class="FeedbackItem__FeedbackNumber-uof32n-1 kkESWs">2.1</div>
          <span class="Tag-bs9vf4-0 bmtbjB">Helpful</span>
          <span class="Tag-bs9vf4-0 bmtbjB">HELPFUL</span>
          <span class="Tag-bs9vf4-0 bmtbjB">Tough grader</span>
        </body></html>"#;

    #[test]
    fn full_page() {
        let f = parse_rating_page(PAGE);
        assert_eq!(f.overall_rating.as_deref(), Some("3.9"));
        assert_eq!(f.would_take_again.as_deref(), Some("75"));
        assert_eq!(f.difficulty.as_deref(), Some("2.1"));
        let tags: Vec<&str> = f.tags.iter().map(|s| s.as_str()).collect();
        assert_eq!(tags, vec!["helpful", "tough grader"]);
    }

    #[test]
    fn duplicate_tags_collapse_case_insensitively() {
        let f = parse_rating_page(PAGE);
        assert_eq!(f.tags.len(), 2);
    }

    #[test]
    fn missing_nodes_yield_nulls() {
        let f = parse_rating_page("<html><body><p>nothing here</p></body></html>");
        assert_eq!(f.overall_rating, None);
        assert_eq!(f.would_take_again, None);
        assert_eq!(f.difficulty, None);
        assert!(f.tags.is_empty());
    }

    #[test]
    fn single_feedback_number_is_not_enough() {
        // One number is ambiguous positionally, so both fields stay null
        let html = r#"<div class="FeedbackItem__FeedbackNumber-x">82%</div>"#;
        let f = parse_rating_page(html);
        assert_eq!(f.would_take_again, None);
        assert_eq!(f.difficulty, None);
    }

    #[test]
    fn bare_would_take_again_number_kept_verbatim() {
        let html = r#"
          <div class="FeedbackItem__FeedbackNumber-x">0.82</div>
          <div class="FeedbackItem__FeedbackNumber-x">3.0</div>"#;
        let f = parse_rating_page(html);
        assert_eq!(f.would_take_again.as_deref(), Some("0.82"));
        assert_eq!(f.difficulty.as_deref(), Some("3.0"));
    }

    #[test]
    fn tag_prefix_must_be_a_class_token() {
        // "SomeTag-x" must not count as a tag class
        let html = r#"<span class="SomeTag-x">nope</span><span class="Tag-x">yes</span>"#;
        let f = parse_rating_page(html);
        assert_eq!(f.tags.len(), 1);
        assert!(f.tags.contains("yes"));
    }
}
