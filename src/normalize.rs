//! Unit normalization: every raw numeric-or-percentage string becomes an
//! Option<f64> exactly once; nothing downstream re-parses strings.

/// Lenient decimal parse. Whitespace is trimmed, null-ish strings and
/// non-finite values ("nan", "inf") come back as None rather than poisoning
/// later arithmetic.
pub fn parse_decimal(raw: Option<&str>) -> Option<f64> {
    let s = raw?.trim();
    if s.is_empty() {
        return None;
    }
    s.parse::<f64>().ok().filter(|v| v.is_finite())
}

/// Would-take-again arrives as either a percentage-as-integer ("82") or an
/// already-normalized fraction ("0.82") depending on the source. Anything
/// above 1 is treated as a percentage and divided by 100; fractions pass
/// through untouched, so neither form is ever double-divided.
pub fn normalize_would_take_again(raw: Option<&str>) -> Option<f64> {
    let v = parse_decimal(raw)?;
    Some(if v > 1.0 { v / 100.0 } else { v })
}

/// Affine map from the rating site's 1-5 scale onto the internal 1-7 domain:
/// r=1 -> 1, r=5 -> 7. Exact to floating precision, never rounded.
pub fn scale_to_internal(r: Option<f64>) -> Option<f64> {
    r.map(|r| (r - 1.0) * (6.0 / 4.0) + 1.0)
}

// ── Tests ──

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_decimal_basics() {
        assert_eq!(parse_decimal(Some("3.9")), Some(3.9));
        assert_eq!(parse_decimal(Some("  2.1 ")), Some(2.1));
        assert_eq!(parse_decimal(Some("")), None);
        assert_eq!(parse_decimal(Some("N/A")), None);
        assert_eq!(parse_decimal(None), None);
    }

    #[test]
    fn non_finite_strings_are_null() {
        // "nan" and "inf" parse as f64 but must not survive normalization
        assert_eq!(parse_decimal(Some("nan")), None);
        assert_eq!(parse_decimal(Some("NaN")), None);
        assert_eq!(parse_decimal(Some("inf")), None);
    }

    #[test]
    fn would_take_again_percentage_and_fraction() {
        assert_eq!(normalize_would_take_again(Some("82")), Some(0.82));
        assert_eq!(normalize_would_take_again(Some("0.82")), Some(0.82));
        assert_eq!(normalize_would_take_again(Some("100")), Some(1.0));
        assert_eq!(normalize_would_take_again(Some("1")), Some(1.0));
        assert_eq!(normalize_would_take_again(Some("garbled")), None);
        assert_eq!(normalize_would_take_again(None), None);
    }

    #[test]
    fn would_take_again_stays_in_unit_interval() {
        for raw in ["0", "0.5", "1", "2", "50", "99.9", "100"] {
            let v = normalize_would_take_again(Some(raw)).unwrap();
            assert!((0.0..=1.0).contains(&v), "{} -> {}", raw, v);
        }
    }

    #[test]
    fn scale_endpoints_and_midpoint() {
        assert_eq!(scale_to_internal(Some(1.0)), Some(1.0));
        assert_eq!(scale_to_internal(Some(5.0)), Some(7.0));
        assert_eq!(scale_to_internal(Some(3.0)), Some(4.0));
        assert_eq!(scale_to_internal(Some(3.9)), Some(5.35));
        assert_eq!(scale_to_internal(None), None);
    }

    #[test]
    fn scale_is_monotonic() {
        let mut prev = f64::NEG_INFINITY;
        for i in 0..=40 {
            let r = 1.0 + (i as f64) * 0.1;
            let v = scale_to_internal(Some(r)).unwrap();
            assert!(v >= prev);
            prev = v;
        }
    }
}
