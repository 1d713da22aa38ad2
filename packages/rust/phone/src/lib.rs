//! Phone number extraction from clean text.
//!
//! Scans text for number-shaped spans, parses each with the configured
//! default region as a hint, keeps only valid dialable numbers, and returns
//! them as a sorted, deduplicated list of E.164 strings.

use std::collections::BTreeSet;
use std::sync::LazyLock;

use phonenumber::country::Source;
use phonenumber::{Mode, ParseError, PhoneNumber, country};
use regex::Regex;
use tracing::{debug, instrument};

use sanitize_shared::{Result, SanitizeError};

/// Longest run of whitespace-separated tokens tried as one number when a
/// candidate span holds several numbers side by side.
const MAX_WINDOW_TOKENS: usize = 6;

/// Number-shaped span: optional `+`/`(`, a digit, separators and digits, a digit.
static CANDIDATE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[+(]?\d[\d\s().\-/]{4,}\d").expect("valid regex"));

/// Parse a region code such as `US` or `gb`.
pub fn parse_region(code: &str) -> Result<country::Id> {
    code.trim()
        .to_ascii_uppercase()
        .parse::<country::Id>()
        .map_err(|_| SanitizeError::config(format!("unknown phone region '{code}'")))
}

/// Extracts canonical phone numbers using a default region hint.
#[derive(Debug, Clone, Copy)]
pub struct PhoneExtractor {
    region: country::Id,
}

impl PhoneExtractor {
    /// Build an extractor for a region code; unknown codes are a config error.
    pub fn new(default_region: &str) -> Result<Self> {
        Ok(Self {
            region: parse_region(default_region)?,
        })
    }

    /// Region used for numbers without a country code.
    pub fn region(&self) -> country::Id {
        self.region
    }

    /// Extract with the default region.
    pub fn extract(&self, text: &str) -> Vec<String> {
        extract_phone_numbers(text, self.region)
    }

    /// Extract with a per-call region override.
    pub fn extract_in(&self, text: &str, region: country::Id) -> Vec<String> {
        extract_phone_numbers(text, region)
    }
}

/// Find, validate and canonicalize every phone number in `text`.
///
/// Unparseable and invalid candidates are dropped without aborting the scan.
/// The result depends only on the set of distinct numbers present.
#[instrument(skip(text), fields(len = text.len()))]
pub fn extract_phone_numbers(text: &str, region: country::Id) -> Vec<String> {
    if text.trim().is_empty() {
        return Vec::new();
    }

    let mut numbers = BTreeSet::new();
    let mut candidates = 0usize;

    for m in CANDIDATE_RE.find_iter(text) {
        if !on_token_boundary(text, m.start(), m.end()) {
            continue;
        }
        candidates += 1;

        let span = m.as_str();
        if let Some(number) = canonicalize(span, region) {
            numbers.insert(number);
            continue;
        }
        numbers.extend(split_adjacent(span, region));
    }

    debug!(candidates, unique = numbers.len(), "phone extraction complete");
    numbers.into_iter().collect()
}

/// Parse one candidate and return its E.164 form if it is a valid number.
pub fn canonicalize(raw: &str, region: country::Id) -> Option<String> {
    match parse_candidate(raw, region) {
        Ok(number) if phonenumber::is_valid(&number) => Some(e164(&number)),
        Ok(_) => {
            debug!(raw, "invalid phone number dropped");
            None
        }
        Err(e) => {
            debug!(raw, error = %e, "unparseable phone candidate dropped");
            None
        }
    }
}

/// Parse with the region hint only for numbers written without a country code.
///
/// Given a hint, the parser strips the hint region's national prefix even from
/// numbers that dial another country (`+86 10 ...` loses its `1` under `US`),
/// so numbers with an explicit `+` or IDD prefix are parsed against the
/// metadata of their own country code instead.
fn parse_candidate(
    raw: &str,
    region: country::Id,
) -> std::result::Result<PhoneNumber, ParseError> {
    if raw.trim_start().starts_with('+') {
        return phonenumber::parse(None, raw);
    }

    let number = phonenumber::parse(Some(region), raw)?;
    if number.code().source() != Source::Idd {
        return Ok(number);
    }
    match international_form(raw, number.code().value()) {
        Some(plus) => phonenumber::parse(None, plus).or(Ok(number)),
        None => Ok(number),
    }
}

/// Rewrite an IDD-prefixed candidate (`0049 30 ...`, `011 33 ...`) as `+CC...`.
fn international_form(raw: &str, code: u16) -> Option<String> {
    let digits: String = raw.chars().filter(char::is_ascii_digit).collect();
    let code = code.to_string();
    (2..=4)
        .filter(|&i| i < digits.len())
        .find(|&i| digits[i..].starts_with(&code))
        .map(|i| format!("+{}", &digits[i..]))
}

fn e164(number: &PhoneNumber) -> String {
    number.format().mode(Mode::E164).to_string()
}

/// A span is only a candidate when it is not glued to letters or digits.
fn on_token_boundary(text: &str, start: usize, end: usize) -> bool {
    let before = text[..start].chars().next_back();
    let after = text[end..].chars().next();
    !before.is_some_and(char::is_alphanumeric) && !after.is_some_and(char::is_alphanumeric)
}

/// Recover numbers from a span holding several numbers separated by spaces,
/// taking the longest valid token window at each position.
fn split_adjacent(span: &str, region: country::Id) -> Vec<String> {
    let tokens: Vec<&str> = span.split_whitespace().collect();
    if tokens.len() < 2 {
        return Vec::new();
    }

    let mut found = Vec::new();
    let mut i = 0;
    while i < tokens.len() {
        let widest = (i + MAX_WINDOW_TOKENS).min(tokens.len());
        let hit = (i + 1..=widest)
            .rev()
            .find_map(|j| canonicalize(&tokens[i..j].join(" "), region).map(|n| (j, n)));
        match hit {
            Some((j, number)) => {
                found.push(number);
                i = j;
            }
            None => i += 1,
        }
    }
    found
}

#[cfg(test)]
mod tests {
    use super::*;

    fn us() -> PhoneExtractor {
        PhoneExtractor::new("US").expect("US is a valid region")
    }

    #[test]
    fn mixed_text_sorted_and_canonical() {
        let found = us().extract("Call 202-555-0123 or +44 20 7946 0958");
        assert_eq!(found, vec!["+12025550123", "+442079460958"]);
    }

    #[test]
    fn us_formats_normalize_to_e164() {
        for raw in [
            "+1 202 555 0123",
            "+12025550123",
            "202-555-0123",
            "(202) 555-0123",
            "202.555.0123",
            "2025550123",
        ] {
            assert_eq!(us().extract(raw), vec!["+12025550123"], "input: {raw}");
        }
    }

    #[test]
    fn normalization_table() {
        let cases = [
            ("+1 202 555 0123", "+12025550123", "US"),
            ("+12025550123", "+12025550123", "US"),
            ("202-555-0123", "+12025550123", "US"),
            ("(202) 555-0123", "+12025550123", "US"),
            ("202.555.0123", "+12025550123", "US"),
            ("2025550123", "+12025550123", "US"),
            ("+44 20 7946 0958", "+442079460958", "US"),
            ("0049 30 123456", "+4930123456", "DE"),
            ("+49-30-123456", "+4930123456", "US"),
            ("+91 98765 43210", "+919876543210", "US"),
            ("+7 (495) 123-45-67", "+74951234567", "US"),
            ("+86 10 8888 8888", "+861088888888", "US"),
            ("+33 (0)1 44 55 66 77", "+33144556677", "US"),
        ];
        for (raw, expected, region) in cases {
            let extractor = PhoneExtractor::new(region).expect("region");
            assert_eq!(extractor.extract(raw), vec![expected], "input: {raw} ({region})");
        }
    }

    #[test]
    fn foreign_numbers_keep_their_leading_digits() {
        let extractor = us();
        for (raw, expected) in [
            ("+86 10 8888 8888", "+861088888888"),
            ("+33 1 44 55 66 77", "+33144556677"),
            ("+86 138 0013 8000", "+8613800138000"),
            ("+55 11 91234 5678", "+5511912345678"),
        ] {
            assert_eq!(extractor.extract(raw), vec![expected], "input: {raw}");
        }
    }

    #[test]
    fn idd_prefix_uses_default_region() {
        let de = PhoneExtractor::new("DE").expect("DE region");
        assert_eq!(de.extract("Tel. 0049 30 123456"), vec!["+4930123456"]);
        assert_eq!(de.extract("Tel. 030 123456"), vec!["+4930123456"]);
    }

    #[test]
    fn international_form_strips_idd() {
        assert_eq!(international_form("0049 30 123456", 49).as_deref(), Some("+4930123456"));
        assert_eq!(international_form("011 33 1 44 55 66 77", 33).as_deref(), Some("+33144556677"));
        assert_eq!(international_form("0033 1", 49), None);
    }

    #[test]
    fn repeated_numbers_are_deduplicated() {
        let text = "Office 202-555-0123, fax (202) 555-0123, intl +1 202 555 0123.";
        assert_eq!(us().extract(text), vec!["+12025550123"]);
    }

    #[test]
    fn adjacent_numbers_are_split() {
        let text = "Lines: (202) 555-0123 (202) 555-0187";
        assert_eq!(us().extract(text), vec!["+12025550123", "+12025550187"]);
    }

    #[test]
    fn invalid_candidates_are_dropped() {
        assert!(us().extract("Order 12345 shipped").is_empty());
        assert!(us().extract("Ext 555-0123 only").is_empty());
        assert!(us().extract("ref ABC2025550123").is_empty());
    }

    #[test]
    fn empty_input_is_empty_result() {
        assert!(us().extract("").is_empty());
        assert!(us().extract("   \n ").is_empty());
        assert!(us().extract("no digits here").is_empty());
    }

    #[test]
    fn region_override_applies_to_national_numbers() {
        let gb = parse_region("gb").expect("GB region");
        let extractor = us();
        assert_eq!(extractor.extract_in("Tel 020 7946 0958", gb), vec!["+442079460958"]);
        assert_eq!(extractor.region(), parse_region("US").unwrap());
    }

    #[test]
    fn unknown_region_is_config_error() {
        let err = PhoneExtractor::new("NOPE").unwrap_err();
        assert!(err.to_string().contains("unknown phone region"));
    }
}
