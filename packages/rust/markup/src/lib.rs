//! Markup-to-plain-text normalization.
//!
//! Turns raw or partially structured HTML into a single line of clean text:
//! script, style and noscript content is dropped, text fragments from the
//! document body are joined with single spaces, and whitespace runs collapse.
//! Every failure path yields an empty string rather than an error.

use std::panic::{self, AssertUnwindSafe};
use std::sync::LazyLock;

use regex::Regex;
use scraper::{ElementRef, Html, Selector};
use tracing::{debug, instrument};

/// Elements whose content never reaches the output.
const SKIPPED_ELEMENTS: [&str; 3] = ["script", "style", "noscript"];

// ---------------------------------------------------------------------------
// Input
// ---------------------------------------------------------------------------

/// Anything the normalizer accepts. Non-text, non-byte input maps to
/// [`MarkupInput::Unsupported`] and normalizes to `""`.
#[derive(Debug, Clone, Copy)]
pub enum MarkupInput<'a> {
    Text(&'a str),
    Bytes(&'a [u8]),
    Unsupported,
}

impl<'a> From<&'a str> for MarkupInput<'a> {
    fn from(text: &'a str) -> Self {
        Self::Text(text)
    }
}

impl<'a> From<&'a String> for MarkupInput<'a> {
    fn from(text: &'a String) -> Self {
        Self::Text(text)
    }
}

impl<'a> From<&'a [u8]> for MarkupInput<'a> {
    fn from(bytes: &'a [u8]) -> Self {
        Self::Bytes(bytes)
    }
}

impl<'a, const N: usize> From<&'a [u8; N]> for MarkupInput<'a> {
    fn from(bytes: &'a [u8; N]) -> Self {
        Self::Bytes(bytes)
    }
}

impl<'a> From<&'a Vec<u8>> for MarkupInput<'a> {
    fn from(bytes: &'a Vec<u8>) -> Self {
        Self::Bytes(bytes)
    }
}

impl<'a> From<&'a serde_json::Value> for MarkupInput<'a> {
    fn from(value: &'a serde_json::Value) -> Self {
        match value {
            serde_json::Value::String(text) => Self::Text(text),
            _ => Self::Unsupported,
        }
    }
}

impl<'a, T: Into<MarkupInput<'a>>> From<Option<T>> for MarkupInput<'a> {
    fn from(value: Option<T>) -> Self {
        value.map_or(Self::Unsupported, Into::into)
    }
}

// ---------------------------------------------------------------------------
// Parsers
// ---------------------------------------------------------------------------

/// Parsers in the order they are tried.
#[derive(Debug, Clone, Copy)]
enum MarkupParser {
    /// Full-document parse: synthesizes `<html>`/`<head>`/`<body>`.
    Document,
    /// Fragment parse: no implied document structure.
    Fragment,
}

impl MarkupParser {
    const CHAIN: [MarkupParser; 2] = [MarkupParser::Document, MarkupParser::Fragment];

    /// Parse `text`, treating a parser panic as a failed parse.
    fn parse(self, text: &str) -> Option<Html> {
        panic::catch_unwind(AssertUnwindSafe(|| match self {
            Self::Document => Html::parse_document(text),
            Self::Fragment => Html::parse_fragment(text),
        }))
        .ok()
    }
}

// ---------------------------------------------------------------------------
// Normalizer
// ---------------------------------------------------------------------------

/// Convert arbitrary markup into collapsed plain text.
///
/// Bytes are decoded as UTF-8 with invalid sequences discarded. The result is
/// either `""` or a string with no leading/trailing whitespace, no internal
/// whitespace runs, and no script/style/noscript content.
#[instrument(skip_all)]
pub fn normalize<'a>(input: impl Into<MarkupInput<'a>>) -> String {
    let decoded;
    let text = match input.into() {
        MarkupInput::Text(text) => text,
        MarkupInput::Bytes(bytes) => {
            decoded = decode_utf8_dropping_invalid(bytes);
            decoded.as_str()
        }
        MarkupInput::Unsupported => return String::new(),
    };

    if text.trim().is_empty() {
        return String::new();
    }

    for parser in MarkupParser::CHAIN {
        match parser.parse(text) {
            Some(doc) => return collapse_whitespace(&extract_text(&doc)),
            None => debug!(?parser, "markup parser failed, trying next"),
        }
    }

    debug!("no markup parser succeeded, returning empty text");
    String::new()
}

/// Decode UTF-8, dropping invalid sequences instead of replacing them.
fn decode_utf8_dropping_invalid(bytes: &[u8]) -> String {
    bytes.utf8_chunks().map(|chunk| chunk.valid()).collect()
}

/// Join the stripped text fragments of the body (or the whole tree) with spaces.
fn extract_text(doc: &Html) -> String {
    static BODY_SEL: LazyLock<Selector> =
        LazyLock::new(|| Selector::parse("body").expect("valid selector"));

    let container: ElementRef<'_> = doc
        .select(&BODY_SEL)
        .next()
        .unwrap_or_else(|| doc.root_element());

    container
        .descendants()
        .filter_map(|node| {
            let text = node.value().as_text()?;
            let skipped = node.ancestors().any(|ancestor| {
                ancestor
                    .value()
                    .as_element()
                    .is_some_and(|el| SKIPPED_ELEMENTS.contains(&el.name()))
            });
            (!skipped).then(|| text.trim())
        })
        .filter(|fragment| !fragment.is_empty())
        .collect::<Vec<_>>()
        .join(" ")
}

/// Collapse every whitespace run to one space and trim the ends.
fn collapse_whitespace(text: &str) -> String {
    static WS_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\s+").expect("valid regex"));
    WS_RE.replace_all(text, " ").trim().to_string()
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
