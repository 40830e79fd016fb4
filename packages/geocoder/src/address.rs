//! Address normalization for cache keys and provider queries.
//!
//! Listing addresses arrive in many shapes:
//! - Mixed case and stray whitespace: `"  12  Adeola Odeku St. "`
//! - Trailing punctuation: `"Victoria Island,"`
//! - Placeholder values from incomplete listings: `"N/A"`, `"TBD"`
//!
//! Cache keys must be identical for inputs that differ only in these
//! respects.

use regex::Regex;
use std::sync::LazyLock;

/// Runs of whitespace.
static WHITESPACE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\s+").expect("valid regex"));

/// Whitespace before a comma, and repeated commas.
static COMMA_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\s*,[\s,]*").expect("valid regex"));

/// Placeholder addresses that are never worth sending to a provider.
static SKIP_PATTERNS: &[&str] = &[
    "unknown",
    "n/a",
    "na",
    "none",
    "tbd",
    "not available",
    "address withheld",
];

/// Normalizes an address into its cache key form: lower-cased, trimmed,
/// whitespace collapsed, commas tidied and trailing punctuation removed.
#[must_use]
pub fn normalize_address(raw: &str) -> String {
    let lower = raw.trim().to_lowercase();
    let collapsed = WHITESPACE_RE.replace_all(&lower, " ");
    let commas = COMMA_RE.replace_all(&collapsed, ", ");
    commas
        .trim_matches(|c: char| c.is_whitespace() || matches!(c, ',' | '.' | ';'))
        .to_string()
}

/// Whether an address has any chance of being resolved by a provider.
#[must_use]
pub fn is_geocodable(raw: &str) -> bool {
    let normalized = normalize_address(raw);
    !normalized.is_empty() && !SKIP_PATTERNS.contains(&normalized.as_str())
}

/// Appends the country name unless the address already mentions it.
#[must_use]
pub fn qualify_with_country(address: &str, country_name: &str) -> String {
    if address.to_lowercase().contains(&country_name.to_lowercase()) {
        address.trim().to_string()
    } else {
        format!("{}, {country_name}", address.trim().trim_end_matches(','))
    }
}
