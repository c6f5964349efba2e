//! Text normalization and fuzzy matching for post-send verification.

use std::collections::HashSet;

/// Token overlap accepted when matching against transcript text.
pub const TRANSCRIPT_MATCH_THRESHOLD: f64 = 0.6;

/// Token overlap accepted when matching against recognized screenshot text.
pub const IMAGE_MATCH_THRESHOLD: f64 = 0.5;

/// Lowercases, strips punctuation (apostrophes included) and collapses whitespace.
///
/// `"Yo, what's   up?"` becomes `"yo whats up"`.
pub fn normalize(text: &str) -> String {
	let stripped: String = text
		.chars()
		.filter(|c| c.is_alphanumeric() || c.is_whitespace())
		.flat_map(char::to_lowercase)
		.collect();
	stripped.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Fraction of the tokens of `expected` that also occur in `observed`, after normalization.
pub fn token_overlap(expected: &str, observed: &str) -> f64 {
	let expected = normalize(expected);
	let observed = normalize(observed);
	let wanted: Vec<&str> = expected.split(' ').filter(|t| !t.is_empty()).collect();
	if wanted.is_empty() {
		return 0.0;
	}
	let seen: HashSet<&str> = observed.split(' ').collect();
	let hits = wanted.iter().filter(|token| seen.contains(*token)).count();
	hits as f64 / wanted.len() as f64
}

/// Returns `true` when `observed` contains enough of `expected`.
pub fn matches(expected: &str, observed: &str, threshold: f64) -> bool {
	token_overlap(expected, observed) >= threshold
}
