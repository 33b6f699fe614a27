//! Small string helpers shared by the extractor and the message formatter.

/// Collapses every run of whitespace into a single space and trims the ends.
pub fn normalize_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Keeps only ASCII digits. Returns `None` when nothing is left.
pub fn digits_only(text: &str) -> Option<String> {
    let digits: String = text.chars().filter(|c| c.is_ascii_digit()).collect();
    if digits.is_empty() {
        None
    } else {
        Some(digits)
    }
}

/// Replaces non-breaking spaces (U+00A0, U+202F) with regular spaces.
pub fn normalize_nbsp(text: &str) -> String {
    text.replace(['\u{a0}', '\u{202f}'], " ")
}

/// Truncates to `limit` characters, appending `...` when anything was cut.
pub fn truncate_chars(text: &str, limit: usize) -> String {
    match text.char_indices().nth(limit) {
        Some((byte_index, _)) => format!("{}...", &text[..byte_index]),
        None => text.to_string(),
    }
}
