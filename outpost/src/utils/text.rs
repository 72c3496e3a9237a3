//! Text helpers for failure messages.
//!
//! Error messages often carry fragments of upstream HTTP error bodies, and
//! they end up rendered in operator views, so they are reduced to plain text
//! before being stored.

use std::sync::LazyLock;

use regex::Regex;

/// Maximum stored length of a failure message, in characters.
pub const MAX_MESSAGE_CHARS: usize = 2000;

static SCRIPT_STYLE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?is)<(script|style)\b[^>]*>.*?</(script|style)\s*>").expect("valid regex")
});
static TAG_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)<[^>]*>").expect("valid regex"));
static WHITESPACE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\s+").expect("valid regex"));

fn decode_entities(input: &str) -> String {
    input
        .replace("&nbsp;", " ")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&#39;", "'")
        .replace("&#x27;", "'")
        .replace("&amp;", "&")
}

/// Truncate to at most `max_chars` characters on a char boundary.
pub fn truncate_chars(input: &str, max_chars: usize) -> &str {
    match input.char_indices().nth(max_chars) {
        Some((idx, _)) => &input[..idx],
        None => input,
    }
}

/// Strip markup from a failure message, collapse whitespace, trim and cap
/// its length.
///
/// Entities are decoded after tags are removed, and any angle brackets that
/// decoding produced are dropped, so the result never contains markup.
pub fn sanitize_message(input: &str) -> String {
    let without_blocks = SCRIPT_STYLE_RE.replace_all(input, " ");
    let without_tags = TAG_RE.replace_all(&without_blocks, " ");
    let decoded = decode_entities(&without_tags).replace(['<', '>'], "");
    let collapsed = WHITESPACE_RE.replace_all(&decoded, " ");

    truncate_chars(collapsed.trim(), MAX_MESSAGE_CHARS)
        .trim_end()
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_strips_tags_and_collapses_whitespace() {
        let raw = "<html><body>\n  <h1>502 Bad Gateway</h1>\n<p>upstream   timed out</p></body></html>";
        assert_eq!(sanitize_message(raw), "502 Bad Gateway upstream timed out");
    }

    #[test]
    fn test_drops_script_contents() {
        let raw = "error<script>alert('x')</script> happened";
        assert_eq!(sanitize_message(raw), "error happened");
    }

    #[test]
    fn test_encoded_markup_does_not_survive() {
        let raw = "bad token &lt;b&gt;abc&lt;/b&gt; &amp; more";
        let cleaned = sanitize_message(raw);
        assert!(!cleaned.contains('<'));
        assert!(!cleaned.contains('>'));
        assert!(cleaned.contains("& more"));
    }

    #[test]
    fn test_truncates_on_char_boundary() {
        let raw = "é".repeat(MAX_MESSAGE_CHARS + 50);
        let cleaned = sanitize_message(&raw);
        assert_eq!(cleaned.chars().count(), MAX_MESSAGE_CHARS);
    }

    #[test]
    fn test_plain_message_is_trimmed() {
        assert_eq!(sanitize_message("  rate limited \n"), "rate limited");
        assert_eq!(sanitize_message(""), "");
    }
}
