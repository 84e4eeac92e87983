//! Prompt/response truncation.

pub const MAX_SPAN_TEXT_CHARS: usize = 10_000;
const TRUNCATION_MARKER: &str = "...[truncated]";

/// Truncates `text` to [`MAX_SPAN_TEXT_CHARS`] characters, appending a
/// visible marker when truncation actually occurred.
pub fn truncate_for_span(text: &str) -> String {
    if text.chars().count() <= MAX_SPAN_TEXT_CHARS {
        return text.to_string();
    }
    let head: String = text.chars().take(MAX_SPAN_TEXT_CHARS).collect();
    format!("{head}{TRUNCATION_MARKER}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn short_text_is_untouched() {
        assert_eq!(truncate_for_span("hello"), "hello");
    }

    #[test]
    fn long_text_is_truncated_with_visible_marker() {
        let text = "a".repeat(MAX_SPAN_TEXT_CHARS + 500);
        let truncated = truncate_for_span(&text);
        assert!(truncated.ends_with(TRUNCATION_MARKER));
        assert!(truncated.len() < text.len());
    }

    #[test]
    fn exact_boundary_length_is_not_marked() {
        let text = "a".repeat(MAX_SPAN_TEXT_CHARS);
        assert_eq!(truncate_for_span(&text), text);
    }
}
