//! Raw-wire parsing of the AI provider's API traffic: JSON and SSE response
//! bodies, usage merge semantics, token estimation, and text truncation.
//! Consumed by the wrapper's HTTP proxy.

pub mod estimate;
pub mod response;
pub mod sse;
pub mod truncate;
pub mod usage;

pub use estimate::{estimate_tokens, InputTokenSource};
pub use response::{parse_json_response, ParsedResponse, ToolUseBlock};
pub use sse::parse_sse_response;
pub use truncate::truncate_for_span;
pub use usage::RawUsage;

/// Content-type sniffing for the SSE-vs-JSON response-parsing branch.
pub fn is_event_stream_content_type(content_type: &str) -> bool {
    content_type
        .split(';')
        .next()
        .map(|mime| mime.trim().eq_ignore_ascii_case("text/event-stream"))
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recognizes_event_stream_content_type_with_charset_suffix() {
        assert!(is_event_stream_content_type("text/event-stream; charset=utf-8"));
        assert!(!is_event_stream_content_type("application/json"));
    }
}
