//! Server-sent-event response parsing.
//!
//! Events are read line by line rather than through a generic SSE client
//! crate: the provider's stream is simple enough (one `data:` line per
//! event, a literal `[DONE]` terminator, no retry/id fields we care about)
//! that a dedicated parser keeps the usage-merge semantics explicit and
//! testable, instead of hidden inside a library's event-reassembly state
//! machine.

use std::collections::HashMap;

use serde_json::Value;

use crate::response::{ParsedResponse, ToolUseBlock};
use crate::usage::RawUsage;

const DONE_MARKER: &str = "[DONE]";

/// A `tool_use` block seen at `content_block_start`, whose `input` arrives
/// afterward as a sequence of `input_json_delta`/`partial_json` fragments
/// rather than all at once. Kept per content-block index since multiple
/// tool_use blocks can be open across a single response.
struct PendingToolUse {
    id: String,
    name: String,
    partial_json: String,
}

/// Parses an SSE body into the same shape a non-streaming JSON response
/// would produce, applying the usage-merge policy across `message_start`
/// and `message_delta` events, concatenating `content_block_delta` text
/// deltas in arrival order, and reassembling each `tool_use` block's
/// `input` from its streamed `partial_json` fragments.
pub fn parse_sse_response(body: &str) -> ParsedResponse {
    let mut parsed = ParsedResponse::default();
    let mut usage = RawUsage::default();
    let mut pending_tool_uses: HashMap<u64, PendingToolUse> = HashMap::new();

    for line in body.lines() {
        let Some(data) = line.strip_prefix("data:") else {
            continue;
        };
        let data = data.trim();
        if data.is_empty() || data == DONE_MARKER {
            continue;
        }
        let Ok(event) = serde_json::from_str::<Value>(data) else {
            continue;
        };
        handle_event(&event, &mut parsed, &mut usage, &mut pending_tool_uses);
    }

    parsed.usage = usage;
    parsed
}

fn handle_event(
    event: &Value,
    parsed: &mut ParsedResponse,
    usage: &mut RawUsage,
    pending_tool_uses: &mut HashMap<u64, PendingToolUse>,
) {
    let index = event.get("index").and_then(|v| v.as_u64()).unwrap_or(0);
    match event.get("type").and_then(|v| v.as_str()) {
        Some("message_start") => {
            if let Some(message) = event.get("message") {
                if parsed.model.is_none() {
                    parsed.model = message.get("model").and_then(|v| v.as_str()).map(String::from);
                }
                if let Some(message_usage) = message.get("usage") {
                    merge_raw(usage, message_usage);
                }
            }
        }
        Some("content_block_start") => {
            if let Some(block) = event.get("content_block") {
                if block.get("type").and_then(|v| v.as_str()) == Some("tool_use") {
                    let id = block.get("id").and_then(|v| v.as_str()).unwrap_or("").to_string();
                    let name = block.get("name").and_then(|v| v.as_str()).unwrap_or("").to_string();
                    // The non-streaming-shaped `input` at block start is
                    // either absent or `{}`; the real arguments stream in
                    // afterward as `input_json_delta` fragments.
                    let partial_json = match block.get("input") {
                        Some(Value::Object(map)) if !map.is_empty() => {
                            serde_json::to_string(&Value::Object(map.clone())).unwrap_or_default()
                        }
                        _ => String::new(),
                    };
                    pending_tool_uses.insert(index, PendingToolUse { id, name, partial_json });
                }
            }
        }
        Some("content_block_delta") => {
            if let Some(delta) = event.get("delta") {
                match delta.get("type").and_then(|v| v.as_str()) {
                    Some("input_json_delta") => {
                        if let Some(fragment) = delta.get("partial_json").and_then(|v| v.as_str()) {
                            if let Some(pending) = pending_tool_uses.get_mut(&index) {
                                pending.partial_json.push_str(fragment);
                            }
                        }
                    }
                    _ => {
                        if let Some(text) = delta.get("text").and_then(|v| v.as_str()) {
                            parsed.text.push_str(text);
                        }
                    }
                }
            }
        }
        Some("content_block_stop") => {
            if let Some(pending) = pending_tool_uses.remove(&index) {
                let input = if pending.partial_json.trim().is_empty() {
                    Value::Object(serde_json::Map::new())
                } else {
                    serde_json::from_str(&pending.partial_json).unwrap_or(Value::Null)
                };
                parsed.tool_uses.push(ToolUseBlock {
                    id: pending.id,
                    name: pending.name,
                    input,
                });
            }
        }
        Some("message_delta") => {
            if let Some(delta_usage) = event.get("usage") {
                merge_raw(usage, delta_usage);
            }
        }
        _ => {}
    }
}

fn merge_raw(usage: &mut RawUsage, value: &Value) {
    if let Ok(update) = serde_json::from_value::<RawUsage>(value.clone()) {
        usage.merge(&update);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn accumulates_text_deltas_in_order() {
        let body = concat!(
            "data: {\"type\":\"message_start\",\"message\":{\"model\":\"claude-sonnet-4-5\",\"usage\":{\"input_tokens\":200}}}\n",
            "data: {\"type\":\"content_block_delta\",\"delta\":{\"text\":\"a\"}}\n",
            "data: {\"type\":\"content_block_delta\",\"delta\":{\"text\":\"b\"}}\n",
            "data: {\"type\":\"content_block_delta\",\"delta\":{\"text\":\"c\"}}\n",
            "data: {\"type\":\"message_delta\",\"usage\":{\"output_tokens\":3}}\n",
            "data: [DONE]\n",
        );
        let parsed = parse_sse_response(body);
        assert_eq!(parsed.text, "abc");
        assert_eq!(parsed.usage.input_tokens, Some(200));
        assert_eq!(parsed.usage.output_tokens, Some(3));
        assert_eq!(parsed.model.as_deref(), Some("claude-sonnet-4-5"));
    }

    #[test]
    fn input_tokens_survive_a_later_event_without_them() {
        let body = concat!(
            "data: {\"type\":\"message_start\",\"message\":{\"usage\":{\"input_tokens\":50}}}\n",
            "data: {\"type\":\"message_delta\",\"usage\":{\"output_tokens\":9}}\n",
        );
        let parsed = parse_sse_response(body);
        assert_eq!(parsed.usage.input_tokens, Some(50));
        assert_eq!(parsed.usage.output_tokens, Some(9));
    }

    #[test]
    fn done_marker_and_blank_lines_are_skipped_without_error() {
        let body = "data: [DONE]\n\n";
        let parsed = parse_sse_response(body);
        assert_eq!(parsed.text, "");
    }

    #[test]
    fn tool_use_with_empty_input_is_captured_at_block_stop() {
        let body = concat!(
            "data: {\"type\":\"content_block_start\",\"index\":0,\"content_block\":{\"type\":\"tool_use\",\"id\":\"tu_1\",\"name\":\"bash\",\"input\":{}}}\n",
            "data: {\"type\":\"content_block_stop\",\"index\":0}\n",
        );
        let parsed = parse_sse_response(body);
        assert_eq!(parsed.tool_uses.len(), 1);
        assert_eq!(parsed.tool_uses[0].name, "bash");
        assert_eq!(parsed.tool_uses[0].input, serde_json::json!({}));
    }

    #[test]
    fn tool_use_input_is_reassembled_from_streamed_partial_json() {
        let body = concat!(
            "data: {\"type\":\"content_block_start\",\"index\":0,\"content_block\":{\"type\":\"tool_use\",\"id\":\"tu_2\",\"name\":\"read_file\",\"input\":{}}}\n",
            "data: {\"type\":\"content_block_delta\",\"index\":0,\"delta\":{\"type\":\"input_json_delta\",\"partial_json\":\"{\\\"path\\\":\"}}\n",
            "data: {\"type\":\"content_block_delta\",\"index\":0,\"delta\":{\"type\":\"input_json_delta\",\"partial_json\":\"\\\"/etc/hosts\\\"}\"}}\n",
            "data: {\"type\":\"content_block_stop\",\"index\":0}\n",
        );
        let parsed = parse_sse_response(body);
        assert_eq!(parsed.tool_uses.len(), 1);
        assert_eq!(parsed.tool_uses[0].id, "tu_2");
        assert_eq!(parsed.tool_uses[0].input, serde_json::json!({"path": "/etc/hosts"}));
    }

    #[test]
    fn text_and_tool_use_blocks_at_different_indices_dont_interfere() {
        let body = concat!(
            "data: {\"type\":\"content_block_start\",\"index\":0,\"content_block\":{\"type\":\"text\",\"text\":\"\"}}\n",
            "data: {\"type\":\"content_block_delta\",\"index\":0,\"delta\":{\"type\":\"text_delta\",\"text\":\"hi\"}}\n",
            "data: {\"type\":\"content_block_start\",\"index\":1,\"content_block\":{\"type\":\"tool_use\",\"id\":\"tu_3\",\"name\":\"ls\",\"input\":{}}}\n",
            "data: {\"type\":\"content_block_delta\",\"index\":1,\"delta\":{\"type\":\"input_json_delta\",\"partial_json\":\"{}\"}}\n",
            "data: {\"type\":\"content_block_stop\",\"index\":1}\n",
        );
        let parsed = parse_sse_response(body);
        assert_eq!(parsed.text, "hi");
        assert_eq!(parsed.tool_uses.len(), 1);
        assert_eq!(parsed.tool_uses[0].name, "ls");
    }
}
