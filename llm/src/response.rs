//! Non-streaming Anthropic Messages API JSON response parsing.
//!
//! Parses the raw `serde_json::Value` rather than a typed client SDK: the
//! proxy only ever sees bytes off the wire, so there's no request-building
//! client object to hang a typed response off of. Walks the `content`
//! array and matches on block `type`, applied here to a single Messages
//! API response body.

use serde_json::Value;

use crate::usage::RawUsage;

#[derive(Clone, Debug, PartialEq)]
pub struct ToolUseBlock {
    pub id: String,
    pub name: String,
    pub input: Value,
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct ParsedResponse {
    pub model: Option<String>,
    pub usage: RawUsage,
    pub text: String,
    pub tool_uses: Vec<ToolUseBlock>,
}

/// Parses a complete (non-streaming) Messages API JSON response body.
pub fn parse_json_response(body: &[u8]) -> Result<ParsedResponse, serde_json::Error> {
    let doc: Value = serde_json::from_slice(body)?;
    let mut parsed = ParsedResponse {
        model: doc.get("model").and_then(|v| v.as_str()).map(String::from),
        ..Default::default()
    };

    if let Some(usage) = doc.get("usage") {
        parsed.usage = serde_json::from_value(usage.clone()).unwrap_or_default();
    }

    if let Some(blocks) = doc.get("content").and_then(|v| v.as_array()) {
        extract_content_blocks(blocks, &mut parsed);
    }

    Ok(parsed)
}

pub(crate) fn extract_content_blocks(blocks: &[Value], parsed: &mut ParsedResponse) {
    for block in blocks {
        match block.get("type").and_then(|v| v.as_str()) {
            Some("text") => {
                if let Some(text) = block.get("text").and_then(|v| v.as_str()) {
                    parsed.text.push_str(text);
                }
            }
            Some("tool_use") => {
                let id = block.get("id").and_then(|v| v.as_str()).unwrap_or("").to_string();
                let name = block
                    .get("name")
                    .and_then(|v| v.as_str())
                    .unwrap_or("")
                    .to_string();
                let input = block.get("input").cloned().unwrap_or(Value::Null);
                parsed.tool_uses.push(ToolUseBlock { id, name, input });
            }
            _ => {}
        }
    }
}
