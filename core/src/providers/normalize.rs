use crate::traits::{ChatResponse, Message, ToolCall};

const TOOL_CALL_OPEN_TAG: &str = "<tool_call>";
const TOOL_CALL_CLOSE_TAG: &str = "</tool_call>";

/// Turns a backend response into the single assistant message the loop
/// inspects. Models without native tool calling may still emit
/// `<tool_call>{"name": .., "arguments": {..}}</tool_call>` blocks; those are
/// lifted into tool calls.
pub fn normalize_response(response: ChatResponse) -> Message {
    let text = response.text.unwrap_or_default();

    if !response.tool_calls.is_empty() {
        return Message::assistant_with_tool_calls(text, response.tool_calls);
    }

    let (text, tool_calls) = parse_tool_calls_fallback(&text);
    Message::assistant_with_tool_calls(text, tool_calls)
}

/// Fallback for tool calls embedded in text. Returns the text with the
/// blocks removed, plus the parsed calls. Unterminated blocks are kept as text.
pub fn parse_tool_calls_fallback(response: &str) -> (String, Vec<ToolCall>) {
    if !response.contains(TOOL_CALL_OPEN_TAG) {
        return (response.to_string(), vec![]);
    }

    let mut text_parts = Vec::new();
    let mut calls = Vec::new();
    let mut remaining = response;

    while let Some(start) = remaining.find(TOOL_CALL_OPEN_TAG) {
        let after_open = &remaining[start + TOOL_CALL_OPEN_TAG.len()..];
        let Some(close_idx) = after_open.find(TOOL_CALL_CLOSE_TAG) else {
            break;
        };

        let before = &remaining[..start];
        if !before.trim().is_empty() {
            text_parts.push(before.trim().to_string());
        }

        for value in extract_json_values(&after_open[..close_idx]) {
            if let Some(call) = parse_tool_call_value(&value, calls.len()) {
                calls.push(call);
            }
        }

        remaining = &after_open[close_idx + TOOL_CALL_CLOSE_TAG.len()..];
    }

    if !remaining.trim().is_empty() {
        text_parts.push(remaining.trim().to_string());
    }

    (text_parts.join("\n"), calls)
}

fn extract_json_values(text: &str) -> Vec<serde_json::Value> {
    let mut values = Vec::new();
    let mut depth = 0usize;
    let mut start = None;
    let mut in_string = false;
    let mut escape_next = false;

    for (i, ch) in text.char_indices() {
        if escape_next {
            escape_next = false;
            continue;
        }
        match ch {
            '\\' if in_string => escape_next = true,
            '"' => in_string = !in_string,
            '{' if !in_string => {
                if depth == 0 {
                    start = Some(i);
                }
                depth += 1;
            }
            '}' if !in_string && depth > 0 => {
                depth -= 1;
                if depth == 0 {
                    if let Some(s) = start
                        && let Ok(value) = serde_json::from_str::<serde_json::Value>(&text[s..=i])
                    {
                        values.push(value);
                    }
                    start = None;
                }
            }
            _ => {}
        }
    }

    values
}

/// `index` is the call's position in the response, so repeated identical
/// blocks still get distinct ids.
fn parse_tool_call_value(value: &serde_json::Value, index: usize) -> Option<ToolCall> {
    let name = value.get("name")?.as_str()?.to_string();
    let arguments = value
        .get("arguments")
        .cloned()
        .unwrap_or_else(|| serde_json::json!({}));
    let arguments_str = serde_json::to_string(&arguments).ok()?;
    let digest = md5::compute(format!("{}:{}:{}", index, name, arguments_str).as_bytes());

    Some(ToolCall {
        id: format!("call_{:x}", digest),
        name,
        arguments: arguments_str,
    })
}
