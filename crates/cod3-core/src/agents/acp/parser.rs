//! `session/update` notifications mapped onto the shared event model.

use super::types::SessionUpdate;
use crate::agents::accumulator::ToolEventUpdate;
use crate::agents::event::ToolCallStatus;
use serde_json::Value;

/// What one `session/update` means for the turn.
#[derive(Debug, Clone, PartialEq)]
pub enum AcpUpdate {
    Content(String),
    Tool(ToolEventUpdate),
    Ignore,
}

/// Interpret the params of a `session/update` notification.
pub fn parse_session_update(params: &Value) -> AcpUpdate {
    // ACP nests the update under params.update.
    let update_value = params.get("update").unwrap_or(params);
    let update: SessionUpdate = match serde_json::from_value(update_value.clone()) {
        Ok(update) => update,
        Err(err) => {
            log::warn!("[acp] Malformed session/update ({err}): {update_value}");
            return AcpUpdate::Ignore;
        }
    };

    match update.get_type() {
        Some("agent_message_chunk") => {
            let text = update
                .content
                .as_ref()
                .map(content_texts)
                .unwrap_or_default()
                .concat();
            if text.is_empty() {
                AcpUpdate::Ignore
            } else {
                AcpUpdate::Content(text)
            }
        }
        Some("tool_call") | Some("tool_call_update") => tool_update(&update),
        Some("agent_thought_chunk") => {
            log::debug!("[acp] Thought chunk skipped");
            AcpUpdate::Ignore
        }
        Some(other) => {
            log::debug!("[acp] Ignoring session update {other}");
            AcpUpdate::Ignore
        }
        None => {
            log::warn!("[acp] session/update without type: {update_value}");
            AcpUpdate::Ignore
        }
    }
}

fn tool_update(update: &SessionUpdate) -> AcpUpdate {
    let Some(id) = update.tool_call_id.as_deref() else {
        log::warn!("[acp] Tool update without toolCallId");
        return AcpUpdate::Ignore;
    };

    let mut event = ToolEventUpdate::new(id);
    if let Some(status) = update.status.as_deref() {
        event = event.status(ToolCallStatus::parse(status));
    }
    if let Some(title) = update.title.as_deref() {
        event = event.title(title);
    }
    if let Some(input) = update.get_input() {
        event = event.raw_input(input.clone());
    }
    if let Some(output) = update.get_output() {
        event = event.raw_output(output.clone());
    }
    if let Some(content) = &update.content {
        event.content = content_texts(content);
    }
    AcpUpdate::Tool(event)
}

/// Text carried by an ACP content block or a list of tool-call contents.
///
/// Tool-call contents wrap blocks as `{"type":"content","content":{...}}`;
/// diffs are summarized by path.
pub fn content_texts(content: &Value) -> Vec<String> {
    match content {
        Value::Array(items) => items.iter().flat_map(content_texts).collect(),
        Value::Object(block) => {
            match block.get("type").and_then(Value::as_str) {
                Some("content") => {
                    return block.get("content").map(content_texts).unwrap_or_default()
                }
                Some("diff") => {
                    let path = block.get("path").and_then(Value::as_str).unwrap_or("file");
                    return vec![format!("Edited {path}")];
                }
                _ => {}
            }
            ["text", "output"]
                .iter()
                .find_map(|key| block.get(*key).and_then(Value::as_str))
                .map(|text| vec![text.to_string()])
                .unwrap_or_default()
        }
        Value::String(text) => vec![text.clone()],
        _ => Vec::new(),
    }
}
