//! Koog line protocol.
//!
//! The completion stream is newline-delimited JSON, one object per line:
//!
//! ```text
//! {"type":"text","content":"Let me look at that file."}
//! {"type":"tool","name":"view_file","arguments":{"path":"src/lib.rs"}}
//! ```
//!
//! Models do not always comply, so a line that does not start with `{` is
//! taken as plain text, and a malformed object line is logged and dropped.

use super::sanitize::sanitize_json_line;
use crate::agents::accumulator::json_to_flat_string;
use crate::agents::line_buffer::LineBuffer;
use indexmap::IndexMap;
use serde_json::Value;

/// One parsed line of the Koog stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KoogEvent {
    Text(String),
    Tool {
        name: String,
        arguments: IndexMap<String, String>,
    },
}

/// Frames a chunked completion stream and emits [`KoogEvent`]s in order.
pub struct KoogFramer<F: FnMut(KoogEvent)> {
    lines: LineBuffer,
    on_event: F,
}

impl<F: FnMut(KoogEvent)> KoogFramer<F> {
    pub fn new(on_event: F) -> Self {
        Self {
            lines: LineBuffer::new(),
            on_event,
        }
    }

    pub fn append(&mut self, chunk: &str) {
        let on_event = &mut self.on_event;
        self.lines.push_str(chunk, |line| emit(line, &mut *on_event));
    }

    pub fn append_bytes(&mut self, chunk: &[u8]) {
        let on_event = &mut self.on_event;
        self.lines.push_bytes(chunk, |line| emit(line, &mut *on_event));
    }

    /// Flush a final line that had no trailing newline.
    pub fn finish(&mut self) {
        let on_event = &mut self.on_event;
        self.lines.finish(|line| emit(line, &mut *on_event));
    }
}

fn emit(line: &str, on_event: &mut impl FnMut(KoogEvent)) {
    if let Some(event) = parse_line(line) {
        on_event(event);
    }
}

/// Parse one trimmed, non-empty line.
pub fn parse_line(line: &str) -> Option<KoogEvent> {
    if !line.starts_with('{') {
        return Some(KoogEvent::Text(line.to_string()));
    }

    let value: Value = match serde_json::from_str(&sanitize_json_line(line)) {
        Ok(value) => value,
        Err(err) => {
            log::warn!("[koog] Dropping undecodable line ({err}): {line}");
            return None;
        }
    };
    let Some(object) = value.as_object() else {
        log::warn!("[koog] Dropping non-object line: {line}");
        return None;
    };

    match object.get("type").and_then(Value::as_str) {
        Some("text") => match object.get("content").and_then(Value::as_str) {
            Some(content) => Some(KoogEvent::Text(content.replace("\\n", "\n"))),
            None => {
                log::warn!("[koog] Text line without content: {line}");
                None
            }
        },
        Some("tool") => {
            let Some(name) = object.get("name").and_then(Value::as_str) else {
                log::warn!("[koog] Tool line without name: {line}");
                return None;
            };
            let arguments = object
                .get("arguments")
                .or_else(|| object.get("args"))
                .and_then(Value::as_object)
                .map(|args| {
                    args.iter()
                        .map(|(key, value)| (key.clone(), json_to_flat_string(value)))
                        .collect()
                })
                .unwrap_or_default();
            Some(KoogEvent::Tool {
                name: name.to_string(),
                arguments,
            })
        }
        other => {
            log::warn!("[koog] Unrecognized line type {other:?}: {line}");
            None
        }
    }
}
