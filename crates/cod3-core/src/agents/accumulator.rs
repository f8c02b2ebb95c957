//! Tool-call accumulation keyed by tool-call id.
//!
//! Protocols report a tool call in pieces: a name in one update, arguments
//! in the next, streamed output after that, a status at the end. The
//! accumulator merges those pieces into one [`ToolCallState`] per id and
//! hands out snapshots. Once a call reaches a terminal status its entry is
//! evicted and the id is closed for the rest of the turn.
//!
//! One accumulator belongs to one turn and is owned by that turn's task.

use crate::agents::event::{ToolCallSnapshot, ToolCallStatus};
use indexmap::IndexMap;
use serde_json::{Map, Value};
use std::collections::{HashMap, HashSet};

/// Argument key under which streamed tool output is collected.
pub const CONTENT_ARGUMENT: &str = "content";

/// One partial update for a tool call.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ToolEventUpdate {
    pub id: String,
    pub status: Option<ToolCallStatus>,
    /// Display name supplied outside `raw_input` (ACP `title`).
    pub title: Option<String>,
    pub raw_input: Option<Value>,
    pub raw_output: Option<Value>,
    pub content: Vec<String>,
}

impl ToolEventUpdate {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            ..Self::default()
        }
    }

    pub fn status(mut self, status: ToolCallStatus) -> Self {
        self.status = Some(status);
        self
    }

    pub fn title(mut self, title: impl Into<String>) -> Self {
        self.title = Some(title.into());
        self
    }

    pub fn raw_input(mut self, value: Value) -> Self {
        self.raw_input = Some(value);
        self
    }

    pub fn raw_output(mut self, value: Value) -> Self {
        self.raw_output = Some(value);
        self
    }

    pub fn content(mut self, chunk: impl Into<String>) -> Self {
        self.content.push(chunk.into());
        self
    }
}

/// Mutable state of one in-flight tool call.
#[derive(Debug, Clone, Default)]
pub struct ToolCallState {
    id: String,
    name: Option<String>,
    arguments: IndexMap<String, String>,
    status: ToolCallStatus,
    output: Vec<String>,
}

impl ToolCallState {
    fn new(id: &str) -> Self {
        Self {
            id: id.to_string(),
            ..Self::default()
        }
    }

    pub fn snapshot(&self) -> ToolCallSnapshot {
        ToolCallSnapshot {
            id: self.id.clone(),
            name: self.name.clone(),
            arguments: self.arguments.clone(),
            status: self.status,
            output: self.output.clone(),
        }
    }

    fn merge(&mut self, update: &ToolEventUpdate) {
        if self.name.is_none() {
            if let Some(title) = update.title.as_deref().filter(|t| !t.trim().is_empty()) {
                self.name = Some(title.to_string());
            }
        }
        if let Some(input) = &update.raw_input {
            self.merge_raw(input, true);
        }

        let block = update.content.join("\n");
        let block = block.trim();
        if !block.is_empty() {
            self.output.push(block.to_string());
            match self.arguments.get_mut(CONTENT_ARGUMENT) {
                Some(existing) if !existing.is_empty() => {
                    existing.push('\n');
                    existing.push_str(block);
                }
                _ => {
                    self.arguments
                        .insert(CONTENT_ARGUMENT.to_string(), block.to_string());
                }
            }
        }

        if let Some(output) = &update.raw_output {
            if output.is_object() {
                self.merge_raw(output, false);
            } else if !output.is_null() {
                self.output.push(json_to_flat_string(output));
            }
        }

        if let Some(status) = update.status {
            self.status = status;
        }
    }

    /// Fold a raw input/output object into the arguments map.
    fn merge_raw(&mut self, raw: &Value, update_name: bool) {
        let Value::Object(map) = raw else {
            log::debug!("[tool {}] Ignoring non-object payload: {}", self.id, raw);
            return;
        };
        if update_name {
            if let Some(name) = map.get("name").and_then(Value::as_str) {
                self.name = Some(name.to_string());
            }
        }

        self.arguments.extend(raw_arguments(map));
    }
}

/// Arguments carried by a raw tool payload: the nested `arguments` (or
/// `args`) object when present, otherwise every field except `name`.
pub fn raw_arguments(map: &Map<String, Value>) -> IndexMap<String, String> {
    let nested = map
        .get("arguments")
        .or_else(|| map.get("args"))
        .and_then(Value::as_object);
    match nested {
        Some(arguments) => arguments
            .iter()
            .map(|(key, value)| (key.clone(), json_to_flat_string(value)))
            .collect(),
        None => map
            .iter()
            .filter(|(key, _)| key.as_str() != "name")
            .map(|(key, value)| (key.clone(), json_to_flat_string(value)))
            .collect(),
    }
}

/// Merges partial tool-call updates for one turn.
#[derive(Debug, Default)]
pub struct ToolCallAccumulator {
    active: HashMap<String, ToolCallState>,
    finished: HashSet<String>,
}

impl ToolCallAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Apply one update and return the resulting snapshot and whether it is
    /// final.
    ///
    /// Returns `None` for an id that already reached a terminal status.
    pub fn on_tool_event(&mut self, update: ToolEventUpdate) -> Option<(ToolCallSnapshot, bool)> {
        if self.finished.contains(&update.id) {
            log::warn!(
                "[tool {}] Update after final status ignored (status {:?})",
                update.id,
                update.status
            );
            return None;
        }

        let state = self
            .active
            .entry(update.id.clone())
            .or_insert_with(|| ToolCallState::new(&update.id));
        state.merge(&update);
        let snapshot = state.snapshot();

        let is_final = snapshot.status.is_terminal();
        if is_final {
            self.active.remove(&update.id);
            self.finished.insert(update.id);
        }
        Some((snapshot, is_final))
    }

    pub fn is_active(&self, id: &str) -> bool {
        self.active.contains_key(id)
    }

    pub fn active_count(&self) -> usize {
        self.active.len()
    }

    /// Drop every call that never reached a terminal status.
    ///
    /// Used when a turn is cancelled; the returned ids are for logging.
    pub fn drain_unfinished(&mut self) -> Vec<String> {
        let mut ids: Vec<String> = self.active.drain().map(|(id, _)| id).collect();
        ids.sort();
        ids
    }
}

/// Coerce a JSON value into the flat string form used for tool arguments.
///
/// Strings are taken raw, other primitives as their literal, objects as
/// compact JSON, arrays as `[a, b]` with each element coerced the same way.
pub fn json_to_flat_string(value: &Value) -> String {
    match value {
        Value::String(text) => text.clone(),
        Value::Array(items) => {
            let items: Vec<String> = items.iter().map(json_to_flat_string).collect();
            format!("[{}]", items.join(", "))
        }
        Value::Null | Value::Bool(_) | Value::Number(_) | Value::Object(_) => value.to_string(),
    }
}
