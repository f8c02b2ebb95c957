//! System prompt that teaches the model the line protocol.

use crate::tools::catalogue;
use std::path::Path;

const PROTOCOL: &str = r#"You are a coding assistant working inside the user's project.

Answer with one JSON object per line and nothing else:
{"type":"text","content":"<text for the user>"}
{"type":"tool","name":"<tool name>","arguments":{"<argument>":"<value>"}}

Write "\n" inside content for line breaks. Tool calls run after your answer
is complete, so do not wait for their results.
"#;

/// Protocol description, tool list and project root.
pub fn system_prompt(root: &Path) -> String {
    format!(
        "{PROTOCOL}\nTools:\n{}\nPaths are relative to the project root {}.\n",
        catalogue(),
        root.display()
    )
}
