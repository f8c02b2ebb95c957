//! Scripted stand-in for an ACP agent, for tests.
//!
//! The agent is a `sh` loop that matches each incoming line against `case`
//! patterns. It always answers `initialize` and `session/new`; callers add
//! their own cases in front, with `$id` holding the request id of the
//! current line.

use crate::config::LaunchSpec;
use std::path::Path;

const PROLOGUE: &str = r#"#!/bin/sh
while IFS= read -r line; do
  id=$(printf '%s\n' "$line" | sed -n 's/.*"id":\([0-9][0-9]*\).*/\1/p')
  case "$line" in
"#;

const HANDSHAKE: &str = r#"
    *'"method":"initialize"'*)
      printf '{"jsonrpc":"2.0","id":%s,"result":{"protocolVersion":1}}\n' "$id" ;;
    *'"method":"session/new"'*)
      printf '{"jsonrpc":"2.0","id":%s,"result":{"sessionId":"fake-1"}}\n' "$id" ;;
"#;

/// Write the agent script into `root` and return a spec that runs it with
/// `root` as session root.
pub(crate) fn script_agent(root: &Path, cases: &str) -> LaunchSpec {
    let body = format!("{PROLOGUE}{cases}{HANDSHAKE}  esac\ndone\n");
    let path = root.join("agent.sh");
    std::fs::write(&path, body).expect("write fake agent");
    launch_spec(root, vec!["sh".to_string(), path.display().to_string()])
}

/// An agent that only completes the handshake.
pub(crate) fn idle_agent(root: &Path) -> LaunchSpec {
    script_agent(root, "")
}

pub(crate) fn launch_spec(root: &Path, command: Vec<String>) -> LaunchSpec {
    LaunchSpec {
        command,
        working_dir: None,
        session_root: root.to_path_buf(),
    }
}
