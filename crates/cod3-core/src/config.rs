//! Agent settings and launch resolution.
//!
//! Settings come from a JSON file (camelCase keys) with `COD3_*` environment
//! overrides on top, and resolve into a [`LaunchSpec`]: the identity of an
//! agent session.

use crate::approval::PermissionMode;
use crate::error::{AgentError, Result};
use crate::paths;
use crate::shell::split_command_line;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct AgentSettings {
    /// Master switch for the external agent integration.
    pub enabled: bool,
    /// Agent launch command, tokenized like a POSIX shell would.
    pub command: String,
    /// Process working directory; defaults to the session root.
    pub working_directory: Option<String>,
    /// Root the agent session and all tools are confined to.
    pub session_root: Option<String>,
    pub permission_mode: PermissionMode,
    /// Where protocol transcripts go; `None` disables them.
    pub log_dir: Option<String>,
}

impl Default for AgentSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            command: String::new(),
            working_directory: None,
            session_root: None,
            permission_mode: PermissionMode::default(),
            log_dir: None,
        }
    }
}

/// Resolved identity of an agent session.
///
/// Two prompts share a process only when their specs are equal.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct LaunchSpec {
    pub command: Vec<String>,
    pub working_dir: Option<PathBuf>,
    pub session_root: PathBuf,
}

impl LaunchSpec {
    /// Directory the agent process starts in.
    pub fn process_dir(&self) -> &Path {
        self.working_dir.as_deref().unwrap_or(&self.session_root)
    }
}

impl AgentSettings {
    /// Load settings from a JSON file.
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path).map_err(|e| {
            AgentError::Configuration(format!("Cannot read settings {}: {e}", path.display()))
        })?;
        serde_json::from_str(&text).map_err(|e| {
            AgentError::Configuration(format!("Invalid settings {}: {e}", path.display()))
        })
    }

    /// Apply `COD3_*` environment overrides.
    pub fn with_env_overrides(mut self) -> Result<Self> {
        if let Some(value) = env_value("COD3_ENABLED") {
            self.enabled = !matches!(value.to_ascii_lowercase().as_str(), "0" | "false" | "no");
        }
        if let Some(value) = env_value("COD3_AGENT_COMMAND") {
            self.command = value;
        }
        if let Some(value) = env_value("COD3_WORKING_DIR") {
            self.working_directory = Some(value);
        }
        if let Some(value) = env_value("COD3_SESSION_ROOT") {
            self.session_root = Some(value);
        }
        if let Some(value) = env_value("COD3_PERMISSION_MODE") {
            self.permission_mode = value.parse().map_err(AgentError::Configuration)?;
        }
        if let Some(value) = env_value("COD3_LOG_DIR") {
            self.log_dir = Some(value);
        }
        Ok(self)
    }

    /// Session root: explicit override, then the host's project, then the
    /// process working directory.
    pub fn resolve_root(&self, project_base: Option<&Path>) -> PathBuf {
        non_blank(self.session_root.as_deref())
            .map(PathBuf::from)
            .or_else(|| project_base.map(Path::to_path_buf))
            .unwrap_or_else(paths::process_working_dir)
    }

    /// Resolve the launch spec for an ACP session.
    pub fn resolve(&self, project_base: Option<&Path>) -> Result<LaunchSpec> {
        if !self.enabled {
            return Err(AgentError::Configuration(
                "The external agent is disabled in settings.".to_string(),
            ));
        }
        let command = split_command_line(&self.command)?;

        Ok(LaunchSpec {
            command,
            working_dir: non_blank(self.working_directory.as_deref()).map(PathBuf::from),
            session_root: self.resolve_root(project_base),
        })
    }

    pub fn log_dir(&self) -> Option<PathBuf> {
        non_blank(self.log_dir.as_deref()).map(PathBuf::from)
    }
}

fn env_value(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.trim().is_empty())
}

fn non_blank(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|v| !v.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::paths::tests::ENV_LOCK;

    fn settings(command: &str) -> AgentSettings {
        AgentSettings {
            command: command.to_string(),
            ..AgentSettings::default()
        }
    }

    mod resolve {
        use super::*;

        #[test]
        fn tokenizes_command_like_a_shell() {
            let spec = settings("npx -y '@zed/claude code-acp' --verbose")
                .resolve(Some(Path::new("/work/project")))
                .unwrap();
            assert_eq!(
                spec.command,
                vec!["npx", "-y", "@zed/claude code-acp", "--verbose"]
            );
            assert_eq!(spec.session_root, PathBuf::from("/work/project"));
            assert_eq!(spec.process_dir(), Path::new("/work/project"));
        }

        #[test]
        fn disabled_is_configuration_error() {
            let mut s = settings("agent");
            s.enabled = false;
            let err = s.resolve(None).unwrap_err();
            assert!(matches!(err, AgentError::Configuration(_)));
        }

        #[test]
        fn empty_command_is_configuration_error() {
            let err = settings("   ").resolve(None).unwrap_err();
            assert!(matches!(err, AgentError::Configuration(_)));
        }

        #[test]
        fn unbalanced_quote_is_configuration_error() {
            let err = settings("agent 'oops").resolve(None).unwrap_err();
            assert!(matches!(err, AgentError::Configuration(_)));
        }

        #[test]
        fn overrides_beat_project_base() {
            let mut s = settings("agent");
            s.session_root = Some("/override/root".to_string());
            s.working_directory = Some("/override/cwd".to_string());
            let spec = s.resolve(Some(Path::new("/project"))).unwrap();
            assert_eq!(spec.session_root, PathBuf::from("/override/root"));
            assert_eq!(spec.process_dir(), Path::new("/override/cwd"));
        }

        #[test]
        fn blank_overrides_are_ignored() {
            let mut s = settings("agent");
            s.session_root = Some("  ".to_string());
            s.working_directory = Some(String::new());
            let spec = s.resolve(Some(Path::new("/project"))).unwrap();
            assert_eq!(spec.session_root, PathBuf::from("/project"));
            assert!(spec.working_dir.is_none());
        }

        #[test]
        fn falls_back_to_process_dir() {
            let spec = settings("agent").resolve(None).unwrap();
            assert_eq!(spec.session_root, paths::process_working_dir());
        }

        #[test]
        fn equal_specs_identify_the_same_session() {
            let a = settings("agent --acp").resolve(Some(Path::new("/p"))).unwrap();
            let b = settings("agent  --acp").resolve(Some(Path::new("/p"))).unwrap();
            let c = settings("agent --acp").resolve(Some(Path::new("/q"))).unwrap();
            assert_eq!(a, b);
            assert_ne!(a, c);
        }
    }

    mod loading {
        use super::*;
        use tempfile::tempdir;

        #[test]
        fn loads_camel_case_json_with_defaults() {
            let dir = tempdir().unwrap();
            let path = dir.path().join("settings.json");
            std::fs::write(
                &path,
                r#"{"command":"gemini --experimental-acp","permissionMode":"auto"}"#,
            )
            .unwrap();

            let s = AgentSettings::load(&path).unwrap();
            assert!(s.enabled);
            assert_eq!(s.command, "gemini --experimental-acp");
            assert_eq!(s.permission_mode, PermissionMode::AutoApprove);
            assert!(s.log_dir().is_none());
        }

        #[test]
        fn invalid_json_is_configuration_error() {
            let dir = tempdir().unwrap();
            let path = dir.path().join("settings.json");
            std::fs::write(&path, "{ nope").unwrap();
            assert!(matches!(
                AgentSettings::load(&path),
                Err(AgentError::Configuration(_))
            ));
        }

        #[test]
        fn env_overrides_apply() {
            let _guard = ENV_LOCK.lock().unwrap_or_else(|e| e.into_inner());
            std::env::set_var("COD3_AGENT_COMMAND", "my-agent --stdio");
            std::env::set_var("COD3_PERMISSION_MODE", "chat");
            std::env::set_var("COD3_ENABLED", "false");

            let s = AgentSettings::default().with_env_overrides();

            std::env::remove_var("COD3_AGENT_COMMAND");
            std::env::remove_var("COD3_PERMISSION_MODE");
            std::env::remove_var("COD3_ENABLED");

            let s = s.unwrap();
            assert_eq!(s.command, "my-agent --stdio");
            assert_eq!(s.permission_mode, PermissionMode::Chat);
            assert!(!s.enabled);
        }

        #[test]
        fn bad_env_mode_is_rejected() {
            let _guard = ENV_LOCK.lock().unwrap_or_else(|e| e.into_inner());
            std::env::set_var("COD3_PERMISSION_MODE", "whenever");
            let result = AgentSettings::default().with_env_overrides();
            std::env::remove_var("COD3_PERMISSION_MODE");
            assert!(matches!(result, Err(AgentError::Configuration(_))));
        }
    }
}
