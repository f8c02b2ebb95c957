//! Tool implementations.
//!
//! Handlers are synchronous filesystem code; async callers run them on
//! `spawn_blocking`. Tree walks use `ignore::WalkBuilder` with every filter
//! off and entries sorted by name, so results are deterministic and include
//! hidden and ignored files. Symlinks are not followed.

use super::glob::compile_pattern;
use super::host::{LoggingHost, ToolHost};
use super::registry::{find_tool, ToolArgs};
use super::sandbox::Sandbox;
use super::ToolError;
use ignore::WalkBuilder;
use indexmap::IndexMap;
use regex::Regex;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Upper bound on `grep` output lines.
const MAX_GREP_MATCHES: usize = 500;

#[derive(Clone)]
pub struct ToolExecutor {
    sandbox: Sandbox,
    host: Arc<dyn ToolHost>,
}

impl std::fmt::Debug for ToolExecutor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ToolExecutor")
            .field("root", &self.sandbox.root())
            .finish()
    }
}

/// Run one tool against `sandbox_root` with a logging-only host.
pub fn execute(
    name: &str,
    arguments: &IndexMap<String, String>,
    sandbox_root: &Path,
) -> Result<String, ToolError> {
    ToolExecutor::new(sandbox_root).execute(name, arguments)
}

impl ToolExecutor {
    pub fn new(sandbox_root: impl AsRef<Path>) -> Self {
        Self {
            sandbox: Sandbox::new(sandbox_root),
            host: Arc::new(LoggingHost),
        }
    }

    pub fn with_host(mut self, host: Arc<dyn ToolHost>) -> Self {
        self.host = host;
        self
    }

    pub fn root(&self) -> &Path {
        self.sandbox.root()
    }

    pub fn sandbox(&self) -> &Sandbox {
        &self.sandbox
    }

    /// Dispatch a tool by name.
    pub fn execute(
        &self,
        name: &str,
        arguments: &IndexMap<String, String>,
    ) -> Result<String, ToolError> {
        let spec = find_tool(name).ok_or_else(|| ToolError::UnknownTool(name.to_string()))?;
        log::info!("[tools] {} {:?}", spec.name, arguments.keys().collect::<Vec<_>>());
        let result = (spec.handler)(self, &ToolArgs::new(spec.name, arguments));
        if let Err(err) = &result {
            log::warn!("[tools] {} failed: {}", spec.name, err);
        }
        result
    }

    // ------------------------------------------------------------------
    // Handlers
    // ------------------------------------------------------------------

    pub(super) fn write_file(&self, args: &ToolArgs<'_>) -> Result<String, ToolError> {
        let raw = args.required("path")?;
        let content = args.required("content")?;
        let path = self.sandbox.resolve(raw)?;
        write_with_parents(&path, content)?;
        self.host.open_file(&path);
        Ok(format!(
            "Wrote {} bytes to {}",
            content.len(),
            self.sandbox.relative(&path)
        ))
    }

    pub(super) fn edit_file(&self, args: &ToolArgs<'_>) -> Result<String, ToolError> {
        let raw = args.required("path")?;
        let content = args.required("content")?;
        let path = self.sandbox.resolve(raw)?;
        if !path.is_file() {
            return Err(ToolError::NotFound(raw.to_string()));
        }
        let before = std::fs::read_to_string(&path).map_err(|e| ToolError::io(&path, e))?;
        std::fs::write(&path, content).map_err(|e| ToolError::io(&path, e))?;
        self.host.show_diff(&path, &before, content);
        Ok(format!("Updated {}", self.sandbox.relative(&path)))
    }

    pub(super) fn find_files(&self, args: &ToolArgs<'_>) -> Result<String, ToolError> {
        let pattern = args.required("pattern")?;
        let regex = compile_pattern(pattern)?;
        let base = self.directory(args.optional("path").unwrap_or("."))?;

        let mut matches: Vec<String> = walk_files(&base, true)
            .into_iter()
            .map(|path| self.sandbox.relative(&path))
            .filter(|rel| {
                let name = rel.rsplit('/').next().unwrap_or(rel);
                regex.is_match(name) || regex.is_match(rel)
            })
            .collect();
        matches.sort();

        if matches.is_empty() {
            Ok(format!("No files matching '{pattern}'"))
        } else {
            Ok(matches.join("\n"))
        }
    }

    pub(super) fn list_directory(&self, args: &ToolArgs<'_>) -> Result<String, ToolError> {
        let dir = self.directory(args.optional("path").unwrap_or("."))?;
        let entries = std::fs::read_dir(&dir).map_err(|e| ToolError::io(&dir, e))?;

        let mut names = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|e| ToolError::io(&dir, e))?;
            let mut name = entry.file_name().to_string_lossy().into_owned();
            if entry.file_type().map(|t| t.is_dir()).unwrap_or(false) {
                name.push('/');
            }
            names.push(name);
        }
        names.sort_by(|a, b| {
            a.to_lowercase()
                .cmp(&b.to_lowercase())
                .then_with(|| a.cmp(b))
        });

        if names.is_empty() {
            Ok(format!("{} is empty", self.sandbox.relative(&dir)))
        } else {
            Ok(names.join("\n"))
        }
    }

    pub(super) fn grep(&self, args: &ToolArgs<'_>) -> Result<String, ToolError> {
        let pattern = args.required("pattern")?;
        let regex = Regex::new(pattern).map_err(|err| ToolError::InvalidArgument {
            argument: "pattern".to_string(),
            reason: err.to_string(),
        })?;
        let recursive = args.flag("recursive")?;
        let target = self.sandbox.resolve(args.optional("path").unwrap_or("."))?;

        let files = if target.is_file() {
            vec![target]
        } else if target.is_dir() {
            walk_files(&target, recursive)
        } else {
            return Err(ToolError::NotFound(
                args.optional("path").unwrap_or(".").to_string(),
            ));
        };

        let mut lines = Vec::new();
        'files: for file in files {
            // Binary or unreadable files are skipped.
            let Ok(text) = std::fs::read_to_string(&file) else {
                continue;
            };
            let rel = self.sandbox.relative(&file);
            for (index, line) in text.lines().enumerate() {
                if regex.is_match(line) {
                    if lines.len() == MAX_GREP_MATCHES {
                        lines.push(format!("... (stopped after {MAX_GREP_MATCHES} matches)"));
                        break 'files;
                    }
                    lines.push(format!("{}:{}: {}", rel, index + 1, line.trim_end()));
                }
            }
        }

        if lines.is_empty() {
            Ok(format!("No matches for '{pattern}'"))
        } else {
            Ok(lines.join("\n"))
        }
    }

    pub(super) fn view_file(&self, args: &ToolArgs<'_>) -> Result<String, ToolError> {
        let raw = args.required("path")?;
        let budget = args.count("max_chars")?;
        let path = self.sandbox.resolve(raw)?;
        if !path.is_file() {
            return Err(ToolError::NotFound(raw.to_string()));
        }
        let text = std::fs::read_to_string(&path).map_err(|e| ToolError::io(&path, e))?;

        match budget {
            Some(max) if text.chars().count() > max => {
                let total = text.chars().count();
                let head: String = text.chars().take(max).collect();
                Ok(format!("{head}\n... [truncated, {total} characters total]"))
            }
            _ => Ok(text),
        }
    }

    pub(super) fn run_command(&self, args: &ToolArgs<'_>) -> Result<String, ToolError> {
        let command = args.required("command")?;
        log::info!("[tools] run_command requested (not executed): {command}");
        Ok(format!(
            "Command execution is not available. The user can run it manually:\n{command}"
        ))
    }

    // ------------------------------------------------------------------
    // ACP filesystem requests
    // ------------------------------------------------------------------

    /// Read a text file, optionally a window of lines (1-based `line`).
    pub fn read_text(
        &self,
        raw_path: &str,
        line: Option<usize>,
        limit: Option<usize>,
    ) -> Result<String, ToolError> {
        let path = self.sandbox.resolve(raw_path)?;
        let text = std::fs::read_to_string(&path).map_err(|e| ToolError::io(&path, e))?;
        if line.is_none() && limit.is_none() {
            return Ok(text);
        }
        let skip = line.unwrap_or(1).saturating_sub(1);
        let take = limit.unwrap_or(usize::MAX);
        let window: Vec<&str> = text.split_inclusive('\n').skip(skip).take(take).collect();
        Ok(window.concat())
    }

    /// Write a text file on behalf of the agent.
    pub fn write_text(&self, raw_path: &str, content: &str) -> Result<(), ToolError> {
        let path = self.sandbox.resolve(raw_path)?;
        let before = std::fs::read_to_string(&path).ok();
        write_with_parents(&path, content)?;
        match before {
            Some(before) => self.host.show_diff(&path, &before, content),
            None => self.host.open_file(&path),
        }
        Ok(())
    }

    fn directory(&self, raw: &str) -> Result<PathBuf, ToolError> {
        let dir = self.sandbox.resolve(raw)?;
        if dir.is_dir() {
            Ok(dir)
        } else if dir.exists() {
            Err(ToolError::InvalidArgument {
                argument: "path".to_string(),
                reason: format!("{raw} is not a directory"),
            })
        } else {
            Err(ToolError::NotFound(raw.to_string()))
        }
    }
}

fn write_with_parents(path: &Path, content: &str) -> Result<(), ToolError> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(|e| ToolError::io(parent, e))?;
    }
    std::fs::write(path, content).map_err(|e| ToolError::io(path, e))
}

/// Regular files under `dir` in traversal order (sorted by name per level).
fn walk_files(dir: &Path, recursive: bool) -> Vec<PathBuf> {
    let mut builder = WalkBuilder::new(dir);
    builder
        .standard_filters(false)
        .follow_links(false)
        .sort_by_file_name(|a, b| a.cmp(b));
    if !recursive {
        builder.max_depth(Some(1));
    }

    builder
        .build()
        .filter_map(|entry| match entry {
            Ok(entry) => Some(entry),
            Err(err) => {
                log::debug!("[tools] walk error: {err}");
                None
            }
        })
        .filter(|entry| entry.file_type().map(|t| t.is_file()).unwrap_or(false))
        .map(|entry| entry.into_path())
        .collect()
}
