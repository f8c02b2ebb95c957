//! Static tool registry: name, parameters and handler per tool.

use super::executor::ToolExecutor;
use super::ToolError;
use indexmap::IndexMap;

pub type ToolHandler = fn(&ToolExecutor, &ToolArgs<'_>) -> Result<String, ToolError>;

#[derive(Debug, Clone, Copy)]
pub struct ToolParam {
    pub name: &'static str,
    pub description: &'static str,
    pub required: bool,
}

const fn required(name: &'static str, description: &'static str) -> ToolParam {
    ToolParam {
        name,
        description,
        required: true,
    }
}

const fn optional(name: &'static str, description: &'static str) -> ToolParam {
    ToolParam {
        name,
        description,
        required: false,
    }
}

pub struct ToolSpec {
    pub name: &'static str,
    pub description: &'static str,
    pub params: &'static [ToolParam],
    pub handler: ToolHandler,
}

impl std::fmt::Debug for ToolSpec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ToolSpec")
            .field("name", &self.name)
            .field("params", &self.params)
            .finish()
    }
}

pub static TOOLS: &[ToolSpec] = &[
    ToolSpec {
        name: "write_file",
        description: "Create or overwrite a file with the given content.",
        params: &[
            required("path", "File path relative to the project root"),
            required("content", "Full new file content"),
        ],
        handler: ToolExecutor::write_file,
    },
    ToolSpec {
        name: "edit_file",
        description: "Replace the whole content of an existing file.",
        params: &[
            required("path", "Existing file path relative to the project root"),
            required("content", "Full new file content"),
        ],
        handler: ToolExecutor::edit_file,
    },
    ToolSpec {
        name: "find_files",
        description: "Find files by glob (e.g. *.rs) or by regex with an r: prefix.",
        params: &[
            required("pattern", "Glob, or r:<regex>; matched case-insensitively"),
            optional("path", "Directory to search, defaults to the project root"),
        ],
        handler: ToolExecutor::find_files,
    },
    ToolSpec {
        name: "list_directory",
        description: "List the direct children of a directory.",
        params: &[optional("path", "Directory, defaults to the project root")],
        handler: ToolExecutor::list_directory,
    },
    ToolSpec {
        name: "grep",
        description: "Search file contents with a regular expression.",
        params: &[
            required("pattern", "Regular expression"),
            optional("path", "File or directory, defaults to the project root"),
            optional("recursive", "true to descend into subdirectories"),
        ],
        handler: ToolExecutor::grep,
    },
    ToolSpec {
        name: "view_file",
        description: "Show the content of a file.",
        params: &[
            required("path", "File path relative to the project root"),
            optional("max_chars", "Truncate the content after this many characters"),
        ],
        handler: ToolExecutor::view_file,
    },
    ToolSpec {
        name: "run_command",
        description: "Describe a shell command for the user to run. Nothing is executed.",
        params: &[required("command", "The command line")],
        handler: ToolExecutor::run_command,
    },
];

pub fn find_tool(name: &str) -> Option<&'static ToolSpec> {
    TOOLS.iter().find(|tool| tool.name == name)
}

/// Tool list for a system prompt.
pub fn catalogue() -> String {
    let mut out = String::new();
    for tool in TOOLS {
        out.push_str(&format!("- {}: {}\n", tool.name, tool.description));
        for param in tool.params {
            let marker = if param.required { "required" } else { "optional" };
            out.push_str(&format!(
                "    - {} ({}): {}\n",
                param.name, marker, param.description
            ));
        }
    }
    out
}

/// Arguments of one invocation, with the tool name for error messages.
#[derive(Debug, Clone, Copy)]
pub struct ToolArgs<'a> {
    tool: &'a str,
    values: &'a IndexMap<String, String>,
}

impl<'a> ToolArgs<'a> {
    pub fn new(tool: &'a str, values: &'a IndexMap<String, String>) -> Self {
        Self { tool, values }
    }

    pub fn required(&self, name: &str) -> Result<&'a str, ToolError> {
        self.values
            .get(name)
            .map(String::as_str)
            .ok_or_else(|| ToolError::MissingArgument {
                tool: self.tool.to_string(),
                argument: name.to_string(),
            })
    }

    /// A present, non-blank value.
    pub fn optional(&self, name: &str) -> Option<&'a str> {
        self.values
            .get(name)
            .map(String::as_str)
            .filter(|value| !value.trim().is_empty())
    }

    pub fn flag(&self, name: &str) -> Result<bool, ToolError> {
        match self.optional(name).map(|v| v.trim().to_ascii_lowercase()) {
            None => Ok(false),
            Some(value) => match value.as_str() {
                "true" | "yes" | "1" => Ok(true),
                "false" | "no" | "0" => Ok(false),
                _ => Err(ToolError::InvalidArgument {
                    argument: name.to_string(),
                    reason: format!("expected true or false, got '{value}'"),
                }),
            },
        }
    }

    pub fn count(&self, name: &str) -> Result<Option<usize>, ToolError> {
        self.optional(name)
            .map(|value| {
                value.trim().parse::<usize>().map_err(|_| ToolError::InvalidArgument {
                    argument: name.to_string(),
                    reason: format!("expected a non-negative number, got '{value}'"),
                })
            })
            .transpose()
    }
}
