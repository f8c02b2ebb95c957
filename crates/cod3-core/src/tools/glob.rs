//! Glob and `r:` regex patterns for file search.

use super::ToolError;
use regex::{Regex, RegexBuilder};

/// Prefix selecting a raw regular expression instead of a glob.
pub const REGEX_PREFIX: &str = "r:";

/// Translate a glob into an anchored regex.
///
/// `*` matches any run of characters, `?` any single character, `[...]` is
/// copied verbatim and `\` escapes the next character. Everything else is
/// literal.
pub fn glob_to_regex(glob: &str) -> String {
    let chars: Vec<char> = glob.chars().collect();
    let mut out = String::with_capacity(glob.len() * 2 + 2);
    out.push('^');

    let mut i = 0;
    while i < chars.len() {
        match chars[i] {
            '*' => out.push_str(".*"),
            '?' => out.push('.'),
            '\\' => match chars.get(i + 1) {
                Some(next) => {
                    out.push_str(&regex::escape(&next.to_string()));
                    i += 1;
                }
                None => out.push_str(r"\\"),
            },
            '[' => match chars[i + 1..].iter().position(|c| *c == ']') {
                // `[]` is not a class; treat its bracket literally.
                Some(offset) if offset > 0 => {
                    let end = i + 1 + offset;
                    out.extend(&chars[i..=end]);
                    i = end;
                }
                _ => out.push_str(r"\["),
            },
            other => out.push_str(&regex::escape(&other.to_string())),
        }
        i += 1;
    }

    out.push('$');
    out
}

/// Compile a search pattern, case-insensitively.
///
/// `r:<regex>` is used as written; anything else is a glob.
pub fn compile_pattern(pattern: &str) -> Result<Regex, ToolError> {
    let source = match pattern.strip_prefix(REGEX_PREFIX) {
        Some(raw) => raw.to_string(),
        None => glob_to_regex(pattern),
    };
    RegexBuilder::new(&source)
        .case_insensitive(true)
        .build()
        .map_err(|err| ToolError::InvalidArgument {
            argument: "pattern".to_string(),
            reason: err.to_string(),
        })
}
