use std::env;
use std::path::PathBuf;

/// Return the user's home directory path.
///
/// Uses HOME on Unix-like systems and USERPROFILE on Windows.
pub fn get_home_dir() -> Option<PathBuf> {
    ["HOME", "USERPROFILE"]
        .iter()
        .filter_map(|key| env::var(key).ok())
        .find(|value| !value.is_empty())
        .map(PathBuf::from)
}

/// Default directory for per-session protocol logs: `~/.cod3/logs`.
pub fn default_log_dir() -> Option<PathBuf> {
    get_home_dir().map(|home| home.join(".cod3").join("logs"))
}

/// Fallback session root when neither settings nor the host supply one.
pub fn process_working_dir() -> PathBuf {
    env::current_dir().unwrap_or_else(|_| PathBuf::from("."))
}
