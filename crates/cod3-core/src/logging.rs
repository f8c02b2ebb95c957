//! Per-session protocol transcripts.
//!
//! Everything written to or read from an agent process can be mirrored to
//! `{log_dir}/{log_id}.log`, one timestamped line per message. Diagnostics
//! still go through the `log` facade; this file is only the wire record.

use chrono::{SecondsFormat, Utc};
use std::{
    fs::{File, OpenOptions},
    io::Write,
    path::Path,
    sync::{Arc, Mutex},
};

/// Thread-safe handle to an append-only log file. `None` disables mirroring.
pub type LogHandle = Arc<Mutex<Option<File>>>;

/// Which stream a logged line travelled on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Stdin,
    Stdout,
    Stderr,
}

impl Direction {
    pub fn as_str(self) -> &'static str {
        match self {
            Direction::Stdin => "STDIN",
            Direction::Stdout => "STDOUT",
            Direction::Stderr => "STDERR",
        }
    }
}

fn utc_timestamp() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// Write a timestamped line to the log file (if present).
pub fn log_line(handle: &LogHandle, direction: Direction, data: &str) {
    if let Ok(mut guard) = handle.lock() {
        if let Some(ref mut file) = *guard {
            let data = data.trim_end_matches('\n');
            let _ = writeln!(file, "[{}] {}: {}", utc_timestamp(), direction.as_str(), data);
            let _ = file.flush();
        }
    }
}

/// Open (or create) `{log_dir}/{log_id}.log` and return a shared handle.
///
/// Any failure yields a disabled handle; transcript logging never blocks a
/// session from starting.
pub fn open_log_file(log_dir: Option<&Path>, log_id: &str) -> LogHandle {
    let file = log_dir.and_then(|dir| {
        if let Err(err) = std::fs::create_dir_all(dir) {
            log::warn!("Cannot create log dir {}: {}", dir.display(), err);
            return None;
        }
        OpenOptions::new()
            .create(true)
            .append(true)
            .open(dir.join(format!("{log_id}.log")))
            .map_err(|err| log::warn!("Cannot open session log {log_id}: {err}"))
            .ok()
    });
    Arc::new(Mutex::new(file))
}

/// A handle that drops everything.
pub fn disabled() -> LogHandle {
    Arc::new(Mutex::new(None))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn timestamp_is_rfc3339_utc_with_millis() {
        let ts = utc_timestamp();
        assert!(ts.ends_with('Z'));
        assert_eq!(ts.len(), 24);
        assert_eq!(&ts[10..11], "T");
        assert_eq!(&ts[19..20], ".");
    }

    #[test]
    fn open_log_file_creates_nested_dir() {
        let dir = tempdir().unwrap();
        let log_dir = dir.path().join("nested").join("logs");

        let handle = open_log_file(Some(&log_dir), "session-1");
        assert!(handle.lock().unwrap().is_some());
        assert!(log_dir.join("session-1.log").exists());
    }

    #[test]
    fn open_log_file_without_dir_is_disabled() {
        let handle = open_log_file(None, "session-1");
        assert!(handle.lock().unwrap().is_none());
    }

    #[test]
    fn log_line_records_direction_and_strips_newline() {
        let dir = tempdir().unwrap();
        let handle = open_log_file(Some(dir.path()), "wire");
        log_line(&handle, Direction::Stdin, "{\"method\":\"initialize\"}\n");
        log_line(&handle, Direction::Stderr, "warming up");

        let contents = std::fs::read_to_string(dir.path().join("wire.log")).unwrap();
        let lines: Vec<&str> = contents.lines().collect();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].ends_with("STDIN: {\"method\":\"initialize\"}"));
        assert!(lines[1].ends_with("STDERR: warming up"));
    }

    #[test]
    fn log_line_on_disabled_handle_is_noop() {
        log_line(&disabled(), Direction::Stdout, "ignored");
    }
}
