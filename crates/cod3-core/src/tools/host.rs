//! Callbacks into whatever hosts the engine (an editor, the daemon).

use std::path::Path;

/// Side effects a tool asks the host to present.
pub trait ToolHost: Send + Sync {
    /// A file was written and should be shown to the user.
    fn open_file(&self, path: &Path);

    /// A file was replaced; `before` is the previous content.
    fn show_diff(&self, path: &Path, before: &str, after: &str);
}

/// Host without a UI: records the requests in the log.
#[derive(Debug, Default, Clone, Copy)]
pub struct LoggingHost;

impl ToolHost for LoggingHost {
    fn open_file(&self, path: &Path) {
        log::info!("[host] open {}", path.display());
    }

    fn show_diff(&self, path: &Path, before: &str, after: &str) {
        log::info!(
            "[host] diff {} ({} -> {} lines)",
            path.display(),
            before.lines().count(),
            after.lines().count()
        );
    }
}
