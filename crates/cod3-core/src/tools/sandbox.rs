//! Path confinement for tool execution.
//!
//! A path argument is resolved in two steps. First lexically, with no I/O:
//! join to the root when relative, fold `.` and `..`, and require the root
//! as a prefix. Then on disk: the nearest existing ancestor is
//! canonicalized and must still sit under the canonical root, so a symlink
//! inside the project cannot point a tool outside of it.

use super::ToolError;
use std::path::{Component, Path, PathBuf};

#[derive(Debug, Clone)]
pub struct Sandbox {
    root: PathBuf,
}

impl Sandbox {
    /// Confine tools to `root`. A relative root is taken from the process
    /// working directory.
    pub fn new(root: impl AsRef<Path>) -> Self {
        let root = root.as_ref();
        let absolute = if root.is_absolute() {
            root.to_path_buf()
        } else {
            crate::paths::process_working_dir().join(root)
        };
        Self {
            root: normalize(&absolute),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Resolve without touching the filesystem.
    pub fn resolve_lexical(&self, path: &str) -> Result<PathBuf, ToolError> {
        let candidate = Path::new(path.trim());
        let joined = if candidate.is_absolute() {
            candidate.to_path_buf()
        } else {
            self.root.join(candidate)
        };
        let resolved = normalize(&joined);
        if resolved.starts_with(&self.root) {
            Ok(resolved)
        } else {
            log::warn!("[sandbox] Refused {path} (outside {})", self.root.display());
            Err(ToolError::SandboxEscape(path.to_string()))
        }
    }

    /// Resolve and verify against symlinks on disk.
    pub fn resolve(&self, path: &str) -> Result<PathBuf, ToolError> {
        let resolved = self.resolve_lexical(path)?;

        let Ok(canonical_root) = self.root.canonicalize() else {
            // Nothing exists yet, so nothing can be a link.
            return Ok(resolved);
        };
        let mut ancestor = resolved.as_path();
        while ancestor.symlink_metadata().is_err() {
            match ancestor.parent() {
                Some(parent) => ancestor = parent,
                None => return Ok(resolved),
            }
        }
        match ancestor.canonicalize() {
            Ok(real) if real.starts_with(&canonical_root) => Ok(resolved),
            Ok(real) => {
                log::warn!(
                    "[sandbox] Refused {path}: {} resolves to {}",
                    ancestor.display(),
                    real.display()
                );
                Err(ToolError::SandboxEscape(path.to_string()))
            }
            // Dangling link: its target cannot be checked.
            Err(_) => Err(ToolError::SandboxEscape(path.to_string())),
        }
    }

    /// Root-relative display form with `/` separators.
    pub fn relative(&self, path: &Path) -> String {
        let rel = path.strip_prefix(&self.root).unwrap_or(path);
        let parts: Vec<String> = rel
            .components()
            .map(|c| c.as_os_str().to_string_lossy().into_owned())
            .collect();
        if parts.is_empty() {
            ".".to_string()
        } else {
            parts.join("/")
        }
    }
}

/// Fold `.` and `..` without consulting the filesystem. `..` never climbs
/// above the filesystem root.
fn normalize(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::Prefix(_) | Component::RootDir => out.push(component.as_os_str()),
            Component::CurDir => {}
            Component::ParentDir => {
                out.pop();
            }
            Component::Normal(part) => out.push(part),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    mod lexical {
        use super::*;

        fn sandbox() -> Sandbox {
            Sandbox::new("/work/project")
        }

        #[test]
        fn relative_paths_join_the_root() {
            let path = sandbox().resolve_lexical("src/./lib.rs").unwrap();
            assert_eq!(path, PathBuf::from("/work/project/src/lib.rs"));
        }

        #[test]
        fn parent_segments_inside_root_are_fine() {
            let path = sandbox().resolve_lexical("src/../README.md").unwrap();
            assert_eq!(path, PathBuf::from("/work/project/README.md"));
        }

        #[test]
        fn climbing_out_is_refused() {
            for candidate in ["../../etc/passwd", "..", "src/../../other", "/etc/passwd"] {
                assert!(
                    matches!(
                        sandbox().resolve_lexical(candidate),
                        Err(ToolError::SandboxEscape(_))
                    ),
                    "{candidate} must be refused"
                );
            }
        }

        #[test]
        fn sibling_with_common_prefix_is_refused() {
            assert!(sandbox().resolve_lexical("/work/project-evil/x").is_err());
        }

        #[test]
        fn absolute_inside_root_is_accepted() {
            let path = sandbox().resolve_lexical("/work/project/a/b").unwrap();
            assert_eq!(path, PathBuf::from("/work/project/a/b"));
        }

        #[test]
        fn empty_path_is_the_root() {
            assert_eq!(
                sandbox().resolve_lexical("").unwrap(),
                PathBuf::from("/work/project")
            );
        }

        #[test]
        fn every_accepted_path_is_under_root() {
            let sb = sandbox();
            let candidates = [
                "a", "./a/../b", "../project/c", "a/b/../../..", "/work/project/../project/d",
                "x/../../..", "/", "a//b", ".",
            ];
            for candidate in candidates {
                if let Ok(path) = sb.resolve_lexical(candidate) {
                    assert!(path.starts_with(sb.root()), "{candidate} -> {path:?}");
                }
            }
        }

        #[test]
        fn relative_display() {
            let sb = sandbox();
            assert_eq!(sb.relative(Path::new("/work/project/src/lib.rs")), "src/lib.rs");
            assert_eq!(sb.relative(Path::new("/work/project")), ".");
        }
    }

    #[cfg(unix)]
    mod symlinks {
        use super::*;

        #[test]
        fn link_pointing_outside_is_refused() {
            let outside = tempdir().unwrap();
            let root = tempdir().unwrap();
            std::os::unix::fs::symlink(outside.path(), root.path().join("escape")).unwrap();

            let sandbox = Sandbox::new(root.path());
            assert!(sandbox.resolve_lexical("escape/secret.txt").is_ok());
            assert!(matches!(
                sandbox.resolve("escape/secret.txt"),
                Err(ToolError::SandboxEscape(_))
            ));
        }

        #[test]
        fn link_inside_root_is_allowed() {
            let root = tempdir().unwrap();
            std::fs::create_dir(root.path().join("real")).unwrap();
            std::os::unix::fs::symlink(root.path().join("real"), root.path().join("alias"))
                .unwrap();

            let sandbox = Sandbox::new(root.path());
            assert!(sandbox.resolve("alias/new.txt").is_ok());
        }

        #[test]
        fn missing_parents_are_checked_from_nearest_ancestor() {
            let root = tempdir().unwrap();
            let sandbox = Sandbox::new(root.path());
            let path = sandbox.resolve("a/b/c/new.txt").unwrap();
            assert!(path.starts_with(root.path()));
        }
    }
}
