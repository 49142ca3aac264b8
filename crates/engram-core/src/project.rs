//! Project context and pause gate
//!
//! Resolves which project new memories belong to and carries the
//! administrative pause flag that rejects writes.

use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use serde::{Deserialize, Serialize};

/// Sentinel meaning "no project scoping"
pub const GLOBAL_PROJECT: &str = "*";

/// Directory names that never identify a project
const SKIP_DIRS: &[&str] = &[
    "src",
    "lib",
    "dist",
    "node_modules",
    ".git",
    "test",
    "tests",
    "bin",
    "scripts",
    "config",
    "public",
    "static",
];

/// Derive the active project name.
///
/// Explicit configuration wins; otherwise the working directory is walked
/// upward past tooling directories until a plausible project name appears;
/// the global sentinel is the fallback.
pub fn resolve_project(explicit: Option<&str>, cwd: &Path) -> String {
    if let Some(name) = explicit {
        if !name.is_empty() {
            return name.to_string();
        }
    }

    let mut current = Some(cwd);
    while let Some(dir) = current {
        if let Some(name) = dir.file_name().and_then(|n| n.to_str()) {
            if !name.is_empty() && !SKIP_DIRS.contains(&name) {
                return name.to_string();
            }
        }
        current = dir.parent();
    }
    GLOBAL_PROJECT.to_string()
}

/// Snapshot of the control state for adapters
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ControlStatus {
    pub project: String,
    pub paused: bool,
}

/// Active project plus the write pause flag
#[derive(Debug)]
pub struct ProjectContext {
    active: Mutex<String>,
    paused: AtomicBool,
}

impl ProjectContext {
    pub fn new(project: String) -> Self {
        Self {
            active: Mutex::new(project),
            paused: AtomicBool::new(false),
        }
    }

    /// Current project scope
    pub fn project(&self) -> String {
        self.active
            .lock()
            .map(|p| p.clone())
            .unwrap_or_else(|_| GLOBAL_PROJECT.to_string())
    }

    /// Switch the active project; `"*"` clears scoping
    pub fn set_project(&self, name: &str) {
        if let Ok(mut active) = self.active.lock() {
            *active = if name.is_empty() {
                GLOBAL_PROJECT.to_string()
            } else {
                name.to_string()
            };
        }
    }

    pub fn pause(&self) {
        self.paused.store(true, Ordering::SeqCst);
    }

    pub fn resume(&self) {
        self.paused.store(false, Ordering::SeqCst);
    }

    pub fn is_paused(&self) -> bool {
        self.paused.load(Ordering::SeqCst)
    }

    pub fn status(&self) -> ControlStatus {
        ControlStatus {
            project: self.project(),
            paused: self.is_paused(),
        }
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn test_explicit_project_wins() {
        let cwd = PathBuf::from("/home/dev/somewhere/src");
        assert_eq!(resolve_project(Some("billing"), &cwd), "billing");
    }

    #[test]
    fn test_skip_list_walks_upward() {
        let cwd = PathBuf::from("/home/dev/acme-api/src");
        assert_eq!(resolve_project(None, &cwd), "acme-api");

        let nested = PathBuf::from("/home/dev/acme-api/lib/tests");
        assert_eq!(resolve_project(None, &nested), "acme-api");
    }

    #[test]
    fn test_plain_directory_used_directly() {
        let cwd = PathBuf::from("/home/dev/acme-api");
        assert_eq!(resolve_project(None, &cwd), "acme-api");
    }

    #[test]
    fn test_pause_gate_toggles() {
        let context = ProjectContext::new("alpha".to_string());
        assert!(!context.is_paused());
        context.pause();
        assert!(context.is_paused());
        context.resume();
        assert!(!context.is_paused());
    }

    #[test]
    fn test_set_project_and_status() {
        let context = ProjectContext::new("alpha".to_string());
        context.set_project("beta");
        context.pause();
        let status = context.status();
        assert_eq!(status.project, "beta");
        assert!(status.paused);

        context.set_project("");
        assert_eq!(context.project(), GLOBAL_PROJECT);
    }
}
