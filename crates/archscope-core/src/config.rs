use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use tracing::{debug, warn};

pub const PROJECT_SETTINGS_FILE: &str = "archscope.json";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct Settings {
    /// Entity tree root, relative to the project root.
    pub source_dir: PathBuf,
    /// Standalone relationship file, relative to the project root.
    pub relationships_file: PathBuf,
    /// Diagram parse pool width.
    pub workers: usize,
    pub file_timeout_ms: u64,
    pub default_limit: usize,
    pub max_limit: usize,
    pub max_hops: usize,
    pub coupling_threshold: usize,
    /// Return what was parsed so far instead of an error when a build is cancelled.
    pub partial_on_cancel: bool,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            source_dir: PathBuf::from("src"),
            relationships_file: PathBuf::from("relationships.json"),
            workers: crate::coordinator::DEFAULT_WORKERS,
            file_timeout_ms: crate::coordinator::DEFAULT_FILE_TIMEOUT.as_millis() as u64,
            default_limit: crate::query::DEFAULT_LIMIT,
            max_limit: crate::query::MAX_LIMIT,
            max_hops: crate::query::DEFAULT_MAX_HOPS,
            coupling_threshold: crate::query::DEFAULT_COUPLING_THRESHOLD,
            partial_on_cancel: false,
        }
    }
}

impl Settings {
    pub fn file_timeout(&self) -> Duration {
        Duration::from_millis(self.file_timeout_ms)
    }

    pub fn source_root(&self, project_root: &Path) -> PathBuf {
        project_root.join(&self.source_dir)
    }

    pub fn relationships_path(&self, project_root: &Path) -> PathBuf {
        project_root.join(&self.relationships_file)
    }

    /// Project file, then the global file, then defaults. Unreadable or
    /// malformed files are logged and skipped.
    pub fn load(project_root: &Path) -> Self {
        let candidates = [
            Some(project_root.join(PROJECT_SETTINGS_FILE)),
            global_settings_path(),
        ];
        for path in candidates.into_iter().flatten() {
            if !path.exists() {
                continue;
            }
            match fs::read_to_string(&path).map(|raw| serde_json::from_str::<Settings>(&raw)) {
                Ok(Ok(settings)) => {
                    debug!(path = %path.display(), "loaded settings");
                    return settings;
                }
                Ok(Err(e)) => warn!(path = %path.display(), error = %e, "ignoring malformed settings"),
                Err(e) => warn!(path = %path.display(), error = %e, "ignoring unreadable settings"),
            }
        }
        Settings::default()
    }
}

/// Resolve the global settings directory (~/.archscope/).
pub fn settings_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".archscope")
}

fn global_settings_path() -> Option<PathBuf> {
    dirs::home_dir().map(|_| settings_dir().join("settings.json"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_project_file_keeps_defaults() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(
            dir.path().join(PROJECT_SETTINGS_FILE),
            r#"{ "workers": 4, "maxLimit": 50 }"#,
        )
        .unwrap();

        let s = Settings::load(dir.path());
        assert_eq!(s.workers, 4);
        assert_eq!(s.max_limit, 50);
        assert_eq!(s.default_limit, 20);
        assert_eq!(s.source_dir, PathBuf::from("src"));
    }

    #[test]
    fn malformed_project_file_is_not_fatal() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join(PROJECT_SETTINGS_FILE), "{ not json").unwrap();
        let s = Settings::load(dir.path());
        // Falls through to the global file or defaults; either way the
        // project value was not applied.
        assert!(s.workers >= 1);
    }
}
