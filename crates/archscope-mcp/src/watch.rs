use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use archscope_core::GraphCache;
use notify::{recommended_watcher, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use parking_lot::Mutex;
use tracing::{debug, info, warn};

/// Files whose change can alter a project's graph.
const WATCHED_EXTENSIONS: &[&str] = &["md", "d2", "json"];

fn affects_graph(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| WATCHED_EXTENSIONS.iter().any(|w| w.eq_ignore_ascii_case(e)))
}

/// One recursive watcher per project root, started the first time the
/// project is queried and kept for the life of the server.
#[derive(Default)]
pub struct ProjectWatchers {
    watchers: Mutex<HashMap<PathBuf, RecommendedWatcher>>,
}

impl ProjectWatchers {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start watching `root` unless already watched. Failure only costs
    /// automatic invalidation; queries still work.
    pub fn ensure(&self, root: &Path, cache: Arc<GraphCache>) {
        let key = root.canonicalize().unwrap_or_else(|_| root.to_path_buf());
        let mut watchers = self.watchers.lock();
        if watchers.contains_key(&key) || !key.is_dir() {
            return;
        }

        let project = key.clone();
        let watcher = recommended_watcher(move |res: Result<notify::Event, notify::Error>| {
            let event = match res {
                Ok(event) => event,
                Err(e) => {
                    warn!(project = %project.display(), error = %e, "watch error");
                    return;
                }
            };
            if !matches!(
                event.kind,
                EventKind::Create(_) | EventKind::Modify(_) | EventKind::Remove(_)
            ) {
                return;
            }
            if let Some(path) = event.paths.iter().find(|p| affects_graph(p)) {
                debug!(path = %path.display(), "source changed");
                cache.invalidate(&project);
            }
        });

        let mut watcher = match watcher {
            Ok(w) => w,
            Err(e) => {
                warn!(project = %key.display(), error = %e, "could not create file watcher");
                return;
            }
        };
        if let Err(e) = watcher.watch(&key, RecursiveMode::Recursive) {
            warn!(project = %key.display(), error = %e, "could not watch project");
            return;
        }
        info!(project = %key.display(), "watching project for changes");
        watchers.insert(key, watcher);
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.watchers.lock().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_source_files_matter() {
        assert!(affects_graph(Path::new("src/shop/api/auth.md")));
        assert!(affects_graph(Path::new("src/shop/api/auth.D2")));
        assert!(affects_graph(Path::new("relationships.json")));
        assert!(!affects_graph(Path::new(".relationships.json.tmp")));
        assert!(!affects_graph(Path::new("src/shop/api/notes.txt")));
        assert!(!affects_graph(Path::new("Makefile")));
    }

    #[test]
    fn missing_roots_are_not_watched() {
        let watchers = ProjectWatchers::new();
        watchers.ensure(Path::new("/definitely/not/here"), Arc::new(GraphCache::new()));
        assert_eq!(watchers.len(), 0);
    }

    #[test]
    fn each_project_is_watched_once() {
        let dir = tempfile::TempDir::new().unwrap();
        let cache = Arc::new(GraphCache::new());
        let watchers = ProjectWatchers::new();
        watchers.ensure(dir.path(), Arc::clone(&cache));
        watchers.ensure(&dir.path().join("."), Arc::clone(&cache));
        assert_eq!(watchers.len(), 1);
    }
}
