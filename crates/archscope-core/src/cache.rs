use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use tracing::debug;

use crate::graph::ArchitectureGraph;

/// A built graph and when it was built.
#[derive(Debug, Clone)]
pub struct CachedGraph {
    pub graph: Arc<ArchitectureGraph>,
    pub built_at: DateTime<Utc>,
}

/// Per-project store of built graphs for one serving session.
///
/// Entries never expire; they stay until `invalidate` (normally driven by a
/// file watcher) or `clear`. Reads share the lock, writes take it exclusively.
///
/// Every invalidation also advances the project's generation. A build takes
/// the generation before reading sources and stores its graph with
/// [`GraphCache::set_if_generation`], so a graph built from sources that
/// changed mid-build is never cached.
#[derive(Debug, Default)]
pub struct GraphCache {
    state: RwLock<CacheState>,
}

#[derive(Debug, Default)]
struct CacheState {
    entries: HashMap<PathBuf, CachedGraph>,
    /// Counter value at each project's last invalidation.
    invalidated_at: HashMap<PathBuf, u64>,
    /// Counter value at the last `clear`.
    cleared_at: u64,
    counter: u64,
}

impl CacheState {
    fn generation(&self, key: &Path) -> u64 {
        self.invalidated_at
            .get(key)
            .copied()
            .unwrap_or(0)
            .max(self.cleared_at)
    }

    fn bump(&mut self) -> u64 {
        self.counter += 1;
        self.counter
    }
}

impl GraphCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Paths are canonicalized when possible so `./proj` and `/abs/proj`
    /// share an entry.
    fn key(project_root: &Path) -> PathBuf {
        project_root
            .canonicalize()
            .unwrap_or_else(|_| project_root.to_path_buf())
    }

    pub fn get(&self, project_root: &Path) -> Option<CachedGraph> {
        self.state.read().entries.get(&Self::key(project_root)).cloned()
    }

    /// Changes whenever `project_root` is invalidated or the cache cleared.
    pub fn generation(&self, project_root: &Path) -> u64 {
        self.state.read().generation(&Self::key(project_root))
    }

    /// Store unconditionally.
    pub fn set(&self, project_root: &Path, graph: Arc<ArchitectureGraph>) -> CachedGraph {
        let entry = CachedGraph {
            graph,
            built_at: Utc::now(),
        };
        self.state
            .write()
            .entries
            .insert(Self::key(project_root), entry.clone());
        entry
    }

    /// Store only if nothing invalidated `project_root` since `generation`
    /// was read. Returns the stored entry, or `None` when it was stale.
    pub fn set_if_generation(
        &self,
        project_root: &Path,
        generation: u64,
        graph: Arc<ArchitectureGraph>,
    ) -> Option<CachedGraph> {
        let key = Self::key(project_root);
        let mut state = self.state.write();
        if state.generation(&key) != generation {
            debug!(project = %project_root.display(), "graph went stale during build, not cached");
            return None;
        }
        let entry = CachedGraph {
            graph,
            built_at: Utc::now(),
        };
        state.entries.insert(key, entry.clone());
        Some(entry)
    }

    /// Drop the entry for `project_root`. Returns whether one existed.
    pub fn invalidate(&self, project_root: &Path) -> bool {
        let key = Self::key(project_root);
        let mut state = self.state.write();
        let at = state.bump();
        state.invalidated_at.insert(key.clone(), at);
        let removed = state.entries.remove(&key).is_some();
        debug!(project = %project_root.display(), removed, "graph cache invalidated");
        removed
    }

    pub fn clear(&self) {
        let mut state = self.state.write();
        state.cleared_at = state.bump();
        state.entries.clear();
    }

    pub fn len(&self) -> usize {
        self.state.read().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{QualifiedId, Relationship};

    fn graph_with(n: usize) -> Arc<ArchitectureGraph> {
        let rels = (0..n)
            .map(|i| {
                Relationship::new(
                    QualifiedId::parse("a").unwrap(),
                    QualifiedId::parse(&format!("b{i}")).unwrap(),
                    "",
                )
            })
            .collect();
        Arc::new(ArchitectureGraph::build(Vec::new(), rels).unwrap())
    }

    #[test]
    fn get_set_invalidate() {
        let cache = GraphCache::new();
        let root = Path::new("/projects/shop");
        assert!(cache.get(root).is_none());

        cache.set(root, graph_with(2));
        assert_eq!(cache.get(root).unwrap().graph.edge_count(), 2);

        // Replaced on rebuild.
        cache.set(root, graph_with(3));
        assert_eq!(cache.get(root).unwrap().graph.edge_count(), 3);
        assert_eq!(cache.len(), 1);

        assert!(cache.invalidate(root));
        assert!(!cache.invalidate(root));
        assert!(cache.get(root).is_none());
    }

    #[test]
    fn projects_are_independent() {
        let cache = GraphCache::new();
        cache.set(Path::new("/p/one"), graph_with(1));
        cache.set(Path::new("/p/two"), graph_with(2));
        cache.invalidate(Path::new("/p/one"));
        assert!(cache.get(Path::new("/p/one")).is_none());
        assert_eq!(cache.get(Path::new("/p/two")).unwrap().graph.edge_count(), 2);
    }

    #[test]
    fn invalidation_during_build_wins() {
        let cache = GraphCache::new();
        let root = Path::new("/projects/shop");
        let before = cache.generation(root);

        cache.invalidate(root);
        assert!(cache.set_if_generation(root, before, graph_with(1)).is_none());
        assert!(cache.get(root).is_none());

        let now = cache.generation(root);
        assert!(cache.set_if_generation(root, now, graph_with(2)).is_some());
        assert_eq!(cache.get(root).unwrap().graph.edge_count(), 2);
    }

    #[test]
    fn generations_are_per_project() {
        let cache = GraphCache::new();
        let one = Path::new("/p/one");
        let two = Path::new("/p/two");
        let gen_two = cache.generation(two);

        cache.invalidate(one);
        assert!(cache.set_if_generation(two, gen_two, graph_with(1)).is_some());

        let gen_one = cache.generation(one);
        cache.clear();
        assert!(cache.set_if_generation(one, gen_one, graph_with(1)).is_none());
        assert!(cache.is_empty());
    }

    #[test]
    fn concurrent_readers_and_writers() {
        let cache = Arc::new(GraphCache::new());
        let root = PathBuf::from("/p/shared");
        cache.set(&root, graph_with(1));

        let handles: Vec<_> = (0..8)
            .map(|i| {
                let cache = Arc::clone(&cache);
                let root = root.clone();
                std::thread::spawn(move || {
                    for j in 0..200 {
                        if i == 0 && j % 50 == 0 {
                            cache.set(&root, graph_with(j % 7 + 1));
                        } else if let Some(hit) = cache.get(&root) {
                            assert!(hit.graph.edge_count() >= 1);
                        }
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        assert!(cache.get(&root).is_some());
    }
}
