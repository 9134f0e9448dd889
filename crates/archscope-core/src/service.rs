//! One entry point for building, caching, validating and querying a
//! project's relationship graph.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::cache::GraphCache;
use crate::config::Settings;
use crate::coordinator::{ParseCoordinator, ParseOutcome};
use crate::diagram::ParseWarning;
use crate::drift::{self, DriftIssue, DriftSources};
use crate::error::{Error, Result};
use crate::graph::ArchitectureGraph;
use crate::merge::merge;
use crate::metadata::extract_project;
use crate::model::{Element, Relationship};
use crate::query::{
    self, CouplingReport, DependencyResponse, Direction, QueryLimits, RelationshipRequest, RelationshipResponse,
    SearchRequest, SearchResponse,
};
use crate::repository::{DiagramSource, EntityRepository, FsDiagramSource, FsRepository};
use crate::store::RelationshipStore;

/// Result of one graph build.
#[derive(Debug, Clone)]
pub struct BuildReport {
    pub graph: Arc<ArchitectureGraph>,
    pub warnings: Vec<ParseWarning>,
    pub files_parsed: usize,
    pub files_failed: usize,
    pub files_skipped: usize,
    /// Only ever true when partial results were requested.
    pub cancelled: bool,
}

/// Serializable digest of a `BuildReport`.
#[derive(Debug, Clone, Serialize, schemars::JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct BuildSummary {
    pub elements: usize,
    pub relationships: usize,
    pub files_parsed: usize,
    pub files_failed: usize,
    pub files_skipped: usize,
    pub cancelled: bool,
    pub warnings: Vec<ParseWarning>,
}

impl BuildReport {
    pub fn summary(&self) -> BuildSummary {
        BuildSummary {
            elements: self.graph.node_count(),
            relationships: self.graph.edge_count(),
            files_parsed: self.files_parsed,
            files_failed: self.files_failed,
            files_skipped: self.files_skipped,
            cancelled: self.cancelled,
            warnings: self.warnings.clone(),
        }
    }
}

/// Both declaration sources, before merging.
struct Extraction {
    elements: Vec<Element>,
    metadata: Vec<Relationship>,
    diagrams: ParseOutcome,
}

/// Shared by every request of a serving session. Settings are read per
/// project unless fixed with [`ArchitectureService::with_settings`].
pub struct ArchitectureService {
    cache: Arc<GraphCache>,
    diagrams: Arc<dyn DiagramSource>,
    repository: Option<Arc<dyn EntityRepository>>,
    settings: Option<Settings>,
}

impl Default for ArchitectureService {
    fn default() -> Self {
        Self::new(Arc::new(GraphCache::new()))
    }
}

impl ArchitectureService {
    pub fn new(cache: Arc<GraphCache>) -> Self {
        Self {
            cache,
            diagrams: Arc::new(FsDiagramSource),
            repository: None,
            settings: None,
        }
    }

    pub fn with_settings(mut self, settings: Settings) -> Self {
        self.settings = Some(settings);
        self
    }

    pub fn with_repository(mut self, repository: Arc<dyn EntityRepository>) -> Self {
        self.repository = Some(repository);
        self
    }

    pub fn with_diagram_source(mut self, diagrams: Arc<dyn DiagramSource>) -> Self {
        self.diagrams = diagrams;
        self
    }

    pub fn cache(&self) -> &Arc<GraphCache> {
        &self.cache
    }

    pub fn settings_for(&self, project_root: &Path) -> Settings {
        self.settings
            .clone()
            .unwrap_or_else(|| Settings::load(project_root))
    }

    fn repository_for(&self, settings: &Settings) -> Arc<dyn EntityRepository> {
        match &self.repository {
            Some(repo) => Arc::clone(repo),
            None => Arc::new(FsRepository::from_settings(settings)),
        }
    }

    /// Load entities, then run metadata extraction and diagram parsing side
    /// by side. Both must finish before anything is merged.
    async fn extract(&self, project_root: &Path, settings: &Settings, cancel: &CancellationToken) -> Result<Extraction> {
        let repository = self.repository_for(settings);
        let root = project_root.to_path_buf();
        let project = tokio::task::spawn_blocking(move || repository.load(&root))
            .await
            .map_err(|e| Error::Task(e.to_string()))??;

        if cancel.is_cancelled() && !settings.partial_on_cancel {
            return Err(Error::Cancelled);
        }

        let elements = project.elements();
        let known = Arc::new(project.known_ids());
        let diagram_refs = project.diagrams();
        let store = RelationshipStore::new(settings.relationships_path(project_root));

        let metadata_task = tokio::task::spawn_blocking(move || -> Result<Vec<Relationship>> {
            let mut rels = extract_project(&project);
            let standalone = store.read()?;
            debug!(inline = rels.len(), standalone = standalone.len(), "extracted metadata relationships");
            rels.extend(standalone);
            Ok(rels)
        });
        let coordinator = ParseCoordinator::from_settings(settings);
        let parse = coordinator.parse_all(diagram_refs, Arc::clone(&self.diagrams), known, cancel.clone());

        let (metadata, diagrams) = tokio::join!(metadata_task, parse);
        let metadata = metadata.map_err(|e| Error::Task(e.to_string()))??;

        Ok(Extraction {
            elements,
            metadata,
            diagrams,
        })
    }

    /// Build the graph from scratch and cache it. If the project is
    /// invalidated while the build runs, the result is returned but not
    /// cached.
    ///
    /// On cancellation this is `Err(Cancelled)`, unless the project asks for
    /// partial results; a partial graph is returned but never cached.
    pub async fn build_graph(&self, project_root: &Path, cancel: CancellationToken) -> Result<BuildReport> {
        let started = Instant::now();
        let settings = self.settings_for(project_root);
        let generation = self.cache.generation(project_root);
        let extraction = self.extract(project_root, &settings, &cancel).await?;

        let cancelled = extraction.diagrams.cancelled;
        if cancelled && !settings.partial_on_cancel {
            return Err(Error::Cancelled);
        }

        let ParseOutcome {
            relationships: diagram_rels,
            warnings,
            files_parsed,
            files_failed,
            files_skipped,
            ..
        } = extraction.diagrams;
        let merged = merge(extraction.metadata, diagram_rels);
        let graph = Arc::new(ArchitectureGraph::build(extraction.elements, merged)?);

        let cached = !cancelled
            && self
                .cache
                .set_if_generation(project_root, generation, Arc::clone(&graph))
                .is_some();
        info!(
            project = %project_root.display(),
            elements = graph.node_count(),
            relationships = graph.edge_count(),
            warnings = warnings.len(),
            cancelled,
            cached,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "graph built"
        );
        Ok(BuildReport {
            graph,
            warnings,
            files_parsed,
            files_failed,
            files_skipped,
            cancelled,
        })
    }

    /// Cached graph, building it on a miss.
    pub async fn graph(&self, project_root: &Path) -> Result<Arc<ArchitectureGraph>> {
        if let Some(hit) = self.cache.get(project_root) {
            debug!(project = %project_root.display(), built_at = %hit.built_at, "graph cache hit");
            return Ok(hit.graph);
        }
        let report = self.build_graph(project_root, CancellationToken::new()).await?;
        Ok(report.graph)
    }

    /// Compare the two declaration sources against the current entity set.
    /// Always reads the sources fresh.
    pub async fn validate(&self, project_root: &Path) -> Result<Vec<DriftIssue>> {
        let settings = self.settings_for(project_root);
        let extraction = self.extract(project_root, &settings, &CancellationToken::new()).await?;
        let entities = ArchitectureGraph::build(extraction.elements, Vec::new())?;
        let issues = drift::validate(
            &entities,
            DriftSources {
                metadata: &extraction.metadata,
                diagram: &extraction.diagrams.relationships,
                tooltips: &extraction.diagrams.tooltips,
            },
        );
        info!(
            project = %project_root.display(),
            issues = issues.len(),
            errors = drift::has_errors(&issues),
            "drift validation finished"
        );
        Ok(issues)
    }

    fn limits(&self, project_root: &Path) -> QueryLimits {
        QueryLimits::from_settings(&self.settings_for(project_root))
    }

    pub async fn search_elements(&self, project_root: &Path, request: &SearchRequest) -> Result<SearchResponse> {
        let graph = self.graph(project_root).await?;
        query::search_elements(&graph, request, self.limits(project_root))
    }

    pub async fn find_relationships(
        &self,
        project_root: &Path,
        request: &RelationshipRequest,
    ) -> Result<RelationshipResponse> {
        let graph = self.graph(project_root).await?;
        query::find_relationships(&graph, request, self.limits(project_root))
    }

    pub async fn query_dependencies(
        &self,
        project_root: &Path,
        id: &str,
        max_hops: Option<usize>,
        direction: Direction,
    ) -> Result<DependencyResponse> {
        let graph = self.graph(project_root).await?;
        query::query_dependencies(&graph, id, max_hops, direction, self.limits(project_root))
    }

    pub async fn analyze_coupling(&self, project_root: &Path, threshold: Option<usize>) -> Result<CouplingReport> {
        let graph = self.graph(project_root).await?;
        Ok(query::analyze_coupling(&graph, threshold, self.limits(project_root)))
    }

    pub fn invalidate(&self, project_root: &Path) -> bool {
        self.cache.invalidate(project_root)
    }

    pub fn is_cached(&self, project_root: &Path) -> bool {
        self.cache.get(project_root).is_some()
    }
}

/// Resolve a caller-supplied project path against `base` when relative.
pub fn resolve_project_root(base: &Path, requested: Option<&str>) -> PathBuf {
    match requested.map(str::trim).filter(|r| !r.is_empty()) {
        Some(r) if Path::new(r).is_absolute() => PathBuf::from(r),
        Some(r) => base.join(r),
        None => base.to_path_buf(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn project_root_resolution() {
        let base = Path::new("/work");
        assert_eq!(resolve_project_root(base, None), PathBuf::from("/work"));
        assert_eq!(resolve_project_root(base, Some("  ")), PathBuf::from("/work"));
        assert_eq!(resolve_project_root(base, Some("docs")), PathBuf::from("/work/docs"));
        assert_eq!(resolve_project_root(base, Some("/abs")), PathBuf::from("/abs"));
    }
}
