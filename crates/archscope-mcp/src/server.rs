use std::path::PathBuf;
use std::sync::Arc;

use archscope_core::{
    drift::Severity, rules::RULES, ArchitectureService, Direction, ElementKind, GraphCache, RelationshipRequest,
    SearchRequest,
};
use rmcp::{
    handler::server::{router::tool::ToolRouter, wrapper::Parameters},
    model::{CallToolResult, Content, ServerCapabilities, ServerInfo},
    schemars, tool, tool_handler, tool_router, ErrorData as McpError, ServerHandler,
};
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::watch::ProjectWatchers;

const INSTRUCTIONS: &str = "\
archscope answers questions about a C4 architecture documented as Markdown frontmatter plus D2 diagrams \
(`<sourceDir>/<system>/<container>/<component>.md` with optional `.d2` next to each file). \
Relationships come from two places: the `relationships` map in frontmatter and arrows in diagrams. \
They are merged into one graph, one edge per (source, target), frontmatter first.\n\n\
Element ids are `system/container/component`, lowercase and hyphenated. Every tool takes an optional \
`project` path; it defaults to the directory the server was started in.\n\n\
Start with `build_graph` to see warnings from broken diagrams, then use `search_elements`, \
`find_relationships`, `query_dependencies` and `analyze_coupling`. Run `validate_drift` after editing \
docs to catch arrows to missing elements and relationships left behind by deletes.";

// --- Request types ---

#[derive(Debug, Deserialize, schemars::JsonSchema)]
struct ProjectRequest {
    /// Project root, absolute or relative to the server's working directory. Default: working directory.
    project: Option<String>,
}

#[derive(Debug, Deserialize, schemars::JsonSchema)]
struct SearchElementsRequest {
    /// Project root. Default: working directory.
    project: Option<String>,
    /// Shell-style glob over element names, case-insensitive: `*` any run of characters, `?` exactly one (e.g. "auth*")
    query: String,
    /// Element type: "system", "container" or "component"
    #[serde(rename = "type")]
    kind: Option<String>,
    /// Exact technology, case-insensitive (e.g. "PostgreSQL")
    technology: Option<String>,
    /// Tag the element must carry
    tag: Option<String>,
    /// Maximum results. Default 20, capped at 100.
    limit: Option<usize>,
}

#[derive(Debug, Deserialize, schemars::JsonSchema)]
struct FindRelationshipsRequest {
    /// Project root. Default: working directory.
    project: Option<String>,
    /// Glob over source ids (e.g. "shop/api/*"). At least one of sourcePattern/targetPattern is required.
    #[serde(rename = "sourcePattern")]
    source_pattern: Option<String>,
    /// Glob over target ids (e.g. "*/db")
    #[serde(rename = "targetPattern")]
    target_pattern: Option<String>,
    /// Relationship type, or a word in the label when the relationship has no type
    #[serde(rename = "relationshipType")]
    relationship_type: Option<String>,
    /// Maximum results. Default 20, capped at 100.
    limit: Option<usize>,
}

#[derive(Debug, Deserialize, schemars::JsonSchema)]
struct QueryDependenciesRequest {
    /// Project root. Default: working directory.
    project: Option<String>,
    /// Element id, e.g. "shop/api/auth"
    id: String,
    /// How many edges deep to follow. Default from settings (3), never more than 10.
    #[serde(rename = "maxHops")]
    max_hops: Option<usize>,
    /// "outgoing" (what this element depends on, default) or "incoming" (what depends on it)
    direction: Option<Direction>,
}

#[derive(Debug, Deserialize, schemars::JsonSchema)]
struct AnalyzeCouplingRequest {
    /// Project root. Default: working directory.
    project: Option<String>,
    /// Report elements whose in-degree plus out-degree is above this. Default from settings (5).
    threshold: Option<usize>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct DriftResponse<'a> {
    failed: bool,
    errors: usize,
    warnings: usize,
    issues: &'a [archscope_core::DriftIssue],
}

// --- Helpers ---

fn json_result<T: Serialize>(value: &T) -> CallToolResult {
    match serde_json::to_string_pretty(value) {
        Ok(json) => CallToolResult::success(vec![Content::text(json)]),
        Err(e) => CallToolResult::error(vec![Content::text(format!("Serialization error: {e}"))]),
    }
}

fn error_result(e: archscope_core::Error) -> CallToolResult {
    CallToolResult::error(vec![Content::text(e.to_string())])
}

fn respond<T: Serialize>(result: archscope_core::Result<T>) -> Result<CallToolResult, McpError> {
    Ok(match result {
        Ok(value) => json_result(&value),
        Err(e) => error_result(e),
    })
}

// --- Server ---

#[derive(Clone)]
pub struct ArchscopeServer {
    tool_router: ToolRouter<Self>,
    service: Arc<ArchitectureService>,
    watchers: Arc<ProjectWatchers>,
    base: PathBuf,
    shutdown: CancellationToken,
}

#[tool_router]
impl ArchscopeServer {
    pub fn new(base: PathBuf) -> Self {
        Self {
            tool_router: Self::tool_router(),
            service: Arc::new(ArchitectureService::new(Arc::new(GraphCache::new()))),
            watchers: Arc::new(ProjectWatchers::new()),
            base,
            shutdown: CancellationToken::new(),
        }
    }

    /// Cancelled when the server stops; in-flight builds stop dispatching.
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    fn project_root(&self, requested: Option<&str>) -> PathBuf {
        let root = archscope_core::service::resolve_project_root(&self.base, requested);
        self.watchers.ensure(&root, Arc::clone(self.service.cache()));
        root
    }

    #[tool(
        description = "Build (or rebuild) the relationship graph for a project and cache it. Returns element and relationship counts, how many diagram files parsed or failed, and a warning for every skipped diagram line or file."
    )]
    async fn build_graph(&self, Parameters(req): Parameters<ProjectRequest>) -> Result<CallToolResult, McpError> {
        let root = self.project_root(req.project.as_deref());
        let report = self.service.build_graph(&root, self.shutdown.child_token()).await;
        respond(report.map(|r| r.summary()))
    }

    #[tool(
        description = "Find elements whose name matches a glob, optionally filtered by type, technology and tag (all filters must match). Returns {elements, totalMatched, limit, truncated}."
    )]
    async fn search_elements(
        &self,
        Parameters(req): Parameters<SearchElementsRequest>,
    ) -> Result<CallToolResult, McpError> {
        let kind = match req.kind.as_deref().map(str::trim).filter(|k| !k.is_empty()) {
            None => None,
            Some(k) => match ElementKind::parse(k) {
                Some(kind) => Some(kind),
                None => {
                    return Ok(CallToolResult::error(vec![Content::text(format!(
                        "Invalid type '{k}'. Must be one of: system, container, component"
                    ))]))
                }
            },
        };
        let root = self.project_root(req.project.as_deref());
        let request = SearchRequest {
            query: req.query,
            kind,
            technology: req.technology,
            tag: req.tag,
            limit: req.limit,
        };
        respond(self.service.search_elements(&root, &request).await)
    }

    #[tool(
        description = "List relationships whose source and/or target id matches a glob, optionally narrowed by relationship type. Returns {relationships: [{source, target, label, type?, technology?}], totalMatched, limit, truncated}."
    )]
    async fn find_relationships(
        &self,
        Parameters(req): Parameters<FindRelationshipsRequest>,
    ) -> Result<CallToolResult, McpError> {
        let root = self.project_root(req.project.as_deref());
        let request = RelationshipRequest {
            source_pattern: req.source_pattern,
            target_pattern: req.target_pattern,
            relationship_type: req.relationship_type,
            limit: req.limit,
        };
        respond(self.service.find_relationships(&root, &request).await)
    }

    #[tool(
        description = "Walk dependencies of an element breadth-first up to maxHops edges. Each reachable element is listed once with its distance, the element it was reached from, and the edge label. Safe on cyclic graphs."
    )]
    async fn query_dependencies(
        &self,
        Parameters(req): Parameters<QueryDependenciesRequest>,
    ) -> Result<CallToolResult, McpError> {
        let root = self.project_root(req.project.as_deref());
        let direction = req.direction.unwrap_or_default();
        respond(
            self.service
                .query_dependencies(&root, &req.id, req.max_hops, direction)
                .await,
        )
    }

    #[tool(
        description = "Report tightly coupled elements: those whose in-degree plus out-degree exceeds the threshold, most connected first."
    )]
    async fn analyze_coupling(
        &self,
        Parameters(req): Parameters<AnalyzeCouplingRequest>,
    ) -> Result<CallToolResult, McpError> {
        let root = self.project_root(req.project.as_deref());
        respond(self.service.analyze_coupling(&root, req.threshold).await)
    }

    #[tool(
        description = "Compare frontmatter with diagrams. Reports DescriptionMismatch (warning: tooltip differs from description), MissingComponent (error: diagram arrow to an element that does not exist) and OrphanedRelationship (error: declared relationship to a deleted element). `failed` is true when any error is present."
    )]
    async fn validate_drift(&self, Parameters(req): Parameters<ProjectRequest>) -> Result<CallToolResult, McpError> {
        let root = self.project_root(req.project.as_deref());
        let issues = match self.service.validate(&root).await {
            Ok(issues) => issues,
            Err(e) => return Ok(error_result(e)),
        };
        let errors = issues.iter().filter(|i| i.severity() == Severity::Error).count();
        Ok(json_result(&DriftResponse {
            failed: errors > 0,
            errors,
            warnings: issues.len() - errors,
            issues: &issues,
        }))
    }

    #[tool(description = "Drop the cached graph for a project so the next query rebuilds it")]
    async fn invalidate_cache(&self, Parameters(req): Parameters<ProjectRequest>) -> Result<CallToolResult, McpError> {
        let root = archscope_core::service::resolve_project_root(&self.base, req.project.as_deref());
        let removed = self.service.invalidate(&root);
        debug!(project = %root.display(), removed, "invalidate_cache");
        let text = if removed {
            format!("Invalidated cached graph for {}", root.display())
        } else {
            format!("No cached graph for {}", root.display())
        };
        Ok(CallToolResult::success(vec![Content::text(text)]))
    }

    #[tool(description = "Get the rules for authoring relationships in frontmatter and diagrams")]
    fn get_rules(&self) -> Result<CallToolResult, McpError> {
        Ok(CallToolResult::success(vec![Content::text(RULES)]))
    }
}

#[tool_handler]
impl ServerHandler for ArchscopeServer {
    fn get_info(&self) -> ServerInfo {
        let instructions = format!("{INSTRUCTIONS}\n\n## Relationship Rules\n{RULES}");
        ServerInfo {
            instructions: Some(instructions.into()),
            capabilities: ServerCapabilities::builder().enable_tools().build(),
            ..Default::default()
        }
    }
}
