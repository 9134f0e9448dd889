//! Read-only queries over a built graph.
//!
//! Every list result is bounded: the caller's `limit` falls back to the
//! configured default and is clamped to the configured maximum, and the
//! response reports how many records matched before truncation.

use std::collections::{HashSet, VecDeque};

use serde::{Deserialize, Serialize};

use crate::config::Settings;
use crate::error::{Error, Result};
use crate::graph::{ArchitectureGraph, ElementFilter};
use crate::model::{Element, ElementKind, QualifiedId, Relationship};
use crate::pattern::Glob;

pub const DEFAULT_LIMIT: usize = 20;
pub const MAX_LIMIT: usize = 100;
pub const DEFAULT_MAX_HOPS: usize = 3;
pub const DEFAULT_COUPLING_THRESHOLD: usize = 5;
/// Hard ceiling on traversal depth, whatever the caller asks for.
pub const MAX_HOPS_LIMIT: usize = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueryLimits {
    pub default_limit: usize,
    pub max_limit: usize,
    pub max_hops: usize,
    pub coupling_threshold: usize,
}

impl Default for QueryLimits {
    fn default() -> Self {
        Self {
            default_limit: DEFAULT_LIMIT,
            max_limit: MAX_LIMIT,
            max_hops: DEFAULT_MAX_HOPS,
            coupling_threshold: DEFAULT_COUPLING_THRESHOLD,
        }
    }
}

impl QueryLimits {
    pub fn from_settings(settings: &Settings) -> Self {
        Self {
            default_limit: settings.default_limit.max(1),
            max_limit: settings.max_limit.max(1),
            max_hops: settings.max_hops.min(MAX_HOPS_LIMIT),
            coupling_threshold: settings.coupling_threshold,
        }
    }

    /// Missing or zero means "use the default"; anything above the maximum
    /// is cut down to it.
    pub fn page_size(&self, requested: Option<usize>) -> usize {
        requested
            .filter(|&n| n > 0)
            .unwrap_or(self.default_limit)
            .min(self.max_limit)
    }

    pub fn hops(&self, requested: Option<usize>) -> usize {
        requested.unwrap_or(self.max_hops).min(MAX_HOPS_LIMIT)
    }
}

// --- search_elements ---

#[derive(Debug, Clone, Default, Serialize, Deserialize, schemars::JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct SearchRequest {
    /// Glob over element names, e.g. `auth*` or `*Service`.
    pub query: String,
    #[serde(default, rename = "type")]
    pub kind: Option<ElementKind>,
    #[serde(default)]
    pub technology: Option<String>,
    #[serde(default)]
    pub tag: Option<String>,
    #[serde(default)]
    pub limit: Option<usize>,
}

impl SearchRequest {
    pub fn new(query: impl Into<String>) -> Self {
        Self {
            query: query.into(),
            ..Default::default()
        }
    }

    fn filter(&self) -> ElementFilter {
        ElementFilter {
            kind: self.kind,
            technology: self.technology.clone(),
            tag: self.tag.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, schemars::JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct SearchResponse {
    pub elements: Vec<Element>,
    pub total_matched: usize,
    pub limit: usize,
    pub truncated: bool,
}

pub fn search_elements(
    graph: &ArchitectureGraph,
    request: &SearchRequest,
    limits: QueryLimits,
) -> Result<SearchResponse> {
    let limit = limits.page_size(request.limit);
    let matched = graph.find_by_glob(&request.query, &request.filter())?;
    let total_matched = matched.len();
    let elements: Vec<Element> = matched.into_iter().take(limit).cloned().collect();
    Ok(SearchResponse {
        truncated: total_matched > elements.len(),
        elements,
        total_matched,
        limit,
    })
}

// --- find_relationships ---

#[derive(Debug, Clone, Default, Serialize, Deserialize, schemars::JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct RelationshipRequest {
    /// Glob over source ids, e.g. `shop/api/*`.
    #[serde(default)]
    pub source_pattern: Option<String>,
    /// Glob over target ids.
    #[serde(default)]
    pub target_pattern: Option<String>,
    /// Matches the relationship type, or the label when no type is set.
    #[serde(default)]
    pub relationship_type: Option<String>,
    #[serde(default)]
    pub limit: Option<usize>,
}

#[derive(Debug, Clone, PartialEq, Serialize, schemars::JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct RelationshipResponse {
    pub relationships: Vec<Relationship>,
    pub total_matched: usize,
    pub limit: usize,
    pub truncated: bool,
}

fn type_matches(rel: &Relationship, wanted: &str) -> bool {
    let wanted = wanted.trim().to_lowercase();
    match &rel.kind {
        Some(kind) => kind.trim().to_lowercase() == wanted,
        None => rel.label.to_lowercase().contains(&wanted),
    }
}

fn optional_glob(raw: Option<&str>) -> Result<Option<Glob>> {
    raw.map(str::trim)
        .filter(|p| !p.is_empty())
        .map(Glob::new)
        .transpose()
}

pub fn find_relationships(
    graph: &ArchitectureGraph,
    request: &RelationshipRequest,
    limits: QueryLimits,
) -> Result<RelationshipResponse> {
    let source = optional_glob(request.source_pattern.as_deref())?;
    let target = optional_glob(request.target_pattern.as_deref())?;
    if source.is_none() && target.is_none() {
        return Err(Error::InvalidQuery(
            "at least one of sourcePattern or targetPattern is required".into(),
        ));
    }
    let wanted = request
        .relationship_type
        .as_deref()
        .filter(|t| !t.trim().is_empty());

    let limit = limits.page_size(request.limit);
    let matched: Vec<&Relationship> = graph
        .relationships()
        .iter()
        .filter(|r| source.as_ref().map_or(true, |g| g.matches(r.source.as_str())))
        .filter(|r| target.as_ref().map_or(true, |g| g.matches(r.target.as_str())))
        .filter(|r| wanted.map_or(true, |t| type_matches(r, t)))
        .collect();
    let total_matched = matched.len();
    let relationships: Vec<Relationship> = matched.into_iter().take(limit).cloned().collect();
    Ok(RelationshipResponse {
        truncated: total_matched > relationships.len(),
        relationships,
        total_matched,
        limit,
    })
}

// --- query_dependencies ---

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, schemars::JsonSchema)]
#[serde(rename_all = "camelCase")]
pub enum Direction {
    /// What the element depends on.
    #[default]
    Outgoing,
    /// What depends on the element.
    Incoming,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, schemars::JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct Dependency {
    pub id: QualifiedId,
    /// Distance from the queried element; direct neighbours are 1.
    pub hops: usize,
    /// The element this one was reached from.
    pub via: QualifiedId,
    pub label: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, schemars::JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct DependencyResponse {
    pub id: QualifiedId,
    pub direction: Direction,
    pub max_hops: usize,
    pub dependencies: Vec<Dependency>,
}

/// Breadth-first walk from `id`, at most `max_hops` edges deep. Each node is
/// reported once, at its shortest distance, so cycles terminate.
pub fn query_dependencies(
    graph: &ArchitectureGraph,
    id: &str,
    max_hops: Option<usize>,
    direction: Direction,
    limits: QueryLimits,
) -> Result<DependencyResponse> {
    let root = QualifiedId::parse(id)
        .ok_or_else(|| Error::InvalidQuery(format!("'{id}' is not a valid element id")))?;
    if !graph.contains(&root) && graph.out_degree(&root) == 0 && graph.in_degree(&root) == 0 {
        return Err(Error::NotFound(root.to_string()));
    }
    let max_hops = limits.hops(max_hops);

    let mut visited: HashSet<QualifiedId> = HashSet::from([root.clone()]);
    let mut queue: VecDeque<(QualifiedId, usize)> = VecDeque::from([(root.clone(), 0)]);
    let mut dependencies = Vec::new();

    while let Some((node, distance)) = queue.pop_front() {
        if distance >= max_hops {
            continue;
        }
        let edges = match direction {
            Direction::Outgoing => graph.outgoing_edges(&node),
            Direction::Incoming => graph.incoming_edges(&node),
        };
        for edge in edges {
            let next = match direction {
                Direction::Outgoing => &edge.target,
                Direction::Incoming => &edge.source,
            };
            if !visited.insert(next.clone()) {
                continue;
            }
            dependencies.push(Dependency {
                id: next.clone(),
                hops: distance + 1,
                via: node.clone(),
                label: edge.label.clone(),
            });
            queue.push_back((next.clone(), distance + 1));
        }
    }

    Ok(DependencyResponse {
        id: root,
        direction,
        max_hops,
        dependencies,
    })
}

// --- analyze_coupling ---

#[derive(Debug, Clone, PartialEq, Eq, Serialize, schemars::JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct CouplingEntry {
    pub id: QualifiedId,
    pub in_degree: usize,
    pub out_degree: usize,
    pub total: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, schemars::JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct CouplingReport {
    pub threshold: usize,
    pub nodes: Vec<CouplingEntry>,
}

/// Nodes whose combined degree is strictly above `threshold`, highest first.
pub fn analyze_coupling(
    graph: &ArchitectureGraph,
    threshold: Option<usize>,
    limits: QueryLimits,
) -> CouplingReport {
    let threshold = threshold.unwrap_or(limits.coupling_threshold);
    let mut nodes: Vec<CouplingEntry> = graph
        .node_ids()
        .into_iter()
        .map(|id| {
            let in_degree = graph.in_degree(id);
            let out_degree = graph.out_degree(id);
            CouplingEntry {
                id: id.clone(),
                in_degree,
                out_degree,
                total: in_degree + out_degree,
            }
        })
        .filter(|e| e.total > threshold)
        .collect();
    nodes.sort_by(|a, b| b.total.cmp(&a.total).then_with(|| a.id.cmp(&b.id)));
    CouplingReport { threshold, nodes }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeSet;

    fn id(s: &str) -> QualifiedId {
        QualifiedId::parse(s).unwrap()
    }

    fn element(s: &str, tech: &str, tags: &[&str]) -> Element {
        let id = id(s);
        Element {
            kind: id.kind(),
            name: id.local_name().to_string(),
            id,
            description: String::new(),
            technology: Some(tech.to_string()),
            tags: tags.iter().map(|t| t.to_string()).collect::<BTreeSet<_>>(),
        }
    }

    fn rel(s: &str, t: &str, label: &str) -> Relationship {
        Relationship::new(id(s), id(t), label)
    }

    fn wide_graph(n: usize) -> ArchitectureGraph {
        let elements = (0..n).map(|i| element(&format!("s/c/svc-{i:03}"), "Rust", &[]));
        ArchitectureGraph::build(elements, Vec::new()).unwrap()
    }

    #[test]
    fn search_defaults_to_twenty() {
        let g = wide_graph(150);
        let res = search_elements(&g, &SearchRequest::new("svc-*"), QueryLimits::default()).unwrap();
        assert_eq!(res.elements.len(), 20);
        assert_eq!(res.total_matched, 150);
        assert!(res.truncated);
    }

    #[test]
    fn search_limit_is_clamped() {
        let g = wide_graph(150);
        let req = SearchRequest {
            limit: Some(150),
            ..SearchRequest::new("*")
        };
        let res = search_elements(&g, &req, QueryLimits::default()).unwrap();
        assert_eq!(res.elements.len(), 100);
        assert_eq!(res.limit, 100);
        assert_eq!(res.total_matched, 150);
    }

    #[test]
    fn search_filters_combine() {
        let g = ArchitectureGraph::build(
            vec![
                element("s/c/auth", "Rust", &["security"]),
                element("s/c/audit", "Rust", &[]),
                element("s/c/authz", "Go", &["security"]),
            ],
            Vec::new(),
        )
        .unwrap();
        let req = SearchRequest {
            technology: Some("rust".into()),
            tag: Some("security".into()),
            ..SearchRequest::new("au*")
        };
        let res = search_elements(&g, &req, QueryLimits::default()).unwrap();
        assert_eq!(res.total_matched, 1);
        assert_eq!(res.elements[0].id, id("s/c/auth"));
        assert!(!res.truncated);
    }

    #[test]
    fn relationships_need_a_pattern() {
        let g = wide_graph(1);
        let err = find_relationships(&g, &RelationshipRequest::default(), QueryLimits::default()).unwrap_err();
        assert!(matches!(err, Error::InvalidQuery(_)));
    }

    #[test]
    fn relationship_pages_default_and_clamp() {
        let rels: Vec<Relationship> = (0..150)
            .map(|i| rel("s/c/hub", &format!("s/c/leaf-{i:03}"), "feeds"))
            .collect();
        let g = ArchitectureGraph::build(Vec::new(), rels).unwrap();
        let mut req = RelationshipRequest {
            source_pattern: Some("s/c/hub".into()),
            ..Default::default()
        };

        let res = find_relationships(&g, &req, QueryLimits::default()).unwrap();
        assert_eq!(res.relationships.len(), 20);
        assert_eq!(res.limit, 20);
        assert_eq!(res.total_matched, 150);
        assert!(res.truncated);

        req.limit = Some(150);
        let res = find_relationships(&g, &req, QueryLimits::default()).unwrap();
        assert_eq!(res.relationships.len(), 100);
        assert_eq!(res.limit, 100);
        assert_eq!(res.total_matched, 150);
        assert!(res.truncated);
    }

    #[test]
    fn zero_default_limit_from_settings_is_ignored() {
        let settings = Settings {
            default_limit: 0,
            ..Settings::default()
        };
        let limits = QueryLimits::from_settings(&settings);
        assert_eq!(limits.page_size(None), 1);
        let res = search_elements(&wide_graph(3), &SearchRequest::new("*"), limits).unwrap();
        assert_eq!(res.elements.len(), 1);
    }

    #[test]
    fn relationships_filter_by_both_ends_and_type() {
        let mut typed = rel("s/c/api", "s/c/db", "reads orders");
        typed.kind = Some("sync".into());
        let g = ArchitectureGraph::build(
            Vec::new(),
            vec![
                typed,
                rel("s/c/api", "s/c/cache", "reads sessions"),
                rel("s/c/worker", "s/c/db", "writes"),
            ],
        )
        .unwrap();
        let limits = QueryLimits::default();

        let from_api = RelationshipRequest {
            source_pattern: Some("*/api".into()),
            ..Default::default()
        };
        assert_eq!(find_relationships(&g, &from_api, limits).unwrap().total_matched, 2);

        let api_to_db = RelationshipRequest {
            target_pattern: Some("*db".into()),
            ..from_api.clone()
        };
        let res = find_relationships(&g, &api_to_db, limits).unwrap();
        assert_eq!(res.relationships, vec![g.relationships()[0].clone()]);

        let sync = RelationshipRequest {
            relationship_type: Some("SYNC".into()),
            ..from_api.clone()
        };
        assert_eq!(find_relationships(&g, &sync, limits).unwrap().total_matched, 1);

        let by_label = RelationshipRequest {
            relationship_type: Some("sessions".into()),
            ..from_api
        };
        assert_eq!(find_relationships(&g, &by_label, limits).unwrap().relationships[0].target, id("s/c/cache"));
    }

    #[test]
    fn dependencies_terminate_on_cycles() {
        let g = ArchitectureGraph::build(
            Vec::new(),
            vec![
                rel("s/c/a", "s/c/b", "1"),
                rel("s/c/b", "s/c/c", "2"),
                rel("s/c/c", "s/c/a", "3"),
                rel("s/c/c", "s/c/d", "4"),
            ],
        )
        .unwrap();
        let res = query_dependencies(&g, "s/c/a", Some(10), Direction::Outgoing, QueryLimits::default()).unwrap();
        let seen: Vec<(&str, usize)> = res.dependencies.iter().map(|d| (d.id.as_str(), d.hops)).collect();
        assert_eq!(seen, vec![("s/c/b", 1), ("s/c/c", 2), ("s/c/d", 3)]);

        let short = query_dependencies(&g, "s/c/a", Some(1), Direction::Outgoing, QueryLimits::default()).unwrap();
        assert_eq!(short.dependencies.len(), 1);

        let dependents = query_dependencies(&g, "s/c/a", None, Direction::Incoming, QueryLimits::default()).unwrap();
        assert_eq!(dependents.dependencies[0].id, id("s/c/c"));
        assert_eq!(dependents.dependencies[0].label, "3");
    }

    #[test]
    fn dependencies_of_unknown_element() {
        let g = wide_graph(2);
        let err = query_dependencies(&g, "s/c/nope", None, Direction::Outgoing, QueryLimits::default()).unwrap_err();
        assert!(matches!(err, Error::NotFound(_)));
        let err = query_dependencies(&g, "a//b", None, Direction::Outgoing, QueryLimits::default()).unwrap_err();
        assert!(matches!(err, Error::InvalidQuery(_)));
        // Known but isolated elements simply have no dependencies.
        let res = query_dependencies(&g, "s/c/svc-000", None, Direction::Outgoing, QueryLimits::default()).unwrap();
        assert!(res.dependencies.is_empty());
    }

    #[test]
    fn coupling_above_threshold_sorted_descending() {
        let mut rels = Vec::new();
        for i in 0..6 {
            rels.push(rel("s/c/hub", &format!("s/c/leaf-{i}"), ""));
        }
        rels.push(rel("s/c/leaf-0", "s/c/other", ""));
        for i in 0..3 {
            rels.push(rel(&format!("s/c/leaf-{i}"), "s/c/sink", ""));
        }
        let g = ArchitectureGraph::build(Vec::new(), rels).unwrap();

        let report = analyze_coupling(&g, Some(2), QueryLimits::default());
        let ids: Vec<(&str, usize)> = report.nodes.iter().map(|e| (e.id.as_str(), e.total)).collect();
        assert_eq!(ids, vec![("s/c/hub", 6), ("s/c/leaf-0", 3), ("s/c/sink", 3)]);

        // Strictly greater than the threshold.
        assert!(analyze_coupling(&g, Some(6), QueryLimits::default()).nodes.is_empty());
        assert_eq!(analyze_coupling(&g, None, QueryLimits::default()).threshold, DEFAULT_COUPLING_THRESHOLD);
    }
}
