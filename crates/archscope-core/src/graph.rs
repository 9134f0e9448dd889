use std::collections::{BTreeMap, HashMap, HashSet};

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::model::{Element, ElementKind, QualifiedId, Relationship};
use crate::pattern::Glob;

/// Optional attribute filters; every filter that is set must match.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, schemars::JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ElementFilter {
    #[serde(default, rename = "type", skip_serializing_if = "Option::is_none")]
    pub kind: Option<ElementKind>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub technology: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tag: Option<String>,
}

impl ElementFilter {
    pub fn accepts(&self, element: &Element) -> bool {
        if let Some(kind) = self.kind {
            if element.kind != kind {
                return false;
            }
        }
        if let Some(tech) = &self.technology {
            let matches = element
                .technology
                .as_deref()
                .is_some_and(|t| t.trim().eq_ignore_ascii_case(tech.trim()));
            if !matches {
                return false;
            }
        }
        if let Some(tag) = &self.tag {
            if !element.tags.iter().any(|t| t.eq_ignore_ascii_case(tag.trim())) {
                return false;
            }
        }
        true
    }
}

/// Node index plus ordered adjacency. Built once from a merged relationship
/// set and shared read-only afterwards; rebuilding is the update path.
#[derive(Debug, Clone, Default)]
pub struct ArchitectureGraph {
    nodes: BTreeMap<QualifiedId, Element>,
    edges: Vec<Relationship>,
    keys: HashSet<(QualifiedId, QualifiedId)>,
    outgoing: HashMap<QualifiedId, Vec<usize>>,
    incoming: HashMap<QualifiedId, Vec<usize>>,
}

impl ArchitectureGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build from entities and an already-merged relationship set.
    ///
    /// A repeated `(source, target)` key carrying different data means the
    /// merge step was bypassed; that is reported instead of silently keeping
    /// one of them.
    pub fn build(elements: impl IntoIterator<Item = Element>, relationships: Vec<Relationship>) -> Result<Self> {
        let mut graph = Self::new();
        for element in elements {
            graph.add_element(element);
        }
        for rel in relationships {
            if let Some(existing) = graph.relationship(&rel.source, &rel.target) {
                if *existing != rel {
                    return Err(Error::Inconsistent(format!(
                        "edge {} -> {} declared twice ('{}' vs '{}')",
                        rel.source, rel.target, existing.label, rel.label
                    )));
                }
                continue;
            }
            graph.add_relationship(rel);
        }
        Ok(graph)
    }

    pub fn add_element(&mut self, element: Element) {
        self.nodes.insert(element.id.clone(), element);
    }

    /// Insert an edge into both indexes. Returns `false` (and changes
    /// nothing) when the `(source, target)` key is already present.
    pub fn add_relationship(&mut self, rel: Relationship) -> bool {
        if !self.keys.insert((rel.source.clone(), rel.target.clone())) {
            return false;
        }
        let index = self.edges.len();
        self.outgoing.entry(rel.source.clone()).or_default().push(index);
        self.incoming.entry(rel.target.clone()).or_default().push(index);
        self.edges.push(rel);
        true
    }

    pub fn element(&self, id: &QualifiedId) -> Option<&Element> {
        self.nodes.get(id)
    }

    pub fn contains(&self, id: &QualifiedId) -> bool {
        self.nodes.contains_key(id)
    }

    /// Entities in identifier order.
    pub fn elements(&self) -> impl Iterator<Item = &Element> {
        self.nodes.values()
    }

    /// All edges in merge order.
    pub fn relationships(&self) -> &[Relationship] {
        &self.edges
    }

    pub fn relationship(&self, source: &QualifiedId, target: &QualifiedId) -> Option<&Relationship> {
        if !self.keys.contains(&(source.clone(), target.clone())) {
            return None;
        }
        self.outgoing_edges(source).into_iter().find(|r| &r.target == target)
    }

    /// Edges leaving `id`, in insertion order. Empty for unknown ids.
    pub fn outgoing_edges(&self, id: &QualifiedId) -> Vec<&Relationship> {
        self.outgoing
            .get(id)
            .map(|ix| ix.iter().map(|&i| &self.edges[i]).collect())
            .unwrap_or_default()
    }

    /// Edges arriving at `id`, in insertion order. Empty for unknown ids.
    pub fn incoming_edges(&self, id: &QualifiedId) -> Vec<&Relationship> {
        self.incoming
            .get(id)
            .map(|ix| ix.iter().map(|&i| &self.edges[i]).collect())
            .unwrap_or_default()
    }

    pub fn out_degree(&self, id: &QualifiedId) -> usize {
        self.outgoing.get(id).map_or(0, Vec::len)
    }

    pub fn in_degree(&self, id: &QualifiedId) -> usize {
        self.incoming.get(id).map_or(0, Vec::len)
    }

    /// Every identifier that is an entity or an edge endpoint, sorted.
    pub fn node_ids(&self) -> Vec<&QualifiedId> {
        let mut ids: Vec<&QualifiedId> = self
            .nodes
            .keys()
            .chain(self.outgoing.keys())
            .chain(self.incoming.keys())
            .collect::<HashSet<_>>()
            .into_iter()
            .collect();
        ids.sort();
        ids
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    pub fn edge_count(&self) -> usize {
        self.edges.len()
    }

    /// Entities whose name matches `pattern` and that pass `filter`, in
    /// identifier order.
    pub fn find_by_glob(&self, pattern: &str, filter: &ElementFilter) -> Result<Vec<&Element>> {
        let glob = Glob::new(pattern)?;
        Ok(self
            .nodes
            .values()
            .filter(|e| glob.matches(&e.name) && filter.accepts(e))
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeSet;

    fn id(s: &str) -> QualifiedId {
        QualifiedId::parse(s).unwrap()
    }

    fn element(s: &str, name: &str, tech: Option<&str>, tags: &[&str]) -> Element {
        let id = id(s);
        Element {
            kind: id.kind(),
            id,
            name: name.to_string(),
            description: String::new(),
            technology: tech.map(str::to_string),
            tags: tags.iter().map(|t| t.to_string()).collect::<BTreeSet<_>>(),
        }
    }

    fn rel(s: &str, t: &str, label: &str) -> Relationship {
        Relationship::new(id(s), id(t), label)
    }

    fn sample() -> ArchitectureGraph {
        ArchitectureGraph::build(
            vec![
                element("shop", "Shop", None, &[]),
                element("shop/api", "API", Some("Rust"), &["backend"]),
                element("shop/api/auth", "Auth Service", Some("Rust"), &["security", "backend"]),
                element("shop/api/audit", "Audit Log", Some("Go"), &["backend"]),
                element("shop/web", "Web App", Some("React"), &["frontend"]),
            ],
            vec![
                rel("shop/web", "shop/api", "calls"),
                rel("shop/api/auth", "shop/api/audit", "logs"),
                rel("shop/api", "shop/api/auth", "delegates"),
            ],
        )
        .unwrap()
    }

    #[test]
    fn adjacency_is_ordered_and_total() {
        let g = sample();
        let api = id("shop/api");
        assert_eq!(g.outgoing_edges(&api)[0].target, id("shop/api/auth"));
        assert_eq!(g.incoming_edges(&api)[0].source, id("shop/web"));
        assert!(g.outgoing_edges(&id("nowhere")).is_empty());
        assert!(g.incoming_edges(&id("shop")).is_empty());
    }

    #[test]
    fn add_relationship_is_idempotent() {
        let mut g = sample();
        assert!(!g.add_relationship(rel("shop/web", "shop/api", "something else")));
        assert_eq!(g.edge_count(), 3);
        assert_eq!(g.relationship(&id("shop/web"), &id("shop/api")).unwrap().label, "calls");
        assert!(g.add_relationship(rel("shop/api", "shop/web", "pushes")));
        assert_eq!(g.in_degree(&id("shop/web")), 1);
    }

    #[test]
    fn conflicting_duplicates_are_an_internal_fault() {
        let err = ArchitectureGraph::build(
            Vec::new(),
            vec![rel("a", "b", "one"), rel("a", "b", "two")],
        )
        .unwrap_err();
        assert!(matches!(err, Error::Inconsistent(_)));
        // Identical duplicates are harmless.
        assert!(ArchitectureGraph::build(Vec::new(), vec![rel("a", "b", "x"), rel("a", "b", "x")]).is_ok());
    }

    #[test]
    fn glob_with_and_filters() {
        let g = sample();
        let all = g.find_by_glob("*", &ElementFilter::default()).unwrap();
        assert_eq!(all.len(), 5);

        let a_names = g.find_by_glob("a*", &ElementFilter::default()).unwrap();
        let names: Vec<&str> = a_names.iter().map(|e| e.name.as_str()).collect();
        assert_eq!(names, vec!["API", "Audit Log", "Auth Service"]);

        let rust = ElementFilter {
            technology: Some("rust".into()),
            ..Default::default()
        };
        assert_eq!(g.find_by_glob("*", &rust).unwrap().len(), 2);

        let rust_security = ElementFilter {
            technology: Some("Rust".into()),
            tag: Some("security".into()),
            ..Default::default()
        };
        let hits = g.find_by_glob("*", &rust_security).unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].id, id("shop/api/auth"));

        let containers = ElementFilter {
            kind: Some(ElementKind::Container),
            ..Default::default()
        };
        assert_eq!(g.find_by_glob("*", &containers).unwrap().len(), 2);
    }

    #[test]
    fn node_ids_include_dangling_endpoints() {
        let g = ArchitectureGraph::build(vec![element("a", "A", None, &[])], vec![rel("a", "ghost", "")]).unwrap();
        let ids: Vec<&str> = g.node_ids().iter().map(|i| i.as_str()).collect();
        assert_eq!(ids, vec!["a", "ghost"]);
        assert_eq!(g.node_count(), 1);
    }
}
