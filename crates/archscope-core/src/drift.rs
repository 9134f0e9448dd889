//! Drift between what frontmatter declares and what diagrams draw.

use std::collections::HashSet;
use std::fmt;

use serde::Serialize;

use crate::diagram::Tooltip;
use crate::graph::ArchitectureGraph;
use crate::model::{QualifiedId, Relationship};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, schemars::JsonSchema)]
pub enum DriftKind {
    DescriptionMismatch,
    MissingComponent,
    OrphanedRelationship,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, schemars::JsonSchema)]
pub enum Severity {
    Warning,
    Error,
}

impl DriftKind {
    /// Severity is fixed per kind.
    pub fn severity(self) -> Severity {
        match self {
            DriftKind::DescriptionMismatch => Severity::Warning,
            DriftKind::MissingComponent => Severity::Error,
            DriftKind::OrphanedRelationship => Severity::Error,
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Severity::Warning => "warning",
            Severity::Error => "error",
        })
    }
}

/// One detected inconsistency. Only the validator creates these.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, schemars::JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct DriftIssue {
    component_id: QualifiedId,
    #[serde(rename = "type")]
    kind: DriftKind,
    severity: Severity,
    message: String,
    context: String,
}

impl DriftIssue {
    fn new(kind: DriftKind, component_id: QualifiedId, message: String, context: String) -> Self {
        Self {
            component_id,
            kind,
            severity: kind.severity(),
            message,
            context,
        }
    }

    pub fn component_id(&self) -> &QualifiedId {
        &self.component_id
    }

    pub fn kind(&self) -> DriftKind {
        self.kind
    }

    pub fn severity(&self) -> Severity {
        self.severity
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn context(&self) -> &str {
        &self.context
    }
}

impl fmt::Display for DriftIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}: {}", self.severity, self.component_id, self.message)
    }
}

/// The unmerged declarations drift is computed from.
#[derive(Debug, Clone, Copy, Default)]
pub struct DriftSources<'a> {
    pub metadata: &'a [Relationship],
    pub diagram: &'a [Relationship],
    pub tooltips: &'a [Tooltip],
}

fn squash(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Run all three checks against the entity set in `graph`. The result is
/// sorted by component, then kind; declaration order is kept within that.
pub fn validate(graph: &ArchitectureGraph, sources: DriftSources<'_>) -> Vec<DriftIssue> {
    let mut issues = Vec::new();
    issues.extend(description_mismatches(graph, sources.tooltips));
    issues.extend(missing_components(graph, sources.diagram));
    issues.extend(orphaned_relationships(graph, sources.metadata));
    issues.sort_by(|a, b| (&a.component_id, a.kind).cmp(&(&b.component_id, b.kind)));
    issues
}

/// True when any issue should fail a strict caller.
pub fn has_errors(issues: &[DriftIssue]) -> bool {
    issues.iter().any(|i| i.severity == Severity::Error)
}

fn description_mismatches(graph: &ArchitectureGraph, tooltips: &[Tooltip]) -> Vec<DriftIssue> {
    let mut seen = HashSet::new();
    tooltips
        .iter()
        .filter_map(|tip| {
            let element = graph.element(&tip.id)?;
            let drawn = squash(&tip.text);
            let declared = squash(&element.description);
            if drawn == declared || !seen.insert((&tip.id, drawn.clone())) {
                return None;
            }
            Some(DriftIssue::new(
                DriftKind::DescriptionMismatch,
                tip.id.clone(),
                format!("diagram tooltip differs from description: '{drawn}' vs '{declared}'"),
                format!("tooltip: {drawn}"),
            ))
        })
        .collect()
}

fn missing_components(graph: &ArchitectureGraph, diagram: &[Relationship]) -> Vec<DriftIssue> {
    let mut seen = HashSet::new();
    let mut issues = Vec::new();
    for rel in diagram {
        for (missing, side) in [(&rel.source, "source"), (&rel.target, "target")] {
            if graph.contains(missing) || !seen.insert((rel.key(), side)) {
                continue;
            }
            issues.push(DriftIssue::new(
                DriftKind::MissingComponent,
                rel.source.clone(),
                format!("diagram arrow {} -> {} references unknown {side} '{missing}'", rel.source, rel.target),
                format!("{side}: {missing}"),
            ));
        }
    }
    issues
}

fn orphaned_relationships(graph: &ArchitectureGraph, metadata: &[Relationship]) -> Vec<DriftIssue> {
    let mut seen = HashSet::new();
    let mut issues = Vec::new();
    for rel in metadata {
        for (missing, side) in [(&rel.source, "source"), (&rel.target, "target")] {
            if graph.contains(missing) || !seen.insert((rel.key(), side)) {
                continue;
            }
            issues.push(DriftIssue::new(
                DriftKind::OrphanedRelationship,
                rel.source.clone(),
                format!("declared relationship {} -> {} points at missing {side} '{missing}'", rel.source, rel.target),
                format!("{side}: {missing}"),
            ));
        }
    }
    issues
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Element, ElementKind};

    fn id(s: &str) -> QualifiedId {
        QualifiedId::parse(s).unwrap()
    }

    fn graph(ids: &[(&str, &str)]) -> ArchitectureGraph {
        let elements = ids.iter().map(|(i, desc)| Element {
            id: id(i),
            kind: ElementKind::Component,
            name: i.to_string(),
            description: desc.to_string(),
            technology: None,
            tags: Default::default(),
        });
        ArchitectureGraph::build(elements, Vec::new()).unwrap()
    }

    fn rel(s: &str, t: &str) -> Relationship {
        Relationship::new(id(s), id(t), "")
    }

    #[test]
    fn unknown_diagram_target_is_one_missing_component() {
        let g = graph(&[("s/c/a", ""), ("s/c/b", ""), ("s/c/c", "")]);
        let diagram = vec![rel("s/c/a", "s/c/b"), rel("s/c/a", "s/c/d")];
        let issues = validate(&g, DriftSources { diagram: &diagram, ..Default::default() });

        assert_eq!(issues.len(), 1);
        assert_eq!(issues[0].kind(), DriftKind::MissingComponent);
        assert_eq!(issues[0].severity(), Severity::Error);
        assert!(issues[0].message().contains("s/c/d"));
        assert!(has_errors(&issues));
    }

    #[test]
    fn deleted_target_leaves_an_orphan() {
        let g = graph(&[("s/c/a", "")]);
        let metadata = vec![rel("s/c/a", "s/c/gone")];
        let issues = validate(&g, DriftSources { metadata: &metadata, ..Default::default() });
        assert_eq!(issues.len(), 1);
        assert_eq!(issues[0].kind(), DriftKind::OrphanedRelationship);
        assert_eq!(issues[0].component_id(), &id("s/c/a"));
    }

    #[test]
    fn tooltip_mismatch_is_only_a_warning() {
        let g = graph(&[("s/c/a", "Validates  tokens"), ("s/c/b", "Stores sessions")]);
        let tooltips = vec![
            Tooltip { id: id("s/c/a"), text: "Validates tokens".into() },
            Tooltip { id: id("s/c/b"), text: "Caches sessions".into() },
            Tooltip { id: id("s/c/b"), text: "Caches sessions".into() },
            Tooltip { id: id("s/c/zzz"), text: "Unknown".into() },
        ];
        let issues = validate(&g, DriftSources { tooltips: &tooltips, ..Default::default() });
        assert_eq!(issues.len(), 1);
        assert_eq!(issues[0].kind(), DriftKind::DescriptionMismatch);
        assert_eq!(issues[0].severity(), Severity::Warning);
        assert!(!has_errors(&issues));
    }

    #[test]
    fn severity_is_a_function_of_kind() {
        let g = graph(&[("s/c/a", "x")]);
        let metadata = vec![rel("s/c/a", "s/c/m1"), rel("s/c/ghost", "s/c/a")];
        let diagram = vec![rel("s/c/a", "s/c/m2"), rel("s/c/a", "s/c/m2")];
        let tooltips = vec![Tooltip { id: id("s/c/a"), text: "y".into() }];
        let issues = validate(
            &g,
            DriftSources {
                metadata: &metadata,
                diagram: &diagram,
                tooltips: &tooltips,
            },
        );
        assert_eq!(issues.len(), 4);
        for issue in &issues {
            assert_eq!(issue.severity(), issue.kind().severity());
        }
        let expected = [
            (DriftKind::DescriptionMismatch, Severity::Warning),
            (DriftKind::MissingComponent, Severity::Error),
            (DriftKind::OrphanedRelationship, Severity::Error),
        ];
        for (kind, severity) in expected {
            assert_eq!(kind.severity(), severity);
        }
    }
}
