use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::fmt;
use std::path::PathBuf;

// --- Identifiers ---

/// Fully-scoped `system/container/component` path (or a prefix of it for
/// systems and containers). Segments are always normalized.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, schemars::JsonSchema)]
#[serde(transparent)]
pub struct QualifiedId(String);

/// Lowercase, hyphenated form of a single identifier segment.
/// Returns `None` when nothing usable is left.
pub fn normalize_segment(raw: &str) -> Option<String> {
    let mut out = String::with_capacity(raw.len());
    let mut pending_hyphen = false;
    for c in raw.trim().chars() {
        if c.is_whitespace() || c == '_' || c == '-' {
            pending_hyphen = !out.is_empty();
            continue;
        }
        if pending_hyphen {
            out.push('-');
            pending_hyphen = false;
        }
        out.extend(c.to_lowercase());
    }
    if out.is_empty() {
        None
    } else {
        Some(out)
    }
}

impl QualifiedId {
    /// Parse a `/`-separated identifier, normalizing every segment.
    /// Fails on empty segments or more than three levels.
    pub fn parse(raw: &str) -> Option<Self> {
        let segments: Option<Vec<String>> = raw.split('/').map(normalize_segment).collect();
        Self::from_segments(segments?)
    }

    pub fn from_segments<S: AsRef<str>>(segments: impl IntoIterator<Item = S>) -> Option<Self> {
        let parts: Vec<String> = segments
            .into_iter()
            .map(|s| s.as_ref().to_string())
            .collect();
        if parts.is_empty() || parts.len() > 3 || parts.iter().any(|p| p.is_empty()) {
            return None;
        }
        Some(Self(parts.join("/")))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn segments(&self) -> impl Iterator<Item = &str> {
        self.0.split('/')
    }

    pub fn depth(&self) -> usize {
        self.segments().count()
    }

    /// Last segment.
    pub fn local_name(&self) -> &str {
        self.0.rsplit('/').next().unwrap_or(&self.0)
    }

    pub fn parent(&self) -> Option<QualifiedId> {
        self.0
            .rsplit_once('/')
            .map(|(parent, _)| QualifiedId(parent.to_string()))
    }

    pub fn child(&self, segment: &str) -> Option<QualifiedId> {
        let segment = normalize_segment(segment)?;
        Self::from_segments(self.segments().chain(std::iter::once(segment.as_str())))
    }

    /// True when `self` is `other` or lives underneath it.
    pub fn is_within(&self, other: &QualifiedId) -> bool {
        self == other
            || (self.0.len() > other.0.len()
                && self.0.starts_with(&other.0)
                && self.0.as_bytes()[other.0.len()] == b'/')
    }

    /// Kind implied by depth.
    pub fn kind(&self) -> ElementKind {
        match self.depth() {
            1 => ElementKind::System,
            2 => ElementKind::Container,
            _ => ElementKind::Component,
        }
    }
}

impl fmt::Display for QualifiedId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

// --- Scope ---

/// Where a reference was written. Relative references are resolved by
/// walking outward from the innermost scope.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Scope {
    pub system: Option<String>,
    pub container: Option<String>,
}

impl Scope {
    pub fn root() -> Self {
        Self::default()
    }

    pub fn system(system: &str) -> Self {
        Self {
            system: Some(system.to_string()),
            container: None,
        }
    }

    pub fn container(system: &str, container: &str) -> Self {
        Self {
            system: Some(system.to_string()),
            container: Some(container.to_string()),
        }
    }

    /// The scope an entity's own declarations are written in: its parent.
    pub fn enclosing(id: &QualifiedId) -> Self {
        let segs: Vec<&str> = id.segments().collect();
        match segs.as_slice() {
            [system, container, _] => Self::container(system, container),
            [system, _] => Self::system(system),
            _ => Self::root(),
        }
    }

    /// The scope a diagram drawn for `id` is written in. Component diagrams
    /// share their container's scope.
    pub fn inside(id: &QualifiedId) -> Self {
        let segs: Vec<&str> = id.segments().collect();
        match segs.as_slice() {
            [system] => Self::system(system),
            [system, container, ..] => Self::container(system, container),
            _ => Self::root(),
        }
    }

    fn prefixes(&self) -> Vec<Vec<String>> {
        let mut out = Vec::with_capacity(3);
        if let (Some(s), Some(c)) = (&self.system, &self.container) {
            out.push(vec![s.clone(), c.clone()]);
        }
        if let Some(s) = &self.system {
            out.push(vec![s.clone()]);
        }
        out.push(Vec::new());
        out
    }

    /// Resolve a raw reference. A reference containing `/` is already
    /// qualified; otherwise `.` separates relative segments. With a `known`
    /// set, the innermost candidate naming a known entity wins; otherwise the
    /// innermost valid candidate is returned.
    pub fn resolve(&self, raw: &str, known: Option<&HashSet<QualifiedId>>) -> Option<QualifiedId> {
        let raw = raw.trim();
        if raw.contains('/') {
            return QualifiedId::parse(raw);
        }
        let segments: Vec<&str> = raw.split('.').collect();
        self.resolve_segments(&segments, known)
    }

    /// Resolve an already-split relative reference.
    pub fn resolve_segments<S: AsRef<str>>(
        &self,
        segments: &[S],
        known: Option<&HashSet<QualifiedId>>,
    ) -> Option<QualifiedId> {
        let relative: Option<Vec<String>> = segments
            .iter()
            .map(|s| normalize_segment(s.as_ref()))
            .collect();
        let relative = relative?;

        let candidates: Vec<QualifiedId> = self
            .prefixes()
            .into_iter()
            .filter_map(|prefix| QualifiedId::from_segments(prefix.iter().chain(relative.iter())))
            .collect();

        if let Some(known) = known {
            if let Some(hit) = candidates.iter().find(|c| known.contains(*c)) {
                return Some(hit.clone());
            }
        }
        candidates.into_iter().next()
    }
}

// --- Entities ---

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, schemars::JsonSchema)]
#[serde(rename_all = "camelCase")]
pub enum ElementKind {
    System,
    Container,
    Component,
}

impl ElementKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ElementKind::System => "system",
            ElementKind::Container => "container",
            ElementKind::Component => "component",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "system" => Some(ElementKind::System),
            "container" => Some(ElementKind::Container),
            "component" => Some(ElementKind::Component),
            _ => None,
        }
    }
}

/// The metadata half of an entity, as written in its frontmatter.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ElementInfo {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub technology: Option<String>,
    #[serde(default, skip_serializing_if = "BTreeSet::is_empty")]
    pub tags: BTreeSet<String>,
    /// Declared relationships: target reference -> label.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub relationships: BTreeMap<String, String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Component {
    pub id: QualifiedId,
    pub info: ElementInfo,
    pub diagram: Option<PathBuf>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Container {
    pub id: QualifiedId,
    pub info: ElementInfo,
    pub diagram: Option<PathBuf>,
    pub components: Vec<Component>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct System {
    pub id: QualifiedId,
    pub info: ElementInfo,
    pub diagram: Option<PathBuf>,
    pub containers: Vec<Container>,
}

/// Flat view of any entity, used as the graph's node payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, schemars::JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct Element {
    pub id: QualifiedId,
    #[serde(rename = "type")]
    pub kind: ElementKind,
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub technology: Option<String>,
    #[serde(default, skip_serializing_if = "BTreeSet::is_empty")]
    pub tags: BTreeSet<String>,
}

impl Element {
    fn from_info(id: &QualifiedId, kind: ElementKind, info: &ElementInfo) -> Self {
        let name = if info.name.trim().is_empty() {
            id.local_name().to_string()
        } else {
            info.name.clone()
        };
        Self {
            id: id.clone(),
            kind,
            name,
            description: info.description.clone(),
            technology: info.technology.clone(),
            tags: info.tags.clone(),
        }
    }
}

/// A diagram file together with the scope its references resolve in.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiagramRef {
    pub path: PathBuf,
    pub scope: Scope,
}

/// Borrowed walk item: one entity with its declarations.
#[derive(Debug, Clone, Copy)]
pub struct EntityRef<'a> {
    pub id: &'a QualifiedId,
    pub kind: ElementKind,
    pub info: &'a ElementInfo,
    pub diagram: Option<&'a PathBuf>,
}

impl EntityRef<'_> {
    pub fn to_element(&self) -> Element {
        Element::from_info(self.id, self.kind, self.info)
    }
}

/// All entities of one project, as loaded by an `EntityRepository`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Project {
    pub root: PathBuf,
    pub systems: Vec<System>,
}

impl Project {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            systems: Vec::new(),
        }
    }

    /// Depth-first, declaration order: system, its containers, their components.
    pub fn entities(&self) -> Vec<EntityRef<'_>> {
        let mut out = Vec::new();
        for system in &self.systems {
            out.push(EntityRef {
                id: &system.id,
                kind: ElementKind::System,
                info: &system.info,
                diagram: system.diagram.as_ref(),
            });
            for container in &system.containers {
                out.push(EntityRef {
                    id: &container.id,
                    kind: ElementKind::Container,
                    info: &container.info,
                    diagram: container.diagram.as_ref(),
                });
                for component in &container.components {
                    out.push(EntityRef {
                        id: &component.id,
                        kind: ElementKind::Component,
                        info: &component.info,
                        diagram: component.diagram.as_ref(),
                    });
                }
            }
        }
        out
    }

    pub fn elements(&self) -> Vec<Element> {
        self.entities().iter().map(EntityRef::to_element).collect()
    }

    pub fn known_ids(&self) -> HashSet<QualifiedId> {
        self.entities().iter().map(|e| e.id.clone()).collect()
    }

    /// Every diagram file with the scope its references resolve in.
    pub fn diagrams(&self) -> Vec<DiagramRef> {
        self.entities()
            .iter()
            .filter_map(|e| {
                let path = e.diagram?.clone();
                Some(DiagramRef {
                    path,
                    scope: Scope::inside(e.id),
                })
            })
            .collect()
    }

    /// Remove an entity and everything beneath it, then scrub inline
    /// relationship declarations that pointed into the removed subtree.
    /// Returns the number of declarations scrubbed, or `None` if `id` is unknown.
    pub fn delete_element(&mut self, id: &QualifiedId) -> Option<usize> {
        let known = self.known_ids();
        let before = known.len();
        self.systems.retain(|s| &s.id != id);
        for system in &mut self.systems {
            system.containers.retain(|c| &c.id != id);
            for container in &mut system.containers {
                container.components.retain(|c| &c.id != id);
            }
        }
        if self.entities().len() == before {
            return None;
        }

        let mut scrubbed = 0;
        for system in &mut self.systems {
            let scope = Scope::enclosing(&system.id);
            scrubbed += scrub_relationships(&mut system.info, &scope, &known, id);
            for container in &mut system.containers {
                let scope = Scope::enclosing(&container.id);
                scrubbed += scrub_relationships(&mut container.info, &scope, &known, id);
                for component in &mut container.components {
                    let scope = Scope::enclosing(&component.id);
                    scrubbed += scrub_relationships(&mut component.info, &scope, &known, id);
                }
            }
        }
        Some(scrubbed)
    }
}

fn scrub_relationships(
    info: &mut ElementInfo,
    scope: &Scope,
    known: &HashSet<QualifiedId>,
    removed: &QualifiedId,
) -> usize {
    let before = info.relationships.len();
    info.relationships.retain(|target, _| {
        scope
            .resolve(target, Some(known))
            .map_or(true, |resolved| !resolved.is_within(removed))
    });
    before - info.relationships.len()
}

// --- Relationships ---

/// One directed edge. The merge key is `(source, target)`; label, type and
/// technology never create a second edge.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, schemars::JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct Relationship {
    pub source: QualifiedId,
    pub target: QualifiedId,
    #[serde(default)]
    pub label: String,
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub technology: Option<String>,
}

impl Relationship {
    pub fn new(source: QualifiedId, target: QualifiedId, label: impl Into<String>) -> Self {
        Self {
            source,
            target,
            label: label.into(),
            kind: None,
            technology: None,
        }
    }

    pub fn key(&self) -> (&QualifiedId, &QualifiedId) {
        (&self.source, &self.target)
    }
}
