pub mod cache;
pub mod config;
pub mod coordinator;
pub mod diagram;
pub mod drift;
pub mod error;
pub mod graph;
pub mod merge;
pub mod metadata;
pub mod model;
pub mod pattern;
pub mod query;
pub mod repository;
pub mod rules;
pub mod service;
pub mod store;

pub use cache::{CachedGraph, GraphCache};
pub use config::Settings;
pub use coordinator::{ParseCoordinator, ParseOutcome};
pub use diagram::{parse_diagram, ParseWarning, ParsedDiagram, Tooltip};
pub use drift::{has_errors, DriftIssue, DriftKind, Severity};
pub use error::{Error, Result};
pub use graph::{ArchitectureGraph, ElementFilter};
pub use merge::merge;
pub use model::{Element, ElementKind, Project, QualifiedId, Relationship, Scope};
pub use query::{
    CouplingReport, DependencyResponse, Direction, QueryLimits, RelationshipRequest, RelationshipResponse,
    SearchRequest, SearchResponse,
};
pub use repository::{DiagramSource, EntityRepository, FsDiagramSource, FsRepository};
pub use service::{ArchitectureService, BuildReport, BuildSummary};
pub use store::{write_atomic, RelationshipStore};
