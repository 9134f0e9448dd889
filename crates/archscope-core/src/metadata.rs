//! Relationships declared in entity frontmatter.

use std::collections::HashSet;

use tracing::warn;

use crate::model::{EntityRef, Project, QualifiedId, Relationship, Scope};

/// Extract one entity's declared relationships. Short targets resolve
/// against the entity's enclosing scope; qualified targets pass through.
/// Targets that cannot be normalized at all are dropped with a warning.
pub fn extract_entity(entity: &EntityRef<'_>, known: Option<&HashSet<QualifiedId>>) -> Vec<Relationship> {
    let scope = Scope::enclosing(entity.id);
    entity
        .info
        .relationships
        .iter()
        .filter_map(|(target, label)| match scope.resolve(target, known) {
            Some(resolved) => Some(Relationship::new(entity.id.clone(), resolved, label.trim())),
            None => {
                warn!(source = %entity.id, target = %target, "unusable relationship target");
                None
            }
        })
        .collect()
}

/// Extract every inline declaration in the project, in entity walk order.
pub fn extract_project(project: &Project) -> Vec<Relationship> {
    let known = project.known_ids();
    project
        .entities()
        .iter()
        .flat_map(|entity| extract_entity(entity, Some(&known)))
        .collect()
}
