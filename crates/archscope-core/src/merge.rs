use std::collections::HashSet;

use tracing::debug;

use crate::model::{QualifiedId, Relationship};

/// Union of the two declaration sources, one edge per `(source, target)`.
///
/// Metadata is inserted first, so a metadata declaration always wins over a
/// diagram arrow for the same edge, whatever either label says. Within each
/// source the first declaration wins. Output keeps first-insertion order.
pub fn merge(metadata: Vec<Relationship>, diagram: Vec<Relationship>) -> Vec<Relationship> {
    let capacity = metadata.len() + diagram.len();
    let mut seen: HashSet<(QualifiedId, QualifiedId)> = HashSet::with_capacity(capacity);
    let mut merged = Vec::with_capacity(capacity);
    let mut shadowed = 0usize;

    for rel in metadata.into_iter().chain(diagram) {
        let key = (rel.source.clone(), rel.target.clone());
        if !seen.insert(key) {
            shadowed += 1;
            continue;
        }
        merged.push(rel);
    }

    debug!(edges = merged.len(), shadowed, "merged relationship sources");
    merged
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rel(s: &str, t: &str, label: &str) -> Relationship {
        Relationship::new(
            QualifiedId::parse(s).unwrap(),
            QualifiedId::parse(t).unwrap(),
            label,
        )
    }

    #[test]
    fn metadata_label_wins_over_diagram() {
        let merged = merge(
            vec![rel("s/c/a", "s/c/b", "validates")],
            vec![rel("s/c/a", "s/c/b", "calls"), rel("s/c/a", "s/c/c", "logs")],
        );
        assert_eq!(merged, vec![rel("s/c/a", "s/c/b", "validates"), rel("s/c/a", "s/c/c", "logs")]);
    }

    #[test]
    fn keys_stay_unique_under_random_input() {
        let names = ["a", "b", "c", "d", "e"];
        for _ in 0..50 {
            let make = |n: usize| -> Vec<Relationship> {
                (0..n)
                    .map(|_| {
                        rel(
                            &format!("s/{}", names[fastrand::usize(..names.len())]),
                            &format!("s/{}", names[fastrand::usize(..names.len())]),
                            &fastrand::u32(..).to_string(),
                        )
                    })
                    .collect()
            };
            let metadata = make(fastrand::usize(0..20));
            let diagram = make(fastrand::usize(0..20));
            let merged = merge(metadata.clone(), diagram.clone());

            let keys: HashSet<_> = merged.iter().map(|r| r.key()).collect();
            assert_eq!(keys.len(), merged.len());

            // Every input key survives, and metadata's first label is kept.
            let all: HashSet<_> = metadata.iter().chain(&diagram).map(|r| r.key()).collect();
            assert_eq!(all.len(), merged.len());
            for m in &metadata {
                let kept = merged.iter().find(|r| r.key() == m.key()).unwrap();
                let first = metadata.iter().find(|r| r.key() == m.key()).unwrap();
                assert_eq!(kept.label, first.label);
            }
        }
    }

    #[test]
    fn empty_inputs() {
        assert!(merge(Vec::new(), Vec::new()).is_empty());
    }
}
