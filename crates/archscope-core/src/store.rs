use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::{Error, Result};
use crate::model::{QualifiedId, Relationship};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RelationshipFile {
    #[serde(default)]
    relationships: Vec<Relationship>,
}

/// Drop every record that starts or ends at `id`. Returns how many went.
pub fn remove_element_relationships(relationships: &mut Vec<Relationship>, id: &QualifiedId) -> usize {
    let before = relationships.len();
    relationships.retain(|r| &r.source != id && &r.target != id);
    before - relationships.len()
}

/// Write `contents` to a sibling temp file, then rename it over `path`, so
/// watchers and readers only ever see a complete file.
pub fn write_atomic(path: &Path, contents: &str) -> Result<()> {
    let dir = path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    fs::create_dir_all(dir).map_err(|e| Error::io(dir, e))?;
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "archscope".to_string());
    let tmp = dir.join(format!(".{name}.tmp"));

    fs::write(&tmp, contents).map_err(|e| Error::io(&tmp, e))?;
    fs::rename(&tmp, path).map_err(|e| Error::io(path, e))
}

/// The project's standalone relationship file.
#[derive(Debug, Clone)]
pub struct RelationshipStore {
    path: PathBuf,
}

impl RelationshipStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// A missing file is an empty set. Ids are re-normalized on the way in;
    /// records whose ids cannot be normalized are dropped with a warning.
    pub fn read(&self) -> Result<Vec<Relationship>> {
        let raw = match fs::read_to_string(&self.path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(Error::io(&self.path, e)),
        };
        if raw.trim().is_empty() {
            return Ok(Vec::new());
        }
        let file: RelationshipFile = serde_json::from_str(&raw)?;
        let mut out = Vec::with_capacity(file.relationships.len());
        for mut rel in file.relationships {
            match (QualifiedId::parse(rel.source.as_str()), QualifiedId::parse(rel.target.as_str())) {
                (Some(source), Some(target)) => {
                    rel.source = source;
                    rel.target = target;
                    out.push(rel);
                }
                _ => warn!(
                    path = %self.path.display(),
                    source = %rel.source,
                    target = %rel.target,
                    "skipping relationship with invalid id"
                ),
            }
        }
        debug!(path = %self.path.display(), count = out.len(), "read standalone relationships");
        Ok(out)
    }

    pub fn write(&self, relationships: &[Relationship]) -> Result<()> {
        let json = serde_json::to_string_pretty(&RelationshipFile {
            relationships: relationships.to_vec(),
        })?;
        write_atomic(&self.path, &json)
    }

    /// Remove every record touching `id` and persist the result.
    pub fn delete_element(&self, id: &QualifiedId) -> Result<usize> {
        let mut relationships = self.read()?;
        let removed = remove_element_relationships(&mut relationships, id);
        if removed > 0 {
            self.write(&relationships)?;
        }
        debug!(element = %id, removed, "deleted element relationships");
        Ok(removed)
    }
}
