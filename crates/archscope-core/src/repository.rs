//! Loading entities and diagram text from a project directory.

use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use ignore::WalkBuilder;
use serde::Deserialize;
use tracing::{debug, warn};

use crate::config::Settings;
use crate::error::{Error, Result};
use crate::model::{normalize_segment, Component, Container, ElementInfo, Project, QualifiedId, System};

pub const SYSTEM_FILE: &str = "system";
pub const CONTAINER_FILE: &str = "container";

/// Source of the entity hierarchy for one project.
pub trait EntityRepository: Send + Sync {
    fn load(&self, project_root: &Path) -> Result<Project>;
}

/// Source of diagram text. Reads happen on parse workers, so a failure here
/// only costs the one file.
pub trait DiagramSource: Send + Sync {
    fn read(&self, path: &Path) -> io::Result<String>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct FsDiagramSource;

impl DiagramSource for FsDiagramSource {
    fn read(&self, path: &Path) -> io::Result<String> {
        fs::read_to_string(path)
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct Frontmatter {
    name: Option<String>,
    description: Option<String>,
    technology: Option<String>,
    tags: Vec<String>,
    relationships: BTreeMap<String, Option<String>>,
}

impl From<Frontmatter> for ElementInfo {
    fn from(fm: Frontmatter) -> Self {
        let trimmed = |s: Option<String>| s.map(|s| s.trim().to_string()).filter(|s| !s.is_empty());
        ElementInfo {
            name: trimmed(fm.name).unwrap_or_default(),
            description: trimmed(fm.description).unwrap_or_default(),
            technology: trimmed(fm.technology),
            tags: fm
                .tags
                .into_iter()
                .map(|t| t.trim().to_string())
                .filter(|t| !t.is_empty())
                .collect::<BTreeSet<_>>(),
            relationships: fm
                .relationships
                .into_iter()
                .map(|(target, label)| (target, label.unwrap_or_default().trim().to_string()))
                .collect(),
        }
    }
}

/// Parse the YAML block between leading `---` fences. A document without
/// a leading fence has no metadata.
pub fn parse_frontmatter(path: &Path, text: &str) -> Result<ElementInfo> {
    let text = text.strip_prefix('\u{feff}').unwrap_or(text);
    let mut lines = text.lines();
    if lines.next().map(str::trim_end) != Some("---") {
        return Ok(ElementInfo::default());
    }
    let mut yaml = String::new();
    let mut closed = false;
    for line in lines {
        if matches!(line.trim_end(), "---" | "...") {
            closed = true;
            break;
        }
        yaml.push_str(line);
        yaml.push('\n');
    }
    let invalid = |source| Error::Frontmatter {
        path: path.to_path_buf(),
        source,
    };
    if !closed {
        return Err(invalid(<serde_yaml::Error as serde::de::Error>::custom(
            "frontmatter is missing its closing '---'",
        )));
    }
    if yaml.trim().is_empty() {
        return Ok(ElementInfo::default());
    }
    let fm: Frontmatter = serde_yaml::from_str(&yaml).map_err(invalid)?;
    Ok(fm.into())
}

#[derive(Default)]
struct Draft {
    name: String,
    info: Option<ElementInfo>,
    diagram: Option<PathBuf>,
    children: BTreeMap<String, Draft>,
}

impl Draft {
    fn named(name: &str) -> Self {
        Self {
            name: name.to_string(),
            ..Default::default()
        }
    }

    fn info(&mut self) -> ElementInfo {
        let mut info = self.info.take().unwrap_or_default();
        if info.name.is_empty() {
            info.name = self.name.clone();
        }
        info
    }
}

/// Reads the `<system>/<container>/<component>.md` tree under the
/// configured source directory. `.gitignore`d paths and hidden files are
/// skipped.
#[derive(Debug, Clone)]
pub struct FsRepository {
    source_dir: PathBuf,
}

impl Default for FsRepository {
    fn default() -> Self {
        Self::from_settings(&Settings::default())
    }
}

impl FsRepository {
    pub fn new(source_dir: impl Into<PathBuf>) -> Self {
        Self {
            source_dir: source_dir.into(),
        }
    }

    pub fn from_settings(settings: &Settings) -> Self {
        Self::new(&settings.source_dir)
    }

    fn read_info(path: &Path) -> Result<ElementInfo> {
        let text = fs::read_to_string(path).map_err(|e| Error::io(path, e))?;
        parse_frontmatter(path, &text)
    }
}

fn segment_of(name: &str, path: &Path) -> Option<String> {
    let segment = normalize_segment(name);
    if segment.is_none() {
        warn!(path = %path.display(), "skipping entry without a usable name");
    }
    segment
}

impl EntityRepository for FsRepository {
    fn load(&self, project_root: &Path) -> Result<Project> {
        let src = project_root.join(&self.source_dir);
        let mut project = Project::new(project_root);
        if !src.is_dir() {
            debug!(path = %src.display(), "no source directory; empty project");
            return Ok(project);
        }

        let walker = WalkBuilder::new(&src)
            .max_depth(Some(3))
            .require_git(false)
            .sort_by_file_name(|a, b| a.cmp(b))
            .build();

        let mut systems: BTreeMap<String, Draft> = BTreeMap::new();
        for entry in walker {
            let entry = match entry {
                Ok(entry) => entry,
                Err(e) => {
                    warn!(error = %e, "walker error");
                    continue;
                }
            };
            let path = entry.path();
            let Ok(rel) = path.strip_prefix(&src) else { continue };
            let parts: Vec<String> = rel.iter().map(|p| p.to_string_lossy().into_owned()).collect();
            let is_dir = entry.file_type().is_some_and(|t| t.is_dir());
            let (stem, ext) = match (path.file_stem(), path.extension()) {
                (Some(stem), Some(ext)) if !is_dir => (stem.to_string_lossy().into_owned(), ext.to_string_lossy().to_lowercase()),
                _ => (String::new(), String::new()),
            };

            match (parts.as_slice(), is_dir) {
                ([system], true) => {
                    let Some(seg) = segment_of(system, path) else { continue };
                    systems.entry(seg).or_insert_with(|| Draft::named(system));
                }
                ([system, container], true) => {
                    let (Some(s), Some(c)) = (normalize_segment(system), segment_of(container, path)) else {
                        continue;
                    };
                    if let Some(sys) = systems.get_mut(&s) {
                        sys.children.entry(c).or_insert_with(|| Draft::named(container));
                    }
                }
                ([system, _], false) if stem == SYSTEM_FILE => {
                    let Some(sys) = normalize_segment(system).and_then(|s| systems.get_mut(&s)) else {
                        continue;
                    };
                    match ext.as_str() {
                        "md" => sys.info = Some(Self::read_info(path)?),
                        "d2" => sys.diagram = Some(path.to_path_buf()),
                        _ => {}
                    }
                }
                ([system, container, _], false) => {
                    let (Some(s), Some(c)) = (normalize_segment(system), normalize_segment(container)) else {
                        continue;
                    };
                    let Some(cont) = systems.get_mut(&s).and_then(|sys| sys.children.get_mut(&c)) else {
                        continue;
                    };
                    if stem == CONTAINER_FILE {
                        match ext.as_str() {
                            "md" => cont.info = Some(Self::read_info(path)?),
                            "d2" => cont.diagram = Some(path.to_path_buf()),
                            _ => {}
                        }
                        continue;
                    }
                    if ext != "md" && ext != "d2" {
                        continue;
                    }
                    let Some(seg) = segment_of(&stem, path) else { continue };
                    let comp = cont.children.entry(seg).or_insert_with(|| Draft::named(&stem));
                    if ext == "md" {
                        comp.info = Some(Self::read_info(path)?);
                    } else {
                        comp.diagram = Some(path.to_path_buf());
                    }
                }
                _ => {}
            }
        }

        for (s, mut sys) in systems {
            let Some(system_id) = QualifiedId::from_segments([&s]) else { continue };
            let mut containers = Vec::new();
            for (c, mut cont) in std::mem::take(&mut sys.children) {
                let Some(container_id) = system_id.child(&c) else { continue };
                let mut components = Vec::new();
                for (k, mut comp) in std::mem::take(&mut cont.children) {
                    if comp.info.is_none() {
                        debug!(component = %k, container = %container_id, "diagram without a component file; ignored");
                        continue;
                    }
                    let Some(id) = container_id.child(&k) else { continue };
                    components.push(Component {
                        id,
                        info: comp.info(),
                        diagram: comp.diagram.take(),
                    });
                }
                containers.push(Container {
                    id: container_id,
                    info: cont.info(),
                    diagram: cont.diagram.take(),
                    components,
                });
            }
            project.systems.push(System {
                id: system_id,
                info: sys.info(),
                diagram: sys.diagram.take(),
                containers,
            });
        }

        debug!(
            root = %project_root.display(),
            entities = project.entities().len(),
            "loaded project"
        );
        Ok(project)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn write(root: &Path, rel: &str, text: &str) {
        let path = root.join(rel);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, text).unwrap();
    }

    #[test]
    fn frontmatter_fields() {
        let info = parse_frontmatter(
            Path::new("auth.md"),
            "---\nname: Auth Service\ndescription: Validates tokens\ntechnology: Rust\ntags: [security, ' backend ']\nrelationships:\n  db: reads users\n  audit:\n---\n# Auth\n",
        )
        .unwrap();
        assert_eq!(info.name, "Auth Service");
        assert_eq!(info.technology.as_deref(), Some("Rust"));
        assert!(info.tags.contains("backend"));
        assert_eq!(info.relationships.get("db").map(String::as_str), Some("reads users"));
        assert_eq!(info.relationships.get("audit").map(String::as_str), Some(""));
    }

    #[test]
    fn frontmatter_absent_or_broken() {
        assert_eq!(parse_frontmatter(Path::new("x.md"), "# Just prose\n").unwrap(), ElementInfo::default());
        assert_eq!(parse_frontmatter(Path::new("x.md"), "---\n---\n").unwrap(), ElementInfo::default());
        assert!(matches!(
            parse_frontmatter(Path::new("x.md"), "---\nname: x\n"),
            Err(Error::Frontmatter { .. })
        ));
        assert!(matches!(
            parse_frontmatter(Path::new("x.md"), "---\nname: [unclosed\n---\n"),
            Err(Error::Frontmatter { .. })
        ));
    }

    #[test]
    fn loads_the_hierarchy() {
        let dir = TempDir::new().unwrap();
        let root = dir.path();
        write(root, "src/Shop/system.md", "---\ndescription: Online shop\n---\n");
        write(root, "src/Shop/system.d2", "api -> db\n");
        write(root, "src/Shop/API/container.md", "---\ntechnology: Rust\n---\n");
        write(root, "src/Shop/API/Auth Service.md", "---\ndescription: Validates tokens\n---\n");
        write(root, "src/Shop/API/Auth Service.d2", "");
        write(root, "src/Shop/API/orphan.d2", "");
        write(root, "src/Shop/API/notes.txt", "ignored");
        write(root, "src/Shop/DB/container.md", "");

        let project = FsRepository::default().load(root).unwrap();
        let ids: Vec<&str> = project.entities().iter().map(|e| e.id.as_str()).collect();
        assert_eq!(ids, vec!["shop", "shop/api", "shop/api/auth-service", "shop/db"]);

        let system = &project.systems[0];
        assert_eq!(system.info.name, "Shop");
        assert_eq!(system.info.description, "Online shop");
        assert!(system.diagram.is_some());
        let auth = &system.containers[0].components[0];
        assert_eq!(auth.info.name, "Auth Service");
        assert!(auth.diagram.as_ref().unwrap().ends_with("Auth Service.d2"));
        assert_eq!(project.diagrams().len(), 2);
    }

    #[test]
    fn missing_source_dir_is_empty() {
        let dir = TempDir::new().unwrap();
        let project = FsRepository::new("nowhere").load(dir.path()).unwrap();
        assert!(project.systems.is_empty());
    }

    #[test]
    fn bad_frontmatter_fails_the_load() {
        let dir = TempDir::new().unwrap();
        write(dir.path(), "src/shop/system.md", "---\nname: [\n---\n");
        let err = FsRepository::default().load(dir.path()).unwrap_err();
        assert!(matches!(err, Error::Frontmatter { .. }));
    }
}
