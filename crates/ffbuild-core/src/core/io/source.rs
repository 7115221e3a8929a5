use super::xml::XmlNode;
use crate::core::error::LoadError;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Where a force-field definition comes from.
#[derive(Debug, Clone, PartialEq)]
pub enum DefinitionSource {
    File(PathBuf),
    /// In-memory XML; `name` is used in error messages.
    Text { name: String, content: String },
}

impl DefinitionSource {
    pub fn file(path: impl Into<PathBuf>) -> Self {
        DefinitionSource::File(path.into())
    }

    pub fn text(name: &str, content: &str) -> Self {
        DefinitionSource::Text {
            name: name.to_string(),
            content: content.to_string(),
        }
    }
}

/// A parsed definition document.
#[derive(Debug, Clone)]
pub struct LoadedSource {
    pub origin: String,
    pub root: XmlNode,
}

/// Reads definition sources and follows their `<Include file=".."/>` elements.
///
/// Relative includes resolve against the including file's directory first and
/// then against each search path in order. Files already read (by canonical
/// path) are skipped, so include cycles terminate.
pub struct SourceLoader<'a> {
    search_paths: &'a [PathBuf],
    visited: HashSet<PathBuf>,
    loaded: Vec<LoadedSource>,
}

impl<'a> SourceLoader<'a> {
    pub fn new(search_paths: &'a [PathBuf]) -> Self {
        Self {
            search_paths,
            visited: HashSet::new(),
            loaded: Vec::new(),
        }
    }

    /// Loads every source, each followed by the files it includes.
    pub fn load_all(mut self, sources: &[DefinitionSource]) -> Result<Vec<LoadedSource>, LoadError> {
        for source in sources {
            match source {
                DefinitionSource::File(path) => {
                    let resolved = self.resolve(path, None).ok_or_else(|| LoadError::Io {
                        path: path.to_string_lossy().to_string(),
                        source: std::io::Error::new(
                            std::io::ErrorKind::NotFound,
                            "file not found in working directory or search paths",
                        ),
                    })?;
                    self.load_file(&resolved)?;
                }
                DefinitionSource::Text { name, content } => {
                    let root = parse_root(name, content)?;
                    let includes = include_files(&root)?;
                    self.loaded.push(LoadedSource {
                        origin: name.clone(),
                        root,
                    });
                    self.load_includes(name, &includes, None)?;
                }
            }
        }
        Ok(self.loaded)
    }

    fn load_file(&mut self, path: &Path) -> Result<(), LoadError> {
        let canonical = path.canonicalize().map_err(|e| LoadError::Io {
            path: path.to_string_lossy().to_string(),
            source: e,
        })?;
        if !self.visited.insert(canonical.clone()) {
            debug!("Skipping already loaded source '{}'.", canonical.display());
            return Ok(());
        }
        let content = std::fs::read_to_string(&canonical).map_err(|e| LoadError::Io {
            path: path.to_string_lossy().to_string(),
            source: e,
        })?;
        let origin = path.to_string_lossy().to_string();
        let root = parse_root(&origin, &content)?;
        let includes = include_files(&root)?;
        self.loaded.push(LoadedSource {
            origin: origin.clone(),
            root,
        });
        self.load_includes(&origin, &includes, canonical.parent())
    }

    fn load_includes(
        &mut self,
        origin: &str,
        includes: &[String],
        base: Option<&Path>,
    ) -> Result<(), LoadError> {
        for file in includes {
            let resolved = self
                .resolve(Path::new(file), base)
                .ok_or_else(|| LoadError::Include {
                    file: file.clone(),
                    origin: origin.to_string(),
                })?;
            self.load_file(&resolved)?;
        }
        Ok(())
    }

    fn resolve(&self, path: &Path, base: Option<&Path>) -> Option<PathBuf> {
        if path.is_absolute() {
            return path.is_file().then(|| path.to_path_buf());
        }
        base.into_iter()
            .chain(self.search_paths.iter().map(PathBuf::as_path))
            .map(|dir| dir.join(path))
            .chain(std::iter::once(path.to_path_buf()))
            .find(|candidate| candidate.is_file())
    }
}

fn parse_root(origin: &str, content: &str) -> Result<XmlNode, LoadError> {
    let root = XmlNode::parse_str(origin, content)?;
    if root.name != "ForceField" {
        return Err(LoadError::Malformed {
            origin: origin.to_string(),
            reason: format!("root element is <{}>, expected <ForceField>", root.name),
        });
    }
    Ok(root)
}

fn include_files(root: &XmlNode) -> Result<Vec<String>, LoadError> {
    root.children_named("Include")
        .map(|inc| inc.required_attr("file").map(str::to_string))
        .collect()
}
