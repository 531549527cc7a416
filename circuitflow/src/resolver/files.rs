//! Module sources available to import resolution.
//!
//! Resolution is synchronous, so everything it can see is loaded up front:
//! the engine's standard library and a snapshot of the project files.
//! Asynchronous loading goes through [`FileSource`] before a compile starts.

use crate::errors::PipelineError;
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Standard library modules keyed by logical module name.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StdLib {
    modules: BTreeMap<String, String>,
}

impl StdLib {
    /// Creates a standard library from a module map.
    #[must_use]
    pub fn new(modules: BTreeMap<String, String>) -> Self {
        Self { modules }
    }

    /// Returns the source of a module.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&str> {
        self.modules.get(name).map(String::as_str)
    }

    /// Returns the number of modules.
    #[must_use]
    pub fn len(&self) -> usize {
        self.modules.len()
    }

    /// Returns true if there are no modules.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.modules.is_empty()
    }
}

/// User-supplied project files keyed by normalized location.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProjectFiles {
    files: BTreeMap<String, String>,
}

impl ProjectFiles {
    /// Creates an empty file set.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a file, normalizing its location.
    #[must_use]
    pub fn with_file(mut self, location: &str, source: impl Into<String>) -> Self {
        self.insert(location, source);
        self
    }

    /// Inserts or replaces a file.
    pub fn insert(&mut self, location: &str, source: impl Into<String>) {
        self.files.insert(normalize(location), source.into());
    }

    /// Returns the source at a location.
    #[must_use]
    pub fn get(&self, location: &str) -> Option<&str> {
        self.files.get(location).map(String::as_str)
    }

    /// Returns the number of files.
    #[must_use]
    pub fn len(&self) -> usize {
        self.files.len()
    }

    /// Returns true if there are no files.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    /// Returns the files as a map, as carried in compile requests.
    #[must_use]
    pub fn to_map(&self) -> BTreeMap<String, String> {
        self.files.clone()
    }

    /// Loads every file a source lists.
    ///
    /// This is the only asynchronous step of import resolution; it must
    /// finish before compilation starts.
    pub async fn prefetch(source: &dyn FileSource) -> Result<Self, PipelineError> {
        let mut files = Self::new();
        for location in source.list().await? {
            let text = source.read(&location).await?;
            files.insert(&location, text);
        }
        debug!(count = files.len(), "Prefetched project files");
        Ok(files)
    }
}

impl From<BTreeMap<String, String>> for ProjectFiles {
    fn from(map: BTreeMap<String, String>) -> Self {
        let mut files = Self::new();
        for (location, source) in map {
            files.insert(&location, source);
        }
        files
    }
}

/// An asynchronous provider of project files.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait FileSource: Send + Sync {
    /// Lists the locations of all files.
    async fn list(&self) -> Result<Vec<String>, PipelineError>;

    /// Reads the file at a location.
    async fn read(&self, location: &str) -> Result<String, PipelineError>;
}

/// A [`FileSource`] backed by a directory on disk.
#[derive(Debug, Clone)]
pub struct DirectorySource {
    root: PathBuf,
    extension: Option<String>,
}

impl DirectorySource {
    /// Creates a source rooted at a directory.
    #[must_use]
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            extension: None,
        }
    }

    /// Only lists files with this extension.
    #[must_use]
    pub fn with_extension(mut self, extension: impl Into<String>) -> Self {
        self.extension = Some(extension.into());
        self
    }

    fn matches(&self, path: &Path) -> bool {
        match &self.extension {
            Some(ext) => path.extension().is_some_and(|e| e == ext.as_str()),
            None => true,
        }
    }
}

#[async_trait]
impl FileSource for DirectorySource {
    async fn list(&self) -> Result<Vec<String>, PipelineError> {
        let mut found = Vec::new();
        let mut pending = vec![self.root.clone()];

        while let Some(dir) = pending.pop() {
            let mut entries = tokio::fs::read_dir(&dir).await?;
            while let Some(entry) = entries.next_entry().await? {
                let path = entry.path();
                if entry.file_type().await?.is_dir() {
                    pending.push(path);
                } else if self.matches(&path) {
                    if let Ok(relative) = path.strip_prefix(&self.root) {
                        let parts: Vec<_> = relative
                            .components()
                            .map(|c| c.as_os_str().to_string_lossy().into_owned())
                            .collect();
                        found.push(parts.join("/"));
                    }
                }
            }
        }

        found.sort();
        Ok(found)
    }

    async fn read(&self, location: &str) -> Result<String, PipelineError> {
        let path = self.root.join(normalize(location));
        Ok(tokio::fs::read_to_string(path).await?)
    }
}

/// Joins an import path to the directory of the importing module.
///
/// Paths starting with `/` are taken from the project root.
#[must_use]
pub fn join_relative(current_location: &str, import_path: &str) -> String {
    if import_path.starts_with('/') {
        return normalize(import_path);
    }
    match current_location.rfind('/') {
        Some(idx) => normalize(&format!("{}/{}", &current_location[..idx], import_path)),
        None => normalize(import_path),
    }
}

/// Collapses `.` and `..` segments and strips leading/duplicate separators.
///
/// `..` segments that would climb above the root are dropped.
#[must_use]
pub fn normalize(path: &str) -> String {
    let mut parts: Vec<&str> = Vec::new();
    for segment in path.split('/') {
        match segment {
            "" | "." => {}
            ".." => {
                parts.pop();
            }
            other => parts.push(other),
        }
    }
    parts.join("/")
}
