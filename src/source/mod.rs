//! Source files: discovery, naming, and inclusion directives
//!
//! A source file's logical name is its path relative to the input root with
//! every extension removed; its extension list keeps each dot-separated
//! suffix in order (`js/app.min.js` -> name `js/app`, exts `[min, js]`).

mod directives;
mod scan;

pub use directives::{DirectiveError, DirectiveProvider, HeaderDirectives, Include, NoDirectives};
pub use scan::{ScanError, scan_dirs};

use std::collections::BTreeMap;
use std::path::{Component, Path, PathBuf};

use crate::handlers::AssetMeta;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceFile {
    path: PathBuf,
    name: String,
    exts: Vec<String>,
}

impl SourceFile {
    pub fn new(path: impl Into<PathBuf>, name: impl Into<String>, exts: Vec<String>) -> Self {
        Self {
            path: path.into(),
            name: name.into(),
            exts,
        }
    }

    /// Describe `path` found under `root`. Hidden files and paths that are
    /// not valid UTF-8 are skipped.
    pub fn from_relative(root: &Path, path: &Path) -> Option<Self> {
        let relative = path.strip_prefix(root).ok()?;
        let file_name = relative.file_name()?.to_str()?;
        if file_name.starts_with('.') {
            return None;
        }

        let mut parts = file_name.split('.');
        let stem = parts.next()?;
        let exts: Vec<String> = parts.map(str::to_string).collect();

        let mut segments = Vec::new();
        if let Some(parent) = relative.parent() {
            for component in parent.components() {
                if let Component::Normal(segment) = component {
                    segments.push(segment.to_str()?);
                }
            }
        }
        segments.push(stem);

        Some(Self::new(path, segments.join("/"), exts))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn exts(&self) -> &[String] {
        &self.exts
    }

    /// Extension the file's chain starts from
    pub fn ext(&self) -> &str {
        self.exts.last().map(String::as_str).unwrap_or("")
    }

    pub fn meta(&self) -> AssetMeta {
        AssetMeta::new(self.name.clone(), self.exts.clone())
    }
}

/// Logical name -> extension -> value, used to resolve directive references
#[derive(Debug, Clone)]
pub struct NameIndex<T> {
    names: BTreeMap<String, BTreeMap<String, T>>,
}

impl<T: Clone> NameIndex<T> {
    pub fn new() -> Self {
        Self {
            names: BTreeMap::new(),
        }
    }

    pub fn insert(&mut self, file: &SourceFile, value: T) {
        self.names
            .entry(file.name().to_string())
            .or_default()
            .insert(file.ext().to_string(), value);
    }

    /// Resolve `lib/util` (any extension, first by extension order) or
    /// `lib/util.js` (exact extension)
    pub fn resolve(&self, reference: &str) -> Option<T> {
        if let Some(files) = self.names.get(reference) {
            return files.values().next().cloned();
        }
        let (name, ext) = reference.rsplit_once('.')?;
        self.names.get(name)?.get(ext).cloned()
    }
}

impl<T: Clone> Default for NameIndex<T> {
    fn default() -> Self {
        Self::new()
    }
}
