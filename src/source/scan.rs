use std::path::PathBuf;
use thiserror::Error;
use walkdir::WalkDir;

use super::SourceFile;

#[derive(Debug, Error)]
pub enum ScanError {
    #[error("input directory not found: {0}")]
    MissingDir(PathBuf),

    #[error("failed to scan {path}: {source}")]
    Walk {
        path: PathBuf,
        #[source]
        source: walkdir::Error,
    },
}

/// Recursively list the source files under each input directory.
///
/// Hidden files and directories are skipped; files come back in directory
/// order, roots in the order given.
pub fn scan_dirs(dirs: &[PathBuf]) -> Result<Vec<SourceFile>, ScanError> {
    let mut files = Vec::new();

    for root in dirs {
        if !root.is_dir() {
            return Err(ScanError::MissingDir(root.clone()));
        }

        let walker = WalkDir::new(root)
            .sort_by_file_name()
            .into_iter()
            .filter_entry(|entry| {
                entry.depth() == 0 || !entry.file_name().to_string_lossy().starts_with('.')
            });

        for entry in walker {
            let entry = entry.map_err(|source| ScanError::Walk {
                path: root.clone(),
                source,
            })?;
            if !entry.file_type().is_file() {
                continue;
            }
            if let Some(file) = SourceFile::from_relative(root, entry.path()) {
                files.push(file);
            }
        }

        tracing::debug!(root = %root.display(), total = files.len(), "Scanned input directory");
    }

    Ok(files)
}
