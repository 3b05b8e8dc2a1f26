use anyhow::Result;
use ignore::WalkBuilder;
use log::{debug, trace};
use std::path::{Path, PathBuf};

use crate::constants::{MODULES_DIR, SOURCE_EXTENSIONS};

/// Source files under `root` that can be scanned for imports.
///
/// A file path is returned as is. Directories are walked honoring
/// `.gitignore`, and installed packages are never descended into.
pub fn collect_sources(root: &Path) -> Result<Vec<PathBuf>> {
    if root.is_file() {
        return Ok(vec![root.to_path_buf()]);
    }

    debug!("Walking directory tree from root: {}", root.display());
    let walker = WalkBuilder::new(root)
        .hidden(false)
        .ignore(true)
        .git_ignore(true)
        .filter_entry(|dent| dent.file_name() != MODULES_DIR && dent.file_name() != ".git")
        .build();

    let mut files: Vec<PathBuf> = Vec::new();
    for res in walker {
        let dent = res?;
        let p = dent.path();
        if !p.is_file() {
            continue;
        }

        if let Some(ext) = p.extension().and_then(|e| e.to_str())
            && SOURCE_EXTENSIONS.contains(&ext)
        {
            trace!("Found source file: {}", p.display());
            files.push(p.to_path_buf());
        }
    }
    files.sort();
    debug!("Collected {} source files", files.len());
    Ok(files)
}
