use anyhow::{Context, Result};
use log::{debug, trace};
use serde::Deserialize;
use serde_json::Value;
use std::{
    collections::BTreeMap,
    fs,
    path::{Path, PathBuf},
};

use crate::constants::{MANIFEST_FILE, MODULES_DIR};
use crate::error::CostError;

/// The subset of `package.json` the pipeline reads.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Manifest {
    pub name: Option<String>,
    pub version: Option<String>,
    #[serde(default)]
    pub peer_dependencies: BTreeMap<String, Value>,
    pub main: Option<Value>,
    pub module: Option<Value>,
    pub browser: Option<Value>,
    pub exports: Option<Value>,
}

impl Manifest {
    /// `main`-like fields in the order a browser bundler prefers them.
    pub fn entry_fields(&self) -> impl Iterator<Item = &str> {
        [&self.browser, &self.module, &self.main]
            .into_iter()
            .filter_map(|field| field.as_ref().and_then(|v| v.as_str()))
    }
}

pub fn read_manifest(dir: &Path) -> Result<Manifest> {
    let path = dir.join(MANIFEST_FILE);
    trace!("Reading manifest at {}", path.display());
    let text =
        fs::read_to_string(&path).with_context(|| format!("Failed to read {}", path.display()))?;
    serde_json::from_str(&text).with_context(|| format!("Failed to parse {}", path.display()))
}

/// Package portion of a bare specifier: `@scope/name` or the first segment.
pub fn package_name(specifier: &str) -> &str {
    let mut segments = specifier.match_indices('/').map(|(idx, _)| idx);
    let end = if specifier.starts_with('@') {
        segments.nth(1)
    } else {
        segments.next()
    };
    match end {
        Some(idx) => &specifier[..idx],
        None => specifier,
    }
}

/// Nearest directory at or above `start` that contains a `package.json`.
pub fn find_package_root(start: &Path) -> Option<PathBuf> {
    let mut current = Some(start);
    while let Some(dir) = current {
        if dir.join(MANIFEST_FILE).is_file() {
            trace!("Found package root at {}", dir.display());
            return Some(dir.to_path_buf());
        }
        current = dir.parent();
    }
    debug!("No {} found above {}", MANIFEST_FILE, start.display());
    None
}

/// The `node_modules` directory that holds `package`, searched from the
/// project containing `file` outwards through enclosing projects.
pub fn package_module_container(file: &Path, package: &str) -> Result<PathBuf, CostError> {
    let mut current = file.parent().map(Path::to_path_buf);
    while let Some(dir) = current {
        let Some(project) = find_package_root(&dir) else {
            break;
        };
        let modules = project.join(MODULES_DIR);
        if modules.join(package).exists() {
            debug!("Found '{}' in {}", package, modules.display());
            return Ok(modules);
        }
        trace!("'{}' is not installed in {}", package, modules.display());
        current = project.parent().map(Path::to_path_buf);
    }
    Err(CostError::version(package, "package directory not found"))
}

/// On-disk location of the package named by `specifier`.
pub fn package_directory(file: &Path, specifier: &str) -> Result<PathBuf, CostError> {
    let package = package_name(specifier);
    Ok(package_module_container(file, package)?.join(package))
}

/// `"<package>@<version>"` for the installed copy `file` would import.
pub fn package_version_key(file: &Path, specifier: &str) -> Result<String, CostError> {
    let package = package_name(specifier);
    let dir = package_directory(file, specifier)?;
    let manifest = read_manifest(&dir).map_err(|e| CostError::version(package, format!("{e:#}")))?;
    let version = manifest
        .version
        .ok_or_else(|| CostError::version(package, "manifest has no version"))?;
    Ok(format!("{package}@{version}"))
}
