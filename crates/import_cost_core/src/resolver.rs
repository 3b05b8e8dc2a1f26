use dashmap::DashMap;
use log::{debug, trace};
use path_clean::clean;
use serde_json::Value;
use std::path::{Path, PathBuf};

use crate::constants::{INDEX_FILES, MODULES_DIR, RESOLVE_EXTENSIONS};
use crate::package::{package_name, read_manifest};

/// Export conditions honored in `package.json` `exports` maps, in priority
/// order for a production browser bundle.
const EXPORT_CONDITIONS: &[&str] = &["browser", "import", "module", "require", "default"];

/// Node-style module resolver.
///
/// Bare specifiers are looked up in the configured module directories first,
/// then in every `node_modules` directory above the importing file.
pub struct Resolver {
    module_dirs: Vec<PathBuf>,
    cache: DashMap<(PathBuf, String), Option<PathBuf>>,
}

impl Resolver {
    pub fn new(module_dirs: Vec<PathBuf>) -> Self {
        Self { module_dirs, cache: DashMap::new() }
    }

    pub fn resolve(&self, from_file: &Path, request: &str) -> Option<PathBuf> {
        let base = from_file.parent().unwrap_or(from_file).to_path_buf();
        let key = (base.clone(), request.to_string());
        if let Some(v) = self.cache.get(&key) {
            trace!("Cache hit for resolve: '{}' from {}", request, base.display());
            return v.clone();
        }
        trace!("Resolving: '{}' from {}", request, from_file.display());

        let resolved =
            if request.starts_with("./") || request.starts_with("../") || request.starts_with('/') {
                resolve_file(&clean(base.join(request)))
            } else if request == "." || request == ".." {
                resolve_directory(&clean(base.join(request)))
            } else {
                self.module_dirs
                    .iter()
                    .find_map(|dir| resolve_node_module(dir, request))
                    .or_else(|| resolve_node_module_from_dir(&base, request))
            };

        match &resolved {
            Some(path) => debug!("Resolved '{}' to {}", request, path.display()),
            None => debug!("Failed to resolve '{}' from {}", request, from_file.display()),
        }
        self.cache.insert(key, resolved.clone());
        resolved
    }
}

fn resolve_file(p: &Path) -> Option<PathBuf> {
    // Try exact path first
    if p.is_file() {
        return Some(p.canonicalize().unwrap_or_else(|_| p.to_path_buf()));
    }

    // Try adding extensions
    for ext in RESOLVE_EXTENSIONS {
        let candidate = PathBuf::from(format!("{}.{}", p.display(), ext));
        if candidate.is_file() {
            return Some(candidate.canonicalize().unwrap_or(candidate));
        }
    }

    if p.is_dir() { resolve_directory(p) } else { None }
}

/// Entry point of a directory: its manifest's entry fields, then index files.
fn resolve_directory(dir: &Path) -> Option<PathBuf> {
    if let Ok(manifest) = read_manifest(dir) {
        for field in manifest.entry_fields() {
            let p = dir.join(field);
            if let Some(resolved) = resolve_entry(&p) {
                return Some(resolved);
            }
        }
    }

    for index_file in INDEX_FILES {
        let p = dir.join(index_file);
        if p.is_file() {
            return Some(p.canonicalize().unwrap_or(p));
        }
    }
    None
}

/// Like `resolve_file`, but a directory only resolves through index files so a
/// self-referencing `main` cannot loop.
fn resolve_entry(p: &Path) -> Option<PathBuf> {
    if p.is_file() {
        return Some(p.canonicalize().unwrap_or_else(|_| p.to_path_buf()));
    }
    for ext in RESOLVE_EXTENSIONS {
        let candidate = PathBuf::from(format!("{}.{}", p.display(), ext));
        if candidate.is_file() {
            return Some(candidate.canonicalize().unwrap_or(candidate));
        }
    }
    INDEX_FILES.iter().map(|index| p.join(index)).find(|c| c.is_file())
}

fn resolve_node_module_from_dir(start_dir: &Path, request: &str) -> Option<PathBuf> {
    trace!("Walking up from {:?} to find node_modules for '{}'", start_dir, request);
    let mut current_dir = Some(start_dir);
    while let Some(dir) = current_dir {
        let modules = dir.join(MODULES_DIR);
        if modules.is_dir()
            && let Some(resolved) = resolve_node_module(&modules, request)
        {
            return Some(resolved);
        }
        current_dir = dir.parent();
    }
    None
}

/// Resolve `request` inside one `node_modules` directory.
fn resolve_node_module(modules: &Path, request: &str) -> Option<PathBuf> {
    let name = package_name(request);
    let pkg_dir = modules.join(name);
    if !pkg_dir.exists() {
        trace!("node_modules path does not exist: {:?}", pkg_dir);
        return None;
    }
    let subpath = request[name.len()..].trim_start_matches('/');

    if let Ok(manifest) = read_manifest(&pkg_dir)
        && let Some(exports) = &manifest.exports
    {
        let key = if subpath.is_empty() { ".".to_string() } else { format!("./{subpath}") };
        if let Some(target) = export_target(exports, &key)
            && let Some(resolved) = resolve_file(&pkg_dir.join(target.trim_start_matches("./")))
        {
            return Some(resolved);
        }
    }

    if subpath.is_empty() { resolve_directory(&pkg_dir) } else { resolve_file(&pkg_dir.join(subpath)) }
}

/// Target of `key` in an `exports` field, following nested conditions.
fn export_target<'v>(exports: &'v Value, key: &str) -> Option<&'v str> {
    match exports {
        Value::String(s) if key == "." => Some(s),
        Value::Object(map) if map.keys().any(|k| k.starts_with('.')) => {
            map.get(key).and_then(condition_target)
        }
        Value::Object(_) if key == "." => condition_target(exports),
        _ => None,
    }
}

fn condition_target(value: &Value) -> Option<&str> {
    match value {
        Value::String(s) => Some(s),
        Value::Object(conditions) => EXPORT_CONDITIONS
            .iter()
            .filter_map(|c| conditions.get(*c))
            .find_map(condition_target),
        Value::Array(alternatives) => alternatives.iter().find_map(condition_target),
        _ => None,
    }
}
