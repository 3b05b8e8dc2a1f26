//! Constants shared by source collection, module resolution and bundling.
//!
//! ## Resolution
//!
//! Bundled modules are plain JavaScript (`.js`, `.mjs`, `.cjs`) or JSON.
//! Packages ship compiled output, so TypeScript and JSX sources are not
//! resolved inside `node_modules`.

/// File extensions of sources that can be scanned for imports
pub const SOURCE_EXTENSIONS: &[&str] =
    &["ts", "tsx", "mts", "cts", "js", "jsx", "mjs", "cjs", "vue", "svelte"];

/// Extensions to try when resolving module imports (in priority order)
pub const RESOLVE_EXTENSIONS: &[&str] = &["js", "mjs", "cjs", "json"];

/// Index file names to try when resolving directory imports
pub const INDEX_FILES: &[&str] = &["index.js", "index.mjs", "index.cjs", "index.json"];

/// Manifest file marking a project or package root
pub const MANIFEST_FILE: &str = "package.json";

/// Directory holding installed packages
pub const MODULES_DIR: &str = "node_modules";

/// Packages assumed to be provided by the host application
pub const DEFAULT_EXTERNALS: &[&str] = &["react", "react-dom"];

/// Node core modules that resolve to an empty module when bundled
pub const NODE_FALLBACKS: &[&str] =
    &["fs", "tls", "net", "path", "zlib", "http", "https", "stream", "crypto"];

/// Modules left out of bundles entirely
pub const IGNORED_MODULES: &[&str] = &["electron"];

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_index_files_use_resolve_extensions() {
        assert_eq!(INDEX_FILES.len(), RESOLVE_EXTENSIONS.len());
        for ext in RESOLVE_EXTENSIONS {
            let expected = format!("index.{}", ext);
            assert!(INDEX_FILES.contains(&expected.as_str()), "INDEX_FILES missing '{}'", expected);
        }
    }

    #[test]
    fn test_source_extensions_cover_markup() {
        assert!(SOURCE_EXTENSIONS.contains(&"vue"));
        assert!(SOURCE_EXTENSIONS.contains(&"svelte"));
        assert!(!SOURCE_EXTENSIONS.contains(&"json"));
    }
}
