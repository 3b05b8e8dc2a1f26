//! Core utilities for import cost analysis.
//!
//! This crate provides the pieces that do not need a runtime:
//! - Parsing import statements and synthesizing a standalone entry per import
//! - Locating installed packages and their versions
//! - Resolving module paths (relative, node_modules, package `exports`)
//! - Collecting source files from a project

mod collector;
mod constants;
mod error;
mod markup;
mod package;
mod parser;
mod resolver;
mod types;

// Re-export public API
pub use collector::collect_sources;
pub use constants::{
    DEFAULT_EXTERNALS, IGNORED_MODULES, INDEX_FILES, MANIFEST_FILE, MODULES_DIR, NODE_FALLBACKS,
    RESOLVE_EXTENSIONS, SOURCE_EXTENSIONS,
};
pub use error::CostError;
pub use markup::{ScriptBlock, extract_script};
pub use package::{
    Manifest, find_package_root, package_directory, package_module_container, package_name,
    package_version_key, read_manifest,
};
pub use parser::parse_imports;
pub use resolver::Resolver;
pub use types::{Dialect, ImportDescriptor, PackageCost, SizeResult};
