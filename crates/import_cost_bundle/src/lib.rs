//! Size measurement for a single import.
//!
//! An import's synthesized entry source is written to a temporary file and
//! bundled in isolation: every reachable module is lowered to CommonJS with
//! the exports no importer reads removed, then compressed and wrapped in a
//! small module table, after which the whole bundle is minified. The
//! reported size is the byte length of the result, and the gzip size is
//! measured on the same bytes.
//!
//! ```no_run
//! use import_cost_bundle::calc_size;
//! use import_cost_core::{Dialect, parse_imports};
//! use std::path::Path;
//!
//! let file = Path::new("/path/to/project/src/index.js");
//! let imports = parse_imports(file, "import chai from 'chai';", Dialect::JavaScript).unwrap();
//! let size = calc_size(&imports[0]).unwrap();
//! println!("{} bytes, {} gzipped", size.size, size.gzip);
//! ```

mod bundler;
mod entry;
mod js;
mod loader;
mod lower;
mod shake;
mod size;

// Re-export public API
pub use bundler::{Asset, Bundle, BundleOptions, bundle};
pub use entry::EntryPoint;
pub use size::{calc_size, measure};
