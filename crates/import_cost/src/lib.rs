//! Import cost service.
//!
//! Streams the bundled size of every package import in a source file:
//!
//! - [`ImportCost::run`] parses the file and emits [`CostEvent`]s as sizes
//!   become available
//! - [`SizeCache`] memoizes sizes in memory and in a per-version JSON file,
//!   coalescing rapid edits of the same line through a debounce guard
//! - [`WorkerPool`] runs the bundler in `import-cost worker` child processes
//!
//! # Examples
//!
//! ```no_run
//! use import_cost::{CacheOptions, CostConfig, ImportCost, SizeCache};
//! use import_cost_core::Dialect;
//! use std::sync::Arc;
//!
//! # async fn example() -> Result<(), import_cost_core::CostError> {
//! let cache = Arc::new(SizeCache::new(CacheOptions::default()));
//! let runner = ImportCost::new(Arc::clone(&cache));
//!
//! let text = "import { debounce } from 'lodash';";
//! let stream = runner.run("/path/to/project/src/index.js", text, Some(Dialect::JavaScript), CostConfig::default());
//! for cost in stream.finish().await? {
//!     println!("{}: {} bytes", cost.import.specifier, cost.size);
//! }
//! cache.cleanup().await;
//! # Ok(())
//! # }
//! ```

mod cache;
mod config;
mod debounce;
mod orchestrator;
mod pool;
mod protocol;
mod reporter;

// Re-export public API
pub use cache::SizeCache;
pub use config::{CacheOptions, CostConfig, DEBUG_ENV, PoolOptions, RunArgs};
pub use debounce::{DebounceToken, Debouncer, RunId};
pub use import_cost_core::CostError;
pub use orchestrator::{CostEvent, CostStream, ImportCost};
pub use pool::WorkerPool;
pub use protocol::{WorkerRequest, WorkerResponse, serve};
pub use reporter::{format_size, print_costs};
