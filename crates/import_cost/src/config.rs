use clap::Args;
use serde::{Deserialize, Serialize};
use std::{env, path::PathBuf, thread, time::Duration};

/// Setting this variable limits the worker pool to a single process.
pub const DEBUG_ENV: &str = "IMPORT_COST_DEBUG";

/// Worker subcommand of the `import-cost` binary.
pub const WORKER_SUBCOMMAND: &str = "worker";

const DEFAULT_DEBOUNCE: Duration = Duration::from_millis(500);
const MAX_WORKER_RETRIES: usize = 3;

/// Per-run settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CostConfig {
    /// Bundle in worker processes instead of on a blocking thread.
    pub concurrent: bool,
    /// Limit for one worker call. `None` waits indefinitely.
    #[serde(default)]
    pub max_call_time: Option<Duration>,
}

impl Default for CostConfig {
    fn default() -> Self {
        Self { concurrent: true, max_call_time: None }
    }
}

#[derive(Debug, Clone)]
pub struct PoolOptions {
    pub program: PathBuf,
    pub args: Vec<String>,
    pub max_workers: usize,
    /// Extra attempts after a worker crash.
    pub max_retries: usize,
}

impl Default for PoolOptions {
    fn default() -> Self {
        Self {
            program: env::current_exe().unwrap_or_else(|_| PathBuf::from("import-cost")),
            args: vec![WORKER_SUBCOMMAND.to_string()],
            max_workers: default_max_workers(),
            max_retries: MAX_WORKER_RETRIES,
        }
    }
}

/// One less than the CPU count, and never below one.
fn default_max_workers() -> usize {
    if env::var_os(DEBUG_ENV).is_some() {
        return 1;
    }
    thread::available_parallelism().map(|n| n.get().saturating_sub(1)).unwrap_or(1).max(1)
}

#[derive(Debug, Clone)]
pub struct CacheOptions {
    /// Directory of the durable cache file.
    pub cache_dir: PathBuf,
    pub debounce_delay: Duration,
    pub pool: PoolOptions,
}

impl Default for CacheOptions {
    fn default() -> Self {
        Self {
            cache_dir: env::temp_dir().join("import-cost"),
            debounce_delay: DEFAULT_DEBOUNCE,
            pool: PoolOptions::default(),
        }
    }
}

/// Command line flags shared by the CLI subcommands.
#[derive(Debug, Clone, Args)]
pub struct RunArgs {
    /// Bundle in worker processes (false bundles in-process)
    #[arg(long, default_value_t = true, action = clap::ArgAction::Set)]
    pub concurrent: bool,

    /// Per-import time limit for worker calls, in milliseconds
    #[arg(long)]
    pub max_call_time: Option<u64>,

    /// Directory holding the durable cache file
    #[arg(long)]
    pub cache_dir: Option<PathBuf>,

    /// Delay before a size calculation starts, in milliseconds
    #[arg(long, default_value = "500")]
    pub debounce_ms: u64,
}

impl RunArgs {
    pub fn cost_config(&self) -> CostConfig {
        CostConfig {
            concurrent: self.concurrent,
            max_call_time: self.max_call_time.map(Duration::from_millis),
        }
    }

    pub fn cache_options(&self) -> CacheOptions {
        let defaults = CacheOptions::default();
        CacheOptions {
            cache_dir: self.cache_dir.clone().unwrap_or(defaults.cache_dir),
            debounce_delay: Duration::from_millis(self.debounce_ms),
            pool: defaults.pool,
        }
    }
}
