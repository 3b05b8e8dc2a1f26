use anyhow::{Context, Result};
use dashmap::{DashMap, mapref::entry::Entry};
use futures::future::{BoxFuture, FutureExt, Shared};
use log::{debug, info, trace, warn};
use parking_lot::Mutex;
use std::{
    collections::BTreeMap,
    fs,
    path::{Path, PathBuf},
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
};

use import_cost_bundle::calc_size;
use import_cost_core::{
    CostError, ImportDescriptor, PackageCost, SizeResult, package_name, package_version_key,
};

use crate::config::{CacheOptions, CostConfig};
use crate::debounce::{Debouncer, RunId};
use crate::pool::WorkerPool;

type Computation = Shared<BoxFuture<'static, Result<SizeResult, CostError>>>;

enum Slot {
    Pending(Computation),
    Ready(SizeResult),
    /// Failures stay in memory only, so the next session retries them.
    Failed(CostError),
}

/// Two-tier size cache.
///
/// The volatile tier maps `<entry source>#<package>@<version>` to a pending
/// computation or its outcome. The durable tier is a JSON file per tool
/// version holding every positive size, rewritten in full on a blocking
/// thread after each success.
pub struct SizeCache {
    options: CacheOptions,
    sizes: DashMap<String, Slot>,
    versions: DashMap<(PathBuf, String), String>,
    debouncer: Arc<Debouncer>,
    pool: Mutex<Option<Arc<WorkerPool>>>,
    /// Sequence number of the last snapshot taken.
    snapshots: AtomicU64,
    /// Sequence number of the last snapshot written. Held while writing.
    written: Arc<Mutex<u64>>,
}

impl SizeCache {
    pub fn new(options: CacheOptions) -> Self {
        Self {
            debouncer: Arc::new(Debouncer::new(options.debounce_delay)),
            options,
            sizes: DashMap::new(),
            versions: DashMap::new(),
            pool: Mutex::new(None),
            snapshots: AtomicU64::new(0),
            written: Arc::new(Mutex::new(0)),
        }
    }

    /// Location of the durable tier.
    pub fn cache_file(&self) -> PathBuf {
        self.options.cache_dir.join(format!("ic-cache-{}.json", env!("CARGO_PKG_VERSION")))
    }

    /// Start a run. Lookups of one run never debounce each other.
    pub fn begin_run(&self) -> RunId {
        self.debouncer.begin_run()
    }

    /// Size of one import.
    ///
    /// Every failure except supersession is reported as a zero-size cost
    /// carrying the error; only `Debounced` is returned as `Err`, when a later
    /// run asked for the same `file#line`.
    pub async fn get_size(
        &self,
        import: ImportDescriptor,
        run: RunId,
        config: &CostConfig,
    ) -> Result<PackageCost, CostError> {
        self.load_durable();

        let version = match self.package_version(&import) {
            Ok(version) => version,
            Err(err) => {
                debug!("No version for '{}': {}", import.specifier, err);
                return Ok(PackageCost::failed(import, err));
            }
        };
        let key = format!("{}#{}", import.entry_source, version);

        let computation = match self.sizes.entry(key.clone()) {
            Entry::Occupied(slot) => match slot.get() {
                Slot::Ready(size) => {
                    trace!("Cache hit for {}", version);
                    return Ok(PackageCost::sized(import, *size));
                }
                Slot::Failed(err) => return Ok(PackageCost::failed(import, err.clone())),
                Slot::Pending(computation) => {
                    trace!("Joining pending computation for {}", version);
                    computation.clone()
                }
            },
            Entry::Vacant(slot) => {
                let computation = self.start(&import, run, config);
                slot.insert(Slot::Pending(computation.clone()));
                computation
            }
        };

        match computation.clone().await {
            Ok(size) => {
                self.settle(&key, &computation, Slot::Ready(size));
                self.persist().await;
                Ok(PackageCost::sized(import, size))
            }
            Err(CostError::Debounced) => {
                self.sizes.remove_if(&key, |_, slot| is_same(slot, &computation));
                Err(CostError::Debounced)
            }
            Err(err) => {
                warn!("Failed to size '{}': {}", import.specifier, err);
                self.settle(&key, &computation, Slot::Failed(err.clone()));
                Ok(PackageCost::failed(import, err))
            }
        }
    }

    /// New computation, guarded by a debounce token issued now.
    fn start(&self, import: &ImportDescriptor, run: RunId, config: &CostConfig) -> Computation {
        let token = self.debouncer.issue(&import.location_key(), run);
        let debouncer = Arc::clone(&self.debouncer);
        let pool = config.concurrent.then(|| self.pool());
        let max_call_time = config.max_call_time;
        let import = import.clone();

        async move {
            debouncer
                .run(token, async move {
                    match pool {
                        Some(pool) => pool.calc_size(&import, max_call_time).await,
                        None => tokio::task::spawn_blocking(move || calc_size(&import))
                            .await
                            .unwrap_or_else(|e| Err(CostError::worker(e))),
                    }
                })
                .await
        }
        .boxed()
        .shared()
    }

    fn settle(&self, key: &str, computation: &Computation, outcome: Slot) {
        if let Some(mut slot) = self.sizes.get_mut(key)
            && is_same(&slot, computation)
        {
            *slot = outcome;
        }
    }

    fn pool(&self) -> Arc<WorkerPool> {
        let mut pool = self.pool.lock();
        Arc::clone(pool.get_or_insert_with(|| Arc::new(WorkerPool::new(self.options.pool.clone()))))
    }

    fn package_version(&self, import: &ImportDescriptor) -> Result<String, CostError> {
        let dir = import.file.parent().unwrap_or(&import.file).to_path_buf();
        let key = (dir, package_name(&import.specifier).to_string());
        if let Some(version) = self.versions.get(&key) {
            return Ok(version.clone());
        }
        let version = package_version_key(&import.file, &import.specifier)?;
        self.versions.insert(key, version.clone());
        Ok(version)
    }

    /// Fill the volatile tier from the durable file when it is empty.
    fn load_durable(&self) {
        if !self.sizes.is_empty() {
            return;
        }
        let path = self.cache_file();
        if !path.is_file() {
            return;
        }
        match read_durable(&path) {
            Ok(entries) => {
                debug!("Loaded {} cached sizes from {}", entries.len(), path.display());
                for (key, size) in entries {
                    self.sizes.entry(key).or_insert(Slot::Ready(size));
                }
            }
            Err(e) => warn!("Ignoring unreadable cache file: {:#}", e),
        }
    }

    async fn persist(&self) {
        let snapshot: BTreeMap<String, SizeResult> = self
            .sizes
            .iter()
            .filter_map(|entry| match entry.value() {
                Slot::Ready(size) if size.size > 0 => Some((entry.key().clone(), *size)),
                _ => None,
            })
            .collect();
        if snapshot.is_empty() {
            return;
        }
        let seq = self.snapshots.fetch_add(1, Ordering::SeqCst) + 1;
        let written = Arc::clone(&self.written);
        let path = self.cache_file();

        let write = tokio::task::spawn_blocking(move || -> Result<()> {
            let mut last = written.lock();
            if *last > seq {
                trace!("Snapshot {} is older than the cache file, skipping", seq);
                return Ok(());
            }
            write_durable(&path, &snapshot)?;
            *last = seq;
            Ok(())
        });
        match write.await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => warn!("Failed to write cache file: {:#}", e),
            Err(e) => warn!("Cache writer task failed: {}", e),
        }
    }

    /// Forget every size, in memory and on disk.
    pub fn clear(&self) -> Result<()> {
        self.sizes.clear();
        let path = self.cache_file();
        if path.exists() {
            fs::remove_file(&path)
                .with_context(|| format!("Failed to remove {}", path.display()))?;
            info!("Removed {}", path.display());
        }
        Ok(())
    }

    /// Shut down the worker pool, if one was started.
    pub async fn cleanup(&self) {
        let pool = self.pool.lock().take();
        if let Some(pool) = pool {
            pool.shutdown().await;
        }
    }
}

fn is_same(slot: &Slot, computation: &Computation) -> bool {
    matches!(slot, Slot::Pending(pending) if pending.ptr_eq(computation))
}

fn read_durable(path: &Path) -> Result<BTreeMap<String, SizeResult>> {
    let text =
        fs::read_to_string(path).with_context(|| format!("Failed to read {}", path.display()))?;
    serde_json::from_str(&text).with_context(|| format!("Failed to parse {}", path.display()))
}

fn write_durable(path: &Path, snapshot: &BTreeMap<String, SizeResult>) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create {}", parent.display()))?;
    }
    let text = serde_json::to_string_pretty(snapshot)?;
    fs::write(path, text).with_context(|| format!("Failed to write {}", path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::{Duration, Instant};
    use tempfile::TempDir;

    const DELAY: Duration = Duration::from_millis(150);

    fn create_test_file(dir: &Path, path: &str, content: &str) -> PathBuf {
        let file_path = dir.join(path);
        if let Some(parent) = file_path.parent() {
            fs::create_dir_all(parent).expect("Failed to create parent directory");
        }
        fs::write(&file_path, content).expect("Failed to write test file");
        file_path
    }

    struct Fixture {
        project: TempDir,
        cache_dir: TempDir,
    }

    impl Fixture {
        fn new() -> Self {
            let project = TempDir::new().unwrap();
            let root = project.path();
            create_test_file(root, "package.json", "{}");
            create_test_file(root, "node_modules/chai/package.json", r#"{"version": "4.3.7"}"#);
            create_test_file(root, "node_modules/chai/index.js", "module.exports = { expect: function () {} };");
            create_test_file(root, "node_modules/broken/package.json", r#"{"version": "1.0.0"}"#);
            create_test_file(root, "node_modules/broken/index.js", "require('absent');");
            Self { project, cache_dir: TempDir::new().unwrap() }
        }

        fn cache(&self) -> SizeCache {
            SizeCache::new(CacheOptions {
                cache_dir: self.cache_dir.path().to_path_buf(),
                debounce_delay: DELAY,
                ..CacheOptions::default()
            })
        }

        fn import(&self, specifier: &str, line: usize) -> ImportDescriptor {
            ImportDescriptor {
                file: self.project.path().join("index.js"),
                specifier: specifier.to_string(),
                line,
                entry_source: format!("import * as tmp from '{specifier}';\nconsole.log(tmp);"),
            }
        }
    }

    fn in_process() -> CostConfig {
        CostConfig { concurrent: false, max_call_time: None }
    }

    /// Lookup in a fresh run.
    async fn lookup(cache: &SizeCache, import: ImportDescriptor) -> Result<PackageCost, CostError> {
        let config = in_process();
        cache.get_size(import, cache.begin_run(), &config).await
    }

    #[tokio::test]
    async fn test_second_lookup_is_cached() {
        let fixture = Fixture::new();
        let cache = fixture.cache();

        let started = Instant::now();
        let first = lookup(&cache, fixture.import("chai", 1)).await.unwrap();
        assert!(started.elapsed() >= DELAY);
        assert!(first.size > 0);
        assert_eq!(first.error, None);

        let started = Instant::now();
        let second = lookup(&cache, fixture.import("chai", 1)).await.unwrap();
        assert!(started.elapsed() < DELAY);
        assert_eq!((second.size, second.gzip), (first.size, first.gzip));
    }

    #[tokio::test]
    async fn test_concurrent_lookups_share_computation() {
        let fixture = Fixture::new();
        let cache = fixture.cache();

        let (a, b) = tokio::join!(
            lookup(&cache, fixture.import("chai", 1)),
            lookup(&cache, fixture.import("chai", 1)),
        );
        assert_eq!(a.unwrap().size, b.unwrap().size);
        assert_eq!(cache.sizes.len(), 1);
    }

    #[tokio::test]
    async fn test_superseded_request_is_debounced() {
        let fixture = Fixture::new();
        let cache = fixture.cache();
        let mut changed = fixture.import("chai", 1);
        changed.entry_source = "import { expect } from 'chai';\nconsole.log(expect);".to_string();

        let (first, second) = tokio::join!(
            lookup(&cache, fixture.import("chai", 1)),
            lookup(&cache, changed),
        );
        assert_eq!(first, Err(CostError::Debounced));
        assert!(second.unwrap().size > 0);
        assert_eq!(cache.sizes.len(), 1);
    }

    #[tokio::test]
    async fn test_same_run_lookups_on_one_line() {
        let fixture = Fixture::new();
        let cache = fixture.cache();
        let config = in_process();
        let run = cache.begin_run();
        let mut named = fixture.import("chai", 1);
        named.entry_source = "import { expect } from 'chai';\nconsole.log(expect);".to_string();

        let (first, second) = tokio::join!(
            cache.get_size(fixture.import("chai", 1), run, &config),
            cache.get_size(named, run, &config),
        );
        assert!(first.unwrap().size > 0);
        assert!(second.unwrap().size > 0);
        assert_eq!(cache.sizes.len(), 2);

        let text = fs::read_to_string(cache.cache_file()).unwrap();
        let entries: BTreeMap<String, SizeResult> = serde_json::from_str(&text).unwrap();
        assert_eq!(entries.len(), 2);
    }

    #[tokio::test]
    async fn test_missing_package_is_not_cached() {
        let fixture = Fixture::new();
        let cache = fixture.cache();

        let cost = lookup(&cache, fixture.import("sinon", 1)).await.unwrap();
        assert_eq!(cost.size, 0);
        assert_eq!(cost.error.unwrap().kind(), "VersionResolutionError");
        assert!(cache.sizes.is_empty());
    }

    #[tokio::test]
    async fn test_failure_is_kept_in_memory_only() {
        let fixture = Fixture::new();
        let cache = fixture.cache();

        let cost = lookup(&cache, fixture.import("broken", 1)).await.unwrap();
        assert_eq!(cost.size, 0);
        assert_eq!(cost.error.as_ref().unwrap().kind(), "BundleError");
        assert!(!cache.cache_file().exists());

        let started = Instant::now();
        let again = lookup(&cache, fixture.import("broken", 1)).await.unwrap();
        assert!(started.elapsed() < DELAY);
        assert_eq!(again.error, cost.error);
    }

    #[tokio::test]
    async fn test_durable_tier_survives_new_instance() {
        let fixture = Fixture::new();
        let first = fixture.cache();
        let sized = lookup(&first, fixture.import("chai", 1)).await.unwrap();

        let text = fs::read_to_string(first.cache_file()).unwrap();
        let entries: BTreeMap<String, SizeResult> = serde_json::from_str(&text).unwrap();
        assert_eq!(entries.len(), 1);
        assert!(entries.keys().next().unwrap().ends_with("#chai@4.3.7"));
        assert!(text.contains("\n  "));

        let second = fixture.cache();
        let started = Instant::now();
        let cost = lookup(&second, fixture.import("chai", 1)).await.unwrap();
        assert!(started.elapsed() < DELAY);
        assert_eq!(cost.size, sized.size);
    }

    #[tokio::test]
    async fn test_clear_forces_recomputation() {
        let fixture = Fixture::new();
        let cache = fixture.cache();
        lookup(&cache, fixture.import("chai", 1)).await.unwrap();
        assert!(cache.cache_file().exists());

        cache.clear().unwrap();
        assert!(!cache.cache_file().exists());

        let started = Instant::now();
        lookup(&cache, fixture.import("chai", 1)).await.unwrap();
        assert!(started.elapsed() >= DELAY);
    }

    #[tokio::test]
    async fn test_corrupt_durable_file_is_ignored() {
        let fixture = Fixture::new();
        let cache = fixture.cache();
        fs::write(cache.cache_file(), "{ not json").unwrap();

        let cost = lookup(&cache, fixture.import("chai", 1)).await.unwrap();
        assert!(cost.size > 0);
    }

    #[tokio::test]
    async fn test_cleanup_without_pool() {
        let fixture = Fixture::new();
        let cache = fixture.cache();
        cache.cleanup().await;
        cache.cleanup().await;
    }
}
