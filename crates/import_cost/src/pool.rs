//! Pool of bundler worker processes.
//!
//! Workers are long-lived child processes speaking the line-delimited JSON
//! protocol on stdio. Each call borrows an idle worker (or spawns one) for the
//! duration of one request.

use anyhow::{Context, Result, bail};
use log::{debug, info, warn};
use parking_lot::Mutex;
use std::{
    process::Stdio,
    sync::atomic::{AtomicU64, Ordering},
    time::Duration,
};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStdin, ChildStdout, Command};
use tokio::sync::Semaphore;
use tokio::time::timeout;

use import_cost_core::{CostError, ImportDescriptor, SizeResult};

use crate::config::PoolOptions;
use crate::protocol::{WorkerRequest, WorkerResponse};

struct Worker {
    pid: u32,
    child: Child,
    stdin: ChildStdin,
    stdout: BufReader<ChildStdout>,
}

impl Worker {
    fn spawn(options: &PoolOptions) -> Result<Self> {
        let mut child = Command::new(&options.program)
            .args(&options.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .with_context(|| format!("Failed to spawn worker '{}'", options.program.display()))?;
        let pid = child.id().unwrap_or_default();
        info!("Spawned worker {}", pid);

        let stdin = child.stdin.take().context("Worker stdin is not piped")?;
        let stdout = child.stdout.take().context("Worker stdout is not piped")?;
        if let Some(stderr) = child.stderr.take() {
            tokio::spawn(async move {
                let mut lines = BufReader::new(stderr).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    debug!("[worker {}] {}", pid, line);
                }
            });
        }

        Ok(Self { pid, child, stdin, stdout: BufReader::new(stdout) })
    }

    async fn call(&mut self, request: &WorkerRequest) -> Result<WorkerResponse> {
        let mut payload = serde_json::to_string(request)?;
        payload.push('\n');
        self.stdin.write_all(payload.as_bytes()).await.context("Failed to write to worker")?;
        self.stdin.flush().await.context("Failed to flush worker stdin")?;

        let mut line = String::new();
        if self.stdout.read_line(&mut line).await.context("Failed to read from worker")? == 0 {
            bail!("worker {} exited", self.pid);
        }
        let response: WorkerResponse = serde_json::from_str(&line)
            .with_context(|| format!("Malformed reply from worker {}", self.pid))?;
        if response.id != request.id {
            bail!("worker {} answered request {} instead of {}", self.pid, response.id, request.id);
        }
        Ok(response)
    }

    async fn kill(mut self) {
        debug!("Killing worker {}", self.pid);
        if let Err(e) = self.child.kill().await {
            debug!("Worker {} was already gone: {}", self.pid, e);
        }
    }
}

pub struct WorkerPool {
    options: PoolOptions,
    slots: Semaphore,
    idle: Mutex<Vec<Worker>>,
    next_id: AtomicU64,
}

impl WorkerPool {
    pub fn new(options: PoolOptions) -> Self {
        info!("Starting worker pool with up to {} workers", options.max_workers);
        Self {
            slots: Semaphore::new(options.max_workers.max(1)),
            options,
            idle: Mutex::new(Vec::new()),
            next_id: AtomicU64::new(0),
        }
    }

    /// Size `import` in a worker, waiting for a free slot first.
    ///
    /// Exceeding `max_call_time` fails with `Timeout` and replaces the worker.
    /// A worker that dies or answers garbage is replaced and the request is
    /// retried up to `max_retries` times.
    pub async fn calc_size(
        &self,
        import: &ImportDescriptor,
        max_call_time: Option<Duration>,
    ) -> Result<SizeResult, CostError> {
        let _permit = self
            .slots
            .acquire()
            .await
            .map_err(|_| CostError::worker("worker pool has been shut down"))?;
        let request =
            WorkerRequest { id: self.next_id.fetch_add(1, Ordering::SeqCst), import: import.clone() };

        let mut failures = 0;
        loop {
            let mut worker = match self.checkout() {
                Some(worker) => worker,
                None => Worker::spawn(&self.options).map_err(|e| CostError::worker(format!("{e:#}")))?,
            };

            let outcome = match max_call_time {
                Some(limit) => match timeout(limit, worker.call(&request)).await {
                    Ok(outcome) => outcome,
                    Err(_) => {
                        warn!("'{}' exceeded {:?} in worker {}", import.specifier, limit, worker.pid);
                        worker.kill().await;
                        return Err(CostError::Timeout { limit_ms: limit.as_millis() as u64 });
                    }
                },
                None => worker.call(&request).await,
            };

            match outcome {
                Ok(response) => {
                    self.checkin(worker);
                    return response.result;
                }
                Err(e) => {
                    worker.kill().await;
                    failures += 1;
                    if failures > self.options.max_retries {
                        return Err(CostError::worker(format!("{e:#}")));
                    }
                    warn!("Retrying '{}' after worker failure ({}): {:#}", import.specifier, failures, e);
                }
            }
        }
    }

    fn checkout(&self) -> Option<Worker> {
        self.idle.lock().pop()
    }

    fn checkin(&self, worker: Worker) {
        if self.slots.is_closed() {
            // dropping kills it
            return;
        }
        self.idle.lock().push(worker);
    }

    /// Stop accepting calls and kill idle workers. Busy workers are killed
    /// when their call finishes.
    pub async fn shutdown(&self) {
        self.slots.close();
        let workers = std::mem::take(&mut *self.idle.lock());
        if !workers.is_empty() {
            info!("Stopping {} workers", workers.len());
        }
        for worker in workers {
            worker.kill().await;
        }
    }

    pub fn idle_workers(&self) -> usize {
        self.idle.lock().len()
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn shell(script: &str) -> PoolOptions {
        PoolOptions {
            program: PathBuf::from("sh"),
            args: vec!["-c".to_string(), script.to_string()],
            max_workers: 2,
            max_retries: 3,
        }
    }

    fn import() -> ImportDescriptor {
        ImportDescriptor {
            file: PathBuf::from("/project/index.js"),
            specifier: "chai".to_string(),
            line: 1,
            entry_source: "import chai from 'chai';\nconsole.log(chai);".to_string(),
        }
    }

    #[tokio::test]
    async fn test_reply_is_returned_and_worker_kept() {
        let pool = WorkerPool::new(shell(
            r#"read line; echo '{"id":0,"result":{"Ok":{"size":10,"gzip":5}}}'; sleep 5"#,
        ));
        let result = pool.calc_size(&import(), None).await;
        assert_eq!(result, Ok(SizeResult { size: 10, gzip: 5 }));
        assert_eq!(pool.idle_workers(), 1);
        pool.shutdown().await;
        assert_eq!(pool.idle_workers(), 0);
    }

    #[tokio::test]
    async fn test_timeout() {
        let pool = WorkerPool::new(shell("sleep 5"));
        let result = pool.calc_size(&import(), Some(Duration::from_millis(100))).await;
        assert_eq!(result, Err(CostError::Timeout { limit_ms: 100 }));
        assert_eq!(pool.idle_workers(), 0);
    }

    #[tokio::test]
    async fn test_crashing_worker_is_retried_then_fails() {
        let pool = WorkerPool::new(shell("read line; echo not-json"));
        let err = pool.calc_size(&import(), None).await.unwrap_err();
        assert_eq!(err.kind(), "WorkerError");
    }

    #[tokio::test]
    async fn test_spawn_failure() {
        let options = PoolOptions {
            program: PathBuf::from("/nonexistent/import-cost"),
            args: vec![],
            max_workers: 1,
            max_retries: 3,
        };
        let err = WorkerPool::new(options).calc_size(&import(), None).await.unwrap_err();
        assert!(err.to_string().contains("Failed to spawn worker"));
    }

    #[tokio::test]
    async fn test_shutdown_is_idempotent() {
        let pool = WorkerPool::new(shell("sleep 5"));
        pool.shutdown().await;
        pool.shutdown().await;
        let err = pool.calc_size(&import(), None).await.unwrap_err();
        assert_eq!(err.kind(), "WorkerError");
    }
}
