use futures::stream::{FuturesUnordered, Stream, StreamExt};
use log::{debug, info};
use serde::Serialize;
use std::{
    path::{Path, PathBuf},
    pin::Pin,
    sync::Arc,
    task::{Context, Poll},
};
use tokio::sync::mpsc;

use import_cost_core::{CostError, Dialect, ImportDescriptor, PackageCost, parse_imports};

use crate::cache::SizeCache;
use crate::config::CostConfig;
use crate::debounce::RunId;

/// Progress of one run.
///
/// `Start` comes first, then one `Calculated` per import in completion order,
/// then `Done` with every result in source order. A run that fails as a whole
/// ends with a single `Error` instead of `Done`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "event", content = "data", rename_all = "lowercase")]
pub enum CostEvent {
    Start(Vec<ImportDescriptor>),
    Calculated(PackageCost),
    Done(Vec<PackageCost>),
    Error(CostError),
}

pub struct ImportCost {
    cache: Arc<SizeCache>,
}

impl ImportCost {
    pub fn new(cache: Arc<SizeCache>) -> Self {
        Self { cache }
    }

    pub fn cache(&self) -> &Arc<SizeCache> {
        &self.cache
    }

    /// Start sizing every package import of `text`. `None` for the dialect
    /// means the file type is unsupported and yields an empty run.
    ///
    /// A later call for the same file supersedes this one on the lines both
    /// touch; imports within one call never supersede each other.
    pub fn run(
        &self,
        file: impl Into<PathBuf>,
        text: impl Into<String>,
        dialect: Option<Dialect>,
        config: CostConfig,
    ) -> CostStream {
        let (tx, rx) = mpsc::unbounded_channel();
        let cache = Arc::clone(&self.cache);
        let file = file.into();
        let text = text.into();
        let run = cache.begin_run();
        tokio::spawn(async move {
            if let Err(err) = process(cache, run, &file, &text, dialect, config, &tx).await {
                debug!("Run for {} ended with {}", file.display(), err.kind());
                let _ = tx.send(CostEvent::Error(err));
            }
        });
        CostStream { events: rx }
    }
}

async fn process(
    cache: Arc<SizeCache>,
    run: RunId,
    file: &Path,
    text: &str,
    dialect: Option<Dialect>,
    config: CostConfig,
    tx: &mpsc::UnboundedSender<CostEvent>,
) -> Result<(), CostError> {
    let imports: Vec<ImportDescriptor> = match dialect {
        Some(dialect) => parse_imports(file, text, dialect)?,
        None => {
            debug!("Unsupported dialect for {}", file.display());
            Vec::new()
        }
    }
    .into_iter()
    .filter(|import| !import.is_relative())
    .collect();
    info!("Sizing {} imports in {}", imports.len(), file.display());
    let _ = tx.send(CostEvent::Start(imports.clone()));

    let mut costs: Vec<Option<PackageCost>> = vec![None; imports.len()];
    let mut pending: FuturesUnordered<_> = imports
        .into_iter()
        .enumerate()
        .map(|(idx, import)| {
            let cache = Arc::clone(&cache);
            let config = config.clone();
            async move { (idx, cache.get_size(import, run, &config).await) }
        })
        .collect();

    while let Some((idx, result)) = pending.next().await {
        let cost = result?;
        let _ = tx.send(CostEvent::Calculated(cost.clone()));
        costs[idx] = Some(cost);
    }

    let _ = tx.send(CostEvent::Done(costs.into_iter().flatten().collect()));
    Ok(())
}

/// Receiving end of a run.
pub struct CostStream {
    events: mpsc::UnboundedReceiver<CostEvent>,
}

impl CostStream {
    pub async fn next_event(&mut self) -> Option<CostEvent> {
        self.events.recv().await
    }

    /// Skip to the end of the run.
    pub async fn finish(mut self) -> Result<Vec<PackageCost>, CostError> {
        while let Some(event) = self.events.recv().await {
            match event {
                CostEvent::Done(costs) => return Ok(costs),
                CostEvent::Error(err) => return Err(err),
                CostEvent::Start(_) | CostEvent::Calculated(_) => {}
            }
        }
        Err(CostError::worker("run ended without a result"))
    }
}

impl Stream for CostStream {
    type Item = CostEvent;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<CostEvent>> {
        self.events.poll_recv(cx)
    }
}
