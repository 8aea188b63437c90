use crate::directory::{DirectoryError, ReportDirectory};
use crate::store::{ProgressStore, Transition};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tq_core::completion::{completion_signal, CompletionLatch, LatchDecision};
use tq_core::event::ProgressEvent;
use tq_core::progress::ProgressAction;
use tq_core::{BatchStats, Report};
use tracing::{debug, info, warn};

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

#[derive(Default)]
struct DetailEntries {
    reports: HashMap<String, Arc<Vec<Report>>>,
    expanded: Option<String>,
}

/// Per-batch records fetched lazily, kept until the cache is cleared.
#[derive(Default)]
pub struct DetailCache {
    entries: Mutex<DetailEntries>,
}

impl DetailCache {
    pub fn cached(&self, batch_id: &str) -> Option<Arc<Vec<Report>>> {
        lock(&self.entries).reports.get(batch_id).cloned()
    }

    pub async fn get_or_fetch(
        &self,
        directory: &dyn ReportDirectory,
        batch_id: &str,
    ) -> Result<Arc<Vec<Report>>, DirectoryError> {
        if let Some(reports) = self.cached(batch_id) {
            return Ok(reports);
        }
        let reports = Arc::new(directory.fetch_batch_detail(batch_id).await?);
        debug!(event = "detail_cached", batch_id, reports = reports.len());
        lock(&self.entries)
            .reports
            .insert(batch_id.to_string(), Arc::clone(&reports));
        Ok(reports)
    }

    /// Marks `batch_id` as the expanded batch, collapsing it if it already was.
    pub fn toggle(&self, batch_id: &str) -> Option<String> {
        let mut entries = lock(&self.entries);
        if entries.expanded.as_deref() == Some(batch_id) {
            entries.expanded = None;
        } else {
            entries.expanded = Some(batch_id.to_string());
        }
        entries.expanded.clone()
    }

    pub fn expanded(&self) -> Option<String> {
        lock(&self.entries).expanded.clone()
    }

    pub fn len(&self) -> usize {
        lock(&self.entries).reports.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) {
        let mut entries = lock(&self.entries);
        entries.reports.clear();
        entries.expanded = None;
    }
}

/// Runs the one-per-window completion work: mark the run complete, drop
/// cached batch detail, and refresh the batch summaries in the background.
pub struct CompletionCoordinator {
    latch: Mutex<CompletionLatch>,
    directory: Arc<dyn ReportDirectory>,
    details: Arc<DetailCache>,
    summaries: Arc<watch::Sender<Arc<Vec<BatchStats>>>>,
    handled: AtomicU64,
}

impl CompletionCoordinator {
    pub fn new(
        directory: Arc<dyn ReportDirectory>,
        details: Arc<DetailCache>,
        cooldown: Duration,
    ) -> Self {
        let (summaries, _rx) = watch::channel(Arc::new(Vec::new()));
        Self {
            latch: Mutex::new(CompletionLatch::new(cooldown)),
            directory,
            details,
            summaries: Arc::new(summaries),
            handled: AtomicU64::new(0),
        }
    }

    pub fn summaries(&self) -> watch::Receiver<Arc<Vec<BatchStats>>> {
        self.summaries.subscribe()
    }

    /// Completions that got past the latch so far.
    pub fn handled_count(&self) -> u64 {
        self.handled.load(Ordering::SeqCst)
    }

    /// Feeds one store transition through the latch. Returns the refresh
    /// task when this transition triggered completion work.
    pub fn observe(
        &self,
        store: &ProgressStore,
        transition: &Transition,
        event: Option<&ProgressEvent>,
    ) -> Option<JoinHandle<()>> {
        let signal = completion_signal(&transition.prev, &transition.next, event);
        let now = tokio::time::Instant::now().into_std();
        let decision = lock(&self.latch).observe(signal, now);
        let batch_id = transition.next.batch_id.as_deref().unwrap_or("");
        match decision {
            LatchDecision::Run => {
                self.handled.fetch_add(1, Ordering::SeqCst);
                info!(event = "completion_handled", batch_id);
                store.dispatch(&ProgressAction::Complete);
                self.details.clear();
                Some(self.spawn_refresh())
            }
            LatchDecision::Coalesced => {
                debug!(event = "completion_coalesced", batch_id);
                None
            }
            LatchDecision::Rearmed => {
                debug!(event = "completion_rearmed", batch_id, status = %transition.next.status);
                None
            }
            LatchDecision::Ignored => None,
        }
    }

    /// Fetches the summaries now and publishes them. A failure keeps the
    /// previous list.
    pub async fn refresh_summaries(&self) -> Result<Arc<Vec<BatchStats>>, DirectoryError> {
        refresh(self.directory.as_ref(), &self.summaries).await
    }

    fn spawn_refresh(&self) -> JoinHandle<()> {
        let directory = Arc::clone(&self.directory);
        let summaries = Arc::clone(&self.summaries);
        tokio::spawn(async move {
            let _ = refresh(directory.as_ref(), &summaries).await;
        })
    }
}

async fn refresh(
    directory: &dyn ReportDirectory,
    summaries: &watch::Sender<Arc<Vec<BatchStats>>>,
) -> Result<Arc<Vec<BatchStats>>, DirectoryError> {
    match directory.fetch_batch_summaries().await {
        Ok(stats) => {
            let stats = Arc::new(stats);
            info!(event = "completion_refresh", batches = stats.len());
            summaries.send_replace(Arc::clone(&stats));
            Ok(stats)
        }
        Err(err) => {
            warn!(event = "completion_refresh_failed", error = %err);
            Err(err)
        }
    }
}
