use crate::completion::{CompletionCoordinator, DetailCache};
use crate::config::ClientConfig;
use crate::directory::ReportDirectory;
use crate::error::ClientError;
use crate::observers::Subscription;
use crate::store::{ProgressStore, Transition};
use crate::transport::Transport;
use std::sync::Arc;
use tokio::sync::{watch, Mutex};
use tq_core::command::CommandGateway;
use tq_core::event::ProgressEvent;
use tq_core::progress::ProgressAction;
use tq_core::Report;
use tracing::{debug, info};

/// Wires the transport, the progress store and completion handling together
/// for one client process.
pub struct Session {
    transport: Transport,
    gateway: CommandGateway<Transport>,
    store: ProgressStore,
    directory: Arc<dyn ReportDirectory>,
    details: Arc<DetailCache>,
    coordinator: CompletionCoordinator,
    progress: Mutex<Subscription<ProgressEvent>>,
}

impl Session {
    /// Subscribes to the transport's progress feed right away so nothing
    /// published before `run` is lost.
    pub fn new(transport: Transport, directory: Arc<dyn ReportDirectory>) -> Self {
        let cooldown = transport.config().completion_cooldown;
        let details = Arc::new(DetailCache::default());
        let coordinator =
            CompletionCoordinator::new(Arc::clone(&directory), Arc::clone(&details), cooldown);
        let progress = Mutex::new(transport.progress().subscribe());
        Self {
            gateway: CommandGateway::new(transport.clone()),
            transport,
            store: ProgressStore::new(),
            directory,
            details,
            coordinator,
            progress,
        }
    }

    pub fn from_config(
        config: ClientConfig,
        directory: Arc<dyn ReportDirectory>,
    ) -> Result<Self, ClientError> {
        config.validate()?;
        Ok(Self::new(Transport::new(config), directory))
    }

    pub fn transport(&self) -> &Transport {
        &self.transport
    }

    pub fn gateway(&self) -> &CommandGateway<Transport> {
        &self.gateway
    }

    pub fn store(&self) -> &ProgressStore {
        &self.store
    }

    pub fn coordinator(&self) -> &CompletionCoordinator {
        &self.coordinator
    }

    pub fn details(&self) -> &DetailCache {
        &self.details
    }

    /// Folds one inbound event and lets the completion coordinator react.
    pub fn fold(&self, event: ProgressEvent) -> Transition {
        let transition = self.store.dispatch(&ProgressAction::Event(event.clone()));
        if transition.prev.is_foreign(&event) {
            info!(
                event = "progress_foreign_batch",
                batch_id = event.batch_id.as_deref().unwrap_or(""),
                active_batch = transition.prev.batch_id.as_deref().unwrap_or(""),
                status = ?event.status
            );
        } else if transition.changed() {
            debug!(
                event = "progress_changed",
                status = %transition.next.status,
                current = transition.next.current,
                total = transition.next.total
            );
        }
        self.coordinator
            .observe(&self.store, &transition, Some(&event));
        transition
    }

    pub fn start_progress(&self, batch_id: &str, total: u64, num_tabs: u32) -> Transition {
        self.apply(ProgressAction::Start {
            batch_id: batch_id.to_string(),
            total,
            num_tabs,
        })
    }

    pub fn reset_progress(&self) -> Transition {
        self.details.clear();
        self.apply(ProgressAction::Reset)
    }

    fn apply(&self, action: ProgressAction) -> Transition {
        let transition = self.store.dispatch(&action);
        self.coordinator.observe(&self.store, &transition, None);
        transition
    }

    /// Joins the batch room, asks the workers to start and opens the local
    /// run. Returns the worker count actually requested.
    pub fn start_batch(
        &self,
        batch_id: &str,
        report_ids: &[String],
        num_tabs: f64,
    ) -> Result<u32, ClientError> {
        self.transport.join_batch(batch_id);
        let num_tabs = self.gateway.start(batch_id, report_ids, num_tabs)?;
        self.start_progress(batch_id, report_ids.len() as u64, num_tabs);
        info!(
            event = "batch_start_requested",
            batch_id,
            reports = report_ids.len(),
            num_tabs
        );
        Ok(num_tabs)
    }

    /// Records of `batch_id`, fetched once and cached until the next reset
    /// or completion.
    pub async fn batch_detail(&self, batch_id: &str) -> Result<Arc<Vec<Report>>, ClientError> {
        Ok(self
            .details
            .get_or_fetch(self.directory.as_ref(), batch_id)
            .await?)
    }

    /// Folds progress events in arrival order until `shutdown` flips to true
    /// or its sender goes away.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        let mut progress = self.progress.lock().await;
        loop {
            if *shutdown.borrow() {
                break;
            }
            tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
                event = progress.recv() => {
                    let Some(event) = event else {
                        break;
                    };
                    self.fold(event);
                }
            }
        }
        debug!(event = "session_stopped");
    }
}
