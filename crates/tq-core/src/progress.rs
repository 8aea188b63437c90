//! Single-writer progress state machine.
//!
//! [`reduce`] folds one [`ProgressAction`] into the current state and hands
//! back the *same* `Arc` when nothing observable changed, so observers can
//! skip work on pointer equality. Runs are bounded by reset points: a start
//! (from the user or a `STARTED` event), an explicit reset, or an event for a
//! different batch. Within a run `current` and `total` never decrease, and a
//! terminal state only yields to another terminal status.

use crate::event::ProgressEvent;
use crate::status::{BatchStatus, StatusToken};
use crate::tabs::TabBoard;
use serde::Serialize;
use std::sync::Arc;

pub const DEFAULT_START_MESSAGE: &str = "Starting processing...";
pub const DEFAULT_ERROR_MESSAGE: &str = "An error occurred";

/// `round(current / total * 100)`, or 0 when there is no total yet.
pub fn percent_of(current: u64, total: u64) -> u8 {
    if total == 0 {
        return 0;
    }
    let pct = (current as f64 / total as f64 * 100.0).round();
    pct.clamp(0.0, 100.0) as u8
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProgressState {
    pub batch_id: Option<String>,
    pub is_processing: bool,
    pub is_paused: bool,
    pub current: u64,
    pub total: u64,
    pub percentage: u8,
    pub status: BatchStatus,
    pub message: String,
    pub num_tabs: u32,
    pub tab_progresses: TabBoard,
    pub error: Option<String>,
}

impl Default for ProgressState {
    fn default() -> Self {
        Self {
            batch_id: None,
            is_processing: false,
            is_paused: false,
            current: 0,
            total: 0,
            percentage: 0,
            status: BatchStatus::Idle,
            message: String::new(),
            num_tabs: 1,
            tab_progresses: TabBoard::default(),
            error: None,
        }
    }
}

impl ProgressState {
    pub fn started(batch_id: impl Into<String>, total: u64, num_tabs: u32) -> Self {
        Self {
            batch_id: Some(batch_id.into()),
            is_processing: true,
            total,
            status: BatchStatus::Started,
            message: DEFAULT_START_MESSAGE.to_string(),
            num_tabs: num_tabs.max(1),
            ..Self::default()
        }
        .normalized()
    }

    /// A run that is still expected to emit events.
    pub fn is_active(&self) -> bool {
        self.is_processing && !self.status.is_terminal()
    }

    /// Whether `event` names a batch other than the tracked one and cannot
    /// take over: only a start, or an idle state, adopts a new batch. Late
    /// events from a batch that already finished land here.
    pub fn is_foreign(&self, event: &ProgressEvent) -> bool {
        let other_batch = matches!(
            (&event.batch_id, &self.batch_id),
            (Some(incoming), Some(current)) if incoming != current
        );
        other_batch && self.status != BatchStatus::Idle && !event.opens_run()
    }

    fn fresh_run(batch_id: String) -> Self {
        Self {
            batch_id: Some(batch_id),
            ..Self::default()
        }
    }

    fn normalized(mut self) -> Self {
        if !self.is_processing {
            self.is_paused = false;
        }
        if self.num_tabs <= 1 {
            self.num_tabs = 1;
            self.tab_progresses.clear();
        }
        if self.total > 0 {
            self.current = self.current.min(self.total);
        }
        self.percentage = if self.status == BatchStatus::Completed {
            100
        } else {
            percent_of(self.current, self.total)
        };
        self
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ProgressAction {
    Event(ProgressEvent),
    Start {
        batch_id: String,
        total: u64,
        num_tabs: u32,
    },
    Pause,
    Resume,
    Stop,
    Complete,
    Fail {
        error: String,
    },
    Reset,
}

pub fn reduce(state: &Arc<ProgressState>, action: &ProgressAction) -> Arc<ProgressState> {
    let next = match action {
        ProgressAction::Event(event) => apply_event(state, event),
        ProgressAction::Start {
            batch_id,
            total,
            num_tabs,
        } => Some(ProgressState::started(batch_id.clone(), *total, *num_tabs)),
        ProgressAction::Pause => apply_event(
            state,
            &ProgressEvent {
                message: Some("Processing paused".to_string()),
                ..ProgressEvent::with_status(StatusToken::Paused)
            },
        ),
        ProgressAction::Resume => apply_event(
            state,
            &ProgressEvent {
                message: Some("Processing resumed".to_string()),
                ..ProgressEvent::with_status(StatusToken::Resumed)
            },
        ),
        ProgressAction::Stop => apply_event(
            state,
            &ProgressEvent {
                message: Some("Processing stopped".to_string()),
                ..ProgressEvent::with_status(StatusToken::Stopped)
            },
        ),
        ProgressAction::Complete => apply_event(
            state,
            &ProgressEvent {
                message: Some("Processing completed successfully".to_string()),
                ..ProgressEvent::with_status(StatusToken::Completed)
            },
        ),
        ProgressAction::Fail { error } => apply_event(
            state,
            &ProgressEvent {
                error: Some(error.clone()),
                ..ProgressEvent::with_status(StatusToken::Failed)
            },
        )
        .map(|mut next| {
            next.message = "Processing failed".to_string();
            next
        }),
        ProgressAction::Reset => Some(ProgressState::default()),
    };

    match next {
        Some(next) if next != **state => Arc::new(next),
        _ => Arc::clone(state),
    }
}

/// Status a per-worker event contributes to the batch. A worker finishing or
/// failing is not the batch finishing or failing.
fn worker_status(status: BatchStatus) -> Option<BatchStatus> {
    match status {
        BatchStatus::Started => Some(BatchStatus::TabStarted),
        BatchStatus::Completed => Some(BatchStatus::TabCompleted),
        BatchStatus::Failed => Some(BatchStatus::TabFailed),
        BatchStatus::Stopped | BatchStatus::Idle => None,
        other => Some(other),
    }
}

fn apply_event(state: &ProgressState, event: &ProgressEvent) -> Option<ProgressState> {
    if state.is_foreign(event) {
        return None;
    }
    let switches_batch = matches!(
        (&event.batch_id, &state.batch_id),
        (Some(incoming), Some(current)) if incoming != current
    );
    let num_tabs = if switches_batch { 1 } else { state.num_tabs };
    let aggregate = event.is_aggregate_for(num_tabs);
    let status = match event.status.as_ref().map(StatusToken::canonical) {
        Some(status) if aggregate => Some(status),
        Some(status) => worker_status(status),
        None => None,
    };

    if status == Some(BatchStatus::Started) {
        // A start for the run already under way, after it has made progress,
        // is a redelivery.
        if !switches_batch && state.is_active() && state.current > 0 {
            return None;
        }
        return Some(start_run(state, event));
    }

    let mut next = match &event.batch_id {
        Some(batch_id) if switches_batch => ProgressState::fresh_run(batch_id.clone()),
        _ => state.clone(),
    };
    if next.batch_id.is_none() {
        next.batch_id = event.batch_id.clone();
    }

    if next.status.is_terminal() && !status.is_some_and(|status| status.is_terminal()) {
        return None;
    }

    if matches!(status, Some(BatchStatus::Paused | BatchStatus::Resumed)) {
        if !next.is_processing {
            return None;
        }
        next.is_paused = status == Some(BatchStatus::Paused);
        next.status = status.unwrap_or(next.status);
        if let Some(message) = &event.message {
            next.message = message.clone();
        }
        return Some(next.normalized());
    }

    if aggregate {
        if let Some(total) = event.total {
            next.total = next.total.max(total);
        }
        if let Some(current) = event.current {
            next.current = next.current.max(current);
        }
    }
    if let Some(message) = &event.message {
        next.message = message.clone();
    }
    if let Some(num_tabs) = event.num_tabs.or(event.total_tabs) {
        next.num_tabs = num_tabs.max(1);
    }
    if aggregate && event.status == Some(StatusToken::DataFetched) {
        next.message = format!("Using {} tabs for {} reports", next.num_tabs, next.total);
    }
    if let Some(is_paused) = event.is_paused {
        next.is_paused = is_paused;
    }
    if let Some(is_processing) = event.is_processing {
        next.is_processing = is_processing;
    }
    if let Some(status) = status {
        next.status = status;
    }

    match status {
        Some(BatchStatus::Completed) => {
            next.is_processing = false;
            next.is_paused = false;
            next.total = next.total.max(next.current);
            next.current = next.total;
        }
        Some(BatchStatus::Failed) => {
            next.is_processing = false;
            next.is_paused = false;
            next.error = Some(
                event
                    .message
                    .clone()
                    .or_else(|| event.error.clone())
                    .unwrap_or_else(|| DEFAULT_ERROR_MESSAGE.to_string()),
            );
        }
        Some(BatchStatus::Stopped) => {
            next.is_processing = false;
            next.is_paused = false;
        }
        Some(status) if status.implies_processing() => {
            next.is_processing = true;
        }
        _ => {}
    }

    if next.num_tabs > 1 && event.tab_id.is_some() {
        next.tab_progresses.upsert(event);
    }

    Some(next.normalized())
}

fn start_run(state: &ProgressState, event: &ProgressEvent) -> ProgressState {
    let batch_id = event.batch_id.clone().or_else(|| state.batch_id.clone());
    // A restart of the same batch keeps the total it already knows.
    let known_total = if batch_id == state.batch_id {
        state.total
    } else {
        0
    };
    let mut next = ProgressState {
        batch_id,
        is_processing: true,
        is_paused: false,
        current: event.current.unwrap_or(0),
        total: event.total.unwrap_or(known_total),
        status: BatchStatus::Started,
        message: event
            .message
            .clone()
            .unwrap_or_else(|| DEFAULT_START_MESSAGE.to_string()),
        num_tabs: event.num_tabs.or(event.total_tabs).unwrap_or(1).max(1),
        ..ProgressState::default()
    };
    if next.num_tabs > 1 && event.tab_id.is_some() {
        next.tab_progresses.upsert(event);
    }
    next.normalized()
}
