//! Inbound worker events and their normalized form.
//!
//! Every named event the workers emit decodes into one [`InboundEvent`]
//! variant. The transport then flattens each variant into a [`ProgressEvent`],
//! the single record the reducer folds, and derives a [`PauseSignal`] for
//! pause/resume events since their payload does not say which one fired.

use crate::status::{BatchStatus, StatusToken};
use crate::wire::WireKind;
use crate::{deserialize_id, deserialize_opt_count, deserialize_opt_id, deserialize_opt_u32};
use serde::{Deserialize, Serialize};

/// Worker whose counters stand for the whole batch when an event does not
/// say otherwise.
pub const MAIN_TAB_ID: u32 = 1;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", content = "payload", rename_all = "snake_case")]
pub enum InboundEvent {
    ProcessingStarted(StartedPayload),
    ProcessingProgress(ProgressPayload),
    BatchStatusUpdate(ProgressPayload),
    ProcessingComplete(CompletePayload),
    ProcessingPaused(BatchRef),
    ProcessingResumed(BatchRef),
    ProcessingStopped(BatchRef),
    ProcessingError(ErrorPayload),
}

impl WireKind for InboundEvent {
    const KINDS: &'static [&'static str] = &[
        "processing_started",
        "processing_progress",
        "batch_status_update",
        "processing_complete",
        "processing_paused",
        "processing_resumed",
        "processing_stopped",
        "processing_error",
    ];

    fn kind(&self) -> &'static str {
        match self {
            InboundEvent::ProcessingStarted(_) => "processing_started",
            InboundEvent::ProcessingProgress(_) => "processing_progress",
            InboundEvent::BatchStatusUpdate(_) => "batch_status_update",
            InboundEvent::ProcessingComplete(_) => "processing_complete",
            InboundEvent::ProcessingPaused(_) => "processing_paused",
            InboundEvent::ProcessingResumed(_) => "processing_resumed",
            InboundEvent::ProcessingStopped(_) => "processing_stopped",
            InboundEvent::ProcessingError(_) => "processing_error",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(rename_all = "camelCase")]
pub struct StartedPayload {
    #[serde(deserialize_with = "deserialize_id")]
    pub batch_id: String,
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        deserialize_with = "deserialize_opt_count"
    )]
    pub total_reports: Option<u64>,
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        deserialize_with = "deserialize_opt_count"
    )]
    pub total: Option<u64>,
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        deserialize_with = "deserialize_opt_u32"
    )]
    pub num_tabs: Option<u32>,
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        deserialize_with = "deserialize_opt_u32"
    )]
    pub total_tabs: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<StatusToken>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

/// Shared by `processing_progress` and `batch_status_update`; every field is
/// optional because status updates carry any subset.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(rename_all = "camelCase")]
pub struct ProgressPayload {
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        deserialize_with = "deserialize_opt_id"
    )]
    pub batch_id: Option<String>,
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        deserialize_with = "deserialize_opt_count"
    )]
    pub current: Option<u64>,
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        deserialize_with = "deserialize_opt_count"
    )]
    pub total: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub percentage: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<StatusToken>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        deserialize_with = "deserialize_opt_u32"
    )]
    pub tab_id: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub is_aggregate: Option<bool>,
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        deserialize_with = "deserialize_opt_u32"
    )]
    pub num_tabs: Option<u32>,
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        deserialize_with = "deserialize_opt_u32"
    )]
    pub total_tabs: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub is_paused: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub is_processing: Option<bool>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(rename_all = "camelCase")]
pub struct CompletePayload {
    #[serde(deserialize_with = "deserialize_id")]
    pub batch_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<StatusToken>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        deserialize_with = "deserialize_opt_count"
    )]
    pub current: Option<u64>,
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        deserialize_with = "deserialize_opt_count"
    )]
    pub total: Option<u64>,
}

/// Payload of events that only name the batch.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(rename_all = "camelCase")]
pub struct BatchRef {
    #[serde(deserialize_with = "deserialize_id")]
    pub batch_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl BatchRef {
    pub fn new(batch_id: impl Into<String>) -> Self {
        Self {
            batch_id: batch_id.into(),
            message: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(rename_all = "camelCase")]
pub struct ErrorPayload {
    #[serde(deserialize_with = "deserialize_id")]
    pub batch_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<StatusToken>,
}

/// The normalized record folded by the reducer. `None` means "not sent".
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ProgressEvent {
    pub batch_id: Option<String>,
    pub status: Option<StatusToken>,
    pub current: Option<u64>,
    pub total: Option<u64>,
    pub percentage: Option<f64>,
    pub message: Option<String>,
    pub error: Option<String>,
    pub num_tabs: Option<u32>,
    pub total_tabs: Option<u32>,
    pub is_paused: Option<bool>,
    pub is_processing: Option<bool>,
    pub tab_id: Option<u32>,
    pub is_aggregate: Option<bool>,
}

impl ProgressEvent {
    pub fn with_status(status: StatusToken) -> Self {
        Self {
            status: Some(status),
            ..Self::default()
        }
    }

    /// A batch-level `STARTED` (or alias), the only event that may switch
    /// the tracked batch.
    pub fn opens_run(&self) -> bool {
        self.is_aggregate != Some(false)
            && self.status.as_ref().map(StatusToken::canonical) == Some(BatchStatus::Started)
    }

    /// Whether this event's counters describe the whole batch. An explicit
    /// `isAggregate` wins; otherwise batch-level events and the main worker
    /// count, as does the only worker of a single-worker run.
    pub fn is_aggregate_for(&self, num_tabs: u32) -> bool {
        match (self.is_aggregate, self.tab_id) {
            (Some(flag), _) => flag,
            (None, None) => true,
            (None, Some(tab_id)) => tab_id <= MAIN_TAB_ID || num_tabs <= 1,
        }
    }
}

/// Narrow pause/resume notification; `is_paused` comes from the event name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PauseSignal {
    pub batch_id: String,
    pub is_paused: bool,
}

impl InboundEvent {
    pub fn batch_id(&self) -> Option<&str> {
        match self {
            InboundEvent::ProcessingStarted(payload) => Some(&payload.batch_id),
            InboundEvent::ProcessingProgress(payload) | InboundEvent::BatchStatusUpdate(payload) => {
                payload.batch_id.as_deref()
            }
            InboundEvent::ProcessingComplete(payload) => Some(&payload.batch_id),
            InboundEvent::ProcessingPaused(payload)
            | InboundEvent::ProcessingResumed(payload)
            | InboundEvent::ProcessingStopped(payload) => Some(&payload.batch_id),
            InboundEvent::ProcessingError(payload) => Some(&payload.batch_id),
        }
    }

    pub fn pause_signal(&self) -> Option<PauseSignal> {
        match self {
            InboundEvent::ProcessingPaused(payload) => Some(PauseSignal {
                batch_id: payload.batch_id.clone(),
                is_paused: true,
            }),
            InboundEvent::ProcessingResumed(payload) => Some(PauseSignal {
                batch_id: payload.batch_id.clone(),
                is_paused: false,
            }),
            _ => None,
        }
    }

    pub fn normalize(&self) -> ProgressEvent {
        match self {
            InboundEvent::ProcessingStarted(payload) => ProgressEvent {
                batch_id: Some(payload.batch_id.clone()),
                status: Some(payload.status.clone().unwrap_or(StatusToken::Started)),
                total: payload.total_reports.or(payload.total),
                message: payload.message.clone(),
                num_tabs: payload.num_tabs,
                total_tabs: payload.total_tabs,
                ..ProgressEvent::default()
            },
            InboundEvent::ProcessingProgress(payload) | InboundEvent::BatchStatusUpdate(payload) => {
                ProgressEvent {
                    batch_id: payload.batch_id.clone(),
                    status: payload.status.clone(),
                    current: payload.current,
                    total: payload.total,
                    percentage: payload.percentage,
                    message: payload.message.clone(),
                    error: payload.error.clone(),
                    num_tabs: payload.num_tabs,
                    total_tabs: payload.total_tabs,
                    is_paused: payload.is_paused,
                    is_processing: payload.is_processing,
                    tab_id: payload.tab_id,
                    is_aggregate: payload.is_aggregate,
                }
            }
            InboundEvent::ProcessingComplete(payload) => ProgressEvent {
                batch_id: Some(payload.batch_id.clone()),
                status: Some(payload.status.clone().unwrap_or(StatusToken::Completed)),
                current: payload.current,
                total: payload.total,
                message: payload.message.clone(),
                ..ProgressEvent::default()
            },
            InboundEvent::ProcessingPaused(payload) => ProgressEvent {
                batch_id: Some(payload.batch_id.clone()),
                status: Some(StatusToken::Paused),
                message: Some(
                    payload
                        .message
                        .clone()
                        .unwrap_or_else(|| "Processing paused".to_string()),
                ),
                is_paused: Some(true),
                ..ProgressEvent::default()
            },
            InboundEvent::ProcessingResumed(payload) => ProgressEvent {
                batch_id: Some(payload.batch_id.clone()),
                status: Some(StatusToken::Resumed),
                message: Some(
                    payload
                        .message
                        .clone()
                        .unwrap_or_else(|| "Processing resumed".to_string()),
                ),
                is_paused: Some(false),
                ..ProgressEvent::default()
            },
            InboundEvent::ProcessingStopped(payload) => ProgressEvent {
                batch_id: Some(payload.batch_id.clone()),
                status: Some(StatusToken::Stopped),
                message: Some(
                    payload
                        .message
                        .clone()
                        .unwrap_or_else(|| "Processing stopped".to_string()),
                ),
                ..ProgressEvent::default()
            },
            InboundEvent::ProcessingError(payload) => ProgressEvent {
                batch_id: Some(payload.batch_id.clone()),
                status: Some(payload.status.clone().unwrap_or(StatusToken::Failed)),
                message: payload.message.clone(),
                error: payload.error.clone(),
                ..ProgressEvent::default()
            },
        }
    }
}
