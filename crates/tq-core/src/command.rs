use crate::wire::WireKind;
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub const MIN_TABS: u32 = 1;
pub const MAX_TABS: u32 = 10;

/// Clamps a requested worker count into `[MIN_TABS, MAX_TABS]`. Fractions
/// floor; NaN falls back to one worker.
pub fn clamp_num_tabs(requested: f64) -> u32 {
    if requested.is_nan() {
        return MIN_TABS;
    }
    requested
        .floor()
        .clamp(f64::from(MIN_TABS), f64::from(MAX_TABS)) as u32
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", content = "payload", rename_all = "snake_case")]
pub enum OutboundCommand {
    StartTaqeemProcessing(StartProcessingPayload),
    PauseProcessing(BatchCommandPayload),
    ResumeProcessing(BatchCommandPayload),
    StopProcessing(BatchCommandPayload),
    JoinBatch(BatchCommandPayload),
    UserIdentified(UserIdentifiedPayload),
}

impl WireKind for OutboundCommand {
    const KINDS: &'static [&'static str] = &[
        "start_taqeem_processing",
        "pause_processing",
        "resume_processing",
        "stop_processing",
        "join_batch",
        "user_identified",
    ];

    fn kind(&self) -> &'static str {
        match self {
            OutboundCommand::StartTaqeemProcessing(_) => "start_taqeem_processing",
            OutboundCommand::PauseProcessing(_) => "pause_processing",
            OutboundCommand::ResumeProcessing(_) => "resume_processing",
            OutboundCommand::StopProcessing(_) => "stop_processing",
            OutboundCommand::JoinBatch(_) => "join_batch",
            OutboundCommand::UserIdentified(_) => "user_identified",
        }
    }
}

impl OutboundCommand {
    pub fn batch_id(&self) -> Option<&str> {
        match self {
            OutboundCommand::StartTaqeemProcessing(payload) => Some(&payload.batch_id),
            OutboundCommand::PauseProcessing(payload)
            | OutboundCommand::ResumeProcessing(payload)
            | OutboundCommand::StopProcessing(payload)
            | OutboundCommand::JoinBatch(payload) => Some(&payload.batch_id),
            OutboundCommand::UserIdentified(_) => None,
        }
    }

    pub fn join_batch(batch_id: impl Into<String>) -> Self {
        OutboundCommand::JoinBatch(BatchCommandPayload::new(batch_id))
    }

    pub fn user_identified(user_id: impl Into<String>) -> Self {
        OutboundCommand::UserIdentified(UserIdentifiedPayload {
            user_id: user_id.into(),
        })
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum ActionType {
    #[default]
    Process,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct StartProcessingPayload {
    pub batch_id: String,
    pub report_ids: Vec<String>,
    pub num_tabs: u32,
    #[serde(default)]
    pub action_type: ActionType,
}

impl StartProcessingPayload {
    pub fn new(batch_id: impl Into<String>, report_ids: Vec<String>, num_tabs: u32) -> Self {
        Self {
            batch_id: batch_id.into(),
            report_ids,
            num_tabs: num_tabs.clamp(MIN_TABS, MAX_TABS),
            action_type: ActionType::Process,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct BatchCommandPayload {
    pub batch_id: String,
}

impl BatchCommandPayload {
    pub fn new(batch_id: impl Into<String>) -> Self {
        Self {
            batch_id: batch_id.into(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct UserIdentifiedPayload {
    pub user_id: String,
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum CommandRejected {
    #[error("batch id must not be empty")]
    EmptyBatchId,
    #[error("at least one report id is required")]
    NoReports,
    #[error("worker count must be at least 1, got {0}")]
    InvalidTabCount(f64),
}

/// Where validated commands go. Delivery is fire-and-forget; outcomes come
/// back as progress events, never as a return value.
pub trait CommandSink {
    fn send_command(&self, command: OutboundCommand);
}

impl<S: CommandSink + ?Sized> CommandSink for &S {
    fn send_command(&self, command: OutboundCommand) {
        (**self).send_command(command)
    }
}

impl<S: CommandSink + ?Sized> CommandSink for std::sync::Arc<S> {
    fn send_command(&self, command: OutboundCommand) {
        (**self).send_command(command)
    }
}

/// Validates user intents and turns them into outbound commands.
#[derive(Debug, Clone)]
pub struct CommandGateway<S> {
    sink: S,
}

impl<S: CommandSink> CommandGateway<S> {
    pub fn new(sink: S) -> Self {
        Self { sink }
    }

    pub fn sink(&self) -> &S {
        &self.sink
    }

    /// Emits `start_taqeem_processing` with the worker count clamped to
    /// `[1, 10]`. Returns the count actually sent.
    pub fn start(
        &self,
        batch_id: &str,
        report_ids: &[String],
        num_tabs: f64,
    ) -> Result<u32, CommandRejected> {
        let batch_id = require_batch_id(batch_id)?;
        if report_ids.is_empty() {
            return Err(CommandRejected::NoReports);
        }
        if num_tabs.is_nan() || num_tabs < 1.0 {
            return Err(CommandRejected::InvalidTabCount(num_tabs));
        }
        let num_tabs = clamp_num_tabs(num_tabs);
        self.sink
            .send_command(OutboundCommand::StartTaqeemProcessing(
                StartProcessingPayload::new(batch_id, report_ids.to_vec(), num_tabs),
            ));
        Ok(num_tabs)
    }

    pub fn pause(&self, batch_id: &str) -> Result<(), CommandRejected> {
        let batch_id = require_batch_id(batch_id)?;
        self.sink
            .send_command(OutboundCommand::PauseProcessing(BatchCommandPayload::new(
                batch_id,
            )));
        Ok(())
    }

    pub fn resume(&self, batch_id: &str) -> Result<(), CommandRejected> {
        let batch_id = require_batch_id(batch_id)?;
        self.sink
            .send_command(OutboundCommand::ResumeProcessing(BatchCommandPayload::new(
                batch_id,
            )));
        Ok(())
    }

    pub fn stop(&self, batch_id: &str) -> Result<(), CommandRejected> {
        let batch_id = require_batch_id(batch_id)?;
        self.sink
            .send_command(OutboundCommand::StopProcessing(BatchCommandPayload::new(
                batch_id,
            )));
        Ok(())
    }
}

fn require_batch_id(batch_id: &str) -> Result<&str, CommandRejected> {
    let trimmed = batch_id.trim();
    if trimmed.is_empty() {
        Err(CommandRejected::EmptyBatchId)
    } else {
        Ok(trimmed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[derive(Default)]
    struct RecordingSink {
        sent: Mutex<Vec<OutboundCommand>>,
    }

    impl CommandSink for RecordingSink {
        fn send_command(&self, command: OutboundCommand) {
            self.sent.lock().expect("lock").push(command);
        }
    }

    impl RecordingSink {
        fn take(&self) -> Vec<OutboundCommand> {
            std::mem::take(&mut *self.sent.lock().expect("lock"))
        }
    }

    fn reports(ids: &[&str]) -> Vec<String> {
        ids.iter().map(|id| id.to_string()).collect()
    }

    #[test]
    fn clamp_floors_and_bounds_worker_count() {
        assert_eq!(clamp_num_tabs(37.0), 10);
        assert_eq!(clamp_num_tabs(0.0), 1);
        assert_eq!(clamp_num_tabs(-4.0), 1);
        assert_eq!(clamp_num_tabs(3.9), 3);
        assert_eq!(clamp_num_tabs(f64::NAN), 1);
        assert_eq!(clamp_num_tabs(f64::INFINITY), 10);
    }

    #[test]
    fn start_clamps_large_worker_count() {
        let sink = RecordingSink::default();
        let gateway = CommandGateway::new(&sink);
        let sent = gateway
            .start("B1", &reports(&["r1", "r2", "r3"]), 37.0)
            .expect("accepted");
        assert_eq!(sent, 10);

        let commands = sink.take();
        assert_eq!(commands.len(), 1);
        match &commands[0] {
            OutboundCommand::StartTaqeemProcessing(payload) => {
                assert_eq!(payload.batch_id, "B1");
                assert_eq!(payload.num_tabs, 10);
                assert_eq!(payload.report_ids, reports(&["r1", "r2", "r3"]));
                assert_eq!(payload.action_type, ActionType::Process);
            }
            other => panic!("unexpected command {other:?}"),
        }
    }

    #[test]
    fn start_rejects_invalid_requests_without_sending() {
        let sink = RecordingSink::default();
        let gateway = CommandGateway::new(&sink);
        assert_eq!(
            gateway.start("B1", &[], 2.0),
            Err(CommandRejected::NoReports)
        );
        assert_eq!(
            gateway.start("  ", &reports(&["r1"]), 2.0),
            Err(CommandRejected::EmptyBatchId)
        );
        assert_eq!(
            gateway.start("B1", &reports(&["r1"]), 0.0),
            Err(CommandRejected::InvalidTabCount(0.0))
        );
        assert!(matches!(
            gateway.start("B1", &reports(&["r1"]), f64::NAN),
            Err(CommandRejected::InvalidTabCount(_))
        ));
        assert!(sink.take().is_empty());
    }

    #[test]
    fn control_commands_carry_only_batch_id() {
        let sink = RecordingSink::default();
        let gateway = CommandGateway::new(&sink);
        gateway.pause("B1").expect("pause");
        gateway.resume("B1").expect("resume");
        gateway.stop("B1").expect("stop");
        assert_eq!(gateway.stop(""), Err(CommandRejected::EmptyBatchId));

        let kinds: Vec<&str> = sink.take().iter().map(WireKind::kind).collect();
        assert_eq!(
            kinds,
            vec!["pause_processing", "resume_processing", "stop_processing"]
        );
    }

    #[test]
    fn session_commands_serialize_as_objects() {
        let join = serde_json::to_value(OutboundCommand::join_batch("B9")).expect("join");
        assert_eq!(join["type"], "join_batch");
        assert_eq!(join["payload"]["batchId"], "B9");
        let user = serde_json::to_value(OutboundCommand::user_identified("u-1")).expect("user");
        assert_eq!(user["payload"]["userId"], "u-1");
        assert_eq!(OutboundCommand::user_identified("u-1").batch_id(), None);
    }
}
