use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::convert::Infallible;
use std::fmt;
use std::str::FromStr;

/// Aggregate status of the active batch as held in `ProgressState`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BatchStatus {
    #[default]
    Idle,
    Started,
    Processing,
    TabStarted,
    TabCompleted,
    TabFailed,
    Paused,
    Resumed,
    Completed,
    Failed,
    Stopped,
}

impl BatchStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            BatchStatus::Idle => "IDLE",
            BatchStatus::Started => "STARTED",
            BatchStatus::Processing => "PROCESSING",
            BatchStatus::TabStarted => "TAB_STARTED",
            BatchStatus::TabCompleted => "TAB_COMPLETED",
            BatchStatus::TabFailed => "TAB_FAILED",
            BatchStatus::Paused => "PAUSED",
            BatchStatus::Resumed => "RESUMED",
            BatchStatus::Completed => "COMPLETED",
            BatchStatus::Failed => "FAILED",
            BatchStatus::Stopped => "STOPPED",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            BatchStatus::Completed | BatchStatus::Failed | BatchStatus::Stopped
        )
    }

    /// `STARTED` and `RESUMED` count as `PROCESSING` for `is_processing`.
    pub fn implies_processing(&self) -> bool {
        matches!(
            self,
            BatchStatus::Started | BatchStatus::Processing | BatchStatus::Resumed
        )
    }
}

impl fmt::Display for BatchStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Every status token a worker may put on the wire, aliases included.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum StatusToken {
    Idle,
    Started,
    ProcessingStarted,
    DataFetched,
    Processing,
    TabStarted,
    TabCompleted,
    TabFailed,
    RecordStarted,
    RecordCompleted,
    RecordSuccess,
    StepStarted,
    StepCompleted,
    Paused,
    Resumed,
    Completed,
    BatchCompleted,
    ProcessingComplete,
    Failed,
    Error,
    ProcessingError,
    Stopped,
    ProcessingStopped,
    Other(String),
}

impl StatusToken {
    pub fn as_str(&self) -> &str {
        match self {
            StatusToken::Idle => "IDLE",
            StatusToken::Started => "STARTED",
            StatusToken::ProcessingStarted => "PROCESSING_STARTED",
            StatusToken::DataFetched => "DATA_FETCHED",
            StatusToken::Processing => "PROCESSING",
            StatusToken::TabStarted => "TAB_STARTED",
            StatusToken::TabCompleted => "TAB_COMPLETED",
            StatusToken::TabFailed => "TAB_FAILED",
            StatusToken::RecordStarted => "RECORD_STARTED",
            StatusToken::RecordCompleted => "RECORD_COMPLETED",
            StatusToken::RecordSuccess => "RECORD_SUCCESS",
            StatusToken::StepStarted => "STEP_STARTED",
            StatusToken::StepCompleted => "STEP_COMPLETED",
            StatusToken::Paused => "PAUSED",
            StatusToken::Resumed => "RESUMED",
            StatusToken::Completed => "COMPLETED",
            StatusToken::BatchCompleted => "BATCH_COMPLETED",
            StatusToken::ProcessingComplete => "PROCESSING_COMPLETE",
            StatusToken::Failed => "FAILED",
            StatusToken::Error => "ERROR",
            StatusToken::ProcessingError => "PROCESSING_ERROR",
            StatusToken::Stopped => "STOPPED",
            StatusToken::ProcessingStopped => "PROCESSING_STOPPED",
            StatusToken::Other(raw) => raw.as_str(),
        }
    }

    /// Folds aliases and per-worker detail tokens onto the aggregate status.
    pub fn canonical(&self) -> BatchStatus {
        match self {
            StatusToken::Idle => BatchStatus::Idle,
            StatusToken::Started | StatusToken::ProcessingStarted => BatchStatus::Started,
            StatusToken::TabStarted => BatchStatus::TabStarted,
            StatusToken::TabCompleted => BatchStatus::TabCompleted,
            StatusToken::TabFailed => BatchStatus::TabFailed,
            StatusToken::Paused => BatchStatus::Paused,
            StatusToken::Resumed => BatchStatus::Resumed,
            StatusToken::Completed
            | StatusToken::BatchCompleted
            | StatusToken::ProcessingComplete => BatchStatus::Completed,
            StatusToken::Failed | StatusToken::Error | StatusToken::ProcessingError => {
                BatchStatus::Failed
            }
            StatusToken::Stopped | StatusToken::ProcessingStopped => BatchStatus::Stopped,
            StatusToken::Processing
            | StatusToken::DataFetched
            | StatusToken::RecordStarted
            | StatusToken::RecordCompleted
            | StatusToken::RecordSuccess
            | StatusToken::StepStarted
            | StatusToken::StepCompleted
            | StatusToken::Other(_) => BatchStatus::Processing,
        }
    }

    pub fn is_start(&self) -> bool {
        matches!(self, StatusToken::Started | StatusToken::ProcessingStarted)
    }

    pub fn is_terminal_success(&self) -> bool {
        self.canonical() == BatchStatus::Completed
    }

    pub fn is_failure(&self) -> bool {
        self.canonical() == BatchStatus::Failed
    }

    /// Tokens that describe one worker rather than the whole batch.
    pub fn is_worker_detail(&self) -> bool {
        matches!(
            self,
            StatusToken::TabStarted
                | StatusToken::TabCompleted
                | StatusToken::TabFailed
                | StatusToken::RecordStarted
                | StatusToken::RecordCompleted
                | StatusToken::RecordSuccess
                | StatusToken::StepStarted
                | StatusToken::StepCompleted
        )
    }

    /// A worker reporting one of these has nothing left to do.
    pub fn is_tab_finished(&self) -> bool {
        matches!(
            self,
            StatusToken::TabCompleted
                | StatusToken::Completed
                | StatusToken::TabFailed
                | StatusToken::Failed
        )
    }
}

impl FromStr for StatusToken {
    type Err = Infallible;

    fn from_str(input: &str) -> Result<Self, Self::Err> {
        let normalized = input
            .trim()
            .to_ascii_uppercase()
            .replace(['-', ' '], "_");
        let token = match normalized.as_str() {
            "IDLE" => StatusToken::Idle,
            "STARTED" => StatusToken::Started,
            "PROCESSING_STARTED" => StatusToken::ProcessingStarted,
            "DATA_FETCHED" => StatusToken::DataFetched,
            "PROCESSING" => StatusToken::Processing,
            "TAB_STARTED" => StatusToken::TabStarted,
            "TAB_COMPLETED" => StatusToken::TabCompleted,
            "TAB_FAILED" => StatusToken::TabFailed,
            "RECORD_STARTED" => StatusToken::RecordStarted,
            "RECORD_COMPLETED" => StatusToken::RecordCompleted,
            "RECORD_SUCCESS" => StatusToken::RecordSuccess,
            "STEP_STARTED" => StatusToken::StepStarted,
            "STEP_COMPLETED" => StatusToken::StepCompleted,
            "PAUSED" => StatusToken::Paused,
            "RESUMED" => StatusToken::Resumed,
            "COMPLETED" => StatusToken::Completed,
            "BATCH_COMPLETED" => StatusToken::BatchCompleted,
            "PROCESSING_COMPLETE" => StatusToken::ProcessingComplete,
            "FAILED" => StatusToken::Failed,
            "ERROR" => StatusToken::Error,
            "PROCESSING_ERROR" => StatusToken::ProcessingError,
            "STOPPED" => StatusToken::Stopped,
            "PROCESSING_STOPPED" => StatusToken::ProcessingStopped,
            _ => StatusToken::Other(input.trim().to_string()),
        };
        Ok(token)
    }
}

impl From<BatchStatus> for StatusToken {
    fn from(status: BatchStatus) -> Self {
        match status {
            BatchStatus::Idle => StatusToken::Idle,
            BatchStatus::Started => StatusToken::Started,
            BatchStatus::Processing => StatusToken::Processing,
            BatchStatus::TabStarted => StatusToken::TabStarted,
            BatchStatus::TabCompleted => StatusToken::TabCompleted,
            BatchStatus::TabFailed => StatusToken::TabFailed,
            BatchStatus::Paused => StatusToken::Paused,
            BatchStatus::Resumed => StatusToken::Resumed,
            BatchStatus::Completed => StatusToken::Completed,
            BatchStatus::Failed => StatusToken::Failed,
            BatchStatus::Stopped => StatusToken::Stopped,
        }
    }
}

impl fmt::Display for StatusToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Serialize for StatusToken {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for StatusToken {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw = String::deserialize(deserializer)?;
        Ok(raw.parse().unwrap_or_else(|never: Infallible| match never {}))
    }
}
