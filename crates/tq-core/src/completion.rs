use crate::event::ProgressEvent;
use crate::progress::ProgressState;
use crate::status::BatchStatus;
use std::time::{Duration, Instant};

pub const DEFAULT_COMPLETION_COOLDOWN: Duration = Duration::from_secs(2);

/// What a reducer transition means for completion handling.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompletionSignal {
    /// The batch finished successfully; refresh work may be due.
    Success,
    /// A new run began or the current one ended without success.
    Rearm,
    None,
}

/// Classifies one transition. Redelivered success events count as success
/// even when the state did not change, so the latch can coalesce them.
pub fn completion_signal(
    prev: &ProgressState,
    next: &ProgressState,
    event: Option<&ProgressEvent>,
) -> CompletionSignal {
    let aggregate_token = event
        .filter(|event| !prev.is_foreign(event))
        .filter(|event| event.is_aggregate_for(prev.num_tabs))
        .and_then(|event| event.status.as_ref());

    if next.status == BatchStatus::Completed {
        let entered = prev.status != BatchStatus::Completed;
        let redelivered = aggregate_token.is_some_and(|token| token.is_terminal_success());
        if entered || redelivered {
            return CompletionSignal::Success;
        }
        return CompletionSignal::None;
    }

    let failed = next.status == BatchStatus::Failed
        && (prev.status != BatchStatus::Failed
            || aggregate_token.is_some_and(|token| token.is_failure()));
    let restarted = next.status == BatchStatus::Started && prev.status != BatchStatus::Started;
    let stopped = next.status == BatchStatus::Stopped && prev.status != BatchStatus::Stopped;
    let reset = next.status == BatchStatus::Idle && prev.status != BatchStatus::Idle;
    if failed || restarted || stopped || reset {
        CompletionSignal::Rearm
    } else {
        CompletionSignal::None
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LatchDecision {
    /// First success in the window: run the refresh.
    Run,
    /// Success inside the cool-down of an earlier one.
    Coalesced,
    Rearmed,
    Ignored,
}

/// Lets one completion through per cool-down window.
#[derive(Debug, Clone)]
pub struct CompletionLatch {
    cooldown: Duration,
    handled_at: Option<Instant>,
}

impl Default for CompletionLatch {
    fn default() -> Self {
        Self::new(DEFAULT_COMPLETION_COOLDOWN)
    }
}

impl CompletionLatch {
    pub fn new(cooldown: Duration) -> Self {
        Self {
            cooldown,
            handled_at: None,
        }
    }

    pub fn is_armed(&self, now: Instant) -> bool {
        match self.handled_at {
            None => true,
            Some(at) => now.saturating_duration_since(at) >= self.cooldown,
        }
    }

    pub fn rearm(&mut self) {
        self.handled_at = None;
    }

    pub fn observe(&mut self, signal: CompletionSignal, now: Instant) -> LatchDecision {
        match signal {
            CompletionSignal::Success if self.is_armed(now) => {
                self.handled_at = Some(now);
                LatchDecision::Run
            }
            CompletionSignal::Success => LatchDecision::Coalesced,
            CompletionSignal::Rearm => {
                self.rearm();
                LatchDecision::Rearmed
            }
            CompletionSignal::None => LatchDecision::Ignored,
        }
    }
}
