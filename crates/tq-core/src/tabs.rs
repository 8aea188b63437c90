use crate::event::{ProgressEvent, MAIN_TAB_ID};
use crate::progress::percent_of;
use crate::status::StatusToken;
use serde::Serialize;
use std::collections::BTreeMap;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TabProgress {
    pub tab_id: u32,
    pub status: StatusToken,
    pub message: String,
    pub current: Option<u64>,
    pub total: Option<u64>,
    pub percentage: Option<u8>,
    pub is_main_tab: bool,
}

impl TabProgress {
    fn empty(tab_id: u32) -> Self {
        Self {
            tab_id,
            status: StatusToken::TabStarted,
            message: String::new(),
            current: None,
            total: None,
            percentage: None,
            is_main_tab: tab_id <= MAIN_TAB_ID,
        }
    }

    pub fn is_finished(&self) -> bool {
        self.status.is_tab_finished()
    }
}

/// Last known state of each worker, ordered by worker id.
#[derive(Debug, Clone, PartialEq, Default, Serialize)]
#[serde(transparent)]
pub struct TabBoard {
    tabs: BTreeMap<u32, TabProgress>,
}

impl TabBoard {
    /// Merges a per-worker event into its entry. Events without `tab_id` are
    /// not worker events and leave the board untouched.
    pub fn upsert(&mut self, event: &ProgressEvent) -> bool {
        let Some(tab_id) = event.tab_id else {
            return false;
        };
        let entry = self
            .tabs
            .entry(tab_id)
            .or_insert_with(|| TabProgress::empty(tab_id));

        if let Some(status) = &event.status {
            entry.status = status.clone();
        }
        if let Some(message) = &event.message {
            entry.message = message.clone();
        }
        if event.current.is_some() {
            entry.current = event.current;
        }
        if event.total.is_some() {
            entry.total = event.total;
        }
        entry.percentage = match (entry.current, entry.total) {
            (Some(current), Some(total)) if total > 0 => Some(percent_of(current, total)),
            _ => event
                .percentage
                .filter(|pct| pct.is_finite())
                .map(|pct| pct.round().clamp(0.0, 100.0) as u8)
                .or(entry.percentage),
        };
        if let Some(flag) = event.is_aggregate {
            entry.is_main_tab = flag;
        }
        true
    }

    pub fn get(&self, tab_id: u32) -> Option<&TabProgress> {
        self.tabs.get(&tab_id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &TabProgress> {
        self.tabs.values()
    }

    pub fn len(&self) -> usize {
        self.tabs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tabs.is_empty()
    }

    pub fn clear(&mut self) {
        self.tabs.clear();
    }

    pub fn finished_count(&self) -> usize {
        self.tabs.values().filter(|tab| tab.is_finished()).count()
    }

    /// True once every one of `num_tabs` workers has reported a finished
    /// status. Workers that never reported count as unfinished.
    pub fn all_finished(&self, num_tabs: u32) -> bool {
        num_tabs > 0 && self.finished_count() >= num_tabs as usize
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn worker(tab_id: u32, status: StatusToken) -> ProgressEvent {
        ProgressEvent {
            tab_id: Some(tab_id),
            status: Some(status),
            ..ProgressEvent::default()
        }
    }

    #[test]
    fn upsert_merges_fields_per_worker() {
        let mut board = TabBoard::default();
        assert!(board.upsert(&ProgressEvent {
            current: Some(2),
            total: Some(8),
            message: Some("record 2".to_string()),
            ..worker(3, StatusToken::RecordStarted)
        }));
        assert!(board.upsert(&ProgressEvent {
            tab_id: Some(3),
            current: Some(4),
            ..ProgressEvent::default()
        }));

        let tab = board.get(3).expect("tab 3");
        assert_eq!(tab.status, StatusToken::RecordStarted);
        assert_eq!(tab.message, "record 2");
        assert_eq!(tab.current, Some(4));
        assert_eq!(tab.total, Some(8));
        assert_eq!(tab.percentage, Some(50));
        assert!(!tab.is_main_tab);
    }

    #[test]
    fn events_without_worker_id_are_skipped() {
        let mut board = TabBoard::default();
        assert!(!board.upsert(&ProgressEvent::with_status(StatusToken::Processing)));
        assert!(board.is_empty());
    }

    #[test]
    fn reported_percentage_used_when_counts_missing() {
        let mut board = TabBoard::default();
        board.upsert(&ProgressEvent {
            percentage: Some(66.6),
            ..worker(1, StatusToken::StepCompleted)
        });
        let tab = board.get(1).expect("tab 1");
        assert_eq!(tab.percentage, Some(67));
        assert!(tab.is_main_tab);
    }

    #[test]
    fn all_finished_requires_every_expected_worker() {
        let mut board = TabBoard::default();
        board.upsert(&worker(1, StatusToken::TabCompleted));
        board.upsert(&worker(2, StatusToken::TabFailed));
        assert!(!board.all_finished(3));
        board.upsert(&worker(3, StatusToken::RecordSuccess));
        assert!(!board.all_finished(3));
        board.upsert(&worker(3, StatusToken::TabCompleted));
        assert!(board.all_finished(3));
        assert_eq!(
            board.iter().map(|tab| tab.tab_id).collect::<Vec<_>>(),
            vec![1, 2, 3]
        );
    }
}
