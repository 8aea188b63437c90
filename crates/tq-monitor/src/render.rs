use tq_core::event::PauseSignal;
use tq_core::progress::ProgressState;
use tq_core::tabs::TabProgress;
use tq_core::{BatchStats, Report};

const SHORT_ID_CHARS: usize = 8;

pub fn short_id(batch_id: &str) -> String {
    let short: String = batch_id.chars().take(SHORT_ID_CHARS).collect();
    format!("{short}...")
}

/// Lines printed for one state change: the status line, the error when set,
/// and one line per worker for multi-worker runs.
pub fn progress_lines(state: &ProgressState) -> Vec<String> {
    let batch = state
        .batch_id
        .as_deref()
        .map(short_id)
        .unwrap_or_else(|| "-".to_string());
    let message = if state.message.is_empty() {
        state.status.as_str().to_string()
    } else {
        state.message.clone()
    };
    let mut lines = vec![format!(
        "Batch {batch} - {message}  {} / {} ({}%)",
        state.current, state.total, state.percentage
    )];
    if let Some(error) = &state.error {
        lines.push(format!("Error: {error}"));
    }
    if state.num_tabs > 1 {
        lines.extend(state.tab_progresses.iter().map(tab_line));
        let board = &state.tab_progresses;
        lines.push(if board.all_finished(state.num_tabs) {
            format!("  All {} workers finished", state.num_tabs)
        } else {
            format!(
                "  {}/{} workers finished",
                board.finished_count(),
                state.num_tabs
            )
        });
    }
    lines
}

fn tab_line(tab: &TabProgress) -> String {
    let role = if tab.is_main_tab { " (main)" } else { "" };
    let mut line = format!("  Worker {}{role}: {}", tab.tab_id, tab.status);
    if let (Some(current), Some(total)) = (tab.current, tab.total) {
        line.push_str(&format!(" {current}/{total}"));
    }
    if let Some(pct) = tab.percentage {
        line.push_str(&format!(" ({pct}%)"));
    }
    if !tab.message.is_empty() {
        line.push_str(&format!(" - {}", tab.message));
    }
    line
}

pub fn pause_line(signal: &PauseSignal) -> String {
    let verb = if signal.is_paused { "paused" } else { "resumed" };
    format!("Batch {} {verb}", short_id(&signal.batch_id))
}

pub fn batch_line(stats: &BatchStats) -> String {
    let uploaded = stats.latest_upload.as_deref().unwrap_or("-");
    format!(
        "{}  {}/{} submitted  {}  last upload {uploaded}",
        stats.id, stats.submitted_count, stats.count, stats.submission_status
    )
}

pub fn batch_lines(batches: &[BatchStats]) -> Vec<String> {
    if batches.is_empty() {
        return vec!["No batches found".to_string()];
    }
    batches.iter().map(batch_line).collect()
}

/// Records of an expanded batch, in row order.
pub fn report_lines(reports: &[Report]) -> Vec<String> {
    let mut rows: Vec<&Report> = reports.iter().collect();
    rows.sort_by_key(|report| report.row_number);
    rows.into_iter()
        .map(|report| {
            let form = if report.form_id.is_empty() {
                "-"
            } else {
                report.form_id.as_str()
            };
            format!("    row {}  {}  form {form}", report.row_number, report.id)
        })
        .collect()
}
