use std::time::Duration;

use indicatif::{MultiProgress, ProgressBar, ProgressStyle};
use once_cell::sync::Lazy;
use serde::Serialize;
use tracing::{Level, event};

pub const PROGRESS_TRACE_TARGET: &str = "lipsync::progress";

static PROGRESS_BAR: Lazy<MultiProgress> = Lazy::new(MultiProgress::new);

pub fn progress_bar(filename: &str) -> ProgressBar {
    let pb = PROGRESS_BAR.add(ProgressBar::new_spinner());
    pb.enable_steady_tick(Duration::from_millis(120));
    pb.set_style(
        ProgressStyle::with_template(
            "{msg} [{elapsed_precise}] [{wide_bar}] {bytes}/{total_bytes} ({eta})",
        )
        .expect("set progress bar style"),
    );
    pb.set_message(filename.to_string());
    pb
}

/// Spinner for a long-running external process.
pub fn stage_spinner(label: &str) -> ProgressBar {
    let pb = PROGRESS_BAR.add(ProgressBar::new_spinner());
    pb.enable_steady_tick(Duration::from_millis(120));
    pb.set_style(
        ProgressStyle::with_template("{spinner} {msg} [{elapsed_precise}]")
            .expect("set spinner style"),
    );
    pb.set_message(label.to_string());
    pb
}

#[derive(Debug, Serialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum StepStatus {
    Started,
    Succeeded,
    Failed,
    Skipped,
}

/// Emits a structured progress record for one step of a multi-step run.
pub fn emit_step(step: &str, index: usize, total: usize, status: StepStatus) {
    event!(
        target: PROGRESS_TRACE_TARGET,
        Level::TRACE,
        step,
        index = index as u64,
        total = total as u64,
        status = ?status
    );
}
