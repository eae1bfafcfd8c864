use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use lipsync_core::{
    CommandOutcome, CommandSpec,
    progress::{StepStatus, emit_step, stage_spinner},
};
use serde::Serialize;
use tracing::{Instrument, error, info, info_span, warn};

use crate::{
    settings::FailurePolicy,
    stages::{Stage, StageContext},
    workspace::{frames, verify_frames},
};

/// Lines of captured stderr kept in reports and logs.
const STDERR_TAIL_LINES: usize = 40;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum StageStatus {
    Succeeded,
    Failed,
    Skipped,
}

#[derive(Debug, thiserror::Error)]
pub enum StageError {
    #[error("{stage} could not be started: {reason}")]
    Spawn { stage: Stage, reason: String },

    #[error("{stage} failed with {exit}")]
    Exit {
        stage: Stage,
        exit: String,
        code: Option<i32>,
        stderr: String,
    },
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StageReport {
    pub stage: Stage,
    pub status: StageStatus,
    pub command: String,
    pub exit_code: Option<i32>,
    pub elapsed: Duration,
    pub input_frames: Option<usize>,
    pub output_frames: Option<usize>,
    pub unreadable_frames: Vec<PathBuf>,
    pub error: Option<String>,
    pub stderr: Option<String>,
}

impl StageReport {
    fn skipped(stage: Stage, command: String) -> Self {
        Self {
            stage,
            status: StageStatus::Skipped,
            command,
            exit_code: None,
            elapsed: Duration::ZERO,
            input_frames: None,
            output_frames: None,
            unreadable_frames: Vec::new(),
            error: None,
            stderr: None,
        }
    }
}

fn check(stage: Stage, result: Result<CommandOutcome>) -> Result<CommandOutcome, StageError> {
    let outcome = result.map_err(|err| StageError::Spawn {
        stage,
        reason: format!("{err:#}"),
    })?;
    if outcome.success() {
        Ok(outcome)
    } else {
        Err(StageError::Exit {
            stage,
            exit: outcome.exit_label(),
            code: outcome.code,
            stderr: outcome.stderr_tail(STDERR_TAIL_LINES),
        })
    }
}

async fn count_frames(dir: Option<PathBuf>) -> Option<usize> {
    let dir = dir?;
    let listed = tokio::task::spawn_blocking(move || {
        frames(&dir).with_context(|| format!("cannot list {}", dir.display()))
    })
    .await;
    match listed {
        Ok(Ok(found)) => Some(found.len()),
        Ok(Err(err)) => {
            warn!("{err:#}");
            None
        }
        Err(err) => {
            warn!("frame listing task failed: {err}");
            None
        }
    }
}

/// Lists the frames in `dir` and decodes their headers off the async runtime.
async fn inspect_frames(dir: PathBuf) -> (usize, Vec<PathBuf>) {
    let inspected = tokio::task::spawn_blocking(move || {
        let produced = frames(&dir).unwrap_or_default();
        (produced.len(), verify_frames(&produced))
    })
    .await;
    inspected.unwrap_or_else(|err| {
        warn!("frame inspection task failed: {err}");
        (0, Vec::new())
    })
}

/// Runs the face-restoration and re-encoding chain over the inference output.
pub struct PostProcessor<'a> {
    ctx: StageContext<'a>,
    policy: FailurePolicy,
}

impl<'a> PostProcessor<'a> {
    pub fn new(ctx: StageContext<'a>, policy: FailurePolicy) -> Self {
        Self { ctx, policy }
    }

    /// Runs every stage in order, each to completion before the next starts.
    ///
    /// Frames from earlier runs are cleared first. Only failing to reset the
    /// work directories is an error; stage failures are recorded in the
    /// returned reports.
    pub async fn run(&self) -> Result<Vec<StageReport>> {
        self.ctx.work.clear_frames()?;

        let total = Stage::ALL.len();
        let mut reports = Vec::with_capacity(total);
        let mut aborted = false;

        for (index, &stage) in Stage::ALL.iter().enumerate() {
            let spec = stage.command(&self.ctx);
            if aborted {
                info!("{stage}: skipped after an earlier failure");
                emit_step(stage.description(), index, total, StepStatus::Skipped);
                reports.push(StageReport::skipped(stage, spec.to_string()));
                continue;
            }

            let span = info_span!("stage", %stage);
            let report = self
                .run_stage(stage, spec, index, total)
                .instrument(span)
                .await;
            aborted =
                report.status == StageStatus::Failed && self.policy == FailurePolicy::Abort;
            reports.push(report);
        }

        Ok(reports)
    }

    async fn run_stage(
        &self,
        stage: Stage,
        spec: CommandSpec,
        index: usize,
        total: usize,
    ) -> StageReport {
        let input_frames = count_frames(stage.input_dir(self.ctx.work)).await;
        if input_frames == Some(0) {
            warn!(
                "{stage}: no input frames; an earlier stage probably failed, running anyway"
            );
        }

        info!(input_frames = ?input_frames, "{}: {spec}", stage.description());
        emit_step(stage.description(), index, total, StepStatus::Started);
        let spinner = stage_spinner(stage.description());
        let result = spec.output().await;
        spinner.finish_and_clear();

        let elapsed = result.as_ref().map(|o| o.elapsed).unwrap_or_default();
        let mut report = StageReport {
            stage,
            status: StageStatus::Succeeded,
            command: spec.to_string(),
            exit_code: result.as_ref().ok().and_then(|o| o.code),
            elapsed,
            input_frames,
            output_frames: None,
            unreadable_frames: Vec::new(),
            error: None,
            stderr: None,
        };

        match check(stage, result) {
            Ok(_) => {
                info!(?elapsed, "{} succeeded", stage.description());
                emit_step(stage.description(), index, total, StepStatus::Succeeded);
            }
            Err(err) => {
                match &err {
                    StageError::Exit { stderr, .. } => {
                        error!("{err}:\n{stderr}");
                        report.stderr = Some(stderr.clone());
                    }
                    StageError::Spawn { .. } => error!("{err}"),
                }
                emit_step(stage.description(), index, total, StepStatus::Failed);
                report.status = StageStatus::Failed;
                report.error = Some(err.to_string());
            }
        }

        if let Some(dir) = stage.output_dir(self.ctx.work) {
            let (produced, unreadable) = inspect_frames(dir.clone()).await;
            if !unreadable.is_empty() {
                warn!(
                    "{stage}: {} of {produced} frames in {} are unreadable",
                    unreadable.len(),
                    dir.display()
                );
            }
            report.output_frames = Some(produced);
            report.unreadable_frames = unreadable;
        }

        report
    }
}

/// Everything a run did, for the summary and `--report`.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RunReport {
    pub version: &'static str,
    pub inference: lipsync_ml::pipeline::InferenceRequest,
    pub bootstrap: Option<lipsync_runtime::BootstrapReport>,
    pub failure_policy: FailurePolicy,
    pub stages: Vec<StageReport>,
    pub final_video: Option<PathBuf>,
}

impl RunReport {
    pub fn failed_stages(&self) -> Vec<Stage> {
        self.stages
            .iter()
            .filter(|report| report.status == StageStatus::Failed)
            .map(|report| report.stage)
            .collect()
    }

    pub fn succeeded(&self) -> bool {
        self.failed_stages().is_empty()
    }
}
