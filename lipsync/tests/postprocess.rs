#![cfg(unix)]

use std::path::Path;

use lipsync::{
    pipeline::{PostProcessor, StageReport, StageStatus},
    settings::{FailurePolicy, Settings},
    stages::{Stage, StageContext},
    workspace::{ENHANCED_FRAMES, FINAL_FRAMES, TEMP_FRAMES, WorkDir},
};

fn settings(python: &str, ffmpeg: &str) -> Settings {
    let mut settings = Settings::default();
    settings.tools.python = python.to_string();
    settings.tools.ffmpeg = ffmpeg.to_string();
    settings
}

async fn run_chain(
    root: &Path,
    settings: &Settings,
    policy: FailurePolicy,
) -> anyhow::Result<Vec<StageReport>> {
    let work = WorkDir::new(root, settings.encode.output.clone())?;
    let codeformer_dir = root.join("CodeFormer");
    std::fs::create_dir_all(&codeformer_dir)?;
    let video_path = root.join("out.mp4");
    let audio_path = root.join("voice.wav");

    let ctx = StageContext {
        settings,
        work: &work,
        video_path: &video_path,
        audio_path: &audio_path,
        codeformer_dir,
    };
    PostProcessor::new(ctx, policy).run().await
}

fn statuses(reports: &[StageReport]) -> Vec<StageStatus> {
    reports.iter().map(|report| report.status).collect()
}

#[tokio::test]
async fn every_stage_runs_when_all_fail() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let reports = run_chain(
        dir.path(),
        &settings("false", "false"),
        FailurePolicy::Continue,
    )
    .await?;

    let stages: Vec<Stage> = reports.iter().map(|report| report.stage).collect();
    assert_eq!(stages, Stage::ALL);
    assert_eq!(statuses(&reports), [StageStatus::Failed; 4]);
    for report in &reports {
        assert_eq!(report.exit_code, Some(1), "{}", report.stage);
        assert!(report.error.is_some());
    }
    Ok(())
}

#[tokio::test]
async fn failed_stage_does_not_stop_the_chain() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let reports = run_chain(
        dir.path(),
        &settings("false", "true"),
        FailurePolicy::Continue,
    )
    .await?;

    assert_eq!(
        statuses(&reports),
        [
            StageStatus::Succeeded,
            StageStatus::Failed,
            StageStatus::Failed,
            StageStatus::Succeeded,
        ]
    );
    // `true` writes nothing, so every later stage sees an empty input.
    assert_eq!(reports[0].output_frames, Some(0));
    assert_eq!(reports[1].input_frames, Some(0));
    Ok(())
}

#[tokio::test]
async fn abort_policy_skips_the_rest() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let reports = run_chain(
        dir.path(),
        &settings("true", "false"),
        FailurePolicy::Abort,
    )
    .await?;

    assert_eq!(
        statuses(&reports),
        [
            StageStatus::Failed,
            StageStatus::Skipped,
            StageStatus::Skipped,
            StageStatus::Skipped,
        ]
    );
    assert!(reports[1].command.contains("gfpgan"));
    assert_eq!(reports[3].exit_code, None);
    Ok(())
}

#[tokio::test]
async fn rerunning_over_existing_directories_succeeds() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let settings = settings("true", "true");

    let first = run_chain(dir.path(), &settings, FailurePolicy::Continue).await?;
    let second = run_chain(dir.path(), &settings, FailurePolicy::Continue).await?;

    assert_eq!(statuses(&first), statuses(&second));
    assert_eq!(statuses(&second), [StageStatus::Succeeded; 4]);
    for sub in [TEMP_FRAMES, ENHANCED_FRAMES, FINAL_FRAMES] {
        assert!(dir.path().join(sub).is_dir(), "{sub} missing");
    }
    Ok(())
}

#[tokio::test]
async fn frames_from_an_earlier_run_are_not_reused() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let stale = dir.path().join(TEMP_FRAMES);
    std::fs::create_dir_all(&stale)?;
    for name in ["frame_0001.png", "frame_0002.png"] {
        std::fs::write(stale.join(name), b"old clip")?;
    }

    let reports = run_chain(
        dir.path(),
        &settings("false", "false"),
        FailurePolicy::Continue,
    )
    .await?;

    assert_eq!(reports[0].status, StageStatus::Failed);
    assert_eq!(reports[0].output_frames, Some(0));
    assert_eq!(reports[1].input_frames, Some(0));
    Ok(())
}
