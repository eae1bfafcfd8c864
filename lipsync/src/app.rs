use std::{
    path::{Path, PathBuf},
    process::ExitCode,
};

use anyhow::{Context, Result};
use clap::Parser;
use lipsync_ml::{
    checkpoints::{self, Checkpoints},
    config::{SchedulerConfig, UnetConfig},
    device_name,
    pipeline::{ExternalPipeline, InferenceArgs, InferenceRequest, LipsyncBackend},
    precision,
};
use tracing::{info, warn};
use tracing_subscriber::fmt::format::FmtSpan;

use crate::{
    pipeline::{PostProcessor, RunReport, StageStatus},
    settings::{FailurePolicy, Settings},
    stages::{Stage, StageContext},
    version::APP_VERSION,
    workspace::WorkDir,
};

#[derive(Parser)]
#[command(version = APP_VERSION, about)]
struct Cli {
    #[arg(
        long = "unet_config_path",
        value_name = "FILE",
        default_value = "configs/unet/second_stage.yaml"
    )]
    unet_config_path: PathBuf,
    #[arg(
        long = "inference_ckpt_path",
        value_name = "FILE",
        required_unless_present = "download"
    )]
    inference_ckpt_path: Option<PathBuf>,
    #[arg(
        long = "video_path",
        value_name = "FILE",
        required_unless_present = "download"
    )]
    video_path: Option<PathBuf>,
    #[arg(
        long = "audio_path",
        value_name = "FILE",
        required_unless_present = "download"
    )]
    audio_path: Option<PathBuf>,
    #[arg(
        long = "video_out_path",
        value_name = "FILE",
        required_unless_present = "download"
    )]
    video_out_path: Option<PathBuf>,
    #[arg(long = "inference_steps", default_value_t = 20)]
    inference_steps: u32,
    #[arg(long = "guidance_scale", default_value_t = 1.0)]
    guidance_scale: f32,
    #[arg(
        long,
        default_value_t = 1247,
        allow_negative_numbers = true,
        help = "Random seed, -1 picks one at random"
    )]
    seed: i64,
    #[arg(long, value_name = "FILE", help = "TOML settings file")]
    settings: Option<PathBuf>,
    #[arg(
        long = "work_dir",
        value_name = "DIR",
        default_value = ".",
        help = "Directory for intermediate frames and the final video"
    )]
    work_dir: PathBuf,
    #[arg(
        long,
        help = "Download checkpoints and exit",
        default_value_t = false
    )]
    download: bool,
    #[arg(
        long = "skip_bootstrap",
        help = "Do not check or install GFPGAN and CodeFormer",
        default_value_t = false
    )]
    skip_bootstrap: bool,
    #[arg(
        long = "skip_postprocess",
        help = "Stop after inference",
        default_value_t = false
    )]
    skip_postprocess: bool,
    #[arg(
        long = "fail_fast",
        help = "Skip the remaining post-processing stages after a failure",
        default_value_t = false
    )]
    fail_fast: bool,
    #[arg(
        long,
        help = "Force using CPU even if GPU is available",
        default_value_t = false
    )]
    cpu: bool,
    #[arg(long, value_name = "FILE", help = "Write the run report as JSON")]
    report: Option<PathBuf>,
}

impl Cli {
    fn inference_args(&self) -> Result<InferenceArgs> {
        fn required(value: &Option<PathBuf>, flag: &str) -> Result<PathBuf> {
            value.clone().with_context(|| format!("--{flag} is required"))
        }

        Ok(InferenceArgs {
            unet_config_path: self.unet_config_path.clone(),
            inference_ckpt_path: required(&self.inference_ckpt_path, "inference_ckpt_path")?,
            video_path: required(&self.video_path, "video_path")?,
            audio_path: required(&self.audio_path, "audio_path")?,
            video_out_path: required(&self.video_out_path, "video_out_path")?,
            inference_steps: self.inference_steps,
            guidance_scale: self.guidance_scale,
            seed: self.seed,
        })
    }

    fn failure_policy(&self, settings: &Settings) -> FailurePolicy {
        if self.fail_fast {
            FailurePolicy::Abort
        } else {
            settings.pipeline.failure_policy
        }
    }
}

fn initialize() {
    tracing_subscriber::fmt()
        .with_span_events(FmtSpan::CLOSE)
        .with_env_filter(
            tracing_subscriber::filter::EnvFilter::builder()
                .with_default_directive(tracing::Level::INFO.into())
                .from_env_lossy(),
        )
        .init();
}

fn print_summary(report: &RunReport) {
    println!("lipsync {}", report.version);
    println!("  output video: {}", report.inference.video_out_path.display());
    for stage in &report.stages {
        let status = match stage.status {
            StageStatus::Succeeded => "ok",
            StageStatus::Failed => "FAILED",
            StageStatus::Skipped => "skipped",
        };
        println!(
            "  {:<24} {status:<8} {:.1}s",
            stage.stage.description(),
            stage.elapsed.as_secs_f32()
        );
    }
    match &report.final_video {
        Some(path) => println!("  final video: {}", path.display()),
        None if report.stages.is_empty() => {}
        None => println!("  final video: not produced"),
    }
}

fn write_report(path: &Path, report: &RunReport) -> Result<()> {
    let json = serde_json::to_string_pretty(report)?;
    std::fs::write(path, json).with_context(|| format!("failed to write {}", path.display()))
}

pub async fn run() -> Result<ExitCode> {
    let cli = Cli::parse();
    initialize();

    let settings = Settings::load(cli.settings.as_deref())?;
    let checkpoints = Checkpoints::new(&settings.inference.checkpoints_dir);

    if cli.download {
        info!("hub cache: {}", lipsync_core::hf_hub::cache_dir().display());
        checkpoints::prefetch(&checkpoints).await?;
        return Ok(ExitCode::SUCCESS);
    }

    let args = cli.inference_args()?;
    let config = UnetConfig::load(&args.unet_config_path)?;
    let whisper = config.whisper_model()?;
    let scheduler = SchedulerConfig::load(&settings.inference.scheduler_dir)?;
    info!(
        scheduler = scheduler.class_name.as_deref().unwrap_or("DDIMScheduler"),
        train_timesteps = ?scheduler.num_train_timesteps,
        beta_schedule = ?scheduler.beta_schedule,
        steps = args.inference_steps,
        "whisper model: {whisper}"
    );

    let device = device_name(cli.cpu);
    let dtype = precision(device).await;
    info!("device: {device}, dtype: {dtype}");

    let request = InferenceRequest::build(
        &args,
        &config,
        &checkpoints,
        &settings.inference.scheduler_dir,
        device,
        dtype,
    )?;
    info!("input video: {}", request.video_path.display());
    info!("input audio: {}", request.audio_path.display());
    info!("seed: {}", request.seed);

    let bootstrap = if cli.skip_bootstrap {
        None
    } else {
        let report = lipsync_runtime::ensure_dependencies(&settings.runtime_config()).await;
        if !report.all_ok() {
            warn!("some dependencies are missing; the affected stages will fail");
        }
        Some(report)
    };

    let mut backend = ExternalPipeline::new(
        settings.inference.command.clone(),
        settings.tools.python.clone(),
    );
    if let Some(dir) = &settings.inference.working_dir {
        backend = backend.with_working_dir(dir);
    }
    backend.run(&request).await?;

    let work = WorkDir::new(&cli.work_dir, settings.encode.output.clone())?;
    let policy = cli.failure_policy(&settings);
    let stages = if cli.skip_postprocess {
        info!("post-processing skipped");
        Vec::new()
    } else {
        let codeformer_dir = std::path::absolute(&settings.codeformer.dir).with_context(|| {
            format!("invalid CodeFormer dir {}", settings.codeformer.dir.display())
        })?;
        let ctx = StageContext {
            settings: &settings,
            work: &work,
            video_path: &request.video_out_path,
            audio_path: &request.audio_path,
            codeformer_dir,
        };
        PostProcessor::new(ctx, policy).run().await?
    };

    let encoded = stages
        .iter()
        .any(|report| report.stage == Stage::Encode && report.status == StageStatus::Succeeded);
    let final_video = Some(work.final_video()).filter(|path| encoded && path.is_file());

    let report = RunReport {
        version: APP_VERSION,
        inference: request,
        bootstrap,
        failure_policy: policy,
        stages,
        final_video,
    };
    print_summary(&report);
    if let Some(path) = &cli.report {
        write_report(path, &report)?;
    }

    if report.succeeded() {
        Ok(ExitCode::SUCCESS)
    } else {
        warn!(failed = ?report.failed_stages(), "post-processing finished with failures");
        Ok(ExitCode::from(1))
    }
}
