use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use async_trait::async_trait;
use lipsync_core::{CommandSpec, progress::stage_spinner};
use serde::Serialize;
use tracing::{info, instrument};

use crate::{
    ConfigError, DeviceName, Precision,
    checkpoints::{Checkpoints, require_file},
    config::UnetConfig,
};

/// Argument template for the upstream LatentSync inference entry point.
pub const DEFAULT_COMMAND: &[&str] = &[
    "{python}",
    "-m",
    "scripts.inference",
    "--unet_config_path",
    "{unet_config_path}",
    "--inference_ckpt_path",
    "{inference_ckpt_path}",
    "--video_path",
    "{video_path}",
    "--audio_path",
    "{audio_path}",
    "--video_out_path",
    "{video_out_path}",
    "--inference_steps",
    "{inference_steps}",
    "--guidance_scale",
    "{guidance_scale}",
    "--seed",
    "{seed}",
];

/// `-1` draws a fresh random seed; any other value must be non-negative.
pub fn resolve_seed(seed: i64) -> Result<u64, ConfigError> {
    match seed {
        -1 => Ok(u64::from(rand::random::<u32>())),
        seed if seed >= 0 => Ok(seed as u64),
        seed => Err(ConfigError::InvalidSeed(seed)),
    }
}

/// User-facing inference inputs, as given on the command line.
#[derive(Debug, Clone)]
pub struct InferenceArgs {
    pub unet_config_path: PathBuf,
    pub inference_ckpt_path: PathBuf,
    pub video_path: PathBuf,
    pub audio_path: PathBuf,
    pub video_out_path: PathBuf,
    pub inference_steps: u32,
    pub guidance_scale: f32,
    pub seed: i64,
}

/// Fully resolved inference call. Paths are absolute so the backend may run
/// from any working directory.
#[derive(Debug, Clone, Serialize)]
pub struct InferenceRequest {
    pub unet_config_path: PathBuf,
    pub inference_ckpt_path: PathBuf,
    pub video_path: PathBuf,
    pub audio_path: PathBuf,
    pub video_out_path: PathBuf,
    pub video_mask_path: PathBuf,
    pub inference_steps: u32,
    pub guidance_scale: f32,
    pub seed: u64,
    pub whisper_path: PathBuf,
    pub device: DeviceName,
    pub precision: Precision,
    pub width: u32,
    pub height: u32,
    pub num_frames: u32,
    /// Audio feature context (frames before, frames after) fed to the whisper encoder.
    pub audio_feat_length: [u32; 2],
    pub scheduler_dir: PathBuf,
    pub mask_image_path: Option<PathBuf>,
}

fn mask_video_path(video_out_path: &Path) -> PathBuf {
    PathBuf::from(
        video_out_path
            .to_string_lossy()
            .replace(".mp4", "_mask.mp4"),
    )
}

impl InferenceRequest {
    /// Validates the configuration and resolves every input.
    ///
    /// The cross-attention check runs first, so an unsupported configuration
    /// fails before any file is touched.
    pub fn build(
        args: &InferenceArgs,
        config: &UnetConfig,
        checkpoints: &Checkpoints,
        scheduler_dir: &Path,
        device: DeviceName,
        precision: Precision,
    ) -> Result<Self> {
        let whisper = config.whisper_model()?;
        let whisper_path = checkpoints.whisper(whisper);
        info!(
            cross_attention_dim = config.model.cross_attention_dim,
            "using whisper {whisper} checkpoint {}",
            whisper_path.display()
        );

        require_file(&whisper_path, "whisper checkpoint")?;
        require_file(&args.inference_ckpt_path, "inference checkpoint")?;
        require_file(&args.video_path, "input video")?;
        require_file(&args.audio_path, "input audio")?;

        let seed = resolve_seed(args.seed)?;
        let absolute =
            |path: &Path| std::path::absolute(path).with_context(|| format!("{}", path.display()));
        let video_out_path = absolute(&args.video_out_path)?;

        Ok(Self {
            unet_config_path: absolute(&args.unet_config_path)?,
            inference_ckpt_path: absolute(&args.inference_ckpt_path)?,
            video_path: absolute(&args.video_path)?,
            audio_path: absolute(&args.audio_path)?,
            video_mask_path: mask_video_path(&video_out_path),
            video_out_path,
            inference_steps: args.inference_steps,
            guidance_scale: args.guidance_scale,
            seed,
            whisper_path: absolute(&whisper_path)?,
            device,
            precision,
            width: config.data.resolution,
            height: config.data.resolution,
            num_frames: config.data.num_frames,
            audio_feat_length: config.data.audio_feat_length,
            scheduler_dir: absolute(scheduler_dir)?,
            mask_image_path: config.data.mask_image_path.clone(),
        })
    }
}

/// Runs one denoising inference call for a request.
#[async_trait]
pub trait LipsyncBackend: Send + Sync {
    async fn run(&self, request: &InferenceRequest) -> Result<()>;
}

/// Backend that hands the request to an external process built from an
/// argument template with `{placeholder}` substitution.
#[derive(Debug, Clone)]
pub struct ExternalPipeline {
    template: Vec<String>,
    python: String,
    working_dir: Option<PathBuf>,
}

impl ExternalPipeline {
    pub fn new(template: Vec<String>, python: impl Into<String>) -> Self {
        Self {
            template,
            python: python.into(),
            working_dir: None,
        }
    }

    pub fn with_working_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_dir = Some(dir.into());
        self
    }

    fn value(&self, request: &InferenceRequest, name: &str) -> Option<String> {
        let path = |p: &Path| p.to_string_lossy().into_owned();
        Some(match name {
            "python" => self.python.clone(),
            "unet_config_path" => path(&request.unet_config_path),
            "inference_ckpt_path" => path(&request.inference_ckpt_path),
            "video_path" => path(&request.video_path),
            "audio_path" => path(&request.audio_path),
            "video_out_path" => path(&request.video_out_path),
            "video_mask_path" => path(&request.video_mask_path),
            "inference_steps" => request.inference_steps.to_string(),
            "guidance_scale" => request.guidance_scale.to_string(),
            "seed" => request.seed.to_string(),
            "whisper_path" => path(&request.whisper_path),
            "device" => request.device.to_string().to_lowercase(),
            "dtype" => request.precision.to_string(),
            "width" => request.width.to_string(),
            "height" => request.height.to_string(),
            "num_frames" => request.num_frames.to_string(),
            "audio_feat_length" => {
                let [before, after] = request.audio_feat_length;
                format!("{before},{after}")
            }
            "scheduler_dir" => path(&request.scheduler_dir),
            "mask_image_path" => request
                .mask_image_path
                .as_deref()
                .map(path)
                .unwrap_or_default(),
            _ => return None,
        })
    }

    fn substitute(&self, request: &InferenceRequest, arg: &str) -> Result<String, ConfigError> {
        let mut out = String::with_capacity(arg.len());
        let mut rest = arg;
        while let Some(start) = rest.find('{') {
            out.push_str(&rest[..start]);
            let tail = &rest[start + 1..];
            let end = tail
                .find('}')
                .ok_or_else(|| ConfigError::UnterminatedPlaceholder(arg.to_string()))?;
            let name = &tail[..end];
            let value = self
                .value(request, name)
                .ok_or_else(|| ConfigError::UnknownPlaceholder(name.to_string()))?;
            out.push_str(&value);
            rest = &tail[end + 1..];
        }
        out.push_str(rest);
        Ok(out)
    }

    /// Builds the concrete command line for `request`.
    pub fn render(&self, request: &InferenceRequest) -> Result<CommandSpec, ConfigError> {
        let mut args = self
            .template
            .iter()
            .map(|arg| self.substitute(request, arg));
        let program = args.next().ok_or(ConfigError::EmptyCommand)??;
        let mut spec = CommandSpec::new(program).args(args.collect::<Result<Vec<_>, _>>()?);
        if let Some(dir) = &self.working_dir {
            spec = spec.current_dir(dir);
        }
        // The upstream entry point picks CUDA whenever it can see a GPU.
        if request.device == DeviceName::Cpu {
            spec = spec.env("CUDA_VISIBLE_DEVICES", "");
        }
        Ok(spec)
    }
}

#[async_trait]
impl LipsyncBackend for ExternalPipeline {
    #[instrument(level = "info", skip_all, fields(seed = request.seed, dtype = %request.precision))]
    async fn run(&self, request: &InferenceRequest) -> Result<()> {
        let spec = self.render(request)?;
        info!("inference: {spec}");

        let spinner = stage_spinner("inference");
        let outcome = spec.output().await;
        spinner.finish_and_clear();
        let outcome = outcome?;

        anyhow::ensure!(
            outcome.success(),
            "inference backend failed with {}:\n{}",
            outcome.exit_label(),
            outcome.stderr_tail(40)
        );
        anyhow::ensure!(
            request.video_out_path.is_file(),
            "inference backend finished but {} was not written",
            request.video_out_path.display()
        );

        info!(
            elapsed = ?outcome.elapsed,
            "inference wrote {}",
            request.video_out_path.display()
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::ffi::OsString;

    use super::*;

    fn request() -> InferenceRequest {
        InferenceRequest {
            unet_config_path: "/w/configs/unet/second_stage.yaml".into(),
            inference_ckpt_path: "/w/checkpoints/latentsync_unet.pt".into(),
            video_path: "/in/face.mp4".into(),
            audio_path: "/in/voice.wav".into(),
            video_out_path: "/out/result.mp4".into(),
            video_mask_path: "/out/result_mask.mp4".into(),
            inference_steps: 20,
            guidance_scale: 1.5,
            seed: 1247,
            whisper_path: "/w/checkpoints/whisper/tiny.pt".into(),
            device: DeviceName::Cuda,
            precision: Precision::Fp16,
            width: 256,
            height: 256,
            num_frames: 16,
            audio_feat_length: [2, 2],
            scheduler_dir: "/w/configs".into(),
            mask_image_path: None,
        }
    }

    fn template(args: &[&str]) -> Vec<String> {
        args.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn default_template_forwards_cli_flags() {
        let backend = ExternalPipeline::new(template(DEFAULT_COMMAND), "python3");
        let spec = backend.render(&request()).unwrap();

        assert_eq!(spec.program, "python3");
        assert_eq!(
            spec.to_string(),
            "python3 -m scripts.inference \
             --unet_config_path /w/configs/unet/second_stage.yaml \
             --inference_ckpt_path /w/checkpoints/latentsync_unet.pt \
             --video_path /in/face.mp4 --audio_path /in/voice.wav \
             --video_out_path /out/result.mp4 --inference_steps 20 \
             --guidance_scale 1.5 --seed 1247"
        );
    }

    #[test]
    fn placeholders_inside_arguments() {
        let backend = ExternalPipeline::new(
            template(&["run", "--size={width}x{height}", "--dtype={dtype}", "{mask_image_path}"]),
            "python3",
        )
        .with_working_dir("/opt/latentsync");
        let spec = backend.render(&request()).unwrap();

        assert_eq!(spec.to_string(), "run --size=256x256 --dtype=float16 \"\"");
        assert_eq!(spec.current_dir.as_deref(), Some(Path::new("/opt/latentsync")));
    }

    #[test]
    fn cpu_requests_hide_gpus_from_the_backend() {
        let backend = ExternalPipeline::new(template(DEFAULT_COMMAND), "python3");
        assert!(backend.render(&request()).unwrap().envs.is_empty());

        let mut req = request();
        req.device = DeviceName::Cpu;
        req.precision = Precision::Fp32;
        let spec = backend.render(&req).unwrap();
        assert_eq!(
            spec.envs,
            [(OsString::from("CUDA_VISIBLE_DEVICES"), OsString::new())]
        );
        assert!(
            spec.to_string()
                .starts_with("CUDA_VISIBLE_DEVICES=\"\" python3 -m scripts.inference "),
            "{spec}"
        );
    }

    #[test]
    fn audio_context_and_device_render() {
        let mut req = request();
        req.audio_feat_length = [3, 1];
        let backend = ExternalPipeline::new(
            template(&["run", "--audio_feat_length={audio_feat_length}", "--device={device}"]),
            "python3",
        );
        assert_eq!(
            backend.render(&req).unwrap().to_string(),
            "run --audio_feat_length=3,1 --device=cuda"
        );
    }

    #[test]
    fn unknown_and_broken_placeholders_are_rejected() {
        let backend = ExternalPipeline::new(template(&["run", "{nope}"]), "python3");
        assert!(matches!(
            backend.render(&request()),
            Err(ConfigError::UnknownPlaceholder(name)) if name == "nope"
        ));

        let backend = ExternalPipeline::new(template(&["run", "{seed"]), "python3");
        assert!(matches!(
            backend.render(&request()),
            Err(ConfigError::UnterminatedPlaceholder(_))
        ));

        let backend = ExternalPipeline::new(Vec::new(), "python3");
        assert!(matches!(
            backend.render(&request()),
            Err(ConfigError::EmptyCommand)
        ));
    }

    #[test]
    fn seed_resolution() {
        assert_eq!(resolve_seed(1247).unwrap(), 1247);
        assert_eq!(resolve_seed(0).unwrap(), 0);
        assert!(resolve_seed(-1).unwrap() <= u64::from(u32::MAX));
        assert!(matches!(resolve_seed(-2), Err(ConfigError::InvalidSeed(-2))));
    }

    #[test]
    fn mask_path_derives_from_output() {
        assert_eq!(
            mask_video_path(Path::new("/out/video.mp4")),
            Path::new("/out/video_mask.mp4")
        );
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn external_backend_requires_output_video() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let mut req = request();
        req.video_out_path = dir.path().join("out.mp4");

        let writes = ExternalPipeline::new(
            template(&["sh", "-c", "echo frames > \"$0\"", "{video_out_path}"]),
            "python3",
        );
        writes.run(&req).await?;
        assert!(req.video_out_path.is_file());

        req.video_out_path = dir.path().join("missing.mp4");
        let silent = ExternalPipeline::new(template(&["true"]), "python3");
        assert!(silent.run(&req).await.is_err());

        let fails = ExternalPipeline::new(
            template(&["sh", "-c", "echo CUDA out of memory >&2; exit 1"]),
            "python3",
        );
        let err = fails.run(&req).await.unwrap_err();
        assert!(err.to_string().contains("CUDA out of memory"));
        Ok(())
    }
}
