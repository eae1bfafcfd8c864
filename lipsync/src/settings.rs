use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use lipsync_ml::pipeline::DEFAULT_COMMAND;
use serde::{Deserialize, Serialize};
use strum::Display;

/// Settings file picked up from the working directory when `--settings` is absent.
pub const DEFAULT_SETTINGS_FILE: &str = "lipsync.toml";

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Settings {
    pub inference: InferenceSettings,
    pub tools: ToolSettings,
    pub bootstrap: BootstrapSettings,
    pub gfpgan: GfpganSettings,
    pub codeformer: CodeFormerSettings,
    pub encode: EncodeSettings,
    pub pipeline: PipelineSettings,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct InferenceSettings {
    /// Backend argument template; see `lipsync_ml::pipeline::ExternalPipeline`.
    pub command: Vec<String>,
    pub working_dir: Option<PathBuf>,
    pub checkpoints_dir: PathBuf,
    pub scheduler_dir: PathBuf,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ToolSettings {
    pub python: String,
    pub ffmpeg: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct BootstrapSettings {
    pub use_mirror: bool,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct GfpganSettings {
    pub package: String,
    pub module: String,
    /// Interpreter arguments that start the GFPGAN inference script.
    pub entry: Vec<String>,
    pub version: String,
    pub upscale: u32,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CodeFormerSettings {
    pub repository: String,
    pub dir: PathBuf,
    pub script: String,
    /// 0 favours quality, 1 favours fidelity to the input face.
    pub fidelity: f32,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct EncodeSettings {
    pub frame_rate: u32,
    pub codec: String,
    pub pixel_format: String,
    pub audio_codec: String,
    pub frame_pattern: String,
    pub output: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PipelineSettings {
    pub failure_policy: FailurePolicy,
}

/// What the post-processing chain does after a stage fails.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize, Display)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum FailurePolicy {
    /// Report the failure and run the remaining stages anyway.
    #[default]
    Continue,
    /// Skip every remaining stage.
    Abort,
}

impl Default for InferenceSettings {
    fn default() -> Self {
        Self {
            command: DEFAULT_COMMAND.iter().map(|s| s.to_string()).collect(),
            working_dir: None,
            checkpoints_dir: PathBuf::from("checkpoints"),
            scheduler_dir: PathBuf::from("configs"),
        }
    }
}

impl Default for ToolSettings {
    fn default() -> Self {
        Self {
            python: "python3".to_string(),
            ffmpeg: "ffmpeg".to_string(),
        }
    }
}

impl Default for GfpganSettings {
    fn default() -> Self {
        Self {
            package: "gfpgan".to_string(),
            module: "gfpgan".to_string(),
            entry: vec!["-m".to_string(), "gfpgan.inference_gfpgan".to_string()],
            version: "1.4".to_string(),
            upscale: 1,
        }
    }
}

impl Default for CodeFormerSettings {
    fn default() -> Self {
        Self {
            repository: "https://github.com/sczhou/CodeFormer".to_string(),
            dir: PathBuf::from("CodeFormer"),
            script: lipsync_runtime::CODEFORMER_MARKER.to_string(),
            fidelity: 0.7,
        }
    }
}

impl Default for EncodeSettings {
    fn default() -> Self {
        Self {
            frame_rate: 25,
            codec: "libx264".to_string(),
            pixel_format: "yuv420p".to_string(),
            audio_codec: "aac".to_string(),
            frame_pattern: "frame_%04d.png".to_string(),
            output: "final_video.mp4".to_string(),
        }
    }
}

impl Settings {
    pub fn from_toml(text: &str) -> Result<Self> {
        Ok(toml::from_str(text)?)
    }

    /// Reads `path`, or `lipsync.toml` when present, or falls back to defaults.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let path = match path {
            Some(path) => path.to_path_buf(),
            None if Path::new(DEFAULT_SETTINGS_FILE).is_file() => {
                PathBuf::from(DEFAULT_SETTINGS_FILE)
            }
            None => return Ok(Self::default()),
        };

        let text = std::fs::read_to_string(&path)
            .with_context(|| format!("failed to read {}", path.display()))?;
        Self::from_toml(&text).with_context(|| format!("failed to parse {}", path.display()))
    }

    pub fn runtime_config(&self) -> lipsync_runtime::RuntimeConfig {
        lipsync_runtime::RuntimeConfig {
            python: self.tools.python.clone(),
            ffmpeg: self.tools.ffmpeg.clone(),
            gfpgan_package: self.gfpgan.package.clone(),
            gfpgan_module: self.gfpgan.module.clone(),
            codeformer_repository: self.codeformer.repository.clone(),
            codeformer_dir: self.codeformer.dir.clone(),
            use_mirror: self.bootstrap.use_mirror,
        }
    }
}
