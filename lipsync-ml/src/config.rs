use std::path::{Path, PathBuf};

use anyhow::Result;
use serde::Deserialize;
use strum::Display;

use crate::{ConfigError, read_json, read_yaml};

pub const SCHEDULER_CONFIG_FILE: &str = "scheduler_config.json";

/// The parts of the U-Net training/inference YAML the driver needs.
/// The file is shared with training, so everything else is ignored.
#[derive(Debug, Clone, Deserialize)]
pub struct UnetConfig {
    #[serde(default)]
    pub data: DataConfig,
    pub model: ModelConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DataConfig {
    #[serde(default = "default_resolution")]
    pub resolution: u32,
    #[serde(default = "default_num_frames")]
    pub num_frames: u32,
    #[serde(default = "default_audio_feat_length")]
    pub audio_feat_length: [u32; 2],
    #[serde(default)]
    pub mask_image_path: Option<PathBuf>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ModelConfig {
    pub cross_attention_dim: u32,
}

fn default_resolution() -> u32 {
    256
}

fn default_num_frames() -> u32 {
    16
}

fn default_audio_feat_length() -> [u32; 2] {
    [2, 2]
}

impl Default for DataConfig {
    fn default() -> Self {
        Self {
            resolution: default_resolution(),
            num_frames: default_num_frames(),
            audio_feat_length: default_audio_feat_length(),
            mask_image_path: None,
        }
    }
}

/// Whisper audio encoder variant, tied to the U-Net's cross-attention width.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
#[strum(serialize_all = "lowercase")]
pub enum WhisperModel {
    Tiny,
    Small,
}

impl WhisperModel {
    pub fn from_cross_attention_dim(dim: u32) -> Result<Self, ConfigError> {
        match dim {
            768 => Ok(WhisperModel::Small),
            384 => Ok(WhisperModel::Tiny),
            other => Err(ConfigError::UnsupportedCrossAttentionDim(other)),
        }
    }

    pub fn cross_attention_dim(self) -> u32 {
        match self {
            WhisperModel::Tiny => 384,
            WhisperModel::Small => 768,
        }
    }

    /// Checkpoint location relative to the checkpoints root.
    pub fn relative_path(self) -> PathBuf {
        Path::new("whisper").join(format!("{self}.pt"))
    }
}

impl UnetConfig {
    pub fn load(path: &Path) -> Result<Self> {
        read_yaml(path)
    }

    pub fn whisper_model(&self) -> Result<WhisperModel, ConfigError> {
        WhisperModel::from_cross_attention_dim(self.model.cross_attention_dim)
    }
}

/// Pretrained DDIM scheduler settings, read for validation and logging only.
#[derive(Debug, Clone, Deserialize)]
pub struct SchedulerConfig {
    #[serde(rename = "_class_name", default)]
    pub class_name: Option<String>,
    #[serde(default)]
    pub num_train_timesteps: Option<u32>,
    #[serde(default)]
    pub beta_schedule: Option<String>,
}

impl SchedulerConfig {
    pub fn load(dir: &Path) -> Result<Self> {
        let path = dir.join(SCHEDULER_CONFIG_FILE);
        if !path.is_file() {
            return Err(ConfigError::MissingFile {
                what: "scheduler config",
                path,
            }
            .into());
        }

        let config: SchedulerConfig = read_json(&path)?;
        if let Some(name) = &config.class_name
            && name != "DDIMScheduler"
        {
            return Err(ConfigError::UnexpectedScheduler(name.clone()).into());
        }
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn whisper_follows_cross_attention_dim() {
        assert_eq!(
            WhisperModel::from_cross_attention_dim(768).ok(),
            Some(WhisperModel::Small)
        );
        assert_eq!(
            WhisperModel::from_cross_attention_dim(384).ok(),
            Some(WhisperModel::Tiny)
        );
        assert_eq!(
            WhisperModel::Small.relative_path(),
            Path::new("whisper/small.pt")
        );
        assert_eq!(
            WhisperModel::Tiny.relative_path(),
            Path::new("whisper/tiny.pt")
        );
    }

    #[test]
    fn other_dims_are_rejected() {
        for dim in [0, 256, 512, 1024] {
            let err = WhisperModel::from_cross_attention_dim(dim).unwrap_err();
            assert!(matches!(err, ConfigError::UnsupportedCrossAttentionDim(d) if d == dim));
        }
    }

    #[test]
    fn data_section_defaults() {
        let config: UnetConfig =
            serde_yaml::from_str("model:\n  cross_attention_dim: 384\n").unwrap();
        assert_eq!(config.data.resolution, 256);
        assert_eq!(config.data.num_frames, 16);
        assert_eq!(config.data.audio_feat_length, [2, 2]);
        assert!(config.data.mask_image_path.is_none());
    }

    #[test]
    fn model_dim_is_required() {
        let parsed: std::result::Result<UnetConfig, _> =
            serde_yaml::from_str("data:\n  resolution: 512\nmodel:\n  in_channels: 13\n");
        assert!(parsed.is_err());
    }
}
