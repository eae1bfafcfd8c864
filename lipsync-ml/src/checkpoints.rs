use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use strum::IntoEnumIterator;
use tracing::info;

use crate::{ConfigError, config::WhisperModel};

pub const UNET_CHECKPOINT: &str = "latentsync_unet.pt";

macro_rules! define_models {
    ($($variant:ident => ($repo:literal, $filename:literal $(, $install:literal)?)),* $(,)?) => {
        #[derive(Debug, Clone, Copy, strum::EnumIter, strum::EnumProperty)]
        pub enum Manifest {
            $(
                #[strum(props(repo = $repo, filename = $filename $(, install = $install)?))]
                $variant,
            )*
        }

        impl Manifest {
            pub fn repo(&self) -> &'static str {
                use strum::EnumProperty;
                self.get_str("repo").expect("repo property")
            }

            pub fn filename(&self) -> &'static str {
                use strum::EnumProperty;
                self.get_str("filename").expect("filename property")
            }

            /// Where the file goes under the checkpoints root. `None` leaves it
            /// in the shared hub cache only.
            pub fn install_path(&self) -> Option<&'static str> {
                use strum::EnumProperty;
                self.get_str("install")
            }

            pub async fn get(&self) -> anyhow::Result<PathBuf> {
                lipsync_core::hf_hub::download(self.repo(), self.filename()).await
            }
        }
    };
}

define_models! {
    Unet => ("ByteDance/LatentSync-1.5", "latentsync_unet.pt", "latentsync_unet.pt"),
    WhisperTiny => ("ByteDance/LatentSync-1.5", "whisper/tiny.pt", "whisper/tiny.pt"),
    VaeConfig => ("stabilityai/sd-vae-ft-mse", "config.json"),
    VaeWeights => ("stabilityai/sd-vae-ft-mse", "diffusion_pytorch_model.safetensors"),
}

/// Local checkpoint directory layout.
#[derive(Debug, Clone)]
pub struct Checkpoints {
    root: PathBuf,
}

impl Checkpoints {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn whisper(&self, model: WhisperModel) -> PathBuf {
        self.root.join(model.relative_path())
    }

    pub fn unet(&self) -> PathBuf {
        self.root.join(UNET_CHECKPOINT)
    }
}

/// Fails with [`ConfigError::MissingFile`] unless `path` is an existing file.
pub fn require_file(path: &Path, what: &'static str) -> Result<(), ConfigError> {
    if path.is_file() {
        Ok(())
    } else {
        Err(ConfigError::MissingFile {
            what,
            path: path.to_path_buf(),
        })
    }
}

/// Downloads every manifest entry and installs checkpoints under the root.
pub async fn prefetch(checkpoints: &Checkpoints) -> Result<()> {
    for model in Manifest::iter() {
        let cached = model
            .get()
            .await
            .with_context(|| format!("failed to fetch {}/{}", model.repo(), model.filename()))?;

        let Some(install) = model.install_path() else {
            info!("{model:?}: cached at {}", cached.display());
            continue;
        };

        let target = checkpoints.root().join(install);
        if target.is_file() {
            info!("{model:?}: {} is up-to-date", target.display());
            continue;
        }
        if let Some(parent) = target.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::copy(&cached, &target)
            .await
            .with_context(|| format!("failed to install {}", target.display()))?;
        info!("{model:?}: installed {}", target.display());
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn manifest_installs_checkpoints_under_root() {
        assert_eq!(Manifest::Unet.install_path(), Some(UNET_CHECKPOINT));
        assert_eq!(
            Manifest::WhisperTiny.install_path().map(Path::new),
            Some(WhisperModel::Tiny.relative_path().as_path())
        );
        assert_eq!(Manifest::VaeWeights.install_path(), None);
        assert_eq!(Manifest::VaeConfig.repo(), "stabilityai/sd-vae-ft-mse");
    }

    #[test]
    fn whisper_path_is_under_root() {
        let checkpoints = Checkpoints::new("checkpoints");
        assert_eq!(
            checkpoints.whisper(WhisperModel::Small),
            Path::new("checkpoints/whisper/small.pt")
        );
        assert_eq!(
            checkpoints.unet(),
            Path::new("checkpoints/latentsync_unet.pt")
        );
    }

    #[test]
    fn require_file_reports_missing_path() {
        let err = require_file(Path::new("does/not/exist.pt"), "whisper checkpoint").unwrap_err();
        assert_eq!(
            err.to_string(),
            "whisper checkpoint not found at does/not/exist.pt"
        );
    }
}
