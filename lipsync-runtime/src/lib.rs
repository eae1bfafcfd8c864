pub mod git;
pub mod pypi;
pub mod python;

use std::path::PathBuf;

use anyhow::{Context, Result};
use lipsync_core::ensure_in_path;
use serde::Serialize;
use tracing::{info, warn};

use crate::{git::Checkout, python::Python};

/// Script every usable CodeFormer checkout contains.
pub const CODEFORMER_MARKER: &str = "inference_codeformer.py";
/// Written into the CodeFormer checkout after its requirements are installed.
pub const REQUIREMENTS_STAMP: &str = ".requirements-installed";

/// External tools the post-processing chain depends on.
#[derive(Debug, Clone)]
pub struct RuntimeConfig {
    pub python: String,
    pub ffmpeg: String,
    pub gfpgan_package: String,
    pub gfpgan_module: String,
    pub codeformer_repository: String,
    pub codeformer_dir: PathBuf,
    /// Probe PyPI mirrors and install from the fastest one.
    pub use_mirror: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase", tag = "status", content = "reason")]
pub enum DependencyStatus {
    Present,
    Installed,
    Failed(String),
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BootstrapReport {
    pub gfpgan: DependencyStatus,
    pub codeformer: DependencyStatus,
    pub ffmpeg: DependencyStatus,
}

impl BootstrapReport {
    pub fn all_ok(&self) -> bool {
        [&self.gfpgan, &self.codeformer, &self.ffmpeg]
            .iter()
            .all(|status| !matches!(status, DependencyStatus::Failed(_)))
    }
}

fn settle(name: &str, result: Result<DependencyStatus>) -> DependencyStatus {
    match result {
        Ok(status) => {
            info!("{name}: {status:?}");
            status
        }
        Err(err) => {
            warn!("{name}: bootstrap failed: {err:#}");
            DependencyStatus::Failed(format!("{err:#}"))
        }
    }
}

async fn index_url(config: &RuntimeConfig) -> Option<String> {
    if config.use_mirror {
        Some(pypi::fastest_endpoint().await.index_url())
    } else {
        None
    }
}

async fn ensure_gfpgan(python: &Python, config: &RuntimeConfig) -> Result<DependencyStatus> {
    if python.module_available(&config.gfpgan_module).await {
        return Ok(DependencyStatus::Present);
    }

    let index = index_url(config).await;
    python
        .pip_install(&[config.gfpgan_package.as_str()], index.as_deref())
        .await?;
    anyhow::ensure!(
        python.module_available(&config.gfpgan_module).await,
        "installed {} but `import {}` still fails",
        config.gfpgan_package,
        config.gfpgan_module
    );
    Ok(DependencyStatus::Installed)
}

async fn ensure_codeformer(python: &Python, config: &RuntimeConfig) -> Result<DependencyStatus> {
    let checkout = git::clone_if_missing(
        &config.codeformer_repository,
        &config.codeformer_dir,
        CODEFORMER_MARKER,
    )
    .await?;

    // A checkout counts as installed once its requirements went in without error.
    let requirements = config.codeformer_dir.join("requirements.txt");
    let stamp = config.codeformer_dir.join(REQUIREMENTS_STAMP);
    let pending = requirements.is_file() && !stamp.is_file();
    if checkout == Checkout::Present && !pending {
        return Ok(DependencyStatus::Present);
    }

    if pending {
        let index = index_url(config).await;
        python
            .pip_install_requirements(&requirements, index.as_deref())
            .await?;
        tokio::fs::write(&stamp, b"")
            .await
            .with_context(|| format!("failed to write {}", stamp.display()))?;
    }
    Ok(DependencyStatus::Installed)
}

/// Makes sure GFPGAN, a CodeFormer checkout and `ffmpeg` are available,
/// installing the first two on demand.
///
/// Failures are logged and reported, never returned: a missing tool shows up
/// again as a failing post-processing stage.
pub async fn ensure_dependencies(config: &RuntimeConfig) -> BootstrapReport {
    let python = Python::new(&config.python);

    let gfpgan = settle("gfpgan", ensure_gfpgan(&python, config).await);
    let codeformer = settle("codeformer", ensure_codeformer(&python, config).await);
    let ffmpeg = settle(
        "ffmpeg",
        ensure_in_path(&config.ffmpeg).map(|path| {
            info!("ffmpeg: using {}", path.display());
            DependencyStatus::Present
        }),
    );

    BootstrapReport {
        gfpgan,
        codeformer,
        ffmpeg,
    }
}
