use std::path::Path;

use anyhow::Result;
use lipsync_core::CommandSpec;
use tracing::info;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Checkout {
    Present,
    Cloned,
}

/// Shallow-clones `url` into `dir` unless `dir/marker` already exists.
pub async fn clone_if_missing(url: &str, dir: &Path, marker: &str) -> Result<Checkout> {
    if dir.join(marker).is_file() {
        return Ok(Checkout::Present);
    }

    anyhow::ensure!(
        !dir.exists() || dir.read_dir()?.next().is_none(),
        "{} exists but has no {marker}; remove it or point the settings elsewhere",
        dir.display()
    );

    let spec = CommandSpec::new("git")
        .args(["clone", "--depth", "1", url])
        .arg(dir);
    info!("cloning {url}: {spec}");
    spec.run_checked().await?;

    anyhow::ensure!(
        dir.join(marker).is_file(),
        "cloned {url} but {marker} is missing"
    );
    Ok(Checkout::Cloned)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn existing_checkout_is_left_alone() -> Result<()> {
        let dir = tempfile::tempdir()?;
        std::fs::write(dir.path().join("inference_codeformer.py"), "")?;

        let status = clone_if_missing(
            "https://invalid.example/repo",
            dir.path(),
            "inference_codeformer.py",
        )
        .await?;
        assert_eq!(status, Checkout::Present);
        Ok(())
    }

    #[tokio::test]
    async fn unrelated_directory_is_not_overwritten() -> Result<()> {
        let dir = tempfile::tempdir()?;
        std::fs::write(dir.path().join("notes.txt"), "keep me")?;

        let result = clone_if_missing(
            "https://invalid.example/repo",
            dir.path(),
            "inference_codeformer.py",
        )
        .await;
        assert!(result.is_err());
        assert!(dir.path().join("notes.txt").is_file());
        Ok(())
    }
}
