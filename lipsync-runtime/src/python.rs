use std::path::Path;

use anyhow::Result;
use lipsync_core::CommandSpec;
use tracing::info;

/// A Python interpreter used to probe and install packages.
#[derive(Debug, Clone)]
pub struct Python {
    program: String,
}

impl Python {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
        }
    }

    /// `true` when `import <module>` succeeds. A missing interpreter counts as
    /// the module being absent.
    pub async fn module_available(&self, module: &str) -> bool {
        CommandSpec::new(&self.program)
            .arg("-c")
            .arg(format!("import {module}"))
            .output()
            .await
            .map(|outcome| outcome.success())
            .unwrap_or(false)
    }

    pub fn pip_install_command(&self, packages: &[&str], index_url: Option<&str>) -> CommandSpec {
        let mut spec = CommandSpec::new(&self.program).args(["-m", "pip", "install"]);
        if let Some(url) = index_url {
            spec = spec.args(["--index-url", url]);
        }
        spec.args(packages.iter().copied())
    }

    pub async fn pip_install(&self, packages: &[&str], index_url: Option<&str>) -> Result<()> {
        let spec = self.pip_install_command(packages, index_url);
        info!("installing {}: {spec}", packages.join(", "));
        spec.run_checked().await?;
        Ok(())
    }

    pub async fn pip_install_requirements(
        &self,
        requirements: &Path,
        index_url: Option<&str>,
    ) -> Result<()> {
        let mut spec = CommandSpec::new(&self.program).args(["-m", "pip", "install"]);
        if let Some(url) = index_url {
            spec = spec.args(["--index-url", url]);
        }
        let spec = spec.arg("-r").arg(requirements);
        info!("installing requirements: {spec}");
        spec.run_checked().await?;
        Ok(())
    }
}
