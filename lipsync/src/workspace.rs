use std::{
    fs,
    path::{Path, PathBuf},
};

use anyhow::{Context, Result};
use rayon::iter::{IntoParallelRefIterator, ParallelIterator};

pub const TEMP_FRAMES: &str = "temp_frames";
pub const ENHANCED_FRAMES: &str = "enhanced_frames";
pub const FINAL_FRAMES: &str = "final_frames";
/// Where GFPGAN puts restored frames inside its output directory.
pub const GFPGAN_RESTORED: &str = "restored_imgs";
/// Where CodeFormer puts results inside its output directory.
pub const CODEFORMER_RESULTS: &str = "final_results";

/// Directories used to hand frames from one external tool to the next.
#[derive(Debug, Clone)]
pub struct WorkDir {
    root: PathBuf,
    output: String,
}

impl WorkDir {
    /// `root` is made absolute because some tools run from their own checkout.
    pub fn new(root: impl AsRef<Path>, output: impl Into<String>) -> Result<Self> {
        let root = root.as_ref();
        Ok(Self {
            root: std::path::absolute(root)
                .with_context(|| format!("invalid work dir {}", root.display()))?,
            output: output.into(),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn temp_frames(&self) -> PathBuf {
        self.root.join(TEMP_FRAMES)
    }

    pub fn enhanced_frames(&self) -> PathBuf {
        self.root.join(ENHANCED_FRAMES)
    }

    pub fn restored_frames(&self) -> PathBuf {
        self.enhanced_frames().join(GFPGAN_RESTORED)
    }

    pub fn final_frames(&self) -> PathBuf {
        self.root.join(FINAL_FRAMES)
    }

    pub fn refined_frames(&self) -> PathBuf {
        self.final_frames().join(CODEFORMER_RESULTS)
    }

    pub fn final_video(&self) -> PathBuf {
        self.root.join(&self.output)
    }

    /// Creates the hand-off directories. Safe to call on an existing tree.
    pub fn prepare(&self) -> Result<()> {
        for dir in [self.temp_frames(), self.enhanced_frames(), self.final_frames()] {
            fs::create_dir_all(&dir)
                .with_context(|| format!("failed to create {}", dir.display()))?;
        }
        Ok(())
    }

    /// Empties the hand-off directories so no stage can pick up frames left
    /// behind by an earlier run.
    pub fn clear_frames(&self) -> Result<()> {
        for dir in [self.temp_frames(), self.enhanced_frames(), self.final_frames()] {
            if dir.exists() {
                fs::remove_dir_all(&dir)
                    .with_context(|| format!("failed to clear {}", dir.display()))?;
            }
        }
        self.prepare()
    }
}

/// PNG frames in `dir`, in natural order. A missing directory has no frames.
pub fn frames(dir: &Path) -> Result<Vec<PathBuf>> {
    if !dir.is_dir() {
        return Ok(Vec::new());
    }

    let mut frames: Vec<PathBuf> = fs::read_dir(dir)
        .with_context(|| format!("failed to list {}", dir.display()))?
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|path| {
            path.is_file()
                && path
                    .extension()
                    .is_some_and(|ext| ext.eq_ignore_ascii_case("png"))
        })
        .collect();

    frames.sort_by(|a, b| natord::compare(&a.to_string_lossy(), &b.to_string_lossy()));
    Ok(frames)
}

/// Frames whose image header cannot be decoded.
pub fn verify_frames(frames: &[PathBuf]) -> Vec<PathBuf> {
    let mut broken: Vec<PathBuf> = frames
        .par_iter()
        .filter(|path| image::image_dimensions(path).is_err())
        .cloned()
        .collect();
    broken.sort_by(|a, b| natord::compare(&a.to_string_lossy(), &b.to_string_lossy()));
    broken
}
