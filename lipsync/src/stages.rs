use std::path::{Path, PathBuf};

use lipsync_core::CommandSpec;
use serde::Serialize;
use strum::Display;

use crate::{settings::Settings, workspace::WorkDir};

/// One external invocation of the post-processing chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Display)]
#[serde(rename_all = "camelCase")]
#[strum(serialize_all = "snake_case")]
pub enum Stage {
    Extract,
    Enhance,
    Refine,
    Encode,
}

impl Stage {
    pub const ALL: &[Stage] = &[Stage::Extract, Stage::Enhance, Stage::Refine, Stage::Encode];

    pub fn description(self) -> &'static str {
        match self {
            Stage::Extract => "frame extraction",
            Stage::Enhance => "GFPGAN enhancement",
            Stage::Refine => "CodeFormer refinement",
            Stage::Encode => "video re-encoding",
        }
    }

    /// Frames the stage consumes, when it reads a frame directory.
    pub fn input_dir(self, work: &WorkDir) -> Option<PathBuf> {
        match self {
            Stage::Extract => None,
            Stage::Enhance => Some(work.temp_frames()),
            Stage::Refine => Some(work.restored_frames()),
            Stage::Encode => Some(work.refined_frames()),
        }
    }

    /// Frames the stage produces, when it writes a frame directory.
    pub fn output_dir(self, work: &WorkDir) -> Option<PathBuf> {
        match self {
            Stage::Extract => Some(work.temp_frames()),
            Stage::Enhance => Some(work.restored_frames()),
            Stage::Refine => Some(work.refined_frames()),
            Stage::Encode => None,
        }
    }

    pub fn command(self, ctx: &StageContext<'_>) -> CommandSpec {
        let StageContext {
            settings,
            work,
            video_path,
            audio_path,
            codeformer_dir,
        } = ctx;

        match self {
            Stage::Extract => CommandSpec::new(&settings.tools.ffmpeg)
                .arg("-y")
                .arg("-i")
                .arg(*video_path)
                .arg(work.temp_frames().join(&settings.encode.frame_pattern)),
            Stage::Enhance => CommandSpec::new(&settings.tools.python)
                .args(&settings.gfpgan.entry)
                .arg("-i")
                .arg(work.temp_frames())
                .arg("-o")
                .arg(work.enhanced_frames())
                .args(["-v", settings.gfpgan.version.as_str()])
                .args(["-s".to_string(), settings.gfpgan.upscale.to_string()]),
            Stage::Refine => CommandSpec::new(&settings.tools.python)
                .arg(codeformer_dir.join(&settings.codeformer.script))
                .args(["-w".to_string(), settings.codeformer.fidelity.to_string()])
                .arg("--input_path")
                .arg(work.restored_frames())
                .arg("--output_path")
                .arg(work.final_frames())
                .current_dir(codeformer_dir),
            Stage::Encode => CommandSpec::new(&settings.tools.ffmpeg)
                .arg("-y")
                .args([
                    "-framerate".to_string(),
                    settings.encode.frame_rate.to_string(),
                ])
                .arg("-i")
                .arg(work.refined_frames().join(&settings.encode.frame_pattern))
                .arg("-i")
                .arg(*audio_path)
                .args(["-c:v", settings.encode.codec.as_str()])
                .args(["-pix_fmt", settings.encode.pixel_format.as_str()])
                .args(["-c:a", settings.encode.audio_codec.as_str()])
                .arg("-shortest")
                .arg(work.final_video()),
        }
    }
}

/// Everything the stage commands are built from.
#[derive(Debug, Clone)]
pub struct StageContext<'a> {
    pub settings: &'a Settings,
    pub work: &'a WorkDir,
    /// Video written by the inference backend.
    pub video_path: &'a Path,
    pub audio_path: &'a Path,
    /// Absolute path of the CodeFormer checkout.
    pub codeformer_dir: PathBuf,
}
