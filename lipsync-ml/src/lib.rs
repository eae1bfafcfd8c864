mod loading;

pub mod checkpoints;
pub mod config;
pub mod error;
pub mod pipeline;

use lipsync_core::CommandSpec;
use serde::Serialize;
use strum::{Display, EnumString};

pub use error::ConfigError;
pub use loading::{read_json, read_yaml};

/// Name of the compute device the inference backend will run on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum DeviceName {
    Cpu,
    Cuda,
}

impl std::fmt::Display for DeviceName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DeviceName::Cpu => write!(f, "CPU"),
            DeviceName::Cuda => write!(f, "CUDA"),
        }
    }
}

/// Returns the name of the device that would be selected.
pub fn device_name(cpu: bool) -> DeviceName {
    if !cpu && cuda_is_available() {
        DeviceName::Cuda
    } else {
        DeviceName::Cpu
    }
}

pub fn cuda_is_available() -> bool {
    unsafe {
        libloading::Library::new(if cfg!(target_os = "windows") {
            "nvcuda.dll"
        } else {
            "libcuda.so.1"
        })
        .is_ok()
    }
}

/// Weight dtype handed to the backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, EnumString, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Precision {
    #[strum(serialize = "float16")]
    Fp16,
    #[strum(serialize = "float32")]
    Fp32,
}

impl Precision {
    /// Half precision needs a CUDA device of compute capability 8.x or newer.
    pub fn select(device: DeviceName, compute_capability: Option<(u32, u32)>) -> Self {
        match (device, compute_capability) {
            (DeviceName::Cuda, Some((major, _))) if major > 7 => Precision::Fp16,
            _ => Precision::Fp32,
        }
    }
}

fn parse_compute_capability(output: &str) -> Option<(u32, u32)> {
    let line = output.lines().map(str::trim).find(|line| !line.is_empty())?;
    let (major, minor) = line.split_once('.')?;
    Some((major.trim().parse().ok()?, minor.trim().parse().ok()?))
}

/// Compute capability of the first GPU, as reported by `nvidia-smi`.
pub async fn compute_capability() -> Option<(u32, u32)> {
    let outcome = CommandSpec::new("nvidia-smi")
        .args(["--query-gpu=compute_cap", "--format=csv,noheader"])
        .output()
        .await
        .ok()?;
    if !outcome.success() {
        return None;
    }
    parse_compute_capability(&outcome.stdout)
}

pub async fn precision(device: DeviceName) -> Precision {
    match device {
        DeviceName::Cpu => Precision::Fp32,
        DeviceName::Cuda => Precision::select(device, compute_capability().await),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fp16_requires_ampere_or_newer() {
        assert_eq!(
            Precision::select(DeviceName::Cuda, Some((8, 6))),
            Precision::Fp16
        );
        assert_eq!(
            Precision::select(DeviceName::Cuda, Some((7, 5))),
            Precision::Fp32
        );
        assert_eq!(Precision::select(DeviceName::Cuda, None), Precision::Fp32);
        assert_eq!(
            Precision::select(DeviceName::Cpu, Some((9, 0))),
            Precision::Fp32
        );
    }

    #[test]
    fn parses_nvidia_smi_output() {
        assert_eq!(parse_compute_capability("8.9\n8.9\n"), Some((8, 9)));
        assert_eq!(parse_compute_capability("\n 7.5 \n"), Some((7, 5)));
        assert_eq!(parse_compute_capability("N/A"), None);
        assert_eq!(parse_compute_capability(""), None);
    }

    #[test]
    fn precision_names_match_torch_dtypes() {
        assert_eq!(Precision::Fp16.to_string(), "float16");
        assert_eq!("float32".parse::<Precision>().ok(), Some(Precision::Fp32));
    }

    #[test]
    fn forced_cpu_device() {
        assert_eq!(device_name(true), DeviceName::Cpu);
    }
}
