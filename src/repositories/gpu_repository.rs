use sysinfo::System;
use thiserror::Error;
use tokio::process::Command;
use tracing::{debug, error};

#[derive(Debug, Clone, PartialEq)]
pub struct GpuDevice {
    pub name: String,
    pub vram_mb: u64,
}

#[derive(Debug, Error)]
pub enum DetectionError {
    #[error("Unable to run nvidia-smi, is the NVIDIA driver installed? ({0})")]
    ToolMissing(#[from] std::io::Error),
    #[error("nvidia-smi exited with {0}")]
    ToolFailed(std::process::ExitStatus),
    #[error("No NVIDIA GPU detected")]
    NoGpu,
}

pub struct GpuRepository;

impl GpuRepository {
    pub fn new() -> GpuRepository {
        Self
    }

    /// Lists the NVIDIA GPUs reported by `nvidia-smi`, in device order.
    pub async fn detect_gpus(&self) -> Result<Vec<GpuDevice>, DetectionError> {
        let output = Command::new("nvidia-smi")
            .arg("--query-gpu=name,memory.total")
            .arg("--format=csv,noheader,nounits")
            .output()
            .await?;

        if !output.status.success() {
            error!("nvidia-smi returned a non-zero exit code");
            return Err(DetectionError::ToolFailed(output.status));
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        debug!("nvidia-smi output: {}", stdout.trim());
        let gpus = parse_nvidia_smi(&stdout);
        if gpus.is_empty() {
            return Err(DetectionError::NoGpu);
        }
        Ok(gpus)
    }

    /// SageAttention is optional: any failure to import it means the
    /// default backend is used instead.
    pub async fn sage_attention_installed(&self, python: &str) -> bool {
        match Command::new(python)
            .arg("-c")
            .arg("import sageattention")
            .output()
            .await
        {
            Ok(output) => output.status.success(),
            Err(err) => {
                debug!("Unable to probe sageattention with {}: {}", python, err);
                false
            }
        }
    }

    pub fn total_ram_mb(&self) -> u64 {
        let mut sys = System::new();
        sys.refresh_memory();
        sys.total_memory() / (1024 * 1024)
    }
}

/// Parses `name, memory.total` CSV lines. Unparseable memory counts as 0.
fn parse_nvidia_smi(text: &str) -> Vec<GpuDevice> {
    text.lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .filter_map(|line| {
            let (name, memory) = line.rsplit_once(',')?;
            let name = name.trim();
            if name.is_empty() {
                return None;
            }
            Some(GpuDevice {
                name: name.to_string(),
                vram_mb: memory.trim().parse::<u64>().unwrap_or(0),
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_multiple_gpus() {
        let text = "NVIDIA GeForce RTX 4090, 24564\nNVIDIA GeForce RTX 3060, 12288\n\n";
        let gpus = parse_nvidia_smi(text);
        assert_eq!(gpus.len(), 2);
        assert_eq!(gpus[0].name, "NVIDIA GeForce RTX 4090");
        assert_eq!(gpus[0].vram_mb, 24564);
        assert_eq!(gpus[1].vram_mb, 12288);
    }

    #[test]
    fn tolerates_missing_memory() {
        let gpus = parse_nvidia_smi("Tesla T4, [N/A]\ngarbage line\n");
        assert_eq!(
            gpus,
            vec![GpuDevice {
                name: "Tesla T4".to_string(),
                vram_mb: 0
            }]
        );
    }
}
