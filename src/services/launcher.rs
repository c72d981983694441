use crate::config::config::{AttentionMode, Config, ServerConfig};
use crate::repositories::docker_repository::{DockerRepository, ImageError, InitializationError};
use crate::repositories::gpu_repository::{DetectionError, GpuRepository};
use crate::services::gpu_profile::{HardwareReport, select_attention, select_profile};
use crate::state::RuntimeSettings;
use bollard::errors::Error as DockerError;
use bollard::models::ContainerStateStatusEnum;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{info, warn};

#[derive(Debug, Error)]
pub enum LaunchError {
    #[error("{0}")]
    Detection(#[from] DetectionError),
    #[error("{0}")]
    Initialization(#[from] InitializationError),
    #[error("{0}")]
    Image(#[from] ImageError),
    #[error("Error from Docker: {0}")]
    Docker(#[from] DockerError),
    #[error("Unable to prepare cache directory {0}: {1}")]
    CacheDir(PathBuf, std::io::Error),
}

/// Probes the GPUs and derives profile, attention backend and wheel flavour.
pub async fn diagnose(
    gpu_repository: &GpuRepository,
    attention_mode: AttentionMode,
    profile: Option<u8>,
    sage_available: bool,
) -> Result<HardwareReport, DetectionError> {
    let gpus = gpu_repository.detect_gpus().await?;
    let ram_mb = gpu_repository.total_ram_mb();
    let report = HardwareReport::build(&gpus, ram_mb, attention_mode, profile, sage_available);
    log_report(&report);
    Ok(report)
}

/// Picks the settings the server runs with. When detection failed, the
/// configured profile is used or one chosen without VRAM, and `auto`
/// attention resolves without the optional kernels.
pub fn runtime_settings(
    detected: Result<HardwareReport, DetectionError>,
    server: &ServerConfig,
    ram_mb: u64,
) -> RuntimeSettings {
    match detected {
        Ok(report) => RuntimeSettings {
            profile: report.profile,
            attention: report.attention,
        },
        Err(err) => {
            warn!("Hardware detection failed: {}", err);
            RuntimeSettings {
                profile: server.profile.unwrap_or_else(|| select_profile(0, ram_mb)),
                attention: select_attention(server.attention_mode, None, false),
            }
        }
    }
}

pub fn log_report(report: &HardwareReport) {
    for gpu in &report.gpus {
        info!("GPU: {} ({} MB VRAM)", gpu.name, gpu.vram_mb);
    }
    match report.compute_capability {
        Some(cc) => info!("Compute capability: {}", cc),
        None => warn!("Unknown GPU model, using the default wheel and attention backend"),
    }
    info!(
        "RAM: {} MB, profile {}, attention {}, torch wheel {}",
        report.ram_mb, report.profile, report.attention, report.torch_wheel
    );
}

/// Creates every host cache directory and returns their absolute paths
/// paired with the container mount points.
pub fn prepare_cache_dirs(config: &Config) -> Result<Vec<(PathBuf, String)>, LaunchError> {
    config
        .docker
        .cache_mounts()
        .iter()
        .map(|mount| {
            let host = absolute_dir(&mount.host)
                .map_err(|err| LaunchError::CacheDir(mount.host.clone(), err))?;
            Ok((host, mount.container.clone()))
        })
        .collect()
}

fn absolute_dir(path: &Path) -> std::io::Result<PathBuf> {
    std::fs::create_dir_all(path)?;
    std::fs::canonicalize(path)
}

/// Runs the application image with every GPU attached. An already running
/// container is left alone; a stopped one is replaced.
pub async fn launch(config: &Config) -> Result<(), LaunchError> {
    let mounts = prepare_cache_dirs(config)?;

    // The image ships the optional attention kernels.
    let report = diagnose(
        &GpuRepository::new(),
        config.server.attention_mode,
        config.server.profile,
        true,
    )
    .await?;

    let docker = DockerRepository::new(config.docker.clone())?;
    docker.ensure_image().await?;

    match docker.container_state().await? {
        Some(ContainerStateStatusEnum::RUNNING) => {
            info!(
                "Container {} is already running",
                config.docker.container_name()
            );
            return Ok(());
        }
        Some(_) => docker.remove_container().await?,
        None => {}
    }

    docker.create_container(&report, mounts).await?;
    docker.start_container().await?;
    info!(
        "Application available on http://localhost:{}",
        config.docker.port()
    );
    Ok(())
}
