use crate::config::config::{Config, InstallConfig};
use crate::repositories::gpu_repository::{DetectionError, GpuRepository};
use crate::services::gpu_profile::select_attention;
use crate::services::launcher::diagnose;
use std::path::{Path, PathBuf};
use std::process::ExitStatus;
use thiserror::Error;
use tokio::process::Command;
use tracing::{info, warn};

#[derive(Debug, Error)]
pub enum InstallError {
    #[error("{0}")]
    Detection(#[from] DetectionError),
    #[error("Unable to run {0}: {1}")]
    Spawn(String, std::io::Error),
    #[error("{0} failed with {1}")]
    Failed(String, ExitStatus),
}

#[derive(Debug)]
pub struct InstallOutcome {
    pub python: PathBuf,
    /// Optional packages that could not be installed.
    pub skipped: Vec<String>,
}

pub fn venv_python(venv: &Path) -> PathBuf {
    if cfg!(windows) {
        venv.join("Scripts").join("python.exe")
    } else {
        venv.join("bin").join("python")
    }
}

fn torch_install_args(install: &InstallConfig, wheel: &str) -> Vec<String> {
    let mut args = vec!["-m".to_string(), "pip".to_string(), "install".to_string()];
    args.extend(install.torch_packages.iter().cloned());
    args.push("--index-url".to_string());
    args.push(format!(
        "{}/{}",
        install.torch_index_url.trim_end_matches('/'),
        wheel
    ));
    args
}

async fn run(program: &Path, args: &[String]) -> Result<(), InstallError> {
    let description = format!("{} {}", program.display(), args.join(" "));
    info!("Running {}", description);
    let status = Command::new(program)
        .args(args)
        .status()
        .await
        .map_err(|err| InstallError::Spawn(description.clone(), err))?;
    if status.success() {
        Ok(())
    } else {
        Err(InstallError::Failed(description, status))
    }
}

fn pip_install(packages: &[&str]) -> Vec<String> {
    ["-m", "pip", "install"]
        .iter()
        .chain(packages)
        .map(|arg| arg.to_string())
        .collect()
}

/// Creates the virtual environment and installs torch for `wheel`, the
/// requirements file and the optional attention kernels.
pub async fn install_environment(
    install: &InstallConfig,
    base_python: &Path,
    wheel: &str,
) -> Result<InstallOutcome, InstallError> {
    let python = venv_python(&install.venv_path);
    if python.exists() {
        info!("Reusing virtual environment {}", install.venv_path.display());
    } else {
        let venv = install.venv_path.to_string_lossy().into_owned();
        run(base_python, &["-m".to_string(), "venv".to_string(), venv]).await?;
    }

    run(&python, &torch_install_args(install, wheel)).await?;

    match &install.requirements {
        Some(requirements) if requirements.is_file() => {
            let requirements = requirements.to_string_lossy();
            run(&python, &pip_install(&["-r", &*requirements])).await?;
        }
        Some(requirements) => warn!(
            "Requirements file {} not found, skipping",
            requirements.display()
        ),
        None => {}
    }

    let mut skipped = Vec::new();
    for package in &install.optional_packages {
        if let Err(err) = run(&python, &pip_install(&[package.as_str()])).await {
            warn!("Optional package {} not installed: {}", package, err);
            skipped.push(package.clone());
        }
    }

    Ok(InstallOutcome { python, skipped })
}

/// Detects the GPU, installs the matching environment and reports the
/// attention backend it can use.
pub async fn install(config: &Config) -> Result<InstallOutcome, InstallError> {
    let gpu_repository = GpuRepository::new();
    let report = diagnose(
        &gpu_repository,
        config.server.attention_mode,
        config.server.profile,
        false,
    )
    .await?;

    let outcome = install_environment(
        &config.install,
        Path::new(&config.server.python),
        report.torch_wheel,
    )
    .await?;

    let sage_available = gpu_repository
        .sage_attention_installed(&outcome.python.to_string_lossy())
        .await;
    let attention = select_attention(
        config.server.attention_mode,
        report.compute_capability,
        sage_available,
    );
    info!(
        "Environment ready at {}, profile {}, attention {}",
        outcome.python.display(),
        report.profile,
        attention
    );
    Ok(outcome)
}
