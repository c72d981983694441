use crate::config::config::DockerConfig;
use crate::services::gpu_profile::HardwareReport;
use bollard::models::{
    ContainerCreateBody, ContainerStateStatusEnum, DeviceRequest, HostConfig, Mount,
    MountTypeEnum, PortBinding, PortMap, RestartPolicy, RestartPolicyNameEnum,
};
use bollard::query_parameters::{
    BuildImageOptionsBuilder, CreateContainerOptionsBuilder, CreateImageOptionsBuilder,
    InspectContainerOptionsBuilder, RemoveContainerOptionsBuilder, StartContainerOptionsBuilder,
};
use bollard::{Docker, body_full, errors::Error as DockerError};
use futures::StreamExt;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::pin::pin;
use thiserror::Error;
use tracing::{debug, info};

pub struct DockerRepository {
    docker: Docker,
    config: DockerConfig,
}

#[derive(Error, Debug)]
pub enum InitializationError {
    #[error("Error initializing docker daemon: {0}")]
    Docker(#[from] DockerError),
}

#[derive(Error, Debug)]
pub enum ImageError {
    #[error("Error from Docker: {0}")]
    Docker(#[from] DockerError),
    #[error("Unable to read build context {0}: {1}")]
    Context(PathBuf, std::io::Error),
    #[error("Image build failed: {0}")]
    Build(String),
}

impl DockerRepository {
    pub fn new(config: DockerConfig) -> Result<Self, InitializationError> {
        let docker = Docker::connect_with_local_defaults()?;
        Ok(Self { docker, config })
    }

    /// Builds the application image when a build context is configured,
    /// otherwise pulls it unless it is already present locally.
    pub async fn ensure_image(&self) -> Result<(), ImageError> {
        match self.config.build_context() {
            Some(context) => self.build_image(context).await,
            None => Ok(self.pull_image().await?),
        }
    }

    async fn build_image(&self, context: &Path) -> Result<(), ImageError> {
        let image = self.config.image();
        info!("Building image {} from {}", image, context.display());

        let context = context.to_path_buf();
        let archive = tokio::task::spawn_blocking(move || {
            context_archive(&context).map_err(|err| ImageError::Context(context, err))
        })
        .await
        .map_err(|err| ImageError::Build(err.to_string()))??;

        let options = BuildImageOptionsBuilder::new()
            .dockerfile(self.config.dockerfile())
            .t(image)
            .rm(true)
            .build();
        let mut progress = pin!(self.docker.build_image(
            options,
            None,
            Some(body_full(archive.into()))
        ));
        while let Some(update) = progress.next().await {
            let update = update?;
            if let Some(message) = update.error_detail.and_then(|detail| detail.message) {
                return Err(ImageError::Build(message));
            }
            if let Some(line) = update.stream {
                let line = line.trim_end();
                if !line.is_empty() {
                    debug!("{}", line);
                }
            }
        }
        Ok(())
    }

    async fn pull_image(&self) -> Result<(), DockerError> {
        let image = self.config.image();
        if self.docker.inspect_image(image).await.is_ok() {
            debug!("Image {} already present", image);
            return Ok(());
        }

        info!("Pulling image: {}", image);
        let options = CreateImageOptionsBuilder::new().from_image(image).build();
        let mut progress = pin!(self.docker.create_image(Some(options), None, None));
        while let Some(update) = progress.next().await {
            let update = update?;
            if let Some(status) = update.status {
                debug!("{}: {}", image, status);
            }
        }
        Ok(())
    }

    /// `None` when no container with the configured name exists.
    pub async fn container_state(&self) -> Result<Option<ContainerStateStatusEnum>, DockerError> {
        match self
            .docker
            .inspect_container(
                self.config.container_name(),
                Some(InspectContainerOptionsBuilder::new().build()),
            )
            .await
        {
            Ok(response) => Ok(Some(
                response
                    .state
                    .and_then(|state| state.status)
                    .unwrap_or(ContainerStateStatusEnum::EMPTY),
            )),
            Err(DockerError::DockerResponseServerError {
                status_code: 404, ..
            }) => Ok(None),
            Err(err) => Err(err),
        }
    }

    pub async fn remove_container(&self) -> Result<(), DockerError> {
        info!("Removing container: {}", self.config.container_name());
        let options = RemoveContainerOptionsBuilder::new().force(true).build();
        self.docker
            .remove_container(self.config.container_name(), Some(options))
            .await
    }

    pub async fn create_container(
        &self,
        report: &HardwareReport,
        mounts: Vec<(PathBuf, String)>,
    ) -> Result<(), DockerError> {
        info!("Creating container: {}", self.config.container_name());
        let options = CreateContainerOptionsBuilder::new()
            .name(self.config.container_name())
            .build();
        let body = container_body(&self.config, report, mounts);
        self.docker.create_container(Some(options), body).await?;
        Ok(())
    }

    pub async fn start_container(&self) -> Result<(), DockerError> {
        info!("Starting container: {}", self.config.container_name());
        let options = StartContainerOptionsBuilder::new().build();
        self.docker
            .start_container(self.config.container_name(), Some(options))
            .await
    }
}

/// Packs the build context directory into the tar stream Docker expects.
fn context_archive(context: &Path) -> std::io::Result<Vec<u8>> {
    let mut archive = tar::Builder::new(Vec::new());
    archive.follow_symlinks(false);
    archive.append_dir_all("", context)?;
    archive.into_inner()
}

fn container_env(config: &DockerConfig, report: &HardwareReport) -> Vec<String> {
    let mut env = vec![
        format!("WGP_PROFILE={}", report.profile),
        format!("WGP_ATTENTION={}", report.attention),
    ];
    if let Some(cc) = report.compute_capability {
        env.push(format!("TORCH_CUDA_ARCH_LIST={}", cc));
    }
    let mut extra: Vec<_> = config.env().iter().collect();
    extra.sort();
    env.extend(extra.into_iter().map(|(key, value)| format!("{key}={value}")));
    env
}

/// `mounts` pairs absolute host directories with their container targets.
fn container_body(
    config: &DockerConfig,
    report: &HardwareReport,
    mounts: Vec<(PathBuf, String)>,
) -> ContainerCreateBody {
    let port = format!("{}/tcp", config.port());

    let mut exposed_ports: HashMap<String, HashMap<(), ()>> = HashMap::new();
    exposed_ports.insert(port.clone(), HashMap::new());

    let mut port_map = PortMap::new();
    port_map.insert(
        port,
        Some(vec![PortBinding {
            host_port: Some(config.port().to_string()),
            host_ip: Some("0.0.0.0".to_string()),
        }]),
    );

    let host_config = HostConfig {
        restart_policy: Some(RestartPolicy {
            name: Some(RestartPolicyNameEnum::NO),
            ..Default::default()
        }),
        device_requests: Some(vec![DeviceRequest {
            driver: Some("nvidia".to_string()),
            count: Some(-1),
            capabilities: Some(vec![vec!["gpu".to_string()]]),
            ..Default::default()
        }]),
        mounts: Some(
            mounts
                .into_iter()
                .map(|(host, container)| Mount {
                    typ: Some(MountTypeEnum::BIND),
                    source: Some(host.to_string_lossy().into_owned()),
                    target: Some(container),
                    ..Default::default()
                })
                .collect(),
        ),
        port_bindings: Some(port_map),
        ..Default::default()
    };

    ContainerCreateBody {
        image: Some(config.image().to_string()),
        env: Some(container_env(config, report)),
        exposed_ports: Some(exposed_ports),
        host_config: Some(host_config),
        ..Default::default()
    }
}
