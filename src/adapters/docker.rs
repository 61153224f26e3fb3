//! `ContainerRuntime` backed by the Docker Engine API.

use crate::core::plan::{ContainerPlan, ImageBuild};
use crate::domain::model::{MountKind, PortBinding};
use crate::domain::ports::{ContainerRuntime, ContainerState};
use crate::utils::error::{Result, StackError};
use async_trait::async_trait;
use bollard::container::{
    Config, CreateContainerOptions, InspectContainerOptions, NetworkingConfig,
    RemoveContainerOptions, StartContainerOptions, StopContainerOptions,
};
use bollard::errors::Error as EngineError;
use bollard::image::{BuildImageOptions, CreateImageOptions};
use bollard::models::{
    EndpointSettings, HostConfig, Mount, MountTypeEnum, PortBinding as EnginePortBinding,
};
use bollard::network::{ConnectNetworkOptions, CreateNetworkOptions, InspectNetworkOptions};
use bollard::volume::CreateVolumeOptions;
use bollard::Docker;
use futures::StreamExt;
use ignore::gitignore::{Gitignore, GitignoreBuilder};
use std::collections::{HashMap, VecDeque};
use std::path::Path;
use std::time::Duration;
use walkdir::WalkDir;

pub const MANAGED_LABEL: (&str, &str) = ("io.sai-stack.managed", "true");
const BUILD_LOG_TAIL: usize = 10;
const STOP_GRACE_SECONDS: i64 = 10;

#[derive(Debug, Clone)]
pub struct DockerEngine {
    docker: Docker,
    build_timeout: Duration,
}

impl DockerEngine {
    /// Connects through `DOCKER_HOST` or the platform's default socket.
    pub fn connect() -> Result<Self> {
        let docker = Docker::connect_with_local_defaults()
            .map_err(|e| StackError::runtime("connect", e.to_string()))?;
        Ok(Self::with_client(docker))
    }

    pub fn with_client(docker: Docker) -> Self {
        Self {
            docker,
            build_timeout: Duration::from_secs(1800),
        }
    }

    pub fn with_build_timeout(mut self, build_timeout: Duration) -> Self {
        self.build_timeout = build_timeout;
        self
    }

    /// Fails fast when the daemon is not reachable.
    pub async fn ping(&self) -> Result<()> {
        self.docker.ping().await.map_err(|e| {
            StackError::runtime(
                "ping",
                format!("cannot reach the Docker daemon ({}); is it running?", e),
            )
        })?;
        Ok(())
    }

    fn long_running(&self) -> Docker {
        self.docker.clone().with_timeout(self.build_timeout)
    }
}

fn status_of(error: &EngineError) -> Option<u16> {
    match error {
        EngineError::DockerResponseServerError { status_code, .. } => Some(*status_code),
        _ => None,
    }
}

fn is_not_found(error: &EngineError) -> bool {
    status_of(error) == Some(404)
}

/// Turns the listed status codes into success.
fn tolerate(
    result: std::result::Result<(), EngineError>,
    operation: &str,
    codes: &[u16],
) -> Result<()> {
    match result {
        Ok(()) => Ok(()),
        Err(e) if status_of(&e).is_some_and(|code| codes.contains(&code)) => {
            tracing::debug!("Nothing to do for {}: {}", operation, e);
            Ok(())
        }
        Err(e) => Err(engine_error(operation, e)),
    }
}

fn engine_error(operation: &str, error: EngineError) -> StackError {
    match error {
        EngineError::DockerResponseServerError { message, .. } => {
            StackError::runtime(operation, message)
        }
        EngineError::RequestTimeoutError => StackError::TimeoutError {
            operation: format!("docker {}", operation),
        },
        other => StackError::runtime(operation, other.to_string()),
    }
}

fn managed_labels() -> HashMap<String, String> {
    HashMap::from([(MANAGED_LABEL.0.to_string(), MANAGED_LABEL.1.to_string())])
}

pub fn network_options(name: &str, driver: Option<&str>) -> CreateNetworkOptions<String> {
    CreateNetworkOptions {
        name: name.to_string(),
        driver: driver.unwrap_or("bridge").to_string(),
        labels: managed_labels(),
        ..Default::default()
    }
}

pub fn volume_options(name: &str, driver: Option<&str>) -> CreateVolumeOptions<String> {
    CreateVolumeOptions {
        name: name.to_string(),
        driver: driver.unwrap_or("local").to_string(),
        labels: managed_labels(),
        ..Default::default()
    }
}

pub fn build_options(build: &ImageBuild) -> BuildImageOptions<String> {
    BuildImageOptions {
        dockerfile: build
            .dockerfile
            .clone()
            .unwrap_or_else(|| "Dockerfile".to_string()),
        t: build.tag.clone(),
        buildargs: build
            .args
            .iter()
            .map(|(key, value)| (key.clone(), value.clone()))
            .collect(),
        rm: true,
        ..Default::default()
    }
}

/// `mongo:7`, `localhost:5000/app` and `app@sha256:...` into repository and tag.
pub fn split_image_reference(image: &str) -> (&str, &str) {
    if let Some((repository, digest)) = image.split_once('@') {
        return (repository, digest);
    }
    let name_start = image.rfind('/').map_or(0, |slash| slash + 1);
    match image[name_start..].rfind(':') {
        Some(colon) => (
            &image[..name_start + colon],
            &image[name_start + colon + 1..],
        ),
        None => (image, "latest"),
    }
}

/// Keys are `target/protocol`; the engine takes IPv6 host addresses unbracketed.
pub fn port_mappings(
    ports: &[PortBinding],
) -> HashMap<String, Option<Vec<EnginePortBinding>>> {
    let mut mappings: HashMap<String, Option<Vec<EnginePortBinding>>> = HashMap::new();
    for port in ports {
        let binding = EnginePortBinding {
            host_ip: port.host_ip.clone(),
            host_port: Some(port.published.map(|p| p.to_string()).unwrap_or_default()),
        };
        mappings
            .entry(format!("{}/{}", port.target, port.protocol))
            .or_insert_with(|| Some(Vec::new()))
            .get_or_insert_with(Vec::new)
            .push(binding);
    }
    mappings
}

pub fn mount_specs(container: &ContainerPlan) -> Vec<Mount> {
    container
        .mounts
        .iter()
        .map(|mount| {
            let (typ, source) = match mount.kind {
                MountKind::Bind => (MountTypeEnum::BIND, mount.source.clone()),
                MountKind::Named => (MountTypeEnum::VOLUME, mount.source.clone()),
                MountKind::Anonymous => (MountTypeEnum::VOLUME, None),
            };
            Mount {
                target: Some(mount.target.clone()),
                source,
                typ: Some(typ),
                read_only: Some(mount.read_only),
                ..Default::default()
            }
        })
        .collect()
}

/// The container joins its first network at creation; the rest are connected afterwards.
pub fn container_config(container: &ContainerPlan) -> Config<String> {
    let port_bindings = port_mappings(&container.ports);
    let exposed_ports: HashMap<String, HashMap<(), ()>> = port_bindings
        .keys()
        .map(|key| (key.clone(), HashMap::new()))
        .collect();

    let networking_config = container.networks.first().map(|primary| NetworkingConfig {
        endpoints_config: HashMap::from([(
            primary.network.clone(),
            EndpointSettings {
                aliases: Some(primary.aliases.clone()),
                ..Default::default()
            },
        )]),
    });

    Config {
        image: Some(container.image.clone()),
        cmd: (!container.command.is_empty()).then(|| container.command.clone()),
        env: Some(
            container
                .env
                .iter()
                .map(|(key, value)| format!("{}={}", key, value))
                .collect(),
        ),
        labels: Some(managed_labels()),
        exposed_ports: Some(exposed_ports),
        host_config: Some(HostConfig {
            port_bindings: Some(port_bindings),
            mounts: Some(mount_specs(container)),
            network_mode: container.networks.first().map(|n| n.network.clone()),
            ..Default::default()
        }),
        networking_config,
        ..Default::default()
    }
}

fn dockerignore(context: &Path) -> Result<Gitignore> {
    let mut builder = GitignoreBuilder::new(context);
    let file = context.join(".dockerignore");
    if file.is_file() {
        if let Some(e) = builder.add(&file) {
            return Err(StackError::validation(format!(
                "{}: {}",
                file.display(),
                e
            )));
        }
    }
    builder
        .build()
        .map_err(|e| StackError::validation(format!("{}: {}", file.display(), e)))
}

/// Tars the build context, honouring `.dockerignore`. The Dockerfile is always sent.
pub fn context_archive(context: &Path, dockerfile: &str) -> Result<Vec<u8>> {
    let ignored = dockerignore(context)?;
    let dockerfile = context.join(dockerfile);

    let mut archive = tar::Builder::new(Vec::new());
    archive.follow_symlinks(false);

    let walker = WalkDir::new(context)
        .min_depth(1)
        .follow_links(false)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(|entry| {
            entry.path() == dockerfile
                || !ignored
                    .matched(entry.path(), entry.file_type().is_dir())
                    .is_ignore()
        });

    for entry in walker {
        let entry = entry.map_err(std::io::Error::from)?;
        let name = entry
            .path()
            .strip_prefix(context)
            .map_err(|e| StackError::runtime("build", e.to_string()))?;
        if entry.file_type().is_dir() {
            archive.append_dir(name, entry.path())?;
        } else {
            archive.append_path_with_name(entry.path(), name)?;
        }
    }
    Ok(archive.into_inner()?)
}

#[async_trait]
impl ContainerRuntime for DockerEngine {
    async fn create_network(&self, name: &str, driver: Option<&str>) -> Result<()> {
        match self
            .docker
            .inspect_network(name, None::<InspectNetworkOptions<String>>)
            .await
        {
            Ok(_) => return Ok(()),
            Err(e) if is_not_found(&e) => {}
            Err(e) => return Err(engine_error("network inspect", e)),
        }
        let created = self
            .docker
            .create_network(network_options(name, driver))
            .await
            .map(|_| ());
        tolerate(created, "network create", &[409])
    }

    async fn remove_network(&self, name: &str) -> Result<()> {
        tolerate(
            self.docker.remove_network(name).await,
            "network rm",
            &[404],
        )
    }

    async fn ensure_volume(&self, name: &str, driver: Option<&str>) -> Result<bool> {
        match self.docker.inspect_volume(name).await {
            Ok(_) => return Ok(false),
            Err(e) if is_not_found(&e) => {}
            Err(e) => return Err(engine_error("volume inspect", e)),
        }
        self.docker
            .create_volume(volume_options(name, driver))
            .await
            .map_err(|e| engine_error("volume create", e))?;
        Ok(true)
    }

    async fn remove_volume(&self, name: &str) -> Result<()> {
        tolerate(
            self.docker.remove_volume(name, None).await,
            "volume rm",
            &[404],
        )
    }

    async fn image_exists(&self, image: &str) -> Result<bool> {
        match self.docker.inspect_image(image).await {
            Ok(_) => Ok(true),
            Err(e) if is_not_found(&e) => Ok(false),
            Err(e) => Err(engine_error("image inspect", e)),
        }
    }

    async fn build_image(&self, service: &str, build: &ImageBuild) -> Result<()> {
        let options = build_options(build);
        let context = build.context.clone();
        let dockerfile = options.dockerfile.clone();
        let archive = tokio::task::spawn_blocking(move || context_archive(&context, &dockerfile))
            .await
            .map_err(|e| StackError::runtime("build", e.to_string()))??;
        tracing::debug!(
            "Sending {} byte build context for '{}'",
            archive.len(),
            build.tag
        );

        let failed = |message: String| StackError::BuildFailed {
            service: service.to_string(),
            message,
        };

        // Build logs are long; the tail carries the failing step.
        let mut tail: VecDeque<String> = VecDeque::with_capacity(BUILD_LOG_TAIL);
        let docker = self.long_running();
        let mut stream = docker.build_image(options, None, Some(bytes::Bytes::from(archive)));
        while let Some(item) = stream.next().await {
            let info = item.map_err(|e| failed(e.to_string()))?;
            if let Some(error) = info.error {
                tail.push_back(error);
                return Err(failed(Vec::from(tail).join("\n")));
            }
            if let Some(line) = info.stream {
                let line = line.trim_end();
                if line.is_empty() {
                    continue;
                }
                tracing::trace!("[{}] {}", service, line);
                if tail.len() == BUILD_LOG_TAIL {
                    tail.pop_front();
                }
                tail.push_back(line.to_string());
            }
        }
        Ok(())
    }

    async fn pull_image(&self, image: &str) -> Result<()> {
        let (repository, tag) = split_image_reference(image);
        let options = CreateImageOptions {
            from_image: repository.to_string(),
            tag: tag.to_string(),
            ..Default::default()
        };

        let docker = self.long_running();
        let mut stream = docker.create_image(Some(options), None, None);
        while let Some(item) = stream.next().await {
            let info = item.map_err(|e| engine_error("pull", e))?;
            if let Some(error) = info.error {
                return Err(StackError::runtime("pull", error));
            }
        }
        Ok(())
    }

    async fn run_container(&self, container: &ContainerPlan) -> Result<String> {
        let created = self
            .docker
            .create_container(
                Some(CreateContainerOptions {
                    name: container.container_name.clone(),
                    platform: None,
                }),
                container_config(container),
            )
            .await
            .map_err(|e| engine_error("create", e))?;
        for warning in &created.warnings {
            tracing::warn!("{}: {}", container.container_name, warning);
        }

        for attachment in container.networks.iter().skip(1) {
            let options = ConnectNetworkOptions {
                container: container.container_name.clone(),
                endpoint_config: EndpointSettings {
                    aliases: Some(attachment.aliases.clone()),
                    ..Default::default()
                },
            };
            self.docker
                .connect_network(&attachment.network, options)
                .await
                .map_err(|e| engine_error("network connect", e))?;
        }

        let started = self
            .docker
            .start_container(&created.id, None::<StartContainerOptions<String>>)
            .await;
        tolerate(started, "start", &[304])?;
        Ok(created.id)
    }

    async fn container_state(&self, name: &str) -> Result<ContainerState> {
        match self
            .docker
            .inspect_container(name, None::<InspectContainerOptions>)
            .await
        {
            Ok(inspect) => {
                let running = inspect
                    .state
                    .and_then(|state| state.running)
                    .unwrap_or(false);
                Ok(if running {
                    ContainerState::Running
                } else {
                    ContainerState::Stopped
                })
            }
            Err(e) if is_not_found(&e) => Ok(ContainerState::Missing),
            Err(e) => Err(engine_error("inspect", e)),
        }
    }

    async fn stop_container(&self, name: &str) -> Result<()> {
        let stopped = self
            .docker
            .stop_container(
                name,
                Some(StopContainerOptions {
                    t: STOP_GRACE_SECONDS,
                }),
            )
            .await;
        tolerate(stopped, "stop", &[304, 404])
    }

    async fn remove_container(&self, name: &str) -> Result<()> {
        let removed = self
            .docker
            .remove_container(
                name,
                Some(RemoveContainerOptions {
                    force: true,
                    ..Default::default()
                }),
            )
            .await;
        tolerate(removed, "rm", &[404])
    }
}
