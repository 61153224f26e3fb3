//! Turns a validated manifest into concrete runtime objects: namespaced
//! networks and volumes, image tags, and per-container settings.

use crate::core::topology::Topology;
use crate::domain::model::{ComposeManifest, MountKind, PortBinding, ServiceSpec};
use crate::utils::error::{Result, StackError};
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::path::{Path, PathBuf};

pub const DEFAULT_PROJECT: &str = "sai";

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ImageBuild {
    pub tag: String,
    pub context: PathBuf,
    pub dockerfile: Option<String>,
    pub args: BTreeMap<String, String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NetworkAttachment {
    pub network: String,
    pub aliases: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ContainerMount {
    pub kind: MountKind,
    /// Runtime volume name for named mounts, host path for bind mounts.
    pub source: Option<String>,
    pub target: String,
    pub read_only: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ContainerPlan {
    pub service: String,
    pub container_name: String,
    pub image: String,
    pub build: Option<ImageBuild>,
    pub command: Vec<String>,
    /// Resolved once at plan time; the container sees exactly this map.
    pub env: BTreeMap<String, String>,
    pub ports: Vec<PortBinding>,
    pub mounts: Vec<ContainerMount>,
    pub networks: Vec<NetworkAttachment>,
    pub depends_on: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NetworkPlan {
    pub key: String,
    pub name: String,
    pub driver: Option<String>,
    pub external: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct VolumePlan {
    pub key: String,
    pub name: String,
    pub driver: Option<String>,
    pub external: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct DeploymentPlan {
    pub project: String,
    pub networks: Vec<NetworkPlan>,
    pub volumes: Vec<VolumePlan>,
    pub waves: Vec<Vec<ContainerPlan>>,
}

/// Lowercase, restricted to `[a-z0-9_-]`, never empty.
pub fn normalize_project_name(raw: &str) -> String {
    let normalized: String = raw
        .to_lowercase()
        .chars()
        .filter(|c| c.is_ascii_alphanumeric() || *c == '_' || *c == '-')
        .collect();
    let trimmed = normalized.trim_start_matches(['_', '-']);
    if trimmed.is_empty() {
        DEFAULT_PROJECT.to_string()
    } else {
        trimmed.to_string()
    }
}

/// CLI override, then the manifest's `name`, then the manifest directory.
pub fn project_name(
    override_name: Option<&str>,
    manifest: &ComposeManifest,
    base_dir: &Path,
) -> String {
    let raw = override_name
        .map(str::to_string)
        .or_else(|| manifest.name.clone())
        .or_else(|| {
            base_dir
                .canonicalize()
                .ok()
                .and_then(|dir| dir.file_name().map(|n| n.to_string_lossy().into_owned()))
        })
        .unwrap_or_else(|| DEFAULT_PROJECT.to_string());
    normalize_project_name(&raw)
}

fn resolve_host_path(
    source: &str,
    base_dir: &Path,
    env_lookup: &dyn Fn(&str) -> Option<String>,
) -> PathBuf {
    if let Some(rest) = source.strip_prefix('~') {
        if let Some(home) = env_lookup("HOME") {
            return PathBuf::from(home).join(rest.trim_start_matches('/'));
        }
    }
    let path = Path::new(source.strip_prefix("./").unwrap_or(source));
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        base_dir.join(path)
    }
}

impl DeploymentPlan {
    pub fn build(
        manifest: &ComposeManifest,
        project: &str,
        base_dir: &Path,
        env_lookup: &dyn Fn(&str) -> Option<String>,
    ) -> Result<Self> {
        let topology = Topology::resolve(manifest)?;

        let networks: Vec<NetworkPlan> = manifest
            .network_names()
            .into_iter()
            .map(|key| {
                let spec = manifest.network_spec(&key);
                let name = match (&spec.name, spec.external) {
                    (Some(name), _) => name.clone(),
                    (None, true) => key.clone(),
                    (None, false) => format!("{}_{}", project, key),
                };
                NetworkPlan {
                    key,
                    name,
                    driver: spec.driver,
                    external: spec.external,
                }
            })
            .collect();

        let volumes: Vec<VolumePlan> = manifest
            .volumes
            .keys()
            .map(|key| {
                let spec = manifest.volume_spec(key);
                let name = match (&spec.name, spec.external) {
                    (Some(name), _) => name.clone(),
                    (None, true) => key.clone(),
                    (None, false) => format!("{}_{}", project, key),
                };
                VolumePlan {
                    key: key.clone(),
                    name,
                    driver: spec.driver,
                    external: spec.external,
                }
            })
            .collect();

        let network_names: BTreeMap<&str, &str> = networks
            .iter()
            .map(|n| (n.key.as_str(), n.name.as_str()))
            .collect();
        let volume_names: BTreeMap<&str, &str> = volumes
            .iter()
            .map(|v| (v.key.as_str(), v.name.as_str()))
            .collect();

        let mut waves = Vec::new();
        for wave in topology.waves() {
            let mut containers = Vec::new();
            for service_name in wave {
                let service = manifest.service(service_name).ok_or_else(|| {
                    StackError::validation(format!("service '{}' vanished from manifest", service_name))
                })?;
                containers.push(plan_container(
                    project,
                    service_name,
                    service,
                    base_dir,
                    &network_names,
                    &volume_names,
                    env_lookup,
                )?);
            }
            waves.push(containers);
        }

        Ok(Self {
            project: project.to_string(),
            networks,
            volumes,
            waves,
        })
    }

    pub fn containers(&self) -> impl Iterator<Item = &ContainerPlan> {
        self.waves.iter().flatten()
    }

    pub fn container(&self, service: &str) -> Option<&ContainerPlan> {
        self.containers().find(|c| c.service == service)
    }

    pub fn render(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(out, "project: {}", self.project);

        if !self.networks.is_empty() {
            let _ = writeln!(out, "networks:");
            for network in &self.networks {
                let external = if network.external { " (external)" } else { "" };
                let _ = writeln!(out, "  - {}{}", network.name, external);
            }
        }

        if !self.volumes.is_empty() {
            let _ = writeln!(out, "volumes:");
            for volume in &self.volumes {
                let external = if volume.external { " (external)" } else { "" };
                let _ = writeln!(out, "  - {}{}", volume.name, external);
            }
        }

        for (index, wave) in self.waves.iter().enumerate() {
            let _ = writeln!(out, "wave {}:", index + 1);
            for container in wave {
                let source = if container.build.is_some() { "build" } else { "image" };
                let _ = writeln!(
                    out,
                    "  - {} [{} {}] as {}",
                    container.service, source, container.image, container.container_name
                );
                for port in &container.ports {
                    let _ = writeln!(out, "      port {}", port);
                }
                for key in container.env.keys() {
                    let _ = writeln!(out, "      env {}", key);
                }
                if !container.depends_on.is_empty() {
                    let _ = writeln!(out, "      after {}", container.depends_on.join(", "));
                }
            }
        }
        out
    }
}

fn plan_container(
    project: &str,
    name: &str,
    service: &ServiceSpec,
    base_dir: &Path,
    network_names: &BTreeMap<&str, &str>,
    volume_names: &BTreeMap<&str, &str>,
    env_lookup: &dyn Fn(&str) -> Option<String>,
) -> Result<ContainerPlan> {
    let image = service
        .image
        .clone()
        .unwrap_or_else(|| format!("{}-{}", project, name));

    let build = service.build.as_ref().map(|build| ImageBuild {
        tag: image.clone(),
        context: resolve_host_path(build.context(), base_dir, env_lookup),
        dockerfile: build.dockerfile().map(str::to_string),
        args: build.args(),
    });

    let mut env = BTreeMap::new();
    for binding in service.environment.bindings() {
        let value = binding.value.or_else(|| env_lookup(&binding.key));
        match value {
            Some(value) => {
                env.insert(binding.key, value);
            }
            None => tracing::warn!(
                "⚠️ {}: environment variable {} is not set and will be omitted",
                name,
                binding.key
            ),
        }
    }

    let ports = service
        .port_bindings()
        .map_err(|reason| StackError::validation(format!("{}: {}", name, reason)))?;

    let mut mounts = Vec::new();
    for mount in service
        .mounts()
        .map_err(|reason| StackError::validation(format!("{}: {}", name, reason)))?
    {
        let source = match (mount.kind, mount.source) {
            (MountKind::Named, Some(volume)) => volume_names
                .get(volume.as_str())
                .map(|runtime_name| runtime_name.to_string())
                .or(Some(volume)),
            (MountKind::Bind, Some(path)) => Some(
                resolve_host_path(&path, base_dir, env_lookup)
                    .to_string_lossy()
                    .into_owned(),
            ),
            (_, source) => source,
        };
        mounts.push(ContainerMount {
            kind: mount.kind,
            source,
            target: mount.target,
            read_only: mount.read_only,
        });
    }

    let networks = service
        .network_names()
        .into_iter()
        .map(|key| {
            let mut aliases = vec![name.to_string()];
            aliases.extend(service.networks.aliases(&key));
            NetworkAttachment {
                network: network_names
                    .get(key.as_str())
                    .map(|n| n.to_string())
                    .unwrap_or_else(|| format!("{}_{}", project, key)),
                aliases,
            }
        })
        .collect();

    Ok(ContainerPlan {
        service: name.to_string(),
        container_name: service
            .container_name
            .clone()
            .unwrap_or_else(|| format!("{}-{}-1", project, name)),
        image,
        build,
        command: service
            .command
            .as_ref()
            .map(|command| command.to_args())
            .unwrap_or_default(),
        env,
        ports,
        mounts,
        networks,
        depends_on: service.dependencies(),
    })
}
