//! In-memory container engine used by tests and `--dry-run`.

use crate::core::plan::{ContainerPlan, ImageBuild};
use crate::domain::model::MountKind;
use crate::domain::ports::{ContainerRuntime, ContainerState};
use crate::utils::error::{Result, StackError};
use async_trait::async_trait;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Mutex, MutexGuard};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RuntimeEvent {
    NetworkCreated(String),
    NetworkRemoved(String),
    VolumeCreated(String),
    VolumeRemoved(String),
    ImageBuilt(String),
    ImagePulled(String),
    ContainerStarted(String),
    ContainerStopped(String),
    ContainerRemoved(String),
}

#[derive(Debug)]
struct SimContainer {
    plan: ContainerPlan,
    running: bool,
    /// Writes outside any named volume; gone with the container.
    scratch: BTreeMap<String, Vec<u8>>,
}

#[derive(Debug, Default)]
struct SimState {
    networks: BTreeSet<String>,
    volumes: BTreeMap<String, BTreeMap<String, Vec<u8>>>,
    images: BTreeSet<String>,
    containers: BTreeMap<String, SimContainer>,
    failing_builds: BTreeSet<String>,
    failing_starts: BTreeSet<String>,
    events: Vec<RuntimeEvent>,
    next_id: u64,
}

#[derive(Debug, Default)]
pub struct SimulatedRuntime {
    state: Mutex<SimState>,
}

impl SimulatedRuntime {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, SimState> {
        self.state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Makes the build of `service` exit non-zero.
    pub fn fail_build(&self, service: &str) {
        self.state().failing_builds.insert(service.to_string());
    }

    pub fn fail_start(&self, service: &str) {
        self.state().failing_starts.insert(service.to_string());
    }

    pub fn events(&self) -> Vec<RuntimeEvent> {
        self.state().events.clone()
    }

    pub fn has_image(&self, image: &str) -> bool {
        self.state().images.contains(image)
    }

    pub fn has_network(&self, name: &str) -> bool {
        self.state().networks.contains(name)
    }

    pub fn has_volume(&self, name: &str) -> bool {
        self.state().volumes.contains_key(name)
    }

    /// Services of the running containers, sorted.
    pub fn running_services(&self) -> Vec<String> {
        let state = self.state();
        let mut services: Vec<String> = state
            .containers
            .values()
            .filter(|c| c.running)
            .map(|c| c.plan.service.clone())
            .collect();
        services.sort();
        services
    }

    /// Environment the container was created with.
    pub fn container_env(&self, container_name: &str) -> Option<BTreeMap<String, String>> {
        self.state()
            .containers
            .get(container_name)
            .map(|c| c.plan.env.clone())
    }

    /// Writes a file from inside a running container. Paths under a named
    /// volume mount land in the volume; anything else in the container layer.
    pub fn write_file(&self, container_name: &str, path: &str, data: &[u8]) -> Result<()> {
        let mut state = self.state();
        let SimState {
            containers,
            volumes,
            ..
        } = &mut *state;

        let container = containers
            .get_mut(container_name)
            .filter(|c| c.running)
            .ok_or_else(|| {
                StackError::runtime("exec", format!("container {} is not running", container_name))
            })?;

        match volume_target(&container.plan, path) {
            Some((volume, relative)) => {
                let files = volumes.get_mut(&volume).ok_or_else(|| {
                    StackError::runtime("exec", format!("volume {} does not exist", volume))
                })?;
                files.insert(relative, data.to_vec());
            }
            None => {
                container.scratch.insert(path.to_string(), data.to_vec());
            }
        }
        Ok(())
    }

    pub fn read_file(&self, container_name: &str, path: &str) -> Option<Vec<u8>> {
        let state = self.state();
        let container = state.containers.get(container_name).filter(|c| c.running)?;
        match volume_target(&container.plan, path) {
            Some((volume, relative)) => state.volumes.get(&volume)?.get(&relative).cloned(),
            None => container.scratch.get(path).cloned(),
        }
    }

    pub fn volume_file_count(&self, volume: &str) -> usize {
        self.state().volumes.get(volume).map(|f| f.len()).unwrap_or(0)
    }
}

fn volume_target(plan: &ContainerPlan, path: &str) -> Option<(String, String)> {
    plan.mounts
        .iter()
        .filter(|m| m.kind == MountKind::Named)
        .find_map(|mount| {
            let relative = path.strip_prefix(mount.target.as_str())?;
            if !(relative.is_empty() || relative.starts_with('/')) {
                return None;
            }
            let volume = mount.source.clone()?;
            Some((volume, relative.trim_start_matches('/').to_string()))
        })
}

#[async_trait]
impl ContainerRuntime for SimulatedRuntime {
    async fn create_network(&self, name: &str, _driver: Option<&str>) -> Result<()> {
        let mut state = self.state();
        if state.networks.insert(name.to_string()) {
            state.events.push(RuntimeEvent::NetworkCreated(name.to_string()));
        }
        Ok(())
    }

    async fn remove_network(&self, name: &str) -> Result<()> {
        let mut state = self.state();
        let in_use = state
            .containers
            .values()
            .any(|c| c.running && c.plan.networks.iter().any(|n| n.network == name));
        if in_use {
            return Err(StackError::runtime(
                "network rm",
                format!("network {} has active endpoints", name),
            ));
        }
        if state.networks.remove(name) {
            state.events.push(RuntimeEvent::NetworkRemoved(name.to_string()));
        }
        Ok(())
    }

    async fn ensure_volume(&self, name: &str, _driver: Option<&str>) -> Result<bool> {
        let mut state = self.state();
        if state.volumes.contains_key(name) {
            return Ok(false);
        }
        state.volumes.insert(name.to_string(), BTreeMap::new());
        state.events.push(RuntimeEvent::VolumeCreated(name.to_string()));
        Ok(true)
    }

    async fn remove_volume(&self, name: &str) -> Result<()> {
        let mut state = self.state();
        let in_use = state.containers.values().any(|c| {
            c.plan
                .mounts
                .iter()
                .any(|m| m.kind == MountKind::Named && m.source.as_deref() == Some(name))
        });
        if in_use {
            return Err(StackError::runtime(
                "volume rm",
                format!("volume {} is in use", name),
            ));
        }
        if state.volumes.remove(name).is_some() {
            state.events.push(RuntimeEvent::VolumeRemoved(name.to_string()));
        }
        Ok(())
    }

    async fn image_exists(&self, image: &str) -> Result<bool> {
        Ok(self.state().images.contains(image))
    }

    async fn build_image(&self, service: &str, build: &ImageBuild) -> Result<()> {
        let mut state = self.state();
        if state.failing_builds.contains(service) {
            return Err(StackError::BuildFailed {
                service: service.to_string(),
                message: "build step exited with status 1".to_string(),
            });
        }
        state.images.insert(build.tag.clone());
        state.events.push(RuntimeEvent::ImageBuilt(build.tag.clone()));
        Ok(())
    }

    async fn pull_image(&self, image: &str) -> Result<()> {
        let mut state = self.state();
        state.images.insert(image.to_string());
        state.events.push(RuntimeEvent::ImagePulled(image.to_string()));
        Ok(())
    }

    async fn run_container(&self, container: &ContainerPlan) -> Result<String> {
        let mut state = self.state();
        let fail = |message: String| Err(StackError::runtime("run", message));

        if state.containers.contains_key(&container.container_name) {
            return fail(format!(
                "container name {} is already in use",
                container.container_name
            ));
        }
        if state.failing_starts.contains(&container.service) {
            return fail(format!("{} exited immediately", container.service));
        }
        if !state.images.contains(&container.image) {
            return fail(format!("image {} not found", container.image));
        }
        for attachment in &container.networks {
            if !state.networks.contains(&attachment.network) {
                return fail(format!("network {} not found", attachment.network));
            }
        }
        for mount in container.mounts.iter().filter(|m| m.kind == MountKind::Named) {
            if let Some(volume) = &mount.source {
                if !state.volumes.contains_key(volume) {
                    return fail(format!("volume {} not found", volume));
                }
            }
        }
        for running in state.containers.values().filter(|c| c.running) {
            for theirs in &running.plan.ports {
                if container.ports.iter().any(|ours| ours.collides_with(theirs)) {
                    return fail(format!(
                        "port {} is already allocated by {}",
                        theirs, running.plan.container_name
                    ));
                }
            }
        }

        state.next_id += 1;
        let id = format!("{:064x}", state.next_id);
        state.containers.insert(
            container.container_name.clone(),
            SimContainer {
                plan: container.clone(),
                running: true,
                scratch: BTreeMap::new(),
            },
        );
        state
            .events
            .push(RuntimeEvent::ContainerStarted(container.service.clone()));
        Ok(id)
    }

    async fn container_state(&self, name: &str) -> Result<ContainerState> {
        Ok(match self.state().containers.get(name) {
            Some(container) if container.running => ContainerState::Running,
            Some(_) => ContainerState::Stopped,
            None => ContainerState::Missing,
        })
    }

    async fn stop_container(&self, name: &str) -> Result<()> {
        let mut state = self.state();
        let stopped = match state.containers.get_mut(name) {
            Some(container) if container.running => {
                container.running = false;
                Some(container.plan.service.clone())
            }
            _ => None,
        };
        if let Some(service) = stopped {
            state.events.push(RuntimeEvent::ContainerStopped(service));
        }
        Ok(())
    }

    async fn remove_container(&self, name: &str) -> Result<()> {
        let mut state = self.state();
        if let Some(container) = state.containers.remove(name) {
            state
                .events
                .push(RuntimeEvent::ContainerRemoved(container.plan.service));
        }
        Ok(())
    }
}
