use crate::core::plan::{ContainerPlan, DeploymentPlan};
use crate::domain::ports::{ContainerRuntime, ContainerState};
use crate::utils::error::{Result, StackError};
use std::collections::BTreeSet;
use std::sync::Arc;
use tokio::task::JoinSet;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UpReport {
    pub networks_created: Vec<String>,
    pub volumes_created: Vec<String>,
    pub volumes_reused: Vec<String>,
    pub images_built: Vec<String>,
    pub images_pulled: Vec<String>,
    pub started: Vec<String>,
    pub already_running: Vec<String>,
    /// Stopped containers that were removed and started again.
    pub recreated: Vec<String>,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct DownOptions {
    /// Also delete the project's named volumes.
    pub remove_volumes: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DownReport {
    pub removed_containers: Vec<String>,
    pub removed_networks: Vec<String>,
    pub removed_volumes: Vec<String>,
}

pub struct Orchestrator<R: ContainerRuntime + 'static> {
    runtime: Arc<R>,
}

impl<R: ContainerRuntime + 'static> Orchestrator<R> {
    pub fn new(runtime: R) -> Self {
        Self {
            runtime: Arc::new(runtime),
        }
    }

    pub fn with_shared(runtime: Arc<R>) -> Self {
        Self { runtime }
    }

    pub fn runtime(&self) -> &R {
        &self.runtime
    }

    pub async fn up(&self, plan: &DeploymentPlan) -> Result<UpReport> {
        let mut report = UpReport::default();
        tracing::info!("🚀 Bringing up project '{}'", plan.project);

        for network in plan.networks.iter().filter(|n| !n.external) {
            self.runtime
                .create_network(&network.name, network.driver.as_deref())
                .await?;
            tracing::debug!("Network {} ready", network.name);
            report.networks_created.push(network.name.clone());
        }

        for volume in plan.volumes.iter().filter(|v| !v.external) {
            if self
                .runtime
                .ensure_volume(&volume.name, volume.driver.as_deref())
                .await?
            {
                tracing::info!("📦 Created volume {}", volume.name);
                report.volumes_created.push(volume.name.clone());
            } else {
                tracing::debug!("Reusing volume {}", volume.name);
                report.volumes_reused.push(volume.name.clone());
            }
        }

        self.prepare_images(plan, &mut report).await?;

        for (index, wave) in plan.waves.iter().enumerate() {
            tracing::info!(
                "▶️ Starting wave {}: {}",
                index + 1,
                wave.iter()
                    .map(|c| c.service.as_str())
                    .collect::<Vec<_>>()
                    .join(", ")
            );
            self.start_wave(wave, &mut report).await?;
        }

        tracing::info!(
            "✅ Project '{}' is up ({} started, {} already running)",
            plan.project,
            report.started.len(),
            report.already_running.len()
        );
        Ok(report)
    }

    /// Every image must exist before the first container starts, so a failed
    /// build leaves nothing running.
    async fn prepare_images(&self, plan: &DeploymentPlan, report: &mut UpReport) -> Result<()> {
        let mut pulled: BTreeSet<&str> = BTreeSet::new();

        for container in plan.containers() {
            match &container.build {
                Some(build) => {
                    tracing::info!("🔨 Building {} from {}", build.tag, build.context.display());
                    self.runtime
                        .build_image(&container.service, build)
                        .await
                        .map_err(|e| match e {
                            StackError::BuildFailed { .. } => e,
                            other => StackError::BuildFailed {
                                service: container.service.clone(),
                                message: other.to_string(),
                            },
                        })?;
                    report.images_built.push(build.tag.clone());
                }
                None => {
                    if pulled.contains(container.image.as_str()) {
                        continue;
                    }
                    if !self.runtime.image_exists(&container.image).await? {
                        tracing::info!("⬇️ Pulling {}", container.image);
                        self.runtime.pull_image(&container.image).await?;
                        report.images_pulled.push(container.image.clone());
                    }
                    pulled.insert(container.image.as_str());
                }
            }
        }
        Ok(())
    }

    async fn start_wave(&self, wave: &[ContainerPlan], report: &mut UpReport) -> Result<()> {
        let mut tasks = JoinSet::new();

        for container in wave {
            match self.runtime.container_state(&container.container_name).await? {
                ContainerState::Running => {
                    tracing::debug!("{} is already running", container.container_name);
                    report.already_running.push(container.service.clone());
                    continue;
                }
                ContainerState::Stopped => {
                    // The name is taken until the old container is gone.
                    tracing::info!("♻️ Recreating stopped container {}", container.container_name);
                    self.runtime
                        .remove_container(&container.container_name)
                        .await?;
                    report.recreated.push(container.service.clone());
                }
                ContainerState::Missing => {}
            }

            let runtime = Arc::clone(&self.runtime);
            let container = container.clone();
            tasks.spawn(async move {
                let outcome = runtime.run_container(&container).await;
                (container.service, outcome)
            });
        }

        let mut failure = None;
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((service, Ok(id))) => {
                    tracing::info!("🟢 {} started ({})", service, short_id(&id));
                    report.started.push(service);
                }
                Ok((service, Err(e))) => {
                    tracing::error!("❌ {} failed to start: {}", service, e);
                    failure.get_or_insert(e);
                }
                Err(e) => {
                    failure.get_or_insert(StackError::runtime("run_container", e.to_string()));
                }
            }
        }

        match failure {
            // Later waves depend on this one; stop here.
            Some(e) => Err(e),
            None => {
                report.started.sort();
                report.recreated.sort();
                Ok(())
            }
        }
    }

    pub async fn down(&self, plan: &DeploymentPlan, options: DownOptions) -> Result<DownReport> {
        let mut report = DownReport::default();
        tracing::info!("🛑 Tearing down project '{}'", plan.project);

        for wave in plan.waves.iter().rev() {
            for container in wave.iter().rev() {
                let state = self.runtime.container_state(&container.container_name).await?;
                if state == ContainerState::Running {
                    self.runtime.stop_container(&container.container_name).await?;
                }
                self.runtime
                    .remove_container(&container.container_name)
                    .await?;
                report.removed_containers.push(container.container_name.clone());
            }
        }

        for network in plan.networks.iter().filter(|n| !n.external) {
            self.runtime.remove_network(&network.name).await?;
            report.removed_networks.push(network.name.clone());
        }

        if options.remove_volumes {
            for volume in plan.volumes.iter().filter(|v| !v.external) {
                self.runtime.remove_volume(&volume.name).await?;
                tracing::info!("🗑️ Removed volume {}", volume.name);
                report.removed_volumes.push(volume.name.clone());
            }
        } else if !plan.volumes.is_empty() {
            tracing::info!("💾 Keeping {} named volume(s)", plan.volumes.len());
        }

        Ok(report)
    }
}

fn short_id(id: &str) -> &str {
    id.get(..12).unwrap_or(id)
}
