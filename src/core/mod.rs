pub mod orchestrator;
pub mod plan;
pub mod topology;

pub use crate::domain::model::ComposeManifest;
pub use crate::domain::ports::{ContainerRuntime, KeyValueStore};
pub use crate::utils::error::Result;
pub use orchestrator::{DownOptions, Orchestrator};
pub use plan::DeploymentPlan;
pub use topology::{check_manifest, Topology, TopologyIssue};
