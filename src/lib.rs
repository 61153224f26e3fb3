pub mod adapters;
pub mod app;
pub mod config;
pub mod core;
pub mod domain;
pub mod utils;

#[cfg(feature = "cli")]
pub use config::{CliConfig, Command};

pub use adapters::{
    DockerEngine, MemoryDocumentStore, MemoryStore, MongoStore, RedisStore, SimulatedRuntime,
};
pub use app::BackendService;
pub use config::backend::BackendSettings;
pub use core::{ComposeManifest, DeploymentPlan, DownOptions, Orchestrator, Topology};
pub use utils::error::{Result, StackError};
