//! Concrete implementations of the domain ports.

pub mod docker;
pub mod memory;
pub mod mongo;
pub mod redis;
pub mod simulated;

pub use docker::DockerEngine;
pub use memory::{MemoryDocumentStore, MemoryStore};
pub use mongo::MongoStore;
pub use redis::RedisStore;
pub use simulated::SimulatedRuntime;
