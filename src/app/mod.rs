//! Backend service: store connectivity, memory and document access,
//! checkpoints, jobs and HTTP surface.

pub mod backend;
pub mod checkpoint;
pub mod connect;
pub mod documents;
pub mod memory;
pub mod scheduler;
pub mod server;

pub use backend::BackendService;
pub use checkpoint::{Checkpoint, Checkpointer};
pub use connect::{connect_stores, retry, ConnectedStores};
pub use documents::DocumentCollection;
pub use memory::MemoryManager;
pub use scheduler::Scheduler;
