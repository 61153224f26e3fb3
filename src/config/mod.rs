pub mod backend;
#[cfg(feature = "cli")]
pub mod cli;
pub mod compose;

#[cfg(feature = "cli")]
pub use cli::{CliConfig, Command};
