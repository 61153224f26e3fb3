use crate::utils::error::{Result, StackError};
use crate::utils::validation::{self, Validate};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Parser)]
#[command(name = "sai-stack")]
#[command(version, about = "Validate, plan and run the SAI research stack")]
pub struct CliConfig {
    /// Compose manifest describing the stack
    #[arg(short = 'f', long = "file", default_value = "docker-compose.yml", global = true)]
    pub file: PathBuf,

    /// Override the project name used to namespace networks, volumes and containers
    #[arg(short = 'p', long = "project-name", global = true)]
    pub project_name: Option<String>,

    #[arg(short, long, global = true, help = "Enable verbose output")]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Clone, Subcommand)]
pub enum Command {
    /// Check the manifest for dependency, port, volume and network problems
    Validate,
    /// Print the deployment plan
    Plan {
        #[arg(long, help = "Print the plan as JSON")]
        json: bool,
    },
    /// Create networks and volumes, build images and start services in dependency order
    Up {
        #[arg(long, help = "Run against an in-memory runtime instead of docker")]
        dry_run: bool,
    },
    /// Stop and remove the stack's containers and networks
    Down {
        #[arg(long, help = "Also remove named volumes")]
        volumes: bool,
        #[arg(long, help = "Run against an in-memory runtime instead of docker")]
        dry_run: bool,
    },
    /// Query a running backend's /status endpoint
    Status {
        #[arg(long, default_value = "http://localhost:8000")]
        url: String,
        #[arg(long, default_value = "10")]
        timeout_secs: u64,
    },
}

impl CliConfig {
    /// Directory relative paths in the manifest are resolved against.
    pub fn base_dir(&self) -> PathBuf {
        match self.file.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
            _ => PathBuf::from("."),
        }
    }

    fn needs_manifest(&self) -> bool {
        !matches!(self.command, Command::Status { .. })
    }
}

impl Validate for CliConfig {
    fn validate(&self) -> Result<()> {
        if self.needs_manifest() {
            let file = self.file.to_string_lossy();
            validation::validate_path("file", &file)?;
            if !Path::new(&self.file).is_file() {
                return Err(StackError::ConfigError {
                    message: format!("manifest {} does not exist", self.file.display()),
                });
            }
        }

        if let Some(name) = &self.project_name {
            validation::validate_non_empty_string("project-name", name)?;
        }

        if let Command::Status { url, timeout_secs } = &self.command {
            validation::validate_url("url", url, &["http", "https"])?;
            validation::validate_positive_number("timeout-secs", *timeout_secs, 1)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_subcommands_and_global_flags() {
        let config =
            CliConfig::try_parse_from(["sai-stack", "down", "--volumes", "-f", "deploy/stack.yml"])
                .unwrap();
        assert_eq!(config.file, PathBuf::from("deploy/stack.yml"));
        assert_eq!(config.base_dir(), PathBuf::from("deploy"));
        assert!(matches!(
            config.command,
            Command::Down {
                volumes: true,
                dry_run: false
            }
        ));

        let config = CliConfig::try_parse_from(["sai-stack", "-p", "demo", "up", "--dry-run"])
            .unwrap();
        assert_eq!(config.project_name.as_deref(), Some("demo"));
        assert_eq!(config.base_dir(), PathBuf::from("."));
    }

    #[test]
    fn test_status_url_validation() {
        let config =
            CliConfig::try_parse_from(["sai-stack", "status", "--url", "ftp://backend"]).unwrap();
        assert!(config.validate().is_err());

        let config =
            CliConfig::try_parse_from(["sai-stack", "status", "--url", "http://localhost:8000"])
                .unwrap();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_missing_manifest_rejected() {
        let config =
            CliConfig::try_parse_from(["sai-stack", "validate", "-f", "/nonexistent/compose.yml"])
                .unwrap();
        assert!(config.validate().is_err());
    }
}
