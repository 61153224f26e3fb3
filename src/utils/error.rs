use crate::core::topology::TopologyIssue;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum StackError {
    #[error("HTTP request failed: {0}")]
    HttpError(#[from] reqwest::Error),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Manifest parsing error: {0}")]
    YamlError(#[from] serde_yaml::Error),

    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    #[error("TOML parsing error: {0}")]
    TomlError(#[from] toml::de::Error),

    #[error("Document store error: {0}")]
    DocumentStoreError(#[from] mongodb::error::Error),

    #[error("Schedule error: {0}")]
    ScheduleError(#[from] cron::error::Error),

    #[error("Configuration error: {message}")]
    ConfigError { message: String },

    #[error("Invalid value for {field} ({value}): {reason}")]
    InvalidConfigValueError {
        field: String,
        value: String,
        reason: String,
    },

    #[error("Invalid topology: {}", format_issues(.issues))]
    Topology { issues: Vec<TopologyIssue> },

    #[error("Image build failed for service '{service}': {message}")]
    BuildFailed { service: String, message: String },

    #[error("Runtime operation '{operation}' failed: {message}")]
    RuntimeError { operation: String, message: String },

    #[error("Could not connect to {store} after {attempts} attempt(s): {message}")]
    ConnectionError {
        store: String,
        attempts: u32,
        message: String,
    },

    #[error("Protocol error: {message}")]
    ProtocolError { message: String },

    #[error("Operation timed out: {operation}")]
    TimeoutError { operation: String },

    #[error("Validation error: {message}")]
    ValidationError { message: String },
}

fn format_issues(issues: &[TopologyIssue]) -> String {
    issues
        .iter()
        .map(|issue| issue.to_string())
        .collect::<Vec<_>>()
        .join("; ")
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    Configuration,
    Topology,
    Runtime,
    Network,
    Data,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ErrorSeverity {
    Low,
    Medium,
    High,
    Critical,
}

impl StackError {
    pub fn runtime(operation: impl Into<String>, message: impl Into<String>) -> Self {
        Self::RuntimeError {
            operation: operation.into(),
            message: message.into(),
        }
    }

    pub fn protocol(message: impl Into<String>) -> Self {
        Self::ProtocolError {
            message: message.into(),
        }
    }

    pub fn validation(message: impl Into<String>) -> Self {
        Self::ValidationError {
            message: message.into(),
        }
    }

    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::ConfigError { .. }
            | Self::InvalidConfigValueError { .. }
            | Self::YamlError(_)
            | Self::TomlError(_) => ErrorCategory::Configuration,
            Self::Topology { .. } => ErrorCategory::Topology,
            Self::BuildFailed { .. } | Self::RuntimeError { .. } | Self::IoError(_) => {
                ErrorCategory::Runtime
            }
            Self::HttpError(_)
            | Self::DocumentStoreError(_)
            | Self::ConnectionError { .. }
            | Self::ProtocolError { .. }
            | Self::TimeoutError { .. } => ErrorCategory::Network,
            Self::ScheduleError(_) => ErrorCategory::Configuration,
            Self::SerializationError(_) | Self::ValidationError { .. } => ErrorCategory::Data,
        }
    }

    pub fn severity(&self) -> ErrorSeverity {
        match self {
            Self::ValidationError { .. } => ErrorSeverity::Low,
            Self::HttpError(_)
            | Self::DocumentStoreError(_)
            | Self::ConnectionError { .. }
            | Self::ProtocolError { .. }
            | Self::TimeoutError { .. } => ErrorSeverity::Medium,
            Self::ConfigError { .. }
            | Self::InvalidConfigValueError { .. }
            | Self::YamlError(_)
            | Self::TomlError(_)
            | Self::ScheduleError(_)
            | Self::SerializationError(_)
            | Self::Topology { .. } => ErrorSeverity::High,
            Self::BuildFailed { .. } | Self::RuntimeError { .. } | Self::IoError(_) => {
                ErrorSeverity::Critical
            }
        }
    }

    /// Process exit code for the CLI, derived from severity.
    pub fn exit_code(&self) -> i32 {
        match self.severity() {
            ErrorSeverity::Low | ErrorSeverity::High => 1,
            ErrorSeverity::Medium => 2,
            ErrorSeverity::Critical => 3,
        }
    }

    pub fn recovery_suggestion(&self) -> &'static str {
        match self {
            Self::YamlError(_) => "Check the manifest for YAML syntax errors and unsupported field shapes",
            Self::TomlError(_) => "Check the settings file for TOML syntax errors",
            Self::ConfigError { .. }
            | Self::InvalidConfigValueError { .. } => {
                "Review the environment variables and configuration values"
            }
            Self::Topology { .. } => {
                "Fix depends_on references, port mappings, and volume/network declarations in the manifest"
            }
            Self::BuildFailed { .. } => "Inspect the build output; no container was started",
            Self::RuntimeError { .. } => "Make sure the container runtime is installed and running",
            Self::ConnectionError { .. } => {
                "Verify the store is running and the connection URI and credentials are correct"
            }
            Self::HttpError(_) => "Verify the backend is reachable at the given URL",
            Self::DocumentStoreError(_) => {
                "Verify MONGO_URI, the credentials and that the document store is running"
            }
            Self::ScheduleError(_) => {
                "Use a five-field crontab expression or six fields with seconds first"
            }
            Self::ProtocolError { .. } => "Verify the server speaks the expected protocol version",
            Self::TimeoutError { .. } => "Retry the operation or raise the timeout",
            Self::IoError(_) => "Check file paths and permissions",
            Self::SerializationError(_) | Self::ValidationError { .. } => {
                "Check the data passed to the operation"
            }
        }
    }

    pub fn user_friendly_message(&self) -> String {
        match self {
            Self::Topology { issues } => {
                let mut message = format!("The manifest has {} problem(s):", issues.len());
                for issue in issues {
                    message.push_str("\n  - ");
                    message.push_str(&issue.to_string());
                }
                message
            }
            Self::BuildFailed { service, .. } => {
                format!("Building the image for '{}' failed", service)
            }
            Self::ConnectionError { store, .. } => format!("Cannot reach the {}", store),
            other => other.to_string(),
        }
    }
}

pub type Result<T> = std::result::Result<T, StackError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_severity_drives_exit_code() {
        let config = StackError::ConfigError {
            message: "bad".to_string(),
        };
        assert_eq!(config.exit_code(), 1);

        let connection = StackError::ConnectionError {
            store: "key-value store".to_string(),
            attempts: 3,
            message: "refused".to_string(),
        };
        assert_eq!(connection.severity(), ErrorSeverity::Medium);
        assert_eq!(connection.exit_code(), 2);

        let build = StackError::BuildFailed {
            service: "frontend".to_string(),
            message: "npm run build exited with 1".to_string(),
        };
        assert_eq!(build.category(), ErrorCategory::Runtime);
        assert_eq!(build.exit_code(), 3);
    }

    #[test]
    fn test_topology_message_lists_every_issue() {
        let error = StackError::Topology {
            issues: vec![
                TopologyIssue::SelfDependency {
                    service: "backend".to_string(),
                },
                TopologyIssue::MissingImage {
                    service: "worker".to_string(),
                },
            ],
        };

        let message = error.user_friendly_message();
        assert!(message.contains("2 problem(s)"));
        assert!(message.contains("backend"));
        assert!(message.contains("worker"));
    }
}
