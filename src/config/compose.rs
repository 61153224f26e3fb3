use crate::core::topology::check_manifest;
use crate::domain::model::ComposeManifest;
use crate::utils::error::{Result, StackError};
use crate::utils::validation::Validate;
use regex::{Captures, Regex};
use std::path::Path;
use std::sync::OnceLock;

fn variable_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(
            r"\$(?:(\$)|\{([A-Za-z_][A-Za-z0-9_]*)(?:(:?-)([^}]*))?\}|([A-Za-z_][A-Za-z0-9_]*))",
        )
        .expect("interpolation pattern is a valid regex")
    })
}

/// Expands `${VAR}`, `${VAR:-default}`, `${VAR-default}`, `$VAR` and `$$`.
pub fn interpolate(content: &str, lookup: &dyn Fn(&str) -> Option<String>) -> String {
    variable_pattern()
        .replace_all(content, |caps: &Captures| {
            if caps.get(1).is_some() {
                return "$".to_string();
            }

            let name = caps
                .get(2)
                .or_else(|| caps.get(5))
                .map(|m| m.as_str())
                .unwrap_or_default();
            let value = lookup(name);

            match (caps.get(3).map(|m| m.as_str()), caps.get(4)) {
                (Some(":-"), Some(default)) => value
                    .filter(|v| !v.is_empty())
                    .unwrap_or_else(|| default.as_str().to_string()),
                (Some("-"), Some(default)) => {
                    value.unwrap_or_else(|| default.as_str().to_string())
                }
                _ => value.unwrap_or_else(|| {
                    tracing::warn!(
                        "⚠️ The \"{}\" variable is not set. Defaulting to a blank string.",
                        name
                    );
                    String::new()
                }),
            }
        })
        .into_owned()
}

impl ComposeManifest {
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        tracing::debug!("📄 Loading compose manifest from {}", path.display());
        let content = std::fs::read_to_string(path).map_err(|e| StackError::ConfigError {
            message: format!("cannot read {}: {}", path.display(), e),
        })?;
        Self::from_yaml_str(&content)
    }

    pub fn from_yaml_str(content: &str) -> Result<Self> {
        Self::from_yaml_str_with(content, &|name| std::env::var(name).ok())
    }

    pub fn from_yaml_str_with(
        content: &str,
        lookup: &dyn Fn(&str) -> Option<String>,
    ) -> Result<Self> {
        let processed = interpolate(content, lookup);
        let manifest: ComposeManifest = serde_yaml::from_str(&processed)?;
        if manifest.services.is_empty() {
            return Err(StackError::ConfigError {
                message: "manifest declares no services".to_string(),
            });
        }
        Ok(manifest)
    }
}

impl Validate for ComposeManifest {
    fn validate(&self) -> Result<()> {
        let issues = check_manifest(self);
        if issues.is_empty() {
            Ok(())
        } else {
            Err(StackError::Topology { issues })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn env(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_interpolation_forms() {
        let lookup = env(&[("TAG", "7"), ("EMPTY", "")]);
        assert_eq!(interpolate("mongo:${TAG}", &lookup), "mongo:7");
        assert_eq!(interpolate("mongo:$TAG", &lookup), "mongo:7");
        assert_eq!(interpolate("${EMPTY:-fallback}", &lookup), "fallback");
        assert_eq!(interpolate("${EMPTY-fallback}", &lookup), "");
        assert_eq!(interpolate("${MISSING-fallback}", &lookup), "fallback");
        assert_eq!(interpolate("${MISSING}", &lookup), "");
        assert_eq!(interpolate("price: $$5", &lookup), "price: $5");
    }

    #[test]
    fn test_load_from_file() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"
services:
  redis:
    image: redis:alpine
    ports:
      - "6379:6379"
"#
        )
        .unwrap();

        let manifest = ComposeManifest::from_file(file.path()).unwrap();
        assert!(manifest.service("redis").is_some());
        assert!(manifest.validate().is_ok());
    }

    #[test]
    fn test_missing_file_is_config_error() {
        let err = ComposeManifest::from_file("/nonexistent/docker-compose.yml").unwrap_err();
        assert!(matches!(err, StackError::ConfigError { .. }));
    }

    #[test]
    fn test_empty_manifest_rejected() {
        let err = ComposeManifest::from_yaml_str_with("services: {}\n", &|_| None).unwrap_err();
        assert!(matches!(err, StackError::ConfigError { .. }));
    }

    #[test]
    fn test_validate_reports_topology_issues() {
        let yaml = r#"
services:
  backend:
    image: sai-backend
    depends_on: [mongo]
"#;
        let manifest = ComposeManifest::from_yaml_str_with(yaml, &|_| None).unwrap();
        match manifest.validate() {
            Err(StackError::Topology { issues }) => assert_eq!(issues.len(), 1),
            other => panic!("expected topology error, got {:?}", other),
        }
    }
}
