use crate::utils::error::{Result, StackError};
use crate::utils::validation::{self, Validate};
use percent_encoding::percent_decode_str;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;
use std::time::Duration;

pub const MONGO_SCHEMES: [&str; 2] = ["mongodb", "mongodb+srv"];
pub const REDIS_SCHEMES: [&str; 2] = ["redis", "rediss"];
/// One year, in minutes.
pub const MAX_JOB_INTERVAL_MINUTES: u64 = 525_600;

/// Settings of the backend container, read once when the process starts.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BackendSettings {
    pub mongo_uri: String,
    pub mongo_db_name: String,
    pub mongo_max_pool_size: u32,
    pub mongo_min_pool_size: u32,
    pub redis_uri: String,
    pub redis_password: Option<String>,
    pub redis_max_connections: u32,
    pub host: String,
    pub port: u16,
    pub connect_retries: u32,
    pub connect_retry_delay_secs: u64,
    pub connect_timeout_secs: u64,
    pub default_job_interval_minutes: u64,
}

impl Default for BackendSettings {
    fn default() -> Self {
        Self {
            mongo_uri: "mongodb://localhost:27017".to_string(),
            mongo_db_name: "sai".to_string(),
            mongo_max_pool_size: 100,
            mongo_min_pool_size: 10,
            redis_uri: "redis://localhost:6379".to_string(),
            redis_password: None,
            redis_max_connections: 10,
            host: "0.0.0.0".to_string(),
            port: 8000,
            connect_retries: 3,
            connect_retry_delay_secs: 5,
            connect_timeout_secs: 5,
            default_job_interval_minutes: 60,
        }
    }
}

fn parse_number<T: std::str::FromStr>(key: &str, raw: &str) -> Result<T> {
    raw.trim()
        .parse()
        .map_err(|_| StackError::InvalidConfigValueError {
            field: key.to_string(),
            value: raw.to_string(),
            reason: "expected a non-negative integer".to_string(),
        })
}

impl BackendSettings {
    /// Defaults overlaid with environment variables.
    pub fn from_env() -> Result<Self> {
        Self::default().with_overrides(|key| std::env::var(key).ok())
    }

    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(&path)?;
        Self::from_toml_str(&content)
    }

    pub fn from_toml_str(content: &str) -> Result<Self> {
        Ok(toml::from_str(content)?)
    }

    /// Environment wins over whatever the settings came from.
    pub fn with_overrides(mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let get = |key: &str| lookup(key).filter(|value| !value.is_empty());

        if let Some(value) = get("MONGO_URI") {
            self.mongo_uri = value;
        }
        if let Some(value) = get("MONGO_DB_NAME") {
            self.mongo_db_name = value;
        }
        if let Some(value) = get("MONGO_MAX_POOL_SIZE") {
            self.mongo_max_pool_size = parse_number("MONGO_MAX_POOL_SIZE", &value)?;
        }
        if let Some(value) = get("MONGO_MIN_POOL_SIZE") {
            self.mongo_min_pool_size = parse_number("MONGO_MIN_POOL_SIZE", &value)?;
        }
        if let Some(value) = get("REDIS_URI") {
            self.redis_uri = value;
        }
        if let Some(value) = get("REDIS_PASSWORD") {
            self.redis_password = Some(value);
        }
        if let Some(value) = get("REDIS_MAX_CONNECTIONS") {
            self.redis_max_connections = parse_number("REDIS_MAX_CONNECTIONS", &value)?;
        }
        if let Some(value) = get("BACKEND_HOST") {
            self.host = value;
        }
        if let Some(value) = get("BACKEND_PORT") {
            self.port = parse_number("BACKEND_PORT", &value)?;
        }
        if let Some(value) = get("CONNECT_RETRIES") {
            self.connect_retries = parse_number("CONNECT_RETRIES", &value)?;
        }
        if let Some(value) = get("CONNECT_RETRY_DELAY_SECS") {
            self.connect_retry_delay_secs = parse_number("CONNECT_RETRY_DELAY_SECS", &value)?;
        }
        if let Some(value) = get("CONNECT_TIMEOUT_SECS") {
            self.connect_timeout_secs = parse_number("CONNECT_TIMEOUT_SECS", &value)?;
        }
        if let Some(value) = get("DEFAULT_JOB_INTERVAL") {
            self.default_job_interval_minutes = parse_number("DEFAULT_JOB_INTERVAL", &value)?;
        }
        Ok(self)
    }

    pub fn socket_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn retry_delay(&self) -> Duration {
        Duration::from_secs(self.connect_retry_delay_secs)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    pub fn default_job_interval(&self) -> Duration {
        Duration::from_secs(self.default_job_interval_minutes.saturating_mul(60))
    }

    pub fn mongo_endpoint(&self) -> Result<StoreEndpoint> {
        StoreEndpoint::from_uri(StoreKind::Document, &self.mongo_uri)
    }

    pub fn redis_endpoint(&self) -> Result<StoreEndpoint> {
        StoreEndpoint::from_uri(StoreKind::KeyValue, &self.redis_uri)
    }

    /// Explicit `REDIS_PASSWORD` beats a password embedded in the URI.
    pub fn redis_credentials(&self, endpoint: &StoreEndpoint) -> Option<(Option<String>, String)> {
        match &self.redis_password {
            Some(password) => Some((endpoint.username.clone(), password.clone())),
            None => endpoint
                .password
                .clone()
                .map(|password| (endpoint.username.clone(), password)),
        }
    }
}

impl Validate for BackendSettings {
    fn validate(&self) -> Result<()> {
        // Seed lists (`a:1,b:2`) are not URLs; endpoint parsing checks the first host.
        StoreEndpoint::from_uri(StoreKind::Document, &self.mongo_uri)?;
        validation::validate_url("REDIS_URI", &self.redis_uri, &REDIS_SCHEMES)?;
        validation::validate_non_empty_string("MONGO_DB_NAME", &self.mongo_db_name)?;
        validation::validate_non_empty_string("BACKEND_HOST", &self.host)?;
        validation::validate_range("BACKEND_PORT", u64::from(self.port), 1, 65535)?;
        validation::validate_positive_number(
            "MONGO_MAX_POOL_SIZE",
            u64::from(self.mongo_max_pool_size),
            1,
        )?;
        validation::validate_positive_number(
            "REDIS_MAX_CONNECTIONS",
            u64::from(self.redis_max_connections),
            1,
        )?;
        validation::validate_positive_number("CONNECT_RETRIES", u64::from(self.connect_retries), 1)?;
        validation::validate_positive_number("CONNECT_TIMEOUT_SECS", self.connect_timeout_secs, 1)?;
        validation::validate_range(
            "DEFAULT_JOB_INTERVAL",
            self.default_job_interval_minutes,
            1,
            MAX_JOB_INTERVAL_MINUTES,
        )?;

        if self.mongo_min_pool_size > self.mongo_max_pool_size {
            return Err(StackError::InvalidConfigValueError {
                field: "MONGO_MIN_POOL_SIZE".to_string(),
                value: self.mongo_min_pool_size.to_string(),
                reason: format!(
                    "must not exceed MONGO_MAX_POOL_SIZE ({})",
                    self.mongo_max_pool_size
                ),
            });
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreKind {
    KeyValue,
    Document,
}

impl StoreKind {
    pub fn default_port(self) -> u16 {
        match self {
            Self::KeyValue => 6379,
            Self::Document => 27017,
        }
    }
}

impl fmt::Display for StoreKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::KeyValue => f.write_str("key-value store"),
            Self::Document => f.write_str("document store"),
        }
    }
}

/// Where a store lives, parsed from its connection URI.
#[derive(Clone, PartialEq, Eq)]
pub struct StoreEndpoint {
    pub kind: StoreKind,
    pub host: String,
    pub port: u16,
    pub username: Option<String>,
    pub password: Option<String>,
    pub database: Option<String>,
    pub tls: bool,
}

// Keeps credentials out of `{:?}` output.
impl fmt::Debug for StoreEndpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StoreEndpoint")
            .field("kind", &self.kind)
            .field("host", &self.host)
            .field("port", &self.port)
            .field("username", &self.username)
            .field("password", &self.password.as_ref().map(|_| "***"))
            .field("database", &self.database)
            .field("tls", &self.tls)
            .finish()
    }
}

impl fmt::Display for StoreEndpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

/// `mongodb://u:p@a:1,b:2/db` becomes `mongodb://u:p@a:1/db`.
fn first_seed_host(uri: &str) -> String {
    let Some((scheme, rest)) = uri.split_once("://") else {
        return uri.to_string();
    };
    let authority_end = rest.find(['/', '?']).unwrap_or(rest.len());
    let (authority, tail) = rest.split_at(authority_end);
    let (credentials, hosts) = match authority.rsplit_once('@') {
        Some((credentials, hosts)) => (Some(credentials), hosts),
        None => (None, authority),
    };
    let first = hosts.split(',').next().unwrap_or(hosts);
    match credentials {
        Some(credentials) => format!("{}://{}@{}{}", scheme, credentials, first, tail),
        None => format!("{}://{}{}", scheme, first, tail),
    }
}

/// Percent-decodes a URI user-info component.
fn decode(component: &str) -> String {
    percent_decode_str(component).decode_utf8_lossy().into_owned()
}

impl StoreEndpoint {
    pub fn from_uri(kind: StoreKind, uri: &str) -> Result<Self> {
        let field = match kind {
            StoreKind::KeyValue => "REDIS_URI",
            StoreKind::Document => "MONGO_URI",
        };
        let normalized = match kind {
            StoreKind::Document => first_seed_host(uri),
            StoreKind::KeyValue => uri.to_string(),
        };
        let schemes: &[&str] = match kind {
            StoreKind::KeyValue => &REDIS_SCHEMES,
            StoreKind::Document => &MONGO_SCHEMES,
        };

        let url = validation::validate_url(field, &normalized, schemes)?;
        let host = url
            .host_str()
            .filter(|host| !host.is_empty())
            .ok_or_else(|| StackError::InvalidConfigValueError {
                field: field.to_string(),
                value: validation::redact(uri),
                reason: "URI has no host".to_string(),
            })?
            .trim_start_matches('[')
            .trim_end_matches(']')
            .to_string();

        let username = Some(decode(url.username())).filter(|u| !u.is_empty());
        let password = url.password().map(decode);
        let database = Some(url.path().trim_start_matches('/').to_string()).filter(|d| !d.is_empty());

        Ok(Self {
            kind,
            host,
            port: url.port().unwrap_or(kind.default_port()),
            username,
            password,
            database,
            tls: matches!(url.scheme(), "rediss" | "mongodb+srv")
                || url.query_pairs().any(|(k, v)| (k == "tls" || k == "ssl") && v == "true"),
        })
    }
}
