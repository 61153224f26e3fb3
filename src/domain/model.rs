use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Network every service joins when it declares none.
pub const DEFAULT_NETWORK: &str = "default";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ComposeManifest {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub services: BTreeMap<String, ServiceSpec>,
    #[serde(default)]
    pub networks: BTreeMap<String, Option<NetworkSpec>>,
    #[serde(default)]
    pub volumes: BTreeMap<String, Option<VolumeSpec>>,
}

impl ComposeManifest {
    pub fn service(&self, name: &str) -> Option<&ServiceSpec> {
        self.services.get(name)
    }

    /// Declared networks plus the implicit default one.
    pub fn network_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.networks.keys().cloned().collect();
        let uses_default = self
            .services
            .values()
            .any(|service| service.network_names().iter().any(|n| n == DEFAULT_NETWORK));
        if uses_default && !self.networks.contains_key(DEFAULT_NETWORK) {
            names.push(DEFAULT_NETWORK.to_string());
        }
        names.sort();
        names
    }

    pub fn declares_network(&self, name: &str) -> bool {
        name == DEFAULT_NETWORK || self.networks.contains_key(name)
    }

    pub fn declares_volume(&self, name: &str) -> bool {
        self.volumes.contains_key(name)
    }

    pub fn network_spec(&self, name: &str) -> NetworkSpec {
        self.networks
            .get(name)
            .cloned()
            .flatten()
            .unwrap_or_default()
    }

    pub fn volume_spec(&self, name: &str) -> VolumeSpec {
        self.volumes.get(name).cloned().flatten().unwrap_or_default()
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ServiceSpec {
    #[serde(default)]
    pub image: Option<String>,
    #[serde(default)]
    pub build: Option<BuildSpec>,
    #[serde(default)]
    pub container_name: Option<String>,
    #[serde(default)]
    pub command: Option<CommandSpec>,
    #[serde(default)]
    pub ports: Vec<PortSpec>,
    #[serde(default)]
    pub environment: EnvironmentSpec,
    #[serde(default)]
    pub depends_on: DependsOnSpec,
    #[serde(default)]
    pub volumes: Vec<VolumeMountSpec>,
    #[serde(default)]
    pub networks: ServiceNetworks,
}

impl ServiceSpec {
    pub fn dependencies(&self) -> Vec<String> {
        self.depends_on.names()
    }

    pub fn network_names(&self) -> Vec<String> {
        self.networks.names()
    }

    pub fn port_bindings(&self) -> Result<Vec<PortBinding>, String> {
        let mut bindings = Vec::new();
        for port in &self.ports {
            bindings.extend(port.bindings()?);
        }
        Ok(bindings)
    }

    pub fn mounts(&self) -> Result<Vec<VolumeMount>, String> {
        self.volumes.iter().map(VolumeMountSpec::mount).collect()
    }
}

/// A YAML scalar as it may appear in `environment` maps or build args.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ScalarValue {
    Bool(bool),
    Integer(i64),
    Float(f64),
    String(String),
}

impl fmt::Display for ScalarValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Bool(value) => write!(f, "{}", value),
            Self::Integer(value) => write!(f, "{}", value),
            Self::Float(value) => write!(f, "{}", value),
            Self::String(value) => f.write_str(value),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum BuildSpec {
    Context(String),
    Detailed {
        context: String,
        #[serde(default)]
        dockerfile: Option<String>,
        #[serde(default)]
        args: BTreeMap<String, ScalarValue>,
    },
}

impl BuildSpec {
    pub fn context(&self) -> &str {
        match self {
            Self::Context(context) => context,
            Self::Detailed { context, .. } => context,
        }
    }

    pub fn dockerfile(&self) -> Option<&str> {
        match self {
            Self::Context(_) => None,
            Self::Detailed { dockerfile, .. } => dockerfile.as_deref(),
        }
    }

    pub fn args(&self) -> BTreeMap<String, String> {
        match self {
            Self::Context(_) => BTreeMap::new(),
            Self::Detailed { args, .. } => args
                .iter()
                .map(|(key, value)| (key.clone(), value.to_string()))
                .collect(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum CommandSpec {
    Shell(String),
    Exec(Vec<String>),
}

impl CommandSpec {
    /// Shell form is split on whitespace; quoting is not interpreted.
    pub fn to_args(&self) -> Vec<String> {
        match self {
            Self::Shell(line) => line.split_whitespace().map(str::to_string).collect(),
            Self::Exec(args) => args.clone(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Protocol {
    Tcp,
    Udp,
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Tcp => f.write_str("tcp"),
            Self::Udp => f.write_str("udp"),
        }
    }
}

impl Protocol {
    fn parse(value: &str) -> Result<Self, String> {
        match value.to_ascii_lowercase().as_str() {
            "tcp" => Ok(Self::Tcp),
            "udp" => Ok(Self::Udp),
            other => Err(format!("unsupported protocol '{}'", other)),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PortSpec {
    Number(u16),
    Short(String),
    Long {
        target: u16,
        #[serde(default)]
        published: Option<ScalarValue>,
        #[serde(default)]
        host_ip: Option<String>,
        #[serde(default)]
        protocol: Option<String>,
    },
}

/// One container port, optionally published on the host.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PortBinding {
    pub host_ip: Option<String>,
    pub published: Option<u16>,
    pub target: u16,
    pub protocol: Protocol,
}

impl PortBinding {
    /// `None` when bound on every interface.
    pub fn specific_host_ip(&self) -> Option<&str> {
        match self.host_ip.as_deref() {
            None | Some("") | Some("0.0.0.0") | Some("::") => None,
            Some(ip) => Some(ip),
        }
    }

    /// Two published bindings fight over the same host socket.
    pub fn collides_with(&self, other: &PortBinding) -> bool {
        if self.published.is_none()
            || self.published != other.published
            || self.protocol != other.protocol
        {
            return false;
        }
        match (self.specific_host_ip(), other.specific_host_ip()) {
            (Some(left), Some(right)) => left == right,
            _ => true,
        }
    }
}

impl fmt::Display for PortBinding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.host_ip {
            Some(ip) if ip.contains(':') => write!(f, "[{}]:", ip)?,
            Some(ip) => write!(f, "{}:", ip)?,
            None => {}
        }
        match (self.published, &self.host_ip) {
            (Some(published), _) => write!(f, "{}:", published)?,
            (None, Some(_)) => write!(f, ":")?,
            (None, None) => {}
        }
        write!(f, "{}/{}", self.target, self.protocol)
    }
}

impl PortSpec {
    pub fn bindings(&self) -> Result<Vec<PortBinding>, String> {
        match self {
            Self::Number(target) => Ok(vec![PortBinding {
                host_ip: None,
                published: None,
                target: *target,
                protocol: Protocol::Tcp,
            }]),
            Self::Short(spec) => parse_short_port(spec),
            Self::Long {
                target,
                published,
                host_ip,
                protocol,
            } => {
                let published = match published {
                    None => None,
                    Some(value) => Some(parse_port(&value.to_string())?),
                };
                let protocol = match protocol {
                    Some(protocol) => Protocol::parse(protocol)?,
                    None => Protocol::Tcp,
                };
                Ok(vec![PortBinding {
                    host_ip: host_ip.clone(),
                    published,
                    target: *target,
                    protocol,
                }])
            }
        }
    }
}

fn parse_port(value: &str) -> Result<u16, String> {
    let port: u16 = value
        .trim()
        .parse()
        .map_err(|_| format!("'{}' is not a valid port number", value))?;
    if port == 0 {
        return Err("port 0 cannot be mapped".to_string());
    }
    Ok(port)
}

fn parse_port_range(value: &str) -> Result<(u16, u16), String> {
    match value.split_once('-') {
        Some((start, end)) => {
            let start = parse_port(start)?;
            let end = parse_port(end)?;
            if end < start {
                return Err(format!("port range '{}' is reversed", value));
            }
            Ok((start, end))
        }
        None => {
            let port = parse_port(value)?;
            Ok((port, port))
        }
    }
}

fn parse_short_port(spec: &str) -> Result<Vec<PortBinding>, String> {
    let (mapping, protocol) = match spec.rsplit_once('/') {
        Some((mapping, protocol)) => (mapping, Protocol::parse(protocol)?),
        None => (spec, Protocol::Tcp),
    };

    // Bracketed IPv6 host addresses contain colons of their own.
    let (host_ip, rest) = if let Some(stripped) = mapping.strip_prefix('[') {
        let (ip, rest) = stripped
            .split_once("]:")
            .ok_or_else(|| format!("malformed IPv6 port mapping '{}'", spec))?;
        (Some(ip.to_string()), rest)
    } else {
        (None, mapping)
    };

    let parts: Vec<&str> = rest.split(':').collect();
    let (host_ip, published, target) = match (host_ip, parts.as_slice()) {
        (None, [target]) => (None, None, *target),
        (None, [published, target]) => (None, Some(*published), *target),
        (None, [ip, published, target]) => (Some(ip.to_string()), Some(*published), *target),
        (Some(ip), [published, target]) => (Some(ip), Some(*published), *target),
        _ => return Err(format!("malformed port mapping '{}'", spec)),
    };
    let published = published.filter(|p| !p.is_empty());

    let (target_start, target_end) = parse_port_range(target)?;
    let target_len = target_end - target_start;

    let published_ports: Vec<Option<u16>> = match published {
        None => vec![None; usize::from(target_len) + 1],
        Some(published) => {
            let (start, end) = parse_port_range(published)?;
            if end - start != target_len {
                return Err(format!(
                    "published range and target range in '{}' differ in length",
                    spec
                ));
            }
            (start..=end).map(Some).collect()
        }
    };

    Ok((target_start..=target_end)
        .zip(published_ports)
        .map(|(target, published)| PortBinding {
            host_ip: host_ip.clone(),
            published,
            target,
            protocol,
        })
        .collect())
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum EnvironmentSpec {
    List(Vec<String>),
    Map(BTreeMap<String, Option<ScalarValue>>),
}

impl Default for EnvironmentSpec {
    fn default() -> Self {
        Self::List(Vec::new())
    }
}

/// `value: None` means the key is inherited from the orchestrator's environment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnvBinding {
    pub key: String,
    pub value: Option<String>,
}

impl EnvironmentSpec {
    pub fn bindings(&self) -> Vec<EnvBinding> {
        match self {
            Self::List(entries) => entries
                .iter()
                .map(|entry| match entry.split_once('=') {
                    Some((key, value)) => EnvBinding {
                        key: key.to_string(),
                        value: Some(value.to_string()),
                    },
                    None => EnvBinding {
                        key: entry.clone(),
                        value: None,
                    },
                })
                .collect(),
            Self::Map(entries) => entries
                .iter()
                .map(|(key, value)| EnvBinding {
                    key: key.clone(),
                    value: value.as_ref().map(ScalarValue::to_string),
                })
                .collect(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DependencyCondition {
    #[serde(default)]
    pub condition: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum DependsOnSpec {
    List(Vec<String>),
    Map(BTreeMap<String, DependencyCondition>),
}

impl Default for DependsOnSpec {
    fn default() -> Self {
        Self::List(Vec::new())
    }
}

impl DependsOnSpec {
    pub fn names(&self) -> Vec<String> {
        match self {
            Self::List(names) => names.clone(),
            Self::Map(entries) => entries.keys().cloned().collect(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MountKind {
    Named,
    Bind,
    Anonymous,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VolumeMount {
    pub kind: MountKind,
    pub source: Option<String>,
    pub target: String,
    pub read_only: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum VolumeMountSpec {
    Short(String),
    Long {
        #[serde(rename = "type", default)]
        kind: Option<String>,
        #[serde(default)]
        source: Option<String>,
        target: String,
        #[serde(default)]
        read_only: bool,
    },
}

fn is_bind_source(source: &str) -> bool {
    source.starts_with('.') || source.starts_with('/') || source.starts_with('~')
}

impl VolumeMountSpec {
    pub fn mount(&self) -> Result<VolumeMount, String> {
        match self {
            Self::Short(spec) => {
                let parts: Vec<&str> = spec.split(':').collect();
                let (source, target, mode) = match parts.as_slice() {
                    [target] => (None, *target, None),
                    [source, target] => (Some(*source), *target, None),
                    [source, target, mode] => (Some(*source), *target, Some(*mode)),
                    _ => return Err(format!("malformed volume mount '{}'", spec)),
                };
                if target.is_empty() {
                    return Err(format!("volume mount '{}' has no container path", spec));
                }
                let read_only = mode
                    .map(|mode| mode.split(',').any(|flag| flag == "ro"))
                    .unwrap_or(false);
                let kind = match source {
                    None => MountKind::Anonymous,
                    Some(source) if is_bind_source(source) => MountKind::Bind,
                    Some(_) => MountKind::Named,
                };
                Ok(VolumeMount {
                    kind,
                    source: source.map(str::to_string),
                    target: target.to_string(),
                    read_only,
                })
            }
            Self::Long {
                kind,
                source,
                target,
                read_only,
            } => {
                let kind = match (kind.as_deref(), source.as_deref()) {
                    (Some("bind"), _) => MountKind::Bind,
                    (Some("volume"), Some(_)) => MountKind::Named,
                    (Some("volume"), None) => MountKind::Anonymous,
                    (Some(other), _) => return Err(format!("unsupported mount type '{}'", other)),
                    (None, None) => MountKind::Anonymous,
                    (None, Some(source)) if is_bind_source(source) => MountKind::Bind,
                    (None, Some(_)) => MountKind::Named,
                };
                Ok(VolumeMount {
                    kind,
                    source: source.clone(),
                    target: target.clone(),
                    read_only: *read_only,
                })
            }
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ServiceNetworkConfig {
    #[serde(default)]
    pub aliases: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ServiceNetworks {
    List(Vec<String>),
    Map(BTreeMap<String, Option<ServiceNetworkConfig>>),
}

impl Default for ServiceNetworks {
    fn default() -> Self {
        Self::List(Vec::new())
    }
}

impl ServiceNetworks {
    pub fn names(&self) -> Vec<String> {
        let names: Vec<String> = match self {
            Self::List(names) => names.clone(),
            Self::Map(entries) => entries.keys().cloned().collect(),
        };
        if names.is_empty() {
            vec![DEFAULT_NETWORK.to_string()]
        } else {
            names
        }
    }

    pub fn aliases(&self, network: &str) -> Vec<String> {
        match self {
            Self::List(_) => Vec::new(),
            Self::Map(entries) => entries
                .get(network)
                .cloned()
                .flatten()
                .map(|config| config.aliases)
                .unwrap_or_default(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NetworkSpec {
    #[serde(default)]
    pub driver: Option<String>,
    #[serde(default)]
    pub external: bool,
    #[serde(default)]
    pub name: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct VolumeSpec {
    #[serde(default)]
    pub driver: Option<String>,
    #[serde(default)]
    pub external: bool,
    #[serde(default)]
    pub name: Option<String>,
}
