//! Static checks over a compose manifest and the dependency graph derived from it.

use crate::domain::model::{ComposeManifest, MountKind, PortBinding, Protocol};
use crate::utils::error::{Result, StackError};
use crate::utils::validation::is_valid_name;
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet, VecDeque};
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Error)]
#[serde(tag = "issue", rename_all = "snake_case")]
pub enum TopologyIssue {
    #[error("{kind} name '{name}' is invalid")]
    InvalidName { kind: String, name: String },

    #[error("service '{service}' has neither an image nor a build recipe")]
    MissingImage { service: String },

    #[error("service '{service}' depends on undefined service '{dependency}'")]
    UnknownDependency { service: String, dependency: String },

    #[error("service '{service}' depends on itself")]
    SelfDependency { service: String },

    #[error("dependency cycle: {}", .cycle.join(" -> "))]
    DependencyCycle { cycle: Vec<String> },

    #[error("host port {host_ip}:{port}/{protocol} is claimed by more than one binding ({})", .services.join(", "))]
    PortConflict {
        host_ip: String,
        port: u16,
        protocol: Protocol,
        services: Vec<String>,
    },

    #[error("service '{service}' has an invalid port mapping: {reason}")]
    InvalidPort { service: String, reason: String },

    #[error("service '{service}' has an invalid volume mount: {reason}")]
    InvalidMount { service: String, reason: String },

    #[error("service '{service}' mounts undeclared volume '{volume}'")]
    UndeclaredVolume { service: String, volume: String },

    #[error("service '{service}' joins undeclared network '{network}'")]
    UndeclaredNetwork { service: String, network: String },
}

/// Collects every problem in the manifest instead of stopping at the first one.
pub fn check_manifest(manifest: &ComposeManifest) -> Vec<TopologyIssue> {
    let mut issues = Vec::new();

    check_names(manifest, &mut issues);

    let mut published: Vec<(String, PortBinding)> = Vec::new();

    for (name, service) in &manifest.services {
        if service.image.is_none() && service.build.is_none() {
            issues.push(TopologyIssue::MissingImage {
                service: name.clone(),
            });
        }

        for dependency in service.dependencies() {
            if &dependency == name {
                issues.push(TopologyIssue::SelfDependency {
                    service: name.clone(),
                });
            } else if !manifest.services.contains_key(&dependency) {
                issues.push(TopologyIssue::UnknownDependency {
                    service: name.clone(),
                    dependency,
                });
            }
        }

        for network in service.network_names() {
            if !manifest.declares_network(&network) {
                issues.push(TopologyIssue::UndeclaredNetwork {
                    service: name.clone(),
                    network,
                });
            }
        }

        match service.mounts() {
            Ok(mounts) => {
                for mount in mounts {
                    if mount.kind != MountKind::Named {
                        continue;
                    }
                    if let Some(volume) = mount.source {
                        if !manifest.declares_volume(&volume) {
                            issues.push(TopologyIssue::UndeclaredVolume {
                                service: name.clone(),
                                volume,
                            });
                        }
                    }
                }
            }
            Err(reason) => issues.push(TopologyIssue::InvalidMount {
                service: name.clone(),
                reason,
            }),
        }

        match service.port_bindings() {
            Ok(bindings) => published.extend(
                bindings
                    .into_iter()
                    .filter(|binding| binding.published.is_some())
                    .map(|binding| (name.clone(), binding)),
            ),
            Err(reason) => issues.push(TopologyIssue::InvalidPort {
                service: name.clone(),
                reason,
            }),
        }
    }

    issues.extend(find_port_conflicts(&published));
    issues.extend(find_cycles(manifest));
    issues
}

fn check_names(manifest: &ComposeManifest, issues: &mut Vec<TopologyIssue>) {
    let groups = [
        ("service", manifest.services.keys().collect::<Vec<_>>()),
        ("network", manifest.networks.keys().collect()),
        ("volume", manifest.volumes.keys().collect()),
    ];
    for (kind, names) in groups {
        for name in names {
            if !is_valid_name(name) {
                issues.push(TopologyIssue::InvalidName {
                    kind: kind.to_string(),
                    name: name.clone(),
                });
            }
        }
    }
}

fn find_port_conflicts(published: &[(String, PortBinding)]) -> Vec<TopologyIssue> {
    let mut conflicts: BTreeMap<(u16, Protocol, String), BTreeSet<String>> = BTreeMap::new();

    for (i, (left_service, left)) in published.iter().enumerate() {
        for (right_service, right) in &published[i + 1..] {
            if !left.collides_with(right) {
                continue;
            }
            let host_ip = match (left.specific_host_ip(), right.specific_host_ip()) {
                (Some(ip), Some(_)) => ip.to_string(),
                _ => "0.0.0.0".to_string(),
            };
            let port = left.published.unwrap_or_default();
            let entry = conflicts.entry((port, left.protocol, host_ip)).or_default();
            entry.insert(left_service.clone());
            entry.insert(right_service.clone());
        }
    }

    conflicts
        .into_iter()
        .map(|((port, protocol, host_ip), services)| TopologyIssue::PortConflict {
            host_ip,
            port,
            protocol,
            services: services.into_iter().collect(),
        })
        .collect()
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Mark {
    Visiting,
    Done,
}

fn known_dependencies(manifest: &ComposeManifest) -> BTreeMap<String, BTreeSet<String>> {
    manifest
        .services
        .iter()
        .map(|(name, service)| {
            let deps = service
                .dependencies()
                .into_iter()
                .filter(|dep| dep != name && manifest.services.contains_key(dep))
                .collect();
            (name.clone(), deps)
        })
        .collect()
}

fn find_cycles(manifest: &ComposeManifest) -> Vec<TopologyIssue> {
    let graph = known_dependencies(manifest);
    let mut marks: BTreeMap<&str, Mark> = BTreeMap::new();
    let mut stack: Vec<&str> = Vec::new();
    let mut cycles: BTreeSet<Vec<String>> = BTreeSet::new();

    fn visit<'a>(
        node: &'a str,
        graph: &'a BTreeMap<String, BTreeSet<String>>,
        marks: &mut BTreeMap<&'a str, Mark>,
        stack: &mut Vec<&'a str>,
        cycles: &mut BTreeSet<Vec<String>>,
    ) {
        marks.insert(node, Mark::Visiting);
        stack.push(node);

        if let Some(deps) = graph.get(node) {
            for dep in deps {
                match marks.get(dep.as_str()) {
                    Some(Mark::Visiting) => {
                        if let Some(start) = stack.iter().position(|n| *n == dep.as_str()) {
                            cycles.insert(normalize_cycle(&stack[start..]));
                        }
                    }
                    Some(Mark::Done) => {}
                    None => visit(dep, graph, marks, stack, cycles),
                }
            }
        }

        stack.pop();
        marks.insert(node, Mark::Done);
    }

    for node in graph.keys() {
        if !marks.contains_key(node.as_str()) {
            visit(node, &graph, &mut marks, &mut stack, &mut cycles);
        }
    }

    cycles
        .into_iter()
        .map(|cycle| TopologyIssue::DependencyCycle { cycle })
        .collect()
}

/// Rotates the cycle so it starts at its smallest member and closes the loop.
fn normalize_cycle(members: &[&str]) -> Vec<String> {
    let start = members
        .iter()
        .enumerate()
        .min_by_key(|(_, name)| **name)
        .map(|(index, _)| index)
        .unwrap_or(0);
    let mut cycle: Vec<String> = members[start..]
        .iter()
        .chain(members[..start].iter())
        .map(|name| name.to_string())
        .collect();
    if let Some(first) = cycle.first().cloned() {
        cycle.push(first);
    }
    cycle
}

/// A validated, acyclic service graph.
#[derive(Debug, Clone)]
pub struct Topology {
    dependencies: BTreeMap<String, BTreeSet<String>>,
    waves: Vec<Vec<String>>,
}

impl Topology {
    pub fn resolve(manifest: &ComposeManifest) -> Result<Self> {
        let issues = check_manifest(manifest);
        if !issues.is_empty() {
            return Err(StackError::Topology { issues });
        }

        let dependencies = known_dependencies(manifest);
        let mut placed: BTreeSet<String> = BTreeSet::new();
        let mut waves = Vec::new();

        while placed.len() < dependencies.len() {
            let wave: Vec<String> = dependencies
                .iter()
                .filter(|(name, _)| !placed.contains(*name))
                .filter(|(_, deps)| deps.iter().all(|dep| placed.contains(dep)))
                .map(|(name, _)| name.clone())
                .collect();

            // Unreachable once cycles are rejected above.
            if wave.is_empty() {
                return Err(StackError::validation("dependency graph did not converge"));
            }

            placed.extend(wave.iter().cloned());
            waves.push(wave);
        }

        Ok(Self {
            dependencies,
            waves,
        })
    }

    /// Services grouped by startup level; a wave only depends on earlier waves.
    pub fn waves(&self) -> &[Vec<String>] {
        &self.waves
    }

    pub fn start_order(&self) -> Vec<String> {
        self.waves.iter().flatten().cloned().collect()
    }

    pub fn stop_order(&self) -> Vec<String> {
        let mut order = self.start_order();
        order.reverse();
        order
    }

    pub fn dependencies_of(&self, service: &str) -> Vec<String> {
        self.dependencies
            .get(service)
            .map(|deps| deps.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Every service that directly or transitively depends on `service`.
    pub fn dependents_of(&self, service: &str) -> Vec<String> {
        let mut found = BTreeSet::new();
        let mut queue = VecDeque::from([service.to_string()]);

        while let Some(current) = queue.pop_front() {
            for (name, deps) in &self.dependencies {
                if deps.contains(&current) && found.insert(name.clone()) {
                    queue.push_back(name.clone());
                }
            }
        }

        found.into_iter().collect()
    }

    pub fn len(&self) -> usize {
        self.dependencies.len()
    }

    pub fn is_empty(&self) -> bool {
        self.dependencies.is_empty()
    }
}
