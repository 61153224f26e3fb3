use sai_stack::core::topology::{check_manifest, Topology, TopologyIssue};
use sai_stack::utils::validation::Validate;
use sai_stack::{ComposeManifest, StackError};
use std::path::Path;

fn manifest(yaml: &str) -> ComposeManifest {
    ComposeManifest::from_yaml_str_with(yaml, &|_| None).unwrap()
}

fn fixture() -> ComposeManifest {
    let path = Path::new(env!("CARGO_MANIFEST_DIR")).join("deploy/docker-compose.yml");
    ComposeManifest::from_file(path).unwrap()
}

#[test]
fn test_shipped_manifest_is_valid() {
    let manifest = fixture();
    assert!(manifest.validate().is_ok());

    let topology = Topology::resolve(&manifest).unwrap();
    assert_eq!(
        topology.waves(),
        &[
            vec!["mongo".to_string(), "redis".to_string()],
            vec!["backend".to_string()],
            vec!["frontend".to_string()],
        ]
    );
    assert_eq!(
        topology.stop_order(),
        vec!["frontend", "backend", "redis", "mongo"]
    );
    assert_eq!(topology.dependents_of("mongo"), vec!["backend", "frontend"]);
}

#[test]
fn test_every_dependency_starts_first() {
    let topology = Topology::resolve(&fixture()).unwrap();
    let order = topology.start_order();
    let position = |name: &str| order.iter().position(|s| s == name).unwrap();

    for service in &order {
        for dependency in topology.dependencies_of(service) {
            assert!(
                position(&dependency) < position(service),
                "{} must start before {}",
                dependency,
                service
            );
        }
    }
}

#[test]
fn test_unknown_dependency_is_reported() {
    let manifest = manifest(
        r#"
services:
  backend:
    image: sai-backend
    depends_on:
      - mongo
      - cache
  mongo:
    image: mongo:7
"#,
    );

    let issues = check_manifest(&manifest);
    assert_eq!(
        issues,
        vec![TopologyIssue::UnknownDependency {
            service: "backend".to_string(),
            dependency: "cache".to_string(),
        }]
    );
}

#[test]
fn test_conflicting_host_ports_are_reported() {
    let manifest = manifest(
        r#"
services:
  backend:
    image: sai-backend
    ports: ["8000:8000"]
  admin:
    image: sai-admin
    ports: ["127.0.0.1:8000:80"]
  metrics:
    image: sai-metrics
    ports: ["8000:8000/udp"]
"#,
    );

    let issues = check_manifest(&manifest);
    assert_eq!(issues.len(), 1, "unexpected issues: {:?}", issues);
    match &issues[0] {
        TopologyIssue::PortConflict { port, services, .. } => {
            assert_eq!(*port, 8000);
            assert_eq!(services, &vec!["admin".to_string(), "backend".to_string()]);
        }
        other => panic!("expected a port conflict, got {:?}", other),
    }
}

#[test]
fn test_distinct_host_ips_do_not_conflict() {
    let manifest = manifest(
        r#"
services:
  a:
    image: nginx
    ports: ["127.0.0.1:8080:80"]
  b:
    image: nginx
    ports: ["127.0.0.2:8080:80"]
"#,
    );
    assert!(check_manifest(&manifest).is_empty());
}

#[test]
fn test_all_issues_collected_at_once() {
    let manifest = manifest(
        r#"
services:
  backend:
    depends_on: [frontend]
    volumes:
      - data:/var/lib/sai
    networks: [private]
  frontend:
    image: sai-frontend
    depends_on: [backend]
"#,
    );

    let err = Topology::resolve(&manifest).unwrap_err();
    let StackError::Topology { issues } = err else {
        panic!("expected a topology error");
    };

    assert!(issues.contains(&TopologyIssue::MissingImage {
        service: "backend".to_string()
    }));
    assert!(issues.contains(&TopologyIssue::UndeclaredVolume {
        service: "backend".to_string(),
        volume: "data".to_string(),
    }));
    assert!(issues.contains(&TopologyIssue::UndeclaredNetwork {
        service: "backend".to_string(),
        network: "private".to_string(),
    }));
    assert!(issues.contains(&TopologyIssue::DependencyCycle {
        cycle: vec![
            "backend".to_string(),
            "frontend".to_string(),
            "backend".to_string(),
        ],
    }));
}
