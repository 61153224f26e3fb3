use clap::Parser;
use sai_stack::adapters::{DockerEngine, SimulatedRuntime};
use sai_stack::app::server::fetch_status;
use sai_stack::core::orchestrator::{DownReport, UpReport};
use sai_stack::core::plan::project_name;
use sai_stack::domain::ports::ContainerRuntime;
use sai_stack::utils::{logger, validation::Validate};
use sai_stack::{
    CliConfig, Command, ComposeManifest, DeploymentPlan, DownOptions, Orchestrator, Result,
    StackError, Topology,
};
use std::time::Duration;

#[tokio::main]
async fn main() {
    // A missing .env file is fine.
    let _ = dotenvy::dotenv();
    let config = CliConfig::parse();

    logger::init_cli_logger(config.verbose);
    tracing::debug!("CLI config: {:?}", config);

    if let Err(e) = config.validate() {
        tracing::error!("❌ Configuration validation failed: {}", e);
        tracing::error!("💡 Suggestion: {}", e.recovery_suggestion());
        eprintln!("❌ {}", e.user_friendly_message());
        std::process::exit(e.exit_code());
    }

    if let Err(e) = run(&config).await {
        tracing::error!(
            "❌ sai-stack failed: {} (Category: {:?}, Severity: {:?})",
            e,
            e.category(),
            e.severity()
        );
        eprintln!("❌ {}", e.user_friendly_message());
        eprintln!("💡 Suggestion: {}", e.recovery_suggestion());
        std::process::exit(e.exit_code());
    }
}

async fn run(config: &CliConfig) -> Result<()> {
    match &config.command {
        Command::Validate => {
            let manifest = load_manifest(config)?;
            let topology = Topology::resolve(&manifest)?;
            println!("✅ {} is valid", config.file.display());
            for (n, wave) in topology.waves().iter().enumerate() {
                println!("   wave {}: {}", n + 1, wave.join(", "));
            }
        }
        Command::Plan { json } => {
            let plan = load_plan(config)?;
            if *json {
                println!("{}", serde_json::to_string_pretty(&plan)?);
            } else {
                print!("{}", plan.render());
            }
        }
        Command::Up { dry_run } => {
            let plan = load_plan(config)?;
            let report = if *dry_run {
                tracing::info!("🧪 Dry run: using the in-memory runtime");
                up(SimulatedRuntime::new(), &plan).await?
            } else {
                up(docker().await?, &plan).await?
            };
            print_up(&plan, &report);
        }
        Command::Down { volumes, dry_run } => {
            let plan = load_plan(config)?;
            let options = DownOptions {
                remove_volumes: *volumes,
            };
            let report = if *dry_run {
                Orchestrator::new(SimulatedRuntime::new()).down(&plan, options).await?
            } else {
                Orchestrator::new(docker().await?).down(&plan, options).await?
            };
            print_down(&plan, &report);
        }
        Command::Status { url, timeout_secs } => {
            let report = fetch_status(url, Duration::from_secs(*timeout_secs)).await?;
            println!("{}", serde_json::to_string_pretty(&report)?);
            if !report.is_ok() {
                let failing: Vec<String> = std::iter::once(&report.key_value)
                    .chain(report.document_store.as_ref())
                    .filter(|store| !store.healthy)
                    .map(|store| {
                        format!(
                            "{}: {}",
                            store.endpoint,
                            store.error.as_deref().unwrap_or("unhealthy")
                        )
                    })
                    .collect();
                return Err(StackError::ConnectionError {
                    store: "backend stores".to_string(),
                    attempts: 1,
                    message: failing.join("; "),
                });
            }
        }
    }
    Ok(())
}

async fn docker() -> Result<DockerEngine> {
    let engine = DockerEngine::connect()?;
    engine.ping().await?;
    Ok(engine)
}

fn load_manifest(config: &CliConfig) -> Result<ComposeManifest> {
    let manifest = ComposeManifest::from_file(&config.file)?;
    manifest.validate()?;
    Ok(manifest)
}

fn load_plan(config: &CliConfig) -> Result<DeploymentPlan> {
    let manifest = load_manifest(config)?;
    let base_dir = config.base_dir();
    let project = project_name(config.project_name.as_deref(), &manifest, &base_dir);
    DeploymentPlan::build(&manifest, &project, &base_dir, &|key| std::env::var(key).ok())
}

async fn up<R: ContainerRuntime + 'static>(runtime: R, plan: &DeploymentPlan) -> Result<UpReport> {
    Orchestrator::new(runtime).up(plan).await
}

fn print_up(plan: &DeploymentPlan, report: &UpReport) {
    println!("✅ Project '{}' is up", plan.project);
    if !report.images_built.is_empty() {
        println!("🔨 Built: {}", report.images_built.join(", "));
    }
    if !report.volumes_created.is_empty() {
        println!("📦 New volumes: {}", report.volumes_created.join(", "));
    }
    if !report.started.is_empty() {
        println!("▶️  Started: {}", report.started.join(", "));
    }
    if !report.recreated.is_empty() {
        println!("♻️  Recreated: {}", report.recreated.join(", "));
    }
    if !report.already_running.is_empty() {
        println!("⏭️  Already running: {}", report.already_running.join(", "));
    }
}

fn print_down(plan: &DeploymentPlan, report: &DownReport) {
    println!("✅ Project '{}' is down", plan.project);
    if !report.removed_containers.is_empty() {
        println!("🗑️  Removed: {}", report.removed_containers.join(", "));
    }
    if !report.removed_volumes.is_empty() {
        println!("🗑️  Removed volumes: {}", report.removed_volumes.join(", "));
    }
}
