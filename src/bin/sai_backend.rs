use anyhow::Context;
use clap::Parser;
use sai_stack::app::{BackendService, ConnectedStores};
use sai_stack::utils::{logger, validation::Validate};
use sai_stack::BackendSettings;
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "sai-backend")]
#[command(about = "SAI backend service: store connectivity, background jobs and health endpoints")]
struct Args {
    /// Optional TOML settings file; environment variables still take precedence
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Use in-process key-value and document stores instead of Redis and MongoDB
    #[arg(long)]
    memory_store: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _ = dotenvy::dotenv();
    let args = Args::parse();
    logger::init_service_logger();

    tracing::info!("🚀 Starting SAI backend v{}", env!("CARGO_PKG_VERSION"));

    let settings = match &args.config {
        Some(path) => BackendSettings::from_file(path)
            .with_context(|| format!("failed to load settings from {}", path.display()))?
            .with_overrides(|key| std::env::var(key).ok())?,
        None => BackendSettings::from_env()?,
    };
    settings.validate().context("invalid backend settings")?;

    let service = if args.memory_store {
        tracing::warn!("⚠️ Running with in-memory stores; data is not persisted");
        BackendService::with_stores(settings, ConnectedStores::in_memory())
    } else {
        BackendService::connect(settings)
            .await
            .context("could not connect to the stores")?
    };

    service.run().await?;
    tracing::info!("👋 SAI backend stopped");
    Ok(())
}
