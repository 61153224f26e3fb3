use crate::app::connect::{connect_stores, ConnectedStores};
use crate::app::memory::MemoryManager;
use crate::app::scheduler::{job, Job, Scheduler};
use crate::app::server::{build_router, AppState};
use crate::config::backend::BackendSettings;
use crate::domain::ports::KeyValueStore;
use crate::utils::error::{Result, StackError};
use crate::utils::validation::Validate;
use std::future::Future;
use std::sync::Arc;

pub const HEARTBEAT_JOB: &str = "heartbeat";
pub const HEARTBEAT_KEY: &str = "sai:heartbeat";

/// Writes the current UTC time to `sai:heartbeat`.
pub fn heartbeat_job(store: Arc<dyn KeyValueStore>) -> Job {
    let memory = MemoryManager::new(store);
    job(move || {
        let memory = memory.clone();
        async move {
            let now = chrono::Utc::now().to_rfc3339();
            memory.store_data(HEARTBEAT_KEY, &now, None).await
        }
    })
}

pub struct BackendService {
    settings: BackendSettings,
    stores: ConnectedStores,
    scheduler: Arc<Scheduler>,
}

impl BackendService {
    /// Validates settings and connects both stores, retrying as configured.
    pub async fn connect(settings: BackendSettings) -> Result<Self> {
        settings.validate()?;
        let stores = connect_stores(&settings).await?;
        Ok(Self::with_stores(settings, stores))
    }

    pub fn with_stores(settings: BackendSettings, stores: ConnectedStores) -> Self {
        let scheduler = Arc::new(Scheduler::new(settings.default_job_interval()));
        Self {
            settings,
            stores,
            scheduler,
        }
    }

    pub fn scheduler(&self) -> Arc<Scheduler> {
        Arc::clone(&self.scheduler)
    }

    pub fn state(&self) -> AppState {
        AppState::new(&self.stores, self.scheduler())
    }

    /// Serves until `shutdown` resolves, then stops jobs and closes the stores.
    pub async fn run_until<F>(self, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        self.scheduler.add_interval_job(
            HEARTBEAT_JOB,
            None,
            heartbeat_job(Arc::clone(&self.stores.key_value)),
        )?;

        let addr = self.settings.socket_addr();
        let listener = tokio::net::TcpListener::bind(&addr).await?;
        tracing::info!("🚀 SAI backend listening on {}", addr);

        let served = axum::serve(listener, build_router(self.state()))
            .with_graceful_shutdown(shutdown)
            .await
            .map_err(|e| StackError::runtime("serve", e.to_string()));

        self.scheduler.shutdown();
        self.stores.close();
        served
    }

    pub async fn run(self) -> Result<()> {
        self.run_until(shutdown_signal()).await
    }
}

pub async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("Failed to listen for Ctrl-C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    tracing::info!("👋 Shutdown signal received");
}
