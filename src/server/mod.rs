//! HTTP transport for the task lifecycle.
//!
//! Every handler is a thin wrapper over [`TaskController`]: uploads are
//! scheduled and answered with 202, clients poll status and artifacts, and
//! nothing on the request path waits on the analyzer (except `/process`,
//! which exists to do exactly that).

mod error;
mod handlers;
mod routes;

pub use error::ApiError;
pub use routes::create_router;

use std::sync::Arc;
use std::time::Instant;

use tokio::sync::OnceCell;

use crate::analysis::{Analyzer, CommandAnalyzer, GpuStatus};
use crate::config::Settings;
use crate::storage::UploadStore;
use crate::tasks::{
    spawn_periodic, RecoverySweeper, RetentionSweeper, SweeperHandle, TaskController,
    TaskRegistry, WorkerPool,
};

/// Shared state for the web server.
#[derive(Clone)]
pub struct AppState {
    pub controller: TaskController,
    pub started_at: Instant,
    pub max_upload_bytes: usize,
    /// Analyzer availability, checked once at startup.
    pub analyzer_available: bool,
    /// GPU probe result, filled on first use.
    pub gpu: Arc<OnceCell<GpuStatus>>,
}

impl AppState {
    /// State backed by the configured command analyzer.
    pub fn new(settings: &Settings) -> Self {
        let analyzer = Arc::new(CommandAnalyzer::new(settings.analyzer.clone()));
        Self::with_analyzer(settings, analyzer)
    }

    /// State backed by any analyzer.
    pub fn with_analyzer(settings: &Settings, analyzer: Arc<dyn Analyzer>) -> Self {
        let controller = TaskController::new(
            Arc::new(TaskRegistry::with_capacity(settings.max_tasks)),
            Arc::new(WorkerPool::new(settings.workers)),
            analyzer,
            UploadStore::new(&settings.data_dir),
            settings.lifecycle(),
        );
        let analyzer_available = controller.analyzer().is_available();

        Self {
            controller,
            started_at: Instant::now(),
            max_upload_bytes: settings.max_upload_bytes,
            analyzer_available,
            gpu: Arc::new(OnceCell::new()),
        }
    }
}

/// Start the recovery and retention sweepers for `controller`'s registry.
pub fn spawn_sweepers(controller: &TaskController, settings: &Settings) -> Vec<SweeperHandle> {
    let registry = Arc::clone(controller.registry());

    let recovery = RecoverySweeper::new(Arc::clone(&registry), settings.recovery_grace);
    let retention = RetentionSweeper::new(registry, settings.retention_window)
        .with_store(controller.store().clone());

    vec![
        spawn_periodic(recovery, settings.recovery_interval),
        spawn_periodic(retention, settings.retention_interval),
    ]
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutdown signal received");
}

/// Start the web server and its background sweepers. Returns after Ctrl+C.
pub async fn serve(settings: &Settings, host: &str, port: u16) -> anyhow::Result<()> {
    settings.validate()?;
    settings.ensure_directories()?;

    let state = AppState::new(settings);
    let analyzer = Arc::clone(state.controller.analyzer());
    if !state.analyzer_available {
        tracing::warn!(
            analyzer = analyzer.name(),
            "Analyzer not available, tasks will fail: {}",
            analyzer.availability_hint()
        );
    }

    let sweepers = spawn_sweepers(&state.controller, settings);
    let app = create_router(state);

    let listener = tokio::net::TcpListener::bind((host, port)).await?;
    tracing::info!(
        workers = settings.workers,
        "Starting server at http://{}",
        listener.local_addr()?
    );

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    for sweeper in sweepers {
        sweeper.stop().await;
    }
    tracing::info!("Server stopped");
    Ok(())
}
