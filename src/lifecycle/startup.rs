//! Startup orchestration.
//!
//! # Responsibilities
//! - Create the reload queue and hand it to both ends
//! - Spawn the orchestrator (engine mode) or the dry loop (api-only mode)
//! - Resume serving the last applied selection after a restart
//!
//! # Design Decisions
//! - Fail fast: a startup error is returned from `WingRuntime::wait`
//! - The engine starts on the empty configuration; stored profiles are
//!   applied through the regular reload path

use std::sync::Arc;

use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::config::WingConfig;
use crate::engine::EngineFactory;
use crate::lifecycle::Shutdown;
use crate::observability::{metrics, LogLevelHandle};
use crate::reload::{
    reload_queue, run_dry, ActiveConfig, Orchestrator, OrchestratorError, OrchestratorState,
};
use crate::runtime::{ProfileCompiler, RuntimeConfig};
use crate::service::ControlService;
use crate::store::Repository;

/// Handles to a started control plane.
pub struct WingRuntime<R: Repository, C: ProfileCompiler> {
    service: Arc<ControlService<R, C>>,
    active: ActiveConfig,
    state: Option<watch::Receiver<OrchestratorState>>,
    shutdown: Shutdown,
    task: JoinHandle<Result<(), OrchestratorError>>,
}

impl<R: Repository, C: ProfileCompiler> WingRuntime<R, C> {
    pub fn service(&self) -> &Arc<ControlService<R, C>> {
        &self.service
    }

    /// Configuration currently served. Always empty in api-only mode.
    pub fn active(&self) -> &ActiveConfig {
        &self.active
    }

    /// Orchestrator state updates; `None` in api-only mode.
    pub fn state(&self) -> Option<watch::Receiver<OrchestratorState>> {
        self.state.clone()
    }

    pub fn shutdown_handle(&self) -> Shutdown {
        self.shutdown.clone()
    }

    /// Wait for the orchestrator to stop on its own or through the shutdown handle.
    pub async fn wait(self) -> Result<(), OrchestratorError> {
        self.task.await?
    }

    /// Trigger shutdown and wait for the orchestrator to finish.
    pub async fn shutdown(self) -> Result<(), OrchestratorError> {
        self.shutdown.trigger();
        self.wait().await
    }
}

/// Start the control plane with a real engine.
///
/// `factory` is expected to carry `config.engine.external_data_dirs`. When
/// `config.engine.api_only` is set the factory is not used.
pub async fn start<F, R, C>(
    config: &WingConfig,
    factory: F,
    store: Arc<R>,
    compiler: C,
    log_level: Option<LogLevelHandle>,
) -> WingRuntime<R, C>
where
    F: EngineFactory,
    R: Repository,
    C: ProfileCompiler,
{
    if config.engine.api_only {
        return start_api_only(config, store, compiler);
    }
    init_metrics(config);

    let (tx, rx) = reload_queue(config.reload.queue_capacity);
    let shutdown = Shutdown::new();
    let active = ActiveConfig::new();

    let mut orchestrator = Orchestrator::new(factory, rx, tx.clone()).with_active_config(active.clone());
    if let Some(handle) = log_level {
        orchestrator = orchestrator.with_log_level(handle);
    }
    let state = orchestrator.subscribe_state();
    let task = tokio::spawn(orchestrator.run(Arc::new(RuntimeConfig::empty()), shutdown.subscribe()));

    let service = Arc::new(ControlService::new(store, compiler, tx));
    let runtime = WingRuntime {
        service,
        active,
        state: Some(state),
        shutdown,
        task,
    };
    resume(&runtime).await;
    runtime
}

/// Start with the dry loop: requests are acknowledged, nothing is served.
pub fn start_api_only<R, C>(config: &WingConfig, store: Arc<R>, compiler: C) -> WingRuntime<R, C>
where
    R: Repository,
    C: ProfileCompiler,
{
    init_metrics(config);

    let (tx, rx) = reload_queue(config.reload.queue_capacity);
    let shutdown = Shutdown::new();
    let dry_shutdown = shutdown.subscribe();
    let task = tokio::spawn(async move {
        run_dry(rx, dry_shutdown).await;
        Ok(())
    });

    WingRuntime {
        service: Arc::new(ControlService::new(store, compiler, tx)),
        active: ActiveConfig::new(),
        state: None,
        shutdown,
        task,
    }
}

fn init_metrics(config: &WingConfig) {
    if !config.observability.metrics_enabled {
        return;
    }
    match config.observability.metrics_address.parse() {
        Ok(addr) => metrics::init_metrics(addr),
        Err(e) => tracing::error!(
            metrics_address = %config.observability.metrics_address,
            error = %e,
            "Failed to parse metrics address"
        ),
    }
}

/// Re-apply the stored selection if the store says it was being served.
async fn resume<R: Repository, C: ProfileCompiler>(runtime: &WingRuntime<R, C>) {
    let running = match runtime.service.repository().running_state() {
        Ok(state) => state.running,
        Err(e) => {
            tracing::warn!(error = %e, "Failed to read running state; not resuming");
            return;
        }
    };
    if !running {
        return;
    }
    match runtime.service.run(false).await {
        Ok(state) => tracing::info!(version = state.version, "Resumed previous run"),
        Err(e) => tracing::warn!(error = %e, "Failed to resume previous run"),
    }
}
