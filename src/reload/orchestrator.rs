//! Reload orchestrator.
//!
//! # Responsibilities
//! - Own the serving engine instance and its configuration
//! - Move kernel resources from the old instance into its replacement
//! - Roll back to the previous configuration when the new one fails
//! - Report every request's outcome through its callback

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Instant;

use tokio::sync::{broadcast, oneshot, watch};
use tokio::task::JoinHandle;

use crate::engine::{Engine, EngineFactory, ServeExit, ServeTask};
use crate::observability::{metrics, LogLevelHandle};
use crate::reload::active::ActiveConfig;
use crate::reload::queue::{ReloadMessage, ReloadOutcome, ReloadReceiver, ReloadRequest, ReloadSender};
use crate::reload::OrchestratorError;
use crate::runtime::RuntimeConfig;

/// Orchestrator state, observable through `Orchestrator::subscribe_state`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OrchestratorState {
    /// No engine constructed yet.
    Idle,
    /// An engine owns the kernel resources and is listening.
    Serving,
    /// A replacement engine has been built; waiting for the listener hand-back.
    Reloading,
    /// Terminal.
    Closing,
}

type Listener<F> = <<F as EngineFactory>::Engine as Engine>::Listener;

/// The engine currently owned by the orchestrator.
struct Live<E: Engine> {
    engine: E,
    config: Arc<RuntimeConfig>,
    task: Option<JoinHandle<ServeExit<E::Listener>>>,
}

/// A transition waiting for the old listener to come back.
struct PendingReload {
    request: ReloadRequest,
    /// Why the requested configuration was rejected, if it was.
    rollback: Option<String>,
    started: Instant,
}

/// Single consumer of the reload queue.
pub struct Orchestrator<F: EngineFactory> {
    factory: F,
    queue: ReloadReceiver,
    notifier: ReloadSender,
    log_level: Option<LogLevelHandle>,
    active: ActiveConfig,
    state: watch::Sender<OrchestratorState>,
}

impl<F: EngineFactory> Orchestrator<F> {
    /// `notifier` must be a sender of the same queue; serve tasks use it to
    /// report that their listener stopped.
    pub fn new(factory: F, queue: ReloadReceiver, notifier: ReloadSender) -> Self {
        let (state, _) = watch::channel(OrchestratorState::Idle);
        Self {
            factory,
            queue,
            notifier,
            log_level: None,
            active: ActiveConfig::new(),
            state,
        }
    }

    /// Apply each target configuration's log level through `handle`.
    pub fn with_log_level(mut self, handle: LogLevelHandle) -> Self {
        self.log_level = Some(handle);
        self
    }

    /// Publish committed configurations to `active`.
    pub fn with_active_config(mut self, active: ActiveConfig) -> Self {
        self.active = active;
        self
    }

    pub fn subscribe_state(&self) -> watch::Receiver<OrchestratorState> {
        self.state.subscribe()
    }

    /// Serve `initial` and process reload requests until shutdown, a fatal
    /// rollback failure, or an unexpected listener stop.
    pub async fn run(
        mut self,
        initial: Arc<RuntimeConfig>,
        mut shutdown: broadcast::Receiver<()>,
    ) -> Result<(), OrchestratorError> {
        self.apply_log_level(&initial.global.log_level);
        let mut engine = self
            .factory
            .construct(None, None, &initial)
            .await
            .map_err(OrchestratorError::Startup)?;

        let (ready_tx, ready_rx) = oneshot::channel();
        let task = match engine.listen_and_serve(ready_tx, initial.global.tproxy_port).await {
            Ok(task) => task,
            Err(e) => {
                if let Err(close_err) = engine.close().await {
                    tracing::warn!(error = %close_err, "Failed to close control plane");
                }
                return Err(OrchestratorError::Startup(e));
            }
        };
        let port = initial.global.tproxy_port;
        tokio::spawn(async move {
            if ready_rx.await.is_ok() {
                tracing::info!(port = port, "Ready");
            }
        });

        let mut live = Live {
            engine,
            config: initial,
            task: Some(self.spawn_serve(task)),
        };
        self.active.publish(live.config.clone());
        self.set_state(OrchestratorState::Serving);

        let mut pending: Option<PendingReload> = None;
        let mut deferred: VecDeque<ReloadRequest> = VecDeque::new();

        let result = loop {
            if pending.is_none() {
                if let Some(request) = deferred.pop_front() {
                    metrics::record_deferred(deferred.len());
                    match self.begin_reload(&mut live, request).await {
                        Ok(p) => {
                            pending = Some(p);
                            continue;
                        }
                        Err(e) => break Err(e),
                    }
                }
            }

            let message = tokio::select! {
                biased;
                _ = shutdown.recv() => {
                    tracing::info!("Shutdown signal received");
                    break Ok(());
                }
                message = self.queue.recv() => message,
            };

            match message {
                None => break Ok(()),
                Some(ReloadMessage::Apply(request)) => {
                    if pending.is_some() {
                        tracing::debug!(request_id = %request.id, "Reload in progress; request deferred");
                        deferred.push_back(request);
                        metrics::record_deferred(deferred.len());
                        continue;
                    }
                    match self.begin_reload(&mut live, request).await {
                        Ok(p) => pending = Some(p),
                        Err(e) => break Err(e),
                    }
                }
                Some(ReloadMessage::ListenerStopped) => {
                    let Some(handle) = live.task.take() else {
                        tracing::warn!("Listener stop reported with no serve task running");
                        continue;
                    };
                    let exit = match handle.await {
                        Ok(exit) => exit,
                        Err(e) => break Err(OrchestratorError::Join(e)),
                    };
                    match pending.take() {
                        Some(p) => {
                            if let Err(e) = self.finish_reload(&mut live, exit, p).await {
                                break Err(e);
                            }
                        }
                        None => {
                            tracing::error!("Listener stopped with no reload in progress");
                            break Err(match exit.result {
                                Err(e) => OrchestratorError::ListenerFailed(e),
                                Ok(()) => OrchestratorError::ListenerExited,
                            });
                        }
                    }
                }
            }
        };

        self.shut_down(live, pending, deferred, result).await
    }

    /// Serving → Reloading. On return the replacement engine owns the
    /// resources and the old engine has been closed.
    async fn begin_reload(
        &mut self,
        live: &mut Live<F::Engine>,
        request: ReloadRequest,
    ) -> Result<PendingReload, OrchestratorError> {
        let started = Instant::now();
        let target = request.config.clone();
        tracing::warn!(request_id = %request.id, "Received reload request; preparing to reload");

        self.apply_log_level(&target.global.log_level);
        if tracing::enabled!(tracing::Level::DEBUG) {
            match serde_json::to_string_pretty(&*target) {
                Ok(text) => tracing::debug!(request_id = %request.id, config = %text, "Target configuration"),
                Err(e) => tracing::debug!(error = %e, "Failed to render target configuration"),
            }
        }

        let bundle = live.engine.eject_resources();
        let dns_cache = live.engine.clone_dns_cache_if_compatible(&live.config, &target);
        if dns_cache.is_none() {
            tracing::info!(request_id = %request.id, "DNS cache not carried over");
        }

        tracing::warn!(request_id = %request.id, "Loading new control plane");
        let attempt = self
            .factory
            .construct(bundle.as_ref(), dns_cache.as_ref(), &target)
            .await;
        let (mut next, next_config, rollback) = match attempt {
            Ok(engine) => (engine, target, None),
            Err(reload_err) => {
                tracing::error!(
                    request_id = %request.id,
                    error = %reload_err,
                    "Failed to reload; trying to roll back configuration"
                );
                self.apply_log_level(&live.config.global.log_level);
                let rollback_attempt = self
                    .factory
                    .construct(bundle.as_ref(), dns_cache.as_ref(), &live.config)
                    .await;
                match rollback_attempt {
                    Ok(engine) => {
                        tracing::error!(request_id = %request.id, "Last reload failed; rolled back configuration");
                        (engine, live.config.clone(), Some(reload_err.to_string()))
                    }
                    Err(rollback_err) => {
                        tracing::error!(
                            request_id = %request.id,
                            error = %rollback_err,
                            "Failed to roll back configuration"
                        );
                        if let Some(bundle) = bundle {
                            bundle.release();
                        }
                        metrics::record_reload("fatal", started);
                        request.complete(ReloadOutcome::Fatal {
                            error: format!("reload: {}; rollback: {}", reload_err, rollback_err),
                        });
                        return Err(OrchestratorError::RollbackFailed {
                            reload: reload_err,
                            rollback: rollback_err,
                        });
                    }
                }
            }
        };

        if let Some(bundle) = bundle {
            next.inject_resources(bundle);
        }

        let mut old = std::mem::replace(&mut live.engine, next);
        live.config = next_config;
        self.set_state(OrchestratorState::Reloading);

        // Ejected resources are not released by closing the old instance
        if let Err(e) = old.close().await {
            tracing::warn!(request_id = %request.id, error = %e, "Failed to close old control plane");
        }
        tracing::warn!(request_id = %request.id, "Stopped old control plane");

        Ok(PendingReload {
            request,
            rollback,
            started,
        })
    }

    /// Reloading → Serving, once the old serve task has handed back its listener.
    async fn finish_reload(
        &mut self,
        live: &mut Live<F::Engine>,
        exit: ServeExit<Listener<F>>,
        pending: PendingReload,
    ) -> Result<(), OrchestratorError> {
        let request_id = pending.request.id;
        if let Err(e) = &exit.result {
            tracing::warn!(request_id = %request_id, error = %e, "Old control plane stopped with error");
        }
        let Some(listener) = exit.listener else {
            metrics::record_reload("fatal", pending.started);
            pending.request.complete(ReloadOutcome::Fatal {
                error: OrchestratorError::ListenerLost.to_string(),
            });
            return Err(OrchestratorError::ListenerLost);
        };

        tracing::warn!(request_id = %request_id, "Serving on inherited listener");
        let (ready_tx, ready_rx) = oneshot::channel();
        let task = live.engine.serve(ready_tx, listener);
        live.task = Some(self.spawn_serve(task));

        if ready_rx.await.is_err() {
            metrics::record_reload("fatal", pending.started);
            pending.request.complete(ReloadOutcome::Fatal {
                error: OrchestratorError::ServeFailed.to_string(),
            });
            return Err(OrchestratorError::ServeFailed);
        }

        self.active.publish(live.config.clone());
        self.set_state(OrchestratorState::Serving);

        let outcome = match pending.rollback {
            None => ReloadOutcome::Applied,
            Some(error) => ReloadOutcome::RolledBack { error },
        };
        tracing::warn!(
            request_id = %request_id,
            outcome = outcome.label(),
            elapsed_ms = pending.started.elapsed().as_millis() as u64,
            "Reload finished"
        );
        metrics::record_reload(outcome.label(), pending.started);
        pending.request.complete(outcome);
        Ok(())
    }

    /// Closing: answer everything still waiting, close the engine and wait
    /// for its serve task.
    async fn shut_down(
        mut self,
        mut live: Live<F::Engine>,
        pending: Option<PendingReload>,
        deferred: VecDeque<ReloadRequest>,
        result: Result<(), OrchestratorError>,
    ) -> Result<(), OrchestratorError> {
        self.set_state(OrchestratorState::Closing);
        self.active.clear();
        // Serve tasks must not block on a queue nobody reads anymore
        self.queue.close();

        let reason = match &result {
            Ok(()) => "control plane shut down".to_string(),
            Err(e) => e.to_string(),
        };
        let mut buffered = Vec::new();
        while let Some(message) = self.queue.try_recv() {
            if let ReloadMessage::Apply(request) = message {
                buffered.push(request);
            }
        }
        for request in pending.map(|p| p.request).into_iter().chain(deferred).chain(buffered) {
            request.complete(ReloadOutcome::Fatal {
                error: reason.clone(),
            });
        }

        let close_result = live.engine.close().await;
        if let Some(handle) = live.task.take() {
            if let Err(e) = handle.await {
                tracing::warn!(error = %e, "Serve task did not finish cleanly");
            }
        }
        tracing::info!("Control plane closed");

        match (result, close_result) {
            (Err(e), _) => Err(e),
            (Ok(()), Err(e)) => Err(OrchestratorError::Close(e)),
            (Ok(()), Ok(())) => Ok(()),
        }
    }

    fn spawn_serve(&self, task: ServeTask<Listener<F>>) -> JoinHandle<ServeExit<Listener<F>>> {
        let notifier = self.notifier.clone();
        tokio::spawn(async move {
            let exit = task.await;
            if let Err(e) = &exit.result {
                tracing::error!(error = %e, "Listener stopped with error");
            }
            notifier.listener_stopped().await;
            exit
        })
    }

    fn apply_log_level(&self, level: &str) {
        if let Some(handle) = &self.log_level {
            if let Err(e) = handle.set_level(level) {
                tracing::warn!(level = %level, error = %e, "Failed to apply log level");
            }
        }
    }

    fn set_state(&self, state: OrchestratorState) {
        let previous = self.state.send_replace(state);
        if previous != state {
            tracing::debug!(from = ?previous, to = ?state, "Orchestrator state changed");
        }
    }
}

/// Administrative-only loop: every request is acknowledged without building
/// an engine. Returns on shutdown or when the queue closes.
pub async fn run_dry(mut queue: ReloadReceiver, mut shutdown: broadcast::Receiver<()>) {
    tracing::info!("Dry run in api-only mode");
    loop {
        let message = tokio::select! {
            message = queue.recv() => message,
            _ = shutdown.recv() => break,
        };
        match message {
            Some(ReloadMessage::Apply(request)) => {
                tracing::debug!(request_id = %request.id, "Dry run; acknowledging reload");
                metrics::record_reload("dry", Instant::now());
                request.complete(ReloadOutcome::Applied);
            }
            Some(ReloadMessage::ListenerStopped) | None => break,
        }
    }
    queue.close();
    while let Some(message) = queue.try_recv() {
        if let ReloadMessage::Apply(request) = message {
            request.complete(ReloadOutcome::Fatal {
                error: "control plane shut down".to_string(),
            });
        }
    }
    tracing::info!("Dry run stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lifecycle::Shutdown;
    use crate::reload::reload_queue;

    #[tokio::test]
    async fn test_dry_run_acknowledges() {
        let (tx, rx) = reload_queue(16);
        let shutdown = Shutdown::new();
        let handle = tokio::spawn(run_dry(rx, shutdown.subscribe()));

        for _ in 0..3 {
            let outcome = tx.submit(Arc::new(RuntimeConfig::empty())).await.unwrap();
            assert_eq!(outcome, ReloadOutcome::Applied);
        }

        shutdown.trigger();
        handle.await.unwrap();
        assert!(tx.is_closed());
    }
}
