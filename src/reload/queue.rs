//! Bounded reload request queue.
//!
//! # Responsibilities
//! - Serialize every configuration transition into one total order
//! - Apply backpressure to submitters when full, never drop a request
//! - Carry the "listener stopped" sentinel, which only serve tasks may send

use std::sync::Arc;

use tokio::sync::{mpsc, oneshot};
use uuid::Uuid;

use crate::reload::ReloadError;
use crate::runtime::RuntimeConfig;

/// Smallest queue capacity accepted.
pub const MIN_QUEUE_CAPACITY: usize = 16;

/// What happened to a reload request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReloadOutcome {
    /// The requested configuration is now serving.
    Applied,
    /// The requested configuration failed; the previous one is serving again.
    RolledBack { error: String },
    /// Neither configuration could be brought up; the orchestrator stopped.
    Fatal { error: String },
}

impl ReloadOutcome {
    /// Label used in metrics and logs.
    pub fn label(&self) -> &'static str {
        match self {
            ReloadOutcome::Applied => "applied",
            ReloadOutcome::RolledBack { .. } => "rolled_back",
            ReloadOutcome::Fatal { .. } => "fatal",
        }
    }

    pub fn into_result(self) -> Result<(), ReloadError> {
        match self {
            ReloadOutcome::Applied => Ok(()),
            ReloadOutcome::RolledBack { error } => Err(ReloadError::RolledBack(error)),
            ReloadOutcome::Fatal { error } => Err(ReloadError::Fatal(error)),
        }
    }
}

/// A request to make `config` the active configuration.
#[derive(Debug)]
pub struct ReloadRequest {
    pub id: Uuid,
    pub config: Arc<RuntimeConfig>,
    callback: oneshot::Sender<ReloadOutcome>,
}

impl ReloadRequest {
    /// Report the outcome to the submitter. Consumes the request.
    pub fn complete(self, outcome: ReloadOutcome) {
        if self.callback.send(outcome).is_err() {
            tracing::debug!(request_id = %self.id, "Reload submitter no longer waiting");
        }
    }
}

#[derive(Debug)]
pub(crate) enum ReloadMessage {
    Apply(ReloadRequest),
    /// A serve task exited, either because its engine was closed or failed.
    ListenerStopped,
}

/// Submitting half of the queue. Cheap to clone.
#[derive(Debug, Clone)]
pub struct ReloadSender {
    tx: mpsc::Sender<ReloadMessage>,
}

impl ReloadSender {
    /// Enqueue `config`, waiting for room if the queue is full.
    /// Returns the request id and the receiver for its outcome.
    pub async fn enqueue(
        &self,
        config: Arc<RuntimeConfig>,
    ) -> Result<(Uuid, oneshot::Receiver<ReloadOutcome>), ReloadError> {
        let (callback, outcome) = oneshot::channel();
        let id = Uuid::new_v4();
        let request = ReloadRequest { id, config, callback };
        self.tx
            .send(ReloadMessage::Apply(request))
            .await
            .map_err(|_| ReloadError::QueueClosed)?;
        tracing::debug!(request_id = %id, "Reload request queued");
        Ok((id, outcome))
    }

    /// Enqueue `config` and wait until the orchestrator has finished with it.
    pub async fn submit(&self, config: Arc<RuntimeConfig>) -> Result<ReloadOutcome, ReloadError> {
        let (id, outcome) = self.enqueue(config).await?;
        outcome.await.map_err(|_| ReloadError::Abandoned(id))
    }

    pub(crate) async fn listener_stopped(&self) {
        if self.tx.send(ReloadMessage::ListenerStopped).await.is_err() {
            tracing::debug!("Reload queue closed; listener stop not delivered");
        }
    }

    /// Returns true once the orchestrator has stopped reading.
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

/// Consuming half of the queue, owned by the orchestrator.
#[derive(Debug)]
pub struct ReloadReceiver {
    rx: mpsc::Receiver<ReloadMessage>,
}

impl ReloadReceiver {
    pub(crate) async fn recv(&mut self) -> Option<ReloadMessage> {
        self.rx.recv().await
    }

    /// Next buffered message, without waiting.
    pub(crate) fn try_recv(&mut self) -> Option<ReloadMessage> {
        self.rx.try_recv().ok()
    }

    /// Stop accepting requests. Pending and future sends fail; messages
    /// already buffered can still be received.
    pub fn close(&mut self) {
        self.rx.close();
    }
}

/// Create the queue. Capacities below `MIN_QUEUE_CAPACITY` are raised to it.
pub fn reload_queue(capacity: usize) -> (ReloadSender, ReloadReceiver) {
    let (tx, rx) = mpsc::channel(capacity.max(MIN_QUEUE_CAPACITY));
    (ReloadSender { tx }, ReloadReceiver { rx })
}
