//! Reload subsystem.
//!
//! # Data Flow
//! ```text
//! submitter (service / CLI / embedder)
//!     → queue.rs (bounded FIFO, backpressure)
//!     → orchestrator.rs (single consumer):
//!         Serving ──reload(cfg)──▶ Reloading ──listener handed back──▶ Serving
//!            │                        │ construct(cfg) fails → construct(previous)
//!            │                        └ both fail → Closing (fatal)
//!            └──listener stopped, no reload──▶ Closing
//!     → ReloadOutcome via the request's callback
//!     → active.rs (published on commit)
//! ```
//!
//! # Design Decisions
//! - One consumer: only the orchestrator constructs, ejects, injects or closes engines
//! - Requests dequeued mid-reload are parked and replayed in order afterwards
//! - A rollback is reported as its own outcome, never as success or silence

pub mod active;
pub mod orchestrator;
pub mod queue;

use thiserror::Error;
use uuid::Uuid;

use crate::engine::EngineError;

pub use active::ActiveConfig;
pub use orchestrator::{run_dry, Orchestrator, OrchestratorState};
pub use queue::{reload_queue, ReloadOutcome, ReloadReceiver, ReloadRequest, ReloadSender, MIN_QUEUE_CAPACITY};

/// Errors seen by reload submitters.
#[derive(Debug, Error)]
pub enum ReloadError {
    #[error("reload queue is closed")]
    QueueClosed,

    #[error("reload request {0} was dropped before completion")]
    Abandoned(Uuid),

    #[error("failed to load new config: {0}; rolled back to the previous configuration")]
    RolledBack(String),

    #[error("failed to reload and to roll back: {0}")]
    Fatal(String),
}

/// Errors that stop the orchestrator.
#[derive(Debug, Error)]
pub enum OrchestratorError {
    #[error("start control plane: {0}")]
    Startup(EngineError),

    #[error("failed to roll back configuration (reload: {reload}; rollback: {rollback})")]
    RollbackFailed {
        reload: EngineError,
        rollback: EngineError,
    },

    #[error("listener stopped: {0}")]
    ListenerFailed(EngineError),

    #[error("listener stopped unexpectedly")]
    ListenerExited,

    #[error("listener was not handed back by the previous control plane")]
    ListenerLost,

    #[error("new control plane failed to start serving")]
    ServeFailed,

    #[error("serve task failed: {0}")]
    Join(#[from] tokio::task::JoinError),

    #[error("close control plane: {0}")]
    Close(EngineError),
}
