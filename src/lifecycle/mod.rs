//! Lifecycle management subsystem.
//!
//! # Data Flow
//! ```text
//! Startup (startup.rs):
//!     WingConfig → logging & metrics → store → reload queue
//!     → orchestrator task (engine or api-only) → control service
//!     → resume the last run if the store says it was serving
//!
//! Shutdown (shutdown.rs):
//!     Signal received → orchestrator closes the engine → queue closed → Exit
//!
//! Signals (signals.rs):
//!     SIGTERM/SIGINT → Trigger graceful shutdown
//! ```
//!
//! # Design Decisions
//! - The reload queue is created once here and handed to both ends
//! - Ordered shutdown: stop reading requests, answer the parked ones, close the engine

pub mod shutdown;
pub mod signals;
pub mod startup;

pub use shutdown::Shutdown;
pub use startup::{start, start_api_only, WingRuntime};
