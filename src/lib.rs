//! Control plane for a transparent proxy engine
//!
//! Stored profiles, groups, subscriptions and nodes are assembled into a
//! runtime configuration and hot-swapped into a running engine without
//! dropping its listener or its kernel resources.

pub mod assembly;
pub mod config;
pub mod engine;
pub mod lifecycle;
pub mod observability;
pub mod reload;
pub mod runtime;
pub mod service;
pub mod store;

pub use config::WingConfig;
pub use engine::{Engine, EngineError, EngineFactory, ResourceBundle};
pub use lifecycle::{Shutdown, WingRuntime};
pub use reload::{Orchestrator, ReloadOutcome, ReloadSender};
pub use runtime::RuntimeConfig;
pub use service::{ControlService, ServiceError};
pub use store::{MemoryStore, Repository};
