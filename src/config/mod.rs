//! Daemon configuration.
//!
//! # Data Flow
//! ```text
//! wing.toml
//!     → loader.rs (read & deserialize)
//!     → validation.rs (semantic checks)
//!     → WingConfig (validated, immutable)
//!     → lifecycle::startup wires store, reload queue, engine and observability
//! ```
//!
//! # Design Decisions
//! - Daemon settings only; what the engine runs comes from stored profiles
//! - All fields have defaults to allow an empty file
//! - Validation separates syntactic (serde) from semantic checks

pub mod loader;
pub mod schema;
pub mod validation;

pub use loader::{load_config, ConfigError};
pub use schema::{EngineConfig, ObservabilityConfig, ReloadConfig, StoreConfig, WingConfig};
