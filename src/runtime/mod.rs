//! Runtime configuration subsystem.
//!
//! # Data Flow
//! ```text
//! profile text (global / dns / routing)
//!     → compiler.rs (text → structured settings, or diagnostic)
//!     → assembly (adds groups + nodes)
//!     → RuntimeConfig (immutable, one per transition)
//!     → shared via Arc with the reload orchestrator and engine
//! ```
//!
//! # Design Decisions
//! - RuntimeConfig is never mutated after assembly; each transition builds a fresh value
//! - The empty configuration is a regular value, not an Option
//! - Unmodelled profile keys are carried verbatim so the engine sees them untouched

pub mod compiler;
pub mod types;

pub use compiler::{CompileError, CompiledProfiles, ProfileCompiler, TomlCompiler};
pub use types::{
    DnsSettings, GlobalSettings, GroupSpec, NodeEntry, NodeFilter, Policy, PolicyParam,
    RoutingRule, RoutingRules, RuntimeConfig, PRESET_OUTBOUNDS,
};
