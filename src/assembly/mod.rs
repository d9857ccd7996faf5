//! Runtime configuration assembly.
//!
//! # Data Flow
//! ```text
//! Snapshot (selected profiles, groups, subscriptions, nodes)
//!     → compiler (profile text → settings)
//!     → builder.rs: outbounds referenced by routing → persisted groups
//!     → builder.rs: subscription nodes + solitary nodes per group
//!     → dedup.rs (collapse by connection link, union memberships)
//!     → naming.rs (tags first, then subID.name with .0/.1/... suffixes)
//!     → GroupSpec per referenced group + `name:link` node entries
//!     → RuntimeConfig
//! ```
//!
//! # Design Decisions
//! - Pure: no shared state, no I/O; same input order gives the same names
//! - Link identity, not record identity, decides whether two nodes are one
//! - Missing referenced groups fail before any engine is touched

pub mod builder;
pub mod dedup;
pub mod naming;

use thiserror::Error;

use crate::runtime::CompileError;
use crate::store::{GroupRecord, NodeRecord, RecordId};

pub use builder::{assemble, Assembly};

/// Errors raised while assembling a runtime configuration.
#[derive(Debug, Error)]
pub enum AssemblyError {
    /// Routing references groups that are neither presets nor persisted.
    #[error("groups not defined but referenced by routing: {}", .0.join(", "))]
    MissingGroups(Vec<String>),

    /// Two distinct links carry the same explicit tag.
    #[error("node tag '{0}' is used by more than one node")]
    DuplicateTag(String),

    #[error(transparent)]
    Compile(#[from] CompileError),
}

/// A node after deduplication, with every group it belongs to.
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedNode {
    pub record: NodeRecord,
    /// Owning groups, in first-seen order, without duplicates.
    pub groups: Vec<RecordId>,
    /// Assigned by naming; empty until then.
    pub unique_name: String,
}

impl ResolvedNode {
    pub fn new(record: NodeRecord, group: &GroupRecord) -> Self {
        Self {
            record,
            groups: vec![group.id],
            unique_name: String::new(),
        }
    }

    pub fn belongs_to(&self, group: RecordId) -> bool {
        self.groups.contains(&group)
    }
}
