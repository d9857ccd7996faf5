//! Persistence subsystem.
//!
//! # Data Flow
//! ```text
//! administrative operation
//!     → Repository (selection, profile text, versions)
//!     → snapshot()  (one consistent read for assembly)
//!     → commit_running() after the orchestrator reports success
//! ```
//!
//! # Design Decisions
//! - Every write is all-or-nothing: applied to a draft, persisted, then swapped in
//! - Optimistic version counters on profiles and on the running state
//! - A version mismatch is a distinct Conflict error, never a silent overwrite

pub mod memory;
pub mod records;

use thiserror::Error;

pub use memory::MemoryStore;
pub use records::{
    group_fingerprint, GroupRecord, NodeRecord, ProfileKind, ProfileRecord, ProfileStamp,
    RecordId, RunningState, Snapshot, SubscriptionRecord,
};

/// Errors returned by a repository.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("no such {kind} with id {id}")]
    NotFound { kind: &'static str, id: RecordId },

    #[error("version conflict on {what}: expected {expected}, found {actual}")]
    Conflict {
        what: String,
        expected: u64,
        actual: u64,
    },

    #[error("{what} '{name}' already exists")]
    Duplicate { what: &'static str, name: String },

    #[error("invalid link '{link}': {reason}")]
    InvalidLink { link: String, reason: String },

    #[error("store I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("store encoding error: {0}")]
    Encoding(#[from] serde_json::Error),
}

/// Result type for repository operations.
pub type StoreResult<T> = Result<T, StoreError>;

/// Storage contract consumed by the assembly builder and the control service.
pub trait Repository: Send + Sync + 'static {
    /// Read the selected profiles, all groups, subscriptions, nodes and the
    /// running state in one consistent view.
    fn snapshot(&self) -> StoreResult<Snapshot>;

    /// Current running state.
    fn running_state(&self) -> StoreResult<RunningState>;

    /// All profiles of a kind, ordered by id.
    fn list_profiles(&self, kind: ProfileKind) -> StoreResult<Vec<ProfileRecord>>;

    /// Insert a new, unselected profile at version 1.
    fn create_profile(&self, kind: ProfileKind, name: &str, text: &str) -> StoreResult<ProfileRecord>;

    /// Replace profile text if `expected_version` still matches; bumps the version.
    fn update_profile(
        &self,
        kind: ProfileKind,
        id: RecordId,
        text: &str,
        expected_version: u32,
    ) -> StoreResult<ProfileRecord>;

    fn rename_profile(&self, kind: ProfileKind, id: RecordId, name: &str) -> StoreResult<()>;

    /// Delete a profile, returning the removed record.
    fn remove_profile(&self, kind: ProfileKind, id: RecordId) -> StoreResult<ProfileRecord>;

    /// Make `id` the only selected profile of its kind (`None` unselects all).
    /// Returns the previously selected id.
    fn select_profile(&self, kind: ProfileKind, id: Option<RecordId>) -> StoreResult<Option<RecordId>>;

    /// Replace the running state if its version still equals `expected_version`.
    /// The stored version becomes `expected_version + 1`.
    fn commit_running(&self, expected_version: u64, state: RunningState) -> StoreResult<RunningState>;
}
