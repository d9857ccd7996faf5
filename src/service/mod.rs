//! Control service.
//!
//! # Data Flow
//! ```text
//! run(dry = false):
//!     Repository::snapshot()
//!     → ProfileCompiler::compile(selected texts)
//!     → assembly::assemble()            validation errors stop here, nothing mutated
//!     → ReloadSender::submit()          blocks until the orchestrator answers
//!     → Repository::commit_running()    only after Applied
//!
//! run(dry = true):
//!     submit(empty) → commit_running(running = false)
//! ```
//!
//! # Design Decisions
//! - The service never touches engines; the reload queue is its only way in
//! - Profile text is compile-checked before it is persisted
//! - A version conflict is reported as such, with a hint to retry
//! - Operations that submit a reload hold one lock from snapshot to commit,
//!   so the recorded running state always matches what the engine serves

use std::sync::Arc;

use serde::Serialize;
use thiserror::Error;
use tokio::sync::Mutex;

use crate::assembly::{self, AssemblyError};
use crate::reload::{ReloadError, ReloadOutcome, ReloadSender};
use crate::runtime::{CompileError, CompiledProfiles, ProfileCompiler, RuntimeConfig};
use crate::store::{
    group_fingerprint, ProfileKind, ProfileRecord, RecordId, Repository, RunningState, Snapshot,
    StoreError,
};

/// Errors returned by control operations.
#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("please select a {0}")]
    NoSelection(ProfileKind),

    #[error(transparent)]
    Compile(#[from] CompileError),

    #[error(transparent)]
    Assembly(#[from] AssemblyError),

    #[error(transparent)]
    Store(StoreError),

    #[error(transparent)]
    Reload(#[from] ReloadError),

    #[error("{0}; retry against the current version")]
    Conflict(String),
}

impl From<StoreError> for ServiceError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::Conflict { .. } => ServiceError::Conflict(e.to_string()),
            other => ServiceError::Store(other),
        }
    }
}

pub type ServiceResult<T> = Result<T, ServiceError>;

/// Running state plus whether it still matches the persisted records.
#[derive(Debug, Clone, Serialize)]
pub struct Status {
    pub running: RunningState,
    /// True when a selected profile or a running group changed since the last run.
    pub stale: bool,
}

/// Administrative operations over a repository and the reload queue.
pub struct ControlService<R: Repository, C: ProfileCompiler> {
    repo: Arc<R>,
    compiler: C,
    reload: ReloadSender,
    /// Held across snapshot, reload and commit.
    transition: Mutex<()>,
}

impl<R: Repository, C: ProfileCompiler> ControlService<R, C> {
    pub fn new(repo: Arc<R>, compiler: C, reload: ReloadSender) -> Self {
        Self {
            repo,
            compiler,
            reload,
            transition: Mutex::new(()),
        }
    }

    pub fn repository(&self) -> &Arc<R> {
        &self.repo
    }

    /// Apply the selected profiles, or stop serving when `dry`.
    pub async fn run(&self, dry: bool) -> ServiceResult<RunningState> {
        let _transition = self.transition.lock().await;
        if dry {
            self.stop().await
        } else {
            self.apply().await
        }
    }

    /// Caller holds `transition`.
    async fn apply(&self) -> ServiceResult<RunningState> {
        let snapshot = self.repo.snapshot()?;
        let (global, dns, routing) = selected_profiles(&snapshot)?;
        let assembly = self.assemble_snapshot(&snapshot)?;

        let request_config = Arc::new(assembly.config);
        match self.reload.submit(request_config).await? {
            ReloadOutcome::Applied => {}
            outcome => {
                tracing::warn!(outcome = outcome.label(), "Reload not applied; running state unchanged");
                outcome.into_result()?;
            }
        }

        let state = RunningState {
            running: true,
            global: Some(global.stamp()),
            dns: Some(dns.stamp()),
            routing: Some(routing.stamp()),
            group_versions: group_fingerprint(&assembly.groups),
            running_groups: assembly.groups.iter().map(|g| g.id).collect(),
            version: snapshot.running.version,
        };
        let committed = self.repo.commit_running(snapshot.running.version, state)?;
        tracing::info!(
            global = global.id,
            dns = dns.id,
            routing = routing.id,
            groups = ?committed.running_groups,
            "Running state committed"
        );
        Ok(committed)
    }

    /// Assemble the selected profiles without submitting anything.
    pub fn assemble(&self) -> ServiceResult<RuntimeConfig> {
        let snapshot = self.repo.snapshot()?;
        Ok(self.assemble_snapshot(&snapshot)?.config)
    }

    fn assemble_snapshot(&self, snapshot: &Snapshot) -> ServiceResult<assembly::Assembly> {
        let (global, dns, routing) = selected_profiles(snapshot)?;
        let profiles = self
            .compiler
            .compile(Some(&global.text), Some(&dns.text), Some(&routing.text))?;
        Ok(assembly::assemble(profiles, snapshot)?)
    }

    /// Caller holds `transition`.
    async fn stop(&self) -> ServiceResult<RunningState> {
        let current = self.repo.running_state()?;
        self.reload
            .submit(Arc::new(RuntimeConfig::empty()))
            .await?
            .into_result()
            .map_err(|e| match e {
                ReloadError::RolledBack(msg) | ReloadError::Fatal(msg) => {
                    ReloadError::Fatal(format!("failed to dry run: {}", msg))
                }
                other => other,
            })?;

        let state = RunningState {
            running: false,
            ..current.clone()
        };
        let committed = self.repo.commit_running(current.version, state)?;
        tracing::info!("Stopped serving; running state cleared");
        Ok(committed)
    }

    /// Create a profile after checking that its text compiles.
    pub fn create_profile(&self, kind: ProfileKind, name: &str, text: &str) -> ServiceResult<ProfileRecord> {
        self.check_text(kind, text)?;
        let record = self.repo.create_profile(kind, name, text)?;
        tracing::info!(kind = %kind, id = record.id, name = %record.name, "Profile created");
        Ok(record)
    }

    /// Replace profile text. Takes effect on the next run.
    pub fn update_profile(
        &self,
        kind: ProfileKind,
        id: RecordId,
        text: &str,
        expected_version: u32,
    ) -> ServiceResult<ProfileRecord> {
        self.check_text(kind, text)?;
        let record = self.repo.update_profile(kind, id, text, expected_version)?;
        tracing::info!(kind = %kind, id = id, version = record.version, "Profile updated");
        Ok(record)
    }

    pub fn rename_profile(&self, kind: ProfileKind, id: RecordId, name: &str) -> ServiceResult<()> {
        self.repo.rename_profile(kind, id, name)?;
        Ok(())
    }

    pub fn list_profiles(&self, kind: ProfileKind) -> ServiceResult<Vec<ProfileRecord>> {
        Ok(self.repo.list_profiles(kind)?)
    }

    /// Select a profile. When this replaces an earlier selection while
    /// serving, the new selection is applied right away and reverted if
    /// that fails. Otherwise the orchestrator is not involved.
    pub async fn select_profile(&self, kind: ProfileKind, id: RecordId) -> ServiceResult<()> {
        let _transition = self.transition.lock().await;
        let previous = self.repo.select_profile(kind, Some(id))?;
        tracing::info!(kind = %kind, id = id, previous = ?previous, "Profile selected");

        let Some(previous) = previous else {
            return Ok(());
        };
        if !self.repo.running_state()?.running {
            return Ok(());
        }

        if let Err(e) = self.apply().await {
            tracing::warn!(kind = %kind, id = id, error = %e, "Failed to apply selection; reverting");
            if let Err(revert) = self.repo.select_profile(kind, Some(previous)) {
                tracing::error!(kind = %kind, id = previous, error = %revert, "Failed to revert selection");
            }
            return Err(e);
        }
        Ok(())
    }

    /// Remove a profile. Removing the selected profile while serving stops
    /// serving first; the record is kept if that fails.
    pub async fn remove_profile(&self, kind: ProfileKind, id: RecordId) -> ServiceResult<()> {
        let _transition = self.transition.lock().await;
        let snapshot = self.repo.snapshot()?;
        let serving = snapshot.running.running && snapshot.selected(kind).is_some_and(|p| p.id == id);
        if serving {
            self.stop().await?;
        }
        self.repo.remove_profile(kind, id)?;
        tracing::info!(kind = %kind, id = id, stopped = serving, "Profile removed");
        Ok(())
    }

    /// Running state and whether it lags behind the persisted records.
    pub fn status(&self) -> ServiceResult<Status> {
        let snapshot = self.repo.snapshot()?;
        let stale = snapshot.running.running && is_stale(&snapshot);
        Ok(Status {
            running: snapshot.running,
            stale,
        })
    }

    fn check_text(&self, kind: ProfileKind, text: &str) -> Result<CompiledProfiles, CompileError> {
        match kind {
            ProfileKind::Global => self.compiler.compile(Some(text), None, None),
            ProfileKind::Dns => self.compiler.compile(None, Some(text), None),
            ProfileKind::Routing => self.compiler.compile(None, None, Some(text)),
        }
    }
}

fn selected_profiles(
    snapshot: &Snapshot,
) -> ServiceResult<(&ProfileRecord, &ProfileRecord, &ProfileRecord)> {
    let pick = move |kind| snapshot.selected(kind).ok_or(ServiceError::NoSelection(kind));
    Ok((
        pick(ProfileKind::Global)?,
        pick(ProfileKind::Dns)?,
        pick(ProfileKind::Routing)?,
    ))
}

fn is_stale(snapshot: &Snapshot) -> bool {
    let running = &snapshot.running;
    let profile_changed = ProfileKind::ALL
        .iter()
        .any(|&kind| snapshot.selected(kind).map(ProfileRecord::stamp) != running.stamp(kind));
    if profile_changed {
        return true;
    }

    let mut groups = Vec::with_capacity(running.running_groups.len());
    for id in &running.running_groups {
        match snapshot.groups.iter().find(|g| g.id == *id) {
            Some(group) => groups.push(group),
            None => return true,
        }
    }
    group_fingerprint(groups) != running.group_versions
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reload::reload_queue;
    use crate::runtime::TomlCompiler;
    use crate::store::MemoryStore;

    fn service() -> (ControlService<MemoryStore, TomlCompiler>, crate::reload::ReloadReceiver) {
        let (tx, rx) = reload_queue(16);
        let service = ControlService::new(Arc::new(MemoryStore::new()), TomlCompiler, tx);
        (service, rx)
    }

    #[test]
    fn test_create_rejects_bad_text() {
        let (service, _rx) = service();
        let err = service
            .create_profile(ProfileKind::Dns, "bad", "ip_version_prefer = 5")
            .unwrap_err();
        assert!(matches!(err, ServiceError::Compile(CompileError::Dns(_))));
        assert!(service.list_profiles(ProfileKind::Dns).unwrap().is_empty());
    }

    #[test]
    fn test_update_conflict() {
        let (service, _rx) = service();
        let record = service
            .create_profile(ProfileKind::Global, "g", "tproxy_port = 12345")
            .unwrap();
        service
            .update_profile(ProfileKind::Global, record.id, "tproxy_port = 1", record.version)
            .unwrap();

        let err = service
            .update_profile(ProfileKind::Global, record.id, "tproxy_port = 2", record.version)
            .unwrap_err();
        assert!(matches!(err, ServiceError::Conflict(_)));
        assert!(err.to_string().ends_with("retry against the current version"));
    }

    #[tokio::test]
    async fn test_run_requires_selection() {
        let (service, _rx) = service();
        let record = service
            .create_profile(ProfileKind::Global, "g", "")
            .unwrap();
        service.select_profile(ProfileKind::Global, record.id).await.unwrap();

        let err = service.run(false).await.unwrap_err();
        assert!(matches!(err, ServiceError::NoSelection(ProfileKind::Dns)));
        assert_eq!(err.to_string(), "please select a dns");
    }

    #[test]
    fn test_status_not_running_is_not_stale() {
        let (service, _rx) = service();
        let status = service.status().unwrap();
        assert!(!status.running.running);
        assert!(!status.stale);
    }
}
