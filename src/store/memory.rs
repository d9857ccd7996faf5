//! In-process repository with optional JSON file persistence.

use std::fs;
use std::path::{Path, PathBuf};

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use crate::runtime::PolicyParam;
use crate::store::records::{
    GroupRecord, NodeRecord, ProfileKind, ProfileRecord, RecordId, RunningState, Snapshot,
    SubscriptionRecord,
};
use crate::store::{Repository, StoreError, StoreResult};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
struct StoreData {
    next_id: RecordId,
    profiles: Vec<ProfileRecord>,
    groups: Vec<GroupRecord>,
    subscriptions: Vec<SubscriptionRecord>,
    nodes: Vec<NodeRecord>,
    running: RunningState,
}

impl StoreData {
    fn allocate_id(&mut self) -> RecordId {
        self.next_id += 1;
        self.next_id
    }

    fn profile_mut(&mut self, kind: ProfileKind, id: RecordId) -> StoreResult<&mut ProfileRecord> {
        self.profiles
            .iter_mut()
            .find(|p| p.kind == kind && p.id == id)
            .ok_or(StoreError::NotFound { kind: "profile", id })
    }

    fn group_mut(&mut self, id: RecordId) -> StoreResult<&mut GroupRecord> {
        self.groups
            .iter_mut()
            .find(|g| g.id == id)
            .ok_or(StoreError::NotFound { kind: "group", id })
    }

    fn selected(&self, kind: ProfileKind) -> Option<&ProfileRecord> {
        self.profiles.iter().find(|p| p.kind == kind && p.selected)
    }
}

/// Repository kept in memory and written through to a JSON file.
///
/// Every mutation is applied to a draft copy first; the draft replaces the
/// live data only after it has been persisted, so a failed write leaves the
/// store untouched.
#[derive(Debug, Default)]
pub struct MemoryStore {
    inner: RwLock<StoreData>,
    path: Option<PathBuf>,
}

impl MemoryStore {
    /// Create an empty store that is never written to disk.
    pub fn new() -> Self {
        Self::default()
    }

    /// Open a store backed by `path`, loading it if the file exists.
    pub fn open(path: impl AsRef<Path>) -> StoreResult<Self> {
        let path = path.as_ref().to_path_buf();
        let data = if path.exists() {
            let content = fs::read_to_string(&path)?;
            let data: StoreData = serde_json::from_str(&content)?;
            tracing::info!(
                path = %path.display(),
                profiles = data.profiles.len(),
                groups = data.groups.len(),
                nodes = data.nodes.len(),
                "Loaded store"
            );
            data
        } else {
            StoreData::default()
        };
        Ok(Self {
            inner: RwLock::new(data),
            path: Some(path),
        })
    }

    fn persist(&self, data: &StoreData) -> StoreResult<()> {
        let Some(path) = &self.path else {
            return Ok(());
        };
        let tmp = path.with_extension("tmp");
        fs::write(&tmp, serde_json::to_vec_pretty(data)?)?;
        fs::rename(&tmp, path)?;
        Ok(())
    }

    fn read<T>(&self, f: impl FnOnce(&StoreData) -> T) -> T {
        f(&self.inner.read())
    }

    fn mutate<T>(&self, f: impl FnOnce(&mut StoreData) -> StoreResult<T>) -> StoreResult<T> {
        let mut guard = self.inner.write();
        let mut draft = guard.clone();
        let out = f(&mut draft)?;
        self.persist(&draft)?;
        *guard = draft;
        Ok(out)
    }

    /// Add an outbound group at version 1.
    pub fn add_group(
        &self,
        name: &str,
        policy: &str,
        policy_params: Vec<PolicyParam>,
    ) -> StoreResult<GroupRecord> {
        self.mutate(|data| {
            if data.groups.iter().any(|g| g.name == name) {
                return Err(StoreError::Duplicate {
                    what: "group",
                    name: name.to_string(),
                });
            }
            let group = GroupRecord {
                id: data.allocate_id(),
                name: name.to_string(),
                policy: policy.to_string(),
                policy_params,
                subscriptions: Vec::new(),
                nodes: Vec::new(),
                version: 1,
            };
            data.groups.push(group.clone());
            Ok(group)
        })
    }

    /// Add a subscription together with the nodes it resolved to.
    pub fn add_subscription(
        &self,
        link: &str,
        tag: Option<&str>,
        nodes: Vec<(String, String)>,
    ) -> StoreResult<(SubscriptionRecord, Vec<NodeRecord>)> {
        validate_link(link)?;
        for (_, node_link) in &nodes {
            validate_link(node_link)?;
        }
        self.mutate(|data| {
            let subscription = SubscriptionRecord {
                id: data.allocate_id(),
                link: link.to_string(),
                tag: tag.map(str::to_string),
            };
            let mut created = Vec::with_capacity(nodes.len());
            for (name, node_link) in nodes {
                let node = NodeRecord {
                    id: data.allocate_id(),
                    name,
                    link: node_link,
                    tag: None,
                    subscription_id: Some(subscription.id),
                };
                data.nodes.push(node.clone());
                created.push(node);
            }
            data.subscriptions.push(subscription.clone());
            Ok((subscription, created))
        })
    }

    /// Add a node that belongs to no subscription.
    pub fn add_node(&self, name: &str, link: &str, tag: Option<&str>) -> StoreResult<NodeRecord> {
        validate_link(link)?;
        self.mutate(|data| {
            if let Some(tag) = tag {
                if data.nodes.iter().any(|n| n.tag.as_deref() == Some(tag)) {
                    return Err(StoreError::Duplicate {
                        what: "node tag",
                        name: tag.to_string(),
                    });
                }
            }
            let node = NodeRecord {
                id: data.allocate_id(),
                name: name.to_string(),
                link: link.to_string(),
                tag: tag.map(str::to_string),
                subscription_id: None,
            };
            data.nodes.push(node.clone());
            Ok(node)
        })
    }

    /// Attach a subscription to a group; bumps the group version.
    pub fn attach_subscription(&self, group_id: RecordId, subscription_id: RecordId) -> StoreResult<()> {
        self.mutate(|data| {
            if !data.subscriptions.iter().any(|s| s.id == subscription_id) {
                return Err(StoreError::NotFound {
                    kind: "subscription",
                    id: subscription_id,
                });
            }
            let group = data.group_mut(group_id)?;
            if !group.subscriptions.contains(&subscription_id) {
                group.subscriptions.push(subscription_id);
                group.version += 1;
            }
            Ok(())
        })
    }

    /// Attach a node directly to a group; bumps the group version.
    pub fn attach_node(&self, group_id: RecordId, node_id: RecordId) -> StoreResult<()> {
        self.mutate(|data| {
            if !data.nodes.iter().any(|n| n.id == node_id) {
                return Err(StoreError::NotFound { kind: "node", id: node_id });
            }
            let group = data.group_mut(group_id)?;
            if !group.nodes.contains(&node_id) {
                group.nodes.push(node_id);
                group.version += 1;
            }
            Ok(())
        })
    }

    /// All groups, ordered by id.
    pub fn list_groups(&self) -> Vec<GroupRecord> {
        self.read(|data| data.groups.clone())
    }
}

fn validate_link(link: &str) -> StoreResult<()> {
    url::Url::parse(link)
        .map(|_| ())
        .map_err(|e| StoreError::InvalidLink {
            link: link.to_string(),
            reason: e.to_string(),
        })
}

impl Repository for MemoryStore {
    fn snapshot(&self) -> StoreResult<Snapshot> {
        Ok(self.read(|data| Snapshot {
            global: data.selected(ProfileKind::Global).cloned(),
            dns: data.selected(ProfileKind::Dns).cloned(),
            routing: data.selected(ProfileKind::Routing).cloned(),
            groups: data.groups.clone(),
            subscriptions: data.subscriptions.clone(),
            nodes: data.nodes.clone(),
            running: data.running.clone(),
        }))
    }

    fn running_state(&self) -> StoreResult<RunningState> {
        Ok(self.read(|data| data.running.clone()))
    }

    fn list_profiles(&self, kind: ProfileKind) -> StoreResult<Vec<ProfileRecord>> {
        Ok(self.read(|data| {
            data.profiles
                .iter()
                .filter(|p| p.kind == kind)
                .cloned()
                .collect()
        }))
    }

    fn create_profile(&self, kind: ProfileKind, name: &str, text: &str) -> StoreResult<ProfileRecord> {
        self.mutate(|data| {
            let profile = ProfileRecord {
                id: data.allocate_id(),
                kind,
                name: name.to_string(),
                text: text.to_string(),
                version: 1,
                selected: false,
            };
            data.profiles.push(profile.clone());
            Ok(profile)
        })
    }

    fn update_profile(
        &self,
        kind: ProfileKind,
        id: RecordId,
        text: &str,
        expected_version: u32,
    ) -> StoreResult<ProfileRecord> {
        self.mutate(|data| {
            let profile = data.profile_mut(kind, id)?;
            if profile.version != expected_version {
                return Err(StoreError::Conflict {
                    what: format!("{} profile {}", kind, id),
                    expected: expected_version as u64,
                    actual: profile.version as u64,
                });
            }
            profile.text = text.to_string();
            profile.version += 1;
            Ok(profile.clone())
        })
    }

    fn rename_profile(&self, kind: ProfileKind, id: RecordId, name: &str) -> StoreResult<()> {
        self.mutate(|data| {
            data.profile_mut(kind, id)?.name = name.to_string();
            Ok(())
        })
    }

    fn remove_profile(&self, kind: ProfileKind, id: RecordId) -> StoreResult<ProfileRecord> {
        self.mutate(|data| {
            let index = data
                .profiles
                .iter()
                .position(|p| p.kind == kind && p.id == id)
                .ok_or(StoreError::NotFound { kind: "profile", id })?;
            Ok(data.profiles.remove(index))
        })
    }

    fn select_profile(&self, kind: ProfileKind, id: Option<RecordId>) -> StoreResult<Option<RecordId>> {
        self.mutate(|data| {
            if let Some(id) = id {
                data.profile_mut(kind, id)?;
            }
            let previous = data.selected(kind).map(|p| p.id);
            for profile in data.profiles.iter_mut().filter(|p| p.kind == kind) {
                profile.selected = Some(profile.id) == id;
            }
            Ok(previous)
        })
    }

    fn commit_running(&self, expected_version: u64, mut state: RunningState) -> StoreResult<RunningState> {
        self.mutate(|data| {
            if data.running.version != expected_version {
                return Err(StoreError::Conflict {
                    what: "running state".to_string(),
                    expected: expected_version,
                    actual: data.running.version,
                });
            }
            state.version = expected_version + 1;
            data.running = state.clone();
            Ok(state)
        })
    }
}
