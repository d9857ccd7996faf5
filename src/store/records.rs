//! Persisted records.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::runtime::PolicyParam;

/// Record identifier.
pub type RecordId = u32;

/// Kind of selectable profile.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProfileKind {
    Global,
    Dns,
    Routing,
}

impl ProfileKind {
    pub const ALL: [ProfileKind; 3] = [ProfileKind::Global, ProfileKind::Dns, ProfileKind::Routing];
}

impl fmt::Display for ProfileKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ProfileKind::Global => "global",
            ProfileKind::Dns => "dns",
            ProfileKind::Routing => "routing",
        };
        write!(f, "{}", name)
    }
}

impl std::str::FromStr for ProfileKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "global" => Ok(ProfileKind::Global),
            "dns" => Ok(ProfileKind::Dns),
            "routing" => Ok(ProfileKind::Routing),
            other => Err(format!("unknown profile kind '{}'", other)),
        }
    }
}

/// A versioned, selectable configuration fragment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProfileRecord {
    pub id: RecordId,
    pub kind: ProfileKind,
    pub name: String,
    pub text: String,
    pub version: u32,
    pub selected: bool,
}

impl ProfileRecord {
    pub fn stamp(&self) -> ProfileStamp {
        ProfileStamp {
            id: self.id,
            version: self.version,
        }
    }
}

/// Identity plus version of a profile at the time it was applied.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProfileStamp {
    pub id: RecordId,
    pub version: u32,
}

/// Outbound group.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupRecord {
    pub id: RecordId,
    pub name: String,
    pub policy: String,
    #[serde(default)]
    pub policy_params: Vec<PolicyParam>,
    /// Subscriptions whose nodes all belong to this group.
    #[serde(default)]
    pub subscriptions: Vec<RecordId>,
    /// Nodes attached directly to this group.
    #[serde(default)]
    pub nodes: Vec<RecordId>,
    pub version: u32,
}

/// Subscription that owns a list of nodes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubscriptionRecord {
    pub id: RecordId,
    pub link: String,
    pub tag: Option<String>,
}

/// Single proxy endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeRecord {
    pub id: RecordId,
    pub name: String,
    pub link: String,
    /// Explicit unique tag, used verbatim as the node name.
    pub tag: Option<String>,
    pub subscription_id: Option<RecordId>,
}

/// What is currently applied, written only after a transition commits.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RunningState {
    pub running: bool,
    pub global: Option<ProfileStamp>,
    pub dns: Option<ProfileStamp>,
    pub routing: Option<ProfileStamp>,
    /// Comma separated versions of the running groups, in reference order.
    pub group_versions: String,
    pub running_groups: Vec<RecordId>,
    /// Optimistic concurrency counter, bumped on every commit.
    pub version: u64,
}

impl RunningState {
    pub fn stamp(&self, kind: ProfileKind) -> Option<ProfileStamp> {
        match kind {
            ProfileKind::Global => self.global,
            ProfileKind::Dns => self.dns,
            ProfileKind::Routing => self.routing,
        }
    }
}

/// Fingerprint of the group versions that took part in an assembly.
pub fn group_fingerprint<'a>(groups: impl IntoIterator<Item = &'a GroupRecord>) -> String {
    groups
        .into_iter()
        .map(|g| g.version.to_string())
        .collect::<Vec<_>>()
        .join(",")
}

/// Consistent read of everything the assembly builder needs.
#[derive(Debug, Clone, Default)]
pub struct Snapshot {
    pub global: Option<ProfileRecord>,
    pub dns: Option<ProfileRecord>,
    pub routing: Option<ProfileRecord>,
    pub groups: Vec<GroupRecord>,
    pub subscriptions: Vec<SubscriptionRecord>,
    pub nodes: Vec<NodeRecord>,
    pub running: RunningState,
}

impl Snapshot {
    pub fn selected(&self, kind: ProfileKind) -> Option<&ProfileRecord> {
        match kind {
            ProfileKind::Global => self.global.as_ref(),
            ProfileKind::Dns => self.dns.as_ref(),
            ProfileKind::Routing => self.routing.as_ref(),
        }
    }
}
