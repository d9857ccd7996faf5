//! Assembly of a runtime configuration from persisted records.

use crate::assembly::dedup::deduplicate_nodes;
use crate::assembly::naming::assign_unique_names;
use crate::assembly::{AssemblyError, ResolvedNode};
use crate::observability::metrics;
use crate::runtime::{
    CompiledProfiles, GroupSpec, NodeEntry, NodeFilter, Policy, RuntimeConfig, PRESET_OUTBOUNDS,
};
use crate::store::{GroupRecord, Snapshot};

/// Result of an assembly.
#[derive(Debug, Clone)]
pub struct Assembly {
    pub config: RuntimeConfig,
    /// Persisted groups that took part, in routing reference order.
    pub groups: Vec<GroupRecord>,
    /// Nodes with their final names, in emitted order.
    pub nodes: Vec<ResolvedNode>,
}

/// Build a runtime configuration from compiled profiles and the groups,
/// subscriptions and nodes of `records`.
pub fn assemble(profiles: CompiledProfiles, records: &Snapshot) -> Result<Assembly, AssemblyError> {
    let groups = referenced_groups(&profiles, records)?;

    let mut nodes = Vec::new();
    for group in &groups {
        collect_group_nodes(group, records, &mut nodes);
    }
    let mut nodes = deduplicate_nodes(nodes);
    assign_unique_names(&mut nodes)?;

    let group_specs: Vec<GroupSpec> = groups
        .iter()
        .map(|group| GroupSpec {
            name: group.name.clone(),
            policy: group_policy(group),
            filter: NodeFilter::Name(
                nodes
                    .iter()
                    .filter(|n| n.belongs_to(group.id))
                    .map(|n| n.unique_name.clone())
                    .collect(),
            ),
        })
        .collect();

    let node_entries: Vec<NodeEntry> = nodes
        .iter()
        .map(|n| NodeEntry {
            name: n.unique_name.clone(),
            link: n.record.link.clone(),
        })
        .collect();

    tracing::debug!(
        groups = group_specs.len(),
        nodes = node_entries.len(),
        "Runtime configuration assembled"
    );
    metrics::record_assembly(group_specs.len(), node_entries.len());

    let config = RuntimeConfig {
        global: profiles.global,
        dns: profiles.dns,
        routing: profiles.routing,
        groups: group_specs,
        nodes: node_entries,
    };

    Ok(Assembly { config, groups, nodes })
}

/// Persisted groups referenced by routing, in reference order.
fn referenced_groups(
    profiles: &CompiledProfiles,
    records: &Snapshot,
) -> Result<Vec<GroupRecord>, AssemblyError> {
    let mut found = Vec::new();
    let mut missing = Vec::new();

    for name in profiles.routing.necessary_outbounds() {
        match records.groups.iter().find(|g| g.name == name) {
            Some(group) => found.push(group.clone()),
            None if PRESET_OUTBOUNDS.contains(&name.as_str()) => {}
            None => missing.push(name),
        }
    }

    if !missing.is_empty() {
        return Err(AssemblyError::MissingGroups(missing));
    }
    Ok(found)
}

/// Nodes of every subscription in the group, then the group's solitary nodes.
fn collect_group_nodes(group: &GroupRecord, records: &Snapshot, out: &mut Vec<ResolvedNode>) {
    for subscription_id in &group.subscriptions {
        out.extend(
            records
                .nodes
                .iter()
                .filter(|n| n.subscription_id == Some(*subscription_id))
                .map(|n| ResolvedNode::new(n.clone(), group)),
        );
    }

    for node_id in &group.nodes {
        match records.nodes.iter().find(|n| n.id == *node_id) {
            Some(node) if node.subscription_id.is_none() => {
                out.push(ResolvedNode::new(node.clone(), group));
            }
            Some(_) => {}
            None => {
                tracing::warn!(group = %group.name, node_id = node_id, "Group references unknown node");
            }
        }
    }
}

fn group_policy(group: &GroupRecord) -> Policy {
    if group.policy_params.is_empty() {
        Policy::Plain(group.policy.clone())
    } else {
        Policy::Function {
            name: group.policy.clone(),
            params: group.policy_params.clone(),
        }
    }
}
