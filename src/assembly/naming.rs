//! Collision-free node names.
//!
//! # Design Decisions
//! - Tagged nodes are named first; their tags are reserved verbatim
//! - Untagged nodes use `subscriptionID.name` (or `name`), then `.0`, `.1`, ...
//! - The tagged/untagged partition is a stable sort, so names depend only on input order

use std::collections::HashSet;

use crate::assembly::{AssemblyError, ResolvedNode};

/// Assign `unique_name` to every node. Reorders `nodes` so tagged nodes come first.
pub fn assign_unique_names(nodes: &mut [ResolvedNode]) -> Result<(), AssemblyError> {
    // Stable: equal keys keep their relative order
    nodes.sort_by_key(|n| n.record.tag.is_none());

    let mut reserved: HashSet<String> = HashSet::with_capacity(nodes.len());
    for node in nodes.iter_mut() {
        let name = match &node.record.tag {
            Some(tag) => {
                if !reserved.insert(tag.clone()) {
                    return Err(AssemblyError::DuplicateTag(tag.clone()));
                }
                tag.clone()
            }
            None => {
                let base = base_name(node);
                let mut wanted = base.clone();
                let mut suffix = 0usize;
                while reserved.contains(&wanted) {
                    wanted = format!("{}.{}", base, suffix);
                    suffix += 1;
                }
                reserved.insert(wanted.clone());
                wanted
            }
        };
        node.unique_name = name;
    }
    Ok(())
}

fn base_name(node: &ResolvedNode) -> String {
    match node.record.subscription_id {
        Some(sub) => format!("{}.{}", sub, node.record.name),
        None => node.record.name.clone(),
    }
}
