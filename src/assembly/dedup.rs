//! Node deduplication by connection link.

use std::collections::HashMap;

use crate::assembly::ResolvedNode;

/// Collapse nodes sharing a link into one, merging their group memberships.
///
/// Output keeps first-occurrence order. When the first record has no tag but
/// a later record with the same link does, the tagged record is kept so the
/// tag survives as the node name.
pub fn deduplicate_nodes(nodes: Vec<ResolvedNode>) -> Vec<ResolvedNode> {
    let mut index: HashMap<String, usize> = HashMap::with_capacity(nodes.len());
    let mut out: Vec<ResolvedNode> = Vec::with_capacity(nodes.len());

    for node in nodes {
        match index.get(&node.record.link) {
            Some(&i) => {
                let kept = &mut out[i];
                for group in node.groups {
                    if !kept.groups.contains(&group) {
                        kept.groups.push(group);
                    }
                }
                if kept.record.tag.is_none() && node.record.tag.is_some() {
                    kept.record = node.record;
                }
            }
            None => {
                index.insert(node.record.link.clone(), out.len());
                out.push(node);
            }
        }
    }
    out
}
