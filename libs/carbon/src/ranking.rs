//! Ranked join of regions, nodes and tiers, and placement recommendation.

use crate::{AffinityTier, CarbonIntensityTable, ClusterNode, LabeledNode, NodeRecord};

/// Assign affinity tiers to nodes from a carbon intensity table.
///
/// Rank `i` joins the i-th region in ascending intensity order, `nodes[i]`
/// and `AffinityTier::SEQUENCE[i]`. The join truncates at the shortest of
/// the three, so at most `min(3, regions, nodes)` records are produced and
/// the remaining nodes are left out.
///
/// The caller decides the node order; it is used as given.
pub fn assign_tiers(nodes: &[ClusterNode], table: &CarbonIntensityTable) -> Vec<NodeRecord> {
    table
        .ranked()
        .into_iter()
        .filter_map(|ranked| {
            let tier = AffinityTier::for_rank(ranked.rank)?;
            let node = nodes.get(ranked.rank)?;
            Some(NodeRecord {
                name: node.name.clone(),
                region: ranked.region,
                carbon_intensity: ranked.intensity,
                affinity_tier: tier,
                internal_ip: node.internal_ip.clone(),
            })
        })
        .collect()
}

/// The node with the highest affinity tier.
///
/// Among nodes sharing the highest tier, the first in the given order wins.
/// Nodes without a tier are never recommended.
pub fn recommend(nodes: &[LabeledNode]) -> Option<&LabeledNode> {
    nodes
        .iter()
        .filter(|node| node.affinity_tier.is_some())
        .fold(None, |best: Option<&LabeledNode>, node| match best {
            Some(current) if current.affinity_tier >= node.affinity_tier => Some(current),
            _ => Some(node),
        })
}

/// The first node whose internal IP equals `ip`.
pub fn locate_by_ip<'a>(nodes: &'a [LabeledNode], ip: &str) -> Option<&'a LabeledNode> {
    nodes
        .iter()
        .find(|node| node.internal_ip.as_deref() == Some(ip))
}
