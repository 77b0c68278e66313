//! Node snapshots and the label encoding of tier assignments.

use std::collections::BTreeMap;

use crate::AffinityTier;

/// Label holding the region a node was assigned to.
pub const REGION_LABEL: &str = "region";

/// Label holding the stringified affinity tier.
pub const AFFINITY_LABEL: &str = "node_affinity";

/// Label holding the stringified carbon intensity.
pub const CARBON_INTENSITY_LABEL: &str = "carbon_intensity";

/// Well-known hostname label, reported alongside labeling results.
pub const HOSTNAME_LABEL: &str = "kubernetes.io/hostname";

/// A cluster node as listed by the control plane.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ClusterNode {
    pub name: String,
    /// First `InternalIP` address reported by the node, if any.
    pub internal_ip: Option<String>,
    pub labels: BTreeMap<String, String>,
}

impl ClusterNode {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    pub fn with_ip(mut self, ip: impl Into<String>) -> Self {
        self.internal_ip = Some(ip.into());
        self
    }

    pub fn with_label(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.labels.insert(key.into(), value.into());
        self
    }
}

/// One tier assignment produced by a labeling pass.
#[derive(Debug, Clone, PartialEq)]
pub struct NodeRecord {
    pub name: String,
    pub region: String,
    pub carbon_intensity: f64,
    pub affinity_tier: AffinityTier,
    pub internal_ip: Option<String>,
}

impl NodeRecord {
    /// Labels to write on the node. All three are written in one patch.
    pub fn labels(&self) -> BTreeMap<String, String> {
        BTreeMap::from([
            (REGION_LABEL.to_string(), self.region.clone()),
            (AFFINITY_LABEL.to_string(), self.affinity_tier.label_value()),
            (
                CARBON_INTENSITY_LABEL.to_string(),
                self.carbon_intensity.to_string(),
            ),
        ])
    }
}

/// A node's tier labels as read back from the cluster.
///
/// Nodes that were never labeled, or carry malformed values, decode with
/// the affected fields set to `None`.
#[derive(Debug, Clone, PartialEq)]
pub struct LabeledNode {
    pub name: String,
    pub region: Option<String>,
    pub affinity_tier: Option<AffinityTier>,
    pub carbon_intensity: Option<f64>,
    pub internal_ip: Option<String>,
}

impl From<&ClusterNode> for LabeledNode {
    fn from(node: &ClusterNode) -> Self {
        Self {
            name: node.name.clone(),
            region: node.labels.get(REGION_LABEL).cloned(),
            affinity_tier: node
                .labels
                .get(AFFINITY_LABEL)
                .and_then(|value| value.parse().ok()),
            carbon_intensity: node
                .labels
                .get(CARBON_INTENSITY_LABEL)
                .and_then(|value| value.parse().ok()),
            internal_ip: node.internal_ip.clone(),
        }
    }
}
