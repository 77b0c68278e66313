//! Node labeling pass.
//!
//! Fetches carbon intensity, ranks regions, and writes the resulting tier
//! assignment onto nodes as labels. A failure to fetch or list aborts the
//! pass before anything is written; a failure to patch one node is logged
//! and the remaining nodes are still labeled.

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use greensched_carbon::{
    assign_tiers, ClusterNode, NodeRecord, AFFINITY_LABEL, CARBON_INTENSITY_LABEL,
    HOSTNAME_LABEL, REGION_LABEL,
};
use tracing::{debug, info, warn};

use crate::cluster::ClusterApi;
use crate::error::{LabelError, NodePatchError};
use crate::feed::CarbonIntensitySource;

/// Order in which listed nodes are paired with ranked regions.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum NodeOrder {
    /// Use the order returned by the control plane.
    #[default]
    Listing,
    /// Sort by node name, independent of API ordering.
    Name,
}

impl NodeOrder {
    pub fn apply(self, nodes: &mut [ClusterNode]) {
        match self {
            NodeOrder::Listing => {}
            NodeOrder::Name => nodes.sort_by(|a, b| a.name.cmp(&b.name)),
        }
    }
}

impl fmt::Display for NodeOrder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NodeOrder::Listing => write!(f, "listing"),
            NodeOrder::Name => write!(f, "name"),
        }
    }
}

impl FromStr for NodeOrder {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "listing" => Ok(NodeOrder::Listing),
            "name" => Ok(NodeOrder::Name),
            other => Err(format!("expected 'listing' or 'name', got '{other}'")),
        }
    }
}

/// Outcome of one labeling pass.
#[derive(Debug, Default)]
pub struct LabelingReport {
    /// Number of regions in the fetched table.
    pub regions: usize,
    /// Number of nodes listed.
    pub nodes: usize,
    /// Assignments that were written.
    pub labeled: Vec<NodeRecord>,
    /// Assignments whose patch failed.
    pub failed: Vec<NodePatchError>,
}

impl LabelingReport {
    pub fn is_complete(&self) -> bool {
        self.failed.is_empty()
    }
}

/// Writes carbon-derived affinity tiers onto cluster nodes.
pub struct NodeLabeler {
    source: Arc<dyn CarbonIntensitySource>,
    cluster: Arc<dyn ClusterApi>,
    order: NodeOrder,
}

impl NodeLabeler {
    pub fn new(
        source: Arc<dyn CarbonIntensitySource>,
        cluster: Arc<dyn ClusterApi>,
        order: NodeOrder,
    ) -> Self {
        Self {
            source,
            cluster,
            order,
        }
    }

    /// Run one labeling pass.
    pub async fn label_nodes(&self) -> Result<LabelingReport, LabelError> {
        let table = self.source.fetch().await?;
        let mut nodes = self.cluster.list_nodes().await?;
        self.order.apply(&mut nodes);

        let records = assign_tiers(&nodes, &table);
        debug!(
            regions = table.len(),
            nodes = nodes.len(),
            assignments = records.len(),
            order = %self.order,
            "Computed tier assignments"
        );

        let mut report = LabelingReport {
            regions: table.len(),
            nodes: nodes.len(),
            ..LabelingReport::default()
        };

        for record in records {
            match self
                .cluster
                .patch_node_labels(&record.name, &record.labels())
                .await
            {
                Ok(node) => {
                    info!(
                        node = %record.name,
                        region = ?node.labels.get(REGION_LABEL),
                        node_affinity = ?node.labels.get(AFFINITY_LABEL),
                        carbon_intensity = ?node.labels.get(CARBON_INTENSITY_LABEL),
                        hostname = ?node.labels.get(HOSTNAME_LABEL),
                        "Labeled node"
                    );
                    report.labeled.push(record);
                }
                Err(source) => {
                    let err = NodePatchError {
                        node: record.name.clone(),
                        source,
                    };
                    warn!(error = %err, node = %record.name, "Error labeling node");
                    report.failed.push(err);
                }
            }
        }

        Ok(report)
    }
}
