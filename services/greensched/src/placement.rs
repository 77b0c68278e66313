//! Placement reconciler.
//!
//! Compares where a newly created workload should have gone (the node with
//! the highest affinity tier) with where the cluster actually put it. The
//! result is observational only; nothing is moved or evicted.

use std::sync::Arc;

use async_trait::async_trait;
use greensched_carbon::{locate_by_ip, recommend, LabeledNode};
use tracing::{info, instrument, warn};

use crate::cluster::ClusterApi;
use crate::error::ClusterError;
use crate::events::{CreateHandler, WorkloadCreated};

/// Recommended versus actual placement of one workload.
#[derive(Debug, Clone, PartialEq)]
pub struct PlacementObservation {
    pub workload: String,
    pub recommended: Option<LabeledNode>,
    /// `None` until the workload has a host IP that maps to a listed node.
    pub actual: Option<LabeledNode>,
}

impl PlacementObservation {
    /// Whether the workload landed on the recommended node.
    pub fn is_match(&self) -> bool {
        match (&self.recommended, &self.actual) {
            (Some(recommended), Some(actual)) => recommended.name == actual.name,
            _ => false,
        }
    }
}

/// Reports recommended versus actual placement on workload creation.
pub struct PlacementReconciler {
    cluster: Arc<dyn ClusterApi>,
}

impl PlacementReconciler {
    pub fn new(cluster: Arc<dyn ClusterApi>) -> Self {
        Self { cluster }
    }

    /// Observe placement of `event`'s workload against current node labels.
    #[instrument(skip(self, event), fields(workload = %event.name))]
    pub async fn observe(
        &self,
        event: &WorkloadCreated,
    ) -> Result<PlacementObservation, ClusterError> {
        let nodes: Vec<LabeledNode> = self
            .cluster
            .list_nodes()
            .await?
            .iter()
            .map(LabeledNode::from)
            .collect();

        let recommended = recommend(&nodes).cloned();
        let actual = event
            .host_ip
            .as_deref()
            .and_then(|ip| locate_by_ip(&nodes, ip))
            .cloned();

        let observation = PlacementObservation {
            workload: event.name.clone(),
            recommended,
            actual,
        };

        info!(
            workload = %observation.workload,
            host_ip = ?event.host_ip,
            recommended = ?observation.recommended,
            actual = ?observation.actual,
            matched = observation.is_match(),
            "Workload placement"
        );
        Ok(observation)
    }
}

#[async_trait]
impl CreateHandler for PlacementReconciler {
    async fn on_create(&self, event: WorkloadCreated) {
        if let Err(e) = self.observe(&event).await {
            warn!(workload = %event.name, error = %e, "Failed to observe workload placement");
        }
    }
}
