//! Cluster control-plane access.
//!
//! The scheduler only needs four things from the cluster: list nodes,
//! merge-patch node labels, watch labeled pods for creation, and read a
//! pod's host IP. [`ClusterApi`] captures exactly that; [`KubeCluster`]
//! implements it on kube-rs and [`MockCluster`] in memory.

use std::collections::{BTreeMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use futures_util::stream::{self, BoxStream};
use futures_util::{StreamExt, TryStreamExt};
use greensched_carbon::ClusterNode;
use k8s_openapi::api::core::v1::{Node, Pod};
use kube::api::{Api, ListParams, Patch, PatchParams};
use kube::core::SelectorExt;
use kube::runtime::{watcher, WatchStreamExt};
use tokio::sync::{broadcast, RwLock};
use tracing::debug;

use crate::error::ClusterError;
use crate::events::{ResourceKind, Subscription, WorkloadCreated};

/// Cluster operations used by the labeler and the placement reconciler.
#[async_trait]
pub trait ClusterApi: Send + Sync {
    /// List nodes in the order the control plane returns them.
    async fn list_nodes(&self) -> Result<Vec<ClusterNode>, ClusterError>;

    /// Merge `labels` into a node's labels and return the updated node.
    async fn patch_node_labels(
        &self,
        name: &str,
        labels: &BTreeMap<String, String>,
    ) -> Result<ClusterNode, ClusterError>;

    /// Stream creation events for resources matching `subscription`.
    fn watch_created(
        &self,
        subscription: &Subscription,
    ) -> BoxStream<'static, Result<WorkloadCreated, ClusterError>>;
}

/// kube-rs backed cluster client.
#[derive(Clone)]
pub struct KubeCluster {
    client: kube::Client,
}

impl KubeCluster {
    pub fn new(client: kube::Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl ClusterApi for KubeCluster {
    async fn list_nodes(&self) -> Result<Vec<ClusterNode>, ClusterError> {
        let api: Api<Node> = Api::all(self.client.clone());
        let list = api.list(&ListParams::default()).await?;
        debug!(node_count = list.items.len(), "Listed nodes");
        Ok(list.items.into_iter().map(cluster_node).collect())
    }

    async fn patch_node_labels(
        &self,
        name: &str,
        labels: &BTreeMap<String, String>,
    ) -> Result<ClusterNode, ClusterError> {
        let api: Api<Node> = Api::all(self.client.clone());
        let patch = serde_json::json!({ "metadata": { "labels": labels } });
        let node = api
            .patch(name, &PatchParams::default(), &Patch::Merge(&patch))
            .await?;
        Ok(cluster_node(node))
    }

    fn watch_created(
        &self,
        subscription: &Subscription,
    ) -> BoxStream<'static, Result<WorkloadCreated, ClusterError>> {
        match subscription.kind {
            ResourceKind::Pod => {
                let api: Api<Pod> = Api::all(self.client.clone());
                let config =
                    watcher::Config::default().labels_from(&subscription.selector.to_selector());
                let mut tracker = CreationTracker::default();

                watcher(api, config)
                    .default_backoff()
                    .map_err(ClusterError::from)
                    .map_ok(move |event| {
                        stream::iter(
                            tracker
                                .observe(event)
                                .into_iter()
                                .map(Ok::<WorkloadCreated, ClusterError>),
                        )
                    })
                    .try_flatten()
                    .boxed()
            }
        }
    }
}

fn cluster_node(node: Node) -> ClusterNode {
    let internal_ip = node
        .status
        .and_then(|status| status.addresses)
        .and_then(|addresses| {
            addresses
                .into_iter()
                .find(|address| address.type_ == "InternalIP")
                .map(|address| address.address)
        });

    ClusterNode {
        name: node.metadata.name.unwrap_or_default(),
        internal_ip,
        labels: node.metadata.labels.unwrap_or_default(),
    }
}

fn workload_created(pod: Pod) -> Option<WorkloadCreated> {
    Some(WorkloadCreated {
        uid: pod.metadata.uid?,
        name: pod.metadata.name.unwrap_or_default(),
        namespace: pod.metadata.namespace,
        labels: pod.metadata.labels.unwrap_or_default(),
        host_ip: pod.status.and_then(|status| status.host_ip),
    })
}

/// Turns raw watch events into creation events.
///
/// Pods present in the very first listing already existed when the watch
/// started and are not reported. Any other pod is reported once, on the
/// first event that carries its host IP; until then it stays pending. A pod
/// that shows up through a re-list after the watch reconnects counts as new.
#[derive(Debug, Default)]
pub struct CreationTracker {
    /// Pre-existing or already reported.
    reported: HashSet<String>,
    /// New, waiting for a host IP.
    pending: HashSet<String>,
    relist: Option<HashSet<String>>,
    synced: bool,
}

impl CreationTracker {
    pub fn observe(&mut self, event: watcher::Event<Pod>) -> Vec<WorkloadCreated> {
        match event {
            watcher::Event::Init => {
                self.relist = Some(HashSet::new());
                Vec::new()
            }
            watcher::Event::InitApply(pod) => {
                let Some(created) = workload_created(pod) else {
                    return Vec::new();
                };
                if let Some(relist) = self.relist.as_mut() {
                    relist.insert(created.uid.clone());
                }
                if self.synced {
                    self.sighted(created)
                } else {
                    Vec::new()
                }
            }
            watcher::Event::InitDone => {
                let listed = self.relist.take().unwrap_or_default();
                if self.synced {
                    // Forget pods deleted while the watch was down.
                    self.reported.retain(|uid| listed.contains(uid));
                    self.pending.retain(|uid| listed.contains(uid));
                } else {
                    self.reported = listed;
                    self.synced = true;
                }
                Vec::new()
            }
            watcher::Event::Apply(pod) => match workload_created(pod) {
                Some(created) => self.sighted(created),
                None => Vec::new(),
            },
            watcher::Event::Delete(pod) => {
                if let Some(uid) = pod.metadata.uid.as_ref() {
                    self.reported.remove(uid);
                    self.pending.remove(uid);
                }
                Vec::new()
            }
        }
    }

    /// Number of new pods still waiting for a host IP.
    pub fn pending(&self) -> usize {
        self.pending.len()
    }

    fn sighted(&mut self, created: WorkloadCreated) -> Vec<WorkloadCreated> {
        if self.reported.contains(&created.uid) {
            return Vec::new();
        }
        if created.host_ip.is_none() {
            if self.pending.insert(created.uid.clone()) {
                debug!(workload = %created.name, "Workload created, waiting for host IP");
            }
            return Vec::new();
        }

        self.pending.remove(&created.uid);
        self.reported.insert(created.uid.clone());
        vec![created]
    }
}

/// In-memory cluster for testing and development.
pub struct MockCluster {
    nodes: RwLock<Vec<ClusterNode>>,
    failing_patches: RwLock<HashSet<String>>,
    list_calls: AtomicUsize,
    patch_calls: AtomicUsize,
    events: broadcast::Sender<WorkloadCreated>,
}

impl MockCluster {
    pub fn new(nodes: Vec<ClusterNode>) -> Self {
        let (events, _) = broadcast::channel(64);
        Self {
            nodes: RwLock::new(nodes),
            failing_patches: RwLock::new(HashSet::new()),
            list_calls: AtomicUsize::new(0),
            patch_calls: AtomicUsize::new(0),
            events,
        }
    }

    /// Make label patches for `node` fail.
    pub async fn fail_patches_for(&self, node: &str) {
        self.failing_patches.write().await.insert(node.to_string());
    }

    /// Current node state.
    pub async fn nodes(&self) -> Vec<ClusterNode> {
        self.nodes.read().await.clone()
    }

    pub async fn node(&self, name: &str) -> Option<ClusterNode> {
        self.nodes.read().await.iter().find(|n| n.name == name).cloned()
    }

    pub fn list_calls(&self) -> usize {
        self.list_calls.load(Ordering::SeqCst)
    }

    pub fn patch_calls(&self) -> usize {
        self.patch_calls.load(Ordering::SeqCst)
    }

    /// Deliver a creation event to open watches. Returns the number of
    /// watches that received it.
    pub fn emit(&self, event: WorkloadCreated) -> usize {
        self.events.send(event).unwrap_or(0)
    }
}

#[async_trait]
impl ClusterApi for MockCluster {
    async fn list_nodes(&self) -> Result<Vec<ClusterNode>, ClusterError> {
        self.list_calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.nodes.read().await.clone())
    }

    async fn patch_node_labels(
        &self,
        name: &str,
        labels: &BTreeMap<String, String>,
    ) -> Result<ClusterNode, ClusterError> {
        self.patch_calls.fetch_add(1, Ordering::SeqCst);

        if self.failing_patches.read().await.contains(name) {
            return Err(ClusterError::Rejected(format!("patch of node {name} refused")));
        }

        let mut nodes = self.nodes.write().await;
        let node = nodes
            .iter_mut()
            .find(|n| n.name == name)
            .ok_or_else(|| ClusterError::Rejected(format!("node {name} not found")))?;
        node.labels
            .extend(labels.iter().map(|(k, v)| (k.clone(), v.clone())));
        Ok(node.clone())
    }

    fn watch_created(
        &self,
        subscription: &Subscription,
    ) -> BoxStream<'static, Result<WorkloadCreated, ClusterError>> {
        let selector = subscription.selector.to_selector();
        let receiver = self.events.subscribe();

        stream::unfold(receiver, |mut receiver| async move {
            loop {
                match receiver.recv().await {
                    Ok(event) => return Some((event, receiver)),
                    Err(broadcast::error::RecvError::Lagged(_)) => continue,
                    Err(broadcast::error::RecvError::Closed) => return None,
                }
            }
        })
        .filter(move |event| std::future::ready(selector.matches(&event.labels)))
        .map(Ok)
        .boxed()
    }
}

#[cfg(test)]
mod tests {
    use k8s_openapi::api::core::v1::{NodeAddress, NodeStatus, PodStatus};
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;

    use super::*;

    fn pod(uid: &str, name: &str, host_ip: Option<&str>) -> Pod {
        Pod {
            metadata: ObjectMeta {
                name: Some(name.to_string()),
                namespace: Some("default".to_string()),
                uid: Some(uid.to_string()),
                labels: Some(BTreeMap::from([("kopf".to_string(), "true".to_string())])),
                ..ObjectMeta::default()
            },
            status: Some(PodStatus {
                host_ip: host_ip.map(str::to_string),
                ..PodStatus::default()
            }),
            ..Pod::default()
        }
    }

    fn names(events: Vec<WorkloadCreated>) -> Vec<String> {
        events.into_iter().map(|e| e.name).collect()
    }

    #[test]
    fn test_cluster_node_picks_internal_ip() {
        let node = Node {
            metadata: ObjectMeta {
                name: Some("n1".to_string()),
                labels: Some(BTreeMap::from([("region".to_string(), "us".to_string())])),
                ..ObjectMeta::default()
            },
            status: Some(NodeStatus {
                addresses: Some(vec![
                    NodeAddress {
                        address: "n1.example".to_string(),
                        type_: "Hostname".to_string(),
                    },
                    NodeAddress {
                        address: "10.0.0.1".to_string(),
                        type_: "InternalIP".to_string(),
                    },
                ]),
                ..NodeStatus::default()
            }),
            ..Node::default()
        };

        let converted = cluster_node(node);
        assert_eq!(converted.name, "n1");
        assert_eq!(converted.internal_ip.as_deref(), Some("10.0.0.1"));
        assert_eq!(converted.labels["region"], "us");
    }

    #[test]
    fn test_cluster_node_without_status() {
        let node = Node {
            metadata: ObjectMeta {
                name: Some("bare".to_string()),
                ..ObjectMeta::default()
            },
            ..Node::default()
        };

        let converted = cluster_node(node);
        assert_eq!(converted.internal_ip, None);
        assert!(converted.labels.is_empty());
    }

    #[test]
    fn test_tracker_skips_initial_listing() {
        let mut tracker = CreationTracker::default();

        assert!(tracker.observe(watcher::Event::Init).is_empty());
        assert!(tracker
            .observe(watcher::Event::InitApply(pod("u1", "old", None)))
            .is_empty());
        assert!(tracker.observe(watcher::Event::InitDone).is_empty());

        // Updates to a pre-existing pod are not creations.
        assert!(tracker
            .observe(watcher::Event::Apply(pod("u1", "old", Some("10.0.0.1"))))
            .is_empty());
        assert_eq!(tracker.pending(), 0);
    }

    #[test]
    fn test_tracker_waits_for_host_ip() {
        let mut tracker = CreationTracker::default();
        tracker.observe(watcher::Event::Init);
        tracker.observe(watcher::Event::InitDone);

        // Created, not yet scheduled.
        assert!(tracker
            .observe(watcher::Event::Apply(pod("u2", "workload-1", None)))
            .is_empty());
        assert!(tracker
            .observe(watcher::Event::Apply(pod("u2", "workload-1", None)))
            .is_empty());
        assert_eq!(tracker.pending(), 1);

        let created = tracker.observe(watcher::Event::Apply(pod("u2", "workload-1", Some("10.0.0.2"))));
        assert_eq!(created.len(), 1);
        assert_eq!(created[0].name, "workload-1");
        assert_eq!(created[0].host_ip.as_deref(), Some("10.0.0.2"));
        assert_eq!(tracker.pending(), 0);

        // Reported once only.
        assert!(tracker
            .observe(watcher::Event::Apply(pod("u2", "workload-1", Some("10.0.0.2"))))
            .is_empty());
    }

    #[test]
    fn test_tracker_reports_scheduled_pod_immediately() {
        let mut tracker = CreationTracker::default();
        tracker.observe(watcher::Event::Init);
        tracker.observe(watcher::Event::InitDone);

        let created = tracker.observe(watcher::Event::Apply(pod("u6", "workload-6", Some("10.0.0.3"))));
        assert_eq!(names(created), vec!["workload-6"]);
    }

    #[test]
    fn test_tracker_reports_pods_found_by_relist() {
        let mut tracker = CreationTracker::default();
        tracker.observe(watcher::Event::Init);
        tracker.observe(watcher::Event::InitApply(pod("u1", "old", None)));
        tracker.observe(watcher::Event::InitDone);
        tracker.observe(watcher::Event::Apply(pod("u3", "workload-3", None)));

        // Watch reconnects; u2 appeared while disconnected and u3 got scheduled.
        tracker.observe(watcher::Event::Init);
        assert!(tracker
            .observe(watcher::Event::InitApply(pod("u1", "old", Some("10.0.0.1"))))
            .is_empty());
        let created = tracker.observe(watcher::Event::InitApply(pod("u2", "workload-2", Some("10.0.0.1"))));
        assert_eq!(names(created), vec!["workload-2"]);
        let created = tracker.observe(watcher::Event::InitApply(pod("u3", "workload-3", Some("10.0.0.2"))));
        assert_eq!(names(created), vec!["workload-3"]);
        tracker.observe(watcher::Event::InitDone);

        assert!(tracker
            .observe(watcher::Event::Apply(pod("u2", "workload-2", Some("10.0.0.1"))))
            .is_empty());
    }

    #[test]
    fn test_tracker_relist_drops_vanished_pending_pods() {
        let mut tracker = CreationTracker::default();
        tracker.observe(watcher::Event::Init);
        tracker.observe(watcher::Event::InitDone);
        tracker.observe(watcher::Event::Apply(pod("u7", "workload-7", None)));
        assert_eq!(tracker.pending(), 1);

        tracker.observe(watcher::Event::Init);
        tracker.observe(watcher::Event::InitDone);

        assert_eq!(tracker.pending(), 0);
    }

    #[test]
    fn test_tracker_forgets_deleted_pods() {
        let mut tracker = CreationTracker::default();
        tracker.observe(watcher::Event::Init);
        tracker.observe(watcher::Event::InitDone);

        let scheduled = || pod("u3", "w3", Some("10.0.0.1"));
        assert_eq!(tracker.observe(watcher::Event::Apply(scheduled())).len(), 1);
        tracker.observe(watcher::Event::Delete(scheduled()));
        assert_eq!(tracker.observe(watcher::Event::Apply(scheduled())).len(), 1);

        tracker.observe(watcher::Event::Apply(pod("u8", "w8", None)));
        tracker.observe(watcher::Event::Delete(pod("u8", "w8", None)));
        assert_eq!(tracker.pending(), 0);
    }

    #[test]
    fn test_tracker_ignores_pods_without_uid() {
        let mut tracker = CreationTracker::default();
        let mut anonymous = pod("u4", "w4", None);
        anonymous.metadata.uid = None;

        assert!(tracker.observe(watcher::Event::Apply(anonymous)).is_empty());
    }

    #[test]
    fn test_workload_created_reads_host_ip() {
        let created = workload_created(pod("u5", "workload-5", Some("10.0.0.7"))).unwrap();
        assert_eq!(created.host_ip.as_deref(), Some("10.0.0.7"));
        assert_eq!(created.namespace.as_deref(), Some("default"));
        assert_eq!(created.labels["kopf"], "true");
    }

    #[tokio::test]
    async fn test_mock_patch_merges_labels() {
        let cluster = MockCluster::new(vec![ClusterNode::new("n1").with_label("keep", "me")]);

        let labels = BTreeMap::from([("region".to_string(), "eu".to_string())]);
        let node = cluster.patch_node_labels("n1", &labels).await.unwrap();

        assert_eq!(node.labels["keep"], "me");
        assert_eq!(node.labels["region"], "eu");
        assert!(cluster.patch_node_labels("missing", &labels).await.is_err());
        assert_eq!(cluster.patch_calls(), 2);
    }
}
