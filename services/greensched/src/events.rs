//! Workload creation events and handler routing.
//!
//! Handlers are registered against a [`Subscription`] (resource kind plus
//! label selector). The router opens one watch per subscription and runs
//! every handler invocation as its own task, so handlers must tolerate
//! concurrent calls, including calls that overlap a scheduling cycle.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use async_trait::async_trait;
use futures_util::StreamExt;
use kube::core::{Selector, SelectorExt};
use tokio::sync::watch;
use tokio::task::{JoinHandle, JoinSet};
use tracing::{debug, info, warn};

use crate::cluster::ClusterApi;

/// Equality-based label selector (`key=value[,key=value]`).
///
/// Matching and rendering go through [`kube::core::Selector`], so the mock
/// cluster filters exactly the way the API server does.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LabelSelector(BTreeMap<String, String>);

impl LabelSelector {
    /// Marker label carried by workloads whose placement is observed.
    pub fn workload_marker() -> Self {
        Self(BTreeMap::from([("kopf".to_string(), "true".to_string())]))
    }

    pub fn to_selector(&self) -> Selector {
        self.0
            .iter()
            .map(|(key, value)| (key.clone(), value.clone()))
            .collect()
    }

    pub fn matches(&self, labels: &BTreeMap<String, String>) -> bool {
        self.to_selector().matches(labels)
    }
}

impl fmt::Display for LabelSelector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_selector())
    }
}

impl FromStr for LabelSelector {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut terms = BTreeMap::new();
        for term in s.split(',').map(str::trim).filter(|t| !t.is_empty()) {
            let (key, value) = term
                .split_once("==")
                .or_else(|| term.split_once('='))
                .ok_or_else(|| format!("'{term}' is not a key=value term"))?;
            let key = key.trim();
            if key.is_empty() {
                return Err(format!("'{term}' has an empty key"));
            }
            terms.insert(key.to_string(), value.trim().to_string());
        }

        if terms.is_empty() {
            return Err("selector has no terms".to_string());
        }
        Ok(Self(terms))
    }
}

/// Watched resource kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResourceKind {
    Pod,
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ResourceKind::Pod => write!(f, "pod"),
        }
    }
}

/// What a handler wants to be told about.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Subscription {
    pub kind: ResourceKind,
    pub selector: LabelSelector,
}

impl Subscription {
    pub fn pods(selector: LabelSelector) -> Self {
        Self {
            kind: ResourceKind::Pod,
            selector,
        }
    }
}

/// A workload observed for the first time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkloadCreated {
    pub name: String,
    pub namespace: Option<String>,
    pub uid: String,
    pub labels: BTreeMap<String, String>,
    /// IP of the node the workload runs on, once the cluster reports it.
    pub host_ip: Option<String>,
}

/// Reacts to workload creation.
#[async_trait]
pub trait CreateHandler: Send + Sync {
    async fn on_create(&self, event: WorkloadCreated);
}

/// Routes creation events from cluster watches to handlers.
pub struct EventRouter {
    cluster: Arc<dyn ClusterApi>,
    routes: Vec<(Subscription, Arc<dyn CreateHandler>)>,
}

impl EventRouter {
    pub fn new(cluster: Arc<dyn ClusterApi>) -> Self {
        Self {
            cluster,
            routes: Vec::new(),
        }
    }

    /// Register a handler for a subscription.
    pub fn register(&mut self, subscription: Subscription, handler: Arc<dyn CreateHandler>) {
        info!(
            kind = %subscription.kind,
            selector = %subscription.selector,
            "Registered creation handler"
        );
        self.routes.push((subscription, handler));
    }

    pub fn route_count(&self) -> usize {
        self.routes.len()
    }

    /// Open all watches and deliver events until shutdown.
    ///
    /// Watches are opened before this returns, so events emitted after the
    /// call are not missed.
    pub fn spawn(self, mut shutdown: watch::Receiver<bool>) -> JoinHandle<()> {
        let mut watchers = JoinSet::new();

        for (subscription, handler) in self.routes {
            let mut stream = self.cluster.watch_created(&subscription);
            watchers.spawn(async move {
                while let Some(item) = stream.next().await {
                    match item {
                        Ok(event) => {
                            debug!(
                                workload = %event.name,
                                kind = %subscription.kind,
                                "Workload created"
                            );
                            let handler = Arc::clone(&handler);
                            tokio::spawn(async move { handler.on_create(event).await });
                        }
                        Err(e) => {
                            warn!(
                                error = %e,
                                selector = %subscription.selector,
                                "Workload watch error"
                            );
                        }
                    }
                }
                debug!(selector = %subscription.selector, "Workload watch ended");
            });
        }

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    joined = watchers.join_next() => {
                        if joined.is_none() {
                            break;
                        }
                    }
                    changed = shutdown.changed() => {
                        if changed.is_err() || *shutdown.borrow() {
                            info!("Event router shutting down");
                            watchers.abort_all();
                            break;
                        }
                    }
                }
            }
        })
    }
}
