//! greensched
//!
//! Steers batch workloads in a Kubernetes cluster toward nodes in regions
//! with lower carbon intensity.
//!
//! ## Architecture
//!
//! - **Scheduler worker**: every period, labels nodes with carbon-derived
//!   affinity tiers and submits one workload that softly prefers higher tiers
//! - **Placement reconciler**: on workload creation, logs the recommended
//!   node next to the node the cluster actually chose
//! - **Event router**: opens cluster watches and dispatches creation events
//!   to registered handlers
//!
//! Ranking and tier assignment live in `greensched-carbon`.
//!
//! ## Modules
//!
//! - `cluster`: cluster API seam (kube client and in-memory mock)
//! - `cycle`: one scheduling cycle
//! - `feed`: carbon intensity feed
//! - `manifest`: workload manifest construction
//! - `submit`: manifest submission

pub mod cluster;
pub mod config;
pub mod cycle;
pub mod error;
pub mod events;
pub mod feed;
pub mod labeler;
pub mod manifest;
pub mod placement;
pub mod submit;
pub mod worker;

pub use config::Config;
pub use cycle::{CycleContext, CyclePhase, CycleRunner, CycleSettings};
pub use events::{EventRouter, Subscription};
pub use placement::{PlacementObservation, PlacementReconciler};
pub use worker::{OverlapPolicy, SchedulerWorker, WorkerSummary};
