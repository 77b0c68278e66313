//! # greensched-carbon
//!
//! Carbon-intensity ranking and affinity tier assignment for greensched.
//!
//! This crate holds the decision logic and nothing else: it performs no I/O
//! and is deterministic given the same inputs.
//!
//! ## Concepts
//!
//! - **Carbon intensity table**: region → intensity, lower is better, in the
//!   order the feed returned it.
//! - **Affinity tier**: one of `100`, `50`, `10`. The lowest-intensity region
//!   gets `100`.
//! - **Ranked join**: rank `i` pairs the i-th cleanest region with the i-th
//!   node and the i-th tier. The join stops at the shortest of the three.
//!
//! ## Node labels
//!
//! Assignments are persisted on nodes as three labels written together:
//!
//! | Label | Example |
//! |---|---|
//! | `region` | `us` |
//! | `node_affinity` | `100` |
//! | `carbon_intensity` | `10.5` |

mod error;
mod intensity;
mod node;
mod ranking;
mod tier;

pub use error::TierError;
pub use intensity::{CarbonIntensityTable, RankedRegion};
pub use node::{
    ClusterNode, LabeledNode, NodeRecord, AFFINITY_LABEL, CARBON_INTENSITY_LABEL,
    HOSTNAME_LABEL, REGION_LABEL,
};
pub use ranking::{assign_tiers, locate_by_ip, recommend};
pub use tier::AffinityTier;
