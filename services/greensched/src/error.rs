//! Error types for greensched.
//!
//! Each failure is contained at the narrowest scope that makes sense:
//!
//! | Error | Scope |
//! |---|---|
//! | `ConfigError` | process (fatal at startup) |
//! | `FetchError`, `LabelError` | one labeling pass |
//! | `NodePatchError` | one node within a labeling pass |
//! | `ManifestError`, `SubmissionError`, `CycleError` | one cycle |
//! | `ClusterError` | the operation that issued the call |

use std::path::PathBuf;

use thiserror::Error;

/// Invalid or missing startup configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("{0} is not set in the environment or .env file")]
    Missing(&'static str),

    #[error("{var} has invalid value '{value}': {reason}")]
    Invalid {
        var: &'static str,
        value: String,
        reason: String,
    },
}

/// The carbon intensity feed could not be read.
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("carbon intensity request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("carbon intensity feed returned {status}: {body}")]
    Status { status: u16, body: String },

    #[error("carbon intensity payload is not a region map: {0}")]
    Decode(#[from] serde_json::Error),
}

/// A cluster API call failed.
#[derive(Debug, Error)]
pub enum ClusterError {
    #[error("kubernetes api error: {0}")]
    Kube(#[from] kube::Error),

    #[error("watch error: {0}")]
    Watch(#[from] kube::runtime::watcher::Error),

    #[error("rejected: {0}")]
    Rejected(String),
}

/// Labeling a single node failed. Other nodes are still labeled.
#[derive(Debug, Error)]
#[error("failed to label node {node}: {source}")]
pub struct NodePatchError {
    pub node: String,
    #[source]
    pub source: ClusterError,
}

/// A labeling pass was aborted before any node was patched.
#[derive(Debug, Error)]
pub enum LabelError {
    #[error(transparent)]
    Fetch(#[from] FetchError),

    #[error("failed to list nodes: {0}")]
    Cluster(#[from] ClusterError),
}

/// The workload manifest could not be produced.
#[derive(Debug, Error)]
pub enum ManifestError {
    #[error("failed to read template {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("template is not valid YAML: {0}")]
    Parse(#[source] serde_yaml::Error),

    #[error("template is missing {0}")]
    MissingField(&'static str),

    #[error("template field {0} is not a mapping")]
    NotAMapping(&'static str),

    #[error("failed to serialize manifest: {0}")]
    Serialize(#[source] serde_yaml::Error),

    #[error("failed to write manifest {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// The apply step did not accept the manifest.
#[derive(Debug, Error)]
pub enum SubmissionError {
    #[error("failed to run {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("apply exited with {}: {stderr}", .code.map_or_else(|| "signal".to_string(), |c| c.to_string()))]
    Failed { code: Option<i32>, stderr: String },
}

/// A scheduling cycle failed.
#[derive(Debug, Error)]
pub enum CycleError {
    #[error(transparent)]
    Manifest(#[from] ManifestError),

    #[error(transparent)]
    Submission(#[from] SubmissionError),
}
