//! Manifest submission.

use std::path::Path;

use async_trait::async_trait;
use tokio::process::Command;
use tracing::{debug, info};

use crate::error::SubmissionError;

/// Hands a manifest file to the cluster.
#[async_trait]
pub trait ManifestSubmitter: Send + Sync {
    async fn submit(&self, manifest: &Path) -> Result<(), SubmissionError>;
}

/// Submits manifests with `kubectl apply -f`.
pub struct KubectlApply {
    program: String,
}

impl KubectlApply {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
        }
    }
}

impl Default for KubectlApply {
    fn default() -> Self {
        Self::new("kubectl")
    }
}

#[async_trait]
impl ManifestSubmitter for KubectlApply {
    async fn submit(&self, manifest: &Path) -> Result<(), SubmissionError> {
        debug!(program = %self.program, manifest = %manifest.display(), "Applying manifest");

        let output = Command::new(&self.program)
            .arg("apply")
            .arg("-f")
            .arg(manifest)
            .output()
            .await
            .map_err(|source| SubmissionError::Spawn {
                program: self.program.clone(),
                source,
            })?;

        if !output.status.success() {
            return Err(SubmissionError::Failed {
                code: output.status.code(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }

        info!(
            manifest = %manifest.display(),
            output = %String::from_utf8_lossy(&output.stdout).trim(),
            "Manifest applied"
        );
        Ok(())
    }
}
