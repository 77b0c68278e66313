//! A single scheduling cycle.
//!
//! ```text
//! Idle → Label → BuildManifest → Submit → Cleanup → Sleep
//! ```
//!
//! Every cycle gets its own [`CycleContext`]; nothing carries over to the
//! next cycle except the labels written to the cluster.

use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{error, info, instrument, warn};

use crate::error::CycleError;
use crate::labeler::{LabelingReport, NodeLabeler};
use crate::manifest::{ManifestFile, WorkloadManifest, WorkloadTemplate};
use crate::submit::ManifestSubmitter;

/// Cycle state machine phases.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CyclePhase {
    Idle,
    Label,
    BuildManifest,
    Submit,
    Cleanup,
    Sleep,
    Terminal,
}

impl fmt::Display for CyclePhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            CyclePhase::Idle => "idle",
            CyclePhase::Label => "label",
            CyclePhase::BuildManifest => "build_manifest",
            CyclePhase::Submit => "submit",
            CyclePhase::Cleanup => "cleanup",
            CyclePhase::Sleep => "sleep",
            CyclePhase::Terminal => "terminal",
        };
        f.write_str(name)
    }
}

/// State owned by one cycle.
#[derive(Debug)]
pub struct CycleContext {
    pub sequence: u32,
    pub started_at: DateTime<Utc>,
    phase: CyclePhase,
    /// Absent when the labeling pass was aborted.
    pub labeling: Option<LabelingReport>,
    pub manifest: Option<WorkloadManifest>,
}

impl CycleContext {
    pub fn new(sequence: u32) -> Self {
        Self {
            sequence,
            started_at: Utc::now(),
            phase: CyclePhase::Idle,
            labeling: None,
            manifest: None,
        }
    }

    pub fn phase(&self) -> CyclePhase {
        self.phase
    }

    fn enter(&mut self, phase: CyclePhase) {
        info!(sequence = self.sequence, from = %self.phase, to = %phase, "Cycle phase");
        self.phase = phase;
    }
}

/// Per-cycle settings.
#[derive(Debug, Clone)]
pub struct CycleSettings {
    pub template_path: PathBuf,
    pub manifest_dir: PathBuf,
    pub carbon_aware: bool,
}

/// Runs label → build → submit → cleanup for one cycle.
pub struct CycleRunner {
    labeler: NodeLabeler,
    submitter: Arc<dyn ManifestSubmitter>,
    settings: CycleSettings,
}

impl CycleRunner {
    pub fn new(
        labeler: NodeLabeler,
        submitter: Arc<dyn ManifestSubmitter>,
        settings: CycleSettings,
    ) -> Self {
        Self {
            labeler,
            submitter,
            settings,
        }
    }

    /// Run cycle `sequence` up to (not including) the sleep phase.
    ///
    /// A labeling failure is logged and the cycle continues with whatever
    /// labels the nodes already carry. Manifest and submission failures end
    /// the cycle with an error; the manifest file is removed either way.
    #[instrument(skip(self))]
    pub async fn run_cycle(&self, sequence: u32) -> Result<CycleContext, CycleError> {
        let mut ctx = CycleContext::new(sequence);
        info!(started_at = %ctx.started_at, "Scheduling workload");

        ctx.enter(CyclePhase::Label);
        match self.labeler.label_nodes().await {
            Ok(report) => {
                info!(
                    regions = report.regions,
                    nodes = report.nodes,
                    labeled = report.labeled.len(),
                    failed = report.failed.len(),
                    "Labeling pass complete"
                );
                ctx.labeling = Some(report);
            }
            Err(e) => {
                warn!(error = %e, "Labeling pass aborted, keeping existing node labels");
            }
        }

        ctx.enter(CyclePhase::BuildManifest);
        let template = WorkloadTemplate::load(&self.settings.template_path).await?;
        let manifest = template.build(sequence, self.settings.carbon_aware, &mut rand::rng())?;

        ctx.enter(CyclePhase::Submit);
        let file = ManifestFile::write(&self.settings.manifest_dir, &manifest).await?;
        let submitted = self.submitter.submit(file.path()).await;

        ctx.enter(CyclePhase::Cleanup);
        drop(file);

        let workload = manifest.name.clone();
        let execution_seconds = manifest.execution_seconds;
        ctx.manifest = Some(manifest);

        if let Err(e) = submitted {
            error!(workload = %workload, error = %e, "Workload submission failed");
            return Err(e.into());
        }

        info!(
            workload = %workload,
            execution_seconds,
            carbon_aware = self.settings.carbon_aware,
            "Workload submitted"
        );
        Ok(ctx)
    }
}
