//! Workload manifest construction.
//!
//! Each cycle turns the baseline pod template into a uniquely named
//! workload with a random run time and, when carbon-aware scheduling is on,
//! a soft node-affinity block that prefers higher affinity tiers:
//!
//! ```yaml
//! affinity:
//!   nodeAffinity:
//!     preferredDuringSchedulingIgnoredDuringExecution:
//!       - weight: 100
//!         preference:
//!           matchExpressions:
//!             - key: node_affinity
//!               operator: In
//!               values: ["100"]
//!       # ... weight 50 / "50", weight 10 / "10"
//! ```

use std::ops::RangeInclusive;
use std::path::{Path, PathBuf};

use greensched_carbon::{AffinityTier, AFFINITY_LABEL};
use rand::Rng;
use serde_json::{json, Map, Value};
use tracing::{debug, warn};

use crate::error::ManifestError;

/// Bounds of the randomized workload run time, in seconds.
pub const EXECUTION_SECONDS: RangeInclusive<u32> = 20..=60;

/// Container argument carrying the run time.
const TIME_ARG_PREFIX: &str = "--time=";

const PREFERRED_AFFINITY_KEY: &str = "preferredDuringSchedulingIgnoredDuringExecution";

/// One weighted soft placement preference.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PlacementPreference {
    pub weight: u32,
    pub tier: AffinityTier,
}

impl PlacementPreference {
    /// One preference per tier, weighted by the tier value.
    pub fn for_all_tiers() -> Vec<Self> {
        AffinityTier::SEQUENCE
            .iter()
            .map(|&tier| Self {
                weight: tier.value(),
                tier,
            })
            .collect()
    }

    fn to_json(self) -> Value {
        json!({
            "weight": self.weight,
            "preference": {
                "matchExpressions": [
                    {
                        "key": AFFINITY_LABEL,
                        "operator": "In",
                        "values": [self.tier.label_value()],
                    }
                ]
            }
        })
    }
}

/// Baseline pod definition loaded from YAML.
#[derive(Debug, Clone)]
pub struct WorkloadTemplate {
    document: Value,
}

impl WorkloadTemplate {
    /// Read and parse a template file.
    pub async fn load(path: &Path) -> Result<Self, ManifestError> {
        let contents = tokio::fs::read_to_string(path)
            .await
            .map_err(|source| ManifestError::Read {
                path: path.to_path_buf(),
                source,
            })?;
        Self::parse(&contents)
    }

    /// Parse a template from YAML text.
    pub fn parse(yaml: &str) -> Result<Self, ManifestError> {
        let document: Value = serde_yaml::from_str(yaml).map_err(ManifestError::Parse)?;
        if !document.is_object() {
            return Err(ManifestError::NotAMapping("document root"));
        }
        Ok(Self { document })
    }

    /// Produce the manifest for cycle `sequence`.
    pub fn build<R: Rng>(
        &self,
        sequence: u32,
        carbon_aware: bool,
        rng: &mut R,
    ) -> Result<WorkloadManifest, ManifestError> {
        let mut document = self.document.clone();
        let name = format!("workload-{sequence}");
        let execution_seconds = rng.random_range(EXECUTION_SECONDS);

        document
            .get_mut("metadata")
            .ok_or(ManifestError::MissingField("metadata"))?
            .as_object_mut()
            .ok_or(ManifestError::NotAMapping("metadata"))?
            .insert("name".to_string(), Value::String(name.clone()));

        let args = document
            .pointer_mut("/spec/containers/0/args")
            .and_then(Value::as_array_mut)
            .ok_or(ManifestError::MissingField("spec.containers[0].args"))?;
        for arg in args.iter_mut() {
            let is_time_arg = arg.as_str().is_some_and(|s| s.starts_with(TIME_ARG_PREFIX));
            if is_time_arg {
                *arg = Value::String(format!("{TIME_ARG_PREFIX}{execution_seconds}"));
            }
        }

        let preferences = if carbon_aware {
            let preferences = PlacementPreference::for_all_tiers();
            set_preferences(&mut document, &preferences)?;
            preferences
        } else {
            Vec::new()
        };

        debug!(
            workload = %name,
            execution_seconds,
            preferences = preferences.len(),
            "Built workload manifest"
        );

        Ok(WorkloadManifest {
            sequence,
            name,
            execution_seconds,
            preferences,
            document,
        })
    }
}

/// Replace the preferred node-affinity terms, keeping other affinity content.
fn set_preferences(
    document: &mut Value,
    preferences: &[PlacementPreference],
) -> Result<(), ManifestError> {
    let spec = document
        .get_mut("spec")
        .and_then(Value::as_object_mut)
        .ok_or(ManifestError::NotAMapping("spec"))?;
    let affinity = child_mapping(spec, "affinity", "spec.affinity")?;
    let node_affinity = child_mapping(affinity, "nodeAffinity", "spec.affinity.nodeAffinity")?;

    node_affinity.insert(
        PREFERRED_AFFINITY_KEY.to_string(),
        Value::Array(preferences.iter().map(|p| p.to_json()).collect()),
    );
    Ok(())
}

/// Get `key` as a mapping, inserting an empty one if absent.
fn child_mapping<'a>(
    parent: &'a mut Map<String, Value>,
    key: &str,
    field: &'static str,
) -> Result<&'a mut Map<String, Value>, ManifestError> {
    parent
        .entry(key)
        .or_insert_with(|| Value::Object(Map::new()))
        .as_object_mut()
        .ok_or(ManifestError::NotAMapping(field))
}

/// A workload definition ready for submission.
#[derive(Debug, Clone)]
pub struct WorkloadManifest {
    pub sequence: u32,
    pub name: String,
    pub execution_seconds: u32,
    /// Empty when carbon-aware scheduling is off.
    pub preferences: Vec<PlacementPreference>,
    pub document: Value,
}

impl WorkloadManifest {
    pub fn to_yaml(&self) -> Result<String, ManifestError> {
        serde_yaml::to_string(&self.document).map_err(ManifestError::Serialize)
    }

    pub fn file_name(&self) -> String {
        format!("{}.yaml", self.name)
    }

    /// The preferred node-affinity block, if present.
    pub fn preference_block(&self) -> Option<&Value> {
        self.document
            .pointer("/spec/affinity/nodeAffinity")
            .and_then(|node_affinity| node_affinity.get(PREFERRED_AFFINITY_KEY))
    }
}

/// Transient on-disk form of a manifest.
///
/// The file is removed when the guard is dropped, on every exit path of the
/// cycle that created it.
#[derive(Debug)]
pub struct ManifestFile {
    path: PathBuf,
}

impl ManifestFile {
    /// Serialize `manifest` into `dir`.
    pub async fn write(dir: &Path, manifest: &WorkloadManifest) -> Result<Self, ManifestError> {
        let path = dir.join(manifest.file_name());
        let yaml = manifest.to_yaml()?;

        // Own the path before writing so a partial write is cleaned up too.
        let file = Self { path };
        tokio::fs::write(&file.path, yaml)
            .await
            .map_err(|source| ManifestError::Write {
                path: file.path.clone(),
                source,
            })?;
        Ok(file)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for ManifestFile {
    fn drop(&mut self) {
        match std::fs::remove_file(&self.path) {
            Ok(()) => debug!(path = %self.path.display(), "Removed manifest file"),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => warn!(
                path = %self.path.display(),
                error = %e,
                "Failed to remove manifest file"
            ),
        }
    }
}
