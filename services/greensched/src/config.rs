//! Configuration for the scheduler.

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use crate::error::ConfigError;
use crate::events::LabelSelector;
use crate::labeler::NodeOrder;
use crate::worker::OverlapPolicy;

/// Default carbon intensity feed.
pub const DEFAULT_FEED_URL: &str = "https://wj38sqbq69.execute-api.us-east-1.amazonaws.com/Prod/row";

/// Scheduler configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// Time between cycle starts.
    pub scheduling_period: Duration,

    /// Number of cycles before the scheduler stops.
    pub total_runs: u32,

    /// Attach placement preferences to submitted workloads.
    pub carbon_aware: bool,

    /// Carbon intensity feed URL.
    pub feed_url: String,

    /// Optional timeout for feed requests.
    pub feed_timeout: Option<Duration>,

    /// Baseline workload template (YAML).
    pub template_path: PathBuf,

    /// Directory for transient manifest files.
    pub manifest_dir: PathBuf,

    /// Program invoked as `<kubectl> apply -f <manifest>`.
    pub kubectl: String,

    /// What happens when a cycle outlasts the period.
    pub overlap: OverlapPolicy,

    /// Order used to pair nodes with ranked regions.
    pub node_order: NodeOrder,

    /// Marker label selecting workloads whose placement is observed.
    pub workload_selector: LabelSelector,

    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load configuration from an arbitrary variable source.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let period_secs: u64 = required(&lookup, "SCHEDULING_PERIOD")?;
        if period_secs == 0 {
            return Err(ConfigError::Invalid {
                var: "SCHEDULING_PERIOD",
                value: "0".to_string(),
                reason: "must be at least 1 second".to_string(),
            });
        }

        let total_runs = optional(&lookup, "GREENSCHED_TOTAL_RUNS")?.unwrap_or(180);

        let carbon_aware = match lookup("GREENSCHED_CARBON_AWARE") {
            Some(value) => parse_bool("GREENSCHED_CARBON_AWARE", &value)?,
            None => true,
        };

        let feed_url =
            lookup("GREENSCHED_CARBON_FEED_URL").unwrap_or_else(|| DEFAULT_FEED_URL.to_string());

        let feed_timeout = optional::<u64, _>(&lookup, "GREENSCHED_FEED_TIMEOUT_SECS")?
            .map(Duration::from_secs);

        let template_path = lookup("GREENSCHED_WORKLOAD_TEMPLATE")
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("workload.yaml"));

        let manifest_dir = lookup("GREENSCHED_MANIFEST_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("."));

        let kubectl = lookup("GREENSCHED_KUBECTL").unwrap_or_else(|| "kubectl".to_string());

        let max_in_flight: usize = optional(&lookup, "GREENSCHED_MAX_IN_FLIGHT")?.unwrap_or(4);
        let overlap = match lookup("GREENSCHED_OVERLAP").as_deref() {
            None | Some("wait") => OverlapPolicy::Wait,
            Some("allow") if max_in_flight > 0 => OverlapPolicy::Allow { max_in_flight },
            Some("allow") => {
                return Err(ConfigError::Invalid {
                    var: "GREENSCHED_MAX_IN_FLIGHT",
                    value: max_in_flight.to_string(),
                    reason: "must be at least 1".to_string(),
                })
            }
            Some(other) => {
                return Err(ConfigError::Invalid {
                    var: "GREENSCHED_OVERLAP",
                    value: other.to_string(),
                    reason: "expected 'wait' or 'allow'".to_string(),
                })
            }
        };

        let node_order = optional(&lookup, "GREENSCHED_NODE_ORDER")?.unwrap_or_default();

        let workload_selector = optional(&lookup, "GREENSCHED_WORKLOAD_SELECTOR")?
            .unwrap_or_else(LabelSelector::workload_marker);

        let log_level = lookup("GREENSCHED_LOG_LEVEL").unwrap_or_else(|| "info".to_string());

        Ok(Self {
            scheduling_period: Duration::from_secs(period_secs),
            total_runs,
            carbon_aware,
            feed_url,
            feed_timeout,
            template_path,
            manifest_dir,
            kubectl,
            overlap,
            node_order,
            workload_selector,
            log_level,
        })
    }
}

fn required<T, F>(lookup: &F, var: &'static str) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
    F: Fn(&str) -> Option<String>,
{
    optional(lookup, var)?.ok_or(ConfigError::Missing(var))
}

fn optional<T, F>(lookup: &F, var: &'static str) -> Result<Option<T>, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
    F: Fn(&str) -> Option<String>,
{
    match lookup(var) {
        None => Ok(None),
        Some(value) => match value.trim().parse::<T>() {
            Ok(parsed) => Ok(Some(parsed)),
            Err(e) => Err(ConfigError::Invalid {
                var,
                reason: e.to_string(),
                value,
            }),
        },
    }
}

fn parse_bool(var: &'static str, value: &str) -> Result<bool, ConfigError> {
    match value.trim().to_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(ConfigError::Invalid {
            var,
            value: value.to_string(),
            reason: "expected a boolean".to_string(),
        }),
    }
}
