use serde::Deserialize;
use std::fs;
use std::path::Path;

/// Whether the embedding process is a transient worker or a driver. The
/// distinction matters only when the local broker dies: workers exit so
/// their caller retries elsewhere, drivers fail their queued tasks.
#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum WorkerKind {
    #[default]
    Worker,
    Driver,
}

/// Log output format.
#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

/// Submitter tunables, loadable from a TOML file. Every field has a
/// default so an empty file (or no file) is a valid configuration.
#[derive(Debug, Deserialize, Clone)]
pub struct SubmitterConfig {
    /// How long a granted worker lease may be reused before the worker is
    /// returned on the next idle transition.
    #[serde(default = "default_lease_timeout_ms")]
    pub lease_timeout_ms: i64,

    /// Minimum gap between retries of a cancel the worker could not yet
    /// honor. One timer slot is shared across all concurrent cancels.
    #[serde(default = "default_cancellation_retry_ms")]
    pub cancellation_retry_ms: i64,

    /// Cap on in-flight lease requests per scheduling category when using
    /// the static rate limiter.
    #[serde(default = "default_max_pending_lease_requests")]
    pub max_pending_lease_requests_per_scheduling_category: usize,

    /// Interval of the periodic backlog reporter.
    #[serde(default = "default_backlog_report_interval_ms")]
    pub backlog_report_interval_ms: u64,

    #[serde(default)]
    pub worker_kind: WorkerKind,

    #[serde(default)]
    pub log_format: LogFormat,
}

fn default_lease_timeout_ms() -> i64 {
    10_000
}

fn default_cancellation_retry_ms() -> i64 {
    2_000
}

fn default_max_pending_lease_requests() -> usize {
    10
}

fn default_backlog_report_interval_ms() -> u64 {
    1_000
}

impl Default for SubmitterConfig {
    fn default() -> Self {
        Self {
            lease_timeout_ms: default_lease_timeout_ms(),
            cancellation_retry_ms: default_cancellation_retry_ms(),
            max_pending_lease_requests_per_scheduling_category:
                default_max_pending_lease_requests(),
            backlog_report_interval_ms: default_backlog_report_interval_ms(),
            worker_kind: WorkerKind::default(),
            log_format: LogFormat::default(),
        }
    }
}

impl SubmitterConfig {
    pub fn load(path: Option<&Path>) -> anyhow::Result<Self> {
        match path {
            Some(p) => {
                let data = fs::read_to_string(p)?;
                let cfg: Self = toml::from_str(&data)?;
                Ok(cfg)
            }
            None => Ok(Self::default()),
        }
    }
}
