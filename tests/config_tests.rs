//! Configuration loading tests.

use std::io::Write;

use courier::settings::{LogFormat, SubmitterConfig, WorkerKind};

#[test]
fn defaults_are_sensible() {
    let cfg = SubmitterConfig::load(None).unwrap();
    assert_eq!(cfg.lease_timeout_ms, 10_000);
    assert_eq!(cfg.cancellation_retry_ms, 2_000);
    assert_eq!(cfg.max_pending_lease_requests_per_scheduling_category, 10);
    assert_eq!(cfg.backlog_report_interval_ms, 1_000);
    assert_eq!(cfg.worker_kind, WorkerKind::Worker);
    assert_eq!(cfg.log_format, LogFormat::Text);
}

#[test]
fn loads_partial_toml_over_defaults() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    writeln!(
        file,
        "lease_timeout_ms = 25\nworker_kind = \"driver\"\nlog_format = \"json\""
    )
    .unwrap();

    let cfg = SubmitterConfig::load(Some(file.path())).unwrap();
    assert_eq!(cfg.lease_timeout_ms, 25);
    assert_eq!(cfg.worker_kind, WorkerKind::Driver);
    assert_eq!(cfg.log_format, LogFormat::Json);
    // Unspecified keys fall back to defaults.
    assert_eq!(cfg.cancellation_retry_ms, 2_000);
}

#[test]
fn missing_file_is_an_error() {
    assert!(SubmitterConfig::load(Some(std::path::Path::new("/nonexistent/courier.toml"))).is_err());
}
