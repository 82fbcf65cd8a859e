//! Integration tests for telemetry initialization and span helpers.

use ftl2_runner::model::JobStatus;
use ftl2_runner::telemetry::job::{record_status_transition, start_job_span};
use ftl2_runner::telemetry::{TelemetryConfig, init_telemetry};

#[test]
fn telemetry_initializes_once() {
    let config = || TelemetryConfig {
        log_level: "debug".to_string(),
        ansi: false,
    };
    // Only one global subscriber per process. The first call may already
    // have lost to another test; the second must fail cleanly either way.
    let _ = init_telemetry(config());
    assert!(init_telemetry(config()).is_err());
}

#[test]
fn job_span_records_transitions() {
    let span = start_job_span("42");
    record_status_transition(&span, None, JobStatus::Starting);
    record_status_transition(&span, Some(JobStatus::Starting), JobStatus::Running);
    record_status_transition(&span, Some(JobStatus::Running), JobStatus::Successful);
}
