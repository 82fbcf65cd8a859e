//! Job execution span helpers.
//!
//! Provides span creation and status-transition recording for jobs flowing
//! through the worker.

use tracing::Span;

use crate::model::JobStatus;

/// Start a span for one job.
///
/// The `job.status` field is declared empty and is updated via
/// [`record_status_transition`].
pub fn start_job_span(ident: &str) -> Span {
    tracing::info_span!(
        "job.run",
        "job.ident" = ident,
        "job.status" = tracing::field::Empty,
    )
}

/// Record a status transition on the job span.
pub fn record_status_transition(span: &Span, from: Option<JobStatus>, to: JobStatus) {
    span.record("job.status", tracing::field::display(to));
    span.in_scope(|| match from {
        Some(from) => tracing::info!(from = %from, to = %to, "status_transition"),
        None => tracing::info!(to = %to, "status_transition"),
    });
}
