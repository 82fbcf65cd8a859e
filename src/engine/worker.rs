//! Streaming worker: one job in over the input stream, events and results
//! out over the output stream.

use std::io::{BufRead, Write};
use std::path::PathBuf;

use serde_json::{Map, json};
use tracing::{Span, error, info, warn};

use crate::artifacts::ArtifactWriter;
use crate::automation::{
    Automation, NotificationSink, RUNNER_OPERATION, RunContext, ScriptAutomation,
};
use crate::error::{Error, Result};
use crate::event::Event;
use crate::model::{DEFAULT_TARGET, JobStatus, Notification};
use crate::telemetry::job::{record_status_transition, start_job_span};
use crate::transport;
use crate::translate::{DEFAULT_PLAYBOOK, EventTranslator};

use super::job::JobEnvelope;

/// Exit code for jobs that succeeded but had failed outcomes.
pub const RC_FAILURES: i32 = 2;

/// How a job ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct JobOutcome {
    pub status: JobStatus,
    /// Process exit code.
    pub rc: i32,
}

impl JobOutcome {
    fn error() -> Self {
        Self {
            status: JobStatus::Error,
            rc: 1,
        }
    }
}

/// Runs one job from `input` to `output` inside `private_data_dir`.
pub struct Worker<R, W> {
    input: R,
    output: W,
    private_data_dir: PathBuf,
    script_path: PathBuf,
}

impl<R: BufRead, W: Write> Worker<R, W> {
    pub fn new(input: R, output: W, private_data_dir: impl Into<PathBuf>) -> Self {
        Self {
            input,
            output,
            private_data_dir: private_data_dir.into(),
            script_path: PathBuf::from(crate::config::DEFAULT_SCRIPT_PATH),
        }
    }

    /// Script run when the job doesn't ship its own playbook.
    pub fn script_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.script_path = path.into();
        self
    }

    /// Run the job with the script-backed automation.
    pub fn run(self) -> JobOutcome {
        self.run_with(|script| Box::new(ScriptAutomation::new(script)))
    }

    /// Run the job with the automation `make` builds for the resolved
    /// script path.
    ///
    /// Every path out of here has written a terminal status and `eof`, or
    /// tried to.
    pub fn run_with<F>(mut self, make: F) -> JobOutcome
    where
        F: FnOnce(PathBuf) -> Box<dyn Automation>,
    {
        let request = match transport::read_job(&mut self.input, &self.private_data_dir) {
            Ok(request) => request,
            Err(e) => {
                error!(error = %e, "failed to read job");
                self.abort(&e);
                return JobOutcome::error();
            }
        };

        let envelope = JobEnvelope::new(&self.private_data_dir, request.kwargs);
        let span = start_job_span(&envelope.ident);
        let _guard = span.enter();
        let artifacts = envelope.artifacts();

        match self.execute(&envelope, &artifacts, &span, make) {
            Ok(outcome) => {
                info!(status = %outcome.status, rc = outcome.rc, "job finished");
                outcome
            }
            Err(e) => {
                error!(error = %e, transport = e.is_transport(), "job aborted");
                record_status_transition(&span, None, JobStatus::Error);
                self.abort(&e);
                if let Err(e) = artifacts
                    .write_rc(1)
                    .and_then(|()| artifacts.write_status(JobStatus::Error))
                {
                    warn!(error = %e, "failed to record error status in artifacts");
                }
                JobOutcome::error()
            }
        }
    }

    fn execute<F>(
        &mut self,
        envelope: &JobEnvelope,
        artifacts: &ArtifactWriter,
        span: &Span,
        make: F,
    ) -> Result<JobOutcome>
    where
        F: FnOnce(PathBuf) -> Box<dyn Automation>,
    {
        let mut automation = make(envelope.resolve_script(&self.script_path));
        let ctx = RunContext::from_envelope(envelope);

        artifacts.setup()?;
        artifacts.write_command(&automation.command(&ctx))?;

        transport::write_status(&mut self.output, JobStatus::Starting, Map::new())?;
        record_status_transition(span, None, JobStatus::Starting);
        transport::write_status(&mut self.output, JobStatus::Running, Map::new())?;
        record_status_transition(span, Some(JobStatus::Starting), JobStatus::Running);

        let translator = EventTranslator::new(envelope.ident.as_str())
            .playbook(envelope.playbook().unwrap_or(DEFAULT_PLAYBOOK));
        let mut sink = JobSink {
            translator,
            output: &mut self.output,
            artifacts,
        };

        let rc = match automation.run(&ctx, &mut sink) {
            Ok(rc) => rc,
            Err(e) if e.is_transport() => return Err(e),
            Err(e) => {
                warn!(error = %e, "automation failed");
                let msg = match e {
                    Error::Automation(msg) => msg,
                    other => other.to_string(),
                };
                sink.notify(Notification::complete(
                    RUNNER_OPERATION,
                    DEFAULT_TARGET,
                    false,
                    false,
                    json!({"msg": msg}),
                ))?;
                1
            }
        };

        let has_failures = sink.translator.has_failures();
        let stats = sink.translator.close_run();
        sink.dispatch(stats)?;

        let status = JobStatus::from_run(rc, has_failures);
        let rc = if rc == 0 && has_failures { RC_FAILURES } else { rc };

        transport::write_status(&mut self.output, status, Map::new())?;
        record_status_transition(span, Some(JobStatus::Running), status);
        artifacts.write_rc(rc)?;
        artifacts.write_status(status)?;

        if let Err(e) = transport::write_archive(&mut self.output, artifacts.dir()) {
            if e.is_transport() {
                return Err(e);
            }
            // Nothing was written yet; the consumer just gets no artifacts.
            error!(error = %e, "failed to pack artifacts");
        }
        transport::write_eof(&mut self.output)?;

        Ok(JobOutcome { status, rc })
    }

    /// Best-effort `error` status and `eof`.
    fn abort(&mut self, cause: &Error) {
        let mut extra = Map::new();
        extra.insert("result_traceback".to_string(), json!(cause.to_string()));
        let written = transport::write_status(&mut self.output, JobStatus::Error, extra)
            .and_then(|()| transport::write_eof(&mut self.output));
        if let Err(e) = written {
            warn!(error = %e, "could not report error status");
        }
    }
}

/// Routes translated events to the wire and the artifact directory.
struct JobSink<'a, W: Write> {
    translator: EventTranslator,
    output: &'a mut W,
    artifacts: &'a ArtifactWriter,
}

impl<W: Write> JobSink<'_, W> {
    fn dispatch(&mut self, events: Vec<Event>) -> Result<()> {
        for event in events {
            transport::write_event(self.output, &event)?;
            self.artifacts.write_event(&event)?;
            self.artifacts.append_stdout(&event.stdout)?;
        }
        Ok(())
    }
}

impl<W: Write> NotificationSink for JobSink<'_, W> {
    fn enter_block(&mut self, name: &str) -> Result<()> {
        let events = self.translator.open_phase(name);
        self.dispatch(events)
    }

    fn notify(&mut self, notification: Notification) -> Result<()> {
        let events = self.translator.on_notification(notification);
        self.dispatch(events)
    }
}
