//! Terminal-only run mode.
//!
//! No wire protocol and no artifacts: each event goes to the output as an
//! ANSI-encoded marker, its visible text, and the marker again. A scraper
//! rebuilds the event stream from the markers; a person sees the text.

use std::io::Write;
use std::path::{Path, PathBuf};

use serde_json::{Map, Value, json};
use tracing::{debug, error, warn};

use crate::ansi;
use crate::automation::{Automation, NotificationSink, RUNNER_OPERATION, RunContext};
use crate::config::DEFAULT_ANSI_WIDTH;
use crate::error::{Error, Result};
use crate::event::Event;
use crate::model::{DEFAULT_TARGET, JobStatus, Notification};
use crate::translate::EventTranslator;

use super::job::DEFAULT_IDENT;
use super::worker::{JobOutcome, RC_FAILURES};

/// One terminal-mode run.
#[derive(Debug, Clone)]
pub struct TerminalRun {
    pub playbook: PathBuf,
    pub inventory: Option<PathBuf>,
    pub extravars: Map<String, Value>,
    /// Outcome lines include the result JSON when non-zero.
    pub verbosity: u8,
    pub ansi_width: usize,
    pub job_id: Option<i64>,
}

impl TerminalRun {
    pub fn new(playbook: impl Into<PathBuf>) -> Self {
        Self {
            playbook: playbook.into(),
            inventory: None,
            extravars: Map::new(),
            verbosity: 0,
            ansi_width: DEFAULT_ANSI_WIDTH,
            job_id: None,
        }
    }

    fn context(&self) -> Result<RunContext> {
        Ok(RunContext {
            ident: DEFAULT_IDENT.to_string(),
            private_data_dir: std::env::current_dir()?,
            inventory: self.inventory.clone(),
            extravars: self.extravars.clone(),
            stderr_path: None,
        })
    }

    /// Run `automation`, writing encoded events to `out`.
    ///
    /// # Errors
    ///
    /// Only failures writing to `out`. A failing automation is reported as
    /// a failed outcome and a non-zero rc.
    pub fn run<W: Write>(
        &self,
        automation: &mut dyn Automation,
        out: &mut W,
    ) -> Result<JobOutcome> {
        if !self.playbook.exists() {
            return Err(Error::Automation(format!(
                "could not load script from {}",
                self.playbook.display()
            )));
        }
        let ctx = self.context()?;
        let playbook = self
            .playbook
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| self.playbook.display().to_string());

        let mut sink = TerminalSink {
            translator: EventTranslator::new(DEFAULT_IDENT)
                .playbook(playbook)
                .show_results(self.verbosity > 0),
            out,
            width: self.ansi_width,
            job_id: self.job_id,
        };

        let rc = match automation.run(&ctx, &mut sink) {
            Ok(rc) => rc,
            Err(e) if e.is_transport() => return Err(e),
            Err(e) => {
                error!(error = %e, "automation failed");
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
        debug!(status = %status, rc, "terminal run finished");
        Ok(JobOutcome { status, rc })
    }
}

struct TerminalSink<'a, W: Write> {
    translator: EventTranslator,
    out: &'a mut W,
    width: usize,
    job_id: Option<i64>,
}

impl<W: Write> TerminalSink<'_, W> {
    fn dispatch(&mut self, events: Vec<Event>) -> Result<()> {
        for event in events {
            let text = ansi::render_event(&event, self.job_id, self.width)?;
            self.out
                .write_all(text.as_bytes())
                .and_then(|()| self.out.flush())
                .map_err(Error::Transport)?;
        }
        Ok(())
    }
}

impl<W: Write> NotificationSink for TerminalSink<'_, W> {
    fn enter_block(&mut self, name: &str) -> Result<()> {
        let events = self.translator.open_phase(name);
        self.dispatch(events)
    }

    fn notify(&mut self, notification: Notification) -> Result<()> {
        let events = self.translator.on_notification(notification);
        self.dispatch(events)
    }
}

/// Merge `-e` arguments, later ones winning.
///
/// `@path` reads a JSON object from a file, `{...}` is inline JSON, and
/// `key=value` sets a string. Anything unreadable is skipped.
pub fn parse_extravars<S: AsRef<str>>(items: &[S]) -> Map<String, Value> {
    let mut vars = Map::new();
    for item in items {
        let item = item.as_ref();
        if let Some(path) = item.strip_prefix('@') {
            match read_json_object(Path::new(path)) {
                Some(file_vars) => vars.extend(file_vars),
                None => warn!(path, "skipping unreadable extra vars file"),
            }
        } else if item.starts_with('{') {
            match serde_json::from_str::<Value>(item) {
                Ok(Value::Object(inline)) => vars.extend(inline),
                _ => warn!("skipping malformed inline extra vars"),
            }
        } else if let Some((key, value)) = item.split_once('=') {
            vars.insert(key.to_string(), Value::String(value.to_string()));
        } else {
            debug!(item, "ignoring extra var without '='");
        }
    }
    vars
}

fn read_json_object(path: &Path) -> Option<Map<String, Value>> {
    let raw = std::fs::read_to_string(path).ok()?;
    match serde_json::from_str(&raw).ok()? {
        Value::Object(map) => Some(map),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extravars_merge_in_order() {
        let vars = parse_extravars(&[
            r#"{"a": 1, "b": 2}"#,
            "b=two",
            "c=x=y",
            "noequals",
            "{broken",
        ]);
        assert_eq!(vars.get("a"), Some(&json!(1)));
        assert_eq!(vars.get("b"), Some(&json!("two")));
        assert_eq!(vars.get("c"), Some(&json!("x=y")));
        assert_eq!(vars.len(), 3);
    }

    #[test]
    fn extravars_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("vars.json");
        std::fs::write(&path, r#"{"region": "eu"}"#).unwrap();

        let arg = format!("@{}", path.display());
        let missing = format!("@{}", dir.path().join("nope.json").display());
        let vars = parse_extravars(&[arg, missing]);
        assert_eq!(vars.get("region"), Some(&json!("eu")));
        assert_eq!(vars.len(), 1);
    }
}
