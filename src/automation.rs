//! The automation capability.
//!
//! An [`Automation`] runs the job's operations and reports them, one at a
//! time, to a [`NotificationSink`]. It knows nothing about events, artifacts
//! or the wire; the sink does.

use std::collections::BTreeMap;
use std::fs::OpenOptions;
use std::io::{BufRead, BufReader};
use std::os::unix::process::ExitStatusExt;
use std::path::PathBuf;
use std::process::{Child, Command, Stdio};

use serde_json::{Map, Value, json};
use tracing::{debug, info, warn};

use crate::artifacts::CommandRecord;
use crate::engine::job::JobEnvelope;
use crate::error::{Error, Result};
use crate::model::{DEFAULT_TARGET, Notification};
use crate::translate::DEFAULT_PLAY_NAME;

/// Operation name for outcomes the runner reports about itself.
pub const RUNNER_OPERATION: &str = "ftl2_runner";

/// Notification kind a script prints to start a named block.
const BLOCK_START: &str = "automation_start";

/// Receives notifications from a running automation.
///
/// Calls arrive one at a time from the thread driving the automation.
pub trait NotificationSink {
    /// A new automation block began.
    fn enter_block(&mut self, name: &str) -> Result<()>;

    fn notify(&mut self, notification: Notification) -> Result<()>;
}

/// What an automation run sees of its job.
#[derive(Debug, Clone, Default)]
pub struct RunContext {
    pub ident: String,
    pub private_data_dir: PathBuf,
    pub inventory: Option<PathBuf>,
    pub extravars: Map<String, Value>,
    /// Where the automation's own diagnostics go. Inherited when unset.
    pub stderr_path: Option<PathBuf>,
}

impl RunContext {
    pub fn from_envelope(envelope: &JobEnvelope) -> Self {
        Self {
            ident: envelope.ident.clone(),
            private_data_dir: envelope.private_data_dir.clone(),
            inventory: envelope.inventory(),
            extravars: envelope.extravars(),
            stderr_path: Some(envelope.artifacts().stderr_path()),
        }
    }
}

/// Something that executes a job's operations.
pub trait Automation {
    /// Run to completion, returning the exit code.
    ///
    /// Errors returned by `sink` must be passed back unchanged; the caller
    /// tells a broken transport apart from a failed automation by them.
    fn run(&mut self, ctx: &RunContext, sink: &mut dyn NotificationSink) -> Result<i32>;

    /// The `command` artifact for this run.
    fn command(&self, ctx: &RunContext) -> CommandRecord {
        CommandRecord {
            command: Vec::new(),
            cwd: ctx.private_data_dir.clone(),
            env: BTreeMap::new(),
        }
    }
}

// ---------------------------------------------------------------------------
// Script-backed automation
// ---------------------------------------------------------------------------

/// Runs an executable script as a child process.
///
/// The script prints one JSON notification per line on stdout. Its stderr
/// goes to the run's stderr file. Anything on stdout that isn't a JSON
/// object is logged and dropped.
#[derive(Debug, Clone)]
pub struct ScriptAutomation {
    script: PathBuf,
}

impl ScriptAutomation {
    pub fn new(script: impl Into<PathBuf>) -> Self {
        Self {
            script: script.into(),
        }
    }

    /// Relative script paths resolve against the process cwd, not the
    /// private data dir the child runs in.
    fn absolute_script(&self) -> Result<PathBuf> {
        if self.script.is_relative() {
            Ok(std::env::current_dir()?.join(&self.script))
        } else {
            Ok(self.script.clone())
        }
    }

    fn spawn(&self, ctx: &RunContext) -> Result<Child> {
        let script = self.absolute_script()?;
        let stderr = match &ctx.stderr_path {
            Some(path) => Stdio::from(OpenOptions::new().create(true).append(true).open(path)?),
            None => Stdio::inherit(),
        };
        debug!(script = %script.display(), ident = %ctx.ident, "spawning automation script");
        Command::new(&script)
            .current_dir(&ctx.private_data_dir)
            .envs(script_env(ctx))
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(stderr)
            .spawn()
            .map_err(|e| Error::Automation(format!("failed to start {}: {e}", script.display())))
    }

    fn report_missing(&self, sink: &mut dyn NotificationSink) -> Result<i32> {
        warn!(script = %self.script.display(), "automation script not found");
        sink.notify(Notification::start(RUNNER_OPERATION, DEFAULT_TARGET))?;
        sink.notify(Notification::complete(
            RUNNER_OPERATION,
            DEFAULT_TARGET,
            true,
            false,
            json!({"msg": format!("No script found at {}", self.script.display())}),
        ))?;
        Ok(0)
    }
}

impl Automation for ScriptAutomation {
    fn run(&mut self, ctx: &RunContext, sink: &mut dyn NotificationSink) -> Result<i32> {
        if !self.script.exists() {
            return self.report_missing(sink);
        }

        let mut child = self.spawn(ctx)?;
        let pumped = match child.stdout.take() {
            Some(stdout) => pump(BufReader::new(stdout), sink),
            None => Err(Error::Automation("script stdout not captured".to_string())),
        };
        if pumped.is_err() {
            // Nobody is listening any more.
            let _ = child.kill();
        }
        let status = child.wait()?;
        pumped?;

        let rc = status
            .code()
            .or_else(|| status.signal().map(|signal| 128 + signal))
            .unwrap_or(1);
        info!(rc, script = %self.script.display(), "automation script exited");
        Ok(rc)
    }

    fn command(&self, ctx: &RunContext) -> CommandRecord {
        CommandRecord {
            command: vec![self.script.display().to_string()],
            cwd: ctx.private_data_dir.clone(),
            env: script_env(ctx),
        }
    }
}

/// Environment handed to the script.
fn script_env(ctx: &RunContext) -> BTreeMap<String, String> {
    let mut env = BTreeMap::new();
    env.insert("FTL2_IDENT".to_string(), ctx.ident.clone());
    env.insert(
        "FTL2_PRIVATE_DATA_DIR".to_string(),
        ctx.private_data_dir.display().to_string(),
    );
    if let Some(inventory) = &ctx.inventory {
        env.insert("FTL2_INVENTORY".to_string(), inventory.display().to_string());
    }
    env.insert(
        "FTL2_EXTRAVARS".to_string(),
        Value::Object(ctx.extravars.clone()).to_string(),
    );
    env
}

/// Feed each line of script output to `sink`.
fn pump<R: BufRead>(reader: R, sink: &mut dyn NotificationSink) -> Result<()> {
    for line in reader.lines() {
        let line = line?;
        match parse_line(&line) {
            Some(ScriptLine::Block(name)) => sink.enter_block(&name)?,
            Some(ScriptLine::Notification(notification)) => sink.notify(notification)?,
            None => {
                if !line.trim().is_empty() {
                    debug!(line = %line, "ignoring non-notification script output");
                }
            }
        }
    }
    Ok(())
}

#[derive(Debug, PartialEq)]
enum ScriptLine {
    Block(String),
    Notification(Notification),
}

fn parse_line(line: &str) -> Option<ScriptLine> {
    let value = match serde_json::from_str::<Value>(line.trim()) {
        Ok(value @ Value::Object(_)) => value,
        _ => return None,
    };
    if value.get("event").and_then(Value::as_str) == Some(BLOCK_START) {
        let name = value
            .get("name")
            .and_then(Value::as_str)
            .filter(|name| !name.is_empty())
            .unwrap_or(DEFAULT_PLAY_NAME);
        return Some(ScriptLine::Block(name.to_string()));
    }
    Some(ScriptLine::Notification(Notification::from_value(value)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn block_start_lines() {
        assert_eq!(
            parse_line(r#"{"event": "automation_start", "name": "Deploy"}"#),
            Some(ScriptLine::Block("Deploy".to_string()))
        );
        assert_eq!(
            parse_line(r#"{"event": "automation_start"}"#),
            Some(ScriptLine::Block(DEFAULT_PLAY_NAME.to_string()))
        );
    }

    #[test]
    fn notification_lines() {
        assert_eq!(
            parse_line(r#"{"event": "module_start", "module": "ping", "host": "h1"}"#),
            Some(ScriptLine::Notification(Notification::start("ping", "h1")))
        );
        assert_eq!(parse_line("PLAY [all] ****"), None);
        assert_eq!(parse_line("[1, 2]"), None);
    }

    #[test]
    fn env_includes_inventory_only_when_present() {
        let mut ctx = RunContext {
            ident: "7".to_string(),
            private_data_dir: PathBuf::from("/tmp/pdd"),
            ..Default::default()
        };
        let env = script_env(&ctx);
        assert_eq!(env["FTL2_IDENT"], "7");
        assert_eq!(env["FTL2_EXTRAVARS"], "{}");
        assert!(!env.contains_key("FTL2_INVENTORY"));

        ctx.inventory = Some(PathBuf::from("/tmp/pdd/inventory"));
        assert_eq!(script_env(&ctx)["FTL2_INVENTORY"], "/tmp/pdd/inventory");
    }
}
