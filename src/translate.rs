//! Event translation.
//!
//! Turns the engine's flat notification stream into the consumer's
//! hierarchy: run → phase → task → outcome. One translator per job; it owns
//! the counter, the virtual console offset and the open-hierarchy UUIDs, and
//! returns the events it builds instead of calling out, so the caller
//! decides where they go.
//!
//! Callers must feed it from one thread at a time. Nothing in here locks.

use chrono::Utc;
use serde::Serialize;
use serde_json::{Map, Value, json};
use uuid::Uuid;

use crate::event::{Event, EventKind};
use crate::model::Notification;
use crate::stats::StatsCounter;

/// Playbook name reported in `playbook_on_start` when the job has none.
pub const DEFAULT_PLAYBOOK: &str = "ftl2_script";

/// Phase name used for automation blocks that don't name themselves.
pub const DEFAULT_PLAY_NAME: &str = "FTL2 Script";

/// Width that play/task headers are padded to with `*`.
const HEADER_WIDTH: usize = 76;

/// Accumulating line count of the rendered event text.
#[derive(Debug, Clone, Copy, Default)]
pub struct VirtualConsole {
    line: u64,
}

impl VirtualConsole {
    /// Append `text`, returning its `(start_line, end_line)` span.
    pub fn append(&mut self, text: &str) -> (u64, u64) {
        let lines = text.matches('\n').count() as u64 + u64::from(!text.is_empty());
        let start = self.line;
        self.line += lines;
        (start, self.line)
    }

    pub fn line(&self) -> u64 {
        self.line
    }
}

/// The task currently open, and who has started in it.
#[derive(Debug, Clone)]
struct OpenTask {
    uuid: Uuid,
    operation: String,
    targets: Vec<String>,
}

/// Per-job notification translator.
#[derive(Debug)]
pub struct EventTranslator {
    ident: String,
    playbook: String,
    show_results: bool,
    counter: u64,
    console: VirtualConsole,
    run_uuid: Option<Uuid>,
    phase_uuid: Option<Uuid>,
    task: Option<OpenTask>,
    stats: StatsCounter,
}

impl EventTranslator {
    pub fn new(ident: impl Into<String>) -> Self {
        Self {
            ident: ident.into(),
            playbook: DEFAULT_PLAYBOOK.to_string(),
            show_results: true,
            counter: 0,
            console: VirtualConsole::default(),
            run_uuid: None,
            phase_uuid: None,
            task: None,
            stats: StatsCounter::new(),
        }
    }

    /// Name reported in the run-start event.
    pub fn playbook(mut self, name: impl Into<String>) -> Self {
        self.playbook = name.into();
        self
    }

    /// Include the ` => {json}` result in outcome lines (default on).
    pub fn show_results(mut self, show: bool) -> Self {
        self.show_results = show;
        self
    }

    pub fn ident(&self) -> &str {
        &self.ident
    }

    /// Number of events emitted so far.
    pub fn counter(&self) -> u64 {
        self.counter
    }

    pub fn stats(&self) -> &StatsCounter {
        &self.stats
    }

    pub fn has_failures(&self) -> bool {
        self.stats.has_failures()
    }

    /// Emit the run-start event. No-op once a run is open.
    pub fn open_run(&mut self) -> Option<Event> {
        if self.run_uuid.is_some() {
            return None;
        }
        let uuid = Uuid::new_v4();
        self.run_uuid = Some(uuid);
        let data = json!({
            "playbook": self.playbook,
            "uuid": uuid,
        });
        Some(self.emit(uuid, EventKind::PlaybookOnStart, data, None, String::new()))
    }

    /// Emit a phase-start for a newly entered automation block.
    ///
    /// Opens the run first if needed. Closes any task left open by the
    /// previous block.
    pub fn open_phase(&mut self, name: &str) -> Vec<Event> {
        let mut events: Vec<Event> = self.open_run().into_iter().collect();
        let uuid = Uuid::new_v4();
        let parent = self.run_uuid;
        self.phase_uuid = Some(uuid);
        self.task = None;
        let data = json!({
            "play": {"name": name, "id": uuid},
        });
        let stdout = header("PLAY", name);
        events.push(self.emit(uuid, EventKind::PlaybookOnPlayStart, data, parent, stdout));
        events
    }

    /// Translate one notification into zero or more events.
    pub fn on_notification(&mut self, notification: Notification) -> Vec<Event> {
        match notification {
            Notification::Start { operation, target } => self.on_start(operation, target),
            Notification::Complete {
                operation,
                target,
                success,
                changed,
                output,
                duration,
            } => self.on_complete(operation, target, success, changed, output, duration),
            Notification::Other { kind, data } => self.on_other(kind, data),
        }
    }

    /// Emit the final stats event with the transposed counts and recap.
    pub fn close_run(&mut self) -> Vec<Event> {
        let mut events: Vec<Event> = self.open_run().into_iter().collect();
        self.task = None;
        let data = to_value(self.stats.transpose());
        let stdout = self.stats.render_recap();
        let parent = self.run_uuid;
        events.push(self.emit(Uuid::new_v4(), EventKind::PlaybookOnStats, data, parent, stdout));
        events
    }

    fn on_start(&mut self, operation: String, target: String) -> Vec<Event> {
        let mut events = self.ensure_phase();

        // A new target for the operation already open joins that task.
        let joined = match self.task.as_mut() {
            Some(task) if task.operation == operation && !task.targets.contains(&target) => {
                task.targets.push(target.clone());
                Some(task.uuid)
            }
            _ => None,
        };
        if let Some(task_uuid) = joined {
            let parent = Some(task_uuid);
            let data = json!({
                "host": target,
                "task": operation,
                "task_action": operation,
            });
            events.push(self.emit(
                Uuid::new_v4(),
                EventKind::RunnerOnStart,
                data,
                parent,
                String::new(),
            ));
            return events;
        }

        events.push(self.open_task(operation, target));
        events
    }

    fn on_complete(
        &mut self,
        operation: String,
        target: String,
        success: bool,
        changed: bool,
        output: Value,
        duration: Option<f64>,
    ) -> Vec<Event> {
        let mut events = self.ensure_phase();

        let open = self
            .task
            .as_ref()
            .filter(|task| task.operation == operation)
            .map(|task| task.uuid);
        let parent = match open {
            Some(uuid) => uuid,
            None => {
                // No matching task: degrade to an implicit task for this outcome.
                let task_start = self.open_task(operation.clone(), target.clone());
                let uuid = task_start.uuid;
                events.push(task_start);
                uuid
            }
        };

        self.stats.fold(&target, success, changed);

        let stdout = self.render_outcome(&target, success, changed, &output);
        let mut data = json!({
            "host": target,
            "task": operation,
            "task_action": operation,
            "res": output,
            "changed": changed,
        });
        if let Some(duration) = duration {
            data["duration"] = json!(duration);
        }
        let kind = if success {
            EventKind::RunnerOnOk
        } else {
            EventKind::RunnerOnFailed
        };
        events.push(self.emit(Uuid::new_v4(), kind, data, Some(parent), stdout));
        events
    }

    fn on_other(&mut self, kind: String, data: Map<String, Value>) -> Vec<Event> {
        let mut events: Vec<Event> = self.open_run().into_iter().collect();
        let parent = self
            .task
            .as_ref()
            .map(|task| task.uuid)
            .or(self.phase_uuid)
            .or(self.run_uuid);
        events.push(self.emit(
            Uuid::new_v4(),
            EventKind::Runner(kind),
            Value::Object(data),
            parent,
            String::new(),
        ));
        events
    }

    fn ensure_phase(&mut self) -> Vec<Event> {
        if self.phase_uuid.is_some() {
            return Vec::new();
        }
        self.open_phase(DEFAULT_PLAY_NAME)
    }

    fn open_task(&mut self, operation: String, target: String) -> Event {
        let uuid = Uuid::new_v4();
        let parent = self.phase_uuid;
        let data = json!({
            "task": {"name": operation, "id": uuid},
            "task_action": operation,
        });
        let stdout = header("TASK", &operation);
        self.task = Some(OpenTask {
            uuid,
            operation,
            targets: vec![target],
        });
        self.emit(uuid, EventKind::PlaybookOnTaskStart, data, parent, stdout)
    }

    fn render_outcome(&self, target: &str, success: bool, changed: bool, output: &Value) -> String {
        let line = match (success, changed) {
            (true, true) => format!("changed: [{target}]"),
            (true, false) => format!("ok: [{target}]"),
            (false, _) => format!("fatal: [{target}]: FAILED!"),
        };
        let line = if self.show_results {
            format!("{line} => {}", pretty_json(output))
        } else {
            line
        };
        if success {
            line
        } else {
            format!("{line}\n...ignoring")
        }
    }

    fn emit(
        &mut self,
        uuid: Uuid,
        kind: EventKind,
        event_data: Value,
        parent_uuid: Option<Uuid>,
        stdout: String,
    ) -> Event {
        self.counter += 1;
        let (start_line, end_line) = self.console.append(&stdout);
        Event {
            uuid,
            counter: self.counter,
            created: Utc::now(),
            runner_ident: self.ident.clone(),
            kind,
            event_data,
            parent_uuid,
            stdout,
            start_line,
            end_line,
        }
    }
}

/// `"\nPLAY [name] ****..."` padded to the header width.
fn header(label: &str, name: &str) -> String {
    let head = format!("\n{label} [{name}] ");
    let pad = HEADER_WIDTH.saturating_sub(head.chars().count());
    format!("{head}{}", "*".repeat(pad))
}

/// JSON with a 4-space indent.
fn pretty_json(value: &Value) -> String {
    let mut buf = Vec::new();
    let formatter = serde_json::ser::PrettyFormatter::with_indent(b"    ");
    let mut ser = serde_json::Serializer::with_formatter(&mut buf, formatter);
    match value.serialize(&mut ser) {
        Ok(()) => String::from_utf8(buf).unwrap_or_else(|_| value.to_string()),
        Err(_) => value.to_string(),
    }
}

fn to_value(value: impl Serialize) -> Value {
    serde_json::to_value(value).unwrap_or(Value::Null)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn console_counts_lines() {
        let mut console = VirtualConsole::default();
        assert_eq!(console.append(""), (0, 0));
        assert_eq!(console.append("ok: [h]"), (0, 1));
        assert_eq!(console.append("\nTASK [x] **"), (1, 3));
        assert_eq!(console.line(), 3);
    }

    #[test]
    fn headers_pad_to_width() {
        let h = header("TASK", "ping");
        assert!(h.starts_with("\nTASK [ping] *"));
        assert_eq!(h.chars().count(), HEADER_WIDTH);

        let long = "x".repeat(100);
        assert_eq!(header("PLAY", &long), format!("\nPLAY [{long}] "));
    }

    #[test]
    fn pretty_json_uses_four_spaces() {
        let text = pretty_json(&json!({"ping": "pong"}));
        assert_eq!(text, "{\n    \"ping\": \"pong\"\n}");
        assert_eq!(pretty_json(&json!({})), "{}");
    }

    #[test]
    fn outcome_lines() {
        let t = EventTranslator::new("1");
        let out = json!({"rc": 0});
        assert_eq!(
            t.render_outcome("web", true, true, &out),
            "changed: [web] => {\n    \"rc\": 0\n}"
        );
        assert!(t.render_outcome("web", true, false, &out).starts_with("ok: [web] => {"));
        assert!(
            t.render_outcome("web", false, false, &out)
                .starts_with("fatal: [web]: FAILED! => {")
        );
        assert!(t.render_outcome("web", false, false, &out).ends_with("\n...ignoring"));

        let quiet = EventTranslator::new("1").show_results(false);
        assert_eq!(quiet.render_outcome("web", true, false, &out), "ok: [web]");
    }
}
