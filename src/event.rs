//! Translated events in the consumer's schema.
//!
//! Events are immutable once built: the translator assigns the counter,
//! parent link and virtual console span before handing one out.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// A translated, ordered, hierarchy-linked event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    pub uuid: Uuid,
    /// Strictly increasing and gapless within one job, starting at 1.
    pub counter: u64,
    pub created: DateTime<Utc>,
    pub runner_ident: String,
    #[serde(rename = "event")]
    pub kind: EventKind,
    pub event_data: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_uuid: Option<Uuid>,
    /// Rendered text for the virtual console, possibly empty.
    pub stdout: String,
    pub start_line: u64,
    pub end_line: u64,
}

/// Event tag. Serialized as the bare tag string.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum EventKind {
    PlaybookOnStart,
    PlaybookOnPlayStart,
    PlaybookOnTaskStart,
    RunnerOnStart,
    RunnerOnOk,
    RunnerOnFailed,
    PlaybookOnStats,
    /// Pass-through for notification kinds we don't model, tagged
    /// `runner_<kind>`.
    Runner(String),
}

impl EventKind {
    pub fn as_str(&self) -> std::borrow::Cow<'_, str> {
        use std::borrow::Cow;
        match self {
            EventKind::PlaybookOnStart => Cow::Borrowed("playbook_on_start"),
            EventKind::PlaybookOnPlayStart => Cow::Borrowed("playbook_on_play_start"),
            EventKind::PlaybookOnTaskStart => Cow::Borrowed("playbook_on_task_start"),
            EventKind::RunnerOnStart => Cow::Borrowed("runner_on_start"),
            EventKind::RunnerOnOk => Cow::Borrowed("runner_on_ok"),
            EventKind::RunnerOnFailed => Cow::Borrowed("runner_on_failed"),
            EventKind::PlaybookOnStats => Cow::Borrowed("playbook_on_stats"),
            EventKind::Runner(kind) => Cow::Owned(format!("runner_{kind}")),
        }
    }
}

impl std::fmt::Display for EventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.as_str())
    }
}

impl From<EventKind> for String {
    fn from(kind: EventKind) -> Self {
        kind.as_str().into_owned()
    }
}

impl From<String> for EventKind {
    fn from(tag: String) -> Self {
        match tag.as_str() {
            "playbook_on_start" => EventKind::PlaybookOnStart,
            "playbook_on_play_start" => EventKind::PlaybookOnPlayStart,
            "playbook_on_task_start" => EventKind::PlaybookOnTaskStart,
            "runner_on_start" => EventKind::RunnerOnStart,
            "runner_on_ok" => EventKind::RunnerOnOk,
            "runner_on_failed" => EventKind::RunnerOnFailed,
            "playbook_on_stats" => EventKind::PlaybookOnStats,
            _ => match tag.strip_prefix("runner_") {
                Some(kind) => EventKind::Runner(kind.to_string()),
                None => EventKind::Runner(tag),
            },
        }
    }
}
