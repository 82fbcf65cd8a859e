//! Core data model.
//!
//! A notification is what the automation engine tells us about one operation
//! against one target. A job status is what we tell the consumer about the
//! job as a whole.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Target name used when a notification doesn't carry one.
pub const DEFAULT_TARGET: &str = "localhost";

/// Operation name used when a notification doesn't carry one.
pub const DEFAULT_OPERATION: &str = "unknown";

// ---------------------------------------------------------------------------
// Notification
// ---------------------------------------------------------------------------

/// A raw signal from the automation engine.
#[derive(Debug, Clone, PartialEq)]
pub enum Notification {
    /// An operation started against a target.
    Start { operation: String, target: String },
    /// An operation finished against a target.
    Complete {
        operation: String,
        target: String,
        success: bool,
        changed: bool,
        output: Value,
        duration: Option<f64>,
    },
    /// Anything else. Passed through so the consumer still sees it.
    Other {
        kind: String,
        data: Map<String, Value>,
    },
}

impl Notification {
    pub fn start(operation: impl Into<String>, target: impl Into<String>) -> Self {
        Self::Start {
            operation: operation.into(),
            target: target.into(),
        }
    }

    pub fn complete(
        operation: impl Into<String>,
        target: impl Into<String>,
        success: bool,
        changed: bool,
        output: Value,
    ) -> Self {
        Self::Complete {
            operation: operation.into(),
            target: target.into(),
            success,
            changed,
            output,
            duration: None,
        }
    }

    /// Decode the engine's JSON form.
    ///
    /// Never fails: anything that isn't a recognizable start/complete object
    /// becomes [`Notification::Other`].
    pub fn from_value(value: Value) -> Self {
        let mut fields = match value {
            Value::Object(map) => map,
            other => {
                let mut data = Map::new();
                data.insert("value".to_string(), other);
                return Self::Other {
                    kind: "unknown".to_string(),
                    data,
                };
            }
        };

        let kind = match fields.remove("event") {
            Some(Value::String(kind)) => kind,
            _ => "unknown".to_string(),
        };

        match kind.as_str() {
            "module_start" => Self::Start {
                operation: string_field(&fields, "module", DEFAULT_OPERATION),
                target: string_field(&fields, "host", DEFAULT_TARGET),
            },
            "module_complete" => {
                // `output` is current; `result` is what older scripts send.
                let output = match fields.remove("output") {
                    Some(v) if !is_empty(&v) => v,
                    _ => fields
                        .remove("result")
                        .unwrap_or_else(|| Value::Object(Map::new())),
                };
                Self::Complete {
                    operation: string_field(&fields, "module", DEFAULT_OPERATION),
                    target: string_field(&fields, "host", DEFAULT_TARGET),
                    success: bool_field(&fields, "success"),
                    changed: bool_field(&fields, "changed"),
                    output,
                    duration: fields.get("duration").and_then(Value::as_f64),
                }
            }
            _ => Self::Other { kind, data: fields },
        }
    }
}

fn string_field(fields: &Map<String, Value>, key: &str, default: &str) -> String {
    match fields.get(key) {
        Some(Value::String(s)) => s.clone(),
        Some(Value::Null) | None => default.to_string(),
        Some(other) => other.to_string(),
    }
}

/// Truthiness the way the engine means it: `true`, non-zero, non-empty.
fn bool_field(fields: &Map<String, Value>, key: &str) -> bool {
    match fields.get(key) {
        Some(Value::Bool(b)) => *b,
        Some(Value::Number(n)) => n.as_f64().is_some_and(|f| f != 0.0),
        Some(Value::String(s)) => !s.is_empty(),
        Some(v) => !is_empty(v),
        None => false,
    }
}

fn is_empty(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::Object(m) => m.is_empty(),
        Value::Array(a) => a.is_empty(),
        Value::String(s) => s.is_empty(),
        _ => false,
    }
}

// ---------------------------------------------------------------------------
// Job Status
// ---------------------------------------------------------------------------

/// Lifecycle status of a job as reported to the consumer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    /// Job received, artifacts being prepared.
    Starting,
    /// Automation is executing.
    Running,
    /// Finished with rc 0 and no failed outcomes. Terminal.
    Successful,
    /// Finished with a non-zero rc or a failed outcome. Terminal.
    Failed,
    /// The job could not be carried out. Terminal.
    Error,
}

impl JobStatus {
    /// Is this a terminal status?
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            JobStatus::Successful | JobStatus::Failed | JobStatus::Error
        )
    }

    /// Final status for a finished run.
    pub fn from_run(rc: i32, has_failures: bool) -> Self {
        if rc == 0 && !has_failures {
            JobStatus::Successful
        } else {
            JobStatus::Failed
        }
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            JobStatus::Starting => "starting",
            JobStatus::Running => "running",
            JobStatus::Successful => "successful",
            JobStatus::Failed => "failed",
            JobStatus::Error => "error",
        };
        write!(f, "{s}")
    }
}
