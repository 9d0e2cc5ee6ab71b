use serde::{Deserialize, Serialize};
use serde_json::Value;

use gantry_core::{millis_to_rfc3339, ServiceError, ValidationErrors};
use gantry_entity::SortDirection;

use crate::urn;

// ---------------------------------------------------------------------------
// TaskStatus
// ---------------------------------------------------------------------------

/// Lifecycle state of a task.
///
/// ```text
/// pending → processing → success
///                      → failed (after retries run out)
///         → cancelled
/// ```
///
/// A task observed in `processing` after a restart is simply re-selected by
/// the next dispatch pass for its type — delivery is at-least-once.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    Pending,
    Processing,
    Success,
    Failed,
    Cancelled,
}

impl TaskStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Processing => "processing",
            Self::Success => "success",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(Self::Pending),
            "processing" => Some(Self::Processing),
            "success" => Some(Self::Success),
            "failed" => Some(Self::Failed),
            "cancelled" => Some(Self::Cancelled),
            _ => None,
        }
    }

    /// Whether the task has reached a terminal state.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Success | Self::Failed | Self::Cancelled)
    }
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// TaskFault — structured error stored on the task record
// ---------------------------------------------------------------------------

/// Fault name for structured domain errors.
pub const GENERAL_ERROR: &str = "GeneralError";

/// Fault name used by the worker runtime when the worker itself faulted.
pub const WORKER_EXCEPTION: &str = "WorkerException";

/// Structured error persisted on a task's `error` field.
///
/// `inner` carries a wrapped cause; the dispatcher unwraps exactly one
/// [`WORKER_EXCEPTION`] level before storing, deeper nesting is kept verbatim.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskFault {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stack: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub inner: Option<Box<TaskFault>>,
}

impl TaskFault {
    /// A domain error identified by a source and a message key.
    pub fn general(source: &str, key: &str) -> Self {
        Self {
            name: GENERAL_ERROR.to_string(),
            source: Some(source.to_string()),
            message: format!("{}.{}", source.to_lowercase(), key),
            stack: None,
            inner: None,
        }
    }

    /// A worker-level fault with no wrapped cause (panic, unknown method).
    pub fn worker(message: impl Into<String>) -> Self {
        Self {
            name: WORKER_EXCEPTION.to_string(),
            source: None,
            message: message.into(),
            stack: None,
            inner: None,
        }
    }

    /// Wrap a handler fault the way the worker runtime reports it.
    pub fn worker_exception(inner: TaskFault) -> Self {
        Self {
            name: WORKER_EXCEPTION.to_string(),
            source: None,
            message: "worker execution failed".to_string(),
            stack: None,
            inner: Some(Box::new(inner)),
        }
    }

    /// Unwrap one [`WORKER_EXCEPTION`] level if it carries an inner cause.
    pub fn unwrap_worker_exception(self) -> Self {
        if self.name == WORKER_EXCEPTION {
            if let Some(inner) = self.inner {
                return *inner;
            }
        }
        self
    }
}

impl std::fmt::Display for TaskFault {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.name, self.message)
    }
}

// ---------------------------------------------------------------------------
// Task — the persisted record
// ---------------------------------------------------------------------------

/// A single background task tracked by the connector.
///
/// Stored as one JSON document in the entity store, keyed by `id`.
/// Timestamps are RFC 3339 strings except `retainUntil`, which is a
/// millisecond epoch so the retention sweep can range-compare it.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Task {
    pub id: String,

    #[serde(rename = "type")]
    pub task_type: String,

    pub status: TaskStatus,

    /// Handler input, deep-cloned at create time.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<Value>,

    /// Handler output, set on success only.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,

    /// Last failure, set on each failed attempt.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<TaskFault>,

    pub date_created: String,
    /// Updated on every write except `cancel`, which keeps the previous
    /// value as the retention baseline.
    pub date_modified: String,

    /// Earliest time the dispatcher may pick this task.
    /// Present iff status is pending or processing.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub date_next_process: Option<String>,

    /// Present iff status is success or failed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub date_completed: Option<String>,

    /// Present iff status is cancelled.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub date_cancelled: Option<String>,

    /// Delay between retries (ms); absent means the connector default.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retry_interval: Option<u64>,

    /// Remaining retry budget; absent means unlimited.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retries_remaining: Option<u32>,

    /// Retention window (ms): 0 = remove on terminal, -1 = keep forever.
    /// Cleared once `retainUntil` is derived.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retain_for: Option<i64>,

    /// Epoch ms past which the sweeper may remove this terminal task;
    /// -1 means never expire.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retain_until: Option<i64>,
}

impl Task {
    /// Map into the externally exposed shape. The id becomes the URN and
    /// `retainUntil` is rendered as a timestamp (`-1` has no expiry date).
    pub fn into_view(self) -> TaskView {
        TaskView {
            id: urn::to_urn(&self.id),
            task_type: self.task_type,
            status: self.status,
            payload: self.payload,
            result: self.result,
            error: self.error,
            date_created: self.date_created,
            date_modified: self.date_modified,
            date_completed: self.date_completed,
            date_cancelled: self.date_cancelled,
            retry_interval: self.retry_interval,
            retries_remaining: self.retries_remaining,
            date_retain_until: self
                .retain_until
                .filter(|ms| *ms >= 0)
                .map(millis_to_rfc3339),
        }
    }
}

/// Task shape returned from `get` and `query`: the record minus the
/// scheduling internals (`retainFor`, `dateNextProcess`).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskView {
    pub id: String,
    #[serde(rename = "type")]
    pub task_type: String,
    pub status: TaskStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<TaskFault>,
    pub date_created: String,
    pub date_modified: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub date_completed: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub date_cancelled: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retry_interval: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retries_remaining: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub date_retain_until: Option<String>,
}

// ---------------------------------------------------------------------------
// CreateOptions
// ---------------------------------------------------------------------------

/// Options accepted by `create`.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateOptions {
    /// Number of retries after the first failed attempt. Must be >= 1.
    #[serde(default)]
    pub retry_count: Option<u32>,

    /// Delay between retries in ms. Must be >= 1.
    #[serde(default)]
    pub retry_interval: Option<u64>,

    /// Retention window in ms: -1 keeps the terminal record forever,
    /// 0 (the default) removes it immediately.
    #[serde(default)]
    pub retain_for: Option<i64>,
}

impl CreateOptions {
    pub fn validate(&self) -> Result<(), ServiceError> {
        let mut errors = ValidationErrors::new();
        if self.retry_count == Some(0) {
            errors.push("retryCount", "must be >= 1");
        }
        if self.retry_interval == Some(0) {
            errors.push("retryInterval", "must be >= 1 ms");
        }
        if let Some(retain) = self.retain_for {
            if retain < -1 {
                errors.push("retainFor", "must be -1 or >= 0");
            }
        }
        errors.into_result()
    }
}

// ---------------------------------------------------------------------------
// TaskQuery — the control-surface query shape
// ---------------------------------------------------------------------------

/// Sortable task properties exposed to queries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum SortProperty {
    DateCreated,
    DateModified,
    DateCompleted,
    Status,
}

impl SortProperty {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::DateCreated => "dateCreated",
            Self::DateModified => "dateModified",
            Self::DateCompleted => "dateCompleted",
            Self::Status => "status",
        }
    }
}

/// Query over the task table. Defaults: all types, all statuses,
/// `dateCreated` descending.
#[derive(Debug, Clone, Default)]
pub struct TaskQuery {
    pub task_type: Option<String>,
    pub statuses: Option<Vec<TaskStatus>>,
    pub sort_property: Option<SortProperty>,
    pub sort_direction: Option<SortDirection>,
    pub cursor: Option<String>,
    pub page_size: Option<usize>,
}

// ---------------------------------------------------------------------------
// API request types
// ---------------------------------------------------------------------------

/// Body for `POST /tasks`.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateTaskRequest {
    #[serde(rename = "type")]
    pub task_type: String,

    #[serde(default)]
    pub payload: Option<Value>,

    #[serde(flatten)]
    pub options: CreateOptions,
}

/// Query parameters for `GET /tasks`.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskListQuery {
    #[serde(rename = "type", default)]
    pub task_type: Option<String>,

    #[serde(default)]
    pub status: Option<TaskStatus>,

    #[serde(default)]
    pub sort_property: Option<SortProperty>,

    #[serde(default)]
    pub sort_direction: Option<SortDirection>,

    #[serde(default)]
    pub cursor: Option<String>,

    #[serde(default)]
    pub page_size: Option<usize>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn status_roundtrip() {
        for s in &[
            TaskStatus::Pending,
            TaskStatus::Processing,
            TaskStatus::Success,
            TaskStatus::Failed,
            TaskStatus::Cancelled,
        ] {
            let json = serde_json::to_string(s).unwrap();
            let back: TaskStatus = serde_json::from_str(&json).unwrap();
            assert_eq!(*s, back);
            assert_eq!(TaskStatus::from_str(s.as_str()), Some(*s));
        }
    }

    #[test]
    fn status_terminal() {
        assert!(!TaskStatus::Pending.is_terminal());
        assert!(!TaskStatus::Processing.is_terminal());
        assert!(TaskStatus::Success.is_terminal());
        assert!(TaskStatus::Failed.is_terminal());
        assert!(TaskStatus::Cancelled.is_terminal());
    }

    #[test]
    fn task_json_roundtrip() {
        let task = Task {
            id: "0123456789abcdef0123456789abcdef".into(),
            task_type: "mail.send".into(),
            status: TaskStatus::Pending,
            payload: Some(json!({"to": "x@example.com"})),
            result: None,
            error: None,
            date_created: "2026-01-01T00:00:00.000Z".into(),
            date_modified: "2026-01-01T00:00:00.000Z".into(),
            date_next_process: Some("2026-01-01T00:00:00.000Z".into()),
            date_completed: None,
            date_cancelled: None,
            retry_interval: Some(1000),
            retries_remaining: Some(3),
            retain_for: Some(0),
            retain_until: None,
        };
        let json = serde_json::to_string(&task).unwrap();
        let back: Task = serde_json::from_str(&json).unwrap();
        assert_eq!(back.id, task.id);
        assert_eq!(back.status, TaskStatus::Pending);
        assert_eq!(back.retries_remaining, Some(3));
        // Absent optionals must not appear in the document.
        assert!(json.contains("\"type\":\"mail.send\""));
        assert!(!json.contains("\"result\""));
        assert!(!json.contains("\"dateCompleted\""));
        assert!(!json.contains("\"retainUntil\""));
    }

    #[test]
    fn view_renames_retention_and_hides_scheduling() {
        let task = Task {
            id: "ab".repeat(16),
            task_type: "t".into(),
            status: TaskStatus::Success,
            payload: None,
            result: Some(json!({"ok": true})),
            error: None,
            date_created: "2026-01-01T00:00:00.000Z".into(),
            date_modified: "2026-01-01T00:00:10.000Z".into(),
            date_next_process: None,
            date_completed: Some("2026-01-01T00:00:10.000Z".into()),
            date_cancelled: None,
            retry_interval: None,
            retries_remaining: None,
            retain_for: None,
            retain_until: Some(1_700_000_000_000),
        };
        let view = task.into_view();
        assert!(view.id.starts_with("background-task:entity-storage:"));
        assert_eq!(
            view.date_retain_until.as_deref(),
            Some(gantry_core::millis_to_rfc3339(1_700_000_000_000).as_str())
        );

        let json = serde_json::to_value(&view).unwrap();
        assert!(json.get("retainFor").is_none());
        assert!(json.get("dateNextProcess").is_none());
        assert!(json.get("retainUntil").is_none());
        assert!(json.get("dateRetainUntil").is_some());
    }

    #[test]
    fn view_keeps_forever_retention_dateless() {
        let task = Task {
            id: "cd".repeat(16),
            task_type: "t".into(),
            status: TaskStatus::Failed,
            payload: None,
            result: None,
            error: None,
            date_created: "2026-01-01T00:00:00.000Z".into(),
            date_modified: "2026-01-01T00:00:00.000Z".into(),
            date_next_process: None,
            date_completed: Some("2026-01-01T00:00:00.000Z".into()),
            date_cancelled: None,
            retry_interval: None,
            retries_remaining: None,
            retain_for: None,
            retain_until: Some(-1),
        };
        assert!(task.into_view().date_retain_until.is_none());
    }

    #[test]
    fn fault_general_message_format() {
        let fault = TaskFault::general("Test", "error");
        assert_eq!(fault.name, GENERAL_ERROR);
        assert_eq!(fault.source.as_deref(), Some("Test"));
        assert_eq!(fault.message, "test.error");
    }

    #[test]
    fn fault_unwraps_one_worker_exception_level() {
        let cause = TaskFault::general("Mail", "sendFailed");
        let doubly = TaskFault::worker_exception(TaskFault::worker_exception(cause.clone()));

        let once = doubly.unwrap_worker_exception();
        assert_eq!(once.name, WORKER_EXCEPTION);
        assert_eq!(once.inner.as_deref(), Some(&cause));

        // A worker fault without a cause stays as-is.
        let bare = TaskFault::worker("worker panicked");
        assert_eq!(bare.clone().unwrap_worker_exception(), bare);
    }

    #[test]
    fn create_options_validation() {
        assert!(CreateOptions::default().validate().is_ok());
        assert!(CreateOptions { retry_count: Some(1), ..Default::default() }.validate().is_ok());
        assert!(CreateOptions { retain_for: Some(-1), ..Default::default() }.validate().is_ok());

        let err = CreateOptions { retry_count: Some(0), retry_interval: Some(0), retain_for: Some(-2) }
            .validate()
            .unwrap_err();
        let msg = err.to_string();
        assert!(msg.contains("retryCount"));
        assert!(msg.contains("retryInterval"));
        assert!(msg.contains("retainFor"));
    }

    #[test]
    fn create_request_deserialize() {
        let json = r#"{"type":"mail.send","payload":{"to":"a"},"retryCount":2,"retainFor":10000}"#;
        let req: CreateTaskRequest = serde_json::from_str(json).unwrap();
        assert_eq!(req.task_type, "mail.send");
        assert_eq!(req.payload, Some(json!({"to": "a"})));
        assert_eq!(req.options.retry_count, Some(2));
        assert_eq!(req.options.retain_for, Some(10000));
        assert!(req.options.retry_interval.is_none());
    }
}
