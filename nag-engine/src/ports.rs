//! Collaborators the engine talks to: task store, notification sink, wake service.
//!
//! Real adapters live with the host (see `nag-cli`); `crate::memory` has
//! in-process versions used by tests.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use nag_core::{Notification, RepeatRule, Result, Task, TaskStatus};
use serde::{Deserialize, Serialize};

/// Read/write access to the user's tasks.
///
/// Calls may suspend; transient failures should come back as
/// `ReminderError::StoreUnavailable` so callers can retry.
#[async_trait]
pub trait TaskStore: Send + Sync {
    /// Single read of one task. `Ok(None)` when it does not exist.
    async fn get_task_by_id(&self, user_id: &str, task_id: &str) -> Result<Option<Task>>;

    async fn update_task_status(
        &self,
        user_id: &str,
        task_id: &str,
        status: TaskStatus,
    ) -> Result<()>;

    /// Bounded single read of every pending task that has a due date.
    async fn list_pending_tasks_with_deadlines(&self, user_id: &str) -> Result<Vec<Task>>;

    /// Persist the occurrence a repeating task advanced to after a fire.
    async fn update_task_occurrence(
        &self,
        user_id: &str,
        task_id: &str,
        due_date: DateTime<Utc>,
        repeat: RepeatRule,
    ) -> Result<()>;
}

/// User-visible notifications, keyed by task id.
pub trait NotificationSink: Send + Sync {
    /// Show (or replace) the notification for `notification.task_id`.
    fn show(&self, notification: &Notification) -> Result<()>;

    /// Remove the notification for `task_id`. No-op if none is showing.
    fn retract(&self, task_id: &str) -> Result<()>;

    /// Local effect after the user completed a task from a notification.
    fn completion_feedback(&self, _task_id: &str) {}
}

/// Opaque identifier of an installed wake primitive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct WakeHandle(pub u64);

/// Payload carried by a wake primitive. Only the id, never a task snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct WakePayload {
    pub task_id: String,
}

/// Delivered by the wake service when a primitive fires.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WakeEvent {
    pub handle: WakeHandle,
    pub task_id: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WakeMode {
    /// Fire at the requested instant.
    Exact,
    /// Fire at or after the requested instant, at the host's convenience.
    Inexact,
}

/// One-shot timers provided by the host. Registration must not block.
pub trait WakeService: Send + Sync {
    /// Whether exact wakes are currently permitted.
    fn can_schedule_exact(&self) -> bool;

    /// Install a wake primitive. Exact requests may fail with
    /// `ReminderError::PermissionDenied`.
    fn schedule_at(
        &self,
        at: DateTime<Utc>,
        mode: WakeMode,
        payload: WakePayload,
    ) -> Result<WakeHandle>;

    /// Invalidate a wake primitive. Unknown or already-fired handles are ignored.
    fn cancel(&self, handle: WakeHandle);
}
