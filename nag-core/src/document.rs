//! Stored form of a task: the document store keeps enums as strings.
//!
//! `TaskDocument` is what adapters read and write; `Task` is what the engine
//! works with. Conversion goes through the codec so unknown strings become
//! `InvalidState` instead of panics.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::ReminderError;
use crate::task::{Priority, ReminderPolicy, RepeatRule, Task, TaskStatus};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskDocument {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub title: String,
    #[serde(default = "default_status")]
    pub status: String,
    #[serde(default = "default_priority")]
    pub priority: String,
    #[serde(default)]
    pub due_date: Option<DateTime<Utc>>,
    #[serde(default = "default_reminder")]
    pub reminder: String,
    #[serde(default = "default_repeat")]
    pub repeat: String,
}

fn default_status() -> String {
    TaskStatus::Pending.to_string()
}

fn default_priority() -> String {
    Priority::Normal.to_string()
}

fn default_reminder() -> String {
    ReminderPolicy::OnTime.to_string()
}

fn default_repeat() -> String {
    RepeatRule::None.to_string()
}

impl TryFrom<TaskDocument> for Task {
    type Error = ReminderError;

    fn try_from(doc: TaskDocument) -> Result<Self, Self::Error> {
        Ok(Task {
            id: doc.id,
            title: doc.title,
            status: doc.status.parse()?,
            priority: doc.priority.parse()?,
            due_date: doc.due_date,
            reminder: doc.reminder.parse()?,
            repeat: doc.repeat.parse()?,
        })
    }
}

impl From<&Task> for TaskDocument {
    fn from(task: &Task) -> Self {
        Self {
            id: task.id.clone(),
            title: task.title.clone(),
            status: task.status.to_string(),
            priority: task.priority.to_string(),
            due_date: task.due_date,
            reminder: task.reminder.to_string(),
            repeat: task.repeat.to_string(),
        }
    }
}
