//! Notification content rendered for a due task.

use std::fmt;
use std::str::FromStr;

use chrono::Duration;
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};

use crate::error::ReminderError;
use crate::task::{Priority, ReminderPolicy, Task};

/// What the user can do from a delivered notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NotificationAction {
    Complete,
    Dismiss,
}

impl NotificationAction {
    pub const ALL: [NotificationAction; 2] = [Self::Complete, Self::Dismiss];

    pub fn label(&self) -> &'static str {
        match self {
            Self::Complete => "Complete",
            Self::Dismiss => "Dismiss",
        }
    }
}

impl fmt::Display for NotificationAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Complete => "complete",
            Self::Dismiss => "dismiss",
        })
    }
}

impl FromStr for NotificationAction {
    type Err = ReminderError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "complete" | "done" => Ok(Self::Complete),
            "dismiss" => Ok(Self::Dismiss),
            _ => Err(ReminderError::InvalidState(format!("unknown notification action '{s}'"))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notification {
    /// Notifications are keyed by task; showing again replaces the old one.
    pub task_id: String,
    pub title: String,
    pub body: String,
    pub actions: Vec<NotificationAction>,
}

/// Build the notification for `task`, with times shown in `tz`.
///
/// Returns `None` for tasks without an id (they cannot be keyed).
pub fn render_notification(task: &Task, tz: Tz) -> Option<Notification> {
    let task_id = task.id()?.to_string();

    let mut parts: Vec<String> = Vec::new();
    if let Some(due) = task.due_date {
        parts.push(format!("Due {}", due.with_timezone(&tz).format("%a %b %-d, %H:%M")));
    }
    if let Some(p) = priority_label(task.priority) {
        parts.push(p.to_string());
    }
    if let ReminderPolicy::EarlyOffset(offset) = task.reminder {
        parts.push(format!("Reminder {} early", offset_label(offset)));
    }

    Some(Notification {
        task_id,
        title: task.title.clone(),
        body: parts.join(" · "),
        actions: NotificationAction::ALL.to_vec(),
    })
}

fn priority_label(priority: Priority) -> Option<&'static str> {
    match priority {
        Priority::Urgent => Some("Urgent"),
        Priority::High => Some("High priority"),
        // normal is the default and not worth the space
        Priority::Normal => None,
        Priority::Low => Some("Low priority"),
    }
}

/// Human label for an early offset ("15 minutes", "2 hours", "1 day").
pub fn offset_label(offset: Duration) -> String {
    let minutes = offset.num_minutes();
    let (n, unit) = if minutes != 0 && minutes % (24 * 60) == 0 {
        (minutes / (24 * 60), "day")
    } else if minutes != 0 && minutes % 60 == 0 {
        (minutes / 60, "hour")
    } else {
        (minutes, "minute")
    };
    if n == 1 {
        format!("1 {unit}")
    } else {
        format!("{n} {unit}s")
    }
}
