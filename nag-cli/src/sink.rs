use std::collections::HashMap;
use std::io::Write;
use std::sync::Mutex;

use nag_core::{Notification, ReminderError, Result};
use nag_engine::NotificationSink;

/// Prints notifications to stdout and remembers which ones are up.
#[derive(Debug, Default)]
pub struct ConsoleSink {
    showing: Mutex<HashMap<String, Notification>>,
}

impl ConsoleSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn showing(&self) -> Vec<Notification> {
        let mut out: Vec<_> = self
            .showing
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .values()
            .cloned()
            .collect();
        out.sort_by(|a, b| a.task_id.cmp(&b.task_id));
        out
    }
}

fn emit(line: &str) -> Result<()> {
    let mut out = std::io::stdout().lock();
    writeln!(out, "{line}")
        .and_then(|_| out.flush())
        .map_err(|e| ReminderError::InvalidState(format!("stdout: {e}")))
}

impl NotificationSink for ConsoleSink {
    fn show(&self, n: &Notification) -> Result<()> {
        let actions: Vec<String> = n
            .actions
            .iter()
            .map(|a| format!("{}: {a} {}", a.label(), n.task_id))
            .collect();
        emit(&format!("\n🔔 {}\n   {}\n   [{}]", n.title, n.body, actions.join(" | ")))?;
        self.showing
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(n.task_id.clone(), n.clone());
        Ok(())
    }

    fn retract(&self, task_id: &str) -> Result<()> {
        let removed = self
            .showing
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(task_id);
        if let Some(n) = removed {
            emit(&format!("   (cleared: {})", n.title))?;
        }
        Ok(())
    }

    fn completion_feedback(&self, task_id: &str) {
        let _ = emit(&format!("   ✓ {task_id} done"));
    }
}
