//! ActionHandler: the user's response to a delivered notification.

use std::sync::Arc;

use nag_core::{NotificationAction, ReminderError, Result, TaskStatus};
use tracing::{debug, info, warn};

use crate::ports::{NotificationSink, TaskStore};
use crate::scheduler::WakeScheduler;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActionOutcome {
    /// Status written as `Completed`.
    Completed,
    /// Task was already out of `Pending`; nothing written.
    AlreadyResolved,
    /// Task no longer exists.
    Missing,
    Dismissed,
}

pub struct ActionHandler {
    user_id: String,
    store: Arc<dyn TaskStore>,
    sink: Arc<dyn NotificationSink>,
    scheduler: Arc<WakeScheduler>,
}

impl ActionHandler {
    pub fn new(
        user_id: impl Into<String>,
        store: Arc<dyn TaskStore>,
        sink: Arc<dyn NotificationSink>,
        scheduler: Arc<WakeScheduler>,
    ) -> Self {
        Self {
            user_id: user_id.into(),
            store,
            sink,
            scheduler,
        }
    }

    pub async fn handle(&self, task_id: &str, action: NotificationAction) -> Result<ActionOutcome> {
        match action {
            NotificationAction::Complete => self.complete(task_id).await,
            NotificationAction::Dismiss => {
                // Task state and schedule stay as they are.
                self.retire(task_id);
                debug!(task_id, "notification dismissed");
                Ok(ActionOutcome::Dismissed)
            }
        }
    }

    /// Like [`handle`](Self::handle) for an action identifier coming from the
    /// platform; unknown identifiers are `InvalidState`.
    pub async fn handle_raw(&self, task_id: &str, action: &str) -> Result<ActionOutcome> {
        let action: NotificationAction = action.parse()?;
        self.handle(task_id, action).await
    }

    async fn complete(&self, task_id: &str) -> Result<ActionOutcome> {
        let outcome = match self.store.get_task_by_id(&self.user_id, task_id).await? {
            None => ActionOutcome::Missing,
            Some(t) if !t.is_pending() => ActionOutcome::AlreadyResolved,
            Some(_) => {
                match self
                    .store
                    .update_task_status(&self.user_id, task_id, TaskStatus::Completed)
                    .await
                {
                    Ok(()) => ActionOutcome::Completed,
                    Err(ReminderError::NotFound(_)) => ActionOutcome::Missing,
                    Err(e) => return Err(e),
                }
            }
        };

        // A repeat may have been rearmed between delivery and this action.
        self.scheduler.cancel(task_id);
        self.retire(task_id);

        if outcome == ActionOutcome::Completed {
            self.sink.completion_feedback(task_id);
            info!(task_id, "task completed from notification");
        } else {
            debug!(task_id, ?outcome, "complete action had nothing to write");
        }
        Ok(outcome)
    }

    fn retire(&self, task_id: &str) {
        if let Err(e) = self.sink.retract(task_id) {
            warn!(task_id, error = %e, "failed to retract notification");
        }
    }
}
