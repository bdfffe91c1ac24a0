//! RecoveryPass: rebuild the whole schedule after a restart.
//!
//! Wake primitives do not survive a reboot, so the schedule is reconstructed
//! from the store. `reschedule` replaces rather than appends, which makes the
//! pass idempotent and independent of task order.
//!
//! A repeating task whose fire time passed while the process was down is moved
//! to its next future occurrence without notifying for the missed ones.

use std::sync::Arc;

use nag_core::{Result, Task};
use tracing::{debug, info, warn};

use crate::clock::Clock;
use crate::ports::TaskStore;
use crate::retry::{RetryPolicy, retry_with_backoff};
use crate::scheduler::{ScheduleOutcome, WakeScheduler};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RecoveryReport {
    pub scanned: usize,
    pub scheduled: usize,
    /// Repeating tasks moved past missed occurrences; also counted in `scheduled`.
    pub advanced: usize,
    /// Pending tasks whose trigger already passed and that have no further
    /// occurrence; left unscheduled.
    pub missed: usize,
    pub failed: usize,
}

pub struct RecoveryPass {
    user_id: String,
    store: Arc<dyn TaskStore>,
    scheduler: Arc<WakeScheduler>,
    clock: Arc<dyn Clock>,
    retry: RetryPolicy,
}

impl RecoveryPass {
    pub fn new(
        user_id: impl Into<String>,
        store: Arc<dyn TaskStore>,
        scheduler: Arc<WakeScheduler>,
        clock: Arc<dyn Clock>,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            user_id: user_id.into(),
            store,
            scheduler,
            clock,
            retry,
        }
    }

    pub async fn run(&self) -> Result<RecoveryReport> {
        let store = &self.store;
        let user_id = self.user_id.as_str();
        // Nothing is applied until the read succeeds as a whole.
        let tasks = retry_with_backoff(&self.retry, "recovery read", move || {
            store.list_pending_tasks_with_deadlines(user_id)
        })
        .await?;

        let mut report = RecoveryReport {
            scanned: tasks.len(),
            ..RecoveryReport::default()
        };

        for task in &tasks {
            match self.scheduler.reschedule(task) {
                Ok(ScheduleOutcome::Scheduled(_)) => report.scheduled += 1,
                Ok(ScheduleOutcome::Cleared) if task.repeat.is_repeating() => {
                    match self.advance(task).await {
                        Ok(true) => {
                            report.scheduled += 1;
                            report.advanced += 1;
                        }
                        Ok(false) => report.missed += 1,
                        Err(e) => {
                            warn!(
                                task_id = task.id().unwrap_or("?"),
                                error = %e,
                                "could not advance missed repeat"
                            );
                            report.failed += 1;
                        }
                    }
                }
                Ok(ScheduleOutcome::Cleared) => {
                    debug!(task_id = task.id().unwrap_or("?"), "missed while down; not scheduled");
                    report.missed += 1;
                }
                Ok(ScheduleOutcome::Unschedulable) => report.failed += 1,
                Err(e) => {
                    warn!(
                        task_id = task.id().unwrap_or("?"),
                        error = %e,
                        "could not reschedule during recovery"
                    );
                    report.failed += 1;
                }
            }
        }

        info!(
            scanned = report.scanned,
            scheduled = report.scheduled,
            advanced = report.advanced,
            missed = report.missed,
            failed = report.failed,
            "recovery pass finished"
        );
        Ok(report)
    }

    /// Move a repeating task past occurrences it missed while down. Returns
    /// whether a future occurrence was scheduled.
    async fn advance(&self, task: &Task) -> Result<bool> {
        let Some(task_id) = task.id() else {
            return Ok(false);
        };
        let now = self.clock.now();
        let Some(next) = self.scheduler.calculator().next_occurrence(task, now) else {
            info!(task_id, repeat = %task.repeat, "repeat series ended while down");
            return Ok(false);
        };

        if let Err(e) = self
            .store
            .update_task_occurrence(&self.user_id, task_id, next.due_date, next.repeat)
            .await
        {
            warn!(
                task_id,
                error = %e,
                "could not persist next occurrence; rearming in memory only"
            );
        }

        let scheduled = matches!(
            self.scheduler.reschedule(&next.apply_to(task))?,
            ScheduleOutcome::Scheduled(_)
        );
        if scheduled {
            info!(task_id, due = %next.due_date, "skipped missed occurrences");
        }
        Ok(scheduled)
    }
}
