//! DeliveryHandler: what happens when a wake primitive fires.
//!
//! The wake event only carries the task id. The task is re-read from the store
//! because the state known at schedule time is stale by now: the task may have
//! been edited, completed or deleted in the meantime.

use std::sync::Arc;

use nag_core::{ReminderError, Result, Task, TaskStatus, render_notification};
use tracing::{debug, info, warn};

use crate::clock::Clock;
use crate::ports::{NotificationSink, TaskStore, WakeEvent};
use crate::scheduler::{FireStatus, ScheduleOutcome, ScheduledReminder, WakeScheduler};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SuppressReason {
    /// The fired wake had already been replaced by a newer one.
    Superseded,
    NotFound,
    NotPending(TaskStatus),
    /// Untracked fire (e.g. replayed after a crash) for a task whose current
    /// occurrence is still ahead; it belonged to an earlier occurrence.
    NotDue,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeliveryOutcome {
    /// Notification shown; `rearmed` is the next occurrence for repeating tasks.
    Delivered { rearmed: Option<ScheduledReminder> },
    Suppressed(SuppressReason),
}

pub struct DeliveryHandler {
    user_id: String,
    store: Arc<dyn TaskStore>,
    sink: Arc<dyn NotificationSink>,
    scheduler: Arc<WakeScheduler>,
    clock: Arc<dyn Clock>,
}

impl DeliveryHandler {
    pub fn new(
        user_id: impl Into<String>,
        store: Arc<dyn TaskStore>,
        sink: Arc<dyn NotificationSink>,
        scheduler: Arc<WakeScheduler>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            user_id: user_id.into(),
            store,
            sink,
            scheduler,
            clock,
        }
    }

    /// Re-validate the task behind `event`, notify, and rearm repeats.
    ///
    /// Missing or no-longer-pending tasks are suppressed without error. Store
    /// failures are returned so the job wrapper can retry.
    pub async fn handle_wake(&self, event: &WakeEvent) -> Result<DeliveryOutcome> {
        let task_id = event.task_id.as_str();

        let fire = self.scheduler.acknowledge_fire(event);
        if fire == FireStatus::Superseded {
            debug!(task_id, handle = event.handle.0, "stale wake ignored");
            return Ok(DeliveryOutcome::Suppressed(SuppressReason::Superseded));
        }

        let mut task = match self.store.get_task_by_id(&self.user_id, task_id).await? {
            None => {
                debug!(task_id, "task gone before its reminder fired");
                self.retire(task_id);
                return Ok(DeliveryOutcome::Suppressed(SuppressReason::NotFound));
            }
            Some(t) if !t.is_pending() => {
                debug!(task_id, status = %t.status, "task no longer pending; reminder suppressed");
                self.retire(task_id);
                return Ok(DeliveryOutcome::Suppressed(SuppressReason::NotPending(t.status)));
            }
            Some(t) => t,
        };
        if task.id.is_none() {
            task.id = Some(task_id.to_string());
        }

        if fire == FireStatus::Unknown
            && self.scheduler.calculator().trigger(&task, self.clock.now()).is_some()
        {
            debug!(task_id, "untracked wake for an occurrence still ahead; rearming instead");
            self.scheduler.reschedule(&task)?;
            return Ok(DeliveryOutcome::Suppressed(SuppressReason::NotDue));
        }

        let tz = self.scheduler.calculator().timezone();
        let notification = render_notification(&task, tz)
            .ok_or_else(|| ReminderError::InvalidState(format!("cannot render task {task_id}")))?;
        self.sink.show(&notification)?;
        info!(task_id, title = %task.title, "reminder delivered");

        let rearmed = if task.repeat.is_repeating() {
            self.rearm(task_id, &task).await?
        } else {
            None
        };

        Ok(DeliveryOutcome::Delivered { rearmed })
    }

    async fn rearm(&self, task_id: &str, task: &Task) -> Result<Option<ScheduledReminder>> {
        let now = self.clock.now();
        let Some(next) = self.scheduler.calculator().next_occurrence(task, now) else {
            info!(task_id, repeat = %task.repeat, "repeat series finished");
            return Ok(None);
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

        match self.scheduler.reschedule(&next.apply_to(task))? {
            ScheduleOutcome::Scheduled(r) => Ok(Some(r)),
            ScheduleOutcome::Cleared | ScheduleOutcome::Unschedulable => Ok(None),
        }
    }

    fn retire(&self, task_id: &str) {
        if let Err(e) = self.sink.retract(task_id) {
            warn!(task_id, error = %e, "failed to retract notification");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::memory::{ManualWakeService, MemoryTaskStore, RecordingSink};
    use chrono::{Duration, TimeZone, Utc};
    use nag_core::{ReminderTimeCalculator, RepeatRule};

    struct Fixture {
        store: Arc<MemoryTaskStore>,
        sink: Arc<RecordingSink>,
        wake: Arc<ManualWakeService>,
        clock: Arc<ManualClock>,
        scheduler: Arc<WakeScheduler>,
        handler: DeliveryHandler,
    }

    fn fixture() -> Fixture {
        let clock = Arc::new(ManualClock::new(Utc.with_ymd_and_hms(2026, 5, 1, 8, 0, 0).unwrap()));
        let store = Arc::new(MemoryTaskStore::new());
        let sink = Arc::new(RecordingSink::new());
        let wake = Arc::new(ManualWakeService::new());
        let scheduler = Arc::new(WakeScheduler::new(
            wake.clone(),
            clock.clone(),
            ReminderTimeCalculator::default(),
        ));
        let handler = DeliveryHandler::new(
            "u1",
            store.clone(),
            sink.clone(),
            scheduler.clone(),
            clock.clone(),
        );
        Fixture {
            store,
            sink,
            wake,
            clock,
            scheduler,
            handler,
        }
    }

    #[tokio::test]
    async fn delivers_pending_task() {
        let f = fixture();
        let due = f.clock.now() + Duration::hours(1);
        let task = Task::new("a", "Submit form").with_due_date(due);
        f.store.insert("u1", task.clone());
        f.scheduler.reschedule(&task).unwrap();

        f.clock.set(due);
        let events = f.wake.fire_due(due);
        let out = f.handler.handle_wake(&events[0]).await.unwrap();

        assert_eq!(out, DeliveryOutcome::Delivered { rearmed: None });
        assert_eq!(f.sink.showing("a").unwrap().title, "Submit form");
        assert!(f.scheduler.is_empty());
    }

    #[tokio::test]
    async fn missing_task_is_suppressed_quietly() {
        let f = fixture();
        let event = WakeEvent {
            handle: crate::ports::WakeHandle(99),
            task_id: "ghost".into(),
        };
        let out = f.handler.handle_wake(&event).await.unwrap();
        assert_eq!(out, DeliveryOutcome::Suppressed(SuppressReason::NotFound));
        assert_eq!(f.sink.show_calls(), 0);
    }

    #[tokio::test]
    async fn store_failure_is_returned_for_retry() {
        let f = fixture();
        f.store.insert("u1", Task::new("a", "x").with_due_date(f.clock.now()));
        f.store.fail_next_reads(1);
        let event = WakeEvent {
            handle: crate::ports::WakeHandle(1),
            task_id: "a".into(),
        };
        let err = f.handler.handle_wake(&event).await.unwrap_err();
        assert!(err.is_transient());

        // second attempt goes through
        let out = f.handler.handle_wake(&event).await.unwrap();
        assert!(matches!(out, DeliveryOutcome::Delivered { .. }));
    }

    #[tokio::test]
    async fn rearm_persists_next_occurrence() {
        let f = fixture();
        let due = f.clock.now() + Duration::hours(1);
        let task = Task::new("b", "Stretch").with_due_date(due).with_repeat(RepeatRule::Weekly);
        f.store.insert("u1", task.clone());
        f.scheduler.reschedule(&task).unwrap();

        f.clock.set(due);
        let events = f.wake.fire_due(due);
        let out = f.handler.handle_wake(&events[0]).await.unwrap();

        let DeliveryOutcome::Delivered { rearmed: Some(r) } = out else {
            panic!("expected a rearmed reminder, got {out:?}");
        };
        assert_eq!(r.trigger_at, due + Duration::weeks(1));
        assert_eq!(f.store.peek("u1", "b").unwrap().due_date, Some(due + Duration::weeks(1)));
        assert_eq!(f.store.occurrence_writes(), 1);
    }

    #[tokio::test]
    async fn rearm_survives_failed_persist() {
        let f = fixture();
        let due = f.clock.now() + Duration::hours(1);
        let task = Task::new("b", "Stretch").with_due_date(due).with_repeat(RepeatRule::Daily);
        f.store.insert("u1", task.clone());
        f.scheduler.reschedule(&task).unwrap();
        f.store.fail_next_writes(1);

        f.clock.set(due);
        let events = f.wake.fire_due(due);
        let out = f.handler.handle_wake(&events[0]).await.unwrap();

        assert!(matches!(out, DeliveryOutcome::Delivered { rearmed: Some(_) }));
        assert_eq!(f.wake.live_for("b").len(), 1);
        assert_eq!(f.store.occurrence_writes(), 0);
    }

    #[tokio::test]
    async fn untracked_fire_for_future_occurrence_is_suppressed() {
        let f = fixture();
        // The previous fire already moved the series to tomorrow.
        let due = f.clock.now() + Duration::days(1);
        let task = Task::new("b", "Stretch").with_due_date(due).with_repeat(RepeatRule::Daily);
        f.store.insert("u1", task);

        let event = WakeEvent {
            handle: crate::ports::WakeHandle(7),
            task_id: "b".into(),
        };
        let out = f.handler.handle_wake(&event).await.unwrap();

        assert_eq!(out, DeliveryOutcome::Suppressed(SuppressReason::NotDue));
        assert_eq!(f.sink.show_calls(), 0);
        assert_eq!(f.store.occurrence_writes(), 0);
        assert_eq!(f.store.peek("u1", "b").unwrap().due_date, Some(due));
        assert_eq!(f.wake.live_for("b")[0].at, due);
    }
}
