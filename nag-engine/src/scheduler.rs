//! WakeScheduler: at most one outstanding wake primitive per task.
//!
//! Every mutation for a task id runs under that id's map entry lock, so
//! cancel-then-install is atomic with respect to any other caller touching the
//! same id. Unrelated ids only contend on the shard for the length of a
//! non-blocking wake registration.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use nag_core::{ReminderError, ReminderTimeCalculator, Result, Task};
use tracing::{debug, info, warn};

use crate::clock::Clock;
use crate::ports::{WakeEvent, WakeHandle, WakeMode, WakePayload, WakeService};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScheduledReminder {
    pub task_id: String,
    pub trigger_at: DateTime<Utc>,
    pub handle: WakeHandle,
    /// `Inexact` when exact scheduling was denied and the wake is best-effort.
    pub mode: WakeMode,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScheduleOutcome {
    Scheduled(ScheduledReminder),
    /// No future trigger; whatever was scheduled for the task is gone.
    Cleared,
    /// The task has no id yet.
    Unschedulable,
}

/// How a fired wake event relates to the current schedule.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FireStatus {
    /// The event belongs to the live reminder, which is now consumed.
    Current,
    /// A newer wake replaced the one that fired.
    Superseded,
    /// Nothing is recorded for the task (e.g. fired across a restart).
    Unknown,
}

pub struct WakeScheduler {
    wake: Arc<dyn WakeService>,
    clock: Arc<dyn Clock>,
    calculator: ReminderTimeCalculator,
    reminders: DashMap<String, ScheduledReminder>,
    exact_unavailable: AtomicBool,
}

impl WakeScheduler {
    pub fn new(
        wake: Arc<dyn WakeService>,
        clock: Arc<dyn Clock>,
        calculator: ReminderTimeCalculator,
    ) -> Self {
        Self {
            wake,
            clock,
            calculator,
            reminders: DashMap::new(),
            exact_unavailable: AtomicBool::new(false),
        }
    }

    pub fn calculator(&self) -> &ReminderTimeCalculator {
        &self.calculator
    }

    /// Bring the schedule for `task` in line with its current state.
    ///
    /// Replaces any existing wake for the id; clears it when the task no longer
    /// has a future trigger.
    pub fn reschedule(&self, task: &Task) -> Result<ScheduleOutcome> {
        let Some(task_id) = task.id() else {
            debug!(title = %task.title, "task has no id yet; not scheduling");
            return Ok(ScheduleOutcome::Unschedulable);
        };

        let now = self.clock.now();
        let Some(trigger_at) = self.calculator.trigger(task, now) else {
            let cancelled = self.cancel(task_id);
            debug!(task_id, cancelled, "no future trigger; reminder cleared");
            return Ok(ScheduleOutcome::Cleared);
        };

        let reminder = match self.reminders.entry(task_id.to_string()) {
            Entry::Occupied(mut slot) => {
                self.wake.cancel(slot.get().handle);
                match self.install(task_id, trigger_at) {
                    Ok(reminder) => {
                        slot.insert(reminder.clone());
                        reminder
                    }
                    Err(e) => {
                        slot.remove();
                        return Err(e);
                    }
                }
            }
            Entry::Vacant(slot) => {
                let reminder = self.install(task_id, trigger_at)?;
                slot.insert(reminder.clone());
                reminder
            }
        };

        info!(
            task_id,
            trigger_at = %reminder.trigger_at,
            mode = ?reminder.mode,
            "reminder scheduled"
        );
        Ok(ScheduleOutcome::Scheduled(reminder))
    }

    /// Remove and invalidate the wake for `task_id`. Returns whether one existed.
    pub fn cancel(&self, task_id: &str) -> bool {
        match self.reminders.entry(task_id.to_string()) {
            Entry::Occupied(slot) => {
                // invalidate while the entry is still locked
                let handle = slot.get().handle;
                self.wake.cancel(handle);
                slot.remove();
                debug!(task_id, handle = handle.0, "reminder cancelled");
                true
            }
            Entry::Vacant(_) => false,
        }
    }

    /// Consume the schedule entry for a fired wake event.
    pub fn acknowledge_fire(&self, event: &WakeEvent) -> FireStatus {
        match self.reminders.entry(event.task_id.clone()) {
            Entry::Occupied(slot) if slot.get().handle == event.handle => {
                slot.remove();
                FireStatus::Current
            }
            Entry::Occupied(_) => FireStatus::Superseded,
            Entry::Vacant(_) => FireStatus::Unknown,
        }
    }

    pub fn get(&self, task_id: &str) -> Option<ScheduledReminder> {
        self.reminders.get(task_id).map(|r| r.value().clone())
    }

    /// Current schedule ordered by trigger time.
    pub fn snapshot(&self) -> Vec<ScheduledReminder> {
        let mut out: Vec<ScheduledReminder> =
            self.reminders.iter().map(|r| r.value().clone()).collect();
        out.sort_by(|a, b| a.trigger_at.cmp(&b.trigger_at).then_with(|| a.task_id.cmp(&b.task_id)));
        out
    }

    pub fn len(&self) -> usize {
        self.reminders.len()
    }

    pub fn is_empty(&self) -> bool {
        self.reminders.is_empty()
    }

    /// Settings-level indicator: the last install had to fall back to an
    /// inexact wake.
    pub fn exact_scheduling_degraded(&self) -> bool {
        self.exact_unavailable.load(Ordering::Relaxed)
    }

    fn install(&self, task_id: &str, trigger_at: DateTime<Utc>) -> Result<ScheduledReminder> {
        let payload = WakePayload {
            task_id: task_id.to_string(),
        };

        if self.wake.can_schedule_exact() {
            match self.wake.schedule_at(trigger_at, WakeMode::Exact, payload.clone()) {
                Ok(handle) => {
                    self.exact_unavailable.store(false, Ordering::Relaxed);
                    return Ok(ScheduledReminder {
                        task_id: task_id.to_string(),
                        trigger_at,
                        handle,
                        mode: WakeMode::Exact,
                    });
                }
                Err(ReminderError::PermissionDenied(reason)) => {
                    warn!(task_id, %reason, "exact wake denied; falling back to inexact");
                }
                Err(e) => return Err(e),
            }
        } else if !self.exact_unavailable.load(Ordering::Relaxed) {
            warn!(task_id, "exact wake scheduling unavailable; reminders are best-effort");
        }

        self.exact_unavailable.store(true, Ordering::Relaxed);
        let handle = self.wake.schedule_at(trigger_at, WakeMode::Inexact, payload)?;
        Ok(ScheduledReminder {
            task_id: task_id.to_string(),
            trigger_at,
            handle,
            mode: WakeMode::Inexact,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::memory::ManualWakeService;
    use chrono::{Duration, TimeZone};
    use nag_core::TaskStatus;

    fn setup() -> (WakeScheduler, Arc<ManualWakeService>, Arc<ManualClock>) {
        let now = Utc.with_ymd_and_hms(2026, 5, 1, 8, 0, 0).unwrap();
        let clock = Arc::new(ManualClock::new(now));
        let wake = Arc::new(ManualWakeService::new());
        let scheduler =
            WakeScheduler::new(wake.clone(), clock.clone(), ReminderTimeCalculator::default());
        (scheduler, wake, clock)
    }

    #[test]
    fn reschedule_replaces_instead_of_appending() {
        let (s, wake, clock) = setup();
        let now = clock.now();
        let mut t = Task::new("a", "report").with_due_date(now + Duration::hours(1));

        s.reschedule(&t).unwrap();
        t.due_date = Some(now + Duration::hours(3));
        let out = s.reschedule(&t).unwrap();

        let live = wake.live_for("a");
        assert_eq!(live.len(), 1);
        assert_eq!(live[0].at, now + Duration::hours(3));
        assert!(matches!(out, ScheduleOutcome::Scheduled(r) if r.handle == live[0].handle));
        assert_eq!(s.len(), 1);
    }

    #[test]
    fn reschedule_without_trigger_cancels_existing() {
        let (s, wake, clock) = setup();
        let t = Task::new("a", "report").with_due_date(clock.now() + Duration::hours(1));
        s.reschedule(&t).unwrap();

        let done = t.clone().with_status(TaskStatus::Completed);
        assert_eq!(s.reschedule(&done).unwrap(), ScheduleOutcome::Cleared);
        assert!(wake.live_for("a").is_empty());
        assert!(s.get("a").is_none());
    }

    #[test]
    fn draft_task_is_unschedulable() {
        let (s, wake, clock) = setup();
        let t = Task::draft("unsaved").with_due_date(clock.now() + Duration::hours(1));
        assert_eq!(s.reschedule(&t).unwrap(), ScheduleOutcome::Unschedulable);
        assert!(wake.live().is_empty());
    }

    #[test]
    fn cancel_is_idempotent() {
        let (s, wake, _) = setup();
        assert!(!s.cancel("missing"));
        assert!(!s.cancel("missing"));
        assert!(s.is_empty());
        assert!(wake.live().is_empty());
    }

    #[test]
    fn falls_back_to_inexact_when_exact_not_permitted() {
        let (s, wake, clock) = setup();
        wake.set_exact_allowed(false);
        let t = Task::new("a", "report").with_due_date(clock.now() + Duration::hours(1));

        let ScheduleOutcome::Scheduled(r) = s.reschedule(&t).unwrap() else {
            panic!("expected a scheduled reminder");
        };
        assert_eq!(r.mode, WakeMode::Inexact);
        assert!(s.exact_scheduling_degraded());
        assert_eq!(wake.live_for("a")[0].mode, WakeMode::Inexact);

        wake.set_exact_allowed(true);
        s.reschedule(&t).unwrap();
        assert!(!s.exact_scheduling_degraded());
    }

    #[test]
    fn falls_back_when_exact_install_is_denied() {
        let (s, wake, clock) = setup();
        wake.deny_exact_installs(true);
        let t = Task::new("a", "report").with_due_date(clock.now() + Duration::hours(1));

        let ScheduleOutcome::Scheduled(r) = s.reschedule(&t).unwrap() else {
            panic!("expected a scheduled reminder");
        };
        assert_eq!(r.mode, WakeMode::Inexact);
        assert!(s.exact_scheduling_degraded());
    }

    #[test]
    fn fire_acknowledgement_detects_superseded_handles() {
        let (s, _, clock) = setup();
        let mut t = Task::new("a", "report").with_due_date(clock.now() + Duration::hours(1));
        let ScheduleOutcome::Scheduled(first) = s.reschedule(&t).unwrap() else {
            panic!("expected a scheduled reminder");
        };
        t.due_date = Some(clock.now() + Duration::hours(2));
        let ScheduleOutcome::Scheduled(second) = s.reschedule(&t).unwrap() else {
            panic!("expected a scheduled reminder");
        };

        let stale = WakeEvent {
            handle: first.handle,
            task_id: "a".into(),
        };
        assert_eq!(s.acknowledge_fire(&stale), FireStatus::Superseded);
        assert!(s.get("a").is_some());

        let current = WakeEvent {
            handle: second.handle,
            task_id: "a".into(),
        };
        assert_eq!(s.acknowledge_fire(&current), FireStatus::Current);
        assert!(s.get("a").is_none());
        assert_eq!(s.acknowledge_fire(&current), FireStatus::Unknown);
    }

    #[test]
    fn concurrent_reschedule_and_cancel_keep_at_most_one_wake() {
        let (s, wake, clock) = setup();
        let s = Arc::new(s);
        let base = clock.now();

        let threads: Vec<_> = (0..8)
            .map(|i| {
                let s = s.clone();
                std::thread::spawn(move || {
                    for j in 0..200 {
                        if (i + j) % 3 == 0 {
                            s.cancel("shared");
                        } else {
                            let due = base + Duration::minutes(10 + i64::from(j));
                            s.reschedule(&Task::new("shared", "contended").with_due_date(due))
                                .unwrap();
                        }
                    }
                })
            })
            .collect();
        for t in threads {
            t.join().unwrap();
        }

        assert_eq!(wake.max_live_per_task(), 1);
        let live = wake.live_for("shared");
        match s.get("shared") {
            Some(r) => {
                assert_eq!(live.len(), 1);
                assert_eq!(live[0].handle, r.handle);
            }
            None => assert!(live.is_empty()),
        }
    }

    #[test]
    fn cancel_after_reschedule_leaves_task_unscheduled() {
        let (s, wake, clock) = setup();
        let s = Arc::new(s);
        let due = clock.now() + Duration::hours(1);

        for _ in 0..50 {
            let a = {
                let s = s.clone();
                std::thread::spawn(move || {
                    s.reschedule(&Task::new("x", "race").with_due_date(due)).unwrap();
                })
            };
            a.join().unwrap();
            s.cancel("x");
            assert!(s.get("x").is_none());
            assert!(wake.live_for("x").is_empty());
        }
    }
}
