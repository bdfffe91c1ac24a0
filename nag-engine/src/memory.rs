//! In-process adapters: task store, notification sink and wake service.
//!
//! Used by the engine's tests and by hosts that want a fully local setup.
//! They count calls and can inject failures so retry paths can be exercised.

use std::collections::{BTreeMap, HashMap};
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use nag_core::{Notification, ReminderError, RepeatRule, Result, Task, TaskStatus};

use crate::ports::{
    NotificationSink, TaskStore, WakeEvent, WakeHandle, WakeMode, WakePayload, WakeService,
};

fn take_one(counter: &AtomicUsize) -> bool {
    counter
        .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
        .is_ok()
}

/// Task store backed by a map of user id -> task id -> task.
#[derive(Debug, Default)]
pub struct MemoryTaskStore {
    tasks: Mutex<HashMap<String, HashMap<String, Task>>>,
    next_id: AtomicU64,
    status_writes: AtomicUsize,
    occurrence_writes: AtomicUsize,
    list_calls: AtomicUsize,
    failing_reads: AtomicUsize,
    failing_writes: AtomicUsize,
}

impl MemoryTaskStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace a task, assigning an id to drafts. Returns the id.
    pub fn insert(&self, user_id: &str, mut task: Task) -> String {
        let id = match task.id.clone() {
            Some(id) => id,
            None => {
                let id = format!("task-{:04}", self.next_id.fetch_add(1, Ordering::SeqCst) + 1);
                task.id = Some(id.clone());
                id
            }
        };
        self.lock()
            .entry(user_id.to_string())
            .or_default()
            .insert(id.clone(), task);
        id
    }

    pub fn remove(&self, user_id: &str, task_id: &str) -> Option<Task> {
        self.lock().get_mut(user_id)?.remove(task_id)
    }

    /// Direct read without failure injection.
    pub fn peek(&self, user_id: &str, task_id: &str) -> Option<Task> {
        self.lock().get(user_id)?.get(task_id).cloned()
    }

    pub fn status_writes(&self) -> usize {
        self.status_writes.load(Ordering::SeqCst)
    }

    pub fn occurrence_writes(&self) -> usize {
        self.occurrence_writes.load(Ordering::SeqCst)
    }

    pub fn list_calls(&self) -> usize {
        self.list_calls.load(Ordering::SeqCst)
    }

    /// Make the next `n` reads fail with `StoreUnavailable`.
    pub fn fail_next_reads(&self, n: usize) {
        self.failing_reads.store(n, Ordering::SeqCst);
    }

    /// Make the next `n` writes fail with `StoreUnavailable`.
    pub fn fail_next_writes(&self, n: usize) {
        self.failing_writes.store(n, Ordering::SeqCst);
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, HashMap<String, Task>>> {
        self.tasks.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn check_read(&self) -> Result<()> {
        if take_one(&self.failing_reads) {
            return Err(ReminderError::StoreUnavailable("injected read failure".into()));
        }
        Ok(())
    }

    fn check_write(&self) -> Result<()> {
        if take_one(&self.failing_writes) {
            return Err(ReminderError::StoreUnavailable("injected write failure".into()));
        }
        Ok(())
    }
}

#[async_trait]
impl TaskStore for MemoryTaskStore {
    async fn get_task_by_id(&self, user_id: &str, task_id: &str) -> Result<Option<Task>> {
        self.check_read()?;
        Ok(self.peek(user_id, task_id))
    }

    async fn update_task_status(
        &self,
        user_id: &str,
        task_id: &str,
        status: TaskStatus,
    ) -> Result<()> {
        self.check_write()?;
        let mut tasks = self.lock();
        let task = tasks
            .get_mut(user_id)
            .and_then(|m| m.get_mut(task_id))
            .ok_or_else(|| ReminderError::NotFound(task_id.to_string()))?;
        task.status = status;
        self.status_writes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn list_pending_tasks_with_deadlines(&self, user_id: &str) -> Result<Vec<Task>> {
        self.list_calls.fetch_add(1, Ordering::SeqCst);
        self.check_read()?;
        let tasks = self.lock();
        let mut out: Vec<Task> = tasks
            .get(user_id)
            .map(|m| {
                m.values()
                    .filter(|t| t.is_pending() && t.due_date.is_some())
                    .cloned()
                    .collect()
            })
            .unwrap_or_default();
        out.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(out)
    }

    async fn update_task_occurrence(
        &self,
        user_id: &str,
        task_id: &str,
        due_date: DateTime<Utc>,
        repeat: RepeatRule,
    ) -> Result<()> {
        self.check_write()?;
        let mut tasks = self.lock();
        let task = tasks
            .get_mut(user_id)
            .and_then(|m| m.get_mut(task_id))
            .ok_or_else(|| ReminderError::NotFound(task_id.to_string()))?;
        task.due_date = Some(due_date);
        task.repeat = repeat;
        self.occurrence_writes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// Sink that keeps the currently showing notifications.
#[derive(Debug, Default)]
pub struct RecordingSink {
    showing: Mutex<HashMap<String, Notification>>,
    shows: AtomicUsize,
    retracts: AtomicUsize,
    feedback: Mutex<Vec<String>>,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn showing(&self, task_id: &str) -> Option<Notification> {
        self.showing.lock().unwrap_or_else(|e| e.into_inner()).get(task_id).cloned()
    }

    pub fn showing_count(&self) -> usize {
        self.showing.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn show_calls(&self) -> usize {
        self.shows.load(Ordering::SeqCst)
    }

    pub fn retract_calls(&self) -> usize {
        self.retracts.load(Ordering::SeqCst)
    }

    /// Task ids that received completion feedback, in order.
    pub fn feedback(&self) -> Vec<String> {
        self.feedback.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }
}

impl NotificationSink for RecordingSink {
    fn show(&self, notification: &Notification) -> Result<()> {
        self.shows.fetch_add(1, Ordering::SeqCst);
        self.showing
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(notification.task_id.clone(), notification.clone());
        Ok(())
    }

    fn retract(&self, task_id: &str) -> Result<()> {
        self.retracts.fetch_add(1, Ordering::SeqCst);
        self.showing.lock().unwrap_or_else(|e| e.into_inner()).remove(task_id);
        Ok(())
    }

    fn completion_feedback(&self, task_id: &str) {
        self.feedback
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(task_id.to_string());
    }
}

/// A wake primitive registered with [`ManualWakeService`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LiveWake {
    pub handle: WakeHandle,
    pub at: DateTime<Utc>,
    pub mode: WakeMode,
    pub task_id: String,
}

/// Wake service whose primitives only fire when the caller says so.
#[derive(Debug)]
pub struct ManualWakeService {
    next: AtomicU64,
    live: Mutex<BTreeMap<WakeHandle, LiveWake>>,
    exact_allowed: AtomicBool,
    deny_exact_installs: AtomicBool,
    max_live_per_task: AtomicUsize,
}

impl Default for ManualWakeService {
    fn default() -> Self {
        Self {
            next: AtomicU64::new(1),
            live: Mutex::new(BTreeMap::new()),
            exact_allowed: AtomicBool::new(true),
            deny_exact_installs: AtomicBool::new(false),
            max_live_per_task: AtomicUsize::new(0),
        }
    }
}

impl ManualWakeService {
    pub fn new() -> Self {
        Self::default()
    }

    /// What the capability query reports.
    pub fn set_exact_allowed(&self, allowed: bool) {
        self.exact_allowed.store(allowed, Ordering::SeqCst);
    }

    /// Reject exact installs even though the capability query says yes.
    pub fn deny_exact_installs(&self, deny: bool) {
        self.deny_exact_installs.store(deny, Ordering::SeqCst);
    }

    pub fn live(&self) -> Vec<LiveWake> {
        self.lock().values().cloned().collect()
    }

    pub fn live_for(&self, task_id: &str) -> Vec<LiveWake> {
        self.lock().values().filter(|w| w.task_id == task_id).cloned().collect()
    }

    /// Highest number of simultaneously live wakes seen for any single task.
    pub fn max_live_per_task(&self) -> usize {
        self.max_live_per_task.load(Ordering::SeqCst)
    }

    /// Fire (and remove) every wake due at or before `now`, earliest first.
    pub fn fire_due(&self, now: DateTime<Utc>) -> Vec<WakeEvent> {
        let mut live = self.lock();
        let mut due: Vec<LiveWake> = live.values().filter(|w| w.at <= now).cloned().collect();
        due.sort_by(|a, b| a.at.cmp(&b.at).then_with(|| a.handle.cmp(&b.handle)));
        for w in &due {
            live.remove(&w.handle);
        }
        due.into_iter()
            .map(|w| WakeEvent {
                handle: w.handle,
                task_id: w.task_id,
            })
            .collect()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, BTreeMap<WakeHandle, LiveWake>> {
        self.live.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl WakeService for ManualWakeService {
    fn can_schedule_exact(&self) -> bool {
        self.exact_allowed.load(Ordering::SeqCst)
    }

    fn schedule_at(
        &self,
        at: DateTime<Utc>,
        mode: WakeMode,
        payload: WakePayload,
    ) -> Result<WakeHandle> {
        if mode == WakeMode::Exact
            && (!self.can_schedule_exact() || self.deny_exact_installs.load(Ordering::SeqCst))
        {
            return Err(ReminderError::PermissionDenied("exact alarms not permitted".into()));
        }

        let handle = WakeHandle(self.next.fetch_add(1, Ordering::SeqCst));
        let mut live = self.lock();
        live.insert(
            handle,
            LiveWake {
                handle,
                at,
                mode,
                task_id: payload.task_id.clone(),
            },
        );
        let count = live.values().filter(|w| w.task_id == payload.task_id).count();
        self.max_live_per_task.fetch_max(count, Ordering::SeqCst);
        Ok(handle)
    }

    fn cancel(&self, handle: WakeHandle) {
        self.lock().remove(&handle);
    }
}
