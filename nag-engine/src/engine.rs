//! ReminderEngine: wires the scheduler, handlers and job queue together.
//!
//! Hosts talk to the engine through four entry points: task saved, task
//! deleted, wake fired, notification action. Fires, actions and recovery are
//! journaled jobs; saves and deletes act on the schedule synchronously.

use std::sync::Arc;

use async_trait::async_trait;
use nag_core::{NotificationAction, ReminderTimeCalculator, Result, Task};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::actions::ActionHandler;
use crate::clock::Clock;
use crate::delivery::DeliveryHandler;
use crate::jobs::{Job, JobJournal, JobQueue, JobRunner, job_channel};
use crate::ports::{NotificationSink, TaskStore, WakeEvent, WakeService};
use crate::recovery::RecoveryPass;
use crate::retry::RetryPolicy;
use crate::scheduler::{ScheduleOutcome, WakeScheduler};

#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub user_id: String,
    pub calculator: ReminderTimeCalculator,
    pub retry: RetryPolicy,
    pub max_concurrent_jobs: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            user_id: "local".into(),
            calculator: ReminderTimeCalculator::default(),
            retry: RetryPolicy::default(),
            max_concurrent_jobs: 4,
        }
    }
}

/// Host-provided collaborators.
pub struct EngineParts {
    pub store: Arc<dyn TaskStore>,
    pub sink: Arc<dyn NotificationSink>,
    pub wake: Arc<dyn WakeService>,
    pub clock: Arc<dyn Clock>,
    pub journal: Arc<dyn JobJournal>,
}

struct EngineRunner {
    delivery: DeliveryHandler,
    actions: ActionHandler,
    recovery: RecoveryPass,
}

#[async_trait]
impl JobRunner for EngineRunner {
    async fn run(&self, job: &Job) -> Result<()> {
        match job {
            Job::Deliver { event } => {
                self.delivery.handle_wake(event).await?;
            }
            Job::Act { task_id, action } => {
                self.actions.handle(task_id, *action).await?;
            }
            Job::Recover => {
                self.recovery.run().await?;
            }
        }
        Ok(())
    }
}

pub struct ReminderEngine {
    sink: Arc<dyn NotificationSink>,
    scheduler: Arc<WakeScheduler>,
    queue: JobQueue,
    worker: JoinHandle<()>,
    forwarder: Option<JoinHandle<()>>,
}

impl ReminderEngine {
    /// Spawn the job worker and replay whatever the journal left unfinished.
    /// Must be called inside a tokio runtime.
    pub fn start(config: EngineConfig, parts: EngineParts) -> Result<Self> {
        let EngineParts {
            store,
            sink,
            wake,
            clock,
            journal,
        } = parts;

        let scheduler = Arc::new(WakeScheduler::new(wake, clock.clone(), config.calculator));
        let runner = EngineRunner {
            delivery: DeliveryHandler::new(
                config.user_id.clone(),
                store.clone(),
                sink.clone(),
                scheduler.clone(),
                clock.clone(),
            ),
            actions: ActionHandler::new(
                config.user_id.clone(),
                store.clone(),
                sink.clone(),
                scheduler.clone(),
            ),
            recovery: RecoveryPass::new(
                config.user_id.clone(),
                store,
                scheduler.clone(),
                clock.clone(),
                config.retry,
            ),
        };

        let (queue, worker) = job_channel(
            journal,
            clock,
            Arc::new(runner),
            config.retry,
            config.max_concurrent_jobs,
        );
        let worker = tokio::spawn(worker.run());

        let replayed = queue.replay_pending()?;
        info!(user_id = %config.user_id, replayed, "reminder engine started");

        Ok(Self {
            sink,
            scheduler,
            queue,
            worker,
            forwarder: None,
        })
    }

    /// Feed fired wakes from a wake service into the job queue.
    pub fn attach_wake_events(&mut self, mut events: mpsc::UnboundedReceiver<WakeEvent>) {
        let queue = self.queue.clone();
        let forwarder = tokio::spawn(async move {
            while let Some(event) = events.recv().await {
                let task_id = event.task_id.clone();
                if let Err(e) = queue.submit(Job::Deliver { event }) {
                    error!(task_id = %task_id, error = %e, "dropping fired wake");
                }
            }
        });
        if let Some(old) = self.forwarder.replace(forwarder) {
            old.abort();
        }
    }

    /// A task was created or edited. Non-pending tasks lose their reminder
    /// and any notification still showing.
    pub fn task_saved(&self, task: &Task) -> Result<ScheduleOutcome> {
        let outcome = self.scheduler.reschedule(task)?;
        if let Some(id) = task.id().filter(|_| !task.is_pending()) {
            self.retire(id);
        }
        Ok(outcome)
    }

    /// A task was deleted. Returns whether a reminder was scheduled for it.
    pub fn task_deleted(&self, task_id: &str) -> bool {
        let had = self.scheduler.cancel(task_id);
        self.retire(task_id);
        had
    }

    pub fn wake_fired(&self, event: WakeEvent) -> Result<Uuid> {
        self.queue.submit(Job::Deliver { event })
    }

    pub fn notification_action(&self, task_id: &str, action: NotificationAction) -> Result<Uuid> {
        self.queue.submit(Job::Act {
            task_id: task_id.to_string(),
            action,
        })
    }

    /// Process start, reboot or clock change: rebuild the schedule.
    pub fn restarted(&self) -> Result<Uuid> {
        self.queue.submit(Job::Recover)
    }

    pub fn scheduler(&self) -> &Arc<WakeScheduler> {
        &self.scheduler
    }

    pub async fn wait_idle(&self) {
        self.queue.wait_idle().await;
    }

    /// Stop accepting wakes, drain queued jobs and stop the worker.
    pub async fn shutdown(mut self) {
        if let Some(forwarder) = self.forwarder.take() {
            forwarder.abort();
            let _ = forwarder.await;
        }
        self.queue.wait_idle().await;
        drop(self.queue);
        if let Err(e) = self.worker.await {
            warn!(error = %e, "job worker ended abnormally");
        }
        info!("reminder engine stopped");
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
    use crate::jobs::MemoryJournal;
    use crate::memory::{ManualWakeService, MemoryTaskStore, RecordingSink};
    use chrono::{Duration, TimeZone, Utc};
    use nag_core::{Notification, TaskStatus};

    #[tokio::test]
    async fn saving_completed_task_clears_reminder_and_notification() {
        let clock = Arc::new(ManualClock::new(Utc.with_ymd_and_hms(2026, 5, 1, 8, 0, 0).unwrap()));
        let sink = Arc::new(RecordingSink::new());
        let wake = Arc::new(ManualWakeService::new());
        let engine = ReminderEngine::start(
            EngineConfig::default(),
            EngineParts {
                store: Arc::new(MemoryTaskStore::new()),
                sink: sink.clone(),
                wake: wake.clone(),
                clock: clock.clone(),
                journal: Arc::new(MemoryJournal::new()),
            },
        )
        .unwrap();

        let task = Task::new("a", "file taxes").with_due_date(clock.now() + Duration::hours(3));
        assert!(matches!(engine.task_saved(&task).unwrap(), ScheduleOutcome::Scheduled(_)));
        sink.show(&Notification {
            task_id: "a".into(),
            title: "file taxes".into(),
            body: String::new(),
            actions: NotificationAction::ALL.to_vec(),
        })
        .unwrap();

        let done = task.with_status(TaskStatus::Completed);
        assert_eq!(engine.task_saved(&done).unwrap(), ScheduleOutcome::Cleared);
        assert!(wake.live().is_empty());
        assert!(sink.showing("a").is_none());

        assert!(!engine.task_deleted("a"));
        engine.shutdown().await;
    }
}
