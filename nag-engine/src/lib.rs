//! nag-engine: wake scheduling, delivery, notification actions and restart recovery

pub mod actions;
pub mod clock;
pub mod delivery;
pub mod engine;
pub mod jobs;
pub mod memory;
pub mod ports;
pub mod recovery;
pub mod retry;
pub mod scheduler;
pub mod wake;

pub use actions::{ActionHandler, ActionOutcome};
pub use clock::{Clock, ManualClock, SystemClock};
pub use delivery::{DeliveryHandler, DeliveryOutcome, SuppressReason};
pub use engine::{EngineConfig, EngineParts, ReminderEngine};
pub use jobs::{
    FileJournal, Job, JobEnvelope, JobJournal, JobQueue, JobRunner, JobWorker, MemoryJournal,
    job_channel,
};
pub use ports::{
    NotificationSink, TaskStore, WakeEvent, WakeHandle, WakeMode, WakePayload, WakeService,
};
pub use recovery::{RecoveryPass, RecoveryReport};
pub use retry::{RetryPolicy, retry_with_backoff};
pub use scheduler::{FireStatus, ScheduleOutcome, ScheduledReminder, WakeScheduler};
pub use wake::{TokioWakeConfig, TokioWakeService};
