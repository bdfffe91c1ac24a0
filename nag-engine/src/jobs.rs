//! Durable background jobs.
//!
//! Every wake, action and recovery request is journaled before it is queued,
//! so work that was accepted but not finished is replayed after a crash. The
//! worker runs jobs concurrently up to a bound; jobs with the same key (the
//! task id) run one at a time.

use std::collections::HashSet;
use std::fs::{self, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use nag_core::{NotificationAction, ReminderError, Result};
use serde::{Deserialize, Serialize};
use tokio::sync::{Semaphore, mpsc, watch};
use tokio::task::JoinSet;
use tracing::{debug, error, warn};
use uuid::Uuid;

use crate::clock::Clock;
use crate::ports::WakeEvent;
use crate::retry::{MIN_JOB_ATTEMPTS, RetryPolicy, retry_with_backoff};

/// Serialization key shared by all recovery jobs.
pub const RECOVERY_KEY: &str = "__recovery__";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Job {
    Deliver { event: WakeEvent },
    Act { task_id: String, action: NotificationAction },
    Recover,
}

impl Job {
    /// Jobs with equal keys never run at the same time.
    pub fn key(&self) -> &str {
        match self {
            Job::Deliver { event } => &event.task_id,
            Job::Act { task_id, .. } => task_id,
            Job::Recover => RECOVERY_KEY,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Job::Deliver { .. } => "deliver",
            Job::Act { .. } => "act",
            Job::Recover => "recover",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobEnvelope {
    pub id: Uuid,
    pub enqueued_at: DateTime<Utc>,
    pub job: Job,
}

/// Executes one job. Transient errors are retried by the worker.
#[async_trait]
pub trait JobRunner: Send + Sync {
    async fn run(&self, job: &Job) -> Result<()>;
}

/// Write-ahead record of accepted jobs.
pub trait JobJournal: Send + Sync {
    fn record_enqueued(&self, envelope: &JobEnvelope) -> Result<()>;
    fn record_finished(&self, id: Uuid) -> Result<()>;
    /// Accepted but unfinished jobs, oldest first.
    fn pending(&self) -> Result<Vec<JobEnvelope>>;
}

#[derive(Debug, Default)]
pub struct MemoryJournal {
    entries: Mutex<(Vec<JobEnvelope>, HashSet<Uuid>)>,
}

impl MemoryJournal {
    pub fn new() -> Self {
        Self::default()
    }
}

impl JobJournal for MemoryJournal {
    fn record_enqueued(&self, envelope: &JobEnvelope) -> Result<()> {
        let mut g = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        g.0.push(envelope.clone());
        Ok(())
    }

    fn record_finished(&self, id: Uuid) -> Result<()> {
        let mut g = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        g.1.insert(id);
        Ok(())
    }

    fn pending(&self) -> Result<Vec<JobEnvelope>> {
        let g = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        Ok(g.0.iter().filter(|e| !g.1.contains(&e.id)).cloned().collect())
    }
}

/// Journal kept as two append-only files in one directory:
/// `jobs.jsonl` (one envelope per line) and `done.txt` (finished ids).
#[derive(Debug)]
pub struct FileJournal {
    dir: PathBuf,
    write_lock: Mutex<()>,
}

fn journal_err(what: &str, path: &Path, e: impl std::fmt::Display) -> ReminderError {
    ReminderError::Journal(format!("{what} {}: {e}", path.display()))
}

impl FileJournal {
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir).map_err(|e| journal_err("create", &dir, e))?;
        let journal = Self {
            dir,
            write_lock: Mutex::new(()),
        };
        journal.terminate_torn_tail()?;
        Ok(journal)
    }

    /// Close off a partial last line so the next append starts a fresh record.
    fn terminate_torn_tail(&self) -> Result<()> {
        let path = self.jobs_path();
        let Ok(raw) = fs::read(&path) else {
            return Ok(());
        };
        if raw.last().is_some_and(|b| *b != b'\n') {
            self.append_line(&path, "")?;
        }
        Ok(())
    }

    fn jobs_path(&self) -> PathBuf {
        self.dir.join("jobs.jsonl")
    }

    fn done_path(&self) -> PathBuf {
        self.dir.join("done.txt")
    }

    fn append_line(&self, path: &Path, line: &str) -> Result<()> {
        let _g = self.write_lock.lock().unwrap_or_else(|e| e.into_inner());
        let mut f = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .map_err(|e| journal_err("open", path, e))?;
        writeln!(f, "{line}").map_err(|e| journal_err("append to", path, e))?;
        f.sync_data().map_err(|e| journal_err("sync", path, e))
    }

    fn read_lines(path: &Path) -> Result<Vec<String>> {
        if !path.exists() {
            return Ok(Vec::new());
        }
        let f = fs::File::open(path).map_err(|e| journal_err("open", path, e))?;
        BufReader::new(f)
            .lines()
            .map(|l| l.map_err(|e| journal_err("read", path, e)))
            .collect()
    }

    /// Rewrite the journal so it only holds unfinished jobs.
    pub fn compact(&self) -> Result<usize> {
        let pending = self.pending()?;
        let _g = self.write_lock.lock().unwrap_or_else(|e| e.into_inner());

        let jobs = self.jobs_path();
        let tmp = self.dir.join("jobs.jsonl.tmp");
        let mut body = String::new();
        for env in &pending {
            let line = serde_json::to_string(env).map_err(|e| journal_err("encode", &tmp, e))?;
            body.push_str(&line);
            body.push('\n');
        }
        fs::write(&tmp, body).map_err(|e| journal_err("write", &tmp, e))?;
        fs::rename(&tmp, &jobs).map_err(|e| journal_err("replace", &jobs, e))?;

        let done = self.done_path();
        fs::write(&done, "").map_err(|e| journal_err("truncate", &done, e))?;
        Ok(pending.len())
    }
}

impl JobJournal for FileJournal {
    fn record_enqueued(&self, envelope: &JobEnvelope) -> Result<()> {
        let path = self.jobs_path();
        let line = serde_json::to_string(envelope).map_err(|e| journal_err("encode", &path, e))?;
        self.append_line(&path, &line)
    }

    fn record_finished(&self, id: Uuid) -> Result<()> {
        self.append_line(&self.done_path(), &id.to_string())
    }

    fn pending(&self) -> Result<Vec<JobEnvelope>> {
        let done: HashSet<Uuid> = Self::read_lines(&self.done_path())?
            .iter()
            .filter_map(|l| Uuid::parse_str(l.trim()).ok())
            .collect();

        let mut out = Vec::new();
        for line in Self::read_lines(&self.jobs_path())? {
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str::<JobEnvelope>(&line) {
                Ok(env) if !done.contains(&env.id) => out.push(env),
                Ok(_) => {}
                // A torn final line after a crash is expected.
                Err(e) => warn!(error = %e, "skipping unreadable journal line"),
            }
        }
        Ok(out)
    }
}

/// Submitting side of the job pipeline. Cheap to clone.
#[derive(Clone)]
pub struct JobQueue {
    tx: mpsc::UnboundedSender<JobEnvelope>,
    journal: Arc<dyn JobJournal>,
    clock: Arc<dyn Clock>,
    in_flight: Arc<watch::Sender<usize>>,
}

impl JobQueue {
    /// Journal `job`, then hand it to the worker.
    pub fn submit(&self, job: Job) -> Result<Uuid> {
        let envelope = JobEnvelope {
            id: Uuid::new_v4(),
            enqueued_at: self.clock.now(),
            job,
        };
        self.journal.record_enqueued(&envelope)?;
        self.send(envelope)
    }

    /// Re-queue everything the journal still lists as unfinished.
    pub fn replay_pending(&self) -> Result<usize> {
        let pending = self.journal.pending()?;
        let n = pending.len();
        for env in pending {
            debug!(job_id = %env.id, kind = env.job.kind(), "replaying journaled job");
            self.send(env)?;
        }
        Ok(n)
    }

    pub fn in_flight(&self) -> usize {
        *self.in_flight.borrow()
    }

    /// Resolve once no submitted job is queued or running.
    pub async fn wait_idle(&self) {
        let mut rx = self.in_flight.subscribe();
        let _ = rx.wait_for(|n| *n == 0).await;
    }

    fn send(&self, envelope: JobEnvelope) -> Result<Uuid> {
        let id = envelope.id;
        self.in_flight.send_modify(|n| *n += 1);
        if self.tx.send(envelope).is_err() {
            self.in_flight.send_modify(|n| *n = n.saturating_sub(1));
            return Err(ReminderError::InvalidState("job worker is not running".into()));
        }
        Ok(id)
    }
}

/// Receiving side: drains the queue until every [`JobQueue`] is dropped.
pub struct JobWorker {
    rx: mpsc::UnboundedReceiver<JobEnvelope>,
    journal: Arc<dyn JobJournal>,
    runner: Arc<dyn JobRunner>,
    retry: RetryPolicy,
    permits: Arc<Semaphore>,
    key_locks: Arc<DashMap<String, Arc<tokio::sync::Mutex<()>>>>,
    in_flight: Arc<watch::Sender<usize>>,
}

pub fn job_channel(
    journal: Arc<dyn JobJournal>,
    clock: Arc<dyn Clock>,
    runner: Arc<dyn JobRunner>,
    retry: RetryPolicy,
    max_concurrent: usize,
) -> (JobQueue, JobWorker) {
    let (tx, rx) = mpsc::unbounded_channel();
    let (in_flight, _) = watch::channel(0usize);
    let in_flight = Arc::new(in_flight);
    let queue = JobQueue {
        tx,
        journal: journal.clone(),
        clock,
        in_flight: in_flight.clone(),
    };
    let worker = JobWorker {
        rx,
        journal,
        runner,
        retry: retry.with_min_attempts(MIN_JOB_ATTEMPTS),
        permits: Arc::new(Semaphore::new(max_concurrent.max(1))),
        key_locks: Arc::new(DashMap::new()),
        in_flight,
    };
    (queue, worker)
}

impl JobWorker {
    pub async fn run(mut self) {
        let mut running = JoinSet::new();

        while let Some(envelope) = self.rx.recv().await {
            while running.try_join_next().is_some() {}

            let Ok(permit) = self.permits.clone().acquire_owned().await else {
                break;
            };
            let ctx = JobContext {
                journal: self.journal.clone(),
                runner: self.runner.clone(),
                retry: self.retry,
                key_locks: self.key_locks.clone(),
                in_flight: self.in_flight.clone(),
            };
            running.spawn(async move {
                ctx.execute(envelope).await;
                drop(permit);
            });
        }

        while running.join_next().await.is_some() {}
        debug!("job worker stopped");
    }
}

struct JobContext {
    journal: Arc<dyn JobJournal>,
    runner: Arc<dyn JobRunner>,
    retry: RetryPolicy,
    key_locks: Arc<DashMap<String, Arc<tokio::sync::Mutex<()>>>>,
    in_flight: Arc<watch::Sender<usize>>,
}

impl JobContext {
    async fn execute(self, envelope: JobEnvelope) {
        let key = envelope.job.key().to_string();
        let lock = self.key_locks.entry(key.clone()).or_default().clone();

        {
            let _guard = lock.lock().await;
            let runner = &self.runner;
            let job = &envelope.job;
            let result = retry_with_backoff(&self.retry, job.kind(), move || runner.run(job)).await;

            match result {
                Ok(()) => debug!(
                    job_id = %envelope.id,
                    kind = job.kind(),
                    key = %key,
                    "job finished"
                ),
                Err(e) => error!(
                    job_id = %envelope.id,
                    kind = job.kind(),
                    key = %key,
                    error = %e,
                    "job failed; giving up"
                ),
            }
            if let Err(e) = self.journal.record_finished(envelope.id) {
                warn!(
                    job_id = %envelope.id,
                    error = %e,
                    "could not mark job finished; it will replay"
                );
            }
        }

        drop(lock);
        self.key_locks.remove_if(&key, |_, m| Arc::strong_count(m) == 1);
        self.in_flight.send_modify(|n| *n = n.saturating_sub(1));
    }
}
