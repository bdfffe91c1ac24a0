//! Task store kept in `~/.nag/tasks.json`.
//!
//! The file is re-read on every call so the daemon sees edits made by one-shot
//! subcommands. Writes go through a temp file and a rename.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use nag_core::{ReminderError, RepeatRule, Result, Task, TaskDocument, TaskStatus};
use nag_engine::TaskStore;
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing::warn;
use uuid::Uuid;

/// user id -> stored tasks
type Documents = BTreeMap<String, Vec<TaskDocument>>;

#[derive(Debug)]
pub struct FileTaskStore {
    path: PathBuf,
    lock: Mutex<()>,
}

fn unavailable(what: &str, path: &Path, e: impl std::fmt::Display) -> ReminderError {
    ReminderError::StoreUnavailable(format!("{what} {}: {e}", path.display()))
}

impl FileTaskStore {
    pub fn open(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn read_docs(&self) -> Result<Documents> {
        if !self.path.exists() {
            return Ok(Documents::new());
        }
        let raw = fs::read_to_string(&self.path).map_err(|e| unavailable("read", &self.path, e))?;
        if raw.trim().is_empty() {
            return Ok(Documents::new());
        }
        serde_json::from_str(&raw).map_err(|e| {
            ReminderError::InvalidState(format!("parse {}: {e}", self.path.display()))
        })
    }

    fn write_docs(&self, docs: &Documents) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).map_err(|e| unavailable("create", parent, e))?;
        }
        let json = serde_json::to_string_pretty(docs)
            .map_err(|e| ReminderError::InvalidState(format!("encode tasks: {e}")))?;
        let tmp = self.path.with_extension("json.tmp");
        fs::write(&tmp, json).map_err(|e| unavailable("write", &tmp, e))?;
        fs::rename(&tmp, &self.path).map_err(|e| unavailable("replace", &self.path, e))
    }

    /// Decoded tasks for one user. Documents that fail to decode are skipped.
    fn tasks_of(docs: &Documents, user_id: &str) -> Vec<Task> {
        docs.get(user_id)
            .map(|list| {
                list.iter()
                    .filter_map(|d| match Task::try_from(d.clone()) {
                        Ok(t) => Some(t),
                        Err(e) => {
                            warn!(id = ?d.id, error = %e, "skipping undecodable task");
                            None
                        }
                    })
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Apply `edit` to the stored document for `task_id`.
    fn modify(&self, user_id: &str, task_id: &str, edit: impl FnOnce(&mut Task)) -> Result<()> {
        let _g = self.lock.lock().unwrap_or_else(|e| e.into_inner());
        let mut docs = self.read_docs()?;
        let doc = docs
            .get_mut(user_id)
            .and_then(|list| list.iter_mut().find(|d| d.id.as_deref() == Some(task_id)))
            .ok_or_else(|| ReminderError::NotFound(task_id.to_string()))?;
        let mut task = Task::try_from(doc.clone())?;
        edit(&mut task);
        *doc = TaskDocument::from(&task);
        self.write_docs(&docs)
    }

    pub fn all(&self, user_id: &str) -> Result<Vec<Task>> {
        let docs = self.read_docs()?;
        Ok(Self::tasks_of(&docs, user_id))
    }

    /// Store a new task, assigning a short id. Returns the stored task.
    pub fn add(&self, user_id: &str, mut task: Task) -> Result<Task> {
        let _g = self.lock.lock().unwrap_or_else(|e| e.into_inner());
        let mut docs = self.read_docs()?;
        let list = docs.entry(user_id.to_string()).or_default();
        let id = loop {
            let candidate = Uuid::new_v4().simple().to_string()[..8].to_string();
            if !list.iter().any(|d| d.id.as_deref() == Some(candidate.as_str())) {
                break candidate;
            }
        };
        task.id = Some(id);
        list.push(TaskDocument::from(&task));
        self.write_docs(&docs)?;
        Ok(task)
    }

    /// Returns whether the task existed.
    pub fn delete(&self, user_id: &str, task_id: &str) -> Result<bool> {
        let _g = self.lock.lock().unwrap_or_else(|e| e.into_inner());
        let mut docs = self.read_docs()?;
        let Some(list) = docs.get_mut(user_id) else {
            return Ok(false);
        };
        let before = list.len();
        list.retain(|d| d.id.as_deref() != Some(task_id));
        if list.len() == before {
            return Ok(false);
        }
        self.write_docs(&docs)?;
        Ok(true)
    }
}

#[async_trait]
impl TaskStore for FileTaskStore {
    async fn get_task_by_id(&self, user_id: &str, task_id: &str) -> Result<Option<Task>> {
        Ok(self.all(user_id)?.into_iter().find(|t| t.id() == Some(task_id)))
    }

    async fn update_task_status(
        &self,
        user_id: &str,
        task_id: &str,
        status: TaskStatus,
    ) -> Result<()> {
        self.modify(user_id, task_id, |t| t.status = status)
    }

    async fn list_pending_tasks_with_deadlines(&self, user_id: &str) -> Result<Vec<Task>> {
        Ok(self
            .all(user_id)?
            .into_iter()
            .filter(|t| t.is_pending() && t.due_date.is_some())
            .collect())
    }

    async fn update_task_occurrence(
        &self,
        user_id: &str,
        task_id: &str,
        due_date: DateTime<Utc>,
        repeat: RepeatRule,
    ) -> Result<()> {
        self.modify(user_id, task_id, |t| {
            t.due_date = Some(due_date);
            t.repeat = repeat;
        })
    }
}
