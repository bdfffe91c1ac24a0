//! Error taxonomy shared by the reminder engine.

/// Failures that can surface from reminder scheduling and delivery.
///
/// Expected situations (a task vanished, a fire arrived for a completed task)
/// are modelled as outcomes by the engine, not as errors. What remains here is
/// either retried (`StoreUnavailable`, `Journal`) or degraded (`PermissionDenied`).
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ReminderError {
    /// The task no longer exists in the store.
    #[error("task not found: {0}")]
    NotFound(String),

    /// Exact wake scheduling is not permitted on this host.
    #[error("exact wake scheduling denied: {0}")]
    PermissionDenied(String),

    /// Transient store failure.
    #[error("task store unavailable: {0}")]
    StoreUnavailable(String),

    /// Data the engine cannot act on (unknown enum string, missing id, ...).
    #[error("invalid state: {0}")]
    InvalidState(String),

    /// The wake service could not install or cancel a wake primitive.
    #[error("wake service error: {0}")]
    Wake(String),

    /// Durable job journal I/O failure.
    #[error("job journal error: {0}")]
    Journal(String),
}

impl ReminderError {
    /// Whether retrying the same operation may succeed.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::StoreUnavailable(_) | Self::Journal(_))
    }
}

/// Convenience result type.
pub type Result<T> = std::result::Result<T, ReminderError>;
