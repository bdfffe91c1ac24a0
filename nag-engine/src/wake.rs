//! Wake service backed by tokio timers, for hosts that stay resident.
//!
//! Timers live only as long as the process. Restarts are covered by the
//! recovery pass, which reinstalls everything from the store.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use chrono::{DateTime, Utc};
use nag_core::{ReminderError, Result};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::debug;

use crate::clock::Clock;
use crate::ports::{WakeEvent, WakeHandle, WakeMode, WakePayload, WakeService};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TokioWakeConfig {
    /// Whether exact timers are permitted at all.
    pub exact_allowed: bool,
    /// Inexact timers are rounded up to a multiple of this.
    pub inexact_slack: Duration,
}

impl Default for TokioWakeConfig {
    fn default() -> Self {
        Self {
            exact_allowed: true,
            inexact_slack: Duration::from_secs(60),
        }
    }
}

pub struct TokioWakeService {
    clock: Arc<dyn Clock>,
    config: TokioWakeConfig,
    next: AtomicU64,
    timers: Arc<Mutex<HashMap<WakeHandle, JoinHandle<()>>>>,
    tx: mpsc::UnboundedSender<WakeEvent>,
}

impl TokioWakeService {
    /// Returns the service and the stream of fired wakes.
    pub fn new(
        clock: Arc<dyn Clock>,
        config: TokioWakeConfig,
    ) -> (Self, mpsc::UnboundedReceiver<WakeEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let svc = Self {
            clock,
            config,
            next: AtomicU64::new(1),
            timers: Arc::new(Mutex::new(HashMap::new())),
            tx,
        };
        (svc, rx)
    }

    pub fn live_count(&self) -> usize {
        self.timers.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    fn delay_for(&self, at: DateTime<Utc>, mode: WakeMode) -> Duration {
        let delay = (at - self.clock.now()).to_std().unwrap_or_default();
        let slack = self.config.inexact_slack.as_millis();
        if mode == WakeMode::Exact || slack == 0 {
            return delay;
        }
        let rounded = delay.as_millis().div_ceil(slack) * slack;
        Duration::from_millis(u64::try_from(rounded).unwrap_or(u64::MAX))
    }
}

impl WakeService for TokioWakeService {
    fn can_schedule_exact(&self) -> bool {
        self.config.exact_allowed
    }

    fn schedule_at(
        &self,
        at: DateTime<Utc>,
        mode: WakeMode,
        payload: WakePayload,
    ) -> Result<WakeHandle> {
        if mode == WakeMode::Exact && !self.config.exact_allowed {
            return Err(ReminderError::PermissionDenied("exact timers disabled".into()));
        }
        let rt = tokio::runtime::Handle::try_current()
            .map_err(|e| ReminderError::Wake(format!("no tokio runtime: {e}")))?;

        let handle = WakeHandle(self.next.fetch_add(1, Ordering::SeqCst));
        let delay = self.delay_for(at, mode);
        let timers = self.timers.clone();
        let tx = self.tx.clone();

        // Insert before the timer can observe the map.
        let mut live = self.timers.lock().unwrap_or_else(|e| e.into_inner());
        let join = rt.spawn(async move {
            tokio::time::sleep(delay).await;
            timers.lock().unwrap_or_else(|e| e.into_inner()).remove(&handle);
            let _ = tx.send(WakeEvent {
                handle,
                task_id: payload.task_id,
            });
        });
        live.insert(handle, join);
        debug!(
            handle = handle.0,
            ?mode,
            delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
            "timer armed"
        );
        Ok(handle)
    }

    fn cancel(&self, handle: WakeHandle) {
        if let Some(join) = self.timers.lock().unwrap_or_else(|e| e.into_inner()).remove(&handle) {
            join.abort();
        }
    }
}
