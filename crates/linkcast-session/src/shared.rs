//! Shared mutable session state (`spec.md` §5): "a single mutex protects:
//! the `paused` flag, the current virtual-output handle and display name,
//! `refresh_rate_hz`, `last_frame_time_us`, and (indirectly) ordered
//! access to the outbound stream." The outbound stream itself is guarded
//! separately by the IO task's single-writer queue (see `io_task`); this
//! struct covers the remaining fields, which both the frame-pipeline tick
//! and the receiver-reader task read and write.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use linkcast_core::OutputId;
use tokio::sync::{Mutex, Notify};

#[derive(Debug, Clone)]
pub struct SharedFields {
    pub paused: bool,
    pub output: Option<OutputId>,
    pub display_name: String,
    pub refresh_rate_hz: u32,
    pub last_frame_time_us: u64,
}

impl Default for SharedFields {
    fn default() -> Self {
        Self { paused: false, output: None, display_name: String::new(), refresh_rate_hz: 60, last_frame_time_us: 0 }
    }
}

/// Cloneable handle to the session's shared state and its lock-free `stop`
/// flag (`spec.md` §5: "`stop()` is lock-free (atomic boolean `running`)
/// and is polled by both threads' loop conditions").
#[derive(Clone)]
pub struct SessionShared {
    fields: Arc<Mutex<SharedFields>>,
    running: Arc<AtomicBool>,
    notify: Arc<Notify>,
}

impl SessionShared {
    pub fn new() -> Self {
        Self {
            fields: Arc::new(Mutex::new(SharedFields::default())),
            running: Arc::new(AtomicBool::new(true)),
            notify: Arc::new(Notify::new()),
        }
    }

    pub async fn lock(&self) -> tokio::sync::MutexGuard<'_, SharedFields> {
        self.fields.lock().await
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// Requests shutdown and wakes every task parked in [`Self::stopped`]
    /// (`spec.md` §5: `stop()` "is polled by both threads' loop
    /// conditions" — this makes that polling unblock immediately instead
    /// of waiting for the next scheduled wakeup).
    pub fn stop(&self) {
        self.running.store(false, Ordering::Release);
        self.notify.notify_waiters();
    }

    /// Resolves once [`Self::stop`] has been called, even if it already
    /// was before this call (no missed-wakeup race: the condition is
    /// re-checked after registering interest, per `Notify`'s documented
    /// pattern).
    pub async fn stopped(&self) {
        loop {
            let notified = self.notify.notified();
            if !self.is_running() {
                return;
            }
            notified.await;
        }
    }
}

impl Default for SessionShared {
    fn default() -> Self {
        Self::new()
    }
}

/// A `stop()` handle safe to hand to whatever is supposed to request
/// graceful shutdown (CLI signal handler, tests), independent of the rest
/// of the session's internals.
#[derive(Clone)]
pub struct StopHandle {
    running: Arc<AtomicBool>,
    notify: Arc<Notify>,
}

impl SessionShared {
    pub fn stop_handle(&self) -> StopHandle {
        StopHandle { running: Arc::clone(&self.running), notify: Arc::clone(&self.notify) }
    }
}

impl StopHandle {
    pub fn stop(&self) {
        self.running.store(false, Ordering::Release);
        self.notify.notify_waiters();
    }
}
