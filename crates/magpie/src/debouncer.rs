//! Burst coalescing for edit-triggered work.
//!
//! Without debouncing, every keystroke would trigger a full re-analysis and
//! index rebuild. A debouncer collapses a burst of triggers into one task
//! that runs after a fixed quiescence window; only the most recent
//! `schedule` call within the window actually executes.
//!
//! Scheduling a task supersedes the previous pending one. A task that has
//! already started receives a token it can poll to notice that it was
//! superseded and exit early instead of finishing stale work.
//!
//! Must be used from within a tokio runtime; task bodies run on a blocking
//! thread, never on a runtime worker.

use std::sync::Mutex;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

#[derive(Default)]
struct PendingSlot {
    token: Option<CancellationToken>,
    handle: Option<JoinHandle<()>>,
}

pub struct Debouncer {
    window: Duration,
    pending: Mutex<PendingSlot>,
}

impl std::fmt::Debug for Debouncer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Debouncer")
            .field("window", &self.window)
            .finish_non_exhaustive()
    }
}

impl Debouncer {
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            pending: Mutex::new(PendingSlot::default()),
        }
    }

    pub fn window(&self) -> Duration {
        self.window
    }

    /// Arm the quiescence window for `task`, superseding any pending task.
    pub fn schedule(&self, task: impl FnOnce(&CancellationToken) + Send + 'static) {
        self.arm(Some(self.window), task);
    }

    /// Run `task` without waiting out the window, still superseding any
    /// pending task. Used for flush-now triggers such as an explicit save.
    pub fn submit_immediately(&self, task: impl FnOnce(&CancellationToken) + Send + 'static) {
        self.arm(None, task);
    }

    fn arm(&self, delay: Option<Duration>, task: impl FnOnce(&CancellationToken) + Send + 'static) {
        let mut slot = self.pending.lock().unwrap();
        if let Some(previous) = slot.token.take() {
            previous.cancel();
        }

        let token = CancellationToken::new();
        slot.token = Some(token.clone());
        slot.handle = Some(tokio::spawn(async move {
            if let Some(delay) = delay {
                tokio::select! {
                    _ = token.cancelled() => return,
                    _ = tokio::time::sleep(delay) => {}
                }
            }
            if token.is_cancelled() {
                return;
            }
            let task_token = token.clone();
            let result = tokio::task::spawn_blocking(move || task(&task_token)).await;
            if let Err(err) = result {
                log::error!("Debounced task failed: {}", err);
            }
        }));
    }

    /// Wait until the currently armed or running task completes (or is
    /// superseded). Used by shutdown sequences and tests that must observe
    /// a quiesced state.
    pub async fn wait_for_pending_task(&self) {
        let handle = self.pending.lock().unwrap().handle.take();
        if let Some(handle) = handle {
            let _ = handle.await;
        }
    }

    /// Stop the debouncer. With `await_completion` the pending task still
    /// runs to completion; without it the pending task is cancelled.
    pub async fn shutdown(&self, await_completion: bool) {
        let (token, handle) = {
            let mut slot = self.pending.lock().unwrap();
            (slot.token.take(), slot.handle.take())
        };
        if !await_completion {
            if let Some(token) = token {
                token.cancel();
            }
        }
        if let Some(handle) = handle {
            let _ = handle.await;
        }
    }
}
