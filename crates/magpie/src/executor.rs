//! Single-owner task executors.
//!
//! Every mutable subsystem owns exactly one executor, which gives it one
//! dedicated worker thread and a strict FIFO queue. Serialized mutation
//! falls out of the single worker; callers never block on submission.
//!
//! # Cancellation
//! - A handle cancelled before its task starts prevents the task from
//!   running at all.
//! - A running task is only cancelled cooperatively, by polling the token
//!   passed to [`TaskExecutor::execute_with`].
//!
//! # Failure
//! A panicking task completes its handle with [`TaskError::Panicked`] and
//! leaves the worker alive; queued tasks after it still run.

use std::collections::VecDeque;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::thread::JoinHandle;

use thiserror::Error;
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;

static EXECUTOR_SEQ: AtomicUsize = AtomicUsize::new(0);

/// Terminal states of a task that did not produce a value.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TaskError {
    #[error("task was cancelled before completion")]
    Cancelled,
    #[error("task panicked: {0}")]
    Panicked(String),
}

/// Completion handle for a submitted task.
///
/// The future side (`join`) suits async callers; `wait` blocks and is meant
/// for callers that explicitly opt into synchronous waiting, such as tests
/// and shutdown sequences.
pub struct TaskHandle<R> {
    receiver: oneshot::Receiver<Result<R, TaskError>>,
    token: CancellationToken,
}

impl<R> TaskHandle<R> {
    /// Prevent the task from starting. Has no effect once it is running
    /// unless the task polls its token.
    pub fn cancel(&self) {
        self.token.cancel();
    }

    pub async fn join(self) -> Result<R, TaskError> {
        self.receiver.await.unwrap_or(Err(TaskError::Cancelled))
    }

    /// Block the calling thread until the task completes. Must not be called
    /// from within an async runtime.
    pub fn wait(self) -> Result<R, TaskError> {
        self.receiver
            .blocking_recv()
            .unwrap_or(Err(TaskError::Cancelled))
    }
}

type Job = Box<dyn FnOnce() + Send + 'static>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mode {
    Running,
    Draining,
    Stopped,
}

struct Inner {
    jobs: VecDeque<Job>,
    mode: Mode,
}

struct Shared {
    queue: Mutex<Inner>,
    available: Condvar,
}

/// A FIFO task queue with exactly one worker thread.
pub struct TaskExecutor {
    shared: Arc<Shared>,
    worker: Mutex<Option<JoinHandle<()>>>,
    name: String,
}

impl TaskExecutor {
    pub fn new(name: &str) -> Self {
        let name = format!("{}-{}", name, EXECUTOR_SEQ.fetch_add(1, Ordering::SeqCst));
        let shared = Arc::new(Shared {
            queue: Mutex::new(Inner {
                jobs: VecDeque::new(),
                mode: Mode::Running,
            }),
            available: Condvar::new(),
        });

        let worker_shared = Arc::clone(&shared);
        let worker = std::thread::Builder::new()
            .name(name.clone())
            .spawn(move || worker_loop(worker_shared))
            .ok();
        if worker.is_none() {
            log::error!("Could not spawn worker thread for executor '{}'", name);
        }

        Self {
            shared,
            worker: Mutex::new(worker),
            name,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Run a task for its side effects.
    pub fn execute(&self, task: impl FnOnce() + Send + 'static) -> TaskHandle<()> {
        self.submit(move |_| task())
    }

    /// Run a task that can poll its token to notice cancellation while
    /// running.
    pub fn execute_with(
        &self,
        task: impl FnOnce(&CancellationToken) + Send + 'static,
    ) -> TaskHandle<()> {
        self.submit(task)
    }

    /// Run a task and deliver its value through the handle.
    pub fn compute<R: Send + 'static>(
        &self,
        task: impl FnOnce() -> R + Send + 'static,
    ) -> TaskHandle<R> {
        self.submit(move |_| task())
    }

    /// Run a fallible task, substituting `default` for any error. Errors are
    /// logged and otherwise swallowed.
    pub fn compute_or<R: Send + 'static>(
        &self,
        default: R,
        task: impl FnOnce() -> anyhow::Result<R> + Send + 'static,
    ) -> TaskHandle<R> {
        let name = self.name.clone();
        self.submit(move |_| match task() {
            Ok(value) => value,
            Err(err) => {
                log::debug!("Task on executor '{}' failed, using default: {}", name, err);
                default
            }
        })
    }

    fn submit<R, F>(&self, task: F) -> TaskHandle<R>
    where
        R: Send + 'static,
        F: FnOnce(&CancellationToken) -> R + Send + 'static,
    {
        let (sender, receiver) = oneshot::channel();
        let token = CancellationToken::new();
        let job_token = token.clone();
        let name = self.name.clone();

        let run: Job = Box::new(move || {
            if job_token.is_cancelled() {
                let _ = sender.send(Err(TaskError::Cancelled));
                return;
            }
            match catch_unwind(AssertUnwindSafe(|| task(&job_token))) {
                Ok(value) => {
                    let _ = sender.send(Ok(value));
                }
                Err(payload) => {
                    let message = panic_message(payload.as_ref());
                    log::error!("Task on executor '{}' panicked: {}", name, message);
                    let _ = sender.send(Err(TaskError::Panicked(message)));
                }
            }
        });

        {
            let mut inner = self.shared.queue.lock().unwrap();
            if inner.mode == Mode::Running {
                inner.jobs.push_back(run);
            }
            // After shutdown the job is dropped; dropping its sender
            // resolves the handle as cancelled.
        }
        self.shared.available.notify_all();

        TaskHandle { receiver, token }
    }

    /// Stop accepting new tasks. Already-queued tasks still run; when
    /// `await_completion` is set, block until the worker has drained.
    pub fn shutdown(&self, await_completion: bool) {
        {
            let mut inner = self.shared.queue.lock().unwrap();
            if inner.mode == Mode::Running {
                inner.mode = Mode::Draining;
            }
        }
        self.shared.available.notify_all();
        if await_completion {
            if let Some(handle) = self.worker.lock().unwrap().take() {
                let _ = handle.join();
            }
        }
    }

    /// Stop immediately, dropping tasks that have not started. Their handles
    /// resolve as cancelled. Returns how many tasks were dropped.
    pub fn shutdown_immediate(&self) -> usize {
        let dropped = {
            let mut inner = self.shared.queue.lock().unwrap();
            inner.mode = Mode::Stopped;
            let jobs = std::mem::take(&mut inner.jobs);
            jobs.len()
        };
        self.shared.available.notify_all();
        if let Some(handle) = self.worker.lock().unwrap().take() {
            let _ = handle.join();
        }
        dropped
    }
}

impl Drop for TaskExecutor {
    fn drop(&mut self) {
        // Drop unstarted work but do not block the dropping thread on the
        // worker; it exits once it observes the stopped mode.
        let mut inner = self.shared.queue.lock().unwrap();
        inner.mode = Mode::Stopped;
        inner.jobs.clear();
        drop(inner);
        self.shared.available.notify_all();
    }
}

fn worker_loop(shared: Arc<Shared>) {
    loop {
        let job = {
            let mut inner = shared.queue.lock().unwrap();
            loop {
                if inner.mode == Mode::Stopped {
                    return;
                }
                if let Some(job) = inner.jobs.pop_front() {
                    break job;
                }
                if inner.mode == Mode::Draining {
                    return;
                }
                inner = shared.available.wait(inner).unwrap();
            }
        };
        job();
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_fifo_order() {
        let executor = TaskExecutor::new("test");
        let journal: Arc<Mutex<Vec<&'static str>>> = Arc::new(Mutex::new(Vec::new()));

        for label in ["a", "b", "c"] {
            let journal = Arc::clone(&journal);
            executor.execute(move || journal.lock().unwrap().push(label));
        }
        executor.shutdown(true);

        assert_eq!(*journal.lock().unwrap(), vec!["a", "b", "c"]);
    }

    #[test]
    fn test_compute_returns_value() {
        let executor = TaskExecutor::new("test");
        let handle = executor.compute(|| 21 * 2);
        assert_eq!(handle.wait(), Ok(42));
    }

    #[test]
    fn test_compute_or_falls_back_on_error() {
        let executor = TaskExecutor::new("test");
        let handle = executor.compute_or(7, || anyhow::bail!("resolver unavailable"));
        assert_eq!(handle.wait(), Ok(7));
    }

    #[test]
    fn test_panic_does_not_kill_worker() {
        let executor = TaskExecutor::new("test");
        let panicking = executor.compute(|| -> i32 { panic!("boom") });
        let after = executor.compute(|| 5);

        match panicking.wait() {
            Err(TaskError::Panicked(message)) => assert!(message.contains("boom")),
            other => panic!("expected panic error, got {other:?}"),
        }
        assert_eq!(after.wait(), Ok(5));
    }

    #[test]
    fn test_cancel_before_start() {
        let executor = TaskExecutor::new("test");
        let gate: Arc<Mutex<()>> = Arc::new(Mutex::new(()));

        let held = gate.lock().unwrap();
        let blocker_gate = Arc::clone(&gate);
        executor.execute(move || {
            drop(blocker_gate.lock().unwrap());
        });

        let ran = Arc::new(Mutex::new(false));
        let ran_inner = Arc::clone(&ran);
        let handle = executor.execute(move || *ran_inner.lock().unwrap() = true);
        handle.cancel();
        drop(held);

        executor.shutdown(true);
        assert!(!*ran.lock().unwrap(), "cancelled task must not run");
    }

    #[test]
    fn test_cooperative_cancellation_while_running() {
        let executor = TaskExecutor::new("test");
        let iterations = Arc::new(Mutex::new(0u32));

        let iterations_inner = Arc::clone(&iterations);
        let handle = executor.execute_with(move |token| {
            for _ in 0..100 {
                if token.is_cancelled() {
                    return;
                }
                *iterations_inner.lock().unwrap() += 1;
                std::thread::sleep(Duration::from_millis(5));
            }
        });
        std::thread::sleep(Duration::from_millis(20));
        handle.cancel();
        executor.shutdown(true);

        let count = *iterations.lock().unwrap();
        assert!(count > 0, "task should have started");
        assert!(count < 100, "task should have exited early, ran {count} iterations");
    }

    #[test]
    fn test_shutdown_immediate_drops_unstarted() {
        let executor = TaskExecutor::new("test");
        let gate: Arc<Mutex<()>> = Arc::new(Mutex::new(()));

        let held = gate.lock().unwrap();
        let blocker_gate = Arc::clone(&gate);
        executor.execute(move || {
            drop(blocker_gate.lock().unwrap());
        });
        // Give the worker time to pick up the blocker.
        std::thread::sleep(Duration::from_millis(20));

        let queued = executor.compute(|| 1);
        let also_queued = executor.compute(|| 2);
        drop(held);
        let dropped = executor.shutdown_immediate();

        assert!(dropped <= 2);
        let outcomes = [queued.wait(), also_queued.wait()];
        assert_eq!(
            outcomes.iter().filter(|r| **r == Err(TaskError::Cancelled)).count(),
            dropped,
            "each dropped task resolves cancelled"
        );
    }

    #[test]
    fn test_submission_after_shutdown_is_cancelled() {
        let executor = TaskExecutor::new("test");
        executor.shutdown(true);
        let handle = executor.compute(|| 1);
        assert_eq!(handle.wait(), Err(TaskError::Cancelled));
    }
}
