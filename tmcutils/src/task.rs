//! Fire-and-forget background tasks.
//!
//! [`TaskRunner::run`] spawns one named OS thread per call. The thread runs
//! the work, then hands its `Result` to the callback, still on that thread.
//! Nothing is joined, cancelled or timed out; the runner only counts what is
//! in flight so that tests and shutdown can wait for quiescence.

use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::thread;
use std::time::Duration;

use tracing::{debug, error};

use crate::event_hook::panic_message;

#[derive(Debug, thiserror::Error)]
pub enum TaskError {
    #[error("Failed to spawn task thread: {0}")]
    Spawn(#[from] std::io::Error),

    #[error("Task {name} panicked: {reason}")]
    Panicked { name: String, reason: String },
}

/// Count of running tasks; `idle` is notified when it drops to zero.
#[derive(Debug, Default)]
struct Pending {
    count: Mutex<usize>,
    idle: Condvar,
}

impl Pending {
    fn count(&self) -> MutexGuard<'_, usize> {
        self.count.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[derive(Clone, Debug, Default)]
pub struct TaskRunner {
    pending: Arc<Pending>,
    spawned: Arc<AtomicU64>,
}

/// Decrements the in-flight counter when the task thread ends, panic or not.
struct InFlight(Arc<Pending>);

impl Drop for InFlight {
    fn drop(&mut self) {
        let mut count = self.0.count();
        *count = count.saturating_sub(1);
        if *count == 0 {
            self.0.idle.notify_all();
        }
    }
}

impl TaskRunner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Runs `work` on a fresh thread and delivers its outcome to `callback`
    /// on that same thread.
    ///
    /// A panic inside `work` is delivered as `Err(TaskError::Panicked)`
    /// converted into `E`. If the thread cannot be spawned the callback is
    /// dropped without being called and the spawn error is returned here.
    pub fn run<T, E, W, C>(&self, name: &str, work: W, callback: C) -> Result<(), TaskError>
    where
        T: Send + 'static,
        E: From<TaskError> + Send + 'static,
        W: FnOnce() -> Result<T, E> + Send + 'static,
        C: FnOnce(Result<T, E>) + Send + 'static,
    {
        let serial = self.spawned.fetch_add(1, Ordering::Relaxed);
        let thread_name = format!("{name}-{serial}");
        let task_name = name.to_string();

        *self.pending.count() += 1;
        let guard = InFlight(Arc::clone(&self.pending));

        let spawned = thread::Builder::new()
            .name(thread_name.clone())
            .spawn(move || {
                let _guard = guard;
                debug!(task = %task_name, "Task started");

                let result = match panic::catch_unwind(AssertUnwindSafe(work)) {
                    Ok(result) => result,
                    Err(payload) => {
                        let reason = panic_message(payload.as_ref());
                        error!(task = %task_name, reason = %reason, "Task panicked");
                        Err(E::from(TaskError::Panicked {
                            name: task_name.clone(),
                            reason,
                        }))
                    }
                };

                let delivered = panic::catch_unwind(AssertUnwindSafe(move || callback(result)));
                if let Err(payload) = delivered {
                    error!(
                        task = %task_name,
                        reason = %panic_message(payload.as_ref()),
                        "Task callback panicked"
                    );
                }
            });

        match spawned {
            Ok(_) => Ok(()),
            Err(err) => {
                // The closure (and the guard it owns) was dropped by the builder.
                error!(task = %thread_name, error = %err, "Failed to spawn task");
                Err(TaskError::Spawn(err))
            }
        }
    }

    /// Number of tasks whose thread has not finished yet.
    pub fn in_flight(&self) -> usize {
        *self.pending.count()
    }

    /// Total number of tasks ever started by this runner (and its clones).
    pub fn spawned(&self) -> u64 {
        self.spawned.load(Ordering::Relaxed)
    }

    /// Blocks until no task is in flight or `timeout` elapses.
    /// Returns `true` when the runner went idle.
    pub fn wait_idle(&self, timeout: Duration) -> bool {
        let count = self.pending.count();
        let (count, _) = self
            .pending
            .idle
            .wait_timeout_while(count, timeout, |count| *count > 0)
            .unwrap_or_else(PoisonError::into_inner);
        *count == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::mpsc;

    #[derive(Debug, thiserror::Error)]
    enum TestError {
        #[error("failed: {0}")]
        Failed(&'static str),
        #[error(transparent)]
        Task(#[from] TaskError),
    }

    #[test]
    fn test_success_reaches_callback_off_thread() {
        let runner = TaskRunner::new();
        let (tx, rx) = mpsc::channel();
        let caller = thread::current().id();

        runner
            .run(
                "ok",
                || Ok::<_, TestError>(21 * 2),
                move |result| {
                    tx.send((result.ok(), thread::current().id())).unwrap();
                },
            )
            .unwrap();

        let (value, callback_thread) = rx.recv_timeout(Duration::from_secs(5)).unwrap();
        assert_eq!(value, Some(42));
        assert_ne!(callback_thread, caller);
        assert!(runner.wait_idle(Duration::from_secs(5)));
    }

    #[test]
    fn test_error_reaches_callback() {
        let runner = TaskRunner::new();
        let (tx, rx) = mpsc::channel();

        runner
            .run(
                "err",
                || Err::<u32, _>(TestError::Failed("nope")),
                move |result| tx.send(result).unwrap(),
            )
            .unwrap();

        let result = rx.recv_timeout(Duration::from_secs(5)).unwrap();
        assert!(matches!(result, Err(TestError::Failed("nope"))));
    }

    #[test]
    fn test_panic_becomes_error() {
        let runner = TaskRunner::new();
        let (tx, rx) = mpsc::channel();

        runner
            .run(
                "boom",
                || -> Result<u32, TestError> { panic!("exploded") },
                move |result| tx.send(result).unwrap(),
            )
            .unwrap();

        match rx.recv_timeout(Duration::from_secs(5)).unwrap() {
            Err(TestError::Task(TaskError::Panicked { reason, .. })) => {
                assert!(reason.contains("exploded"))
            }
            other => panic!("unexpected outcome: {other:?}"),
        }
    }

    #[test]
    fn test_in_flight_accounting() {
        let runner = TaskRunner::new();
        let (release_tx, release_rx) = mpsc::channel::<()>();

        runner
            .run(
                "blocked",
                move || {
                    release_rx.recv().ok();
                    Ok::<_, TestError>(())
                },
                |_| {},
            )
            .unwrap();

        assert_eq!(runner.in_flight(), 1);
        assert!(!runner.wait_idle(Duration::from_millis(20)));

        release_tx.send(()).unwrap();
        assert!(runner.wait_idle(Duration::from_secs(5)));
        assert_eq!(runner.spawned(), 1);
    }

    #[test]
    fn test_waiters_wake_when_last_task_ends() {
        let runner = TaskRunner::new();
        let (release_tx, release_rx) = crossbeam_channel::unbounded::<()>();

        for _ in 0..3 {
            let release_rx = release_rx.clone();
            runner
                .run(
                    "held",
                    move || {
                        release_rx.recv().ok();
                        Ok::<_, TestError>(())
                    },
                    |_| {},
                )
                .unwrap();
        }

        let waiters: Vec<_> = (0..2)
            .map(|_| {
                let runner = runner.clone();
                thread::spawn(move || runner.wait_idle(Duration::from_secs(5)))
            })
            .collect();

        for _ in 0..3 {
            release_tx.send(()).unwrap();
        }
        for waiter in waiters {
            assert!(waiter.join().unwrap());
        }
        assert_eq!(runner.in_flight(), 0);
    }
}
