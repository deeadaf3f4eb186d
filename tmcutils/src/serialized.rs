//! Serialized operations.
//!
//! A [`SerialGuard`] is one mutual-exclusion lock dedicated to one operation.
//! Every call to [`SerialGuard::run`] on the same guard is strictly ordered:
//! the second caller's body starts only after the first caller's body has
//! returned or unwound. Distinct guards never contend with each other.
//!
//! The lock is per operation, not per argument: `fetch_tracks("a")` and
//! `fetch_tracks("b")` wait for each other when they share a guard.

use std::fmt;
use std::sync::{Mutex, PoisonError, TryLockError};

use tracing::trace;

pub struct SerialGuard {
    name: &'static str,
    lock: Mutex<()>,
}

impl SerialGuard {
    pub const fn new(name: &'static str) -> Self {
        Self {
            name,
            lock: Mutex::new(()),
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Runs `body` while holding this guard's lock.
    ///
    /// The lock is released when `body` returns, including on error or
    /// panic. A previous panic does not poison the guard: it only orders
    /// calls, it protects no data of its own.
    pub fn run<R>(&self, body: impl FnOnce() -> R) -> R {
        let _held = self.lock.lock().unwrap_or_else(PoisonError::into_inner);
        trace!(operation = self.name, "entered serialized section");
        body()
    }

    /// Returns `true` when some caller currently holds the guard.
    pub fn is_busy(&self) -> bool {
        matches!(self.lock.try_lock(), Err(TryLockError::WouldBlock))
    }
}

impl fmt::Debug for SerialGuard {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SerialGuard")
            .field("name", &self.name)
            .field("busy", &self.is_busy())
            .finish()
    }
}

/// An operation bound to its own [`SerialGuard`].
pub struct Serialized<F> {
    guard: SerialGuard,
    op: F,
}

impl<F> Serialized<F> {
    pub const fn new(name: &'static str, op: F) -> Self {
        Self {
            guard: SerialGuard::new(name),
            op,
        }
    }

    /// Calls the wrapped operation under its guard.
    pub fn call<A, R>(&self, args: A) -> R
    where
        F: Fn(A) -> R,
    {
        self.guard.run(|| (self.op)(args))
    }

    pub fn guard(&self) -> &SerialGuard {
        &self.guard
    }
}

impl<F> fmt::Debug for Serialized<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Serialized").field("guard", &self.guard).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Barrier};
    use std::thread;
    use std::time::Duration;

    #[test]
    fn test_same_guard_never_overlaps() {
        let guard = Arc::new(SerialGuard::new("fetch"));
        let inside = Arc::new(AtomicUsize::new(0));
        let max_inside = Arc::new(AtomicUsize::new(0));
        let barrier = Arc::new(Barrier::new(8));

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let guard = Arc::clone(&guard);
                let inside = Arc::clone(&inside);
                let max_inside = Arc::clone(&max_inside);
                let barrier = Arc::clone(&barrier);
                thread::spawn(move || {
                    barrier.wait();
                    guard.run(|| {
                        let now = inside.fetch_add(1, Ordering::SeqCst) + 1;
                        max_inside.fetch_max(now, Ordering::SeqCst);
                        thread::sleep(Duration::from_millis(5));
                        inside.fetch_sub(1, Ordering::SeqCst);
                    });
                })
            })
            .collect();

        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(max_inside.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_distinct_guards_do_not_contend() {
        let first = SerialGuard::new("tracks");
        let second = SerialGuard::new("login");

        let nested = first.run(|| second.run(|| second.is_busy() && first.is_busy()));
        assert!(nested);
    }

    #[test]
    fn test_lock_released_after_error_and_panic() {
        let guard = Arc::new(SerialGuard::new("fallible"));

        let result: Result<(), &str> = guard.run(|| Err("failed"));
        assert!(result.is_err());
        assert!(!guard.is_busy());

        let panicking = Arc::clone(&guard);
        let joined = thread::spawn(move || panicking.run(|| panic!("inside guard"))).join();
        assert!(joined.is_err());
        assert!(!guard.is_busy());
        assert_eq!(guard.run(|| 5), 5);
    }

    #[test]
    fn test_serialized_wraps_parametrized_operation() {
        let calls = AtomicUsize::new(0);
        let double = Serialized::new("double", |x: u32| {
            calls.fetch_add(1, Ordering::SeqCst);
            x * 2
        });

        assert_eq!(double.call(4), 8);
        assert_eq!(double.call(5), 10);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert!(!double.guard().is_busy());
    }
}
