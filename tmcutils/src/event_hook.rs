//! Typed publish/subscribe hook.
//!
//! An `EventHook<A>` keeps an ordered list of subscribers. `publish` runs
//! every subscriber, in subscription order, on the calling thread. The hook
//! never hops to another thread, so subscribers must be thread-safe: in
//! TMCMusic events are published from background tasks, from the media
//! backend thread and from the user's thread alike.
//!
//! Mutation during a publish follows a snapshot policy: the subscriber list
//! is copied before the first handler runs. A subscriber removed by an
//! earlier handler still receives the event being published; a subscriber
//! added during a publish first sees the next one.

use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crossbeam_channel::{Receiver, Sender, unbounded};
use tracing::{error, trace};

/// Handle returned by [`EventHook::subscribe`], used to unsubscribe.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

type Callback<A> = Arc<dyn Fn(&A) + Send + Sync>;

enum Handler<A> {
    Callback(Callback<A>),
    Channel(Sender<A>),
}

impl<A> Clone for Handler<A> {
    fn clone(&self) -> Self {
        match self {
            Handler::Callback(f) => Handler::Callback(Arc::clone(f)),
            Handler::Channel(tx) => Handler::Channel(tx.clone()),
        }
    }
}

struct Subscriber<A> {
    id: SubscriptionId,
    handler: Handler<A>,
}

pub struct EventHook<A> {
    name: &'static str,
    subscribers: Arc<Mutex<Vec<Subscriber<A>>>>,
    next_id: Arc<AtomicU64>,
}

impl<A> Clone for EventHook<A> {
    fn clone(&self) -> Self {
        Self {
            name: self.name,
            subscribers: Arc::clone(&self.subscribers),
            next_id: Arc::clone(&self.next_id),
        }
    }
}

impl<A> Default for EventHook<A> {
    fn default() -> Self {
        Self::named("event")
    }
}

impl<A> fmt::Debug for EventHook<A> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventHook")
            .field("name", &self.name)
            .field("subscribers", &self.lock().len())
            .finish()
    }
}

impl<A> EventHook<A> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a hook whose name shows up in logs.
    pub fn named(name: &'static str) -> Self {
        Self {
            name,
            subscribers: Arc::new(Mutex::new(Vec::new())),
            next_id: Arc::new(AtomicU64::new(1)),
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Appends `handler` to the subscriber list.
    pub fn subscribe<F>(&self, handler: F) -> SubscriptionId
    where
        F: Fn(&A) + Send + Sync + 'static,
    {
        self.push(Handler::Callback(Arc::new(handler)))
    }

    /// Removes the subscriber registered under `id`.
    ///
    /// Returns `false` when no such subscriber exists (already removed, or
    /// registered on another hook).
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut subscribers = self.lock();
        match subscribers.iter().position(|s| s.id == id) {
            Some(pos) => {
                subscribers.remove(pos);
                true
            }
            None => false,
        }
    }

    fn push(&self, handler: Handler<A>) -> SubscriptionId {
        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.lock().push(Subscriber { id, handler });
        id
    }

    fn lock(&self) -> MutexGuard<'_, Vec<Subscriber<A>>> {
        // A handler never runs while the list is locked, so a poisoned
        // lock still guards a consistent Vec.
        self.subscribers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

impl<A> EventHook<A>
where
    A: Clone + Send + 'static,
{
    /// Subscribes a channel: every published value is sent to the returned
    /// receiver. Once the receiver is dropped the subscription is pruned on
    /// the next publish.
    pub fn subscribe_channel(&self) -> Receiver<A> {
        let (tx, rx) = unbounded::<A>();
        self.push(Handler::Channel(tx));
        rx
    }

    /// Runs every subscriber with `args`, in subscription order, on the
    /// calling thread.
    ///
    /// A panicking subscriber is logged and skipped; the others still run.
    pub fn publish(&self, args: A) {
        let snapshot: Vec<(SubscriptionId, Handler<A>)> = self
            .lock()
            .iter()
            .map(|s| (s.id, s.handler.clone()))
            .collect();

        trace!(event = self.name, subscribers = snapshot.len(), "publish");

        let mut disconnected = Vec::new();
        for (id, handler) in snapshot {
            match handler {
                Handler::Callback(f) => {
                    let outcome = panic::catch_unwind(AssertUnwindSafe(|| f(&args)));
                    if let Err(payload) = outcome {
                        error!(
                            event = self.name,
                            subscriber = id.0,
                            reason = %panic_message(payload.as_ref()),
                            "Event subscriber panicked"
                        );
                    }
                }
                Handler::Channel(tx) => {
                    if tx.send(args.clone()).is_err() {
                        disconnected.push(id);
                    }
                }
            }
        }

        if !disconnected.is_empty() {
            self.lock().retain(|s| !disconnected.contains(&s.id));
        }
    }
}

/// Extracts a readable message from a panic payload.
pub fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}
