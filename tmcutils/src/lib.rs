//! # TMCUtils
//!
//! Concurrency building blocks shared by the TMCMusic crates:
//!
//! - [`EventHook`]: typed publish/subscribe, handlers run on the publishing thread.
//! - [`TaskRunner`]: run a unit of work on a background thread and deliver
//!   its `Result` to a callback on that thread.
//! - [`SerialGuard`] / [`Serialized`]: strictly serialize every call to one
//!   operation, across threads.

mod event_hook;
mod serialized;
mod task;

pub use event_hook::{EventHook, SubscriptionId, panic_message};
pub use serialized::{SerialGuard, Serialized};
pub use task::{TaskError, TaskRunner};
