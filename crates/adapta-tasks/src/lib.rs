//! Task lifecycle for adapta: the task record and its state machine, the
//! task store, and the execution core that drives an adapter through one
//! task.
//!
//! # Main types
//!
//! - [`TaskRecord`] / [`TaskState`]: One invocation and where it is in its lifecycle.
//! - [`TaskStore`]: Record storage with checked, compare-and-set transitions.
//! - [`InMemoryTaskStore`]: Process-lifetime store.
//! - [`TaskExecutor`]: Submits, runs, streams and cancels tasks against one adapter.
//! - [`TaskStream`]: Consumer-driven chunk stream bound to a task record.

/// Execution core.
pub mod executor;
/// Task storage.
pub mod store;
/// Task record and state machine.
pub mod task;

pub use executor::{TaskExecutor, TaskStream};
pub use store::{InMemoryTaskStore, TaskStore};
pub use task::{TaskRecord, TaskState, TaskUpdate};
