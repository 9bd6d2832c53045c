//! Backend shims for adapta.
//!
//! Each shim implements [`adapta_core::AgentAdapter`] against one backend's
//! native execution model and owns that backend's retry, timeout and process
//! lifecycle policy.
//!
//! # Main types
//!
//! - [`WebhookAdapter`]: HTTP workflow engine (n8n-style webhook) with bounded retries.
//! - [`SubprocessAdapter`]: External agent binary (OpenClaw-style), single-flight.
//! - [`RunnableAdapter`] / [`GraphAdapter`]: In-process async runnables and compiled graphs.
//! - [`CrewAdapter`]: Multi-agent crew kickoff with an execution timeout.
//! - [`CallableAdapter`]: Arbitrary user function, streaming declared up front.
//! - [`AdapterRegistry`]: Name → constructor mapping used to build adapters from config.

/// Plain function backend.
pub mod callable;
/// Multi-agent crew backend.
pub mod crew;
/// Compiled orchestration graph backend.
pub mod graph;
/// Adapter registry and option parsing.
pub mod registry;
/// In-process runnable backend.
pub mod runnable;
/// External process backend.
pub mod subprocess;
/// HTTP webhook backend.
pub mod webhook;

pub use callable::{AgentFn, CallOutput, CallableAdapter};
pub use crew::{Crew, CrewAdapter};
pub use graph::{CompiledGraph, GraphAdapter};
pub use registry::{parse_options, AdapterConstructor, AdapterOptions, AdapterRegistry, KIND_KEY};
pub use runnable::{Runnable, RunnableAdapter, StreamingBackend, ValueStream};
pub use subprocess::{SubprocessAdapter, SubprocessConfig};
pub use webhook::{WebhookAdapter, WebhookConfig};
