//! Core types for adapta: the adapter contract every backend shim implements,
//! the capability descriptor served for discovery, and the error taxonomy.
//!
//! # Main types
//!
//! - [`AgentAdapter`]: Uniform invocation contract (invoke, optional stream/cancel, close).
//! - [`StreamingAdapter`] / [`CancellableAdapter`]: Optional capabilities.
//! - [`AgentCard`]: Capability descriptor; streaming flag derived from the adapter.
//! - [`InputMapping`]: Shared raw-text → payload mapping.
//! - [`AdaptaError`] / [`BackendError`]: Configuration and classified backend failures.

/// Adapter contract and capability traits.
pub mod adapter;
/// Capability descriptor (agent card) and skills.
pub mod card;
/// Error taxonomy.
pub mod error;
/// Input mapping and output extraction shared by shims with structured input.
pub mod mapping;

pub use adapter::{AgentAdapter, CancellableAdapter, StreamingAdapter, TextStream};
pub use card::{AgentCapabilities, AgentCard, AgentCardBuilder, AgentSkill, DEFAULT_MODE};
pub use error::{AdaptaError, AdaptaResult, BackendError, BackendErrorKind, BackendResult};
pub use mapping::{chat_messages, extract_text, InputMapper, InputMapping};
