//! HTTP transport for adapta.
//!
//! Serves the agent card for discovery and maps the task endpoints onto a
//! [`adapta_tasks::TaskExecutor`]. Streaming tasks are delivered as
//! server-sent events.

/// Transport-level errors and their status codes.
pub mod error;
/// Request bodies.
pub mod models;
/// Router and handlers.
pub mod server;

pub use error::ApiError;
pub use models::{MessageInput, MessagePart, SendMessageRequest};
pub use server::{GatewayServer, GatewayState};
