use crate::error::BackendResult;
use async_trait::async_trait;
use futures_util::stream::BoxStream;

/// A finite, non-restartable sequence of text chunks produced by a backend.
///
/// Dropping the stream stops the producer; nothing is pulled ahead of the
/// consumer.
pub type TextStream = BoxStream<'static, BackendResult<String>>;

/// The uniform invocation contract every backend shim implements.
///
/// Only `invoke` is required. Streaming and cancellation are capabilities: an
/// adapter that has them hands out a view through [`AgentAdapter::streaming`]
/// or [`AgentAdapter::cancellation`], and callers check for `Some` before use
/// instead of calling and catching a "not supported" failure. The answer must
/// be fixed when the adapter is constructed.
///
/// Adapters are shared by every task routed to them, so `&self` methods may
/// run concurrently unless the shim documents single-flight behaviour.
#[async_trait]
pub trait AgentAdapter: Send + Sync {
    /// Short backend name used in logs and error messages (e.g. `"n8n"`).
    fn kind(&self) -> &str;

    /// Runs the backend to completion and returns the final text.
    async fn invoke(&self, input: &str, context_id: Option<&str>) -> BackendResult<String>;

    /// The incremental execution path, if this adapter has one.
    fn streaming(&self) -> Option<&dyn StreamingAdapter> {
        None
    }

    /// The cancellation hook, if this adapter has one.
    fn cancellation(&self) -> Option<&dyn CancellableAdapter> {
        None
    }

    /// Whether the adapter runs one invocation at a time per instance.
    ///
    /// The execution core queues tasks for such an adapter itself, so a task
    /// only counts as working once it owns the instance and a cancel hook call
    /// can only reach the task it was made for.
    fn single_flight(&self) -> bool {
        false
    }

    /// Releases held resources. Idempotent and safe to call on an adapter that
    /// was never invoked. Failures are logged by the implementation, never
    /// returned.
    async fn close(&self) {}
}

/// Incremental execution capability.
#[async_trait]
pub trait StreamingAdapter: Send + Sync {
    /// Starts the backend and returns its chunk sequence.
    async fn stream(&self, input: &str, context_id: Option<&str>) -> BackendResult<TextStream>;
}

/// Best-effort cancellation capability.
#[async_trait]
pub trait CancellableAdapter: Send + Sync {
    /// Signals the in-flight invocation to stop.
    async fn cancel(&self);
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use futures_util::StreamExt;

    struct Echo;

    #[async_trait]
    impl AgentAdapter for Echo {
        fn kind(&self) -> &str {
            "echo"
        }

        async fn invoke(&self, input: &str, _context_id: Option<&str>) -> BackendResult<String> {
            Ok(format!("You said: {input}"))
        }
    }

    struct Chunky;

    #[async_trait]
    impl AgentAdapter for Chunky {
        fn kind(&self) -> &str {
            "chunky"
        }

        async fn invoke(&self, input: &str, _context_id: Option<&str>) -> BackendResult<String> {
            Ok(input.to_string())
        }

        fn streaming(&self) -> Option<&dyn StreamingAdapter> {
            Some(self)
        }
    }

    #[async_trait]
    impl StreamingAdapter for Chunky {
        async fn stream(&self, input: &str, _context_id: Option<&str>) -> BackendResult<TextStream> {
            let chunks: Vec<BackendResult<String>> =
                input.chars().map(|c| Ok(c.to_string())).collect();
            Ok(futures_util::stream::iter(chunks).boxed())
        }
    }

    #[tokio::test]
    async fn test_invoke_only_adapter_has_no_capabilities() {
        let adapter = Echo;
        assert_eq!(adapter.invoke("hi", None).await.unwrap(), "You said: hi");
        assert!(adapter.streaming().is_none());
        assert!(adapter.cancellation().is_none());
        assert!(!adapter.single_flight());
        adapter.close().await;
        adapter.close().await;
    }

    #[tokio::test]
    async fn test_streaming_capability_view() {
        let adapter = Chunky;
        let streamer = adapter.streaming().unwrap();
        let chunks: Vec<String> = streamer
            .stream("abc", None)
            .await
            .unwrap()
            .map(|c| c.unwrap())
            .collect()
            .await;
        assert_eq!(chunks, vec!["a", "b", "c"]);
    }
}
