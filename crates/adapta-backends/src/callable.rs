use adapta_core::{AgentAdapter, BackendError, BackendResult, StreamingAdapter, TextStream};
use async_trait::async_trait;
use futures_util::future::BoxFuture;
use futures_util::{FutureExt, Stream, StreamExt};
use std::future::Future;
use std::sync::Arc;

/// What a wrapped function produced for one call.
pub enum CallOutput {
    /// A single final value.
    Text(String),
    /// A lazy chunk sequence.
    Chunks(TextStream),
}

/// A user function taking `(input, context_id)`.
pub type AgentFn =
    Arc<dyn Fn(String, Option<String>) -> BoxFuture<'static, BackendResult<CallOutput>> + Send + Sync>;

/// Adapter over an arbitrary function.
///
/// Streaming is declared by the caller, not probed. A function that does not
/// behave as declared fails at invocation with a `BackendFault` whose message
/// starts with `configuration error:`.
pub struct CallableAdapter {
    func: AgentFn,
    streaming: bool,
}

impl CallableAdapter {
    /// Wraps `func`, declaring whether it yields chunks.
    pub fn new(func: AgentFn, streaming: bool) -> Self {
        Self { func, streaming }
    }

    /// Wraps a synchronous function returning the final text.
    pub fn from_fn<F>(f: F) -> Self
    where
        F: Fn(&str, Option<&str>) -> BackendResult<String> + Send + Sync + 'static,
    {
        Self::new(
            Arc::new(move |input: String, context_id: Option<String>| {
                let result = f(&input, context_id.as_deref()).map(CallOutput::Text);
                futures_util::future::ready(result).boxed()
            }),
            false,
        )
    }

    /// Wraps an async function returning the final text.
    pub fn from_async_fn<F, Fut>(f: F) -> Self
    where
        F: Fn(String, Option<String>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = BackendResult<String>> + Send + 'static,
    {
        Self::new(
            Arc::new(move |input: String, context_id: Option<String>| {
                f(input, context_id)
                    .map(|result| result.map(CallOutput::Text))
                    .boxed()
            }),
            false,
        )
    }

    /// Wraps a function returning a chunk stream.
    pub fn from_stream_fn<F, S>(f: F) -> Self
    where
        F: Fn(String, Option<String>) -> S + Send + Sync + 'static,
        S: Stream<Item = BackendResult<String>> + Send + 'static,
    {
        Self::new(
            Arc::new(move |input: String, context_id: Option<String>| {
                let chunks: TextStream = f(input, context_id).boxed();
                futures_util::future::ready(Ok::<_, BackendError>(CallOutput::Chunks(chunks))).boxed()
            }),
            true,
        )
    }

    async fn call(&self, input: &str, context_id: Option<&str>) -> BackendResult<CallOutput> {
        (self.func)(input.to_string(), context_id.map(str::to_string)).await
    }
}

fn mismatch(declared_streaming: bool) -> BackendError {
    if declared_streaming {
        BackendError::fault(
            "configuration error: callable declared streaming but returned a single value",
        )
    } else {
        BackendError::fault(
            "configuration error: callable declared non-streaming but returned a chunk stream",
        )
    }
}

#[async_trait]
impl AgentAdapter for CallableAdapter {
    fn kind(&self) -> &str {
        "callable"
    }

    async fn invoke(&self, input: &str, context_id: Option<&str>) -> BackendResult<String> {
        match (self.streaming, self.call(input, context_id).await?) {
            (false, CallOutput::Text(text)) => Ok(text),
            (true, CallOutput::Chunks(mut chunks)) => {
                let mut text = String::new();
                while let Some(chunk) = chunks.next().await {
                    text.push_str(&chunk?);
                }
                Ok(text)
            }
            (declared, _) => Err(mismatch(declared)),
        }
    }

    fn streaming(&self) -> Option<&dyn StreamingAdapter> {
        if self.streaming {
            Some(self)
        } else {
            None
        }
    }
}

#[async_trait]
impl StreamingAdapter for CallableAdapter {
    async fn stream(&self, input: &str, context_id: Option<&str>) -> BackendResult<TextStream> {
        match self.call(input, context_id).await? {
            CallOutput::Chunks(chunks) => Ok(chunks),
            CallOutput::Text(_) => Err(mismatch(true)),
        }
    }
}
