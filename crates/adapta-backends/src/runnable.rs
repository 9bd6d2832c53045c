use adapta_core::{
    extract_text, AgentAdapter, BackendError, BackendResult, InputMapping, StreamingAdapter,
    TextStream,
};
use async_trait::async_trait;
use futures_util::stream::BoxStream;
use futures_util::StreamExt;
use serde_json::{Map, Value};
use std::sync::Arc;
use tracing::debug;

/// Structured values produced incrementally by an in-process backend.
pub type ValueStream = BoxStream<'static, BackendResult<Value>>;

/// An in-process backend with an asynchronous execution entry point.
#[async_trait]
pub trait Runnable: Send + Sync {
    /// Runs to completion on `input`.
    async fn invoke(&self, input: Value) -> BackendResult<Value>;

    /// The incremental entry point, if the backend has one.
    fn streamer(&self) -> Option<&dyn StreamingBackend> {
        None
    }
}

/// Incremental execution entry point of an in-process backend.
#[async_trait]
pub trait StreamingBackend: Send + Sync {
    /// Starts execution and returns the produced values in order.
    async fn stream(&self, input: Value) -> BackendResult<ValueStream>;
}

/// Adapter over a [`Runnable`].
///
/// Without an input key the raw text is passed through as a JSON string;
/// with one (or with a mapper) the shared [`InputMapping`] builds an object.
/// Streaming is probed once, here, from [`Runnable::streamer`].
pub struct RunnableAdapter {
    runnable: Arc<dyn Runnable>,
    mapping: Option<InputMapping>,
    output_key: Option<String>,
    streaming: bool,
}

impl RunnableAdapter {
    /// Wraps `runnable`, passing input through as a plain string.
    pub fn new(runnable: Arc<dyn Runnable>) -> Self {
        let streaming = runnable.streamer().is_some();
        debug!(streaming, "Wrapped runnable");
        Self {
            runnable,
            mapping: None,
            output_key: None,
            streaming,
        }
    }

    /// Sends input as an object with the text under `key`. A key of
    /// `"messages"` wraps plain text into a chat message list.
    pub fn with_input_key(mut self, key: impl Into<String>) -> Self {
        let mapping = self.mapping.take().unwrap_or_default();
        self.mapping = Some(mapping.with_field(key));
        self
    }

    /// Fields merged under every structured input.
    pub fn with_defaults(mut self, defaults: Map<String, Value>) -> Self {
        let mapping = self.mapping.take().unwrap_or_default();
        self.mapping = Some(mapping.with_defaults(defaults));
        self
    }

    /// Custom input mapping; implies structured input.
    pub fn with_mapper<F>(mut self, mapper: F) -> Self
    where
        F: Fn(&str, Option<&str>) -> Map<String, Value> + Send + Sync + 'static,
    {
        let mapping = self.mapping.take().unwrap_or_default();
        self.mapping = Some(mapping.with_mapper(mapper));
        self
    }

    /// Extracts `key` from structured results instead of probing.
    pub fn with_output_key(mut self, key: impl Into<String>) -> Self {
        self.output_key = Some(key.into());
        self
    }

    fn build_input(&self, input: &str, context_id: Option<&str>) -> Value {
        match &self.mapping {
            Some(mapping) => Value::Object(mapping.map(input, context_id)),
            None => Value::String(input.to_string()),
        }
    }
}

#[async_trait]
impl AgentAdapter for RunnableAdapter {
    fn kind(&self) -> &str {
        "runnable"
    }

    async fn invoke(&self, input: &str, context_id: Option<&str>) -> BackendResult<String> {
        let result = self.runnable.invoke(self.build_input(input, context_id)).await?;
        extract_text(&result, self.output_key.as_deref())
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
impl StreamingAdapter for RunnableAdapter {
    async fn stream(&self, input: &str, context_id: Option<&str>) -> BackendResult<TextStream> {
        let streamer = self
            .runnable
            .streamer()
            .ok_or_else(|| BackendError::fault("runnable no longer exposes a stream entry point"))?;
        let values = streamer.stream(self.build_input(input, context_id)).await?;
        let output_key = self.output_key.clone();
        Ok(values
            .map(move |value| value.and_then(|v| extract_text(&v, output_key.as_deref())))
            .boxed())
    }
}
