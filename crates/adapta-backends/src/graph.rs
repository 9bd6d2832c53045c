use crate::runnable::StreamingBackend;
use adapta_core::mapping::MESSAGES_KEY;
use adapta_core::{
    extract_text, AgentAdapter, BackendError, BackendResult, InputMapping, StreamingAdapter,
    TextStream,
};
use async_trait::async_trait;
use futures_util::StreamExt;
use serde_json::{Map, Value};
use std::sync::Arc;
use tracing::debug;

/// A compiled orchestration graph that runs over a state object.
#[async_trait]
pub trait CompiledGraph: Send + Sync {
    /// Runs the graph from `state` to its final state.
    async fn invoke(&self, state: Value) -> BackendResult<Value>;

    /// Incremental execution yielding intermediate states, if supported.
    fn streamer(&self) -> Option<&dyn StreamingBackend> {
        None
    }
}

/// Adapter over a [`CompiledGraph`].
///
/// Input goes under `messages` by default, wrapped as a chat message list.
/// The answer is the configured output key, else the content of the last
/// message in the final state.
pub struct GraphAdapter {
    graph: Arc<dyn CompiledGraph>,
    mapping: InputMapping,
    output_key: Option<String>,
    streaming: bool,
}

impl GraphAdapter {
    /// Wraps `graph`; streaming is probed once here.
    pub fn new(graph: Arc<dyn CompiledGraph>) -> Self {
        let streaming = graph.streamer().is_some();
        debug!(streaming, "Wrapped compiled graph");
        Self {
            graph,
            mapping: InputMapping::new(MESSAGES_KEY),
            output_key: None,
            streaming,
        }
    }

    /// State key the input is placed under.
    pub fn with_input_key(mut self, key: impl Into<String>) -> Self {
        self.mapping = self.mapping.with_field(key);
        self
    }

    /// Initial state fields merged under every input.
    pub fn with_defaults(mut self, defaults: Map<String, Value>) -> Self {
        self.mapping = self.mapping.with_defaults(defaults);
        self
    }

    /// Custom state mapping.
    pub fn with_mapper<F>(mut self, mapper: F) -> Self
    where
        F: Fn(&str, Option<&str>) -> Map<String, Value> + Send + Sync + 'static,
    {
        self.mapping = self.mapping.with_mapper(mapper);
        self
    }

    /// State key holding the answer.
    pub fn with_output_key(mut self, key: impl Into<String>) -> Self {
        self.output_key = Some(key.into());
        self
    }
}

fn state_text(state: &Value, output_key: Option<&str>) -> BackendResult<String> {
    if output_key.is_some() {
        return extract_text(state, output_key);
    }
    match state.get(MESSAGES_KEY).and_then(Value::as_array).and_then(|m| m.last()) {
        Some(Value::String(text)) => Ok(text.clone()),
        Some(last) => match last.get("content") {
            Some(Value::String(text)) => Ok(text.clone()),
            _ => extract_text(last, None),
        },
        None => extract_text(state, None),
    }
}

#[async_trait]
impl AgentAdapter for GraphAdapter {
    fn kind(&self) -> &str {
        "graph"
    }

    async fn invoke(&self, input: &str, context_id: Option<&str>) -> BackendResult<String> {
        let state = Value::Object(self.mapping.map(input, context_id));
        let final_state = self.graph.invoke(state).await?;
        state_text(&final_state, self.output_key.as_deref())
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
impl StreamingAdapter for GraphAdapter {
    async fn stream(&self, input: &str, context_id: Option<&str>) -> BackendResult<TextStream> {
        let streamer = self
            .graph
            .streamer()
            .ok_or_else(|| BackendError::fault("graph no longer exposes a stream entry point"))?;
        let state = Value::Object(self.mapping.map(input, context_id));
        let states = streamer.stream(state).await?;
        let output_key = self.output_key.clone();
        Ok(states
            .map(move |state| state.and_then(|s| state_text(&s, output_key.as_deref())))
            .boxed())
    }
}
