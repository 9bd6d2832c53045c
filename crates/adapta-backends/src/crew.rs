use adapta_core::{extract_text, AgentAdapter, BackendError, BackendResult, InputMapping};
use async_trait::async_trait;
use serde_json::{Map, Value};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

/// Default crew input field.
const DEFAULT_INPUT_FIELD: &str = "input";

/// Default crew execution limit in seconds.
const DEFAULT_TIMEOUT_SECS: u64 = 300;

/// A multi-agent crew started with a set of named inputs.
#[async_trait]
pub trait Crew: Send + Sync {
    /// Runs the crew to completion.
    async fn kickoff(&self, inputs: Map<String, Value>) -> BackendResult<Value>;
}

/// Adapter over a [`Crew`], with its own execution timeout. No streaming.
pub struct CrewAdapter {
    crew: Arc<dyn Crew>,
    mapping: InputMapping,
    timeout: Duration,
}

impl CrewAdapter {
    /// Wraps `crew` with the default input field and timeout.
    pub fn new(crew: Arc<dyn Crew>) -> Self {
        Self {
            crew,
            mapping: InputMapping::new(DEFAULT_INPUT_FIELD),
            timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
        }
    }

    /// Crew input the raw text is placed under.
    pub fn with_input_key(mut self, key: impl Into<String>) -> Self {
        self.mapping = self.mapping.with_field(key);
        self
    }

    /// Inputs merged into every kickoff.
    pub fn with_defaults(mut self, defaults: Map<String, Value>) -> Self {
        self.mapping = self.mapping.with_defaults(defaults);
        self
    }

    /// Custom input mapping.
    pub fn with_mapper<F>(mut self, mapper: F) -> Self
    where
        F: Fn(&str, Option<&str>) -> Map<String, Value> + Send + Sync + 'static,
    {
        self.mapping = self.mapping.with_mapper(mapper);
        self
    }

    /// Execution limit for one kickoff.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

#[async_trait]
impl AgentAdapter for CrewAdapter {
    fn kind(&self) -> &str {
        "crew"
    }

    async fn invoke(&self, input: &str, context_id: Option<&str>) -> BackendResult<String> {
        let inputs = self.mapping.map(input, context_id);
        info!(inputs = inputs.len(), "Crew kickoff");

        let result = tokio::time::timeout(self.timeout, self.crew.kickoff(inputs))
            .await
            .map_err(|_| {
                warn!(timeout_secs = self.timeout.as_secs(), "Crew timed out");
                BackendError::timeout(format!(
                    "crew did not finish within {}s",
                    self.timeout.as_secs()
                ))
            })??;

        match result.get("raw") {
            Some(Value::String(raw)) => Ok(raw.clone()),
            _ => extract_text(&result, None),
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use adapta_core::BackendErrorKind;
    use serde_json::json;

    struct Researchers {
        delay: Duration,
    }

    #[async_trait]
    impl Crew for Researchers {
        async fn kickoff(&self, inputs: Map<String, Value>) -> BackendResult<Value> {
            tokio::time::sleep(self.delay).await;
            let topic = inputs.get("topic").and_then(Value::as_str).unwrap_or("?");
            Ok(json!({"raw": format!("report on {topic}"), "tasks_output": []}))
        }
    }

    #[tokio::test]
    async fn test_kickoff_returns_raw() {
        let adapter = CrewAdapter::new(Arc::new(Researchers {
            delay: Duration::ZERO,
        }))
        .with_input_key("topic");
        assert_eq!(adapter.invoke("rust", None).await.unwrap(), "report on rust");
        assert!(adapter.streaming().is_none());
    }

    #[tokio::test]
    async fn test_json_input_seeds_inputs() {
        let adapter = CrewAdapter::new(Arc::new(Researchers {
            delay: Duration::ZERO,
        }));
        let out = adapter.invoke(r#"{"topic": "tokio"}"#, None).await.unwrap();
        assert_eq!(out, "report on tokio");
    }

    #[tokio::test]
    async fn test_timeout() {
        let adapter = CrewAdapter::new(Arc::new(Researchers {
            delay: Duration::from_secs(5),
        }))
        .with_timeout(Duration::from_millis(50));
        let err = adapter.invoke("x", None).await.unwrap_err();
        assert_eq!(err.kind, BackendErrorKind::Timeout);
    }
}
