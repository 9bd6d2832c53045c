use adapta_core::{
    extract_text, AdaptaError, AdaptaResult, AgentAdapter, BackendError, BackendResult,
    InputMapping,
};
use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, CONTENT_TYPE};
use serde::Deserialize;
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Key the context id is sent under when the mapping did not set it.
const CONTEXT_FIELD: &str = "context_id";

/// How much of an error body is kept in error messages.
const ERROR_BODY_LIMIT: usize = 512;

/// Configuration for [`WebhookAdapter`].
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct WebhookConfig {
    /// Webhook endpoint requests are POSTed to.
    pub webhook_url: String,
    /// Per-request timeout in seconds.
    #[serde(default = "default_timeout_secs", alias = "timeout")]
    pub timeout_secs: u64,
    /// Total attempts per invocation, first try included.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    /// Fixed delay between attempts in milliseconds.
    #[serde(default = "default_retry_delay_ms")]
    pub retry_delay_ms: u64,
    /// Extra request headers (e.g. `Authorization`).
    #[serde(default)]
    pub headers: HashMap<String, String>,
    /// Field non-JSON input is placed under.
    #[serde(default = "default_message_field")]
    pub message_field: String,
    /// Static fields merged into every payload.
    #[serde(default)]
    pub payload_template: Map<String, Value>,
    /// Response field holding the answer; probed from common keys when unset.
    #[serde(default)]
    pub output_key: Option<String>,
}

fn default_timeout_secs() -> u64 {
    30
}

fn default_max_attempts() -> u32 {
    3
}

fn default_retry_delay_ms() -> u64 {
    250
}

fn default_message_field() -> String {
    adapta_core::mapping::DEFAULT_MESSAGE_FIELD.to_string()
}

impl WebhookConfig {
    /// Creates a config with defaults for everything but the URL.
    pub fn new(webhook_url: impl Into<String>) -> Self {
        Self {
            webhook_url: webhook_url.into(),
            timeout_secs: default_timeout_secs(),
            max_attempts: default_max_attempts(),
            retry_delay_ms: default_retry_delay_ms(),
            headers: HashMap::new(),
            message_field: default_message_field(),
            payload_template: Map::new(),
            output_key: None,
        }
    }
}

/// Outcome of a single HTTP attempt that did not produce a body.
enum AttemptError {
    /// Transport failure or 5xx; worth another attempt.
    Retryable(String),
    /// Anything retrying will not fix.
    Fatal(BackendError),
}

/// Adapter for workflow engines reachable through an HTTP webhook (n8n and
/// similar).
///
/// Transient failures (transport errors, timeouts, 5xx) are retried with a
/// fixed delay up to `max_attempts`; callers only ever see the final outcome.
/// No streaming.
pub struct WebhookAdapter {
    config: WebhookConfig,
    mapping: InputMapping,
    headers: HeaderMap,
    http: reqwest::Client,
}

impl WebhookAdapter {
    /// Validates `config` and builds the HTTP client.
    pub fn new(config: WebhookConfig) -> AdaptaResult<Self> {
        if !(config.webhook_url.starts_with("http://") || config.webhook_url.starts_with("https://"))
        {
            return Err(AdaptaError::Config(format!(
                "webhook_url must be an http(s) URL, got '{}'",
                config.webhook_url
            )));
        }
        if config.max_attempts == 0 {
            return Err(AdaptaError::Config("max_attempts must be at least 1".into()));
        }
        if config.timeout_secs == 0 {
            return Err(AdaptaError::Config("timeout_secs must be at least 1".into()));
        }

        let mut headers = HeaderMap::new();
        for (name, value) in &config.headers {
            let name = HeaderName::from_bytes(name.as_bytes())
                .map_err(|e| AdaptaError::Config(format!("invalid header name '{name}': {e}")))?;
            let value = HeaderValue::from_str(value)
                .map_err(|e| AdaptaError::Config(format!("invalid value for header '{name}': {e}")))?;
            headers.insert(name, value);
        }

        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| AdaptaError::Config(format!("failed to build HTTP client: {e}")))?;

        let mapping = InputMapping::new(config.message_field.clone())
            .with_defaults(config.payload_template.clone());

        Ok(Self {
            config,
            mapping,
            headers,
            http,
        })
    }

    /// Replaces the default input mapping step with `mapper`.
    /// `payload_template` is still merged underneath.
    pub fn with_mapper<F>(mut self, mapper: F) -> Self
    where
        F: Fn(&str, Option<&str>) -> Map<String, Value> + Send + Sync + 'static,
    {
        self.mapping = self.mapping.with_mapper(mapper);
        self
    }

    /// The configuration this adapter was built from.
    pub fn config(&self) -> &WebhookConfig {
        &self.config
    }

    fn build_payload(&self, input: &str, context_id: Option<&str>) -> Value {
        let mut payload = self.mapping.map(input, context_id);
        if let Some(ctx) = context_id {
            payload
                .entry(CONTEXT_FIELD)
                .or_insert_with(|| Value::String(ctx.to_string()));
        }
        Value::Object(payload)
    }

    async fn post_once(&self, payload: &Value, request_id: &str) -> Result<Value, AttemptError> {
        let start = Instant::now();
        let resp = self
            .http
            .post(&self.config.webhook_url)
            .header(CONTENT_TYPE, "application/json")
            .header("X-Request-Id", request_id)
            .headers(self.headers.clone())
            .json(payload)
            .send()
            .await
            .map_err(|e| AttemptError::Retryable(e.to_string()))?;

        let status = resp.status();
        let elapsed_ms = start.elapsed().as_millis() as u64;
        if status.is_server_error() {
            return Err(AttemptError::Retryable(format!(
                "webhook returned {status} after {elapsed_ms}ms"
            )));
        }

        let body = resp
            .text()
            .await
            .map_err(|e| AttemptError::Retryable(e.to_string()))?;

        if !status.is_success() {
            return Err(AttemptError::Fatal(BackendError::fault(format!(
                "webhook returned {status} (request_id={request_id}, {elapsed_ms}ms): {}",
                truncate(&body, ERROR_BODY_LIMIT)
            ))));
        }

        debug!(request_id, status = %status, elapsed_ms, "Webhook responded");

        if body.trim().is_empty() {
            return Err(AttemptError::Fatal(BackendError::invalid_response(format!(
                "webhook returned an empty body (request_id={request_id})"
            ))));
        }
        serde_json::from_str(&body).map_err(|e| {
            AttemptError::Fatal(BackendError::invalid_response(format!(
                "webhook body is not JSON ({e}): {}",
                truncate(&body, ERROR_BODY_LIMIT)
            )))
        })
    }
}

#[async_trait]
impl AgentAdapter for WebhookAdapter {
    fn kind(&self) -> &str {
        "n8n"
    }

    async fn invoke(&self, input: &str, context_id: Option<&str>) -> BackendResult<String> {
        let payload = self.build_payload(input, context_id);
        let request_id = Uuid::new_v4().to_string();
        let max_attempts = self.config.max_attempts;
        let mut last_error = String::new();

        for attempt in 1..=max_attempts {
            match self.post_once(&payload, &request_id).await {
                Ok(body) => {
                    info!(request_id = %request_id, attempt, "Webhook invocation succeeded");
                    return extract_text(&body, self.config.output_key.as_deref());
                }
                Err(AttemptError::Fatal(e)) => {
                    warn!(request_id = %request_id, attempt, error = %e, "Webhook failed, not retrying");
                    return Err(e);
                }
                Err(AttemptError::Retryable(e)) => {
                    if attempt < max_attempts {
                        warn!(
                            request_id = %request_id,
                            attempt,
                            delay_ms = self.config.retry_delay_ms,
                            error = %e,
                            "Transient webhook failure, retrying"
                        );
                        tokio::time::sleep(Duration::from_millis(self.config.retry_delay_ms)).await;
                    }
                    last_error = e;
                }
            }
        }

        Err(BackendError::unreachable(format!(
            "webhook unreachable after {max_attempts} attempts (request_id={request_id}): {last_error}"
        )))
    }
}

fn truncate(s: &str, max_len: usize) -> &str {
    if s.len() <= max_len {
        return s;
    }
    let mut end = max_len;
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    &s[..end]
}
