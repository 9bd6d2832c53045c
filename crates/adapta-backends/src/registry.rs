use crate::subprocess::{SubprocessAdapter, SubprocessConfig};
use crate::webhook::{WebhookAdapter, WebhookConfig};
use adapta_core::{AdaptaError, AdaptaResult, AgentAdapter};
use serde::de::DeserializeOwned;
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{info, warn};

/// Key in the options mapping that selects the adapter kind.
pub const KIND_KEY: &str = "adapter";

/// Options that choose per-request behaviour rather than adapter behaviour.
/// They are accepted and dropped: blocking is selected on each send.
const REQUEST_LEVEL_KEYS: [&str; 1] = ["async_mode"];

/// Arbitrary key/value options an adapter is constructed from.
pub type AdapterOptions = Map<String, Value>;

/// Builds an adapter from its options mapping.
pub type AdapterConstructor =
    Arc<dyn Fn(&AdapterOptions) -> AdaptaResult<Arc<dyn AgentAdapter>> + Send + Sync>;

/// Name → constructor mapping.
///
/// The registry is an explicit value threaded through whatever builds
/// adapters from configuration; there is no process-global instance. A later
/// registration under an existing name replaces the earlier one, built-ins
/// included.
pub struct AdapterRegistry {
    constructors: HashMap<String, AdapterConstructor>,
}

impl AdapterRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self {
            constructors: HashMap::new(),
        }
    }

    /// Creates a registry with the config-constructible backends:
    /// `n8n`/`webhook` and `openclaw`/`subprocess`.
    ///
    /// In-process backends (runnables, graphs, crews, callables) wrap live
    /// objects, so callers register constructors that capture them.
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        for name in ["n8n", "webhook"] {
            registry.register(name, |options| {
                let config: WebhookConfig = parse_options(options)?;
                Ok(Arc::new(WebhookAdapter::new(config)?) as Arc<dyn AgentAdapter>)
            });
        }
        for name in ["openclaw", "subprocess"] {
            registry.register(name, |options| {
                let config: SubprocessConfig = parse_options(options)?;
                Ok(Arc::new(SubprocessAdapter::new(config)?) as Arc<dyn AgentAdapter>)
            });
        }
        registry
    }

    /// Registers `constructor` under `name`, replacing any previous entry.
    pub fn register<F>(&mut self, name: impl Into<String>, constructor: F)
    where
        F: Fn(&AdapterOptions) -> AdaptaResult<Arc<dyn AgentAdapter>> + Send + Sync + 'static,
    {
        let name = name.into();
        if self
            .constructors
            .insert(name.clone(), Arc::new(constructor))
            .is_some()
        {
            warn!(kind = %name, "Adapter kind re-registered, previous constructor replaced");
        } else {
            info!(kind = %name, "Registered adapter kind");
        }
    }

    /// Whether a constructor exists for `name`.
    pub fn contains(&self, name: &str) -> bool {
        self.constructors.contains_key(name)
    }

    /// Registered kind names, sorted.
    pub fn kinds(&self) -> Vec<&str> {
        let mut kinds: Vec<&str> = self.constructors.keys().map(String::as_str).collect();
        kinds.sort_unstable();
        kinds
    }

    /// Builds an adapter from `options`, dispatching on its `adapter` key.
    pub fn build(&self, options: &AdapterOptions) -> AdaptaResult<Arc<dyn AgentAdapter>> {
        let kind = match options.get(KIND_KEY) {
            Some(Value::String(kind)) => kind.as_str(),
            Some(other) => {
                return Err(AdaptaError::Config(format!(
                    "'{KIND_KEY}' must be a string, got {other}"
                )))
            }
            None => {
                return Err(AdaptaError::Config(format!(
                    "missing '{KIND_KEY}' key in adapter options"
                )))
            }
        };

        let constructor = self
            .constructors
            .get(kind)
            .ok_or_else(|| AdaptaError::Config(format!("unknown adapter kind '{kind}'")))?;

        let adapter = constructor(options)?;
        info!(kind = %kind, adapter = adapter.kind(), "Adapter constructed");
        Ok(adapter)
    }
}

impl Default for AdapterRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Deserializes a backend config from `options`, ignoring the `adapter` key.
///
/// Backend configs deny unknown fields, so a misspelled or unsupported
/// option fails here with a configuration error.
pub fn parse_options<T: DeserializeOwned>(options: &AdapterOptions) -> AdaptaResult<T> {
    let mut map = options.clone();
    let kind = map.remove(KIND_KEY);
    for key in REQUEST_LEVEL_KEYS {
        if map.remove(key).is_some() {
            warn!(key, "Ignoring adapter option; choose blocking per request instead");
        }
    }
    serde_json::from_value(Value::Object(map)).map_err(|e| {
        let kind = kind
            .as_ref()
            .and_then(Value::as_str)
            .unwrap_or("adapter")
            .to_string();
        AdaptaError::Config(format!("invalid options for '{kind}': {e}"))
    })
}
