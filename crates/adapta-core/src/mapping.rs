use crate::error::{BackendError, BackendResult};
use serde_json::{Map, Value};
use std::sync::Arc;

/// Field name used when the raw input is not a JSON object.
pub const DEFAULT_MESSAGE_FIELD: &str = "message";

/// Input key that means "the backend expects a chat message list".
pub const MESSAGES_KEY: &str = "messages";

/// Keys probed, in order, when pulling text out of a structured response.
pub const OUTPUT_KEYS: [&str; 5] = ["output", "result", "message", "text", "content"];

/// Caller-supplied mapping from `(raw input, context id)` to a payload.
pub type InputMapper = Arc<dyn Fn(&str, Option<&str>) -> Map<String, Value> + Send + Sync>;

/// Turns raw input text into a backend request payload.
///
/// Without a caller mapper the raw text is parsed as JSON; an object seeds the
/// payload field by field, anything else lands under the configured field. A
/// caller mapper replaces that step entirely.
///
/// Configured defaults override keys parsed out of a JSON object, but never
/// the raw-text field or a caller mapper's output.
#[derive(Clone)]
pub struct InputMapping {
    field: String,
    defaults: Map<String, Value>,
    mapper: Option<InputMapper>,
}

impl InputMapping {
    /// Creates a mapping that puts non-object input under `field`.
    pub fn new(field: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            defaults: Map::new(),
            mapper: None,
        }
    }

    /// Changes the field raw text is placed under.
    pub fn with_field(mut self, field: impl Into<String>) -> Self {
        self.field = field.into();
        self
    }

    /// Sets the default fields merged into every payload.
    pub fn with_defaults(mut self, defaults: Map<String, Value>) -> Self {
        self.defaults = defaults;
        self
    }

    /// Installs a caller mapper, overriding JSON detection.
    pub fn with_mapper<F>(mut self, mapper: F) -> Self
    where
        F: Fn(&str, Option<&str>) -> Map<String, Value> + Send + Sync + 'static,
    {
        self.mapper = Some(Arc::new(mapper));
        self
    }

    /// The field raw text is placed under.
    pub fn field(&self) -> &str {
        &self.field
    }

    /// Builds the payload for one request.
    pub fn map(&self, raw: &str, context_id: Option<&str>) -> Map<String, Value> {
        if let Some(mapper) = &self.mapper {
            let mut payload = self.defaults.clone();
            payload.extend(mapper(raw, context_id));
            return payload;
        }

        if let Ok(Value::Object(mut parsed)) = serde_json::from_str::<Value>(raw) {
            parsed.extend(self.defaults.clone());
            return parsed;
        }

        let value = if self.field == MESSAGES_KEY {
            chat_messages(raw)
        } else {
            Value::String(raw.to_string())
        };
        let mut payload = self.defaults.clone();
        payload.insert(self.field.clone(), value);
        payload
    }
}

impl Default for InputMapping {
    fn default() -> Self {
        Self::new(DEFAULT_MESSAGE_FIELD)
    }
}

impl std::fmt::Debug for InputMapping {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InputMapping")
            .field("field", &self.field)
            .field("defaults", &self.defaults)
            .field("mapper", &self.mapper.is_some())
            .finish()
    }
}

/// Wraps plain text into the smallest chat message list backends accept.
pub fn chat_messages(text: &str) -> Value {
    serde_json::json!([{ "role": "user", "content": text }])
}

/// Pulls the answer text out of a structured backend response.
///
/// A single-element array is unwrapped first. With `output_key` the key must
/// be present; without it the first of [`OUTPUT_KEYS`] wins and an object
/// with none of them is returned as pretty JSON.
pub fn extract_text(value: &Value, output_key: Option<&str>) -> BackendResult<String> {
    let value = match value {
        Value::Array(items) if items.len() == 1 => &items[0],
        other => other,
    };

    if let Some(key) = output_key {
        return value.get(key).map(value_to_text).ok_or_else(|| {
            BackendError::invalid_response(format!("response has no '{key}' field"))
        });
    }

    match value {
        Value::Object(obj) => {
            if let Some(found) = OUTPUT_KEYS.iter().find_map(|k| obj.get(*k)) {
                return Ok(value_to_text(found));
            }
            serde_json::to_string_pretty(value)
                .map_err(|e| BackendError::invalid_response(e.to_string()))
        }
        other => Ok(value_to_text(other)),
    }
}

fn value_to_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::error::BackendErrorKind;
    use serde_json::json;

    fn obj(v: Value) -> Map<String, Value> {
        match v {
            Value::Object(m) => m,
            _ => panic!("not an object"),
        }
    }

    #[test]
    fn test_plain_text_goes_under_field() {
        let mapping = InputMapping::new("event");
        let payload = mapping.map("what is 2+2?", None);
        assert_eq!(payload.len(), 1);
        assert_eq!(payload["event"], "what is 2+2?");
    }

    #[test]
    fn test_json_object_seeds_payload() {
        let mapping = InputMapping::new("event")
            .with_defaults(obj(json!({"name": "A2A Agent", "lang": "en"})));
        let payload = mapping.map(r#"{"query": "sum", "lang": "fr"}"#, None);

        assert_eq!(payload["query"], "sum");
        assert_eq!(payload["name"], "A2A Agent");
        assert_eq!(payload["lang"], "en");
        assert!(!payload.contains_key("event"));
    }

    #[test]
    fn test_json_non_object_is_treated_as_text() {
        let mapping = InputMapping::default();
        let payload = mapping.map("[1, 2, 3]", None);
        assert_eq!(payload["message"], "[1, 2, 3]");

        let payload = mapping.map("42", None);
        assert_eq!(payload["message"], "42");
    }

    #[test]
    fn test_defaults_merged_under_raw_field() {
        let mapping = InputMapping::default()
            .with_defaults(obj(json!({"name": "A2A Agent", "message": "placeholder"})));
        let payload = mapping.map("hello", Some("ctx-1"));
        assert_eq!(payload["message"], "hello");
        assert_eq!(payload["name"], "A2A Agent");
    }

    #[test]
    fn test_mapper_overrides_detection() {
        let mapping = InputMapping::default()
            .with_defaults(obj(json!({"source": "a2a", "query": "default"})))
            .with_mapper(|raw, ctx| {
                obj(json!({"query": raw.to_uppercase(), "session": ctx.unwrap_or("none")}))
            });

        let payload = mapping.map(r#"{"ignored": true}"#, Some("abc"));
        assert_eq!(payload["query"], r#"{"IGNORED": TRUE}"#);
        assert_eq!(payload["session"], "abc");
        assert_eq!(payload["source"], "a2a");
        assert!(!payload.contains_key("ignored"));
    }

    #[test]
    fn test_messages_field_wraps_chat_shape() {
        let mapping = InputMapping::new(MESSAGES_KEY);
        let payload = mapping.map("hi there", None);
        assert_eq!(
            payload["messages"],
            json!([{"role": "user", "content": "hi there"}])
        );
    }

    #[test]
    fn test_extract_known_keys_in_order() {
        assert_eq!(extract_text(&json!({"output": "4"}), None).unwrap(), "4");
        assert_eq!(
            extract_text(&json!({"result": 4, "message": "m"}), None).unwrap(),
            "4"
        );
        assert_eq!(extract_text(&json!({"message": "m"}), None).unwrap(), "m");
    }

    #[test]
    fn test_extract_unwraps_single_element_array() {
        let body = json!([{"output": "from n8n"}]);
        assert_eq!(extract_text(&body, None).unwrap(), "from n8n");
    }

    #[test]
    fn test_extract_falls_back_to_pretty_json() {
        let body = json!({"answer": 42});
        let text = extract_text(&body, None).unwrap();
        assert!(text.contains("\"answer\": 42"));
    }

    #[test]
    fn test_extract_with_configured_key() {
        let body = json!({"data": {"x": 1}, "output": "ignored"});
        assert_eq!(extract_text(&body, Some("data")).unwrap(), r#"{"x":1}"#);

        let err = extract_text(&body, Some("missing")).unwrap_err();
        assert_eq!(err.kind, BackendErrorKind::InvalidResponse);
    }

    #[test]
    fn test_extract_plain_string() {
        assert_eq!(extract_text(&json!("just text"), None).unwrap(), "just text");
    }
}
