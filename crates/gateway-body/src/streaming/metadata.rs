//! Routing fields sniffed from a request body.

use serde_json::Value;

/// Sparse routing metadata.
///
/// Any field may be missing when the body is short, malformed, or the scan
/// stopped before reaching it.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BodyMetadata {
    /// `model`
    pub model: Option<String>,
    /// `stream`
    pub stream: Option<bool>,
    /// `temperature`
    pub temperature: Option<f64>,
    /// `max_tokens`
    pub max_tokens: Option<u64>,
    /// `prompt_id`
    pub prompt_id: Option<String>,
    /// `environment`
    pub environment: Option<String>,
    /// `version_id`
    pub version_id: Option<String>,
    /// `inputs`, kept as raw JSON
    pub inputs: Option<Value>,
    /// `stream_options`, kept as raw JSON
    pub stream_options: Option<Value>,
    /// Elements of `tools`, in order
    pub tools: Option<Vec<Value>>,
    /// Declared Content-Length of the body
    pub body_size: Option<u64>,
}

/// Top-level fields the scanner captures
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Field {
    Model,
    Stream,
    Temperature,
    MaxTokens,
    PromptId,
    Environment,
    VersionId,
    Inputs,
    StreamOptions,
    Tools,
}

impl Field {
    pub(crate) fn from_key(key: &[u8]) -> Option<Self> {
        Some(match key {
            b"model" => Self::Model,
            b"stream" => Self::Stream,
            b"temperature" => Self::Temperature,
            b"max_tokens" => Self::MaxTokens,
            b"prompt_id" => Self::PromptId,
            b"environment" => Self::Environment,
            b"version_id" => Self::VersionId,
            b"inputs" => Self::Inputs,
            b"stream_options" => Self::StreamOptions,
            b"tools" => Self::Tools,
            _ => return None,
        })
    }
}

impl BodyMetadata {
    /// True once the fields needed to route the request are known
    #[must_use]
    pub const fn has_routing_fields(&self) -> bool {
        self.model.is_some() && self.stream.is_some()
    }

    /// True when usage accounting was explicitly requested by the caller
    #[must_use]
    pub fn includes_usage(&self) -> bool {
        self.stream_options
            .as_ref()
            .and_then(|options| options.get("include_usage"))
            .is_some_and(is_truthy)
    }

    /// Store a parsed top-level value. Values of the wrong JSON type are
    /// ignored.
    pub(crate) fn assign(&mut self, field: Field, value: Value) {
        match field {
            Field::Model => self.model = as_string(value),
            Field::Stream => self.stream = value.as_bool(),
            Field::Temperature => self.temperature = value.as_f64(),
            Field::MaxTokens => self.max_tokens = value.as_u64(),
            Field::PromptId => self.prompt_id = as_string(value),
            Field::Environment => self.environment = as_string(value),
            Field::VersionId => self.version_id = as_string(value),
            Field::Inputs => self.inputs = Some(value),
            Field::StreamOptions => self.stream_options = Some(value),
            Field::Tools => {
                if let Value::Array(items) = value {
                    self.tools = Some(items);
                }
            }
        }
    }

    pub(crate) fn push_tool(&mut self, tool: Value) {
        self.tools.get_or_insert_with(Vec::new).push(tool);
    }
}

fn as_string(value: Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s),
        _ => None,
    }
}

fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|n| n != 0.0),
        Value::String(s) => !s.is_empty(),
        Value::Array(_) | Value::Object(_) => true,
    }
}
