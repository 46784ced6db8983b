//! Request payload types for the edge pipeline.
//!
//! The edge never translates provider protocols; it only needs enough structure
//! to count and rewrite text. Every type here keeps unknown fields in a
//! flattened `extra` map so a parse/re-serialize cycle is lossless for fields
//! the pipeline does not touch.

use crate::error::GatewayResult;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};
use std::borrow::Cow;

/// A parsed LLM request body
#[derive(Debug, Clone, PartialEq)]
pub enum RequestPayload {
    /// OpenAI Chat Completions shape (`messages`)
    ChatCompletions(ChatCompletionsPayload),
    /// OpenAI Responses API shape (`input` without `messages`)
    Responses(ResponsesPayload),
}

impl RequestPayload {
    /// Parse a raw body.
    ///
    /// Returns `None` for anything that is not a JSON object of a recognised
    /// shape; callers treat that as "forward the original bytes untouched".
    #[must_use]
    pub fn parse(body: &str) -> Option<Self> {
        let value: Value = serde_json::from_str(body).ok()?;
        Self::from_value(value)
    }

    /// Classify and parse an already-decoded JSON value
    #[must_use]
    pub fn from_value(value: Value) -> Option<Self> {
        let object = value.as_object()?;
        let is_responses = object.contains_key("input") && !object.contains_key("messages");

        if is_responses {
            serde_json::from_value(value).ok().map(Self::Responses)
        } else {
            serde_json::from_value(value).ok().map(Self::ChatCompletions)
        }
    }

    /// Raw `model` field (possibly a comma-separated fallback chain)
    #[must_use]
    pub fn model_field(&self) -> Option<&str> {
        match self {
            Self::ChatCompletions(p) => p.model.as_deref(),
            Self::Responses(p) => p.model.as_deref(),
        }
    }

    /// Overwrite the `model` field
    pub fn set_model(&mut self, model: impl Into<String>) {
        let model = Some(model.into());
        match self {
            Self::ChatCompletions(p) => p.model = model,
            Self::Responses(p) => p.model = model,
        }
    }

    /// Tool definitions, if any
    #[must_use]
    pub fn tools(&self) -> Option<&Value> {
        match self {
            Self::ChatCompletions(p) => p.tools.as_ref(),
            Self::Responses(p) => p.tools.as_ref(),
        }
    }

    /// API family name, used in logs
    #[must_use]
    pub const fn api_name(&self) -> &'static str {
        match self {
            Self::ChatCompletions(_) => "chat_completions",
            Self::Responses(_) => "responses",
        }
    }

    /// Serialize back to a JSON body
    pub fn to_json_string(&self) -> GatewayResult<String> {
        let body = match self {
            Self::ChatCompletions(p) => serde_json::to_string(p)?,
            Self::Responses(p) => serde_json::to_string(p)?,
        };
        Ok(body)
    }
}

/// Chat Completions request body
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatCompletionsPayload {
    /// Target model or comma-separated fallback chain
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,

    /// Conversation messages
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub messages: Option<Vec<Message>>,

    /// Tool definitions, kept opaque
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tools: Option<Value>,

    /// Every other field, preserved verbatim
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Responses API request body
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResponsesPayload {
    /// Target model or comma-separated fallback chain
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,

    /// Input text or items
    pub input: ResponsesInput,

    /// System-level instructions
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub instructions: Option<String>,

    /// Tool definitions, kept opaque
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tools: Option<Value>,

    /// Every other field, preserved verbatim
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Chat message
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    /// Role of the message author
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<MessageRole>,

    /// Message content; `None` when the field is absent
    #[serde(
        default,
        deserialize_with = "deserialize_present",
        skip_serializing_if = "Option::is_none"
    )]
    pub content: Option<MessageContent>,

    /// Every other field (`name`, `tool_calls`, ...), preserved verbatim
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Message {
    /// Create a message with plain text content
    #[must_use]
    pub fn text(role: MessageRole, content: impl Into<String>) -> Self {
        Self {
            role: Some(role),
            content: Some(MessageContent::Text(content.into())),
            extra: Map::new(),
        }
    }

    /// Plain string content, if the content is a string
    #[must_use]
    pub fn text_content(&self) -> Option<&str> {
        self.content.as_ref().and_then(MessageContent::as_text)
    }
}

/// Message role
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum MessageRole {
    /// System message
    System,
    /// User message
    User,
    /// Assistant message
    Assistant,
    /// Tool response message
    Tool,
    /// Developer message
    Developer,
    /// Any other role string, preserved as-is
    Other(String),
}

impl From<String> for MessageRole {
    fn from(value: String) -> Self {
        match value.as_str() {
            "system" => Self::System,
            "user" => Self::User,
            "assistant" => Self::Assistant,
            "tool" => Self::Tool,
            "developer" => Self::Developer,
            _ => Self::Other(value),
        }
    }
}

impl From<MessageRole> for String {
    fn from(value: MessageRole) -> Self {
        value.to_string()
    }
}

impl std::fmt::Display for MessageRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::System => write!(f, "system"),
            Self::User => write!(f, "user"),
            Self::Assistant => write!(f, "assistant"),
            Self::Tool => write!(f, "tool"),
            Self::Developer => write!(f, "developer"),
            Self::Other(role) => write!(f, "{role}"),
        }
    }
}

/// Message content (text or multimodal parts)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MessageContent {
    /// Simple text content
    Text(String),
    /// Ordered content parts
    Parts(Vec<ContentPart>),
    /// Anything else (including an explicit `null`)
    Other(Value),
}

impl MessageContent {
    /// The content as a plain string, if it is one
    #[must_use]
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text(text) => Some(text),
            _ => None,
        }
    }

    /// All text carried by this content.
    ///
    /// Text parts are joined with a single space; non-text parts contribute
    /// nothing.
    #[must_use]
    pub fn flattened_text(&self) -> Cow<'_, str> {
        match self {
            Self::Text(text) => Cow::Borrowed(text),
            Self::Parts(parts) => {
                let texts: Vec<&str> = parts.iter().filter_map(ContentPart::text).collect();
                match texts.as_slice() {
                    [] => Cow::Borrowed(""),
                    [single] => Cow::Borrowed(single),
                    _ => Cow::Owned(texts.join(" ")),
                }
            }
            Self::Other(_) => Cow::Borrowed(""),
        }
    }

    /// Apply `f` to every piece of text in place
    pub fn map_text(&mut self, mut f: impl FnMut(&str) -> String) {
        match self {
            Self::Text(text) => *text = f(text),
            Self::Parts(parts) => {
                for part in parts {
                    if let ContentPart::Text(part) = part {
                        part.text = f(&part.text);
                    }
                }
            }
            Self::Other(_) => {}
        }
    }
}

/// One element of a content-parts array
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ContentPart {
    /// A text-bearing part (`text` or `input_text`)
    Text(TextPart),
    /// Images, files, audio and everything else; carried through untouched
    Other(Value),
}

impl ContentPart {
    /// Text of a text-bearing part
    #[must_use]
    pub fn text(&self) -> Option<&str> {
        match self {
            Self::Text(part) => Some(&part.text),
            Self::Other(_) => None,
        }
    }
}

/// Text-bearing content part
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TextPart {
    /// Part type
    #[serde(rename = "type")]
    pub kind: TextPartKind,
    /// Text
    pub text: String,
    /// Every other field, preserved verbatim
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Type tag of a text-bearing part
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TextPartKind {
    /// Chat Completions text part
    Text,
    /// Responses API text part
    InputText,
}

/// Responses API `input`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ResponsesInput {
    /// Single string input
    Text(String),
    /// Ordered input items
    Items(Vec<ResponsesInputItem>),
    /// Anything else, preserved verbatim
    Other(Value),
}

/// One Responses API input item
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ResponsesInputItem {
    /// `function_call` item; `arguments` count toward the estimate
    FunctionCall(FunctionCallItem),
    /// `function_call_output` item; `output` counts toward the estimate
    FunctionCallOutput(FunctionCallOutputItem),
    /// `reasoning` item; summary texts count toward the estimate
    Reasoning(ReasoningItem),
    /// Message item (`type` absent or `"message"`)
    Message(ResponsesMessage),
    /// Any other item, preserved verbatim
    Other(Value),
}

impl ResponsesInputItem {
    /// Text this item contributes to the token estimate
    #[must_use]
    pub fn text(&self) -> Cow<'_, str> {
        match self {
            Self::FunctionCall(item) => Cow::Borrowed(&item.arguments),
            Self::FunctionCallOutput(item) => Cow::Borrowed(&item.output),
            Self::Reasoning(item) => Cow::Owned(
                item.summary
                    .iter()
                    .map(|s| s.text.as_str())
                    .collect::<Vec<_>>()
                    .join(" "),
            ),
            Self::Message(item) => item.content.flattened_text(),
            Self::Other(_) => Cow::Borrowed(""),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
enum FunctionCallTag {
    #[serde(rename = "function_call")]
    FunctionCall,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
enum FunctionCallOutputTag {
    #[serde(rename = "function_call_output")]
    FunctionCallOutput,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
enum ReasoningTag {
    #[serde(rename = "reasoning")]
    Reasoning,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
enum MessageTag {
    #[serde(rename = "message")]
    Message,
}

/// `function_call` input item
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FunctionCallItem {
    #[serde(rename = "type")]
    kind: FunctionCallTag,
    /// JSON-encoded call arguments
    #[serde(default)]
    pub arguments: String,
    /// Every other field, preserved verbatim
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// `function_call_output` input item
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FunctionCallOutputItem {
    #[serde(rename = "type")]
    kind: FunctionCallOutputTag,
    /// Tool output
    #[serde(default)]
    pub output: String,
    /// Every other field, preserved verbatim
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// `reasoning` input item
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReasoningItem {
    #[serde(rename = "type")]
    kind: ReasoningTag,
    /// Summary entries
    #[serde(default)]
    pub summary: Vec<ReasoningSummary>,
    /// Every other field, preserved verbatim
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// One reasoning summary entry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReasoningSummary {
    /// Summary text
    #[serde(default)]
    pub text: String,
    /// Every other field, preserved verbatim
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Responses API message item
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResponsesMessage {
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    kind: Option<MessageTag>,
    /// Role of the message author
    pub role: MessageRole,
    /// Message content
    pub content: MessageContent,
    /// Every other field, preserved verbatim
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

fn deserialize_present<'de, D>(deserializer: D) -> Result<Option<MessageContent>, D::Error>
where
    D: Deserializer<'de>,
{
    MessageContent::deserialize(deserializer).map(Some)
}
