//! Character-based token estimation.

use gateway_core::{Message, MessageContent, RequestPayload, ResponsesInput, ResponsesInputItem};
use serde_json::Value;
use std::borrow::Cow;

/// Tokens per character when no model-specific heuristic applies
pub const DEFAULT_TOKEN_HEURISTIC: f64 = 0.25;

/// Tokens-per-character overrides, matched by exact id then longest prefix
const MODEL_TOKEN_HEURISTICS: &[(&str, f64)] = &[
    ("gpt-4o", 0.25),
    ("gpt-4o-mini", 0.25),
    ("gpt-3.5-turbo", 0.2),
    ("gpt-o3", 0.25),
    ("gpt-4.1-nano", 0.2),
    ("gpt-5-nano", 0.2),
];

/// Estimates tokens as `ceil(chars × tokens_per_char)`
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TokenEstimator {
    tokens_per_char: f64,
}

impl Default for TokenEstimator {
    fn default() -> Self {
        Self::new(DEFAULT_TOKEN_HEURISTIC)
    }
}

impl TokenEstimator {
    /// Estimator with a fixed ratio
    #[must_use]
    pub const fn new(tokens_per_char: f64) -> Self {
        Self { tokens_per_char }
    }

    /// Estimator using the heuristic for `model`
    #[must_use]
    pub fn for_model(model: Option<&str>) -> Self {
        Self::new(model.map_or(DEFAULT_TOKEN_HEURISTIC, token_heuristic))
    }

    /// Tokens per character
    #[must_use]
    pub const fn tokens_per_char(&self) -> f64 {
        self.tokens_per_char
    }

    /// Estimate for `chars` characters; `None` if the result is not finite
    #[must_use]
    pub fn estimate_chars(&self, chars: usize) -> Option<u64> {
        let estimate = (chars as f64 * self.tokens_per_char).ceil();
        (estimate.is_finite() && estimate >= 0.0).then_some(estimate as u64)
    }

    /// Estimate for serialized tools plus content text.
    ///
    /// The two are joined by one space when both are present.
    #[must_use]
    pub fn estimate_text(&self, tools: &str, content: &str) -> Option<u64> {
        let mut chars = tools.chars().count() + content.chars().count();
        if !tools.is_empty() && !content.is_empty() {
            chars += 1;
        }
        self.estimate_chars(chars)
    }

    /// Estimate for a whole payload
    #[must_use]
    pub fn estimate(&self, payload: &RequestPayload) -> Option<u64> {
        self.estimate_text(&tools_text(payload.tools()), &payload_text(payload))
    }
}

/// Heuristic for `model`: exact id, then longest matching prefix, then the
/// default. Matching is case-insensitive.
#[must_use]
pub fn token_heuristic(model: &str) -> f64 {
    let model = model.to_lowercase();

    if let Some((_, heuristic)) = MODEL_TOKEN_HEURISTICS.iter().find(|(id, _)| *id == model) {
        return *heuristic;
    }

    MODEL_TOKEN_HEURISTICS
        .iter()
        .filter(|(prefix, _)| model.starts_with(prefix))
        .max_by_key(|(prefix, _)| prefix.len())
        .map_or(DEFAULT_TOKEN_HEURISTIC, |(_, heuristic)| *heuristic)
}

/// Tools as counted by the estimator: strings verbatim, other values as
/// compact JSON, absent or `null` as nothing
#[must_use]
pub fn tools_text(tools: Option<&Value>) -> Cow<'_, str> {
    match tools {
        None | Some(Value::Null) => Cow::Borrowed(""),
        Some(Value::String(text)) => Cow::Borrowed(text),
        Some(other) => Cow::Owned(serde_json::to_string(other).unwrap_or_default()),
    }
}

/// All countable text of a payload.
///
/// Chat messages are concatenated without separators. Responses payloads
/// join `instructions` and each input item with single spaces.
#[must_use]
pub fn payload_text(payload: &RequestPayload) -> String {
    match payload {
        RequestPayload::ChatCompletions(chat) => {
            chat.messages.as_deref().map(messages_text).unwrap_or_default()
        }
        RequestPayload::Responses(responses) => {
            let instructions = responses.instructions.as_deref();
            match &responses.input {
                ResponsesInput::Text(text) => {
                    responses_text(instructions, [Cow::Borrowed(text.as_str())])
                }
                ResponsesInput::Items(items) => items_text(instructions, items),
                ResponsesInput::Other(_) => responses_text(instructions, std::iter::empty()),
            }
        }
    }
}

/// Concatenated text of chat messages
#[must_use]
pub fn messages_text(messages: &[Message]) -> String {
    messages
        .iter()
        .filter_map(|message| message.content.as_ref())
        .map(MessageContent::flattened_text)
        .collect()
}

/// Text of a Responses payload with item input
#[must_use]
pub fn items_text(instructions: Option<&str>, items: &[ResponsesInputItem]) -> String {
    responses_text(instructions, items.iter().map(ResponsesInputItem::text))
}

pub(crate) fn responses_text<'a>(
    instructions: Option<&str>,
    pieces: impl IntoIterator<Item = Cow<'a, str>>,
) -> String {
    let mut text = String::new();
    if let Some(instructions) = instructions.filter(|i| !i.is_empty()) {
        text.push_str(instructions);
        text.push(' ');
    }
    for piece in pieces {
        text.push_str(&piece);
        text.push(' ');
    }
    text.trim().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn payload(value: Value) -> RequestPayload {
        RequestPayload::from_value(value).unwrap()
    }

    #[test]
    fn test_heuristic_lookup() {
        assert_eq!(token_heuristic("gpt-4o"), 0.25);
        assert_eq!(token_heuristic("GPT-3.5-Turbo"), 0.2);
        assert_eq!(token_heuristic("gpt-3.5-turbo-0125"), 0.2);
        assert_eq!(token_heuristic("gpt-4.1-nano-2025-04-14"), 0.2);
        assert_eq!(token_heuristic("claude-3-opus"), DEFAULT_TOKEN_HEURISTIC);
        assert_eq!(TokenEstimator::for_model(None).tokens_per_char(), 0.25);
    }

    #[test]
    fn test_estimate_chars_rounds_up() {
        let estimator = TokenEstimator::new(0.25);
        assert_eq!(estimator.estimate_chars(0), Some(0));
        assert_eq!(estimator.estimate_chars(1), Some(1));
        assert_eq!(estimator.estimate_chars(8), Some(2));
        assert_eq!(estimator.estimate_chars(9), Some(3));
        assert_eq!(TokenEstimator::new(f64::NAN).estimate_chars(4), None);
    }

    #[test]
    fn test_chat_estimate() {
        let chat = payload(json!({
            "model": "gpt-4",
            "messages": [
                {"role": "system", "content": "abcd"},
                {"role": "user", "content": [
                    {"type": "text", "text": "ef"},
                    {"type": "image_url", "image_url": {"url": "https://x"}},
                    {"type": "text", "text": "gh"}
                ]},
                {"role": "assistant", "content": null}
            ]
        }));

        assert_eq!(payload_text(&chat), "abcdef gh");
        assert_eq!(TokenEstimator::default().estimate(&chat), Some(3));
    }

    #[test]
    fn test_tools_counted_once_with_joining_space() {
        let with_tools = payload(json!({
            "messages": [{"role": "user", "content": "Hello"}],
            "tools": [{"type": "function"}]
        }));
        let without_tools = payload(json!({"messages": [{"role": "user", "content": "Hello"}]}));

        assert_eq!(tools_text(with_tools.tools()), r#"[{"type":"function"}]"#);
        // 21 tool chars + 1 space + 5 content chars
        assert_eq!(TokenEstimator::new(1.0).estimate(&with_tools), Some(27));
        assert_eq!(TokenEstimator::new(1.0).estimate(&without_tools), Some(5));
    }

    #[test]
    fn test_responses_text() {
        let string_input = payload(json!({"input": "Hello world", "instructions": "Be brief"}));
        assert_eq!(payload_text(&string_input), "Be brief Hello world");

        let items = payload(json!({
            "input": [
                {"role": "user", "content": "First"},
                {"role": "user", "content": [
                    {"type": "input_text", "text": "Part 1"},
                    {"type": "input_image", "image_url": "http://example.com/img.png"}
                ]},
                {"type": "function_call", "name": "f", "arguments": "{}"},
                {"type": "function_call_output", "call_id": "c", "output": "42"},
                {"type": "reasoning", "summary": [{"type": "summary_text", "text": "hm"}]}
            ]
        }));
        assert_eq!(payload_text(&items), "First Part 1 {} 42 hm");
    }

    #[test]
    fn test_counts_characters_not_bytes() {
        let chat = payload(json!({"messages": [{"role": "user", "content": "héllo"}]}));
        assert_eq!(TokenEstimator::new(1.0).estimate(&chat), Some(5));
    }
}
