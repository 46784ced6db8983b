//! Test fixtures and sample bodies for integration tests

use serde_json::{json, Value};

/// A short chat completion request
pub fn chat_body(model: &str, content: &str) -> Value {
    json!({
        "model": model,
        "messages": [
            {"role": "system", "content": "You are a helpful assistant."},
            {"role": "user", "content": content}
        ],
        "temperature": 0.7,
        "max_tokens": 100
    })
}

/// A flat streaming completion request without usage accounting.
///
/// Its only `}` closes the body, so `stream_options` lands at the top level.
pub fn streaming_prompt_body(model: &str) -> Value {
    json!({
        "model": model,
        "prompt": "Tell me a story",
        "stream": true
    })
}

/// A Responses API request with string input
pub fn responses_body(model: &str, input: &str, instructions: &str) -> Value {
    json!({
        "model": model,
        "input": input,
        "instructions": instructions
    })
}

/// A conversation whose middle turns carry `filler_paragraphs` paragraphs
/// of 900 characters each
pub fn long_conversation(model: &str, filler_paragraphs: usize) -> Value {
    let filler = (0..filler_paragraphs)
        .map(|i| char::from(b'a' + (i % 26) as u8).to_string().repeat(900))
        .collect::<Vec<_>>()
        .join("\n\n");

    json!({
        "model": model,
        "messages": [
            {"role": "system", "content": "Answer using the documents."},
            {"role": "user", "content": filler},
            {"role": "assistant", "content": "Noted."},
            {"role": "user", "content": "What was the first document about?"}
        ]
    })
}
