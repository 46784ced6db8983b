//! Text normalization used by the truncate strategy.
//!
//! Normalization strips HTML comments and `id:`/`uuid:` UUID tokens, removes
//! whitespace around punctuation and brackets, collapses remaining whitespace
//! runs and trims. The rules run until the text stops changing, so
//! `normalize_text(normalize_text(x)) == normalize_text(x)`.

use gateway_core::{RequestPayload, ResponsesInput, ResponsesInputItem};
use once_cell::sync::Lazy;
use regex::Regex;

/// Rewrite rules, applied in order on every pass
const RULES: &[(&str, &str)] = &[
    (r"(?s)<!--.*?-->", ""),
    (r"(?i)\b(?:id|uuid):[a-f0-9-]{36}\b", ""),
    (r"\s*,\s*", ","),
    (r"\s*\.\s*", "."),
    (r"\s*:\s*", ":"),
    (r"\s*;\s*", ";"),
    (r"\s*\(\s*", "("),
    (r"\s*\)\s*", ")"),
    (r"\s*\{\s*", "{"),
    (r"\s*\}\s*", "}"),
    (r"\s*\[\s*", "["),
    (r"\s*\]\s*", "]"),
    (r"\s*=\s*", "="),
    (r"\s*>\s*", ">"),
    (r"\s*<\s*", "<"),
    (r"\s+", " "),
];

static PATTERNS: Lazy<Vec<(Regex, &'static str)>> = Lazy::new(|| {
    RULES
        .iter()
        .filter_map(|(pattern, replacement)| {
            Regex::new(pattern).ok().map(|regex| (regex, *replacement))
        })
        .collect()
});

fn normalize_once(text: &str) -> String {
    let mut current = text.to_string();
    for (regex, replacement) in PATTERNS.iter() {
        current = regex.replace_all(&current, *replacement).into_owned();
    }
    current.trim().to_string()
}

/// Normalize `text` to a fixed point.
///
/// No rule lengthens its input, so the loop ends once a pass leaves the text
/// unchanged.
#[must_use]
pub fn normalize_text(text: &str) -> String {
    let mut current = normalize_once(text);
    loop {
        let next = normalize_once(&current);
        if next == current {
            return current;
        }
        current = next;
    }
}

/// Normalize every text field of the payload in place.
///
/// Touches message text (plain strings and text parts), `instructions` and
/// string `input`. Tool calls, outputs and non-text parts are left alone.
/// Returns whether anything changed.
pub fn truncate_payload(payload: &mut RequestPayload) -> bool {
    let mut changed = false;
    let mut apply = |text: &str| {
        let normalized = normalize_text(text);
        changed |= normalized != text;
        normalized
    };

    match payload {
        RequestPayload::ChatCompletions(chat) => {
            for message in chat.messages.iter_mut().flatten() {
                if let Some(content) = message.content.as_mut() {
                    content.map_text(&mut apply);
                }
            }
        }
        RequestPayload::Responses(responses) => {
            if let Some(instructions) = responses.instructions.as_mut() {
                *instructions = apply(instructions);
            }
            match &mut responses.input {
                ResponsesInput::Text(text) => *text = apply(text),
                ResponsesInput::Items(items) => {
                    for item in items {
                        if let ResponsesInputItem::Message(message) = item {
                            message.content.map_text(&mut apply);
                        }
                    }
                }
                ResponsesInput::Other(_) => {}
            }
        }
    }

    changed
}
