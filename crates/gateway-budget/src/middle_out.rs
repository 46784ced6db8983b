//! Middle-out trimming.
//!
//! Message text is cut into chunks of at most [`CHUNK_SIZE`] characters and
//! one contiguous window of chunks around the middle of the conversation is
//! dropped, so the opening context and the latest turns survive. Chunks are
//! exact substrings of the text they came from; concatenating the kept ones
//! preserves their order.

use crate::estimate::{messages_text, responses_text, tools_text, TokenEstimator};
use gateway_core::{ContentPart, Message, MessageContent, RequestPayload, ResponsesInput, ResponsesInputItem};
use std::borrow::Cow;

/// Largest chunk, in characters, unless no separator allows a finer cut
pub const CHUNK_SIZE: usize = 1000;

/// Paragraph, line, sentence, word
const SEPARATORS: [&str; 4] = ["\n\n", "\n", ".", " "];

/// An item of a conversation that middle-out trimming may shorten
pub trait Trimmable: Clone {
    /// Text that may be cut; `None` keeps the item whole
    fn trimmable_text(&self) -> Option<Cow<'_, str>>;

    /// A copy of this item carrying `text` instead
    #[must_use]
    fn with_text(&self, text: String) -> Self;
}

impl Trimmable for String {
    fn trimmable_text(&self) -> Option<Cow<'_, str>> {
        Some(Cow::Borrowed(self))
    }

    fn with_text(&self, text: String) -> Self {
        text
    }
}

/// Chat messages are cut only when their content is a plain string.
impl Trimmable for Message {
    fn trimmable_text(&self) -> Option<Cow<'_, str>> {
        self.text_content().map(Cow::Borrowed)
    }

    fn with_text(&self, text: String) -> Self {
        Self {
            content: Some(MessageContent::Text(text)),
            ..self.clone()
        }
    }
}

/// Responses message items are cut whether their content is a string or a
/// list of text parts. A lone text part is rewritten in place; several are
/// merged into one string.
impl Trimmable for ResponsesInputItem {
    fn trimmable_text(&self) -> Option<Cow<'_, str>> {
        let Self::Message(message) = self else {
            return None;
        };
        match &message.content {
            MessageContent::Text(text) => Some(Cow::Borrowed(text)),
            MessageContent::Parts(parts) if parts.iter().any(|part| part.text().is_some()) => {
                Some(message.content.flattened_text())
            }
            _ => None,
        }
    }

    fn with_text(&self, text: String) -> Self {
        let Self::Message(message) = self else {
            return self.clone();
        };
        let mut message = message.clone();
        message.content = match message.content {
            MessageContent::Parts(mut parts) if text_part_count(&parts) == 1 => {
                if let Some(ContentPart::Text(part)) =
                    parts.iter_mut().find(|part| part.text().is_some())
                {
                    part.text = text;
                }
                MessageContent::Parts(parts)
            }
            _ => MessageContent::Text(text),
        };
        Self::Message(message)
    }
}

fn text_part_count(parts: &[ContentPart]) -> usize {
    parts.iter().filter(|part| part.text().is_some()).count()
}

fn char_len(text: &str) -> usize {
    text.chars().count()
}

/// Split `text` into chunks of at most `chunk_size` characters.
///
/// Separators are tried in order and a finer one is only used on chunks that
/// are still too long. A chunk without any remaining separator is kept whole
/// even if oversized. Each chunk keeps its trailing separator, so the chunks
/// concatenate back to `text`.
#[must_use]
pub fn split_text(text: &str, chunk_size: usize) -> Vec<&str> {
    split_recursive(text, &SEPARATORS, chunk_size)
}

fn split_recursive<'a>(text: &'a str, separators: &[&str], chunk_size: usize) -> Vec<&'a str> {
    if text.is_empty() {
        return Vec::new();
    }
    if char_len(text) <= chunk_size {
        return vec![text];
    }

    let Some(position) = separators.iter().position(|sep| text.contains(sep)) else {
        return vec![text];
    };
    let separator = separators[position];
    let finer = &separators[position + 1..];

    let mut chunks = Vec::new();
    let mut start = 0;
    let mut end = 0;
    let mut length = 0;
    for piece in text.split_inclusive(separator) {
        let piece_length = char_len(piece);
        if length > 0 && length + piece_length > chunk_size {
            chunks.push(&text[start..end]);
            start = end;
            length = 0;
        }
        end += piece.len();
        length += piece_length;
    }
    if end > start {
        chunks.push(&text[start..end]);
    }

    chunks
        .into_iter()
        .flat_map(|chunk| {
            if char_len(chunk) > chunk_size {
                split_recursive(chunk, finer, chunk_size)
            } else {
                vec![chunk]
            }
        })
        .collect()
}

struct Chunk<'a> {
    item: usize,
    text: &'a str,
}

/// Trim `items` until `estimate` fits `max_tokens`.
///
/// `estimate` prices a candidate conversation; `None` aborts trimming and
/// returns the input unchanged. Each chunk is weighted with one
/// tokens-per-character ratio taken from the full estimate. A centered
/// window grows right then left, alternating, until it covers the excess.
/// Items whose text ends up empty are dropped. When nothing is chunkable,
/// whole middle items are removed instead while more than two remain.
pub fn middle_out<T, F>(items: &[T], max_tokens: u64, estimate: F) -> Vec<T>
where
    T: Trimmable,
    F: Fn(&[T]) -> Option<u64>,
{
    let texts: Vec<Option<Cow<'_, str>>> = items.iter().map(Trimmable::trimmable_text).collect();
    let chunks: Vec<Chunk<'_>> = texts
        .iter()
        .enumerate()
        .flat_map(|(item, text)| {
            text.as_deref()
                .map(|text| split_text(text, CHUNK_SIZE))
                .unwrap_or_default()
                .into_iter()
                .map(move |text| Chunk { item, text })
        })
        .collect();

    if chunks.is_empty() {
        return remove_middle_items(items, max_tokens, &estimate);
    }

    let stripped: Vec<T> = items
        .iter()
        .zip(&texts)
        .map(|(value, text)| match text {
            Some(_) => value.with_text(String::new()),
            None => value.clone(),
        })
        .collect();
    let (Some(base_tokens), Some(full_estimate)) = (estimate(&stripped), estimate(items)) else {
        return items.to_vec();
    };
    if full_estimate <= max_tokens {
        return items.to_vec();
    }

    let total_chars: usize = chunks.iter().map(|chunk| char_len(chunk.text)).sum();
    let budget = max_tokens.saturating_sub(base_tokens);
    let content_tokens = full_estimate.saturating_sub(base_tokens);

    if budget == 0 || content_tokens == 0 || total_chars == 0 {
        return rebuild(items, &texts, &chunks, &vec![false; chunks.len()]);
    }

    let tokens_per_char = content_tokens as f64 / total_chars as f64;
    let weights: Vec<u64> = chunks
        .iter()
        .map(|chunk| ((tokens_per_char * char_len(chunk.text) as f64).floor() as u64).max(1))
        .collect();

    let keep = centered_window(&weights, content_tokens.saturating_sub(budget));
    rebuild(items, &texts, &chunks, &keep)
}

/// Keep-mask after removing a centered window weighing at least `cut`
fn centered_window(weights: &[u64], cut: u64) -> Vec<bool> {
    let n = weights.len();
    let mut keep = vec![true; n];
    if n == 0 || cut == 0 {
        return keep;
    }

    let center = (n - 1) / 2;
    let mut left = center;
    let mut right = center + 1;
    let mut removed = weights[center];
    let mut take_right = true;

    while removed < cut && (left > 0 || right < n) {
        if take_right && right < n {
            removed += weights[right];
            right += 1;
        } else if left > 0 {
            left -= 1;
            removed += weights[left];
        } else {
            removed += weights[right];
            right += 1;
        }
        take_right = !take_right;
    }

    keep[left..right].fill(false);
    keep
}

fn rebuild<T: Trimmable>(
    items: &[T],
    original: &[Option<Cow<'_, str>>],
    chunks: &[Chunk<'_>],
    keep: &[bool],
) -> Vec<T> {
    let mut texts: Vec<Option<String>> = original
        .iter()
        .map(|text| text.as_ref().map(|_| String::new()))
        .collect();

    for (chunk, _) in chunks.iter().zip(keep).filter(|(_, keep)| **keep) {
        if let Some(Some(text)) = texts.get_mut(chunk.item) {
            text.push_str(chunk.text);
        }
    }

    items
        .iter()
        .zip(texts)
        .filter_map(|(value, text)| match text {
            None => Some(value.clone()),
            Some(text) if text.is_empty() => None,
            Some(text) => Some(value.with_text(text)),
        })
        .collect()
}

fn remove_middle_items<T, F>(items: &[T], max_tokens: u64, estimate: &F) -> Vec<T>
where
    T: Trimmable,
    F: Fn(&[T]) -> Option<u64>,
{
    let mut working = items.to_vec();
    while working.len() > 2 {
        match estimate(&working) {
            Some(tokens) if tokens > max_tokens => {
                working.remove(working.len() / 2);
            }
            _ => break,
        }
    }
    working
}

/// Apply middle-out trimming to a payload.
///
/// Chat payloads trim `messages`. Responses payloads trim string `input` or
/// message items; `instructions`, tools and non-message items are never cut
/// and count toward the fixed cost. Returns whether the payload changed.
pub fn middle_out_payload(
    payload: &mut RequestPayload,
    estimator: TokenEstimator,
    max_tokens: u64,
) -> bool {
    match payload {
        RequestPayload::ChatCompletions(chat) => {
            let Some(messages) = chat.messages.as_ref() else {
                return false;
            };
            let tools = tools_text(chat.tools.as_ref());
            let trimmed = middle_out(messages, max_tokens, |candidate| {
                estimator.estimate_text(&tools, &messages_text(candidate))
            });

            if &trimmed == messages {
                return false;
            }
            chat.messages = Some(trimmed);
            true
        }
        RequestPayload::Responses(responses) => {
            let tools = tools_text(responses.tools.as_ref());
            let instructions = responses.instructions.as_deref();

            let trimmed = match &responses.input {
                ResponsesInput::Text(text) => {
                    let input = [text.clone()];
                    let kept = middle_out(&input, max_tokens, |candidate| {
                        let content = responses_text(
                            instructions,
                            candidate.iter().map(|s| Cow::Borrowed(s.as_str())),
                        );
                        estimator.estimate_text(&tools, &content)
                    });
                    let kept = kept.into_iter().next().unwrap_or_default();
                    (kept != *text).then_some(ResponsesInput::Text(kept))
                }
                ResponsesInput::Items(items) => {
                    let kept = middle_out(items, max_tokens, |candidate| {
                        let content = responses_text(
                            instructions,
                            candidate.iter().map(ResponsesInputItem::text),
                        );
                        estimator.estimate_text(&tools, &content)
                    });
                    (kept != *items).then_some(ResponsesInput::Items(kept))
                }
                ResponsesInput::Other(_) => None,
            };

            match trimmed {
                Some(input) => {
                    responses.input = input;
                    true
                }
                None => false,
            }
        }
    }
}
