//! # Gateway Core
//!
//! Core types and error handling for the LLM Edge Gateway.
//!
//! This crate provides the foundational types used throughout the edge pipeline:
//! - Request payload types (Chat Completions and Responses API shapes)
//! - Request and shard identifiers
//! - Error types and handling

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod error;
pub mod request;
pub mod types;

// Re-export commonly used types
pub use error::{GatewayError, GatewayResult};
pub use request::{
    ChatCompletionsPayload, ContentPart, Message, MessageContent, MessageRole, RequestPayload,
    ResponsesInput, ResponsesInputItem, ResponsesPayload, TextPart, TextPartKind,
};
pub use types::{RequestId, ShardId};
