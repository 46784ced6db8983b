//! Integration tests for the LLM Edge Gateway
//!
//! This crate provides integration tests covering:
//! - Remote buffering against mock shard containers
//! - Streaming tee, archival and usage-accounting splice
//! - Token budget enforcement scenarios
//! - The full edge pipeline

pub mod fixtures;
pub mod helpers;
pub mod mock_services;

// Re-export commonly used items
pub use fixtures::*;
pub use helpers::*;
pub use mock_services::*;

#[cfg(test)]
mod body_tests;
#[cfg(test)]
mod budget_tests;
#[cfg(test)]
mod pipeline_tests;
