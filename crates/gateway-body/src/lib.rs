//! # Gateway Body
//!
//! Request body handling for the LLM Edge Gateway.
//!
//! This crate provides:
//! - [`BodyBuffer`]: the single per-request body owner, in memory or remote
//! - [`ContainerRouter`]: FNV-1a sharding onto remote buffer containers
//! - [`StreamingBodyHandler`]: a three-way tee for metadata, archival and
//!   forwarding
//! - AWS SigV4 signing and an S3-compatible upload client

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod buffer;
pub mod merge;
pub mod router;
pub mod sigv4;
pub mod storage;
pub mod streaming;

// Re-export main types
pub use buffer::{
    BodyBuffer, BufferRequirements, BufferStrategy, InMemoryBuffer, RemoteBuffer, SignedAwsRequest,
};
pub use router::{fnv1a32, ContainerRouter};
pub use sigv4::AwsCredentials;
pub use storage::ObjectStorageClient;
pub use streaming::{
    body_stream_from_bytes, collect_body, empty_body_stream, BodyMetadata, BodyStream,
    StreamingBodyHandler,
};
