//! Deterministic request-to-shard routing.

use gateway_core::{GatewayError, GatewayResult, RequestId, ShardId};
use std::sync::Arc;

const FNV_OFFSET_BASIS: u32 = 2_166_136_261;
const FNV_PRIME: u32 = 16_777_619;

/// 32-bit FNV-1a hash
#[must_use]
pub fn fnv1a32(bytes: &[u8]) -> u32 {
    bytes.iter().fold(FNV_OFFSET_BASIS, |hash, byte| {
        (hash ^ u32::from(*byte)).wrapping_mul(FNV_PRIME)
    })
}

/// Routes requests onto a fixed pool of remote body containers.
///
/// The shard for a request is a pure function of its id and the pool size.
/// Collisions only reduce parallelism.
#[derive(Debug, Clone)]
pub struct ContainerRouter {
    endpoints: Arc<[String]>,
}

impl ContainerRouter {
    /// Create a router over `endpoints`
    ///
    /// # Errors
    /// Returns error if the pool is empty
    pub fn new(endpoints: Vec<String>) -> GatewayResult<Self> {
        if endpoints.is_empty() {
            return Err(GatewayError::configuration(
                "container router requires at least one endpoint",
            ));
        }
        let endpoints: Vec<String> = endpoints
            .into_iter()
            .map(|e| e.trim_end_matches('/').to_string())
            .collect();
        Ok(Self {
            endpoints: endpoints.into(),
        })
    }

    /// Number of shards in the pool
    #[must_use]
    pub fn pool_size(&self) -> usize {
        self.endpoints.len()
    }

    /// Shard for a request
    #[must_use]
    pub fn shard_for(&self, request_id: &RequestId) -> ShardId {
        let hash = fnv1a32(request_id.as_str().as_bytes());
        // pool_size fits in u32 for any realistic deployment
        ShardId::new(hash % self.pool_size() as u32)
    }

    /// Endpoint of a shard
    #[must_use]
    pub fn endpoint(&self, shard: ShardId) -> Option<&str> {
        self.endpoints.get(shard.index()).map(String::as_str)
    }

    /// Shard and endpoint for a request
    #[must_use]
    pub fn route(&self, request_id: &RequestId) -> (ShardId, &str) {
        let shard = self.shard_for(request_id);
        let endpoint = &self.endpoints[shard.index()];
        (shard, endpoint)
    }
}
