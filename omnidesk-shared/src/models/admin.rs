use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

/// Counters exposed by the read-through cache.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq, ToSchema)]
pub struct CacheStats {
    /// Entries currently stored, including ones that expired but were not read since.
    pub keys: usize,
    pub hits: u64,
    pub misses: u64,
    pub invalidations: u64,
}

/// Snapshot of the realtime notification registry.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq, ToSchema)]
pub struct RealtimeStats {
    pub tenants: usize,
    pub connections: usize,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, ToSchema)]
pub struct OpsStats {
    pub cache: CacheStats,
    pub realtime: RealtimeStats,
}

/// Removes every cache key containing `pattern`. An empty pattern clears the cache.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, ToSchema)]
pub struct InvalidateCacheRequest {
    #[serde(default)]
    pub pattern: String,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, ToSchema)]
pub struct InvalidateCacheResponse {
    pub removed: usize,
}
