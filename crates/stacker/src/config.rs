//! Master configuration, built from CLI flags in `main`.

use std::time::Duration;

use haystack_proto::defaults::*;

#[derive(Debug, Clone)]
pub struct MasterConfig {
    pub volume_size_limit_mb: u64,
    /// Used when a request leaves its replication empty.
    pub default_replication: String,
    pub preallocate: u64,
    pub memory_map_max_size_mb: u32,
    pub writable_low_water: usize,
    pub garbage_threshold: f64,
    pub max_parallel_vacuum_per_server: usize,
    pub volume_rpc_deadline: Duration,
    pub client_channel_size: usize,
    /// Empty disables file-access tokens.
    pub signing_key: String,
}

impl Default for MasterConfig {
    fn default() -> Self {
        Self {
            volume_size_limit_mb: DEFAULT_VOLUME_SIZE_LIMIT_MB,
            default_replication: DEFAULT_REPLICA_PLACEMENT.to_string(),
            preallocate: DEFAULT_PREALLOCATE_BYTES,
            memory_map_max_size_mb: 0,
            writable_low_water: DEFAULT_WRITABLE_LOW_WATER,
            garbage_threshold: DEFAULT_GARBAGE_THRESHOLD,
            max_parallel_vacuum_per_server: DEFAULT_MAX_PARALLEL_VACUUM_PER_SERVER,
            volume_rpc_deadline: Duration::from_secs(DEFAULT_VOLUME_RPC_DEADLINE_SECS),
            client_channel_size: DEFAULT_CLIENT_CHANNEL_SIZE,
            signing_key: String::new(),
        }
    }
}
