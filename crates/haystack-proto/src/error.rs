/// Master error types.
///
/// Errors are serde-serializable so they can travel inside wire responses;
/// the handler layer converts them to `MasterResponse::Error` and clients
/// map them back.

use serde::{Deserialize, Serialize};

/// Unified error type for all master operations.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, thiserror::Error)]
pub enum MasterError {
    /// This node is not the cluster leader; the caller must redirect.
    /// Never retried server-side.
    #[error("not the cluster leader")]
    NotLeader,

    #[error("invalid replica placement {0:?}")]
    InvalidReplication(String),

    #[error("invalid ttl {0:?}")]
    InvalidTtl(String),

    #[error("data center {0} not found in topology")]
    UnknownDataCenter(String),

    #[error("only {available} volume slots left, not enough for {requested}")]
    InsufficientCapacity { available: i64, requested: i64 },

    /// A per-replica create-volume RPC failed; the placement is rolled back.
    #[error("volume create failed: {0}")]
    VolumeCreate(String),

    #[error("ec volume {0} not found")]
    EcVolumeNotFound(u32),

    #[error("invalid volume id {0:?}")]
    InvalidVolumeId(String),

    #[error("network error: {0}")]
    Network(String),

    #[error("deadline exceeded: {0}")]
    Timeout(String),

    #[error("i/o error: {0}")]
    Io(String),

    #[error("protocol error: {0}")]
    Protocol(String),
}

/// Result type alias for master operations.
pub type MasterResult<T> = Result<T, MasterError>;

impl From<std::io::Error> for MasterError {
    fn from(e: std::io::Error) -> Self {
        MasterError::Io(e.to_string())
    }
}
