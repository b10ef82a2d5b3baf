/// Request and response types for the master wire protocol.
///
/// Frames are `u32 big-endian length prefix + bincode payload`. A request
/// frame carries `(RequestHeader, MasterRequest)`; a response frame carries
/// a `ResponseEnvelope`. A `KeepConnected` request upgrades the connection
/// to a one-way stream of `KeepConnectedResponse` frames.

use serde::{Deserialize, Serialize};

use crate::error::MasterError;
use crate::topology_info::TopologyInfo;
use crate::volume::{DiskType, Location, VolumeId, VolumeInfo, VolumeLocation};

/// Common header for all requests.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RequestHeader {
    /// Protocol version
    pub proto_ver: u8,
    /// Request ID (for matching responses)
    pub id: u32,
}

/// Client and volume-server request types.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum MasterRequest {
    // ---- Client operations ----
    /// Resolve volume or file ids to replica locations. Unknown ids are
    /// silently omitted from the response.
    LookupVolume {
        volume_or_file_ids: Vec<String>,
        collection: String,
    },
    /// Aggregate size/file-count statistics for one layout.
    Statistics {
        collection: String,
        replication: String,
        ttl: String,
        disk_type: String,
    },
    /// Full topology snapshot.
    VolumeList,
    /// Shard locations of an erasure-coded volume.
    LookupEcVolume {
        volume_id: u32,
    },
    /// Subscribe this connection to new-volume notifications.
    KeepConnected {
        client_name: String,
    },

    // ---- Operator operations ----
    VacuumVolume {
        garbage_threshold: f64,
        /// 0 means "scan everything".
        volume_id: u32,
        collection: String,
    },
    DisableVacuum,
    EnableVacuum,
    VolumeMarkReadonly {
        volume_id: u32,
        ip: String,
        port: u16,
        collection: String,
        replica_placement: u8,
        ttl: String,
        disk_type: String,
        is_readonly: bool,
    },
    /// Synchronous ad-hoc growth of `writable_volume_count` volumes.
    VolumeGrow {
        collection: String,
        replication: String,
        ttl: String,
        disk_type: String,
        data_center: String,
        rack: String,
        data_node: String,
        memory_map_max_size_mb: u32,
        writable_volume_count: u32,
    },

    // ---- Volume-server operations ----
    /// Periodic volume-server report; the master rebuilds its entire
    /// in-memory state from these after a leader change.
    Heartbeat(HeartbeatRequest),
}

/// Volume-server identity and inventory.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct HeartbeatRequest {
    pub ip: String,
    pub port: u16,
    pub public_url: String,
    pub grpc_port: u32,
    pub data_center: String,
    pub rack: String,
    /// Capacity per storage class on this server.
    pub max_volume_counts: Vec<(DiskType, i64)>,
    pub volumes: Vec<VolumeInfo>,
    pub ec_shards: Vec<EcShardInfo>,
}

impl HeartbeatRequest {
    /// Stable node identifier.
    pub fn node_id(&self) -> String {
        format!("{}:{}", self.ip, self.port)
    }
}

/// One server's shards of an erasure-coded volume.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EcShardInfo {
    pub volume_id: VolumeId,
    pub collection: String,
    pub shard_ids: Vec<u32>,
    pub disk_type: DiskType,
}

/// Response frame: header fields flattened alongside the typed body.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResponseEnvelope {
    pub proto_ver: u8,
    pub id: u32,
    pub body: MasterResponse,
}

impl ResponseEnvelope {
    pub fn error(proto_ver: u8, id: u32, err: MasterError) -> Self {
        Self {
            proto_ver,
            id,
            body: MasterResponse::Error(err),
        }
    }
}

/// Typed response payloads, one per request type.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum MasterResponse {
    /// Generic acknowledgement for operations with no payload.
    Ok,
    Error(MasterError),
    LookupVolume {
        volume_id_locations: Vec<VolumeIdLocation>,
    },
    Statistics {
        total_size: u64,
        used_size: u64,
        file_count: u64,
    },
    VolumeList {
        topology: TopologyInfo,
        volume_size_limit_mb: u64,
    },
    LookupEcVolume {
        volume_id: u32,
        shard_locations: Vec<EcShardLocation>,
    },
}

/// Locations of one requested volume or file id, in request order.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct VolumeIdLocation {
    /// Echoes the original request entry (may include the file key).
    pub volume_or_file_id: String,
    pub locations: Vec<Location>,
    pub error: String,
    /// Signed access token; non-empty only for full file ids.
    pub auth: String,
}

/// Locations of one shard of an erasure-coded volume.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EcShardLocation {
    pub shard_id: u32,
    pub locations: Vec<Location>,
}

/// Pushed to every keep-connected subscriber after a successful growth.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeepConnectedResponse {
    pub volume_location: VolumeLocation,
}
