/// Wire types for master → volume-server control RPCs.
///
/// Same framing as the master protocol: u32 length prefix + bincode.

use serde::{Deserialize, Serialize};

use crate::error::MasterError;
use crate::placement::ReplicaPlacement;
use crate::ttl::Ttl;
use crate::volume::{DiskType, VolumeId};

/// Control requests the master sends to a volume server.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum VolumeServerRequest {
    /// Create an empty writable volume.
    AllocateVolume {
        volume_id: VolumeId,
        collection: String,
        replica_placement: ReplicaPlacement,
        ttl: Ttl,
        disk_type: DiskType,
        preallocate: u64,
        memory_map_max_size_mb: u32,
    },
    /// Remove a volume and its backing files.
    DeleteVolume {
        volume_id: VolumeId,
    },
    /// Report the reclaimable garbage ratio of a volume.
    VacuumCheck {
        volume_id: VolumeId,
    },
    /// Rewrite the volume dropping deleted needles.
    VacuumCompact {
        volume_id: VolumeId,
        preallocate: u64,
    },
    /// Atomically switch to the compacted copy.
    VacuumCommit {
        volume_id: VolumeId,
    },
}

/// Volume-server replies.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum VolumeServerResponse {
    Ok,
    Error(MasterError),
    VacuumCheck { garbage_ratio: f64 },
}
