//! Volume growth: deciding when new writable volumes are needed, where
//! to place them, and driving their creation.

pub mod controller;
pub mod executor;
pub mod planner;
pub mod policy;

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};

use haystack_proto::{DiskType, ReplicaPlacement, Ttl};

use crate::topology::layout::VolumeLayoutKey;

/// Everything needed to place and create one kind of volume.
///
/// Two grow requests are considered the same work iff their options are
/// equal; `count` and `reason` are informational.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct VolumeGrowOption {
    pub collection: String,
    pub replica_placement: ReplicaPlacement,
    pub ttl: Ttl,
    pub disk_type: DiskType,
    /// Locality pins; empty means unpinned.
    pub data_center: String,
    pub rack: String,
    pub data_node: String,
    pub preallocate: u64,
    pub memory_map_max_size_mb: u32,
}

impl VolumeGrowOption {
    pub fn layout_key(&self) -> VolumeLayoutKey {
        VolumeLayoutKey {
            collection: self.collection.clone(),
            replica_placement: self.replica_placement,
            ttl: self.ttl,
            disk_type: self.disk_type.clone(),
        }
    }

    /// Stable fingerprint used to seed the planner's RNG, so a replayed
    /// request reproduces its placement decisions.
    pub fn fingerprint(&self) -> u64 {
        let mut hasher = DefaultHasher::new();
        self.hash(&mut hasher);
        hasher.finish()
    }
}

/// An intent to create `count` new writable volumes for one layout.
#[derive(Debug, Clone)]
pub struct VolumeGrowRequest {
    pub option: VolumeGrowOption,
    pub count: u32,
    /// Forced requests skip the "still needed?" re-check on accept.
    pub force: bool,
    pub reason: &'static str,
}
