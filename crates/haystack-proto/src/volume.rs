/// Volume identifiers, storage classes, and per-volume heartbeat records.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::MasterError;
use crate::placement::ReplicaPlacement;
use crate::ttl::Ttl;

/// Cluster-wide unique volume identifier.
///
/// Assigned monotonically by the master leader. An id handed out for a
/// placement that later fails is abandoned, never reused.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
pub struct VolumeId(pub u32);

impl VolumeId {
    pub fn next(self) -> VolumeId {
        VolumeId(self.0 + 1)
    }
}

impl fmt::Display for VolumeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for VolumeId {
    type Err = MasterError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.parse::<u32>()
            .map(VolumeId)
            .map_err(|_| MasterError::InvalidVolumeId(s.to_string()))
    }
}

/// Storage class of the disk backing a volume.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum DiskType {
    #[default]
    Hdd,
    Ssd,
    /// Operator-defined storage class (e.g. "nvme", "archive").
    Tag(String),
}

impl DiskType {
    /// Parse a disk type string. Empty means the default (hdd).
    pub fn parse(s: &str) -> DiskType {
        match s.to_ascii_lowercase().as_str() {
            "" | "hdd" => DiskType::Hdd,
            "ssd" => DiskType::Ssd,
            _ => DiskType::Tag(s.to_string()),
        }
    }
}

impl fmt::Display for DiskType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DiskType::Hdd => write!(f, "hdd"),
            DiskType::Ssd => write!(f, "ssd"),
            DiskType::Tag(t) => write!(f, "{}", t),
        }
    }
}

/// One replica's network location, as reported to clients.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Location {
    pub url: String,
    pub public_url: String,
    pub data_center: String,
    pub grpc_port: u32,
}

/// Per-volume state carried by volume-server heartbeats.
///
/// Feeds the layout aggregate stats and the vacuum garbage ratios.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct VolumeInfo {
    pub id: VolumeId,
    pub collection: String,
    pub replica_placement: ReplicaPlacement,
    pub ttl: Ttl,
    pub disk_type: DiskType,
    /// Total bytes occupied, live and deleted needles included.
    pub size: u64,
    pub file_count: u64,
    pub delete_count: u64,
    /// Bytes held by deleted needles, reclaimable by vacuum.
    pub deleted_byte_count: u64,
    pub read_only: bool,
}

impl VolumeInfo {
    /// Fraction of the volume occupied by deleted needles.
    pub fn garbage_ratio(&self) -> f64 {
        if self.size == 0 {
            return 0.0;
        }
        self.deleted_byte_count as f64 / self.size as f64
    }
}

/// Newly created volume and its replica locations, broadcast to every
/// client holding a keep-connected stream.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VolumeLocation {
    pub vid: VolumeId,
    pub replicas: Vec<Location>,
}
