/// Serializable topology snapshot.
///
/// Returned by the `VolumeList` RPC and consumed by the placement planner,
/// which works on snapshots so it never holds the live topology lock
/// across its search.

use serde::{Deserialize, Serialize};

use crate::volume::DiskType;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TopologyInfo {
    pub data_centers: Vec<DataCenterInfo>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DataCenterInfo {
    pub id: String,
    pub racks: Vec<RackInfo>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RackInfo {
    pub id: String,
    pub nodes: Vec<DataNodeInfo>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DataNodeInfo {
    /// Stable node identifier, `ip:port`.
    pub id: String,
    pub url: String,
    pub public_url: String,
    pub grpc_port: u32,
    pub disks: Vec<DiskUsageInfo>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DiskUsageInfo {
    pub disk_type: DiskType,
    pub max_volume_count: i64,
    pub volume_count: i64,
    pub ec_shard_count: i64,
}

impl DiskUsageInfo {
    /// Slots still free for new volume replicas on this disk.
    pub fn free_volume_count(&self) -> i64 {
        self.max_volume_count - self.volume_count - self.ec_shard_count
    }
}

impl DataNodeInfo {
    pub fn free_volume_count(&self, disk_type: &DiskType) -> i64 {
        self.disks
            .iter()
            .filter(|d| &d.disk_type == disk_type)
            .map(|d| d.free_volume_count())
            .sum()
    }
}

impl TopologyInfo {
    /// Aggregate max volume count across every disk in the cluster.
    pub fn max_volume_count(&self) -> i64 {
        self.data_centers
            .iter()
            .flat_map(|dc| &dc.racks)
            .flat_map(|r| &r.nodes)
            .flat_map(|n| &n.disks)
            .map(|d| d.max_volume_count)
            .sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_free_volume_count() {
        let disk = DiskUsageInfo {
            disk_type: DiskType::Hdd,
            max_volume_count: 10,
            volume_count: 3,
            ec_shard_count: 2,
        };
        assert_eq!(disk.free_volume_count(), 5);
    }

    #[test]
    fn test_node_free_count_filters_disk_type() {
        let node = DataNodeInfo {
            id: "10.0.0.1:8080".into(),
            disks: vec![
                DiskUsageInfo {
                    disk_type: DiskType::Hdd,
                    max_volume_count: 10,
                    volume_count: 4,
                    ec_shard_count: 0,
                },
                DiskUsageInfo {
                    disk_type: DiskType::Ssd,
                    max_volume_count: 8,
                    volume_count: 1,
                    ec_shard_count: 0,
                },
            ],
            ..Default::default()
        };
        assert_eq!(node.free_volume_count(&DiskType::Hdd), 6);
        assert_eq!(node.free_volume_count(&DiskType::Ssd), 7);
        assert_eq!(node.free_volume_count(&DiskType::Tag("nvme".into())), 0);
    }
}
