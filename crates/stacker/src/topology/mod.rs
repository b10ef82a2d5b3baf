//! Cluster topology: DataCenter → Rack → DataNode → per-disk usage.
//!
//! The tree lives behind a single `RwLock` at the root with the capacity
//! counters updated under it. Readers that need to search the tree (the
//! placement planner, the `VolumeList` RPC) take a [`TopologyInfo`]
//! snapshot instead of holding the lock, so no reader ever spans network
//! I/O. The cluster-monotonic volume id sequence also lives here: ids
//! are handed out before dispatch and abandoned on failure, never reused.

pub mod ec;
pub mod layout;

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU32, Ordering};

use tokio::sync::RwLock;
use tracing::info;

use haystack_proto::request::HeartbeatRequest;
use haystack_proto::topology_info::{
    DataCenterInfo, DataNodeInfo, DiskUsageInfo, RackInfo, TopologyInfo,
};
use haystack_proto::{DiskType, Location, VolumeId};

use crate::growth::VolumeGrowOption;

#[derive(Debug, Clone, Default)]
struct DiskUsage {
    max_volume_count: i64,
    volume_count: i64,
    ec_shard_count: i64,
}

impl DiskUsage {
    fn free_volume_count(&self) -> i64 {
        self.max_volume_count - self.volume_count - self.ec_shard_count
    }
}

#[derive(Debug, Clone, Default)]
struct DataNode {
    id: String,
    url: String,
    public_url: String,
    grpc_port: u32,
    disks: HashMap<DiskType, DiskUsage>,
}

#[derive(Debug, Default)]
struct Rack {
    nodes: BTreeMap<String, DataNode>,
}

#[derive(Debug, Default)]
struct DataCenter {
    racks: BTreeMap<String, Rack>,
}

#[derive(Default)]
struct TopoInner {
    data_centers: BTreeMap<String, DataCenter>,
    /// node id → (data center, rack), for O(1) counter updates.
    node_index: HashMap<String, (String, String)>,
}

impl TopoInner {
    fn node_mut(&mut self, node_id: &str) -> Option<&mut DataNode> {
        let (dc, rack) = self.node_index.get(node_id)?.clone();
        self.data_centers
            .get_mut(&dc)?
            .racks
            .get_mut(&rack)?
            .nodes
            .get_mut(node_id)
    }

    fn node(&self, node_id: &str) -> Option<&DataNode> {
        let (dc, rack) = self.node_index.get(node_id)?;
        self.data_centers
            .get(dc)?
            .racks
            .get(rack)?
            .nodes
            .get(node_id)
    }
}

/// The in-memory topology owned by the master leader.
///
/// Discarded wholesale on demotion; the next leader rebuilds it from
/// volume-server heartbeats.
pub struct Topology {
    inner: RwLock<TopoInner>,
    vid_sequence: AtomicU32,
}

impl Default for Topology {
    fn default() -> Self {
        Self::new()
    }
}

impl Topology {
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(TopoInner::default()),
            vid_sequence: AtomicU32::new(0),
        }
    }

    /// Allocate the next cluster-wide volume id.
    pub fn next_volume_id(&self) -> VolumeId {
        VolumeId(self.vid_sequence.fetch_add(1, Ordering::SeqCst) + 1)
    }

    /// Advance the id sequence past an id observed in a heartbeat, so a
    /// freshly elected leader never re-issues a live id.
    pub fn observe_volume_id(&self, vid: VolumeId) {
        self.vid_sequence.fetch_max(vid.0, Ordering::SeqCst);
    }

    /// Upsert a volume server and its capacity from a heartbeat.
    ///
    /// The reported inventory is authoritative: per-disk volume counts
    /// are recomputed from it, which also heals any drift after failed
    /// growth bursts.
    pub async fn register_node(&self, hb: &HeartbeatRequest) {
        let node_id = hb.node_id();
        let mut disks: HashMap<DiskType, DiskUsage> = HashMap::new();
        for (disk_type, max) in &hb.max_volume_counts {
            disks.entry(disk_type.clone()).or_default().max_volume_count = *max;
        }
        for v in &hb.volumes {
            disks.entry(v.disk_type.clone()).or_default().volume_count += 1;
        }
        for shards in &hb.ec_shards {
            disks
                .entry(shards.disk_type.clone())
                .or_default()
                .ec_shard_count += shards.shard_ids.len() as i64;
        }

        let mut inner = self.inner.write().await;
        let known = inner.node_index.contains_key(&node_id);
        if !known {
            info!(
                "volume server {} joined ({}/{})",
                node_id, hb.data_center, hb.rack
            );
        }
        inner
            .node_index
            .insert(node_id.clone(), (hb.data_center.clone(), hb.rack.clone()));
        let dc = inner.data_centers.entry(hb.data_center.clone()).or_default();
        let rack = dc.racks.entry(hb.rack.clone()).or_default();
        rack.nodes.insert(
            node_id.clone(),
            DataNode {
                id: node_id,
                url: format!("{}:{}", hb.ip, hb.port),
                public_url: hb.public_url.clone(),
                grpc_port: hb.grpc_port,
                disks,
            },
        );
    }

    pub async fn data_center_exists(&self, name: &str) -> bool {
        self.inner.read().await.data_centers.contains_key(name)
    }

    /// Data center identifiers in stable (sorted) order.
    pub async fn list_data_centers(&self) -> Vec<String> {
        self.inner.read().await.data_centers.keys().cloned().collect()
    }

    /// Free volume slots across the nodes a grow option may place on.
    /// Counts slots, not replica sets.
    pub async fn available_space_for(&self, option: &VolumeGrowOption) -> i64 {
        let inner = self.inner.read().await;
        let mut total = 0i64;
        for (dc_name, dc) in &inner.data_centers {
            if !option.data_center.is_empty() && dc_name != &option.data_center {
                continue;
            }
            for (rack_name, rack) in &dc.racks {
                if !option.rack.is_empty() && rack_name != &option.rack {
                    continue;
                }
                for (node_id, node) in &rack.nodes {
                    if !option.data_node.is_empty() && node_id != &option.data_node {
                        continue;
                    }
                    if let Some(disk) = node.disks.get(&option.disk_type) {
                        total += disk.free_volume_count().max(0);
                    }
                }
            }
        }
        total
    }

    /// Record one new replica on a node's disk.
    pub async fn register_volume(&self, node_id: &str, disk_type: &DiskType) {
        let mut inner = self.inner.write().await;
        if let Some(node) = inner.node_mut(node_id) {
            node.disks.entry(disk_type.clone()).or_default().volume_count += 1;
        }
    }

    /// Drop one replica from a node's disk.
    pub async fn unregister_volume(&self, node_id: &str, disk_type: &DiskType) {
        let mut inner = self.inner.write().await;
        if let Some(node) = inner.node_mut(node_id) {
            let usage = node.disks.entry(disk_type.clone()).or_default();
            usage.volume_count = (usage.volume_count - 1).max(0);
        }
    }

    /// Resolve node ids to client-facing locations, preserving order.
    /// Unknown nodes are skipped.
    pub async fn node_locations(&self, node_ids: &[String]) -> Vec<Location> {
        let inner = self.inner.read().await;
        node_ids
            .iter()
            .filter_map(|id| inner.node(id))
            .map(|node| {
                let (dc, _) = inner.node_index[&node.id].clone();
                Location {
                    url: node.url.clone(),
                    public_url: node.public_url.clone(),
                    data_center: dc,
                    grpc_port: node.grpc_port,
                }
            })
            .collect()
    }

    /// Aggregate max volume count across the whole cluster.
    pub async fn max_volume_count(&self) -> i64 {
        self.inner
            .read()
            .await
            .data_centers
            .values()
            .flat_map(|dc| dc.racks.values())
            .flat_map(|r| r.nodes.values())
            .flat_map(|n| n.disks.values())
            .map(|d| d.max_volume_count)
            .sum()
    }

    /// Full snapshot of the tree, for `VolumeList` and the planner.
    pub async fn to_topology_info(&self) -> TopologyInfo {
        let inner = self.inner.read().await;
        TopologyInfo {
            data_centers: inner
                .data_centers
                .iter()
                .map(|(dc_name, dc)| DataCenterInfo {
                    id: dc_name.clone(),
                    racks: dc
                        .racks
                        .iter()
                        .map(|(rack_name, rack)| RackInfo {
                            id: rack_name.clone(),
                            nodes: rack
                                .nodes
                                .values()
                                .map(|node| {
                                    let mut disks: Vec<DiskUsageInfo> = node
                                        .disks
                                        .iter()
                                        .map(|(disk_type, usage)| DiskUsageInfo {
                                            disk_type: disk_type.clone(),
                                            max_volume_count: usage.max_volume_count,
                                            volume_count: usage.volume_count,
                                            ec_shard_count: usage.ec_shard_count,
                                        })
                                        .collect();
                                    disks.sort_by_key(|d| d.disk_type.to_string());
                                    DataNodeInfo {
                                        id: node.id.clone(),
                                        url: node.url.clone(),
                                        public_url: node.public_url.clone(),
                                        grpc_port: node.grpc_port,
                                        disks,
                                    }
                                })
                                .collect(),
                        })
                        .collect(),
                })
                .collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use haystack_proto::request::HeartbeatRequest;

    fn heartbeat(ip: &str, dc: &str, rack: &str, max_hdd: i64) -> HeartbeatRequest {
        HeartbeatRequest {
            ip: ip.to_string(),
            port: 8080,
            public_url: format!("{}:8080", ip),
            grpc_port: 18080,
            data_center: dc.to_string(),
            rack: rack.to_string(),
            max_volume_counts: vec![(DiskType::Hdd, max_hdd)],
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_register_node_builds_tree() {
        let topo = Topology::new();
        topo.register_node(&heartbeat("10.0.0.1", "dc1", "rack1", 10))
            .await;
        topo.register_node(&heartbeat("10.0.0.2", "dc2", "rack1", 10))
            .await;

        assert!(topo.data_center_exists("dc1").await);
        assert!(!topo.data_center_exists("dc3").await);
        assert_eq!(topo.list_data_centers().await, vec!["dc1", "dc2"]);
        assert_eq!(topo.max_volume_count().await, 20);
    }

    #[tokio::test]
    async fn test_register_volume_moves_counters() {
        let topo = Topology::new();
        topo.register_node(&heartbeat("10.0.0.1", "dc1", "rack1", 10))
            .await;

        let option = VolumeGrowOption::default();
        assert_eq!(topo.available_space_for(&option).await, 10);

        topo.register_volume("10.0.0.1:8080", &DiskType::Hdd).await;
        topo.register_volume("10.0.0.1:8080", &DiskType::Hdd).await;
        assert_eq!(topo.available_space_for(&option).await, 8);

        topo.unregister_volume("10.0.0.1:8080", &DiskType::Hdd).await;
        assert_eq!(topo.available_space_for(&option).await, 9);
    }

    #[tokio::test]
    async fn test_available_space_honors_pins() {
        let topo = Topology::new();
        topo.register_node(&heartbeat("10.0.0.1", "dc1", "rack1", 10))
            .await;
        topo.register_node(&heartbeat("10.0.0.2", "dc2", "rack1", 4))
            .await;

        let mut option = VolumeGrowOption::default();
        assert_eq!(topo.available_space_for(&option).await, 14);
        option.data_center = "dc2".to_string();
        assert_eq!(topo.available_space_for(&option).await, 4);
        option.data_node = "10.0.0.1:8080".to_string();
        assert_eq!(topo.available_space_for(&option).await, 0);
    }

    #[tokio::test]
    async fn test_vid_sequence_never_reissues_observed_ids() {
        let topo = Topology::new();
        assert_eq!(topo.next_volume_id(), VolumeId(1));
        topo.observe_volume_id(VolumeId(57));
        assert_eq!(topo.next_volume_id(), VolumeId(58));
    }
}
