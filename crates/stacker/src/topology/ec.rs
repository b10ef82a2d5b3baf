//! Erasure-coded shard location index.
//!
//! The master only tracks where EC shards live so `LookupEcVolume` can
//! answer; encoding and rebuild are the volume servers' business.

use std::collections::BTreeMap;

use dashmap::DashMap;

use haystack_proto::request::EcShardInfo;
use haystack_proto::VolumeId;

#[derive(Debug, Default, Clone)]
struct EcVolumeLocations {
    collection: String,
    /// shard id → hosting node ids.
    shards: BTreeMap<u32, Vec<String>>,
}

/// Shard locations for every EC volume, rebuilt from heartbeats.
#[derive(Default)]
pub struct EcShardIndex {
    volumes: DashMap<VolumeId, EcVolumeLocations>,
}

impl EcShardIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Apply one server's reported shard inventory. The report is
    /// authoritative for that server: shards it no longer lists are
    /// dropped from its entries.
    pub fn register_server(&self, node: &str, shards: &[EcShardInfo]) {
        // Remove this node everywhere first, then re-add what it reports.
        self.volumes.retain(|_, locations| {
            locations
                .shards
                .values_mut()
                .for_each(|nodes| nodes.retain(|n| n != node));
            locations.shards.retain(|_, nodes| !nodes.is_empty());
            !locations.shards.is_empty()
        });

        for info in shards {
            let mut entry = self.volumes.entry(info.volume_id).or_default();
            entry.collection = info.collection.clone();
            for shard_id in &info.shard_ids {
                let nodes = entry.shards.entry(*shard_id).or_default();
                if !nodes.iter().any(|n| n == node) {
                    nodes.push(node.to_string());
                }
            }
        }
    }

    /// Shard → node-id map for one EC volume, or None if unknown.
    pub fn lookup(&self, vid: VolumeId) -> Option<Vec<(u32, Vec<String>)>> {
        self.volumes.get(&vid).map(|locations| {
            locations
                .shards
                .iter()
                .map(|(shard, nodes)| (*shard, nodes.clone()))
                .collect()
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use haystack_proto::DiskType;

    fn shard_info(vid: u32, shard_ids: Vec<u32>) -> EcShardInfo {
        EcShardInfo {
            volume_id: VolumeId(vid),
            collection: String::new(),
            shard_ids,
            disk_type: DiskType::Hdd,
        }
    }

    #[test]
    fn test_lookup_unknown_volume() {
        let index = EcShardIndex::new();
        assert!(index.lookup(VolumeId(9)).is_none());
    }

    #[test]
    fn test_register_and_lookup() {
        let index = EcShardIndex::new();
        index.register_server("n1", &[shard_info(5, vec![0, 1])]);
        index.register_server("n2", &[shard_info(5, vec![1, 2])]);

        let shards = index.lookup(VolumeId(5)).unwrap();
        assert_eq!(
            shards,
            vec![
                (0, vec!["n1".to_string()]),
                (1, vec!["n1".to_string(), "n2".to_string()]),
                (2, vec!["n2".to_string()]),
            ]
        );
    }

    #[test]
    fn test_reports_are_authoritative_per_server() {
        let index = EcShardIndex::new();
        index.register_server("n1", &[shard_info(5, vec![0, 1])]);
        // n1 now only holds shard 1.
        index.register_server("n1", &[shard_info(5, vec![1])]);

        let shards = index.lookup(VolumeId(5)).unwrap();
        assert_eq!(shards, vec![(1, vec!["n1".to_string()])]);

        // Dropping everything removes the volume entirely.
        index.register_server("n1", &[]);
        assert!(index.lookup(VolumeId(5)).is_none());
    }
}
