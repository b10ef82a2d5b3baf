//! Growth policy — when does a layout need more writable volumes.

use crate::topology::layout::VolumeLayout;

/// Thresholds driving the periodic scan.
#[derive(Debug, Clone, Copy)]
pub struct GrowthPolicy {
    /// Grow a layout when its writable volume count drops below this.
    pub writable_low_water: usize,
}

impl GrowthPolicy {
    pub fn new(writable_low_water: usize) -> Self {
        Self { writable_low_water }
    }

    /// Whether the layout as a whole is short on writable volumes.
    pub fn should_grow(&self, layout: &VolumeLayout) -> bool {
        layout.writable_count() < self.writable_low_water
    }

    /// Whether one data center is short on writable volumes, even if the
    /// layout looks healthy overall. Used for forced per-DC growth.
    pub fn should_grow_in_data_center(&self, layout: &VolumeLayout, data_center: &str) -> bool {
        layout.writable_count_in_data_center(data_center) < self.writable_low_water
    }

    /// Target volume count for one growth burst: the layout's recent
    /// write-pressure signal, clamped so the burst cannot exceed the
    /// free slots the topology has for it. Returns 0 when there is no
    /// room at all.
    pub fn target_count(&self, layout: &VolumeLayout, free_slots: i64) -> u32 {
        let copy_count = layout.copy_count() as i64;
        let max_by_capacity = (free_slots / copy_count).max(0) as u32;
        layout.last_grow_count().min(max_by_capacity)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::topology::layout::{LayoutIndex, Replica, VolumeLayoutKey};
    use haystack_proto::{DiskType, ReplicaPlacement, Ttl, VolumeId};

    fn layout(replication: &str) -> std::sync::Arc<VolumeLayout> {
        LayoutIndex::new().get(&VolumeLayoutKey {
            collection: String::new(),
            replica_placement: ReplicaPlacement::parse(replication).unwrap(),
            ttl: Ttl::NONE,
            disk_type: DiskType::Hdd,
        })
    }

    fn fill_writables(vl: &VolumeLayout, n: u32, dc: &str) {
        for vid in 1..=n {
            vl.add_volume(
                VolumeId(vid),
                vec![Replica {
                    node: format!("n{}", vid),
                    data_center: dc.to_string(),
                }],
            );
        }
    }

    #[test]
    fn test_should_grow_below_low_water() {
        let policy = GrowthPolicy::new(7);
        let vl = layout("000");
        assert!(policy.should_grow(&vl));
        fill_writables(&vl, 7, "dc1");
        assert!(!policy.should_grow(&vl));
    }

    #[test]
    fn test_per_dc_shortage_detected() {
        let policy = GrowthPolicy::new(2);
        let vl = layout("000");
        fill_writables(&vl, 3, "dc1");
        assert!(!policy.should_grow(&vl));
        assert!(!policy.should_grow_in_data_center(&vl, "dc1"));
        assert!(policy.should_grow_in_data_center(&vl, "dc2"));
    }

    #[test]
    fn test_target_count_clamped_by_capacity() {
        let policy = GrowthPolicy::new(7);
        let vl = layout("001"); // 2 copies
        vl.set_last_grow_count(7);

        assert_eq!(policy.target_count(&vl, 100), 7);
        assert_eq!(policy.target_count(&vl, 6), 3);
        assert_eq!(policy.target_count(&vl, 1), 0);
        assert_eq!(policy.target_count(&vl, 0), 0);
    }

    #[test]
    fn test_target_count_at_least_one_when_room() {
        let policy = GrowthPolicy::new(7);
        let vl = layout("000");
        // No pressure signal recorded yet.
        assert_eq!(policy.target_count(&vl, 5), 1);
    }
}
