//! Volume layouts — the unit of growth policy.
//!
//! A layout groups the interchangeable volumes sharing one
//! `(collection, replica placement, ttl, disk type)` key. Each layout
//! tracks which of its volumes still accept writes, where every replica
//! lives, and the per-layout grow-request guard that keeps at most one
//! growth in flight.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, RwLock};

use dashmap::DashMap;

use haystack_proto::{DiskType, ReplicaPlacement, Ttl, VolumeId, VolumeInfo};

use crate::growth::VolumeGrowOption;

/// Identity of one volume layout.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct VolumeLayoutKey {
    pub collection: String,
    pub replica_placement: ReplicaPlacement,
    pub ttl: Ttl,
    pub disk_type: DiskType,
}

impl VolumeLayoutKey {
    pub fn from_volume(info: &VolumeInfo) -> Self {
        Self {
            collection: info.collection.clone(),
            replica_placement: info.replica_placement,
            ttl: info.ttl,
            disk_type: info.disk_type.clone(),
        }
    }

    /// Base grow option for this layout; the caller fills locality pins
    /// and sizing from its own configuration.
    pub fn to_grow_option(&self, preallocate: u64, memory_map_max_size_mb: u32) -> VolumeGrowOption {
        VolumeGrowOption {
            collection: self.collection.clone(),
            replica_placement: self.replica_placement,
            ttl: self.ttl,
            disk_type: self.disk_type.clone(),
            data_center: String::new(),
            rack: String::new(),
            data_node: String::new(),
            preallocate,
            memory_map_max_size_mb,
        }
    }
}

/// One physical replica of a volume.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Replica {
    /// Hosting node id (`ip:port`).
    pub node: String,
    pub data_center: String,
}

/// Aggregate layout statistics, from the latest heartbeats.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LayoutStats {
    pub used_size: u64,
    pub file_count: u64,
}

#[derive(Default)]
struct LayoutInner {
    /// Volumes currently accepting writes, in registration order.
    writables: Vec<VolumeId>,
    locations: HashMap<VolumeId, Vec<Replica>>,
    /// Replicas marked read-only. One read-only replica makes the whole
    /// volume unwritable.
    readonly: HashMap<VolumeId, Vec<String>>,
    stats: HashMap<VolumeId, VolumeStats>,
}

#[derive(Debug, Clone, Copy, Default)]
struct VolumeStats {
    size: u64,
    file_count: u64,
    deleted_byte_count: u64,
}

impl LayoutInner {
    fn is_fully_writable(&self, vid: VolumeId, copy_count: usize) -> bool {
        let replicas = match self.locations.get(&vid) {
            Some(r) => r,
            None => return false,
        };
        replicas.len() >= copy_count && self.readonly.get(&vid).map_or(true, |r| r.is_empty())
    }

    fn refresh_writable(&mut self, vid: VolumeId, copy_count: usize) {
        let writable = self.is_fully_writable(vid, copy_count);
        let listed = self.writables.contains(&vid);
        if writable && !listed {
            self.writables.push(vid);
        } else if !writable && listed {
            self.writables.retain(|w| *w != vid);
        }
    }
}

/// State of one layout, shared between the scanner, the dispatcher, the
/// executor, and the RPC handlers.
pub struct VolumeLayout {
    key: VolumeLayoutKey,
    inner: RwLock<LayoutInner>,
    /// At most one growth request per layout may be in flight. `add` is
    /// idempotent; every `add` must be paired with exactly one `done`,
    /// including on the discard paths.
    grow_request: AtomicBool,
    last_grow_count: AtomicU32,
}

impl VolumeLayout {
    fn new(key: VolumeLayoutKey) -> Self {
        Self {
            key,
            inner: RwLock::new(LayoutInner::default()),
            grow_request: AtomicBool::new(false),
            last_grow_count: AtomicU32::new(0),
        }
    }

    pub fn key(&self) -> &VolumeLayoutKey {
        &self.key
    }

    pub fn copy_count(&self) -> usize {
        self.key.replica_placement.copy_count()
    }

    // ─── Grow-request guard ───────────────────────────────────────────────

    pub fn has_grow_request(&self) -> bool {
        self.grow_request.load(Ordering::SeqCst)
    }

    pub fn add_grow_request(&self) {
        self.grow_request.store(true, Ordering::SeqCst);
    }

    pub fn done_grow_request(&self) {
        self.grow_request.store(false, Ordering::SeqCst);
    }

    /// Target volume count for the next growth burst, always ≥ 1.
    pub fn last_grow_count(&self) -> u32 {
        self.last_grow_count.load(Ordering::SeqCst).max(1)
    }

    pub fn set_last_grow_count(&self, count: u32) {
        self.last_grow_count.store(count, Ordering::SeqCst);
    }

    // ─── Membership ───────────────────────────────────────────────────────

    /// Record (or refresh) one replica from a heartbeat.
    pub fn register_volume(&self, info: &VolumeInfo, node: &str, data_center: &str) {
        let copy_count = self.copy_count();
        let mut inner = self.inner.write().unwrap();
        let replicas = inner.locations.entry(info.id).or_default();
        if !replicas.iter().any(|r| r.node == node) {
            replicas.push(Replica {
                node: node.to_string(),
                data_center: data_center.to_string(),
            });
        }
        inner.stats.insert(
            info.id,
            VolumeStats {
                size: info.size,
                file_count: info.file_count,
                deleted_byte_count: info.deleted_byte_count,
            },
        );
        let readonly = inner.readonly.entry(info.id).or_default();
        let marked = readonly.iter().any(|n| n == node);
        if info.read_only && !marked {
            readonly.push(node.to_string());
        } else if !info.read_only && marked {
            readonly.retain(|n| n != node);
        }
        inner.refresh_writable(info.id, copy_count);
    }

    /// Register a freshly grown volume: all replicas at once, writable.
    pub fn add_volume(&self, vid: VolumeId, replicas: Vec<Replica>) {
        let copy_count = self.copy_count();
        let mut inner = self.inner.write().unwrap();
        inner.locations.insert(vid, replicas);
        inner.readonly.remove(&vid);
        inner.stats.entry(vid).or_default();
        inner.refresh_writable(vid, copy_count);
    }

    /// Drop one replica (server lost it or reported it gone).
    pub fn unregister_volume(&self, vid: VolumeId, node: &str) {
        let copy_count = self.copy_count();
        let mut inner = self.inner.write().unwrap();
        let now_empty = match inner.locations.get_mut(&vid) {
            Some(replicas) => {
                replicas.retain(|r| r.node != node);
                replicas.is_empty()
            }
            None => false,
        };
        if now_empty {
            inner.locations.remove(&vid);
            inner.readonly.remove(&vid);
            inner.stats.remove(&vid);
        } else if let Some(readonly) = inner.readonly.get_mut(&vid) {
            readonly.retain(|n| n != node);
        }
        inner.refresh_writable(vid, copy_count);
    }

    // ─── Read-only transitions ────────────────────────────────────────────

    pub fn set_volume_readonly(&self, node: &str, vid: VolumeId) {
        let copy_count = self.copy_count();
        let mut inner = self.inner.write().unwrap();
        let readonly = inner.readonly.entry(vid).or_default();
        if !readonly.iter().any(|n| n == node) {
            readonly.push(node.to_string());
        }
        inner.refresh_writable(vid, copy_count);
    }

    pub fn set_volume_writable(&self, node: &str, vid: VolumeId) {
        let copy_count = self.copy_count();
        let mut inner = self.inner.write().unwrap();
        if let Some(readonly) = inner.readonly.get_mut(&vid) {
            readonly.retain(|n| n != node);
        }
        inner.refresh_writable(vid, copy_count);
    }

    /// Take the volume out of rotation while it is being compacted.
    pub fn freeze_for_vacuum(&self, vid: VolumeId) {
        let mut inner = self.inner.write().unwrap();
        inner.writables.retain(|w| *w != vid);
    }

    /// Put a compacted volume back, if its replicas allow writes.
    pub fn thaw_after_vacuum(&self, vid: VolumeId) {
        let copy_count = self.copy_count();
        let mut inner = self.inner.write().unwrap();
        inner.refresh_writable(vid, copy_count);
    }

    // ─── Queries ──────────────────────────────────────────────────────────

    pub fn writable_count(&self) -> usize {
        self.inner.read().unwrap().writables.len()
    }

    /// Writable volumes with at least one replica in `data_center`.
    pub fn writable_count_in_data_center(&self, data_center: &str) -> usize {
        let inner = self.inner.read().unwrap();
        inner
            .writables
            .iter()
            .filter(|vid| {
                inner
                    .locations
                    .get(vid)
                    .map_or(false, |replicas| {
                        replicas.iter().any(|r| r.data_center == data_center)
                    })
            })
            .count()
    }

    pub fn is_writable(&self, vid: VolumeId) -> bool {
        self.inner.read().unwrap().writables.contains(&vid)
    }

    pub fn locations(&self, vid: VolumeId) -> Option<Vec<Replica>> {
        self.inner.read().unwrap().locations.get(&vid).cloned()
    }

    pub fn volume_ids(&self) -> Vec<VolumeId> {
        self.inner.read().unwrap().locations.keys().copied().collect()
    }

    pub fn garbage_ratio(&self, vid: VolumeId) -> f64 {
        let inner = self.inner.read().unwrap();
        match inner.stats.get(&vid) {
            Some(s) if s.size > 0 => s.deleted_byte_count as f64 / s.size as f64,
            _ => 0.0,
        }
    }

    pub fn stats(&self) -> LayoutStats {
        let inner = self.inner.read().unwrap();
        inner.stats.values().fold(LayoutStats::default(), |acc, s| {
            LayoutStats {
                used_size: acc.used_size + s.size,
                file_count: acc.file_count + s.file_count,
            }
        })
    }
}

/// Concurrent index of every layout, keyed by [`VolumeLayoutKey`].
/// Layouts are created on demand when first referenced by a heartbeat or
/// an RPC and live for the process lifetime of the leader.
#[derive(Default)]
pub struct LayoutIndex {
    layouts: DashMap<VolumeLayoutKey, Arc<VolumeLayout>>,
    /// Last reported inventory per node, for heartbeat reconciliation.
    node_volumes: DashMap<String, Vec<(VolumeLayoutKey, VolumeId)>>,
}

impl LayoutIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &VolumeLayoutKey) -> Arc<VolumeLayout> {
        self.layouts
            .entry(key.clone())
            .or_insert_with(|| Arc::new(VolumeLayout::new(key.clone())))
            .clone()
    }

    pub fn list_all(&self) -> Vec<(VolumeLayoutKey, Arc<VolumeLayout>)> {
        self.layouts
            .iter()
            .map(|e| (e.key().clone(), e.value().clone()))
            .collect()
    }

    /// Replica set of a volume within a collection, searching the
    /// collection's layouts. Cardinality is small enough for a scan.
    pub fn lookup(&self, collection: &str, vid: VolumeId) -> Option<Vec<Replica>> {
        self.layouts.iter().find_map(|e| {
            if e.key().collection != collection {
                return None;
            }
            e.value().locations(vid)
        })
    }

    /// Apply one node's heartbeat inventory. The report is authoritative
    /// for that node: volumes it stops reporting lose their replica
    /// there, which drops the volume from the writable set until the
    /// replica set is whole again.
    pub fn sync_node_volumes(&self, node: &str, data_center: &str, volumes: &[VolumeInfo]) {
        let reported: Vec<(VolumeLayoutKey, VolumeId)> = volumes
            .iter()
            .map(|v| (VolumeLayoutKey::from_volume(v), v.id))
            .collect();

        for v in volumes {
            self.get(&VolumeLayoutKey::from_volume(v))
                .register_volume(v, node, data_center);
        }

        let previous = self.node_volumes.insert(node.to_string(), reported.clone());
        if let Some(previous) = previous {
            for (key, vid) in previous {
                if !reported.contains(&(key.clone(), vid)) {
                    self.get(&key).unregister_volume(vid, node);
                }
            }
        }
    }
}
