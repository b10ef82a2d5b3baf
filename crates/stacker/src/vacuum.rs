//! Vacuum scheduling.
//!
//! The master decides *which* volumes are worth compacting and drives
//! the check → compact → commit sequence against every replica; the
//! actual on-disk rewrite happens on the volume servers. Only one sweep
//! runs at a time, and compactions are limited per server so a sweep
//! cannot saturate a node's disks.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::Semaphore;
use tracing::{debug, info, warn};

use haystack_core::transport::VolumeServerTransport;
use haystack_proto::VolumeId;

use crate::topology::layout::{LayoutIndex, Replica, VolumeLayout};

pub struct VacuumController {
    enabled: AtomicBool,
    running: AtomicBool,
    max_parallel_per_server: usize,
    preallocate: u64,
}

impl VacuumController {
    pub fn new(max_parallel_per_server: usize, preallocate: u64) -> Self {
        Self {
            enabled: AtomicBool::new(true),
            running: AtomicBool::new(false),
            max_parallel_per_server: max_parallel_per_server.max(1),
            preallocate,
        }
    }

    /// Idempotent local toggle; not leader-gated.
    pub fn enable(&self) {
        self.enabled.store(true, Ordering::SeqCst);
    }

    pub fn disable(&self) {
        self.enabled.store(false, Ordering::SeqCst);
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::SeqCst)
    }

    /// One sweep over the layouts, or over a single pinned volume or
    /// collection. Best-effort: failures are logged and the volume is
    /// put back into rotation.
    pub async fn sweep(
        self: Arc<Self>,
        layouts: Arc<LayoutIndex>,
        transport: Arc<dyn VolumeServerTransport>,
        garbage_threshold: f64,
        volume_filter: Option<VolumeId>,
        collection_filter: Option<String>,
    ) {
        if !self.is_enabled() {
            info!("vacuum is disabled, skipping sweep");
            return;
        }
        if self.running.swap(true, Ordering::SeqCst) {
            info!("vacuum sweep already running");
            return;
        }

        let mut candidates: Vec<(Arc<VolumeLayout>, VolumeId, Vec<Replica>)> = Vec::new();
        for (key, vl) in layouts.list_all() {
            if let Some(collection) = &collection_filter {
                if &key.collection != collection {
                    continue;
                }
            }
            for vid in vl.volume_ids() {
                if let Some(filter) = volume_filter {
                    if vid != filter {
                        continue;
                    }
                }
                if vl.garbage_ratio(vid) < garbage_threshold {
                    continue;
                }
                if let Some(replicas) = vl.locations(vid) {
                    candidates.push((vl.clone(), vid, replicas));
                }
            }
        }
        info!(
            "vacuum sweep: {} candidate volumes over threshold {:.2}",
            candidates.len(),
            garbage_threshold
        );

        // One compaction permit pool per server.
        let mut semaphores: HashMap<String, Arc<Semaphore>> = HashMap::new();
        for (_, _, replicas) in &candidates {
            for replica in replicas {
                semaphores
                    .entry(replica.node.clone())
                    .or_insert_with(|| Arc::new(Semaphore::new(self.max_parallel_per_server)));
            }
        }

        let mut tasks = Vec::new();
        for (vl, vid, replicas) in candidates {
            let transport = transport.clone();
            let semaphores: HashMap<String, Arc<Semaphore>> = replicas
                .iter()
                .map(|r| (r.node.clone(), semaphores[&r.node].clone()))
                .collect();
            let preallocate = self.preallocate;
            tasks.push(tokio::spawn(async move {
                vacuum_volume(
                    transport,
                    semaphores,
                    vl,
                    vid,
                    replicas,
                    garbage_threshold,
                    preallocate,
                )
                .await;
            }));
        }
        for task in tasks {
            let _ = task.await;
        }

        self.running.store(false, Ordering::SeqCst);
        info!("vacuum sweep finished");
    }
}

/// Compact one volume on all of its replicas.
async fn vacuum_volume(
    transport: Arc<dyn VolumeServerTransport>,
    semaphores: HashMap<String, Arc<Semaphore>>,
    vl: Arc<VolumeLayout>,
    vid: VolumeId,
    replicas: Vec<Replica>,
    garbage_threshold: f64,
    preallocate: u64,
) {
    // Confirm against the live servers; heartbeat stats may be stale.
    for replica in &replicas {
        match transport.vacuum_check(&replica.node, vid).await {
            Ok(ratio) if ratio >= garbage_threshold => {}
            Ok(ratio) => {
                debug!(
                    "volume {} on {} below threshold ({:.2}), skipping",
                    vid, replica.node, ratio
                );
                return;
            }
            Err(e) => {
                warn!("vacuum check of {} on {} failed: {}", vid, replica.node, e);
                return;
            }
        }
    }

    // Out of rotation while replicas are rewritten.
    vl.freeze_for_vacuum(vid);

    for replica in &replicas {
        let permit = match semaphores[&replica.node].acquire().await {
            Ok(permit) => permit,
            Err(_) => {
                vl.thaw_after_vacuum(vid);
                return;
            }
        };
        let result = transport
            .vacuum_compact(&replica.node, vid, preallocate)
            .await;
        drop(permit);
        if let Err(e) = result {
            warn!("vacuum compact of {} on {} failed: {}", vid, replica.node, e);
            vl.thaw_after_vacuum(vid);
            return;
        }
    }

    for replica in &replicas {
        if let Err(e) = transport.vacuum_commit(&replica.node, vid).await {
            warn!("vacuum commit of {} on {} failed: {}", vid, replica.node, e);
        }
    }

    vl.thaw_after_vacuum(vid);
    info!("vacuumed volume {} on {} replicas", vid, replicas.len());
}

#[cfg(test)]
mod tests {
    use super::*;
    use haystack_core::transport::{MockCall, MockVolumeTransport};
    use haystack_proto::{DiskType, ReplicaPlacement, Ttl, VolumeInfo};

    fn layout_with_garbage(
        layouts: &LayoutIndex,
        vid: u32,
        deleted: u64,
    ) -> Arc<VolumeLayout> {
        let key = crate::topology::layout::VolumeLayoutKey {
            collection: String::new(),
            replica_placement: ReplicaPlacement::parse("000").unwrap(),
            ttl: Ttl::NONE,
            disk_type: DiskType::Hdd,
        };
        let vl = layouts.get(&key);
        let info = VolumeInfo {
            id: VolumeId(vid),
            size: 100,
            deleted_byte_count: deleted,
            ..Default::default()
        };
        vl.register_volume(&info, "n1", "dc1");
        vl
    }

    #[tokio::test]
    async fn test_sweep_compacts_garbage_volumes() {
        let layouts = Arc::new(LayoutIndex::new());
        let vl = layout_with_garbage(&layouts, 1, 50);
        let transport = Arc::new(MockVolumeTransport::new());
        transport.set_garbage_ratio(0.5);
        let vacuum = Arc::new(VacuumController::new(1, 0));

        vacuum
            .sweep(layouts, transport.clone(), 0.3, None, None)
            .await;

        let calls = transport.calls();
        assert!(calls.contains(&MockCall::Compact {
            server: "n1".to_string(),
            volume_id: VolumeId(1)
        }));
        assert!(calls.contains(&MockCall::Commit {
            server: "n1".to_string(),
            volume_id: VolumeId(1)
        }));
        // Back in rotation afterwards.
        assert!(vl.is_writable(VolumeId(1)));
    }

    #[tokio::test]
    async fn test_sweep_skips_clean_volumes() {
        let layouts = Arc::new(LayoutIndex::new());
        layout_with_garbage(&layouts, 1, 10); // 10% garbage
        let transport = Arc::new(MockVolumeTransport::new());
        let vacuum = Arc::new(VacuumController::new(1, 0));

        vacuum.sweep(layouts, transport.clone(), 0.3, None, None).await;
        assert!(transport.calls().is_empty());
    }

    #[tokio::test]
    async fn test_disabled_vacuum_does_nothing() {
        let layouts = Arc::new(LayoutIndex::new());
        layout_with_garbage(&layouts, 1, 90);
        let transport = Arc::new(MockVolumeTransport::new());
        let vacuum = Arc::new(VacuumController::new(1, 0));
        vacuum.disable();

        vacuum
            .clone()
            .sweep(layouts.clone(), transport.clone(), 0.3, None, None)
            .await;
        assert!(transport.calls().is_empty());

        // Re-enabling is idempotent and takes effect.
        vacuum.enable();
        vacuum.enable();
        transport.set_garbage_ratio(0.9);
        vacuum.sweep(layouts, transport.clone(), 0.3, None, None).await;
        assert!(!transport.calls().is_empty());
    }

    #[tokio::test]
    async fn test_stale_heartbeat_ratio_rechecked_live() {
        let layouts = Arc::new(LayoutIndex::new());
        layout_with_garbage(&layouts, 1, 90);
        let transport = Arc::new(MockVolumeTransport::new());
        // Live server disagrees with the heartbeat stats.
        transport.set_garbage_ratio(0.0);
        let vacuum = Arc::new(VacuumController::new(1, 0));

        vacuum.sweep(layouts, transport.clone(), 0.3, None, None).await;
        assert!(transport.calls().is_empty());
    }
}
