//! Growth executor — turns a placement plan into real volumes.
//!
//! Volume ids come from the cluster-monotonic sequence *before* dispatch
//! and are abandoned if dispatch fails. A placement either registers all
//! of its replicas or none: on any per-replica failure the successful
//! replicas get a best-effort delete and the executor retries the volume
//! with a fresh plan, up to a bounded number of attempts.

use std::sync::Arc;

use rand::rngs::StdRng;
use rand::SeedableRng;
use tracing::{info, warn};

use haystack_core::transport::{AllocateVolume, VolumeServerTransport};
use haystack_proto::{Location, MasterError, MasterResult, VolumeLocation};

use crate::growth::planner::{self, PlannedReplica};
use crate::growth::{VolumeGrowOption, VolumeGrowRequest};
use crate::topology::layout::{LayoutIndex, Replica};
use crate::topology::Topology;

pub struct GrowthExecutor {
    topo: Arc<Topology>,
    layouts: Arc<LayoutIndex>,
    transport: Arc<dyn VolumeServerTransport>,
    attempts_per_volume: u32,
}

impl GrowthExecutor {
    pub fn new(
        topo: Arc<Topology>,
        layouts: Arc<LayoutIndex>,
        transport: Arc<dyn VolumeServerTransport>,
        attempts_per_volume: u32,
    ) -> Self {
        Self {
            topo,
            layouts,
            transport,
            attempts_per_volume: attempts_per_volume.max(1),
        }
    }

    /// Create up to `req.count` new writable volumes for the request's
    /// layout. Returns the locations of every volume that was fully
    /// created; fails once a volume cannot be placed or created within
    /// the attempt budget. Partial successes stay registered.
    pub async fn grow(&self, req: &VolumeGrowRequest) -> MasterResult<Vec<VolumeLocation>> {
        let mut created = Vec::new();
        for seq in 0..req.count {
            match self.grow_one(&req.option, seq).await {
                Ok(location) => created.push(location),
                Err(e) => {
                    warn!(
                        "volume grow stopped after {}/{} volumes ({}): {}",
                        created.len(),
                        req.count,
                        req.reason,
                        e
                    );
                    return Err(e);
                }
            }
        }
        Ok(created)
    }

    async fn grow_one(
        &self,
        option: &VolumeGrowOption,
        seq: u32,
    ) -> MasterResult<VolumeLocation> {
        let mut last_err = MasterError::VolumeCreate("no attempt made".to_string());
        for attempt in 0..self.attempts_per_volume {
            // A fresh snapshot each attempt: earlier registrations in
            // this burst have already moved the counters.
            let snapshot = self.topo.to_topology_info().await;
            let seed = option.fingerprint() ^ ((seq as u64) << 32 | attempt as u64);
            let mut rng = StdRng::seed_from_u64(seed);
            let plan = planner::plan(&snapshot, option, &mut rng)?;

            let vid = self.topo.next_volume_id();
            match self.create_replicas(option, vid, &plan).await {
                Ok(()) => {
                    self.register(option, vid, &plan).await;
                    info!(
                        "volume {} created with {} replicas",
                        vid,
                        plan.len()
                    );
                    return Ok(VolumeLocation {
                        vid,
                        replicas: plan
                            .iter()
                            .map(|r| Location {
                                url: r.url.clone(),
                                public_url: r.public_url.clone(),
                                data_center: r.data_center.clone(),
                                grpc_port: r.grpc_port,
                            })
                            .collect(),
                    });
                }
                // The vid is abandoned; try again with a fresh plan.
                Err(e) => last_err = e,
            }
        }
        Err(last_err)
    }

    /// Create the volume on every planned node, rolling back the whole
    /// placement if any replica fails.
    async fn create_replicas(
        &self,
        option: &VolumeGrowOption,
        vid: haystack_proto::VolumeId,
        plan: &[PlannedReplica],
    ) -> MasterResult<()> {
        let alloc = AllocateVolume {
            volume_id: vid,
            collection: option.collection.clone(),
            replica_placement: option.replica_placement,
            ttl: option.ttl,
            disk_type: option.disk_type.clone(),
            preallocate: option.preallocate,
            memory_map_max_size_mb: option.memory_map_max_size_mb,
        };

        let mut succeeded: Vec<&PlannedReplica> = Vec::new();
        for replica in plan {
            match self
                .transport
                .allocate_volume(&replica.url, alloc.clone())
                .await
            {
                Ok(()) => succeeded.push(replica),
                Err(e) => {
                    warn!(
                        "create volume {} on {} failed, rolling back {} replicas: {}",
                        vid,
                        replica.url,
                        succeeded.len(),
                        e
                    );
                    for done in &succeeded {
                        if let Err(del_err) =
                            self.transport.delete_volume(&done.url, vid).await
                        {
                            warn!(
                                "rollback delete of volume {} on {} failed: {}",
                                vid, done.url, del_err
                            );
                        }
                    }
                    return Err(MasterError::VolumeCreate(format!(
                        "{} on {}: {}",
                        vid, replica.url, e
                    )));
                }
            }
        }
        Ok(())
    }

    /// Make a fully created volume visible: topology counters first,
    /// then the layout's writable set. Only called once every replica
    /// RPC has succeeded, so no partial registration is ever exposed.
    async fn register(
        &self,
        option: &VolumeGrowOption,
        vid: haystack_proto::VolumeId,
        plan: &[PlannedReplica],
    ) {
        for replica in plan {
            self.topo
                .register_volume(&replica.node_id, &option.disk_type)
                .await;
        }
        let layout = self.layouts.get(&option.layout_key());
        layout.add_volume(
            vid,
            plan.iter()
                .map(|r| Replica {
                    node: r.node_id.clone(),
                    data_center: r.data_center.clone(),
                })
                .collect(),
        );
    }
}
