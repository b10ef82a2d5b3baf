//! Master operation handlers.
//!
//! One function per RPC, dispatched from the request pipeline. Leader
//! gates follow the protocol contract: lookups and the vacuum toggles
//! answer on any master, everything that reads or mutates cluster-wide
//! state answers only on the leader and fails with `NotLeader`
//! elsewhere, leaving the client to redirect.

use tracing::{debug, info};

use haystack_proto::request::{EcShardLocation, MasterRequest, VolumeIdLocation};
use haystack_proto::{
    DiskType, MasterError, MasterResponse, MasterResult, ReplicaPlacement, Ttl, VolumeId,
};

use crate::growth::{VolumeGrowOption, VolumeGrowRequest};
use crate::heartbeat;
use crate::master::SharedMaster;
use crate::topology::layout::VolumeLayoutKey;

/// Handle one decoded request.
pub async fn handle(master: &SharedMaster, req: MasterRequest) -> MasterResult<MasterResponse> {
    match req {
        MasterRequest::LookupVolume {
            volume_or_file_ids,
            collection,
        } => lookup_volume(master, volume_or_file_ids, &collection).await,
        MasterRequest::Statistics {
            collection,
            replication,
            ttl,
            disk_type,
        } => statistics(master, collection, &replication, &ttl, &disk_type).await,
        MasterRequest::VolumeList => volume_list(master).await,
        MasterRequest::LookupEcVolume { volume_id } => lookup_ec_volume(master, volume_id).await,
        MasterRequest::VacuumVolume {
            garbage_threshold,
            volume_id,
            collection,
        } => vacuum_volume(master, garbage_threshold, volume_id, collection).await,
        MasterRequest::DisableVacuum => {
            info!("disabling vacuum");
            master.vacuum.disable();
            Ok(MasterResponse::Ok)
        }
        MasterRequest::EnableVacuum => {
            info!("enabling vacuum");
            master.vacuum.enable();
            Ok(MasterResponse::Ok)
        }
        MasterRequest::VolumeMarkReadonly {
            volume_id,
            ip,
            port,
            collection,
            replica_placement,
            ttl,
            disk_type,
            is_readonly,
        } => {
            volume_mark_readonly(
                master,
                volume_id,
                &ip,
                port,
                collection,
                replica_placement,
                &ttl,
                &disk_type,
                is_readonly,
            )
            .await
        }
        MasterRequest::VolumeGrow {
            collection,
            replication,
            ttl,
            disk_type,
            data_center,
            rack,
            data_node,
            memory_map_max_size_mb,
            writable_volume_count,
        } => {
            volume_grow(
                master,
                collection,
                &replication,
                &ttl,
                &disk_type,
                data_center,
                rack,
                data_node,
                memory_map_max_size_mb,
                writable_volume_count,
            )
            .await
        }
        MasterRequest::Heartbeat(hb) => {
            heartbeat::handle_heartbeat(master, &hb).await;
            Ok(MasterResponse::Ok)
        }
        // Stream subscription happens in the connection handler.
        MasterRequest::KeepConnected { .. } => Err(MasterError::Protocol(
            "keep-connected must open its own stream".to_string(),
        )),
    }
}

fn require_leader(master: &SharedMaster) -> MasterResult<()> {
    if master.is_leader() {
        Ok(())
    } else {
        Err(MasterError::NotLeader)
    }
}

/// Fall back to the configured default when the request leaves the
/// replication empty.
fn parse_replication(master: &SharedMaster, replication: &str) -> MasterResult<ReplicaPlacement> {
    if replication.is_empty() {
        ReplicaPlacement::parse(&master.config.default_replication)
    } else {
        ReplicaPlacement::parse(replication)
    }
}

async fn lookup_volume(
    master: &SharedMaster,
    volume_or_file_ids: Vec<String>,
    collection: &str,
) -> MasterResult<MasterResponse> {
    let mut volume_id_locations = Vec::new();
    for input in volume_or_file_ids {
        // A full file id is "<vid>,<needle key cookie>"; everything up
        // to the first comma names the volume.
        let (vid_str, is_file_id) = match input.find(',') {
            Some(pos) if pos > 0 => (&input[..pos], true),
            _ => (input.as_str(), false),
        };
        let vid: VolumeId = match vid_str.parse() {
            Ok(vid) => vid,
            Err(e) => {
                volume_id_locations.push(VolumeIdLocation {
                    volume_or_file_id: input.clone(),
                    error: e.to_string(),
                    ..Default::default()
                });
                continue;
            }
        };
        // Unknown volumes are silently omitted; clients treat absence
        // as "not found".
        let replicas = match master.layouts.lookup(collection, vid) {
            Some(replicas) => replicas,
            None => continue,
        };
        let node_ids: Vec<String> = replicas.iter().map(|r| r.node.clone()).collect();
        let locations = master.topo.node_locations(&node_ids).await;
        let auth = if is_file_id {
            master.signer.sign(&input)
        } else {
            String::new()
        };
        volume_id_locations.push(VolumeIdLocation {
            volume_or_file_id: input,
            locations,
            error: String::new(),
            auth,
        });
    }
    Ok(MasterResponse::LookupVolume {
        volume_id_locations,
    })
}

async fn statistics(
    master: &SharedMaster,
    collection: String,
    replication: &str,
    ttl: &str,
    disk_type: &str,
) -> MasterResult<MasterResponse> {
    require_leader(master)?;
    let key = VolumeLayoutKey {
        collection,
        replica_placement: parse_replication(master, replication)?,
        ttl: Ttl::parse(ttl)?,
        disk_type: DiskType::parse(disk_type),
    };
    let stats = master.layouts.get(&key).stats();
    let total_size =
        master.topo.max_volume_count().await.max(0) as u64 * master.config.volume_size_limit_mb
            * 1024
            * 1024;
    Ok(MasterResponse::Statistics {
        total_size,
        used_size: stats.used_size,
        file_count: stats.file_count,
    })
}

async fn volume_list(master: &SharedMaster) -> MasterResult<MasterResponse> {
    require_leader(master)?;
    Ok(MasterResponse::VolumeList {
        topology: master.topo.to_topology_info().await,
        volume_size_limit_mb: master.config.volume_size_limit_mb,
    })
}

async fn lookup_ec_volume(master: &SharedMaster, volume_id: u32) -> MasterResult<MasterResponse> {
    require_leader(master)?;
    let shards = master
        .ec_index
        .lookup(VolumeId(volume_id))
        .ok_or(MasterError::EcVolumeNotFound(volume_id))?;
    let mut shard_locations = Vec::new();
    for (shard_id, node_ids) in shards {
        shard_locations.push(EcShardLocation {
            shard_id,
            locations: master.topo.node_locations(&node_ids).await,
        });
    }
    Ok(MasterResponse::LookupEcVolume {
        volume_id,
        shard_locations,
    })
}

async fn vacuum_volume(
    master: &SharedMaster,
    garbage_threshold: f64,
    volume_id: u32,
    collection: String,
) -> MasterResult<MasterResponse> {
    require_leader(master)?;
    let threshold = if garbage_threshold > 0.0 {
        garbage_threshold
    } else {
        master.config.garbage_threshold
    };
    let volume_filter = (volume_id != 0).then_some(VolumeId(volume_id));
    let collection_filter = (!collection.is_empty()).then_some(collection);

    let vacuum = master.vacuum.clone();
    let layouts = master.layouts.clone();
    let transport = master.transport.clone();
    tokio::spawn(async move {
        vacuum
            .sweep(layouts, transport, threshold, volume_filter, collection_filter)
            .await;
    });
    Ok(MasterResponse::Ok)
}

#[allow(clippy::too_many_arguments)]
async fn volume_mark_readonly(
    master: &SharedMaster,
    volume_id: u32,
    ip: &str,
    port: u16,
    collection: String,
    replica_placement: u8,
    ttl: &str,
    disk_type: &str,
    is_readonly: bool,
) -> MasterResult<MasterResponse> {
    require_leader(master)?;
    let key = VolumeLayoutKey {
        collection,
        replica_placement: ReplicaPlacement::from_byte(replica_placement)?,
        ttl: Ttl::parse(ttl)?,
        disk_type: DiskType::parse(disk_type),
    };
    let vl = master.layouts.get(&key);
    let vid = VolumeId(volume_id);
    let node_id = format!("{}:{}", ip, port);

    let hosts_replica = vl
        .locations(vid)
        .map_or(false, |replicas| replicas.iter().any(|r| r.node == node_id));
    if hosts_replica {
        if is_readonly {
            vl.set_volume_readonly(&node_id, vid);
        } else {
            vl.set_volume_writable(&node_id, vid);
        }
        debug!(
            "volume {} on {} marked read-only={}",
            vid, node_id, is_readonly
        );
    }
    Ok(MasterResponse::Ok)
}

#[allow(clippy::too_many_arguments)]
async fn volume_grow(
    master: &SharedMaster,
    collection: String,
    replication: &str,
    ttl: &str,
    disk_type: &str,
    data_center: String,
    rack: String,
    data_node: String,
    memory_map_max_size_mb: u32,
    writable_volume_count: u32,
) -> MasterResult<MasterResponse> {
    require_leader(master)?;
    let replica_placement = parse_replication(master, replication)?;
    let option = VolumeGrowOption {
        collection,
        replica_placement,
        ttl: Ttl::parse(ttl)?,
        disk_type: DiskType::parse(disk_type),
        data_center,
        rack,
        data_node,
        preallocate: master.config.preallocate,
        memory_map_max_size_mb,
    };

    let requested = writable_volume_count as i64 * replica_placement.copy_count() as i64;
    let available = master.topo.available_space_for(&option).await;
    if available < requested {
        return Err(MasterError::InsufficientCapacity {
            available,
            requested,
        });
    }
    if !option.data_center.is_empty() && !master.topo.data_center_exists(&option.data_center).await
    {
        return Err(MasterError::UnknownDataCenter(option.data_center.clone()));
    }

    // The requested burst size doubles as the write-pressure signal the
    // periodic scan uses for its next target count.
    if writable_volume_count > 0 {
        master
            .layouts
            .get(&option.layout_key())
            .set_last_grow_count(writable_volume_count);
    }

    // Bypasses the request stream and the in-flight guard; growth
    // failures past preflight are logged, not returned.
    master
        .controller
        .grow_now(&VolumeGrowRequest {
            option,
            count: writable_volume_count,
            force: true,
            reason: "volume grow rpc",
        })
        .await;
    Ok(MasterResponse::Ok)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::leader::SharedLeadership;
    use crate::master::{test_master, Master, SharedMaster};
    use haystack_core::transport::MockVolumeTransport;
    use haystack_proto::request::HeartbeatRequest;
    use haystack_proto::VolumeInfo;
    use std::sync::Arc;

    async fn report_volume(
        master: &SharedMaster,
        ip: &str,
        dc: &str,
        vid: u32,
        replication: &str,
    ) {
        let volume = VolumeInfo {
            id: VolumeId(vid),
            replica_placement: ReplicaPlacement::parse(replication).unwrap(),
            size: 100,
            file_count: 3,
            ..Default::default()
        };
        let hb = HeartbeatRequest {
            ip: ip.to_string(),
            port: 8080,
            public_url: format!("{}:8080", ip),
            grpc_port: 18080,
            data_center: dc.to_string(),
            rack: "rack1".to_string(),
            max_volume_counts: vec![(DiskType::Hdd, 10)],
            volumes: vec![volume],
            ..Default::default()
        };
        handle(master, MasterRequest::Heartbeat(hb)).await.unwrap();
    }

    fn follower_master() -> SharedMaster {
        Master::new(
            crate::config::MasterConfig::default(),
            Arc::new(MockVolumeTransport::new()),
            Arc::new(SharedLeadership::new(false)),
        )
    }

    #[tokio::test]
    async fn test_lookup_volume_mix() {
        let master = test_master();
        report_volume(&master, "10.0.0.1", "dc1", 3, "000").await;
        report_volume(&master, "10.0.0.1", "dc1", 7, "001").await;
        report_volume(&master, "10.0.0.2", "dc1", 7, "001").await;

        let resp = handle(
            &master,
            MasterRequest::LookupVolume {
                volume_or_file_ids: vec!["3".into(), "7,abc".into(), "999".into()],
                collection: String::new(),
            },
        )
        .await
        .unwrap();

        let entries = match resp {
            MasterResponse::LookupVolume {
                volume_id_locations,
            } => volume_id_locations,
            other => panic!("unexpected response: {:?}", other),
        };
        // Volume 999 is unknown and silently omitted.
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].volume_or_file_id, "3");
        assert_eq!(entries[0].locations.len(), 1);
        assert!(entries[0].auth.is_empty());
        assert!(entries[0].error.is_empty());

        assert_eq!(entries[1].volume_or_file_id, "7,abc");
        assert_eq!(entries[1].locations.len(), 2);
        assert!(!entries[1].auth.is_empty());
    }

    #[tokio::test]
    async fn test_lookup_volume_works_off_leader() {
        let master = follower_master();
        let resp = handle(
            &master,
            MasterRequest::LookupVolume {
                volume_or_file_ids: vec!["1".into()],
                collection: String::new(),
            },
        )
        .await
        .unwrap();
        assert!(matches!(resp, MasterResponse::LookupVolume { .. }));
    }

    #[tokio::test]
    async fn test_statistics() {
        let master = test_master();
        report_volume(&master, "10.0.0.1", "dc1", 3, "000").await;

        let resp = handle(
            &master,
            MasterRequest::Statistics {
                collection: String::new(),
                replication: "000".into(),
                ttl: String::new(),
                disk_type: String::new(),
            },
        )
        .await
        .unwrap();
        match resp {
            MasterResponse::Statistics {
                total_size,
                used_size,
                file_count,
            } => {
                assert_eq!(
                    total_size,
                    10 * master.config.volume_size_limit_mb * 1024 * 1024
                );
                assert_eq!(used_size, 100);
                assert_eq!(file_count, 3);
            }
            other => panic!("unexpected response: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_leader_gated_ops_fail_on_follower() {
        let master = follower_master();
        let requests = vec![
            MasterRequest::Statistics {
                collection: String::new(),
                replication: String::new(),
                ttl: String::new(),
                disk_type: String::new(),
            },
            MasterRequest::VolumeList,
            MasterRequest::LookupEcVolume { volume_id: 1 },
            MasterRequest::VacuumVolume {
                garbage_threshold: 0.3,
                volume_id: 0,
                collection: String::new(),
            },
            MasterRequest::VolumeMarkReadonly {
                volume_id: 1,
                ip: "10.0.0.1".into(),
                port: 8080,
                collection: String::new(),
                replica_placement: 0,
                ttl: String::new(),
                disk_type: String::new(),
                is_readonly: true,
            },
            MasterRequest::VolumeGrow {
                collection: String::new(),
                replication: "000".into(),
                ttl: String::new(),
                disk_type: String::new(),
                data_center: String::new(),
                rack: String::new(),
                data_node: String::new(),
                memory_map_max_size_mb: 0,
                writable_volume_count: 1,
            },
        ];
        for req in requests {
            assert!(matches!(
                handle(&master, req).await,
                Err(MasterError::NotLeader)
            ));
        }
    }

    #[tokio::test]
    async fn test_vacuum_toggles_work_off_leader() {
        let master = follower_master();
        assert!(handle(&master, MasterRequest::DisableVacuum).await.is_ok());
        assert!(!master.vacuum.is_enabled());
        assert!(handle(&master, MasterRequest::EnableVacuum).await.is_ok());
        assert!(master.vacuum.is_enabled());
    }

    #[tokio::test]
    async fn test_statistics_rejects_bad_arguments() {
        let master = test_master();
        let bad_replication = handle(
            &master,
            MasterRequest::Statistics {
                collection: String::new(),
                replication: "abc".into(),
                ttl: String::new(),
                disk_type: String::new(),
            },
        )
        .await;
        assert!(matches!(
            bad_replication,
            Err(MasterError::InvalidReplication(_))
        ));

        let bad_ttl = handle(
            &master,
            MasterRequest::Statistics {
                collection: String::new(),
                replication: "000".into(),
                ttl: "3x".into(),
                disk_type: String::new(),
            },
        )
        .await;
        assert!(matches!(bad_ttl, Err(MasterError::InvalidTtl(_))));
    }

    #[tokio::test]
    async fn test_volume_grow_preflight_insufficient_capacity() {
        let mock = Arc::new(MockVolumeTransport::new());
        let master = Master::new(
            crate::config::MasterConfig::default(),
            mock.clone(),
            Arc::new(crate::leader::AlwaysLeader),
        );
        // dc2 has a single free slot.
        let hb = HeartbeatRequest {
            ip: "10.0.1.1".into(),
            port: 8080,
            public_url: "10.0.1.1:8080".into(),
            grpc_port: 18080,
            data_center: "dc2".into(),
            rack: "rack1".into(),
            max_volume_counts: vec![(DiskType::Hdd, 1)],
            ..Default::default()
        };
        handle(&master, MasterRequest::Heartbeat(hb)).await.unwrap();
        let (_, mut notifications) = master.clients.subscribe("watcher");

        let resp = handle(
            &master,
            MasterRequest::VolumeGrow {
                collection: String::new(),
                replication: "010".into(),
                ttl: String::new(),
                disk_type: String::new(),
                data_center: "dc2".into(),
                rack: String::new(),
                data_node: String::new(),
                memory_map_max_size_mb: 0,
                writable_volume_count: 3,
            },
        )
        .await;
        assert!(matches!(
            resp,
            Err(MasterError::InsufficientCapacity {
                available: 1,
                requested: 6
            })
        ));
        // No mutation, no broadcast, no RPC ever dispatched.
        assert!(mock.calls().is_empty());
        assert!(notifications.try_recv().is_err());
        assert_eq!(master.topo.available_space_for(&VolumeGrowOption::default()).await, 1);
    }

    #[tokio::test]
    async fn test_volume_grow_unknown_data_center_is_returned() {
        let master = test_master();
        report_volume(&master, "10.0.0.1", "dc1", 1, "000").await;

        let resp = handle(
            &master,
            MasterRequest::VolumeGrow {
                collection: String::new(),
                replication: "000".into(),
                ttl: String::new(),
                disk_type: String::new(),
                data_center: "dc9".into(),
                rack: String::new(),
                data_node: String::new(),
                memory_map_max_size_mb: 0,
                writable_volume_count: 0,
            },
        )
        .await;
        assert!(matches!(resp, Err(MasterError::UnknownDataCenter(_))));
    }

    #[tokio::test]
    async fn test_volume_grow_creates_and_broadcasts() {
        let master = test_master();
        report_volume(&master, "10.0.0.1", "dc1", 1, "000").await;
        let (_, mut notifications) = master.clients.subscribe("watcher");

        let resp = handle(
            &master,
            MasterRequest::VolumeGrow {
                collection: String::new(),
                replication: "000".into(),
                ttl: String::new(),
                disk_type: String::new(),
                data_center: String::new(),
                rack: String::new(),
                data_node: String::new(),
                memory_map_max_size_mb: 0,
                writable_volume_count: 2,
            },
        )
        .await
        .unwrap();
        assert!(matches!(resp, MasterResponse::Ok));

        for _ in 0..2 {
            let n = notifications.try_recv().unwrap();
            assert_eq!(n.volume_location.replicas.len(), 1);
        }
        assert!(notifications.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_volume_mark_readonly_round_trip() {
        let master = test_master();
        report_volume(&master, "10.0.0.1", "dc1", 4, "001").await;
        report_volume(&master, "10.0.0.2", "dc1", 4, "001").await;

        let key = VolumeLayoutKey {
            collection: String::new(),
            replica_placement: ReplicaPlacement::parse("001").unwrap(),
            ttl: Ttl::NONE,
            disk_type: DiskType::Hdd,
        };
        let vl = master.layouts.get(&key);
        assert!(vl.is_writable(VolumeId(4)));

        let mark = |readonly| MasterRequest::VolumeMarkReadonly {
            volume_id: 4,
            ip: "10.0.0.2".into(),
            port: 8080,
            collection: String::new(),
            replica_placement: 1,
            ttl: String::new(),
            disk_type: String::new(),
            is_readonly: readonly,
        };
        handle(&master, mark(true)).await.unwrap();
        assert!(!vl.is_writable(VolumeId(4)));
        handle(&master, mark(false)).await.unwrap();
        assert!(vl.is_writable(VolumeId(4)));
    }

    #[tokio::test]
    async fn test_lookup_ec_volume() {
        let master = test_master();
        let hb = HeartbeatRequest {
            ip: "10.0.0.1".into(),
            port: 8080,
            public_url: "10.0.0.1:8080".into(),
            grpc_port: 18080,
            data_center: "dc1".into(),
            rack: "rack1".into(),
            max_volume_counts: vec![(DiskType::Hdd, 10)],
            ec_shards: vec![haystack_proto::request::EcShardInfo {
                volume_id: VolumeId(12),
                collection: String::new(),
                shard_ids: vec![0, 1, 2],
                disk_type: DiskType::Hdd,
            }],
            ..Default::default()
        };
        handle(&master, MasterRequest::Heartbeat(hb)).await.unwrap();

        let resp = handle(&master, MasterRequest::LookupEcVolume { volume_id: 12 })
            .await
            .unwrap();
        match resp {
            MasterResponse::LookupEcVolume {
                volume_id,
                shard_locations,
            } => {
                assert_eq!(volume_id, 12);
                assert_eq!(shard_locations.len(), 3);
                assert!(shard_locations.iter().all(|s| s.locations.len() == 1));
            }
            other => panic!("unexpected response: {:?}", other),
        }

        let missing = handle(&master, MasterRequest::LookupEcVolume { volume_id: 99 }).await;
        assert!(matches!(missing, Err(MasterError::EcVolumeNotFound(99))));
    }
}
