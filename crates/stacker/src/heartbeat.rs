//! Volume-server heartbeat ingestion.
//!
//! Heartbeats are the only source of truth for the master's in-memory
//! state: a freshly elected leader starts from an empty topology and
//! rebuilds the nodes, layouts, read-only marks, EC shard locations,
//! and the volume id high-water mark from the reports that arrive
//! within the next heartbeat interval.

use haystack_proto::request::HeartbeatRequest;

use crate::master::Master;

pub async fn handle_heartbeat(master: &Master, hb: &HeartbeatRequest) {
    // Never re-issue an id some server already carries.
    for v in &hb.volumes {
        master.topo.observe_volume_id(v.id);
    }
    for s in &hb.ec_shards {
        master.topo.observe_volume_id(s.volume_id);
    }

    master.topo.register_node(hb).await;
    master
        .layouts
        .sync_node_volumes(&hb.node_id(), &hb.data_center, &hb.volumes);
    master.ec_index.register_server(&hb.node_id(), &hb.ec_shards);
}
