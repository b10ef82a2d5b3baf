//! Placement planner — picks the data nodes for one new volume.
//!
//! Works on a [`TopologyInfo`] snapshot so the live topology lock is
//! never held during the search. Selection among equally eligible
//! candidates is random; the executor seeds the RNG from the grow
//! option's fingerprint so a replayed request reproduces its choices.

use rand::seq::{IteratorRandom, SliceRandom};
use rand::Rng;

use haystack_proto::topology_info::{DataCenterInfo, DataNodeInfo, RackInfo, TopologyInfo};
use haystack_proto::{MasterError, MasterResult};

use crate::growth::VolumeGrowOption;

/// One chosen replica target.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlannedReplica {
    pub node_id: String,
    pub url: String,
    pub public_url: String,
    pub grpc_port: u32,
    pub data_center: String,
    pub rack: String,
}

impl PlannedReplica {
    fn from_node(node: &DataNodeInfo, dc: &str, rack: &str) -> Self {
        Self {
            node_id: node.id.clone(),
            url: node.url.clone(),
            public_url: node.public_url.clone(),
            grpc_port: node.grpc_port,
            data_center: dc.to_string(),
            rack: rack.to_string(),
        }
    }
}

/// Plan one volume's replica set.
///
/// The result has exactly `copy_count` entries on distinct nodes: the
/// primary node first, then the extra nodes in the primary rack, then
/// one node per extra rack in the primary data center, then one node
/// per extra data center. Fails with `UnknownDataCenter` when the pin
/// names a data center the topology has never seen, and with
/// `InsufficientCapacity` when no placement satisfies the diversity and
/// capacity constraints.
pub fn plan(
    topo: &TopologyInfo,
    option: &VolumeGrowOption,
    rng: &mut impl Rng,
) -> MasterResult<Vec<PlannedReplica>> {
    let rp = option.replica_placement;

    if !option.data_center.is_empty()
        && !topo.data_centers.iter().any(|dc| dc.id == option.data_center)
    {
        return Err(MasterError::UnknownDataCenter(option.data_center.clone()));
    }

    let no_capacity = || MasterError::InsufficientCapacity {
        available: total_free(topo, option),
        requested: rp.copy_count() as i64,
    };

    // Pick the primary data center among those that can host the whole
    // intra-DC part of the placement and still leave enough sibling DCs.
    let main_dc_candidates: Vec<&DataCenterInfo> = topo
        .data_centers
        .iter()
        .filter(|dc| option.data_center.is_empty() || dc.id == option.data_center)
        .filter(|dc| {
            dc_is_viable(dc, option)
                && other_dcs_with_capacity(topo, &dc.id, option) >= rp.other_data_centers as usize
        })
        .collect();
    let main_dc = main_dc_candidates.choose(rng).ok_or_else(no_capacity)?;

    // Primary rack: must fit the primary node plus the same-rack extras.
    let main_rack_candidates: Vec<&RackInfo> = main_dc
        .racks
        .iter()
        .filter(|rack| option.rack.is_empty() || rack.id == option.rack)
        .filter(|rack| rack_is_viable(rack, option))
        .filter(|rack| {
            racks_with_capacity(main_dc, &rack.id, option) >= rp.other_racks as usize
        })
        .collect();
    let main_rack = main_rack_candidates.choose(rng).ok_or_else(no_capacity)?;

    // Primary node plus the extras in the same rack.
    let free_nodes: Vec<&DataNodeInfo> = main_rack
        .nodes
        .iter()
        .filter(|n| has_free_slot(n, option))
        .collect();
    let main_node = *free_nodes
        .iter()
        .filter(|n| option.data_node.is_empty() || n.id == option.data_node)
        .choose(rng)
        .ok_or_else(no_capacity)?;

    let mut replicas = vec![PlannedReplica::from_node(main_node, &main_dc.id, &main_rack.id)];
    let rack_extras = free_nodes
        .iter()
        .filter(|n| n.id != main_node.id)
        .choose_multiple(rng, rp.other_nodes as usize);
    if rack_extras.len() < rp.other_nodes as usize {
        return Err(no_capacity());
    }
    for node in rack_extras {
        replicas.push(PlannedReplica::from_node(node, &main_dc.id, &main_rack.id));
    }

    // One node in each extra rack of the primary data center.
    let other_racks = main_dc
        .racks
        .iter()
        .filter(|rack| rack.id != main_rack.id && rack_has_capacity(rack, option))
        .choose_multiple(rng, rp.other_racks as usize);
    if other_racks.len() < rp.other_racks as usize {
        return Err(no_capacity());
    }
    for rack in other_racks {
        let node = rack
            .nodes
            .iter()
            .filter(|n| has_free_slot(n, option))
            .choose(rng)
            .ok_or_else(no_capacity)?;
        replicas.push(PlannedReplica::from_node(node, &main_dc.id, &rack.id));
    }

    // One node in each extra data center.
    let other_dcs = topo
        .data_centers
        .iter()
        .filter(|dc| dc.id != main_dc.id && dc_has_capacity(dc, option))
        .choose_multiple(rng, rp.other_data_centers as usize);
    if other_dcs.len() < rp.other_data_centers as usize {
        return Err(no_capacity());
    }
    for dc in other_dcs {
        let (rack, node) = dc
            .racks
            .iter()
            .flat_map(|rack| {
                rack.nodes
                    .iter()
                    .filter(|n| has_free_slot(n, option))
                    .map(move |n| (rack, n))
            })
            .choose(rng)
            .ok_or_else(no_capacity)?;
        replicas.push(PlannedReplica::from_node(node, &dc.id, &rack.id));
    }

    Ok(replicas)
}

fn has_free_slot(node: &DataNodeInfo, option: &VolumeGrowOption) -> bool {
    node.free_volume_count(&option.disk_type) >= 1
}

fn rack_has_capacity(rack: &RackInfo, option: &VolumeGrowOption) -> bool {
    rack.nodes.iter().any(|n| has_free_slot(n, option))
}

fn dc_has_capacity(dc: &DataCenterInfo, option: &VolumeGrowOption) -> bool {
    dc.racks.iter().any(|r| rack_has_capacity(r, option))
}

/// A rack can be the primary rack if it holds the primary node (honoring
/// the node pin) plus the required same-rack extras, all with free slots.
fn rack_is_viable(rack: &RackInfo, option: &VolumeGrowOption) -> bool {
    let rp = option.replica_placement;
    let free: Vec<&DataNodeInfo> = rack
        .nodes
        .iter()
        .filter(|n| has_free_slot(n, option))
        .collect();
    if free.len() < rp.other_nodes as usize + 1 {
        return false;
    }
    option.data_node.is_empty() || free.iter().any(|n| n.id == option.data_node)
}

/// Racks in `dc` other than `main_rack` that can host one replica.
fn racks_with_capacity(dc: &DataCenterInfo, main_rack: &str, option: &VolumeGrowOption) -> usize {
    dc.racks
        .iter()
        .filter(|r| r.id != main_rack && rack_has_capacity(r, option))
        .count()
}

/// A data center can be primary if some rack in it is a viable primary
/// rack with enough sibling racks left over.
fn dc_is_viable(dc: &DataCenterInfo, option: &VolumeGrowOption) -> bool {
    let rp = option.replica_placement;
    dc.racks
        .iter()
        .filter(|rack| option.rack.is_empty() || rack.id == option.rack)
        .any(|rack| {
            rack_is_viable(rack, option)
                && racks_with_capacity(dc, &rack.id, option) >= rp.other_racks as usize
        })
}

fn other_dcs_with_capacity(topo: &TopologyInfo, main_dc: &str, option: &VolumeGrowOption) -> usize {
    topo.data_centers
        .iter()
        .filter(|dc| dc.id != main_dc && dc_has_capacity(dc, option))
        .count()
}

fn total_free(topo: &TopologyInfo, option: &VolumeGrowOption) -> i64 {
    topo.data_centers
        .iter()
        .flat_map(|dc| &dc.racks)
        .flat_map(|r| &r.nodes)
        .map(|n| n.free_volume_count(&option.disk_type).max(0))
        .sum()
}
