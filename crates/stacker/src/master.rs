//! Master daemon state — one owner object wiring the components.
//!
//! Each component guards its own state (the topology's root lock, the
//! layout index's concurrent map, the hub's client table), so the
//! `Master` itself is plain `Arc` plumbing rather than one global lock.

use std::sync::Arc;

use haystack_core::transport::VolumeServerTransport;

use crate::auth::{KeyedSigner, NoAuth, TokenSigner};
use crate::broadcast::ClientHub;
use crate::config::MasterConfig;
use crate::growth::controller::{GrowthConfig, GrowthController};
use crate::growth::executor::GrowthExecutor;
use crate::growth::policy::GrowthPolicy;
use crate::leader::Leadership;
use crate::topology::ec::EcShardIndex;
use crate::topology::layout::LayoutIndex;
use crate::topology::Topology;
use crate::vacuum::VacuumController;

pub type SharedMaster = Arc<Master>;

pub struct Master {
    pub config: MasterConfig,
    pub topo: Arc<Topology>,
    pub layouts: Arc<LayoutIndex>,
    pub ec_index: Arc<EcShardIndex>,
    pub clients: Arc<ClientHub>,
    pub vacuum: Arc<VacuumController>,
    pub controller: Arc<GrowthController>,
    pub transport: Arc<dyn VolumeServerTransport>,
    pub leadership: Arc<dyn Leadership>,
    pub signer: Arc<dyn TokenSigner>,
}

impl Master {
    pub fn new(
        config: MasterConfig,
        transport: Arc<dyn VolumeServerTransport>,
        leadership: Arc<dyn Leadership>,
    ) -> SharedMaster {
        let topo = Arc::new(Topology::new());
        let layouts = Arc::new(LayoutIndex::new());
        let ec_index = Arc::new(EcShardIndex::new());
        let clients = Arc::new(ClientHub::new(config.client_channel_size));
        let vacuum = Arc::new(VacuumController::new(
            config.max_parallel_vacuum_per_server,
            config.preallocate,
        ));
        let executor = Arc::new(GrowthExecutor::new(
            topo.clone(),
            layouts.clone(),
            transport.clone(),
            haystack_proto::defaults::DEFAULT_GROW_ATTEMPTS_PER_VOLUME,
        ));
        let growth_config = GrowthConfig {
            preallocate: config.preallocate,
            memory_map_max_size_mb: config.memory_map_max_size_mb,
            ..Default::default()
        };
        let controller = Arc::new(GrowthController::new(
            topo.clone(),
            layouts.clone(),
            executor,
            GrowthPolicy::new(config.writable_low_water),
            leadership.clone(),
            clients.clone(),
            growth_config,
        ));
        let signer: Arc<dyn TokenSigner> = if config.signing_key.is_empty() {
            Arc::new(NoAuth)
        } else {
            Arc::new(KeyedSigner::new(&config.signing_key))
        };

        Arc::new(Master {
            config,
            topo,
            layouts,
            ec_index,
            clients,
            vacuum,
            controller,
            transport,
            leadership,
            signer,
        })
    }

    pub fn is_leader(&self) -> bool {
        self.leadership.is_leader()
    }
}

/// Master wired against the mock transport, always leading and with a
/// signing key set. The starting point of most handler tests.
#[cfg(test)]
pub fn test_master() -> SharedMaster {
    use crate::leader::AlwaysLeader;
    use haystack_core::transport::MockVolumeTransport;

    let config = MasterConfig {
        signing_key: "test-key".to_string(),
        ..Default::default()
    };
    Master::new(
        config,
        Arc::new(MockVolumeTransport::new()),
        Arc::new(AlwaysLeader),
    )
}
