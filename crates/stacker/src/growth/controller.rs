//! Growth controller — merges the periodic layout scan with ad-hoc grow
//! requests, deduplicates in-flight work, enforces the leader gate, and
//! fans completed growths out to keep-connected clients.
//!
//! Two long-lived tasks cooperate:
//! - the **scanner** walks every layout on a jittered interval and
//!   publishes a grow request for each one the policy says is short;
//! - the **dispatcher** consumes the bounded request channel, discards
//!   duplicates and stale requests, and runs accepted growths as
//!   detached tasks.
//!
//! Every published request releases its layout's grow guard on exactly
//! one path: acceptance (after the growth finishes), leader-demoted
//! discard, duplicate discard, or no-longer-needed discard. Missing a
//! release would stall growth for that layout forever.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use dashmap::DashSet;
use rand::Rng;
use tokio::sync::{mpsc, Notify};
use tracing::{debug, info, warn};

use haystack_proto::defaults::{
    DEFAULT_DEMOTED_DISCARD_DELAY_MS, DEFAULT_DISCARD_DELAY_MS, DEFAULT_GROW_CHANNEL_SIZE,
    DEFAULT_GROW_SCAN_INTERVAL_SECS, DEFAULT_GROW_SCAN_JITTER_SECS, DEFAULT_PREALLOCATE_BYTES,
};
use haystack_proto::request::KeepConnectedResponse;

use crate::broadcast::ClientHub;
use crate::growth::executor::GrowthExecutor;
use crate::growth::policy::GrowthPolicy;
use crate::growth::{VolumeGrowOption, VolumeGrowRequest};
use crate::leader::Leadership;
use crate::topology::layout::LayoutIndex;
use crate::topology::Topology;

#[derive(Debug, Clone)]
pub struct GrowthConfig {
    pub scan_interval: Duration,
    /// Uniform jitter added to every scan sleep; keeps a fleet of
    /// masters from scanning in lockstep.
    pub scan_jitter: Duration,
    pub channel_size: usize,
    pub demoted_discard_delay: Duration,
    pub discard_delay: Duration,
    pub preallocate: u64,
    pub memory_map_max_size_mb: u32,
}

impl Default for GrowthConfig {
    fn default() -> Self {
        Self {
            scan_interval: Duration::from_secs(DEFAULT_GROW_SCAN_INTERVAL_SECS),
            scan_jitter: Duration::from_secs(DEFAULT_GROW_SCAN_JITTER_SECS),
            channel_size: DEFAULT_GROW_CHANNEL_SIZE,
            demoted_discard_delay: Duration::from_millis(DEFAULT_DEMOTED_DISCARD_DELAY_MS),
            discard_delay: Duration::from_millis(DEFAULT_DISCARD_DELAY_MS),
            preallocate: DEFAULT_PREALLOCATE_BYTES,
            memory_map_max_size_mb: 0,
        }
    }
}

pub struct GrowthController {
    topo: Arc<Topology>,
    layouts: Arc<LayoutIndex>,
    executor: Arc<GrowthExecutor>,
    policy: GrowthPolicy,
    leadership: Arc<dyn Leadership>,
    clients: Arc<ClientHub>,
    config: GrowthConfig,
    tx: mpsc::Sender<VolumeGrowRequest>,
    rx: Mutex<Option<mpsc::Receiver<VolumeGrowRequest>>>,
    /// Options of the growths currently running; requests equal to one
    /// of these are duplicates and get discarded on accept.
    in_flight: Arc<DashSet<VolumeGrowOption>>,
    shutdown: Notify,
    stopped: AtomicBool,
}

impl GrowthController {
    pub fn new(
        topo: Arc<Topology>,
        layouts: Arc<LayoutIndex>,
        executor: Arc<GrowthExecutor>,
        policy: GrowthPolicy,
        leadership: Arc<dyn Leadership>,
        clients: Arc<ClientHub>,
        config: GrowthConfig,
    ) -> Self {
        let (tx, rx) = mpsc::channel(config.channel_size);
        Self {
            topo,
            layouts,
            executor,
            policy,
            leadership,
            clients,
            config,
            tx,
            rx: Mutex::new(Some(rx)),
            in_flight: Arc::new(DashSet::new()),
            shutdown: Notify::new(),
            stopped: AtomicBool::new(false),
        }
    }

    /// Spawn the scanner and dispatcher tasks. Call once.
    pub fn start(self: Arc<Self>) {
        let scanner = self.clone();
        tokio::spawn(async move { scanner.scanner_loop().await });
        tokio::spawn(async move { self.dispatcher_loop().await });
    }

    pub fn stop(&self) {
        self.stopped.store(true, Ordering::SeqCst);
        self.shutdown.notify_waiters();
    }

    // ─── Scanner ──────────────────────────────────────────────────────────

    async fn scanner_loop(&self) {
        info!("growth scanner started");
        while !self.stopped.load(Ordering::SeqCst) {
            self.scan_once().await;

            let jitter = self.config.scan_jitter.mul_f64(rand::thread_rng().gen::<f64>());
            tokio::select! {
                _ = self.shutdown.notified() => break,
                _ = tokio::time::sleep(self.config.scan_interval + jitter) => {}
            }
        }
        info!("growth scanner stopped");
    }

    /// One pass over every layout. Publishes nothing when this node is
    /// not the leader.
    async fn scan_once(&self) {
        if !self.leadership.is_leader() {
            return;
        }
        let dcs = self.topo.list_data_centers().await;
        for (key, vl) in self.layouts.list_all() {
            if vl.has_grow_request() {
                continue;
            }
            if self.policy.should_grow(&vl) {
                let option =
                    key.to_grow_option(self.config.preallocate, self.config.memory_map_max_size_mb);
                let count = self
                    .policy
                    .target_count(&vl, self.topo.available_space_for(&option).await);
                if count == 0 {
                    debug!("layout {:?} is short but the topology is full", key);
                    continue;
                }
                vl.add_grow_request();
                let sent = self
                    .publish(VolumeGrowRequest {
                        option,
                        count,
                        force: false,
                        reason: "collection autogrow",
                    })
                    .await;
                if !sent {
                    vl.done_grow_request();
                    return;
                }
            } else {
                for dc in &dcs {
                    // At most one outstanding request per layout, even
                    // across several short data centers.
                    if vl.has_grow_request() {
                        break;
                    }
                    if !self.policy.should_grow_in_data_center(&vl, dc) {
                        continue;
                    }
                    let mut option = key
                        .to_grow_option(self.config.preallocate, self.config.memory_map_max_size_mb);
                    option.data_center = dc.clone();
                    let count = self
                        .policy
                        .target_count(&vl, self.topo.available_space_for(&option).await);
                    if count == 0 {
                        continue;
                    }
                    vl.add_grow_request();
                    let sent = self
                        .publish(VolumeGrowRequest {
                            option,
                            count,
                            force: true,
                            reason: "per-dc autogrow",
                        })
                        .await;
                    if !sent {
                        vl.done_grow_request();
                        return;
                    }
                }
            }
        }
    }

    /// Blocks when the channel is full; that backpressure is the
    /// scanner's throttle.
    async fn publish(&self, req: VolumeGrowRequest) -> bool {
        self.tx.send(req).await.is_ok()
    }

    // ─── Dispatcher ───────────────────────────────────────────────────────

    async fn dispatcher_loop(&self) {
        let mut rx = match self.rx.lock().unwrap().take() {
            Some(rx) => rx,
            None => {
                warn!("growth dispatcher started twice");
                return;
            }
        };
        info!("growth dispatcher started");
        loop {
            let req = tokio::select! {
                _ = self.shutdown.notified() => break,
                req = rx.recv() => match req {
                    Some(req) => req,
                    None => break,
                },
            };
            self.handle_request(req).await;
        }
        info!("growth dispatcher stopped");
    }

    async fn handle_request(&self, req: VolumeGrowRequest) {
        let vl = self.layouts.get(&req.option.layout_key());

        if !self.leadership.is_leader() {
            // Drain requests buffered before demotion.
            tokio::time::sleep(self.config.demoted_discard_delay).await;
            vl.done_grow_request();
            return;
        }

        let duplicate = self.in_flight.contains(&req.option);
        if duplicate || (!req.force && !self.policy.should_grow(&vl)) {
            debug!("discard volume grow request ({})", req.reason);
            tokio::time::sleep(self.config.discard_delay).await;
            vl.done_grow_request();
            return;
        }

        info!(
            "volume grow accepted: {} x{} ({})",
            req.option.collection, req.count, req.reason
        );
        self.in_flight.insert(req.option.clone());
        let executor = self.executor.clone();
        let clients = self.clients.clone();
        let in_flight = self.in_flight.clone();
        tokio::spawn(async move {
            grow_and_broadcast(&executor, &clients, &req).await;
            vl.done_grow_request();
            in_flight.remove(&req.option);
        });
    }

    /// Synchronous growth for the ad-hoc `VolumeGrow` RPC. Bypasses the
    /// request stream and the in-flight guard; the caller has already
    /// done the capacity and data-center preflight.
    pub async fn grow_now(&self, req: &VolumeGrowRequest) {
        grow_and_broadcast(&self.executor, &self.clients, req).await;
    }
}

/// Run one growth and notify subscribers. Errors are logged and
/// swallowed: the guard is released by the caller and the next scan
/// republishes if the layout is still short.
async fn grow_and_broadcast(
    executor: &GrowthExecutor,
    clients: &ClientHub,
    req: &VolumeGrowRequest,
) {
    match executor.grow(req).await {
        Ok(locations) => {
            for location in locations {
                clients.broadcast(KeepConnectedResponse {
                    volume_location: location,
                });
            }
        }
        Err(e) => {
            warn!("volume grow failed ({}): {}", req.reason, e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::leader::SharedLeadership;
    use haystack_core::transport::MockVolumeTransport;
    use haystack_proto::request::HeartbeatRequest;
    use haystack_proto::{DiskType, ReplicaPlacement, Ttl};

    struct Fixture {
        controller: Arc<GrowthController>,
        topo: Arc<Topology>,
        layouts: Arc<LayoutIndex>,
        clients: Arc<ClientHub>,
        transport: Arc<MockVolumeTransport>,
        leadership: SharedLeadership,
    }

    async fn fixture(low_water: usize) -> Fixture {
        let topo = Arc::new(Topology::new());
        let layouts = Arc::new(LayoutIndex::new());
        let clients = Arc::new(ClientHub::new(64));
        let transport = Arc::new(MockVolumeTransport::new());
        let leadership = SharedLeadership::new(true);
        let executor = Arc::new(GrowthExecutor::new(
            topo.clone(),
            layouts.clone(),
            transport.clone(),
            2,
        ));
        let config = GrowthConfig {
            demoted_discard_delay: Duration::ZERO,
            discard_delay: Duration::ZERO,
            channel_size: 16,
            ..Default::default()
        };
        let controller = Arc::new(GrowthController::new(
            topo.clone(),
            layouts.clone(),
            executor,
            GrowthPolicy::new(low_water),
            Arc::new(leadership.clone()),
            clients.clone(),
            config,
        ));
        Fixture {
            controller,
            topo,
            layouts,
            clients,
            transport,
            leadership,
        }
    }

    async fn add_node(topo: &Topology, ip: &str, dc: &str, rack: &str, slots: i64) {
        topo.register_node(&HeartbeatRequest {
            ip: ip.to_string(),
            port: 8080,
            public_url: format!("{}:8080", ip),
            grpc_port: 18080,
            data_center: dc.to_string(),
            rack: rack.to_string(),
            max_volume_counts: vec![(DiskType::Hdd, slots)],
            ..Default::default()
        })
        .await;
    }

    fn layout_key(replication: &str) -> crate::topology::layout::VolumeLayoutKey {
        crate::topology::layout::VolumeLayoutKey {
            collection: String::new(),
            replica_placement: ReplicaPlacement::parse(replication).unwrap(),
            ttl: Ttl::NONE,
            disk_type: DiskType::Hdd,
        }
    }

    async fn wait_idle(controller: &GrowthController) {
        for _ in 0..200 {
            if controller.in_flight.is_empty() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(2)).await;
        }
        panic!("growth tasks did not finish");
    }

    #[tokio::test]
    async fn test_scan_grows_short_layout_end_to_end() {
        let f = fixture(7).await;
        // Three DCs, two nodes per rack, 5 slots each: 30 slots total.
        for (i, dc) in ["dc1", "dc2", "dc3"].iter().enumerate() {
            add_node(&f.topo, &format!("10.0.{}.1", i), dc, "rack1", 5).await;
            add_node(&f.topo, &format!("10.0.{}.2", i), dc, "rack1", 5).await;
        }
        let vl = f.layouts.get(&layout_key("001"));
        vl.set_last_grow_count(7);
        let (_, mut notifications) = f.clients.subscribe("filer");

        f.controller.scan_once().await;
        assert!(vl.has_grow_request());

        let req = {
            let mut rx = f.controller.rx.lock().unwrap().take().unwrap();
            rx.try_recv().unwrap()
        };
        assert_eq!(req.count, 7);
        assert!(!req.force);
        f.controller.handle_request(req.clone()).await;
        wait_idle(&f.controller).await;

        assert!(!vl.has_grow_request());
        assert_eq!(vl.writable_count(), 7);
        // 7 volumes x 2 replicas consumed 14 of the 30 slots.
        assert_eq!(f.topo.available_space_for(&req.option).await, 16);

        // One broadcast per created volume, each naming both replicas.
        for _ in 0..7 {
            let n = notifications.try_recv().unwrap();
            assert_eq!(n.volume_location.replicas.len(), 2);
        }
        assert!(notifications.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_duplicate_request_is_discarded() {
        let f = fixture(7).await;
        add_node(&f.topo, "10.0.0.1", "dc1", "rack1", 10).await;
        let vl = f.layouts.get(&layout_key("000"));

        let req = VolumeGrowRequest {
            option: layout_key("000").to_grow_option(0, 0),
            count: 2,
            force: false,
            reason: "test",
        };

        // Simulated duplicate publication: same option back-to-back.
        vl.add_grow_request();
        f.controller.handle_request(req.clone()).await;
        f.controller.handle_request(req.clone()).await;
        wait_idle(&f.controller).await;

        // Net effect of one growth only, and the guard is released.
        assert!(!vl.has_grow_request());
        assert_eq!(vl.writable_count(), 2);
        assert_eq!(f.transport.allocated_servers().len(), 2);
    }

    #[tokio::test]
    async fn test_demoted_dispatcher_drains_with_done() {
        let f = fixture(7).await;
        add_node(&f.topo, "10.0.0.1", "dc1", "rack1", 10).await;
        f.leadership.set_leader(false);

        // Five buffered requests across five layouts, guards all set.
        for i in 0..5 {
            let key = crate::topology::layout::VolumeLayoutKey {
                collection: format!("c{}", i),
                replica_placement: ReplicaPlacement::parse("000").unwrap(),
                ttl: Ttl::NONE,
                disk_type: DiskType::Hdd,
            };
            let vl = f.layouts.get(&key);
            vl.add_grow_request();
            let mut option = key.to_grow_option(0, 0);
            option.collection = key.collection.clone();
            f.controller
                .handle_request(VolumeGrowRequest {
                    option,
                    count: 1,
                    force: false,
                    reason: "test",
                })
                .await;
        }

        // Every guard released, nothing created.
        for (_, vl) in f.layouts.list_all() {
            assert!(!vl.has_grow_request());
        }
        assert!(f.transport.calls().is_empty());
    }

    #[tokio::test]
    async fn test_scanner_publishes_nothing_off_leader() {
        let f = fixture(7).await;
        add_node(&f.topo, "10.0.0.1", "dc1", "rack1", 10).await;
        let vl = f.layouts.get(&layout_key("000"));
        f.leadership.set_leader(false);

        f.controller.scan_once().await;
        assert!(!vl.has_grow_request());
        let mut rx = f.controller.rx.lock().unwrap().take().unwrap();
        assert!(rx.try_recv().is_err());

        // Re-elected: the next scan publishes.
        f.leadership.set_leader(true);
        f.controller.scan_once().await;
        assert!(vl.has_grow_request());
        assert!(rx.try_recv().is_ok());
    }

    #[tokio::test]
    async fn test_per_dc_shortage_publishes_forced_request() {
        let f = fixture(1).await;
        add_node(&f.topo, "10.0.0.1", "dc1", "rack1", 10).await;
        add_node(&f.topo, "10.0.1.1", "dc2", "rack1", 10).await;
        let vl = f.layouts.get(&layout_key("000"));
        // Layout is healthy overall but dc2 has no writable volume.
        vl.add_volume(
            haystack_proto::VolumeId(1),
            vec![crate::topology::layout::Replica {
                node: "10.0.0.1:8080".to_string(),
                data_center: "dc1".to_string(),
            }],
        );

        f.controller.scan_once().await;
        let req = {
            let mut rx = f.controller.rx.lock().unwrap().take().unwrap();
            rx.try_recv().unwrap()
        };
        assert!(req.force);
        assert_eq!(req.option.data_center, "dc2");
        assert!(vl.has_grow_request());
    }

    #[tokio::test]
    async fn test_not_needed_request_is_discarded() {
        let f = fixture(1).await;
        add_node(&f.topo, "10.0.0.1", "dc1", "rack1", 10).await;
        let vl = f.layouts.get(&layout_key("000"));
        // Already at the low-water mark: growth no longer needed.
        vl.add_volume(
            haystack_proto::VolumeId(1),
            vec![crate::topology::layout::Replica {
                node: "10.0.0.1:8080".to_string(),
                data_center: "dc1".to_string(),
            }],
        );

        vl.add_grow_request();
        f.controller
            .handle_request(VolumeGrowRequest {
                option: layout_key("000").to_grow_option(0, 0),
                count: 1,
                force: false,
                reason: "test",
            })
            .await;
        wait_idle(&f.controller).await;

        assert!(!vl.has_grow_request());
        assert!(f.transport.calls().is_empty());
    }

    #[tokio::test]
    async fn test_failed_growth_still_releases_guard() {
        let f = fixture(7).await;
        add_node(&f.topo, "10.0.0.1", "dc1", "rack1", 10).await;
        f.transport.fail_allocate_on("10.0.0.1:8080");
        let vl = f.layouts.get(&layout_key("000"));

        vl.add_grow_request();
        f.controller
            .handle_request(VolumeGrowRequest {
                option: layout_key("000").to_grow_option(0, 0),
                count: 1,
                force: false,
                reason: "test",
            })
            .await;
        wait_idle(&f.controller).await;

        assert!(!vl.has_grow_request());
        assert_eq!(vl.writable_count(), 0);
    }

    #[tokio::test]
    async fn test_start_stop() {
        let f = fixture(7).await;
        f.controller.clone().start();
        tokio::time::sleep(Duration::from_millis(5)).await;
        f.controller.stop();
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}
