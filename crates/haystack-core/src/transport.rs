//! Volume-server transport abstraction.
//!
//! All control RPCs the master sends to volume servers (volume creation,
//! rollback deletion, vacuum phases) go through [`VolumeServerTransport`],
//! keeping the growth executor and vacuum sweep independent of the wire.
//! Production uses [`TcpVolumeTransport`](crate::tcp_transport::TcpVolumeTransport);
//! tests use [`MockVolumeTransport`].

use async_trait::async_trait;
use haystack_proto::volume_server::VolumeServerRequest;
use haystack_proto::{MasterError, MasterResult, VolumeId};

/// Parameters for creating one replica of a new volume.
#[derive(Debug, Clone)]
pub struct AllocateVolume {
    pub volume_id: VolumeId,
    pub collection: String,
    pub replica_placement: haystack_proto::ReplicaPlacement,
    pub ttl: haystack_proto::Ttl,
    pub disk_type: haystack_proto::DiskType,
    pub preallocate: u64,
    pub memory_map_max_size_mb: u32,
}

impl AllocateVolume {
    pub fn into_request(self) -> VolumeServerRequest {
        VolumeServerRequest::AllocateVolume {
            volume_id: self.volume_id,
            collection: self.collection,
            replica_placement: self.replica_placement,
            ttl: self.ttl,
            disk_type: self.disk_type,
            preallocate: self.preallocate,
            memory_map_max_size_mb: self.memory_map_max_size_mb,
        }
    }
}

/// Trait all volume-server transports must implement.
///
/// `server` is the node's control address (`host:port`). Every call is
/// subject to the transport's configured deadline; callers must never
/// hold topology locks across these awaits.
#[async_trait]
pub trait VolumeServerTransport: Send + Sync + 'static {
    /// Human-readable name for logging ("tcp", "mock").
    fn name(&self) -> &str;

    /// Create an empty writable volume on `server`.
    async fn allocate_volume(&self, server: &str, req: AllocateVolume) -> MasterResult<()>;

    /// Delete a volume from `server`. Used to roll back partially
    /// created placements; best-effort.
    async fn delete_volume(&self, server: &str, volume_id: VolumeId) -> MasterResult<()>;

    /// Ask `server` for the reclaimable garbage ratio of a volume.
    async fn vacuum_check(&self, server: &str, volume_id: VolumeId) -> MasterResult<f64>;

    /// Rewrite the volume on `server`, dropping deleted needles.
    async fn vacuum_compact(
        &self,
        server: &str,
        volume_id: VolumeId,
        preallocate: u64,
    ) -> MasterResult<()>;

    /// Switch `server` to the compacted copy.
    async fn vacuum_commit(&self, server: &str, volume_id: VolumeId) -> MasterResult<()>;
}

// ─── Test double ──────────────────────────────────────────────────────────────

use std::collections::HashSet;
use std::sync::Mutex;

/// One recorded call against the mock transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MockCall {
    Allocate { server: String, volume_id: VolumeId },
    Delete { server: String, volume_id: VolumeId },
    Compact { server: String, volume_id: VolumeId },
    Commit { server: String, volume_id: VolumeId },
}

/// In-memory transport that records calls and injects failures.
///
/// Servers listed in `fail_allocate` reject `allocate_volume`, which is
/// how rollback and fresh-plan-retry paths are exercised.
#[derive(Default)]
pub struct MockVolumeTransport {
    calls: Mutex<Vec<MockCall>>,
    fail_allocate: Mutex<HashSet<String>>,
    allocate_seq: Mutex<u32>,
    fail_allocate_calls: Mutex<HashSet<u32>>,
    garbage_ratio: Mutex<f64>,
}

impl MockVolumeTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make `allocate_volume` fail on the given server from now on.
    pub fn fail_allocate_on(&self, server: &str) {
        self.fail_allocate
            .lock()
            .unwrap()
            .insert(server.to_string());
    }

    /// Make the next `n` `allocate_volume` calls fail, whatever server
    /// they target.
    pub fn fail_next_allocates(&self, n: u32) {
        let mut calls = self.fail_allocate_calls.lock().unwrap();
        let seq = *self.allocate_seq.lock().unwrap();
        calls.extend(seq + 1..=seq + n);
    }

    /// Make exactly the `n`-th (1-based) `allocate_volume` call fail.
    pub fn fail_allocate_call(&self, n: u32) {
        self.fail_allocate_calls.lock().unwrap().insert(n);
    }

    pub fn set_garbage_ratio(&self, ratio: f64) {
        *self.garbage_ratio.lock().unwrap() = ratio;
    }

    pub fn calls(&self) -> Vec<MockCall> {
        self.calls.lock().unwrap().clone()
    }

    /// Servers that received a successful allocate, in call order.
    pub fn allocated_servers(&self) -> Vec<String> {
        self.calls()
            .into_iter()
            .filter_map(|c| match c {
                MockCall::Allocate { server, .. } => Some(server),
                _ => None,
            })
            .collect()
    }

    fn record(&self, call: MockCall) {
        self.calls.lock().unwrap().push(call);
    }
}

#[async_trait]
impl VolumeServerTransport for MockVolumeTransport {
    fn name(&self) -> &str {
        "mock"
    }

    async fn allocate_volume(&self, server: &str, req: AllocateVolume) -> MasterResult<()> {
        let seq = {
            let mut seq = self.allocate_seq.lock().unwrap();
            *seq += 1;
            *seq
        };
        if self.fail_allocate_calls.lock().unwrap().contains(&seq)
            || self.fail_allocate.lock().unwrap().contains(server)
        {
            return Err(MasterError::VolumeCreate(format!(
                "{}: injected allocate failure",
                server
            )));
        }
        self.record(MockCall::Allocate {
            server: server.to_string(),
            volume_id: req.volume_id,
        });
        Ok(())
    }

    async fn delete_volume(&self, server: &str, volume_id: VolumeId) -> MasterResult<()> {
        self.record(MockCall::Delete {
            server: server.to_string(),
            volume_id,
        });
        Ok(())
    }

    async fn vacuum_check(&self, _server: &str, _volume_id: VolumeId) -> MasterResult<f64> {
        Ok(*self.garbage_ratio.lock().unwrap())
    }

    async fn vacuum_compact(
        &self,
        server: &str,
        volume_id: VolumeId,
        _preallocate: u64,
    ) -> MasterResult<()> {
        self.record(MockCall::Compact {
            server: server.to_string(),
            volume_id,
        });
        Ok(())
    }

    async fn vacuum_commit(&self, server: &str, volume_id: VolumeId) -> MasterResult<()> {
        self.record(MockCall::Commit {
            server: server.to_string(),
            volume_id,
        });
        Ok(())
    }
}
