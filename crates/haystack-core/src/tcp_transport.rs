//! TCP-based volume-server transport — the default implementation.
//!
//! Wire format: `u32 length prefix (big-endian) + bincode(VolumeServerRequest)`
//! Response:    `u32 length prefix (big-endian) + bincode(VolumeServerResponse)`
//!
//! Uses [`ConnCache`] for connection pooling to avoid TCP handshake
//! overhead on repeated RPCs to the same server, and wraps every call in
//! the configured deadline.

use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tracing::debug;

use haystack_proto::constants::MAX_FRAME_SIZE;
use haystack_proto::volume_server::{VolumeServerRequest, VolumeServerResponse};
use haystack_proto::{MasterError, MasterResult, VolumeId};

use crate::conn_cache::ConnCache;
use crate::transport::{AllocateVolume, VolumeServerTransport};

/// TCP volume-server transport with connection pooling.
pub struct TcpVolumeTransport {
    cache: ConnCache,
    deadline: Duration,
}

impl TcpVolumeTransport {
    /// `max_conns_per_server` controls the pool size; `deadline` bounds
    /// every RPC including connect time.
    pub fn new(max_conns_per_server: usize, deadline: Duration) -> Self {
        Self {
            cache: ConnCache::new(max_conns_per_server),
            deadline,
        }
    }

    async fn call(
        &self,
        server: &str,
        req: VolumeServerRequest,
    ) -> MasterResult<VolumeServerResponse> {
        let fut = self.exchange(server, req);
        match tokio::time::timeout(self.deadline, fut).await {
            Ok(result) => result,
            Err(_) => {
                // A timed-out stream may carry a stale response; never reuse it.
                self.cache.clear_server(server);
                Err(MasterError::Timeout(format!(
                    "volume server {} did not answer within {:?}",
                    server, self.deadline
                )))
            }
        }
    }

    async fn exchange(
        &self,
        server: &str,
        req: VolumeServerRequest,
    ) -> MasterResult<VolumeServerResponse> {
        let req_data = bincode::serialize(&req)
            .map_err(|e| MasterError::Protocol(e.to_string()))?;

        let mut stream = self.cache.get_or_connect(server).await?;

        let result = Self::write_read(&mut stream, &req_data).await;
        match result {
            Ok(resp) => {
                self.cache.put(server, stream);
                Ok(resp)
            }
            Err(e) => {
                debug!("dropping connection to {} after error: {}", server, e);
                Err(e)
            }
        }
    }

    async fn write_read(
        stream: &mut TcpStream,
        req_data: &[u8],
    ) -> MasterResult<VolumeServerResponse> {
        stream
            .write_u32(req_data.len() as u32)
            .await
            .map_err(|e| MasterError::Network(e.to_string()))?;
        stream
            .write_all(req_data)
            .await
            .map_err(|e| MasterError::Network(e.to_string()))?;

        let resp_len = stream
            .read_u32()
            .await
            .map_err(|e| MasterError::Network(e.to_string()))? as usize;
        if resp_len > MAX_FRAME_SIZE {
            return Err(MasterError::Protocol(format!(
                "response frame too large: {} bytes",
                resp_len
            )));
        }

        let mut buf = vec![0u8; resp_len];
        stream
            .read_exact(&mut buf)
            .await
            .map_err(|e| MasterError::Network(e.to_string()))?;

        bincode::deserialize(&buf).map_err(|e| MasterError::Protocol(e.to_string()))
    }

    fn expect_ok(resp: VolumeServerResponse) -> MasterResult<()> {
        match resp {
            VolumeServerResponse::Ok => Ok(()),
            VolumeServerResponse::Error(e) => Err(e),
            other => Err(MasterError::Protocol(format!(
                "unexpected response: {:?}",
                other
            ))),
        }
    }
}

#[async_trait]
impl VolumeServerTransport for TcpVolumeTransport {
    fn name(&self) -> &str {
        "tcp"
    }

    async fn allocate_volume(&self, server: &str, req: AllocateVolume) -> MasterResult<()> {
        Self::expect_ok(self.call(server, req.into_request()).await?)
    }

    async fn delete_volume(&self, server: &str, volume_id: VolumeId) -> MasterResult<()> {
        Self::expect_ok(
            self.call(server, VolumeServerRequest::DeleteVolume { volume_id })
                .await?,
        )
    }

    async fn vacuum_check(&self, server: &str, volume_id: VolumeId) -> MasterResult<f64> {
        match self
            .call(server, VolumeServerRequest::VacuumCheck { volume_id })
            .await?
        {
            VolumeServerResponse::VacuumCheck { garbage_ratio } => Ok(garbage_ratio),
            VolumeServerResponse::Error(e) => Err(e),
            other => Err(MasterError::Protocol(format!(
                "unexpected response: {:?}",
                other
            ))),
        }
    }

    async fn vacuum_compact(
        &self,
        server: &str,
        volume_id: VolumeId,
        preallocate: u64,
    ) -> MasterResult<()> {
        Self::expect_ok(
            self.call(
                server,
                VolumeServerRequest::VacuumCompact {
                    volume_id,
                    preallocate,
                },
            )
            .await?,
        )
    }

    async fn vacuum_commit(&self, server: &str, volume_id: VolumeId) -> MasterResult<()> {
        Self::expect_ok(
            self.call(server, VolumeServerRequest::VacuumCommit { volume_id })
                .await?,
        )
    }
}
