//! Request pipeline: accept, decode, dispatch, respond.
//!
//! Frames are `u32 big-endian length prefix + bincode`. A connection
//! serves request/response pairs until it sends `KeepConnected`, which
//! turns it into a one-way notification stream fed by the client hub.

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tracing::{debug, error, info};

use haystack_proto::constants::{MASTER_PROTO_VER, MAX_FRAME_SIZE};
use haystack_proto::request::{MasterRequest, RequestHeader, ResponseEnvelope};
use haystack_proto::{MasterError, MasterResponse, MasterResult};

use crate::master::SharedMaster;
use crate::ops;

/// Accept loop: listen for incoming connections and spawn handlers.
pub async fn accept_loop(
    master: SharedMaster,
    listener: tokio::net::TcpListener,
    shutdown: std::sync::Arc<tokio::sync::Notify>,
) -> MasterResult<()> {
    loop {
        tokio::select! {
            result = listener.accept() => {
                match result {
                    Ok((stream, peer)) => {
                        debug!("accepted connection from {}", peer);
                        let master = master.clone();
                        tokio::spawn(async move {
                            if let Err(e) = handle_client(master, stream).await {
                                debug!("client {} disconnected: {}", peer, e);
                            }
                        });
                    }
                    Err(e) => {
                        error!("accept error: {}", e);
                    }
                }
            }
            _ = shutdown.notified() => {
                info!("accept loop shutting down");
                break;
            }
        }
    }
    Ok(())
}

/// Handle a single connection: read requests, process, send responses.
async fn handle_client(master: SharedMaster, mut stream: TcpStream) -> MasterResult<()> {
    loop {
        let len = match stream.read_u32().await {
            Ok(n) => n as usize,
            Err(_) => return Ok(()), // Client disconnected cleanly
        };
        if len > MAX_FRAME_SIZE {
            error!("request frame too large: {} bytes", len);
            return Err(MasterError::Protocol(format!("frame of {} bytes", len)));
        }

        let mut buf = vec![0u8; len];
        stream
            .read_exact(&mut buf)
            .await
            .map_err(|e| MasterError::Network(e.to_string()))?;

        let (header, req): (RequestHeader, MasterRequest) = bincode::deserialize(&buf)
            .map_err(|e| {
                error!("failed to deserialize request: {}", e);
                MasterError::Protocol(e.to_string())
            })?;

        if let MasterRequest::KeepConnected { client_name } = req {
            return keep_connected(master, stream, &client_name).await;
        }

        let body = match ops::handle(&master, req).await {
            Ok(resp) => resp,
            Err(e) => MasterResponse::Error(e),
        };
        let envelope = ResponseEnvelope {
            proto_ver: MASTER_PROTO_VER,
            id: header.id,
            body,
        };
        write_frame(&mut stream, &envelope).await?;
    }
}

/// Stream new-volume notifications until the client goes away.
async fn keep_connected(
    master: SharedMaster,
    stream: TcpStream,
    client_name: &str,
) -> MasterResult<()> {
    let (id, mut notifications) = master.clients.subscribe(client_name);
    let (mut reader, mut writer) = stream.into_split();
    let mut probe = [0u8; 1];

    loop {
        tokio::select! {
            notification = notifications.recv() => {
                let notification = match notification {
                    Some(n) => n,
                    None => break,
                };
                if write_frame(&mut writer, &notification).await.is_err() {
                    break;
                }
            }
            // The client never sends again on this stream; any read
            // completion means it hung up.
            _ = reader.read(&mut probe) => break,
        }
    }
    master.clients.unsubscribe(id);
    Ok(())
}

async fn write_frame<W, T>(writer: &mut W, value: &T) -> MasterResult<()>
where
    W: tokio::io::AsyncWrite + Unpin,
    T: serde::Serialize,
{
    let data = bincode::serialize(value).map_err(|e| MasterError::Protocol(e.to_string()))?;
    writer
        .write_u32(data.len() as u32)
        .await
        .map_err(|e| MasterError::Network(e.to_string()))?;
    writer
        .write_all(&data)
        .await
        .map_err(|e| MasterError::Network(e.to_string()))?;
    Ok(())
}
