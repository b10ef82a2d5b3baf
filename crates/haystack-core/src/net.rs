//! Async TCP socket helpers shared by the master and its tools.

use haystack_proto::{MasterError, MasterResult};
use std::net::SocketAddr;
use tokio::net::TcpStream;
use tracing::{debug, error};

/// Connect to a remote haystack node by address string (`host:port`).
pub async fn connect_to(target: &str) -> MasterResult<TcpStream> {
    debug!("connecting to {}", target);

    let stream = TcpStream::connect(target)
        .await
        .map_err(|e| MasterError::Network(format!("connect {}: {}", target, e)))?;

    stream.set_nodelay(true).ok();
    Ok(stream)
}

/// Connect to a socket address.
pub async fn connect_to_addr(addr: SocketAddr) -> MasterResult<TcpStream> {
    debug!("connecting to {}", addr);
    let stream = TcpStream::connect(addr)
        .await
        .map_err(|e| MasterError::Network(format!("connect {}: {}", addr, e)))?;

    stream.set_nodelay(true).ok();
    Ok(stream)
}

/// Create a TCP listener on the given address and port.
pub async fn create_listen_socket(
    bind_addr: &str,
    port: u16,
) -> MasterResult<tokio::net::TcpListener> {
    let addr = format!("{}:{}", bind_addr, port);
    let listener = tokio::net::TcpListener::bind(&addr).await.map_err(|e| {
        error!("failed to bind to {}: {}", addr, e);
        MasterError::Io(e.to_string())
    })?;

    debug!("listening on {}", addr);
    Ok(listener)
}
