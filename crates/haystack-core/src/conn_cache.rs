//! Connection pool for reusing TCP connections to volume servers.

use dashmap::DashMap;
use haystack_proto::MasterResult;
use std::sync::Arc;
use tokio::net::TcpStream;

/// A pool of TCP connections keyed by server address (`host:port`).
pub struct ConnCache {
    pool: Arc<DashMap<String, Vec<TcpStream>>>,
    max_per_server: usize,
}

impl ConnCache {
    pub fn new(max_per_server: usize) -> Self {
        Self {
            pool: Arc::new(DashMap::new()),
            max_per_server,
        }
    }

    /// Get a cached connection to the given server, or None.
    pub fn get(&self, server: &str) -> Option<TcpStream> {
        let mut entry = self.pool.get_mut(server)?;
        entry.pop()
    }

    /// Return a connection to the pool for reuse.
    pub fn put(&self, server: &str, stream: TcpStream) {
        let mut entry = self.pool.entry(server.to_string()).or_default();
        if entry.len() < self.max_per_server {
            entry.push(stream);
        }
        // Drop the stream if pool is full
    }

    /// Get a connection, creating a new one if none cached.
    pub async fn get_or_connect(&self, server: &str) -> MasterResult<TcpStream> {
        if let Some(stream) = self.get(server) {
            return Ok(stream);
        }
        crate::net::connect_to(server).await
    }

    /// Clear all cached connections for a server.
    pub fn clear_server(&self, server: &str) {
        self.pool.remove(server);
    }

    /// Clear all cached connections.
    pub fn clear_all(&self) {
        self.pool.clear();
    }
}
