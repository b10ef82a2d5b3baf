//! # haystack-core
//!
//! Shared infrastructure for haystack daemons: the volume-server
//! transport seam, its TCP implementation, connection pooling, and
//! socket helpers.

pub mod conn_cache;
pub mod net;
pub mod tcp_transport;
pub mod transport;

pub use tcp_transport::TcpVolumeTransport;
pub use transport::{AllocateVolume, MockVolumeTransport, VolumeServerTransport};
