//! # haystack-proto
//!
//! Protocol types, constants, and data structures for the haystack
//! distributed blob store.
//!
//! This crate defines the master wire protocol, volume identifiers,
//! replica placement and TTL codecs, error types, and the topology
//! snapshot shapes shared by the master and its clients.

pub mod constants;
pub mod defaults;
pub mod error;
pub mod placement;
pub mod request;
pub mod topology_info;
pub mod ttl;
pub mod volume;
pub mod volume_server;

// Re-export commonly used types at the crate root
pub use error::{MasterError, MasterResult};
pub use placement::ReplicaPlacement;
pub use request::{MasterRequest, MasterResponse};
pub use ttl::Ttl;
pub use volume::{DiskType, Location, VolumeId, VolumeInfo, VolumeLocation};
