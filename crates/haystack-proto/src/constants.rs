//! Protocol-level constants shared by all haystack components.
//!
//! Tunable operational defaults live in [`crate::defaults`].

/// Master wire protocol version.
pub const MASTER_PROTO_VER: u8 = 1;

/// Default master listen port.
pub const MASTER_LISTEN_PORT: u16 = 9333;

/// Maximum size of a single wire frame (bytes). 64 MB.
/// Protects against corrupt length prefixes.
pub const MAX_FRAME_SIZE: usize = 64 * 1024 * 1024;

/// Maximum number of shards an erasure-coded volume is split into.
pub const EC_SHARD_COUNT: u32 = 14;
