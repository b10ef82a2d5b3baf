//! Tunable operational defaults for the haystack master.
//!
//! Protocol-level constants (wire format, magic numbers) remain in
//! [`crate::constants`]. This module centralizes the configurable
//! defaults that can be overridden via CLI flags.

// ─── Volume Sizing ──────────────────────────────────────────────────────────

/// Default volume size limit in megabytes.
pub const DEFAULT_VOLUME_SIZE_LIMIT_MB: u64 = 30 * 1000;

/// Default replica placement when a request leaves it empty.
pub const DEFAULT_REPLICA_PLACEMENT: &str = "000";

/// Default preallocation for new volumes (bytes). 0 disables.
pub const DEFAULT_PREALLOCATE_BYTES: u64 = 0;

// ─── Growth Controller ──────────────────────────────────────────────────────

/// Base interval between periodic layout scans (seconds). 14 minutes.
pub const DEFAULT_GROW_SCAN_INTERVAL_SECS: u64 = 14 * 60;

/// Uniform jitter added to each scan sleep (seconds). Spreads scans
/// across a fleet so masters do not stampede their volume servers.
pub const DEFAULT_GROW_SCAN_JITTER_SECS: u64 = 120;

/// A layout is grown when its writable volume count drops below this.
pub const DEFAULT_WRITABLE_LOW_WATER: usize = 7;

/// Buffer size of the bounded grow-request channel. The scanner blocks
/// when it fills, which throttles publication naturally.
pub const DEFAULT_GROW_CHANNEL_SIZE: usize = 64;

/// Delay before discarding a buffered grow request after losing
/// leadership (milliseconds).
pub const DEFAULT_DEMOTED_DISCARD_DELAY_MS: u64 = 1000;

/// Delay before discarding a deduplicated or no-longer-needed grow
/// request (milliseconds).
pub const DEFAULT_DISCARD_DELAY_MS: u64 = 211;

/// Attempts per volume before a growth burst gives up on a placement.
pub const DEFAULT_GROW_ATTEMPTS_PER_VOLUME: u32 = 2;

// ─── Volume-Server RPC ──────────────────────────────────────────────────────

/// Deadline for a single create/delete/vacuum RPC to a volume server
/// (seconds).
pub const DEFAULT_VOLUME_RPC_DEADLINE_SECS: u64 = 30;

/// Maximum pooled TCP connections per volume server.
pub const DEFAULT_TCP_MAX_CONNS_PER_NODE: usize = 8;

// ─── Vacuum ─────────────────────────────────────────────────────────────────

/// Default garbage ratio above which a volume is compacted.
pub const DEFAULT_GARBAGE_THRESHOLD: f64 = 0.3;

/// Maximum concurrent compactions per volume server during a sweep.
pub const DEFAULT_MAX_PARALLEL_VACUUM_PER_SERVER: usize = 1;

// ─── Keep-Connected Clients ─────────────────────────────────────────────────

/// Per-subscriber notification queue depth. Delivery is best-effort;
/// a full queue drops the notification for that subscriber.
pub const DEFAULT_CLIENT_CHANNEL_SIZE: usize = 128;
