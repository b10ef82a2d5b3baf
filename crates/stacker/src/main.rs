//! Haystack master daemon (stacker).
//!
//! The cluster coordinator: tracks the volume-server topology from
//! heartbeats, decides when layouts need new writable volumes, places
//! and creates them, schedules vacuum, and answers lookup/statistics
//! queries.
//!
//! Usage:
//!   stacker [OPTIONS]

mod auth;
mod broadcast;
mod config;
mod growth;
mod heartbeat;
mod leader;
mod master;
mod ops;
mod request;
mod topology;
mod vacuum;

use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tokio::sync::Notify;
use tracing::{error, info};

use haystack_core::TcpVolumeTransport;
use haystack_proto::constants::MASTER_LISTEN_PORT;
use haystack_proto::defaults::{
    DEFAULT_GARBAGE_THRESHOLD, DEFAULT_MAX_PARALLEL_VACUUM_PER_SERVER,
    DEFAULT_TCP_MAX_CONNS_PER_NODE, DEFAULT_VOLUME_RPC_DEADLINE_SECS,
    DEFAULT_VOLUME_SIZE_LIMIT_MB, DEFAULT_WRITABLE_LOW_WATER,
};

use crate::config::MasterConfig;
use crate::leader::AlwaysLeader;
use crate::master::Master;

/// Haystack master daemon
#[derive(Parser, Debug)]
#[command(name = "stacker", version, about = "Haystack cluster master")]
struct Args {
    /// Listen address
    #[arg(short = 'b', long, default_value = "0.0.0.0")]
    bind_addr: String,

    /// Listen port
    #[arg(short = 'p', long, default_value_t = MASTER_LISTEN_PORT)]
    port: u16,

    /// Volume size limit in MB
    #[arg(long, default_value_t = DEFAULT_VOLUME_SIZE_LIMIT_MB)]
    volume_size_limit_mb: u64,

    /// Replication used when requests leave it empty (e.g. "001")
    #[arg(long, default_value = "000")]
    default_replication: String,

    /// Preallocated size for new volumes in MB (0 to disable)
    #[arg(long, default_value_t = 0)]
    preallocate_mb: u64,

    /// Grow a layout when its writable volume count drops below this
    #[arg(long, default_value_t = DEFAULT_WRITABLE_LOW_WATER)]
    writable_low_water: usize,

    /// Default garbage ratio that triggers vacuum
    #[arg(long, default_value_t = DEFAULT_GARBAGE_THRESHOLD)]
    garbage_threshold: f64,

    /// Maximum concurrent compactions per volume server
    #[arg(long, default_value_t = DEFAULT_MAX_PARALLEL_VACUUM_PER_SERVER)]
    max_parallel_vacuum_per_server: usize,

    /// Deadline for volume-server RPCs in seconds
    #[arg(long, default_value_t = DEFAULT_VOLUME_RPC_DEADLINE_SECS)]
    volume_rpc_deadline_secs: u64,

    /// Key for signing file-access tokens (empty runs open)
    #[arg(long, default_value = "")]
    signing_key: String,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short = 'l', long, default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() {
    let args = Args::parse();

    // Initialize logging
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&args.log_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();

    info!("stacker v{} starting", env!("CARGO_PKG_VERSION"));

    let config = MasterConfig {
        volume_size_limit_mb: args.volume_size_limit_mb,
        default_replication: args.default_replication.clone(),
        preallocate: args.preallocate_mb * 1024 * 1024,
        writable_low_water: args.writable_low_water,
        garbage_threshold: args.garbage_threshold,
        max_parallel_vacuum_per_server: args.max_parallel_vacuum_per_server,
        volume_rpc_deadline: Duration::from_secs(args.volume_rpc_deadline_secs),
        signing_key: args.signing_key.clone(),
        ..Default::default()
    };

    let transport = Arc::new(TcpVolumeTransport::new(
        DEFAULT_TCP_MAX_CONNS_PER_NODE,
        config.volume_rpc_deadline,
    ));

    // Single-master deployments lead unconditionally; clustered setups
    // plug the election module's flag in here instead.
    let master = Master::new(config, transport, Arc::new(AlwaysLeader));

    master.controller.clone().start();

    let listener =
        match haystack_core::net::create_listen_socket(&args.bind_addr, args.port).await {
            Ok(listener) => listener,
            Err(e) => {
                error!("cannot listen on {}:{}: {}", args.bind_addr, args.port, e);
                return;
            }
        };
    info!("stacker listening on {}:{}", args.bind_addr, args.port);

    let shutdown = Arc::new(Notify::new());
    tokio::select! {
        result = request::accept_loop(master.clone(), listener, shutdown.clone()) => {
            if let Err(e) = result {
                error!("accept loop error: {}", e);
            }
        }
        _ = tokio::signal::ctrl_c() => {
            info!("SIGINT received, shutting down");
        }
    }

    master.controller.stop();
    shutdown.notify_waiters();
    info!("stacker stopped");
}
