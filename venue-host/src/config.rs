use std::time::Duration;

use clap::Parser;

/// How long a peer may go without a `HEARTBEAT` before the liveness ticker
/// evicts it.
pub const HEARTBEAT_TIMEOUT: Duration = Duration::from_secs(60);

/// Liveness ticker period.
pub const CLEANUP_INTERVAL: Duration = Duration::from_secs(15);

/// How long a transfer may sit without reaching a terminal state before the
/// liveness ticker cancels it as stale.
pub const TRANSFER_TTL: Duration = Duration::from_secs(300);

/// Chunk size used when streaming a host-library file.
pub const CHUNK_SIZE: usize = 64 * 1024;

/// Cooperative pause between host-sourced chunks, so one transfer cannot
/// starve every other endpoint sharing the async runtime.
pub const INTER_CHUNK_YIELD: Duration = Duration::from_millis(5);

/// How long a terminal transfer record lingers before the transfer engine
/// drops it, giving slow `TRANSFER_COMPLETE` observers a chance to read it.
pub const TRANSFER_RECORD_GRACE: Duration = Duration::from_secs(5);

/// The single room every host instance creates at startup.
pub const DEFAULT_ROOM_ID: &str = venue_core::DEFAULT_ROOM_ID;

/// Headroom added on top of `max_file_bytes` when sizing the inbound frame
/// limit, so a relay chunk plus its framing overhead is never rejected at
/// the transport layer.
const INBOUND_FRAME_HEADROOM_BYTES: usize = 64 * 1024;

#[derive(Parser, Debug, Clone)]
#[command(name = "venue-host", about = "LAN relay host for Venue Wallet peers")]
pub struct HostConfig {
    /// TCP port the duplex-message listener binds to.
    #[arg(long, env = "PORT", default_value_t = 8787)]
    pub port: u16,

    /// Interface address to bind the listener to.
    #[arg(long, default_value = "0.0.0.0")]
    pub bind_address: String,

    /// Human-readable room name advertised in `ROOM_INFO` and mDNS TXT records.
    #[arg(long, env = "ROOM_NAME", default_value = "Pandemic Venue")]
    pub room_name: String,

    /// mDNS instance name for the `_audiowallet._tcp` service.
    #[arg(long, env = "SERVICE_NAME", default_value = "Pandemic Venue Host")]
    pub service_name: String,

    /// Maximum size, in MiB, of a single shared or host-library file.
    #[arg(long, env = "MAX_FILE_MB", default_value_t = 50)]
    pub max_file_mb: u64,
}

impl HostConfig {
    #[must_use]
    pub fn max_file_bytes(&self) -> u64 {
        self.max_file_mb.saturating_mul(1024 * 1024)
    }

    #[must_use]
    pub fn max_inbound_frame_bytes(&self) -> usize {
        usize::try_from(self.max_file_bytes())
            .unwrap_or(usize::MAX)
            .saturating_add(INBOUND_FRAME_HEADROOM_BYTES)
    }

    #[must_use]
    pub fn listen_address(&self) -> String {
        format!("{}:{}", self.bind_address, self.port)
    }
}
