use std::sync::Arc;

use tracing::info;
use venue_core::now_ms;

use crate::config::{CLEANUP_INTERVAL, HEARTBEAT_TIMEOUT, TRANSFER_TTL};
use crate::dispatcher::ConnectionState;
use crate::dispatcher::Dispatcher;
use crate::state::RoomRegistry;
use crate::transfer::TransferEngine;

/// Periodically evicts peers that have missed their `HEARTBEAT` window and
/// cancels transfers that have seen no chunk activity for the transfer TTL.
/// Runs for the lifetime of the process; `main` aborts its task on shutdown.
pub async fn run(registry: Arc<RoomRegistry>, transfers: Arc<TransferEngine>, dispatcher: Arc<Dispatcher>) {
    let mut ticker = tokio::time::interval(CLEANUP_INTERVAL);
    loop {
        ticker.tick().await;
        let now = now_ms();

        let stale_peers = registry.stale_peers(now, HEARTBEAT_TIMEOUT.as_millis() as u64).await;
        for peer_id in stale_peers {
            info!("evicting peer {} for missed heartbeat", peer_id);
            let state = ConnectionState::for_peer(peer_id);
            dispatcher.handle_disconnect(&state).await;
        }

        Arc::clone(&transfers).sweep_stale(now, TRANSFER_TTL.as_millis() as u64).await;
    }
}
