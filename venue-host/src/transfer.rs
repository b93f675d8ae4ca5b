use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use thiserror::Error;
use tokio::io::AsyncReadExt;
use tokio::sync::Mutex;
use tracing::{error, warn};
use venue_core::{
    ErrorCode, FileId, HostMessage, PeerId, RelayTransferSnapshot, SourceKind, TransferId,
    TransferState, decode_binary_frame, encode_binary_frame, now_ms,
};

use crate::config::{CHUNK_SIZE, INTER_CHUNK_YIELD, TRANSFER_RECORD_GRACE};
use crate::connection::Endpoint;

#[derive(Debug, Error)]
pub enum TransferError {
    #[error("unknown transfer id")]
    UnknownTransfer,
}

struct TransferRecord {
    transfer_id: TransferId,
    file_id: FileId,
    source_kind: SourceKind,
    source_peer_id: Option<PeerId>,
    requester_peer_id: PeerId,
    requester_endpoint: Endpoint,
    source_endpoint: Option<Endpoint>,
    declared_size: u64,
    mime_type: String,
    sha256: String,
    bytes_transferred: u64,
    state: TransferState,
    created_at_ms: u64,
    last_activity_ms: u64,
    start_sent: bool,
}

impl TransferRecord {
    fn snapshot(&self) -> RelayTransferSnapshot {
        RelayTransferSnapshot {
            transfer_id: self.transfer_id.clone(),
            file_id: self.file_id.clone(),
            source_kind: self.source_kind,
            source_peer_id: self.source_peer_id.clone(),
            requester_peer_id: self.requester_peer_id.clone(),
            declared_size: self.declared_size,
            mime_type: self.mime_type.clone(),
            sha256: self.sha256.clone(),
            bytes_transferred: self.bytes_transferred,
            state: self.state,
            created_at_ms: self.created_at_ms,
        }
    }

    fn send_start(&mut self) {
        if self.start_sent {
            return;
        }
        self.requester_endpoint.send_text(&HostMessage::TransferStart {
            transfer_id: self.transfer_id.clone(),
            file_id: self.file_id.clone(),
            size: self.declared_size,
            mime_type: self.mime_type.clone(),
            ts: now_ms(),
        });
        self.start_sent = true;
    }
}

/// Parameters for starting a new relay transfer, gathered by the dispatcher
/// from a resolved file and the inbound `RELAY_PULL`.
pub struct StartTransfer {
    pub transfer_id: TransferId,
    pub file_id: FileId,
    pub source_kind: SourceKind,
    pub source_peer_id: Option<PeerId>,
    pub requester_peer_id: PeerId,
    pub requester_endpoint: Endpoint,
    pub source_endpoint: Option<Endpoint>,
    pub declared_size: u64,
    pub mime_type: String,
    pub sha256: String,
}

/// Tracks every active relay transfer and does the chunk pumping. Owns its
/// own lock, independent of [`crate::state::RoomRegistry`]: it holds
/// `Endpoint` clones directly rather than looking peers up by id, so a
/// transfer keeps routing correctly even after its peer record is removed
/// from the registry (the send becomes a silent no-op, same as any other
/// post-disconnect send).
pub struct TransferEngine {
    transfers: Mutex<HashMap<TransferId, TransferRecord>>,
}

impl Default for TransferEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl TransferEngine {
    #[must_use]
    pub fn new() -> Self {
        Self {
            transfers: Mutex::new(HashMap::new()),
        }
    }

    /// Creates the transfer record in `Pending` and immediately sends
    /// `TRANSFER_START` using the size/mime already known from the resolved
    /// file — the requester does not wait for the source's own
    /// `RELAY_PUSH_META` to learn the transfer has begun.
    pub async fn start(&self, params: StartTransfer) -> RelayTransferSnapshot {
        let now = now_ms();
        let mut record = TransferRecord {
            transfer_id: params.transfer_id.clone(),
            file_id: params.file_id,
            source_kind: params.source_kind,
            source_peer_id: params.source_peer_id,
            requester_peer_id: params.requester_peer_id,
            requester_endpoint: params.requester_endpoint,
            source_endpoint: params.source_endpoint,
            declared_size: params.declared_size,
            mime_type: params.mime_type,
            sha256: params.sha256,
            bytes_transferred: 0,
            state: TransferState::Pending,
            created_at_ms: now,
            last_activity_ms: now,
            start_sent: false,
        };
        record.send_start();
        let snapshot = record.snapshot();
        self.transfers.lock().await.insert(params.transfer_id, record);
        snapshot
    }

    /// Authoritative size/mime/sha override from the source peer's
    /// `RELAY_PUSH_META`. Transitions `Pending -> Uploading`.
    pub async fn on_push_meta(
        &self,
        transfer_id: &str,
        size: u64,
        mime_type: String,
        sha256: String,
    ) -> Result<(), TransferError> {
        let mut transfers = self.transfers.lock().await;
        let record = transfers.get_mut(transfer_id).ok_or(TransferError::UnknownTransfer)?;
        if record.state.is_terminal() {
            return Ok(());
        }
        record.declared_size = size;
        record.mime_type = mime_type;
        record.sha256 = sha256;
        record.last_activity_ms = now_ms();
        if record.state == TransferState::Pending {
            record.state = TransferState::Uploading;
        }
        record.send_start();
        Ok(())
    }

    /// Forwards one binary relay frame byte-for-byte to the requester and
    /// emits a `TRANSFER_PROGRESS` for it. `raw_frame` is exactly what was
    /// received on the wire — no re-framing.
    pub async fn on_chunk(
        &self,
        transfer_id: &str,
        chunk_len: u64,
        raw_frame: Vec<u8>,
    ) -> Result<(), TransferError> {
        let mut transfers = self.transfers.lock().await;
        let record = transfers.get_mut(transfer_id).ok_or(TransferError::UnknownTransfer)?;
        if record.state.is_terminal() {
            return Ok(());
        }
        if record.state == TransferState::Pending {
            record.state = TransferState::Uploading;
        }

        record.bytes_transferred += chunk_len;
        record.last_activity_ms = now_ms();
        record.requester_endpoint.send_binary(raw_frame);

        let total = record.declared_size;
        let progress = if total == 0 {
            100
        } else {
            u8::try_from((record.bytes_transferred.saturating_mul(100) / total).min(100)).unwrap_or(100)
        };
        record.requester_endpoint.send_text(&HostMessage::TransferProgress {
            transfer_id: transfer_id.to_owned(),
            bytes_transferred: record.bytes_transferred,
            total_bytes: total,
            progress,
            ts: now_ms(),
        });
        Ok(())
    }

    #[must_use]
    pub async fn snapshot(&self, transfer_id: &str) -> Option<RelayTransferSnapshot> {
        self.transfers.lock().await.get(transfer_id).map(TransferRecord::snapshot)
    }

    /// Extracts the transfer id from a raw binary frame and hands the chunk
    /// off. Unknown transfer ids are dropped with a log line rather than an
    /// `ERROR` reply, since the sender may have raced a cancellation.
    pub async fn handle_binary_frame(&self, raw: &[u8]) {
        let Some(frame) = decode_binary_frame(raw) else {
            return;
        };
        let chunk_len = frame.chunk.len() as u64;
        let transfer_id = frame.transfer_id.clone();
        if self.on_chunk(&transfer_id, chunk_len, raw.to_vec()).await.is_err() {
            warn!("dropping binary frame for unknown transfer {}", transfer_id);
        }
    }

    /// Transitions `Uploading -> Complete`, notifies the requester, and
    /// schedules the record's removal after the grace delay.
    pub async fn on_complete(self: Arc<Self>, transfer_id: &str) -> Result<(), TransferError> {
        let mut transfers = self.transfers.lock().await;
        let record = transfers.get_mut(transfer_id).ok_or(TransferError::UnknownTransfer)?;
        if record.state.is_terminal() {
            return Ok(());
        }
        record.state = TransferState::Complete;
        record.requester_endpoint.send_text(&HostMessage::TransferComplete {
            transfer_id: transfer_id.to_owned(),
            file_id: record.file_id.clone(),
            sha256: record.sha256.clone(),
            ts: now_ms(),
        });
        drop(transfers);
        self.spawn_removal(transfer_id.to_owned());
        Ok(())
    }

    /// Transitions to `Error`, notifying both requester and source (if
    /// still connected), then schedules removal.
    pub async fn on_error(self: Arc<Self>, transfer_id: &str, code: ErrorCode, message: &str) {
        let mut transfers = self.transfers.lock().await;
        let Some(record) = transfers.get_mut(transfer_id) else {
            return;
        };
        if record.state.is_terminal() {
            return;
        }
        record.state = TransferState::Error;
        let error = HostMessage::Error {
            code,
            message: message.to_owned(),
            ts: now_ms(),
        };
        record.requester_endpoint.send_text(&error);
        if let Some(source) = &record.source_endpoint {
            source.send_text(&error);
        }
        drop(transfers);
        self.spawn_removal(transfer_id.to_owned());
    }

    /// Used when either endpoint of a transfer disconnects without an
    /// explicit protocol error — no `ERROR` is sent, the transfer simply
    /// ends.
    pub async fn cancel(self: Arc<Self>, transfer_id: &str) {
        let mut transfers = self.transfers.lock().await;
        let Some(record) = transfers.get_mut(transfer_id) else {
            return;
        };
        if record.state.is_terminal() {
            return;
        }
        record.state = TransferState::Cancelled;
        drop(transfers);
        self.spawn_removal(transfer_id.to_owned());
    }

    /// Like [`Self::cancel`], but also notifies both endpoints with an
    /// `ERROR` message first. Used when a source peer disconnects mid-pull:
    /// the requester still needs `ERROR{OWNER_OFFLINE}`, but the transfer's
    /// own terminal state is a disconnect-driven `Cancelled`, not `Error`
    /// (which is reserved for genuine I/O failures via [`Self::on_error`]).
    pub async fn cancel_with_error(self: Arc<Self>, transfer_id: &str, code: ErrorCode, message: &str) {
        let mut transfers = self.transfers.lock().await;
        let Some(record) = transfers.get_mut(transfer_id) else {
            return;
        };
        if record.state.is_terminal() {
            return;
        }
        record.state = TransferState::Cancelled;
        let error = HostMessage::Error {
            code,
            message: message.to_owned(),
            ts: now_ms(),
        };
        record.requester_endpoint.send_text(&error);
        if let Some(source) = &record.source_endpoint {
            source.send_text(&error);
        }
        drop(transfers);
        self.spawn_removal(transfer_id.to_owned());
    }

    /// Cancels every active transfer where `peer_id` is either the
    /// requester or the source, sending `OWNER_OFFLINE` to the remaining
    /// side when the source vanished mid-pull. Called on disconnect and on
    /// liveness-ticker eviction.
    pub async fn cancel_for_peer(self: Arc<Self>, peer_id: &str) {
        let matches: Vec<(TransferId, bool)> = {
            let transfers = self.transfers.lock().await;
            transfers
                .values()
                .filter(|record| {
                    !record.state.is_terminal()
                        && (record.requester_peer_id == peer_id
                            || record.source_peer_id.as_deref() == Some(peer_id))
                })
                .map(|record| (record.transfer_id.clone(), record.source_peer_id.as_deref() == Some(peer_id)))
                .collect()
        };

        for (transfer_id, is_source) in matches {
            if is_source {
                Arc::clone(&self)
                    .cancel_with_error(&transfer_id, ErrorCode::OwnerOffline, "source peer disconnected")
                    .await;
            } else {
                Arc::clone(&self).cancel(&transfer_id).await;
            }
        }
    }

    /// Cancels transfers that have seen no chunk activity for `ttl_ms`.
    /// Called by the liveness ticker.
    pub async fn sweep_stale(self: Arc<Self>, now: u64, ttl_ms: u64) {
        let stale: Vec<TransferId> = {
            let transfers = self.transfers.lock().await;
            transfers
                .values()
                .filter(|record| {
                    !record.state.is_terminal() && now.saturating_sub(record.last_activity_ms) > ttl_ms
                })
                .map(|record| record.transfer_id.clone())
                .collect()
        };
        for transfer_id in stale {
            warn!("cancelling stale transfer {}", transfer_id);
            Arc::clone(&self).cancel(&transfer_id).await;
        }
    }

    /// Streams a host-library file to the requester in fixed-size chunks,
    /// yielding cooperatively between chunks (a non-blocking async sleep,
    /// never a thread-blocking one) so one transfer cannot starve every
    /// other connection's outbound task on the same runtime.
    pub async fn stream_host_file(self: Arc<Self>, transfer_id: TransferId, path: PathBuf) {
        let mut file = match tokio::fs::File::open(&path).await {
            Ok(file) => file,
            Err(err) => {
                error!("failed to open host file {:?}: {}", path, err);
                Arc::clone(&self)
                    .on_error(&transfer_id, ErrorCode::TransferError, "host file unavailable")
                    .await;
                return;
            }
        };

        let mut buf = vec![0_u8; CHUNK_SIZE];
        loop {
            let read = match file.read(&mut buf).await {
                Ok(0) => break,
                Ok(n) => n,
                Err(err) => {
                    error!("failed reading host file {:?}: {}", path, err);
                    Arc::clone(&self)
                        .on_error(&transfer_id, ErrorCode::TransferError, "host file read error")
                        .await;
                    return;
                }
            };

            let frame = match encode_binary_frame(&transfer_id, &buf[..read]) {
                Ok(frame) => frame,
                Err(err) => {
                    error!("failed to encode host relay frame: {}", err);
                    Arc::clone(&self)
                        .on_error(&transfer_id, ErrorCode::TransferError, "internal framing error")
                        .await;
                    return;
                }
            };

            if self.on_chunk(&transfer_id, read as u64, frame).await.is_err() {
                return;
            }
            tokio::time::sleep(INTER_CHUNK_YIELD).await;
        }

        let _ = Arc::clone(&self).on_complete(&transfer_id).await;
    }

    fn spawn_removal(self: &Arc<Self>, transfer_id: TransferId) {
        let engine = Arc::clone(self);
        tokio::spawn(async move {
            tokio::time::sleep(TRANSFER_RECORD_GRACE).await;
            engine.transfers.lock().await.remove(&transfer_id);
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::mpsc;

    fn endpoint() -> (Endpoint, mpsc::UnboundedReceiver<axum::extract::ws::Message>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Endpoint::new(tx), rx)
    }

    fn start_params(transfer_id: &str, requester: Endpoint, declared_size: u64) -> StartTransfer {
        StartTransfer {
            transfer_id: transfer_id.to_owned(),
            file_id: "F1".to_owned(),
            source_kind: SourceKind::Peer,
            source_peer_id: Some("A".to_owned()),
            requester_peer_id: "B".to_owned(),
            requester_endpoint: requester,
            source_endpoint: None,
            declared_size,
            mime_type: "audio/mpeg".to_owned(),
            sha256: "h".to_owned(),
        }
    }

    #[tokio::test]
    async fn start_sends_transfer_start_immediately() {
        let engine = Arc::new(TransferEngine::new());
        let (requester, mut rx) = endpoint();
        let snapshot = engine.start(start_params("T1", requester, 1024)).await;

        assert_eq!(snapshot.state, TransferState::Pending);
        let axum::extract::ws::Message::Text(text) = rx.try_recv().unwrap() else {
            panic!("expected text frame");
        };
        assert!(text.contains("TRANSFER_START"));
    }

    #[tokio::test]
    async fn chunk_advances_bytes_transferred_and_state() {
        let engine = Arc::new(TransferEngine::new());
        let (requester, _rx) = endpoint();
        engine.start(start_params("T1", requester, 10)).await;

        engine.on_chunk("T1", 10, vec![0; 10]).await.unwrap();
        let snapshot = engine.snapshot("T1").await.unwrap();
        assert_eq!(snapshot.bytes_transferred, 10);
        assert_eq!(snapshot.state, TransferState::Uploading);
    }

    #[tokio::test]
    async fn complete_is_terminal_and_final() {
        let engine = Arc::new(TransferEngine::new());
        let (requester, _rx) = endpoint();
        engine.start(start_params("T1", requester, 0)).await;

        Arc::clone(&engine).on_complete("T1").await.unwrap();
        engine.on_chunk("T1", 5, vec![0; 5]).await.unwrap();
        let snapshot = engine.snapshot("T1").await.unwrap();
        assert_eq!(snapshot.state, TransferState::Complete);
        assert_eq!(snapshot.bytes_transferred, 0);
    }

    #[tokio::test]
    async fn unknown_transfer_chunk_errors() {
        let engine = Arc::new(TransferEngine::new());
        let err = engine.on_chunk("missing", 1, vec![0]).await.unwrap_err();
        assert!(matches!(err, TransferError::UnknownTransfer));
    }

    #[tokio::test]
    async fn cancel_for_peer_as_source_sends_owner_offline() {
        let engine = Arc::new(TransferEngine::new());
        let (requester, mut req_rx) = endpoint();
        let (source, _src_rx) = endpoint();
        let mut params = start_params("T1", requester, 10);
        params.source_endpoint = Some(source);
        engine.start(params).await;
        while req_rx.try_recv().is_ok() {}

        Arc::clone(&engine).cancel_for_peer("A").await;
        let snapshot = engine.snapshot("T1").await.unwrap();
        assert_eq!(snapshot.state, TransferState::Cancelled);

        let axum::extract::ws::Message::Text(text) = req_rx.try_recv().unwrap() else {
            panic!("expected error frame");
        };
        assert!(text.contains("OWNER_OFFLINE"));
    }
}
