use std::sync::Arc;

use tracing::warn;
use venue_core::{
    ClientMessage, ErrorCode, FileId, FileMeta, HOST_OWNER_PEER_ID, Features, HostMessage, PeerId,
    Platform, RoomId, SourceKind, now_ms,
};

use crate::config::HostConfig;
use crate::connection::Endpoint;
use crate::error::RegistryError;
use crate::library::HostLibrary;
use crate::state::RoomRegistry;
use crate::transfer::{StartTransfer, TransferEngine};

/// Per-connection state the dispatcher needs across messages. Everything
/// else — room membership, shared files, last-seen time — lives in the
/// registry, keyed by `peer_id` once it is known.
#[derive(Debug, Default)]
pub struct ConnectionState {
    pub peer_id: Option<PeerId>,
    /// Set once `JOIN_ROOM` succeeds, cleared on `LEAVE_ROOM`. Tracked here
    /// rather than re-derived from the registry so `REQUEST_FILE` can reject
    /// an unjoined peer without an extra registry round trip.
    joined: bool,
}

impl ConnectionState {
    /// Builds a state for a peer the liveness ticker already knows is
    /// registered, so `Dispatcher::handle_disconnect` can be driven the
    /// same way for a heartbeat eviction as for a real socket close.
    #[must_use]
    pub fn for_peer(peer_id: PeerId) -> Self {
        Self {
            peer_id: Some(peer_id),
            joined: false,
        }
    }
}

/// Implements the protocol state machine: decodes inbound text frames,
/// enforces the `HELLO`-before-anything-else rule, mutates the
/// registry and transfer engine, and replies or broadcasts as required.
/// Holds no per-connection state of its own — `handle_text` is called with
/// the caller's [`ConnectionState`] on every frame.
pub struct Dispatcher {
    registry: Arc<RoomRegistry>,
    transfers: Arc<TransferEngine>,
    library: Arc<dyn HostLibrary>,
    host_name: String,
    max_file_bytes: u64,
    max_file_mb: u64,
}

impl Dispatcher {
    #[must_use]
    pub fn new(
        registry: Arc<RoomRegistry>,
        transfers: Arc<TransferEngine>,
        library: Arc<dyn HostLibrary>,
        config: &HostConfig,
    ) -> Self {
        Self {
            registry,
            transfers,
            library,
            host_name: config.service_name.clone(),
            max_file_bytes: config.max_file_bytes(),
            max_file_mb: config.max_file_mb,
        }
    }

    fn features(&self) -> Features {
        Features {
            relay: true,
            max_file_mb: Some(self.max_file_mb),
        }
    }

    /// Decodes and handles one inbound text frame. Malformed JSON gets an
    /// `ERROR{PARSE_ERROR}` reply rather than a dropped connection.
    pub async fn handle_text(&self, state: &mut ConnectionState, endpoint: &Endpoint, text: &str) {
        let message = match ClientMessage::from_json(text) {
            Ok(message) => message,
            Err(err) => {
                warn!("rejecting malformed client message: {}", err);
                send_error(endpoint, ErrorCode::ParseError, "malformed message");
                return;
            }
        };

        if let Some(peer_id) = &state.peer_id {
            let _ = self.registry.touch(peer_id).await;
        }

        match message {
            ClientMessage::Hello {
                peer_id,
                device_name,
                platform,
                app_version,
                ..
            } => {
                self.handle_hello(state, endpoint, peer_id, device_name, platform, app_version)
                    .await;
            }
            ClientMessage::JoinRoom { room_id, .. } => {
                self.handle_join_room(state, endpoint, room_id).await;
            }
            ClientMessage::LeaveRoom { .. } => {
                self.handle_leave_room(state, endpoint).await;
            }
            ClientMessage::Heartbeat { .. } => {}
            ClientMessage::ShareFiles { files, .. } => {
                self.handle_share_files(state, endpoint, files).await;
            }
            ClientMessage::UnshareFiles { file_ids, .. } => {
                self.handle_unshare_files(state, endpoint, file_ids).await;
            }
            ClientMessage::RequestFile { file_id, .. } => {
                self.handle_request_file(state, endpoint, file_id).await;
            }
            ClientMessage::RelayPull {
                file_id,
                transfer_id,
                ..
            } => {
                self.handle_relay_pull(state, endpoint, file_id, transfer_id).await;
            }
            ClientMessage::RelayPushMeta {
                transfer_id,
                size,
                mime_type,
                sha256,
                ..
            } => {
                if self
                    .transfers
                    .on_push_meta(&transfer_id, size, mime_type, sha256)
                    .await
                    .is_err()
                {
                    warn!("RELAY_PUSH_META for unknown transfer {}", transfer_id);
                }
            }
            ClientMessage::RelayComplete { transfer_id, .. } => {
                let _ = Arc::clone(&self.transfers).on_complete(&transfer_id).await;
            }
        }
    }

    /// Broadcasts a host-library upsert to the default room. The source
    /// never broadcasts library changes to peers that have not joined a
    /// room, so this only ever reaches `peers_in_room`.
    pub async fn broadcast_library_upsert(&self, files: Vec<FileMeta>) {
        if files.is_empty() {
            return;
        }
        self.broadcast_to_room(
            venue_core::DEFAULT_ROOM_ID,
            &HostMessage::IndexUpsert { files, ts: now_ms() },
        )
        .await;
    }

    pub async fn broadcast_library_remove(&self, file_ids: Vec<FileId>) {
        if file_ids.is_empty() {
            return;
        }
        self.broadcast_to_room(
            venue_core::DEFAULT_ROOM_ID,
            &HostMessage::IndexRemove { file_ids, ts: now_ms() },
        )
        .await;
    }

    /// Forwards one inbound binary relay frame straight to the transfer
    /// engine. There is no registration gate here: a chunk for an unknown
    /// or already-terminal transfer is simply dropped.
    pub async fn handle_binary(&self, raw: &[u8]) {
        self.transfers.handle_binary_frame(raw).await;
    }

    /// Called once, when the connection closes for any reason (client
    /// close, read error, or server shutdown). Cascades the departure
    /// through the registry and cancels any transfer the peer was part of.
    pub async fn handle_disconnect(&self, state: &ConnectionState) {
        let Some(peer_id) = &state.peer_id else {
            return;
        };
        let effects = self.registry.remove_peer(peer_id).await;
        if let Some(room_id) = &effects.room_id {
            self.broadcast_departure(room_id, peer_id).await;
        }
        Arc::clone(&self.transfers).cancel_for_peer(peer_id).await;
    }

    fn require_peer<'a>(&self, state: &'a ConnectionState, endpoint: &Endpoint) -> Option<&'a str> {
        match &state.peer_id {
            Some(peer_id) => Some(peer_id.as_str()),
            None => {
                send_error(endpoint, ErrorCode::NotRegistered, "send HELLO first");
                None
            }
        }
    }

    /// Like [`Self::require_peer`], but also enforces that `JOIN_ROOM` has
    /// succeeded: `REQUEST_FILE` must be rejected with `NOT_IN_ROOM` before
    /// a peer joins, same as `SHARE_FILES`/`UNSHARE_FILES` already are.
    fn require_joined_peer<'a>(&self, state: &'a ConnectionState, endpoint: &Endpoint) -> Option<&'a str> {
        let peer_id = self.require_peer(state, endpoint)?;
        if !state.joined {
            send_error(endpoint, ErrorCode::NotInRoom, "join a room first");
            return None;
        }
        Some(peer_id)
    }

    async fn handle_hello(
        &self,
        state: &mut ConnectionState,
        endpoint: &Endpoint,
        peer_id: PeerId,
        device_name: String,
        platform: Platform,
        app_version: Option<String>,
    ) {
        if state.peer_id.is_some() {
            send_error(endpoint, ErrorCode::AlreadyRegistered, "HELLO already sent on this connection");
            return;
        }

        match self
            .registry
            .register_peer(peer_id.clone(), device_name, platform, app_version, endpoint.clone())
            .await
        {
            Ok(()) => {
                state.peer_id = Some(peer_id);
                endpoint.send_text(&HostMessage::Welcome {
                    host_id: HOST_OWNER_PEER_ID.to_owned(),
                    host_name: self.host_name.clone(),
                    features: self.features(),
                    ts: now_ms(),
                });
            }
            Err(RegistryError::AlreadyRegistered) => {
                send_error(
                    endpoint,
                    ErrorCode::AlreadyRegistered,
                    &format!("peer id {peer_id} is already registered"),
                );
            }
            Err(err) => warn!("unexpected registry error on HELLO: {}", err),
        }
    }

    async fn handle_join_room(
        &self,
        state: &mut ConnectionState,
        endpoint: &Endpoint,
        room_id: Option<RoomId>,
    ) {
        let Some(peer_id) = self.require_peer(state, endpoint) else {
            return;
        };
        let peer_id = peer_id.to_owned();

        match self.registry.join_room(&peer_id, room_id).await {
            Ok(room_info) => {
                state.joined = true;
                let peer_count = self.registry.peer_count(&room_info.room_id).await;
                endpoint.send_text(&HostMessage::RoomInfo {
                    room_id: room_info.room_id.clone(),
                    room_name: room_info.room_name.clone(),
                    host_id: HOST_OWNER_PEER_ID.to_owned(),
                    features: self.features(),
                    peer_count,
                    ts: now_ms(),
                });

                let files = self.registry.index_for_room(&room_info.room_id).await;
                endpoint.send_text(&HostMessage::IndexFull { files, ts: now_ms() });

                let existing_peers = self.registry.peers_in_room(&room_info.room_id).await;
                let mut self_snapshot = None;
                for peer in &existing_peers {
                    if peer.peer_id == peer_id {
                        self_snapshot = Some(peer.clone());
                        continue;
                    }
                    endpoint.send_text(&HostMessage::PeerJoined {
                        peer: peer.clone(),
                        ts: now_ms(),
                    });
                }

                if let Some(joined) = self_snapshot {
                    self.broadcast_to_room_except(
                        &room_info.room_id,
                        &peer_id,
                        &HostMessage::PeerJoined {
                            peer: joined,
                            ts: now_ms(),
                        },
                    )
                    .await;
                }
            }
            Err(RegistryError::UnknownRoom) => {
                send_error(endpoint, ErrorCode::NotInRoom, "unknown room");
            }
            Err(err) => warn!("unexpected registry error on JOIN_ROOM: {}", err),
        }
    }

    async fn handle_leave_room(&self, state: &mut ConnectionState, endpoint: &Endpoint) {
        let Some(peer_id) = self.require_peer(state, endpoint) else {
            return;
        };
        let peer_id = peer_id.to_owned();
        let effects = self.registry.leave_room(&peer_id).await;
        state.joined = false;
        if let Some(room_id) = &effects.room_id {
            self.broadcast_departure(room_id, &peer_id).await;
        }
    }

    async fn handle_share_files(
        &self,
        state: &mut ConnectionState,
        endpoint: &Endpoint,
        files: Vec<FileMeta>,
    ) {
        let Some(peer_id) = self.require_peer(state, endpoint) else {
            return;
        };
        let peer_id = peer_id.to_owned();

        match self.registry.share_files(&peer_id, files, self.max_file_bytes).await {
            Ok((room_id, accepted)) => {
                if accepted.is_empty() {
                    return;
                }
                self.broadcast_to_room(
                    &room_id,
                    &HostMessage::IndexUpsert {
                        files: accepted,
                        ts: now_ms(),
                    },
                )
                .await;
            }
            Err(RegistryError::RoomLocked) => {
                send_error(endpoint, ErrorCode::RoomLocked, "room is locked");
            }
            Err(RegistryError::NotInRoom) => {
                send_error(endpoint, ErrorCode::NotInRoom, "join a room before sharing files");
            }
            Err(err) => warn!("unexpected registry error on SHARE_FILES: {}", err),
        }
    }

    async fn handle_unshare_files(
        &self,
        state: &mut ConnectionState,
        endpoint: &Endpoint,
        file_ids: Vec<FileId>,
    ) {
        let Some(peer_id) = self.require_peer(state, endpoint) else {
            return;
        };
        let peer_id = peer_id.to_owned();

        match self.registry.unshare_files(&peer_id, file_ids).await {
            Ok((room_id, removed)) => {
                if removed.is_empty() {
                    return;
                }
                self.broadcast_to_room(
                    &room_id,
                    &HostMessage::IndexRemove {
                        file_ids: removed,
                        ts: now_ms(),
                    },
                )
                .await;
            }
            Err(RegistryError::RoomLocked) => {
                send_error(endpoint, ErrorCode::RoomLocked, "room is locked");
            }
            Err(RegistryError::NotInRoom) => {
                send_error(endpoint, ErrorCode::NotInRoom, "join a room before unsharing files");
            }
            Err(err) => warn!("unexpected registry error on UNSHARE_FILES: {}", err),
        }
    }

    async fn handle_request_file(&self, state: &mut ConnectionState, endpoint: &Endpoint, file_id: FileId) {
        if self.require_joined_peer(state, endpoint).is_none() {
            return;
        }

        match self.registry.resolve_file(&file_id).await {
            Some(resolved) => {
                let owner_peer_id = resolved.owner_peer_id.unwrap_or_else(|| HOST_OWNER_PEER_ID.to_owned());
                endpoint.send_text(&HostMessage::FileOffer {
                    file_id,
                    owner_peer_id,
                    relay: true,
                    ts: now_ms(),
                });
            }
            None => {
                send_error(endpoint, ErrorCode::FileNotFound, "no such file in this room");
            }
        }
    }

    async fn handle_relay_pull(
        &self,
        state: &mut ConnectionState,
        endpoint: &Endpoint,
        file_id: FileId,
        transfer_id: String,
    ) {
        let Some(peer_id) = self.require_peer(state, endpoint) else {
            return;
        };
        let peer_id = peer_id.to_owned();

        let Some(resolved) = self.registry.resolve_file(&file_id).await else {
            send_error(endpoint, ErrorCode::FileNotFound, "no such file in this room");
            return;
        };

        match resolved.source_kind {
            SourceKind::Host => {
                let Some((meta, path)) = self.library.get(&file_id).await else {
                    send_error(endpoint, ErrorCode::FileNotFound, "host file no longer available");
                    return;
                };
                self.transfers
                    .start(StartTransfer {
                        transfer_id: transfer_id.clone(),
                        file_id,
                        source_kind: SourceKind::Host,
                        source_peer_id: None,
                        requester_peer_id: peer_id,
                        requester_endpoint: endpoint.clone(),
                        source_endpoint: None,
                        declared_size: meta.size_bytes,
                        mime_type: meta.mime_type,
                        sha256: meta.sha256,
                    })
                    .await;
                tokio::spawn(Arc::clone(&self.transfers).stream_host_file(transfer_id, path));
            }
            SourceKind::Peer => {
                let Some(owner_peer_id) = resolved.owner_peer_id.clone() else {
                    send_error(endpoint, ErrorCode::OwnerOffline, "file owner is offline");
                    return;
                };
                let Some(owner_endpoint) = self.registry.endpoint_for(&owner_peer_id).await else {
                    send_error(endpoint, ErrorCode::OwnerOffline, "file owner is offline");
                    return;
                };

                self.transfers
                    .start(StartTransfer {
                        transfer_id: transfer_id.clone(),
                        file_id: file_id.clone(),
                        source_kind: SourceKind::Peer,
                        source_peer_id: Some(owner_peer_id),
                        requester_peer_id: peer_id.clone(),
                        requester_endpoint: endpoint.clone(),
                        source_endpoint: Some(owner_endpoint.clone()),
                        declared_size: resolved.file.size_bytes,
                        mime_type: resolved.file.mime_type,
                        sha256: resolved.file.sha256,
                    })
                    .await;

                owner_endpoint.send_text(&HostMessage::RelayPull {
                    file_id,
                    transfer_id,
                    requester_peer_id: peer_id,
                    ts: now_ms(),
                });
            }
        }
    }

    async fn broadcast_departure(&self, room_id: &str, peer_id: &str) {
        self.broadcast_to_room(
            room_id,
            &HostMessage::PeerLeft {
                peer_id: peer_id.to_owned(),
                ts: now_ms(),
            },
        )
        .await;
        // A full snapshot always follows a departure, whether or not the
        // departing peer had shared files, so late-arrived clients reconcile
        // against a consistent baseline rather than inferring one from a
        // delta that may never come.
        let files = self.registry.index_for_room(room_id).await;
        self.broadcast_to_room(room_id, &HostMessage::IndexFull { files, ts: now_ms() }).await;
    }

    async fn broadcast_to_room(&self, room_id: &str, message: &HostMessage) {
        for peer in self.registry.peers_in_room(room_id).await {
            if let Some(endpoint) = self.registry.endpoint_for(&peer.peer_id).await {
                endpoint.send_text(message);
            }
        }
    }

    async fn broadcast_to_room_except(&self, room_id: &str, except_peer_id: &str, message: &HostMessage) {
        for peer in self.registry.peers_in_room(room_id).await {
            if peer.peer_id == except_peer_id {
                continue;
            }
            if let Some(endpoint) = self.registry.endpoint_for(&peer.peer_id).await {
                endpoint.send_text(message);
            }
        }
    }
}

fn send_error(endpoint: &Endpoint, code: ErrorCode, message: &str) {
    endpoint.send_text(&HostMessage::Error {
        code,
        message: message.to_owned(),
        ts: now_ms(),
    });
}
