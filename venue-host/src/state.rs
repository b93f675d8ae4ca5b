use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::RwLock;
use venue_core::{
    DEFAULT_ROOM_ID, FileId, FileMeta, Platform, PeerId, PeerSnapshot, RoomId, RoomInfo,
    SourceKind, now_ms,
};

use crate::connection::Endpoint;
use crate::error::RegistryError;
use crate::library::HostLibrary;

struct PeerRecord {
    peer_id: PeerId,
    device_name: String,
    platform: Platform,
    app_version: Option<String>,
    room_id: Option<RoomId>,
    /// Insertion-ordered: iteration order is the order `SHARE_FILES` batches
    /// arrived in, which is what `IndexForRoom` relies on.
    shared_files: Vec<FileMeta>,
    last_seen_ms: u64,
    joined_at_ms: u64,
    endpoint: Endpoint,
}

impl PeerRecord {
    fn snapshot(&self) -> PeerSnapshot {
        PeerSnapshot {
            peer_id: self.peer_id.clone(),
            device_name: self.device_name.clone(),
            platform: self.platform,
            app_version: self.app_version.clone(),
            room_id: self.room_id.clone(),
        }
    }
}

struct RoomRecord {
    room_id: RoomId,
    room_name: String,
    locked: bool,
    created_at_ms: u64,
    updated_at_ms: u64,
    /// Join order, oldest first — the second tiebreaker in `IndexForRoom`.
    peer_order: Vec<PeerId>,
}

/// Resolution result for a fileId, used by `REQUEST_FILE` and `RELAY_PULL`.
#[derive(Debug, Clone)]
pub struct ResolvedFile {
    pub file: FileMeta,
    pub source_kind: SourceKind,
    pub owner_peer_id: Option<PeerId>,
}

/// Everything removed by a peer leaving (disconnect, eviction, or an
/// explicit `LEAVE_ROOM`) that the dispatcher needs in order to broadcast
/// the right events to the rest of the room.
pub struct DepartureEffects {
    pub room_id: Option<RoomId>,
    pub removed_file_ids: Vec<FileId>,
}

struct RegistryInner {
    peers: HashMap<PeerId, PeerRecord>,
    rooms: HashMap<RoomId, RoomRecord>,
    /// Direct fileId -> owning peer index, so `ResolveFile` doesn't have to
    /// scan every peer's shared-file list.
    file_owner_index: HashMap<FileId, PeerId>,
}

/// The authoritative, mutable state shared by every connection: peers,
/// rooms, and the unified file index. Guarded by a single `RwLock`, which
/// is sufficient at the peer counts a single venue targets.
pub struct RoomRegistry {
    inner: RwLock<RegistryInner>,
    library: Arc<dyn HostLibrary>,
}

impl RoomRegistry {
    #[must_use]
    pub fn new(library: Arc<dyn HostLibrary>, room_name: String) -> Self {
        let now = now_ms();
        let mut rooms = HashMap::new();
        rooms.insert(
            DEFAULT_ROOM_ID.to_owned(),
            RoomRecord {
                room_id: DEFAULT_ROOM_ID.to_owned(),
                room_name,
                locked: false,
                created_at_ms: now,
                updated_at_ms: now,
                peer_order: Vec::new(),
            },
        );

        Self {
            inner: RwLock::new(RegistryInner {
                peers: HashMap::new(),
                rooms,
                file_owner_index: HashMap::new(),
            }),
            library,
        }
    }

    pub async fn register_peer(
        &self,
        peer_id: PeerId,
        device_name: String,
        platform: Platform,
        app_version: Option<String>,
        endpoint: Endpoint,
    ) -> Result<(), RegistryError> {
        let mut inner = self.inner.write().await;
        if inner.peers.contains_key(&peer_id) {
            return Err(RegistryError::AlreadyRegistered);
        }

        let now = now_ms();
        inner.peers.insert(
            peer_id.clone(),
            PeerRecord {
                peer_id,
                device_name,
                platform,
                app_version,
                room_id: None,
                shared_files: Vec::new(),
                last_seen_ms: now,
                joined_at_ms: now,
                endpoint,
            },
        );
        Ok(())
    }

    /// Removes a peer and cascades: leaves its room, drops its shared files
    /// from the index. Idempotent — removing an unknown peer is a no-op
    /// that reports no departure effects.
    pub async fn remove_peer(&self, peer_id: &str) -> DepartureEffects {
        let mut inner = self.inner.write().await;
        let Some(peer) = inner.peers.remove(peer_id) else {
            return DepartureEffects {
                room_id: None,
                removed_file_ids: Vec::new(),
            };
        };

        for file in &peer.shared_files {
            inner.file_owner_index.remove(&file.file_id);
        }
        let removed_file_ids = peer.shared_files.iter().map(|f| f.file_id.clone()).collect();

        if let Some(room_id) = &peer.room_id
            && let Some(room) = inner.rooms.get_mut(room_id)
        {
            room.peer_order.retain(|id| id != peer_id);
        }

        DepartureEffects {
            room_id: peer.room_id,
            removed_file_ids,
        }
    }

    pub async fn touch(&self, peer_id: &str) -> Result<(), RegistryError> {
        let mut inner = self.inner.write().await;
        let peer = inner.peers.get_mut(peer_id).ok_or(RegistryError::NotRegistered)?;
        peer.last_seen_ms = now_ms();
        Ok(())
    }

    pub async fn join_room(
        &self,
        peer_id: &str,
        room_id: Option<RoomId>,
    ) -> Result<RoomInfo, RegistryError> {
        let room_id = room_id.unwrap_or_else(|| DEFAULT_ROOM_ID.to_owned());
        let mut inner = self.inner.write().await;

        if !inner.rooms.contains_key(&room_id) {
            return Err(RegistryError::UnknownRoom);
        }

        {
            let peer = inner.peers.get_mut(peer_id).ok_or(RegistryError::NotRegistered)?;
            if peer.room_id.as_deref() != Some(room_id.as_str()) {
                peer.room_id = Some(room_id.clone());
                peer.joined_at_ms = now_ms();
            }
        }

        let room = inner.rooms.get_mut(&room_id).expect("checked above");
        if !room.peer_order.iter().any(|id| id == peer_id) {
            room.peer_order.push(peer_id.to_owned());
        }

        Ok(RoomInfo {
            room_id: room.room_id.clone(),
            room_name: room.room_name.clone(),
            locked: room.locked,
            created_at_ms: room.created_at_ms,
            updated_at_ms: room.updated_at_ms,
        })
    }

    /// Clears the peer's room assignment and drops its shared files from
    /// the index, without removing the peer record itself.
    pub async fn leave_room(&self, peer_id: &str) -> DepartureEffects {
        let mut inner = self.inner.write().await;
        let Some(peer) = inner.peers.get_mut(peer_id) else {
            return DepartureEffects {
                room_id: None,
                removed_file_ids: Vec::new(),
            };
        };

        let removed_file_ids: Vec<FileId> =
            peer.shared_files.drain(..).map(|f| f.file_id).collect();
        for file_id in &removed_file_ids {
            inner.file_owner_index.remove(file_id);
        }
        let room_id = peer.room_id.take();

        if let Some(room_id) = &room_id
            && let Some(room) = inner.rooms.get_mut(room_id)
        {
            room.peer_order.retain(|id| id != peer_id);
        }

        DepartureEffects {
            room_id,
            removed_file_ids,
        }
    }

    pub async fn share_files(
        &self,
        peer_id: &str,
        files: Vec<FileMeta>,
        max_file_bytes: u64,
    ) -> Result<(RoomId, Vec<FileMeta>), RegistryError> {
        let mut inner = self.inner.write().await;
        let room_id = {
            let peer = inner.peers.get(peer_id).ok_or(RegistryError::NotRegistered)?;
            peer.room_id.clone().ok_or(RegistryError::NotInRoom)?
        };
        if inner.rooms.get(&room_id).is_some_and(|r| r.locked) {
            return Err(RegistryError::RoomLocked);
        }

        let accepted: Vec<FileMeta> = files
            .into_iter()
            .filter(|f| f.size_bytes <= max_file_bytes)
            .collect();

        let peer = inner.peers.get_mut(peer_id).expect("checked above");
        for file in &accepted {
            peer.shared_files.retain(|existing| existing.file_id != file.file_id);
            peer.shared_files.push(file.clone());
        }
        for file in &accepted {
            inner.file_owner_index.insert(file.file_id.clone(), peer_id.to_owned());
        }

        Ok((room_id, accepted))
    }

    pub async fn unshare_files(
        &self,
        peer_id: &str,
        file_ids: Vec<FileId>,
    ) -> Result<(RoomId, Vec<FileId>), RegistryError> {
        let mut inner = self.inner.write().await;
        let room_id = {
            let peer = inner.peers.get(peer_id).ok_or(RegistryError::NotRegistered)?;
            peer.room_id.clone().ok_or(RegistryError::NotInRoom)?
        };
        if inner.rooms.get(&room_id).is_some_and(|r| r.locked) {
            return Err(RegistryError::RoomLocked);
        }

        let peer = inner.peers.get_mut(peer_id).expect("checked above");
        let wanted: std::collections::HashSet<&str> =
            file_ids.iter().map(String::as_str).collect();
        let mut removed: Vec<FileId> = Vec::new();
        peer.shared_files.retain(|f| {
            if wanted.contains(f.file_id.as_str()) {
                removed.push(f.file_id.clone());
                false
            } else {
                true
            }
        });
        for file_id in &removed {
            inner.file_owner_index.remove(file_id);
        }
        Ok((room_id, removed))
    }

    /// Host-library files first, then peer-shared files ordered by join
    /// order and, within a peer, by share order.
    pub async fn index_for_room(&self, room_id: &str) -> Vec<FileMeta> {
        let mut files = self.library.list().await;
        let inner = self.inner.read().await;
        let Some(room) = inner.rooms.get(room_id) else {
            return files;
        };
        for peer_id in &room.peer_order {
            if let Some(peer) = inner.peers.get(peer_id) {
                files.extend(peer.shared_files.iter().cloned());
            }
        }
        files
    }

    pub async fn resolve_file(&self, file_id: &str) -> Option<ResolvedFile> {
        if let Some((meta, _path)) = self.library.get(file_id).await {
            return Some(ResolvedFile {
                file: meta,
                source_kind: SourceKind::Host,
                owner_peer_id: None,
            });
        }

        let inner = self.inner.read().await;
        let owner_id = inner.file_owner_index.get(file_id)?;
        let owner = inner.peers.get(owner_id)?;
        let file = owner.shared_files.iter().find(|f| f.file_id == file_id)?.clone();
        Some(ResolvedFile {
            file,
            source_kind: SourceKind::Peer,
            owner_peer_id: Some(owner_id.clone()),
        })
    }

    pub async fn peers_in_room(&self, room_id: &str) -> Vec<PeerSnapshot> {
        let inner = self.inner.read().await;
        let Some(room) = inner.rooms.get(room_id) else {
            return Vec::new();
        };
        room.peer_order
            .iter()
            .filter_map(|id| inner.peers.get(id))
            .map(PeerRecord::snapshot)
            .collect()
    }

    pub async fn peer_count(&self, room_id: &str) -> usize {
        self.inner
            .read()
            .await
            .rooms
            .get(room_id)
            .map_or(0, |room| room.peer_order.len())
    }

    pub async fn endpoint_for(&self, peer_id: &str) -> Option<Endpoint> {
        self.inner
            .read()
            .await
            .peers
            .get(peer_id)
            .map(|peer| peer.endpoint.clone())
    }

    /// Locks or unlocks a room. Driven by the (out-of-scope) admin surface,
    /// never by a peer message.
    pub async fn set_room_locked(&self, room_id: &str, locked: bool) {
        let mut inner = self.inner.write().await;
        if let Some(room) = inner.rooms.get_mut(room_id) {
            room.locked = locked;
            room.updated_at_ms = now_ms();
        }
    }

    /// `last_seen_ms` for every currently registered peer, used by the
    /// liveness ticker to find stale peers without exposing the whole
    /// registry internals.
    pub async fn stale_peers(&self, now: u64, timeout_ms: u64) -> Vec<PeerId> {
        self.inner
            .read()
            .await
            .peers
            .values()
            .filter(|peer| now.saturating_sub(peer.last_seen_ms) > timeout_ms)
            .map(|peer| peer.peer_id.clone())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::library::StaticHostLibrary;
    use tokio::sync::mpsc;
    use venue_core::HOST_OWNER_PEER_ID;

    fn registry() -> RoomRegistry {
        let library = Arc::new(StaticHostLibrary::new(DEFAULT_ROOM_ID.to_owned(), "Room".to_owned()));
        RoomRegistry::new(library, "Room".to_owned())
    }

    fn endpoint() -> Endpoint {
        let (tx, _rx) = mpsc::unbounded_channel();
        Endpoint::new(tx)
    }

    fn file(file_id: &str, owner: &str) -> FileMeta {
        FileMeta {
            file_id: file_id.to_owned(),
            title: "t".to_owned(),
            artist: None,
            album: None,
            duration_sec: None,
            size_bytes: 10,
            mime_type: "audio/mpeg".to_owned(),
            sha256: "h".to_owned(),
            owner_peer_id: owner.to_owned(),
            owner_name: owner.to_owned(),
            added_at_ms: 0,
        }
    }

    #[tokio::test]
    async fn register_then_join_then_share_is_visible_in_index() {
        let registry = registry();
        registry
            .register_peer("A".to_owned(), "a".to_owned(), Platform::Android, None, endpoint())
            .await
            .unwrap();
        registry.join_room("A", None).await.unwrap();
        registry
            .share_files("A", vec![file("F1", "A")], 1024)
            .await
            .unwrap();

        let index = registry.index_for_room(DEFAULT_ROOM_ID).await;
        assert_eq!(index.len(), 1);
        assert_eq!(index[0].file_id, "F1");
    }

    #[tokio::test]
    async fn duplicate_register_is_rejected() {
        let registry = registry();
        registry
            .register_peer("A".to_owned(), "a".to_owned(), Platform::Android, None, endpoint())
            .await
            .unwrap();
        let err = registry
            .register_peer("A".to_owned(), "a2".to_owned(), Platform::Android, None, endpoint())
            .await
            .unwrap_err();
        assert_eq!(err, RegistryError::AlreadyRegistered);
    }

    #[tokio::test]
    async fn share_files_rejected_in_locked_room() {
        let registry = registry();
        registry
            .register_peer("A".to_owned(), "a".to_owned(), Platform::Android, None, endpoint())
            .await
            .unwrap();
        registry.join_room("A", None).await.unwrap();
        registry.set_room_locked(DEFAULT_ROOM_ID, true).await;

        let err = registry.share_files("A", vec![file("F1", "A")], 1024).await.unwrap_err();
        assert_eq!(err, RegistryError::RoomLocked);
    }

    #[tokio::test]
    async fn share_files_over_max_size_is_dropped_from_batch() {
        let registry = registry();
        registry
            .register_peer("A".to_owned(), "a".to_owned(), Platform::Android, None, endpoint())
            .await
            .unwrap();
        registry.join_room("A", None).await.unwrap();

        let mut small = file("F1", "A");
        small.size_bytes = 10;
        let mut big = file("F2", "A");
        big.size_bytes = 11;

        let (_room_id, accepted) = registry.share_files("A", vec![small, big], 10).await.unwrap();
        assert_eq!(accepted.len(), 1);
        assert_eq!(accepted[0].file_id, "F1");
    }

    #[tokio::test]
    async fn unshare_files_reports_only_ids_actually_removed() {
        let registry = registry();
        registry
            .register_peer("A".to_owned(), "a".to_owned(), Platform::Android, None, endpoint())
            .await
            .unwrap();
        registry.join_room("A", None).await.unwrap();
        registry.share_files("A", vec![file("F1", "A")], 1024).await.unwrap();

        let (_room_id, removed) = registry
            .unshare_files("A", vec!["F1".to_owned(), "NOPE".to_owned()])
            .await
            .unwrap();
        assert_eq!(removed, vec!["F1".to_owned()]);
        assert!(registry.resolve_file("F1").await.is_none());
    }

    #[tokio::test]
    async fn remove_peer_cascades_file_index_and_room_membership() {
        let registry = registry();
        registry
            .register_peer("A".to_owned(), "a".to_owned(), Platform::Android, None, endpoint())
            .await
            .unwrap();
        registry.join_room("A", None).await.unwrap();
        registry.share_files("A", vec![file("F1", "A")], 1024).await.unwrap();

        let effects = registry.remove_peer("A").await;
        assert_eq!(effects.room_id.as_deref(), Some(DEFAULT_ROOM_ID));
        assert_eq!(effects.removed_file_ids, vec!["F1".to_owned()]);
        assert!(registry.resolve_file("F1").await.is_none());
        assert_eq!(registry.peer_count(DEFAULT_ROOM_ID).await, 0);
    }

    #[tokio::test]
    async fn resolve_file_prefers_host_library_over_peer_shares() {
        let library = Arc::new(StaticHostLibrary::new(DEFAULT_ROOM_ID.to_owned(), "Room".to_owned()));
        library.upsert_file(file("F1", HOST_OWNER_PEER_ID), std::path::PathBuf::from("/tmp/f1"));
        let registry = RoomRegistry::new(library, "Room".to_owned());

        let resolved = registry.resolve_file("F1").await.unwrap();
        assert_eq!(resolved.source_kind, SourceKind::Host);
        assert!(resolved.owner_peer_id.is_none());
    }

    #[tokio::test]
    async fn stale_peers_reports_peers_past_timeout() {
        let registry = registry();
        registry
            .register_peer("A".to_owned(), "a".to_owned(), Platform::Android, None, endpoint())
            .await
            .unwrap();

        assert!(registry.stale_peers(now_ms(), 60_000).await.is_empty());
        assert_eq!(registry.stale_peers(now_ms(), 0).await, vec!["A".to_owned()]);
    }
}
