use serde::{Deserialize, Serialize};

pub type PeerId = String;
pub type FileId = String;
pub type RoomId = String;
pub type TransferId = String;

/// The `ownerPeerId` used for files served from the operator's host library
/// rather than shared by a connected peer.
pub const HOST_OWNER_PEER_ID: &str = "venue-host";

/// The single room every host instance creates at startup.
pub const DEFAULT_ROOM_ID: &str = "default";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Platform {
    Android,
    Ios,
    Web,
    Unknown,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileMeta {
    pub file_id: FileId,
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub artist: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub album: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration_sec: Option<u32>,
    pub size_bytes: u64,
    pub mime_type: String,
    pub sha256: String,
    pub owner_peer_id: PeerId,
    pub owner_name: String,
    pub added_at_ms: u64,
}

/// The wire-visible subset of a peer, sent in `WELCOME`/`PEER_JOINED`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PeerSnapshot {
    pub peer_id: PeerId,
    pub device_name: String,
    pub platform: Platform,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub app_version: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub room_id: Option<RoomId>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoomInfo {
    pub room_id: RoomId,
    pub room_name: String,
    pub locked: bool,
    pub created_at_ms: u64,
    pub updated_at_ms: u64,
}

/// Feature flags advertised in `WELCOME`/`ROOM_INFO`. `max_file_mb` is only
/// present on `WELCOME` — `ROOM_INFO` omits it, which `skip_serializing_if`
/// makes possible without a second near-identical struct.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Features {
    pub relay: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_file_mb: Option<u64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceKind {
    Peer,
    Host,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TransferState {
    Pending,
    Uploading,
    Complete,
    Error,
    Cancelled,
}

impl TransferState {
    /// Whether this state is final: no further transition is legal.
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            TransferState::Complete | TransferState::Error | TransferState::Cancelled
        )
    }
}

/// A read-only snapshot of a relay transfer's bookkeeping, used by tests
/// and diagnostics. The live record is owned exclusively by the transfer
/// engine.
#[derive(Debug, Clone, PartialEq)]
pub struct RelayTransferSnapshot {
    pub transfer_id: TransferId,
    pub file_id: FileId,
    pub source_kind: SourceKind,
    pub source_peer_id: Option<PeerId>,
    pub requester_peer_id: PeerId,
    pub declared_size: u64,
    pub mime_type: String,
    pub sha256: String,
    pub bytes_transferred: u64,
    pub state: TransferState,
    pub created_at_ms: u64,
}
