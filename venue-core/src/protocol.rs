use serde::{Deserialize, Serialize};

use crate::model::{FileId, FileMeta, Features, PeerId, PeerSnapshot, RoomId, TransferId};

/// Protocol-level error kinds, sent to a peer inside an `ERROR` message.
/// Distinct from [`crate::CoreError`], which never reaches the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    ParseError,
    NotRegistered,
    AlreadyRegistered,
    NotInRoom,
    RoomLocked,
    FileNotFound,
    OwnerOffline,
    FileTooLarge,
    TransferError,
}

/// Messages a peer sends to the host over a text frame.
///
/// `ts` is carried by every client message but is advisory only — the host
/// never rejects a message for a missing or implausible timestamp, it is
/// accepted if present and otherwise defaults to absent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ClientMessage {
    #[serde(rename_all = "camelCase")]
    Hello {
        peer_id: PeerId,
        device_name: String,
        platform: crate::model::Platform,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        app_version: Option<String>,
        #[serde(default)]
        ts: Option<u64>,
    },
    #[serde(rename_all = "camelCase")]
    JoinRoom {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        room_id: Option<RoomId>,
        #[serde(default)]
        ts: Option<u64>,
    },
    LeaveRoom {
        #[serde(default)]
        ts: Option<u64>,
    },
    Heartbeat {
        #[serde(default)]
        ts: Option<u64>,
    },
    ShareFiles {
        files: Vec<FileMeta>,
        #[serde(default)]
        ts: Option<u64>,
    },
    #[serde(rename_all = "camelCase")]
    UnshareFiles {
        file_ids: Vec<FileId>,
        #[serde(default)]
        ts: Option<u64>,
    },
    #[serde(rename_all = "camelCase")]
    RequestFile {
        file_id: FileId,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        owner_peer_id: Option<PeerId>,
        #[serde(default)]
        ts: Option<u64>,
    },
    #[serde(rename_all = "camelCase")]
    RelayPull {
        file_id: FileId,
        transfer_id: TransferId,
        #[serde(default)]
        ts: Option<u64>,
    },
    #[serde(rename_all = "camelCase")]
    RelayPushMeta {
        file_id: FileId,
        transfer_id: TransferId,
        size: u64,
        mime_type: String,
        sha256: String,
        #[serde(default)]
        ts: Option<u64>,
    },
    #[serde(rename_all = "camelCase")]
    RelayComplete {
        transfer_id: TransferId,
        file_id: FileId,
        #[serde(default)]
        ts: Option<u64>,
    },
}

/// Messages the host sends to a peer over a text frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum HostMessage {
    #[serde(rename_all = "camelCase")]
    Welcome {
        host_id: PeerId,
        host_name: String,
        features: Features,
        ts: u64,
    },
    #[serde(rename_all = "camelCase")]
    RoomInfo {
        room_id: RoomId,
        room_name: String,
        host_id: PeerId,
        features: Features,
        peer_count: usize,
        ts: u64,
    },
    PeerJoined {
        peer: PeerSnapshot,
        ts: u64,
    },
    #[serde(rename_all = "camelCase")]
    PeerLeft {
        peer_id: PeerId,
        ts: u64,
    },
    IndexFull {
        files: Vec<FileMeta>,
        ts: u64,
    },
    IndexUpsert {
        files: Vec<FileMeta>,
        ts: u64,
    },
    #[serde(rename_all = "camelCase")]
    IndexRemove {
        file_ids: Vec<FileId>,
        ts: u64,
    },
    #[serde(rename_all = "camelCase")]
    FileOffer {
        file_id: FileId,
        owner_peer_id: PeerId,
        relay: bool,
        ts: u64,
    },
    /// Host -> source peer: asks it to start pushing bytes for a pull the
    /// host already accepted from the requester. Same wire shape as
    /// [`ClientMessage::RelayPull`] plus `requesterPeerId`, so the source
    /// peer's own relay-pull handling code can be reused almost as-is.
    #[serde(rename_all = "camelCase")]
    RelayPull {
        file_id: FileId,
        transfer_id: TransferId,
        requester_peer_id: PeerId,
        ts: u64,
    },
    #[serde(rename_all = "camelCase")]
    TransferStart {
        transfer_id: TransferId,
        file_id: FileId,
        size: u64,
        mime_type: String,
        ts: u64,
    },
    #[serde(rename_all = "camelCase")]
    TransferProgress {
        transfer_id: TransferId,
        bytes_transferred: u64,
        total_bytes: u64,
        progress: u8,
        ts: u64,
    },
    #[serde(rename_all = "camelCase")]
    TransferComplete {
        transfer_id: TransferId,
        file_id: FileId,
        sha256: String,
        ts: u64,
    },
    Error {
        code: ErrorCode,
        message: String,
        ts: u64,
    },
}

impl HostMessage {
    /// Serialize to a single text frame payload.
    pub fn to_json(&self) -> Result<String, crate::CoreError> {
        serde_json::to_string(self).map_err(|err| crate::CoreError::Serialization(err.to_string()))
    }
}

impl ClientMessage {
    /// Decode a single inbound text frame. Callers translate a failure into
    /// an `ERROR{code: ParseError}` reply without closing the connection.
    pub fn from_json(text: &str) -> Result<Self, crate::CoreError> {
        serde_json::from_str(text).map_err(|err| crate::CoreError::Serialization(err.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Platform;

    #[test]
    fn decodes_hello() {
        let raw = r#"{"type":"HELLO","peerId":"A","deviceName":"a","platform":"android"}"#;
        let msg = ClientMessage::from_json(raw).unwrap();
        assert_eq!(
            msg,
            ClientMessage::Hello {
                peer_id: "A".to_owned(),
                device_name: "a".to_owned(),
                platform: Platform::Android,
                app_version: None,
                ts: None,
            }
        );
    }

    #[test]
    fn decodes_join_room_without_room_id() {
        let raw = r#"{"type":"JOIN_ROOM"}"#;
        let msg = ClientMessage::from_json(raw).unwrap();
        assert_eq!(
            msg,
            ClientMessage::JoinRoom {
                room_id: None,
                ts: None,
            }
        );
    }

    #[test]
    fn rejects_malformed_json() {
        let raw = r#"{"type":"HELLO","peerId":123}"#;
        assert!(ClientMessage::from_json(raw).is_err());
    }

    #[test]
    fn encodes_error_message() {
        let msg = HostMessage::Error {
            code: ErrorCode::RoomLocked,
            message: "room is locked".to_owned(),
            ts: 1,
        };
        let json = msg.to_json().unwrap();
        assert!(json.contains("\"type\":\"ERROR\""));
        assert!(json.contains("\"code\":\"ROOM_LOCKED\""));
    }
}
