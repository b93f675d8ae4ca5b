use thiserror::Error;

/// Registry-level failures. Every variant maps to the `ErrorCode` the
/// dispatcher sends back to the offending peer; none of them tear down the
/// connection by themselves.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum RegistryError {
    #[error("peer already registered")]
    AlreadyRegistered,
    #[error("unknown room")]
    UnknownRoom,
    #[error("room is locked")]
    RoomLocked,
    #[error("peer is not registered")]
    NotRegistered,
    #[error("peer has not joined a room")]
    NotInRoom,
}

/// Fatal startup/shutdown failures. These are the only `HostError`s that
/// reach `main` and influence the process exit code: a malformed inbound
/// message, a locked room, or a missing file never produce one of these —
/// they are protocol-level `ErrorCode`s handled entirely within a
/// connection's lifetime.
#[derive(Debug, Error)]
pub enum HostError {
    #[error("failed to start service advertiser: {0}")]
    Advertiser(String),
}
