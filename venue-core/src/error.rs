use thiserror::Error;

/// Failures that can occur while encoding or decoding wire frames.
///
/// These are codec-level failures, distinct from the protocol-level
/// [`crate::ErrorCode`] values that get sent back to a peer as an `ERROR`
/// message — a malformed frame never propagates a `CoreError` to a peer,
/// it is turned into an `ErrorCode::ParseError` reply instead.
#[derive(Debug, Error)]
pub enum CoreError {
    #[error("invalid frame length")]
    InvalidFrameLength,
    #[error("serialization error: {0}")]
    Serialization(String),
}
