//! Wire protocol and domain model shared by the venue host and its tests.
//!
//! `venue-core` has no knowledge of sockets, tasks or locks: it only knows
//! how to represent peers, files, rooms and transfers, and how to encode and
//! decode the two frame kinds (`text` control messages and `binary` relay
//! chunks) that cross the wire.

mod error;
mod frame;
mod ids;
mod model;
mod protocol;

pub use error::CoreError;
pub use frame::{BinaryFrame, decode_binary_frame, encode_binary_frame};
pub use ids::{now_ms, short_id};
pub use model::{
    DEFAULT_ROOM_ID, FileId, FileMeta, HOST_OWNER_PEER_ID, Features, Platform, PeerId,
    PeerSnapshot, RelayTransferSnapshot, RoomId, RoomInfo, SourceKind, TransferId, TransferState,
};
pub use protocol::{ClientMessage, ErrorCode, HostMessage};
