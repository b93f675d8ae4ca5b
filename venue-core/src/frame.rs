use bytes::{Buf, BufMut, BytesMut};

use crate::error::CoreError;

/// A decoded binary relay frame: the transfer id it is routed by, and the
/// raw chunk bytes that follow it. Routing is entirely carried inside the
/// frame — no out-of-band correlation with the WebSocket connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BinaryFrame<'a> {
    pub transfer_id: String,
    pub chunk: &'a [u8],
}

/// Encode `[u32 transfer_id_len][transfer_id utf-8][chunk]`, big-endian.
pub fn encode_binary_frame(transfer_id: &str, chunk: &[u8]) -> Result<Vec<u8>, CoreError> {
    let id_bytes = transfer_id.as_bytes();
    let id_len = u32::try_from(id_bytes.len()).map_err(|_| CoreError::InvalidFrameLength)?;

    let mut out = BytesMut::with_capacity(4 + id_bytes.len() + chunk.len());
    out.put_u32(id_len);
    out.extend_from_slice(id_bytes);
    out.extend_from_slice(chunk);
    Ok(out.to_vec())
}

/// Decode a binary relay frame.
///
/// Per the wire contract, frames that are malformed in recoverable ways are
/// dropped rather than treated as an error: a zero-length transfer id, a
/// declared length exceeding the remaining payload, or a shorter-than-header
/// frame all yield `None` with no side effect, matching `ErrorCode` only
/// being used for application-level failures, not per-frame noise.
#[must_use]
pub fn decode_binary_frame(frame: &[u8]) -> Option<BinaryFrame<'_>> {
    if frame.len() < 4 {
        return None;
    }
    let mut cursor = frame;
    let id_len = cursor.get_u32() as usize;
    if id_len == 0 || id_len > cursor.len() {
        return None;
    }

    let (id_bytes, chunk) = cursor.split_at(id_len);
    let transfer_id = std::str::from_utf8(id_bytes).ok()?.to_owned();
    Some(BinaryFrame { transfer_id, chunk })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn roundtrip() {
        let frame = encode_binary_frame("T1", &[1, 2, 3]).unwrap();
        let decoded = decode_binary_frame(&frame).unwrap();
        assert_eq!(decoded.transfer_id, "T1");
        assert_eq!(decoded.chunk, &[1, 2, 3]);
    }

    #[test]
    fn zero_length_transfer_id_is_dropped() {
        let mut frame = BytesMut::new();
        frame.put_u32(0);
        frame.extend_from_slice(&[9, 9]);
        assert!(decode_binary_frame(&frame).is_none());
    }

    #[test]
    fn oversized_declared_length_is_dropped() {
        let mut frame = BytesMut::new();
        frame.put_u32(100);
        frame.extend_from_slice(b"T1");
        assert!(decode_binary_frame(&frame).is_none());
    }

    #[test]
    fn truncated_header_is_dropped() {
        assert!(decode_binary_frame(&[0, 0, 1]).is_none());
    }

    #[test]
    fn empty_chunk_is_valid() {
        let frame = encode_binary_frame("T2", &[]).unwrap();
        let decoded = decode_binary_frame(&frame).unwrap();
        assert_eq!(decoded.transfer_id, "T2");
        assert!(decoded.chunk.is_empty());
    }
}
