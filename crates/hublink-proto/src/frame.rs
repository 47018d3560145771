//! Length-prefixed framing for the persistent hub channel.
//!
//! Every frame is a 4-byte little-endian payload length followed by exactly
//! that many payload bytes. There is no magic, version or checksum: the
//! payload's own structure (a CBOR envelope) carries everything else.

use bytes::{BufMut, Bytes, BytesMut};
use zerocopy::{
    FromBytes, Immutable, IntoBytes, KnownLayout, Unaligned, byteorder::little_endian::U32,
};

use crate::errors::ProtocolError;

/// Default upper bound on a single frame payload (16 MiB).
pub const MAX_PAYLOAD_SIZE: usize = 16 * 1024 * 1024;

/// Fixed 4-byte frame header.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, FromBytes, IntoBytes, KnownLayout, Immutable, Unaligned,
)]
#[repr(C)]
pub struct FrameHeader {
    length: U32,
}

impl FrameHeader {
    /// Header size on the wire.
    pub const SIZE: usize = 4;

    /// Header announcing a payload of `length` bytes.
    pub fn new(length: u32) -> Self {
        Self { length: U32::new(length) }
    }

    /// Payload length announced by this header.
    pub fn payload_size(&self) -> u32 {
        self.length.get()
    }

    /// Parse a header from the first [`Self::SIZE`] bytes of `bytes`.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, ProtocolError> {
        let head = bytes.get(..Self::SIZE).ok_or(ProtocolError::HeaderTooShort {
            expected: Self::SIZE,
            actual: bytes.len(),
        })?;
        Self::read_from_bytes(head)
            .map_err(|_| ProtocolError::HeaderTooShort { expected: Self::SIZE, actual: head.len() })
    }

    /// Wire representation.
    pub fn to_bytes(self) -> [u8; Self::SIZE] {
        let mut out = [0u8; Self::SIZE];
        out.copy_from_slice(self.as_bytes());
        out
    }
}

/// Build a complete frame (`header ++ payload`) as one contiguous buffer.
///
/// Rejects payloads larger than `max_payload` so a single write never
/// announces a length the peer will refuse.
pub fn encode_frame(payload: &[u8], max_payload: usize) -> Result<Bytes, ProtocolError> {
    if payload.len() > max_payload {
        return Err(ProtocolError::PayloadTooLarge { size: payload.len(), max: max_payload });
    }
    let length = u32::try_from(payload.len())
        .map_err(|_| ProtocolError::PayloadTooLarge { size: payload.len(), max: max_payload })?;

    let mut buf = BytesMut::with_capacity(FrameHeader::SIZE + payload.len());
    buf.put_slice(FrameHeader::new(length).as_bytes());
    buf.put_slice(payload);
    Ok(buf.freeze())
}
