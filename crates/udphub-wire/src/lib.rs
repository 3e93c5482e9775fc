// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Wire framing for the udphub relay fabric.
//!
//! A [`Packet`] is the single self-describing envelope exchanged between every
//! peer and the broker. [`Packet::encode`] / [`Packet::decode`] are the only
//! places that know the on-wire byte layout; everything above this crate deals
//! in typed [`Packet`] values.
//!
//! # Wire format (network byte order)
//!
//! ```text
//! u8   type
//! u32  sender-id-length
//! [n]  sender-id bytes        (UTF-8)
//! u32  recipient-id-length
//! [n]  recipient-id bytes     (UTF-8)
//! i32  sequence-number
//! i32  file-id
//! u32  payload-length
//! [n]  payload bytes
//! ```

use std::convert::TryFrom;
use std::fmt;

/// Sentinel recipient id meaning "broadcast to every other registered peer".
pub const BROADCAST_ID: &str = "ALL";

/// Maximum chunk payload size for a single `FILE_CHUNK` frame.
pub const CHUNK_SIZE: usize = 1024;

/// Conservative upper bound on a whole encoded frame (UDP MTU headroom).
pub const MAX_FRAME_SIZE: usize = 65_507;

/// Typed message tags carried by every [`Packet`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum PacketType {
    /// Plain text chat message.
    Msg = 1,
    /// Announces an incoming file transfer (filename + size).
    FileStart = 2,
    /// One ≤1024-byte slice of a file transfer.
    FileChunk = 3,
    /// Closes a file transfer, carrying the authoritative chunk count.
    FileEnd = 4,
    /// Peer presence registration.
    Register = 5,
    /// Periodic liveness signal.
    Heartbeat = 6,
    /// Broker's acknowledgement of a REGISTER.
    Ack = 7,
    /// Broker's snapshot of the online peer set.
    ClientList = 8,
    /// Broker's acknowledgement of a single FILE_CHUNK.
    FileAck = 9,
}

impl PacketType {
    fn from_u8(tag: u8) -> Option<Self> {
        match tag {
            1 => Some(Self::Msg),
            2 => Some(Self::FileStart),
            3 => Some(Self::FileChunk),
            4 => Some(Self::FileEnd),
            5 => Some(Self::Register),
            6 => Some(Self::Heartbeat),
            7 => Some(Self::Ack),
            8 => Some(Self::ClientList),
            9 => Some(Self::FileAck),
            _ => None,
        }
    }
}

/// A fully-populated frame. Every field is always present on the wire; fields
/// meaningless for a given [`PacketType`] carry their defined default
/// (`sequence_number = 0`, `file_id = 0`, `payload` empty).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Packet {
    pub packet_type: PacketType,
    pub sender_id: String,
    pub recipient_id: String,
    pub sequence_number: i32,
    pub file_id: i32,
    pub payload: Vec<u8>,
}

impl Packet {
    /// Build a packet with the envelope defaults (`sequence_number = 0`, `file_id = 0`).
    pub fn new(
        packet_type: PacketType,
        sender_id: impl Into<String>,
        recipient_id: impl Into<String>,
        payload: Vec<u8>,
    ) -> Self {
        Self {
            packet_type,
            sender_id: sender_id.into(),
            recipient_id: recipient_id.into(),
            sequence_number: 0,
            file_id: 0,
            payload,
        }
    }

    /// True if this frame's recipient is the broadcast sentinel.
    #[must_use]
    pub fn is_broadcast(&self) -> bool {
        self.recipient_id == BROADCAST_ID
    }

    /// Serialize to the on-wire byte layout.
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(
            1 + 4 + self.sender_id.len() + 4 + self.recipient_id.len() + 4 + 4 + 4
                + self.payload.len(),
        );
        buf.push(self.packet_type as u8);
        write_str(&mut buf, &self.sender_id);
        write_str(&mut buf, &self.recipient_id);
        buf.extend_from_slice(&self.sequence_number.to_be_bytes());
        buf.extend_from_slice(&self.file_id.to_be_bytes());
        buf.extend_from_slice(&(self.payload.len() as u32).to_be_bytes());
        buf.extend_from_slice(&self.payload);
        buf
    }

    /// Deserialize from a received datagram.
    ///
    /// # Errors
    ///
    /// Returns [`DecodeError`] if `buf` is short, any declared length
    /// overflows the remaining buffer, an id field is not valid UTF-8, or
    /// the type tag is not one of the nine known values.
    pub fn decode(buf: &[u8]) -> Result<Self, DecodeError> {
        let mut cursor = Cursor::new(buf);

        let tag = cursor.read_u8()?;
        let packet_type = PacketType::from_u8(tag).ok_or(DecodeError::UnknownType(tag))?;

        let sender_id = cursor.read_string()?;
        let recipient_id = cursor.read_string()?;
        let sequence_number = cursor.read_i32()?;
        let file_id = cursor.read_i32()?;
        let payload = cursor.read_payload()?;

        Ok(Self {
            packet_type,
            sender_id,
            recipient_id,
            sequence_number,
            file_id,
            payload,
        })
    }
}

/// Encode the `FILE_START` payload: a 16-bit length-prefixed UTF-8 filename
/// followed by an `i64` file size.
#[must_use]
pub fn encode_file_start(filename: &str, total_size: i64) -> Vec<u8> {
    let name_bytes = filename.as_bytes();
    let mut buf = Vec::with_capacity(2 + name_bytes.len() + 8);
    buf.extend_from_slice(&(name_bytes.len() as u16).to_be_bytes());
    buf.extend_from_slice(name_bytes);
    buf.extend_from_slice(&total_size.to_be_bytes());
    buf
}

/// Decode a `FILE_START` payload produced by [`encode_file_start`].
pub fn decode_file_start(payload: &[u8]) -> Result<(String, i64), DecodeError> {
    let mut cursor = Cursor::new(payload);
    let name_len = cursor.read_u16()? as usize;
    let name_bytes = cursor.take(name_len)?;
    let filename =
        String::from_utf8(name_bytes.to_vec()).map_err(|_| DecodeError::InvalidUtf8)?;
    let total_size = cursor.read_i64()?;
    Ok((filename, total_size))
}

/// Encode the `FILE_END` payload: the authoritative total chunk count.
#[must_use]
pub fn encode_file_end(total_chunks: i32) -> Vec<u8> {
    total_chunks.to_be_bytes().to_vec()
}

/// Decode a `FILE_END` payload produced by [`encode_file_end`].
pub fn decode_file_end(payload: &[u8]) -> Result<i32, DecodeError> {
    let mut cursor = Cursor::new(payload);
    cursor.read_i32()
}

/// ASCII prefix of the `CLIENT_LIST` payload, followed by a comma-joined id list.
pub const CLIENT_LIST_PREFIX: &str = "ONLINE_USERS:";

/// Encode a `CLIENT_LIST` payload from an iterator of peer ids.
pub fn encode_client_list<I, S>(ids: I) -> Vec<u8>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let joined = ids
        .into_iter()
        .map(|id| id.as_ref().to_string())
        .collect::<Vec<_>>()
        .join(",");
    format!("{CLIENT_LIST_PREFIX}{joined}").into_bytes()
}

/// Decode a `CLIENT_LIST` payload back into a vector of peer ids.
///
/// Returns an empty vector if the payload does not carry the expected
/// `ONLINE_USERS:` prefix, or if there are no ids after it.
#[must_use]
pub fn decode_client_list(payload: &[u8]) -> Vec<String> {
    let text = String::from_utf8_lossy(payload);
    let Some(rest) = text.strip_prefix(CLIENT_LIST_PREFIX) else {
        return Vec::new();
    };
    if rest.is_empty() {
        return Vec::new();
    }
    rest.split(',').map(str::to_string).collect()
}

/// Deserialization failure kinds. All are handled by the caller as
/// log-and-drop — see the malformed-frame policy in the relay core.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecodeError {
    /// Buffer ended before a fixed-size field could be read.
    Truncated,
    /// A declared length field claims more bytes than remain in the buffer.
    LengthOverflow,
    /// The declared payload length did not match the remaining buffer.
    PayloadLengthMismatch,
    /// An id or filename field was not valid UTF-8.
    InvalidUtf8,
    /// The leading type tag did not match any known [`PacketType`].
    UnknownType(u8),
}

impl fmt::Display for DecodeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Truncated => write!(f, "frame truncated"),
            Self::LengthOverflow => write!(f, "declared length exceeds remaining buffer"),
            Self::PayloadLengthMismatch => {
                write!(f, "declared payload length does not match remaining bytes")
            }
            Self::InvalidUtf8 => write!(f, "id or filename field is not valid UTF-8"),
            Self::UnknownType(tag) => write!(f, "unknown packet type tag: {tag}"),
        }
    }
}

impl std::error::Error for DecodeError {}

/// Minimal forward-only byte cursor used by both the envelope and payload
/// decoders. Kept private: callers only ever see [`Packet::decode`] and the
/// per-payload helpers.
struct Cursor<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Cursor<'a> {
    fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    fn take(&mut self, len: usize) -> Result<&'a [u8], DecodeError> {
        let end = self.pos.checked_add(len).ok_or(DecodeError::LengthOverflow)?;
        let slice = self.buf.get(self.pos..end).ok_or(DecodeError::LengthOverflow)?;
        self.pos = end;
        Ok(slice)
    }

    fn read_u8(&mut self) -> Result<u8, DecodeError> {
        Ok(self.take(1)?[0])
    }

    fn read_u16(&mut self) -> Result<u16, DecodeError> {
        let bytes: [u8; 2] = self.take(2)?.try_into().map_err(|_| DecodeError::Truncated)?;
        Ok(u16::from_be_bytes(bytes))
    }

    fn read_u32(&mut self) -> Result<u32, DecodeError> {
        let bytes: [u8; 4] = self.take(4)?.try_into().map_err(|_| DecodeError::Truncated)?;
        Ok(u32::from_be_bytes(bytes))
    }

    fn read_i32(&mut self) -> Result<i32, DecodeError> {
        let bytes: [u8; 4] = self.take(4)?.try_into().map_err(|_| DecodeError::Truncated)?;
        Ok(i32::from_be_bytes(bytes))
    }

    fn read_i64(&mut self) -> Result<i64, DecodeError> {
        let bytes: [u8; 8] = self.take(8)?.try_into().map_err(|_| DecodeError::Truncated)?;
        Ok(i64::from_be_bytes(bytes))
    }

    fn read_string(&mut self) -> Result<String, DecodeError> {
        let len = usize::try_from(self.read_u32()?).map_err(|_| DecodeError::LengthOverflow)?;
        let bytes = self.take(len)?;
        String::from_utf8(bytes.to_vec()).map_err(|_| DecodeError::InvalidUtf8)
    }

    fn read_payload(&mut self) -> Result<Vec<u8>, DecodeError> {
        let len = usize::try_from(self.read_u32()?).map_err(|_| DecodeError::LengthOverflow)?;
        if self.buf.len() - self.pos != len {
            return Err(DecodeError::PayloadLengthMismatch);
        }
        Ok(self.take(len)?.to_vec())
    }
}

fn write_str(buf: &mut Vec<u8>, s: &str) {
    let bytes = s.as_bytes();
    buf.extend_from_slice(&(bytes.len() as u32).to_be_bytes());
    buf.extend_from_slice(bytes);
}
