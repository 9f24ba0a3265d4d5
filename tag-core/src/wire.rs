//! Framing: fixed 12-byte little-endian header followed by `length` payload bytes.
//! One radio receive is one frame, so there is no outer length prefix.

use crate::address::{Address, ADDRESS_SIZE};
use crate::protocol::{Command, HEADER_SIZE, MAX_PAYLOAD, PROTOCOL_VERSION};

/// One protocol message. `payload.len()` is the header's `length` field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Packet {
    pub version: u8,
    pub source: Address,
    pub destination: Address,
    pub sequence: u16,
    pub command: Command,
    pub payload: Vec<u8>,
}

impl Packet {
    /// Packet at the current protocol version.
    pub fn new(
        source: Address,
        destination: Address,
        sequence: u16,
        command: Command,
        payload: Vec<u8>,
    ) -> Self {
        Self {
            version: PROTOCOL_VERSION,
            source,
            destination,
            sequence,
            command,
            payload,
        }
    }

    pub fn encoded_len(&self) -> usize {
        HEADER_SIZE + self.payload.len()
    }
}

/// Encode a packet into a single frame.
pub fn encode_frame(packet: &Packet) -> Result<Vec<u8>, FrameError> {
    let len = packet.payload.len();
    if len > MAX_PAYLOAD {
        return Err(FrameError::TooLarge(len));
    }
    if !packet.command.accepts_length(len) {
        return Err(FrameError::LengthMismatch {
            command: packet.command.code(),
            length: len,
        });
    }
    let mut out = Vec::with_capacity(packet.encoded_len());
    out.push(packet.version);
    out.extend_from_slice(&packet.source.to_bytes());
    out.extend_from_slice(&packet.destination.to_bytes());
    out.extend_from_slice(&packet.sequence.to_le_bytes());
    out.extend_from_slice(&packet.command.code().to_le_bytes());
    out.push(len as u8);
    out.extend_from_slice(&packet.payload);
    Ok(out)
}

/// Destination field of a raw frame, without validating the rest.
/// Used by the receive path to filter before buffering.
pub fn peek_destination(bytes: &[u8]) -> Option<Address> {
    if bytes.len() < HEADER_SIZE {
        return None;
    }
    Some(Address::from_bytes([bytes[4], bytes[5], bytes[6]]))
}

/// Decode one frame. Checks, in order: header present, version, command and
/// length against the table, then that exactly `length` payload bytes follow.
pub fn decode_frame(bytes: &[u8]) -> Result<Packet, FrameError> {
    if bytes.len() < HEADER_SIZE {
        return Err(FrameError::TooShort(bytes.len()));
    }
    let version = bytes[0];
    if version != PROTOCOL_VERSION {
        return Err(FrameError::VersionMismatch(version));
    }
    let source = Address::from_bytes([bytes[1], bytes[2], bytes[3]]);
    let destination = Address::from_bytes([bytes[4], bytes[5], bytes[6]]);
    let off = 1 + 2 * ADDRESS_SIZE;
    let sequence = u16::from_le_bytes([bytes[off], bytes[off + 1]]);
    let code = u16::from_le_bytes([bytes[off + 2], bytes[off + 3]]);
    let length = bytes[off + 4] as usize;
    let command = Command::from_code(code).ok_or(FrameError::UnknownCommand(code))?;
    if !command.accepts_length(length) {
        return Err(FrameError::LengthMismatch {
            command: code,
            length,
        });
    }
    if bytes.len() != HEADER_SIZE + length {
        return Err(FrameError::SizeMismatch {
            expected: HEADER_SIZE + length,
            actual: bytes.len(),
        });
    }
    Ok(Packet {
        version,
        source,
        destination,
        sequence,
        command,
        payload: bytes[HEADER_SIZE..].to_vec(),
    })
}

/// Malformed frame. Always handled by discarding the frame.
#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    #[error("frame shorter than header: {0} bytes")]
    TooShort(usize),
    #[error("protocol version mismatch: {0}")]
    VersionMismatch(u8),
    #[error("unknown command {0:#06x}")]
    UnknownCommand(u16),
    #[error("length {length} not registered for command {command:#06x}")]
    LengthMismatch { command: u16, length: usize },
    #[error("frame size {actual} does not match header ({expected})")]
    SizeMismatch { expected: usize, actual: usize },
    #[error("payload too large: {0} bytes")]
    TooLarge(usize),
    #[error("payload record: {0}")]
    Record(#[from] bincode::Error),
}
