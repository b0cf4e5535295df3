//! The 9-byte fixed header every message carries (`spec.md` §4.1):
//!
//! | field | width | notes |
//! |-------|-------|-------|
//! | `type` | 1 | message kind, §6.1 |
//! | `length` | 4 | payload length in bytes, network byte order |
//! | `sequence` | 4 | sender-assigned, network byte order |

use tokio::io::{AsyncReadExt, AsyncWriteExt};

use crate::errors::WireError;
use crate::message::MessageType;

pub const HEADER_SIZE: usize = 9;

/// Per-message-body cap for control messages (§4.1). Frame bodies use the
/// streaming variant of §4.7 and bypass this cap.
pub const MAX_CONTROL_PAYLOAD: u32 = 65_535;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameHeader {
    pub msg_type: u8,
    pub length: u32,
    pub sequence: u32,
}

impl FrameHeader {
    pub fn encode(&self) -> [u8; HEADER_SIZE] {
        let mut buf = [0u8; HEADER_SIZE];
        buf[0] = self.msg_type;
        buf[1..5].copy_from_slice(&self.length.to_be_bytes());
        buf[5..9].copy_from_slice(&self.sequence.to_be_bytes());
        buf
    }

    pub fn decode(buf: &[u8; HEADER_SIZE]) -> Self {
        Self {
            msg_type: buf[0],
            length: u32::from_be_bytes([buf[1], buf[2], buf[3], buf[4]]),
            sequence: u32::from_be_bytes([buf[5], buf[6], buf[7], buf[8]]),
        }
    }
}

/// Per-connection sequence counter (`spec.md` §9: "thread-local sequence
/// counter" — here, owned by the connection's framing state rather than
/// any process-global).
#[derive(Debug, Default)]
pub struct SequenceCounter(u32);

impl SequenceCounter {
    pub fn new() -> Self {
        Self(0)
    }

    /// Returns the next sequence number, wrapping on overflow (tolerated
    /// per `spec.md` §3).
    pub fn next(&mut self) -> u32 {
        let seq = self.0;
        self.0 = self.0.wrapping_add(1);
        seq
    }
}

/// Writes a header followed by `payload`. Does not enforce the control-message
/// cap — callers that need it use [`send_control`].
pub async fn send_raw<W: tokio::io::AsyncWrite + Unpin>(
    writer: &mut W,
    msg_type: MessageType,
    sequence: u32,
    payload: &[u8],
) -> Result<(), WireError> {
    let header = FrameHeader {
        msg_type: msg_type.into(),
        length: payload.len() as u32,
        sequence,
    };
    writer.write_all(&header.encode()).await?;
    if !payload.is_empty() {
        writer.write_all(payload).await?;
    }
    Ok(())
}

/// Writes a control message, capping the payload at [`MAX_CONTROL_PAYLOAD`].
pub async fn send_control<W: tokio::io::AsyncWrite + Unpin>(
    writer: &mut W,
    seq: &mut SequenceCounter,
    msg_type: MessageType,
    payload: &[u8],
) -> Result<(), WireError> {
    if payload.len() as u32 > MAX_CONTROL_PAYLOAD {
        return Err(WireError::PayloadTooLarge { len: payload.len() as u32, cap: MAX_CONTROL_PAYLOAD });
    }
    send_raw(writer, msg_type, seq.next(), payload).await
}

/// Reads one header. Returns `Err(WireError::CleanClose)` on EOF before any
/// header byte is read, `Err(WireError::UnexpectedEof)` on EOF mid-header.
pub async fn recv_header<R: tokio::io::AsyncRead + Unpin>(
    reader: &mut R,
) -> Result<FrameHeader, WireError> {
    let mut buf = [0u8; HEADER_SIZE];
    let mut read = 0usize;
    while read < HEADER_SIZE {
        let n = reader.read(&mut buf[read..]).await?;
        if n == 0 {
            return Err(if read == 0 { WireError::CleanClose } else { WireError::UnexpectedEof });
        }
        read += n;
    }
    Ok(FrameHeader::decode(&buf))
}

/// Reads a control message: header + exactly-sized payload, capped at
/// [`MAX_CONTROL_PAYLOAD`].
pub async fn recv_control<R: tokio::io::AsyncRead + Unpin>(
    reader: &mut R,
) -> Result<(FrameHeader, Vec<u8>), WireError> {
    let header = recv_header(reader).await?;
    if header.length > MAX_CONTROL_PAYLOAD {
        return Err(WireError::PayloadTooLarge { len: header.length, cap: MAX_CONTROL_PAYLOAD });
    }
    let mut payload = vec![0u8; header.length as usize];
    if !payload.is_empty() {
        reader.read_exact(&mut payload).await.map_err(|_| WireError::UnexpectedEof)?;
    }
    Ok((header, payload))
}
